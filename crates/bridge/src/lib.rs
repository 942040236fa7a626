//! Background execution bridge.
//!
//! A synchronous driver (a terminal loop, a blocking request handler) owns a
//! [`SchedulerHandle`]: one single-threaded tokio runtime on a dedicated
//! worker thread. Work is submitted to it and either awaited through a
//! [`TaskHandle`] or waited on in place. Streams of results flow back over a
//! [`delivery_channel`] terminated by an explicit end marker.

pub mod delivery;
pub mod error;
pub mod scheduler;

pub use delivery::{Delivery, DeliveryReceiver, DeliverySender, delivery_channel};
pub use error::BridgeError;
pub use scheduler::{SchedulerHandle, TaskHandle};

//! Single-producer, single-consumer delivery queue with an end marker.
//!
//! The producer is an async task on the scheduler; the consumer is a
//! synchronous thread draining items as they arrive. The queue is unbounded,
//! so the producer never waits on a slow consumer.

use tokio::sync::mpsc;

use crate::error::BridgeError;

/// One entry on the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Item(T),
    End,
}

pub struct DeliverySender<T> {
    tx: mpsc::UnboundedSender<Delivery<T>>,
}

pub struct DeliveryReceiver<T> {
    rx: mpsc::UnboundedReceiver<Delivery<T>>,
    ended: bool,
}

/// Create a delivery queue.
pub fn delivery_channel<T>() -> (DeliverySender<T>, DeliveryReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeliverySender { tx }, DeliveryReceiver { rx, ended: false })
}

impl<T> DeliverySender<T> {
    pub fn send(&self, item: T) -> Result<(), BridgeError> {
        self.tx
            .send(Delivery::Item(item))
            .map_err(|_| BridgeError::ConsumerLost)
    }

    /// Send the end marker. Nothing can be sent afterwards.
    pub fn finish(self) {
        let _ = self.tx.send(Delivery::End);
    }
}

impl<T> DeliveryReceiver<T> {
    /// Block until the next item.
    ///
    /// `Ok(None)` means the producer sent the end marker. A producer that
    /// disappears without it yields [`BridgeError::ProducerLost`].
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async context.
    pub fn next_blocking(&mut self) -> Result<Option<T>, BridgeError> {
        if self.ended {
            return Ok(None);
        }
        match self.rx.blocking_recv() {
            Some(Delivery::Item(item)) => Ok(Some(item)),
            Some(Delivery::End) => {
                self.ended = true;
                Ok(None)
            }
            None => Err(BridgeError::ProducerLost),
        }
    }

    /// Whether the end marker has been received.
    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

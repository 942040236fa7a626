//! Chat session state.
//!
//! A [`Session`] is what one UI connection sees: the active thread, the
//! threads known to this connection with their titles and pins, the visible
//! message history, and whether the chat is temporary. It is synchronous;
//! all agent work goes through the background scheduler.

pub mod display;
pub mod error;
pub mod session;
pub mod title;

pub use display::{DisplayMessage, DisplayRole, IndicatorState, ToolIndicator, TurnRenderer, TurnState};
pub use error::SessionError;
pub use session::{Session, SessionSnapshot, SidebarEntry, TurnOutcome};
pub use title::{DEFAULT_TITLE, generate_title};

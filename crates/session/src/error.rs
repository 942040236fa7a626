use thiserror::Error;
use threadline_bridge::BridgeError;
use threadline_core::message::ThreadId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyInput,

    #[error("a turn is already running in this session")]
    TurnInProgress,

    #[error("unknown thread: {0}")]
    UnknownThread(ThreadId),

    #[error("title is empty")]
    EmptyTitle,

    #[error("saved threads are unavailable in temporary mode")]
    TemporaryMode,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

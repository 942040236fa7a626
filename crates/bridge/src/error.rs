use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The scheduler thread is not running, or it stopped before the task finished.
    #[error("background scheduler is unavailable")]
    Unavailable,

    /// The scheduler thread could not be started.
    #[error("failed to start background scheduler: {0}")]
    Start(String),

    /// The producing task went away without sending the end marker.
    #[error("result stream ended without an end marker")]
    ProducerLost,

    /// The consumer dropped its receiver.
    #[error("result stream consumer is gone")]
    ConsumerLost,
}

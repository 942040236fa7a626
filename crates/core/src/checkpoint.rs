//! Checkpoint store trait: durable per-thread conversation history.
//!
//! The chat graph appends one checkpoint per step of a turn (the user input,
//! then every chat and tools node that ran). Loading a thread concatenates
//! the messages of all its checkpoints in step order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::message::{Message, ThreadId};

/// What produced a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// The user's input entering the graph.
    Input,
    /// A node that ran inside the graph loop.
    Loop,
}

impl CheckpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Loop => "loop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(Self::Input),
            "loop" => Some(Self::Loop),
            _ => None,
        }
    }
}

/// One step's worth of messages written to a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,

    /// Position within the thread. Assigned by the store on append.
    #[serde(default)]
    pub step: u64,

    pub source: CheckpointSource,

    /// Run name of the turn that wrote this checkpoint (e.g. `chat_turn`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,

    /// Messages added by this step.
    pub messages: Vec<Message>,

    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: ThreadId, source: CheckpointSource, messages: Vec<Message>) -> Self {
        Self {
            thread_id,
            step: 0,
            source,
            run_name: None,
            messages,
            created_at: Utc::now(),
        }
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }
}

/// A durable store of thread checkpoints.
///
/// Reads (`list_threads`, `load`) may run concurrently with a single writer
/// appending checkpoints for a turn.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Every thread with at least one checkpoint, without duplicates, in
    /// order of first appearance.
    async fn list_threads(&self) -> Result<Vec<ThreadId>, CheckpointError>;

    /// Full ordered history of a thread. Unknown threads yield an empty list.
    async fn load(&self, thread_id: &ThreadId) -> Result<Vec<Message>, CheckpointError>;

    /// Append a checkpoint and return the step number it was stored under.
    async fn append(&self, checkpoint: Checkpoint) -> Result<u64, CheckpointError>;

    /// Number of checkpoints stored for a thread.
    async fn count(&self, thread_id: &ThreadId) -> Result<u64, CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_roundtrips_through_str() {
        for source in [CheckpointSource::Input, CheckpointSource::Loop] {
            assert_eq!(CheckpointSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(CheckpointSource::parse("fork"), None);
    }

    #[test]
    fn new_checkpoint_starts_unnumbered() {
        let cp = Checkpoint::new(
            ThreadId::from("t"),
            CheckpointSource::Input,
            vec![Message::user("hi")],
        )
        .with_run_name("chat_turn");
        assert_eq!(cp.step, 0);
        assert_eq!(cp.run_name.as_deref(), Some("chat_turn"));
    }
}

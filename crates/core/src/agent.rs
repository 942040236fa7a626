//! Agent contract: what a chat session needs from the agent behind it.
//!
//! The session never talks to providers, tools, or the checkpoint store
//! directly. It hands a user message and a [`RunConfig`] to an
//! [`AgentBackend`] and consumes the [`AgentStreamEvent`] sequence it returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::{Message, ThreadId};
use crate::provider::Usage;

/// Run name used for persisted chat turns.
pub const CHAT_TURN_RUN: &str = "chat_turn";

/// Run name used for temporary (unsaved) chat turns.
pub const TEMPORARY_RUN: &str = "temp_chat";

/// Per-turn configuration passed to the agent.
///
/// A config without a thread id is a temporary run: the agent neither loads
/// nor writes checkpoints for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,

    pub run_name: String,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RunConfig {
    /// A run that reads and appends the checkpoints of `thread_id`.
    pub fn persistent(thread_id: ThreadId) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "thread_id".into(),
            serde_json::Value::String(thread_id.to_string()),
        );
        Self {
            thread_id: Some(thread_id),
            run_name: CHAT_TURN_RUN.into(),
            metadata,
        }
    }

    /// A run with no thread: nothing is loaded or persisted.
    pub fn temporary() -> Self {
        Self {
            thread_id: None,
            run_name: TEMPORARY_RUN.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.thread_id.is_none()
    }
}

/// Events emitted by the agent while a turn runs.
///
/// Wire names:
/// - `text_delta`  partial assistant text from the LLM
/// - `tool_call`   the agent is invoking a tool
/// - `tool_result` a tool finished (successfully or with an error payload)
/// - `done`        the turn completed; always the last event on success
/// - `error`       the turn failed; always the last event on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    TextDelta { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The turn is complete.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        usage: Option<Usage>,
        iterations: usize,
        tool_calls_made: usize,
    },

    /// The turn failed mid-stream.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Name of the tool for tool-kind events.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolCall { name, .. } | Self::ToolResult { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// The agent as seen from a chat session.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Run one turn and stream its events. The returned receiver yields the
    /// events in production order and ends with exactly one `done` or `error`.
    async fn stream_turn(
        &self,
        message: String,
        config: RunConfig,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>>;

    /// Full stored history of a thread. Safe to call repeatedly.
    async fn thread_history(&self, thread_id: &ThreadId) -> Result<Vec<Message>>;

    /// Every thread known to the checkpoint store.
    async fn list_threads(&self) -> Result<Vec<ThreadId>>;

    /// Run one turn to completion and return the final assistant message.
    ///
    /// The message holds the text streamed after the last tool activity.
    async fn invoke(&self, message: String, config: RunConfig) -> Result<Message> {
        let mut events = self.stream_turn(message, config).await?;
        let mut text = String::new();
        while let Some(event) = events.recv().await {
            match event {
                AgentStreamEvent::TextDelta { content } => text.push_str(&content),
                AgentStreamEvent::ToolCall { .. } | AgentStreamEvent::ToolResult { .. } => {
                    text.clear()
                }
                AgentStreamEvent::Done { .. } => return Ok(Message::assistant(text)),
                AgentStreamEvent::Error { message } => return Err(Error::Internal(message)),
            }
        }
        Err(Error::Internal("agent stream ended without a done event".into()))
    }
}

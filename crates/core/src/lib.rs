//! # Threadline Core
//!
//! Domain types, traits, and error definitions for the Threadline chat agent.
//! This crate has **no framework dependencies**: it defines the domain model
//! that every other crate implements against.
//!
//! Every collaborator the chat session talks to (the LLM provider, tools, the
//! checkpoint store, the agent itself) is a trait here, so the session layer
//! can be exercised against scripted stand-ins.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod checkpoint;
pub mod agent;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Conversation, Message, Role, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use tool::{Tool, ToolCall, ToolResult, ToolRegistry};
pub use checkpoint::{Checkpoint, CheckpointSource, CheckpointStore};
pub use agent::{AgentBackend, AgentStreamEvent, RunConfig};

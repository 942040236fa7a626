//! The chat agent graph.
//!
//! Each turn walks a small graph:
//!
//! 1. **Input**: the user message is appended to the thread
//! 2. **Chat node**: system prompt + thread history + tool definitions go to
//!    the LLM; text deltas stream out as they arrive
//! 3. **Tools node**: if the LLM asked for tools, every call is executed and
//!    its result appended, then control returns to the chat node
//! 4. **End**: once the LLM answers without tool calls
//!
//! When the run carries a thread id, a checkpoint is written after every
//! step, so the thread's history can be replayed from the store alone.

pub mod chat_agent;
pub mod graph;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use chat_agent::ChatAgent;
pub use graph::MAX_ITERATIONS_NOTICE;

//! One turn through the chat graph, run as a spawned task.

use std::sync::Arc;
use std::time::Duration;

use threadline_core::agent::{AgentStreamEvent, RunConfig};
use threadline_core::checkpoint::{Checkpoint, CheckpointSource, CheckpointStore};
use threadline_core::error::CheckpointError;
use threadline_core::message::{Message, MessageToolCall, ThreadId};
use threadline_core::provider::{Provider, ProviderRequest, Usage};
use threadline_core::tool::{ToolCall, ToolRegistry};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Final text when the tool loop runs out of iterations.
pub const MAX_ITERATIONS_NOTICE: &str =
    "I've reached the maximum number of tool call iterations. Please provide further guidance.";

/// Everything a turn needs, detached from the agent so it can move into a task.
pub(crate) struct GraphRun {
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub tools: Arc<ToolRegistry>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub max_tool_iterations: usize,
    pub tool_timeout: Duration,
}

/// Output of one chat node step.
struct ChatStep {
    content: String,
    tool_calls: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

impl GraphRun {
    /// Run the turn to completion, sending exactly one terminal event.
    pub async fn run(self, user_message: String, config: RunConfig, tx: mpsc::Sender<AgentStreamEvent>) {
        let terminal = match self.drive(user_message, &config, &tx).await {
            Ok(done) => done,
            Err(message) => {
                warn!(run = %config.run_name, error = %message, "Chat turn failed");
                AgentStreamEvent::Error { message }
            }
        };
        // The receiver may be gone; the turn still ran to completion.
        let _ = tx.send(terminal).await;
    }

    async fn drive(
        &self,
        user_message: String,
        config: &RunConfig,
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<AgentStreamEvent, String> {
        let thread_id = config.thread_id.as_ref();

        let mut messages = match thread_id {
            Some(id) => self
                .checkpoints
                .load(id)
                .await
                .map_err(|e| format!("Failed to load thread history: {e}"))?,
            None => Vec::new(),
        };
        info!(
            thread_id = thread_id.map(ThreadId::as_str).unwrap_or("-"),
            run = %config.run_name,
            history = messages.len(),
            "Starting chat turn"
        );

        let user = Message::user(user_message);
        self.checkpoint(config, CheckpointSource::Input, vec![user.clone()])
            .await
            .map_err(|e| format!("Failed to save checkpoint: {e}"))?;
        messages.push(user);

        let tool_definitions = self.tools.definitions();
        let mut iterations = 0usize;
        let mut tool_calls_made = 0usize;
        let mut last_usage = None;

        loop {
            iterations += 1;
            if iterations > self.max_tool_iterations {
                warn!(iterations, "Max tool iterations reached, ending turn");
                let notice = Message::assistant(MAX_ITERATIONS_NOTICE);
                self.checkpoint(config, CheckpointSource::Loop, vec![notice])
                    .await
                    .map_err(|e| format!("Failed to save checkpoint: {e}"))?;
                let _ = tx
                    .send(AgentStreamEvent::TextDelta {
                        content: MAX_ITERATIONS_NOTICE.into(),
                    })
                    .await;
                break;
            }

            // ── Chat node ──
            let step = self.chat_node(&messages, &tool_definitions, tx).await?;
            if step.usage.is_some() {
                last_usage = step.usage;
            }

            let mut assistant = Message::assistant(step.content);
            assistant.tool_calls = step.tool_calls;
            self.checkpoint(config, CheckpointSource::Loop, vec![assistant.clone()])
                .await
                .map_err(|e| format!("Failed to save checkpoint: {e}"))?;
            let requested = assistant.tool_calls.clone();
            messages.push(assistant);

            if requested.is_empty() {
                break;
            }

            // ── Tools node ──
            debug!(tool_count = requested.len(), "Executing tool calls");
            let mut results = Vec::with_capacity(requested.len());
            for tc in &requested {
                tool_calls_made += 1;
                let arguments: serde_json::Value =
                    serde_json::from_str(&tc.arguments).unwrap_or_default();

                let _ = tx
                    .send(AgentStreamEvent::ToolCall {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: arguments.clone(),
                    })
                    .await;

                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments,
                };
                let result = self.tools.execute_reported(&call, self.tool_timeout).await;

                let _ = tx
                    .send(AgentStreamEvent::ToolResult {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        output: result.output.clone(),
                        success: result.success,
                    })
                    .await;

                results.push(Message::tool_result(&tc.id, &tc.name, result.output));
            }

            self.checkpoint(config, CheckpointSource::Loop, results.clone())
                .await
                .map_err(|e| format!("Failed to save checkpoint: {e}"))?;
            messages.extend(results);
        }

        info!(iterations, tool_calls_made, "Chat turn complete");
        Ok(AgentStreamEvent::Done {
            thread_id: thread_id.map(ToString::to_string),
            usage: last_usage,
            iterations: iterations.min(self.max_tool_iterations),
            tool_calls_made,
        })
    }

    /// Stream one LLM response, forwarding text deltas as they arrive.
    async fn chat_node(
        &self,
        history: &[Message],
        tool_definitions: &[threadline_core::provider::ToolDefinition],
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<ChatStep, String> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(Message::system(prompt));
        }
        messages.extend_from_slice(history);

        let request = ProviderRequest::chat(self.model.clone(), messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_tools(tool_definitions.to_vec());

        let mut stream = self
            .provider
            .stream(request)
            .await
            .map_err(|e| format!("Provider error: {e}"))?;

        let mut step = ChatStep {
            content: String::new(),
            tool_calls: Vec::new(),
            usage: None,
        };

        while let Some(chunk) = stream.recv().await {
            let chunk = chunk.map_err(|e| format!("Stream error: {e}"))?;

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                step.content.push_str(&text);
                let _ = tx.send(AgentStreamEvent::TextDelta { content: text }).await;
            }

            // Merge or add tool call deltas
            for tc in chunk.tool_calls {
                if let Some(existing) = step.tool_calls.iter_mut().find(|t| t.id == tc.id) {
                    existing.arguments.push_str(&tc.arguments);
                } else {
                    step.tool_calls.push(tc);
                }
            }

            if chunk.usage.is_some() {
                step.usage = chunk.usage;
            }
        }

        Ok(step)
    }

    async fn checkpoint(
        &self,
        config: &RunConfig,
        source: CheckpointSource,
        messages: Vec<Message>,
    ) -> Result<(), CheckpointError> {
        let Some(thread_id) = config.thread_id.clone() else {
            return Ok(());
        };
        let step = self
            .checkpoints
            .append(Checkpoint::new(thread_id, source, messages).with_run_name(&config.run_name))
            .await?;
        debug!(step, source = source.as_str(), "Checkpoint written");
        Ok(())
    }
}

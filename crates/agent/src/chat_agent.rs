//! The checkpoint-backed chat agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use threadline_config::AppConfig;
use threadline_core::agent::{AgentBackend, AgentStreamEvent, RunConfig};
use threadline_core::checkpoint::CheckpointStore;
use threadline_core::error::Result;
use threadline_core::message::{Message, ThreadId};
use threadline_core::provider::Provider;
use threadline_core::tool::ToolRegistry;
use tokio::sync::mpsc;
use tracing::info;

use crate::graph::GraphRun;

/// Chat agent: one LLM, a tool registry, and a checkpoint store.
pub struct ChatAgent {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    tools: Arc<ToolRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    max_tool_iterations: usize,
    tool_timeout: Duration,
}

impl ChatAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            system_prompt: None,
            tools,
            checkpoints,
            max_tool_iterations: 25,
            tool_timeout: Duration::from_secs(30),
        }
    }

    /// Build the agent described by the configuration: default provider,
    /// enabled built-in tools, and the configured checkpoint backend.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let router = threadline_providers::build_from_config(config);
        let provider = router.require_default()?;
        let tools = Arc::new(threadline_tools::default_registry(&config.tools));
        let checkpoints = threadline_checkpoint::open_store(&config.checkpoint).await?;

        info!(
            provider = %config.default_provider,
            model = %config.active_model(),
            tools = tools.len(),
            checkpoint = checkpoints.name(),
            "Chat agent ready"
        );

        Ok(
            Self::new(provider, config.active_model(), tools, checkpoints)
                .with_temperature(config.default_temperature)
                .with_max_tokens(config.default_max_tokens)
                .with_system_prompt(config.system_prompt.clone())
                .with_max_tool_iterations(config.agent.max_tool_iterations)
                .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs)),
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Set the maximum number of chat node passes per turn.
    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    fn graph_run(&self) -> GraphRun {
        GraphRun {
            provider: self.provider.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone(),
            tools: self.tools.clone(),
            checkpoints: self.checkpoints.clone(),
            max_tool_iterations: self.max_tool_iterations,
            tool_timeout: self.tool_timeout,
        }
    }
}

#[async_trait]
impl AgentBackend for ChatAgent {
    async fn stream_turn(
        &self,
        message: String,
        config: RunConfig,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>> {
        let (tx, rx) = mpsc::channel(128);
        let run = self.graph_run();
        tokio::spawn(run.run(message, config, tx));
        Ok(rx)
    }

    async fn thread_history(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        Ok(self.checkpoints.load(thread_id).await?)
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>> {
        Ok(self.checkpoints.list_threads().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MAX_ITERATIONS_NOTICE;
    use crate::test_helpers::*;
    use threadline_checkpoint::InMemoryCheckpointStore;
    use threadline_core::checkpoint::CheckpointSource;
    use threadline_core::message::Role;
    use threadline_tools::CalculatorTool;

    fn calculator_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CalculatorTool::default()));
        Arc::new(registry)
    }

    async fn collect(agent: &ChatAgent, text: &str, config: RunConfig) -> Vec<AgentStreamEvent> {
        let mut rx = agent.stream_turn(text.into(), config).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn simple_text_turn_is_persisted() {
        let store = InMemoryCheckpointStore::new();
        let agent = ChatAgent::new(
            Arc::new(SequentialMockProvider::single_text("Hello! How can I help?")),
            "mock-model",
            Arc::new(ToolRegistry::new()),
            Arc::new(store.clone()),
        );
        let thread = ThreadId::new();

        let events = collect(&agent, "Hello!", RunConfig::persistent(thread.clone())).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], AgentStreamEvent::TextDelta { content } if content == "Hello! How can I help?"));
        match &events[1] {
            AgentStreamEvent::Done { thread_id, iterations, tool_calls_made, .. } => {
                assert_eq!(thread_id.as_deref(), Some(thread.as_str()));
                assert_eq!(*iterations, 1);
                assert_eq!(*tool_calls_made, 0);
            }
            other => panic!("Expected Done, got {other:?}"),
        }

        let history = agent.thread_history(&thread).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Hello! How can I help?");
        assert_eq!(agent.list_threads().await.unwrap(), vec![thread]);
    }

    #[tokio::test]
    async fn tool_loop_emits_events_in_order_and_checkpoints_each_step() {
        let store = InMemoryCheckpointStore::new();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("calculate", serde_json::json!({"expression": "2 + 2"}))],
            "",
            "2 + 2 is 4.",
        ));
        let agent = ChatAgent::new(
            provider.clone(),
            "mock-model",
            calculator_registry(),
            Arc::new(store.clone()),
        );
        let thread = ThreadId::new();

        let events = collect(&agent, "What is 2+2?", RunConfig::persistent(thread.clone())).await;
        let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["tool_call", "tool_result", "text_delta", "done"]);
        match &events[1] {
            AgentStreamEvent::ToolResult { output, success, name, .. } => {
                assert_eq!(name, "calculate");
                assert!(success);
                assert_eq!(output, "Result: 4");
            }
            other => panic!("Expected ToolResult, got {other:?}"),
        }
        assert_eq!(provider.call_count(), 2);

        // input, chat (tool call), tools, chat (answer)
        let checkpoints = store.snapshot().await;
        let sources: Vec<_> = checkpoints.iter().map(|c| c.source).collect();
        assert_eq!(
            sources,
            vec![
                CheckpointSource::Input,
                CheckpointSource::Loop,
                CheckpointSource::Loop,
                CheckpointSource::Loop
            ]
        );
        assert!(checkpoints.iter().all(|c| c.run_name.as_deref() == Some("chat_turn")));

        let history = agent.thread_history(&thread).await.unwrap();
        let roles: Vec<_> = history.iter().map(|m| m.role.clone()).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert!(history[1].has_tool_calls());
        assert_eq!(history[2].tool_name.as_deref(), Some("calculate"));
    }

    #[tokio::test]
    async fn history_is_sent_on_the_next_turn() {
        let store = InMemoryCheckpointStore::new();
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("Nice to meet you, Ada."),
            make_text_response("Your name is Ada."),
        ]));
        let agent = ChatAgent::new(
            provider.clone(),
            "mock-model",
            Arc::new(ToolRegistry::new()),
            Arc::new(store),
        )
        .with_system_prompt(Some("You are terse.".into()));
        let thread = ThreadId::new();

        collect(&agent, "I am Ada", RunConfig::persistent(thread.clone())).await;
        collect(&agent, "Who am I?", RunConfig::persistent(thread.clone())).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        assert_eq!(second.messages[0].role, Role::System);
        let contents: Vec<_> = second.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["You are terse.", "I am Ada", "Nice to meet you, Ada.", "Who am I?"]
        );
        assert!(second.temperature.abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn temporary_turn_writes_nothing() {
        let store = InMemoryCheckpointStore::new();
        let agent = ChatAgent::new(
            Arc::new(SequentialMockProvider::single_text("Off the record.")),
            "mock-model",
            Arc::new(ToolRegistry::new()),
            Arc::new(store.clone()),
        );

        let events = collect(&agent, "psst", RunConfig::temporary()).await;
        match events.last().unwrap() {
            AgentStreamEvent::Done { thread_id, .. } => assert!(thread_id.is_none()),
            other => panic!("Expected Done, got {other:?}"),
        }
        assert!(store.is_empty().await);
        assert!(agent.list_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_error_after_partial_text() {
        let agent = ChatAgent::new(
            Arc::new(FailingStreamProvider::new("Result is 4")),
            "mock-model",
            Arc::new(ToolRegistry::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        );

        let events = collect(&agent, "2+2", RunConfig::temporary()).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], AgentStreamEvent::TextDelta { content } if content == "Result is 4"));
        match &events[1] {
            AgentStreamEvent::Error { message } => assert!(message.contains("Stream error")),
            other => panic!("Expected Error, got {other:?}"),
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_fatal() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("teleport", serde_json::json!({}))],
            "",
            "I cannot do that.",
        ));
        let agent = ChatAgent::new(
            provider,
            "mock-model",
            calculator_registry(),
            Arc::new(InMemoryCheckpointStore::new()),
        );

        let events = collect(&agent, "beam me up", RunConfig::temporary()).await;
        match &events[1] {
            AgentStreamEvent::ToolResult { success, output, .. } => {
                assert!(!success);
                assert!(output.starts_with("Error:"));
            }
            other => panic!("Expected ToolResult, got {other:?}"),
        }
        assert!(matches!(events.last().unwrap(), AgentStreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn iteration_limit_ends_turn_with_notice() {
        let call = || vec![make_tool_call("calculate", serde_json::json!({"expression": "1+1"}))];
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(call(), ""),
            make_tool_call_response(call(), ""),
        ]));
        let agent = ChatAgent::new(
            provider,
            "mock-model",
            calculator_registry(),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .with_max_tool_iterations(2);

        let events = collect(&agent, "loop forever", RunConfig::temporary()).await;
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::TextDelta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, MAX_ITERATIONS_NOTICE);
        match events.last().unwrap() {
            AgentStreamEvent::Done { iterations, tool_calls_made, .. } => {
                assert_eq!(*iterations, 2);
                assert_eq!(*tool_calls_made, 2);
            }
            other => panic!("Expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoke_returns_final_answer() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("calculate", serde_json::json!({"expression": "6 * 7"}))],
            "Let me work that out.",
            "The answer is 42.",
        ));
        let agent = ChatAgent::new(
            provider,
            "mock-model",
            calculator_registry(),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let message = agent.invoke("6 * 7?".into(), RunConfig::temporary()).await.unwrap();
        assert_eq!(message.content, "The answer is 42.");
    }

    #[tokio::test]
    async fn from_config_with_memory_backend() {
        let mut config = AppConfig::default();
        config.checkpoint.backend = "memory".into();
        config.tools.stock_price.enabled = false;
        config.system_prompt = Some("Be helpful.".into());

        let agent = ChatAgent::from_config(&config).await.unwrap();
        assert_eq!(agent.model(), "gpt-4o-mini");
        assert_eq!(agent.tools().names(), vec!["calculate", "duckduckgo_search"]);
        assert_eq!(agent.checkpoints().name(), "in_memory");
    }

    #[tokio::test]
    async fn from_config_uses_provider_model() {
        let mut config = AppConfig::default();
        config.checkpoint.backend = "memory".into();
        config.providers.insert(
            "openai".into(),
            threadline_config::ProviderConfig {
                default_model: Some("gpt-4.1".into()),
                ..Default::default()
            },
        );

        let agent = ChatAgent::from_config(&config).await.unwrap();
        assert_eq!(agent.model(), "gpt-4.1");
    }
}

//! What a UI renders: role-tagged messages, tool indicators, turn states.

use serde::Serialize;
use threadline_core::message::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayRole {
    User,
    Assistant,
    Tool,
}

/// One chat bubble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayMessage {
    pub role: DisplayRole,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// The turn failed before this message was finished.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DisplayMessage {
    fn new(role: DisplayRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            incomplete: false,
            error: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(DisplayRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(DisplayRole::Assistant, content)
    }

    /// Assistant text cut short by `error`.
    pub fn failed(partial: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            incomplete: true,
            error: Some(error.into()),
            ..Self::assistant(partial)
        }
    }

    /// Display form of a stored message: user messages stay user, everything
    /// else is shown as the assistant. Messages without text are skipped.
    pub fn from_stored(message: &Message) -> Option<Self> {
        if message.content.is_empty() {
            return None;
        }
        let role = match message.role {
            Role::User => DisplayRole::User,
            _ => DisplayRole::Assistant,
        };
        Some(Self::new(role, message.content.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorState {
    Running,
    Complete,
}

/// Transient "using tools" marker for one run of consecutive tool events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolIndicator {
    /// Distinct tool names in first-seen order.
    pub tools: Vec<String>,
    pub state: IndicatorState,
}

impl ToolIndicator {
    pub(crate) fn start(tool: &str) -> Self {
        Self {
            tools: vec![tool.to_string()],
            state: IndicatorState::Running,
        }
    }

    /// Returns true if the tool was not listed yet.
    pub(crate) fn note(&mut self, tool: &str) -> bool {
        if self.tools.iter().any(|t| t == tool) {
            return false;
        }
        self.tools.push(tool.to_string());
        true
    }

    pub(crate) fn complete(&mut self) {
        self.state = IndicatorState::Complete;
    }

    pub fn is_complete(&self) -> bool {
        self.state == IndicatorState::Complete
    }

    /// Human-readable status line.
    pub fn label(&self) -> String {
        match self.state {
            IndicatorState::Running => {
                let names: Vec<String> = self.tools.iter().map(|t| format!("`{t}`")).collect();
                format!("Using {}...", names.join(", "))
            }
            IndicatorState::Complete => "Tool finished".to_string(),
        }
    }
}

/// Where a session is in its current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    UserMessageAppended,
    StreamingFromAgent,
    ToolActivity,
    AssistantMessageAppended,
}

/// UI hooks called while a turn runs, in order.
///
/// `on_text_delta` gets the new fragment and the text accumulated so far.
/// `on_tool_status` fires when an indicator appears, gains a tool, or
/// completes.
pub trait TurnRenderer {
    fn on_user_message(&mut self, _message: &DisplayMessage) {}

    fn on_text_delta(&mut self, _delta: &str, _accumulated: &str) {}

    fn on_tool_status(&mut self, _indicator: &ToolIndicator) {}

    fn on_assistant_message(&mut self, _message: &DisplayMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_messages_map_roles() {
        let user = DisplayMessage::from_stored(&Message::user("hi")).unwrap();
        assert_eq!(user.role, DisplayRole::User);

        let tool = DisplayMessage::from_stored(&Message::tool_result("c1", "calculate", "Result: 4")).unwrap();
        assert_eq!(tool.role, DisplayRole::Assistant);

        assert!(DisplayMessage::from_stored(&Message::assistant("")).is_none());
    }

    #[test]
    fn indicator_lists_distinct_tools() {
        let mut indicator = ToolIndicator::start("calculate");
        assert!(!indicator.note("calculate"));
        assert!(indicator.note("get_stock_price"));
        assert_eq!(indicator.tools, vec!["calculate", "get_stock_price"]);
        assert_eq!(indicator.label(), "Using `calculate`, `get_stock_price`...");

        indicator.complete();
        assert!(indicator.is_complete());
        assert_eq!(indicator.label(), "Tool finished");
    }

    #[test]
    fn failed_message_serializes_flags() {
        let msg = DisplayMessage::failed("Result is 4", "Stream error");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["incomplete"], true);
        assert_eq!(json["error"], "Stream error");

        let ok = serde_json::to_value(DisplayMessage::user("hi")).unwrap();
        assert!(ok.get("incomplete").is_none());
    }
}

//! The session itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use threadline_bridge::{BridgeError, SchedulerHandle, delivery_channel};
use threadline_config::SessionConfig;
use threadline_core::agent::{AgentBackend, AgentStreamEvent, RunConfig};
use threadline_core::message::{Role, ThreadId};
use tracing::{debug, info, warn};

use crate::display::{DisplayMessage, ToolIndicator, TurnRenderer, TurnState};
use crate::error::SessionError;
use crate::title::{DEFAULT_TITLE, generate_title};

const PLACEHOLDER: &str = "Type a message...";
const TEMPORARY_PLACEHOLDER: &str = "Temporary chat (not saved)";

/// One sidebar row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidebarEntry {
    pub thread_id: ThreadId,
    pub title: String,
    pub pinned: bool,
    pub active: bool,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub thread_id: ThreadId,
    pub temporary: bool,
    pub state: TurnState,
    pub history: Vec<DisplayMessage>,
    /// `None` in temporary mode.
    pub sidebar: Option<Vec<SidebarEntry>>,
    pub rename_target: Option<ThreadId>,
    pub placeholder: &'static str,
}

/// Result of one turn. Agent and bridge failures land in `error`; the
/// assistant message is appended to history either way.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// `None` for temporary turns.
    pub thread_id: Option<ThreadId>,
    pub assistant: DisplayMessage,
    pub indicators: Vec<ToolIndicator>,
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Session {
    bridge: SchedulerHandle,
    agent: Arc<dyn AgentBackend>,
    thread_id: ThreadId,
    threads: Vec<ThreadId>,
    titles: HashMap<ThreadId, String>,
    pinned: HashSet<ThreadId>,
    temporary: bool,
    rename_target: Option<ThreadId>,
    history: Vec<DisplayMessage>,
    state: TurnState,
    title_words: usize,
}

impl Session {
    /// Start a session on a fresh thread, listing the persisted threads first.
    ///
    /// A failing thread listing leaves the list empty.
    pub fn open(bridge: SchedulerHandle, agent: Arc<dyn AgentBackend>, config: &SessionConfig) -> Self {
        let lister = agent.clone();
        let threads = match bridge.submit_blocking(async move { lister.list_threads().await }) {
            Ok(Ok(threads)) => threads,
            Ok(Err(e)) => {
                warn!(error = %e, "Could not list saved threads");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Could not list saved threads");
                Vec::new()
            }
        };

        let mut session = Self {
            bridge,
            agent,
            thread_id: ThreadId::new(),
            threads: Vec::new(),
            titles: HashMap::new(),
            pinned: HashSet::new(),
            temporary: config.start_temporary,
            rename_target: None,
            history: Vec::new(),
            state: TurnState::Idle,
            title_words: config.title_max_words,
        };
        for id in threads {
            session.add_thread(id);
        }
        if !session.temporary {
            session.add_thread(session.thread_id.clone());
        }
        info!(
            thread_id = %session.thread_id,
            known_threads = session.threads.len(),
            temporary = session.temporary,
            "Session opened"
        );
        session
    }

    fn add_thread(&mut self, id: ThreadId) {
        if !self.threads.contains(&id) {
            self.threads.push(id);
        }
    }

    fn require_known(&self, id: &ThreadId) -> Result<(), SessionError> {
        if self.threads.contains(id) {
            Ok(())
        } else {
            Err(SessionError::UnknownThread(id.clone()))
        }
    }

    fn require_idle(&self) -> Result<(), SessionError> {
        if self.state == TurnState::Idle {
            Ok(())
        } else {
            Err(SessionError::TurnInProgress)
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Known threads in insertion order.
    pub fn threads(&self) -> &[ThreadId] {
        &self.threads
    }

    pub fn history(&self) -> &[DisplayMessage] {
        &self.history
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn is_pinned(&self, id: &ThreadId) -> bool {
        self.pinned.contains(id)
    }

    pub fn title(&self, id: &ThreadId) -> &str {
        self.titles.get(id).map(String::as_str).unwrap_or(DEFAULT_TITLE)
    }

    pub fn rename_target(&self) -> Option<&ThreadId> {
        self.rename_target.as_ref()
    }

    /// Start a fresh thread and make it active.
    pub fn new_thread(&mut self) -> Result<&ThreadId, SessionError> {
        self.require_idle()?;
        self.history.clear();
        self.thread_id = ThreadId::new();
        if !self.temporary {
            self.add_thread(self.thread_id.clone());
        }
        debug!(thread_id = %self.thread_id, "New thread");
        Ok(&self.thread_id)
    }

    /// Make `id` active and load its stored history.
    ///
    /// A failing load leaves the history empty.
    pub fn switch_thread(&mut self, id: &ThreadId) -> Result<(), SessionError> {
        self.require_idle()?;
        if self.temporary {
            return Err(SessionError::TemporaryMode);
        }
        self.require_known(id)?;

        self.thread_id = id.clone();
        let agent = self.agent.clone();
        let target = id.clone();
        let stored = match self
            .bridge
            .submit_blocking(async move { agent.thread_history(&target).await })
        {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                warn!(thread_id = %id, error = %e, "Could not load thread history");
                Vec::new()
            }
            Err(e) => {
                warn!(thread_id = %id, error = %e, "Could not load thread history");
                Vec::new()
            }
        };
        if !self.titles.contains_key(id)
            && let Some(first) = stored.iter().find(|m| m.role == Role::User)
        {
            let title = generate_title(&first.content, self.title_words);
            self.titles.insert(id.clone(), title);
        }
        self.history = stored.iter().filter_map(DisplayMessage::from_stored).collect();
        debug!(thread_id = %id, messages = self.history.len(), "Switched thread");
        Ok(())
    }

    /// Forget `id` in this session. Deleting the active thread starts a new one.
    pub fn delete_thread(&mut self, id: &ThreadId) -> Result<(), SessionError> {
        self.require_idle()?;
        self.require_known(id)?;

        self.threads.retain(|t| t != id);
        self.titles.remove(id);
        self.pinned.remove(id);
        if self.rename_target.as_ref() == Some(id) {
            self.rename_target = None;
        }
        debug!(thread_id = %id, "Deleted thread from session");

        if &self.thread_id == id {
            self.new_thread()?;
        }
        Ok(())
    }

    pub fn rename_thread(&mut self, id: &ThreadId, title: &str) -> Result<(), SessionError> {
        self.require_known(id)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::EmptyTitle);
        }
        self.titles.insert(id.clone(), title.to_string());
        self.rename_target = None;
        Ok(())
    }

    /// Mark `id` as the thread being renamed.
    pub fn begin_rename(&mut self, id: &ThreadId) -> Result<(), SessionError> {
        self.require_known(id)?;
        self.rename_target = Some(id.clone());
        Ok(())
    }

    pub fn cancel_rename(&mut self) {
        self.rename_target = None;
    }

    pub fn pin_thread(&mut self, id: &ThreadId) -> Result<(), SessionError> {
        self.require_known(id)?;
        self.pinned.insert(id.clone());
        Ok(())
    }

    pub fn unpin_thread(&mut self, id: &ThreadId) -> Result<(), SessionError> {
        self.require_known(id)?;
        self.pinned.remove(id);
        Ok(())
    }

    /// Flip the pin on `id`; returns the new pinned flag.
    pub fn toggle_pin(&mut self, id: &ThreadId) -> Result<bool, SessionError> {
        if self.is_pinned(id) {
            self.unpin_thread(id)?;
            Ok(false)
        } else {
            self.pin_thread(id)?;
            Ok(true)
        }
    }

    pub fn set_temporary(&mut self, temporary: bool) -> Result<(), SessionError> {
        self.require_idle()?;
        self.temporary = temporary;
        if !temporary {
            self.add_thread(self.thread_id.clone());
        }
        debug!(temporary, "Temporary mode changed");
        Ok(())
    }

    /// Pinned threads, then unpinned, each most recent first.
    /// `None` in temporary mode.
    pub fn sidebar(&self) -> Option<Vec<SidebarEntry>> {
        if self.temporary {
            return None;
        }
        let entry = |id: &ThreadId| SidebarEntry {
            thread_id: id.clone(),
            title: self.title(id).to_string(),
            pinned: self.is_pinned(id),
            active: id == &self.thread_id,
        };
        let pinned = self.threads.iter().rev().filter(|t| self.is_pinned(t)).map(entry);
        let unpinned = self.threads.iter().rev().filter(|t| !self.is_pinned(t)).map(entry);
        Some(pinned.chain(unpinned).collect())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            thread_id: self.thread_id.clone(),
            temporary: self.temporary,
            state: self.state,
            history: self.history.clone(),
            sidebar: self.sidebar(),
            rename_target: self.rename_target.clone(),
            placeholder: if self.temporary {
                TEMPORARY_PLACEHOLDER
            } else {
                PLACEHOLDER
            },
        }
    }

    /// Run one chat turn, blocking until the agent is done.
    ///
    /// Only empty input and an already-running turn are errors; anything that
    /// goes wrong while streaming is reported in the outcome.
    pub fn submit_turn(
        &mut self,
        text: &str,
        renderer: &mut dyn TurnRenderer,
    ) -> Result<TurnOutcome, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }
        self.require_idle()?;

        let user = DisplayMessage::user(text);
        self.history.push(user.clone());
        self.state = TurnState::UserMessageAppended;
        renderer.on_user_message(&user);

        let config = if self.temporary {
            RunConfig::temporary()
        } else {
            if !self.titles.contains_key(&self.thread_id) {
                let title = generate_title(text, self.title_words);
                debug!(thread_id = %self.thread_id, title = %title, "Titled thread");
                self.titles.insert(self.thread_id.clone(), title);
            }
            RunConfig::persistent(self.thread_id.clone())
        };

        let outcome = self.stream_turn(text.to_string(), config, renderer);
        self.state = TurnState::Idle;
        Ok(outcome)
    }

    fn stream_turn(
        &mut self,
        text: String,
        config: RunConfig,
        renderer: &mut dyn TurnRenderer,
    ) -> TurnOutcome {
        let thread_id = config.thread_id.clone();
        let mut turn = TurnProgress::default();

        let (tx, mut rx) = delivery_channel();
        let agent = self.agent.clone();
        let producer = self.bridge.submit(async move {
            match agent.stream_turn(text, config).await {
                Ok(mut events) => {
                    while let Some(event) = events.recv().await {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(AgentStreamEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            tx.finish();
        });

        match producer {
            Ok(_handle) => {
                self.state = TurnState::StreamingFromAgent;
                loop {
                    match rx.next_blocking() {
                        Ok(Some(event)) => self.apply(event, &mut turn, renderer),
                        Ok(None) => break,
                        Err(e) => {
                            turn.error.get_or_insert(e.to_string());
                            break;
                        }
                    }
                }
                if !turn.done && turn.error.is_none() {
                    turn.error = Some(BridgeError::ProducerLost.to_string());
                }
            }
            Err(e) => turn.error = Some(e.to_string()),
        }

        turn.close_indicator(renderer);

        let assistant = match &turn.error {
            Some(error) => {
                warn!(error = %error, "Chat turn failed");
                DisplayMessage::failed(turn.text, error.clone())
            }
            None => DisplayMessage::assistant(turn.text),
        };
        self.history.push(assistant.clone());
        self.state = TurnState::AssistantMessageAppended;
        renderer.on_assistant_message(&assistant);

        TurnOutcome {
            thread_id,
            assistant,
            indicators: turn.indicators,
            error: turn.error,
        }
    }

    fn apply(&mut self, event: AgentStreamEvent, turn: &mut TurnProgress, renderer: &mut dyn TurnRenderer) {
        match event {
            AgentStreamEvent::TextDelta { content } => {
                turn.close_indicator(renderer);
                self.state = TurnState::StreamingFromAgent;
                turn.text.push_str(&content);
                renderer.on_text_delta(&content, &turn.text);
            }
            AgentStreamEvent::ToolCall { name, .. } | AgentStreamEvent::ToolResult { name, .. } => {
                self.state = TurnState::ToolActivity;
                turn.note_tool(&name, renderer);
            }
            AgentStreamEvent::Done { .. } => turn.done = true,
            AgentStreamEvent::Error { message } => {
                turn.error.get_or_insert(message);
            }
        }
    }
}

/// Accumulated state of the turn being streamed.
#[derive(Default)]
struct TurnProgress {
    text: String,
    active: Option<ToolIndicator>,
    indicators: Vec<ToolIndicator>,
    done: bool,
    error: Option<String>,
}

impl TurnProgress {
    fn note_tool(&mut self, name: &str, renderer: &mut dyn TurnRenderer) {
        match &mut self.active {
            Some(indicator) => {
                if indicator.note(name) {
                    renderer.on_tool_status(indicator);
                }
            }
            None => {
                let indicator = ToolIndicator::start(name);
                renderer.on_tool_status(&indicator);
                self.active = Some(indicator);
            }
        }
    }

    fn close_indicator(&mut self, renderer: &mut dyn TurnRenderer) {
        if let Some(mut indicator) = self.active.take() {
            indicator.complete();
            renderer.on_tool_status(&indicator);
            self.indicators.push(indicator);
        }
    }
}

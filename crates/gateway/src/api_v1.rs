//! HTTP API v1: chat sessions for the web UI.
//!
//! Endpoints:
//!
//! - `POST   /v1/sessions`                              Open a session
//! - `GET    /v1/sessions/{id}`                         Session snapshot
//! - `DELETE /v1/sessions/{id}`                         Close a session
//! - `POST   /v1/sessions/{id}/threads`                 Start a new thread
//! - `POST   /v1/sessions/{id}/threads/{tid}/open`      Switch to a thread
//! - `PATCH  /v1/sessions/{id}/threads/{tid}`           Rename a thread
//! - `POST   /v1/sessions/{id}/threads/{tid}/pin`       Pin a thread
//! - `POST   /v1/sessions/{id}/threads/{tid}/unpin`     Unpin a thread
//! - `POST   /v1/sessions/{id}/threads/{tid}/toggle-pin` Flip a thread's pin
//! - `POST   /v1/sessions/{id}/threads/{tid}/rename`    Mark a thread for renaming
//! - `DELETE /v1/sessions/{id}/threads/{tid}`           Remove a thread from the session
//! - `DELETE /v1/sessions/{id}/rename`                  Cancel a pending rename
//! - `PUT    /v1/sessions/{id}/temporary`               Toggle temporary mode
//! - `POST   /v1/sessions/{id}/chat`                    Run a turn, streamed as SSE

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::Json,
    routing::{delete, get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use threadline_bridge::SchedulerHandle;
use threadline_config::AppConfig;
use threadline_core::agent::AgentBackend;
use threadline_core::message::ThreadId;
use threadline_session::{
    DisplayMessage, Session, SessionError, SessionSnapshot, ToolIndicator, TurnRenderer,
};

// ── State ─────────────────────────────────────────────────────────────────

/// Maximum number of open sessions before the oldest is evicted.
const MAX_SESSIONS: usize = 1_000;

struct SessionSlot {
    session: Arc<Mutex<Session>>,
    opened_at: Instant,
}

/// Shared state for the v1 API.
pub struct ApiState {
    pub bridge: SchedulerHandle,
    pub agent: Arc<dyn AgentBackend>,
    pub config: AppConfig,
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

pub type SharedApiState = Arc<ApiState>;

impl ApiState {
    pub fn new(bridge: SchedulerHandle, agent: Arc<dyn AgentBackend>, config: AppConfig) -> Self {
        Self {
            bridge,
            agent,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session(&self, id: &str) -> Result<Arc<Mutex<Session>>, ApiError> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|slot| slot.session.clone())
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown session: {id}")))
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/sessions", post(create_session_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/{id}/threads", post(new_thread_handler))
        .route(
            "/sessions/{id}/threads/{thread_id}",
            patch(rename_thread_handler).delete(delete_thread_handler),
        )
        .route("/sessions/{id}/threads/{thread_id}/open", post(open_thread_handler))
        .route("/sessions/{id}/threads/{thread_id}/pin", post(pin_thread_handler))
        .route("/sessions/{id}/threads/{thread_id}/unpin", post(unpin_thread_handler))
        .route(
            "/sessions/{id}/threads/{thread_id}/toggle-pin",
            post(toggle_pin_handler),
        )
        .route("/sessions/{id}/threads/{thread_id}/rename", post(begin_rename_handler))
        .route("/sessions/{id}/rename", delete(cancel_rename_handler))
        .route("/sessions/{id}/temporary", put(temporary_handler))
        .route("/sessions/{id}/chat", post(chat_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub snapshot: serde_json::Value,
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

#[derive(Deserialize)]
struct TemporaryRequest {
    temporary: bool,
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

/// One SSE event of a streamed turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    UserMessage { message: DisplayMessage },
    TextDelta { content: String },
    ToolStatus { label: String, indicator: ToolIndicator },
    AssistantMessage { message: DisplayMessage },
    Done { thread_id: Option<ThreadId> },
    Error { message: String },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolStatus { .. } => "tool_status",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let status = match &e {
            SessionError::EmptyInput | SessionError::EmptyTitle => StatusCode::BAD_REQUEST,
            SessionError::UnknownThread(_) => StatusCode::NOT_FOUND,
            SessionError::TurnInProgress | SessionError::TemporaryMode => StatusCode::CONFLICT,
            SessionError::Bridge(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

// ── Session plumbing ──────────────────────────────────────────────────────

/// Run `op` against a session on a blocking thread, then return its snapshot.
async fn with_session<F>(state: &ApiState, id: &str, op: F) -> Result<Json<SessionSnapshot>, ApiError>
where
    F: FnOnce(&mut Session) -> Result<(), SessionError> + Send + 'static,
{
    let mut session = state.session(id).await?.lock_owned().await;
    tokio::task::spawn_blocking(move || {
        op(&mut session)?;
        Ok(Json(session.snapshot()))
    })
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn create_session_handler(
    State(state): State<SharedApiState>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let bridge = state.bridge.clone();
    let agent = state.agent.clone();
    let config = state.config.session.clone();
    let session = tokio::task::spawn_blocking(move || Session::open(bridge, agent, &config))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let snapshot = serde_json::to_value(session.snapshot())
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let session_id = uuid::Uuid::new_v4().to_string();

    let mut sessions = state.sessions.write().await;
    // Evict oldest if at capacity
    if sessions.len() >= MAX_SESSIONS
        && let Some(oldest) = sessions
            .iter()
            .min_by_key(|(_, slot)| slot.opened_at)
            .map(|(k, _)| k.clone())
    {
        debug!(session_id = %oldest, "Evicting oldest session");
        sessions.remove(&oldest);
    }
    sessions.insert(
        session_id.clone(),
        SessionSlot {
            session: Arc::new(Mutex::new(session)),
            opened_at: Instant::now(),
        },
    );
    info!(session_id = %session_id, open_sessions = sessions.len(), "Session opened");

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            snapshot,
        }),
    ))
}

/// Snapshot of an idle session; 409 while a turn is streaming.
async fn get_session_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = state.session(&id).await?;
    let session = session
        .try_lock()
        .map_err(|_| ApiError::from(SessionError::TurnInProgress))?;
    Ok(Json(session.snapshot()))
}

async fn delete_session_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.sessions.write().await.remove(&id).is_some() {
        info!(session_id = %id, "Session closed");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn new_thread_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    with_session(&state, &id, |s| s.new_thread().map(|_| ())).await
}

async fn open_thread_handler(
    State(state): State<SharedApiState>,
    Path((id, thread_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let thread_id = ThreadId(thread_id);
    with_session(&state, &id, move |s| s.switch_thread(&thread_id)).await
}

async fn rename_thread_handler(
    State(state): State<SharedApiState>,
    Path((id, thread_id)): Path<(String, String)>,
    Json(payload): Json<RenameRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let thread_id = ThreadId(thread_id);
    with_session(&state, &id, move |s| s.rename_thread(&thread_id, &payload.title)).await
}

async fn begin_rename_handler(
    State(state): State<SharedApiState>,
    Path((id, thread_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let thread_id = ThreadId(thread_id);
    with_session(&state, &id, move |s| s.begin_rename(&thread_id)).await
}

async fn cancel_rename_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    with_session(&state, &id, |s| {
        s.cancel_rename();
        Ok(())
    })
    .await
}

async fn pin_thread_handler(
    State(state): State<SharedApiState>,
    Path((id, thread_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let thread_id = ThreadId(thread_id);
    with_session(&state, &id, move |s| s.pin_thread(&thread_id)).await
}

async fn unpin_thread_handler(
    State(state): State<SharedApiState>,
    Path((id, thread_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let thread_id = ThreadId(thread_id);
    with_session(&state, &id, move |s| s.unpin_thread(&thread_id)).await
}

async fn toggle_pin_handler(
    State(state): State<SharedApiState>,
    Path((id, thread_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let thread_id = ThreadId(thread_id);
    with_session(&state, &id, move |s| s.toggle_pin(&thread_id).map(|_| ())).await
}

async fn delete_thread_handler(
    State(state): State<SharedApiState>,
    Path((id, thread_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let thread_id = ThreadId(thread_id);
    with_session(&state, &id, move |s| s.delete_thread(&thread_id)).await
}

async fn temporary_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<TemporaryRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    with_session(&state, &id, move |s| s.set_temporary(payload.temporary)).await
}

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// Forwards renderer callbacks to the SSE stream.
struct SseRenderer {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl SseRenderer {
    fn emit(&self, event: TurnEvent) {
        // The client may have gone away; the turn still runs to completion.
        let _ = self.tx.send(event);
    }
}

impl TurnRenderer for SseRenderer {
    fn on_user_message(&mut self, message: &DisplayMessage) {
        self.emit(TurnEvent::UserMessage {
            message: message.clone(),
        });
    }

    fn on_text_delta(&mut self, delta: &str, _accumulated: &str) {
        self.emit(TurnEvent::TextDelta {
            content: delta.to_string(),
        });
    }

    fn on_tool_status(&mut self, indicator: &ToolIndicator) {
        self.emit(TurnEvent::ToolStatus {
            label: indicator.label(),
            indicator: indicator.clone(),
        });
    }

    fn on_assistant_message(&mut self, message: &DisplayMessage) {
        self.emit(TurnEvent::AssistantMessage {
            message: message.clone(),
        });
    }
}

/// `POST /v1/sessions/{id}/chat`: run one turn, streaming [`TurnEvent`]s.
///
/// A session already running a turn answers `409 Conflict`.
async fn chat_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(SessionError::EmptyInput.into());
    }
    let mut session = state
        .session(&id)
        .await?
        .try_lock_owned()
        .map_err(|_| ApiError::from(SessionError::TurnInProgress))?;

    info!(session_id = %id, message_len = payload.message.len(), "Chat turn requested");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        let mut renderer = SseRenderer { tx };
        let last = match session.submit_turn(&payload.message, &mut renderer) {
            Ok(outcome) => match outcome.error {
                Some(message) => TurnEvent::Error { message },
                None => TurnEvent::Done {
                    thread_id: outcome.thread_id,
                },
            },
            Err(e) => {
                warn!(error = %e, "Chat turn rejected");
                TurnEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        // Idle before the closing event goes out.
        drop(session);
        renderer.emit(last);
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

//! HTTP gateway for Threadline.
//!
//! Serves the embedded web chat UI, a health check, and the v1 session
//! API the UI talks to. Each browser tab owns one server-side chat session.
//!
//! Built on Axum.

pub mod api_v1;
pub mod frontend;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use threadline_agent::ChatAgent;
use threadline_bridge::SchedulerHandle;
use threadline_config::AppConfig;

pub use api_v1::{ApiState, SharedApiState};

/// Build the full router: health, v1 API, and the embedded frontend.
///
/// Layers applied:
/// - CORS limited to the configured origins (same-origin by default)
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedApiState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .merge(frontend::frontend_router())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let mut origins: Vec<String> = config.gateway.cors_origins.clone();
    if origins.is_empty() {
        origins.push(format!("http://{}:{}", config.gateway.host, config.gateway.port));
        origins.push(format!("http://localhost:{}", config.gateway.port));
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
///
/// The agent is built on the background scheduler, where every turn runs,
/// and shared across all sessions.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let bridge = SchedulerHandle::start("threadline-bridge")?;
    let agent_config = config.clone();
    let agent = bridge
        .submit(async move { ChatAgent::from_config(&agent_config).await })?
        .join()
        .await??;
    let state = Arc::new(ApiState::new(bridge, Arc::new(agent), config));

    let app = build_router(state);

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

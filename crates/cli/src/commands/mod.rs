pub mod chat;
pub mod doctor;
pub mod gateway;
pub mod onboard;
pub mod threads;

use std::sync::Arc;

use threadline_agent::ChatAgent;
use threadline_bridge::SchedulerHandle;
use threadline_config::AppConfig;

/// Load the config with environment overrides applied.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load().map_err(|e| format!("Failed to load config: {e}").into())
}

/// Build the agent on the scheduler so its store and clients live there.
pub fn build_agent(
    bridge: &SchedulerHandle,
    config: &AppConfig,
) -> Result<Arc<ChatAgent>, Box<dyn std::error::Error>> {
    let config = config.clone();
    let agent = bridge.submit_blocking(async move { ChatAgent::from_config(&config).await })??;
    Ok(Arc::new(agent))
}

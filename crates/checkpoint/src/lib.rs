//! Checkpoint store implementations for Threadline.

use std::sync::Arc;

use threadline_config::CheckpointConfig;
use threadline_core::checkpoint::CheckpointStore;
use threadline_core::error::CheckpointError;

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryCheckpointStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;

/// Open the checkpoint store selected by configuration.
pub async fn open_store(
    config: &CheckpointConfig,
) -> Result<Arc<dyn CheckpointStore>, CheckpointError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryCheckpointStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Arc::new(
            SqliteCheckpointStore::open(&config.resolved_path()).await?,
        )),
        other => Err(CheckpointError::Storage(format!(
            "Unsupported checkpoint backend: {other}"
        ))),
    }
}

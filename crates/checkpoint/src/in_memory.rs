//! In-memory checkpoint store: useful for testing and ephemeral deployments.

use std::sync::Arc;

use async_trait::async_trait;
use threadline_core::checkpoint::{Checkpoint, CheckpointStore};
use threadline_core::error::CheckpointError;
use threadline_core::message::{Message, ThreadId};
use tokio::sync::RwLock;

/// A checkpoint store that keeps every checkpoint in a Vec.
/// Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of checkpoints across all threads.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }

    /// Copy of every checkpoint in append order.
    pub async fn snapshot(&self) -> Vec<Checkpoint> {
        self.checkpoints.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let checkpoints = self.checkpoints.read().await;
        let mut threads: Vec<ThreadId> = Vec::new();
        for cp in checkpoints.iter() {
            if !threads.contains(&cp.thread_id) {
                threads.push(cp.thread_id.clone());
            }
        }
        Ok(threads)
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Vec<Message>, CheckpointError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .iter()
            .filter(|cp| &cp.thread_id == thread_id)
            .flat_map(|cp| cp.messages.iter().cloned())
            .collect())
    }

    async fn append(&self, mut checkpoint: Checkpoint) -> Result<u64, CheckpointError> {
        let mut checkpoints = self.checkpoints.write().await;
        let step = checkpoints
            .iter()
            .filter(|cp| cp.thread_id == checkpoint.thread_id)
            .count() as u64;
        checkpoint.step = step;
        checkpoints.push(checkpoint);
        Ok(step)
    }

    async fn count(&self, thread_id: &ThreadId) -> Result<u64, CheckpointError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.iter().filter(|cp| &cp.thread_id == thread_id).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_core::checkpoint::CheckpointSource;

    fn checkpoint(thread: &str, text: &str) -> Checkpoint {
        Checkpoint::new(
            ThreadId::from(thread),
            CheckpointSource::Loop,
            vec![Message::user(text)],
        )
    }

    #[tokio::test]
    async fn append_and_load() {
        let store = InMemoryCheckpointStore::new();
        assert_eq!(store.append(checkpoint("a", "one")).await.unwrap(), 0);
        assert_eq!(store.append(checkpoint("a", "two")).await.unwrap(), 1);
        store.append(checkpoint("b", "other")).await.unwrap();

        let messages = store.load(&ThreadId::from("a")).await.unwrap();
        let texts: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn list_threads_has_no_duplicates() {
        let store = InMemoryCheckpointStore::new();
        for thread in ["x", "y", "x"] {
            store.append(checkpoint(thread, "m")).await.unwrap();
        }
        assert_eq!(
            store.list_threads().await.unwrap(),
            vec![ThreadId::from("x"), ThreadId::from("y")]
        );
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryCheckpointStore::new();
        let other = store.clone();
        store.append(checkpoint("shared", "m")).await.unwrap();
        assert_eq!(other.count(&ThreadId::from("shared")).await.unwrap(), 1);
    }
}

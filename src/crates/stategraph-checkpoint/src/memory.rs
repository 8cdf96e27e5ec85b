//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps every thread's checkpoint history in a
//! thread-safe map. Data is lost when the process exits; use
//! [`FileCheckpointSaver`](crate::file::FileCheckpointSaver) when the history must
//! survive restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  InMemoryCheckpointSaver                      │
//! │                                               │
//! │  Arc<RwLock<HashMap<thread_id, Vec<..>>>>     │
//! │    "session-1" ─▶ [step 0, step 1, step 2]    │
//! │    "session-2" ─▶ [step 0]                    │
//! │                                               │
//! │  latest_only = true keeps one entry/thread    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The write lock is held for the step check and the push together, so a
//! `put` is visible to the next `get_latest` on the same thread.
//!
//! # Example
//!
//! ```rust
//! use stategraph_checkpoint::{Checkpoint, CheckpointSaver, InMemoryCheckpointSaver};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//! saver.put(Checkpoint::from_state("thread-1", 0, &json!({"count": 1}))?).await?;
//!
//! let latest = saver.get_latest("thread-1").await?.unwrap();
//! assert_eq!(latest.state(), json!({"count": 1}));
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::traits::{check_next_step, tail, CheckpointSaver};

/// Thread-safe in-memory checkpoint storage
type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>;

/// In-memory checkpoint saver
///
/// Cloning is cheap and clones share the same storage.
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
    latest_only: bool,
}

impl InMemoryCheckpointSaver {
    /// Create a saver that keeps full history
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            latest_only: false,
        }
    }

    /// Create a saver that retains only the latest checkpoint per thread
    pub fn latest_only() -> Self {
        Self {
            latest_only: true,
            ..Self::new()
        }
    }

    /// Get the number of threads being tracked
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Get the total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut storage = self.storage.write().await;
        let entries = storage.entry(checkpoint.thread_id.clone()).or_default();

        check_next_step(entries.last(), &checkpoint)?;

        if self.latest_only {
            entries.clear();
        }
        entries.push(checkpoint);
        Ok(())
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).and_then(|entries| entries.last().cloned()))
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let storage = self.storage.read().await;
        let history = storage.get(thread_id).cloned().unwrap_or_default();
        Ok(tail(history, limit))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.remove(thread_id);
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #[test]
        fn list_limit_returns_most_recent(gaps in prop::collection::vec(1u64..5, 1..20), limit in 0usize..25) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (steps, listed) = runtime.block_on(async {
                let saver = InMemoryCheckpointSaver::new();
                let mut steps = Vec::new();
                let mut step = 0;
                for gap in &gaps {
                    step += gap;
                    saver
                        .put(Checkpoint::from_state("t", step, &json!({"step": step})).unwrap())
                        .await
                        .unwrap();
                    steps.push(step);
                }
                let listed: Vec<u64> = saver
                    .list("t", Some(limit))
                    .await
                    .unwrap()
                    .iter()
                    .map(|cp| cp.step)
                    .collect();
                (steps, listed)
            });

            let expected = &steps[steps.len().saturating_sub(limit)..];
            prop_assert_eq!(listed.as_slice(), expected);
        }

        #[test]
        fn stale_steps_are_rejected(first in 0u64..100, back in 0u64..100) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let stale = first.saturating_sub(back);
            let result = runtime.block_on(async {
                let saver = InMemoryCheckpointSaver::new();
                saver.put(Checkpoint::from_state("t", first, &json!({})).unwrap()).await.unwrap();
                let result = saver.put(Checkpoint::from_state("t", stale, &json!({})).unwrap()).await;
                let latest = saver.get_latest("t").await.unwrap().map(|cp| cp.step);
                (result.map_err(|e| e.is_conflict()), latest)
            });
            prop_assert_eq!(result, (Err(true), Some(first)));
        }
    }
}

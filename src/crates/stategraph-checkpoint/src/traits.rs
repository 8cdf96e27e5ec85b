//! The [`CheckpointSaver`] trait implemented by every persistence backend
//!
//! A saver stores the append-only checkpoint history of each thread. The engine
//! calls [`put`](CheckpointSaver::put) after every super-step and
//! [`get_latest`](CheckpointSaver::get_latest) whenever it resumes a thread.
//!
//! # Consistency contract
//!
//! - **Per-thread read-after-write**: once `put` returns `Ok`, a following
//!   `get_latest` on the same thread returns that checkpoint.
//! - **Monotonic steps**: `put` rejects a checkpoint whose `step` is not strictly
//!   greater than the thread's latest step with [`CheckpointError::Conflict`].
//! - **Thread isolation**: writes to one thread never affect another. No
//!   ordering is promised across threads.
//! - **All or nothing**: a `put` that returns `Err` must leave the previous
//!   latest checkpoint in place.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use stategraph_checkpoint::{Checkpoint, CheckpointSaver, Result};
//!
//! struct RedisSaver { /* client */ }
//!
//! #[async_trait]
//! impl CheckpointSaver for RedisSaver {
//!     async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
//!         // RPUSH checkpoints:<thread> <json> guarded by a step check
//!         todo!()
//!     }
//!
//!     async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
//!         // LINDEX checkpoints:<thread> -1
//!         todo!()
//!     }
//!
//!     async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};

/// Persistence backend for thread checkpoints
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Append a checkpoint to its thread's history
    ///
    /// The thread is taken from `checkpoint.thread_id`.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Latest checkpoint of a thread, or `None` if the thread has none
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Checkpoint history of a thread, oldest first
    ///
    /// With `limit`, only the most recent `limit` checkpoints are returned
    /// (still oldest first). An unknown thread yields an empty list.
    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>>;

    /// Checkpoint recorded at a specific step
    async fn get_step(&self, thread_id: &str, step: u64) -> Result<Option<Checkpoint>> {
        Ok(self
            .list(thread_id, None)
            .await?
            .into_iter()
            .find(|cp| cp.step == step))
    }

    /// Remove all checkpoints for a thread
    ///
    /// Backends that cannot delete may keep the default, which reports a
    /// storage error.
    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        Err(CheckpointError::storage(format!(
            "delete_thread is not supported by this backend (thread '{}')",
            thread_id
        )))
    }
}

/// Validate that `checkpoint` may follow `latest` in a thread's history
pub(crate) fn check_next_step(latest: Option<&Checkpoint>, checkpoint: &Checkpoint) -> Result<()> {
    if checkpoint.thread_id.is_empty() {
        return Err(CheckpointError::Invalid(
            "thread_id is required".to_string(),
        ));
    }
    if let Some(latest) = latest {
        if checkpoint.step <= latest.step {
            return Err(CheckpointError::Conflict {
                thread_id: checkpoint.thread_id.clone(),
                step: checkpoint.step,
                latest: latest.step,
            });
        }
    }
    Ok(())
}

/// Keep the most recent `limit` entries of an oldest-first history
pub(crate) fn tail(mut history: Vec<Checkpoint>, limit: Option<usize>) -> Vec<Checkpoint> {
    if let Some(limit) = limit {
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
    }
    history
}

//! Reading and editing thread state: `get_state`, history, `update_state`

use serde_json::Value;
use stategraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource};

use super::{Engine, StateSnapshot, ThreadStatus};
use crate::error::{GraphError, Result};

impl Engine {
    /// Current status of a thread, or `None` if it has no checkpoint
    pub async fn thread_status(&self, thread_id: &str) -> Result<Option<ThreadStatus>> {
        let latest = self.checkpointer.get_latest(thread_id).await?;
        Ok(latest.map(|checkpoint| self.status_of(thread_id, &checkpoint)))
    }

    /// Latest snapshot of a thread
    ///
    /// Reads do not take the thread lock. Two calls with no run in between
    /// return the same snapshot.
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<StateSnapshot>> {
        let latest = self.checkpointer.get_latest(thread_id).await?;
        Ok(latest.map(|checkpoint| {
            let status = self.status_of(thread_id, &checkpoint);
            StateSnapshot::from_checkpoint(&checkpoint, status)
        }))
    }

    /// Whether the thread is waiting on an interrupt
    pub async fn is_suspended(&self, thread_id: &str) -> Result<bool> {
        Ok(self.thread_status(thread_id).await? == Some(ThreadStatus::Suspended))
    }

    /// Checkpoint history of a thread, newest first
    ///
    /// Each snapshot's status is the one its checkpoint implies on its own:
    /// `suspended`, `done`, or `running` for mid-run checkpoints.
    pub async fn get_state_history(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<StateSnapshot>> {
        let history = self.checkpointer.list(thread_id, limit).await?;
        Ok(history
            .iter()
            .rev()
            .map(|checkpoint| StateSnapshot::from_checkpoint(checkpoint, ThreadStatus::of_checkpoint(checkpoint)))
            .collect())
    }

    /// Patch a thread's state outside of a run
    ///
    /// `values` is merged through the channel reducers and recorded as a new
    /// checkpoint. Without `as_node`, the scheduled nodes and any pending
    /// interrupt are kept. With `as_node`, the update is treated as that node's
    /// output: the next nodes are routed from `as_node` and a pending interrupt
    /// is cleared. Nothing is executed.
    #[tracing::instrument(skip(self, values))]
    pub async fn update_state(
        &self,
        thread_id: &str,
        values: Value,
        as_node: Option<&str>,
    ) -> Result<StateSnapshot> {
        let _lock = self.lock_thread(thread_id).await;

        let latest = self
            .checkpointer
            .get_latest(thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.to_string()))?;

        let mut state = latest.state();
        self.graph.schema.apply(&mut state, &values)?;

        let mut checkpoint = Checkpoint::from_state(thread_id, latest.step + 1, &state)?;
        let mut metadata = CheckpointMetadata::new().with_source(CheckpointSource::Update);
        match as_node {
            Some(node) => {
                if !self.graph.has_node(node) {
                    return Err(GraphError::UnknownNode(node.to_string()));
                }
                checkpoint = checkpoint.with_next_nodes(self.graph.next_nodes(node, &state)?);
                metadata = metadata.with_writes_from(vec![node.to_string()]);
            }
            None => {
                checkpoint = checkpoint.with_next_nodes(latest.next_nodes.clone());
                if let Some(pending) = latest.pending_interrupt.clone() {
                    checkpoint = checkpoint.with_interrupt(pending);
                }
            }
        }
        let checkpoint = checkpoint.with_metadata(metadata);

        self.checkpointer.put(checkpoint.clone()).await?;
        tracing::info!(step = checkpoint.step, as_node = ?as_node, "State updated");

        let status = self.status_of(thread_id, &checkpoint);
        Ok(StateSnapshot::from_checkpoint(&checkpoint, status))
    }

    /// Status of a thread whose latest checkpoint is `latest`
    ///
    /// A pending interrupt wins over a recorded failure: a resumed run that
    /// failed leaves the thread waiting on the same interrupt.
    pub(super) fn status_of(&self, thread_id: &str, latest: &Checkpoint) -> ThreadStatus {
        if self.is_running(thread_id) {
            return ThreadStatus::Running;
        }
        if latest.is_interrupted() {
            return ThreadStatus::Suspended;
        }
        if self.has_failed(thread_id) {
            return ThreadStatus::Failed;
        }
        match ThreadStatus::of_checkpoint(latest) {
            // Not running, yet stopped mid-run: the process died or the run was dropped.
            ThreadStatus::Running => ThreadStatus::Failed,
            status => status,
        }
    }
}

//! Value types returned by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_checkpoint::{Checkpoint, CheckpointSource, PendingInterrupt};
use std::fmt;

/// Lifecycle status of a thread
///
/// ```text
///            start()                 END reached
///   (none) ─────────▶ RUNNING ──────────────────▶ DONE
///                      │   ▲                        │ start() merges new input
///     node interrupts  │   │ resume()               ▼
///                      ▼   │                     RUNNING ...
///                    SUSPENDED
///
///   RUNNING ── error ──▶ FAILED ── resume() replays last checkpoint ──▶ RUNNING
///
///   a run resumed from SUSPENDED that errors returns to SUSPENDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// A `start`/`resume` call is executing super-steps for the thread
    Running,
    /// An interrupt is waiting for a resume command, even if the last
    /// attempt to resume it failed
    Suspended,
    /// The last run reached END
    Done,
    /// The last run failed, or stopped before reaching END or an interrupt
    Failed,
}

impl ThreadStatus {
    /// Status implied by a checkpoint alone
    ///
    /// A checkpoint that is neither interrupted nor terminal records progress
    /// in the middle of a run.
    pub fn of_checkpoint(checkpoint: &Checkpoint) -> Self {
        if checkpoint.is_interrupted() {
            ThreadStatus::Suspended
        } else if checkpoint.is_terminal() {
            ThreadStatus::Done
        } else {
            ThreadStatus::Running
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadStatus::Running => "running",
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Done => "done",
            ThreadStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Channel values
    pub values: Value,

    /// Nodes scheduled for the next super-step; empty once END is reached
    pub next: Vec<String>,

    /// Step index of the checkpoint this snapshot was read from
    pub step: u64,

    pub status: ThreadStatus,

    /// Interrupt waiting for a resume command, if any
    pub interrupt: Option<PendingInterrupt>,

    /// What wrote the checkpoint
    pub source: CheckpointSource,

    pub checkpoint_id: String,

    pub created_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub(crate) fn from_checkpoint(checkpoint: &Checkpoint, status: ThreadStatus) -> Self {
        Self {
            values: checkpoint.state(),
            next: checkpoint.next_nodes.clone(),
            step: checkpoint.step,
            status,
            interrupt: checkpoint.pending_interrupt.clone(),
            source: checkpoint.metadata.source,
            checkpoint_id: checkpoint.id.clone(),
            created_at: checkpoint.ts,
        }
    }

    /// Read a channel
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.values.get(channel)
    }
}

/// How a `start`/`resume` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// END was reached
    Completed {
        /// Final state
        state: Value,
        /// Super-steps executed by this call
        supersteps: usize,
    },
    /// A node interrupted; the thread waits for `resume`
    Suspended {
        /// State as of the interrupted super-step
        state: Value,
        /// What the node asked for
        interrupt: PendingInterrupt,
        /// Super-steps executed by this call, including the interrupted one
        supersteps: usize,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &Value {
        match self {
            RunOutcome::Completed { state, .. } | RunOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn into_state(self) -> Value {
        match self {
            RunOutcome::Completed { state, .. } | RunOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn supersteps(&self) -> usize {
        match self {
            RunOutcome::Completed { supersteps, .. } | RunOutcome::Suspended { supersteps, .. } => {
                *supersteps
            }
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }

    /// Pending interrupt when suspended
    pub fn interrupt(&self) -> Option<&PendingInterrupt> {
        match self {
            RunOutcome::Suspended { interrupt, .. } => Some(interrupt),
            RunOutcome::Completed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_of_checkpoint() {
        let done = Checkpoint::from_state("t", 1, &json!({})).unwrap();
        assert_eq!(ThreadStatus::of_checkpoint(&done), ThreadStatus::Done);

        let mid = done.clone().with_next_nodes(vec!["a".into()]);
        assert_eq!(ThreadStatus::of_checkpoint(&mid), ThreadStatus::Running);

        let waiting = mid.with_interrupt(PendingInterrupt::new("a", json!("?")));
        assert_eq!(ThreadStatus::of_checkpoint(&waiting), ThreadStatus::Suspended);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ThreadStatus::Suspended).unwrap(), json!("suspended"));
        assert_eq!(ThreadStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = RunOutcome::Suspended {
            state: json!({"a": 1}),
            interrupt: PendingInterrupt::new("human", json!({"query": "confirm?"})),
            supersteps: 2,
        };
        assert!(outcome.is_suspended());
        assert_eq!(outcome.interrupt().map(|i| i.node.as_str()), Some("human"));
        assert_eq!(outcome.supersteps(), 2);
        assert_eq!(outcome.into_state(), json!({"a": 1}));
    }
}

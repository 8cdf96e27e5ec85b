//! Node context and in-node interrupts
//!
//! Every node receives a [`NodeContext`]: a snapshot of the state as of the
//! start of the super-step plus enough identity (node, thread, step) for
//! logging. It is also the node's handle for suspending execution.
//!
//! # Interrupt flow
//!
//! ```text
//!  start()                              resume(Command::resume(v))
//!    │                                        │
//!    ▼                                        ▼
//!  node runs ─ ctx.interrupt(p) ─▶ Pending(p) │
//!    │                                        │
//!    └─ return NodeResult::Interrupt(p)       │
//!            │                                │
//!            ▼                                │
//!   checkpoint (next = node, pending = p)     │
//!   thread SUSPENDED, caller gets p ──────────┘
//!                                             │
//!  node runs again ─ ctx.interrupt(p) ─▶ Resumed(v)
//!    │
//!    └─ continues with v, returns an update
//! ```
//!
//! A resumed node runs again from the top. Anything it does before reaching the
//! interrupt point executes twice, so that prefix must be idempotent. The
//! resume value is consumed by the first `interrupt` call; a second interrupt
//! point in the same invocation suspends again.
//!
//! # Example
//!
//! ```rust
//! use stategraph_core::{Interrupt, NodeContext, NodeResult};
//! use serde_json::json;
//!
//! async fn confirm(mut ctx: NodeContext) -> stategraph_core::Result<NodeResult> {
//!     let answer = match ctx.interrupt(json!({"query": "confirm?"})) {
//!         Interrupt::Resumed(value) => value,
//!         Interrupt::Pending(payload) => return Ok(NodeResult::Interrupt(payload)),
//!     };
//!     Ok(NodeResult::Update(json!({"confirmed": answer["data"] == "yes"})))
//! }
//! ```

use serde_json::Value;

/// Outcome of [`NodeContext::interrupt`]
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// The thread was resumed with this value; carry on with it
    Resumed(Value),
    /// No resume value yet; return `NodeResult::Interrupt(payload)` to suspend
    Pending(Value),
}

impl Interrupt {
    /// Resume value, if any
    pub fn resumed(self) -> Option<Value> {
        match self {
            Interrupt::Resumed(value) => Some(value),
            Interrupt::Pending(_) => None,
        }
    }
}

/// Everything a node function receives for one invocation
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// State snapshot at the start of the super-step
    pub state: Value,
    /// Name of the node being invoked
    pub node: String,
    /// Thread the invocation belongs to
    pub thread_id: String,
    /// Checkpoint step this invocation builds on
    pub step: u64,
    resume: Option<Value>,
}

impl NodeContext {
    pub fn new(
        state: Value,
        node: impl Into<String>,
        thread_id: impl Into<String>,
        step: u64,
    ) -> Self {
        Self {
            state,
            node: node.into(),
            thread_id: thread_id.into(),
            step,
            resume: None,
        }
    }

    /// Attach the value a resume command delivered to this node
    pub fn with_resume(mut self, value: Value) -> Self {
        self.resume = Some(value);
        self
    }

    /// Value waiting to be consumed by the next `interrupt` call
    pub fn resume_value(&self) -> Option<&Value> {
        self.resume.as_ref()
    }

    /// Interrupt point
    ///
    /// Returns [`Interrupt::Resumed`] with the pending resume value (consuming
    /// it), or [`Interrupt::Pending`] with `payload` when there is none.
    pub fn interrupt(&mut self, payload: Value) -> Interrupt {
        match self.resume.take() {
            Some(value) => {
                tracing::debug!(node = %self.node, thread_id = %self.thread_id, "Interrupt resumed");
                Interrupt::Resumed(value)
            }
            None => Interrupt::Pending(payload),
        }
    }

    /// Read a channel from the state snapshot
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.state.get(channel)
    }
}

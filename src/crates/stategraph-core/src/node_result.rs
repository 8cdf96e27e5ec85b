//! Node execution result types
//!
//! Every node returns one of three outcomes, so the executor's control flow is
//! visible in the type instead of being signalled through errors:
//!
//! | Variant | Executor does |
//! |---------|---------------|
//! | [`NodeResult::Update`] | merge the partial state, follow the node's edges |
//! | [`NodeResult::Interrupt`] | checkpoint, suspend the thread, surface the payload |
//! | [`NodeResult::Command`] | merge `update`, continue at `goto` without waiting |

use crate::command::Command;
use serde_json::Value;

/// Outcome of a node invocation
///
/// # Example: partial update
///
/// ```rust
/// use stategraph_core::NodeResult;
/// use serde_json::json;
///
/// let result = NodeResult::Update(json!({"count": 42}));
/// assert!(result.interrupt_payload().is_none());
/// ```
///
/// # Example: command with navigation
///
/// ```rust
/// use stategraph_core::{Command, NodeResult};
/// use serde_json::json;
///
/// let result = NodeResult::Command(
///     Command::new()
///         .with_update(json!({"status": "processed"}))
///         .with_goto("review"),
/// );
/// assert_eq!(result.goto(), Some("review"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    /// Partial state merged through the channel reducers
    Update(Value),

    /// Suspend the thread and hand this payload to the caller
    Interrupt(Value),

    /// Merge the update, then continue at the command's target
    Command(Command),
}

impl NodeResult {
    /// Result that changes nothing
    pub fn empty() -> Self {
        NodeResult::Update(Value::Null)
    }

    /// State update carried by this result, if any
    pub fn state_update(&self) -> Option<&Value> {
        match self {
            NodeResult::Update(value) => Some(value),
            NodeResult::Command(cmd) => cmd.update.as_ref(),
            NodeResult::Interrupt(_) => None,
        }
    }

    /// Explicit next node requested by this result
    pub fn goto(&self) -> Option<&str> {
        match self {
            NodeResult::Command(cmd) => cmd.goto.as_deref(),
            _ => None,
        }
    }

    /// Interrupt payload, when this result suspends the thread
    pub fn interrupt_payload(&self) -> Option<&Value> {
        match self {
            NodeResult::Interrupt(payload) => Some(payload),
            _ => None,
        }
    }
}

impl From<Value> for NodeResult {
    fn from(value: Value) -> Self {
        NodeResult::Update(value)
    }
}

impl From<Command> for NodeResult {
    fn from(cmd: Command) -> Self {
        NodeResult::Command(cmd)
    }
}

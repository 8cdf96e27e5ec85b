//! Commands: resume instructions and routing overrides
//!
//! A [`Command`] travels in two directions:
//!
//! - **Caller to engine**, as the argument of
//!   [`Engine::resume`](crate::engine::Engine::resume). It either hands a value to
//!   the interrupted node (`resume`), or patches state and optionally picks the
//!   next node (`update` + `goto`), skipping the interrupted node entirely.
//! - **Node to engine**, inside [`NodeResult::Command`](crate::NodeResult::Command).
//!   The node's update is merged and `goto` replaces the node's outgoing edges
//!   for this step.
//!
//! ```text
//!                   ┌─ resume ──────▶ re-run interrupted node with value
//! Engine::resume ───┤
//!                   └─ update/goto ─▶ patch state, continue at goto
//!                                     (or at the node's successors)
//! ```
//!
//! # Examples
//!
//! ```rust
//! use stategraph_core::Command;
//! use serde_json::json;
//!
//! // Answer an interrupt
//! let answer = Command::resume(json!({"data": "yes"}));
//!
//! // Correct state and jump straight to the next node
//! let correction = Command::new()
//!     .with_update(json!({"name": "LangGraph", "birthday": "Jan 17, 2024"}))
//!     .with_goto("chatbot");
//!
//! assert!(answer.resume.is_some());
//! assert_eq!(correction.goto.as_deref(), Some("chatbot"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resume instruction or node-issued routing override
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Command {
    /// Partial state merged through the channel reducers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,

    /// Next node, overriding the edges of the node this command applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,

    /// Value handed to the interrupted node in place of its suspended call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<Value>,
}

impl Command {
    /// Create a new empty command
    ///
    /// Passed to `Engine::resume`, an empty command replays a failed thread from
    /// its last committed checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Command carrying only a resume value
    pub fn resume(value: Value) -> Self {
        Self::new().with_resume(value)
    }

    /// Set the state update
    pub fn with_update(mut self, update: Value) -> Self {
        self.update = Some(update);
        self
    }

    /// Set the navigation target
    pub fn with_goto(mut self, node: impl Into<String>) -> Self {
        self.goto = Some(node.into());
        self
    }

    /// Set the resume value
    pub fn with_resume(mut self, value: Value) -> Self {
        self.resume = Some(value);
        self
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.update.is_none() && self.goto.is_none() && self.resume.is_none()
    }
}

//! Core checkpoint data structures
//!
//! A **[`Checkpoint`]** is an immutable snapshot of one thread's execution: the full
//! channel state after a super-step, the node(s) that will run next, and, when the
//! thread is suspended, the interrupt that is waiting for an answer.
//!
//! # Lifecycle
//!
//! ```text
//!  step 0            step 1             step 2                 step 3
//! ┌────────┐       ┌─────────┐        ┌────────────┐         ┌────────┐
//! │ Input  │ ────▶ │  Loop   │ ─────▶ │ Interrupt  │ ──────▶ │  Loop  │
//! │ next:  │       │ next:   │        │ next:      │ resume  │ next:  │
//! │ [chat] │       │ [tools] │        │ [tools]    │         │ []=END │
//! └────────┘       └─────────┘        │ pending: ? │         └────────┘
//!                                     └────────────┘
//! ```
//!
//! Checkpoints of a thread form an append-only history ordered by `step`. The
//! latest one is the resumable point: its `next_nodes` say where execution
//! continues, and an empty list means the run reached END.
//!
//! # Example
//!
//! ```rust
//! use stategraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource};
//! use serde_json::json;
//!
//! let checkpoint = Checkpoint::from_state("thread-1", 0, &json!({"messages": []}))
//!     .unwrap()
//!     .with_next_nodes(vec!["chatbot".to_string()])
//!     .with_metadata(CheckpointMetadata::new().with_source(CheckpointSource::Input));
//!
//! assert!(!checkpoint.is_terminal());
//! assert_eq!(checkpoint.state(), json!({"messages": []}));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{CheckpointError, Result};

/// Unique checkpoint identifier (UUID v4 string)
pub type CheckpointId = String;

/// Channel name to value mapping stored in a checkpoint
pub type ChannelValues = serde_json::Map<String, Value>;

/// What produced a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Initial input merged into a thread
    Input,
    /// Output of a super-step
    Loop,
    /// A node suspended with an interrupt payload
    Interrupt,
    /// Manual state edit (`update_state`, or a resume patch)
    Update,
}

/// Additional information recorded alongside a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    /// Origin of the checkpoint
    pub source: CheckpointSource,

    /// Nodes whose writes produced this checkpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writes_from: Vec<String>,

    /// Free-form application data
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self {
            source: CheckpointSource::Loop,
            writes_from: Vec::new(),
            extra: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_writes_from(mut self, nodes: Vec<String>) -> Self {
        self.writes_from = nodes;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// An interrupt raised by a node that is waiting for a resume command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInterrupt {
    /// Unique id of this interrupt occurrence
    pub id: String,
    /// Node that raised the interrupt and will be re-entered on resume
    pub node: String,
    /// Opaque payload surfaced to the caller
    pub payload: Value,
}

impl PendingInterrupt {
    pub fn new(node: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            node: node.into(),
            payload,
        }
    }
}

/// Snapshot of a thread's state and routing position after a super-step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Format version
    pub v: i32,

    /// Unique id
    pub id: CheckpointId,

    /// Thread this checkpoint belongs to
    pub thread_id: String,

    /// Position in the thread's history; step 0 is the input checkpoint
    pub step: u64,

    /// Creation time
    pub ts: DateTime<Utc>,

    /// Full channel state
    pub channel_values: ChannelValues,

    /// Nodes to run next; empty once END is reached
    #[serde(default)]
    pub next_nodes: Vec<String>,

    /// Set while the thread is suspended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<PendingInterrupt>,

    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(thread_id: impl Into<String>, step: u64, channel_values: ChannelValues) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            step,
            ts: Utc::now(),
            channel_values,
            next_nodes: Vec::new(),
            pending_interrupt: None,
            metadata: CheckpointMetadata::new(),
        }
    }

    /// Build a checkpoint from a JSON object state
    ///
    /// Fails with [`CheckpointError::Invalid`] when `state` is not an object.
    pub fn from_state(thread_id: impl Into<String>, step: u64, state: &Value) -> Result<Self> {
        match state {
            Value::Object(map) => Ok(Self::new(thread_id, step, map.clone())),
            other => Err(CheckpointError::Invalid(format!(
                "state must be a JSON object, got {}",
                type_name(other)
            ))),
        }
    }

    pub fn with_next_nodes(mut self, next_nodes: Vec<String>) -> Self {
        self.next_nodes = next_nodes;
        self
    }

    pub fn with_interrupt(mut self, interrupt: PendingInterrupt) -> Self {
        self.pending_interrupt = Some(interrupt);
        self
    }

    pub fn with_metadata(mut self, metadata: CheckpointMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The channel values as a JSON object
    pub fn state(&self) -> Value {
        Value::Object(self.channel_values.clone())
    }

    /// True once the thread reached END with nothing pending
    pub fn is_terminal(&self) -> bool {
        self.next_nodes.is_empty() && self.pending_interrupt.is_none()
    }

    /// True while an interrupt waits for a resume command
    pub fn is_interrupted(&self) -> bool {
        self.pending_interrupt.is_some()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_state_requires_object() {
        let err = Checkpoint::from_state("t", 0, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[test]
    fn test_terminal_and_interrupted() {
        let cp = Checkpoint::from_state("t", 1, &json!({"a": 1})).unwrap();
        assert!(cp.is_terminal());

        let cp = cp.with_next_nodes(vec!["review".into()]);
        assert!(!cp.is_terminal());

        let cp = cp.with_interrupt(PendingInterrupt::new("review", json!({"query": "ok?"})));
        assert!(cp.is_interrupted());
        assert!(!cp.is_terminal());
    }

    #[test]
    fn test_json_shape() {
        let cp = Checkpoint::from_state("t", 2, &json!({"name": "x"}))
            .unwrap()
            .with_metadata(
                CheckpointMetadata::new()
                    .with_source(CheckpointSource::Update)
                    .with_writes_from(vec!["human".into()]),
            );

        let value = serde_json::to_value(&cp).unwrap();
        assert_eq!(value["step"], json!(2));
        assert_eq!(value["metadata"]["source"], json!("update"));
        assert_eq!(value["metadata"]["writes_from"], json!(["human"]));
        assert!(value.get("pending_interrupt").is_none());

        let back: Checkpoint = serde_json::from_value(value).unwrap();
        assert_eq!(back, cp);
    }
}

//! Error types for graph construction and execution
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias over
//! [`GraphError`]. Variants map onto the lifecycle of a graph:
//!
//! ```text
//! GraphError
//! ├── Construction (StateGraph::add_* / compile)
//! │   ├── DuplicateNode      - node name registered twice
//! │   ├── UnknownNode        - edge endpoint not registered
//! │   ├── Validation         - missing START edge, unreachable node, bad edge
//! │   └── Configuration      - fan-out over non-commutative reducers, bad config
//! ├── Execution (Engine::start / resume)
//! │   ├── Routing            - router returned an unknown target
//! │   ├── NodeExecution      - node function returned an error
//! │   ├── TooManyToolCalls   - a model asked for more than one tool call
//! │   ├── RecursionLimit     - super-step budget exhausted
//! │   ├── State              - reducer or state shape error
//! │   └── Checkpoint         - persistence failure, nothing committed
//! ├── Thread lifecycle
//! │   ├── ThreadNotFound     - resume/update on a thread with no checkpoint
//! │   └── InvalidThreadState - operation not allowed in the thread's status
//! └── Ambient
//!     ├── Serialization / Yaml / Toml / Io
//! ```
//!
//! Waiting on a rate limiter is normal operation and never produces an error.
//!
//! # Recovery
//!
//! Errors raised during execution mark the thread as failed. Its last committed
//! checkpoint is untouched, so once the cause is fixed the caller replays it:
//!
//! ```rust,ignore
//! match engine.start("thread-1", input).await {
//!     Err(GraphError::NodeExecution { node, error }) => {
//!         tracing::warn!(%node, %error, "node failed, retrying from last checkpoint");
//!         engine.resume("thread-1", Command::new()).await?;
//!     }
//!     other => { other?; }
//! }
//! ```

use thiserror::Error;

use crate::engine::ThreadStatus;
use crate::state::StateError;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building or running a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure is invalid
    ///
    /// Raised by `compile()` when START has no outgoing edge or a node is
    /// unreachable, and by edge registration for edges out of END or into START.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A node name was registered twice
    #[error("Duplicate node: '{0}' is already registered")]
    DuplicateNode(String),

    /// An edge references a node that was never registered
    #[error("Unknown node: '{0}'")]
    UnknownNode(String),

    /// A conditional router produced a target that is not in the graph
    ///
    /// Detected at execution time, since routing depends on runtime state.
    #[error("Routing from '{node}' failed: {message}")]
    Routing {
        /// Node whose outgoing conditional edge was evaluated
        node: String,
        /// What went wrong
        message: String,
    },

    /// Node execution failed with context
    ///
    /// # Example
    ///
    /// ```rust
    /// use stategraph_core::error::GraphError;
    ///
    /// let err = GraphError::node_execution("llm_call", "API timeout");
    /// assert_eq!(format!("{}", err), "Node 'llm_call' execution failed: API timeout");
    /// ```
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Name of the node that failed
        node: String,
        /// Error message from node execution
        error: String,
    },

    /// A model reply requested more tool calls than one super-step allows
    #[error("Model requested {count} tool calls; at most one per step is allowed")]
    TooManyToolCalls {
        /// Number of tool calls in the reply
        count: usize,
    },

    /// Execution did not reach END within the configured number of super-steps
    #[error("Recursion limit of {limit} super-steps reached without hitting END")]
    RecursionLimit {
        /// The configured limit
        limit: usize,
    },

    /// Reducer or state shape error
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Checkpoint persistence error
    ///
    /// When this comes out of a super-step, the step was not committed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] stategraph_checkpoint::CheckpointError),

    /// No checkpoint exists for the thread
    #[error("Thread not found: '{0}'")]
    ThreadNotFound(String),

    /// The requested operation is not valid for the thread's current status
    #[error("Thread '{thread_id}' is {status}: {reason}")]
    InvalidThreadState {
        /// Thread that was addressed
        thread_id: String,
        /// Its status at the time of the call
        status: ThreadStatus,
        /// Why the operation was rejected
        reason: String,
    },

    /// Graph or engine configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Create a node execution error
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a routing error
    pub fn routing(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Routing {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-thread-state error
    pub fn invalid_thread_state(
        thread_id: impl Into<String>,
        status: ThreadStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidThreadState {
            thread_id: thread_id.into(),
            status,
            reason: reason.into(),
        }
    }

    /// Attach node context to an error returned by a node function
    ///
    /// Errors that already carry node context, and tool-call violations, pass
    /// through unchanged.
    pub(crate) fn in_node(self, node: &str) -> Self {
        match self {
            err @ (GraphError::NodeExecution { .. } | GraphError::TooManyToolCalls { .. }) => err,
            other => GraphError::node_execution(node, other.to_string()),
        }
    }

    /// True for errors raised while building a graph, which never affect a thread
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            GraphError::Validation(_) | GraphError::DuplicateNode(_) | GraphError::UnknownNode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_node_wraps_once() {
        let err = GraphError::Configuration("bad".into()).in_node("chatbot");
        assert_eq!(
            err.to_string(),
            "Node 'chatbot' execution failed: Configuration error: bad"
        );

        let again = err.in_node("other");
        assert!(matches!(again, GraphError::NodeExecution { ref node, .. } if node == "chatbot"));

        let calls = GraphError::TooManyToolCalls { count: 2 }.in_node("chatbot");
        assert!(matches!(calls, GraphError::TooManyToolCalls { count: 2 }));
    }

    #[test]
    fn test_display_messages() {
        let err = GraphError::routing("chatbot", "unknown target 'nowhere'");
        assert_eq!(err.to_string(), "Routing from 'chatbot' failed: unknown target 'nowhere'");

        let err = GraphError::invalid_thread_state("t1", ThreadStatus::Suspended, "use resume");
        assert_eq!(err.to_string(), "Thread 't1' is suspended: use resume");

        assert!(GraphError::DuplicateNode("a".into()).is_construction_error());
        assert!(!GraphError::ThreadNotFound("a".into()).is_construction_error());
    }
}

//! Core graph data structures and types
//!
//! A graph is a set of named nodes connected by edges, with the reserved
//! [`START`] and [`END`] markers at its boundaries. [`StateGraph`](crate::StateGraph)
//! builds one; [`compile`](crate::StateGraph::compile) validates it and
//! produces the immutable [`CompiledGraph`] that the engine executes.
//!
//! # Graph Structure
//!
//! ```text
//!        START
//!          │
//!          ▼
//!    ┌───────────┐   tools_condition   ┌─────────┐
//!    │  chatbot  │ ──── "tools" ─────▶ │  tools  │
//!    └───────────┘                     └─────────┘
//!          │  ▲                             │
//!          │  └──────── direct edge ────────┘
//!          ▼
//!         END
//! ```
//!
//! # Edges
//!
//! - **Direct** `from → to`: always followed. Several direct edges out of one
//!   node activate all targets in the next super-step (fan-out).
//! - **Conditional** `from → router(state)`: the router inspects the state after
//!   `from` ran and names the next node, or [`END`]. A node has at most one
//!   conditional edge, and when present it takes precedence over direct edges.
//! - A node with no outgoing edge routes to END.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::interrupt::NodeContext;
use crate::node_result::NodeResult;
use crate::state::ChannelSchema;

/// Node identifier - unique name for each node in the graph
pub type NodeId = String;

/// Entry marker; edges out of it select the first node(s)
pub const START: &str = "__start__";

/// Exit marker; routing here finishes the run
pub const END: &str = "__end__";

/// Future returned by a node function
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<NodeResult>> + Send>>;

/// Type-erased node function
pub type NodeFn = Arc<dyn Fn(NodeContext) -> NodeFuture + Send + Sync>;

/// Type-erased router for conditional edges
///
/// Returns a node name, [`END`], or a branch key when the edge declares branches.
pub type RouterFn = Arc<dyn Fn(&Value) -> Result<String> + Send + Sync>;

/// Whether a name is reserved for the engine (`__start__`, `__end__`, any `__*`)
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__")
}

/// Conditional edge out of a node
#[derive(Clone)]
pub struct ConditionalEdge {
    pub(crate) router: RouterFn,
    /// Branch key → target node. Empty means the router returns node names.
    pub(crate) branches: HashMap<String, NodeId>,
}

impl ConditionalEdge {
    pub(crate) fn new(router: RouterFn, branches: HashMap<String, NodeId>) -> Self {
        Self { router, branches }
    }

    /// Declared branches, if any
    pub fn branches(&self) -> &HashMap<String, NodeId> {
        &self.branches
    }

    /// Targets this edge may route to, or `None` when any node is possible
    pub fn possible_targets(&self) -> Option<Vec<&str>> {
        if self.branches.is_empty() {
            None
        } else {
            let mut targets: Vec<&str> = self.branches.values().map(String::as_str).collect();
            targets.sort_unstable();
            targets.dedup();
            Some(targets)
        }
    }
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("router", &"<function>")
            .field("branches", &self.branches)
            .finish()
    }
}

/// Validated, immutable graph ready for execution
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) nodes: HashMap<NodeId, NodeFn>,
    /// Node names in registration order
    pub(crate) node_order: Vec<NodeId>,
    /// Direct edges per source, in declaration order
    pub(crate) direct: HashMap<NodeId, Vec<NodeId>>,
    pub(crate) conditional: HashMap<NodeId, ConditionalEdge>,
    pub(crate) schema: ChannelSchema,
}

impl CompiledGraph {
    /// Node names in registration order
    pub fn node_names(&self) -> &[NodeId] {
        &self.node_order
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Channel reducer bindings
    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    pub(crate) fn node(&self, name: &str) -> Option<&NodeFn> {
        self.nodes.get(name)
    }

    /// Conditional edge out of `from`, if any
    pub fn conditional_edge(&self, from: &str) -> Option<&ConditionalEdge> {
        self.conditional.get(from)
    }

    /// Direct edge targets out of `from`, in declaration order
    pub fn direct_edges(&self, from: &str) -> &[NodeId] {
        self.direct.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Statically known successors of `from` (may include [`END`])
    ///
    /// `None` means a conditional edge without declared branches, which can
    /// route to any node.
    pub fn successors(&self, from: &str) -> Option<Vec<&str>> {
        match self.conditional.get(from) {
            Some(edge) => edge.possible_targets(),
            None => Some(self.direct_edges(from).iter().map(String::as_str).collect()),
        }
    }

    /// First source with more than one direct non-END target
    pub(crate) fn fan_out_source(&self) -> Option<&str> {
        let mut sources: Vec<&str> = self
            .direct
            .iter()
            .filter(|(from, targets)| {
                !self.conditional.contains_key(*from)
                    && targets.iter().filter(|t| t.as_str() != END).count() > 1
            })
            .map(|(from, _)| from.as_str())
            .collect();
        sources.sort_unstable();
        sources.into_iter().next()
    }

    /// Nodes that run after `from` given the state it produced
    ///
    /// An empty result means the run reaches END along this path.
    pub fn next_nodes(&self, from: &str, state: &Value) -> Result<Vec<NodeId>> {
        if let Some(edge) = self.conditional.get(from) {
            return Ok(self.route(from, edge, state)?.into_iter().collect());
        }

        Ok(self
            .direct_edges(from)
            .iter()
            .filter(|to| to.as_str() != END)
            .cloned()
            .collect())
    }

    /// Nodes activated for a fresh run on `state`
    pub fn entry_nodes(&self, state: &Value) -> Result<Vec<NodeId>> {
        self.next_nodes(START, state)
    }

    fn route(&self, from: &str, edge: &ConditionalEdge, state: &Value) -> Result<Option<NodeId>> {
        let choice = (edge.router)(state).map_err(|e| match e {
            err @ GraphError::Routing { .. } => err,
            other => GraphError::routing(from, other.to_string()),
        })?;

        let target = if edge.branches.is_empty() {
            choice
        } else {
            match edge.branches.get(&choice) {
                Some(target) => target.clone(),
                None => {
                    let mut keys: Vec<&String> = edge.branches.keys().collect();
                    keys.sort();
                    return Err(GraphError::routing(
                        from,
                        format!("router returned '{}', expected one of {:?}", choice, keys),
                    ));
                }
            }
        };

        if target == END {
            return Ok(None);
        }
        if !self.nodes.contains_key(&target) {
            return Err(GraphError::routing(
                from,
                format!("router returned unknown node '{}'", target),
            ));
        }

        tracing::debug!(from = %from, to = %target, "Conditional edge routed");
        Ok(Some(target))
    }
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.node_order)
            .field("direct", &self.direct)
            .field("conditional", &self.conditional)
            .field("schema", &self.schema)
            .finish()
    }
}

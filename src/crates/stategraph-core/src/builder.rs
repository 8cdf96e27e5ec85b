//! StateGraph builder API
//!
//! [`StateGraph`] is the mutable builder for graphs. Registration checks what
//! can be checked statically; [`compile`](StateGraph::compile) checks the graph
//! as a whole and freezes it into a [`CompiledGraph`].
//!
//! | Call | Fails with |
//! |------|------------|
//! | `add_node` | `DuplicateNode`, or `Validation` for reserved names |
//! | `add_edge` | `UnknownNode` for unregistered endpoints, `Validation` for edges out of END / into START |
//! | `add_conditional_edge` | `UnknownNode` for an unregistered source or branch target, `Validation` for a second conditional edge |
//! | `add_channel` | `State` when the channel is already bound |
//! | `compile` | `Validation` (no START edge, unreachable node), `Configuration` (fan-out over an order-dependent reducer) |
//!
//! Routers are not checked at registration: a router returning an unknown node
//! is reported as a `Routing` error when it happens.
//!
//! # Example
//!
//! ```rust
//! use stategraph_core::{NodeResult, ReducerKind, StateGraph, END, START};
//! use serde_json::json;
//!
//! # fn main() -> stategraph_core::Result<()> {
//! let mut graph = StateGraph::new();
//! graph.add_channel("messages", ReducerKind::Append)?;
//!
//! graph.add_node("greet", |_ctx| {
//!     Box::pin(async move { Ok(NodeResult::Update(json!({"messages": ["hello"]}))) })
//! })?;
//!
//! graph.add_edge(START, "greet")?;
//! graph.add_edge("greet", END)?;
//!
//! let compiled = graph.compile()?;
//! assert_eq!(compiled.node_names(), &["greet".to_string()]);
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::graph::{is_reserved, CompiledGraph, ConditionalEdge, NodeFn, NodeFuture, NodeId, END, START};
use crate::interrupt::NodeContext;
use crate::node_result::NodeResult;
use crate::state::{ChannelSchema, ReducerKind};

/// Builder for state graphs
#[derive(Default)]
pub struct StateGraph {
    nodes: HashMap<NodeId, NodeFn>,
    node_order: Vec<NodeId>,
    direct: HashMap<NodeId, Vec<NodeId>>,
    conditional: HashMap<NodeId, ConditionalEdge>,
    schema: ChannelSchema,
}

impl std::fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph")
            .field("node_order", &self.node_order)
            .finish_non_exhaustive()
    }
}

impl StateGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a reducer to a channel
    ///
    /// Channels that are never bound use last-write-wins.
    pub fn add_channel(&mut self, name: impl Into<String>, kind: ReducerKind) -> Result<&mut Self> {
        self.schema.add_channel(name, kind)?;
        Ok(self)
    }

    /// Add a node
    ///
    /// The function receives a [`NodeContext`] and returns a boxed future, the
    /// same shape as `|ctx| Box::pin(async move { ... })`.
    pub fn add_node<F>(&mut self, name: impl Into<NodeId>, func: F) -> Result<&mut Self>
    where
        F: Fn(NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.add_node_fn(name, Arc::new(func))
    }

    /// Add a node from an already type-erased function
    pub fn add_node_fn(&mut self, name: impl Into<NodeId>, func: NodeFn) -> Result<&mut Self> {
        let name = name.into();
        if name.is_empty() || is_reserved(&name) {
            return Err(GraphError::Validation(format!(
                "'{}' is not a valid node name (empty or reserved)",
                name
            )));
        }
        if self.nodes.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        self.nodes.insert(name.clone(), func);
        self.node_order.push(name);
        Ok(self)
    }

    /// Add a node that maps the state snapshot to a partial update
    ///
    /// Shorthand for nodes that never interrupt or redirect.
    pub fn add_update_node<F, Fut>(&mut self, name: impl Into<NodeId>, func: F) -> Result<&mut Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let func = Arc::new(func);
        self.add_node(name, move |ctx: NodeContext| -> NodeFuture {
            let fut = func(ctx.state);
            Box::pin(async move { fut.await.map(NodeResult::Update) })
        })
    }

    /// Add an unconditional edge
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Result<&mut Self> {
        let (from, to) = (from.into(), to.into());
        self.check_source(&from)?;
        self.check_target(&to)?;

        let targets = self.direct.entry(from.clone()).or_default();
        if targets.contains(&to) {
            return Err(GraphError::Validation(format!(
                "edge '{}' -> '{}' already exists",
                from, to
            )));
        }
        targets.push(to);
        Ok(self)
    }

    /// Add a conditional edge whose router returns node names (or [`END`])
    pub fn add_conditional_edge<F>(&mut self, from: impl Into<NodeId>, router: F) -> Result<&mut Self>
    where
        F: Fn(&Value) -> Result<String> + Send + Sync + 'static,
    {
        self.add_conditional_edge_with_branches(from, router, HashMap::new())
    }

    /// Add a conditional edge whose router returns branch keys
    ///
    /// `branches` maps each key to a node name or [`END`]. Declared branches
    /// tighten reachability checks, and a key outside the map is a routing error.
    pub fn add_conditional_edge_with_branches<F>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        branches: HashMap<String, NodeId>,
    ) -> Result<&mut Self>
    where
        F: Fn(&Value) -> Result<String> + Send + Sync + 'static,
    {
        let from = from.into();
        self.check_source(&from)?;
        for target in branches.values() {
            self.check_target(target)?;
        }
        if self.conditional.contains_key(&from) {
            return Err(GraphError::Validation(format!(
                "node '{}' already has a conditional edge",
                from
            )));
        }
        self.conditional
            .insert(from, ConditionalEdge::new(Arc::new(router), branches));
        Ok(self)
    }

    /// Shorthand for `add_edge(START, node)`
    pub fn set_entry(&mut self, node: impl Into<NodeId>) -> Result<&mut Self> {
        self.add_edge(START, node)
    }

    /// Shorthand for `add_edge(node, END)`
    pub fn set_finish(&mut self, node: impl Into<NodeId>) -> Result<&mut Self> {
        self.add_edge(node, END)
    }

    fn check_source(&self, from: &str) -> Result<()> {
        if from == END {
            return Err(GraphError::Validation("END cannot have outgoing edges".to_string()));
        }
        if from != START && !self.nodes.contains_key(from) {
            return Err(GraphError::UnknownNode(from.to_string()));
        }
        Ok(())
    }

    fn check_target(&self, to: &str) -> Result<()> {
        if to == START {
            return Err(GraphError::Validation("START cannot be an edge target".to_string()));
        }
        if to != END && !self.nodes.contains_key(to) {
            return Err(GraphError::UnknownNode(to.to_string()));
        }
        Ok(())
    }

    /// Validate the graph and freeze it for execution
    pub fn compile(self) -> Result<CompiledGraph> {
        let graph = CompiledGraph {
            nodes: self.nodes,
            node_order: self.node_order,
            direct: self.direct,
            conditional: self.conditional,
            schema: self.schema,
        };

        validate_entry(&graph)?;
        validate_reachability(&graph)?;
        validate_fan_out(&graph)?;

        for from in &graph.node_order {
            if graph.conditional.contains_key(from) && !graph.direct_edges(from).is_empty() {
                tracing::warn!(
                    node = %from,
                    shadowed = ?graph.direct_edges(from),
                    "Conditional edge takes precedence over direct edges"
                );
            }
        }

        tracing::debug!(
            nodes = graph.node_order.len(),
            channels = ?graph.schema.channel_names(),
            "Graph compiled"
        );
        Ok(graph)
    }
}

fn validate_entry(graph: &CompiledGraph) -> Result<()> {
    let has_entry = graph.conditional.contains_key(START) || !graph.direct_edges(START).is_empty();
    if !has_entry {
        return Err(GraphError::Validation(
            "START has no outgoing edge; add an edge from START to the entry node".to_string(),
        ));
    }
    Ok(())
}

fn validate_reachability(graph: &CompiledGraph) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([START]);

    while let Some(current) = queue.pop_front() {
        let successors = match graph.successors(current) {
            Some(targets) => targets,
            // Undeclared router: any node may follow
            None => graph.node_order.iter().map(String::as_str).collect(),
        };
        for next in successors {
            if next != END && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    let unreachable: Vec<&str> = graph
        .node_order
        .iter()
        .map(String::as_str)
        .filter(|name| !seen.contains(name))
        .collect();
    if !unreachable.is_empty() {
        return Err(GraphError::Validation(format!(
            "nodes not reachable from START: {}",
            unreachable.join(", ")
        )));
    }
    Ok(())
}

fn validate_fan_out(graph: &CompiledGraph) -> Result<()> {
    let Some(source) = graph.fan_out_source() else {
        return Ok(());
    };
    if let Some((channel, reducer)) = graph.schema.first_non_commutative() {
        return Err(GraphError::Configuration(format!(
            "'{}' fans out to several nodes per super-step, but channel '{}' uses the \
             order-dependent reducer '{}'",
            source, channel, reducer
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> impl Fn(NodeContext) -> NodeFuture + Send + Sync + 'static {
        |_ctx: NodeContext| -> NodeFuture { Box::pin(async move { Ok(NodeResult::empty()) }) }
    }

    #[test]
    fn test_duplicate_node() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();
        let err = graph.add_node("a", noop()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(ref n) if n == "a"));
    }

    #[test]
    fn test_reserved_names() {
        let mut graph = StateGraph::new();
        assert!(matches!(graph.add_node(START, noop()), Err(GraphError::Validation(_))));
        assert!(matches!(graph.add_node("__x", noop()), Err(GraphError::Validation(_))));
        assert!(matches!(graph.add_node("", noop()), Err(GraphError::Validation(_))));
    }

    #[test]
    fn test_unknown_edge_endpoints() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();

        assert!(matches!(graph.add_edge("a", "b"), Err(GraphError::UnknownNode(ref n)) if n == "b"));
        assert!(matches!(graph.add_edge("x", "a"), Err(GraphError::UnknownNode(ref n)) if n == "x"));
        assert!(matches!(graph.add_edge(END, "a"), Err(GraphError::Validation(_))));
        assert!(matches!(graph.add_edge("a", START), Err(GraphError::Validation(_))));
        assert!(graph.add_edge(START, "a").is_ok());
        assert!(graph.add_edge("a", END).is_ok());
        assert!(matches!(graph.add_edge("a", END), Err(GraphError::Validation(_))));
    }

    #[test]
    fn test_conditional_edge_registration() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();

        assert!(matches!(
            graph.add_conditional_edge("missing", |_| Ok(END.to_string())),
            Err(GraphError::UnknownNode(_))
        ));
        assert!(matches!(
            graph.add_conditional_edge_with_branches(
                "a",
                |_| Ok("x".to_string()),
                HashMap::from([("x".to_string(), "nowhere".to_string())]),
            ),
            Err(GraphError::UnknownNode(_))
        ));

        graph.add_conditional_edge("a", |_| Ok(END.to_string())).unwrap();
        assert!(matches!(
            graph.add_conditional_edge("a", |_| Ok(END.to_string())),
            Err(GraphError::Validation(_))
        ));
    }

    #[test]
    fn test_compile_requires_start_edge() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::Validation(ref m) if m.contains("START")));
    }

    #[test]
    fn test_compile_rejects_unreachable() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();
        graph.add_node("orphan", noop()).unwrap();
        graph.add_edge(START, "a").unwrap();
        graph.add_edge("orphan", "a").unwrap();

        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::Validation(ref m) if m.contains("orphan")));
    }

    #[test]
    fn test_declared_branches_limit_reachability() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();
        graph.add_node("b", noop()).unwrap();
        graph.add_node("c", noop()).unwrap();
        graph.add_edge(START, "a").unwrap();
        graph
            .add_conditional_edge_with_branches(
                "a",
                |_| Ok("go".to_string()),
                HashMap::from([
                    ("go".to_string(), "b".to_string()),
                    ("stop".to_string(), END.to_string()),
                ]),
            )
            .unwrap();

        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::Validation(ref m) if m.ends_with(": c")));
    }

    #[test]
    fn test_undeclared_router_reaches_everything() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();
        graph.add_node("b", noop()).unwrap();
        graph.add_edge(START, "a").unwrap();
        graph.add_conditional_edge("a", |_| Ok("b".to_string())).unwrap();
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn test_fan_out_requires_commutative_channels() {
        let build = |kind: ReducerKind| {
            let mut graph = StateGraph::new();
            graph.add_channel("log", kind).unwrap();
            graph.add_node("a", noop()).unwrap();
            graph.add_node("b", noop()).unwrap();
            graph.add_edge(START, "a").unwrap();
            graph.add_edge(START, "b").unwrap();
            graph.compile()
        };

        let err = build(ReducerKind::Append).unwrap_err();
        assert!(matches!(err, GraphError::Configuration(ref m) if m.contains("log")));
        assert!(build(ReducerKind::sum()).is_ok());
    }

    #[test]
    fn test_next_nodes_routing() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();
        graph.add_node("b", noop()).unwrap();
        graph.add_edge(START, "a").unwrap();
        graph
            .add_conditional_edge("a", |state| {
                Ok(state["target"].as_str().unwrap_or(END).to_string())
            })
            .unwrap();
        graph.add_edge("b", END).unwrap();
        let compiled = graph.compile().unwrap();

        assert_eq!(compiled.entry_nodes(&json!({})).unwrap(), vec!["a"]);
        assert_eq!(compiled.next_nodes("a", &json!({"target": "b"})).unwrap(), vec!["b"]);
        assert!(compiled.next_nodes("a", &json!({})).unwrap().is_empty());
        assert!(compiled.next_nodes("b", &json!({})).unwrap().is_empty());

        let err = compiled.next_nodes("a", &json!({"target": "nowhere"})).unwrap_err();
        assert!(matches!(err, GraphError::Routing { ref node, .. } if node == "a"));
    }

    #[test]
    fn test_branch_key_outside_map_is_routing_error() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop()).unwrap();
        graph.add_edge(START, "a").unwrap();
        graph
            .add_conditional_edge_with_branches(
                "a",
                |_| Ok("maybe".to_string()),
                HashMap::from([("done".to_string(), END.to_string())]),
            )
            .unwrap();
        let compiled = graph.compile().unwrap();

        let err = compiled.next_nodes("a", &json!({})).unwrap_err();
        assert!(matches!(err, GraphError::Routing { ref message, .. } if message.contains("maybe")));
    }

    #[tokio::test]
    async fn test_update_node_shorthand() {
        let mut graph = StateGraph::new();
        graph
            .add_update_node("inc", |state: Value| async move {
                Ok(json!({"n": state["n"].as_i64().unwrap_or(0) + 1}))
            })
            .unwrap();
        graph.set_entry("inc").unwrap();
        graph.set_finish("inc").unwrap();
        let compiled = graph.compile().unwrap();

        let node = compiled.node("inc").unwrap();
        let result = node(NodeContext::new(json!({"n": 1}), "inc", "t", 0)).await.unwrap();
        assert_eq!(result, NodeResult::Update(json!({"n": 2})));
    }
}

//! Engine: the runtime owning a compiled graph, its checkpointer and rate limiters
//!
//! An [`Engine`] is constructed once and shared by handle (it is cheap to
//! clone). Every operation addresses a **thread**, an independent execution
//! lineage identified by a string id and persisted through the checkpointer.
//!
//! # Super-step loop
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────┐
//!   │ next = [nodes]                                                 │
//!   │   │                                                            │
//!   │   ├─ empty ──────────────────────────────────▶ DONE            │
//!   │   ▼                                                            │
//!   │ invoke every node in `next` on the same pre-step state         │
//!   │   │                                                            │
//!   │   ├─ any error ─────────▶ FAILED (nothing committed)           │
//!   │   ├─ any Interrupt ─────▶ checkpoint(next, pending) ▶ SUSPENDED│
//!   │   ▼                                                            │
//!   │ merge updates through the reducers (declaration order)         │
//!   │ route each node: Command goto, conditional edge, direct edges  │
//!   │ checkpoint {step + 1, state, next}   ◀── commit point          │
//!   └──────────────────────────── loop ──────────────────────────────┘
//! ```
//!
//! The checkpoint is written before the new state is adopted: if the write
//! fails, the step is not committed and the previous checkpoint stays the
//! latest. Replay after a failure or crash therefore always continues from the
//! last persisted `next`.
//!
//! # Concurrency
//!
//! `start`, `resume` and `update_state` hold a per-thread async lock for their
//! whole run, so calls on one thread are serialized while distinct threads run
//! in parallel on the tokio runtime. Nodes active in the same super-step run
//! concurrently.
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stategraph_core::{Command, Engine, NodeContext, NodeResult, StateGraph, END, START};
//!
//! # #[tokio::main]
//! # async fn main() -> stategraph_core::Result<()> {
//! let mut graph = StateGraph::new();
//! graph.add_node("confirm", |mut ctx: NodeContext| Box::pin(async move {
//!     let answer = match ctx.interrupt(json!({"query": "confirm?"})) {
//!         stategraph_core::Interrupt::Resumed(v) => v,
//!         stategraph_core::Interrupt::Pending(p) => return Ok(NodeResult::Interrupt(p)),
//!     };
//!     Ok(NodeResult::Update(json!({"confirmed": answer["data"] == "yes"})))
//! }))?;
//! graph.add_edge(START, "confirm")?;
//! graph.add_edge("confirm", END)?;
//!
//! let engine = Engine::new(graph.compile()?);
//! let outcome = engine.start("thread-1", json!({})).await?;
//! assert!(outcome.is_suspended());
//!
//! let outcome = engine.resume("thread-1", Command::resume(json!({"data": "yes"}))).await?;
//! assert_eq!(outcome.state()["confirmed"], json!(true));
//! # Ok(())
//! # }
//! ```

mod execution;
mod state;
mod streaming;
mod types;

pub use streaming::{EventStream, StreamEvent};
pub use types::{RunOutcome, StateSnapshot, ThreadStatus};

use dashmap::DashMap;
use stategraph_checkpoint::{
    CheckpointSaver, FileCheckpointSaver, InMemoryCheckpointSaver,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::{CheckpointBackend, EngineConfig, DEFAULT_RECURSION_LIMIT};
use crate::error::{GraphError, Result};
use crate::graph::{CompiledGraph, NodeFn, NodeId};
use crate::rate_limit::RateLimiter;

/// Runtime for a compiled graph
#[derive(Clone)]
pub struct Engine {
    graph: Arc<CompiledGraph>,
    checkpointer: Arc<dyn CheckpointSaver>,
    /// Node functions as invoked, with rate limiters applied
    nodes: Arc<HashMap<NodeId, NodeFn>>,
    limiters: Arc<HashMap<NodeId, Arc<RateLimiter>>>,
    recursion_limit: usize,
    thread_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    running: Arc<DashMap<String, ()>>,
    failures: Arc<DashMap<String, String>>,
}

impl Engine {
    /// Engine with an in-memory checkpointer and default settings
    pub fn new(graph: CompiledGraph) -> Self {
        let nodes = graph.nodes.clone();
        Self {
            graph: Arc::new(graph),
            checkpointer: Arc::new(InMemoryCheckpointSaver::new()),
            nodes: Arc::new(nodes),
            limiters: Arc::new(HashMap::new()),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            thread_locks: Arc::new(DashMap::new()),
            running: Arc::new(DashMap::new()),
            failures: Arc::new(DashMap::new()),
        }
    }

    /// Build an engine as described by `config`
    ///
    /// Opens the file checkpoint directory when the config names one.
    pub async fn from_config(graph: CompiledGraph, config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let checkpointer: Arc<dyn CheckpointSaver> = match &config.checkpoint {
            CheckpointBackend::Memory { latest_only: false } => Arc::new(InMemoryCheckpointSaver::new()),
            CheckpointBackend::Memory { latest_only: true } => {
                Arc::new(InMemoryCheckpointSaver::latest_only())
            }
            CheckpointBackend::File { dir } => Arc::new(FileCheckpointSaver::open(dir).await?),
        };

        let mut engine = Self::new(graph)
            .with_checkpointer(checkpointer)
            .with_recursion_limit(config.recursion_limit);

        let mut limited: Vec<_> = config.rate_limits.iter().collect();
        limited.sort_by(|a, b| a.0.cmp(b.0));
        for (node, limit) in limited {
            engine = engine.with_rate_limiter(node, limit.build()?)?;
        }

        tracing::debug!(
            recursion_limit = engine.recursion_limit,
            rate_limited = engine.limiters.len(),
            "Engine configured"
        );
        Ok(engine)
    }

    /// Use a different checkpoint backend
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    /// Bound the super-steps a single `start`/`resume` call may run
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Throttle every invocation of `node` through `limiter`
    ///
    /// Replaces any limiter previously attached to the same node.
    pub fn with_rate_limiter(mut self, node: &str, limiter: RateLimiter) -> Result<Self> {
        let func = self
            .graph
            .node(node)
            .cloned()
            .ok_or_else(|| GraphError::UnknownNode(node.to_string()))?;

        let limiter = Arc::new(limiter);
        Arc::make_mut(&mut self.nodes).insert(node.to_string(), limiter.wrap(func));
        Arc::make_mut(&mut self.limiters).insert(node.to_string(), limiter);
        Ok(self)
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn checkpointer(&self) -> &Arc<dyn CheckpointSaver> {
        &self.checkpointer
    }

    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Limiter attached to `node`, if any
    pub fn rate_limiter(&self, node: &str) -> Option<&Arc<RateLimiter>> {
        self.limiters.get(node)
    }

    /// Message of the error that failed the thread's last run
    ///
    /// Kept in memory only; cleared when a new run starts on the thread.
    pub fn last_error(&self, thread_id: &str) -> Option<String> {
        self.failures.get(thread_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn node_fn(&self, name: &str) -> Result<&NodeFn> {
        self.nodes
            .get(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    /// Serialize operations on one thread
    ///
    /// The lock entry lives only while some call holds or waits on it.
    pub(crate) async fn lock_thread(&self, thread_id: &str) -> ThreadGuard {
        let lock = self
            .thread_locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ThreadGuard {
            _guard: lock.lock_owned().await,
            locks: Arc::clone(&self.thread_locks),
            thread_id: thread_id.to_string(),
        }
    }

    /// Flag the thread as running until the guard drops
    pub(crate) fn mark_running(&self, thread_id: &str) -> RunningGuard {
        self.running.insert(thread_id.to_string(), ());
        RunningGuard {
            running: Arc::clone(&self.running),
            thread_id: thread_id.to_string(),
        }
    }

    pub(crate) fn is_running(&self, thread_id: &str) -> bool {
        self.running.contains_key(thread_id)
    }

    pub(crate) fn record_failure(&self, thread_id: &str, error: &GraphError) {
        tracing::error!(thread_id = %thread_id, error = %error, "Run failed");
        self.failures.insert(thread_id.to_string(), error.to_string());
    }

    pub(crate) fn clear_failure(&self, thread_id: &str) {
        self.failures.remove(thread_id);
    }

    pub(crate) fn has_failed(&self, thread_id: &str) -> bool {
        self.failures.contains_key(thread_id)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut limited: Vec<&String> = self.limiters.keys().collect();
        limited.sort();
        f.debug_struct("Engine")
            .field("graph", &self.graph)
            .field("recursion_limit", &self.recursion_limit)
            .field("rate_limited", &limited)
            .finish()
    }
}

/// Holds a thread's lock; drops the lock entry when no other call wants it
pub(crate) struct ThreadGuard {
    _guard: OwnedMutexGuard<()>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    thread_id: String,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        // Only the map and this guard reference the mutex: nobody is queued.
        self.locks
            .remove_if(&self.thread_id, |_, lock| Arc::strong_count(lock) == 2);
    }
}

/// Removes a thread from the running set when dropped
pub(crate) struct RunningGuard {
    running: Arc<DashMap<String, ()>>,
    thread_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.remove(&self.thread_id);
    }
}

//! # stategraph-core - Stateful graph execution
//!
//! Build graphs of async nodes that share a JSON state, and run them as
//! checkpointed, resumable threads.
//!
//! ## Overview
//!
//! - **Channels and reducers** - state is a map of channels; each channel's
//!   reducer (overwrite, append or custom) merges node output into it
//! - **Super-steps** - active nodes run on the same snapshot, their updates are
//!   merged, a checkpoint is written, then edges pick the next nodes
//! - **Interrupts** - a node can suspend its thread and hand a payload to the
//!   caller; `resume` continues with a value, or with a state patch and a new
//!   target
//! - **Checkpoints** - every committed step is persisted through a
//!   [`CheckpointSaver`], so failed runs replay from the last good step
//! - **Rate limits** - per-node randomized delays for nodes that call
//!   rate-limited services
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ compile() ┌───────────────┐        ┌──────────────────────┐
//! │ StateGraph  │──────────▶│ CompiledGraph │◀───────│        Engine        │
//! │ nodes/edges │           │  (immutable)  │  owns  │ start / resume       │
//! │ channels    │           └───────────────┘        │ get_state / stream   │
//! └─────────────┘                                    │ RateLimiter per node │
//!                                                    └──────────┬───────────┘
//!                                                               │ put / get_latest
//!                                                    ┌──────────▼───────────┐
//!                                                    │   CheckpointSaver    │
//!                                                    │  (memory / file)     │
//!                                                    └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! A chatbot that can call tools, run to completion:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use stategraph_core::prebuilt::{chat_node, tool_node, tools_condition, TOOLS_NODE};
//! use stategraph_core::{Engine, Message, ReducerKind, StateGraph, START};
//!
//! let mut graph = StateGraph::new();
//! graph.add_channel("messages", ReducerKind::Append)?;
//! graph.add_node_fn("chatbot", chat_node(Arc::new(my_model)))?;
//! graph.add_node_fn(TOOLS_NODE, tool_node(vec![Arc::new(search_tool)]))?;
//! graph.add_edge(START, "chatbot")?;
//! graph.add_conditional_edge("chatbot", tools_condition)?;
//! graph.add_edge(TOOLS_NODE, "chatbot")?;
//!
//! let engine = Engine::new(graph.compile()?);
//! let outcome = engine
//!     .start("session-1", json!({"messages": [Message::human("Hi!").to_value()]}))
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`builder`] / [`graph`] - graph construction and the compiled form
//! - [`state`] - channel schema and reducers
//! - [`engine`] - the runtime
//! - [`interrupt`], [`command`], [`node_result`] - node control flow
//! - [`rate_limit`] - per-node throttling
//! - [`config`] - YAML/TOML engine configuration
//! - [`messages`], [`prebuilt`] - chat messages and tool-calling nodes

pub mod builder;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod messages;
pub mod node_result;
pub mod prebuilt;
pub mod rate_limit;
pub mod state;

pub use builder::StateGraph;
pub use command::Command;
pub use config::{CheckpointBackend, EngineConfig, RateLimitConfig};
pub use engine::{Engine, EventStream, RunOutcome, StateSnapshot, StreamEvent, ThreadStatus};
pub use error::{GraphError, Result};
pub use graph::{CompiledGraph, NodeFn, NodeFuture, NodeId, RouterFn, END, START};
pub use interrupt::{Interrupt, NodeContext};
pub use messages::{add_messages, Message, MessageRole, ToolCall};
pub use node_result::NodeResult;
pub use rate_limit::RateLimiter;
pub use state::{ChannelSchema, CustomReducer, Reducer, ReducerKind, StateError};

pub use stategraph_checkpoint::{
    Checkpoint, CheckpointSaver, CheckpointSource, FileCheckpointSaver, InMemoryCheckpointSaver,
    PendingInterrupt,
};

//! # stategraph-checkpoint - State persistence for graph execution
//!
//! Checkpoint data model and persistence backends for the stategraph engine.
//!
//! ## Overview
//!
//! After every super-step the engine writes a [`Checkpoint`]: the full channel
//! state of a thread, the node(s) to run next, and any interrupt that is waiting
//! for a human answer. Checkpoints make execution:
//!
//! - **Resumable** - a suspended thread continues from its latest checkpoint
//! - **Replayable** - a failed thread is retried from the last committed step
//! - **Inspectable** - the history of a thread can be listed step by step
//!
//! ## Backends
//!
//! | Backend | Durability | History |
//! |---------|------------|---------|
//! | [`InMemoryCheckpointSaver`] | process lifetime | full, or latest only |
//! | [`FileCheckpointSaver`] | fsync'd JSON lines | full |
//!
//! Custom backends implement [`CheckpointSaver`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           stategraph-core (Engine)           │
//! │  put() after each super-step                 │
//! │  get_latest() on resume / get_state          │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │        CheckpointSaver trait (this crate)    │
//! └──────────┬───────────────────────┬───────────┘
//!            ▼                       ▼
//!   ┌─────────────────┐     ┌──────────────────┐
//!   │    In-Memory    │     │  File (JSONL)    │
//!   └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use stategraph_checkpoint::{
//!     Checkpoint, CheckpointMetadata, CheckpointSaver, CheckpointSource, InMemoryCheckpointSaver,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//!
//! let checkpoint = Checkpoint::from_state("thread-123", 0, &json!({"messages": []}))?
//!     .with_next_nodes(vec!["chatbot".into()])
//!     .with_metadata(CheckpointMetadata::new().with_source(CheckpointSource::Input));
//! saver.put(checkpoint).await?;
//!
//! let latest = saver.get_latest("thread-123").await?.expect("saved above");
//! assert_eq!(latest.next_nodes, vec!["chatbot"]);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

// Re-export main types
pub use checkpoint::{
    ChannelValues, Checkpoint, CheckpointId, CheckpointMetadata, CheckpointSource,
    PendingInterrupt,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointSaver;
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::CheckpointSaver;

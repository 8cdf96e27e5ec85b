//! Streaming execution events
//!
//! [`Engine::stream`] runs a thread in a background task and hands back a
//! stream of [`StreamEvent`]s as super-steps commit:
//!
//! ```text
//!  Values{step 0}  Updates{a}  Values{step 1}  Updates{b}  Values{step 2}  Done
//!  └─ input ─────┘ └──── super-step 1 ───────┘ └──── super-step 2 ───────┘
//! ```
//!
//! A run that suspends ends with `Interrupt`, a failed one with `Error`. The
//! channel is bounded (100 events), so a slow consumer applies backpressure to
//! the run. Dropping the stream does not cancel the run; it continues to its
//! next checkpoint boundary and beyond, and its results stay readable through
//! [`Engine::get_state`].

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::Engine;
use crate::command::Command;

/// Event emitted while a thread runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Full state after the input checkpoint or a committed super-step
    Values { step: u64, state: Value },
    /// Partial update returned by one node in the committed super-step
    Updates { node: String, update: Value },
    /// A node suspended the thread
    Interrupt { node: String, payload: Value },
    /// END was reached
    Done { state: Value },
    /// The run failed; the thread is left at its last checkpoint
    Error { message: String },
}

impl StreamEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Interrupt { .. } | StreamEvent::Done { .. } | StreamEvent::Error { .. }
        )
    }
}

/// Stream of execution events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

pub(crate) type EventSender = mpsc::Sender<StreamEvent>;

const STREAM_BUFFER: usize = 100;

pub(crate) async fn emit(events: Option<&EventSender>, event: StreamEvent) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            tracing::trace!("Stream receiver dropped; event discarded");
        }
    }
}

impl Engine {
    /// Like [`start`](Engine::start), streaming events as the run progresses
    pub fn stream(&self, thread_id: impl Into<String>, input: Value) -> EventStream {
        let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
        let engine = self.clone();
        let thread_id = thread_id.into();

        tokio::spawn(async move {
            if let Err(e) = engine.start_with_events(&thread_id, input, Some(&tx)).await {
                report_error(&tx, &thread_id, e).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Like [`resume`](Engine::resume), streaming events as the run progresses
    pub fn stream_resume(&self, thread_id: impl Into<String>, command: Command) -> EventStream {
        let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
        let engine = self.clone();
        let thread_id = thread_id.into();

        tokio::spawn(async move {
            if let Err(e) = engine.resume_with_events(&thread_id, command, Some(&tx)).await {
                report_error(&tx, &thread_id, e).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

async fn report_error(tx: &EventSender, thread_id: &str, error: crate::error::GraphError) {
    tracing::debug!(thread_id = %thread_id, error = %error, "Streaming run ended with an error");
    emit(
        Some(tx),
        StreamEvent::Error {
            message: error.to_string(),
        },
    )
    .await;
}

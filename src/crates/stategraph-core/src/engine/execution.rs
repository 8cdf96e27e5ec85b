//! Running threads: `start`, `resume` and the super-step loop

use futures::future::join_all;
use serde_json::Value;
use stategraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource, PendingInterrupt};

use super::streaming::{emit, EventSender, StreamEvent};
use super::{Engine, RunOutcome, ThreadStatus};
use crate::command::Command;
use crate::error::{GraphError, Result};
use crate::graph::{NodeId, END};
use crate::interrupt::NodeContext;
use crate::node_result::NodeResult;
use crate::state::{json_type, StateError};

/// Where a run picks up: the committed state, its step and the nodes to run
struct RunPlan {
    state: Value,
    step: u64,
    next: Vec<NodeId>,
    /// Node that receives the resume value in the first super-step
    resume: Option<(NodeId, Value)>,
    /// Input or patch checkpoint persisted before the first super-step
    opening: Option<Checkpoint>,
}

impl Engine {
    /// Run a thread with new input
    ///
    /// On a new thread the input seeds the channels. On a thread whose last run
    /// reached END, the input is merged into the saved state through the
    /// reducers and a new run begins. Suspended and failed threads are rejected;
    /// continue those with [`resume`](Self::resume).
    #[tracing::instrument(skip(self, input))]
    pub async fn start(&self, thread_id: &str, input: Value) -> Result<RunOutcome> {
        self.start_with_events(thread_id, input, None).await
    }

    /// Continue a suspended or failed thread
    ///
    /// | Thread | Command | Effect |
    /// |--------|---------|--------|
    /// | suspended | `resume` only | interrupted node re-runs; its `interrupt` call returns the value |
    /// | suspended | `update` and/or `goto` | state patched, interrupted node skipped; continues at `goto` or the node's successors |
    /// | failed | empty, `update`, `goto` | replays the last committed `next`, optionally patched or redirected |
    ///
    /// A run resumed from an interrupt that then fails leaves the interrupt
    /// pending: the thread stays suspended, [`last_error`](Self::last_error)
    /// holds the failure, and the same rows for a suspended thread apply to the
    /// retry.
    ///
    /// Fails with [`GraphError::ThreadNotFound`] for unknown threads and
    /// [`GraphError::InvalidThreadState`] for finished ones.
    #[tracing::instrument(skip(self, command))]
    pub async fn resume(&self, thread_id: &str, command: Command) -> Result<RunOutcome> {
        self.resume_with_events(thread_id, command, None).await
    }

    pub(crate) async fn start_with_events(
        &self,
        thread_id: &str,
        input: Value,
        events: Option<&EventSender>,
    ) -> Result<RunOutcome> {
        let _lock = self.lock_thread(thread_id).await;

        let latest = self.checkpointer.get_latest(thread_id).await?;
        let (state, step) = match &latest {
            None => (self.graph.schema.initial_state(&input)?, 0),
            Some(checkpoint) => match self.status_of(thread_id, checkpoint) {
                ThreadStatus::Done => {
                    let mut state = checkpoint.state();
                    self.graph.schema.apply(&mut state, &input)?;
                    (state, checkpoint.step + 1)
                }
                ThreadStatus::Suspended => {
                    return Err(GraphError::invalid_thread_state(
                        thread_id,
                        ThreadStatus::Suspended,
                        "waiting on an interrupt; continue it with resume",
                    ))
                }
                _ => {
                    return Err(GraphError::invalid_thread_state(
                        thread_id,
                        ThreadStatus::Failed,
                        "last run did not finish; replay it with resume",
                    ))
                }
            },
        };

        let next = self.graph.entry_nodes(&state)?;
        let opening = Checkpoint::from_state(thread_id, step, &state)?
            .with_next_nodes(next.clone())
            .with_metadata(CheckpointMetadata::new().with_source(CheckpointSource::Input));

        tracing::info!(step, entry = ?next, "Run started");
        let plan = RunPlan {
            state,
            step,
            next,
            resume: None,
            opening: Some(opening),
        };
        self.execute(thread_id, plan, events).await
    }

    pub(crate) async fn resume_with_events(
        &self,
        thread_id: &str,
        command: Command,
        events: Option<&EventSender>,
    ) -> Result<RunOutcome> {
        let _lock = self.lock_thread(thread_id).await;

        let latest = self
            .checkpointer
            .get_latest(thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.to_string()))?;

        let plan = match latest.pending_interrupt.clone() {
            Some(pending) => self.plan_interrupt_resume(thread_id, &latest, pending, command)?,
            None if latest.is_terminal() => {
                return Err(GraphError::invalid_thread_state(
                    thread_id,
                    ThreadStatus::Done,
                    "run already reached END; start it with new input instead",
                ))
            }
            None => self.plan_replay(thread_id, &latest, command)?,
        };

        tracing::info!(step = plan.step, next = ?plan.next, "Run resumed");
        self.execute(thread_id, plan, events).await
    }

    /// Resume at a pending interrupt
    fn plan_interrupt_resume(
        &self,
        thread_id: &str,
        latest: &Checkpoint,
        pending: PendingInterrupt,
        command: Command,
    ) -> Result<RunPlan> {
        if command.is_empty() {
            return Err(GraphError::invalid_thread_state(
                thread_id,
                ThreadStatus::Suspended,
                format!(
                    "node '{}' is waiting on an interrupt; resume needs a value, an update or a goto",
                    pending.node
                ),
            ));
        }

        let Command { update, goto, resume } = command;

        if update.is_none() && goto.is_none() {
            return Ok(RunPlan {
                state: latest.state(),
                step: latest.step,
                next: latest.next_nodes.clone(),
                resume: resume.map(|value| (pending.node, value)),
                opening: None,
            });
        }

        let mut state = latest.state();
        if let Some(update) = &update {
            self.graph.schema.apply(&mut state, update)?;
        }

        let (next, resume) = match goto {
            Some(target) => {
                if resume.is_some() {
                    tracing::warn!(
                        node = %pending.node,
                        goto = %target,
                        "Resume value ignored: goto skips the interrupted node"
                    );
                }
                (self.goto_targets(&target)?, None)
            }
            None if resume.is_some() => (latest.next_nodes.clone(), resume.map(|v| (pending.node.clone(), v))),
            None => {
                let mut next: Vec<NodeId> = latest
                    .next_nodes
                    .iter()
                    .filter(|node| **node != pending.node)
                    .cloned()
                    .collect();
                extend_unique(&mut next, self.graph.next_nodes(&pending.node, &state)?);
                (next, None)
            }
        };

        let step = latest.step + 1;
        let opening = patch_checkpoint(thread_id, step, &state, &next, vec![pending.node])?;
        Ok(RunPlan {
            state,
            step,
            next,
            resume,
            opening: Some(opening),
        })
    }

    /// Replay a run that failed or stopped mid-way
    fn plan_replay(&self, thread_id: &str, latest: &Checkpoint, command: Command) -> Result<RunPlan> {
        let Command { update, goto, resume } = command;
        if resume.is_some() {
            return Err(GraphError::invalid_thread_state(
                thread_id,
                ThreadStatus::Failed,
                "no interrupt is pending, so there is nothing to deliver a resume value to",
            ));
        }

        let mut state = latest.state();
        let mut step = latest.step;
        let mut next = latest.next_nodes.clone();
        let mut opening = None;

        if update.is_some() || goto.is_some() {
            if let Some(update) = &update {
                self.graph.schema.apply(&mut state, update)?;
            }
            if let Some(target) = goto {
                next = self.goto_targets(&target)?;
            }
            step += 1;
            opening = Some(patch_checkpoint(thread_id, step, &state, &next, Vec::new())?);
        }

        Ok(RunPlan {
            state,
            step,
            next,
            resume: None,
            opening,
        })
    }

    /// Resolve a caller-supplied `goto`
    fn goto_targets(&self, target: &str) -> Result<Vec<NodeId>> {
        if target == END {
            Ok(Vec::new())
        } else if self.graph.has_node(target) {
            Ok(vec![target.to_string()])
        } else {
            Err(GraphError::UnknownNode(target.to_string()))
        }
    }

    /// Run the loop, keeping the thread's running and failure bookkeeping
    ///
    /// The thread reads as running from before the opening checkpoint is
    /// written until the call returns. A failed opening write leaves the
    /// previous status, including any recorded failure, in place.
    async fn execute(
        &self,
        thread_id: &str,
        mut plan: RunPlan,
        events: Option<&EventSender>,
    ) -> Result<RunOutcome> {
        let _running = self.mark_running(thread_id);

        if let Some(opening) = plan.opening.take() {
            let announce = opening.metadata.source == CheckpointSource::Input;
            self.checkpointer.put(opening).await?;
            if announce {
                emit(
                    events,
                    StreamEvent::Values {
                        step: plan.step,
                        state: plan.state.clone(),
                    },
                )
                .await;
            } else {
                tracing::debug!(step = plan.step, next = ?plan.next, "State patched");
            }
        }
        self.clear_failure(thread_id);

        match self.run_loop(thread_id, plan, events).await {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Completed { supersteps, state } => {
                        tracing::info!(supersteps, "Run reached END");
                        emit(events, StreamEvent::Done { state: state.clone() }).await;
                    }
                    RunOutcome::Suspended { interrupt, supersteps, .. } => {
                        tracing::info!(node = %interrupt.node, supersteps, "Run suspended on interrupt");
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(thread_id, &e);
                Err(e)
            }
        }
    }

    async fn run_loop(
        &self,
        thread_id: &str,
        plan: RunPlan,
        events: Option<&EventSender>,
    ) -> Result<RunOutcome> {
        let RunPlan {
            mut state,
            mut step,
            mut next,
            mut resume,
            ..
        } = plan;
        let mut supersteps = 0usize;

        while !next.is_empty() {
            if supersteps >= self.recursion_limit {
                return Err(GraphError::RecursionLimit {
                    limit: self.recursion_limit,
                });
            }
            supersteps += 1;
            tracing::debug!(step, nodes = ?next, "Executing super-step");

            let mut invocations = Vec::with_capacity(next.len());
            for name in &next {
                let mut ctx = NodeContext::new(state.clone(), name.as_str(), thread_id, step);
                if let Some((target, value)) = &resume {
                    if target == name {
                        ctx = ctx.with_resume(value.clone());
                    }
                }
                invocations.push((self.node_fn(name)?)(ctx));
            }
            let results = join_all(invocations).await;
            resume = None;

            let mut updates: Vec<(String, Value)> = Vec::with_capacity(next.len());
            let mut gotos: Vec<Option<String>> = Vec::with_capacity(next.len());
            let mut interrupt: Option<PendingInterrupt> = None;

            for (name, result) in next.iter().zip(results) {
                match result.map_err(|e| e.in_node(name))? {
                    NodeResult::Interrupt(payload) => {
                        if interrupt.is_none() {
                            interrupt = Some(PendingInterrupt::new(name.as_str(), payload));
                        }
                    }
                    NodeResult::Update(update) => {
                        check_update(name, &update)?;
                        updates.push((name.clone(), update));
                        gotos.push(None);
                    }
                    NodeResult::Command(command) => {
                        if command.resume.is_some() {
                            tracing::warn!(node = %name, "Resume value in a node-issued command is ignored");
                        }
                        let update = command.update.unwrap_or(Value::Null);
                        check_update(name, &update)?;
                        updates.push((name.clone(), update));
                        gotos.push(command.goto);
                    }
                }
            }

            if let Some(interrupt) = interrupt {
                // The whole step is discarded; every active node runs again on resume.
                let checkpoint = Checkpoint::from_state(thread_id, step + 1, &state)?
                    .with_next_nodes(next.clone())
                    .with_interrupt(interrupt.clone())
                    .with_metadata(CheckpointMetadata::new().with_source(CheckpointSource::Interrupt));
                self.checkpointer.put(checkpoint).await?;

                emit(
                    events,
                    StreamEvent::Interrupt {
                        node: interrupt.node.clone(),
                        payload: interrupt.payload.clone(),
                    },
                )
                .await;
                return Ok(RunOutcome::Suspended {
                    state,
                    interrupt,
                    supersteps,
                });
            }

            let merged = self
                .graph
                .schema
                .merge_step(&state, &updates)
                .map_err(|e| match e {
                    conflict @ StateError::ConflictingWrites { .. } => {
                        GraphError::Configuration(conflict.to_string())
                    }
                    other => GraphError::State(other),
                })?;

            let mut following: Vec<NodeId> = Vec::new();
            for ((name, _), goto) in updates.iter().zip(&gotos) {
                let targets = match goto {
                    Some(target) if target == END => Vec::new(),
                    Some(target) if self.graph.has_node(target) => vec![target.clone()],
                    Some(target) => {
                        return Err(GraphError::routing(
                            name.as_str(),
                            format!("command goto names unknown node '{}'", target),
                        ))
                    }
                    None => self.graph.next_nodes(name, &merged)?,
                };
                extend_unique(&mut following, targets);
            }

            let checkpoint = Checkpoint::from_state(thread_id, step + 1, &merged)?
                .with_next_nodes(following.clone())
                .with_metadata(
                    CheckpointMetadata::new()
                        .with_source(CheckpointSource::Loop)
                        .with_writes_from(next.clone()),
                );
            self.checkpointer.put(checkpoint).await?;

            step += 1;
            state = merged;
            tracing::debug!(step, next = ?following, "Super-step committed");

            for (node, update) in updates {
                emit(events, StreamEvent::Updates { node, update }).await;
            }
            emit(events, StreamEvent::Values { step, state: state.clone() }).await;

            next = following;
        }

        Ok(RunOutcome::Completed { state, supersteps })
    }
}

/// Checkpoint recording a caller-supplied patch or redirect
fn patch_checkpoint(
    thread_id: &str,
    step: u64,
    state: &Value,
    next: &[NodeId],
    writes_from: Vec<String>,
) -> Result<Checkpoint> {
    Ok(Checkpoint::from_state(thread_id, step, state)?
        .with_next_nodes(next.to_vec())
        .with_metadata(
            CheckpointMetadata::new()
                .with_source(CheckpointSource::Update)
                .with_writes_from(writes_from),
        ))
}

/// A node's update must be a channel map (or null for "no change")
fn check_update(node: &str, update: &Value) -> Result<()> {
    if update.is_object() || update.is_null() {
        Ok(())
    } else {
        Err(GraphError::node_execution(
            node,
            format!("update must be a JSON object of channel values, got {}", json_type(update)),
        ))
    }
}

/// Append `items` to `target`, skipping ones already present
fn extend_unique(target: &mut Vec<NodeId>, items: Vec<NodeId>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

//! Actor loop that owns a single process manager instance.
//!
//! Each instance runs as a tokio task draining a bounded `mpsc` mailbox
//! sequentially. The task exclusively owns the workflow state and the
//! last-seen event position; the router, dispatcher, and snapshot store
//! are shared collaborators reached through `Arc<dyn ...>` handles.
//!
//! Public API: [`InstanceHandle`] (cloneable async handle) and
//! [`spawn_instance`] (factory that starts the actor task and schedules
//! rehydration before any event is dequeued).

use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::command::{CommandEnvelope, DispatchOptions};
use crate::dispatcher::CommandDispatcher;
use crate::error::{Failure, HandlerFailure, InstanceError, InstanceGone, StopError};
use crate::event::{RecordedEvent, WorkflowIdentity};
use crate::process_manager::{ErrorContext, ErrorDirective, FailureContext, ProcessManager, Reaction};
use crate::router::Router;
use crate::snapshot::{SnapshotStore, StateSnapshot};

/// Configuration for the instance actor loop.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Capacity of the instance's event mailbox. Senders back-pressure
    /// once the mailbox is full.
    pub mailbox_capacity: usize,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 32,
        }
    }
}

/// Why an instance's actor task terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The workflow definition requested termination, either from
    /// `handle` or through a stop directive.
    Stopped(String),
    /// [`InstanceHandle::stop`] was called: the persisted snapshot was
    /// deleted and the instance shut down normally.
    Removed,
    /// An infrastructure failure (snapshot or acknowledgement I/O)
    /// killed the instance.
    Failed(String),
}

/// Messages sent from `InstanceHandle` to the actor loop.
enum InstanceMessage<PM: ProcessManager> {
    /// Deliver an event for handling. Completion is signalled to the
    /// router via its acknowledgement interface, not to the sender.
    Deliver {
        /// The event to enqueue.
        event: RecordedEvent,
    },

    /// Retrieve a snapshot of the current workflow state.
    GetState {
        /// Channel to send back a clone of the current state.
        reply: oneshot::Sender<PM>,
    },

    /// Ask whether this instance has applied any event yet.
    IsNew {
        /// Channel to send back the answer.
        reply: oneshot::Sender<bool>,
    },

    /// Delete persisted state and terminate normally.
    Stop {
        /// Channel to send back the deletion result.
        reply: oneshot::Sender<io::Result<()>>,
    },
}

/// Async handle to a running process manager instance.
///
/// Lightweight, cloneable, and `Send + Sync`. Communicates with the
/// actor task over a bounded channel.
#[derive(Debug)]
pub struct InstanceHandle<PM: ProcessManager> {
    sender: mpsc::Sender<InstanceMessage<PM>>,
    exit: watch::Receiver<Option<ExitReason>>,
}

// Manual `Clone`: the handle only clones its channel ends, so no bound
// beyond `ProcessManager` is needed on `PM`.
impl<PM: ProcessManager> Clone for InstanceHandle<PM> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            exit: self.exit.clone(),
        }
    }
}

impl<PM: ProcessManager> InstanceHandle<PM> {
    /// Enqueue exactly one event for handling.
    ///
    /// Events are processed strictly in FIFO order. Already-applied
    /// events (number at or below the last-seen position) are
    /// acknowledged without re-handling, which makes replay after a
    /// crash idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceGone`] if the actor task has terminated.
    pub async fn process_event(&self, event: RecordedEvent) -> Result<(), InstanceGone> {
        self.sender
            .send(InstanceMessage::Deliver { event })
            .await
            .map_err(|_| InstanceGone)
    }

    /// Read a snapshot of the current workflow state.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceGone`] if the actor task has terminated.
    pub async fn state(&self) -> Result<PM, InstanceGone> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(InstanceMessage::GetState { reply: tx })
            .await
            .map_err(|_| InstanceGone)?;
        rx.await.map_err(|_| InstanceGone)
    }

    /// Returns `true` until the first event has been successfully applied
    /// (including state recovered from a snapshot).
    ///
    /// # Errors
    ///
    /// Returns [`InstanceGone`] if the actor task has terminated.
    pub async fn is_new(&self) -> Result<bool, InstanceGone> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(InstanceMessage::IsNew { reply: tx })
            .await
            .map_err(|_| InstanceGone)?;
        rx.await.map_err(|_| InstanceGone)
    }

    /// Delete the persisted snapshot and terminate the instance.
    ///
    /// Returns once the deletion has completed, so the caller observes
    /// the shutdown synchronously. No further events will be processed.
    ///
    /// # Errors
    ///
    /// * [`StopError::Io`] -- deleting the snapshot failed (the instance
    ///   terminates anyway, reporting the failure as its exit reason).
    /// * [`StopError::InstanceGone`] -- the actor task had already
    ///   terminated.
    pub async fn stop(&self) -> Result<(), StopError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(InstanceMessage::Stop { reply: tx })
            .await
            .map_err(|_| StopError::InstanceGone)?;
        rx.await.map_err(|_| StopError::InstanceGone)?.map_err(StopError::Io)
    }

    /// Check whether the actor task backing this handle is still running.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Returns how the instance terminated, or `None` while it is still
    /// running.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit.borrow().clone()
    }
}

/// Spawn a process manager instance with default configuration.
///
/// The workflow state starts as `PM::default()` and the last-seen event
/// position as "none"; a one-shot rehydration from the snapshot store
/// runs before any event is dequeued.
///
/// # Arguments
///
/// * `identity` - The instance's workflow identity; fixed for its lifetime.
/// * `router` - Receives acknowledgement for each completed event.
/// * `dispatcher` - Delivers the commands produced by the workflow.
/// * `snapshots` - Persists the workflow state between events.
///
/// # Panics
///
/// Must be called from within a tokio runtime.
pub fn spawn_instance<PM: ProcessManager>(
    identity: WorkflowIdentity,
    router: Arc<dyn Router>,
    dispatcher: Arc<dyn CommandDispatcher>,
    snapshots: Arc<dyn SnapshotStore>,
) -> InstanceHandle<PM> {
    spawn_instance_with_config(identity, router, dispatcher, snapshots, InstanceConfig::default())
}

/// Spawn a process manager instance with explicit configuration.
pub fn spawn_instance_with_config<PM: ProcessManager>(
    identity: WorkflowIdentity,
    router: Arc<dyn Router>,
    dispatcher: Arc<dyn CommandDispatcher>,
    snapshots: Arc<dyn SnapshotStore>,
    config: InstanceConfig,
) -> InstanceHandle<PM> {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity);
    let (exit_tx, exit_rx) = watch::channel(None);

    let span = tracing::info_span!(
        "instance",
        workflow = PM::TYPE_NAME,
        instance = %identity.uuid,
    );
    let instance = Instance {
        identity,
        state: PM::default(),
        last_seen: None,
        router,
        dispatcher,
        snapshots,
    };
    tokio::spawn(run_instance(instance, rx, exit_tx).instrument(span));

    InstanceHandle {
        sender: tx,
        exit: exit_rx,
    }
}

/// Outcome of handling one dequeued event.
enum EventFlow {
    /// The event completed (or was skipped); keep processing.
    Continue,
    /// The workflow requested termination.
    Stop(String),
}

/// Outcome of the command dispatch loop for one event.
enum DispatchFlow {
    /// Every command was accepted (or deliberately discarded); the
    /// post-success path may run.
    Completed,
    /// The workflow requested termination.
    Stop(String),
}

/// State owned exclusively by the actor task.
struct Instance<PM: ProcessManager> {
    identity: WorkflowIdentity,
    state: PM,
    last_seen: Option<u64>,
    router: Arc<dyn Router>,
    dispatcher: Arc<dyn CommandDispatcher>,
    snapshots: Arc<dyn SnapshotStore>,
}

/// Runs the instance actor loop.
///
/// Rehydrates from the snapshot store, then processes messages
/// sequentially until the workflow stops, a fatal failure occurs, or all
/// handles are dropped. The exit reason is published on `exit` before
/// the task returns.
async fn run_instance<PM: ProcessManager>(
    mut instance: Instance<PM>,
    mut rx: mpsc::Receiver<InstanceMessage<PM>>,
    exit: watch::Sender<Option<ExitReason>>,
) {
    // Rehydration completes before the first receive, so no event can
    // observe pre-snapshot state.
    if let Err(e) = instance.rehydrate().await {
        tracing::error!(error = %e, "instance failed to start");
        let _ = exit.send(Some(ExitReason::Failed(e.to_string())));
        return;
    }

    while let Some(msg) = rx.recv().await {
        match msg {
            InstanceMessage::Deliver { event } => match instance.process_event(&event).await {
                Ok(EventFlow::Continue) => {}
                Ok(EventFlow::Stop(reason)) => {
                    tracing::info!(reason = %reason, "instance stopped by workflow");
                    let _ = exit.send(Some(ExitReason::Stopped(reason)));
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "fatal instance failure");
                    let _ = exit.send(Some(ExitReason::Failed(e.to_string())));
                    return;
                }
            },

            InstanceMessage::GetState { reply } => {
                // If the receiver was dropped, the caller no longer cares
                // about the result. Silently discard it.
                let _ = reply.send(instance.state.clone());
            }

            InstanceMessage::IsNew { reply } => {
                let _ = reply.send(instance.last_seen.is_none());
            }

            InstanceMessage::Stop { reply } => {
                let result = instance.remove().await;
                let reason = match &result {
                    Ok(()) => ExitReason::Removed,
                    Err(e) => ExitReason::Failed(e.to_string()),
                };
                tracing::info!("instance removed");
                let _ = reply.send(result);
                let _ = exit.send(Some(reason));
                return;
            }
        }
    }
    // Mailbox closed: all handles dropped. The instance simply stops
    // without touching persisted state.
}

impl<PM: ProcessManager> Instance<PM> {
    /// Load the persisted snapshot, if any, into the workflow state.
    async fn rehydrate(&mut self) -> Result<(), InstanceError> {
        let key = self.identity.state_key();
        let snapshot = self
            .snapshots
            .read(&key)
            .await
            .map_err(InstanceError::SnapshotIo)?;

        let Some(snapshot) = snapshot else {
            tracing::debug!("no snapshot found, starting fresh");
            return Ok(());
        };

        if snapshot.source_type != PM::TYPE_NAME {
            return Err(InstanceError::TypeMismatch {
                expected: PM::TYPE_NAME,
                found: snapshot.source_type,
            });
        }

        self.state =
            serde_json::from_value(snapshot.data).map_err(InstanceError::DecodeState)?;
        self.last_seen = Some(snapshot.source_version);
        tracing::debug!(
            source_version = snapshot.source_version,
            "rehydrated from snapshot"
        );
        Ok(())
    }

    /// Handle one dequeued event: dedup, drive the handler, dispatch,
    /// commit, acknowledge.
    async fn process_event(&mut self, event: &RecordedEvent) -> Result<EventFlow, InstanceError> {
        // Idempotent replay: an event at or below the last-seen position
        // was already applied. Acknowledge without re-handling.
        if self.last_seen.is_some_and(|seen| event.event_number <= seen) {
            tracing::debug!(
                event_number = event.event_number,
                "event already applied, acknowledging"
            );
            self.ack(event).await?;
            return Ok(EventFlow::Continue);
        }

        let mut context = ErrorContext::new();
        loop {
            match self.invoke_handler(event) {
                Ok(Reaction::Stop(reason)) => return Ok(EventFlow::Stop(reason)),

                Ok(Reaction::Dispatch(commands)) => {
                    return match self.dispatch_all(commands, event, context).await {
                        DispatchFlow::Completed => {
                            self.commit(event).await?;
                            Ok(EventFlow::Continue)
                        }
                        DispatchFlow::Stop(reason) => Ok(EventFlow::Stop(reason)),
                    };
                }

                Err(handler_failure) => {
                    let failure = Failure::Handler(handler_failure);
                    let failure_ctx = FailureContext {
                        pending_commands: Vec::new(),
                        state: self.state.clone(),
                        last_event: event.clone(),
                        context: context.clone(),
                    };

                    match self.state.on_error(&failure, &failure_ctx) {
                        ErrorDirective::Retry { context: next } => {
                            context = next;
                        }
                        ErrorDirective::RetryAfter { delay, context: next } => {
                            tokio::time::sleep(delay).await;
                            context = next;
                        }
                        ErrorDirective::Skip => {
                            tracing::debug!(
                                event_number = event.event_number,
                                "event skipped by workflow"
                            );
                            self.ack(event).await?;
                            return Ok(EventFlow::Continue);
                        }
                        ErrorDirective::Stop { reason } => return Ok(EventFlow::Stop(reason)),
                        other => {
                            tracing::warn!(
                                directive = ?other,
                                "directive not valid for an event failure, stopping"
                            );
                            return Ok(EventFlow::Stop(failure.to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Invoke the workflow's handler, reifying panics as failures.
    fn invoke_handler(&self, event: &RecordedEvent) -> Result<Reaction, HandlerFailure<PM::Error>> {
        let result =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.state.handle(&event.payload)));
        match result {
            Ok(Ok(reaction)) => Ok(reaction),
            Ok(Err(domain)) => Err(HandlerFailure::Domain(domain)),
            Err(panic) => Err(HandlerFailure::Panicked(panic_message(panic.as_ref()))),
        }
    }

    /// Dispatch `commands` sequentially, running the workflow's failure
    /// callback whenever the dispatcher rejects one.
    async fn dispatch_all(
        &self,
        mut commands: Vec<CommandEnvelope>,
        event: &RecordedEvent,
        mut context: ErrorContext,
    ) -> DispatchFlow {
        let opts = DispatchOptions::for_event(event);
        let mut index = 0;

        while index < commands.len() {
            match self.dispatcher.dispatch(&commands[index], &opts).await {
                Ok(()) => index += 1,
                Err(error) => {
                    // The callback sees the state as it would be after
                    // this event commits; the real state is only mutated
                    // once the whole dispatch succeeds.
                    let preview = self.state.clone().apply(&event.payload);
                    let failure = Failure::Dispatch {
                        command: commands[index].clone(),
                        error,
                    };
                    let failure_ctx = FailureContext {
                        pending_commands: commands[index + 1..].to_vec(),
                        state: preview,
                        last_event: event.clone(),
                        context: context.clone(),
                    };

                    match self.state.on_error(&failure, &failure_ctx) {
                        ErrorDirective::Continue { commands: replacement, context: next } => {
                            commands = replacement;
                            index = 0;
                            context = next;
                        }
                        ErrorDirective::Retry { context: next } => {
                            context = next;
                        }
                        ErrorDirective::RetryAfter { delay, context: next } => {
                            tokio::time::sleep(delay).await;
                            context = next;
                        }
                        ErrorDirective::SkipContinuePending => index += 1,
                        ErrorDirective::SkipDiscardPending => return DispatchFlow::Completed,
                        ErrorDirective::Stop { reason } => return DispatchFlow::Stop(reason),
                        ErrorDirective::Skip => {
                            tracing::warn!(
                                "bare skip is not valid for a dispatch failure, stopping"
                            );
                            return DispatchFlow::Stop(failure.to_string());
                        }
                    }
                }
            }
        }

        DispatchFlow::Completed
    }

    /// Post-success path: apply the event, persist the snapshot, advance
    /// the last-seen position, acknowledge.
    ///
    /// The step order is a contract: no snapshot is written until every
    /// command was accepted, and no ack is sent until the snapshot is
    /// durable. A crash between any two steps is safe because replay
    /// re-delivers the event and the already-applied check decides from
    /// the persisted position.
    async fn commit(&mut self, event: &RecordedEvent) -> Result<(), InstanceError> {
        let next = self.state.clone().apply(&event.payload);
        let snapshot = StateSnapshot {
            source_uuid: self.identity.state_key(),
            source_version: event.event_number,
            source_type: PM::TYPE_NAME.to_owned(),
            data: serde_json::to_value(&next).map_err(InstanceError::EncodeState)?,
        };
        self.snapshots
            .record(snapshot)
            .await
            .map_err(InstanceError::SnapshotIo)?;

        self.state = next;
        self.last_seen = Some(event.event_number);
        tracing::debug!(event_number = event.event_number, "event applied");
        self.ack(event).await
    }

    async fn ack(&self, event: &RecordedEvent) -> Result<(), InstanceError> {
        self.router
            .ack_event(&self.identity, event)
            .await
            .map_err(InstanceError::Ack)
    }

    async fn remove(&self) -> io::Result<()> {
        self.snapshots.delete(&self.identity.state_key()).await
    }
}

/// Extract a readable message from a caught panic payload.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

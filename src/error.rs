//! Crate-level error types for the instance pipeline and its collaborators.

use crate::command::CommandEnvelope;

/// Error returned when the dispatcher fails to deliver a command.
///
/// Routed to the workflow definition's failure callback rather than
/// terminating the instance; the definition decides how to proceed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The type-erased command payload could not be deserialized into the
    /// target aggregate's command type.
    #[error("failed to deserialize command payload: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A transport or storage I/O error occurred while dispatching.
    #[error("I/O error during dispatch: {0}")]
    Io(#[from] std::io::Error),

    /// The target aggregate rejected the command.
    #[error("command rejected: {0}")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A failure raised while invoking a workflow definition's event handler.
///
/// # Type Parameters
///
/// * `E` - The definition's domain error type.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFailure<E: std::error::Error + Send + Sync + 'static> {
    /// The handler returned a domain error.
    #[error(transparent)]
    Domain(E),

    /// The handler panicked; the payload message is preserved.
    #[error("event handler panicked: {0}")]
    Panicked(String),
}

/// A failure surfaced to the workflow definition's `on_error` callback.
///
/// The subject of the failure is carried alongside the error: the failed
/// command for dispatch failures, or (for handler failures) the event
/// available as `FailureContext::last_event`.
#[derive(Debug, thiserror::Error)]
pub enum Failure<E: std::error::Error + Send + Sync + 'static> {
    /// The event handler failed or panicked.
    #[error(transparent)]
    Handler(HandlerFailure<E>),

    /// Dispatching a specific command failed.
    #[error("dispatching command to {}/{} failed: {}", .command.aggregate_type, .command.instance_id, .error)]
    Dispatch {
        /// The command whose dispatch failed.
        command: CommandEnvelope,
        /// The dispatcher's error.
        error: DispatchError,
    },
}

/// Fatal infrastructure failure that terminates a process manager instance.
///
/// Unlike [`Failure`], these are never routed through the workflow
/// definition: snapshot and acknowledgement I/O is the runtime's
/// responsibility, and an instance that cannot persist or ack is unsafe
/// to keep running.
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    /// Reading, writing, or deleting the snapshot failed.
    #[error("snapshot I/O failure: {0}")]
    SnapshotIo(#[source] std::io::Error),

    /// The workflow state could not be serialized for the snapshot.
    #[error("failed to encode workflow state for snapshot: {0}")]
    EncodeState(#[source] serde_json::Error),

    /// A persisted snapshot's data could not be deserialized back into
    /// the workflow state type.
    #[error("failed to decode persisted workflow state: {0}")]
    DecodeState(#[source] serde_json::Error),

    /// The persisted snapshot was written by a different workflow type.
    #[error("snapshot records workflow type {found:?} but this instance runs {expected:?}")]
    TypeMismatch {
        /// The workflow type this instance runs.
        expected: &'static str,
        /// The workflow type recorded in the snapshot.
        found: String,
    },

    /// Acknowledging an event to the router failed.
    #[error("event acknowledgement failed: {0}")]
    Ack(#[source] std::io::Error),
}

/// The instance's actor task has terminated and its mailbox is closed.
#[derive(Debug, thiserror::Error)]
#[error("process manager instance is no longer running")]
pub struct InstanceGone;

/// Error returned by [`InstanceHandle::stop`](crate::InstanceHandle::stop).
#[derive(Debug, thiserror::Error)]
pub enum StopError {
    /// Deleting the persisted snapshot failed.
    #[error("failed to delete snapshot: {0}")]
    Io(#[from] std::io::Error),

    /// The actor task had already terminated.
    #[error("process manager instance is no longer running")]
    InstanceGone,
}

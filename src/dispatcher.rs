//! Command dispatch interface consumed by process manager instances.

use std::future::Future;
use std::pin::Pin;

use crate::command::{CommandEnvelope, DispatchOptions};
use crate::error::DispatchError;

/// Dispatches commands produced by a workflow to their target aggregates.
///
/// Implementations deserialize the type-erased envelope into the target
/// aggregate's command type and route it through the command side.
///
/// # At-least-once delivery
///
/// The instance writes its snapshot after all commands for an event were
/// accepted but before acknowledging the event. A crash between those two
/// steps makes the event "seen" on replay, so commands are never
/// re-dispatched for it -- but a crash *during* dispatch re-runs the whole
/// command list. Implementations must therefore tolerate at-least-once
/// delivery, e.g. by deduplicating on `DispatchOptions::causation_id`.
pub trait CommandDispatcher: Send + Sync {
    /// Dispatch a single command with its correlation metadata.
    ///
    /// # Arguments
    ///
    /// * `command` - The type-erased envelope to deliver.
    /// * `opts` - Causation and correlation IDs propagated from the
    ///   originating event.
    fn dispatch<'a>(
        &'a self,
        command: &'a CommandEnvelope,
        opts: &'a DispatchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;
}

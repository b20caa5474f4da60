//! Router-facing acknowledgement interface.

use std::future::Future;
use std::io;
use std::pin::Pin;

use crate::event::{RecordedEvent, WorkflowIdentity};

/// The event router's interface as seen from a process manager instance.
///
/// The router owns instance lifecycles and delivers events; the instance
/// only talks back to it through acknowledgements. The router guarantees
/// at-most-one in-flight event per instance by waiting for the ack before
/// delivering the next event.
pub trait Router: Send + Sync {
    /// Notify the router that `identity` has completed (or skipped) `event`.
    ///
    /// An acknowledgement failure is fatal to the instance: without a
    /// durable ack the router cannot safely advance its delivery cursor.
    fn ack_event<'a>(
        &'a self,
        identity: &'a WorkflowIdentity,
        event: &'a RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;
}

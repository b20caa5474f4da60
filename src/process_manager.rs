//! The workflow definition trait and its failure-handling directives.
//!
//! A [`ProcessManager`] is user code: it decides how events translate into
//! commands, how its private state evolves, and how failures are handled.
//! The instance actor drives it but never interprets its state or its
//! retry context.

use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::command::CommandEnvelope;
use crate::error::Failure;
use crate::event::RecordedEvent;

/// Opaque developer-owned scratch value threaded through failure retries.
///
/// The runtime passes it verbatim to the next `on_error` invocation for
/// the same event or command and never inspects its contents. A common
/// use is counting attempts to bound retries.
pub type ErrorContext = serde_json::Map<String, Value>;

/// What a workflow's event handler decided.
///
/// `From` conversions wrap a single envelope or a command list, so
/// handlers can end with `Ok(envelope.into())` or `Ok(commands.into())`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Dispatch these commands in order. May be empty.
    Dispatch(Vec<CommandEnvelope>),
    /// Terminate the instance with the given reason.
    Stop(String),
}

impl Reaction {
    /// React with no commands.
    pub fn none() -> Self {
        Reaction::Dispatch(Vec::new())
    }
}

impl From<CommandEnvelope> for Reaction {
    fn from(command: CommandEnvelope) -> Self {
        Reaction::Dispatch(vec![command])
    }
}

impl From<Vec<CommandEnvelope>> for Reaction {
    fn from(commands: Vec<CommandEnvelope>) -> Self {
        Reaction::Dispatch(commands)
    }
}

/// How the instance should proceed after a failure, as decided by the
/// workflow definition's [`on_error`](ProcessManager::on_error) callback.
///
/// Event failures accept `Retry`, `RetryAfter`, `Skip`, and `Stop`.
/// Dispatch failures accept `Retry`, `RetryAfter`, `Continue`,
/// `SkipDiscardPending`, `SkipContinuePending`, and `Stop`. Returning a
/// variant on the wrong path is logged at warning and terminates the
/// instance with the original failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDirective {
    /// Retry immediately, carrying `context` into the next attempt.
    ///
    /// On an event failure the whole unseen-event pipeline re-runs with
    /// the same event; on a dispatch failure only the failed command is
    /// retried, then dispatch continues with the pending tail.
    Retry {
        /// Scratch value for the next `on_error` invocation.
        context: ErrorContext,
    },

    /// Sleep, then retry as [`Retry`](ErrorDirective::Retry).
    ///
    /// The delay blocks the instance: no other events are processed while
    /// sleeping. Retries are unbounded; bounding them is the definition's
    /// responsibility, expressed through `context`.
    RetryAfter {
        /// How long to sleep before retrying.
        delay: Duration,
        /// Scratch value for the next `on_error` invocation.
        context: ErrorContext,
    },

    /// Acknowledge the event without applying it or advancing the
    /// last-seen position. Valid only for event failures.
    Skip,

    /// Treat the event's dispatch as successful: abandon the failed
    /// command and everything pending, then run the post-success path
    /// (apply, snapshot, ack). Valid only for dispatch failures.
    SkipDiscardPending,

    /// Drop the failed command only and continue dispatching the pending
    /// tail. Valid only for dispatch failures.
    SkipContinuePending,

    /// Restart dispatch with `commands`, replacing both the failed
    /// command and the pending tail. Valid only for dispatch failures.
    Continue {
        /// The substitute command list.
        commands: Vec<CommandEnvelope>,
        /// Scratch value for the next `on_error` invocation.
        context: ErrorContext,
    },

    /// Terminate the instance with the given reason.
    Stop {
        /// Reason reported as the instance's exit reason.
        reason: String,
    },
}

/// Everything the runtime knows at the point of a failure, handed to
/// [`ProcessManager::on_error`].
///
/// For dispatch failures, `state` is a preview of the workflow state *as
/// it would be after applying the event* -- the real state is only
/// mutated once the whole dispatch succeeds.
#[derive(Debug, Clone)]
pub struct FailureContext<S> {
    /// Commands not yet dispatched, excluding the failed one. Empty for
    /// event failures.
    pub pending_commands: Vec<CommandEnvelope>,
    /// The workflow state (post-apply preview for dispatch failures).
    pub state: S,
    /// The event being handled when the failure occurred.
    pub last_event: RecordedEvent,
    /// The scratch value carried from the previous `on_error` invocation
    /// for this event or command; empty on the first invocation.
    pub context: ErrorContext,
}

/// A user-defined long-running workflow reacting to events with commands.
///
/// The implementing type itself serves as the instance's private state,
/// created as its `Default` value when an instance starts and rehydrated
/// from a snapshot on restart.
///
/// # Contract
///
/// - [`handle`](ProcessManager::handle) must be a pure decision function:
///   no I/O, no side effects. Panics are caught and routed to
///   [`on_error`](ProcessManager::on_error) like returned errors.
/// - [`apply`](ProcessManager::apply) must be a pure, total state
///   transition. It is never invoked for an event whose commands did not
///   all dispatch.
/// - [`on_error`](ProcessManager::on_error) decides recovery. The runtime
///   never retries or drops failures on its own.
pub trait ProcessManager:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable identifier for this workflow type, recorded in snapshots so
    /// readers can detect schema drift.
    const TYPE_NAME: &'static str;

    /// Domain error type returned by [`handle`](ProcessManager::handle).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Translate an event payload into commands (or a stop request).
    fn handle(&self, payload: &Value) -> Result<Reaction, Self::Error>;

    /// Apply an event payload to produce the next state.
    fn apply(self, payload: &Value) -> Self;

    /// Decide how to recover from a handler or dispatch failure.
    ///
    /// The default stops the instance with the failure's message.
    fn on_error(&self, failure: &Failure<Self::Error>, _ctx: &FailureContext<Self>) -> ErrorDirective {
        ErrorDirective::Stop {
            reason: failure.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    /// An order fulfillment workflow used as a test fixture across the
    /// crate: reserves stock when orders are placed, stops when the order
    /// is cancelled.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Fulfillment {
        /// Number of orders seen (for testing state persistence).
        pub orders_seen: u64,
        /// Order IDs for which stock has been reserved.
        pub reserved: Vec<String>,
    }

    /// Errors the `Fulfillment` handler can produce.
    #[derive(Debug, thiserror::Error)]
    pub(crate) enum FulfillmentError {
        #[error("malformed order event: missing {0}")]
        Missing(&'static str),
    }

    impl ProcessManager for Fulfillment {
        const TYPE_NAME: &'static str = "fulfillment";

        type Error = FulfillmentError;

        fn handle(&self, payload: &Value) -> Result<Reaction, FulfillmentError> {
            match payload["type"].as_str() {
                Some("OrderPlaced") => {
                    let order_id = payload["order_id"]
                        .as_str()
                        .ok_or(FulfillmentError::Missing("order_id"))?;
                    Ok(CommandEnvelope::new(
                        "stock",
                        order_id,
                        json!({"type": "Reserve"}),
                    )
                    .into())
                }
                Some("OrderCancelled") => Ok(Reaction::Stop("order cancelled".to_string())),
                // Unknown event types are ignored for forward compatibility.
                _ => Ok(Reaction::none()),
            }
        }

        fn apply(mut self, payload: &Value) -> Self {
            if payload["type"] == "OrderPlaced" {
                self.orders_seen += 1;
                if let Some(order_id) = payload["order_id"].as_str() {
                    self.reserved.push(order_id.to_string());
                }
            }
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::{Fulfillment, FulfillmentError};
    use super::*;
    use crate::error::{DispatchError, HandlerFailure};
    use serde_json::json;

    #[test]
    fn handle_order_placed_reserves_stock() {
        let workflow = Fulfillment::default();
        let reaction = workflow
            .handle(&json!({"type": "OrderPlaced", "order_id": "o-1"}))
            .expect("handle should succeed");

        let Reaction::Dispatch(commands) = reaction else {
            panic!("expected Dispatch, got: {reaction:?}");
        };
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].aggregate_type, "stock");
        assert_eq!(commands[0].instance_id, "o-1");
    }

    #[test]
    fn handle_cancellation_stops() {
        let workflow = Fulfillment::default();
        let reaction = workflow
            .handle(&json!({"type": "OrderCancelled"}))
            .expect("handle should succeed");
        assert_eq!(reaction, Reaction::Stop("order cancelled".to_string()));
    }

    #[test]
    fn handle_unknown_event_is_a_no_op() {
        let workflow = Fulfillment::default();
        let reaction = workflow
            .handle(&json!({"type": "SomethingElse"}))
            .expect("handle should succeed");
        assert_eq!(reaction, Reaction::none());
    }

    #[test]
    fn handle_malformed_event_returns_domain_error() {
        let workflow = Fulfillment::default();
        let result = workflow.handle(&json!({"type": "OrderPlaced"}));
        assert!(
            matches!(result, Err(FulfillmentError::Missing("order_id"))),
            "expected Missing(order_id), got: {result:?}"
        );
    }

    #[test]
    fn apply_records_order() {
        let workflow = Fulfillment::default()
            .apply(&json!({"type": "OrderPlaced", "order_id": "o-1"}))
            .apply(&json!({"type": "OrderPlaced", "order_id": "o-2"}));
        assert_eq!(workflow.orders_seen, 2);
        assert_eq!(workflow.reserved, vec!["o-1", "o-2"]);
    }

    #[test]
    fn apply_ignores_unknown_events() {
        let workflow = Fulfillment::default().apply(&json!({"type": "Unrelated"}));
        assert_eq!(workflow, Fulfillment::default());
    }

    #[test]
    fn singleton_envelope_wraps_into_one_element_dispatch() {
        let envelope = CommandEnvelope::new("stock", "sku-1", json!({}));
        let reaction: Reaction = envelope.clone().into();
        assert_eq!(reaction, Reaction::Dispatch(vec![envelope]));
    }

    #[test]
    fn command_list_converts_directly() {
        let commands = vec![
            CommandEnvelope::new("stock", "a", json!({})),
            CommandEnvelope::new("stock", "b", json!({})),
        ];
        let reaction: Reaction = commands.clone().into();
        assert_eq!(reaction, Reaction::Dispatch(commands));
    }

    #[test]
    fn default_on_error_stops_with_failure_message() {
        let workflow = Fulfillment::default();
        let failure = Failure::Handler(HandlerFailure::Domain(FulfillmentError::Missing(
            "order_id",
        )));
        let ctx = FailureContext {
            pending_commands: Vec::new(),
            state: workflow.clone(),
            last_event: RecordedEvent::new(1, json!({})),
            context: ErrorContext::new(),
        };

        let directive = workflow.on_error(&failure, &ctx);
        assert_eq!(
            directive,
            ErrorDirective::Stop {
                reason: "malformed order event: missing order_id".to_string()
            }
        );
    }

    #[test]
    fn default_on_error_names_failed_command() {
        let workflow = Fulfillment::default();
        let failure: Failure<FulfillmentError> = Failure::Dispatch {
            command: CommandEnvelope::new("stock", "sku-9", json!({})),
            error: DispatchError::Rejected("out of stock".into()),
        };
        let ctx = FailureContext {
            pending_commands: Vec::new(),
            state: workflow.clone(),
            last_event: RecordedEvent::new(1, json!({})),
            context: ErrorContext::new(),
        };

        let ErrorDirective::Stop { reason } = workflow.on_error(&failure, &ctx) else {
            panic!("default on_error should stop");
        };
        assert!(reason.contains("stock/sku-9"), "got: {reason}");
    }
}

//! Durable process manager instances for event-sourced workflows.
//!
//! `sagaflow` provides the runtime for a single process manager instance:
//! a long-lived, identity-scoped actor that consumes an ordered stream of
//! domain events, evolves private workflow state, and reacts by emitting
//! commands to a command bus. State survives crashes through snapshots,
//! and failures are handled through developer-defined directives (retry,
//! skip, substitute commands, stop).
//!
//! Routing events to instances, loading workflow code, and the command
//! side itself are external collaborators, reached through the [`Router`],
//! [`CommandDispatcher`], and [`SnapshotStore`] traits.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`ProcessManager`] | Workflow definition: handles events, emits commands, folds state |
//! | [`InstanceHandle`] | Async handle to a running instance actor |
//! | [`RecordedEvent`] | An event as delivered by the router |
//! | [`CommandEnvelope`] | Type-erased command produced by a workflow |
//! | [`ErrorDirective`] | Failure-handling decision returned by the workflow |
//! | [`SnapshotStore`] | Key/value persistence for workflow state |
//! | [`FileSnapshotStore`] | Local file-backed snapshot store |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use serde_json::{Value, json};
//! use sagaflow::{
//!     CommandEnvelope, FileSnapshotStore, ProcessManager, Reaction, RecordedEvent,
//!     WorkflowIdentity, spawn_instance,
//! };
//!
//! // 1. Define your workflow.
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Fulfillment {
//!     orders_seen: u64,
//! }
//!
//! #[derive(Debug, thiserror::Error)]
//! enum FulfillmentError {}
//!
//! impl ProcessManager for Fulfillment {
//!     const TYPE_NAME: &'static str = "fulfillment";
//!     type Error = FulfillmentError;
//!
//!     fn handle(&self, payload: &Value) -> Result<Reaction, FulfillmentError> {
//!         match payload["type"].as_str() {
//!             Some("OrderPlaced") => {
//!                 Ok(CommandEnvelope::new("stock", "sku-1", json!({"type": "Reserve"})).into())
//!             }
//!             _ => Ok(Reaction::none()),
//!         }
//!     }
//!
//!     fn apply(mut self, _payload: &Value) -> Self {
//!         self.orders_seen += 1;
//!         self
//!     }
//! }
//!
//! # async fn run(
//! #     router: Arc<dyn sagaflow::Router>,
//! #     dispatcher: Arc<dyn sagaflow::CommandDispatcher>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! // 2. Spawn an instance and feed it events.
//! let snapshots = Arc::new(FileSnapshotStore::new("/tmp/my-app"));
//! let identity = WorkflowIdentity::derive("fulfillment", "order-42");
//! let handle = spawn_instance::<Fulfillment>(identity, router, dispatcher, snapshots);
//!
//! handle
//!     .process_event(RecordedEvent::new(1, json!({"type": "OrderPlaced"})))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod actor;
pub use actor::{
    ExitReason, InstanceConfig, InstanceHandle, spawn_instance, spawn_instance_with_config,
};
mod command;
mod dispatcher;
mod error;
mod event;
mod process_manager;
mod router;
mod snapshot;

pub use command::{CommandEnvelope, DispatchOptions};
pub use dispatcher::CommandDispatcher;
pub use error::{DispatchError, Failure, HandlerFailure, InstanceError, InstanceGone, StopError};
pub use event::{RecordedEvent, WorkflowIdentity};
pub use process_manager::{ErrorContext, ErrorDirective, FailureContext, ProcessManager, Reaction};
pub use router::Router;
pub use snapshot::{FileSnapshotStore, SnapshotStore, StateSnapshot, snapshot_path};

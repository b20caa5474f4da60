//! Command envelope and dispatch metadata types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::RecordedEvent;

/// A type-erased command envelope produced by a workflow definition.
///
/// The `command` field is a `serde_json::Value` because the workflow does
/// not know the concrete command type of the target aggregate at compile
/// time. The dispatcher deserializes it into the correct type at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Target aggregate type name.
    pub aggregate_type: String,
    /// Target aggregate instance identifier.
    pub instance_id: String,
    /// JSON-serialized command payload.
    pub command: Value,
}

impl CommandEnvelope {
    /// Create an envelope targeting `instance_id` of `aggregate_type`.
    pub fn new(
        aggregate_type: impl Into<String>,
        instance_id: impl Into<String>,
        command: Value,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            instance_id: instance_id.into(),
            command,
        }
    }
}

/// Correlation metadata propagated from an originating event to every
/// command it produces.
///
/// The instance builds these from the event being handled; workflow
/// definitions never construct them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// The `event_id` of the originating event.
    pub causation_id: Uuid,
    /// The `correlation_id` of the originating event, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
}

impl DispatchOptions {
    /// Build dispatch options carrying the correlation metadata of `event`.
    pub fn for_event(event: &RecordedEvent) -> Self {
        Self {
            causation_id: event.event_id,
            correlation_id: event.correlation_id.clone(),
        }
    }
}

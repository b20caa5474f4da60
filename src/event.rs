//! Event and identity types consumed by process manager instances.
//!
//! This module provides the plain data types that the intake, dispatch,
//! and snapshot modules all depend on. No I/O occurs here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Fixed namespace UUID for deterministic workflow identity derivation.
///
/// All derived workflow UUIDs are v5 values computed from this namespace
/// and the `"{workflow_name}/{business_key}"` string, so the same business
/// identity always maps to the same instance UUID regardless of which
/// process performs the mapping.
const WORKFLOW_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x2b, 0x91, 0xd4, 0x0a, 0x5e, 0x47, 0x1c, 0x9d, 0x38, 0x52, 0xe7, 0x1b, 0x44, 0xa6, 0x90,
]);

/// Identity of a process manager instance: the workflow name paired with
/// an instance UUID.
///
/// Immutable for the instance's lifetime. The snapshot key is derived
/// deterministically via [`state_key`](WorkflowIdentity::state_key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowIdentity {
    /// Workflow name (e.g. `"fulfillment"`).
    pub name: String,
    /// Instance UUID within the workflow.
    pub uuid: Uuid,
}

impl WorkflowIdentity {
    /// Create an identity from an explicit name and UUID.
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }

    /// Derive an identity deterministically from a business key.
    ///
    /// Uses UUID v5 (SHA-1 based) over a fixed namespace so the same
    /// `(name, business_key)` pair always produces the same identity.
    ///
    /// # Examples
    ///
    /// ```
    /// use sagaflow::WorkflowIdentity;
    ///
    /// let a = WorkflowIdentity::derive("fulfillment", "order-42");
    /// let b = WorkflowIdentity::derive("fulfillment", "order-42");
    /// assert_eq!(a, b);
    /// ```
    pub fn derive(name: impl Into<String>, business_key: &str) -> Self {
        let name = name.into();
        let seed = format!("{name}/{business_key}");
        let uuid = Uuid::new_v5(&WORKFLOW_NAMESPACE, seed.as_bytes());
        Self { name, uuid }
    }

    /// The persistence key for this instance's snapshot: `"<name>-<uuid>"`.
    ///
    /// All snapshot reads, writes, and deletes use this key.
    pub fn state_key(&self) -> String {
        format!("{}-{}", self.name, self.uuid)
    }
}

impl std::fmt::Display for WorkflowIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.uuid)
    }
}

/// An event as delivered to a process manager instance by the router.
///
/// The `payload` is the domain event, type-erased to JSON: the instance
/// never interprets it and hands it verbatim to the workflow definition's
/// `handle` and `apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Store-assigned event ID, propagated to commands as the causation ID.
    pub event_id: Uuid,
    /// Position of this event in the instance's stream.
    pub event_number: u64,
    /// Correlation ID propagated verbatim to every resulting command.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
    /// The domain event payload.
    pub payload: Value,
}

impl RecordedEvent {
    /// Create an event with a fresh v4 event ID and no correlation ID.
    pub fn new(event_number: u64, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_number,
            correlation_id: None,
            payload,
        }
    }

    /// Set the correlation ID.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derive_is_deterministic() {
        let a = WorkflowIdentity::derive("fulfillment", "order-1");
        let b = WorkflowIdentity::derive("fulfillment", "order-1");
        assert_eq!(a, b, "same inputs must produce the same identity");
    }

    #[test]
    fn derive_differs_by_business_key() {
        let a = WorkflowIdentity::derive("fulfillment", "order-1");
        let b = WorkflowIdentity::derive("fulfillment", "order-2");
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn derive_differs_by_workflow_name() {
        let a = WorkflowIdentity::derive("fulfillment", "order-1");
        let b = WorkflowIdentity::derive("billing", "order-1");
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn state_key_is_name_dash_uuid() {
        let uuid = Uuid::new_v4();
        let identity = WorkflowIdentity::new("fulfillment", uuid);
        assert_eq!(identity.state_key(), format!("fulfillment-{uuid}"));
    }

    #[test]
    fn display_matches_state_key() {
        let identity = WorkflowIdentity::derive("billing", "invoice-7");
        assert_eq!(identity.to_string(), identity.state_key());
    }

    #[test]
    fn new_event_gets_random_id_and_no_correlation() {
        let event = RecordedEvent::new(1, json!({"type": "OrderPlaced"}));
        assert_eq!(event.event_number, 1);
        assert_eq!(event.correlation_id, None);
        assert_eq!(
            event.event_id.get_version(),
            Some(uuid::Version::Random),
            "event_id should be UUID v4"
        );
    }

    #[test]
    fn with_correlation_id_sets_field() {
        let event = RecordedEvent::new(1, Value::Null).with_correlation_id("req-abc");
        assert_eq!(event.correlation_id.as_deref(), Some("req-abc"));
    }

    #[test]
    fn correlation_id_none_omitted_from_json() {
        let event = RecordedEvent::new(3, json!({"k": "v"}));
        let json = serde_json::to_string(&event).expect("serialization should succeed");
        assert!(
            !json.contains("correlation_id"),
            "correlation_id key should be absent when None, got: {json}"
        );
    }

    #[test]
    fn recorded_event_serde_roundtrip() {
        let event = RecordedEvent::new(9, json!({"type": "OrderPlaced", "order_id": "o-1"}))
            .with_correlation_id("corr-9");
        let json = serde_json::to_string(&event).expect("serialization should succeed");
        let back: RecordedEvent =
            serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(back, event);
    }
}

//! State Deltas
//!
//! An ordered batch of entity change records. Handlers collect changes
//! as they mutate a session; the broadcast router stamps the batch with
//! the session's next sequence number and an envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::now_secs;
use crate::model::session::SessionId;

/// What happened to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// Entity created; payload carries the full entity.
    Add,
    /// Entity mutated; payload carries a partial-field patch.
    Update,
    /// Entity removed; payload is empty.
    Remove,
}

/// Which kind of entity changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Roster entry.
    Player,
    /// Map marker.
    Marker,
    /// Chat or alert event.
    Message,
}

/// One change record inside a delta.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Change {
    /// Operation.
    #[serde(rename = "type")]
    pub op: ChangeOp,
    /// Entity kind.
    pub entity_type: EntityKind,
    /// Entity id, rendered as a string.
    pub entity_id: String,
    /// Operation payload.
    pub data: Value,
    /// When the change was recorded (unix seconds).
    pub timestamp: f64,
}

/// An ordered list of change records awaiting broadcast.
#[derive(Clone, Debug, Default)]
pub struct StateDelta {
    changes: Vec<Change>,
}

impl StateDelta {
    /// Create an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an `add` with the full entity payload.
    pub fn add(&mut self, entity_type: EntityKind, entity_id: impl ToString, data: Value) {
        self.record(ChangeOp::Add, entity_type, entity_id, data);
    }

    /// Record an `update` with a partial-field patch.
    pub fn update(&mut self, entity_type: EntityKind, entity_id: impl ToString, patch: Value) {
        self.record(ChangeOp::Update, entity_type, entity_id, patch);
    }

    /// Record a `remove` with an empty payload.
    pub fn remove(&mut self, entity_type: EntityKind, entity_id: impl ToString) {
        self.record(ChangeOp::Remove, entity_type, entity_id, Value::Object(Default::default()));
    }

    fn record(&mut self, op: ChangeOp, entity_type: EntityKind, entity_id: impl ToString, data: Value) {
        self.changes.push(Change {
            op,
            entity_type,
            entity_id: entity_id.to_string(),
            data,
            timestamp: now_secs(),
        });
    }

    /// Whether any changes have been recorded.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Stamp the delta with session identity and sequence number.
    pub fn into_envelope(self, session_id: SessionId, sequence_number: u64) -> DeltaEnvelope {
        DeltaEnvelope {
            delta_id: Uuid::new_v4(),
            session_id,
            timestamp: now_secs(),
            sequence_number,
            changes: self.changes,
        }
    }
}

/// A broadcast-ready delta carrying its ordering token.
///
/// `sequence_number` is per-session, strictly increasing and assigned
/// under the session lock; clients use it to detect gaps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaEnvelope {
    /// Fresh id for this broadcast.
    pub delta_id: Uuid,
    /// Originating session.
    pub session_id: SessionId,
    /// Broadcast time (unix seconds).
    pub timestamp: f64,
    /// Session-scoped ordering token.
    pub sequence_number: u64,
    /// The change records, in mutation order.
    pub changes: Vec<Change>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_changes_keep_insertion_order() {
        let mut delta = StateDelta::new();
        delta.add(EntityKind::Marker, "m1", json!({"a": 1}));
        delta.update(EntityKind::Player, "p1", json!({"b": 2}));
        delta.remove(EntityKind::Marker, "m2");

        let env = delta.into_envelope(SessionId::generate(), 7);
        assert_eq!(env.sequence_number, 7);
        assert_eq!(env.changes.len(), 3);
        assert_eq!(env.changes[0].op, ChangeOp::Add);
        assert_eq!(env.changes[1].op, ChangeOp::Update);
        assert_eq!(env.changes[2].op, ChangeOp::Remove);
        assert_eq!(env.changes[2].data, json!({}));
    }

    #[test]
    fn test_envelope_wire_shape() {
        let mut delta = StateDelta::new();
        delta.add(EntityKind::Message, "msg-1", json!({"content": "hello"}));
        let env = delta.into_envelope(SessionId::generate(), 1);

        let json = serde_json::to_value(&env).unwrap();
        assert!(json["delta_id"].is_string());
        assert_eq!(json["sequence_number"], 1);
        let change = &json["changes"][0];
        assert_eq!(change["type"], "add");
        assert_eq!(change["entity_type"], "message");
        assert_eq!(change["entity_id"], "msg-1");
        assert_eq!(change["data"]["content"], "hello");
    }

    #[test]
    fn test_empty_delta() {
        let delta = StateDelta::new();
        assert!(delta.is_empty());
    }
}

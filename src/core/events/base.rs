use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ports::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Delete,
    Restore,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// Flags describing how the triggering operation ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    pub soft_delete: bool,
    pub cascade: bool,
    pub graph_synced: bool,
}

/// Ephemeral delete/restore notification fanned out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub flags: EventFlags,
}

impl DeleteEvent {
    #[must_use]
    pub fn new(
        kind: EventKind,
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity_kind,
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
            actor: actor.into(),
            flags: EventFlags::default(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: EventFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Generic topic, `delete` or `restore`.
    pub fn topic(&self) -> String {
        self.kind.to_string()
    }

    /// Kind-qualified topic, e.g. `delete:contact`.
    pub fn typed_topic(&self) -> String {
        format!("{}:{}", self.kind, self.entity_kind)
    }

    /// Wire shape pushed to remote transports.
    pub fn remote_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "delete_event",
            "payload": self,
        })
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Kinds of work records the subsystem knows how to delete and mirror.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Document,
    Fact,
    Decision,
    Risk,
    Action,
    Question,
    Email,
    Project,
    Team,
    Meeting,
    UserStory,
    Conversation,
    Sprint,
    Custom(String),
}

impl EntityKind {
    /// Kinds that other records reference; they are synced before their
    /// dependents so reference edges resolve.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Project | Self::Team | Self::Sprint)
    }

    /// All well-known kinds, containers first (reconciliation sweep order).
    pub fn sweep_order() -> Vec<EntityKind> {
        vec![
            Self::Project,
            Self::Team,
            Self::Sprint,
            Self::Contact,
            Self::Document,
            Self::Fact,
            Self::Decision,
            Self::Risk,
            Self::Action,
            Self::Question,
            Self::Email,
            Self::Meeting,
            Self::UserStory,
            Self::Conversation,
        ]
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contact => write!(f, "contact"),
            Self::Document => write!(f, "document"),
            Self::Fact => write!(f, "fact"),
            Self::Decision => write!(f, "decision"),
            Self::Risk => write!(f, "risk"),
            Self::Action => write!(f, "action"),
            Self::Question => write!(f, "question"),
            Self::Email => write!(f, "email"),
            Self::Project => write!(f, "project"),
            Self::Team => write!(f, "team"),
            Self::Meeting => write!(f, "meeting"),
            Self::UserStory => write!(f, "user_story"),
            Self::Conversation => write!(f, "conversation"),
            Self::Sprint => write!(f, "sprint"),
            Self::Custom(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for EntityKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "contact" | "person" => Self::Contact,
            "document" => Self::Document,
            "fact" => Self::Fact,
            "decision" => Self::Decision,
            "risk" => Self::Risk,
            "action" => Self::Action,
            "question" => Self::Question,
            "email" => Self::Email,
            "project" => Self::Project,
            "team" => Self::Team,
            "meeting" => Self::Meeting,
            "user_story" | "userstory" | "story" => Self::UserStory,
            "conversation" => Self::Conversation,
            "sprint" => Self::Sprint,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Graph node label used when mirroring a kind. Contacts map to the legacy
/// `person` label.
impl EntityKind {
    pub fn graph_label(&self) -> String {
        match self {
            Self::Contact => "person".to_string(),
            other => other.to_string(),
        }
    }
}

/// An externally owned work record: id, kind, arbitrary properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Display name, read from `name`, `title` or `subject`.
    pub fn name(&self) -> Option<&str> {
        self.str_prop("name")
            .or_else(|| self.str_prop("title"))
            .or_else(|| self.str_prop("subject"))
    }

    /// Secondary match key for contacts.
    pub fn email(&self) -> Option<&str> {
        self.str_prop("email")
    }

    /// Entities this record references, as (relation, target id, target
    /// kind). The target kind is implied by the reference field.
    pub fn related_ids(&self) -> Vec<(&'static str, String, EntityKind)> {
        let mut out = Vec::new();
        for (rel, key, kind) in [
            ("OWNED_BY", "owner_id", EntityKind::Contact),
            ("ASSIGNED_TO", "assignee_id", EntityKind::Contact),
            ("PART_OF", "parent_id", EntityKind::Project),
            ("IN_SPRINT", "sprint_id", EntityKind::Sprint),
            ("BELONGS_TO", "project_id", EntityKind::Project),
            ("BELONGS_TO", "company_id", EntityKind::Custom("company".to_string())),
        ] {
            if let Some(id) = self.str_prop(key) {
                out.push((rel, id.to_string(), kind));
            }
        }
        if let Some(deps) = self.properties.get("dependencies").and_then(Value::as_array) {
            for dep in deps.iter().filter_map(Value::as_str) {
                out.push(("DEPENDS_ON", dep.to_string(), self.kind.clone()));
            }
        }
        out
    }
}

#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Store error: {0}")]
    Store(String),
}

/// The authoritative record store, owned externally. This subsystem reads
/// collections for reconciliation and writes only through the narrow
/// mutation surface used by cascade cleanup.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of one kind.
    async fn list(&self, kind: &EntityKind) -> Result<Vec<Entity>, RecordStoreError>;

    /// One record by kind and id.
    async fn get(&self, kind: &EntityKind, id: &str) -> Result<Option<Entity>, RecordStoreError>;

    /// Upsert a record (cascade cleanup rewrites references through this).
    async fn put(&self, entity: Entity) -> Result<(), RecordStoreError>;

    /// Remove a record. Returns whether it existed.
    async fn remove(&self, kind: &EntityKind, id: &str) -> Result<bool, RecordStoreError>;

    async fn get_project(&self, id: &str) -> Result<Option<Entity>, RecordStoreError> {
        self.get(&EntityKind::Project, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_roundtrip() {
        assert_eq!(EntityKind::from("contact"), EntityKind::Contact);
        assert_eq!(EntityKind::from("person"), EntityKind::Contact);
        assert_eq!(EntityKind::Contact.to_string(), "contact");
        assert_eq!(EntityKind::Contact.graph_label(), "person");
        assert_eq!(EntityKind::from("wiki"), EntityKind::Custom("wiki".into()));
    }

    #[test]
    fn test_sweep_order_containers_first() {
        let order = EntityKind::sweep_order();
        let first_dependent = order.iter().position(|k| !k.is_container()).unwrap();
        assert!(order[..first_dependent].iter().all(EntityKind::is_container));
    }

    #[test]
    fn test_entity_name_fallbacks() {
        let e = Entity::new("d1", EntityKind::Document).with_property("title", json!("Roadmap"));
        assert_eq!(e.name(), Some("Roadmap"));

        let e = Entity::new("m1", EntityKind::Email).with_property("subject", json!("Re: Q3"));
        assert_eq!(e.name(), Some("Re: Q3"));
    }

    #[test]
    fn test_related_ids() {
        let e = Entity::new("a1", EntityKind::Action)
            .with_property("assignee_id", json!("c1"))
            .with_property("project_id", json!("p1"))
            .with_property("dependencies", json!(["a2", "a3"]));
        let rels = e.related_ids();
        assert!(rels.contains(&("ASSIGNED_TO", "c1".to_string(), EntityKind::Contact)));
        assert!(rels.contains(&("BELONGS_TO", "p1".to_string(), EntityKind::Project)));
        assert!(rels.contains(&("DEPENDS_ON", "a2".to_string(), EntityKind::Action)));
        assert_eq!(rels.len(), 4);
    }
}

use serde_json::{Map, Value};

use crate::ports::{Entity, EntityKind, Ontology};
use crate::utils::slug;

/// Canonical graph node id for an entity: the record id when present,
/// otherwise the legacy kind-prefixed name slug.
pub fn node_id_for(entity: &Entity) -> Option<String> {
    if !entity.id.is_empty() {
        return Some(entity.id.clone());
    }
    legacy_node_id(&entity.kind, entity.name()?)
}

/// Legacy fallback id, e.g. `person_jane_doe`. Lossy under rename; kept only
/// for records created before stable ids existed.
pub fn legacy_node_id(kind: &EntityKind, name: &str) -> Option<String> {
    let slugged = slug(name);
    if slugged.is_empty() {
        return None;
    }
    Some(format!("{}_{}", kind.graph_label(), slugged))
}

/// Node property map for the graph upsert: id, name, kind, every scalar
/// record property, plus the embedding text field.
pub fn node_props(entity: &Entity, ontology: Option<&dyn Ontology>) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("id".to_string(), Value::String(entity.id.clone()));
    props.insert("kind".to_string(), Value::String(entity.kind.to_string()));
    if let Some(name) = entity.name() {
        props.insert("name".to_string(), Value::String(name.to_string()));
    }

    for (key, value) in &entity.properties {
        // Deletion metadata and nested structures stay out of the mirror.
        if key.starts_with('_') || value.is_object() || value.is_array() {
            continue;
        }
        props.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let embedding_text = ontology
        .filter(|o| o.loaded())
        .and_then(|o| o.generate_embedding_text(entity))
        .unwrap_or_else(|| default_embedding_text(entity));
    props.insert("embedding_text".to_string(), Value::String(embedding_text));

    props
}

fn default_embedding_text(entity: &Entity) -> String {
    match entity.name() {
        Some(name) => format!("{} ({})", name, entity.kind),
        None => format!("{} {}", entity.kind, entity.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_id_wins() {
        let e = Entity::new("c1", EntityKind::Contact).with_property("name", json!("Jane Doe"));
        assert_eq!(node_id_for(&e), Some("c1".to_string()));
    }

    #[test]
    fn test_legacy_slug_fallback() {
        let e = Entity::new("", EntityKind::Contact).with_property("name", json!("Jane Doe"));
        assert_eq!(node_id_for(&e), Some("person_jane_doe".to_string()));
        assert_eq!(node_id_for(&Entity::new("", EntityKind::Contact)), None);
    }

    #[test]
    fn test_node_props_skips_nested_and_metadata() {
        let e = Entity::new("c1", EntityKind::Contact)
            .with_property("name", json!("Jane Doe"))
            .with_property("email", json!("jane@example.com"))
            .with_property("_deleted_at", json!("2026-01-01"))
            .with_property("history", json!([1, 2, 3]));

        let props = node_props(&e, None);
        assert_eq!(props["id"], json!("c1"));
        assert_eq!(props["kind"], json!("contact"));
        assert_eq!(props["email"], json!("jane@example.com"));
        assert!(!props.contains_key("_deleted_at"));
        assert!(!props.contains_key("history"));
        assert_eq!(props["embedding_text"], json!("Jane Doe (contact)"));
    }
}

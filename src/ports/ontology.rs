use super::records::{Entity, EntityKind};

/// Optional ontology/validation collaborator consulted before a graph sync.
///
/// Strict mode blocks a sync on violation; lenient mode logs warnings. The
/// reconciler treats `loaded() == false` as "no ontology configured".
pub trait Ontology: Send + Sync {
    fn has_entity_type(&self, kind: &EntityKind) -> bool;

    fn has_relation_type(&self, relation: &str) -> bool;

    fn is_valid_relation(&self, from: &EntityKind, relation: &str, to: &EntityKind) -> bool;

    /// Text fed into the node's `embedding_text` property.
    fn generate_embedding_text(&self, entity: &Entity) -> Option<String>;

    fn loaded(&self) -> bool;
}

pub mod mapper;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Map;
use tracing::{debug, info, warn};

use crate::ports::{Entity, EntityKind, GraphStore, Ontology, RecordStore};
use mapper::{legacy_node_id, node_id_for, node_props};

/// Result of mirroring one entity into the graph. Edge failures are
/// collected, never thrown; `skipped` means the graph was unavailable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncOutcome {
    pub skipped: bool,
    pub node_id: Option<String>,
    pub edges_created: usize,
    pub edge_errors: Vec<String>,
    pub validation_errors: Vec<String>,
    pub error: Option<String>,
}

impl SyncOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeDeletionOutcome {
    pub skipped: bool,
    pub attempted: Vec<String>,
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IncrementalReport {
    pub skipped: bool,
    pub total_synced: usize,
    pub synced_by_kind: HashMap<String, usize>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FullSyncReport {
    pub skipped: bool,
    pub nodes_checked: usize,
    pub deleted_node_ids: Vec<String>,
    pub errors: Vec<String>,
}

/// Keeps the graph mirror convergent with the record store.
///
/// Upserts are idempotent; per-edge failures are isolated; every operation
/// degrades to a skipped outcome when the graph is unavailable instead of
/// erroring.
pub struct GraphReconciler {
    graph: Arc<dyn GraphStore>,
    ontology: Option<Arc<dyn Ontology>>,
    strict: bool,
}

impl GraphReconciler {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            ontology: None,
            strict: false,
        }
    }

    /// Attach the optional ontology collaborator. In strict mode a
    /// validation violation blocks the sync; lenient mode logs and proceeds.
    #[must_use]
    pub fn with_ontology(mut self, ontology: Arc<dyn Ontology>, strict: bool) -> Self {
        self.ontology = Some(ontology);
        self.strict = strict;
        self
    }

    /// Mirror one entity: validate, upsert the node, then create one typed
    /// edge per related record.
    pub async fn sync_entity(&self, entity: &Entity) -> SyncOutcome {
        if !self.graph.connected() {
            debug!("Graph unavailable, skipping sync for {} {}", entity.kind, entity.id);
            return SyncOutcome::skipped();
        }

        let mut outcome = SyncOutcome::default();

        if let Some(ontology) = self.ontology.as_deref().filter(|o| o.loaded()) {
            if !ontology.has_entity_type(&entity.kind) {
                let msg = format!("Unknown entity type in ontology: {}", entity.kind);
                if self.strict {
                    outcome.validation_errors.push(msg);
                    return outcome;
                }
                warn!("{} (lenient mode, syncing anyway)", msg);
            }
        }

        let Some(node_id) = node_id_for(entity) else {
            outcome.error = Some(format!(
                "Cannot derive node id for {} without id or name",
                entity.kind
            ));
            return outcome;
        };

        let props = node_props(entity, self.ontology.as_deref());
        let label = entity.kind.graph_label();
        match self.graph.create_node(&label, props).await {
            Ok(id) => {
                debug!("Synced {} {} as node {}", entity.kind, entity.id, id);
                outcome.node_id = Some(id);
            }
            Err(e) => {
                warn!("Node upsert failed for {} {}: {}", entity.kind, entity.id, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }

        for (relation, target_id, target_kind) in entity.related_ids() {
            if let Some(ontology) = self.ontology.as_deref().filter(|o| o.loaded()) {
                if !ontology.has_relation_type(relation) {
                    outcome
                        .edge_errors
                        .push(format!("Unknown relation type: {}", relation));
                    continue;
                }
                if !ontology.is_valid_relation(&entity.kind, relation, &target_kind) {
                    outcome.edge_errors.push(format!(
                        "Relation {} not allowed from {} to {}",
                        relation, entity.kind, target_kind
                    ));
                    continue;
                }
            }
            // One failing relationship must not abort the rest.
            match self
                .graph
                .create_relationship(&node_id, &target_id, relation, Map::new())
                .await
            {
                Ok(_) => outcome.edges_created += 1,
                Err(e) => {
                    debug!(
                        "Edge {} {} -> {} failed: {}",
                        relation, node_id, target_id, e
                    );
                    outcome.edge_errors.push(format!(
                        "{} -> {} ({}): {}",
                        node_id, target_id, relation, e
                    ));
                }
            }
        }

        outcome
    }

    /// Remove an entity's node by canonical id and by the legacy slug alias
    /// historical records may still carry.
    pub async fn on_entity_deleted(
        &self,
        kind: &EntityKind,
        id: &str,
        name: Option<&str>,
    ) -> NodeDeletionOutcome {
        if !self.graph.connected() {
            return NodeDeletionOutcome {
                skipped: true,
                ..Default::default()
            };
        }

        let mut outcome = NodeDeletionOutcome::default();
        let mut targets = vec![id.to_string()];
        if let Some(legacy) = name.and_then(|n| legacy_node_id(kind, n)) {
            if legacy != id {
                targets.push(legacy);
            }
        }

        for target in targets {
            outcome.attempted.push(target.clone());
            match self.graph.delete_node(&target).await {
                Ok(true) => {
                    debug!("Deleted graph node {}", target);
                    outcome.deleted += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Graph node deletion failed for {}: {}", target, e),
            }
        }
        outcome
    }

    /// Drop graph relationships whose endpoints are gone. Returns the
    /// removed count, or 0 when the graph is unavailable.
    pub async fn cleanup_orphaned_relationships(
        &self,
    ) -> Result<usize, crate::ports::GraphStoreError> {
        if !self.graph.connected() {
            return Ok(0);
        }
        self.graph.cleanup_orphaned_relationships().await
    }

    /// Upsert every record collection, container kinds first so reference
    /// edges resolve. Per-kind and per-entity failures are non-fatal.
    pub async fn incremental_sync(&self, records: &dyn RecordStore) -> IncrementalReport {
        if !self.graph.connected() {
            return IncrementalReport {
                skipped: true,
                ..Default::default()
            };
        }

        let mut report = IncrementalReport::default();
        for kind in EntityKind::sweep_order() {
            let entities = match records.list(&kind).await {
                Ok(entities) => entities,
                Err(e) => {
                    report.errors.push(format!("list {}: {}", kind, e));
                    continue;
                }
            };
            let mut synced = 0usize;
            for entity in &entities {
                let outcome = self.sync_entity(entity).await;
                if let Some(e) = outcome.error {
                    report.errors.push(format!("{} {}: {}", kind, entity.id, e));
                } else if !outcome.skipped {
                    synced += 1;
                    for e in outcome.edge_errors {
                        report.errors.push(format!("{} {}: {}", kind, entity.id, e));
                    }
                }
            }
            if synced > 0 {
                report.synced_by_kind.insert(kind.to_string(), synced);
                report.total_synced += synced;
            }
        }
        info!(
            "Incremental sync finished: {} entities, {} errors",
            report.total_synced,
            report.errors.len()
        );
        report
    }

    /// Diff each kind's graph nodes against the record store and delete the
    /// ones no longer present upstream. Heals one-directional drift only;
    /// missing nodes are left for the next incremental sweep.
    pub async fn full_sync(&self, records: &dyn RecordStore) -> FullSyncReport {
        if !self.graph.connected() {
            return FullSyncReport {
                skipped: true,
                ..Default::default()
            };
        }

        let mut report = FullSyncReport::default();
        for kind in EntityKind::sweep_order() {
            let local = match records.list(&kind).await {
                Ok(local) => local,
                Err(e) => {
                    report.errors.push(format!("list {}: {}", kind, e));
                    continue;
                }
            };
            let nodes = match self
                .graph
                .find_nodes(&kind.graph_label(), Map::new(), None)
                .await
            {
                Ok(nodes) => nodes,
                Err(e) => {
                    report.errors.push(format!("find {}: {}", kind, e));
                    continue;
                }
            };

            for node in nodes {
                report.nodes_checked += 1;
                if matches_local(&node, &kind, &local) {
                    continue;
                }
                match self.graph.delete_node(&node.id).await {
                    Ok(true) => {
                        info!("Full sync removed drifted node {} ({})", node.id, kind);
                        report.deleted_node_ids.push(node.id);
                    }
                    Ok(false) => {}
                    Err(e) => report.errors.push(format!("delete {}: {}", node.id, e)),
                }
            }
        }
        report
    }
}

/// A graph node matches local state by id or by secondary key
/// (name, or email for contacts).
fn matches_local(
    node: &crate::ports::GraphNode,
    kind: &EntityKind,
    local: &[Entity],
) -> bool {
    local.iter().any(|e| {
        if e.id == node.id {
            return true;
        }
        if let (Some(local_name), Some(node_name)) = (e.name(), node.name()) {
            if local_name == node_name {
                return true;
            }
            if Some(node.id.as_str()) == legacy_node_id(kind, local_name).as_deref() {
                return true;
            }
        }
        matches!(
            (e.email(), node.email()),
            (Some(a), Some(b)) if a == b
        )
    })
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Map;
use tracing::{info, warn};

use crate::ports::{Entity, EntityKind, GraphNode, GraphStore, RecordStore};
use crate::sync::mapper::legacy_node_id;

/// Container labels whose nodes legitimately sit with zero edges while
/// their members are still being filed.
const ORPHAN_ALLOWED_LABELS: [&str; 3] = ["project", "team", "sprint"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyStatus {
    Healthy,
    Warning,
    Unhealthy,
    Error,
    Skipped,
}

/// One record that exists on one side only.
#[derive(Debug, Clone, Serialize)]
pub struct DriftItem {
    pub kind: String,
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub status: ConsistencyStatus,
    pub checked_at: DateTime<Utc>,
    pub records_checked: usize,
    pub nodes_checked: usize,
    /// Local records with no graph counterpart; healed by the next
    /// incremental sweep, so a warning rather than a failure.
    pub missing_in_graph: Vec<DriftItem>,
    /// Graph nodes whose record is gone. Real drift.
    pub extra_in_graph: Vec<DriftItem>,
    /// Zero-degree nodes outside the container allow-list.
    pub orphaned_nodes: Vec<DriftItem>,
    pub dangling_edges: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuickCheck {
    pub connected: bool,
    pub node_count: usize,
    pub edge_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FixReport {
    pub orphans_removed: usize,
    pub errors: Vec<String>,
}

/// Read-mostly drift detector over the record store and the graph mirror.
///
/// Detection and repair are split on purpose: [`ConsistencyAuditor::run_check`]
/// never mutates, and [`ConsistencyAuditor::auto_fix`] removes only
/// orphaned nodes. Extra nodes are left to [`crate::sync::GraphReconciler::full_sync`]
/// and missing ones to the incremental sweep.
pub struct ConsistencyAuditor {
    graph: Arc<dyn GraphStore>,
    records: Arc<dyn RecordStore>,
}

impl ConsistencyAuditor {
    pub fn new(graph: Arc<dyn GraphStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { graph, records }
    }

    /// Full cross-store audit. Zero mutation.
    pub async fn run_check(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport {
            status: ConsistencyStatus::Healthy,
            checked_at: Utc::now(),
            records_checked: 0,
            nodes_checked: 0,
            missing_in_graph: Vec::new(),
            extra_in_graph: Vec::new(),
            orphaned_nodes: Vec::new(),
            dangling_edges: 0,
            errors: Vec::new(),
        };

        if !self.graph.connected() {
            info!("Graph unavailable, consistency check skipped");
            report.status = ConsistencyStatus::Skipped;
            return report;
        }

        for kind in EntityKind::sweep_order() {
            let local = match self.records.list(&kind).await {
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

            report.records_checked += local.len();
            report.nodes_checked += nodes.len();

            for entity in &local {
                if !nodes.iter().any(|n| node_matches_entity(n, &kind, entity)) {
                    report.missing_in_graph.push(DriftItem {
                        kind: kind.to_string(),
                        id: entity.id.clone(),
                        name: entity.name().map(str::to_string),
                    });
                }
            }
            for node in &nodes {
                if !local.iter().any(|e| node_matches_entity(node, &kind, e)) {
                    report.extra_in_graph.push(DriftItem {
                        kind: kind.to_string(),
                        id: node.id.clone(),
                        name: node.name().map(str::to_string),
                    });
                }
            }

            if ORPHAN_ALLOWED_LABELS.contains(&kind.graph_label().as_str()) {
                continue;
            }
            for node in &nodes {
                match self.graph.node_degree(&node.id).await {
                    Ok(0) => report.orphaned_nodes.push(DriftItem {
                        kind: kind.to_string(),
                        id: node.id.clone(),
                        name: node.name().map(str::to_string),
                    }),
                    Ok(_) => {}
                    Err(e) => report.errors.push(format!("degree {}: {}", node.id, e)),
                }
            }
        }

        match self.graph.list_relationships().await {
            Ok(edges) => {
                report.dangling_edges = edges.iter().filter(|e| e.is_dangling()).count();
            }
            Err(e) => report.errors.push(format!("relationships: {}", e)),
        }

        report.status = grade(&report);
        info!(
            "Consistency check: {:?} ({} missing, {} extra, {} orphaned, {} dangling)",
            report.status,
            report.missing_in_graph.len(),
            report.extra_in_graph.len(),
            report.orphaned_nodes.len(),
            report.dangling_edges
        );
        report
    }

    /// Remove the orphaned nodes a check found. Everything else stays for
    /// the sync paths to heal.
    pub async fn auto_fix(&self, report: &ConsistencyReport) -> FixReport {
        let mut fix = FixReport::default();
        if !self.graph.connected() {
            return fix;
        }
        for orphan in &report.orphaned_nodes {
            match self.graph.delete_node(&orphan.id).await {
                Ok(true) => fix.orphans_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Orphan removal failed for {}: {}", orphan.id, e);
                    fix.errors.push(format!("{}: {}", orphan.id, e));
                }
            }
        }
        if fix.orphans_removed > 0 {
            info!("Auto-fix removed {} orphaned nodes", fix.orphans_removed);
        }
        fix
    }

    /// Cheap liveness probe for health endpoints; one stats call.
    pub async fn quick_check(&self) -> QuickCheck {
        if !self.graph.connected() {
            return QuickCheck::default();
        }
        match self.graph.stats().await {
            Ok(stats) => QuickCheck {
                connected: true,
                node_count: stats.node_count,
                edge_count: stats.edge_count,
            },
            Err(_) => QuickCheck::default(),
        }
    }
}

/// Same secondary-key matching the full sync uses: id, name, legacy slug,
/// or email.
fn node_matches_entity(node: &GraphNode, kind: &EntityKind, entity: &Entity) -> bool {
    if entity.id == node.id {
        return true;
    }
    if let Some(local_name) = entity.name() {
        if node.name() == Some(local_name) {
            return true;
        }
        if Some(node.id.as_str()) == legacy_node_id(kind, local_name).as_deref() {
            return true;
        }
    }
    matches!((entity.email(), node.email()), (Some(a), Some(b)) if a == b)
}

fn grade(report: &ConsistencyReport) -> ConsistencyStatus {
    if !report.errors.is_empty() {
        return ConsistencyStatus::Error;
    }
    if !report.extra_in_graph.is_empty() || report.dangling_edges > 0 {
        return ConsistencyStatus::Unhealthy;
    }
    if !report.missing_in_graph.is_empty() || !report.orphaned_nodes.is_empty() {
        return ConsistencyStatus::Warning;
    }
    ConsistencyStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MemoryGraph, MemoryRecords};
    use crate::sync::GraphReconciler;
    use serde_json::json;

    struct Fixture {
        graph: Arc<MemoryGraph>,
        records: Arc<MemoryRecords>,
        reconciler: GraphReconciler,
        auditor: ConsistencyAuditor,
    }

    fn fixture() -> Fixture {
        let graph = Arc::new(MemoryGraph::new());
        let records = Arc::new(MemoryRecords::new());
        Fixture {
            reconciler: GraphReconciler::new(graph.clone()),
            auditor: ConsistencyAuditor::new(graph.clone(), records.clone()),
            graph,
            records,
        }
    }

    fn contact(id: &str, name: &str) -> Entity {
        Entity::new(id, EntityKind::Contact).with_property("name", json!(name))
    }

    async fn seed_linked_pair(f: &Fixture) {
        let jane = contact("c1", "Jane Doe");
        let action = Entity::new("a1", EntityKind::Action)
            .with_property("title", json!("Follow up"))
            .with_property("assignee_id", json!("c1"));
        f.records.insert(jane.clone());
        f.records.insert(action.clone());
        f.reconciler.sync_entity(&jane).await;
        f.reconciler.sync_entity(&action).await;
    }

    #[tokio::test]
    async fn test_converged_stores_are_healthy() {
        let f = fixture();
        seed_linked_pair(&f).await;

        let report = f.auditor.run_check().await;
        assert_eq!(report.status, ConsistencyStatus::Healthy);
        assert!(report.missing_in_graph.is_empty());
        assert!(report.extra_in_graph.is_empty());
        assert!(report.orphaned_nodes.is_empty());
        assert_eq!(report.dangling_edges, 0);
    }

    #[tokio::test]
    async fn test_missing_node_is_warning() {
        let f = fixture();
        seed_linked_pair(&f).await;
        f.records.insert(contact("c2", "Never Synced"));

        let report = f.auditor.run_check().await;
        assert_eq!(report.status, ConsistencyStatus::Warning);
        assert_eq!(report.missing_in_graph.len(), 1);
        assert_eq!(report.missing_in_graph[0].id, "c2");
    }

    #[tokio::test]
    async fn test_extra_node_is_unhealthy() {
        let f = fixture();
        seed_linked_pair(&f).await;
        // Node whose record was deleted out-of-band.
        f.reconciler.sync_entity(&contact("c9", "Ghost")).await;

        let report = f.auditor.run_check().await;
        assert_eq!(report.status, ConsistencyStatus::Unhealthy);
        assert!(report.extra_in_graph.iter().any(|d| d.id == "c9"));
    }

    #[tokio::test]
    async fn test_legacy_slug_node_is_not_drift() {
        let f = fixture();
        f.records.insert(contact("c1", "Jane Doe"));
        // Pre-stable-id deployment wrote the node under the name slug.
        f.reconciler
            .sync_entity(&Entity::new("", EntityKind::Contact).with_property("name", json!("Jane Doe")))
            .await;

        let report = f.auditor.run_check().await;
        assert!(report.extra_in_graph.is_empty());
    }

    #[tokio::test]
    async fn test_orphans_respect_container_allow_list() {
        let f = fixture();
        let fact = Entity::new("f1", EntityKind::Fact).with_property("title", json!("Loose"));
        let project = Entity::new("p1", EntityKind::Project).with_property("name", json!("Apollo"));
        f.records.insert(fact.clone());
        f.records.insert(project.clone());
        f.reconciler.sync_entity(&fact).await;
        f.reconciler.sync_entity(&project).await;

        let report = f.auditor.run_check().await;
        // Both nodes have zero degree, but only the fact counts.
        assert_eq!(report.orphaned_nodes.len(), 1);
        assert_eq!(report.orphaned_nodes[0].id, "f1");
        assert_eq!(report.status, ConsistencyStatus::Warning);
    }

    #[tokio::test]
    async fn test_dangling_edges_detected() {
        let f = fixture();
        seed_linked_pair(&f).await;
        f.graph.inject_dangling_edge(Some("c1"), None, "OWNED_BY");

        let report = f.auditor.run_check().await;
        assert_eq!(report.dangling_edges, 1);
        assert_eq!(report.status, ConsistencyStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_auto_fix_removes_orphans_only() {
        let f = fixture();
        seed_linked_pair(&f).await;
        let loose = Entity::new("f1", EntityKind::Fact).with_property("title", json!("Loose"));
        f.records.insert(loose.clone());
        f.reconciler.sync_entity(&loose).await;
        f.reconciler.sync_entity(&contact("c9", "Ghost")).await;

        let report = f.auditor.run_check().await;
        let fix = f.auditor.auto_fix(&report).await;

        assert_eq!(fix.orphans_removed, 2);
        assert!(f.graph.node("f1").is_none());
        assert!(f.graph.node("c9").is_none());
        // The linked pair survived.
        assert!(f.graph.node("c1").is_some());
        assert!(f.graph.node("a1").is_some());
    }

    #[tokio::test]
    async fn test_disconnected_graph_skips() {
        let f = fixture();
        f.graph.set_connected(false);

        let report = f.auditor.run_check().await;
        assert_eq!(report.status, ConsistencyStatus::Skipped);
        assert_eq!(f.auditor.auto_fix(&report).await.orphans_removed, 0);
        assert!(!f.auditor.quick_check().await.connected);
    }

    #[tokio::test]
    async fn test_quick_check_reports_counts() {
        let f = fixture();
        seed_linked_pair(&f).await;

        let quick = f.auditor.quick_check().await;
        assert!(quick.connected);
        assert_eq!(quick.node_count, 2);
        assert_eq!(quick.edge_count, 1);
    }
}

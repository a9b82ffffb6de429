use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cascade::CascadeRuleSet;
use super::models::{BatchOutcome, DeleteOptions, FilterOutcome};
use crate::audit::{AuditEntryDraft, AuditTrail};
use crate::metrics::DeleteMetrics;
use crate::ports::{Entity, EntityKind, GraphStore, RecordStore};
use crate::sync::GraphReconciler;
use crate::sync::mapper::legacy_node_id;
use crate::trash::TrashLedger;

/// Multi-item deletion with per-item isolation.
///
/// Each item gets its own trash + local cascade + audit pass; one bad item
/// never stops the rest. Graph cleanup is deferred into a single batched
/// node deletion by id list plus one by legacy slug list, instead of one
/// graph round trip per item.
pub struct BatchCoordinator {
    trash: Arc<TrashLedger>,
    audit: Arc<AuditTrail>,
    rules: Arc<CascadeRuleSet>,
    reconciler: Arc<GraphReconciler>,
    records: Arc<dyn RecordStore>,
    graph: Arc<dyn GraphStore>,
    metrics: Arc<DeleteMetrics>,
    confirm_threshold: usize,
}

impl BatchCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trash: Arc<TrashLedger>,
        audit: Arc<AuditTrail>,
        rules: Arc<CascadeRuleSet>,
        reconciler: Arc<GraphReconciler>,
        records: Arc<dyn RecordStore>,
        graph: Arc<dyn GraphStore>,
        metrics: Arc<DeleteMetrics>,
        confirm_threshold: usize,
    ) -> Self {
        Self {
            trash,
            audit,
            rules,
            reconciler,
            records,
            graph,
            metrics,
            confirm_threshold,
        }
    }

    pub async fn batch_delete(
        &self,
        kind: &EntityKind,
        items: Vec<Entity>,
        opts: &DeleteOptions,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            total: items.len(),
            ..Default::default()
        };
        let mut node_ids: Vec<String> = Vec::new();
        let mut legacy_ids: Vec<String> = Vec::new();

        for item in items {
            match self.delete_one(kind, &item, opts).await {
                Ok(()) => {
                    outcome.deleted += 1;
                    self.metrics.record_delete(kind);
                    node_ids.push(item.id.clone());
                    if let Some(legacy) = item.name().and_then(|n| legacy_node_id(kind, n)) {
                        legacy_ids.push(legacy);
                    }
                }
                Err(e) => {
                    outcome.failed += 1;
                    self.metrics.record_failed_delete();
                    warn!("Batch item {} {} failed: {}", kind, item.id, e);
                    outcome.errors.push(format!("{}: {}", item.id, e));
                }
            }
        }

        // One batched graph deletion covering canonical ids and legacy
        // aliases of everything that made it through.
        if self.graph.connected() && !node_ids.is_empty() {
            node_ids.extend(legacy_ids);
            match self.graph.delete_nodes(&node_ids).await {
                Ok(deleted) => outcome.graph_deleted = Some(deleted),
                Err(e) => {
                    warn!("Batched graph deletion failed: {}", e);
                    outcome.errors.push(format!("graph batch: {}", e));
                }
            }
        }

        info!(
            "Batch delete of {} finished: {} deleted, {} failed",
            kind, outcome.deleted, outcome.failed
        );
        outcome
    }

    async fn delete_one(
        &self,
        kind: &EntityKind,
        item: &Entity,
        opts: &DeleteOptions,
    ) -> Result<(), String> {
        if item.id.is_empty() {
            return Err("missing id".to_string());
        }

        if opts.soft_delete {
            self.trash
                .mark_deleted(item.clone(), &opts.deleted_by, opts.retention_days)
                .await;
        }

        if opts.cascade {
            let cascade = self
                .rules
                .cascade_local_only(item, &self.reconciler, self.records.as_ref())
                .await;
            self.metrics.record_cascade_failures(cascade.errors.len() as u64);
        }

        if let Err(e) = self.records.remove(kind, &item.id).await {
            return Err(format!("record removal: {}", e));
        }

        let draft = AuditEntryDraft::new(kind.clone(), &item.id, &opts.deleted_by)
            .name(item.name().unwrap_or_default())
            .reason(&opts.reason)
            .flags(opts.cascade, false, opts.soft_delete);
        self.audit.log_delete(draft).await;
        debug!("Batch item {} {} processed", kind, item.id);
        Ok(())
    }

    /// Delete every record of `kind` matching `predicate`. Above the
    /// confirmation threshold this returns a preview instead of executing,
    /// unless the options are pre-confirmed.
    pub async fn delete_by_filter(
        &self,
        kind: &EntityKind,
        predicate: impl Fn(&Entity) -> bool,
        opts: &DeleteOptions,
    ) -> FilterOutcome {
        let matched: Vec<Entity> = match self.records.list(kind).await {
            Ok(items) => items.into_iter().filter(|e| predicate(e)).collect(),
            Err(e) => {
                warn!("Filter delete could not list {}: {}", kind, e);
                return FilterOutcome::Executed(BatchOutcome {
                    errors: vec![format!("list {}: {}", kind, e)],
                    ..Default::default()
                });
            }
        };

        if matched.len() > self.confirm_threshold && !opts.confirmed {
            info!(
                "Filter delete of {} {} items needs confirmation (threshold {})",
                matched.len(),
                kind,
                self.confirm_threshold
            );
            return FilterOutcome::Preview {
                matched: matched.len(),
                threshold: self.confirm_threshold,
            };
        }

        FilterOutcome::Executed(self.batch_delete(kind, matched, opts).await)
    }

    /// Remove every record of a kind. Auto-confirmed by definition.
    pub async fn delete_all(&self, kind: &EntityKind, opts: &DeleteOptions) -> FilterOutcome {
        let opts = DeleteOptions {
            confirmed: true,
            ..opts.clone()
        };
        self.delete_by_filter(kind, |_| true, &opts).await
    }
}

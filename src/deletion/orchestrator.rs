use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};

use super::cascade::CascadeRuleSet;
use super::models::{DeleteOptions, DeleteOutcome, DeletionError};
use crate::audit::{AuditEntryDraft, AuditTrail};
use crate::backup::BackupVault;
use crate::core::events::{DeleteEvent, DeleteEventBus, EventFlags, EventKind};
use crate::metrics::DeleteMetrics;
use crate::ports::{Entity, RecordStore};
use crate::sync::GraphReconciler;
use crate::trash::TrashLedger;

/// Single entry point for deleting one entity.
///
/// Stages run in fixed order: backup, trash, cascade, audit, events,
/// metrics. Stages are NOT isolated from each other: an error in one aborts
/// the rest and the outcome reports `success: false`. Cascade sub-ops, in
/// contrast, fail open: an op failure lands in `cascade.errors` while the
/// pipeline keeps going. Keep the two failure modes distinct.
///
/// There is no per-id locking: two concurrent calls for the same entity race
/// with last-writer-wins on trash, backup and audit.
pub struct DeletionOrchestrator {
    trash: Arc<TrashLedger>,
    vault: Arc<BackupVault>,
    audit: Arc<AuditTrail>,
    rules: Arc<CascadeRuleSet>,
    reconciler: Arc<GraphReconciler>,
    records: Arc<dyn RecordStore>,
    bus: Arc<DeleteEventBus>,
    metrics: Arc<DeleteMetrics>,
}

impl DeletionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trash: Arc<TrashLedger>,
        vault: Arc<BackupVault>,
        audit: Arc<AuditTrail>,
        rules: Arc<CascadeRuleSet>,
        reconciler: Arc<GraphReconciler>,
        records: Arc<dyn RecordStore>,
        bus: Arc<DeleteEventBus>,
        metrics: Arc<DeleteMetrics>,
    ) -> Self {
        Self {
            trash,
            vault,
            audit,
            rules,
            reconciler,
            records,
            bus,
            metrics,
        }
    }

    pub async fn delete_entity(&self, entity: Entity, opts: &DeleteOptions) -> DeleteOutcome {
        let started = Instant::now();
        let mut outcome = DeleteOutcome::default();

        match self.run_pipeline(&entity, opts, &mut outcome).await {
            Ok(()) => {
                outcome.success = true;
                self.metrics.record_delete(&entity.kind);
                info!(
                    "Deleted {} {} (soft={}, cascade_errors={})",
                    entity.kind,
                    entity.id,
                    outcome.soft_deleted,
                    outcome.cascade.as_ref().map_or(0, |c| c.errors.len()),
                );
            }
            Err(e) => {
                outcome.success = false;
                outcome.error = Some(e.to_string());
                self.metrics.record_failed_delete();
                warn!("Delete pipeline aborted for {} {}: {}", entity.kind, entity.id, e);
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    async fn run_pipeline(
        &self,
        entity: &Entity,
        opts: &DeleteOptions,
        outcome: &mut DeleteOutcome,
    ) -> Result<(), DeletionError> {
        if entity.id.is_empty() {
            return Err(DeletionError::MissingId);
        }

        // Stage 1: backup.
        if opts.backup {
            let record = self
                .vault
                .create_backup(entity, &opts.deleted_by, &opts.reason, json!(null))
                .await;
            self.metrics.record_backup();
            outcome.backup_id = Some(record.id);
        }

        // Stage 2: trash.
        if opts.soft_delete {
            self.trash
                .mark_deleted(entity.clone(), &opts.deleted_by, opts.retention_days)
                .await;
            outcome.soft_deleted = true;
        }

        // Stage 3: cascade (fail-open internally).
        if opts.cascade {
            let cascade = self
                .rules
                .cascade_delete(entity, &self.reconciler, self.records.as_ref())
                .await;
            self.metrics.record_cascade_failures(cascade.errors.len() as u64);
            outcome.graph_synced = cascade.graph_ops_run > 0;
            outcome.cascade = Some(cascade);
        } else {
            let node_result = self
                .reconciler
                .on_entity_deleted(&entity.kind, &entity.id, entity.name())
                .await;
            outcome.graph_synced = !node_result.skipped && node_result.deleted > 0;
        }

        // Stage 4: audit.
        let cascade_attempted = opts.cascade;
        let draft = AuditEntryDraft::new(entity.kind.clone(), &entity.id, &opts.deleted_by)
            .name(entity.name().unwrap_or_default())
            .reason(&opts.reason)
            .flags(cascade_attempted, outcome.graph_synced, outcome.soft_deleted)
            .snapshot(entity.clone());
        let entry = self.audit.log_delete(draft).await;
        outcome.audit_id = Some(entry.id);

        // Stage 5: events.
        let event = DeleteEvent::new(
            EventKind::Delete,
            entity.kind.clone(),
            &entity.id,
            &opts.deleted_by,
        )
        .with_flags(EventFlags {
            soft_delete: outcome.soft_deleted,
            cascade: cascade_attempted,
            graph_synced: outcome.graph_synced,
        });
        self.bus.emit(event).await;

        // Stage 6: metrics are finalized by the caller on success.
        Ok(())
    }

    /// Restore a trashed entity: take it out of the ledger, re-mirror it
    /// into the graph, audit and announce. The cleaned entity is returned
    /// for the caller to reinsert into the record store.
    pub async fn restore_entity(
        &self,
        kind: &crate::ports::EntityKind,
        id: &str,
        restored_by: &str,
    ) -> Result<Entity, DeletionError> {
        let entity = self.trash.restore(kind, id).await?;

        let sync = self.reconciler.sync_entity(&entity).await;
        let draft = AuditEntryDraft::new(kind.clone(), id, restored_by)
            .name(entity.name().unwrap_or_default())
            .flags(false, sync.node_id.is_some(), true);
        self.audit.log_restore(draft).await;

        self.bus
            .emit(
                DeleteEvent::new(EventKind::Restore, kind.clone(), id, restored_by).with_flags(
                    EventFlags {
                        soft_delete: true,
                        cascade: false,
                        graph_synced: sync.node_id.is_some(),
                    },
                ),
            )
            .await;
        self.metrics.record_restore();
        Ok(entity)
    }
}

//! Wiring for the whole deletion subsystem: one [`Workgraph`] owns every
//! component, opened from a [`WorkgraphConfig`] against caller-supplied
//! graph and record stores.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::audit::AuditTrail;
use crate::backup::{BackupRecord, BackupVault};
use crate::consistency::{ConsistencyAuditor, ConsistencyReport, FixReport, QuickCheck};
use crate::core::config::WorkgraphConfig;
use crate::core::error::Result;
use crate::core::events::{DeleteEventBus, SseStream};
use crate::deletion::{
    BatchCoordinator, CascadeRuleSet, DeleteOptions, DeleteOutcome, DeletionOrchestrator,
};
use crate::metrics::DeleteMetrics;
use crate::ports::{Entity, EntityKind, GraphStore, Ontology, RecordStore};
use crate::retention::{RetentionDeps, RetentionReport, RetentionScheduler};
use crate::sync::GraphReconciler;
use crate::trash::TrashLedger;

/// The assembled deletion subsystem.
///
/// [`Workgraph::open`] builds every component at the config's paths and
/// threads the config knobs through; after that the facade mostly forwards.
/// Components stay individually reachable for callers that only need one.
pub struct Workgraph {
    config: WorkgraphConfig,
    trash: Arc<TrashLedger>,
    vault: Arc<BackupVault>,
    audit: Arc<AuditTrail>,
    bus: Arc<DeleteEventBus>,
    metrics: Arc<DeleteMetrics>,
    reconciler: Arc<GraphReconciler>,
    auditor: Arc<ConsistencyAuditor>,
    orchestrator: DeletionOrchestrator,
    batch: BatchCoordinator,
    scheduler: RetentionScheduler,
}

impl std::fmt::Debug for Workgraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workgraph")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Workgraph {
    pub async fn open(
        config: WorkgraphConfig,
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        Self::build(config, graph, records, None).await
    }

    pub async fn open_with_ontology(
        config: WorkgraphConfig,
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
        ontology: Arc<dyn Ontology>,
    ) -> Result<Self> {
        Self::build(config, graph, records, Some(ontology)).await
    }

    async fn build(
        config: WorkgraphConfig,
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
        ontology: Option<Arc<dyn Ontology>>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let trash =
            Arc::new(TrashLedger::open(config.trash_path(), config.retention_days).await?);
        let vault = Arc::new(BackupVault::open(config.backups_dir(), config.max_backups).await);
        let audit =
            Arc::new(AuditTrail::open(config.audit_path(), config.max_audit_entries).await);
        let bus = Arc::new(DeleteEventBus::new(config.event_buffer));
        let metrics = Arc::new(DeleteMetrics::new());

        let mut reconciler = GraphReconciler::new(graph.clone());
        if let Some(ontology) = ontology {
            reconciler = reconciler.with_ontology(ontology, config.strict_ontology);
        }
        let reconciler = Arc::new(reconciler);
        let auditor = Arc::new(ConsistencyAuditor::new(graph.clone(), records.clone()));
        let rules = Arc::new(CascadeRuleSet::default());

        let orchestrator = DeletionOrchestrator::new(
            trash.clone(),
            vault.clone(),
            audit.clone(),
            rules.clone(),
            reconciler.clone(),
            records.clone(),
            bus.clone(),
            metrics.clone(),
        );
        let batch = BatchCoordinator::new(
            trash.clone(),
            audit.clone(),
            rules,
            reconciler.clone(),
            records,
            graph,
            metrics.clone(),
            config.confirm_threshold,
        );
        let scheduler = RetentionScheduler::open(config.retention_policy_path()).await;

        info!("Workgraph opened at {}", config.data_dir.display());
        Ok(Self {
            config,
            trash,
            vault,
            audit,
            bus,
            metrics,
            reconciler,
            auditor,
            orchestrator,
            batch,
            scheduler,
        })
    }

    pub fn config(&self) -> &WorkgraphConfig {
        &self.config
    }

    pub fn trash(&self) -> &TrashLedger {
        &self.trash
    }

    pub fn vault(&self) -> &BackupVault {
        &self.vault
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn bus(&self) -> &DeleteEventBus {
        &self.bus
    }

    pub fn metrics(&self) -> &DeleteMetrics {
        &self.metrics
    }

    pub fn reconciler(&self) -> &GraphReconciler {
        &self.reconciler
    }

    pub fn batch(&self) -> &BatchCoordinator {
        &self.batch
    }

    pub fn scheduler(&self) -> &RetentionScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut RetentionScheduler {
        &mut self.scheduler
    }

    pub async fn delete_entity(&self, entity: Entity, opts: &DeleteOptions) -> DeleteOutcome {
        self.orchestrator.delete_entity(entity, opts).await
    }

    pub async fn restore_entity(
        &self,
        kind: &EntityKind,
        id: &str,
        restored_by: &str,
    ) -> Result<Entity> {
        Ok(self.orchestrator.restore_entity(kind, id, restored_by).await?)
    }

    pub async fn get_backup(&self, id: &str) -> Result<BackupRecord> {
        Ok(self.vault.get_backup(id).await?)
    }

    /// New SSE stream over the event bus, heartbeating at the configured
    /// interval.
    pub fn sse_stream(&self) -> SseStream {
        SseStream::attach(&self.bus, Duration::from_secs(self.config.sse_heartbeat_secs))
    }

    pub async fn check_consistency(&self) -> ConsistencyReport {
        self.auditor.run_check().await
    }

    pub async fn fix_consistency(&self, report: &ConsistencyReport) -> FixReport {
        self.auditor.auto_fix(report).await
    }

    pub async fn quick_check(&self) -> QuickCheck {
        self.auditor.quick_check().await
    }

    pub async fn execute_retention(&mut self) -> RetentionReport {
        let deps = self.retention_deps();
        self.scheduler.execute(&deps).await
    }

    pub async fn retention_dry_run(&self) -> RetentionReport {
        self.scheduler.dry_run(&self.retention_deps()).await
    }

    fn retention_deps(&self) -> RetentionDeps {
        RetentionDeps {
            trash: self.trash.clone(),
            vault: self.vault.clone(),
            reconciler: self.reconciler.clone(),
            audit: self.audit.clone(),
            auditor: self.auditor.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::WorkgraphError;
    use crate::deletion::FilterOutcome;
    use crate::ports::{MemoryGraph, MemoryRecords};
    use serde_json::json;

    struct Fixture {
        graph: Arc<MemoryGraph>,
        records: Arc<MemoryRecords>,
        wg: Workgraph,
        _dir: tempfile::TempDir,
    }

    async fn fixture_with(config: impl FnOnce(&mut WorkgraphConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(MemoryGraph::new());
        let records = Arc::new(MemoryRecords::new());
        let mut cfg = WorkgraphConfig::new(dir.path());
        config(&mut cfg);
        let wg = Workgraph::open(cfg, graph.clone(), records.clone()).await.unwrap();
        Fixture {
            graph,
            records,
            wg,
            _dir: dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(|_| {}).await
    }

    fn contact(id: &str) -> Entity {
        Entity::new(id, EntityKind::Contact).with_property("name", json!("Jane Doe"))
    }

    #[tokio::test]
    async fn test_open_wires_stores_at_config_paths() {
        let f = fixture().await;
        f.records.insert(contact("c1"));

        let outcome = f.wg.delete_entity(contact("c1"), &DeleteOptions::default()).await;
        assert!(outcome.success);

        let cfg = f.wg.config();
        assert!(cfg.trash_path().exists());
        assert!(cfg.audit_path().exists());
        assert!(cfg.backup_index_path().exists());
        assert_eq!(f.wg.trash().deleted(None).len(), 1);
        assert_eq!(f.wg.metrics().snapshot().total_deletes, 1);
    }

    #[tokio::test]
    async fn test_corrupted_trash_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WorkgraphConfig::new(dir.path());
        tokio::fs::write(cfg.trash_path(), b"not json").await.unwrap();

        let err = Workgraph::open(
            cfg,
            Arc::new(MemoryGraph::new()),
            Arc::new(MemoryRecords::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkgraphError::Trash(_)));
    }

    #[tokio::test]
    async fn test_restore_and_backup_errors_surface_as_crate_error() {
        let f = fixture().await;

        let err = f.wg.restore_entity(&EntityKind::Contact, "ghost", "tester").await.unwrap_err();
        assert!(matches!(err, WorkgraphError::Deletion(_)));

        let err = f.wg.get_backup("bak_missing").await.unwrap_err();
        assert!(matches!(err, WorkgraphError::Backup(_)));
    }

    #[tokio::test]
    async fn test_delete_then_restore_round_trip() {
        let f = fixture().await;
        f.records.insert(contact("c1"));
        f.wg.delete_entity(contact("c1"), &DeleteOptions::default()).await;

        let restored = f.wg.restore_entity(&EntityKind::Contact, "c1", "tester").await.unwrap();
        assert_eq!(restored.id, "c1");
        assert!(f.wg.trash().deleted(None).is_empty());
        assert!(f.graph.node("c1").is_some());
    }

    #[tokio::test]
    async fn test_confirm_threshold_flows_through() {
        let f = fixture_with(|cfg| cfg.confirm_threshold = 1).await;
        f.records.insert(contact("c1"));
        f.records.insert(contact("c2"));

        let outcome = f
            .wg
            .batch()
            .delete_by_filter(&EntityKind::Contact, |_| true, &DeleteOptions::default())
            .await;
        assert!(matches!(
            outcome,
            FilterOutcome::Preview { matched: 2, threshold: 1 }
        ));
    }

    #[tokio::test]
    async fn test_retention_respects_global_switch() {
        let mut f = fixture().await;
        f.wg.trash().mark_deleted(contact("c1"), "tester", Some(-1)).await;

        let report = f.wg.execute_retention().await;
        assert!(!report.executed);
        assert_eq!(f.wg.trash().deleted(None).len(), 1);

        f.wg.scheduler_mut().set_enabled(true).await;
        let report = f.wg.execute_retention().await;
        assert!(report.executed);
        assert!(f.wg.trash().deleted(None).is_empty());
    }
}

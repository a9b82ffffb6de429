use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{info, warn};

use crate::audit::{AuditEntryDraft, AuditTrail};
use crate::backup::BackupVault;
use crate::consistency::ConsistencyAuditor;
use crate::metrics::DeleteMetrics;
use crate::sync::GraphReconciler;
use crate::trash::{TrashLedger, write_json_atomic};

/// Actor recorded on audit entries written by scheduled GC.
const RETENTION_ACTOR: &str = "retention";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyType {
    SoftDelete,
    AuditLog,
    Backup,
    Orphan,
}

/// One garbage-collection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicyDef {
    pub id: String,
    pub name: String,
    pub policy_type: PolicyType,
    /// Data older than this is collected.
    pub retention_days: i64,
    /// How often the policy wants to run.
    pub interval_days: i64,
    pub enabled: bool,
}

/// Persisted scheduler state: the global switch, the policy table and the
/// last run timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchedulerState {
    enabled: bool,
    policies: Vec<RetentionPolicyDef>,
    last_execution: Option<DateTime<Utc>>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            // Destructive GC stays off until someone turns it on.
            enabled: false,
            policies: default_policies(),
            last_execution: None,
        }
    }
}

fn default_policies() -> Vec<RetentionPolicyDef> {
    vec![
        RetentionPolicyDef {
            id: "soft-delete-gc".to_string(),
            name: "Purge expired trash".to_string(),
            policy_type: PolicyType::SoftDelete,
            retention_days: 30,
            interval_days: 1,
            enabled: true,
        },
        RetentionPolicyDef {
            id: "backup-gc".to_string(),
            name: "Evict stale backups".to_string(),
            policy_type: PolicyType::Backup,
            retention_days: 90,
            interval_days: 7,
            enabled: true,
        },
        RetentionPolicyDef {
            id: "audit-log-gc".to_string(),
            name: "Audit log rotation".to_string(),
            policy_type: PolicyType::AuditLog,
            retention_days: 365,
            interval_days: 7,
            enabled: true,
        },
        RetentionPolicyDef {
            id: "orphan-gc".to_string(),
            name: "Drop orphaned graph nodes".to_string(),
            policy_type: PolicyType::Orphan,
            retention_days: 0,
            interval_days: 1,
            enabled: true,
        },
    ]
}

/// What one policy did (or would do, under dry run).
#[derive(Debug, Clone, Serialize)]
pub struct PolicyResult {
    pub policy_id: String,
    pub policy_type: PolicyType,
    pub items_affected: usize,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub executed: bool,
    pub dry_run: bool,
    pub results: Vec<PolicyResult>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Stores the policies act on. Plain references so callers can hand in
/// whatever subset they wired up.
pub struct RetentionDeps {
    pub trash: Arc<TrashLedger>,
    pub vault: Arc<BackupVault>,
    pub reconciler: Arc<GraphReconciler>,
    pub audit: Arc<AuditTrail>,
    pub auditor: Arc<ConsistencyAuditor>,
    pub metrics: Arc<DeleteMetrics>,
}

/// Policy-driven garbage collection over trash, backups and the graph.
///
/// The global switch defaults to off: a fresh install never destroys data
/// until retention is explicitly enabled. Each policy runs in its own error
/// scope, so one failing policy never blocks the others.
pub struct RetentionScheduler {
    path: PathBuf,
    state: SchedulerState,
}

impl RetentionScheduler {
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Retention policy file unreadable, using defaults: {}", e);
                SchedulerState::default()
            }),
            Err(_) => SchedulerState::default(),
        };
        info!(
            "RetentionScheduler opened at {} (enabled: {}, {} policies)",
            path.display(),
            state.enabled,
            state.policies.len()
        );
        Self { path, state }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    pub async fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
        info!("Retention globally {}", if enabled { "enabled" } else { "disabled" });
        self.persist().await;
    }

    pub fn policies(&self) -> &[RetentionPolicyDef] {
        &self.state.policies
    }

    /// Insert or replace the policy with the same id.
    pub async fn upsert_policy(&mut self, policy: RetentionPolicyDef) {
        match self.state.policies.iter_mut().find(|p| p.id == policy.id) {
            Some(existing) => *existing = policy,
            None => self.state.policies.push(policy),
        }
        self.persist().await;
    }

    pub async fn remove_policy(&mut self, id: &str) -> bool {
        let before = self.state.policies.len();
        self.state.policies.retain(|p| p.id != id);
        let removed = self.state.policies.len() != before;
        if removed {
            self.persist().await;
        }
        removed
    }

    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.state.last_execution
    }

    /// When the next run is due: last execution plus the shortest enabled
    /// policy interval, or now if it never ran.
    pub fn next_execution(&self) -> DateTime<Utc> {
        let interval = self
            .state
            .policies
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.interval_days.max(1))
            .min()
            .unwrap_or(1);
        match self.state.last_execution {
            Some(last) => last + Duration::days(interval),
            None => Utc::now(),
        }
    }

    /// Run every enabled policy. A disabled scheduler returns
    /// `executed: false` and touches nothing.
    pub async fn execute(&mut self, deps: &RetentionDeps) -> RetentionReport {
        if !self.state.enabled {
            info!("Retention disabled, skipping execution");
            return RetentionReport::default();
        }
        let report = self.run_policies(deps).await;
        self.state.last_execution = report.started_at;
        self.persist().await;
        report
    }

    /// Report what [`RetentionScheduler::execute`] would collect, with zero
    /// mutation. Works even while the global switch is off.
    pub async fn dry_run(&self, deps: &RetentionDeps) -> RetentionReport {
        let mut report = RetentionReport {
            executed: false,
            dry_run: true,
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        for policy in self.state.policies.iter().filter(|p| p.enabled) {
            let items_affected = match policy.policy_type {
                PolicyType::SoftDelete => deps.trash.expired_count(),
                PolicyType::Backup => {
                    deps.vault.count_older_than(Utc::now() - Duration::days(policy.retention_days))
                }
                PolicyType::Orphan => deps.auditor.run_check().await.orphaned_nodes.len(),
                PolicyType::AuditLog => 0,
            };
            report.results.push(PolicyResult {
                policy_id: policy.id.clone(),
                policy_type: policy.policy_type,
                items_affected,
                message: None,
                error: None,
            });
        }
        report
    }

    async fn run_policies(&self, deps: &RetentionDeps) -> RetentionReport {
        let mut report = RetentionReport {
            executed: true,
            dry_run: false,
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        for policy in self.state.policies.iter().filter(|p| p.enabled) {
            let result = self.run_policy(policy, deps).await;
            if let Some(err) = &result.error {
                warn!("Retention policy {} failed: {}", policy.id, err);
            } else {
                info!(
                    "Retention policy {} collected {} items",
                    policy.id, result.items_affected
                );
            }
            report.results.push(result);
        }
        report
    }

    async fn run_policy(&self, policy: &RetentionPolicyDef, deps: &RetentionDeps) -> PolicyResult {
        let mut result = PolicyResult {
            policy_id: policy.id.clone(),
            policy_type: policy.policy_type,
            items_affected: 0,
            message: None,
            error: None,
        };
        match policy.policy_type {
            PolicyType::SoftDelete => {
                let purged = deps.trash.purge_expired().await;
                deps.metrics.record_purge(purged.len() as u64);
                // Every purge is a recorded action, same as deletes and
                // restores.
                for record in &purged {
                    let draft = AuditEntryDraft::new(
                        record.original_kind.clone(),
                        &record.entity.id,
                        RETENTION_ACTOR,
                    )
                    .name(record.entity.name().unwrap_or_default())
                    .reason(&policy.name)
                    .flags(false, false, true);
                    deps.audit.log_purge(draft).await;
                }
                result.items_affected = purged.len();
            }
            PolicyType::Backup => {
                let cutoff = Utc::now() - Duration::days(policy.retention_days);
                result.items_affected = deps.vault.trim_older_than(cutoff).await;
            }
            PolicyType::Orphan => {
                // Orphans are zero-degree nodes; dropping them may strand
                // relationships, so a sweep of those follows.
                let check = deps.auditor.run_check().await;
                let fix = deps.auditor.auto_fix(&check).await;
                result.items_affected = fix.orphans_removed;
                match deps.reconciler.cleanup_orphaned_relationships().await {
                    Ok(swept) if swept > 0 => {
                        result.message = Some(format!("swept {} orphaned relationships", swept));
                    }
                    Ok(_) => {}
                    Err(e) => result.error = Some(e.to_string()),
                }
                if !fix.errors.is_empty() {
                    result.error = Some(fix.errors.join("; "));
                }
            }
            PolicyType::AuditLog => {
                // The audit trail caps itself on append; nothing to collect.
                result.message = Some("audit log is self-capping".to_string());
            }
        }
        result
    }

    async fn persist(&self) {
        if let Err(e) = write_json_atomic(&self.path, &self.state).await {
            warn!("Retention policy write failed (kept in memory): {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditFilter};
    use crate::ports::{Entity, EntityKind, MemoryGraph, MemoryRecords};
    use serde_json::json;

    struct Fixture {
        graph: Arc<MemoryGraph>,
        records: Arc<MemoryRecords>,
        deps: RetentionDeps,
        scheduler: RetentionScheduler,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(MemoryGraph::new());
        let records = Arc::new(MemoryRecords::new());
        let trash = Arc::new(
            TrashLedger::open(dir.path().join("deleted-items.json"), 30).await.unwrap(),
        );
        let vault = Arc::new(BackupVault::open(dir.path().join("delete-backups"), 100).await);
        let audit = Arc::new(AuditTrail::open(dir.path().join("audit-log.json"), 1000).await);
        let reconciler = Arc::new(GraphReconciler::new(graph.clone()));
        let auditor = Arc::new(ConsistencyAuditor::new(graph.clone(), records.clone()));
        let scheduler = RetentionScheduler::open(dir.path().join("retention-policy.json")).await;
        Fixture {
            deps: RetentionDeps {
                trash,
                vault,
                reconciler,
                audit,
                auditor,
                metrics: Arc::new(DeleteMetrics::new()),
            },
            graph,
            records,
            scheduler,
            _dir: dir,
        }
    }

    fn contact(id: &str) -> Entity {
        Entity::new(id, EntityKind::Contact).with_property("name", json!("Jane Doe"))
    }

    #[tokio::test]
    async fn test_disabled_by_default_and_inert() {
        let mut f = fixture().await;
        f.deps.trash.mark_deleted(contact("c1"), "tester", Some(-1)).await;

        assert!(!f.scheduler.is_enabled());
        let report = f.scheduler.execute(&f.deps).await;

        assert!(!report.executed);
        assert!(report.results.is_empty());
        // The expired record survived.
        assert_eq!(f.deps.trash.deleted(None).len(), 1);
        assert!(f.scheduler.last_execution().is_none());
    }

    #[tokio::test]
    async fn test_execute_purges_expired_trash() {
        let mut f = fixture().await;
        f.deps.trash.mark_deleted(contact("c1"), "tester", Some(-1)).await;
        f.deps.trash.mark_deleted(contact("c2"), "tester", None).await;

        f.scheduler.set_enabled(true).await;
        let report = f.scheduler.execute(&f.deps).await;

        assert!(report.executed);
        let soft = report
            .results
            .iter()
            .find(|r| r.policy_type == PolicyType::SoftDelete)
            .unwrap();
        assert_eq!(soft.items_affected, 1);
        assert_eq!(f.deps.trash.deleted(None).len(), 1);
        assert_eq!(f.deps.metrics.snapshot().total_purges, 1);
        assert!(f.scheduler.last_execution().is_some());
    }

    #[tokio::test]
    async fn test_purge_writes_audit_entries() {
        let mut f = fixture().await;
        f.deps.trash.mark_deleted(contact("c1"), "tester", Some(-1)).await;

        f.scheduler.set_enabled(true).await;
        f.scheduler.execute(&f.deps).await;

        assert!(f.deps.trash.deleted(None).is_empty());
        let purges = f.deps.audit.entries(&AuditFilter {
            action: Some(AuditAction::Purge),
            ..Default::default()
        });
        assert_eq!(purges.len(), 1);
        assert_eq!(purges[0].entity_id, "c1");
        assert_eq!(purges[0].entity_name, "Jane Doe");
        assert_eq!(purges[0].actor, "retention");
    }

    #[tokio::test]
    async fn test_orphan_policy_removes_orphan_nodes() {
        let mut f = fixture().await;
        let fact = Entity::new("f1", EntityKind::Fact).with_property("title", json!("Loose"));
        f.records.insert(fact.clone());
        f.deps.reconciler.sync_entity(&fact).await;
        f.scheduler.set_enabled(true).await;

        // Preview first: the orphan is counted but not touched.
        let preview = f.scheduler.dry_run(&f.deps).await;
        let orphan = preview
            .results
            .iter()
            .find(|r| r.policy_type == PolicyType::Orphan)
            .unwrap();
        assert_eq!(orphan.items_affected, 1);
        assert!(f.graph.node("f1").is_some());

        let report = f.scheduler.execute(&f.deps).await;
        let orphan = report
            .results
            .iter()
            .find(|r| r.policy_type == PolicyType::Orphan)
            .unwrap();
        assert_eq!(orphan.items_affected, 1);
        assert!(orphan.error.is_none());
        assert!(f.graph.node("f1").is_none());
    }

    #[tokio::test]
    async fn test_dry_run_never_mutates() {
        let mut f = fixture().await;
        f.deps.trash.mark_deleted(contact("c1"), "tester", Some(-1)).await;
        f.scheduler.set_enabled(true).await;

        let report = f.scheduler.dry_run(&f.deps).await;

        assert!(report.dry_run);
        assert!(!report.executed);
        let soft = report
            .results
            .iter()
            .find(|r| r.policy_type == PolicyType::SoftDelete)
            .unwrap();
        assert_eq!(soft.items_affected, 1);
        assert_eq!(f.deps.trash.deleted(None).len(), 1);
        assert!(f.scheduler.last_execution().is_none());
    }

    #[tokio::test]
    async fn test_policy_upsert_and_remove() {
        let mut f = fixture().await;
        let count = f.scheduler.policies().len();

        f.scheduler
            .upsert_policy(RetentionPolicyDef {
                id: "soft-delete-gc".to_string(),
                name: "Purge expired trash".to_string(),
                policy_type: PolicyType::SoftDelete,
                retention_days: 7,
                interval_days: 1,
                enabled: true,
            })
            .await;
        assert_eq!(f.scheduler.policies().len(), count);
        assert_eq!(
            f.scheduler.policies().iter().find(|p| p.id == "soft-delete-gc").unwrap().retention_days,
            7
        );

        assert!(f.scheduler.remove_policy("orphan-gc").await);
        assert!(!f.scheduler.remove_policy("orphan-gc").await);
        assert_eq!(f.scheduler.policies().len(), count - 1);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retention-policy.json");
        {
            let mut scheduler = RetentionScheduler::open(&path).await;
            scheduler.set_enabled(true).await;
            scheduler.remove_policy("backup-gc").await;
        }
        let scheduler = RetentionScheduler::open(&path).await;
        assert!(scheduler.is_enabled());
        assert!(scheduler.policies().iter().all(|p| p.id != "backup-gc"));
    }

    #[tokio::test]
    async fn test_next_execution_tracks_shortest_interval() {
        let mut f = fixture().await;
        f.scheduler.set_enabled(true).await;
        f.scheduler.execute(&f.deps).await;

        let last = f.scheduler.last_execution().unwrap();
        assert_eq!(f.scheduler.next_execution(), last + Duration::days(1));
    }
}

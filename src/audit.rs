use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use tracing::{debug, info, warn};

use crate::ports::{Entity, EntityKind};
use crate::trash::write_json_atomic;
use crate::utils::prefixed_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum AuditAction {
    Delete,
    Restore,
    Purge,
}

/// Immutable record of one delete/restore/purge action. Never mutated after
/// append; the only removal path is capacity eviction of the oldest entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub entity_name: String,
    pub actor: String,
    pub reason: String,
    pub cascade: bool,
    pub graph_synced: bool,
    pub soft_delete: bool,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Entity>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub entity_kind: Option<EntityKind>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub deletes: usize,
    pub restores: usize,
    pub purges: usize,
    pub last_24h: usize,
    pub last_7d: usize,
    pub last_30d: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Append-only, size-capped audit log backed by
/// `<data_dir>/audit-log.json` (newest-first array).
pub struct AuditTrail {
    path: PathBuf,
    max_entries: usize,
    // Newest first.
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditTrail {
    pub async fn open(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let entries: Vec<AuditEntry> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Audit log unreadable, starting empty: {}", e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        info!("AuditTrail opened at {} ({} entries)", path.display(), entries.len());
        Self {
            path,
            max_entries,
            entries: RwLock::new(entries),
        }
    }

    pub async fn log_delete(&self, mut entry: AuditEntryDraft) -> AuditEntry {
        entry.action = AuditAction::Delete;
        self.append(entry).await
    }

    pub async fn log_restore(&self, mut entry: AuditEntryDraft) -> AuditEntry {
        entry.action = AuditAction::Restore;
        entry.snapshot = None;
        self.append(entry).await
    }

    pub async fn log_purge(&self, mut entry: AuditEntryDraft) -> AuditEntry {
        entry.action = AuditAction::Purge;
        self.append(entry).await
    }

    async fn append(&self, draft: AuditEntryDraft) -> AuditEntry {
        let entry = AuditEntry {
            id: prefixed_id("aud"),
            timestamp: Utc::now(),
            action: draft.action,
            entity_kind: draft.entity_kind,
            entity_id: draft.entity_id,
            entity_name: draft.entity_name,
            actor: draft.actor,
            reason: draft.reason,
            cascade: draft.cascade,
            graph_synced: draft.graph_synced,
            soft_delete: draft.soft_delete,
            metadata: draft.metadata,
            snapshot: draft.snapshot,
        };
        {
            let mut entries = self.entries.write();
            entries.insert(0, entry.clone());
            // Oldest-first eviction once over capacity.
            if entries.len() > self.max_entries {
                entries.truncate(self.max_entries);
            }
        }
        debug!("Audit {} {} {} {}", entry.action, entry.entity_kind, entry.entity_id, entry.id);
        self.persist().await;
        entry
    }

    /// Filtered page of entries, newest first.
    pub fn entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        let matched = entries.iter().filter(|e| {
            filter.action.is_none_or(|a| e.action == a)
                && filter.entity_kind.as_ref().is_none_or(|k| &e.entity_kind == k)
                && filter.actor.as_ref().is_none_or(|a| &e.actor == a)
                && filter.since.is_none_or(|t| e.timestamp >= t)
                && filter.until.is_none_or(|t| e.timestamp <= t)
        });
        matched
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> AuditStats {
        let now = Utc::now();
        let entries = self.entries.read();
        let mut stats = AuditStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.iter() {
            match entry.action {
                AuditAction::Delete => stats.deletes += 1,
                AuditAction::Restore => stats.restores += 1,
                AuditAction::Purge => stats.purges += 1,
            }
            let age = now - entry.timestamp;
            if age <= Duration::hours(24) {
                stats.last_24h += 1;
            }
            if age <= Duration::days(7) {
                stats.last_7d += 1;
            }
            if age <= Duration::days(30) {
                stats.last_30d += 1;
            }
        }
        stats
    }

    /// Case-insensitive substring match over id, name, actor and reason.
    pub fn search(&self, query: &str) -> Vec<AuditEntry> {
        let needle = query.to_lowercase();
        self.entries
            .read()
            .iter()
            .filter(|e| {
                e.entity_id.to_lowercase().contains(&needle)
                    || e.entity_name.to_lowercase().contains(&needle)
                    || e.actor.to_lowercase().contains(&needle)
                    || e.reason.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub fn export(&self, format: ExportFormat) -> String {
        let entries = self.entries.read();
        match format {
            ExportFormat::Json => {
                serde_json::to_string_pretty(&*entries).unwrap_or_else(|_| "[]".to_string())
            }
            ExportFormat::Csv => {
                let mut out = String::from(
                    "id,timestamp,action,entity_kind,entity_id,entity_name,actor,reason,cascade,graph_synced,soft_delete\n",
                );
                for e in entries.iter() {
                    out.push_str(&format!(
                        "{},{},{},{},{},{},{},{},{},{},{}\n",
                        e.id,
                        e.timestamp.to_rfc3339(),
                        e.action,
                        e.entity_kind,
                        csv_field(&e.entity_id),
                        csv_field(&e.entity_name),
                        csv_field(&e.actor),
                        csv_field(&e.reason),
                        e.cascade,
                        e.graph_synced,
                        e.soft_delete,
                    ));
                }
                out
            }
        }
    }

    async fn persist(&self) {
        let snapshot = self.entries.read().clone();
        if let Err(e) = write_json_atomic(&self.path, &snapshot).await {
            warn!("Audit log write failed (kept in memory): {}", e);
        }
    }
}

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Builder input for one audit entry; id and timestamp are assigned on
/// append.
#[derive(Debug, Clone)]
pub struct AuditEntryDraft {
    pub action: AuditAction,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub entity_name: String,
    pub actor: String,
    pub reason: String,
    pub cascade: bool,
    pub graph_synced: bool,
    pub soft_delete: bool,
    pub metadata: Value,
    pub snapshot: Option<Entity>,
}

impl AuditEntryDraft {
    pub fn new(entity_kind: EntityKind, entity_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            action: AuditAction::Delete,
            entity_kind,
            entity_id: entity_id.into(),
            entity_name: String::new(),
            actor: actor.into(),
            reason: String::new(),
            cascade: false,
            graph_synced: false,
            soft_delete: false,
            metadata: Value::Null,
            snapshot: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = name.into();
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn flags(mut self, cascade: bool, graph_synced: bool, soft_delete: bool) -> Self {
        self.cascade = cascade;
        self.graph_synced = graph_synced;
        self.soft_delete = soft_delete;
        self
    }

    #[must_use]
    pub fn snapshot(mut self, entity: Entity) -> Self {
        self.snapshot = Some(entity);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn trail(dir: &tempfile::TempDir, cap: usize) -> AuditTrail {
        AuditTrail::open(dir.path().join("audit-log.json"), cap).await
    }

    fn draft(id: &str) -> AuditEntryDraft {
        AuditEntryDraft::new(EntityKind::Contact, id, "tester").name("Jane Doe")
    }

    #[tokio::test]
    async fn test_append_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let audit = trail(&dir, 100).await;
        audit.log_delete(draft("c1")).await;
        audit.log_restore(draft("c1")).await;

        let entries = audit.entries(&AuditFilter::default());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Restore);
        assert_eq!(entries[1].action, AuditAction::Delete);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_only() {
        let dir = tempfile::tempdir().unwrap();
        let audit = trail(&dir, 3).await;
        for i in 0..5 {
            audit.log_delete(draft(&format!("c{}", i))).await;
        }
        let entries = audit.entries(&AuditFilter::default());
        assert_eq!(entries.len(), 3);
        // Newest survive.
        assert_eq!(entries[0].entity_id, "c4");
        assert_eq!(entries[2].entity_id, "c2");
    }

    #[tokio::test]
    async fn test_filters_and_pagination() {
        let dir = tempfile::tempdir().unwrap();
        let audit = trail(&dir, 100).await;
        audit.log_delete(draft("c1")).await;
        audit.log_delete(AuditEntryDraft::new(EntityKind::Fact, "f1", "other")).await;
        audit.log_purge(draft("c2")).await;

        let deletes = audit.entries(&AuditFilter {
            action: Some(AuditAction::Delete),
            ..Default::default()
        });
        assert_eq!(deletes.len(), 2);

        let by_actor = audit.entries(&AuditFilter {
            actor: Some("other".to_string()),
            ..Default::default()
        });
        assert_eq!(by_actor.len(), 1);
        assert_eq!(by_actor[0].entity_id, "f1");

        let page = audit.entries(&AuditFilter {
            limit: Some(1),
            offset: 1,
            ..Default::default()
        });
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].entity_id, "f1");
    }

    #[tokio::test]
    async fn test_stats_windows() {
        let dir = tempfile::tempdir().unwrap();
        let audit = trail(&dir, 100).await;
        audit.log_delete(draft("c1")).await;
        audit.log_restore(draft("c1")).await;

        let stats = audit.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.restores, 1);
        assert_eq!(stats.last_24h, 2);
        assert_eq!(stats.last_30d, 2);
    }

    #[tokio::test]
    async fn test_search_substring() {
        let dir = tempfile::tempdir().unwrap();
        let audit = trail(&dir, 100).await;
        audit.log_delete(draft("c1").reason("cleanup duplicates")).await;
        audit.log_delete(AuditEntryDraft::new(EntityKind::Fact, "f1", "tester")).await;

        assert_eq!(audit.search("jane").len(), 1);
        assert_eq!(audit.search("duplicates").len(), 1);
        assert_eq!(audit.search("tester").len(), 2);
    }

    #[tokio::test]
    async fn test_export_csv_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let audit = trail(&dir, 100).await;
        audit
            .log_delete(draft("c1").name("Doe, Jane").reason("said \"bye\""))
            .await;

        let csv = audit.export(ExportFormat::Csv);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("id,timestamp,action"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"Doe, Jane\""));
        assert!(row.contains("\"said \"\"bye\"\"\""));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let audit = trail(&dir, 100).await;
            audit.log_delete(draft("c1")).await;
        }
        let audit = trail(&dir, 100).await;
        assert_eq!(audit.len(), 1);
    }
}

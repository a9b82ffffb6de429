use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ports::{Entity, EntityKind};
use crate::trash::write_json_atomic;
use crate::utils::prefixed_id;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    NotFound(String),
    #[error("Backup {0} unreadable: {1}")]
    Unreadable(String, String),
}

/// Point-in-time snapshot of an entity, independent of the trash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub kind: EntityKind,
    pub item_id: String,
    pub item_name: String,
    pub created_at: DateTime<Utc>,
    pub deleted_by: String,
    pub reason: String,
    /// Deep snapshot of the entity at deletion time.
    pub data: Entity,
    /// Snapshots of closely related records captured alongside.
    #[serde(default)]
    pub related_data: Value,
}

/// Index row: everything except the snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupIndexEntry {
    pub id: String,
    pub kind: EntityKind,
    pub item_id: String,
    pub item_name: String,
    pub created_at: DateTime<Utc>,
    pub deleted_by: String,
    pub reason: String,
}

impl From<&BackupRecord> for BackupIndexEntry {
    fn from(record: &BackupRecord) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind.clone(),
            item_id: record.item_id.clone(),
            item_name: record.item_name.clone(),
            created_at: record.created_at,
            deleted_by: record.deleted_by.clone(),
            reason: record.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupStats {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub max_backups: usize,
}

/// Capped vault of deletion snapshots: one file per record under
/// `<data_dir>/delete-backups/` plus `backup-index.json`, oldest evicted
/// beyond `max_backups`. Single-writer, like the other file stores.
pub struct BackupVault {
    dir: PathBuf,
    index_path: PathBuf,
    max_backups: usize,
    // Newest first.
    index: RwLock<Vec<BackupIndexEntry>>,
}

impl BackupVault {
    pub async fn open(dir: impl Into<PathBuf>, max_backups: usize) -> Self {
        let dir = dir.into();
        let index_path = dir.join("backup-index.json");
        let index: Vec<BackupIndexEntry> = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Backup index unreadable, starting empty: {}", e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        info!("BackupVault opened at {} ({} entries)", dir.display(), index.len());
        Self {
            dir,
            index_path,
            max_backups,
            index: RwLock::new(index),
        }
    }

    pub async fn create_backup(
        &self,
        entity: &Entity,
        deleted_by: &str,
        reason: &str,
        related_data: Value,
    ) -> BackupRecord {
        let record = BackupRecord {
            id: prefixed_id("bak"),
            kind: entity.kind.clone(),
            item_id: entity.id.clone(),
            item_name: entity.name().unwrap_or(&entity.id).to_string(),
            created_at: Utc::now(),
            deleted_by: deleted_by.to_string(),
            reason: reason.to_string(),
            data: entity.clone(),
            related_data,
        };

        if let Err(e) = write_json_atomic(&self.record_path(&record.id), &record).await {
            warn!("Backup file write failed for {} (snapshot lost on crash): {}", record.id, e);
        }

        self.index.write().insert(0, BackupIndexEntry::from(&record));
        self.persist_index().await;
        debug!("Backup {} created for {} {}", record.id, record.kind, record.item_id);

        self.trim_backups().await;
        record
    }

    pub async fn get_backup(&self, id: &str) -> Result<BackupRecord, BackupError> {
        if !self.index.read().iter().any(|e| e.id == id) {
            return Err(BackupError::NotFound(id.to_string()));
        }
        let bytes = tokio::fs::read(self.record_path(id))
            .await
            .map_err(|e| BackupError::Unreadable(id.to_string(), e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BackupError::Unreadable(id.to_string(), e.to_string()))
    }

    /// Index entries, newest first, optionally filtered by kind.
    pub fn list_backups(&self, kind: Option<&EntityKind>) -> Vec<BackupIndexEntry> {
        let index = self.index.read();
        match kind {
            Some(kind) => index.iter().filter(|e| &e.kind == kind).cloned().collect(),
            None => index.clone(),
        }
    }

    /// The stored snapshot. Reinsertion into the record store is the
    /// caller's job.
    pub async fn restore_from_backup(&self, id: &str) -> Result<Entity, BackupError> {
        Ok(self.get_backup(id).await?.data)
    }

    pub async fn delete_backup(&self, id: &str) -> bool {
        let existed = {
            let mut index = self.index.write();
            let before = index.len();
            index.retain(|e| e.id != id);
            index.len() != before
        };
        if existed {
            if let Err(e) = tokio::fs::remove_file(self.record_path(id)).await {
                warn!("Backup file removal failed for {}: {}", id, e);
            }
            self.persist_index().await;
        }
        existed
    }

    /// Evict oldest entries beyond the cap, removing index row and file
    /// together. Returns how many were evicted.
    pub async fn trim_backups(&self) -> usize {
        let evicted: Vec<BackupIndexEntry> = {
            let mut index = self.index.write();
            if index.len() <= self.max_backups {
                return 0;
            }
            index.split_off(self.max_backups)
        };
        for entry in &evicted {
            if let Err(e) = tokio::fs::remove_file(self.record_path(&entry.id)).await {
                warn!("Backup file removal failed for {}: {}", entry.id, e);
            }
        }
        self.persist_index().await;
        info!("Trimmed {} backups beyond cap of {}", evicted.len(), self.max_backups);
        evicted.len()
    }

    /// Evict entries older than `cutoff` regardless of the count cap.
    /// Used by the retention scheduler.
    pub async fn trim_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let evicted: Vec<BackupIndexEntry> = {
            let mut index = self.index.write();
            let (keep, old): (Vec<_>, Vec<_>) =
                index.drain(..).partition(|e| e.created_at >= cutoff);
            *index = keep;
            old
        };
        if evicted.is_empty() {
            return 0;
        }
        for entry in &evicted {
            if let Err(e) = tokio::fs::remove_file(self.record_path(&entry.id)).await {
                warn!("Backup file removal failed for {}: {}", entry.id, e);
            }
        }
        self.persist_index().await;
        info!("Trimmed {} backups older than {}", evicted.len(), cutoff);
        evicted.len()
    }

    /// Count of entries older than `cutoff`, without evicting.
    pub fn count_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        self.index.read().iter().filter(|e| e.created_at < cutoff).count()
    }

    pub fn stats(&self) -> BackupStats {
        let index = self.index.read();
        let mut stats = BackupStats {
            total: index.len(),
            max_backups: self.max_backups,
            ..Default::default()
        };
        for entry in index.iter() {
            *stats.by_kind.entry(entry.kind.to_string()).or_insert(0) += 1;
            if stats.oldest.is_none_or(|t| entry.created_at < t) {
                stats.oldest = Some(entry.created_at);
            }
            if stats.newest.is_none_or(|t| entry.created_at > t) {
                stats.newest = Some(entry.created_at);
            }
        }
        stats
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn persist_index(&self) {
        let snapshot = self.index.read().clone();
        if let Err(e) = write_json_atomic(&self.index_path, &snapshot).await {
            warn!("Backup index write failed (kept in memory): {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact(id: &str, name: &str) -> Entity {
        Entity::new(id, EntityKind::Contact).with_property("name", json!(name))
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = BackupVault::open(dir.path(), 100).await;
        let entity = contact("c1", "Jane Doe");

        let record = vault
            .create_backup(&entity, "tester", "delete", json!({"projects": []}))
            .await;
        assert!(record.id.starts_with("bak_"));
        assert_eq!(record.item_name, "Jane Doe");

        let fetched = vault.get_backup(&record.id).await.unwrap();
        assert_eq!(fetched.data, entity);
        assert_eq!(vault.restore_from_backup(&record.id).await.unwrap(), entity);
    }

    #[tokio::test]
    async fn test_missing_backup_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vault = BackupVault::open(dir.path(), 100).await;
        assert!(matches!(
            vault.get_backup("bak_missing").await.unwrap_err(),
            BackupError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let vault = BackupVault::open(dir.path(), 2).await;

        let first = vault.create_backup(&contact("c1", "A"), "t", "", Value::Null).await;
        vault.create_backup(&contact("c2", "B"), "t", "", Value::Null).await;
        vault.create_backup(&contact("c3", "C"), "t", "", Value::Null).await;

        let listed = vault.list_backups(None);
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|e| e.id != first.id));
        assert!(!dir.path().join(format!("{}.json", first.id)).exists());
        assert!(matches!(
            vault.get_backup(&first.id).await.unwrap_err(),
            BackupError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_backup_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let vault = BackupVault::open(dir.path(), 10).await;
        let record = vault.create_backup(&contact("c1", "A"), "t", "", Value::Null).await;

        assert!(vault.delete_backup(&record.id).await);
        assert!(!vault.delete_backup(&record.id).await);
        assert!(!dir.path().join(format!("{}.json", record.id)).exists());
    }

    #[tokio::test]
    async fn test_list_filter_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let vault = BackupVault::open(dir.path(), 10).await;
        vault.create_backup(&contact("c1", "A"), "t", "", Value::Null).await;
        vault
            .create_backup(
                &Entity::new("f1", EntityKind::Fact).with_property("title", json!("F")),
                "t",
                "",
                Value::Null,
            )
            .await;

        assert_eq!(vault.list_backups(Some(&EntityKind::Contact)).len(), 1);
        let stats = vault.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_kind.get("fact"), Some(&1));
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let vault = BackupVault::open(dir.path(), 10).await;
            vault.create_backup(&contact("c1", "A"), "t", "", Value::Null).await.id
        };
        let vault = BackupVault::open(dir.path(), 10).await;
        assert_eq!(vault.list_backups(None).len(), 1);
        assert!(vault.get_backup(&id).await.is_ok());
    }
}

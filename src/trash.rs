use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ports::{Entity, EntityKind};

const DELETED_AT_KEY: &str = "_deleted_at";
const DELETED_BY_KEY: &str = "_deleted_by";
const DELETED_EXPIRES_KEY: &str = "_deleted_expires";

#[derive(Error, Debug)]
pub enum TrashError {
    #[error("No trashed {kind} with id {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("Trash ledger corrupted at {0}: {1}")]
    Corrupted(PathBuf, String),
}

/// One soft-deleted entity with its retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashRecord {
    pub entity: Entity,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: String,
    pub expires_at: DateTime<Utc>,
    pub original_kind: EntityKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrashStats {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub expiring_within_week: usize,
}

/// Soft-delete store backed by `<data_dir>/deleted-items.json`.
///
/// Whole-file read-modify-write through an atomic temp-file rename;
/// single-writer only. A failed disk write is logged and the in-memory state
/// stays authoritative for the life of the process.
pub struct TrashLedger {
    path: PathBuf,
    retention_days: i64,
    records: RwLock<HashMap<EntityKind, Vec<TrashRecord>>>,
}

impl TrashLedger {
    pub async fn open(path: impl Into<PathBuf>, retention_days: i64) -> Result<Self, TrashError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let flat: Vec<TrashRecord> = serde_json::from_slice(&bytes)
                    .map_err(|e| TrashError::Corrupted(path.clone(), e.to_string()))?;
                let mut map: HashMap<EntityKind, Vec<TrashRecord>> = HashMap::new();
                for record in flat {
                    map.entry(record.original_kind.clone()).or_default().push(record);
                }
                map
            }
            Err(_) => HashMap::new(),
        };
        info!(
            "TrashLedger opened at {} ({} records)",
            path.display(),
            records.values().map(Vec::len).sum::<usize>()
        );
        Ok(Self {
            path,
            retention_days,
            records: RwLock::new(records),
        })
    }

    /// Mark an entity deleted. The stored copy carries `_deleted_*` metadata
    /// in its properties; [`TrashLedger::restore`] strips it again.
    pub async fn mark_deleted(
        &self,
        mut entity: Entity,
        deleted_by: &str,
        retention_days: Option<i64>,
    ) -> TrashRecord {
        let now = Utc::now();
        let days = retention_days.unwrap_or(self.retention_days);
        let expires_at = now + Duration::days(days);

        entity.properties.insert(
            DELETED_AT_KEY.to_string(),
            Value::String(now.to_rfc3339()),
        );
        entity.properties.insert(
            DELETED_BY_KEY.to_string(),
            Value::String(deleted_by.to_string()),
        );
        entity.properties.insert(
            DELETED_EXPIRES_KEY.to_string(),
            Value::String(expires_at.to_rfc3339()),
        );

        let record = TrashRecord {
            original_kind: entity.kind.clone(),
            entity,
            deleted_at: now,
            deleted_by: deleted_by.to_string(),
            expires_at,
        };

        {
            let mut records = self.records.write();
            // Newest first per kind.
            records
                .entry(record.original_kind.clone())
                .or_default()
                .insert(0, record.clone());
        }
        debug!(
            "Trashed {} {} (expires {})",
            record.original_kind, record.entity.id, record.expires_at
        );
        self.persist().await;
        record
    }

    /// Trashed records, newest first. `kind = None` merges all kinds.
    pub fn deleted(&self, kind: Option<&EntityKind>) -> Vec<TrashRecord> {
        let records = self.records.read();
        match kind {
            Some(kind) => records.get(kind).cloned().unwrap_or_default(),
            None => {
                let mut all: Vec<TrashRecord> =
                    records.values().flatten().cloned().collect();
                all.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
                all
            }
        }
    }

    /// Take an entity out of the trash, stripped of deletion metadata.
    ///
    /// The caller owns reinsertion into the record store; this ledger never
    /// writes there.
    pub async fn restore(&self, kind: &EntityKind, id: &str) -> Result<Entity, TrashError> {
        let record = {
            let mut records = self.records.write();
            let list = records.get_mut(kind).ok_or_else(|| TrashError::NotFound {
                kind: kind.clone(),
                id: id.to_string(),
            })?;
            let pos = list
                .iter()
                .position(|r| r.entity.id == id)
                .ok_or_else(|| TrashError::NotFound {
                    kind: kind.clone(),
                    id: id.to_string(),
                })?;
            list.remove(pos)
        };
        self.persist().await;

        let mut entity = record.entity;
        entity.properties.retain(|k, _| !k.starts_with("_deleted"));
        info!("Restored {} {} from trash", kind, entity.id);
        Ok(entity)
    }

    /// Remove every record past its expiry. Idempotent; records expiring
    /// exactly now survive until the next call.
    pub async fn purge_expired(&self) -> Vec<TrashRecord> {
        let now = Utc::now();
        let purged = {
            let mut records = self.records.write();
            let mut purged = Vec::new();
            for list in records.values_mut() {
                let mut keep = Vec::with_capacity(list.len());
                for record in list.drain(..) {
                    if now > record.expires_at {
                        purged.push(record);
                    } else {
                        keep.push(record);
                    }
                }
                *list = keep;
            }
            purged
        };
        if !purged.is_empty() {
            info!("Purged {} expired trash records", purged.len());
            self.persist().await;
        }
        purged
    }

    /// Count of records that would be purged, without touching anything.
    pub fn expired_count(&self) -> usize {
        let now = Utc::now();
        self.records
            .read()
            .values()
            .flatten()
            .filter(|r| now > r.expires_at)
            .count()
    }

    pub fn stats(&self) -> TrashStats {
        let records = self.records.read();
        let mut stats = TrashStats::default();
        let week_out = Utc::now() + Duration::days(7);
        for (kind, list) in records.iter() {
            if list.is_empty() {
                continue;
            }
            stats.total += list.len();
            stats.by_kind.insert(kind.to_string(), list.len());
            for record in list {
                if stats.oldest.is_none_or(|t| record.deleted_at < t) {
                    stats.oldest = Some(record.deleted_at);
                }
                if stats.newest.is_none_or(|t| record.deleted_at > t) {
                    stats.newest = Some(record.deleted_at);
                }
                if record.expires_at <= week_out {
                    stats.expiring_within_week += 1;
                }
            }
        }
        stats
    }

    async fn persist(&self) {
        let flat: Vec<TrashRecord> = {
            let records = self.records.read();
            let mut flat: Vec<TrashRecord> = records.values().flatten().cloned().collect();
            flat.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
            flat
        };
        if let Err(e) = write_json_atomic(&self.path, &flat).await {
            warn!("Trash ledger write failed (data kept in memory): {}", e);
        }
    }
}

/// Serialize to a temp file next to `path`, then rename into place.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::ports::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteHealth {
    Healthy,
    Degraded,
}

/// Point-in-time export of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_deletes: u64,
    pub total_restores: u64,
    pub total_purges: u64,
    pub failed_deletes: u64,
    pub backups_written: u64,
    pub cascade_op_failures: u64,
    pub deletes_by_kind: HashMap<String, u64>,
    pub last_delete_at: Option<DateTime<Utc>>,
    pub health: DeleteHealth,
}

/// Counters derived from delete/restore/purge activity. Plain atomics on the
/// hot path; the per-kind map takes a short lock.
pub struct DeleteMetrics {
    total_deletes: AtomicU64,
    total_restores: AtomicU64,
    total_purges: AtomicU64,
    failed_deletes: AtomicU64,
    backups_written: AtomicU64,
    cascade_op_failures: AtomicU64,
    deletes_by_kind: RwLock<HashMap<String, u64>>,
    last_delete_at: RwLock<Option<DateTime<Utc>>>,
}

/// Failure ratio above this marks the subsystem degraded.
const DEGRADED_FAILURE_RATIO: f64 = 0.1;
/// Below this many attempts the ratio is noise; stay healthy.
const MIN_SAMPLE: u64 = 10;

impl DeleteMetrics {
    pub fn new() -> Self {
        Self {
            total_deletes: AtomicU64::new(0),
            total_restores: AtomicU64::new(0),
            total_purges: AtomicU64::new(0),
            failed_deletes: AtomicU64::new(0),
            backups_written: AtomicU64::new(0),
            cascade_op_failures: AtomicU64::new(0),
            deletes_by_kind: RwLock::new(HashMap::new()),
            last_delete_at: RwLock::new(None),
        }
    }

    pub fn record_delete(&self, kind: &EntityKind) {
        self.total_deletes.fetch_add(1, Ordering::Relaxed);
        *self.deletes_by_kind.write().entry(kind.to_string()).or_insert(0) += 1;
        *self.last_delete_at.write() = Some(Utc::now());
    }

    pub fn record_failed_delete(&self) {
        self.failed_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restore(&self) {
        self.total_restores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purge(&self, count: u64) {
        self.total_purges.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_backup(&self) {
        self.backups_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cascade_failures(&self, count: u64) {
        self.cascade_op_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn total_deletes(&self) -> u64 {
        self.total_deletes.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> DeleteHealth {
        let ok = self.total_deletes.load(Ordering::Relaxed);
        let failed = self.failed_deletes.load(Ordering::Relaxed);
        let attempts = ok + failed;
        if attempts < MIN_SAMPLE {
            return DeleteHealth::Healthy;
        }
        if failed as f64 / attempts as f64 > DEGRADED_FAILURE_RATIO {
            DeleteHealth::Degraded
        } else {
            DeleteHealth::Healthy
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_deletes: self.total_deletes.load(Ordering::Relaxed),
            total_restores: self.total_restores.load(Ordering::Relaxed),
            total_purges: self.total_purges.load(Ordering::Relaxed),
            failed_deletes: self.failed_deletes.load(Ordering::Relaxed),
            backups_written: self.backups_written.load(Ordering::Relaxed),
            cascade_op_failures: self.cascade_op_failures.load(Ordering::Relaxed),
            deletes_by_kind: self.deletes_by_kind.read().clone(),
            last_delete_at: *self.last_delete_at.read(),
            health: self.health(),
        }
    }
}

impl Default for DeleteMetrics {
    fn default() -> Self {
        Self::new()
    }
}

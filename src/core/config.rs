use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the deletion subsystem.
///
/// One instance is built at startup and handed to each component explicitly;
/// there is no process-wide singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkgraphConfig {
    /// Root directory for the file-backed stores (trash, backups, audit log,
    /// retention policy table).
    pub data_dir: PathBuf,

    /// Days a soft-deleted entity stays restorable before purge.
    pub retention_days: i64,

    /// Maximum number of backup records kept in the vault.
    pub max_backups: usize,

    /// Maximum number of audit entries kept before oldest-first eviction.
    pub max_audit_entries: usize,

    /// Capacity of the recent-event ring buffer.
    pub event_buffer: usize,

    /// Seconds between SSE heartbeat frames.
    pub sse_heartbeat_secs: u64,

    /// Strict ontology mode: validation failures block a graph sync instead
    /// of logging a warning.
    pub strict_ontology: bool,

    /// Item-count threshold above which filter deletes require confirmation.
    pub confirm_threshold: usize,
}

impl WorkgraphConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            retention_days: crate::DEFAULT_RETENTION_DAYS,
            max_backups: crate::DEFAULT_MAX_BACKUPS,
            max_audit_entries: crate::DEFAULT_MAX_AUDIT_ENTRIES,
            event_buffer: crate::DEFAULT_EVENT_BUFFER,
            sse_heartbeat_secs: 30,
            strict_ontology: false,
            confirm_threshold: crate::DEFAULT_CONFIRM_THRESHOLD,
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::new(
            std::env::var("WORKGRAPH_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        if let Ok(days) = std::env::var("WORKGRAPH_RETENTION_DAYS") {
            if let Ok(days) = days.parse() {
                config.retention_days = days;
            }
        }
        if let Ok(max) = std::env::var("WORKGRAPH_MAX_BACKUPS") {
            if let Ok(max) = max.parse() {
                config.max_backups = max;
            }
        }
        if let Ok(max) = std::env::var("WORKGRAPH_MAX_AUDIT_ENTRIES") {
            if let Ok(max) = max.parse() {
                config.max_audit_entries = max;
            }
        }
        if let Ok(size) = std::env::var("WORKGRAPH_EVENT_BUFFER") {
            if let Ok(size) = size.parse() {
                config.event_buffer = size;
            }
        }
        if let Ok(secs) = std::env::var("WORKGRAPH_SSE_HEARTBEAT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.sse_heartbeat_secs = secs;
            }
        }
        if let Ok(threshold) = std::env::var("WORKGRAPH_CONFIRM_THRESHOLD") {
            if let Ok(threshold) = threshold.parse() {
                config.confirm_threshold = threshold;
            }
        }
        if let Ok(strict) = std::env::var("WORKGRAPH_STRICT_ONTOLOGY") {
            config.strict_ontology = strict == "1" || strict.eq_ignore_ascii_case("true");
        }

        config
    }

    pub fn trash_path(&self) -> PathBuf {
        self.data_dir.join("deleted-items.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("audit-log.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("delete-backups")
    }

    pub fn backup_index_path(&self) -> PathBuf {
        self.backups_dir().join("backup-index.json")
    }

    pub fn retention_policy_path(&self) -> PathBuf {
        self.data_dir.join("retention-policy.json")
    }
}

impl Default for WorkgraphConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

use serde::Serialize;
use thiserror::Error;

use crate::backup::BackupError;
use crate::ports::EntityKind;
use crate::trash::TrashError;

/// Knobs for one delete call.
#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub deleted_by: String,
    pub reason: String,
    /// Trash the entity instead of dropping it outright.
    pub soft_delete: bool,
    /// Run the declarative cascade rule for the kind.
    pub cascade: bool,
    /// Write a vault snapshot before anything else.
    pub backup: bool,
    /// Override the ledger's default retention window.
    pub retention_days: Option<i64>,
    /// Pre-confirm filter deletes above the threshold.
    pub confirmed: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            deleted_by: "system".to_string(),
            reason: String::new(),
            soft_delete: true,
            cascade: true,
            backup: true,
            retention_days: None,
            confirmed: false,
        }
    }
}

impl DeleteOptions {
    pub fn by(deleted_by: impl Into<String>) -> Self {
        Self {
            deleted_by: deleted_by.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }
}

/// What a cascade execution did. `errors` holds per-op failures; the call
/// itself never aborts (fail-open, all ops attempted).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeOutcome {
    pub applied: bool,
    pub message: Option<String>,
    pub graph_ops_run: usize,
    pub local_ops_run: usize,
    pub records_touched: usize,
    pub errors: Vec<String>,
}

impl CascadeOutcome {
    pub fn no_rule(kind: &EntityKind) -> Self {
        Self {
            applied: false,
            message: Some(format!("no rule for {}", kind)),
            ..Default::default()
        }
    }
}

/// Zero-mutation preview of what a cascade would run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadePreview {
    pub has_rule: bool,
    pub graph_ops: usize,
    pub local_ops: usize,
}

/// Orchestrator pipeline result. `success == false` means a stage aborted
/// and the stages after it never ran; cascade sub-op failures do NOT set it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub backup_id: Option<String>,
    pub soft_deleted: bool,
    pub cascade: Option<CascadeOutcome>,
    pub graph_synced: bool,
    pub audit_id: Option<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Per-item accounting for a batch delete.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub deleted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Nodes removed by the single batched graph call (id list + legacy
    /// slug list), or `None` when the graph was unavailable.
    pub graph_deleted: Option<usize>,
}

/// Filter deletes above the confirmation threshold return the preview arm
/// instead of executing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum FilterOutcome {
    Preview { matched: usize, threshold: usize },
    Executed(BatchOutcome),
}

#[derive(Error, Debug)]
pub enum DeletionError {
    #[error("Entity has no id")]
    MissingId,
    #[error("Trash error: {0}")]
    Trash(#[from] TrashError),
    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),
    #[error("Record store error: {0}")]
    Records(String),
    #[error("Pipeline stage '{stage}' failed: {message}")]
    Stage { stage: &'static str, message: String },
}

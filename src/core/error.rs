use thiserror::Error;

use crate::backup::BackupError;
use crate::deletion::DeletionError;
use crate::ports::{GraphStoreError, RecordStoreError};
use crate::trash::TrashError;

/// Crate-level error. Every module error converts into it, so callers can
/// `?` across the whole deletion surface behind one [`Result`] alias.
#[derive(Error, Debug)]
pub enum WorkgraphError {
    #[error(transparent)]
    Trash(#[from] TrashError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Deletion(#[from] DeletionError),

    #[error("Graph store error: {0}")]
    Graph(#[from] GraphStoreError),

    #[error("Record store error: {0}")]
    Records(#[from] RecordStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkgraphError>;

pub mod audit;
pub mod backup;
pub mod consistency;
pub mod core;
pub mod deletion;
pub mod metrics;
pub mod ports;
pub mod retention;
pub mod subsystem;
pub mod sync;
pub mod trash;
pub mod utils;

pub use utils::{safe_truncate, safe_truncate_ellipsis};

pub use crate::core::config::WorkgraphConfig;
pub use crate::core::error::{Result, WorkgraphError};
pub use crate::core::events::{DeleteEvent, DeleteEventBus, EventKind};
pub use deletion::{BatchCoordinator, DeleteOptions, DeleteOutcome, DeletionOrchestrator};
pub use subsystem::Workgraph;
pub use sync::GraphReconciler;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

pub const DEFAULT_MAX_BACKUPS: usize = 100;

pub const DEFAULT_MAX_AUDIT_ENTRIES: usize = 10_000;

pub const DEFAULT_EVENT_BUFFER: usize = 100;

pub const DEFAULT_CONFIRM_THRESHOLD: usize = 5;

//! Entity deletion: options and outcomes, cascade rules, the fail-closed
//! orchestrator pipeline and the batch coordinator.

pub mod batch;
pub mod cascade;
pub mod models;
pub mod orchestrator;

pub use batch::BatchCoordinator;
pub use cascade::{CascadeRule, CascadeRuleSet, GraphCleanupOp, LocalCleanupOp};
pub use models::{
    BatchOutcome, CascadeOutcome, CascadePreview, DeleteOptions, DeleteOutcome, DeletionError,
    FilterOutcome,
};
pub use orchestrator::DeletionOrchestrator;

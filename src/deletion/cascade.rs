use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::models::{CascadeOutcome, CascadePreview};
use crate::ports::{Entity, EntityKind, RecordStore};
use crate::sync::GraphReconciler;

/// Graph-side cleanup step in a cascade rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphCleanupOp {
    /// Delete the entity's node by canonical id plus the legacy slug alias.
    DeleteEntityNodes,
    /// Drop relationships whose endpoints no longer exist.
    CleanupOrphanedRelationships,
}

/// Record-store cleanup step in a cascade rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCleanupOp {
    /// Null out a scalar reference field on every record of `kind` that
    /// points at the deleted entity.
    ClearInverseRefs { kind: EntityKind, field: &'static str },
    /// Remove the deleted entity's id from a list field on every record of
    /// `kind` that contains it.
    RemoveFromList { kind: EntityKind, field: &'static str },
}

/// Declarative cleanup recipe for one entity kind.
#[derive(Debug, Clone, Default)]
pub struct CascadeRule {
    pub graph_ops: Vec<GraphCleanupOp>,
    pub local_ops: Vec<LocalCleanupOp>,
}

/// Kind-keyed table of cascade rules plus the fail-open executor.
///
/// Every op runs inside its own error scope: one failing op lands in
/// `errors` and the rest still execute. This is deliberately the opposite
/// of the orchestrator pipeline, which aborts on stage failure.
pub struct CascadeRuleSet {
    rules: HashMap<EntityKind, CascadeRule>,
}

impl CascadeRuleSet {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: EntityKind, rule: CascadeRule) {
        self.rules.insert(kind, rule);
    }

    pub fn rule(&self, kind: &EntityKind) -> Option<&CascadeRule> {
        self.rules.get(kind)
    }

    /// Same lookup as [`CascadeRuleSet::cascade_delete`], zero mutation.
    pub fn preview_cascade(&self, kind: &EntityKind) -> CascadePreview {
        match self.rules.get(kind) {
            Some(rule) => CascadePreview {
                has_rule: true,
                graph_ops: rule.graph_ops.len(),
                local_ops: rule.local_ops.len(),
            },
            None => CascadePreview::default(),
        }
    }

    /// Run the rule for the entity's kind. No registered rule is a pure
    /// no-op; with a rule, every op is attempted regardless of earlier
    /// failures.
    pub async fn cascade_delete(
        &self,
        entity: &Entity,
        reconciler: &GraphReconciler,
        records: &dyn RecordStore,
    ) -> CascadeOutcome {
        self.run(entity, reconciler, records, true).await
    }

    /// Cascade without the graph ops. Batch deletes use this and issue one
    /// batched graph call afterwards instead of per-item node deletions.
    pub async fn cascade_local_only(
        &self,
        entity: &Entity,
        reconciler: &GraphReconciler,
        records: &dyn RecordStore,
    ) -> CascadeOutcome {
        self.run(entity, reconciler, records, false).await
    }

    async fn run(
        &self,
        entity: &Entity,
        reconciler: &GraphReconciler,
        records: &dyn RecordStore,
        graph_ops: bool,
    ) -> CascadeOutcome {
        let Some(rule) = self.rules.get(&entity.kind) else {
            debug!("No cascade rule for {}", entity.kind);
            return CascadeOutcome::no_rule(&entity.kind);
        };

        let mut outcome = CascadeOutcome {
            applied: true,
            ..Default::default()
        };

        if graph_ops {
            for op in &rule.graph_ops {
                match op {
                    GraphCleanupOp::DeleteEntityNodes => {
                        let result = reconciler
                            .on_entity_deleted(&entity.kind, &entity.id, entity.name())
                            .await;
                        if !result.skipped {
                            outcome.graph_ops_run += 1;
                        }
                    }
                    GraphCleanupOp::CleanupOrphanedRelationships => {
                        match reconciler.cleanup_orphaned_relationships().await {
                            Ok(_) => outcome.graph_ops_run += 1,
                            Err(e) => outcome.errors.push(format!("orphan cleanup: {}", e)),
                        }
                    }
                }
            }
        }

        for op in &rule.local_ops {
            match self.run_local_op(op, entity, records).await {
                Ok(touched) => {
                    outcome.local_ops_run += 1;
                    outcome.records_touched += touched;
                }
                Err(e) => {
                    warn!("Local cleanup op failed for {} {}: {}", entity.kind, entity.id, e);
                    outcome.errors.push(e);
                }
            }
        }

        outcome
    }

    async fn run_local_op(
        &self,
        op: &LocalCleanupOp,
        entity: &Entity,
        records: &dyn RecordStore,
    ) -> Result<usize, String> {
        match op {
            LocalCleanupOp::ClearInverseRefs { kind, field } => {
                let candidates = records
                    .list(kind)
                    .await
                    .map_err(|e| format!("list {}: {}", kind, e))?;
                let mut touched = 0;
                for mut record in candidates {
                    if record.properties.get(*field).and_then(Value::as_str) != Some(&entity.id) {
                        continue;
                    }
                    record.properties.remove(*field);
                    records
                        .put(record)
                        .await
                        .map_err(|e| format!("clear {} on {}: {}", field, kind, e))?;
                    touched += 1;
                }
                Ok(touched)
            }
            LocalCleanupOp::RemoveFromList { kind, field } => {
                let candidates = records
                    .list(kind)
                    .await
                    .map_err(|e| format!("list {}: {}", kind, e))?;
                let mut touched = 0;
                for mut record in candidates {
                    let Some(list) = record.properties.get_mut(*field).and_then(Value::as_array_mut)
                    else {
                        continue;
                    };
                    let before = list.len();
                    list.retain(|v| v.as_str() != Some(&entity.id));
                    if list.len() == before {
                        continue;
                    }
                    records
                        .put(record)
                        .await
                        .map_err(|e| format!("prune {} on {}: {}", field, kind, e))?;
                    touched += 1;
                }
                Ok(touched)
            }
        }
    }
}

impl Default for CascadeRuleSet {
    /// Rules for every well-known kind. Reference fields mirror
    /// [`Entity::related_ids`]: deleting a target scrubs the inverse side.
    fn default() -> Self {
        use EntityKind::*;
        let mut set = Self::empty();

        let graph_only = CascadeRule {
            graph_ops: vec![GraphCleanupOp::DeleteEntityNodes],
            local_ops: vec![],
        };

        set.register(
            Contact,
            CascadeRule {
                graph_ops: vec![GraphCleanupOp::DeleteEntityNodes],
                local_ops: vec![
                    LocalCleanupOp::ClearInverseRefs { kind: Action, field: "assignee_id" },
                    LocalCleanupOp::ClearInverseRefs { kind: Question, field: "owner_id" },
                    LocalCleanupOp::ClearInverseRefs { kind: Risk, field: "owner_id" },
                    LocalCleanupOp::RemoveFromList { kind: Team, field: "member_ids" },
                ],
            },
        );
        set.register(
            Project,
            CascadeRule {
                graph_ops: vec![
                    GraphCleanupOp::DeleteEntityNodes,
                    GraphCleanupOp::CleanupOrphanedRelationships,
                ],
                local_ops: vec![
                    LocalCleanupOp::ClearInverseRefs { kind: Action, field: "project_id" },
                    LocalCleanupOp::ClearInverseRefs { kind: Risk, field: "project_id" },
                    LocalCleanupOp::ClearInverseRefs { kind: Decision, field: "project_id" },
                    LocalCleanupOp::ClearInverseRefs { kind: UserStory, field: "project_id" },
                    LocalCleanupOp::ClearInverseRefs { kind: Document, field: "project_id" },
                ],
            },
        );
        set.register(
            Sprint,
            CascadeRule {
                graph_ops: vec![GraphCleanupOp::DeleteEntityNodes],
                local_ops: vec![
                    LocalCleanupOp::ClearInverseRefs { kind: Action, field: "sprint_id" },
                    LocalCleanupOp::ClearInverseRefs { kind: UserStory, field: "sprint_id" },
                ],
            },
        );
        set.register(
            Team,
            CascadeRule {
                graph_ops: vec![GraphCleanupOp::DeleteEntityNodes],
                local_ops: vec![
                    LocalCleanupOp::ClearInverseRefs { kind: Project, field: "team_id" },
                ],
            },
        );
        set.register(
            Action,
            CascadeRule {
                graph_ops: vec![GraphCleanupOp::DeleteEntityNodes],
                local_ops: vec![
                    LocalCleanupOp::RemoveFromList { kind: Action, field: "dependencies" },
                ],
            },
        );

        for kind in [Document, Fact, Decision, Risk, Question, Email, Meeting, UserStory, Conversation] {
            set.register(kind, graph_only.clone());
        }

        set
    }
}

//! Bulk "sync all": converge the backend's task set to a local snapshot.
//!
//! Rows are matched by `row_id`. Local rows without a remote counterpart are
//! inserted, matched rows are rewritten with the full local field set, and
//! remote rows absent locally are deleted. Positions are normalised: the i-th
//! local row is written with `sort_order = i`.

use crate::repo::{decode_rows, encode_row};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use taskgrid_core::{
    ProjectId, RowId, SessionContext, Task, TaskId, TaskInput, TaskWrite, TaskgridResult,
};
use taskgrid_storage::{Filter, RemoteStore, Table};
use tracing::{debug, info, warn};

/// The three write sets of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub inserts: Vec<TaskInput>,
    pub updates: Vec<(TaskId, TaskInput)>,
    pub deletes: Vec<TaskId>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Counts of rows written by [`BulkReconciler::reconcile_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Compute the write sets turning `remote` into `local`.
///
/// A `row_id` repeated in `local` is only honoured at its first position.
pub fn plan(local: &[TaskInput], remote: &[Task]) -> ReconcilePlan {
    let remote_by_row: HashMap<&RowId, &Task> =
        remote.iter().map(|t| (&t.row_id, t)).collect();
    let mut seen: HashSet<&RowId> = HashSet::with_capacity(local.len());
    let mut plan = ReconcilePlan::default();

    for (position, input) in local.iter().enumerate() {
        if !seen.insert(&input.row_id) {
            warn!(row_id = %input.row_id, "Duplicate row_id in local snapshot, skipping");
            continue;
        }
        let mut input = input.clone();
        input.sort_order = position as i64;
        match remote_by_row.get(&input.row_id) {
            Some(existing) => plan.updates.push((existing.id, input)),
            None => plan.inserts.push(input),
        }
    }

    plan.deletes = remote
        .iter()
        .filter(|t| !seen.contains(&t.row_id))
        .map(|t| t.id)
        .collect();
    plan
}

/// Executes reconciliations against the backend for one session.
pub struct BulkReconciler {
    store: Arc<dyn RemoteStore>,
    session: SessionContext,
}

impl BulkReconciler {
    pub fn new(store: Arc<dyn RemoteStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    /// Fetch the project's tasks and converge them to `local`.
    ///
    /// Runs one batch insert, one update per matched row, then one batch
    /// delete. Not transactional: a failure leaves earlier phases applied
    /// and is returned immediately. Running again with the same input
    /// finishes the job and is otherwise a no-op for inserts and deletes.
    pub async fn reconcile_all(
        &self,
        project_id: ProjectId,
        local: &[TaskInput],
    ) -> TaskgridResult<ReconcileReport> {
        let actor = self.session.require_user()?.id;
        let filter = Filter::new().eq("project_id", project_id.to_string());
        let remote: Vec<Task> =
            decode_rows(Table::Tasks, self.store.select(Table::Tasks, &filter).await?)?;

        let plan = plan(local, &remote);
        debug!(
            project_id = %project_id,
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            "Reconciliation planned"
        );
        let mut report = ReconcileReport::default();

        if !plan.inserts.is_empty() {
            let rows = plan
                .inserts
                .into_iter()
                .map(|input| {
                    encode_row(&TaskWrite {
                        project_id,
                        input,
                        updated_by: actor,
                    })
                })
                .collect::<TaskgridResult<Vec<_>>>()?;
            report.inserted = self.store.insert(Table::Tasks, rows).await?.len();
            debug!(project_id = %project_id, count = report.inserted, "Inserted tasks");
        }

        for (id, input) in plan.updates {
            let row = encode_row(&TaskWrite {
                project_id,
                input,
                updated_by: actor,
            })?;
            self.store.update(Table::Tasks, &id.to_string(), row).await?;
            report.updated += 1;
        }
        if report.updated > 0 {
            debug!(project_id = %project_id, count = report.updated, "Updated tasks");
        }

        if !plan.deletes.is_empty() {
            let ids: Vec<String> = plan.deletes.iter().map(ToString::to_string).collect();
            let filter = Filter::new()
                .eq("project_id", project_id.to_string())
                .in_list("id", ids);
            self.store.delete(Table::Tasks, &filter).await?;
            report.deleted = plan.deletes.len();
            debug!(project_id = %project_id, count = report.deleted, "Deleted tasks");
        }

        info!(
            project_id = %project_id,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Tasks reconciled"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgrid_test_utils::fixtures;

    #[test]
    fn test_plan_partitions_by_row_id() {
        let a_remote = fixtures::task("a", 7);
        let b_remote = fixtures::task("b", 8);
        let local = vec![TaskInput::new("a", 5), TaskInput::new("c", 9)];

        let plan = plan(&local, &[a_remote.clone(), b_remote.clone()]);

        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].row_id.as_str(), "c");
        assert_eq!(plan.inserts[0].sort_order, 1);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].0, a_remote.id);
        assert_eq!(plan.updates[0].1.sort_order, 0);
        assert_eq!(plan.deletes, vec![b_remote.id]);
    }

    #[test]
    fn test_plan_of_empty_local_deletes_everything() {
        let remote = vec![fixtures::task("a", 0), fixtures::task("b", 1)];
        let plan = plan(&[], &remote);
        assert!(plan.inserts.is_empty());
        assert!(plan.updates.is_empty());
        assert_eq!(plan.deletes.len(), 2);
    }

    #[test]
    fn test_plan_skips_duplicate_local_rows() {
        let local = vec![TaskInput::new("a", 0), TaskInput::new("a", 1)];
        let plan = plan(&local, &[]);
        assert_eq!(plan.inserts.len(), 1);
        assert!(!plan.is_noop());
    }
}

use super::{decode_row, decode_rows, encode_row, project_filter, single};
use crate::debounce::{ScheduledWrite, WriteDebouncer};
use crate::reconcile::{BulkReconciler, ReconcileReport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskgrid_core::{
    ProjectId, SessionContext, Task, TaskId, TaskInput, TaskPatch, TaskWrite, TaskgridResult,
    UserId, ValidationError,
};
use taskgrid_storage::{procedures, Filter, RemoteStore, Row, Table};
use tracing::debug;

/// Task rows of the backend.
pub struct TaskRepository {
    store: Arc<dyn RemoteStore>,
    session: SessionContext,
    debouncer: WriteDebouncer<TaskId>,
}

impl TaskRepository {
    pub fn new(store: Arc<dyn RemoteStore>, session: SessionContext) -> Self {
        Self::with_write_delay(store, session, crate::debounce::DEFAULT_WRITE_DELAY)
    }

    pub fn with_write_delay(
        store: Arc<dyn RemoteStore>,
        session: SessionContext,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            session,
            debouncer: WriteDebouncer::with_delay(delay),
        }
    }

    pub fn debouncer(&self) -> &WriteDebouncer<TaskId> {
        &self.debouncer
    }

    /// All tasks of a project, ordered by `sort_order`.
    pub async fn load(&self, project_id: ProjectId) -> TaskgridResult<Vec<Task>> {
        let filter = project_filter(project_id).order_by("sort_order", true);
        decode_rows(Table::Tasks, self.store.select(Table::Tasks, &filter).await?)
    }

    pub async fn insert(&self, project_id: ProjectId, input: TaskInput) -> TaskgridResult<Task> {
        let actor = self.session.require_user()?.id;
        let row = encode_insert(project_id, actor, input)?;
        single(Table::Tasks, self.store.insert(Table::Tasks, vec![row]).await?)
    }

    /// Insert several tasks in one call.
    pub async fn insert_many(
        &self,
        project_id: ProjectId,
        inputs: Vec<TaskInput>,
    ) -> TaskgridResult<Vec<Task>> {
        let actor = self.session.require_user()?.id;
        let rows = inputs
            .into_iter()
            .map(|input| encode_insert(project_id, actor, input))
            .collect::<TaskgridResult<Vec<_>>>()?;
        decode_rows(Table::Tasks, self.store.insert(Table::Tasks, rows).await?)
    }

    /// Write `patch` now.
    pub async fn update_immediate(&self, id: TaskId, patch: &TaskPatch) -> TaskgridResult<Task> {
        let actor = self.session.require_user()?.id;
        write_patch(self.store.as_ref(), actor, id, patch).await
    }

    /// Write `patch` after the configured delay, replacing any write still
    /// waiting for the same task. Only the last patch of a burst is sent.
    pub fn update_debounced(
        &self,
        id: TaskId,
        patch: TaskPatch,
    ) -> TaskgridResult<ScheduledWrite<Task>> {
        let actor = self.session.require_user()?.id;
        let store = Arc::clone(&self.store);
        Ok(self.debouncer.schedule_default(id, patch, move |id, patch| async move {
            write_patch(store.as_ref(), actor, id, &patch).await
        }))
    }

    pub async fn delete(&self, id: TaskId) -> TaskgridResult<()> {
        let filter = Filter::new().eq("id", id.to_string());
        self.store.delete(Table::Tasks, &filter).await
    }

    pub async fn delete_many(&self, project_id: ProjectId, ids: &[TaskId]) -> TaskgridResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let filter =
            project_filter(project_id).in_list("id", ids.iter().map(ToString::to_string));
        self.store.delete(Table::Tasks, &filter).await
    }

    /// Assign `sort_order = index` to `ordered` in one backend transaction.
    pub async fn reorder(&self, project_id: ProjectId, ordered: &[TaskId]) -> TaskgridResult<()> {
        let mut params = Row::new();
        params.insert(
            "p_project_id".to_string(),
            Value::String(project_id.to_string()),
        );
        params.insert(
            "p_task_ids".to_string(),
            Value::Array(ordered.iter().map(|id| Value::String(id.to_string())).collect()),
        );
        self.store.rpc(procedures::REORDER_TASKS, params).await?;
        debug!(project_id = %project_id, count = ordered.len(), "Tasks reordered");
        Ok(())
    }

    /// Converge the project's remote tasks to `local`.
    pub async fn sync_all(
        &self,
        project_id: ProjectId,
        local: &[TaskInput],
    ) -> TaskgridResult<ReconcileReport> {
        BulkReconciler::new(Arc::clone(&self.store), self.session.clone())
            .reconcile_all(project_id, local)
            .await
    }
}

fn encode_insert(project_id: ProjectId, actor: UserId, input: TaskInput) -> TaskgridResult<Row> {
    if input.row_id.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "row_id".to_string(),
        }
        .into());
    }
    encode_row(&TaskWrite {
        project_id,
        input,
        updated_by: actor,
    })
}

async fn write_patch(
    store: &dyn RemoteStore,
    actor: UserId,
    id: TaskId,
    patch: &TaskPatch,
) -> TaskgridResult<Task> {
    if patch.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "patch".to_string(),
            reason: "no fields to update".to_string(),
        }
        .into());
    }
    let mut row = encode_row(patch)?;
    row.insert("updated_by".to_string(), Value::String(actor.to_string()));
    let stored = store.update(Table::Tasks, &id.to_string(), row).await?;
    decode_row(Table::Tasks, stored)
}

use super::{decode_rows, encode_row, project_filter, single};
use std::sync::Arc;
use taskgrid_core::{Note, NoteWrite, ProjectId, RowId, SessionContext, TaskgridResult};
use taskgrid_storage::{RemoteStore, Table};

/// Columns identifying one note.
pub const NOTE_CONFLICT_KEY: [&str; 2] = ["project_id", "row_id"];

/// Per-task notes, one per `(project_id, row_id)`.
pub struct NoteRepository {
    store: Arc<dyn RemoteStore>,
    session: SessionContext,
}

impl NoteRepository {
    pub fn new(store: Arc<dyn RemoteStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    pub async fn load(&self, project_id: ProjectId) -> TaskgridResult<Vec<Note>> {
        let rows = self
            .store
            .select(Table::Notes, &project_filter(project_id))
            .await?;
        decode_rows(Table::Notes, rows)
    }

    pub async fn get(
        &self,
        project_id: ProjectId,
        row_id: &RowId,
    ) -> TaskgridResult<Option<Note>> {
        let filter = project_filter(project_id).eq("row_id", row_id.as_str());
        let rows = self.store.select(Table::Notes, &filter).await?;
        Ok(decode_rows(Table::Notes, rows)?.into_iter().next())
    }

    /// Create or overwrite the note of `row_id`.
    pub async fn upsert(
        &self,
        project_id: ProjectId,
        row_id: RowId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> TaskgridResult<Note> {
        let actor = self.session.require_user()?.id;
        let row = encode_row(&NoteWrite {
            project_id,
            row_id,
            title: title.into(),
            content: content.into(),
            updated_by: actor,
        })?;
        let rows = self
            .store
            .upsert(Table::Notes, vec![row], &NOTE_CONFLICT_KEY)
            .await?;
        single(Table::Notes, rows)
    }

    pub async fn delete(&self, project_id: ProjectId, row_id: &RowId) -> TaskgridResult<()> {
        let filter = project_filter(project_id).eq("row_id", row_id.as_str());
        self.store.delete(Table::Notes, &filter).await
    }
}

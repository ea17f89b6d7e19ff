use super::{decode_row, decode_rows, encode_row, project_filter, single};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use taskgrid_core::{
    Comment, CommentId, CommentWrite, ProjectId, RowId, SessionContext, TaskgridResult,
    ValidationError,
};
use taskgrid_storage::{Filter, RemoteStore, Row, Table};

/// Comments on task rows.
pub struct CommentRepository {
    store: Arc<dyn RemoteStore>,
    session: SessionContext,
}

#[derive(Deserialize)]
struct CommentFlag {
    row_id: RowId,
    #[serde(default)]
    cleared: bool,
}

impl CommentRepository {
    pub fn new(store: Arc<dyn RemoteStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    /// Every comment of a project, oldest first.
    pub async fn load(&self, project_id: ProjectId) -> TaskgridResult<Vec<Comment>> {
        let filter = project_filter(project_id).order_by("created_at", true);
        decode_rows(Table::Comments, self.store.select(Table::Comments, &filter).await?)
    }

    /// Comments of one task row, oldest first.
    pub async fn for_row(
        &self,
        project_id: ProjectId,
        row_id: &RowId,
    ) -> TaskgridResult<Vec<Comment>> {
        let filter = project_filter(project_id)
            .eq("row_id", row_id.as_str())
            .order_by("created_at", true);
        decode_rows(Table::Comments, self.store.select(Table::Comments, &filter).await?)
    }

    /// Uncleared comment count per row. Rows whose comments are all cleared
    /// are present with a count of zero.
    pub async fn open_counts(
        &self,
        project_id: ProjectId,
    ) -> TaskgridResult<HashMap<RowId, usize>> {
        let rows = self
            .store
            .select(Table::Comments, &project_filter(project_id))
            .await?;
        let flags: Vec<CommentFlag> = decode_rows(Table::Comments, rows)?;
        let mut counts: HashMap<RowId, usize> = HashMap::new();
        for flag in flags {
            let count = counts.entry(flag.row_id).or_default();
            if !flag.cleared {
                *count += 1;
            }
        }
        Ok(counts)
    }

    /// Post a comment as the signed-in user.
    pub async fn add(
        &self,
        project_id: ProjectId,
        row_id: RowId,
        body: impl Into<String>,
    ) -> TaskgridResult<Comment> {
        let user = self.session.require_user()?;
        let body = body.into();
        if body.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "body".to_string(),
            }
            .into());
        }
        let row = encode_row(&CommentWrite {
            project_id,
            row_id,
            author_id: user.id,
            author_email: user.email.clone(),
            body,
            cleared: false,
            created_at: None,
        })?;
        single(
            Table::Comments,
            self.store.insert(Table::Comments, vec![row]).await?,
        )
    }

    pub async fn set_cleared(&self, id: CommentId, cleared: bool) -> TaskgridResult<Comment> {
        let mut fields = Row::new();
        fields.insert("cleared".to_string(), Value::Bool(cleared));
        let stored = self
            .store
            .update(Table::Comments, &id.to_string(), fields)
            .await?;
        decode_row(Table::Comments, stored)
    }

    pub async fn delete(&self, id: CommentId) -> TaskgridResult<()> {
        let filter = Filter::new().eq("id", id.to_string());
        self.store.delete(Table::Comments, &filter).await
    }
}

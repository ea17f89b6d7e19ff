use super::{decode_row, decode_rows, encode_row, project_filter};
use std::sync::Arc;
use taskgrid_core::{ProjectId, ProjectSettings, SettingsPatch, TaskgridResult, ValidationError};
use taskgrid_storage::{RemoteStore, Table};

/// Per-project integration settings (one row per project, keyed by
/// `project_id`).
pub struct SettingsRepository {
    store: Arc<dyn RemoteStore>,
}

impl SettingsRepository {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, project_id: ProjectId) -> TaskgridResult<Option<ProjectSettings>> {
        let rows = self
            .store
            .select(Table::ProjectSettings, &project_filter(project_id))
            .await?;
        Ok(decode_rows(Table::ProjectSettings, rows)?.into_iter().next())
    }

    pub async fn update(
        &self,
        project_id: ProjectId,
        patch: &SettingsPatch,
    ) -> TaskgridResult<ProjectSettings> {
        let fields = encode_row(patch)?;
        if fields.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "settings".to_string(),
                reason: "no fields to update".to_string(),
            }
            .into());
        }
        let stored = self
            .store
            .update(Table::ProjectSettings, &project_id.to_string(), fields)
            .await?;
        decode_row(Table::ProjectSettings, stored)
    }
}

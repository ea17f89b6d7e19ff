use super::{decode_row, decode_rows, encode_row};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use taskgrid_core::{
    BackendError, Project, ProjectId, ProjectMember, ProjectPatch, ProjectWithRole,
    SessionContext, TaskgridResult, ValidationError,
};
use taskgrid_storage::{procedures, Filter, RemoteStore, Row, Table};
use tracing::info;

/// Projects visible to the signed-in user.
pub struct ProjectRepository {
    store: Arc<dyn RemoteStore>,
    session: SessionContext,
}

impl ProjectRepository {
    pub fn new(store: Arc<dyn RemoteStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    /// Projects the user belongs to, most recently updated first, each with
    /// the user's role.
    pub async fn list(&self) -> TaskgridResult<Vec<ProjectWithRole>> {
        let user = self.session.require_user()?;
        let memberships: Vec<ProjectMember> = decode_rows(
            Table::ProjectMembers,
            self.store
                .select(
                    Table::ProjectMembers,
                    &Filter::new().eq("user_id", user.id.to_string()),
                )
                .await?,
        )?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        let roles: HashMap<ProjectId, _> = memberships
            .iter()
            .map(|m| (m.project_id, m.role))
            .collect();

        let filter = Filter::new()
            .in_list("id", memberships.iter().map(|m| m.project_id.to_string()))
            .order_by("updated_at", false);
        let projects: Vec<Project> = decode_rows(
            Table::Projects,
            self.store.select(Table::Projects, &filter).await?,
        )?;
        Ok(projects
            .into_iter()
            .map(|project| ProjectWithRole {
                role: roles.get(&project.id).copied().unwrap_or_default(),
                project,
            })
            .collect())
    }

    pub async fn get(&self, id: ProjectId) -> TaskgridResult<Option<Project>> {
        let rows = self
            .store
            .select(Table::Projects, &Filter::new().eq("id", id.to_string()))
            .await?;
        Ok(decode_rows(Table::Projects, rows)?.into_iter().next())
    }

    /// Create a project owned by the signed-in user, together with its owner
    /// membership and empty settings.
    pub async fn create(&self, name: &str, description: &str) -> TaskgridResult<Project> {
        self.session.require_user()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            }
            .into());
        }
        let mut params = Row::new();
        params.insert("p_name".to_string(), Value::String(name.to_string()));
        params.insert(
            "p_description".to_string(),
            Value::String(description.to_string()),
        );
        let created = self.store.rpc(procedures::CREATE_PROJECT, params).await?;
        let project: Project = match created {
            Value::Object(row) => decode_row(Table::Projects, row)?,
            other => {
                return Err(BackendError::Decode {
                    what: procedures::CREATE_PROJECT.to_string(),
                    reason: format!("unexpected result {}", other),
                }
                .into())
            }
        };
        info!(project_id = %project.id, name = %project.name, "Project created");
        Ok(project)
    }

    pub async fn update(&self, id: ProjectId, patch: &ProjectPatch) -> TaskgridResult<Project> {
        let fields = encode_row(patch)?;
        let stored = self
            .store
            .update(Table::Projects, &id.to_string(), fields)
            .await?;
        decode_row(Table::Projects, stored)
    }

    /// Delete a project. Its tasks, notes, comments, members and settings go
    /// with it.
    pub async fn delete(&self, id: ProjectId) -> TaskgridResult<()> {
        self.store
            .delete(Table::Projects, &Filter::new().eq("id", id.to_string()))
            .await?;
        info!(project_id = %id, "Project deleted");
        Ok(())
    }
}

use super::{decode_row, decode_rows, encode_row, project_filter, single};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use taskgrid_core::{
    BackendError, ConflictError, MemberId, MemberRole, MemberWithProfile, Profile, ProjectId,
    ProjectMember, TaskgridError, TaskgridResult, UserId, ValidationError,
};
use taskgrid_storage::{procedures, Filter, RemoteStore, Row, Table};
use tracing::info;

/// Role given to invited members unless the caller picks another.
pub const DEFAULT_INVITE_ROLE: MemberRole = MemberRole::Editor;

#[derive(Serialize)]
struct MemberWrite {
    project_id: ProjectId,
    user_id: UserId,
    role: MemberRole,
}

/// Project membership rows.
pub struct MemberRepository {
    store: Arc<dyn RemoteStore>,
}

impl MemberRepository {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Members of a project with their profiles, oldest membership first.
    pub async fn list(&self, project_id: ProjectId) -> TaskgridResult<Vec<MemberWithProfile>> {
        let filter = project_filter(project_id).order_by("created_at", true);
        let members: Vec<ProjectMember> = decode_rows(
            Table::ProjectMembers,
            self.store.select(Table::ProjectMembers, &filter).await?,
        )?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let ids = members.iter().map(|m| m.user_id.to_string());
        let profiles: Vec<Profile> = decode_rows(
            Table::Profiles,
            self.store
                .select(Table::Profiles, &Filter::new().in_list("id", ids))
                .await?,
        )?;
        let mut by_id: HashMap<UserId, Profile> =
            profiles.into_iter().map(|p| (p.id, p)).collect();

        Ok(members
            .into_iter()
            .map(|member| {
                let profile = by_id.remove(&member.user_id);
                MemberWithProfile { member, profile }
            })
            .collect())
    }

    /// Role of `user_id` in the project, if they are a member.
    pub async fn role_of(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> TaskgridResult<Option<MemberRole>> {
        let filter = project_filter(project_id).eq("user_id", user_id.to_string());
        let members: Vec<ProjectMember> = decode_rows(
            Table::ProjectMembers,
            self.store.select(Table::ProjectMembers, &filter).await?,
        )?;
        Ok(members.first().map(|m| m.role))
    }

    /// Invite a registered user by email.
    ///
    /// Fails with `ConflictError::UnknownUser` when nobody has signed up with
    /// that address and `ConflictError::DuplicateMember` when they already
    /// belong to the project.
    pub async fn add_by_email(
        &self,
        project_id: ProjectId,
        email: &str,
        role: MemberRole,
    ) -> TaskgridResult<ProjectMember> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "email".to_string(),
            }
            .into());
        }

        let mut params = Row::new();
        params.insert("p_email".to_string(), Value::String(email.to_string()));
        let found = self.store.rpc(procedures::FIND_USER_BY_EMAIL, params).await?;
        let first = match found {
            Value::Array(rows) => rows.into_iter().next(),
            Value::Null => None,
            other => {
                return Err(BackendError::Decode {
                    what: procedures::FIND_USER_BY_EMAIL.to_string(),
                    reason: format!("unexpected result {}", other),
                }
                .into())
            }
        };
        let user_id = match first {
            Some(Value::Object(row)) => decode_row::<Profile>(Table::Profiles, row)?.id,
            _ => {
                return Err(ConflictError::UnknownUser {
                    email: email.to_string(),
                }
                .into())
            }
        };

        let row = encode_row(&MemberWrite {
            project_id,
            user_id,
            role,
        })?;
        let rows = self
            .store
            .insert(Table::ProjectMembers, vec![row])
            .await
            .map_err(|err| match err {
                TaskgridError::Conflict(ConflictError::UniqueViolation { .. }) => {
                    ConflictError::DuplicateMember.into()
                }
                other => other,
            })?;
        let member: ProjectMember = single(Table::ProjectMembers, rows)?;
        info!(project_id = %project_id, user_id = %user_id, role = role.as_str(), "Member added");
        Ok(member)
    }

    pub async fn update_role(
        &self,
        id: MemberId,
        role: MemberRole,
    ) -> TaskgridResult<ProjectMember> {
        let mut fields = Row::new();
        fields.insert("role".to_string(), Value::String(role.as_str().to_string()));
        let stored = self
            .store
            .update(Table::ProjectMembers, &id.to_string(), fields)
            .await?;
        decode_row(Table::ProjectMembers, stored)
    }

    pub async fn remove(&self, id: MemberId) -> TaskgridResult<()> {
        let filter = Filter::new().eq("id", id.to_string());
        self.store.delete(Table::ProjectMembers, &filter).await
    }
}

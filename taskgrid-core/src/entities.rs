//! Core entity structures

use crate::{
    CommentId, FieldMerge, MemberId, NoteField, NoteId, ProjectId, RowId, TaskField, TaskId,
    Timestamp, UserId,
};
use crate::identity::EntityIdType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Status assigned to tasks that were created without one ("not started").
pub const DEFAULT_TASK_STATUS: &str = "未着手";

fn default_status() -> String {
    DEFAULT_TASK_STATUS.to_string()
}

/// Row-level behaviour shared by every synchronised entity.
pub trait Record {
    type Id: EntityIdType;

    /// Server-assigned identifier.
    fn id(&self) -> Self::Id;

    /// Caller-assigned logical key.
    fn row_id(&self) -> &RowId;

    /// Actor that produced the current version of the row, if tracked.
    fn updated_by(&self) -> Option<UserId>;
}

// ============================================================================
// TASKS
// ============================================================================

/// A task row. Tasks of a project form a strict total order by `sort_order`;
/// `level` is the outline depth used only for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub row_id: RowId,
    pub sort_order: i64,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub manager: String,
    #[serde(default)]
    pub ball: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub updated_by: Option<UserId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Task {
    /// Project the editable column set of this task.
    pub fn to_input(&self) -> TaskInput {
        TaskInput {
            row_id: self.row_id.clone(),
            sort_order: self.sort_order,
            level: self.level,
            collapsed: self.collapsed,
            text: self.text.clone(),
            status: self.status.clone(),
            progress: self.progress,
            manager: self.manager.clone(),
            ball: self.ball.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
        }
    }
}

impl Record for Task {
    type Id = TaskId;

    fn id(&self) -> TaskId {
        self.id
    }

    fn row_id(&self) -> &RowId {
        &self.row_id
    }

    fn updated_by(&self) -> Option<UserId> {
        self.updated_by
    }
}

impl FieldMerge for Task {
    type Field = TaskField;

    fn merge_from(&mut self, incoming: &Self, pending: &HashSet<TaskField>) {
        let keep = |field: TaskField| pending.contains(&field);

        self.id = incoming.id;
        self.project_id = incoming.project_id;
        self.row_id = incoming.row_id.clone();
        self.updated_by = incoming.updated_by;
        self.created_at = incoming.created_at;
        self.updated_at = incoming.updated_at;

        if !keep(TaskField::SortOrder) {
            self.sort_order = incoming.sort_order;
        }
        if !keep(TaskField::Level) {
            self.level = incoming.level;
        }
        if !keep(TaskField::Collapsed) {
            self.collapsed = incoming.collapsed;
        }
        if !keep(TaskField::Text) {
            self.text.clone_from(&incoming.text);
        }
        if !keep(TaskField::Status) {
            self.status.clone_from(&incoming.status);
        }
        if !keep(TaskField::Progress) {
            self.progress = incoming.progress;
        }
        if !keep(TaskField::Manager) {
            self.manager.clone_from(&incoming.manager);
        }
        if !keep(TaskField::Ball) {
            self.ball.clone_from(&incoming.ball);
        }
        if !keep(TaskField::StartDate) {
            self.start_date.clone_from(&incoming.start_date);
        }
        if !keep(TaskField::EndDate) {
            self.end_date.clone_from(&incoming.end_date);
        }
    }
}

/// Editable column set of a task, as written on insert and full-row update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub row_id: RowId,
    pub sort_order: i64,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub manager: String,
    #[serde(default)]
    pub ball: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
}

impl TaskInput {
    /// A blank task at the given position.
    pub fn new(row_id: impl Into<RowId>, sort_order: i64) -> Self {
        Self {
            row_id: row_id.into(),
            sort_order,
            level: 0,
            collapsed: false,
            text: String::new(),
            status: default_status(),
            progress: 0,
            manager: String::new(),
            ball: String::new(),
            start_date: String::new(),
            end_date: String::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

/// Wire shape of a task insert or full update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskWrite {
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub input: TaskInput,
    pub updated_by: UserId,
}

/// Partial task update. Only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ball: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    /// Fields carried by this patch.
    pub fn touched_fields(&self) -> Vec<TaskField> {
        let mut fields = Vec::new();
        if self.sort_order.is_some() {
            fields.push(TaskField::SortOrder);
        }
        if self.level.is_some() {
            fields.push(TaskField::Level);
        }
        if self.collapsed.is_some() {
            fields.push(TaskField::Collapsed);
        }
        if self.text.is_some() {
            fields.push(TaskField::Text);
        }
        if self.status.is_some() {
            fields.push(TaskField::Status);
        }
        if self.progress.is_some() {
            fields.push(TaskField::Progress);
        }
        if self.manager.is_some() {
            fields.push(TaskField::Manager);
        }
        if self.ball.is_some() {
            fields.push(TaskField::Ball);
        }
        if self.start_date.is_some() {
            fields.push(TaskField::StartDate);
        }
        if self.end_date.is_some() {
            fields.push(TaskField::EndDate);
        }
        fields
    }

    /// Apply the patch to a local task (optimistic local write).
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(sort_order) = self.sort_order {
            task.sort_order = sort_order;
        }
        if let Some(level) = self.level {
            task.level = level;
        }
        if let Some(collapsed) = self.collapsed {
            task.collapsed = collapsed;
        }
        if let Some(text) = &self.text {
            task.text.clone_from(text);
        }
        if let Some(status) = &self.status {
            task.status.clone_from(status);
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(manager) = &self.manager {
            task.manager.clone_from(manager);
        }
        if let Some(ball) = &self.ball {
            task.ball.clone_from(ball);
        }
        if let Some(start_date) = &self.start_date {
            task.start_date.clone_from(start_date);
        }
        if let Some(end_date) = &self.end_date {
            task.end_date.clone_from(end_date);
        }
    }

    /// A patch carrying the current value of each of `fields` in `task`.
    pub fn from_fields<'a>(task: &Task, fields: impl IntoIterator<Item = &'a TaskField>) -> Self {
        let mut patch = TaskPatch::default();
        for field in fields {
            match field {
                TaskField::SortOrder => patch.sort_order = Some(task.sort_order),
                TaskField::Level => patch.level = Some(task.level),
                TaskField::Collapsed => patch.collapsed = Some(task.collapsed),
                TaskField::Text => patch.text = Some(task.text.clone()),
                TaskField::Status => patch.status = Some(task.status.clone()),
                TaskField::Progress => patch.progress = Some(task.progress),
                TaskField::Manager => patch.manager = Some(task.manager.clone()),
                TaskField::Ball => patch.ball = Some(task.ball.clone()),
                TaskField::StartDate => patch.start_date = Some(task.start_date.clone()),
                TaskField::EndDate => patch.end_date = Some(task.end_date.clone()),
            }
        }
        patch
    }
}

// ============================================================================
// NOTES & COMMENTS
// ============================================================================

/// A free-form note attached to a task row. Unique per `(project_id, row_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub project_id: ProjectId,
    pub row_id: RowId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub updated_by: Option<UserId>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Record for Note {
    type Id = NoteId;

    fn id(&self) -> NoteId {
        self.id
    }

    fn row_id(&self) -> &RowId {
        &self.row_id
    }

    fn updated_by(&self) -> Option<UserId> {
        self.updated_by
    }
}

impl FieldMerge for Note {
    type Field = NoteField;

    fn merge_from(&mut self, incoming: &Self, pending: &HashSet<NoteField>) {
        self.id = incoming.id;
        self.project_id = incoming.project_id;
        self.row_id = incoming.row_id.clone();
        self.updated_by = incoming.updated_by;
        self.updated_at = incoming.updated_at;
        if !pending.contains(&NoteField::Title) {
            self.title.clone_from(&incoming.title);
        }
        if !pending.contains(&NoteField::Content) {
            self.content.clone_from(&incoming.content);
        }
    }
}

/// Wire shape of a note upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteWrite {
    pub project_id: ProjectId,
    pub row_id: RowId,
    pub title: String,
    pub content: String,
    pub updated_by: UserId,
}

/// A comment on a task row. Comments carry no `updated_by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub project_id: ProjectId,
    pub row_id: RowId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub cleared: bool,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl Record for Comment {
    type Id = CommentId;

    fn id(&self) -> CommentId {
        self.id
    }

    fn row_id(&self) -> &RowId {
        &self.row_id
    }

    fn updated_by(&self) -> Option<UserId> {
        None
    }
}

/// Wire shape of a comment insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentWrite {
    pub project_id: ProjectId,
    pub row_id: RowId,
    pub author_id: UserId,
    pub author_email: String,
    pub body: String,
    pub cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

// ============================================================================
// PROJECTS, MEMBERS, SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// A project as listed for the signed-in user, with their role in it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectWithRole {
    pub project: Project,
    pub role: MemberRole,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Editor,
    #[default]
    Viewer,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Editor => "editor",
            MemberRole::Viewer => "viewer",
        }
    }

    pub fn can_edit(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Editor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub id: MemberId,
    pub project_id: ProjectId,
    pub user_id: UserId,
    #[serde(default)]
    pub role: MemberRole,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Public profile of a registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A membership joined with the member's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberWithProfile {
    pub member: ProjectMember,
    pub profile: Option<Profile>,
}

/// Per-project integration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub project_id: ProjectId,
    #[serde(default)]
    pub chatwork_room_id: Option<String>,
    #[serde(default)]
    pub chatwork_api_token: Option<String>,
}

impl ProjectSettings {
    /// Whether outbound chat notifications have a destination.
    pub fn is_notify_configured(&self) -> bool {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        };
        present(&self.chatwork_room_id) && present(&self.chatwork_api_token)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chatwork_room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chatwork_api_token: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================

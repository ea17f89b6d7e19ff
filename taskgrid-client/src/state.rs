//! Local state of the open project.
//!
//! Owned by the event loop and only ever touched from it, so nothing here
//! locks. Remote changes arrive as `ProjectEvent`s; local edits are staged
//! here before the caller hands them to the repositories.

use crate::notifications::{Notification, NotificationAction, NotificationLevel};
use std::collections::{HashMap, VecDeque};
use taskgrid_core::{
    BackendError, Comment, FieldMerge, Note, NoteField, ProjectId, RowId, SessionContext, Task,
    TaskField, TaskId, TaskPatch, TaskgridResult, ValidationError,
};
use taskgrid_storage::{online_users, ChannelStatus, ChannelTopic, PresenceState};
use taskgrid_sync::{
    ChangeDispatcher, CommentList, NoteCache, PendingEditTracker, ProjectEvent, RenderEvent,
    TaskList,
};
use tracing::{debug, info, warn};

/// A render event of any collection, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Task(RenderEvent<Task>),
    Note(RenderEvent<Note>),
    Comment(RenderEvent<Comment>),
}

pub struct ProjectWorkspace {
    project_id: ProjectId,
    dispatcher: ChangeDispatcher,
    pub tasks: TaskList,
    pub notes: NoteCache,
    pub comments: CommentList,
    task_edits: PendingEditTracker<TaskField>,
    note_edits: PendingEditTracker<NoteField>,
    pub presence: PresenceState,
    pub channels: HashMap<ChannelTopic, ChannelStatus>,
    pub notifications: Vec<Notification>,
    rendered: VecDeque<Rendered>,
    pub updates_paused: bool,
    event_queue: VecDeque<ProjectEvent>,
}

impl ProjectWorkspace {
    pub fn new(project_id: ProjectId, session: SessionContext) -> Self {
        Self {
            project_id,
            dispatcher: ChangeDispatcher::new(session),
            tasks: TaskList::new(),
            notes: NoteCache::new(),
            comments: CommentList::new(),
            task_edits: PendingEditTracker::new(),
            note_edits: PendingEditTracker::new(),
            presence: PresenceState::new(),
            channels: HashMap::new(),
            notifications: Vec::new(),
            rendered: VecDeque::new(),
            updates_paused: false,
            event_queue: VecDeque::new(),
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Replace every collection after a full load.
    pub fn load(&mut self, tasks: Vec<Task>, notes: Vec<Note>, comments: Vec<Comment>) {
        self.tasks.replace_all(tasks);
        self.notes = NoteCache::from_notes(notes);
        self.comments = CommentList::from_comments(comments);
        info!(
            project_id = %self.project_id,
            tasks = self.tasks.len(),
            notes = self.notes.len(),
            comments = self.comments.len(),
            "Workspace loaded"
        );
    }

    pub fn notify(&mut self, level: NotificationLevel, message: impl Into<String>) {
        self.notifications.push(Notification::new(level, message));
    }

    /// Render events produced since the last call.
    pub fn drain_rendered(&mut self) -> Vec<Rendered> {
        self.rendered.drain(..).collect()
    }

    // ------------------------------------------------------------------------
    // Remote events
    // ------------------------------------------------------------------------

    pub fn enqueue_event(&mut self, event: ProjectEvent) {
        if self.updates_paused {
            self.event_queue.push_back(event);
        } else {
            self.apply_event(event);
        }
    }

    pub fn flush_queued_events(&mut self) {
        while let Some(event) = self.event_queue.pop_front() {
            self.apply_event(event);
        }
    }

    pub fn queued_len(&self) -> usize {
        self.event_queue.len()
    }

    fn apply_event(&mut self, event: ProjectEvent) {
        if event.project_id() != self.project_id {
            debug!(project_id = %event.project_id(), "Dropping event of another project");
            return;
        }
        match event {
            ProjectEvent::TaskChange { change, .. } => match change.decode::<Task>() {
                Ok(event) => {
                    let rendered = &mut self.rendered;
                    let mut sink = |e| rendered.push_back(Rendered::Task(e));
                    self.dispatcher
                        .apply_task_change(&mut self.tasks, &self.task_edits, event, &mut sink);
                }
                Err(err) => warn!(error = %err, "Skipping malformed change"),
            },
            ProjectEvent::NoteChange { change, .. } => match change.decode::<Note>() {
                Ok(event) => {
                    let rendered = &mut self.rendered;
                    let mut sink = |e| rendered.push_back(Rendered::Note(e));
                    self.dispatcher
                        .apply_note_change(&mut self.notes, &self.note_edits, event, &mut sink);
                }
                Err(err) => warn!(error = %err, "Skipping malformed change"),
            },
            ProjectEvent::CommentChange { change, .. } => match change.decode::<Comment>() {
                Ok(event) => {
                    let rendered = &mut self.rendered;
                    let mut sink = |e| rendered.push_back(Rendered::Comment(e));
                    self.dispatcher
                        .apply_comment_change(&mut self.comments, event, &mut sink);
                }
                Err(err) => warn!(error = %err, "Skipping malformed change"),
            },
            ProjectEvent::PresenceSync { state, .. } => {
                self.presence = state;
                debug!(online = online_users(&self.presence).len(), "Presence synced");
            }
            ProjectEvent::ChannelStatus { topic, status, .. } => {
                self.record_status(topic, status);
            }
        }
    }

    fn record_status(&mut self, topic: ChannelTopic, status: ChannelStatus) {
        let previous = self.channels.insert(topic.clone(), status.clone());
        match status {
            ChannelStatus::Error(reason) => {
                warn!(%topic, reason = %reason, "Channel error");
                if !matches!(previous, Some(ChannelStatus::Error(_))) {
                    self.notifications.push(
                        Notification::new(
                            NotificationLevel::Warning,
                            format!("Live updates for {} interrupted: {}", topic, reason),
                        )
                        .with_action(NotificationAction::Reconnect),
                    );
                }
            }
            ChannelStatus::Subscribed => {
                if matches!(previous, Some(ChannelStatus::Error(_))) {
                    self.notify(
                        NotificationLevel::Info,
                        format!("Live updates for {} restored", topic),
                    );
                }
                debug!(%topic, "Channel subscribed");
            }
            ChannelStatus::Closed => debug!(%topic, "Channel closed"),
        }
    }

    /// Display names of connected users, one per connection.
    pub fn online(&self) -> Vec<String> {
        online_users(&self.presence)
            .into_iter()
            .map(|meta| meta.display_name.clone())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------------

    /// Apply `patch` locally and mark its fields as being edited. Returns
    /// the task id and the patch to write: the current value of every field
    /// still pending on the row, so a debounced write that replaces an
    /// earlier one carries both edits.
    pub fn stage_task_edit(
        &mut self,
        row_id: &RowId,
        patch: &TaskPatch,
    ) -> TaskgridResult<(TaskId, TaskPatch)> {
        if patch.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "patch".to_string(),
            }
            .into());
        }
        let id = self
            .tasks
            .find_by_row_id(row_id)
            .map(|task| task.id)
            .ok_or_else(|| BackendError::NotFound {
                table: "tasks".to_string(),
                id: row_id.to_string(),
            })?;
        for field in patch.touched_fields() {
            self.task_edits.mark(row_id, field);
        }
        let task = self
            .tasks
            .update_with(id, |task| patch.apply_to(task))
            .ok_or_else(|| BackendError::NotFound {
                table: "tasks".to_string(),
                id: id.to_string(),
            })?;
        let pending = self
            .task_edits
            .pending_fields(row_id)
            .map(|fields| TaskPatch::from_fields(task, fields))
            .unwrap_or_default();
        Ok((id, pending))
    }

    /// Settle a task write. Fields are released only when no newer write for
    /// the task is waiting; a failure is reported and the local value kept.
    pub fn finish_task_write(
        &mut self,
        task_id: TaskId,
        fields: &[TaskField],
        newer_write_scheduled: bool,
        outcome: TaskgridResult<Task>,
    ) {
        let Some(row_id) = self.tasks.get(task_id).map(|task| task.row_id.clone()) else {
            debug!(task_id = %task_id, "Write settled for a task no longer loaded");
            return;
        };
        if !newer_write_scheduled {
            for field in fields {
                self.task_edits.clear(&row_id, *field);
            }
        }
        match outcome {
            Ok(task) => debug!(task_id = %task.id, "Task saved"),
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Task write failed");
                self.notifications.push(
                    Notification::new(
                        NotificationLevel::Error,
                        format!("Saving row {} failed: {}", row_id, err),
                    )
                    .with_action(NotificationAction::Retry),
                );
            }
        }
    }

    /// Apply a note field locally and mark it. Returns the full `(title,
    /// content)` to upsert.
    pub fn stage_note_edit(
        &mut self,
        row_id: &RowId,
        field: NoteField,
        value: &str,
    ) -> (String, String) {
        self.note_edits.mark(row_id, field);
        let (mut title, mut content) = self
            .notes
            .get(row_id)
            .map(|note| (note.title.clone(), note.content.clone()))
            .unwrap_or_default();
        match field {
            NoteField::Title => title = value.to_string(),
            NoteField::Content => content = value.to_string(),
        }
        if let Some(note) = self.notes.get_mut(row_id) {
            note.title.clone_from(&title);
            note.content.clone_from(&content);
        }
        (title, content)
    }

    /// Settle a note write: release the field and keep the stored row, so a
    /// newly created note gets its server id.
    pub fn finish_note_write(
        &mut self,
        row_id: &RowId,
        field: NoteField,
        outcome: TaskgridResult<Note>,
    ) {
        self.note_edits.clear(row_id, field);
        match outcome {
            Ok(stored) => {
                let pending = self
                    .note_edits
                    .pending_fields(row_id)
                    .cloned()
                    .unwrap_or_default();
                match self.notes.get_mut(row_id) {
                    Some(local) => local.merge_from(&stored, &pending),
                    None => {
                        self.notes.upsert(stored);
                    }
                }
            }
            Err(err) => {
                warn!(%row_id, error = %err, "Note write failed");
                self.notifications.push(
                    Notification::new(
                        NotificationLevel::Error,
                        format!("Saving note {} failed: {}", row_id, err),
                    )
                    .with_action(NotificationAction::Retry),
                );
            }
        }
    }

    pub fn is_task_field_pending(&self, row_id: &RowId, field: TaskField) -> bool {
        self.task_edits.is_field_pending(row_id, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskgrid_core::{ChangeKind, CurrentUser, EntityIdType, UserId};
    use taskgrid_storage::{PresenceMeta, RawChange, Row, Table};
    use taskgrid_sync::RenderKind;
    use taskgrid_test_utils::{fixture_project, fixtures};

    fn me() -> CurrentUser {
        CurrentUser::new(UserId::now_v7(), "me@example.com")
    }

    fn workspace_with(tasks: Vec<Task>) -> (ProjectWorkspace, CurrentUser) {
        let user = me();
        let mut workspace =
            ProjectWorkspace::new(fixture_project(), SessionContext::signed_in(user.clone()));
        workspace.load(tasks, Vec::new(), Vec::new());
        (workspace, user)
    }

    fn task_change(kind: ChangeKind, new: &Task) -> ProjectEvent {
        ProjectEvent::TaskChange {
            project_id: fixture_project(),
            change: RawChange::new(Table::Tasks, kind, Some(fixtures::to_row(new)), None),
        }
    }

    #[test]
    fn test_peer_insert_renders_and_sorts() {
        let (mut workspace, _) = workspace_with(vec![fixtures::task("a", 0), fixtures::task("c", 2)]);
        let mut peer = fixtures::task("b", 1);
        peer.updated_by = Some(UserId::now_v7());
        workspace.enqueue_event(task_change(ChangeKind::Insert, &peer));

        let rows: Vec<_> = workspace.tasks.iter().map(|t| t.row_id.to_string()).collect();
        assert_eq!(rows, vec!["a", "b", "c"]);
        let rendered = workspace.drain_rendered();
        assert_eq!(rendered.len(), 1);
        assert!(matches!(&rendered[0], Rendered::Task(e) if e.kind == RenderKind::Insert));
        assert!(workspace.drain_rendered().is_empty());
    }

    #[test]
    fn test_own_echo_is_ignored() {
        let (mut workspace, user) = workspace_with(Vec::new());
        let mut own = fixtures::task("a", 0);
        own.updated_by = Some(user.id);
        workspace.enqueue_event(task_change(ChangeKind::Insert, &own));
        assert!(workspace.tasks.is_empty());
        assert!(workspace.drain_rendered().is_empty());
    }

    #[test]
    fn test_paused_updates_queue_until_flushed() {
        let (mut workspace, _) = workspace_with(Vec::new());
        workspace.updates_paused = true;
        workspace.enqueue_event(task_change(ChangeKind::Insert, &fixtures::task("a", 0)));
        assert!(workspace.tasks.is_empty());
        assert_eq!(workspace.queued_len(), 1);

        workspace.updates_paused = false;
        workspace.flush_queued_events();
        assert_eq!(workspace.tasks.len(), 1);
        assert_eq!(workspace.queued_len(), 0);
    }

    #[test]
    fn test_malformed_change_is_skipped() {
        let (mut workspace, _) = workspace_with(vec![fixtures::task("a", 0)]);
        let mut bad = Row::new();
        bad.insert("id".to_string(), serde_json::json!(42));
        workspace.enqueue_event(ProjectEvent::TaskChange {
            project_id: fixture_project(),
            change: RawChange::new(Table::Tasks, ChangeKind::Update, Some(bad), None),
        });
        assert_eq!(workspace.tasks.len(), 1);
        assert!(workspace.drain_rendered().is_empty());
    }

    #[test]
    fn test_events_of_other_projects_are_dropped() {
        let (mut workspace, _) = workspace_with(Vec::new());
        let other = ProjectId::now_v7();
        workspace.enqueue_event(ProjectEvent::TaskChange {
            project_id: other,
            change: RawChange::new(
                Table::Tasks,
                ChangeKind::Insert,
                Some(fixtures::to_row(&fixtures::task_in(other, "a", 0))),
                None,
            ),
        });
        assert!(workspace.tasks.is_empty());
    }

    #[test]
    fn test_staged_edit_survives_peer_update_until_written() {
        let local = fixtures::task("a", 0);
        let (mut workspace, _) = workspace_with(vec![local.clone()]);
        let patch = TaskPatch {
            text: Some("typing".to_string()),
            ..TaskPatch::default()
        };
        let (id, to_write) = workspace.stage_task_edit(&local.row_id, &patch).unwrap();
        assert_eq!(id, local.id);
        assert_eq!(to_write.text.as_deref(), Some("typing"));

        let mut peer = local.clone();
        peer.text = "peer text".to_string();
        peer.status = "完了".to_string();
        peer.updated_by = Some(UserId::now_v7());
        workspace.enqueue_event(task_change(ChangeKind::Update, &peer));

        let stored = workspace.tasks.get(id).cloned().unwrap();
        assert_eq!(stored.text, "typing");
        assert_eq!(stored.status, "完了");

        workspace.finish_task_write(id, &[TaskField::Text], false, Ok(stored));
        assert!(!workspace.is_task_field_pending(&local.row_id, TaskField::Text));
    }

    #[test]
    fn test_second_edit_carries_both_fields() {
        let local = fixtures::task("a", 0);
        let (mut workspace, _) = workspace_with(vec![local.clone()]);
        let first = TaskPatch {
            text: Some("x".to_string()),
            ..TaskPatch::default()
        };
        let second = TaskPatch {
            progress: Some(50),
            ..TaskPatch::default()
        };
        workspace.stage_task_edit(&local.row_id, &first).unwrap();
        let (_, to_write) = workspace.stage_task_edit(&local.row_id, &second).unwrap();
        assert_eq!(to_write.text.as_deref(), Some("x"));
        assert_eq!(to_write.progress, Some(50));
    }

    #[test]
    fn test_failed_write_keeps_pending_while_newer_scheduled_and_notifies() {
        let local = fixtures::task("a", 0);
        let (mut workspace, _) = workspace_with(vec![local.clone()]);
        let patch = TaskPatch {
            status: Some("進行中".to_string()),
            ..TaskPatch::default()
        };
        let (id, _) = workspace.stage_task_edit(&local.row_id, &patch).unwrap();
        workspace.finish_task_write(
            id,
            &[TaskField::Status],
            true,
            Err(BackendError::Unavailable {
                reason: "offline".to_string(),
            }
            .into()),
        );
        assert!(workspace.is_task_field_pending(&local.row_id, TaskField::Status));
        assert_eq!(workspace.notifications.len(), 1);
        assert_eq!(
            workspace.notifications[0].action,
            Some(NotificationAction::Retry)
        );
    }

    #[test]
    fn test_stage_rejects_empty_patch_and_unknown_row() {
        let (mut workspace, _) = workspace_with(vec![fixtures::task("a", 0)]);
        assert!(workspace
            .stage_task_edit(&RowId::new("a"), &TaskPatch::default())
            .is_err());
        let patch = TaskPatch {
            level: Some(1),
            ..TaskPatch::default()
        };
        assert!(workspace.stage_task_edit(&RowId::new("zz"), &patch).is_err());
    }

    #[test]
    fn test_note_write_stores_server_row() {
        let (mut workspace, _) = workspace_with(Vec::new());
        let row = RowId::new("a");
        let (title, content) = workspace.stage_note_edit(&row, NoteField::Content, "hello");
        assert_eq!((title.as_str(), content.as_str()), ("", "hello"));

        let mut stored = fixtures::note("a", "");
        stored.content = "hello".to_string();
        workspace.finish_note_write(&row, NoteField::Content, Ok(stored.clone()));
        assert_eq!(workspace.notes.get(&row), Some(&stored));
    }

    #[test]
    fn test_channel_error_then_recovery_notifies_once_each() {
        let (mut workspace, _) = workspace_with(Vec::new());
        let topic = ChannelTopic::Presence {
            project_id: fixture_project(),
        };
        let status = |status| ProjectEvent::ChannelStatus {
            project_id: fixture_project(),
            topic: topic.clone(),
            status,
        };
        workspace.enqueue_event(status(ChannelStatus::Subscribed));
        workspace.enqueue_event(status(ChannelStatus::Error("disconnected".to_string())));
        workspace.enqueue_event(status(ChannelStatus::Error("disconnected".to_string())));
        workspace.enqueue_event(status(ChannelStatus::Subscribed));

        let levels: Vec<_> = workspace.notifications.iter().map(|n| n.level).collect();
        assert_eq!(levels, vec![NotificationLevel::Warning, NotificationLevel::Info]);
    }

    #[test]
    fn test_presence_sync_lists_online_users() {
        let (mut workspace, user) = workspace_with(Vec::new());
        let mut state = PresenceState::new();
        state.insert(
            "k1".to_string(),
            vec![PresenceMeta::for_user(&user, Utc::now())],
        );
        workspace.enqueue_event(ProjectEvent::PresenceSync {
            project_id: fixture_project(),
            state,
        });
        assert_eq!(workspace.online(), vec!["me@example.com".to_string()]);
    }
}

//! The client event loop's owner: repositories, subscriptions and the open
//! project's workspace, driven one `ClientEvent` at a time.

use crate::commands::{task_patch, Command};
use crate::events::ClientEvent;
use crate::notifications::NotificationLevel;
use crate::state::{ProjectWorkspace, Rendered};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use taskgrid_core::{
    NoteField, ProjectId, RowId, SessionContext, TaskField, TaskId, TaskInput, TaskgridResult,
    ValidationError,
};
use taskgrid_storage::{ChangeFeed, RemoteStore};
use taskgrid_sync::{
    CommentRepository, LegacyImporter, NoteRepository, Notifier, NotifyOutcome, ProjectEvent,
    ProjectRepository, SubscriptionManager, TaskRepository,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ClientApp {
    projects: ProjectRepository,
    tasks: TaskRepository,
    notes: NoteRepository,
    comments: CommentRepository,
    importer: LegacyImporter,
    notifier: Arc<dyn Notifier>,
    subscriptions: SubscriptionManager,
    events: mpsc::UnboundedSender<ClientEvent>,
    project_events: mpsc::UnboundedSender<ProjectEvent>,
    /// Waiter of the write each task has waiting on its timer.
    write_waiters: HashMap<TaskId, JoinHandle<()>>,
    /// Waiters of writes already sent; they always report back.
    settling: Vec<JoinHandle<()>>,
    workspace: Option<ProjectWorkspace>,
    notices_logged: usize,
    session: SessionContext,
}

impl ClientApp {
    /// Build the app and start forwarding project events onto `events`.
    /// Must be called inside a tokio runtime.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        notifier: Arc<dyn Notifier>,
        session: SessionContext,
        write_delay: Duration,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let (project_events, mut project_rx) = mpsc::unbounded_channel();
        let forward = events.clone();
        tokio::spawn(async move {
            while let Some(event) = project_rx.recv().await {
                if forward.send(ClientEvent::Project(event)).is_err() {
                    break;
                }
            }
        });

        Self {
            projects: ProjectRepository::new(Arc::clone(&store), session.clone()),
            tasks: TaskRepository::with_write_delay(Arc::clone(&store), session.clone(), write_delay),
            notes: NoteRepository::new(Arc::clone(&store), session.clone()),
            comments: CommentRepository::new(Arc::clone(&store), session.clone()),
            importer: LegacyImporter::new(store, session.clone()),
            notifier,
            subscriptions: SubscriptionManager::new(feed, session.clone()),
            events,
            project_events,
            write_waiters: HashMap::new(),
            settling: Vec::new(),
            workspace: None,
            notices_logged: 0,
            session,
        }
    }

    pub fn workspace(&self) -> Option<&ProjectWorkspace> {
        self.workspace.as_ref()
    }

    pub fn workspace_mut(&mut self) -> Option<&mut ProjectWorkspace> {
        self.workspace.as_mut()
    }

    /// `preferred` when the user still belongs to it, else the most
    /// recently updated project.
    pub async fn choose_project(
        &self,
        preferred: Option<ProjectId>,
    ) -> TaskgridResult<Option<ProjectId>> {
        let projects = self.projects.list().await?;
        let preferred = preferred.filter(|id| projects.iter().any(|p| p.project.id == *id));
        Ok(preferred.or_else(|| projects.first().map(|p| p.project.id)))
    }

    /// Subscribe to `project_id`, then load its rows. Changes racing the
    /// load are queued and re-applied idempotently afterwards.
    pub async fn open_project(&mut self, project_id: ProjectId) -> TaskgridResult<()> {
        self.abort_write_waiters();
        self.subscriptions
            .subscribe_to_project(project_id, self.project_events.clone())
            .await?;

        let (tasks, notes, comments) = tokio::try_join!(
            self.tasks.load(project_id),
            self.notes.load(project_id),
            self.comments.load(project_id),
        )?;
        let mut workspace = ProjectWorkspace::new(project_id, self.session.clone());
        workspace.load(tasks, notes, comments);
        self.workspace = Some(workspace);
        self.notices_logged = 0;
        info!(project_id = %project_id, "Project opened");
        Ok(())
    }

    /// Handle one event. Returns false when the loop should stop.
    pub async fn handle(&mut self, event: ClientEvent) -> bool {
        match event {
            ClientEvent::Project(event) => {
                if let Some(workspace) = self.workspace.as_mut() {
                    workspace.enqueue_event(event);
                }
            }
            ClientEvent::TaskWritten {
                task_id,
                fields,
                outcome,
            } => {
                self.write_waiters.retain(|_, waiter| !waiter.is_finished());
                self.settling.retain(|waiter| !waiter.is_finished());
                let newer = self.tasks.debouncer().is_scheduled(&task_id);
                if let Some(workspace) = self.workspace.as_mut() {
                    workspace.finish_task_write(task_id, &fields, newer, outcome);
                }
            }
            ClientEvent::Input(Command::Quit) => return false,
            ClientEvent::Input(command) => {
                if let Err(err) = self.run_command(command).await {
                    warn!(error = %err, "Command failed");
                    if let Some(workspace) = self.workspace.as_mut() {
                        workspace.notify(NotificationLevel::Error, err.to_string());
                    }
                }
            }
            ClientEvent::InputClosed => debug!("Operator input closed"),
        }
        self.report();
        true
    }

    fn current(&mut self) -> TaskgridResult<&mut ProjectWorkspace> {
        self.workspace.as_mut().ok_or_else(|| {
            ValidationError::RequiredFieldMissing {
                field: "project".to_string(),
            }
            .into()
        })
    }

    async fn run_command(&mut self, command: Command) -> TaskgridResult<()> {
        match command {
            Command::SetTaskField {
                row_id,
                field,
                value,
            } => self.edit_task(&row_id, field, &value),
            Command::SetNoteField {
                row_id,
                field,
                value,
            } => self.edit_note(row_id, field, &value).await,
            Command::AddComment { row_id, body } => {
                let project_id = self.current()?.project_id();
                let comment = self.comments.add(project_id, row_id, body).await?;
                self.current()?.comments.insert(comment);
                Ok(())
            }
            Command::Notify { message } => {
                let project_id = self.current()?.project_id();
                match self.notifier.notify(project_id, &message).await? {
                    NotifyOutcome::Sent { message_id } => {
                        info!(message_id = %message_id, "Chat notified")
                    }
                    NotifyOutcome::Skipped { reason } => {
                        info!(reason = %reason, "Chat notification skipped")
                    }
                }
                Ok(())
            }
            Command::SyncAll => {
                let workspace = self.current()?;
                let project_id = workspace.project_id();
                let local: Vec<TaskInput> = workspace.tasks.iter().map(|t| t.to_input()).collect();
                let report = self.tasks.sync_all(project_id, &local).await?;
                info!(
                    inserted = report.inserted,
                    updated = report.updated,
                    deleted = report.deleted,
                    "Local task list pushed"
                );
                self.open_project(project_id).await
            }
            Command::Import { path } => self.import(&path).await,
            Command::OpenProject { project_id } => self.open_project(project_id).await,
            Command::Presence => {
                let online = self.current()?.online();
                info!(count = online.len(), users = ?online, "Online");
                Ok(())
            }
            Command::TogglePause => {
                let workspace = self.current()?;
                workspace.updates_paused = !workspace.updates_paused;
                if !workspace.updates_paused {
                    workspace.flush_queued_events();
                }
                info!(paused = workspace.updates_paused, "Remote updates toggled");
                Ok(())
            }
            Command::Quit => Ok(()),
        }
    }

    fn edit_task(&mut self, row_id: &RowId, field: TaskField, value: &str) -> TaskgridResult<()> {
        let patch = task_patch(field, value)?;
        let (task_id, to_write) = self.current()?.stage_task_edit(row_id, &patch)?;
        let fields = to_write.touched_fields();
        let scheduled = self.tasks.update_debounced(task_id, to_write)?;

        let events = self.events.clone();
        let replaced_waiting = scheduled.replaced_waiting();
        let waiter = tokio::spawn(async move {
            let outcome = scheduled.await;
            let _ = events.send(ClientEvent::TaskWritten {
                task_id,
                fields,
                outcome,
            });
        });
        if let Some(previous) = self.write_waiters.insert(task_id, waiter) {
            if replaced_waiting {
                // Cancelled before its timer fired: it never settles.
                previous.abort();
            } else {
                self.settling.push(previous);
            }
        }
        Ok(())
    }

    async fn edit_note(&mut self, row_id: RowId, field: NoteField, value: &str) -> TaskgridResult<()> {
        let workspace = self.current()?;
        let project_id = workspace.project_id();
        let (title, content) = workspace.stage_note_edit(&row_id, field, value);
        let outcome = self.notes.upsert(project_id, row_id.clone(), title, content).await;
        self.current()?.finish_note_write(&row_id, field, outcome);
        Ok(())
    }

    async fn import(&mut self, path: &Path) -> TaskgridResult<()> {
        let project_id = self.current()?.project_id();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ValidationError::InvalidValue {
                field: "path".to_string(),
                reason: e.to_string(),
            })?;
        let report = self.importer.import(project_id, &json).await?;
        info!(
            tasks = report.tasks,
            notes = report.notes,
            comments = report.comments,
            "Legacy data imported"
        );
        self.open_project(project_id).await
    }

    /// Log what the last event rendered and the notices raised since the
    /// previous call. Notices stay on the workspace.
    fn report(&mut self) {
        let Some(workspace) = self.workspace.as_mut() else {
            return;
        };
        for rendered in workspace.drain_rendered() {
            match rendered {
                Rendered::Task(e) => {
                    info!(kind = e.kind.as_str(), row_id = %e.row.row_id, text = %e.row.text, "task")
                }
                Rendered::Note(e) => {
                    info!(kind = e.kind.as_str(), row_id = %e.row.row_id, title = %e.row.title, "note")
                }
                Rendered::Comment(e) => {
                    info!(kind = e.kind.as_str(), row_id = %e.row.row_id, author = %e.row.author_email, "comment")
                }
            }
        }
        for notice in workspace.notifications.iter().skip(self.notices_logged) {
            match notice.level {
                NotificationLevel::Error => warn!(action = ?notice.action, "{}", notice.message),
                _ => info!(action = ?notice.action, "{}", notice.message),
            }
        }
        self.notices_logged = workspace.notifications.len();
    }

    fn abort_write_waiters(&mut self) {
        for (_, waiter) in self.write_waiters.drain() {
            waiter.abort();
        }
        for waiter in self.settling.drain(..) {
            waiter.abort();
        }
    }

    /// Close every channel. Returns the project to reopen next time.
    pub async fn shutdown(&mut self) -> Option<ProjectId> {
        self.abort_write_waiters();
        self.subscriptions.unsubscribe_all().await;
        self.workspace.as_ref().map(ProjectWorkspace::project_id)
    }
}

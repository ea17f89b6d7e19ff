//! Client Tests against the In-Memory Backend
//!
//! **Property 1: Command parsing.** `set <row> progress <n>` yields a patch
//! exactly when `n` is a percentage.
//!
//! **Property 2: Local edits keep the list sorted.** Any sequence of
//! `sort_order` edits staged on the workspace leaves it ordered.
//!
//! **Property 3: Coalesced local writes.** Edits to two fields of one row in
//! quick succession reach the backend as a single write carrying both, and
//! both fields are released once it settles.
//!
//! **Property 4: Paused updates** are held until resumed.
//!
//! **Property 5: Sent writes always report.** A new edit never discards the
//! outcome of a write already on its way to the backend.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskgrid_client::app::ClientApp;
use taskgrid_client::commands::{task_patch, Command};
use taskgrid_client::events::ClientEvent;
use taskgrid_client::notifications::{NotificationAction, NotificationLevel};
use taskgrid_client::state::ProjectWorkspace;
use taskgrid_core::{
    CurrentUser, EntityIdType, NoteField, Project, ProjectId, RowId, SessionContext, TaskField,
    TaskInput, TaskPatch, TaskgridResult, UserId,
};
use serde_json::Value;
use taskgrid_storage::{Filter, InMemoryStore, RemoteStore, Row, StoreOperation, Table};
use taskgrid_sync::{Notifier, NotifyOutcome, ProjectRepository, TaskRepository};
use taskgrid_test_utils::assertions::assert_sorted;
use taskgrid_test_utils::backend::{register, Participant};
use taskgrid_test_utils::generators::arb_task;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(ProjectId, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, project_id: ProjectId, message: &str) -> TaskgridResult<NotifyOutcome> {
        self.sent
            .lock()
            .unwrap()
            .push((project_id, message.to_string()));
        Ok(NotifyOutcome::Sent {
            message_id: "m-1".to_string(),
        })
    }
}

/// Delegates to the in-memory backend, holding every update for `delay`.
struct SlowUpdates {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl RemoteStore for SlowUpdates {
    async fn select(&self, table: Table, filter: &Filter) -> TaskgridResult<Vec<Row>> {
        self.inner.select(table, filter).await
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> TaskgridResult<Vec<Row>> {
        self.inner.insert(table, rows).await
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> TaskgridResult<Row> {
        tokio::time::sleep(self.delay).await;
        self.inner.update(table, id, fields).await
    }

    async fn delete(&self, table: Table, filter: &Filter) -> TaskgridResult<()> {
        self.inner.delete(table, filter).await
    }

    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> TaskgridResult<Vec<Row>> {
        self.inner.upsert(table, rows, conflict_key).await
    }

    async fn rpc(&self, function: &str, params: Row) -> TaskgridResult<Value> {
        self.inner.rpc(function, params).await
    }
}

struct Harness {
    app: ClientApp,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    notifier: Arc<RecordingNotifier>,
}

async fn project_for(owner: &Participant, name: &str) -> Project {
    ProjectRepository::new(Arc::new(owner.store.clone()), owner.session())
        .create(name, "")
        .await
        .expect("project created")
}

fn tasks_of(owner: &Participant) -> TaskRepository {
    TaskRepository::new(Arc::new(owner.store.clone()), owner.session())
}

fn harness_for(user: &Participant) -> Harness {
    harness_with_store(user, Arc::new(user.store.clone()))
}

fn harness_with_store(user: &Participant, store: Arc<dyn RemoteStore>) -> Harness {
    let (tx, events) = mpsc::unbounded_channel();
    let notifier = Arc::new(RecordingNotifier::default());
    let app = ClientApp::new(
        store,
        Arc::new(user.store.clone()),
        notifier.clone(),
        user.session(),
        Duration::from_millis(20),
        tx,
    );
    Harness {
        app,
        events,
        notifier,
    }
}

impl Harness {
    /// Handle events until `done` holds.
    async fn pump_until(&mut self, done: impl Fn(&ClientApp) -> bool) {
        let app = &mut self.app;
        let events = &mut self.events;
        timeout(Duration::from_secs(2), async {
            while !done(&*app) {
                let event = events.recv().await.expect("event channel open");
                app.handle(event).await;
            }
        })
        .await
        .expect("condition within timeout");
    }

    /// Handle whatever arrives within a short quiet period.
    async fn settle(&mut self) {
        while let Ok(Some(event)) = timeout(Duration::from_millis(50), self.events.recv()).await {
            self.app.handle(event).await;
        }
    }

    async fn input(&mut self, command: Command) -> bool {
        self.app.handle(ClientEvent::Input(command)).await
    }

    fn workspace(&self) -> &ProjectWorkspace {
        self.app.workspace().expect("project open")
    }
}

fn set(row: &str, field: TaskField, value: &str) -> Command {
    Command::SetTaskField {
        row_id: RowId::new(row),
        field,
        value: value.to_string(),
    }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_progress_accepts_only_percentages(value in -500i32..500) {
        let command = Command::parse(&format!("set r1 progress {}", value)).unwrap();
        let Command::SetTaskField { field, value: text, .. } = command else {
            panic!("expected a task edit");
        };
        let patch = task_patch(field, &text);
        if (0..=100).contains(&value) {
            prop_assert_eq!(patch.unwrap().progress, Some(value));
        } else {
            prop_assert!(patch.is_err());
        }
    }

    #[test]
    fn prop_staged_moves_keep_workspace_sorted(
        tasks in prop::collection::vec(arb_task(ProjectId::new(Uuid::nil())), 1..12),
        moves in prop::collection::vec((any::<prop::sample::Index>(), -100i64..100), 0..20),
    ) {
        let me = CurrentUser::new(UserId::now_v7(), "me@example.com");
        let mut workspace =
            ProjectWorkspace::new(ProjectId::new(Uuid::nil()), SessionContext::signed_in(me));
        workspace.load(tasks.clone(), Vec::new(), Vec::new());

        for (index, sort_order) in moves {
            let row_id = index.get(&tasks).row_id.clone();
            let patch = TaskPatch {
                sort_order: Some(sort_order),
                ..TaskPatch::default()
            };
            let (_, to_write) = workspace.stage_task_edit(&row_id, &patch).unwrap();
            prop_assert!(to_write.touched_fields().contains(&TaskField::SortOrder));
            prop_assert!(workspace.is_task_field_pending(&row_id, TaskField::SortOrder));
        }
        assert_sorted(workspace.tasks.as_slice());
        prop_assert_eq!(workspace.tasks.len(), tasks.len());
    }
}

// ============================================================================
// EVENT LOOP
// ============================================================================

#[tokio::test]
async fn test_choose_project_prefers_a_current_membership() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let bob = register(&store, "bob@example.com").await;
    let launch = project_for(&alice, "Launch").await;
    let harness = harness_for(&alice);

    assert_eq!(
        harness.app.choose_project(Some(launch.id)).await.unwrap(),
        Some(launch.id)
    );
    // A project the user no longer belongs to falls back to one they do.
    let gone = ProjectId::new(Uuid::new_v4());
    assert_eq!(harness.app.choose_project(Some(gone)).await.unwrap(), Some(launch.id));

    let bobs = harness_for(&bob);
    assert_eq!(bobs.app.choose_project(None).await.unwrap(), None);
}

#[tokio::test]
async fn test_local_edits_are_written_once_and_released() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let project = project_for(&alice, "Launch").await;
    tasks_of(&alice)
        .insert(project.id, TaskInput::new("r1", 0))
        .await
        .unwrap();

    let mut h = harness_for(&alice);
    h.app.open_project(project.id).await.unwrap();
    h.settle().await;
    store.clear_calls();

    assert!(h.input(set("r1", TaskField::Text, "ship it")).await);
    assert!(h.input(set("r1", TaskField::Status, "完了")).await);
    let row = RowId::new("r1");
    assert!(h.workspace().is_task_field_pending(&row, TaskField::Text));
    assert_eq!(h.workspace().tasks.find_by_row_id(&row).unwrap().text, "ship it");

    h.pump_until(|app| {
        let ws = app.workspace().unwrap();
        !ws.is_task_field_pending(&row, TaskField::Text)
            && !ws.is_task_field_pending(&row, TaskField::Status)
    })
    .await;

    assert_eq!(store.call_count(StoreOperation::Update, "tasks"), 1);
    let stored = tasks_of(&alice).load(project.id).await.unwrap();
    assert_eq!(stored[0].text, "ship it");
    assert_eq!(stored[0].status, "完了");
    assert!(h.workspace().notifications.is_empty());
    h.app.shutdown().await;
}

#[tokio::test]
async fn test_failed_write_keeps_local_value_and_offers_retry() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let project = project_for(&alice, "Launch").await;
    tasks_of(&alice)
        .insert(project.id, TaskInput::new("r1", 0))
        .await
        .unwrap();

    let mut h = harness_for(&alice);
    h.app.open_project(project.id).await.unwrap();
    store.fail_next(StoreOperation::Update, "tasks");
    h.input(set("r1", TaskField::Progress, "60")).await;

    let row = RowId::new("r1");
    h.pump_until(|app| !app.workspace().unwrap().is_task_field_pending(&row, TaskField::Progress))
        .await;

    let ws = h.workspace();
    assert_eq!(ws.tasks.find_by_row_id(&row).unwrap().progress, 60);
    let notice = ws.notifications.last().expect("failure reported");
    assert_eq!(notice.level, NotificationLevel::Error);
    assert_eq!(notice.action, Some(NotificationAction::Retry));
}

#[tokio::test]
async fn test_sent_write_failure_is_reported_after_a_newer_edit() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let project = project_for(&alice, "Launch").await;
    tasks_of(&alice)
        .insert(project.id, TaskInput::new("r1", 0))
        .await
        .unwrap();

    let slow = SlowUpdates {
        inner: alice.store.clone(),
        delay: Duration::from_millis(150),
    };
    let mut h = harness_with_store(&alice, Arc::new(slow));
    h.app.open_project(project.id).await.unwrap();
    h.settle().await;
    store.clear_calls();

    store.fail_next(StoreOperation::Update, "tasks");
    h.input(set("r1", TaskField::Progress, "60")).await;
    // The first write's timer has fired; it is now waiting on the backend.
    tokio::time::sleep(Duration::from_millis(60)).await;
    h.input(set("r1", TaskField::Text, "hello")).await;

    h.pump_until(|app| {
        app.workspace().unwrap().notifications.iter().any(|n| {
            n.level == NotificationLevel::Error && n.action == Some(NotificationAction::Retry)
        })
    })
    .await;
    let row = RowId::new("r1");
    h.pump_until(|app| !app.workspace().unwrap().is_task_field_pending(&row, TaskField::Text))
        .await;
    assert_eq!(store.call_count(StoreOperation::Update, "tasks"), 2);

    let stored = tasks_of(&alice).load(project.id).await.unwrap();
    assert_eq!(stored[0].progress, 60);
    assert_eq!(stored[0].text, "hello");
}

#[tokio::test]
async fn test_invalid_input_is_reported_not_fatal() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let project = project_for(&alice, "Launch").await;
    let mut h = harness_for(&alice);
    h.app.open_project(project.id).await.unwrap();

    assert!(h.input(set("missing", TaskField::Text, "x")).await);
    assert!(h.input(set("missing", TaskField::Progress, "x")).await);
    assert_eq!(h.workspace().notifications.len(), 2);
    assert!(!h.input(Command::Quit).await);
}

#[tokio::test]
async fn test_peer_insert_reaches_workspace() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let bob = register(&store, "bob@example.com").await;
    let project = project_for(&alice, "Launch").await;

    let mut h = harness_for(&alice);
    h.app.open_project(project.id).await.unwrap();
    tasks_of(&bob)
        .insert(project.id, TaskInput::new("theirs", 3))
        .await
        .unwrap();

    let row = RowId::new("theirs");
    h.pump_until(|app| app.workspace().unwrap().tasks.find_by_row_id(&row).is_some())
        .await;
    h.pump_until(|app| !app.workspace().unwrap().online().is_empty())
        .await;
    assert_eq!(h.workspace().online().len(), 1);
}

#[tokio::test]
async fn test_paused_updates_apply_on_resume() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let bob = register(&store, "bob@example.com").await;
    let project = project_for(&alice, "Launch").await;

    let mut h = harness_for(&alice);
    h.app.open_project(project.id).await.unwrap();
    h.settle().await;

    h.input(Command::TogglePause).await;
    tasks_of(&bob)
        .insert(project.id, TaskInput::new("later", 0))
        .await
        .unwrap();
    h.settle().await;

    let row = RowId::new("later");
    assert!(h.workspace().tasks.find_by_row_id(&row).is_none());
    assert!(h.workspace().queued_len() > 0);

    h.input(Command::TogglePause).await;
    assert!(h.workspace().tasks.find_by_row_id(&row).is_some());
    assert_eq!(h.workspace().queued_len(), 0);
}

#[tokio::test]
async fn test_note_and_comment_commands_update_workspace() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let project = project_for(&alice, "Launch").await;
    let mut h = harness_for(&alice);
    h.app.open_project(project.id).await.unwrap();

    h.input(Command::SetNoteField {
        row_id: RowId::new("r1"),
        field: NoteField::Title,
        value: "Plan".to_string(),
    })
    .await;
    h.input(Command::AddComment {
        row_id: RowId::new("r1"),
        body: "looks good".to_string(),
    })
    .await;

    let row = RowId::new("r1");
    let ws = h.workspace();
    let note = ws.notes.get(&row).expect("note stored locally");
    assert_eq!(note.title, "Plan");
    assert_eq!(note.project_id, project.id);
    assert_eq!(ws.comments.open_count(&row), 1);
}

#[tokio::test]
async fn test_notify_requires_an_open_project() {
    let store = InMemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let project = project_for(&alice, "Launch").await;
    let mut h = harness_for(&alice);

    h.input(Command::Notify {
        message: "early".to_string(),
    })
    .await;
    assert!(h.notifier.sent.lock().unwrap().is_empty());

    h.app.open_project(project.id).await.unwrap();
    h.input(Command::Notify {
        message: "deployed".to_string(),
    })
    .await;
    assert_eq!(
        h.notifier.sent.lock().unwrap().as_slice(),
        &[(project.id, "deployed".to_string())]
    );
}

//! TASKGRID Test Utilities
//!
//! Shared test infrastructure for the TASKGRID workspace:
//! - Fixtures for tasks, notes, comments and users
//! - Proptest generators for rows and task lists
//! - A seeded in-memory backend for multi-user scenarios
//! - Assertions on the error taxonomy

pub use taskgrid_core::{
    AuthorizationError, BackendError, Comment, CommentId, ConflictError, CurrentUser,
    EntityIdType, Note, NoteId, ProjectId, RowId, SessionContext, Task, TaskField, TaskId,
    TaskInput, TaskgridError, TaskgridResult, Timestamp, UserId, ValidationError,
    DEFAULT_TASK_STATUS,
};
pub use taskgrid_storage::{InMemoryStore, Row, Table};

use chrono::Utc;
use uuid::Uuid;

/// Project used by fixtures that do not name one.
pub fn fixture_project() -> ProjectId {
    ProjectId::new(Uuid::nil())
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built rows for common scenarios. Fixture rows carry no actor, so
    //! they are never mistaken for the local user's own echo.

    use super::*;

    /// A blank task in the fixture project.
    pub fn task(row_id: &str, sort_order: i64) -> Task {
        task_in(fixture_project(), row_id, sort_order)
    }

    pub fn task_in(project_id: ProjectId, row_id: &str, sort_order: i64) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::now_v7(),
            project_id,
            row_id: RowId::new(row_id),
            sort_order,
            level: 0,
            collapsed: false,
            text: format!("task {}", row_id),
            status: DEFAULT_TASK_STATUS.to_string(),
            progress: 0,
            manager: String::new(),
            ball: String::new(),
            start_date: String::new(),
            end_date: String::new(),
            updated_by: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn note(row_id: &str, title: &str) -> Note {
        Note {
            id: NoteId::now_v7(),
            project_id: fixture_project(),
            row_id: RowId::new(row_id),
            title: title.to_string(),
            content: String::new(),
            updated_by: None,
            updated_at: Some(Utc::now()),
        }
    }

    /// An open comment by a throwaway author.
    pub fn comment(row_id: &str, body: &str) -> Comment {
        Comment {
            id: CommentId::now_v7(),
            project_id: fixture_project(),
            row_id: RowId::new(row_id),
            author_id: UserId::now_v7(),
            author_email: "someone@example.com".to_string(),
            body: body.to_string(),
            cleared: false,
            created_at: Some(Utc::now()),
        }
    }

    pub fn user(email: &str) -> CurrentUser {
        CurrentUser::new(UserId::now_v7(), email)
    }

    /// Serialize a fixture into the backend row shape.
    pub fn to_row<T: serde::Serialize>(value: &T) -> Row {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::Object(row)) => row,
            other => panic!("fixture did not serialize to an object: {:?}", other),
        }
    }
}

// ============================================================================
// SEEDED BACKEND
// ============================================================================

pub mod backend {
    //! An in-memory backend with registered users.

    use super::*;
    use serde_json::json;

    /// One registered user with a store handle acting as them.
    pub struct Participant {
        pub user: CurrentUser,
        pub store: InMemoryStore,
    }

    impl Participant {
        pub fn session(&self) -> SessionContext {
            SessionContext::signed_in(self.user.clone())
        }
    }

    /// Register a profile for `email` and return a handle acting as that user.
    pub async fn register(store: &InMemoryStore, email: &str) -> Participant {
        let user = fixtures::user(email);
        let row = fixtures::to_row(&json!({
            "id": user.id,
            "email": email,
            "display_name": email.split('@').next().unwrap_or(email),
        }));
        taskgrid_storage::RemoteStore::insert(store, Table::Profiles, vec![row])
            .await
            .expect("profile insert");
        Participant {
            store: store.connect_as(user.id),
            user,
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TASKGRID rows.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        arb_uuid().prop_map(UserId::new)
    }

    pub fn arb_task_id() -> impl Strategy<Value = TaskId> {
        arb_uuid().prop_map(TaskId::new)
    }

    /// Short row keys so that collisions actually happen.
    pub fn arb_row_id() -> impl Strategy<Value = RowId> {
        "[a-f][0-9]?".prop_map(RowId::new)
    }

    pub fn arb_task_field() -> impl Strategy<Value = TaskField> {
        proptest::sample::select(TaskField::ALL.to_vec())
    }

    pub fn arb_status() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(DEFAULT_TASK_STATUS.to_string()),
            Just("進行中".to_string()),
            Just("完了".to_string()),
        ]
    }

    pub fn arb_task_input() -> impl Strategy<Value = TaskInput> {
        (
            arb_row_id(),
            -50i64..50,
            0i32..4,
            any::<bool>(),
            "[a-z ]{0,12}",
            arb_status(),
            0i32..=100,
        )
            .prop_map(
                |(row_id, sort_order, level, collapsed, text, status, progress)| TaskInput {
                    row_id,
                    sort_order,
                    level,
                    collapsed,
                    text,
                    status,
                    progress,
                    manager: String::new(),
                    ball: String::new(),
                    start_date: String::new(),
                    end_date: String::new(),
                },
            )
    }

    /// A task row as the backend would return it.
    pub fn arb_task(project_id: ProjectId) -> impl Strategy<Value = Task> {
        (arb_task_id(), arb_task_input(), proptest::option::of(arb_user_id())).prop_map(
            move |(id, input, updated_by)| Task {
                id,
                project_id,
                row_id: input.row_id,
                sort_order: input.sort_order,
                level: input.level,
                collapsed: input.collapsed,
                text: input.text,
                status: input.status,
                progress: input.progress,
                manager: input.manager,
                ball: input.ball,
                start_date: input.start_date,
                end_date: input.end_date,
                updated_by,
                created_at: None,
                updated_at: None,
            },
        )
    }

    /// Task inputs with pairwise distinct row ids, in list order.
    pub fn arb_local_rows(max: usize) -> impl Strategy<Value = Vec<TaskInput>> {
        prop::collection::vec(arb_task_input(), 0..max).prop_map(|rows| {
            let mut seen = std::collections::HashSet::new();
            rows.into_iter()
                .filter(|row| seen.insert(row.row_id.clone()))
                .collect()
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the TASKGRID error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TaskgridResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TaskgridResult<T>) {
        match result {
            Err(TaskgridError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_signed_in<T: std::fmt::Debug>(result: &TaskgridResult<T>) {
        match result {
            Err(TaskgridError::Authorization(AuthorizationError::NotSignedIn)) => {}
            other => panic!("Expected NotSignedIn, got: {:?}", other),
        }
    }

    /// Assert a conflict error matching `expected`.
    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(
        result: &TaskgridResult<T>,
        expected: fn(&ConflictError) -> bool,
    ) {
        match result {
            Err(TaskgridError::Conflict(conflict)) if expected(conflict) => {}
            other => panic!("Expected matching Conflict error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_backend_error<T: std::fmt::Debug>(result: &TaskgridResult<T>) {
        match result {
            Err(TaskgridError::Backend(_)) => {}
            other => panic!("Expected Backend error, got: {:?}", other),
        }
    }

    /// Assert the tasks are in non-decreasing `sort_order`.
    #[track_caller]
    pub fn assert_sorted(tasks: &[Task]) {
        for pair in tasks.windows(2) {
            assert!(
                pair[0].sort_order <= pair[1].sort_order,
                "tasks out of order: {} ({}) before {} ({})",
                pair[0].row_id,
                pair[0].sort_order,
                pair[1].row_id,
                pair[1].sort_order
            );
        }
    }
}

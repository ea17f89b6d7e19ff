//! TASKGRID Sync - Local/Remote Reconciliation
//!
//! Keeps a local copy of a project's tasks, notes and comments consistent
//! with the shared backend while several users edit it at once:
//!
//! - `pending` / `debounce`: per-field unsaved edits and trailing-edge
//!   coalescing of writes
//! - `dispatch`: applies remote change events to local state, dropping the
//!   local user's own echoes and keeping fields that are being edited
//! - `reconcile`: bulk push of a full local task list
//! - `subscriptions`: one project's change and presence channels
//! - `repo`: typed access to every backend table
//! - `import` / `notify`: legacy data import and outbound chat messages

pub mod collection;
pub mod debounce;
pub mod dispatch;
pub mod import;
pub mod notify;
pub mod pending;
pub mod reconcile;
pub mod render;
pub mod repo;
pub mod subscriptions;

pub use collection::{CommentList, NoteCache, TaskList};
pub use debounce::{ScheduledWrite, WriteDebouncer, DEFAULT_WRITE_DELAY};
pub use dispatch::ChangeDispatcher;
pub use import::{ImportReport, LegacyImporter};
pub use notify::{interpret_response, validate_request, Notifier, NotifyOutcome, CHAT_SERVICE};
pub use pending::PendingEditTracker;
pub use reconcile::{plan, BulkReconciler, ReconcilePlan, ReconcileReport};
pub use render::{RenderEvent, RenderKind, RenderSink};
pub use repo::{
    CommentRepository, MemberRepository, NoteRepository, ProjectRepository, SettingsRepository,
    TaskRepository,
};
pub use subscriptions::{ActiveSubscriptions, ProjectEvent, SubscriptionManager, WATCHED_TABLES};

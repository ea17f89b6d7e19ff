//! TASKGRID Core - Entity Types
//!
//! Pure data structures shared by every other crate: identifiers, entity
//! rows, editable field enums with their merge rules, change events, the
//! session context and the error taxonomy. No I/O lives here.

pub mod entities;
pub mod error;
pub mod event;
pub mod fields;
pub mod identity;
pub mod session;

pub use entities::{
    Comment, CommentWrite, MemberRole, MemberWithProfile, Note, NoteWrite, Profile, Project,
    ProjectMember, ProjectPatch, ProjectSettings, ProjectWithRole, Record, SettingsPatch, Task,
    TaskInput, TaskPatch, TaskWrite, DEFAULT_TASK_STATUS,
};
pub use error::{
    AuthorizationError, BackendError, ConflictError, TaskgridError, TaskgridResult,
    ValidationError,
};
pub use event::{ChangeEvent, ChangeKind, DeletedRow};
pub use fields::{FieldMerge, NoteField, TaskField};
pub use identity::{
    CommentId, EntityIdType, MemberId, NoteId, ProjectId, RowId, TaskId, Timestamp, UserId,
};
pub use session::{CurrentUser, SessionContext};

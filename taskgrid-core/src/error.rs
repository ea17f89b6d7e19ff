//! Error types for TASKGRID operations

use crate::{ProjectId, RowId, UserId};
use thiserror::Error;

/// Missing or malformed input to an operation. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown field name: {name}")]
    UnknownField { name: String },

    #[error("Malformed import data: {reason}")]
    MalformedImport { reason: String },
}

/// The actor lacks the identity or membership an operation needs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("User {user_id} is not a member of project {project_id}")]
    NotAMember {
        user_id: UserId,
        project_id: ProjectId,
    },

    #[error("Permission denied: {reason}")]
    Denied { reason: String },
}

/// Uniqueness violations reported by the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Unique constraint {constraint} violated on {table}")]
    UniqueViolation { table: String, constraint: String },

    #[error("This user is already a member of the project")]
    DuplicateMember,

    #[error("Row {row_id} already exists in {table}")]
    DuplicateRow { table: String, row_id: RowId },

    #[error("No user is registered with this email address; ask them to sign up first")]
    UnknownUser { email: String },
}

/// Transient network or store failures. Propagated to the caller, which may
/// retry; nothing in this workspace retries on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Gateway error from {service}: {details}")]
    Gateway { service: String, details: String },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("{table} row {id} not found")]
    NotFound { table: String, id: String },

    #[error("Unknown remote procedure: {name}")]
    UnknownProcedure { name: String },

    #[error("Channel closed: {topic}")]
    ChannelClosed { topic: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Master error type for all TASKGRID errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskgridError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl TaskgridError {
    /// Whether a caller could reasonably retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskgridError::Backend(_))
    }
}

/// Result type alias for TASKGRID operations.
pub type TaskgridResult<T> = Result<T, TaskgridError>;

// =============================================================================
// TESTS
// =============================================================================

//! Typed repositories over [`RemoteStore`](taskgrid_storage::RemoteStore).
//!
//! Each repository owns a handle on the store plus the session it acts for,
//! converts between rows and entity types and stamps the acting user where
//! the backend expects it.

pub mod comments;
pub mod members;
pub mod notes;
pub mod projects;
pub mod settings;
pub mod tasks;

pub use comments::CommentRepository;
pub use members::MemberRepository;
pub use notes::NoteRepository;
pub use projects::ProjectRepository;
pub use settings::SettingsRepository;
pub use tasks::TaskRepository;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use taskgrid_core::{BackendError, ProjectId, TaskgridResult, ValidationError};
use taskgrid_storage::{Filter, Row, Table};

/// Serialize a write payload into a row.
pub(crate) fn encode_row<T: Serialize>(value: &T) -> TaskgridResult<Row> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(ValidationError::InvalidValue {
            field: "row".to_string(),
            reason: format!("expected an object, got {}", other),
        }
        .into()),
        Err(e) => Err(ValidationError::InvalidValue {
            field: "row".to_string(),
            reason: e.to_string(),
        }
        .into()),
    }
}

pub(crate) fn decode_row<T: DeserializeOwned>(table: Table, row: Row) -> TaskgridResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| {
        BackendError::Decode {
            what: format!("{} row", table),
            reason: e.to_string(),
        }
        .into()
    })
}

pub(crate) fn decode_rows<T: DeserializeOwned>(
    table: Table,
    rows: Vec<Row>,
) -> TaskgridResult<Vec<T>> {
    rows.into_iter().map(|row| decode_row(table, row)).collect()
}

/// First row of a write that must return exactly one.
pub(crate) fn single<T: DeserializeOwned>(table: Table, rows: Vec<Row>) -> TaskgridResult<T> {
    let row = rows.into_iter().next().ok_or_else(|| BackendError::Decode {
        what: format!("{} write result", table),
        reason: "backend returned no rows".to_string(),
    })?;
    decode_row(table, row)
}

pub(crate) fn project_filter(project_id: ProjectId) -> Filter {
    Filter::new().eq("project_id", project_id.to_string())
}

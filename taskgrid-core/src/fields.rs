//! Field names of editable entity columns.
//!
//! Pending-edit tracking and conflict merging work on these enums rather than
//! on free-form strings, so a typo in a field name is a compile error instead
//! of a silently ignored edit.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Field-by-field merge of an incoming remote snapshot into a local record.
pub trait FieldMerge {
    type Field: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Copy every field of `incoming` into `self` except those listed in
    /// `pending`, which keep their local (unsaved) value. Non-editable
    /// columns (ids, actor, timestamps) are always taken from `incoming`.
    fn merge_from(&mut self, incoming: &Self, pending: &HashSet<Self::Field>);
}

/// Editable columns of a task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskField {
    SortOrder,
    Level,
    Collapsed,
    Text,
    Status,
    Progress,
    Manager,
    Ball,
    StartDate,
    EndDate,
}

impl TaskField {
    pub const ALL: [TaskField; 10] = [
        TaskField::SortOrder,
        TaskField::Level,
        TaskField::Collapsed,
        TaskField::Text,
        TaskField::Status,
        TaskField::Progress,
        TaskField::Manager,
        TaskField::Ball,
        TaskField::StartDate,
        TaskField::EndDate,
    ];

    /// Column name as stored by the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskField::SortOrder => "sort_order",
            TaskField::Level => "level",
            TaskField::Collapsed => "collapsed",
            TaskField::Text => "text",
            TaskField::Status => "status",
            TaskField::Progress => "progress",
            TaskField::Manager => "manager",
            TaskField::Ball => "ball",
            TaskField::StartDate => "start_date",
            TaskField::EndDate => "end_date",
        }
    }
}

impl fmt::Display for TaskField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownField {
                name: s.to_string(),
            })
    }
}

/// Editable columns of a note row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteField {
    Title,
    Content,
}

impl NoteField {
    pub const ALL: [NoteField; 2] = [NoteField::Title, NoteField::Content];

    pub fn as_str(&self) -> &'static str {
        match self {
            NoteField::Title => "title",
            NoteField::Content => "content",
        }
    }
}

impl fmt::Display for NoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NoteField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownField {
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_field_names_roundtrip() {
        for field in TaskField::ALL {
            assert_eq!(field.as_str().parse::<TaskField>().unwrap(), field);
        }
    }

    #[test]
    fn test_task_field_serde_matches_column_name() {
        let json = serde_json::to_string(&TaskField::StartDate).unwrap();
        assert_eq!(json, "\"start_date\"");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = "colour".parse::<TaskField>().unwrap_err();
        assert!(matches!(err, ValidationError::UnknownField { .. }));
        assert!("body".parse::<NoteField>().is_err());
    }
}

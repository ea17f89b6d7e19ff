//! Operator commands read line by line from stdin.

use std::path::PathBuf;
use taskgrid_core::{NoteField, ProjectId, RowId, TaskField, TaskPatch, ValidationError};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `set <row> <field> <value>`
    SetTaskField {
        row_id: RowId,
        field: TaskField,
        value: String,
    },
    /// `note <row> <title|content> <value>`
    SetNoteField {
        row_id: RowId,
        field: NoteField,
        value: String,
    },
    /// `comment <row> <body>`
    AddComment { row_id: RowId, body: String },
    /// `notify <message>`
    Notify { message: String },
    /// `sync`: push the local task list as the project's full contents.
    SyncAll,
    /// `import <path>`: legacy spreadsheet JSON.
    Import { path: PathBuf },
    /// `open <project-id>`
    OpenProject { project_id: ProjectId },
    /// `who`
    Presence,
    /// `pause`: hold remote changes until the next `pause`.
    TogglePause,
    Quit,
}

fn missing(field: &str) -> ValidationError {
    ValidationError::RequiredFieldMissing {
        field: field.to_string(),
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Split off the first whitespace-delimited word.
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], input[end..].trim_start())),
        None => Some((input, "")),
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ValidationError> {
        let (verb, rest) = next_word(line).ok_or_else(|| missing("command"))?;
        match verb {
            "set" => {
                let (row, rest) = next_word(rest).ok_or_else(|| missing("row_id"))?;
                let (field, value) = next_word(rest).ok_or_else(|| missing("field"))?;
                Ok(Command::SetTaskField {
                    row_id: RowId::new(row),
                    field: field.parse()?,
                    value: value.to_string(),
                })
            }
            "note" => {
                let (row, rest) = next_word(rest).ok_or_else(|| missing("row_id"))?;
                let (field, value) = next_word(rest).ok_or_else(|| missing("field"))?;
                Ok(Command::SetNoteField {
                    row_id: RowId::new(row),
                    field: field.parse()?,
                    value: value.to_string(),
                })
            }
            "comment" => {
                let (row, body) = next_word(rest).ok_or_else(|| missing("row_id"))?;
                if body.is_empty() {
                    return Err(missing("body"));
                }
                Ok(Command::AddComment {
                    row_id: RowId::new(row),
                    body: body.to_string(),
                })
            }
            "notify" => Ok(Command::Notify {
                message: rest.trim().to_string(),
            }),
            "sync" => Ok(Command::SyncAll),
            "import" => {
                let (path, _) = next_word(rest).ok_or_else(|| missing("path"))?;
                Ok(Command::Import {
                    path: PathBuf::from(path),
                })
            }
            "open" => {
                let (id, _) = next_word(rest).ok_or_else(|| missing("project_id"))?;
                let uuid = uuid::Uuid::parse_str(id).map_err(|e| invalid("project_id", e.to_string()))?;
                Ok(Command::OpenProject {
                    project_id: ProjectId::from(uuid),
                })
            }
            "who" => Ok(Command::Presence),
            "pause" => Ok(Command::TogglePause),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(invalid("command", format!("unknown command {:?}", other))),
        }
    }
}

/// A single-field patch from operator text.
pub fn task_patch(field: TaskField, value: &str) -> Result<TaskPatch, ValidationError> {
    let mut patch = TaskPatch::default();
    let value = value.trim();
    match field {
        TaskField::SortOrder => {
            patch.sort_order = Some(value.parse().map_err(|_| invalid("sort_order", "expected an integer"))?)
        }
        TaskField::Level => {
            patch.level = Some(value.parse().map_err(|_| invalid("level", "expected an integer"))?)
        }
        TaskField::Collapsed => {
            patch.collapsed = Some(value.parse().map_err(|_| invalid("collapsed", "expected true or false"))?)
        }
        TaskField::Progress => {
            let progress: i32 = value
                .parse()
                .map_err(|_| invalid("progress", "expected an integer"))?;
            if !(0..=100).contains(&progress) {
                return Err(invalid("progress", "must be between 0 and 100"));
            }
            patch.progress = Some(progress);
        }
        TaskField::Text => patch.text = Some(value.to_string()),
        TaskField::Status => patch.status = Some(value.to_string()),
        TaskField::Manager => patch.manager = Some(value.to_string()),
        TaskField::Ball => patch.ball = Some(value.to_string()),
        TaskField::StartDate => patch.start_date = Some(value.to_string()),
        TaskField::EndDate => patch.end_date = Some(value.to_string()),
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_keeps_spaces_in_value() {
        assert_eq!(
            Command::parse("set r1 text write the report").unwrap(),
            Command::SetTaskField {
                row_id: RowId::new("r1"),
                field: TaskField::Text,
                value: "write the report".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_field_and_verb() {
        assert!(matches!(
            Command::parse("set r1 colour red"),
            Err(ValidationError::UnknownField { .. })
        ));
        assert!(matches!(
            Command::parse("frobnicate"),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(matches!(
            Command::parse("   "),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
    }

    #[test]
    fn test_parse_note_and_open() {
        assert!(matches!(
            Command::parse("note r2 content hello").unwrap(),
            Command::SetNoteField { field: NoteField::Content, .. }
        ));
        assert!(Command::parse("open not-a-uuid").is_err());
        assert!(matches!(
            Command::parse("open 00000000-0000-0000-0000-000000000000").unwrap(),
            Command::OpenProject { .. }
        ));
    }

    #[test]
    fn test_task_patch_parses_typed_fields() {
        assert_eq!(task_patch(TaskField::Progress, "40").unwrap().progress, Some(40));
        assert!(task_patch(TaskField::Progress, "140").is_err());
        assert!(task_patch(TaskField::Collapsed, "maybe").is_err());
        assert_eq!(
            task_patch(TaskField::Status, " 完了 ").unwrap().status.as_deref(),
            Some("完了")
        );
    }
}

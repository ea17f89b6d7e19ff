//! Import of legacy spreadsheet exports.
//!
//! The export is a JSON document with a `tasks` array (in display order) and
//! a `notes` object keyed by row id, each note optionally carrying its
//! comments. Field encodings are loose: booleans may arrive as strings and
//! numbers as strings.
//!
//! Tasks are inserted in one batch and any failure aborts the import. Notes
//! and comments are written per row; a failure there is logged and the
//! import moves on.

use crate::repo::encode_row;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use taskgrid_core::{
    CommentWrite, CurrentUser, NoteWrite, ProjectId, RowId, SessionContext, TaskInput, TaskWrite,
    TaskgridResult, Timestamp, ValidationError, DEFAULT_TASK_STATUS,
};
use taskgrid_storage::{RemoteStore, Table};
use tracing::{info, warn};

/// Rows written by one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub tasks: usize,
    pub notes: usize,
    pub comments: usize,
}

#[derive(Debug, Deserialize)]
struct LegacyExport {
    #[serde(default)]
    tasks: Vec<LegacyTask>,
    #[serde(default)]
    notes: BTreeMap<String, LegacyNote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyTask {
    #[serde(default)]
    row_id: String,
    #[serde(default, deserialize_with = "loose_int")]
    level: i64,
    #[serde(default, deserialize_with = "loose_bool")]
    collapsed: bool,
    #[serde(default, deserialize_with = "loose_string")]
    text: String,
    #[serde(default, deserialize_with = "loose_string")]
    status: String,
    #[serde(default, deserialize_with = "loose_int")]
    progress: i64,
    #[serde(default, deserialize_with = "loose_string")]
    manager: String,
    #[serde(default, deserialize_with = "loose_string")]
    ball: String,
    #[serde(default, deserialize_with = "loose_string")]
    start_date: String,
    #[serde(default, deserialize_with = "loose_string")]
    end_date: String,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyNote {
    #[serde(default, deserialize_with = "loose_string")]
    title: String,
    #[serde(default, deserialize_with = "loose_string")]
    content: String,
    #[serde(default)]
    comments: Vec<LegacyComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyComment {
    #[serde(default, deserialize_with = "loose_string")]
    user_email: String,
    #[serde(default, deserialize_with = "loose_string")]
    text: String,
    #[serde(default, deserialize_with = "loose_bool")]
    cleared: bool,
    #[serde(default)]
    time: Option<Value>,
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

fn loose_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Parse a legacy comment time: epoch milliseconds, RFC 3339, or the
/// spreadsheet's `yyyy/MM/dd HH:mm:ss` (taken as UTC).
fn parse_time(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                ["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M"]
                    .iter()
                    .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }),
        _ => None,
    }
}

impl LegacyTask {
    fn into_input(self, position: usize) -> TaskInput {
        let status = if self.status.is_empty() {
            DEFAULT_TASK_STATUS.to_string()
        } else {
            self.status
        };
        TaskInput {
            row_id: RowId::new(self.row_id),
            sort_order: position as i64,
            level: self.level.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            collapsed: self.collapsed,
            text: self.text,
            status,
            progress: self.progress.clamp(0, 100) as i32,
            manager: self.manager,
            ball: self.ball,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

/// Writes a legacy export into a project as the signed-in user.
pub struct LegacyImporter {
    store: Arc<dyn RemoteStore>,
    session: SessionContext,
}

impl LegacyImporter {
    pub fn new(store: Arc<dyn RemoteStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    pub async fn import(&self, project_id: ProjectId, json: &str) -> TaskgridResult<ImportReport> {
        let user = self.session.require_user()?;
        let export: LegacyExport =
            serde_json::from_str(json).map_err(|e| ValidationError::MalformedImport {
                reason: e.to_string(),
            })?;
        if let Some(position) = export.tasks.iter().position(|t| t.row_id.trim().is_empty()) {
            return Err(ValidationError::MalformedImport {
                reason: format!("task at position {} has no rowId", position),
            }
            .into());
        }

        let mut report = ImportReport::default();
        info!(project_id = %project_id, tasks = export.tasks.len(), "Importing legacy data");

        let rows = export
            .tasks
            .into_iter()
            .enumerate()
            .map(|(position, task)| {
                encode_row(&TaskWrite {
                    project_id,
                    input: task.into_input(position),
                    updated_by: user.id,
                })
            })
            .collect::<TaskgridResult<Vec<_>>>()?;
        if !rows.is_empty() {
            report.tasks = rows.len();
            self.store.insert(Table::Tasks, rows).await?;
        }

        for (row_id, note) in export.notes {
            let row_id = RowId::new(row_id);
            if !note.title.is_empty() || !note.content.is_empty() {
                match self.import_note(project_id, user, &row_id, &note).await {
                    Ok(()) => report.notes += 1,
                    Err(err) => {
                        warn!(row_id = %row_id, error = %err, "Note import failed, skipping")
                    }
                }
            }
            if !note.comments.is_empty() {
                let count = note.comments.len();
                match self.import_comments(project_id, user, &row_id, note.comments).await {
                    Ok(()) => report.comments += count,
                    Err(err) => {
                        warn!(row_id = %row_id, error = %err, "Comment import failed, skipping")
                    }
                }
            }
        }

        info!(
            project_id = %project_id,
            tasks = report.tasks,
            notes = report.notes,
            comments = report.comments,
            "Legacy import complete"
        );
        Ok(report)
    }

    async fn import_note(
        &self,
        project_id: ProjectId,
        user: &CurrentUser,
        row_id: &RowId,
        note: &LegacyNote,
    ) -> TaskgridResult<()> {
        let row = encode_row(&NoteWrite {
            project_id,
            row_id: row_id.clone(),
            title: note.title.clone(),
            content: note.content.clone(),
            updated_by: user.id,
        })?;
        self.store.insert(Table::Notes, vec![row]).await?;
        Ok(())
    }

    async fn import_comments(
        &self,
        project_id: ProjectId,
        user: &CurrentUser,
        row_id: &RowId,
        comments: Vec<LegacyComment>,
    ) -> TaskgridResult<()> {
        let rows = comments
            .into_iter()
            .map(|comment| {
                let author_email = if comment.user_email.is_empty() {
                    user.email.clone()
                } else {
                    comment.user_email
                };
                encode_row(&CommentWrite {
                    project_id,
                    row_id: row_id.clone(),
                    author_id: user.id,
                    author_email,
                    body: comment.text,
                    cleared: comment.cleared,
                    created_at: comment.time.as_ref().and_then(parse_time),
                })
            })
            .collect::<TaskgridResult<Vec<_>>>()?;
        self.store.insert(Table::Comments, rows).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_loose_fields_decode() {
        let task: LegacyTask = serde_json::from_value(json!({
            "rowId": "r1",
            "level": "2",
            "collapsed": "true",
            "progress": 40.0,
            "text": 12,
        }))
        .unwrap();
        let input = task.into_input(3);
        assert_eq!(input.level, 2);
        assert!(input.collapsed);
        assert_eq!(input.progress, 40);
        assert_eq!(input.text, "12");
        assert_eq!(input.sort_order, 3);
        assert_eq!(input.status, DEFAULT_TASK_STATUS);
    }

    #[test]
    fn test_parse_time_formats() {
        let t = parse_time(&json!("2023/04/05 06:07:08")).unwrap();
        assert_eq!((t.year(), t.month(), t.day(), t.hour()), (2023, 4, 5, 6));
        assert!(parse_time(&json!("2023-04-05T06:07:08Z")).is_some());
        assert_eq!(
            parse_time(&json!(0)),
            DateTime::<Utc>::from_timestamp_millis(0)
        );
        assert!(parse_time(&json!("yesterday")).is_none());
    }
}

//! Untyped change-feed payloads and their decoding into typed events.

use crate::{Row, Table};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use taskgrid_core::{BackendError, ChangeEvent, ChangeKind, DeletedRow, Record, Timestamp};

/// A row-level change exactly as the feed delivered it.
///
/// `new` and `old` are `None` when the feed sent no snapshot (or an empty
/// object) for that side of the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<Row>,
    #[serde(default)]
    pub old: Option<Row>,
    #[serde(default)]
    pub commit_timestamp: Option<Timestamp>,
}

impl RawChange {
    pub fn new(table: Table, kind: ChangeKind, new: Option<Row>, old: Option<Row>) -> Self {
        Self {
            table,
            kind,
            new: new.filter(|row| !row.is_empty()),
            old: old.filter(|row| !row.is_empty()),
            commit_timestamp: None,
        }
    }

    /// Decode into a typed event for the row type `T`.
    pub fn decode<T>(&self) -> Result<ChangeEvent<T>, BackendError>
    where
        T: Record + DeserializeOwned,
        T::Id: DeserializeOwned,
    {
        match self.kind {
            ChangeKind::Insert => Ok(ChangeEvent::Insert {
                new: self.decode_side::<T>("new", self.new.as_ref())?,
            }),
            ChangeKind::Update => Ok(ChangeEvent::Update {
                new: self.decode_side::<T>("new", self.new.as_ref())?,
                old: self.old.as_ref().and_then(|row| decode_row::<T>(row).ok()),
            }),
            ChangeKind::Delete => {
                let old = match &self.old {
                    Some(row) => Some(decode_row::<DeletedRow<T::Id>>(row).map_err(|e| {
                        BackendError::Decode {
                            what: format!("{} delete key", self.table),
                            reason: e.to_string(),
                        }
                    })?),
                    None => None,
                };
                let new = self.new.as_ref().and_then(|row| decode_row::<T>(row).ok());
                Ok(ChangeEvent::Delete { old, new })
            }
        }
    }

    fn decode_side<T: DeserializeOwned>(
        &self,
        side: &str,
        row: Option<&Row>,
    ) -> Result<T, BackendError> {
        let row = row.ok_or_else(|| BackendError::Decode {
            what: format!("{} {} change", self.table, self.kind.as_str()),
            reason: format!("missing {} snapshot", side),
        })?;
        decode_row(row).map_err(|e| BackendError::Decode {
            what: format!("{} {} snapshot", self.table, side),
            reason: e.to_string(),
        })
    }
}

fn decode_row<T: DeserializeOwned>(row: &Row) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(row.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskgrid_core::{EntityIdType, Note, RowId, Task, TaskId};
    use uuid::Uuid;

    fn task_row(id: Uuid, row_id: &str) -> Row {
        json!({
            "id": id,
            "project_id": Uuid::nil(),
            "row_id": row_id,
            "sort_order": 0,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_empty_snapshots_become_none() {
        let raw = RawChange::new(
            Table::Tasks,
            ChangeKind::Insert,
            Some(task_row(Uuid::now_v7(), "r1")),
            Some(Row::new()),
        );
        assert!(raw.old.is_none());
        let event = raw.decode::<Task>().unwrap();
        assert!(matches!(event, ChangeEvent::Insert { .. }));
    }

    #[test]
    fn test_delete_with_key_only_old_snapshot() {
        let id = Uuid::now_v7();
        let old = json!({ "id": id }).as_object().cloned().unwrap();
        let raw = RawChange::new(Table::Tasks, ChangeKind::Delete, None, Some(old));
        let event = raw.decode::<Task>().unwrap();
        assert_eq!(event.delete_target_id(), Some(TaskId::new(id)));
        assert!(event.delete_target_row_id().is_none());
        assert!(event.actor().is_none());
    }

    #[test]
    fn test_delete_with_row_id_only_old_snapshot() {
        let old = json!({ "row_id": "r9" }).as_object().cloned().unwrap();
        let raw = RawChange::new(Table::Notes, ChangeKind::Delete, None, Some(old));
        let event = raw.decode::<Note>().unwrap();
        assert!(event.delete_target_id().is_none());
        assert_eq!(event.delete_target_row_id(), Some(RowId::new("r9")));
    }

    #[test]
    fn test_update_without_new_snapshot_is_decode_error() {
        let raw = RawChange::new(Table::Tasks, ChangeKind::Update, None, None);
        let err = raw.decode::<Task>().unwrap_err();
        assert!(matches!(err, BackendError::Decode { .. }));
    }
}

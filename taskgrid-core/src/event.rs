//! Row-level change events delivered by the backend change feed.

use crate::{Record, RowId, UserId};
use serde::{Deserialize, Serialize};

/// Kind of row mutation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// Key columns of a deleted row.
///
/// Depending on the table's replica identity the backend may only send the
/// primary key of a deleted row, so every column is optional here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRow<I> {
    pub id: Option<I>,
    pub row_id: Option<RowId>,
}

impl<I> DeletedRow<I> {
    pub fn new(id: Option<I>, row_id: Option<RowId>) -> Self {
        Self { id, row_id }
    }
}

/// A typed change event for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T: Record> {
    Insert { new: T },
    Update { new: T, old: Option<T> },
    Delete {
        old: Option<DeletedRow<T::Id>>,
        new: Option<T>,
    },
}

impl<T: Record> ChangeEvent<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The post-change snapshot, when the event carries one.
    pub fn new_row(&self) -> Option<&T> {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => Some(new),
            ChangeEvent::Delete { new, .. } => new.as_ref(),
        }
    }

    /// Actor embedded in the new snapshot. Plain deletes have no actor.
    pub fn actor(&self) -> Option<UserId> {
        self.new_row().and_then(Record::updated_by)
    }

    /// Id of the row a delete targets: the old snapshot first, then the new.
    pub fn delete_target_id(&self) -> Option<T::Id> {
        match self {
            ChangeEvent::Delete { old, new } => old
                .as_ref()
                .and_then(|o| o.id)
                .or_else(|| new.as_ref().map(Record::id)),
            _ => None,
        }
    }

    /// Logical key of the row a delete targets, when known.
    pub fn delete_target_row_id(&self) -> Option<RowId> {
        match self {
            ChangeEvent::Delete { old, new } => old
                .as_ref()
                .and_then(|o| o.row_id.clone())
                .or_else(|| new.as_ref().map(|n| n.row_id().clone())),
            _ => None,
        }
    }
}

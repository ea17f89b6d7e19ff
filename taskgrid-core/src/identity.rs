//! Identity types for TASKGRID entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Common behaviour of strongly-typed, server-assigned identifiers.
pub trait EntityIdType:
    Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Wrap a raw UUID.
    fn new(uuid: Uuid) -> Self;

    /// Access the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh timestamp-sortable identifier.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_entity_id!(
    /// Project identifier.
    ProjectId
);
define_entity_id!(
    /// Authenticated user identifier.
    UserId
);
define_entity_id!(
    /// Server-assigned task identifier.
    TaskId
);
define_entity_id!(
    /// Server-assigned note identifier.
    NoteId
);
define_entity_id!(
    /// Server-assigned comment identifier.
    CommentId
);
define_entity_id!(
    /// Project membership identifier.
    MemberId
);

/// Caller-assigned logical key of a row.
///
/// Stable across import/export and used for de-duplication and for matching
/// notes and comments to the task row they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for RowId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

//! TASKGRID Storage - Backend Traits and In-Memory Implementation
//!
//! Defines the abstraction layer over the shared backend: keyed CRUD/RPC
//! (`RemoteStore`) and the realtime change feed (`ChangeFeed`). The
//! HTTP/WebSocket implementation lives in taskgrid-client.

pub mod change;
pub mod filter;
pub mod memory;
pub mod presence;
pub mod traits;

pub use change::RawChange;
pub use filter::{Condition, Filter, Order};
pub use memory::{InMemoryStore, StoreCall, StoreOperation};
pub use presence::{online_users, PresenceMeta, PresenceState};
pub use traits::{
    procedures, ChangeFeed, ChannelId, ChannelMessage, ChannelReceiver, ChannelStatus,
    ChannelTopic, RemoteStore,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A row as exchanged with the backend: column name → JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Backend tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Tasks,
    Notes,
    Comments,
    Projects,
    ProjectMembers,
    ProjectSettings,
    Profiles,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Tasks,
        Table::Notes,
        Table::Comments,
        Table::Projects,
        Table::ProjectMembers,
        Table::ProjectSettings,
        Table::Profiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Notes => "notes",
            Table::Comments => "comments",
            Table::Projects => "projects",
            Table::ProjectMembers => "project_members",
            Table::ProjectSettings => "project_settings",
            Table::Profiles => "profiles",
        }
    }

    /// Primary key column.
    pub fn primary_key(&self) -> &'static str {
        match self {
            Table::ProjectSettings => "project_id",
            _ => "id",
        }
    }

    /// Whether rows carry a `project_id` column (and can be watched per project).
    pub fn is_project_scoped(&self) -> bool {
        !matches!(self, Table::Projects | Table::Profiles)
    }

    /// Column sets that must be unique across the table.
    pub fn unique_keys(&self) -> &'static [&'static [&'static str]] {
        match self {
            Table::Tasks | Table::Notes => &[&["project_id", "row_id"]],
            Table::ProjectMembers => &[&["project_id", "user_id"]],
            Table::Profiles => &[&["email"]],
            Table::Comments | Table::Projects | Table::ProjectSettings => &[],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Async backend traits.
//!
//! `RemoteStore` is the keyed CRUD + RPC surface of the shared backend and
//! `ChangeFeed` is its realtime side (row change channels and presence).
//! Both are implemented by [`crate::InMemoryStore`] and by the HTTP/WebSocket
//! client in `taskgrid-client`.

use crate::{Filter, PresenceMeta, PresenceState, RawChange, Row, Table};
use ::async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use taskgrid_core::{ProjectId, TaskgridResult};

/// Remote procedures the backend exposes.
pub mod procedures {
    /// `create_project(p_name, p_description)` → created project row.
    pub const CREATE_PROJECT: &str = "create_project";
    /// `reorder_tasks(p_project_id, p_task_ids)` → assigns `sort_order = index`.
    pub const REORDER_TASKS: &str = "reorder_tasks";
    /// `find_user_by_email(p_email)` → matching profile rows.
    pub const FIND_USER_BY_EMAIL: &str = "find_user_by_email";
}

/// Keyed CRUD and RPC access to the backend store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows of `table` matching `filter`, ordered as the filter requests.
    async fn select(&self, table: Table, filter: &Filter) -> TaskgridResult<Vec<Row>>;

    /// Insert rows in one batch. Returns the stored rows (with server ids).
    async fn insert(&self, table: Table, rows: Vec<Row>) -> TaskgridResult<Vec<Row>>;

    /// Update one row by primary key. Returns the stored row.
    async fn update(&self, table: Table, id: &str, fields: Row) -> TaskgridResult<Row>;

    /// Delete every row matching `filter`.
    async fn delete(&self, table: Table, filter: &Filter) -> TaskgridResult<()>;

    /// Insert or, when a row with the same `conflict_key` columns exists,
    /// update it.
    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> TaskgridResult<Vec<Row>>;

    /// Invoke a remote procedure with named parameters.
    async fn rpc(&self, function: &str, params: Row) -> TaskgridResult<Value>;
}

/// Identity of one open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelTopic {
    /// Row changes of `table` restricted to one project.
    Table { table: Table, project_id: ProjectId },
    /// Presence of one project.
    Presence { project_id: ProjectId },
}

impl ChannelTopic {
    pub fn project_id(&self) -> ProjectId {
        match self {
            ChannelTopic::Table { project_id, .. } | ChannelTopic::Presence { project_id } => {
                *project_id
            }
        }
    }

    /// Channel name, e.g. `tasks:<project>` or `presence:<project>`.
    pub fn name(&self) -> String {
        match self {
            ChannelTopic::Table { table, project_id } => format!("{}:{}", table, project_id),
            ChannelTopic::Presence { project_id } => format!("presence:{}", project_id),
        }
    }
}

impl fmt::Display for ChannelTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Lifecycle status reported by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    Error(String),
}

/// Messages delivered on a channel, in backend emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(RawChange),
    PresenceSync(PresenceState),
}

/// Receiving side of an open channel.
pub type ChannelReceiver = tokio::sync::mpsc::UnboundedReceiver<ChannelMessage>;

/// Realtime change feed and presence.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a channel. Messages arrive on the returned receiver until the
    /// channel is removed.
    async fn open_channel(&self, topic: ChannelTopic)
        -> TaskgridResult<(ChannelId, ChannelReceiver)>;

    /// Publish this connection's presence on a presence channel.
    async fn track_presence(&self, channel: ChannelId, meta: PresenceMeta) -> TaskgridResult<()>;

    /// Close a channel. Removing an unknown channel is not an error.
    async fn remove_channel(&self, channel: ChannelId) -> TaskgridResult<()>;
}

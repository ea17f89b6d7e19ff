//! In-memory backend for tests and local development.
//!
//! Behaves like the shared relational backend closely enough for the sync
//! layer: server-assigned ids and timestamps, unique constraints, cascading
//! project deletes, the three remote procedures, per-project change channels
//! and presence. Several handles created with [`InMemoryStore::connect_as`]
//! share the same data, which is how multi-user scenarios are simulated.

use crate::filter::compare_values;
use crate::{
    procedures, ChangeFeed, ChannelId, ChannelMessage, ChannelReceiver, ChannelStatus,
    ChannelTopic, Filter, PresenceMeta, PresenceState, RawChange, RemoteStore, Row, Table,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use taskgrid_core::{
    AuthorizationError, BackendError, ChangeKind, ConflictError, ProjectId, TaskgridResult,
    UserId, ValidationError,
};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Kind of store call, for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
    Rpc,
}

/// One recorded store call. `target` is the table name or procedure name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: StoreOperation,
    pub target: String,
    pub rows: usize,
}

struct ChannelEntry {
    topic: ChannelTopic,
    sender: mpsc::UnboundedSender<ChannelMessage>,
    tracks_presence: bool,
}

#[derive(Default)]
struct Shared {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
    channels: Mutex<BTreeMap<ChannelId, ChannelEntry>>,
    presence: Mutex<HashMap<ProjectId, PresenceState>>,
    next_channel: AtomicU64,
    failures: Mutex<Vec<(StoreOperation, String)>>,
    calls: Mutex<Vec<StoreCall>>,
}

/// Shared in-memory backend. Cloning yields another handle on the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    actor: Option<UserId>,
}

fn lock<T>(mutex: &Mutex<T>) -> TaskgridResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| BackendError::LockPoisoned.into())
}

fn now_value() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn column_str(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the same data acting as `user` (used by procedures that
    /// need the caller's identity, like `create_project`).
    pub fn connect_as(&self, user: UserId) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            actor: Some(user),
        }
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    /// Make the next matching call fail with `BackendError::Unavailable`.
    pub fn fail_next(&self, operation: StoreOperation, target: impl Into<String>) {
        if let Ok(mut failures) = self.shared.failures.lock() {
            failures.push((operation, target.into()));
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.shared
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of calls of `operation` against `target`.
    pub fn call_count(&self, operation: StoreOperation, target: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation == operation && c.target == target)
            .count()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.shared.calls.lock() {
            calls.clear();
        }
    }

    /// Topics of all open channels, in channel order.
    pub fn open_topics(&self) -> Vec<ChannelTopic> {
        self.shared
            .channels
            .lock()
            .map(|channels| channels.values().map(|e| e.topic.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of a table, in insertion order.
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        let tables = self.shared.tables.read().await;
        tables.get(&table).cloned().unwrap_or_default()
    }

    fn begin(&self, operation: StoreOperation, target: &str, rows: usize) -> TaskgridResult<()> {
        lock(&self.shared.calls)?.push(StoreCall {
            operation,
            target: target.to_string(),
            rows,
        });
        let mut failures = lock(&self.shared.failures)?;
        if let Some(pos) = failures
            .iter()
            .position(|(op, t)| *op == operation && t == target)
        {
            failures.remove(pos);
            return Err(BackendError::Unavailable {
                reason: format!("injected failure on {:?} {}", operation, target),
            }
            .into());
        }
        Ok(())
    }

    /// Deliver a change to every channel watching `table` for the row's project.
    fn emit(&self, table: Table, kind: ChangeKind, new: Option<&Row>, old: Option<&Row>) {
        if !table.is_project_scoped() {
            return;
        }
        let project = new
            .and_then(|r| column_str(r, "project_id"))
            .or_else(|| old.and_then(|r| column_str(r, "project_id")));
        let Some(project) = project else {
            return;
        };
        let Ok(channels) = self.shared.channels.lock() else {
            return;
        };
        let change = RawChange::new(table, kind, new.cloned(), old.cloned());
        for (id, entry) in channels.iter() {
            if let ChannelTopic::Table {
                table: watched,
                project_id,
            } = &entry.topic
            {
                if *watched == table && project_id.to_string() == project {
                    if entry
                        .sender
                        .send(ChannelMessage::Change(change.clone()))
                        .is_err()
                    {
                        debug!(channel = %id, "Dropping change for closed receiver");
                    }
                }
            }
        }
    }

    fn broadcast_presence(&self, project_id: ProjectId) -> TaskgridResult<()> {
        let state = lock(&self.shared.presence)?
            .get(&project_id)
            .cloned()
            .unwrap_or_default();
        let channels = lock(&self.shared.channels)?;
        for entry in channels.values() {
            if entry.topic == (ChannelTopic::Presence { project_id }) {
                let _ = entry.sender.send(ChannelMessage::PresenceSync(state.clone()));
            }
        }
        Ok(())
    }

    /// Fill server-side defaults of a new row.
    fn prepare_new_row(table: Table, mut row: Row) -> Row {
        if table.primary_key() == "id" && !row.contains_key("id") {
            row.insert("id".to_string(), Value::String(Uuid::now_v7().to_string()));
        }
        if !row.contains_key("created_at") {
            row.insert("created_at".to_string(), now_value());
        }
        row.insert("updated_at".to_string(), now_value());
        row
    }

    fn check_unique(
        table: Table,
        existing: &[Row],
        candidate: &Row,
        skip: Option<usize>,
    ) -> TaskgridResult<()> {
        let pk = [table.primary_key()];
        let mut keys: Vec<&[&str]> = table.unique_keys().to_vec();
        keys.insert(0, &pk);
        for columns in keys {
            let values: Vec<Option<&Value>> = columns.iter().map(|c| candidate.get(*c)).collect();
            if values.iter().any(Option::is_none) {
                continue;
            }
            let clash = existing.iter().enumerate().any(|(idx, row)| {
                Some(idx) != skip
                    && columns
                        .iter()
                        .zip(values.iter())
                        .all(|(c, v)| row.get(*c) == *v)
            });
            if clash {
                return Err(ConflictError::UniqueViolation {
                    table: table.to_string(),
                    constraint: format!("{}_{}_key", table, columns.join("_")),
                }
                .into());
            }
        }
        Ok(())
    }

    fn insert_locked(
        &self,
        tables: &mut HashMap<Table, Vec<Row>>,
        table: Table,
        rows: Vec<Row>,
    ) -> TaskgridResult<Vec<Row>> {
        let stored = tables.entry(table).or_default();
        let prepared: Vec<Row> = rows
            .into_iter()
            .map(|row| Self::prepare_new_row(table, row))
            .collect();

        // All-or-nothing: validate the whole batch before storing any row.
        let mut staged: Vec<Row> = stored.clone();
        for row in &prepared {
            Self::check_unique(table, &staged, row, None)?;
            staged.push(row.clone());
        }

        for row in &prepared {
            stored.push(row.clone());
            self.emit(table, ChangeKind::Insert, Some(row), None);
        }
        Ok(prepared)
    }

    fn update_locked(
        &self,
        tables: &mut HashMap<Table, Vec<Row>>,
        table: Table,
        index: usize,
        fields: Row,
    ) -> TaskgridResult<Row> {
        let stored = tables.entry(table).or_default();
        let pk = table.primary_key();
        let old = stored[index].clone();
        let mut new = old.clone();
        for (column, value) in fields {
            if column != pk {
                new.insert(column, value);
            }
        }
        new.insert("updated_at".to_string(), now_value());
        Self::check_unique(table, stored, &new, Some(index))?;
        stored[index] = new.clone();
        self.emit(table, ChangeKind::Update, Some(&new), Some(&old));
        Ok(new)
    }

    fn delete_locked(
        &self,
        tables: &mut HashMap<Table, Vec<Row>>,
        table: Table,
        filter: &Filter,
    ) -> Vec<Row> {
        let stored = tables.entry(table).or_default();
        let (removed, kept): (Vec<Row>, Vec<Row>) =
            stored.drain(..).partition(|row| filter.matches(row));
        *stored = kept;
        for row in &removed {
            self.emit(table, ChangeKind::Delete, None, Some(row));
        }
        removed
    }

    fn find_index(rows: &[Row], column: &str, value: &str) -> Option<usize> {
        rows.iter()
            .position(|row| column_str(row, column).as_deref() == Some(value))
    }

    fn require_str(params: &Row, name: &str) -> TaskgridResult<String> {
        params
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ValidationError::RequiredFieldMissing {
                    field: name.to_string(),
                }
                .into()
            })
    }

    async fn create_project(&self, params: Row) -> TaskgridResult<Value> {
        let owner = self.actor.ok_or(AuthorizationError::NotSignedIn)?;
        let name = Self::require_str(&params, "p_name")?;
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "p_name".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        let description = params
            .get("p_description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut tables = self.shared.tables.write().await;
        let mut project = Row::new();
        project.insert("name".to_string(), Value::String(name));
        project.insert("description".to_string(), Value::String(description));
        project.insert("created_by".to_string(), Value::String(owner.to_string()));
        let project = self
            .insert_locked(&mut tables, Table::Projects, vec![project])?
            .remove(0);
        let project_id = project.get("id").cloned().unwrap_or(Value::Null);

        let mut member = Row::new();
        member.insert("project_id".to_string(), project_id.clone());
        member.insert("user_id".to_string(), Value::String(owner.to_string()));
        member.insert("role".to_string(), Value::String("owner".to_string()));
        self.insert_locked(&mut tables, Table::ProjectMembers, vec![member])?;

        let mut settings = Row::new();
        settings.insert("project_id".to_string(), project_id);
        self.insert_locked(&mut tables, Table::ProjectSettings, vec![settings])?;

        Ok(Value::Object(project))
    }

    async fn reorder_tasks(&self, params: Row) -> TaskgridResult<Value> {
        let project_id = Self::require_str(&params, "p_project_id")?;
        let ids: Vec<String> = params
            .get("p_task_ids")
            .and_then(Value::as_array)
            .ok_or_else(|| ValidationError::RequiredFieldMissing {
                field: "p_task_ids".to_string(),
            })?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let mut tables = self.shared.tables.write().await;
        for (position, id) in ids.iter().enumerate() {
            let index = tables.get(&Table::Tasks).and_then(|rows| {
                rows.iter().position(|row| {
                    column_str(row, "id").as_deref() == Some(id.as_str())
                        && column_str(row, "project_id").as_deref() == Some(project_id.as_str())
                })
            });
            if let Some(index) = index {
                let mut fields = Row::new();
                fields.insert("sort_order".to_string(), Value::from(position as i64));
                if let Some(actor) = self.actor {
                    fields.insert("updated_by".to_string(), Value::String(actor.to_string()));
                }
                self.update_locked(&mut tables, Table::Tasks, index, fields)?;
            }
        }
        Ok(Value::Null)
    }

    async fn find_user_by_email(&self, params: Row) -> TaskgridResult<Value> {
        let email = Self::require_str(&params, "p_email")?.to_lowercase();
        let tables = self.shared.tables.read().await;
        let matches: Vec<Value> = tables
            .get(&Table::Profiles)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        column_str(row, "email").map(|e| e.to_lowercase()) == Some(email.clone())
                    })
                    .cloned()
                    .map(Value::Object)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(matches))
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn select(&self, table: Table, filter: &Filter) -> TaskgridResult<Vec<Row>> {
        self.begin(StoreOperation::Select, table.as_str(), 0)?;
        let tables = self.shared.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(&table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        filter.sort(&mut rows);
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> TaskgridResult<Vec<Row>> {
        self.begin(StoreOperation::Insert, table.as_str(), rows.len())?;
        let mut tables = self.shared.tables.write().await;
        self.insert_locked(&mut tables, table, rows)
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> TaskgridResult<Row> {
        self.begin(StoreOperation::Update, table.as_str(), 1)?;
        let mut tables = self.shared.tables.write().await;
        let index = tables
            .get(&table)
            .and_then(|rows| Self::find_index(rows, table.primary_key(), id))
            .ok_or_else(|| BackendError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        self.update_locked(&mut tables, table, index, fields)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> TaskgridResult<()> {
        self.begin(StoreOperation::Delete, table.as_str(), 0)?;
        let mut tables = self.shared.tables.write().await;
        let removed = self.delete_locked(&mut tables, table, filter);
        if table == Table::Projects {
            for row in &removed {
                if let Some(project_id) = column_str(row, "id") {
                    let cascade = Filter::new().eq("project_id", project_id);
                    for child in Table::ALL.iter().filter(|t| t.is_project_scoped()) {
                        self.delete_locked(&mut tables, *child, &cascade);
                    }
                }
            }
        }
        Ok(())
    }

    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> TaskgridResult<Vec<Row>> {
        self.begin(StoreOperation::Upsert, table.as_str(), rows.len())?;
        let mut tables = self.shared.tables.write().await;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let existing = tables.get(&table).and_then(|stored| {
                stored.iter().position(|candidate| {
                    conflict_key.iter().all(|column| {
                        match (candidate.get(*column), row.get(*column)) {
                            (Some(a), Some(b)) => compare_values(a, b).is_eq(),
                            _ => false,
                        }
                    })
                })
            });
            match existing {
                Some(index) => out.push(self.update_locked(&mut tables, table, index, row)?),
                None => out.extend(self.insert_locked(&mut tables, table, vec![row])?),
            }
        }
        Ok(out)
    }

    async fn rpc(&self, function: &str, params: Row) -> TaskgridResult<Value> {
        self.begin(StoreOperation::Rpc, function, 0)?;
        match function {
            procedures::CREATE_PROJECT => self.create_project(params).await,
            procedures::REORDER_TASKS => self.reorder_tasks(params).await,
            procedures::FIND_USER_BY_EMAIL => self.find_user_by_email(params).await,
            other => Err(BackendError::UnknownProcedure {
                name: other.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl ChangeFeed for InMemoryStore {
    async fn open_channel(
        &self,
        topic: ChannelTopic,
    ) -> TaskgridResult<(ChannelId, ChannelReceiver)> {
        let id = ChannelId(self.shared.next_channel.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(ChannelMessage::Status(ChannelStatus::Subscribed));
        if let ChannelTopic::Presence { project_id } = &topic {
            let state = lock(&self.shared.presence)?
                .get(project_id)
                .cloned()
                .unwrap_or_default();
            let _ = sender.send(ChannelMessage::PresenceSync(state));
        }
        debug!(channel = %id, topic = %topic, "Opened channel");
        lock(&self.shared.channels)?.insert(
            id,
            ChannelEntry {
                topic,
                sender,
                tracks_presence: false,
            },
        );
        Ok((id, receiver))
    }

    async fn track_presence(&self, channel: ChannelId, meta: PresenceMeta) -> TaskgridResult<()> {
        let project_id = {
            let mut channels = lock(&self.shared.channels)?;
            let entry = channels
                .get_mut(&channel)
                .ok_or_else(|| BackendError::ChannelClosed {
                    topic: channel.to_string(),
                })?;
            let ChannelTopic::Presence { project_id } = entry.topic else {
                return Err(ValidationError::InvalidValue {
                    field: "channel".to_string(),
                    reason: format!("{} is not a presence channel", entry.topic),
                }
                .into());
            };
            entry.tracks_presence = true;
            project_id
        };
        lock(&self.shared.presence)?
            .entry(project_id)
            .or_default()
            .insert(channel.to_string(), vec![meta]);
        self.broadcast_presence(project_id)
    }

    async fn remove_channel(&self, channel: ChannelId) -> TaskgridResult<()> {
        let removed = lock(&self.shared.channels)?.remove(&channel);
        let Some(entry) = removed else {
            return Ok(());
        };
        let _ = entry
            .sender
            .send(ChannelMessage::Status(ChannelStatus::Closed));
        debug!(channel = %channel, topic = %entry.topic, "Removed channel");
        if entry.tracks_presence {
            let project_id = entry.topic.project_id();
            if let Some(state) = lock(&self.shared.presence)?.get_mut(&project_id) {
                state.remove(&channel.to_string());
            }
            self.broadcast_presence(project_id)?;
        }
        Ok(())
    }
}

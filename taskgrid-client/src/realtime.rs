//! Realtime change feed over the backend's Phoenix websocket, with
//! reconnect backoff.
//!
//! One socket carries every channel. Channels stay registered across
//! reconnects and are re-joined when the socket comes back; frames queued
//! while disconnected are discarded.

use crate::config::{ClientConfig, ReconnectConfig};
use crate::error::ClientError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use taskgrid_core::{BackendError, ChangeKind, TaskgridResult, Timestamp};
use taskgrid_storage::{
    ChangeFeed, ChannelId, ChannelMessage, ChannelReceiver, ChannelStatus, ChannelTopic,
    PresenceMeta, PresenceState, RawChange, Row, Table,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "1.0.0";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PHOENIX_TOPIC: &str = "phoenix";

// ============================================================================
// WIRE FRAMES
// ============================================================================

/// Phoenix topic for a channel, e.g. `realtime:tasks:<project>`.
pub fn phoenix_topic(topic: &ChannelTopic) -> String {
    format!("realtime:{}", topic.name())
}

/// `phx_join` for a channel. Table channels subscribe to row changes of
/// their project; presence channels publish under `presence_key`.
pub fn join_frame(
    topic: &ChannelTopic,
    join_ref: &str,
    presence_key: &str,
    access_token: &str,
) -> Value {
    let postgres_changes = match topic {
        ChannelTopic::Table { table, project_id } => json!([{
            "event": "*",
            "schema": "public",
            "table": table.as_str(),
            "filter": format!("project_id=eq.{}", project_id),
        }]),
        ChannelTopic::Presence { .. } => json!([]),
    };
    json!({
        "topic": phoenix_topic(topic),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": presence_key },
                "postgres_changes": postgres_changes,
            },
            "access_token": access_token,
        },
        "ref": join_ref,
        "join_ref": join_ref,
    })
}

pub fn track_frame(topic: &ChannelTopic, join_ref: &str, msg_ref: &str, meta: &PresenceMeta) -> Value {
    json!({
        "topic": phoenix_topic(topic),
        "event": "presence",
        "payload": { "type": "presence", "event": "track", "payload": meta },
        "ref": msg_ref,
        "join_ref": join_ref,
    })
}

pub fn leave_frame(topic: &ChannelTopic, join_ref: &str, msg_ref: &str) -> Value {
    json!({
        "topic": phoenix_topic(topic),
        "event": "phx_leave",
        "payload": {},
        "ref": msg_ref,
        "join_ref": join_ref,
    })
}

pub fn heartbeat_frame(msg_ref: &str) -> Value {
    json!({
        "topic": PHOENIX_TOPIC,
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref,
    })
}

/// A decoded inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

pub fn decode_frame(text: &str) -> Result<InboundFrame, BackendError> {
    serde_json::from_str(text).map_err(|e| BackendError::Decode {
        what: "realtime frame".to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct PostgresChange {
    #[serde(rename = "type")]
    kind: ChangeKind,
    table: Table,
    #[serde(default)]
    record: Option<Row>,
    #[serde(default)]
    old_record: Option<Row>,
    #[serde(default)]
    commit_timestamp: Option<Timestamp>,
}

#[derive(Debug, Default, Deserialize)]
struct PresenceEntry {
    #[serde(default)]
    metas: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PresenceDiff {
    #[serde(default)]
    joins: HashMap<String, PresenceEntry>,
    #[serde(default)]
    leaves: HashMap<String, PresenceEntry>,
}

fn decode_metas(entry: PresenceEntry) -> Vec<PresenceMeta> {
    entry
        .metas
        .into_iter()
        .filter_map(|meta| match serde_json::from_value::<PresenceMeta>(meta) {
            Ok(meta) => Some(meta),
            Err(err) => {
                debug!(error = %err, "ignoring presence meta");
                None
            }
        })
        .collect()
}

/// Turn a frame addressed to one channel into the message its subscriber
/// sees. `presence` is the channel's running presence snapshot.
pub fn interpret_frame(
    frame: InboundFrame,
    join_ref: &str,
    presence: &mut PresenceState,
) -> Result<Option<ChannelMessage>, BackendError> {
    match frame.event.as_str() {
        "phx_reply" => {
            if frame.msg_ref.as_deref() != Some(join_ref) {
                return Ok(None);
            }
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Ok(Some(ChannelMessage::Status(ChannelStatus::Subscribed))),
                _ => {
                    let reason = frame
                        .payload
                        .pointer("/response/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("join rejected")
                        .to_string();
                    Ok(Some(ChannelMessage::Status(ChannelStatus::Error(reason))))
                }
            }
        }
        "phx_error" => Ok(Some(ChannelMessage::Status(ChannelStatus::Error(
            "channel error".to_string(),
        )))),
        "phx_close" => Ok(Some(ChannelMessage::Status(ChannelStatus::Closed))),
        "postgres_changes" => {
            let data = frame.payload.get("data").cloned().unwrap_or(Value::Null);
            let change: PostgresChange =
                serde_json::from_value(data).map_err(|e| BackendError::Decode {
                    what: "postgres change".to_string(),
                    reason: e.to_string(),
                })?;
            let mut raw = RawChange::new(change.table, change.kind, change.record, change.old_record);
            raw.commit_timestamp = change.commit_timestamp;
            Ok(Some(ChannelMessage::Change(raw)))
        }
        "presence_state" => {
            let entries: HashMap<String, PresenceEntry> = serde_json::from_value(frame.payload)
                .map_err(|e| BackendError::Decode {
                    what: "presence state".to_string(),
                    reason: e.to_string(),
                })?;
            presence.clear();
            for (key, entry) in entries {
                presence.insert(key, decode_metas(entry));
            }
            Ok(Some(ChannelMessage::PresenceSync(presence.clone())))
        }
        "presence_diff" => {
            let diff: PresenceDiff = serde_json::from_value(frame.payload).map_err(|e| {
                BackendError::Decode {
                    what: "presence diff".to_string(),
                    reason: e.to_string(),
                }
            })?;
            for (key, entry) in diff.leaves {
                let leaving = decode_metas(entry);
                if let Some(metas) = presence.get_mut(&key) {
                    metas.retain(|meta| !leaving.contains(meta));
                    if metas.is_empty() {
                        presence.remove(&key);
                    }
                }
            }
            for (key, entry) in diff.joins {
                presence.entry(key).or_default().extend(decode_metas(entry));
            }
            Ok(Some(ChannelMessage::PresenceSync(presence.clone())))
        }
        _ => Ok(None),
    }
}

pub fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    base_ms.saturating_add(nanos % jitter_ms)
}

// ============================================================================
// CHANNEL REGISTRY
// ============================================================================

struct ChannelEntry {
    topic: ChannelTopic,
    join_ref: String,
    sender: mpsc::UnboundedSender<ChannelMessage>,
    presence: PresenceState,
}

struct Registry {
    channels: Mutex<HashMap<ChannelId, ChannelEntry>>,
    next_channel: AtomicU64,
    next_ref: AtomicU64,
    presence_key: String,
    access_token: String,
}

impl Registry {
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn join_frames(&self) -> Result<Vec<Value>, BackendError> {
        let channels = self.channels.lock().map_err(|_| BackendError::LockPoisoned)?;
        Ok(channels
            .values()
            .map(|entry| {
                join_frame(&entry.topic, &entry.join_ref, &self.presence_key, &self.access_token)
            })
            .collect())
    }

    /// Route an inbound frame to the channel it names.
    fn dispatch(&self, text: &str) -> Result<(), BackendError> {
        let frame = decode_frame(text)?;
        if frame.topic == PHOENIX_TOPIC {
            return Ok(());
        }
        let mut channels = self.channels.lock().map_err(|_| BackendError::LockPoisoned)?;
        let Some(entry) = channels
            .values_mut()
            .find(|entry| phoenix_topic(&entry.topic) == frame.topic)
        else {
            debug!(topic = %frame.topic, "frame for unknown channel");
            return Ok(());
        };
        if let Some(message) = interpret_frame(frame, &entry.join_ref, &mut entry.presence)? {
            let _ = entry.sender.send(message);
        }
        Ok(())
    }

    fn broadcast_status(&self, status: ChannelStatus) {
        if let Ok(channels) = self.channels.lock() {
            for entry in channels.values() {
                let _ = entry.sender.send(ChannelMessage::Status(status.clone()));
            }
        }
    }
}

// ============================================================================
// FEED
// ============================================================================

/// `ChangeFeed` over a shared websocket connection.
pub struct RealtimeFeed {
    registry: Arc<Registry>,
    outbound: mpsc::UnboundedSender<Value>,
    manager: JoinHandle<()>,
}

impl RealtimeFeed {
    /// Spawn the connection manager. Must be called inside a tokio runtime.
    pub fn spawn(config: &ClientConfig) -> Result<Self, ClientError> {
        let url = format!(
            "{}/websocket?apikey={}&vsn={}",
            config.realtime_endpoint.trim_end_matches('/'),
            config.auth.anon_key,
            PROTOCOL_VERSION
        );
        let registry = Arc::new(Registry {
            channels: Mutex::new(HashMap::new()),
            next_channel: AtomicU64::new(1),
            next_ref: AtomicU64::new(1),
            presence_key: config.user.id.to_string(),
            access_token: config.bearer_token().to_string(),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let manager = tokio::spawn(run_connection(
            url,
            registry.clone(),
            config.reconnect.clone(),
            outbound_rx,
        ));
        Ok(Self {
            registry,
            outbound,
            manager,
        })
    }

    fn queue(&self, frame: Value) -> TaskgridResult<()> {
        self.outbound.send(frame).map_err(|_| {
            BackendError::Unavailable {
                reason: "realtime connection manager stopped".to_string(),
            }
            .into()
        })
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        self.manager.abort();
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn open_channel(
        &self,
        topic: ChannelTopic,
    ) -> TaskgridResult<(ChannelId, ChannelReceiver)> {
        let id = ChannelId(self.registry.next_channel.fetch_add(1, Ordering::Relaxed));
        let join_ref = self.registry.next_ref();
        let frame = join_frame(
            &topic,
            &join_ref,
            &self.registry.presence_key,
            &self.registry.access_token,
        );
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut channels = self
                .registry
                .channels
                .lock()
                .map_err(|_| BackendError::LockPoisoned)?;
            channels.insert(
                id,
                ChannelEntry {
                    topic: topic.clone(),
                    join_ref,
                    sender,
                    presence: PresenceState::new(),
                },
            );
        }
        info!(channel = %id, %topic, "joining channel");
        self.queue(frame)?;
        Ok((id, receiver))
    }

    async fn track_presence(&self, channel: ChannelId, meta: PresenceMeta) -> TaskgridResult<()> {
        let frame = {
            let channels = self
                .registry
                .channels
                .lock()
                .map_err(|_| BackendError::LockPoisoned)?;
            let entry = channels.get(&channel).ok_or_else(|| BackendError::ChannelClosed {
                topic: channel.to_string(),
            })?;
            track_frame(&entry.topic, &entry.join_ref, &self.registry.next_ref(), &meta)
        };
        self.queue(frame)
    }

    async fn remove_channel(&self, channel: ChannelId) -> TaskgridResult<()> {
        let removed = self
            .registry
            .channels
            .lock()
            .map_err(|_| BackendError::LockPoisoned)?
            .remove(&channel);
        let Some(entry) = removed else {
            return Ok(());
        };
        info!(channel = %channel, topic = %entry.topic, "leaving channel");
        let _ = entry.sender.send(ChannelMessage::Status(ChannelStatus::Closed));
        let frame = leave_frame(&entry.topic, &entry.join_ref, &self.registry.next_ref());
        self.queue(frame)
    }
}

async fn run_connection(
    url: String,
    registry: Arc<Registry>,
    reconnect: ReconnectConfig,
    mut outbound: mpsc::UnboundedReceiver<Value>,
) {
    let mut backoff = reconnect.initial_ms;
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!("realtime connected");
                backoff = reconnect.initial_ms;
                let (mut write, mut read) = stream.split();

                while outbound.try_recv().is_ok() {}
                let joins = match registry.join_frames() {
                    Ok(joins) => joins,
                    Err(err) => {
                        warn!(error = %err, "cannot read channel registry");
                        return;
                    }
                };
                let mut healthy = true;
                for frame in joins {
                    if write.send(Message::Text(frame.to_string())).await.is_err() {
                        healthy = false;
                        break;
                    }
                }

                let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
                heartbeat.tick().await;
                while healthy {
                    tokio::select! {
                        message = read.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(err) = registry.dispatch(&text) {
                                    warn!(error = %err, "dropping realtime frame");
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => healthy = false,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "realtime read failed");
                                healthy = false;
                            }
                        },
                        frame = outbound.recv() => match frame {
                            Some(frame) => {
                                if write.send(Message::Text(frame.to_string())).await.is_err() {
                                    healthy = false;
                                }
                            }
                            None => return,
                        },
                        _ = heartbeat.tick() => {
                            let frame = heartbeat_frame(&registry.next_ref());
                            if write.send(Message::Text(frame.to_string())).await.is_err() {
                                healthy = false;
                            }
                        }
                    }
                }
                registry.broadcast_status(ChannelStatus::Error("disconnected".to_string()));
            }
            Err(err) => {
                warn!(error = %err, backoff_ms = backoff, "realtime connect failed");
            }
        }

        let delay = jittered_backoff(backoff, reconnect.jitter_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        backoff = reconnect.next_backoff(backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskgrid_core::{CurrentUser, EntityIdType, ProjectId, UserId};

    fn tasks_topic() -> ChannelTopic {
        ChannelTopic::Table {
            table: Table::Tasks,
            project_id: ProjectId::new(uuid::Uuid::nil()),
        }
    }

    fn frame(value: Value) -> InboundFrame {
        decode_frame(&value.to_string()).unwrap()
    }

    #[test]
    fn test_join_frame_filters_by_project() {
        let value = join_frame(&tasks_topic(), "1", "user-1", "token");
        assert_eq!(
            value["topic"],
            "realtime:tasks:00000000-0000-0000-0000-000000000000"
        );
        let change = &value["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "tasks");
        assert_eq!(
            change["filter"],
            "project_id=eq.00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(value["payload"]["access_token"], "token");
    }

    #[test]
    fn test_join_reply_subscribes_only_for_join_ref() {
        let mut presence = PresenceState::new();
        let reply = json!({"topic": "realtime:x", "event": "phx_reply", "payload": {"status": "ok"}, "ref": "7"});
        assert_eq!(
            interpret_frame(frame(reply.clone()), "7", &mut presence).unwrap(),
            Some(ChannelMessage::Status(ChannelStatus::Subscribed))
        );
        assert_eq!(interpret_frame(frame(reply), "8", &mut presence).unwrap(), None);
    }

    #[test]
    fn test_postgres_change_becomes_raw_change() {
        let mut presence = PresenceState::new();
        let id = uuid::Uuid::now_v7();
        let value = json!({
            "topic": "realtime:tasks:p",
            "event": "postgres_changes",
            "payload": {"data": {
                "type": "DELETE",
                "table": "tasks",
                "record": {},
                "old_record": {"id": id},
                "commit_timestamp": "2026-01-05T10:00:00Z",
            }},
            "ref": null,
        });
        match interpret_frame(frame(value), "1", &mut presence).unwrap() {
            Some(ChannelMessage::Change(raw)) => {
                assert_eq!(raw.table, Table::Tasks);
                assert_eq!(raw.kind, ChangeKind::Delete);
                assert!(raw.new.is_none());
                assert!(raw.commit_timestamp.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_presence_state_then_diff() {
        let alice = PresenceMeta::for_user(
            &CurrentUser::new(UserId::now_v7(), "alice@example.com"),
            Utc::now(),
        );
        let bob = PresenceMeta::for_user(
            &CurrentUser::new(UserId::now_v7(), "bob@example.com"),
            Utc::now(),
        );
        let mut presence = PresenceState::new();

        let state = json!({"topic": "realtime:presence:p", "event": "presence_state",
            "payload": {"a": {"metas": [serde_json::to_value(&alice).unwrap()]}}});
        interpret_frame(frame(state), "1", &mut presence).unwrap();
        assert_eq!(presence.len(), 1);

        let diff = json!({"topic": "realtime:presence:p", "event": "presence_diff",
            "payload": {
                "joins": {"b": {"metas": [serde_json::to_value(&bob).unwrap()]}},
                "leaves": {"a": {"metas": [serde_json::to_value(&alice).unwrap()]}},
            }});
        match interpret_frame(frame(diff), "1", &mut presence).unwrap() {
            Some(ChannelMessage::PresenceSync(state)) => {
                assert_eq!(state.len(), 1);
                assert_eq!(state["b"][0].email, "bob@example.com");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_change_is_decode_error() {
        let mut presence = PresenceState::new();
        let value = json!({"topic": "t", "event": "postgres_changes", "payload": {"data": {"type": "TRUNCATE"}}});
        assert!(matches!(
            interpret_frame(frame(value), "1", &mut presence),
            Err(BackendError::Decode { .. })
        ));
    }

    #[test]
    fn test_jittered_backoff_bounds() {
        assert_eq!(jittered_backoff(500, 0), 500);
        let delay = jittered_backoff(500, 100);
        assert!((500..600).contains(&delay));
    }
}

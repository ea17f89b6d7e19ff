//! Per-project change-feed subscriptions.
//!
//! One project is watched at a time: its task, note and comment change
//! channels plus its presence channel. Every channel gets its own forwarding
//! task so per-table ordering is preserved, and all of them feed a single
//! `ProjectEvent` queue drained by the owner of the local state.

use chrono::Utc;
use std::sync::Arc;
use taskgrid_core::{ProjectId, SessionContext, TaskgridResult};
use taskgrid_storage::{
    ChangeFeed, ChannelId, ChannelMessage, ChannelReceiver, ChannelStatus, ChannelTopic,
    PresenceMeta, PresenceState, RawChange, Table,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tables watched for every subscribed project.
pub const WATCHED_TABLES: [Table; 3] = [Table::Tasks, Table::Notes, Table::Comments];

/// Events forwarded from the channels of one project.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    TaskChange {
        project_id: ProjectId,
        change: RawChange,
    },
    NoteChange {
        project_id: ProjectId,
        change: RawChange,
    },
    CommentChange {
        project_id: ProjectId,
        change: RawChange,
    },
    PresenceSync {
        project_id: ProjectId,
        state: PresenceState,
    },
    ChannelStatus {
        project_id: ProjectId,
        topic: ChannelTopic,
        status: ChannelStatus,
    },
}

impl ProjectEvent {
    pub fn project_id(&self) -> ProjectId {
        match self {
            ProjectEvent::TaskChange { project_id, .. }
            | ProjectEvent::NoteChange { project_id, .. }
            | ProjectEvent::CommentChange { project_id, .. }
            | ProjectEvent::PresenceSync { project_id, .. }
            | ProjectEvent::ChannelStatus { project_id, .. } => *project_id,
        }
    }
}

struct OpenChannel {
    id: ChannelId,
    topic: ChannelTopic,
    forwarder: JoinHandle<()>,
}

/// The set of channels currently open for one project.
#[derive(Default)]
pub struct ActiveSubscriptions {
    project_id: Option<ProjectId>,
    channels: Vec<OpenChannel>,
}

impl ActiveSubscriptions {
    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn topics(&self) -> Vec<ChannelTopic> {
        self.channels.iter().map(|c| c.topic.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Opens and closes the channels of the active project.
pub struct SubscriptionManager {
    feed: Arc<dyn ChangeFeed>,
    session: SessionContext,
    active: ActiveSubscriptions,
}

impl SubscriptionManager {
    pub fn new(feed: Arc<dyn ChangeFeed>, session: SessionContext) -> Self {
        Self {
            feed,
            session,
            active: ActiveSubscriptions::default(),
        }
    }

    pub fn active(&self) -> &ActiveSubscriptions {
        &self.active
    }

    /// Topics of all open channels.
    pub fn active_topics(&self) -> Vec<ChannelTopic> {
        self.active.topics()
    }

    /// Switch to `project_id`: every channel of the previous project is
    /// closed before the new ones are opened.
    pub async fn subscribe_to_project(
        &mut self,
        project_id: ProjectId,
        events: mpsc::UnboundedSender<ProjectEvent>,
    ) -> TaskgridResult<()> {
        self.unsubscribe_all().await;
        self.active.project_id = Some(project_id);

        for table in WATCHED_TABLES {
            let topic = ChannelTopic::Table { table, project_id };
            let (id, receiver) = self.feed.open_channel(topic.clone()).await?;
            let forwarder = tokio::spawn(forward_changes(
                project_id,
                topic.clone(),
                receiver,
                events.clone(),
            ));
            self.active.channels.push(OpenChannel {
                id,
                topic,
                forwarder,
            });
        }

        let topic = ChannelTopic::Presence { project_id };
        let (id, receiver) = self.feed.open_channel(topic.clone()).await?;
        let forwarder = tokio::spawn(forward_presence(
            PresenceTracking {
                feed: Arc::clone(&self.feed),
                channel: id,
                session: self.session.clone(),
            },
            project_id,
            topic.clone(),
            receiver,
            events,
        ));
        self.active.channels.push(OpenChannel {
            id,
            topic,
            forwarder,
        });

        info!(
            project_id = %project_id,
            channels = self.active.channels.len(),
            "Subscribed to project"
        );
        Ok(())
    }

    /// Close every open channel. Safe to call with nothing open; removal
    /// failures are logged and do not stop the teardown.
    pub async fn unsubscribe_all(&mut self) {
        let channels = std::mem::take(&mut self.active.channels);
        let previous = self.active.project_id.take();
        for channel in channels {
            if let Err(err) = self.feed.remove_channel(channel.id).await {
                warn!(topic = %channel.topic, error = %err, "Failed to remove channel");
            }
            channel.forwarder.abort();
        }
        if let Some(project_id) = previous {
            debug!(project_id = %project_id, "Unsubscribed from project");
        }
    }
}

fn wrap_change(project_id: ProjectId, change: RawChange) -> Option<ProjectEvent> {
    match change.table {
        Table::Tasks => Some(ProjectEvent::TaskChange { project_id, change }),
        Table::Notes => Some(ProjectEvent::NoteChange { project_id, change }),
        Table::Comments => Some(ProjectEvent::CommentChange { project_id, change }),
        _ => None,
    }
}

async fn forward_changes(
    project_id: ProjectId,
    topic: ChannelTopic,
    mut receiver: ChannelReceiver,
    events: mpsc::UnboundedSender<ProjectEvent>,
) {
    while let Some(message) = receiver.recv().await {
        let event = match message {
            ChannelMessage::Change(change) => match wrap_change(project_id, change) {
                Some(event) => event,
                None => continue,
            },
            ChannelMessage::Status(status) => {
                debug!(topic = %topic, ?status, "Channel status");
                ProjectEvent::ChannelStatus {
                    project_id,
                    topic: topic.clone(),
                    status,
                }
            }
            ChannelMessage::PresenceSync(_) => continue,
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

struct PresenceTracking {
    feed: Arc<dyn ChangeFeed>,
    channel: ChannelId,
    session: SessionContext,
}

async fn forward_presence(
    tracking: PresenceTracking,
    project_id: ProjectId,
    topic: ChannelTopic,
    mut receiver: ChannelReceiver,
    events: mpsc::UnboundedSender<ProjectEvent>,
) {
    while let Some(message) = receiver.recv().await {
        let event = match message {
            ChannelMessage::PresenceSync(state) => {
                ProjectEvent::PresenceSync { project_id, state }
            }
            ChannelMessage::Status(status) => {
                if status == ChannelStatus::Subscribed {
                    if let Some(user) = tracking.session.user() {
                        let meta = PresenceMeta::for_user(user, Utc::now());
                        let tracked = tracking.feed.track_presence(tracking.channel, meta).await;
                        if let Err(err) = tracked {
                            warn!(topic = %topic, error = %err, "Failed to track presence");
                        }
                    }
                }
                ProjectEvent::ChannelStatus {
                    project_id,
                    topic: topic.clone(),
                    status,
                }
            }
            ChannelMessage::Change(_) => continue,
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

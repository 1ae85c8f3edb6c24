use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::NotifyError;
use crate::mission::models::{QueueStats, QueueStatus};
use crate::steps::StepMatch;

pub const DEFAULT_CHANNEL: &str = "mission-control:events";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum Notification {
    #[serde(rename = "QUEUE_UPDATED")]
    QueueUpdated { area_key: String },
    #[serde(rename = "MISSION_STATUS_CHANGED")]
    MissionStatusChanged {
        mission_id: Uuid,
        mission_code: String,
        status: QueueStatus,
    },
    #[serde(rename = "STATISTICS_UPDATED")]
    StatisticsUpdated { stats: QueueStats },
    #[serde(rename = "MISSION_PROGRESS")]
    MissionProgress {
        mission_code: String,
        robot_id: String,
        progress: StepMatch,
    },
    #[serde(rename = "MANUAL_WAYPOINT_WAITING")]
    ManualWaypointWaiting {
        mission_code: String,
        robot_id: String,
        waypoint_code: String,
    },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// In-process fan-out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        // nobody listening is fine
        let _ = self.sender.send(notification.clone());
        Ok(())
    }
}

/// Publishes JSON-encoded events on a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisSink {
    conn: ConnectionManager,
    channel: String,
}

impl RedisSink {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for RedisSink {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.channel, payload).await?;
        Ok(())
    }
}

/// Best-effort delivery to every configured sink. Failures are logged and dropped.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            if let Err(e) = sink.publish(&notification).await {
                tracing::warn!(
                    error = %e,
                    event = ?notification,
                    "Failed to deliver notification"
                );
            }
        }
    }
}

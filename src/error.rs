use thiserror::Error;
use uuid::Uuid;

use crate::mission::models::QueueStatus;

/// Failures of the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("mission code {0} already exists in a non-terminal queue item")]
    DuplicateMissionCode(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Failures talking to the external AMR controller.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("remote controller unavailable: {0}")]
    Unavailable(String),

    #[error("remote controller rejected request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("schedule has no run time")]
    MissingRunTime,
}

/// Errors surfaced by the mission engine to its callers.
#[derive(Error, Debug)]
pub enum MissionError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("mission code {0} already exists in a non-terminal queue item")]
    DuplicateMissionCode(String),

    #[error("no capacity available in area {0} for immediate execution")]
    CapacityUnavailable(String),

    #[error("queue item {0} not found")]
    NotFound(Uuid),

    #[error("mission {0} not found")]
    MissionNotFound(String),

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("remote controller unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("remote controller rejected request: {0}")]
    RemoteRejected(String),

    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<BridgeError> for MissionError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Unavailable(msg) => MissionError::RemoteUnavailable(msg),
            BridgeError::Rejected(msg) => MissionError::RemoteRejected(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type MissionResult<T> = Result<T, MissionError>;

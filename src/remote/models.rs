use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::mission::models::{MissionQueueItem, QueueStatus};
use crate::steps::MissionStep;

/// Status vocabulary the engine understands, independent of the controller vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteStatus {
    Created,
    Executing,
    Waiting,
    Cancelling,
    Complete,
    Cancelled,
    ManualComplete,
    Warning,
    StartupError,
}

impl RemoteStatus {
    /// Local terminal state a remote status resolves to, if it is terminal.
    pub fn terminal_outcome(&self) -> Option<QueueStatus> {
        match self {
            RemoteStatus::Complete | RemoteStatus::ManualComplete => Some(QueueStatus::Complete),
            RemoteStatus::Cancelled => Some(QueueStatus::Cancelled),
            RemoteStatus::StartupError => Some(QueueStatus::Error),
            _ => None,
        }
    }
}

/// Envelope every controller endpoint answers with.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionSpec {
    pub mission_code: String,
    pub priority: i32,
    pub area_key: String,
    /// Robot the controller should prefer, set when chaining onto a freed robot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<String>,
    pub mission_data: Vec<MissionStep>,
}

impl From<&MissionQueueItem> for MissionSpec {
    fn from(item: &MissionQueueItem) -> Self {
        Self {
            mission_code: item.mission_code.clone(),
            priority: item.priority,
            area_key: item.area_key.clone(),
            robot_id: None,
            mission_data: item.steps.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    #[serde(default)]
    pub robot_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery<'a> {
    pub job_code: &'a str,
    pub limit: u32,
}

/// A job as reported by the controller. `status` is the raw vendor code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJob {
    pub job_code: String,
    #[serde(deserialize_with = "status_code_as_string")]
    pub status: String,
    #[serde(default)]
    pub robot_id: Option<String>,
}

/// Polled job status after translation through the status table.
#[derive(Debug, Clone)]
pub struct RemoteJobStatus {
    pub job_code: String,
    pub raw_status: String,
    pub status: Option<RemoteStatus>,
    pub robot_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelMode {
    /// Stop the robot where it is.
    #[default]
    Force,
    /// Let the robot finish its current step first.
    Redirect,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest<'a> {
    pub mission_code: &'a str,
    pub cancel_mode: CancelMode,
    pub reason: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotQuery<'a> {
    pub robot_id: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotTelemetry {
    pub robot_id: String,
    #[serde(default)]
    pub node_code: Option<String>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingMission {
    pub mission_code: String,
    pub current_position: String,
    pub robot_id: String,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub waiting_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest<'a> {
    pub mission_code: &'a str,
}

// Vendors disagree on whether status codes are numbers or strings.
fn status_code_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected status code {other}"
        ))),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MissionError;
use crate::steps::MissionStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Executing,
    Complete,
    Error,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Executing => "executing",
            QueueStatus::Complete => "complete",
            QueueStatus::Error => "error",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Complete | QueueStatus::Error | QueueStatus::Cancelled
        )
    }

    /// Transition table for queue items. Terminal states have no exits.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        use QueueStatus::*;
        matches!(
            (self, next),
            (Waiting, Executing)
                | (Waiting, Cancelled)
                | (Waiting, Error)
                | (Executing, Complete)
                | (Executing, Error)
                | (Executing, Cancelled)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(QueueStatus::Waiting),
            "executing" => Ok(QueueStatus::Executing),
            "complete" => Ok(QueueStatus::Complete),
            "error" => Ok(QueueStatus::Error),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Scheduled,
    #[default]
    Api,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::Api => "api",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "scheduled" => Ok(TriggerSource::Scheduled),
            "api" => Ok(TriggerSource::Api),
            other => Err(format!("unknown trigger source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionQueueItem {
    pub id: Uuid,
    /// Workflow/template this mission was instantiated from; `None` for ad-hoc missions.
    pub workflow_id: Option<String>,
    pub mission_code: String,
    pub priority: i32,
    pub status: QueueStatus,
    pub area_key: String,
    pub trigger_source: TriggerSource,
    pub steps: Vec<MissionStep>,
    /// Whether this item occupies one of its area's concurrency slots.
    pub holds_slot: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub submitted_to_remote: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submit_error: Option<String>,
    pub assigned_robot_id: Option<String>,
}

impl MissionQueueItem {
    pub fn new_waiting(descriptor: &MissionDescriptor, priority: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: descriptor.workflow_id.clone(),
            mission_code: descriptor.mission_code.trim().to_string(),
            priority,
            status: QueueStatus::Waiting,
            area_key: descriptor.area_key.trim().to_string(),
            trigger_source: descriptor.trigger_source,
            steps: descriptor.steps.clone(),
            holds_slot: false,
            created_at: now,
            processed_at: None,
            completed_at: None,
            error_message: None,
            submitted_to_remote: false,
            submitted_at: None,
            submit_error: None,
            assigned_robot_id: None,
        }
    }

    /// Position code of the first step, where the robot has to travel first.
    pub fn start_position(&self) -> Option<&str> {
        self.steps.first().map(|s| s.position.as_str())
    }
}

/// Inbound mission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDescriptor {
    pub mission_code: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub area_key: String,
    #[serde(default)]
    pub priority: Option<i32>,
    pub steps: Vec<MissionStep>,
    #[serde(default)]
    pub trigger_source: TriggerSource,
    /// Fail instead of queueing when the mission cannot start right away.
    #[serde(default)]
    pub require_immediate: bool,
}

pub const MAX_MISSION_CODE_LEN: usize = 64;

impl MissionDescriptor {
    pub fn validate(&self) -> Result<(), MissionError> {
        let code = self.mission_code.trim();
        if code.is_empty() {
            return Err(MissionError::Validation("missionCode is required".into()));
        }
        if code.len() > MAX_MISSION_CODE_LEN {
            return Err(MissionError::Validation(format!(
                "missionCode exceeds {MAX_MISSION_CODE_LEN} characters"
            )));
        }
        if code.chars().any(char::is_whitespace) {
            return Err(MissionError::Validation(
                "missionCode must not contain whitespace".into(),
            ));
        }
        if self.area_key.trim().is_empty() {
            return Err(MissionError::Validation("areaKey is required".into()));
        }
        if matches!(self.priority, Some(p) if p < 0) {
            return Err(MissionError::Validation("priority must be >= 0".into()));
        }
        if self.steps.is_empty() {
            return Err(MissionError::Validation("mission has no steps".into()));
        }
        if let Some(idx) = self.steps.iter().position(|s| s.position.trim().is_empty()) {
            return Err(MissionError::Validation(format!(
                "step {idx} has an empty position"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOutcome {
    pub success: bool,
    pub execute_immediately: bool,
    pub queue_position: Option<usize>,
    pub queue_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued_count: i64,
    pub processing_count: i64,
    pub available_slots: i64,
    pub total_slots: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AreaConcurrencyConfig {
    pub area_key: String,
    pub max_concurrent_robots: i32,
    pub queueing_enabled: bool,
    pub default_priority: i32,
    /// Consecutive out-of-order picks allowed per robot; 0 disables chaining.
    pub max_opportunistic_chain: i32,
}

/// Compare-and-set request against a queue item's status.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub from: QueueStatus,
    pub to: QueueStatus,
    pub at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub holds_slot: Option<bool>,
}

impl StatusTransition {
    pub fn new(from: QueueStatus, to: QueueStatus, at: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            at,
            error_message: None,
            holds_slot: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn holding_slot(mut self, holds: bool) -> Self {
        self.holds_slot = Some(holds);
        self
    }
}

/// Result of handing an item to the remote controller.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionHistory {
    pub id: Uuid,
    pub queue_item_id: Uuid,
    pub mission_code: String,
    pub area_key: String,
    pub final_status: QueueStatus,
    pub trigger_source: TriggerSource,
    pub assigned_robot_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl MissionHistory {
    pub fn archive(item: &MissionQueueItem, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue_item_id: item.id,
            mission_code: item.mission_code.clone(),
            area_key: item.area_key.clone(),
            final_status: item.status,
            trigger_source: item.trigger_source,
            assigned_robot_id: item.assigned_robot_id.clone(),
            error_message: item.error_message.clone(),
            created_at: item.created_at,
            processed_at: item.processed_at,
            completed_at: item.completed_at.unwrap_or(now),
            archived_at: now,
        }
    }
}

/// A robot that just finished a mission, used for opportunistic chaining.
#[derive(Debug, Clone)]
pub struct FreedRobot {
    pub robot_id: String,
    pub node_code: Option<String>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const REASON_WAITING: &str = "waiting for resume at manual waypoint";
pub const REASON_RESUMED_EXTERNALLY: &str = "resumed externally";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ManualPauseRecord {
    pub id: Uuid,
    pub robot_id: String,
    pub mission_code: String,
    pub waypoint_code: String,
    pub pause_start: DateTime<Utc>,
    pub pause_end: Option<DateTime<Utc>>,
    pub reason: String,
}

impl ManualPauseRecord {
    pub fn open(
        robot_id: &str,
        mission_code: &str,
        waypoint_code: &str,
        started: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            robot_id: robot_id.to_string(),
            mission_code: mission_code.to_string(),
            waypoint_code: waypoint_code.to_string(),
            pause_start: started,
            pause_end: None,
            reason: REASON_WAITING.to_string(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.pause_end.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaypointState {
    NotWaiting,
    WaitingForResume,
    Resumed,
}

/// One arrival at a manual waypoint. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WaypointVisit {
    pub mission_code: String,
    pub waypoint_code: String,
    pub robot_id: String,
    pub arrived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResumeOutcome {
    Resumed,
    AlreadyResumed,
}

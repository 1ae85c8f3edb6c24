use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::steps::MissionStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Once,
    Recurring,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Once => "once",
            TriggerType::Recurring => "recurring",
        }
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(TriggerType::Once),
            "recurring" => Ok(TriggerType::Recurring),
            other => Err(format!("unknown trigger type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// What each occurrence of a schedule enqueues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionTemplate {
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub area_key: String,
    #[serde(default)]
    pub priority: Option<i32>,
    pub steps: Vec<MissionStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDefinition {
    pub id: Uuid,
    pub name: String,
    pub template: MissionTemplate,
    pub trigger_type: TriggerType,
    pub cron_expression: Option<String>,
    pub run_at: Option<DateTime<Utc>>,
    pub timezone: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub next_run_at: Option<DateTime<Utc>>,
    /// Set only while one process is executing a due occurrence.
    pub lock_token: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl ScheduleDefinition {
    pub fn recurring(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        timezone: impl Into<String>,
        template: MissionTemplate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            template,
            trigger_type: TriggerType::Recurring,
            cron_expression: Some(cron_expression.into()),
            run_at: None,
            timezone: timezone.into(),
            enabled: true,
            last_run_at: None,
            last_status: None,
            next_run_at: None,
            lock_token: None,
            locked_at: None,
        }
    }

    pub fn once(name: impl Into<String>, run_at: DateTime<Utc>, template: MissionTemplate) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            template,
            trigger_type: TriggerType::Once,
            cron_expression: None,
            run_at: Some(run_at),
            timezone: "UTC".to_string(),
            enabled: true,
            last_run_at: None,
            last_status: None,
            next_run_at: Some(run_at),
            lock_token: None,
            locked_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRunLog {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub result_status: RunStatus,
    pub queue_item_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Bookkeeping written when a claimed run finishes; also releases the claim.
#[derive(Debug, Clone)]
pub struct ScheduleRunUpdate {
    pub last_run_at: DateTime<Utc>,
    pub last_status: RunStatus,
    pub next_run_at: Option<DateTime<Utc>>,
}

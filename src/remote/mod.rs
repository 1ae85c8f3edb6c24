pub mod bridge;
pub mod client;
pub mod models;
pub mod status_table;

use async_trait::async_trait;

use crate::error::BridgeError;
use models::{CancelMode, MissionSpec, RemoteJob, RobotTelemetry, SubmitAck, WaitingMission};

pub use bridge::RemoteExecutionBridge;
pub use client::HttpAmrController;
pub use status_table::StatusTable;

/// Contract with the external AMR fleet controller.
#[async_trait]
pub trait AmrController: Send + Sync {
    async fn submit(&self, spec: &MissionSpec) -> Result<SubmitAck, BridgeError>;
    async fn query_jobs(&self, job_code: &str, limit: u32) -> Result<Vec<RemoteJob>, BridgeError>;
    async fn cancel(
        &self,
        mission_code: &str,
        mode: CancelMode,
        reason: &str,
    ) -> Result<(), BridgeError>;
    async fn query_robot(&self, robot_id: &str) -> Result<RobotTelemetry, BridgeError>;
    async fn query_waiting_for_resume(&self) -> Result<Vec<WaitingMission>, BridgeError>;
    async fn resume_manual_waypoint(&self, mission_code: &str) -> Result<(), BridgeError>;
}

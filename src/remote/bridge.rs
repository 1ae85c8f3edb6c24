use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::models::{
    CancelMode, MissionSpec, RemoteJobStatus, RobotTelemetry, SubmitAck, WaitingMission,
};
use super::{AmrController, StatusTable};
use crate::error::BridgeError;

/// Vendor-agnostic facade over the AMR controller. Every call is bounded by
/// `timeout`; an elapsed call counts as the controller being unavailable.
#[derive(Clone)]
pub struct RemoteExecutionBridge {
    controller: Arc<dyn AmrController>,
    status_table: Arc<StatusTable>,
    timeout: Duration,
}

impl RemoteExecutionBridge {
    pub fn new(
        controller: Arc<dyn AmrController>,
        status_table: StatusTable,
        timeout: Duration,
    ) -> Self {
        Self {
            controller,
            status_table: Arc::new(status_table),
            timeout,
        }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, BridgeError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Unavailable(format!(
                "{op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    pub async fn submit(&self, spec: &MissionSpec) -> Result<SubmitAck, BridgeError> {
        let ack = self.bounded("submit", self.controller.submit(spec)).await?;
        tracing::info!(
            mission_code = %spec.mission_code,
            area = %spec.area_key,
            robot_id = ?ack.robot_id,
            "Mission accepted by AMR controller"
        );
        Ok(ack)
    }

    /// Current remote status of a mission, or `None` when the controller has no such job.
    pub async fn poll(&self, mission_code: &str) -> Result<Option<RemoteJobStatus>, BridgeError> {
        let jobs = self
            .bounded("poll", self.controller.query_jobs(mission_code, 1))
            .await?;

        let Some(job) = jobs.into_iter().find(|j| j.job_code == mission_code) else {
            return Ok(None);
        };

        let status = self.status_table.map(&job.status);
        if status.is_none() {
            tracing::warn!(
                mission_code = %mission_code,
                raw_status = %job.status,
                "Unknown remote status code - leaving mission unchanged"
            );
        }

        Ok(Some(RemoteJobStatus {
            job_code: job.job_code,
            raw_status: job.status,
            status,
            robot_id: job.robot_id,
        }))
    }

    pub async fn cancel(
        &self,
        mission_code: &str,
        mode: CancelMode,
        reason: &str,
    ) -> Result<(), BridgeError> {
        self.bounded("cancel", self.controller.cancel(mission_code, mode, reason))
            .await?;
        tracing::info!(mission_code = %mission_code, ?mode, reason = %reason, "Remote cancel acknowledged");
        Ok(())
    }

    pub async fn robot(&self, robot_id: &str) -> Result<RobotTelemetry, BridgeError> {
        self.bounded("query_robot", self.controller.query_robot(robot_id))
            .await
    }

    pub async fn waiting_for_resume(&self) -> Result<Vec<WaitingMission>, BridgeError> {
        self.bounded("waiting_for_resume", self.controller.query_waiting_for_resume())
            .await
    }

    pub async fn resume(&self, mission_code: &str) -> Result<(), BridgeError> {
        self.bounded("resume", self.controller.resume_manual_waypoint(mission_code))
            .await
    }
}

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::models::{
    CancelMode, CancelRequest, JobQuery, MissionSpec, RemoteJob, ResumeRequest, RobotQuery,
    RobotTelemetry, SubmitAck, VendorResponse, WaitingMission,
};
use super::AmrController;
use crate::error::BridgeError;

pub const SUBMIT_PATH: &str = "/api/amr/submitMission";
pub const JOB_QUERY_PATH: &str = "/api/amr/jobQuery";
pub const CANCEL_PATH: &str = "/api/amr/missionCancel";
pub const ROBOT_QUERY_PATH: &str = "/api/amr/robotQuery";
pub const WAITING_PATH: &str = "/api/amr/waitingForResume";
pub const RESUME_PATH: &str = "/api/amr/resumeMission";

/// JSON-over-HTTP binding of the controller contract.
#[derive(Debug, Clone)]
pub struct HttpAmrController {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAmrController {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<Option<T>, BridgeError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let resp = request.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "AMR controller request failed");
            BridgeError::Unavailable(format!("POST {path}: {e}"))
        })?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(BridgeError::Unavailable(format!("{path} returned {status}")));
        }
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Rejected(format!("{path} returned {status}: {body}")));
        }

        let envelope: VendorResponse<T> = resp
            .json()
            .await
            .map_err(|e| BridgeError::Unavailable(format!("invalid response from {path}: {e}")))?;

        if !envelope.success {
            let reason = envelope
                .message
                .or(envelope.code)
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(BridgeError::Rejected(reason));
        }

        Ok(envelope.data)
    }
}

#[async_trait]
impl AmrController for HttpAmrController {
    async fn submit(&self, spec: &MissionSpec) -> Result<SubmitAck, BridgeError> {
        let ack: Option<SubmitAck> = self.post(SUBMIT_PATH, spec).await?;
        Ok(ack.unwrap_or_default())
    }

    async fn query_jobs(&self, job_code: &str, limit: u32) -> Result<Vec<RemoteJob>, BridgeError> {
        let jobs: Option<Vec<RemoteJob>> = self
            .post(JOB_QUERY_PATH, &JobQuery { job_code, limit })
            .await?;
        Ok(jobs.unwrap_or_default())
    }

    async fn cancel(
        &self,
        mission_code: &str,
        mode: CancelMode,
        reason: &str,
    ) -> Result<(), BridgeError> {
        let _: Option<serde_json::Value> = self
            .post(
                CANCEL_PATH,
                &CancelRequest {
                    mission_code,
                    cancel_mode: mode,
                    reason,
                },
            )
            .await?;
        Ok(())
    }

    async fn query_robot(&self, robot_id: &str) -> Result<RobotTelemetry, BridgeError> {
        let telemetry: Option<RobotTelemetry> =
            self.post(ROBOT_QUERY_PATH, &RobotQuery { robot_id }).await?;
        telemetry.ok_or_else(|| BridgeError::Rejected(format!("robot {robot_id} not found")))
    }

    async fn query_waiting_for_resume(&self) -> Result<Vec<WaitingMission>, BridgeError> {
        let waiting: Option<Vec<WaitingMission>> =
            self.post(WAITING_PATH, &serde_json::json!({})).await?;
        Ok(waiting.unwrap_or_default())
    }

    async fn resume_manual_waypoint(&self, mission_code: &str) -> Result<(), BridgeError> {
        let _: Option<serde_json::Value> = self
            .post(RESUME_PATH, &ResumeRequest { mission_code })
            .await?;
        Ok(())
    }
}

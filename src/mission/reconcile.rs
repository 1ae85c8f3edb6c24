use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::admission::QueueAdmissionController;
use super::models::{FreedRobot, MissionQueueItem, QueueStatus};
use crate::error::MissionResult;
use crate::notify::{Notification, Notifier};
use crate::remote::models::{RemoteJobStatus, RemoteStatus};
use crate::remote::RemoteExecutionBridge;
use crate::steps::{correlate, Zone};
use crate::store::MissionStore;
use crate::waypoint::ManualWaypointCoordinator;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub polled: usize,
    pub finished: usize,
    pub stale: usize,
}

/// Periodically aligns executing queue items with what the controller reports.
pub struct ReconciliationLoop {
    store: Arc<dyn MissionStore>,
    admission: Arc<QueueAdmissionController>,
    waypoints: Arc<ManualWaypointCoordinator>,
    bridge: RemoteExecutionBridge,
    notifier: Notifier,
    stale_grace: Duration,
    /// Last step index reported per executing item.
    progress: Mutex<HashMap<Uuid, Option<usize>>>,
}

impl ReconciliationLoop {
    pub fn new(
        store: Arc<dyn MissionStore>,
        admission: Arc<QueueAdmissionController>,
        waypoints: Arc<ManualWaypointCoordinator>,
        notifier: Notifier,
        stale_grace: Duration,
    ) -> Self {
        let bridge = admission.bridge().clone();
        Self {
            store,
            admission,
            waypoints,
            bridge,
            notifier,
            stale_grace,
            progress: Mutex::new(HashMap::new()),
        }
    }

    pub async fn tick(&self) -> MissionResult<TickSummary> {
        let executing = self.store.list_by_status(QueueStatus::Executing).await?;
        let mut summary = TickSummary {
            polled: executing.len(),
            ..Default::default()
        };
        {
            let live: HashSet<Uuid> = executing.iter().map(|i| i.id).collect();
            self.progress.lock().await.retain(|id, _| live.contains(id));
        }

        let polls = join_all(executing.iter().map(|item| self.bridge.poll(&item.mission_code))).await;
        let zones = match self.store.list_zones().await {
            Ok(zones) => zones,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load zones - progress uses exact matches only");
                Vec::new()
            }
        };
        let mut freed: Vec<(String, FreedRobot)> = Vec::new();

        for (item, poll) in executing.iter().zip(polls) {
            match poll {
                Err(e) => {
                    tracing::warn!(
                        mission_code = %item.mission_code,
                        error = %e,
                        "Failed to poll remote status"
                    );
                }
                Ok(None) => {
                    if !self.is_stale(item) {
                        continue;
                    }
                    match self.mark_stale(item).await {
                        Ok(true) => {
                            summary.stale += 1;
                            summary.finished += 1;
                        }
                        Ok(false) => {}
                        Err(e) => tracing::error!(
                            mission_code = %item.mission_code,
                            error = %e,
                            "Failed to mark stale mission - retrying next pass"
                        ),
                    }
                }
                Ok(Some(job)) => match self.apply_remote(item, &job, &zones).await {
                    Ok(Some(released)) => {
                        summary.finished += 1;
                        if let Some(robot) = released {
                            freed.push((item.area_key.clone(), robot));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(
                        mission_code = %item.mission_code,
                        error = %e,
                        "Failed to apply remote status - retrying next pass"
                    ),
                },
            }
        }

        match self.bridge.waiting_for_resume().await {
            Ok(waiting) => {
                if let Err(e) = self.waypoints.observe(&waiting).await {
                    tracing::error!(error = %e, "Failed to update manual waypoint state");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to query missions waiting for resume"),
        }

        for (area, robot) in freed {
            if let Err(e) = self.admission.process_area(&area, Some(robot)).await {
                tracing::error!(area = %area, error = %e, "Failed to admit after slot release");
            }
        }
        if summary.finished > 0 {
            self.admission.process_all().await?;
        }

        Ok(summary)
    }

    /// Number of executing missions whose last matched step is remembered.
    pub async fn tracked_progress(&self) -> usize {
        self.progress.lock().await.len()
    }

    /// Run `tick` every `interval` until the shutdown signal flips.
    pub fn spawn(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_ms = interval.as_millis() as u64, "Reconciliation loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(s) if s.finished > 0 => tracing::debug!(
                                polled = s.polled,
                                finished = s.finished,
                                stale = s.stale,
                                "Reconciliation pass"
                            ),
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "Reconciliation pass failed"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::info!("Reconciliation loop stopped");
        })
    }

    fn is_stale(&self, item: &MissionQueueItem) -> bool {
        let since = item
            .submitted_at
            .or(item.processed_at)
            .unwrap_or(item.created_at);
        Utc::now() - since > self.stale_grace
    }

    async fn mark_stale(&self, item: &MissionQueueItem) -> MissionResult<bool> {
        tracing::warn!(
            mission_code = %item.mission_code,
            area = %item.area_key,
            grace_secs = self.stale_grace.num_seconds(),
            "Controller has no job for executing mission - marking as error"
        );
        let message = format!(
            "ReconciliationStale: no remote job after {}s",
            self.stale_grace.num_seconds()
        );
        let done = self
            .admission
            .finish(item, QueueStatus::Error, Some(message))
            .await?
            .is_some();
        self.progress.lock().await.remove(&item.id);
        Ok(done)
    }

    /// Apply one polled status. Returns `Some` when the item reached a
    /// terminal state in this call, carrying the robot it released if known.
    async fn apply_remote(
        &self,
        item: &MissionQueueItem,
        job: &RemoteJobStatus,
        zones: &[Zone],
    ) -> MissionResult<Option<Option<FreedRobot>>> {
        let robot_id = job.robot_id.clone().or_else(|| item.assigned_robot_id.clone());
        if let Some(reported) = &job.robot_id {
            if item.assigned_robot_id.as_deref() != Some(reported.as_str()) {
                self.store.assign_robot(item.id, reported).await?;
            }
        }

        let Some(status) = job.status else {
            return Ok(None);
        };

        if let Some(outcome) = status.terminal_outcome() {
            let message = (status == RemoteStatus::StartupError)
                .then(|| format!("remote startup error (status {})", job.raw_status));
            let finished = self.admission.finish(item, outcome, message).await?;
            self.progress.lock().await.remove(&item.id);
            if finished.is_none() {
                return Ok(None);
            }
            let freed = match robot_id {
                Some(robot_id) => Some(self.freed_robot(robot_id).await),
                None => None,
            };
            return Ok(Some(freed));
        }

        if status == RemoteStatus::Warning {
            tracing::warn!(
                mission_code = %item.mission_code,
                robot_id = ?robot_id,
                raw_status = %job.raw_status,
                "Controller reports a warning for mission"
            );
        }

        if let Some(robot_id) = robot_id {
            self.track_progress(item, &robot_id, zones).await;
        }
        Ok(None)
    }

    async fn track_progress(&self, item: &MissionQueueItem, robot_id: &str, zones: &[Zone]) {
        let telemetry = match self.bridge.robot(robot_id).await {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(robot_id = %robot_id, error = %e, "Robot telemetry unavailable");
                return;
            }
        };
        let Some(node) = telemetry.node_code.as_deref() else {
            return;
        };

        let step = correlate(node, &item.steps, zones);
        {
            let mut progress = self.progress.lock().await;
            if progress.get(&item.id) == Some(&step.current_step_index) {
                return;
            }
            progress.insert(item.id, step.current_step_index);
        }

        tracing::debug!(
            mission_code = %item.mission_code,
            robot_id = %robot_id,
            node = %node,
            step = ?step.current_step_index,
            match_type = ?step.match_type,
            "Mission progress"
        );
        self.notifier
            .notify(Notification::MissionProgress {
                mission_code: item.mission_code.clone(),
                robot_id: robot_id.to_string(),
                progress: step,
            })
            .await;
    }

    async fn freed_robot(&self, robot_id: String) -> FreedRobot {
        let node_code = match self.bridge.robot(&robot_id).await {
            Ok(t) => t.node_code,
            Err(e) => {
                tracing::debug!(robot_id = %robot_id, error = %e, "No position for freed robot");
                None
            }
        };
        FreedRobot {
            robot_id,
            node_code,
        }
    }
}

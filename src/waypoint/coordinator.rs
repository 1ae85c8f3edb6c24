use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::models::{
    ManualPauseRecord, ResumeOutcome, WaypointState, WaypointVisit, REASON_RESUMED_EXTERNALLY,
};
use crate::error::MissionResult;
use crate::notify::{Notification, Notifier};
use crate::remote::models::WaitingMission;
use crate::remote::RemoteExecutionBridge;
use crate::store::MissionStore;

#[derive(Debug, Clone)]
struct Tracked {
    state: WaypointState,
    waypoint_code: String,
    robot_id: String,
}

#[derive(Default)]
struct Inner {
    missions: HashMap<String, Tracked>,
    /// Missions with a resume command in flight.
    resuming: HashSet<String>,
}

/// Tracks robots paused at manual waypoints and forwards operator resumes.
pub struct ManualWaypointCoordinator {
    store: Arc<dyn MissionStore>,
    bridge: RemoteExecutionBridge,
    notifier: Notifier,
    inner: Mutex<Inner>,
}

impl ManualWaypointCoordinator {
    pub fn new(store: Arc<dyn MissionStore>, bridge: RemoteExecutionBridge, notifier: Notifier) -> Self {
        Self {
            store,
            bridge,
            notifier,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Fold the controller's current waiting-for-resume list into local state.
    pub async fn observe(&self, waiting: &[WaitingMission]) -> MissionResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let listed: HashSet<&str> = waiting.iter().map(|w| w.mission_code.as_str()).collect();

        for w in waiting {
            let waypoint = w.current_position.trim();
            if let Some(tracked) = inner.missions.get(&w.mission_code) {
                let same_waypoint = tracked.waypoint_code.eq_ignore_ascii_case(waypoint);
                match tracked.state {
                    // controller has not caught up with our resume yet
                    WaypointState::Resumed if same_waypoint => continue,
                    WaypointState::WaitingForResume if same_waypoint => continue,
                    WaypointState::WaitingForResume => {
                        // moved on to the next manual waypoint without us seeing a resume
                        self.store
                            .close_pause(&w.mission_code, now, Some(REASON_RESUMED_EXTERNALLY))
                            .await?;
                    }
                    _ => {}
                }
            }

            let record = ManualPauseRecord::open(&w.robot_id, &w.mission_code, waypoint, now);
            let opened = self.store.open_pause(&record).await?;

            inner.missions.insert(
                w.mission_code.clone(),
                Tracked {
                    state: WaypointState::WaitingForResume,
                    waypoint_code: waypoint.to_string(),
                    robot_id: w.robot_id.clone(),
                },
            );
            self.store
                .record_visit(&WaypointVisit {
                    mission_code: w.mission_code.clone(),
                    waypoint_code: waypoint.to_string(),
                    robot_id: w.robot_id.clone(),
                    arrived_at: w.waiting_since.unwrap_or(now),
                })
                .await?;

            if opened {
                tracing::info!(
                    mission_code = %w.mission_code,
                    robot_id = %w.robot_id,
                    waypoint = %waypoint,
                    "Robot waiting for resume at manual waypoint"
                );
                self.notifier
                    .notify(Notification::ManualWaypointWaiting {
                        mission_code: w.mission_code.clone(),
                        robot_id: w.robot_id.clone(),
                        waypoint_code: waypoint.to_string(),
                    })
                    .await;
            }
        }

        let gone: Vec<String> = inner
            .missions
            .keys()
            .filter(|code| !listed.contains(code.as_str()))
            .cloned()
            .collect();
        for code in gone {
            let Some(tracked) = inner.missions.remove(&code) else {
                continue;
            };
            if tracked.state == WaypointState::WaitingForResume {
                if self
                    .store
                    .close_pause(&code, now, Some(REASON_RESUMED_EXTERNALLY))
                    .await?
                {
                    tracing::info!(
                        mission_code = %code,
                        robot_id = %tracked.robot_id,
                        waypoint = %tracked.waypoint_code,
                        "Manual waypoint resumed outside the engine"
                    );
                }
            }
        }

        Ok(())
    }

    /// Send the resume command for a mission paused at a manual waypoint.
    /// Resuming a mission that is not waiting is a no-op.
    ///
    /// The state lock is not held while the controller is called, so other
    /// missions keep being observed meanwhile.
    pub async fn resume(&self, mission_code: &str) -> MissionResult<ResumeOutcome> {
        let tracked = {
            let mut inner = self.inner.lock().await;
            if inner.resuming.contains(mission_code) {
                return Ok(ResumeOutcome::AlreadyResumed);
            }
            let tracked = inner
                .missions
                .get(mission_code)
                .filter(|t| t.state == WaypointState::WaitingForResume)
                .cloned();
            if tracked.is_some() {
                inner.resuming.insert(mission_code.to_string());
            }
            tracked
        };

        let tracked = match tracked {
            Some(t) => t,
            // another instance may have observed the pause
            None => match self.store.open_pause_for(mission_code).await? {
                Some(p) => {
                    let mut inner = self.inner.lock().await;
                    if !inner.resuming.insert(mission_code.to_string()) {
                        return Ok(ResumeOutcome::AlreadyResumed);
                    }
                    Tracked {
                        state: WaypointState::WaitingForResume,
                        waypoint_code: p.waypoint_code,
                        robot_id: p.robot_id,
                    }
                }
                None => {
                    tracing::debug!(mission_code = %mission_code, "Resume ignored - mission not waiting");
                    return Ok(ResumeOutcome::AlreadyResumed);
                }
            },
        };

        let sent = self.bridge.resume(mission_code).await;
        let closed = match sent {
            Ok(()) => self.store.close_pause(mission_code, Utc::now(), None).await,
            Err(e) => {
                self.inner.lock().await.resuming.remove(mission_code);
                return Err(e.into());
            }
        };

        let mut inner = self.inner.lock().await;
        inner.resuming.remove(mission_code);
        closed?;

        tracing::info!(
            mission_code = %mission_code,
            robot_id = %tracked.robot_id,
            waypoint = %tracked.waypoint_code,
            "Manual waypoint resumed"
        );
        inner.missions.insert(
            mission_code.to_string(),
            Tracked {
                state: WaypointState::Resumed,
                ..tracked
            },
        );
        Ok(ResumeOutcome::Resumed)
    }

    pub async fn state(&self, mission_code: &str) -> WaypointState {
        self.inner
            .lock()
            .await
            .missions
            .get(mission_code)
            .map(|t| t.state)
            .unwrap_or(WaypointState::NotWaiting)
    }

    /// Every waypoint the mission has been seen waiting at, oldest first.
    pub async fn visited_waypoints(&self, mission_code: &str) -> MissionResult<Vec<WaypointVisit>> {
        Ok(self.store.list_visits(mission_code).await?)
    }
}

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::area_locks::AreaLocks;
use super::models::{
    AreaConcurrencyConfig, EnqueueOutcome, FreedRobot, MissionDescriptor, MissionQueueItem,
    QueueStats, QueueStatus, StatusTransition, SubmissionRecord,
};
use crate::error::{MissionError, MissionResult, StoreError};
use crate::notify::{Notification, Notifier};
use crate::remote::models::{CancelMode, MissionSpec};
use crate::remote::RemoteExecutionBridge;
use crate::steps::correlator::{zone_for_position, zone_of_node};
use crate::steps::Zone;
use crate::store::{MissionStore, StartOutcome};

/// Area settings used when an area has no persisted configuration.
#[derive(Debug, Clone)]
pub struct AreaDefaults {
    pub max_concurrent_robots: i32,
    pub default_priority: i32,
    pub max_opportunistic_chain: i32,
}

impl AreaDefaults {
    pub fn for_area(&self, area_key: &str) -> AreaConcurrencyConfig {
        AreaConcurrencyConfig {
            area_key: area_key.to_string(),
            max_concurrent_robots: self.max_concurrent_robots,
            queueing_enabled: true,
            default_priority: self.default_priority,
            max_opportunistic_chain: self.max_opportunistic_chain,
        }
    }
}

impl Default for AreaDefaults {
    fn default() -> Self {
        Self {
            max_concurrent_robots: 1,
            default_priority: 5,
            max_opportunistic_chain: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pick {
    index: usize,
    opportunistic: bool,
}

pub struct QueueAdmissionController {
    store: Arc<dyn MissionStore>,
    bridge: RemoteExecutionBridge,
    notifier: Notifier,
    defaults: AreaDefaults,
    area_locks: AreaLocks,
    /// Consecutive opportunistic picks per robot since its last strict pick.
    chains: Mutex<HashMap<String, u32>>,
}

impl QueueAdmissionController {
    pub fn new(
        store: Arc<dyn MissionStore>,
        bridge: RemoteExecutionBridge,
        notifier: Notifier,
        defaults: AreaDefaults,
    ) -> Self {
        Self {
            store,
            bridge,
            notifier,
            defaults,
            area_locks: AreaLocks::new(),
            chains: Mutex::new(HashMap::new()),
        }
    }

    pub fn bridge(&self) -> &RemoteExecutionBridge {
        &self.bridge
    }

    pub async fn area_config(&self, area_key: &str) -> MissionResult<AreaConcurrencyConfig> {
        Ok(self
            .store
            .area_config(area_key)
            .await?
            .unwrap_or_else(|| self.defaults.for_area(area_key)))
    }

    /// Admit a mission: start it now if its area has room and nothing of
    /// equal or higher priority is waiting, otherwise queue it.
    pub async fn enqueue(&self, descriptor: MissionDescriptor) -> MissionResult<EnqueueOutcome> {
        descriptor.validate()?;
        let area = descriptor.area_key.trim().to_string();
        let code = descriptor.mission_code.trim().to_string();
        let config = self.area_config(&area).await?;
        let priority = descriptor.priority.unwrap_or(config.default_priority);

        let guard = self.area_locks.lock(&area).await;

        if self.store.find_active_by_code(&code).await?.is_some() {
            tracing::warn!(mission_code = %code, area = %area, "Rejected duplicate mission code");
            return Err(MissionError::DuplicateMissionCode(code));
        }

        let candidate = if !config.queueing_enabled {
            true
        } else {
            let executing = self
                .store
                .count_by_status(Some(&area), QueueStatus::Executing)
                .await?;
            let outranked = self
                .store
                .list_waiting(&area)
                .await?
                .iter()
                .any(|w| w.priority >= priority);
            executing < config.max_concurrent_robots as i64 && !outranked
        };

        let now = Utc::now();
        let item = MissionQueueItem::new_waiting(&descriptor, priority, now);
        let started = if candidate {
            let mut executing = item.clone();
            executing.status = QueueStatus::Executing;
            executing.processed_at = Some(now);
            executing.holds_slot = config.queueing_enabled;
            let slot = config
                .queueing_enabled
                .then_some(config.max_concurrent_robots);
            self.store
                .admit_executing(&executing, slot)
                .await
                .map_err(duplicate_or_store)?
                .then_some(executing)
        } else {
            None
        };

        let outcome = match started {
            Some(executing) => {
                drop(guard);
                tracing::info!(
                    mission_code = %code,
                    area = %area,
                    priority,
                    "Mission admitted for immediate execution"
                );
                let dispatched = self.dispatch(executing, None).await?;
                EnqueueOutcome {
                    success: dispatched.status != QueueStatus::Error,
                    execute_immediately: true,
                    queue_position: None,
                    queue_id: dispatched.id,
                }
            }
            None => {
                if descriptor.require_immediate {
                    return Err(MissionError::CapacityUnavailable(area));
                }
                self.store
                    .insert_queue_item(&item)
                    .await
                    .map_err(duplicate_or_store)?;
                let position = self
                    .store
                    .list_waiting(&area)
                    .await?
                    .iter()
                    .position(|w| w.id == item.id)
                    .map(|p| p + 1);
                drop(guard);
                tracing::info!(
                    mission_code = %code,
                    area = %area,
                    priority,
                    position = ?position,
                    "Mission queued"
                );
                EnqueueOutcome {
                    success: true,
                    execute_immediately: false,
                    queue_position: position,
                    queue_id: item.id,
                }
            }
        };

        self.publish_queue_change(&area).await;
        Ok(outcome)
    }

    /// Start the best-ranked waiting item of an area if a slot is free and
    /// hand it to the controller.
    ///
    /// With a freed robot the pick may deviate from strict order towards a
    /// mission starting near that robot, at most `max_opportunistic_chain`
    /// times in a row for the same robot.
    pub async fn process_next(
        &self,
        area_key: &str,
        freed: Option<&FreedRobot>,
    ) -> MissionResult<Option<MissionQueueItem>> {
        let Some(item) = self.start_next(area_key, freed).await? else {
            return Ok(None);
        };
        let preferred = freed.map(|r| r.robot_id.clone());
        let item = self.dispatch(item, preferred).await?;
        self.publish_queue_change(area_key).await;
        Ok(Some(item))
    }

    /// Start waiting items in one area until slots or items run out, then
    /// submit them to the controller concurrently.
    pub async fn process_area(
        &self,
        area_key: &str,
        freed: Option<FreedRobot>,
    ) -> MissionResult<usize> {
        let mut started = Vec::new();
        let mut freed = freed;
        // the freed robot takes at most one job; later picks use strict order
        loop {
            let robot = freed.take();
            match self.start_next(area_key, robot.as_ref()).await {
                Ok(Some(item)) => started.push((item, robot.map(|r| r.robot_id))),
                Ok(None) => break,
                Err(e) if started.is_empty() => return Err(e),
                Err(e) => {
                    tracing::error!(area = %area_key, error = %e, "Failed to start next mission");
                    break;
                }
            }
        }
        if started.is_empty() {
            return Ok(0);
        }

        let count = started.len();
        let results = join_all(
            started
                .into_iter()
                .map(|(item, preferred)| self.dispatch(item, preferred)),
        )
        .await;
        for result in results {
            if let Err(e) = result {
                tracing::error!(area = %area_key, error = %e, "Failed to record mission dispatch");
            }
        }
        self.publish_queue_change(area_key).await;
        Ok(count)
    }

    /// Pick and start one waiting item without submitting it.
    async fn start_next(
        &self,
        area_key: &str,
        freed: Option<&FreedRobot>,
    ) -> MissionResult<Option<MissionQueueItem>> {
        let config = self.area_config(area_key).await?;
        let _guard = self.area_locks.lock(area_key).await;

        let waiting = self.store.list_waiting(area_key).await?;
        if waiting.is_empty() {
            return Ok(None);
        }

        let pick = match freed {
            Some(robot) if config.max_opportunistic_chain > 0 => {
                let zones = self.store.list_zones().await?;
                self.choose(&waiting, robot, &config, &zones).await
            }
            _ => Pick {
                index: 0,
                opportunistic: false,
            },
        };

        let slot = config
            .queueing_enabled
            .then_some(config.max_concurrent_robots);
        // Chosen item first, then the rest in rank order in case it was taken meanwhile.
        let order = std::iter::once(pick.index).chain((0..waiting.len()).filter(|i| *i != pick.index));
        let mut started = None;
        for idx in order {
            let transition =
                StatusTransition::new(QueueStatus::Waiting, QueueStatus::Executing, Utc::now())
                    .holding_slot(config.queueing_enabled);
            match self.store.start_item(waiting[idx].id, &transition, slot).await? {
                StartOutcome::Started(item) => {
                    started = Some((item, idx == pick.index && pick.opportunistic));
                    break;
                }
                StartOutcome::NoSlot => return Ok(None),
                StartOutcome::Unavailable => continue,
            }
        }

        let Some((item, opportunistic)) = started else {
            return Ok(None);
        };

        if let Some(robot) = freed {
            self.record_pick(&robot.robot_id, opportunistic).await;
        }

        tracing::info!(
            mission_code = %item.mission_code,
            area = %area_key,
            priority = item.priority,
            opportunistic,
            "Dispatching mission from queue"
        );
        Ok(Some(item))
    }

    /// Drain every area with waiting items, areas in parallel.
    pub async fn process_all(&self) -> MissionResult<usize> {
        let areas = self.store.waiting_areas().await?;
        let results = join_all(areas.iter().map(|a| self.process_area(a, None))).await;

        let mut started = 0;
        for (area, result) in areas.iter().zip(results) {
            match result {
                Ok(n) => started += n,
                Err(e) => tracing::error!(area = %area, error = %e, "Failed to process area queue"),
            }
        }
        Ok(started)
    }

    /// Cancel by queue id. Waiting items cancel locally; executing items only
    /// once the controller acknowledges the cancel.
    pub async fn cancel(
        &self,
        queue_id: Uuid,
        mode: CancelMode,
        reason: &str,
    ) -> MissionResult<MissionQueueItem> {
        let item = self
            .store
            .get_queue_item(queue_id)
            .await?
            .ok_or(MissionError::NotFound(queue_id))?;

        if item.status == QueueStatus::Waiting {
            if let Some(cancelled) = self.finish(&item, QueueStatus::Cancelled, None).await? {
                tracing::info!(mission_code = %item.mission_code, reason = %reason, "Cancelled waiting mission");
                return Ok(cancelled);
            }
        }

        // either it was executing all along or it started while we looked
        let item = self
            .store
            .get_queue_item(queue_id)
            .await?
            .ok_or(MissionError::NotFound(queue_id))?;

        match item.status {
            QueueStatus::Executing => self.cancel_executing(&item, mode, reason).await,
            status => Err(MissionError::InvalidTransition {
                from: status,
                to: QueueStatus::Cancelled,
            }),
        }
    }

    pub async fn cancel_by_code(
        &self,
        mission_code: &str,
        mode: CancelMode,
        reason: &str,
    ) -> MissionResult<MissionQueueItem> {
        let item = self
            .store
            .find_active_by_code(mission_code)
            .await?
            .ok_or_else(|| MissionError::MissionNotFound(mission_code.to_string()))?;
        self.cancel(item.id, mode, reason).await
    }

    async fn cancel_executing(
        &self,
        item: &MissionQueueItem,
        mode: CancelMode,
        reason: &str,
    ) -> MissionResult<MissionQueueItem> {
        if let Err(e) = self.bridge.cancel(&item.mission_code, mode, reason).await {
            tracing::error!(
                mission_code = %item.mission_code,
                error = %e,
                "Remote cancel failed - mission left executing"
            );
            return Err(e.into());
        }

        match self.finish(item, QueueStatus::Cancelled, None).await? {
            Some(cancelled) => Ok(cancelled),
            // reconciliation finished it first; report what it ended as
            None => self
                .store
                .get_queue_item(item.id)
                .await?
                .ok_or(MissionError::NotFound(item.id)),
        }
    }

    /// Move an item into a terminal state exactly once. Archiving and freeing
    /// the slot happen in the same store operation as the status change.
    /// Returns `None` if another caller already moved it out of its current
    /// state.
    pub async fn finish(
        &self,
        item: &MissionQueueItem,
        to: QueueStatus,
        message: Option<String>,
    ) -> MissionResult<Option<MissionQueueItem>> {
        if !item.status.can_transition_to(to) {
            return Err(MissionError::InvalidTransition {
                from: item.status,
                to,
            });
        }

        let now = Utc::now();
        let mut transition = StatusTransition::new(item.status, to, now);
        if let Some(message) = message {
            transition = transition.with_error(message);
        }

        let Some(updated) = self.store.finish_item(item.id, &transition).await? else {
            tracing::debug!(
                mission_code = %item.mission_code,
                expected = %item.status,
                "Status already changed by another worker"
            );
            return Ok(None);
        };

        tracing::info!(
            mission_code = %updated.mission_code,
            area = %updated.area_key,
            status = %updated.status,
            error = ?updated.error_message,
            "Mission status changed"
        );

        self.notifier
            .notify(Notification::MissionStatusChanged {
                mission_id: updated.id,
                mission_code: updated.mission_code.clone(),
                status: updated.status,
            })
            .await;
        self.publish_queue_change(&updated.area_key).await;

        Ok(Some(updated))
    }

    pub async fn stats(&self) -> MissionResult<QueueStats> {
        let queued_count = self.store.count_by_status(None, QueueStatus::Waiting).await?;
        let processing_count = self
            .store
            .count_by_status(None, QueueStatus::Executing)
            .await?;

        let mut total_slots = 0i64;
        let mut available_slots = 0i64;
        for config in self
            .store
            .list_area_configs()
            .await?
            .into_iter()
            .filter(|c| c.queueing_enabled)
        {
            let in_use = self.store.slots_in_use(&config.area_key).await?;
            total_slots += config.max_concurrent_robots as i64;
            available_slots += (config.max_concurrent_robots - in_use).max(0) as i64;
        }

        Ok(QueueStats {
            queued_count,
            processing_count,
            available_slots,
            total_slots,
        })
    }

    /// Hand an executing item to the controller. A failed submission ends
    /// the mission in Error and frees its slot; it is not retried.
    async fn dispatch(
        &self,
        item: MissionQueueItem,
        preferred_robot: Option<String>,
    ) -> MissionResult<MissionQueueItem> {
        let mut spec = MissionSpec::from(&item);
        spec.robot_id = preferred_robot;

        match self.bridge.submit(&spec).await {
            Ok(ack) => {
                self.store
                    .record_submission(
                        item.id,
                        &SubmissionRecord {
                            at: Utc::now(),
                            error: None,
                        },
                    )
                    .await?;
                if let Some(robot_id) = &ack.robot_id {
                    self.store.assign_robot(item.id, robot_id).await?;
                }
                self.notifier
                    .notify(Notification::MissionStatusChanged {
                        mission_id: item.id,
                        mission_code: item.mission_code.clone(),
                        status: QueueStatus::Executing,
                    })
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    mission_code = %item.mission_code,
                    area = %item.area_key,
                    error = %e,
                    "Mission submission failed"
                );
                self.store
                    .record_submission(
                        item.id,
                        &SubmissionRecord {
                            at: Utc::now(),
                            error: Some(e.to_string()),
                        },
                    )
                    .await?;
                self.finish(&item, QueueStatus::Error, Some(e.to_string()))
                    .await?;
            }
        }

        Ok(self.store.get_queue_item(item.id).await?.unwrap_or(item))
    }

    async fn choose(
        &self,
        waiting: &[MissionQueueItem],
        robot: &FreedRobot,
        config: &AreaConcurrencyConfig,
        zones: &[Zone],
    ) -> Pick {
        let strict = Pick {
            index: 0,
            opportunistic: false,
        };

        let bound = config.max_opportunistic_chain.max(0) as u32;
        let streak = self
            .chains
            .lock()
            .await
            .get(&robot.robot_id)
            .copied()
            .unwrap_or(0);
        if streak >= bound {
            tracing::debug!(
                robot_id = %robot.robot_id,
                streak,
                "Opportunistic chain exhausted - falling back to strict order"
            );
            return strict;
        }

        let Some(node) = robot.node_code.as_deref() else {
            return strict;
        };

        match waiting.iter().position(|w| starts_near(node, w, zones)) {
            Some(index) if index > 0 => Pick {
                index,
                opportunistic: true,
            },
            _ => strict,
        }
    }

    async fn record_pick(&self, robot_id: &str, opportunistic: bool) {
        let mut chains = self.chains.lock().await;
        if opportunistic {
            *chains.entry(robot_id.to_string()).or_insert(0) += 1;
        } else {
            chains.remove(robot_id);
        }
    }

    async fn publish_queue_change(&self, area_key: &str) {
        self.notifier
            .notify(Notification::QueueUpdated {
                area_key: area_key.to_string(),
            })
            .await;
        match self.stats().await {
            Ok(stats) => {
                self.notifier
                    .notify(Notification::StatisticsUpdated { stats })
                    .await
            }
            Err(e) => tracing::warn!(error = %e, "Failed to compute queue statistics"),
        }
    }
}

/// Whether a waiting mission starts at, or in the same zone as, the robot's node.
fn starts_near(node: &str, item: &MissionQueueItem, zones: &[Zone]) -> bool {
    let Some(start) = item.start_position() else {
        return false;
    };
    if start.trim().eq_ignore_ascii_case(node.trim()) {
        return true;
    }
    let Some(robot_zone) = zone_of_node(node, zones) else {
        return false;
    };
    zone_for_position(start, zones)
        .or_else(|| zone_of_node(start, zones))
        .map(|z| z.code == robot_zone.code)
        .unwrap_or(false)
}

fn duplicate_or_store(e: StoreError) -> MissionError {
    match e {
        StoreError::DuplicateMissionCode(code) => MissionError::DuplicateMissionCode(code),
        other => other.into(),
    }
}

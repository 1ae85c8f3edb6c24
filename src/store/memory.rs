use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{apply_transition, MissionStore, StartOutcome};
use crate::error::{StoreError, StoreResult};
use crate::mission::models::{
    AreaConcurrencyConfig, MissionHistory, MissionQueueItem, QueueStatus, StatusTransition,
    SubmissionRecord,
};
use crate::schedule::models::{ScheduleDefinition, ScheduleRunLog, ScheduleRunUpdate};
use crate::steps::Zone;
use crate::waypoint::models::{ManualPauseRecord, WaypointVisit};

#[derive(Default)]
struct Inner {
    items: HashMap<Uuid, MissionQueueItem>,
    areas: HashMap<String, AreaConcurrencyConfig>,
    slots: HashMap<String, i32>,
    zones: BTreeMap<String, Zone>,
    history: Vec<MissionHistory>,
    schedules: HashMap<Uuid, ScheduleDefinition>,
    run_logs: Vec<ScheduleRunLog>,
    pauses: Vec<ManualPauseRecord>,
    visits: Vec<WaypointVisit>,
}

impl Inner {
    fn has_active_code(&self, mission_code: &str) -> bool {
        self.items
            .values()
            .any(|i| i.mission_code == mission_code && !i.status.is_terminal())
    }

    fn acquire_slot(&mut self, area_key: &str, max: i32) -> bool {
        let in_use = self.slots.entry(area_key.to_string()).or_insert(0);
        if *in_use < max {
            *in_use += 1;
            true
        } else {
            false
        }
    }

    fn release_slot(&mut self, area_key: &str) {
        if let Some(in_use) = self.slots.get_mut(area_key) {
            *in_use = (*in_use - 1).max(0);
        }
    }

    fn archive(&mut self, item: &MissionQueueItem, at: DateTime<Utc>) {
        if self.history.iter().any(|h| h.queue_item_id == item.id) {
            return;
        }
        self.history.push(MissionHistory::archive(item, at));
    }
}

/// Process-local store. Every operation runs under one lock, which gives the
/// compare-and-set methods their atomicity.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn rank(items: &mut [MissionQueueItem]) {
    items.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

#[async_trait]
impl MissionStore for MemoryStore {
    async fn insert_queue_item(&self, item: &MissionQueueItem) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.has_active_code(&item.mission_code) {
            return Err(StoreError::DuplicateMissionCode(item.mission_code.clone()));
        }
        inner.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn admit_executing(
        &self,
        item: &MissionQueueItem,
        slot_max: Option<i32>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.has_active_code(&item.mission_code) {
            return Err(StoreError::DuplicateMissionCode(item.mission_code.clone()));
        }
        if let Some(max) = slot_max {
            if !inner.acquire_slot(&item.area_key, max) {
                return Ok(false);
            }
        }
        inner.items.insert(item.id, item.clone());
        Ok(true)
    }

    async fn get_queue_item(&self, id: Uuid) -> StoreResult<Option<MissionQueueItem>> {
        Ok(self.inner.lock().await.items.get(&id).cloned())
    }

    async fn find_active_by_code(
        &self,
        mission_code: &str,
    ) -> StoreResult<Option<MissionQueueItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .values()
            .find(|i| i.mission_code == mission_code && !i.status.is_terminal())
            .cloned())
    }

    async fn list_by_status(&self, status: QueueStatus) -> StoreResult<Vec<MissionQueueItem>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<_> = inner
            .items
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.created_at);
        Ok(items)
    }

    async fn list_waiting(&self, area_key: &str) -> StoreResult<Vec<MissionQueueItem>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<_> = inner
            .items
            .values()
            .filter(|i| i.status == QueueStatus::Waiting && i.area_key == area_key)
            .cloned()
            .collect();
        rank(&mut items);
        Ok(items)
    }

    async fn waiting_areas(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut areas: Vec<String> = inner
            .items
            .values()
            .filter(|i| i.status == QueueStatus::Waiting)
            .map(|i| i.area_key.clone())
            .collect();
        areas.sort();
        areas.dedup();
        Ok(areas)
    }

    async fn count_by_status(
        &self,
        area_key: Option<&str>,
        status: QueueStatus,
    ) -> StoreResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .values()
            .filter(|i| i.status == status && area_key.map_or(true, |a| i.area_key == a))
            .count() as i64)
    }

    async fn start_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
        slot_max: Option<i32>,
    ) -> StoreResult<StartOutcome> {
        let mut inner = self.inner.lock().await;
        let area_key = match inner.items.get(&id) {
            Some(item) if item.status == transition.from => item.area_key.clone(),
            _ => return Ok(StartOutcome::Unavailable),
        };
        if let Some(max) = slot_max {
            if !inner.acquire_slot(&area_key, max) {
                return Ok(StartOutcome::NoSlot);
            }
        }
        match inner.items.get_mut(&id) {
            Some(item) => {
                apply_transition(item, transition);
                Ok(StartOutcome::Started(item.clone()))
            }
            None => Ok(StartOutcome::Unavailable),
        }
    }

    async fn finish_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
    ) -> StoreResult<Option<MissionQueueItem>> {
        let mut inner = self.inner.lock().await;
        let updated = match inner.items.get_mut(&id) {
            Some(item) if item.status == transition.from => {
                apply_transition(item, transition);
                item.clone()
            }
            _ => return Ok(None),
        };
        if updated.status.is_terminal() {
            inner.archive(&updated, transition.at);
            if updated.holds_slot {
                inner.release_slot(&updated.area_key);
            }
        }
        Ok(Some(updated))
    }

    async fn record_submission(&self, id: Uuid, record: &SubmissionRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(item) = inner.items.get_mut(&id) {
            item.submitted_to_remote = record.error.is_none();
            item.submitted_at = Some(record.at);
            item.submit_error = record.error.clone();
        }
        Ok(())
    }

    async fn assign_robot(&self, id: Uuid, robot_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(item) = inner.items.get_mut(&id) {
            item.assigned_robot_id = Some(robot_id.to_string());
        }
        Ok(())
    }

    async fn area_config(&self, area_key: &str) -> StoreResult<Option<AreaConcurrencyConfig>> {
        Ok(self.inner.lock().await.areas.get(area_key).cloned())
    }

    async fn list_area_configs(&self) -> StoreResult<Vec<AreaConcurrencyConfig>> {
        let inner = self.inner.lock().await;
        let mut configs: Vec<_> = inner.areas.values().cloned().collect();
        configs.sort_by(|a, b| a.area_key.cmp(&b.area_key));
        Ok(configs)
    }

    async fn upsert_area_config(&self, config: &AreaConcurrencyConfig) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.areas.insert(config.area_key.clone(), config.clone());
        Ok(())
    }

    async fn slots_in_use(&self, area_key: &str) -> StoreResult<i32> {
        Ok(self
            .inner
            .lock()
            .await
            .slots
            .get(area_key)
            .copied()
            .unwrap_or(0))
    }

    async fn list_zones(&self) -> StoreResult<Vec<Zone>> {
        Ok(self.inner.lock().await.zones.values().cloned().collect())
    }

    async fn upsert_zone(&self, zone: &Zone) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.zones.insert(zone.code.clone(), zone.clone());
        Ok(())
    }

    async fn history_for(&self, mission_code: &str) -> StoreResult<Vec<MissionHistory>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .history
            .iter()
            .filter(|h| h.mission_code == mission_code)
            .cloned()
            .collect())
    }

    async fn upsert_schedule(&self, schedule: &ScheduleDefinition) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<ScheduleDefinition>> {
        Ok(self.inner.lock().await.schedules.get(&id).cloned())
    }

    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ScheduleDefinition>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<_> = inner
            .schedules
            .values()
            .filter(|s| s.enabled && s.next_run_at.map_or(false, |t| t <= now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        Ok(due)
    }

    async fn try_claim_schedule(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(schedule) = inner.schedules.get_mut(&id) else {
            return Ok(false);
        };
        let due = schedule.enabled && schedule.next_run_at.map_or(false, |t| t <= now);
        let free = match (schedule.lock_token, schedule.locked_at) {
            (None, _) => true,
            (Some(_), Some(at)) => at < stale_before,
            (Some(_), None) => false,
        };
        if due && free {
            schedule.lock_token = Some(token);
            schedule.locked_at = Some(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn finish_schedule_run(
        &self,
        id: Uuid,
        token: Uuid,
        update: &ScheduleRunUpdate,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.schedules.get_mut(&id) {
            Some(schedule) if schedule.lock_token == Some(token) => {
                schedule.last_run_at = Some(update.last_run_at);
                schedule.last_status = Some(update.last_status);
                schedule.next_run_at = update.next_run_at;
                schedule.lock_token = None;
                schedule.locked_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_run_log(&self, log: &ScheduleRunLog) -> StoreResult<()> {
        self.inner.lock().await.run_logs.push(log.clone());
        Ok(())
    }

    async fn list_run_logs(&self, schedule_id: Uuid) -> StoreResult<Vec<ScheduleRunLog>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .run_logs
            .iter()
            .filter(|l| l.schedule_id == schedule_id)
            .cloned()
            .collect())
    }

    async fn open_pause(&self, record: &ManualPauseRecord) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner
            .pauses
            .iter()
            .any(|p| p.mission_code == record.mission_code && p.is_open())
        {
            return Ok(false);
        }
        inner.pauses.push(record.clone());
        Ok(true)
    }

    async fn open_pause_for(&self, mission_code: &str) -> StoreResult<Option<ManualPauseRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pauses
            .iter()
            .find(|p| p.mission_code == mission_code && p.is_open())
            .cloned())
    }

    async fn close_pause(
        &self,
        mission_code: &str,
        ended: DateTime<Utc>,
        reason: Option<&str>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .pauses
            .iter_mut()
            .find(|p| p.mission_code == mission_code && p.is_open())
        {
            Some(pause) => {
                pause.pause_end = Some(ended);
                if let Some(reason) = reason {
                    pause.reason = reason.to_string();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_pauses(&self, mission_code: &str) -> StoreResult<Vec<ManualPauseRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pauses
            .iter()
            .filter(|p| p.mission_code == mission_code)
            .cloned()
            .collect())
    }

    async fn record_visit(&self, visit: &WaypointVisit) -> StoreResult<()> {
        self.inner.lock().await.visits.push(visit.clone());
        Ok(())
    }

    async fn list_visits(&self, mission_code: &str) -> StoreResult<Vec<WaypointVisit>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .visits
            .iter()
            .filter(|v| v.mission_code == mission_code)
            .cloned()
            .collect())
    }
}

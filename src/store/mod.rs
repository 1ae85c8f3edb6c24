pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::mission::models::{
    AreaConcurrencyConfig, MissionHistory, MissionQueueItem, QueueStatus, StatusTransition,
    SubmissionRecord,
};
use crate::schedule::models::{ScheduleDefinition, ScheduleRunLog, ScheduleRunUpdate};
use crate::steps::Zone;
use crate::waypoint::models::{ManualPauseRecord, WaypointVisit};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Durable records shared by every engine instance.
///
/// Methods documented as compare-and-set must succeed for exactly one caller
/// when several processes race on the same record.
#[async_trait]
pub trait MissionStore: Send + Sync {
    /// Fails with `DuplicateMissionCode` when a non-terminal item already uses the code.
    async fn insert_queue_item(&self, item: &MissionQueueItem) -> StoreResult<()>;
    async fn get_queue_item(&self, id: Uuid) -> StoreResult<Option<MissionQueueItem>>;
    async fn find_active_by_code(&self, mission_code: &str)
        -> StoreResult<Option<MissionQueueItem>>;
    async fn list_by_status(&self, status: QueueStatus) -> StoreResult<Vec<MissionQueueItem>>;
    /// Waiting items of one area ranked by priority desc, created_at asc.
    async fn list_waiting(&self, area_key: &str) -> StoreResult<Vec<MissionQueueItem>>;
    async fn waiting_areas(&self) -> StoreResult<Vec<String>>;
    async fn count_by_status(&self, area_key: Option<&str>, status: QueueStatus)
        -> StoreResult<i64>;
    /// Insert an item that is already Executing. With `slot_max` the area
    /// slot is taken in the same operation; when none is free nothing is
    /// persisted and `false` is returned.
    async fn admit_executing(
        &self,
        item: &MissionQueueItem,
        slot_max: Option<i32>,
    ) -> StoreResult<bool>;
    /// Take an area slot (when `slot_max` is set) and compare-and-set the
    /// item's status, both or neither.
    async fn start_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
        slot_max: Option<i32>,
    ) -> StoreResult<StartOutcome>;
    /// Compare-and-set the item's status. Entering a terminal state also
    /// archives the item (write-once) and frees its slot, all in one
    /// operation. `None` when the item was not in `transition.from`.
    async fn finish_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
    ) -> StoreResult<Option<MissionQueueItem>>;
    async fn record_submission(&self, id: Uuid, record: &SubmissionRecord) -> StoreResult<()>;
    async fn assign_robot(&self, id: Uuid, robot_id: &str) -> StoreResult<()>;

    async fn area_config(&self, area_key: &str) -> StoreResult<Option<AreaConcurrencyConfig>>;
    async fn list_area_configs(&self) -> StoreResult<Vec<AreaConcurrencyConfig>>;
    async fn upsert_area_config(&self, config: &AreaConcurrencyConfig) -> StoreResult<()>;
    async fn slots_in_use(&self, area_key: &str) -> StoreResult<i32>;
    async fn list_zones(&self) -> StoreResult<Vec<Zone>>;
    async fn upsert_zone(&self, zone: &Zone) -> StoreResult<()>;

    async fn history_for(&self, mission_code: &str) -> StoreResult<Vec<MissionHistory>>;

    async fn upsert_schedule(&self, schedule: &ScheduleDefinition) -> StoreResult<()>;
    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<ScheduleDefinition>>;
    /// Enabled schedules with `next_run_at <= now`.
    async fn list_due_schedules(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleDefinition>>;
    /// Compare-and-set the lock token from empty (or a claim older than
    /// `stale_before`) to `token`, provided the schedule is still due.
    async fn try_claim_schedule(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Record the run and clear the claim, only if `token` still holds it.
    async fn finish_schedule_run(
        &self,
        id: Uuid,
        token: Uuid,
        update: &ScheduleRunUpdate,
    ) -> StoreResult<bool>;
    async fn insert_run_log(&self, log: &ScheduleRunLog) -> StoreResult<()>;
    async fn list_run_logs(&self, schedule_id: Uuid) -> StoreResult<Vec<ScheduleRunLog>>;

    /// Opens a pause unless one is already open for the mission.
    async fn open_pause(&self, record: &ManualPauseRecord) -> StoreResult<bool>;
    async fn open_pause_for(&self, mission_code: &str) -> StoreResult<Option<ManualPauseRecord>>;
    async fn close_pause(
        &self,
        mission_code: &str,
        ended: DateTime<Utc>,
        reason: Option<&str>,
    ) -> StoreResult<bool>;
    async fn list_pauses(&self, mission_code: &str) -> StoreResult<Vec<ManualPauseRecord>>;
    async fn record_visit(&self, visit: &WaypointVisit) -> StoreResult<()>;
    /// Visits of one mission, oldest first.
    async fn list_visits(&self, mission_code: &str) -> StoreResult<Vec<WaypointVisit>>;
}

/// Result of [`MissionStore::start_item`].
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(MissionQueueItem),
    /// The area is at capacity.
    NoSlot,
    /// The item was not in the expected state.
    Unavailable,
}

/// Apply a status transition to an in-memory item, keeping `completed_at`
/// in step with terminal states.
pub(crate) fn apply_transition(item: &mut MissionQueueItem, t: &StatusTransition) {
    item.status = t.to;
    if t.to == QueueStatus::Executing {
        item.processed_at = Some(t.at);
    }
    if t.to.is_terminal() {
        item.completed_at = Some(t.at);
    }
    if let Some(msg) = &t.error_message {
        item.error_message = Some(msg.clone());
    }
    if let Some(holds) = t.holds_slot {
        item.holds_slot = holds;
    }
}

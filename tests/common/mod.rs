#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mission_control::error::{BridgeError, StoreError, StoreResult};
use mission_control::mission::models::{
    AreaConcurrencyConfig, MissionDescriptor, MissionHistory, MissionQueueItem, QueueStatus,
    StatusTransition, SubmissionRecord, TriggerSource,
};
use mission_control::mission::AreaDefaults;
use mission_control::notify::{BroadcastSink, Notification, Notifier};
use mission_control::remote::models::{
    CancelMode, MissionSpec, RemoteJob, RobotTelemetry, SubmitAck, WaitingMission,
};
use mission_control::remote::{AmrController, StatusTable};
use mission_control::schedule::models::ScheduleRunUpdate;
use mission_control::schedule::{ScheduleDefinition, ScheduleRunLog};
use mission_control::steps::{MissionStep, Zone};
use mission_control::store::{MemoryStore, MissionStore, StartOutcome};
use mission_control::waypoint::models::{ManualPauseRecord, WaypointVisit};
use mission_control::{create_router, AppState, Config};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const API_KEY: &str = "test_gateway_key";

/// Scripted stand-in for the AMR controller. Every call is counted.
#[derive(Default)]
pub struct FakeController {
    pub submitted: Mutex<Vec<MissionSpec>>,
    pub cancelled: Mutex<Vec<(String, CancelMode)>>,
    pub resumed: Mutex<Vec<String>>,
    pub jobs: Mutex<HashMap<String, RemoteJob>>,
    pub robots: Mutex<HashMap<String, RobotTelemetry>>,
    pub waiting: Mutex<Vec<WaitingMission>>,
    pub submit_error: Mutex<Option<BridgeError>>,
    pub cancel_error: Mutex<Option<BridgeError>>,
    pub assign_robot: Mutex<Option<String>>,
    pub submit_delay: Mutex<Option<Duration>>,
    pub resume_delay: Mutex<Option<Duration>>,
}

impl FakeController {
    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }

    pub fn set_job(&self, code: &str, status: &str, robot_id: Option<&str>) {
        self.jobs.lock().unwrap().insert(
            code.to_string(),
            RemoteJob {
                job_code: code.to_string(),
                status: status.to_string(),
                robot_id: robot_id.map(str::to_string),
            },
        );
    }

    pub fn set_robot(&self, robot_id: &str, node_code: &str) {
        self.robots.lock().unwrap().insert(
            robot_id.to_string(),
            RobotTelemetry {
                robot_id: robot_id.to_string(),
                node_code: Some(node_code.to_string()),
                battery_level: Some(80.0),
                status: Some("BUSY".to_string()),
            },
        );
    }

    pub fn set_waiting(&self, waiting: Vec<WaitingMission>) {
        *self.waiting.lock().unwrap() = waiting;
    }
}

#[async_trait]
impl AmrController for FakeController {
    async fn submit(&self, spec: &MissionSpec) -> Result<SubmitAck, BridgeError> {
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.submit_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.submitted.lock().unwrap().push(spec.clone());
        Ok(SubmitAck {
            robot_id: self.assign_robot.lock().unwrap().clone(),
        })
    }

    async fn query_jobs(&self, job_code: &str, _limit: u32) -> Result<Vec<RemoteJob>, BridgeError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .get(job_code)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn cancel(
        &self,
        mission_code: &str,
        mode: CancelMode,
        _reason: &str,
    ) -> Result<(), BridgeError> {
        if let Some(e) = self.cancel_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.cancelled
            .lock()
            .unwrap()
            .push((mission_code.to_string(), mode));
        Ok(())
    }

    async fn query_robot(&self, robot_id: &str) -> Result<RobotTelemetry, BridgeError> {
        self.robots
            .lock()
            .unwrap()
            .get(robot_id)
            .cloned()
            .ok_or_else(|| BridgeError::Rejected(format!("robot {robot_id} not found")))
    }

    async fn query_waiting_for_resume(&self) -> Result<Vec<WaitingMission>, BridgeError> {
        Ok(self.waiting.lock().unwrap().clone())
    }

    async fn resume_manual_waypoint(&self, mission_code: &str) -> Result<(), BridgeError> {
        let delay = *self.resume_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.resumed.lock().unwrap().push(mission_code.to_string());
        Ok(())
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub controller: Arc<FakeController>,
    pub events: broadcast::Receiver<Notification>,
}

impl TestApp {
    /// Notifications published since the last drain.
    pub fn drain_events(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.events.try_recv() {
            out.push(n);
        }
        out
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        database_max_connections: 2,
        redis_url: "redis://unused".to_string(),
        server_address: "127.0.0.1:0".to_string(),
        gateway_api_key: API_KEY.to_string(),
        amr_base_url: "http://amr.invalid".to_string(),
        amr_api_key: None,
        amr_timeout: Duration::from_secs(2),
        reconcile_interval: Duration::from_millis(50),
        schedule_tick: Duration::from_millis(50),
        admission_interval: Duration::from_millis(50),
        stale_grace: Duration::from_secs(300),
        schedule_claim_lease: Duration::from_secs(120),
        area_defaults: AreaDefaults {
            max_concurrent_robots: 1,
            default_priority: 5,
            max_opportunistic_chain: 0,
        },
        status_table: StatusTable::default(),
        notify_channel: "test".to_string(),
    }
}

pub fn spawn_app_with(config: Config) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    spawn_app_on(config, store.clone(), store)
}

/// Build the app over `engine_store`, which usually wraps `store`.
pub fn spawn_app_on(
    config: Config,
    store: Arc<MemoryStore>,
    engine_store: Arc<dyn MissionStore>,
) -> TestApp {
    let controller = Arc::new(FakeController::default());
    let sink = BroadcastSink::new(1024);
    let events = sink.subscribe();
    let notifier = Notifier::new().with_sink(Arc::new(sink));

    let state = Arc::new(AppState::new(
        config,
        engine_store,
        controller.clone(),
        notifier,
    ));
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        store,
        controller,
        events,
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config())
}

pub async fn configure_area(app: &TestApp, area: &str, max: i32, queueing: bool, chain: i32) {
    app.store
        .upsert_area_config(&AreaConcurrencyConfig {
            area_key: area.to_string(),
            max_concurrent_robots: max,
            queueing_enabled: queueing,
            default_priority: 5,
            max_opportunistic_chain: chain,
        })
        .await
        .unwrap();
}

pub fn descriptor(code: &str, area: &str, priority: i32) -> MissionDescriptor {
    descriptor_from(code, area, priority, &["N101", "N205"])
}

pub fn descriptor_from(code: &str, area: &str, priority: i32, positions: &[&str]) -> MissionDescriptor {
    MissionDescriptor {
        mission_code: code.to_string(),
        workflow_id: None,
        area_key: area.to_string(),
        priority: Some(priority),
        steps: positions.iter().map(|p| MissionStep::node(*p)).collect(),
        trigger_source: TriggerSource::Api,
        require_immediate: false,
    }
}

/// Store that fails chosen operations a set number of times, then behaves
/// like the memory store it wraps.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub finish_failures: AtomicUsize,
    pub start_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            finish_failures: AtomicUsize::new(0),
            start_failures: AtomicUsize::new(0),
        }
    }

    fn trip(counter: &AtomicUsize) -> StoreResult<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Corrupt("transient db failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MissionStore for FlakyStore {
    async fn insert_queue_item(&self, item: &MissionQueueItem) -> StoreResult<()> {
        self.inner.insert_queue_item(item).await
    }
    async fn admit_executing(&self, item: &MissionQueueItem, slot_max: Option<i32>) -> StoreResult<bool> {
        self.inner.admit_executing(item, slot_max).await
    }
    async fn get_queue_item(&self, id: Uuid) -> StoreResult<Option<MissionQueueItem>> {
        self.inner.get_queue_item(id).await
    }
    async fn find_active_by_code(&self, mission_code: &str) -> StoreResult<Option<MissionQueueItem>> {
        self.inner.find_active_by_code(mission_code).await
    }
    async fn list_by_status(&self, status: QueueStatus) -> StoreResult<Vec<MissionQueueItem>> {
        self.inner.list_by_status(status).await
    }
    async fn list_waiting(&self, area_key: &str) -> StoreResult<Vec<MissionQueueItem>> {
        self.inner.list_waiting(area_key).await
    }
    async fn waiting_areas(&self) -> StoreResult<Vec<String>> {
        self.inner.waiting_areas().await
    }
    async fn count_by_status(&self, area_key: Option<&str>, status: QueueStatus) -> StoreResult<i64> {
        self.inner.count_by_status(area_key, status).await
    }
    async fn start_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
        slot_max: Option<i32>,
    ) -> StoreResult<StartOutcome> {
        Self::trip(&self.start_failures)?;
        self.inner.start_item(id, transition, slot_max).await
    }
    async fn finish_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
    ) -> StoreResult<Option<MissionQueueItem>> {
        Self::trip(&self.finish_failures)?;
        self.inner.finish_item(id, transition).await
    }
    async fn record_submission(&self, id: Uuid, record: &SubmissionRecord) -> StoreResult<()> {
        self.inner.record_submission(id, record).await
    }
    async fn assign_robot(&self, id: Uuid, robot_id: &str) -> StoreResult<()> {
        self.inner.assign_robot(id, robot_id).await
    }
    async fn area_config(&self, area_key: &str) -> StoreResult<Option<AreaConcurrencyConfig>> {
        self.inner.area_config(area_key).await
    }
    async fn list_area_configs(&self) -> StoreResult<Vec<AreaConcurrencyConfig>> {
        self.inner.list_area_configs().await
    }
    async fn upsert_area_config(&self, config: &AreaConcurrencyConfig) -> StoreResult<()> {
        self.inner.upsert_area_config(config).await
    }
    async fn slots_in_use(&self, area_key: &str) -> StoreResult<i32> {
        self.inner.slots_in_use(area_key).await
    }
    async fn list_zones(&self) -> StoreResult<Vec<Zone>> {
        self.inner.list_zones().await
    }
    async fn upsert_zone(&self, zone: &Zone) -> StoreResult<()> {
        self.inner.upsert_zone(zone).await
    }
    async fn history_for(&self, mission_code: &str) -> StoreResult<Vec<MissionHistory>> {
        self.inner.history_for(mission_code).await
    }
    async fn upsert_schedule(&self, schedule: &ScheduleDefinition) -> StoreResult<()> {
        self.inner.upsert_schedule(schedule).await
    }
    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<ScheduleDefinition>> {
        self.inner.get_schedule(id).await
    }
    async fn list_due_schedules(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleDefinition>> {
        self.inner.list_due_schedules(now).await
    }
    async fn try_claim_schedule(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.try_claim_schedule(id, token, now, stale_before).await
    }
    async fn finish_schedule_run(
        &self,
        id: Uuid,
        token: Uuid,
        update: &ScheduleRunUpdate,
    ) -> StoreResult<bool> {
        self.inner.finish_schedule_run(id, token, update).await
    }
    async fn insert_run_log(&self, log: &ScheduleRunLog) -> StoreResult<()> {
        self.inner.insert_run_log(log).await
    }
    async fn list_run_logs(&self, schedule_id: Uuid) -> StoreResult<Vec<ScheduleRunLog>> {
        self.inner.list_run_logs(schedule_id).await
    }
    async fn open_pause(&self, record: &ManualPauseRecord) -> StoreResult<bool> {
        self.inner.open_pause(record).await
    }
    async fn open_pause_for(&self, mission_code: &str) -> StoreResult<Option<ManualPauseRecord>> {
        self.inner.open_pause_for(mission_code).await
    }
    async fn close_pause(
        &self,
        mission_code: &str,
        ended: DateTime<Utc>,
        reason: Option<&str>,
    ) -> StoreResult<bool> {
        self.inner.close_pause(mission_code, ended, reason).await
    }
    async fn list_pauses(&self, mission_code: &str) -> StoreResult<Vec<ManualPauseRecord>> {
        self.inner.list_pauses(mission_code).await
    }
    async fn record_visit(&self, visit: &WaypointVisit) -> StoreResult<()> {
        self.inner.record_visit(visit).await
    }
    async fn list_visits(&self, mission_code: &str) -> StoreResult<Vec<WaypointVisit>> {
        self.inner.list_visits(mission_code).await
    }
}

/// App whose engine runs on a [`FlakyStore`] over the returned memory store.
pub fn spawn_flaky_app() -> (TestApp, Arc<FlakyStore>) {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let app = spawn_app_on(test_config(), store, flaky.clone());
    (app, flaky)
}

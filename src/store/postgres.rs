use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{MissionStore, StartOutcome};
use crate::error::{StoreError, StoreResult};
use crate::mission::models::{
    AreaConcurrencyConfig, MissionHistory, MissionQueueItem, QueueStatus, StatusTransition,
    SubmissionRecord,
};
use crate::schedule::models::{
    MissionTemplate, RunStatus, ScheduleDefinition, ScheduleRunLog, ScheduleRunUpdate,
};
use crate::steps::{MissionStep, Zone};
use crate::waypoint::models::{ManualPauseRecord, WaypointVisit};

#[derive(Debug, FromRow)]
struct QueueItemRow {
    id: Uuid,
    workflow_id: Option<String>,
    mission_code: String,
    priority: i32,
    status: String,
    area_key: String,
    trigger_source: String,
    steps: Json<Vec<MissionStep>>,
    holds_slot: bool,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    submitted_to_remote: bool,
    submitted_at: Option<DateTime<Utc>>,
    submit_error: Option<String>,
    assigned_robot_id: Option<String>,
}

impl TryFrom<QueueItemRow> for MissionQueueItem {
    type Error = StoreError;

    fn try_from(row: QueueItemRow) -> Result<Self, Self::Error> {
        Ok(MissionQueueItem {
            id: row.id,
            workflow_id: row.workflow_id,
            mission_code: row.mission_code,
            priority: row.priority,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            area_key: row.area_key,
            trigger_source: row.trigger_source.parse().map_err(StoreError::Corrupt)?,
            steps: row.steps.0,
            holds_slot: row.holds_slot,
            created_at: row.created_at,
            processed_at: row.processed_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            submitted_to_remote: row.submitted_to_remote,
            submitted_at: row.submitted_at,
            submit_error: row.submit_error,
            assigned_robot_id: row.assigned_robot_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: Uuid,
    queue_item_id: Uuid,
    mission_code: String,
    area_key: String,
    final_status: String,
    trigger_source: String,
    assigned_robot_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: DateTime<Utc>,
    archived_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for MissionHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(MissionHistory {
            id: row.id,
            queue_item_id: row.queue_item_id,
            mission_code: row.mission_code,
            area_key: row.area_key,
            final_status: row.final_status.parse().map_err(StoreError::Corrupt)?,
            trigger_source: row.trigger_source.parse().map_err(StoreError::Corrupt)?,
            assigned_robot_id: row.assigned_robot_id,
            error_message: row.error_message,
            created_at: row.created_at,
            processed_at: row.processed_at,
            completed_at: row.completed_at,
            archived_at: row.archived_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ScheduleRow {
    id: Uuid,
    name: String,
    template: Json<MissionTemplate>,
    trigger_type: String,
    cron_expression: Option<String>,
    run_at: Option<DateTime<Utc>>,
    timezone: String,
    enabled: bool,
    last_run_at: Option<DateTime<Utc>>,
    last_status: Option<String>,
    next_run_at: Option<DateTime<Utc>>,
    lock_token: Option<Uuid>,
    locked_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScheduleRow> for ScheduleDefinition {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(ScheduleDefinition {
            id: row.id,
            name: row.name,
            template: row.template.0,
            trigger_type: row.trigger_type.parse().map_err(StoreError::Corrupt)?,
            cron_expression: row.cron_expression,
            run_at: row.run_at,
            timezone: row.timezone,
            enabled: row.enabled,
            last_run_at: row.last_run_at,
            last_status: row
                .last_status
                .map(|s| s.parse::<RunStatus>())
                .transpose()
                .map_err(StoreError::Corrupt)?,
            next_run_at: row.next_run_at,
            lock_token: row.lock_token,
            locked_at: row.locked_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunLogRow {
    id: Uuid,
    schedule_id: Uuid,
    scheduled_for: DateTime<Utc>,
    enqueued_at: DateTime<Utc>,
    result_status: String,
    queue_item_id: Option<Uuid>,
    error: Option<String>,
}

impl TryFrom<RunLogRow> for ScheduleRunLog {
    type Error = StoreError;

    fn try_from(row: RunLogRow) -> Result<Self, Self::Error> {
        Ok(ScheduleRunLog {
            id: row.id,
            schedule_id: row.schedule_id,
            scheduled_for: row.scheduled_for,
            enqueued_at: row.enqueued_at,
            result_status: row.result_status.parse().map_err(StoreError::Corrupt)?,
            queue_item_id: row.queue_item_id,
            error: row.error,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

async fn insert_item(conn: &mut PgConnection, item: &MissionQueueItem) -> StoreResult<()> {
    let result = sqlx::query(
        "INSERT INTO mission_queue_items (id, workflow_id, mission_code, priority, status, area_key, \
         trigger_source, steps, holds_slot, created_at, processed_at, completed_at, error_message, \
         submitted_to_remote, submitted_at, submit_error, assigned_robot_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(item.id)
    .bind(&item.workflow_id)
    .bind(&item.mission_code)
    .bind(item.priority)
    .bind(item.status.as_str())
    .bind(&item.area_key)
    .bind(item.trigger_source.as_str())
    .bind(Json(&item.steps))
    .bind(item.holds_slot)
    .bind(item.created_at)
    .bind(item.processed_at)
    .bind(item.completed_at)
    .bind(&item.error_message)
    .bind(item.submitted_to_remote)
    .bind(item.submitted_at)
    .bind(&item.submit_error)
    .bind(&item.assigned_robot_id)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::DuplicateMissionCode(item.mission_code.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn acquire_slot(conn: &mut PgConnection, area_key: &str, max: i32) -> StoreResult<bool> {
    sqlx::query("INSERT INTO area_slots (area_key, in_use) VALUES ($1, 0) ON CONFLICT DO NOTHING")
        .bind(area_key)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query(
        "UPDATE area_slots SET in_use = in_use + 1 WHERE area_key = $1 AND in_use < $2",
    )
    .bind(area_key)
    .bind(max)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn release_slot(conn: &mut PgConnection, area_key: &str) -> StoreResult<()> {
    sqlx::query("UPDATE area_slots SET in_use = GREATEST(in_use - 1, 0) WHERE area_key = $1")
        .bind(area_key)
        .execute(conn)
        .await?;
    Ok(())
}

async fn apply_status(
    conn: &mut PgConnection,
    id: Uuid,
    transition: &StatusTransition,
) -> StoreResult<Option<MissionQueueItem>> {
    sqlx::query_as::<_, QueueItemRow>(
        "UPDATE mission_queue_items SET \
            status = $3, \
            processed_at = CASE WHEN $3 = 'executing' THEN $4 ELSE processed_at END, \
            completed_at = CASE WHEN $5 THEN $4 ELSE completed_at END, \
            error_message = COALESCE($6, error_message), \
            holds_slot = COALESCE($7, holds_slot) \
         WHERE id = $1 AND status = $2 \
         RETURNING *",
    )
    .bind(id)
    .bind(transition.from.as_str())
    .bind(transition.to.as_str())
    .bind(transition.at)
    .bind(transition.to.is_terminal())
    .bind(&transition.error_message)
    .bind(transition.holds_slot)
    .fetch_optional(conn)
    .await?
    .map(MissionQueueItem::try_from)
    .transpose()
}

async fn insert_history(conn: &mut PgConnection, history: &MissionHistory) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO mission_history (id, queue_item_id, mission_code, area_key, final_status, \
         trigger_source, assigned_robot_id, error_message, created_at, processed_at, completed_at, archived_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (queue_item_id) DO NOTHING",
    )
    .bind(history.id)
    .bind(history.queue_item_id)
    .bind(&history.mission_code)
    .bind(&history.area_key)
    .bind(history.final_status.as_str())
    .bind(history.trigger_source.as_str())
    .bind(&history.assigned_robot_id)
    .bind(&history.error_message)
    .bind(history.created_at)
    .bind(history.processed_at)
    .bind(history.completed_at)
    .bind(history.archived_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// PostgreSQL-backed store shared by all engine instances.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MissionStore for PgStore {
    async fn insert_queue_item(&self, item: &MissionQueueItem) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_item(&mut conn, item).await
    }

    async fn admit_executing(
        &self,
        item: &MissionQueueItem,
        slot_max: Option<i32>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if let Some(max) = slot_max {
            if !acquire_slot(&mut tx, &item.area_key, max).await? {
                return Ok(false);
            }
        }
        insert_item(&mut tx, item).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_queue_item(&self, id: Uuid) -> StoreResult<Option<MissionQueueItem>> {
        sqlx::query_as::<_, QueueItemRow>("SELECT * FROM mission_queue_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(MissionQueueItem::try_from)
            .transpose()
    }

    async fn find_active_by_code(
        &self,
        mission_code: &str,
    ) -> StoreResult<Option<MissionQueueItem>> {
        sqlx::query_as::<_, QueueItemRow>(
            "SELECT * FROM mission_queue_items \
             WHERE mission_code = $1 AND status IN ('waiting', 'executing')",
        )
        .bind(mission_code)
        .fetch_optional(&self.pool)
        .await?
        .map(MissionQueueItem::try_from)
        .transpose()
    }

    async fn list_by_status(&self, status: QueueStatus) -> StoreResult<Vec<MissionQueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            "SELECT * FROM mission_queue_items WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_waiting(&self, area_key: &str) -> StoreResult<Vec<MissionQueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            "SELECT * FROM mission_queue_items WHERE status = 'waiting' AND area_key = $1 \
             ORDER BY priority DESC, created_at ASC, id ASC",
        )
        .bind(area_key)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn waiting_areas(&self) -> StoreResult<Vec<String>> {
        let areas: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT area_key FROM mission_queue_items WHERE status = 'waiting' ORDER BY area_key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(areas.into_iter().map(|(a,)| a).collect())
    }

    async fn count_by_status(
        &self,
        area_key: Option<&str>,
        status: QueueStatus,
    ) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM mission_queue_items \
             WHERE status = $1 AND ($2::TEXT IS NULL OR area_key = $2)",
        )
        .bind(status.as_str())
        .bind(area_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn start_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
        slot_max: Option<i32>,
    ) -> StoreResult<StartOutcome> {
        let mut tx = self.pool.begin().await?;
        let area: Option<(String,)> = sqlx::query_as(
            "SELECT area_key FROM mission_queue_items WHERE id = $1 AND status = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(transition.from.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((area_key,)) = area else {
            return Ok(StartOutcome::Unavailable);
        };

        if let Some(max) = slot_max {
            if !acquire_slot(&mut tx, &area_key, max).await? {
                return Ok(StartOutcome::NoSlot);
            }
        }
        let Some(item) = apply_status(&mut tx, id, transition).await? else {
            return Ok(StartOutcome::Unavailable);
        };
        tx.commit().await?;
        Ok(StartOutcome::Started(item))
    }

    async fn finish_item(
        &self,
        id: Uuid,
        transition: &StatusTransition,
    ) -> StoreResult<Option<MissionQueueItem>> {
        let mut tx = self.pool.begin().await?;
        let Some(updated) = apply_status(&mut tx, id, transition).await? else {
            return Ok(None);
        };
        if updated.status.is_terminal() {
            insert_history(&mut tx, &MissionHistory::archive(&updated, transition.at)).await?;
            if updated.holds_slot {
                release_slot(&mut tx, &updated.area_key).await?;
            }
        }
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn record_submission(&self, id: Uuid, record: &SubmissionRecord) -> StoreResult<()> {
        sqlx::query(
            "UPDATE mission_queue_items \
             SET submitted_to_remote = $2, submitted_at = $3, submit_error = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(record.error.is_none())
        .bind(record.at)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assign_robot(&self, id: Uuid, robot_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE mission_queue_items SET assigned_robot_id = $2 WHERE id = $1")
            .bind(id)
            .bind(robot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn area_config(&self, area_key: &str) -> StoreResult<Option<AreaConcurrencyConfig>> {
        Ok(sqlx::query_as::<_, AreaConcurrencyConfig>(
            "SELECT * FROM area_configs WHERE area_key = $1",
        )
        .bind(area_key)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_area_configs(&self) -> StoreResult<Vec<AreaConcurrencyConfig>> {
        Ok(sqlx::query_as::<_, AreaConcurrencyConfig>(
            "SELECT * FROM area_configs ORDER BY area_key",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn upsert_area_config(&self, config: &AreaConcurrencyConfig) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO area_configs \
             (area_key, max_concurrent_robots, queueing_enabled, default_priority, max_opportunistic_chain) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (area_key) DO UPDATE SET \
                max_concurrent_robots = EXCLUDED.max_concurrent_robots, \
                queueing_enabled = EXCLUDED.queueing_enabled, \
                default_priority = EXCLUDED.default_priority, \
                max_opportunistic_chain = EXCLUDED.max_opportunistic_chain",
        )
        .bind(&config.area_key)
        .bind(config.max_concurrent_robots)
        .bind(config.queueing_enabled)
        .bind(config.default_priority)
        .bind(config.max_opportunistic_chain)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn slots_in_use(&self, area_key: &str) -> StoreResult<i32> {
        let in_use: Option<(i32,)> =
            sqlx::query_as("SELECT in_use FROM area_slots WHERE area_key = $1")
                .bind(area_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(in_use.map(|(n,)| n).unwrap_or(0))
    }

    async fn list_zones(&self) -> StoreResult<Vec<Zone>> {
        Ok(sqlx::query_as::<_, Zone>("SELECT code, name FROM zones ORDER BY code")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn upsert_zone(&self, zone: &Zone) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO zones (code, name) VALUES ($1, $2) \
             ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(&zone.code)
        .bind(&zone.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history_for(&self, mission_code: &str) -> StoreResult<Vec<MissionHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM mission_history WHERE mission_code = $1 ORDER BY archived_at",
        )
        .bind(mission_code)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn upsert_schedule(&self, schedule: &ScheduleDefinition) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO schedules (id, name, template, trigger_type, cron_expression, run_at, timezone, \
             enabled, last_run_at, last_status, next_run_at, lock_token, locked_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET \
                name = EXCLUDED.name, template = EXCLUDED.template, \
                trigger_type = EXCLUDED.trigger_type, cron_expression = EXCLUDED.cron_expression, \
                run_at = EXCLUDED.run_at, timezone = EXCLUDED.timezone, enabled = EXCLUDED.enabled, \
                last_run_at = EXCLUDED.last_run_at, last_status = EXCLUDED.last_status, \
                next_run_at = EXCLUDED.next_run_at, lock_token = EXCLUDED.lock_token, \
                locked_at = EXCLUDED.locked_at",
        )
        .bind(schedule.id)
        .bind(&schedule.name)
        .bind(Json(&schedule.template))
        .bind(schedule.trigger_type.as_str())
        .bind(&schedule.cron_expression)
        .bind(schedule.run_at)
        .bind(&schedule.timezone)
        .bind(schedule.enabled)
        .bind(schedule.last_run_at)
        .bind(schedule.last_status.map(|s| s.as_str()))
        .bind(schedule.next_run_at)
        .bind(schedule.lock_token)
        .bind(schedule.locked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<ScheduleDefinition>> {
        sqlx::query_as::<_, ScheduleRow>("SELECT * FROM schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ScheduleDefinition::try_from)
            .transpose()
    }

    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ScheduleDefinition>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM schedules WHERE enabled AND next_run_at <= $1 ORDER BY next_run_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn try_claim_schedule(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        // Concurrent updaters block on the row lock and re-check the predicate,
        // so only the first claimant sees a free token.
        let result = sqlx::query(
            "UPDATE schedules SET lock_token = $2, locked_at = $3 \
             WHERE id = $1 AND enabled AND next_run_at <= $3 \
               AND (lock_token IS NULL OR locked_at < $4)",
        )
        .bind(id)
        .bind(token)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_schedule_run(
        &self,
        id: Uuid,
        token: Uuid,
        update: &ScheduleRunUpdate,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET last_run_at = $3, last_status = $4, next_run_at = $5, \
                lock_token = NULL, locked_at = NULL \
             WHERE id = $1 AND lock_token = $2",
        )
        .bind(id)
        .bind(token)
        .bind(update.last_run_at)
        .bind(update.last_status.as_str())
        .bind(update.next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_run_log(&self, log: &ScheduleRunLog) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO schedule_run_logs \
             (id, schedule_id, scheduled_for, enqueued_at, result_status, queue_item_id, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(log.id)
        .bind(log.schedule_id)
        .bind(log.scheduled_for)
        .bind(log.enqueued_at)
        .bind(log.result_status.as_str())
        .bind(log.queue_item_id)
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_run_logs(&self, schedule_id: Uuid) -> StoreResult<Vec<ScheduleRunLog>> {
        let rows = sqlx::query_as::<_, RunLogRow>(
            "SELECT * FROM schedule_run_logs WHERE schedule_id = $1 ORDER BY enqueued_at",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn open_pause(&self, record: &ManualPauseRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO manual_pauses \
             (id, robot_id, mission_code, waypoint_code, pause_start, pause_end, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT DO NOTHING",
        )
        .bind(record.id)
        .bind(&record.robot_id)
        .bind(&record.mission_code)
        .bind(&record.waypoint_code)
        .bind(record.pause_start)
        .bind(record.pause_end)
        .bind(&record.reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn open_pause_for(&self, mission_code: &str) -> StoreResult<Option<ManualPauseRecord>> {
        Ok(sqlx::query_as::<_, ManualPauseRecord>(
            "SELECT * FROM manual_pauses WHERE mission_code = $1 AND pause_end IS NULL",
        )
        .bind(mission_code)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn close_pause(
        &self,
        mission_code: &str,
        ended: DateTime<Utc>,
        reason: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE manual_pauses SET pause_end = $2, reason = COALESCE($3, reason) \
             WHERE mission_code = $1 AND pause_end IS NULL",
        )
        .bind(mission_code)
        .bind(ended)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_pauses(&self, mission_code: &str) -> StoreResult<Vec<ManualPauseRecord>> {
        Ok(sqlx::query_as::<_, ManualPauseRecord>(
            "SELECT * FROM manual_pauses WHERE mission_code = $1 ORDER BY pause_start",
        )
        .bind(mission_code)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn record_visit(&self, visit: &WaypointVisit) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO waypoint_visits (mission_code, waypoint_code, robot_id, arrived_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&visit.mission_code)
        .bind(&visit.waypoint_code)
        .bind(&visit.robot_id)
        .bind(visit.arrived_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_visits(&self, mission_code: &str) -> StoreResult<Vec<WaypointVisit>> {
        Ok(sqlx::query_as::<_, WaypointVisit>(
            "SELECT mission_code, waypoint_code, robot_id, arrived_at FROM waypoint_visits \
             WHERE mission_code = $1 ORDER BY id",
        )
        .bind(mission_code)
        .fetch_all(&self.pool)
        .await?)
    }
}

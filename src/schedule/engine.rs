use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::models::{RunStatus, ScheduleDefinition, ScheduleRunLog, ScheduleRunUpdate};
use super::trigger::{initial_run, next_after_fire};
use crate::error::MissionResult;
use crate::mission::admission::QueueAdmissionController;
use crate::mission::models::{MissionDescriptor, TriggerSource};
use crate::store::MissionStore;

/// Turns due schedule occurrences into queued missions. Safe to run in
/// several processes at once: each occurrence is claimed by exactly one.
pub struct ScheduleTriggerEngine {
    store: Arc<dyn MissionStore>,
    admission: Arc<QueueAdmissionController>,
    claim_lease: Duration,
}

impl ScheduleTriggerEngine {
    pub fn new(
        store: Arc<dyn MissionStore>,
        admission: Arc<QueueAdmissionController>,
        claim_lease: Duration,
    ) -> Self {
        Self {
            store,
            admission,
            claim_lease,
        }
    }

    /// Validate a schedule, compute its first run and persist it.
    pub async fn register(&self, mut schedule: ScheduleDefinition) -> MissionResult<ScheduleDefinition> {
        schedule.next_run_at = initial_run(&schedule, Utc::now())?;
        self.store.upsert_schedule(&schedule).await?;
        tracing::info!(
            schedule_id = %schedule.id,
            name = %schedule.name,
            trigger = schedule.trigger_type.as_str(),
            next_run_at = ?schedule.next_run_at,
            "Schedule registered"
        );
        Ok(schedule)
    }

    /// Fire every schedule due at `now`. Claims are taken one by one; the
    /// claimed occurrences are then enqueued concurrently. Returns how many
    /// occurrences this process claimed.
    pub async fn tick(&self, now: DateTime<Utc>) -> MissionResult<usize> {
        let due = self.store.list_due_schedules(now).await?;
        let stale_before = now - self.claim_lease;
        let mut claimed = Vec::new();

        for schedule in due {
            let token = Uuid::new_v4();
            match self
                .store
                .try_claim_schedule(schedule.id, token, now, stale_before)
                .await
            {
                Ok(true) => claimed.push((schedule, token)),
                Ok(false) => {
                    tracing::debug!(schedule_id = %schedule.id, "Schedule claimed elsewhere - skipping")
                }
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, error = %e, "Failed to claim schedule")
                }
            }
        }

        let results = join_all(
            claimed
                .iter()
                .map(|(schedule, token)| self.run_occurrence(schedule, *token, now)),
        )
        .await;
        for ((schedule, _), result) in claimed.iter().zip(results) {
            if let Err(e) = result {
                // the claim expires after the lease and the occurrence is retried
                tracing::error!(schedule_id = %schedule.id, error = %e, "Failed to record schedule run");
            }
        }

        Ok(claimed.len())
    }

    async fn run_occurrence(
        &self,
        schedule: &ScheduleDefinition,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> MissionResult<()> {
        let scheduled_for = schedule.next_run_at.unwrap_or(now);

        let (result_status, queue_item_id, error, next_run_at) =
            match next_after_fire(schedule, now) {
                Err(e) => {
                    tracing::error!(
                        schedule_id = %schedule.id,
                        name = %schedule.name,
                        error = %e,
                        "Schedule cannot be evaluated - disabling further runs"
                    );
                    (RunStatus::Failed, None, Some(e.to_string()), None)
                }
                Ok(next) => match self.admission.enqueue(occurrence(schedule, scheduled_for)).await {
                    Ok(outcome) => {
                        tracing::info!(
                            schedule_id = %schedule.id,
                            name = %schedule.name,
                            scheduled_for = %scheduled_for,
                            queue_id = %outcome.queue_id,
                            next_run_at = ?next,
                            "Scheduled mission enqueued"
                        );
                        (RunStatus::Success, Some(outcome.queue_id), None, next)
                    }
                    Err(e) => {
                        tracing::warn!(
                            schedule_id = %schedule.id,
                            name = %schedule.name,
                            scheduled_for = %scheduled_for,
                            error = %e,
                            "Scheduled mission rejected by admission"
                        );
                        (RunStatus::Failed, None, Some(e.to_string()), next)
                    }
                },
            };

        self.store
            .insert_run_log(&ScheduleRunLog {
                id: Uuid::new_v4(),
                schedule_id: schedule.id,
                scheduled_for,
                enqueued_at: now,
                result_status,
                queue_item_id,
                error,
            })
            .await?;

        let update = ScheduleRunUpdate {
            last_run_at: now,
            last_status: result_status,
            next_run_at,
        };
        if !self
            .store
            .finish_schedule_run(schedule.id, token, &update)
            .await?
        {
            tracing::warn!(schedule_id = %schedule.id, "Schedule claim expired before run finished");
        }
        Ok(())
    }

    /// Tick every `interval` plus a little jitter until shutdown.
    pub fn spawn(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis() as u64, "Schedule trigger engine started");
            loop {
                let spread = (interval.as_millis() as u64 / 10).max(1);
                let jitter = std::time::Duration::from_millis(rand::random::<u64>() % spread);
                tokio::select! {
                    _ = tokio::time::sleep(interval + jitter) => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            tracing::error!(error = %e, "Schedule tick failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::info!("Schedule trigger engine stopped");
        })
    }
}

/// Mission code for one occurrence. Identical for every process that fires
/// it, so admission rejects a second enqueue of the same occurrence.
pub fn occurrence_code(schedule_id: Uuid, scheduled_for: DateTime<Utc>) -> String {
    format!("SCH-{}-{}", schedule_id, scheduled_for.format("%Y%m%d%H%M"))
}

fn occurrence(schedule: &ScheduleDefinition, scheduled_for: DateTime<Utc>) -> MissionDescriptor {
    let template = &schedule.template;
    MissionDescriptor {
        mission_code: occurrence_code(schedule.id, scheduled_for),
        workflow_id: template.workflow_id.clone(),
        area_key: template.area_key.clone(),
        priority: template.priority,
        steps: template.steps.clone(),
        trigger_source: TriggerSource::Scheduled,
        require_immediate: false,
    }
}

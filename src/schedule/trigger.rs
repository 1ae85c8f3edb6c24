use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use super::models::{ScheduleDefinition, TriggerType};
use crate::error::ScheduleError;

/// Accepts classic five-field expressions by prepending a zero seconds field.
pub fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// First occurrence strictly after `after`, evaluated in the schedule's timezone.
pub fn next_occurrence(
    expr: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let normalized = normalize_cron(expr);
    let schedule = Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;
    let tz = parse_timezone(timezone)?;

    Ok(schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc)))
}

/// Next run of a schedule after one fired at `now`. One-shot schedules never run again.
pub fn next_after_fire(
    schedule: &ScheduleDefinition,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    match schedule.trigger_type {
        TriggerType::Once => Ok(None),
        TriggerType::Recurring => {
            let expr = schedule
                .cron_expression
                .as_deref()
                .ok_or(ScheduleError::MissingRunTime)?;
            next_occurrence(expr, &schedule.timezone, now)
        }
    }
}

/// First run of a newly registered schedule.
pub fn initial_run(
    schedule: &ScheduleDefinition,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    match schedule.trigger_type {
        TriggerType::Once => schedule.run_at.map(Some).ok_or(ScheduleError::MissingRunTime),
        TriggerType::Recurring => next_after_fire(schedule, now),
    }
}

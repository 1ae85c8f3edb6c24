use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::models::{AreaConcurrencyConfig, MissionDescriptor};
use crate::error::MissionError;
use crate::remote::models::CancelMode;
use crate::schedule::{MissionTemplate, ScheduleDefinition, TriggerType};
use crate::AppState;

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let api_key = req.headers().get("X-Api-Key").and_then(|v| v.to_str().ok());

    if api_key != Some(state.config.gateway_api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "status": "error",
                "message": "Invalid API Key"
            })),
        )
            .into_response();
    }

    next.run(req).await
}

pub fn error_response(err: &MissionError) -> Response {
    let status = match err {
        MissionError::Validation(_) | MissionError::Schedule(_) => StatusCode::BAD_REQUEST,
        MissionError::DuplicateMissionCode(_)
        | MissionError::CapacityUnavailable(_)
        | MissionError::InvalidTransition { .. } => StatusCode::CONFLICT,
        MissionError::NotFound(_) | MissionError::MissionNotFound(_) => StatusCode::NOT_FOUND,
        MissionError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        MissionError::RemoteRejected(_) => StatusCode::BAD_GATEWAY,
        MissionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }

    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "message": err.to_string()
        })),
    )
        .into_response()
}

pub async fn enqueue_mission(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MissionDescriptor>,
) -> Response {
    match state.admission.enqueue(payload).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    pub mode: CancelMode,
    pub reason: Option<String>,
}

pub async fn cancel_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<CancelParams>,
) -> Response {
    let reason = params.reason.unwrap_or_else(|| "cancelled by operator".to_string());
    match state.admission.cancel(id, params.mode, &reason).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn queue_stats(State(state): State<Arc<AppState>>) -> Response {
    match state.admission.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn resume_mission(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    match state.waypoints.resume(&code).await {
        Ok(outcome) => Json(serde_json::json!({
            "missionCode": code,
            "outcome": outcome
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn mission_waypoints(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let pauses = match state.store.list_pauses(&code).await {
        Ok(p) => p,
        Err(e) => return error_response(&MissionError::from(e)),
    };
    let visits = match state.waypoints.visited_waypoints(&code).await {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };

    Json(serde_json::json!({
        "missionCode": code,
        "state": state.waypoints.state(&code).await,
        "visits": visits,
        "pauses": pauses
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub name: String,
    pub trigger_type: TriggerType,
    pub cron_expression: Option<String>,
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timezone: Option<String>,
    pub template: MissionTemplate,
}

pub async fn register_schedule(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewSchedule>,
) -> Response {
    let schedule = match (payload.trigger_type, payload.cron_expression, payload.run_at) {
        (TriggerType::Recurring, Some(expr), _) => ScheduleDefinition::recurring(
            payload.name,
            expr,
            payload.timezone.unwrap_or_else(|| "UTC".to_string()),
            payload.template,
        ),
        (TriggerType::Once, _, Some(run_at)) => {
            ScheduleDefinition::once(payload.name, run_at, payload.template)
        }
        (TriggerType::Recurring, None, _) => {
            return error_response(&MissionError::Validation(
                "cronExpression is required for recurring schedules".into(),
            ))
        }
        (TriggerType::Once, _, None) => {
            return error_response(&MissionError::Validation(
                "runAt is required for one-shot schedules".into(),
            ))
        }
    };

    match state.schedules.register(schedule).await {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaSettings {
    pub max_concurrent_robots: i32,
    #[serde(default = "enabled")]
    pub queueing_enabled: bool,
    pub default_priority: Option<i32>,
    pub max_opportunistic_chain: Option<i32>,
}

fn enabled() -> bool {
    true
}

pub async fn upsert_area(
    State(state): State<Arc<AppState>>,
    Path(area_key): Path<String>,
    Json(payload): Json<AreaSettings>,
) -> Response {
    if payload.max_concurrent_robots < 1 {
        return error_response(&MissionError::Validation(
            "maxConcurrentRobots must be at least 1".into(),
        ));
    }
    if payload.max_opportunistic_chain.is_some_and(|c| c < 0) {
        return error_response(&MissionError::Validation(
            "maxOpportunisticChain must be >= 0".into(),
        ));
    }

    let defaults = &state.config.area_defaults;
    let config = AreaConcurrencyConfig {
        area_key: area_key.trim().to_string(),
        max_concurrent_robots: payload.max_concurrent_robots,
        queueing_enabled: payload.queueing_enabled,
        default_priority: payload.default_priority.unwrap_or(defaults.default_priority),
        max_opportunistic_chain: payload
            .max_opportunistic_chain
            .unwrap_or(defaults.max_opportunistic_chain),
    };

    if let Err(e) = state.store.upsert_area_config(&config).await {
        return error_response(&MissionError::from(e));
    }
    tracing::info!(
        area = %config.area_key,
        max_concurrent_robots = config.max_concurrent_robots,
        queueing_enabled = config.queueing_enabled,
        "Area configuration updated"
    );

    // a raised limit may let waiting missions start
    if let Err(e) = state.admission.process_area(&config.area_key, None).await {
        tracing::warn!(area = %config.area_key, error = %e, "Admission after area update failed");
    }

    Json(config).into_response()
}

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod mission;
pub mod notify;
pub mod remote;
pub mod schedule;
pub mod steps;
pub mod store;
pub mod waypoint;

pub use config::Config;
pub use database::{create_pool, create_redis_client};
use axum::{middleware, routing::{delete, get, post, put}, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use mission::{QueueAdmissionController, ReconciliationLoop};
use notify::Notifier;
use remote::{AmrController, RemoteExecutionBridge};
use schedule::ScheduleTriggerEngine;
use store::MissionStore;
use waypoint::ManualWaypointCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn MissionStore>,
    pub admission: Arc<QueueAdmissionController>,
    pub waypoints: Arc<ManualWaypointCoordinator>,
    pub reconciler: Arc<ReconciliationLoop>,
    pub schedules: Arc<ScheduleTriggerEngine>,
}

impl AppState {
    /// Wire the engine components around one store and one controller.
    pub fn new(
        config: Config,
        store: Arc<dyn MissionStore>,
        controller: Arc<dyn AmrController>,
        notifier: Notifier,
    ) -> Self {
        let bridge = RemoteExecutionBridge::new(
            controller,
            config.status_table.clone(),
            config.amr_timeout,
        );
        let admission = Arc::new(QueueAdmissionController::new(
            store.clone(),
            bridge.clone(),
            notifier.clone(),
            config.area_defaults.clone(),
        ));
        let waypoints = Arc::new(ManualWaypointCoordinator::new(
            store.clone(),
            bridge,
            notifier.clone(),
        ));
        let reconciler = Arc::new(ReconciliationLoop::new(
            store.clone(),
            admission.clone(),
            waypoints.clone(),
            notifier,
            chrono::Duration::from_std(config.stale_grace)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        ));
        let schedules = Arc::new(ScheduleTriggerEngine::new(
            store.clone(),
            admission.clone(),
            chrono::Duration::from_std(config.schedule_claim_lease)
                .unwrap_or_else(|_| chrono::Duration::minutes(2)),
        ));

        Self {
            config,
            store,
            admission,
            waypoints,
            reconciler,
            schedules,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // everything except the liveness check needs the gateway key
    let api_routes = Router::new()
        .route("/missions", post(mission::routes::enqueue_mission))
        .route("/missions/stats", get(mission::routes::queue_stats))
        .route("/missions/{mission}", delete(mission::routes::cancel_mission))
        .route(
            "/missions/{mission}/resume",
            post(mission::routes::resume_mission),
        )
        .route(
            "/missions/{mission}/waypoints",
            get(mission::routes::mission_waypoints),
        )
        .route("/schedules", post(mission::routes::register_schedule))
        .route("/areas/{area}", put(mission::routes::upsert_area))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            mission::routes::require_api_key,
        ));

    Router::new()
        .route("/", get(root))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "Mission Control API - v0.1.0"
}

use std::sync::Arc;
use tokio::sync::watch;

use mission_control::notify::{Notifier, RedisSink};
use mission_control::remote::HttpAmrController;
use mission_control::store::PgStore;
use mission_control::{create_pool, create_redis_client, create_router, logging, mission, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    let store = PgStore::new(pool);
    store.migrate().await?;
    tracing::info!("Database migrations applied");

    let redis = create_redis_client(&config.redis_url).await?;
    let notifier = Notifier::new().with_sink(Arc::new(RedisSink::new(
        redis,
        config.notify_channel.clone(),
    )));

    let http = reqwest::Client::builder().timeout(config.amr_timeout).build()?;
    let mut controller = HttpAmrController::new(http, config.amr_base_url.clone());
    if let Some(key) = &config.amr_api_key {
        controller = controller.with_api_key(key.clone());
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(store),
        Arc::new(controller),
        notifier,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = vec![
        state
            .reconciler
            .clone()
            .spawn(config.reconcile_interval, shutdown_rx.clone()),
        state
            .schedules
            .clone()
            .spawn(config.schedule_tick, shutdown_rx.clone()),
        mission::spawn_admission_loop(
            state.admission.clone(),
            config.admission_interval,
            shutdown_rx.clone(),
        ),
    ];

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    tracing::info!(address = %config.server_address, amr = %config.amr_base_url, "Mission control listening");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received - shutting down"),
                _ = server_shutdown.changed() => {}
            }
        })
        .await?;

    let _ = shutdown_tx.send(true);
    futures::future::join_all(loops).await;
    tracing::info!("Mission control stopped");
    Ok(())
}

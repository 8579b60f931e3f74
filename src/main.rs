use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use clinicdesk::config::AppConfig;
use clinicdesk::db::SqliteStore;
use clinicdesk::handlers;
use clinicdesk::services::catalog::ServiceCatalog;
use clinicdesk::services::clock::{Clock, SystemClock};
use clinicdesk::state::AppState;

const SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = SqliteStore::open(&config.database_url)?;
    let added = match &config.availability_path {
        Some(path) => store.seed_from_file(path)?,
        None => store.seed_grid(clock.today(), config.seed_days, &config.slot_times)?,
    };
    tracing::info!(added, "availability seeded");

    let catalog = match &config.services_path {
        Some(path) => ServiceCatalog::from_json_file(path)?,
        None => ServiceCatalog::builtin(),
    }
    .with_default(config.default_service_id.as_deref());
    tracing::info!(services = catalog.all().len(), "service catalog loaded");

    let state = Arc::new(AppState::new(config.clone(), store, catalog, clock));

    // Stands in for the call layer's disengagement timeout.
    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let timeout = chrono::Duration::minutes(sweeper.config.session_timeout_minutes);
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            match sweeper.desk.abandon_idle(timeout) {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "abandoned idle sessions"),
                Err(e) => tracing::error!(error = %e, "idle session sweep failed"),
            }
        }
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

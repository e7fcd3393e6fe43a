use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beacon_api::{build_router, state::AppState};
use beacon_config::Settings;
use beacon_db::{connect, indexes::ensure_indexes};
use beacon_engine::queue::{
    EnqueueOptions, FLUSH_BATCHES_JOB, FLUSH_QUIET_HOURS_JOB, JobQueue, TokioJobQueue,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (silently ignore if missing)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "beacon_api=debug,beacon_services=debug,beacon_db=debug,tower_http=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    info!(
        "Starting Beacon API on {}:{}",
        settings.app.host, settings.app.port
    );

    let db = connect(&settings).await?;
    ensure_indexes(&db).await?;

    let app_state = AppState::new(db, settings.clone()).await?;

    start_sweeps(&settings, app_state.queue.clone()).await?;

    let app = build_router(app_state);

    let addr = format!("{}:{}", settings.app.host, settings.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Registers the periodic batch and quiet-hours flushes. Sweeps are
/// self-contained, so a missed run is picked up by the next one and
/// they never retry.
async fn start_sweeps(
    settings: &Settings,
    queue: std::sync::Arc<TokioJobQueue>,
) -> anyhow::Result<()> {
    let scheduler = JobScheduler::new().await?;

    for (job_type, cron) in [
        (
            FLUSH_BATCHES_JOB,
            settings.notifications.batch_flush_cron.clone(),
        ),
        (
            FLUSH_QUIET_HOURS_JOB,
            settings.notifications.quiet_hours_flush_cron.clone(),
        ),
    ] {
        let queue = queue.clone();
        let job = Job::new_async(cron.as_str(), move |_id, _scheduler| {
            let queue = queue.clone();
            Box::pin(async move {
                let options = EnqueueOptions {
                    attempts: 1,
                    backoff: Duration::ZERO,
                };
                if let Err(err) = queue.enqueue(job_type, serde_json::json!({}), options).await {
                    error!(%err, job_type, "Failed to enqueue sweep");
                }
            })
        })?;
        scheduler.add(job).await?;
        info!(job_type, %cron, "Scheduled sweep");
    }

    scheduler.start().await?;
    Ok(())
}

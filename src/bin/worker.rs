use metrics_exporter_prometheus::PrometheusBuilder;
use salon_card_parser::{
    config::AppConfig,
    db::{self, cards::PgGateway, queue::PgJobStore},
    services::{
        browser::ChromeLauncher,
        debug_bundle::DebugBundles,
        driver::BrowserDriver,
        identity::IdentityProvider,
        reconcile::Reconciler,
        sessions::SessionRegistry,
        worker::{TickOutcome, Worker, WorkerSettings},
    },
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting card parser worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = config.worker_metrics_addr.as_deref() {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus listener");
        tracing::info!(%addr, "Worker metrics listener started");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // One registry shared by the driver (parks tabs) and the worker (expires them).
    let sessions = Arc::new(SessionRegistry::new());
    let launcher = ChromeLauncher {
        chrome_executable: config.chrome_executable.as_ref().map(PathBuf::from),
        headless: config.headless,
    };
    let driver = BrowserDriver::new(
        Arc::new(launcher),
        sessions.clone(),
        Arc::new(Reconciler::default()),
        config.captcha_public_base_url.clone(),
    );
    let identity = IdentityProvider::from_config(&config).await;

    let worker = Worker::new(
        Arc::new(PgJobStore::new(db_pool.clone())),
        Arc::new(driver),
        Arc::new(PgGateway::new(db_pool)),
        sessions,
        DebugBundles::new(&config.debug_bundle_dir),
        identity.identity().clone(),
        WorkerSettings::from_config(&config),
    );

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    tracing::info!(
        poll_interval_ms = config.poll_interval_ms,
        job_timeout_secs = config.job_timeout_secs,
        captcha_ttl_secs = config.captcha_ttl_secs,
        "Worker ready, starting job processing loop"
    );

    // Single job at a time; the next poll starts only after this one settles.
    loop {
        match worker.tick().await {
            Ok(TickOutcome::Processed { job_id, status }) => {
                tracing::debug!(%job_id, %status, "Job processed, checking for next job");
            }
            Ok(TickOutcome::Expired(count)) => {
                tracing::debug!(count, "Captcha jobs expired");
                sleep(poll_interval).await;
            }
            Ok(TickOutcome::Idle) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue error, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}

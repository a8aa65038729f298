//! Outreach daemon - composition root
//!
//! Wires the SQLite store, the email transport and the optional CRM into the
//! core services, then runs the due-check driver and housekeeping until
//! Ctrl+C.

mod config;
mod dry_run;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{CrmKind, DaemonConfig, TransportKind};
use crate::dry_run::DryRunTransport;
use outreach_core::application::{
    shutdown_channel, Housekeeping, JobQueue, RateLimiter, SendStepProcessor, SequenceDriver,
    SequenceScheduler, ShutdownToken, WaveDispatcher,
};
use outreach_core::port::id_provider::UuidProvider;
use outreach_core::port::time_provider::SystemTimeProvider;
use outreach_core::port::{
    CrmPropertyStore, EmailTransport, IdProvider, SequenceRepository, TimeProvider,
};
use outreach_infra_http::{AppsScriptTransport, HubSpotCrmStore};
use outreach_infra_sqlite::{create_pool, database_url, run_migrations, SqliteSequenceRepository};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "outreach-daemon")]
#[command(about = "Runs outreach sequences on a schedule", long_about = None)]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(long, env = "OUTREACH_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single due-check pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Configuration and logging
    let config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = logging::init(&config)?;

    info!("Outreach daemon v{} starting...", VERSION);

    // 2. Database
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(db_path = %db_path.display(), "Initializing database...");

    let pool = create_pool(&database_url(&db_path))
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Dependencies
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let repository: Arc<dyn SequenceRepository> =
        Arc::new(SqliteSequenceRepository::new(pool.clone()));

    let crm: Option<Arc<dyn CrmPropertyStore>> = match config.crm.kind {
        CrmKind::None => None,
        CrmKind::Hubspot => {
            let store: Arc<dyn CrmPropertyStore> = Arc::new(
                HubSpotCrmStore::new(
                    config.crm.hubspot_base_url.clone(),
                    config.crm.hubspot_token.clone().unwrap_or_default(),
                    Duration::from_secs(config.crm.timeout_secs),
                    time_provider.clone(),
                )
                .context("HubSpot client setup failed")?
                .with_search_cache(config.api_cache_config()),
            );
            Some(store)
        }
    };

    let transport: Arc<dyn EmailTransport> = match config.transport.kind {
        TransportKind::DryRun => {
            warn!("Dry-run transport selected: no email will be sent");
            Arc::new(DryRunTransport::new(id_provider.clone()))
        }
        TransportKind::AppsScript => Arc::new(
            AppsScriptTransport::new(
                config.transport.apps_script_url.clone().unwrap_or_default(),
                Duration::from_secs(config.transport.timeout_secs),
            )
            .context("Apps Script client setup failed")?,
        ),
    };

    let mut scheduler =
        SequenceScheduler::new(repository.clone(), time_provider.clone(), config.sequence_config());
    if let Some(crm) = &crm {
        scheduler = scheduler.with_crm(crm.clone());
    }
    let scheduler = Arc::new(scheduler);

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_config(),
        time_provider.clone(),
    ));

    let queue = JobQueue::new(config.queue_config(), id_provider.clone(), time_provider.clone());
    queue.register_processor(Arc::new(SendStepProcessor::new(
        scheduler,
        transport,
        rate_limiter,
        config.send_step_config(),
    )));

    let (shutdown_tx, shutdown) = shutdown_channel();

    let waves = WaveDispatcher::new(config.wave_config()).with_shutdown(shutdown.clone());
    let mut driver = SequenceDriver::new(
        repository.clone(),
        queue.clone(),
        waves,
        time_provider.clone(),
        config.driver_config(),
    );
    if let Some(crm) = crm {
        driver = driver.with_crm(crm);
    }
    let driver = Arc::new(driver);

    if args.once {
        let report = driver.run_waves().await.context("Due-check failed")?;
        info!(
            total = report.total,
            sent = report.sent,
            failed = report.failed,
            waves = report.waves,
            "Single pass complete"
        );
        return Ok(());
    }

    // 4. Background loops
    info!(
        interval_secs = config.driver.interval_secs,
        queue = queue.name(),
        "Starting sequence driver..."
    );
    let driver_handle = tokio::spawn(run_driver(
        driver.clone(),
        Duration::from_secs(config.driver.interval_secs),
        shutdown.clone(),
    ));

    let housekeeping = Housekeeping::new(
        queue.clone(),
        repository,
        Duration::from_secs(config.driver.housekeeping_interval_secs),
    )
    .with_driver(driver);
    let housekeeping_handle = tokio::spawn(housekeeping.run(shutdown));

    info!("System ready. Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 6. Graceful shutdown
    shutdown_tx.shutdown();
    let grace = Duration::from_secs(config.driver.shutdown_grace_secs);
    if tokio::time::timeout(grace, driver_handle).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "Driver did not stop within grace period");
    }
    if tokio::time::timeout(grace, queue.wait_idle()).await.is_err() {
        let status = queue.get_status();
        warn!(
            queued = status.queued,
            processing = status.processing,
            "Abandoning unfinished jobs; their sequences stay due"
        );
    }
    let _ = housekeeping_handle.await;
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}

/// Run a wave pass every `every` until shutdown
async fn run_driver(driver: Arc<SequenceDriver>, every: Duration, mut shutdown: ShutdownToken) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.wait() => break,
        }

        match driver.run_waves().await {
            Ok(report) if report.total > 0 => info!(
                total = report.total,
                sent = report.sent,
                failed = report.failed,
                waves = report.waves,
                skipped = report.skipped,
                "Wave pass complete"
            ),
            Ok(_) => {}
            Err(e) => error!(error = ?e, "Wave pass failed"),
        }
    }
    info!("Sequence driver stopped");
}

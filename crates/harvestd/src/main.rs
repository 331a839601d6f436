//! harvestd binary entry point.
//!
//! # Usage
//!
//! ```text
//! harvestd run --listen 0.0.0.0:5000 --config config.toml --fixture fixture.json
//! harvestd verify-config --config config.toml
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use harvest_clients::{ClientCache, FixtureCache};
use harvest_core::JobsFile;
use harvest_exporter::{CacheFactory, ExporterResult, Scraper, Supervisor};
use harvest_job::Updater;
use harvestd::{AppState, Cli, Command, RunArgs, build_router, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level, cli.log_format);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::VerifyConfig { config } => {
            let jobs = JobsFile::load(&config)?;
            info!(path = %config.display(), jobs = jobs.job_count(), "configuration is valid");
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    info!(config = %args.config.display(), "harvestd starting");

    // A bad config at startup is fatal; on reload it is not.
    let jobs = JobsFile::load(&args.config)?;

    // ── Exporter ───────────────────────────────────────────────

    let scraper = Arc::new(Scraper::new(
        Updater::new(args.update_options()),
        args.registry_options(),
        args.scraping_interval(),
    ));

    let fixture_path = args.fixture.clone();
    let cache_factory: CacheFactory = Arc::new(move || -> ExporterResult<Arc<dyn ClientCache>> {
        let cache: Arc<dyn ClientCache> = Arc::new(FixtureCache::from_file(&fixture_path)?);
        Ok(cache)
    });

    let shutdown = CancellationToken::new();
    let supervisor = Arc::new(Supervisor::new(scraper, cache_factory, shutdown.clone()));
    supervisor.start(jobs).await?;

    let state = AppState::new(Arc::clone(&supervisor), args.config.clone());

    // ── Signals ────────────────────────────────────────────────

    #[cfg(unix)]
    spawn_sighup_reload(state.clone(), shutdown.clone())?;

    // ── HTTP ───────────────────────────────────────────────────

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, "listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    supervisor.stop().await;
    info!("harvestd stopped");
    Ok(())
}

#[cfg(unix)]
fn spawn_sighup_reload(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received, reloading configuration");
                    if let Err(e) = state.reload().await {
                        error!(error = %e, "reload failed, keeping current configuration");
                    }
                }
            }
        }
    });
    Ok(())
}

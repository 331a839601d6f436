//! Scrape loop supervision and configuration reload.
//!
//! A reload parses the new file first. Only when it is valid and a client
//! cache can be built for it does the running loop get cancelled and a new
//! one spawned. A bad file leaves the previous loop running.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use harvest_clients::ClientCache;
use harvest_core::{JobsConfig, JobsFile};
use harvest_job::{Clock, SystemClock};

use crate::error::ExporterResult;
use crate::scraper::Scraper;

/// Builds the client cache for a freshly loaded configuration.
pub type CacheFactory = Arc<dyn Fn() -> ExporterResult<Arc<dyn ClientCache>> + Send + Sync>;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
    jobs: Arc<JobsConfig>,
}

pub struct Supervisor<C = SystemClock> {
    scraper: Arc<Scraper<C>>,
    cache_factory: CacheFactory,
    shutdown: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl<C> Supervisor<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Every loop runs under a child of `shutdown`.
    pub fn new(scraper: Arc<Scraper<C>>, cache_factory: CacheFactory, shutdown: CancellationToken) -> Self {
        Self {
            scraper,
            cache_factory,
            shutdown,
            running: Mutex::new(None),
        }
    }

    pub fn scraper(&self) -> &Arc<Scraper<C>> {
        &self.scraper
    }

    /// Replace the running loop, if any, with one over `jobs`.
    pub async fn start(&self, jobs: JobsConfig) -> ExporterResult<()> {
        let cache = match (self.cache_factory)() {
            Ok(cache) => cache,
            Err(e) => {
                error!(error = %e, "could not build client cache, keeping current loop");
                return Err(e);
            }
        };
        let jobs = Arc::new(jobs);

        let mut running = self.running.lock().await;
        if let Some(old) = running.take() {
            stop_loop(old).await;
        }

        let token = self.shutdown.child_token();
        let handle = tokio::spawn(Arc::clone(&self.scraper).run(
            token.clone(),
            Arc::clone(&jobs),
            cache,
        ));
        info!(jobs = jobs.job_count(), "scrape loop (re)started");
        *running = Some(Running { token, handle, jobs });
        Ok(())
    }

    /// Load `path` and restart the loop with it. On error the current loop
    /// keeps running with its old configuration.
    pub async fn reload(&self, path: &Path) -> ExporterResult<()> {
        let jobs = match JobsFile::load(path) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(path = %path.display(), error = %e, "reload rejected, keeping current configuration");
                return Err(e.into());
            }
        };
        info!(path = %path.display(), "configuration reloaded");
        self.start(jobs).await
    }

    /// Cancel the running loop and wait for it to finish.
    pub async fn stop(&self) {
        if let Some(old) = self.running.lock().await.take() {
            stop_loop(old).await;
        }
    }

    pub async fn current_jobs(&self) -> Option<Arc<JobsConfig>> {
        self.running.lock().await.as_ref().map(|r| Arc::clone(&r.jobs))
    }
}

async fn stop_loop(running: Running) {
    running.token.cancel();
    if let Err(e) = running.handle.await {
        warn!(error = %e, "scrape loop task failed");
    }
}

//! Scrape loop and registry publication.
//!
//! A scrape refreshes the client cache, runs every job, builds a fresh
//! registry and swaps it in. At most one scrape runs at a time; a tick that
//! finds one in flight is skipped. The cache is cleared when the scrape ends,
//! however it ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use prometheus::{Registry, TextEncoder};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use harvest_clients::ClientCache;
use harvest_core::JobsConfig;
use harvest_job::{Clock, SystemClock, Updater};

use crate::error::ExporterResult;
use crate::registry::{RegistryOptions, build_registry};

pub const DEFAULT_SCRAPING_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// A new registry was published.
    Published,
    /// Another scrape was already running.
    Skipped,
    /// The scrape was cancelled; the previous registry stays in place.
    Cancelled,
    /// Jobs ran but the registry could not be built.
    Failed,
}

pub struct Scraper<C = SystemClock> {
    updater: Updater<C>,
    registry_options: RegistryOptions,
    current: ArcSwap<Registry>,
    gate: Semaphore,
    interval: Duration,
    publications: AtomicU64,
}

/// Clears the cache on drop.
struct ClearGuard<'a>(&'a dyn ClientCache);

impl Drop for ClearGuard<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

impl<C> Scraper<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    pub fn new(updater: Updater<C>, registry_options: RegistryOptions, interval: Duration) -> Self {
        Self {
            updater,
            registry_options,
            current: ArcSwap::from_pointee(Registry::new()),
            gate: Semaphore::new(1),
            interval,
            publications: AtomicU64::new(0),
        }
    }

    /// The most recently published registry.
    pub fn registry(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    /// Text exposition of the current registry.
    pub fn render(&self) -> ExporterResult<String> {
        let families = self.current.load().gather();
        Ok(TextEncoder::new().encode_to_string(&families)?)
    }

    pub fn publications(&self) -> u64 {
        self.publications.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn scrape(
        &self,
        token: &CancellationToken,
        jobs: &JobsConfig,
        cache: &dyn ClientCache,
    ) -> ScrapeOutcome {
        let Ok(_permit) = self.gate.try_acquire() else {
            warn!("previous scrape still running, skipping");
            return ScrapeOutcome::Skipped;
        };

        cache.refresh();
        let _clear = ClearGuard(cache);

        let result = match self.updater.update(token, jobs, cache).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                info!("scrape cancelled, keeping previous registry");
                return ScrapeOutcome::Cancelled;
            }
            Err(e) => {
                error!(error = %e, "scrape failed");
                return ScrapeOutcome::Failed;
            }
        };

        match build_registry(&result, &self.registry_options) {
            Ok(registry) => {
                self.current.store(Arc::new(registry));
                let n = self.publications.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    publication = n,
                    datums = result.datum_count(),
                    "registry published"
                );
                ScrapeOutcome::Published
            }
            Err(e) => {
                error!(error = %e, "failed to build registry");
                ScrapeOutcome::Failed
            }
        }
    }

    /// Scrape now and then on every interval tick until `token` fires.
    /// In-flight scrapes are awaited before returning.
    pub async fn run(
        self: Arc<Self>,
        token: CancellationToken,
        jobs: Arc<JobsConfig>,
        cache: Arc<dyn ClientCache>,
    ) {
        info!(
            interval_secs = self.interval.as_secs(),
            jobs = jobs.job_count(),
            "scrape loop started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inflight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    while inflight.try_join_next().is_some() {}

                    let scraper = Arc::clone(&self);
                    let token = token.clone();
                    let jobs = Arc::clone(&jobs);
                    let cache = Arc::clone(&cache);
                    inflight.spawn(async move {
                        let outcome = scraper.scrape(&token, &jobs, cache.as_ref()).await;
                        debug!(?outcome, "scrape finished");
                    });
                }
            }
        }

        while inflight.join_next().await.is_some() {}
        info!("scrape loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use harvest_clients::{Fixture, FixtureCache};
    use harvest_core::JobsFile;

    const JOBS: &str = r#"
[[static]]
name = "orders-queue"
namespace = "AWS/SQS"
regions = ["us-east-1"]
dimensions = [{ name = "QueueName", value = "orders" }]

[[static.metrics]]
name = "ApproximateAgeOfOldestMessage"
statistics = ["Maximum"]
"#;

    fn fixture() -> Fixture {
        serde_json::from_value(serde_json::json!({
            "account_id": "123456789012",
            "account_alias": "prod",
            "resources": [],
            "metrics": [{
                "region": "us-east-1",
                "namespace": "AWS/SQS",
                "name": "ApproximateAgeOfOldestMessage",
                "dimensions": [{ "name": "QueueName", "value": "orders" }],
                "datapoints": [{ "timestamp": 1704110400, "maximum": 30.0 }]
            }]
        }))
        .unwrap()
    }

    fn jobs() -> JobsConfig {
        JobsFile::parse(JOBS).unwrap().validate().unwrap()
    }

    fn scraper(interval: Duration) -> Arc<Scraper> {
        Arc::new(Scraper::new(
            Updater::new(Default::default()),
            RegistryOptions::default(),
            interval,
        ))
    }

    #[tokio::test]
    async fn publishes_and_renders() {
        let scraper = scraper(DEFAULT_SCRAPING_INTERVAL);
        let cache = FixtureCache::new(fixture());

        let outcome = scraper.scrape(&CancellationToken::new(), &jobs(), &cache).await;
        assert_eq!(outcome, ScrapeOutcome::Published);
        assert_eq!(scraper.publications(), 1);
        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(cache.clear_count(), 1);

        let text = scraper.render().unwrap();
        assert!(text.contains("aws_sqs_approximate_age_of_oldest_message_maximum"));
        assert!(text.contains("name=\"orders-queue\""));
        assert!(text.contains("cloudharvest_api_requests_total"));
    }

    #[tokio::test]
    async fn overlapping_scrape_is_skipped() {
        let scraper = scraper(DEFAULT_SCRAPING_INTERVAL);
        let cache = FixtureCache::new(fixture()).with_latency(Duration::from_millis(50));
        let jobs = jobs();
        let token = CancellationToken::new();

        let (first, second) = tokio::join!(scraper.scrape(&token, &jobs, &cache), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            scraper.scrape(&token, &jobs, &cache).await
        });

        assert_eq!(first, ScrapeOutcome::Published);
        assert_eq!(second, ScrapeOutcome::Skipped);
        assert_eq!(scraper.publications(), 1);
        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(cache.clear_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_scrape_keeps_previous_registry_and_clears() {
        let scraper = scraper(DEFAULT_SCRAPING_INTERVAL);
        let cache = FixtureCache::new(fixture());
        let token = CancellationToken::new();
        token.cancel();

        let outcome = scraper.scrape(&token, &jobs(), &cache).await;
        assert_eq!(outcome, ScrapeOutcome::Cancelled);
        assert_eq!(scraper.publications(), 0);
        assert!(scraper.registry().gather().is_empty());
        assert_eq!(cache.clear_count(), 1);
    }

    #[tokio::test]
    async fn loop_scrapes_on_every_tick_until_cancelled() {
        let scraper = scraper(Duration::from_millis(20));
        let cache = Arc::new(FixtureCache::new(fixture()));
        let token = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&scraper).run(
            token.clone(),
            Arc::new(jobs()),
            Arc::clone(&cache) as Arc<dyn ClientCache>,
        ));
        tokio::time::sleep(Duration::from_millis(110)).await;
        token.cancel();
        handle.await.unwrap();

        let published = scraper.publications();
        assert!(published >= 2, "only {published} publications");
        assert_eq!(cache.refresh_count(), cache.clear_count());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scraper.publications(), published);
    }
}

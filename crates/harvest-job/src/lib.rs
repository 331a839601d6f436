//! harvest-job — the per-scrape pipeline.
//!
//! Runs every configured job over its regions and roles and gathers the
//! results into one [`ScrapeResult`](harvest_core::ScrapeResult):
//!
//! - Discovers tagged resources and filters them by search tags
//! - Associates each listed metric series with at most one resource
//! - Cuts pending requests into batches sharing one retrieval window
//! - Fetches batches concurrently under the active concurrency policy
//!
//! # Architecture
//!
//! ```text
//! Updater (jobs × regions × roles)
//!   ├── Discoverer (paged GetResources, search tags, service hooks)
//!   ├── JobRunner
//!   │     ├── Associator (dimension templates → resource)
//!   │     ├── pending buffer ── compact() between batch cuts
//!   │     └── MetricWindowCalculator (period-aligned windows)
//!   └── static jobs (one GetMetricStatistics per metric)
//! ```

pub mod associator;
pub mod compact;
pub mod discovery;
pub mod error;
pub mod job;
pub mod runner;
pub mod static_job;
pub mod update;
pub mod window;

pub use associator::Associator;
pub use compact::compact;
pub use discovery::{Discoverer, HookError, HookRegistry, ResourceEnumerator, ResourceFilter, ServiceHooks};
pub use error::{DiscoveryError, DiscoveryResult, JobError, JobResult};
pub use job::{Job, ListMetricsParams, ResourceEnrichment};
pub use runner::{DEFAULT_METRICS_PER_QUERY, JobRunner};
pub use static_job::run_static_job;
pub use update::{DEFAULT_TAG_CONCURRENCY, UpdateOptions, Updater};
pub use window::{Clock, FixedClock, MetricWindowCalculator, SystemClock};

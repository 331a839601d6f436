//! Capability interfaces and their request/response types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use harvest_core::{Dimension, Metric, Role, Tag};

use crate::error::ClientResult;

/// Largest page the tagging API accepts.
pub const RESOURCES_PER_PAGE: u32 = 100;

/// API call families, used for concurrency limits and request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCall {
    ListMetrics,
    GetMetricData,
    GetMetricStatistics,
    GetResources,
    GetAccount,
    GetAccountAlias,
}

impl ApiCall {
    pub const ALL: [ApiCall; 6] = [
        ApiCall::ListMetrics,
        ApiCall::GetMetricData,
        ApiCall::GetMetricStatistics,
        ApiCall::GetResources,
        ApiCall::GetAccount,
        ApiCall::GetAccountAlias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCall::ListMetrics => "list_metrics",
            ApiCall::GetMetricData => "get_metric_data",
            ApiCall::GetMetricStatistics => "get_metric_statistics",
            ApiCall::GetResources => "get_resources",
            ApiCall::GetAccount => "get_account",
            ApiCall::GetAccountAlias => "get_account_alias",
        }
    }
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-scrape request counters, one per API call family.
#[derive(Debug, Default)]
pub struct ApiCounters {
    counts: [AtomicU64; 6],
}

impl ApiCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc(&self, api: ApiCall) {
        self.counts[Self::index(api)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, api: ApiCall) -> u64 {
        self.counts[Self::index(api)].load(Ordering::Relaxed)
    }

    /// Snapshot as `(api name, count)` pairs.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        ApiCall::ALL
            .iter()
            .map(|api| (api.as_str().to_string(), self.get(*api)))
            .collect()
    }

    fn index(api: ApiCall) -> usize {
        ApiCall::ALL.iter().position(|a| *a == api).unwrap_or(0)
    }
}

// ── Metrics API ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ListMetricsRequest {
    pub namespace: String,
    pub metric_name: String,
    /// Only series with data in roughly the last three hours.
    pub recently_active_only: bool,
}

/// One query of a GetMetricData batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDataQuery {
    /// Unique within a batch; results are matched back by id.
    pub id: String,
    pub metric: Metric,
    pub statistic: String,
    pub period: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDataResult {
    pub id: String,
    /// Most recent value, absent when the series had no data in the window.
    pub value: Option<f64>,
    pub timestamp: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRequest {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub statistics: Vec<String>,
    pub period: Duration,
    pub start: SystemTime,
    pub end: SystemTime,
}

/// A GetMetricStatistics datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    #[serde(with = "epoch_secs")]
    pub timestamp: SystemTime,
    pub average: Option<f64>,
    pub sum: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub sample_count: Option<f64>,
    /// Percentile statistics such as `p99`.
    #[serde(default)]
    pub extended: HashMap<String, f64>,
}

impl Default for Datapoint {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::UNIX_EPOCH,
            average: None,
            sum: None,
            minimum: None,
            maximum: None,
            sample_count: None,
            extended: HashMap::new(),
        }
    }
}

impl Datapoint {
    /// Value of a named statistic, if the datapoint carries it.
    pub fn statistic(&self, name: &str) -> Option<f64> {
        match name {
            "Average" => self.average,
            "Sum" => self.sum,
            "Minimum" => self.minimum,
            "Maximum" => self.maximum,
            "SampleCount" => self.sample_count,
            other => self.extended.get(other).copied(),
        }
    }
}

/// Callback receiving one page of listed metrics.
pub type MetricsPageFn<'a> = dyn FnMut(Vec<Metric>) + Send + 'a;

#[async_trait]
pub trait MetricsApiClient: Send + Sync {
    /// List metrics, handing each page to `on_page` as it arrives.
    async fn list_metrics(
        &self,
        req: &ListMetricsRequest,
        on_page: &mut MetricsPageFn<'_>,
    ) -> ClientResult<()>;

    async fn get_metric_data(
        &self,
        queries: &[MetricDataQuery],
        start: SystemTime,
        end: SystemTime,
    ) -> ClientResult<Vec<MetricDataResult>>;

    async fn get_metric_statistics(&self, req: &StatisticsRequest) -> ClientResult<Vec<Datapoint>>;
}

// ── Tagging API ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ResourcesRequest {
    pub resource_type_filters: Vec<String>,
    /// Key-only filters; a resource must carry every key.
    pub tag_keys: Vec<String>,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub arn: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcesPage {
    pub mappings: Vec<ResourceMapping>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait TaggingApiClient: Send + Sync {
    async fn get_resources_page(
        &self,
        req: &ResourcesRequest,
        page_token: Option<&str>,
    ) -> ClientResult<ResourcesPage>;
}

// ── Account API ────────────────────────────────────────────────────

#[async_trait]
pub trait AccountClient: Send + Sync {
    async fn get_account(&self) -> ClientResult<String>;

    /// The account alias, or an empty string when none is set.
    async fn get_account_alias(&self) -> ClientResult<String>;
}

// ── Client cache ───────────────────────────────────────────────────

/// Source of per-(region, role) clients.
///
/// Credentials are loaded by `refresh` and dropped by `clear`; the scraper
/// calls each exactly once per scrape, bracketing it. Clients handed out
/// between the two calls are safe to use concurrently.
pub trait ClientCache: Send + Sync {
    fn refresh(&self);
    fn clear(&self);
    fn metrics_client(&self, region: &str, role: &Role) -> Arc<dyn MetricsApiClient>;
    fn tagging_client(&self, region: &str, role: &Role) -> Arc<dyn TaggingApiClient>;
    fn account_client(&self, region: &str, role: &Role) -> Arc<dyn AccountClient>;
}

mod epoch_secs {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        s.serialize_u64(secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

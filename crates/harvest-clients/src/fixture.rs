//! File-backed implementation of every capability interface.
//!
//! A fixture is a JSON document describing one account: its resources (with
//! tags) and its metric series (with the values the metrics API would return).
//! The daemon uses it for dry runs; tests use it to drive whole scrapes.
//!
//! ```json
//! {
//!   "account_id": "123456789012",
//!   "resources": [
//!     { "region": "us-east-1", "arn": "arn:aws:sqs:us-east-1:123456789012:orders",
//!       "tags": [{ "key": "env", "value": "prod" }] }
//!   ],
//!   "metrics": [
//!     { "region": "us-east-1", "namespace": "AWS/SQS",
//!       "name": "NumberOfMessagesSent",
//!       "dimensions": [{ "name": "QueueName", "value": "orders" }],
//!       "value": 42.0 }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use harvest_core::{Dimension, Metric, Role, Tag};

use crate::api::*;
use crate::error::{ClientError, ClientResult};

/// Series handed to `on_page` per ListMetrics page.
const LIST_METRICS_PAGE: usize = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub account_alias: String,
    #[serde(default)]
    pub resources: Vec<FixtureResource>,
    #[serde(default)]
    pub metrics: Vec<FixtureMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResource {
    pub region: String,
    pub arn: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureMetric {
    pub region: String,
    #[serde(flatten)]
    pub metric: Metric,
    /// Returned by GetMetricData for every statistic. Absent means no data.
    #[serde(default)]
    pub value: Option<f64>,
    /// Returned by GetMetricStatistics.
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
    #[serde(default = "default_true")]
    pub recently_active: bool,
}

fn default_true() -> bool {
    true
}

impl Fixture {
    pub fn from_file(path: &Path) -> ClientResult<Self> {
        let fail = |message: String| ClientError::Fixture {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| fail(e.to_string()))
    }

    fn find_metric(
        &self,
        region: &str,
        namespace: &str,
        name: &str,
        dimensions: &[Dimension],
    ) -> Option<&FixtureMetric> {
        self.metrics.iter().find(|m| {
            m.region == region
                && m.metric.namespace == namespace
                && m.metric.name == name
                && same_dimensions(&m.metric.dimensions, dimensions)
        })
    }
}

fn same_dimensions(a: &[Dimension], b: &[Dimension]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

/// Whether an ARN falls under a tagging resource type filter such as `ec2`,
/// `ec2:instance` or `elasticloadbalancing:loadbalancer/app`.
pub fn matches_type_filter(arn: &str, filter: &str) -> bool {
    let mut parts = arn.splitn(6, ':');
    let service = parts.nth(2).unwrap_or_default();
    let resource = parts.nth(2).unwrap_or_default();
    match filter.split_once(':') {
        Some((svc, resource_type)) => svc == service && resource.starts_with(resource_type),
        None => filter == service,
    }
}

// ── Client cache ───────────────────────────────────────────────────

/// A [`ClientCache`] serving clients over one shared [`Fixture`].
#[derive(Debug, Default)]
pub struct FixtureCache {
    fixture: Arc<Fixture>,
    latency: Option<Duration>,
    refreshes: AtomicUsize,
    clears: AtomicUsize,
}

impl FixtureCache {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture: Arc::new(fixture),
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> ClientResult<Self> {
        Ok(Self::new(Fixture::from_file(path)?))
    }

    /// Delay every API call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn client(&self, region: &str) -> Arc<FixtureClient> {
        Arc::new(FixtureClient {
            fixture: Arc::clone(&self.fixture),
            region: region.to_string(),
            latency: self.latency,
        })
    }
}

impl ClientCache for FixtureCache {
    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn metrics_client(&self, region: &str, role: &Role) -> Arc<dyn MetricsApiClient> {
        debug!(region, role = ?role.role_arn, "fixture metrics client");
        self.client(region)
    }

    fn tagging_client(&self, region: &str, _role: &Role) -> Arc<dyn TaggingApiClient> {
        self.client(region)
    }

    fn account_client(&self, region: &str, _role: &Role) -> Arc<dyn AccountClient> {
        self.client(region)
    }
}

// ── Clients ────────────────────────────────────────────────────────

struct FixtureClient {
    fixture: Arc<Fixture>,
    region: String,
    latency: Option<Duration>,
}

impl FixtureClient {
    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MetricsApiClient for FixtureClient {
    async fn list_metrics(
        &self,
        req: &ListMetricsRequest,
        on_page: &mut MetricsPageFn<'_>,
    ) -> ClientResult<()> {
        self.delay().await;
        let matching: Vec<Metric> = self
            .fixture
            .metrics
            .iter()
            .filter(|m| {
                m.region == self.region
                    && m.metric.namespace == req.namespace
                    && m.metric.name == req.metric_name
                    && (!req.recently_active_only || m.recently_active)
            })
            .map(|m| m.metric.clone())
            .collect();
        for page in matching.chunks(LIST_METRICS_PAGE) {
            on_page(page.to_vec());
        }
        Ok(())
    }

    async fn get_metric_data(
        &self,
        queries: &[MetricDataQuery],
        _start: SystemTime,
        end: SystemTime,
    ) -> ClientResult<Vec<MetricDataResult>> {
        self.delay().await;
        Ok(queries
            .iter()
            .map(|q| {
                let value = self
                    .fixture
                    .find_metric(
                        &self.region,
                        &q.metric.namespace,
                        &q.metric.name,
                        &q.metric.dimensions,
                    )
                    .and_then(|m| m.value);
                MetricDataResult {
                    id: q.id.clone(),
                    value,
                    timestamp: value.map(|_| end),
                }
            })
            .collect())
    }

    async fn get_metric_statistics(&self, req: &StatisticsRequest) -> ClientResult<Vec<Datapoint>> {
        self.delay().await;
        Ok(self
            .fixture
            .find_metric(&self.region, &req.namespace, &req.metric_name, &req.dimensions)
            .map(|m| m.datapoints.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl TaggingApiClient for FixtureClient {
    async fn get_resources_page(
        &self,
        req: &ResourcesRequest,
        page_token: Option<&str>,
    ) -> ClientResult<ResourcesPage> {
        self.delay().await;
        let offset = match page_token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| ClientError::api(ApiCall::GetResources, format!("bad page token {t:?}")))?,
            None => 0,
        };
        let matching: Vec<&FixtureResource> = self
            .fixture
            .resources
            .iter()
            .filter(|r| r.region == self.region)
            .filter(|r| {
                req.resource_type_filters.is_empty()
                    || req
                        .resource_type_filters
                        .iter()
                        .any(|f| matches_type_filter(&r.arn, f))
            })
            .filter(|r| {
                req.tag_keys
                    .iter()
                    .all(|k| r.tags.iter().any(|t| &t.key == k))
            })
            .collect();

        let page_size = req.page_size.max(1) as usize;
        let end = (offset + page_size).min(matching.len());
        let mappings = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|r| ResourceMapping {
                arn: r.arn.clone(),
                tags: r.tags.clone(),
            })
            .collect();
        let next_token = (end < matching.len()).then(|| end.to_string());
        Ok(ResourcesPage {
            mappings,
            next_token,
        })
    }
}

#[async_trait]
impl AccountClient for FixtureClient {
    async fn get_account(&self) -> ClientResult<String> {
        self.delay().await;
        Ok(self.fixture.account_id.clone())
    }

    async fn get_account_alias(&self) -> ClientResult<String> {
        Ok(self.fixture.account_alias.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture() -> Fixture {
        serde_json::from_str(
            r#"{
                "account_id": "123456789012",
                "account_alias": "prod",
                "resources": [
                    { "region": "us-east-1", "arn": "arn:aws:ec2:us-east-1:123456789012:instance/i-1",
                      "tags": [{ "key": "env", "value": "prod" }] },
                    { "region": "us-east-1", "arn": "arn:aws:ec2:us-east-1:123456789012:instance/i-2" },
                    { "region": "us-east-1", "arn": "arn:aws:ec2:us-east-1:123456789012:volume/vol-1" },
                    { "region": "eu-west-1", "arn": "arn:aws:ec2:eu-west-1:123456789012:instance/i-3" }
                ],
                "metrics": [
                    { "region": "us-east-1", "namespace": "AWS/EC2", "name": "CPUUtilization",
                      "dimensions": [{ "name": "InstanceId", "value": "i-1" }], "value": 12.5,
                      "datapoints": [{ "timestamp": 600, "average": 3.0 }] },
                    { "region": "us-east-1", "namespace": "AWS/EC2", "name": "CPUUtilization",
                      "dimensions": [{ "name": "InstanceId", "value": "i-2" }], "recently_active": false }
                ]
            }"#,
        )
        .unwrap()
    }

    fn request(filters: &[&str], keys: &[&str], page_size: u32) -> ResourcesRequest {
        ResourcesRequest {
            resource_type_filters: filters.iter().map(|s| s.to_string()).collect(),
            tag_keys: keys.iter().map(|s| s.to_string()).collect(),
            page_size,
        }
    }

    #[test]
    fn type_filters() {
        let alb = "arn:aws:elasticloadbalancing:us-east-1:1:loadbalancer/app/web/abc";
        assert!(matches_type_filter(alb, "elasticloadbalancing:loadbalancer/app"));
        assert!(!matches_type_filter(alb, "elasticloadbalancing:targetgroup"));
        assert!(matches_type_filter("arn:aws:apigateway:us-east-1::/restapis/x", "apigateway"));
        assert!(!matches_type_filter("arn:aws:sqs:us-east-1:1:q", "sns"));
    }

    #[tokio::test]
    async fn resources_are_paged_and_filtered() {
        let cache = FixtureCache::new(fixture());
        let client = cache.tagging_client("us-east-1", &Role::default());

        let first = client
            .get_resources_page(&request(&["ec2:instance"], &[], 1), None)
            .await
            .unwrap();
        assert_eq!(first.mappings.len(), 1);
        let token = first.next_token.unwrap();
        let second = client
            .get_resources_page(&request(&["ec2:instance"], &[], 1), Some(&token))
            .await
            .unwrap();
        assert_eq!(second.mappings[0].arn, "arn:aws:ec2:us-east-1:123456789012:instance/i-2");
        assert!(second.next_token.is_none());

        let tagged = client
            .get_resources_page(&request(&["ec2"], &["env"], 100), None)
            .await
            .unwrap();
        assert_eq!(tagged.mappings.len(), 1);
    }

    #[tokio::test]
    async fn metrics_are_listed_and_fetched_per_region() {
        let cache = FixtureCache::new(fixture());
        let client = cache.metrics_client("us-east-1", &Role::default());

        let mut listed = Vec::new();
        let req = ListMetricsRequest {
            namespace: "AWS/EC2".to_string(),
            metric_name: "CPUUtilization".to_string(),
            recently_active_only: true,
        };
        client
            .list_metrics(&req, &mut |page| listed.extend(page))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let query = MetricDataQuery {
            id: "q0".to_string(),
            metric: listed[0].clone(),
            statistic: "Average".to_string(),
            period: Duration::from_secs(300),
        };
        let results = client
            .get_metric_data(&[query], SystemTime::UNIX_EPOCH, SystemTime::UNIX_EPOCH)
            .await
            .unwrap();
        assert_eq!(results[0].value, Some(12.5));

        let other = cache.metrics_client("eu-west-1", &Role::default());
        let mut none = Vec::new();
        other
            .list_metrics(&req, &mut |page| none.extend(page))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn statistics_and_account() {
        let cache = FixtureCache::new(fixture());
        let metrics = cache.metrics_client("us-east-1", &Role::default());
        let datapoints = metrics
            .get_metric_statistics(&StatisticsRequest {
                namespace: "AWS/EC2".to_string(),
                metric_name: "CPUUtilization".to_string(),
                dimensions: vec![Dimension::new("InstanceId", "i-1")],
                statistics: vec!["Average".to_string()],
                period: Duration::from_secs(300),
                start: SystemTime::UNIX_EPOCH,
                end: SystemTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        assert_eq!(datapoints[0].average, Some(3.0));

        let account = cache.account_client("us-east-1", &Role::default());
        assert_eq!(account.get_account().await.unwrap(), "123456789012");
        assert_eq!(account.get_account_alias().await.unwrap(), "prod");
    }

    #[test]
    fn counts_refresh_and_clear() {
        let cache = FixtureCache::new(Fixture::default());
        cache.refresh();
        cache.clear();
        cache.clear();
        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(cache.clear_count(), 2);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "account_id": "42" }}"#).unwrap();
        let fixture = Fixture::from_file(file.path()).unwrap();
        assert_eq!(fixture.account_id, "42");

        let missing = Fixture::from_file(Path::new("/nonexistent/fixture.json"));
        assert!(matches!(missing, Err(ClientError::Fixture { .. })));
    }
}

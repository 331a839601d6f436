//! Running one discovery or custom-namespace job.
//!
//! Listing appends one pending request per (series, statistic) to a shared
//! buffer. Batches are then cut out of the buffer, each holding requests with
//! the same retrieval window, and fetched concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use harvest_clients::{ListMetricsRequest, MetricDataQuery, MetricsApiClient, cancellable};
use harvest_core::{CollectedDatum, GLOBAL_RESOURCE, Metric, MetricConfig, Tag};

use crate::associator::Associator;
use crate::compact::compact;
use crate::error::{JobError, JobResult};
use crate::job::{Job, ResourceEnrichment};
use crate::window::{Clock, MetricWindowCalculator, SystemClock};

/// Largest GetMetricData batch the API accepts.
pub const DEFAULT_METRICS_PER_QUERY: usize = 500;

type WindowKey = (Duration, Duration, Duration);

/// One statistic of one series, waiting to be fetched.
#[derive(Debug, Clone)]
struct DataRequest {
    metric: Metric,
    statistic: String,
    period: Duration,
    length: Duration,
    delay: Duration,
    nil_to_zero: bool,
    resource_name: String,
    tags: Vec<Tag>,
}

impl DataRequest {
    fn window_key(&self) -> WindowKey {
        (self.period, self.length, self.delay)
    }
}

enum Attribution<'r> {
    Associate(Associator<'r>),
    Named(&'r str),
}

impl Attribution<'_> {
    /// Resource name and tags for a series, or `None` to drop it.
    fn attribute(&self, metric: &Metric) -> Option<(String, Vec<Tag>)> {
        match self {
            Attribution::Named(name) => Some((name.to_string(), Vec::new())),
            Attribution::Associate(associator) => match associator.associate(metric) {
                (Some(resource), _) => Some((resource.arn.clone(), resource.tags.clone())),
                (None, true) => Some((GLOBAL_RESOURCE.to_string(), Vec::new())),
                // Describes a resource the search tags filtered out.
                (None, false) => None,
            },
        }
    }
}

pub struct JobRunner<C = SystemClock> {
    client: Arc<dyn MetricsApiClient>,
    window: MetricWindowCalculator<C>,
    metrics_per_query: usize,
}

impl JobRunner<SystemClock> {
    pub fn new(client: Arc<dyn MetricsApiClient>, metrics_per_query: usize) -> Self {
        Self::with_clock(client, metrics_per_query, SystemClock)
    }
}

impl<C: Clock> JobRunner<C> {
    pub fn with_clock(client: Arc<dyn MetricsApiClient>, metrics_per_query: usize, clock: C) -> Self {
        Self {
            client,
            window: MetricWindowCalculator::new(clock),
            metrics_per_query: metrics_per_query.max(1),
        }
    }

    pub async fn run(&self, token: &CancellationToken, job: &Job<'_>) -> JobResult<Vec<CollectedDatum>> {
        let attribution = match job.resource_enrichment() {
            ResourceEnrichment::Inventory(resources) => {
                Attribution::Associate(Associator::new(job.namespace(), resources))
            }
            ResourceEnrichment::Named(name) => Attribution::Named(name),
        };

        let pending: Mutex<Vec<Option<DataRequest>>> = Mutex::new(Vec::new());
        let listings = job
            .metrics()
            .iter()
            .map(|cfg| self.list_requests(token, job, cfg, &attribution, &pending));
        for result in join_all(listings).await {
            match result {
                Ok(()) => {}
                Err(JobError::Cancelled) => return Err(JobError::Cancelled),
                Err(e) => warn!(namespace = %job.namespace(), error = %e, "listing metrics failed"),
            }
        }

        let mut batches = Vec::new();
        loop {
            if token.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let batch = next_batch(&mut *pending.lock().await, self.metrics_per_query);
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }
        debug!(namespace = %job.namespace(), batches = batches.len(), "fetching metric data");

        let fetches = batches
            .into_iter()
            .map(|batch| self.fetch_batch(token, batch));
        let mut data = Vec::new();
        for result in join_all(fetches).await {
            match result {
                Ok(datums) => data.extend(datums),
                Err(JobError::Cancelled) => return Err(JobError::Cancelled),
                Err(e) => warn!(namespace = %job.namespace(), error = %e, "dropping batch after fetch error"),
            }
        }
        Ok(data)
    }

    async fn list_requests(
        &self,
        token: &CancellationToken,
        job: &Job<'_>,
        cfg: &MetricConfig,
        attribution: &Attribution<'_>,
        pending: &Mutex<Vec<Option<DataRequest>>>,
    ) -> JobResult<()> {
        let params = job.list_metrics_params();
        let req = ListMetricsRequest {
            namespace: job.namespace().to_string(),
            metric_name: cfg.name.clone(),
            recently_active_only: params.recently_active_only,
        };

        let mut listed = Vec::new();
        cancellable(token, self.client.list_metrics(&req, &mut |page| listed.extend(page))).await?;

        let mut requests = Vec::new();
        let mut dropped = 0usize;
        for metric in listed.into_iter().filter(|m| params.accepts(m)) {
            let Some((resource_name, tags)) = attribution.attribute(&metric) else {
                dropped += 1;
                continue;
            };
            for statistic in &cfg.statistics {
                requests.push(Some(DataRequest {
                    metric: metric.clone(),
                    statistic: statistic.clone(),
                    period: cfg.period,
                    length: cfg.length,
                    delay: cfg.delay,
                    nil_to_zero: cfg.nil_to_zero,
                    resource_name: resource_name.clone(),
                    tags: tags.clone(),
                }));
            }
        }
        debug!(
            namespace = %job.namespace(),
            metric = %cfg.name,
            requests = requests.len(),
            dropped,
            "metrics listed"
        );
        pending.lock().await.extend(requests);
        Ok(())
    }

    async fn fetch_batch(
        &self,
        token: &CancellationToken,
        batch: Vec<DataRequest>,
    ) -> JobResult<Vec<CollectedDatum>> {
        let Some(first) = batch.first() else {
            return Ok(Vec::new());
        };
        let (start, end) = self.window.calculate(first.period, first.length, first.delay);

        let queries: Vec<MetricDataQuery> = batch
            .iter()
            .enumerate()
            .map(|(i, r)| MetricDataQuery {
                id: query_id(i),
                metric: r.metric.clone(),
                statistic: r.statistic.clone(),
                period: r.period,
            })
            .collect();
        let results = cancellable(token, self.client.get_metric_data(&queries, start, end)).await?;
        let mut by_id: HashMap<String, _> = results.into_iter().map(|r| (r.id.clone(), r)).collect();

        Ok(batch
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let result = by_id.remove(&query_id(i));
                CollectedDatum {
                    metric_name: r.metric.name,
                    namespace: r.metric.namespace,
                    dimensions: r.metric.dimensions,
                    resource_name: r.resource_name,
                    statistic: r.statistic,
                    value: result.as_ref().and_then(|x| x.value),
                    timestamp: result.and_then(|x| x.timestamp),
                    tags: r.tags,
                    nil_to_zero: r.nil_to_zero,
                }
            })
            .collect())
    }
}

fn query_id(i: usize) -> String {
    format!("id_{i}")
}

/// Take up to `max` requests sharing the window of the first pending one,
/// then compact the buffer.
fn next_batch(pending: &mut Vec<Option<DataRequest>>, max: usize) -> Vec<DataRequest> {
    let Some(key) = pending.iter().flatten().next().map(DataRequest::window_key) else {
        pending.clear();
        return Vec::new();
    };
    let mut batch = Vec::new();
    for slot in pending.iter_mut() {
        if batch.len() == max {
            break;
        }
        if slot.as_ref().is_some_and(|r| r.window_key() == key) {
            batch.extend(slot.take());
        }
    }
    compact(pending, |_| true);
    batch
}

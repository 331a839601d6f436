//! Static jobs: fixed dimensions, one GetMetricStatistics call per metric.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use harvest_clients::{MetricsApiClient, StatisticsRequest, cancellable};
use harvest_core::{CollectedDatum, MetricConfig, StaticJob};

use crate::error::{JobError, JobResult};
use crate::window::{Clock, MetricWindowCalculator};

pub async fn run_static_job<C: Clock>(
    token: &CancellationToken,
    client: &Arc<dyn MetricsApiClient>,
    window: &MetricWindowCalculator<C>,
    job: &StaticJob,
) -> JobResult<Vec<CollectedDatum>> {
    let fetches = job
        .metrics
        .iter()
        .map(|metric| fetch_metric(token, client, window, job, metric));

    let mut data = Vec::new();
    for result in join_all(fetches).await {
        match result {
            Ok(datums) => data.extend(datums),
            Err(JobError::Cancelled) => return Err(JobError::Cancelled),
            Err(e) => warn!(job = %job.name, error = %e, "static metric fetch failed"),
        }
    }
    Ok(data)
}

async fn fetch_metric<C: Clock>(
    token: &CancellationToken,
    client: &Arc<dyn MetricsApiClient>,
    window: &MetricWindowCalculator<C>,
    job: &StaticJob,
    metric: &MetricConfig,
) -> JobResult<Vec<CollectedDatum>> {
    let (start, end) = window.calculate(metric.period, metric.length, metric.delay);
    let req = StatisticsRequest {
        namespace: job.namespace.clone(),
        metric_name: metric.name.clone(),
        dimensions: job.dimensions.clone(),
        statistics: metric.statistics.clone(),
        period: metric.period,
        start,
        end,
    };
    let datapoints = cancellable(token, client.get_metric_statistics(&req)).await?;

    let Some(latest) = datapoints.iter().max_by_key(|dp| dp.timestamp) else {
        debug!(job = %job.name, metric = %metric.name, "no datapoints returned");
        return Ok(Vec::new());
    };

    Ok(metric
        .statistics
        .iter()
        .map(|statistic| CollectedDatum {
            metric_name: metric.name.clone(),
            namespace: job.namespace.clone(),
            dimensions: job.dimensions.clone(),
            resource_name: job.name.clone(),
            statistic: statistic.clone(),
            value: latest.statistic(statistic),
            timestamp: Some(latest.timestamp),
            tags: Vec::new(),
            nil_to_zero: metric.nil_to_zero,
        })
        .collect())
}

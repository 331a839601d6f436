//! Concurrency limits for metrics API calls.
//!
//! Two mutually exclusive strategies: one semaphore shared by every call
//! family, or one semaphore per family. Enabling per-family limits disables
//! the single limit. Tagging calls are limited separately by the discoverer.

use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::api::*;
use crate::error::{ClientError, ClientResult};

pub const DEFAULT_SINGLE_LIMIT: usize = 5;
pub const DEFAULT_PER_API_LIMIT: usize = 5;

/// Operator-facing concurrency settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    pub single_limit: usize,
    pub per_api_limit_enabled: bool,
    pub list_metrics: usize,
    pub get_metric_data: usize,
    pub get_metric_statistics: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            single_limit: DEFAULT_SINGLE_LIMIT,
            per_api_limit_enabled: false,
            list_metrics: DEFAULT_PER_API_LIMIT,
            get_metric_data: DEFAULT_PER_API_LIMIT,
            get_metric_statistics: DEFAULT_PER_API_LIMIT,
        }
    }
}

impl ConcurrencyConfig {
    pub fn policy(&self) -> ConcurrencyPolicy {
        if self.per_api_limit_enabled {
            ConcurrencyPolicy::per_api(
                self.list_metrics,
                self.get_metric_data,
                self.get_metric_statistics,
            )
        } else {
            ConcurrencyPolicy::single(self.single_limit)
        }
    }
}

/// The active limiting strategy. Cloning shares the underlying semaphores.
#[derive(Debug, Clone)]
pub enum ConcurrencyPolicy {
    Single(Arc<Semaphore>),
    PerApi {
        list_metrics: Arc<Semaphore>,
        get_metric_data: Arc<Semaphore>,
        get_metric_statistics: Arc<Semaphore>,
    },
}

impl ConcurrencyPolicy {
    pub fn single(limit: usize) -> Self {
        Self::Single(Arc::new(Semaphore::new(limit.max(1))))
    }

    pub fn per_api(list_metrics: usize, get_metric_data: usize, get_metric_statistics: usize) -> Self {
        Self::PerApi {
            list_metrics: Arc::new(Semaphore::new(list_metrics.max(1))),
            get_metric_data: Arc::new(Semaphore::new(get_metric_data.max(1))),
            get_metric_statistics: Arc::new(Semaphore::new(get_metric_statistics.max(1))),
        }
    }

    fn semaphore(&self, api: ApiCall) -> &Arc<Semaphore> {
        match self {
            Self::Single(s) => s,
            Self::PerApi {
                list_metrics,
                get_metric_data,
                get_metric_statistics,
            } => match api {
                ApiCall::ListMetrics => list_metrics,
                ApiCall::GetMetricStatistics => get_metric_statistics,
                _ => get_metric_data,
            },
        }
    }

    /// Wait for a permit for one call of the given family.
    pub async fn acquire(&self, api: ApiCall) -> ClientResult<OwnedSemaphorePermit> {
        Arc::clone(self.semaphore(api))
            .acquire_owned()
            .await
            .map_err(|_| ClientError::Cancelled)
    }
}

/// Race a client call against cancellation. An already cancelled token wins.
pub async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ClientError::Cancelled),
        res = fut => res,
    }
}

/// Metrics client wrapper that holds a policy permit for the duration of
/// every call and counts requests.
pub struct LimitedMetricsClient {
    inner: Arc<dyn MetricsApiClient>,
    policy: ConcurrencyPolicy,
    counters: Arc<ApiCounters>,
}

impl LimitedMetricsClient {
    pub fn new(
        inner: Arc<dyn MetricsApiClient>,
        policy: ConcurrencyPolicy,
        counters: Arc<ApiCounters>,
    ) -> Self {
        Self {
            inner,
            policy,
            counters,
        }
    }
}

#[async_trait]
impl MetricsApiClient for LimitedMetricsClient {
    async fn list_metrics(
        &self,
        req: &ListMetricsRequest,
        on_page: &mut MetricsPageFn<'_>,
    ) -> ClientResult<()> {
        let _permit = self.policy.acquire(ApiCall::ListMetrics).await?;
        self.counters.inc(ApiCall::ListMetrics);
        trace!(namespace = %req.namespace, metric = %req.metric_name, "list_metrics");
        self.inner.list_metrics(req, on_page).await
    }

    async fn get_metric_data(
        &self,
        queries: &[MetricDataQuery],
        start: SystemTime,
        end: SystemTime,
    ) -> ClientResult<Vec<MetricDataResult>> {
        let _permit = self.policy.acquire(ApiCall::GetMetricData).await?;
        self.counters.inc(ApiCall::GetMetricData);
        trace!(queries = queries.len(), "get_metric_data");
        self.inner.get_metric_data(queries, start, end).await
    }

    async fn get_metric_statistics(&self, req: &StatisticsRequest) -> ClientResult<Vec<Datapoint>> {
        let _permit = self.policy.acquire(ApiCall::GetMetricStatistics).await?;
        self.counters.inc(ApiCall::GetMetricStatistics);
        trace!(namespace = %req.namespace, metric = %req.metric_name, "get_metric_statistics");
        self.inner.get_metric_statistics(req).await
    }
}

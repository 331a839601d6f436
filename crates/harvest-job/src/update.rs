//! Fan-out of every configured job over its regions and roles.
//!
//! Each (job, region, role) triple runs independently. A failing run is
//! logged and contributes nothing; only cancellation aborts the whole update.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use harvest_clients::{
    ApiCall, ApiCounters, ClientCache, ConcurrencyConfig, ConcurrencyPolicy, LimitedMetricsClient,
    MetricsApiClient, cancellable,
};
use harvest_core::{
    CustomNamespaceJob, DiscoveryJob, JobsConfig, MetricResult, ResourceResult, Role, ScrapeContext,
    ScrapeResult, StaticJob, Tag,
};

use crate::discovery::{Discoverer, HookRegistry};
use crate::error::{JobError, JobResult};
use crate::job::Job;
use crate::runner::{DEFAULT_METRICS_PER_QUERY, JobRunner};
use crate::static_job::run_static_job;
use crate::window::{Clock, MetricWindowCalculator, SystemClock};

pub const DEFAULT_TAG_CONCURRENCY: usize = 5;

#[derive(Clone)]
pub struct UpdateOptions {
    pub metrics_per_query: usize,
    pub tag_concurrency: usize,
    pub concurrency: ConcurrencyConfig,
    pub hooks: Arc<HookRegistry>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            metrics_per_query: DEFAULT_METRICS_PER_QUERY,
            tag_concurrency: DEFAULT_TAG_CONCURRENCY,
            concurrency: ConcurrencyConfig::default(),
            hooks: Arc::default(),
        }
    }
}

/// What one (job, region, role) run produced.
#[derive(Default)]
struct RunOutput {
    metrics: Option<MetricResult>,
    resources: Option<ResourceResult>,
}

/// Per-scrape shared state.
struct ScrapeScope<'s> {
    token: &'s CancellationToken,
    cache: &'s dyn ClientCache,
    policy: ConcurrencyPolicy,
    tag_semaphore: Arc<Semaphore>,
    counters: Arc<ApiCounters>,
}

impl ScrapeScope<'_> {
    fn metrics_client(&self, region: &str, role: &Role) -> Arc<dyn MetricsApiClient> {
        Arc::new(LimitedMetricsClient::new(
            self.cache.metrics_client(region, role),
            self.policy.clone(),
            Arc::clone(&self.counters),
        ))
    }

    /// Resolve the account the run's credentials belong to.
    async fn context(&self, region: &str, role: &Role, custom_tags: &[Tag]) -> JobResult<ScrapeContext> {
        let account = self.cache.account_client(region, role);
        self.counters.inc(ApiCall::GetAccount);
        let account_id = cancellable(self.token, account.get_account()).await?;
        self.counters.inc(ApiCall::GetAccountAlias);
        let account_alias = match cancellable(self.token, account.get_account_alias()).await {
            Ok(alias) => alias,
            Err(e) => {
                warn!(region, error = %e, "couldn't get account alias");
                String::new()
            }
        };
        Ok(ScrapeContext {
            region: region.to_string(),
            account_id,
            account_alias,
            custom_tags: custom_tags.to_vec(),
        })
    }
}

pub struct Updater<C = SystemClock> {
    options: UpdateOptions,
    clock: C,
}

impl Updater<SystemClock> {
    pub fn new(options: UpdateOptions) -> Self {
        Self::with_clock(options, SystemClock)
    }
}

impl<C: Clock + Clone> Updater<C> {
    pub fn with_clock(options: UpdateOptions, clock: C) -> Self {
        Self { options, clock }
    }

    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Run every job once. Returns [`JobError::Cancelled`] if the token
    /// fires; partial results are discarded.
    pub async fn update(
        &self,
        token: &CancellationToken,
        jobs: &JobsConfig,
        cache: &dyn ClientCache,
    ) -> JobResult<ScrapeResult> {
        let scope = ScrapeScope {
            token,
            cache,
            policy: self.options.concurrency.policy(),
            tag_semaphore: Arc::new(Semaphore::new(self.options.tag_concurrency.max(1))),
            counters: ApiCounters::new(),
        };

        let mut runs: Vec<BoxFuture<'_, JobResult<RunOutput>>> = Vec::new();
        for job in &jobs.discovery {
            for region in &job.regions {
                for role in &job.roles {
                    runs.push(self.run_discovery(&scope, job, region, role).boxed());
                }
            }
        }
        for job in &jobs.statics {
            for region in &job.regions {
                for role in &job.roles {
                    runs.push(self.run_static(&scope, job, region, role).boxed());
                }
            }
        }
        for job in &jobs.custom_namespace {
            for region in &job.regions {
                for role in &job.roles {
                    runs.push(self.run_custom(&scope, job, region, role).boxed());
                }
            }
        }
        debug!(runs = runs.len(), "starting job runs");

        let mut result = ScrapeResult::default();
        for output in join_all(runs).await {
            let output = output?;
            result.metrics.extend(output.metrics);
            result.resources.extend(output.resources);
        }
        result.api_requests = scope.counters.snapshot();

        info!(
            datums = result.datum_count(),
            resource_sets = result.resources.len(),
            "jobs finished"
        );
        Ok(result)
    }

    async fn run_discovery(
        &self,
        scope: &ScrapeScope<'_>,
        job: &DiscoveryJob,
        region: &str,
        role: &Role,
    ) -> JobResult<RunOutput> {
        let context = match scope.context(region, role, &job.custom_tags).await {
            Ok(ctx) => ctx,
            Err(e) => return skip_run(&job.namespace, region, e),
        };

        let discoverer = Discoverer::new(
            scope.cache.tagging_client(region, role),
            Arc::clone(&scope.tag_semaphore),
            Arc::clone(&scope.counters),
        )
        .with_hooks(Arc::clone(&self.options.hooks));
        let resources = match discoverer.discover(scope.token, job, region).await {
            Ok(resources) => resources,
            Err(e) => return skip_run(&job.namespace, region, e.into()),
        };

        let runner = JobRunner::with_clock(
            scope.metrics_client(region, role),
            self.options.metrics_per_query,
            self.clock.clone(),
        );
        let run = Job::Discovery {
            job,
            resources: &resources,
        };
        let data = match runner.run(scope.token, &run).await {
            Ok(data) => data,
            Err(e) => return skip_run(&job.namespace, region, e),
        };

        Ok(RunOutput {
            metrics: Some(MetricResult {
                context: context.clone(),
                data,
            }),
            resources: Some(ResourceResult {
                context,
                namespace: job.namespace.clone(),
                resources,
            }),
        })
    }

    async fn run_static(
        &self,
        scope: &ScrapeScope<'_>,
        job: &StaticJob,
        region: &str,
        role: &Role,
    ) -> JobResult<RunOutput> {
        let context = match scope.context(region, role, &job.custom_tags).await {
            Ok(ctx) => ctx,
            Err(e) => return skip_run(&job.name, region, e),
        };
        let client = scope.metrics_client(region, role);
        let window = MetricWindowCalculator::new(self.clock.clone());
        match run_static_job(scope.token, &client, &window, job).await {
            Ok(data) => Ok(RunOutput {
                metrics: Some(MetricResult { context, data }),
                resources: None,
            }),
            Err(e) => skip_run(&job.name, region, e),
        }
    }

    async fn run_custom(
        &self,
        scope: &ScrapeScope<'_>,
        job: &CustomNamespaceJob,
        region: &str,
        role: &Role,
    ) -> JobResult<RunOutput> {
        let run = Job::CustomNamespace(job);
        let context = match scope.context(region, role, run.custom_tags()).await {
            Ok(ctx) => ctx,
            Err(e) => return skip_run(&job.name, region, e),
        };
        let runner = JobRunner::with_clock(
            scope.metrics_client(region, role),
            self.options.metrics_per_query,
            self.clock.clone(),
        );
        match runner.run(scope.token, &run).await {
            Ok(data) => Ok(RunOutput {
                metrics: Some(MetricResult { context, data }),
                resources: None,
            }),
            Err(e) => skip_run(&job.name, region, e),
        }
    }
}

/// Swallow a run failure unless it is a cancellation.
fn skip_run(job: &str, region: &str, e: JobError) -> JobResult<RunOutput> {
    if e.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    error!(job, region, error = %e, "job run failed, skipping");
    Ok(RunOutput::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use harvest_clients::{Fixture, FixtureCache};
    use harvest_core::{GLOBAL_RESOURCE, JobsFile};

    const JOBS: &str = r#"
[[discovery]]
namespace = "sqs"
regions = ["us-east-1", "eu-west-1"]
statistics = ["Sum"]
custom_tags = [{ key = "team", value = "payments" }]
search_tags = [{ key = "env", value = "^prod$" }]

[[discovery.metrics]]
name = "NumberOfMessagesSent"

[[static]]
name = "orders-queue"
namespace = "AWS/SQS"
regions = ["us-east-1"]
dimensions = [{ name = "QueueName", value = "orders" }]

[[static.metrics]]
name = "ApproximateAgeOfOldestMessage"
statistics = ["Maximum"]

[[custom_namespace]]
name = "orders-app"
namespace = "Orders/App"
regions = ["us-east-1"]

[[custom_namespace.metrics]]
name = "Placed"
statistics = ["Sum"]
"#;

    const FIXTURE: &str = r#"{
        "account_id": "123456789012",
        "account_alias": "prod-account",
        "resources": [
            { "region": "us-east-1", "arn": "arn:aws:sqs:us-east-1:123456789012:orders",
              "tags": [{ "key": "env", "value": "prod" }] },
            { "region": "us-east-1", "arn": "arn:aws:sqs:us-east-1:123456789012:scratch",
              "tags": [{ "key": "env", "value": "dev" }] }
        ],
        "metrics": [
            { "region": "us-east-1", "namespace": "AWS/SQS", "name": "NumberOfMessagesSent",
              "dimensions": [{ "name": "QueueName", "value": "orders" }], "value": 10.0 },
            { "region": "us-east-1", "namespace": "AWS/SQS", "name": "NumberOfMessagesSent",
              "dimensions": [{ "name": "QueueName", "value": "scratch" }], "value": 3.0 },
            { "region": "us-east-1", "namespace": "AWS/SQS", "name": "ApproximateAgeOfOldestMessage",
              "dimensions": [{ "name": "QueueName", "value": "orders" }],
              "datapoints": [{ "timestamp": 1704110400, "maximum": 30.0 }] },
            { "region": "us-east-1", "namespace": "Orders/App", "name": "Placed",
              "dimensions": [{ "name": "Shop", "value": "eu" }], "value": 5.0 }
        ]
    }"#;

    fn setup() -> (JobsConfig, FixtureCache) {
        let jobs = JobsFile::parse(JOBS).unwrap().validate().unwrap();
        let fixture: Fixture = serde_json::from_str(FIXTURE).unwrap();
        (jobs, FixtureCache::new(fixture))
    }

    #[tokio::test]
    async fn runs_every_job_region_and_role() {
        let (jobs, cache) = setup();
        let updater = Updater::new(UpdateOptions::default());
        let result = updater
            .update(&CancellationToken::new(), &jobs, &cache)
            .await
            .unwrap();

        // eu-west-1 discovers nothing and is skipped; the other runs succeed.
        assert_eq!(result.metrics.len(), 3);
        assert_eq!(result.resources.len(), 1);
        assert_eq!(result.datum_count(), 3);

        let discovered = &result.resources[0];
        assert_eq!(discovered.namespace, "AWS/SQS");
        assert_eq!(discovered.resources.len(), 1);
        assert_eq!(discovered.context.account_id, "123456789012");
        assert_eq!(discovered.context.account_alias, "prod-account");

        let all: Vec<_> = result.metrics.iter().flat_map(|m| &m.data).collect();
        let sent = all
            .iter()
            .find(|d| d.metric_name == "NumberOfMessagesSent")
            .unwrap();
        assert_eq!(sent.resource_name, "arn:aws:sqs:us-east-1:123456789012:orders");
        assert_eq!(sent.value, Some(10.0));
        assert!(all.iter().all(|d| d.resource_name != GLOBAL_RESOURCE));
        assert!(all.iter().any(|d| d.resource_name == "orders-queue" && d.value == Some(30.0)));
        assert!(all.iter().any(|d| d.resource_name == "orders-app" && d.value == Some(5.0)));

        let count = |api: &str| {
            result
                .api_requests
                .iter()
                .find(|(name, _)| name == api)
                .map(|(_, n)| *n)
                .unwrap()
        };
        assert_eq!(count("get_account"), 4);
        assert_eq!(count("get_account_alias"), 4);
        assert_eq!(count("get_resources"), 2);
        assert_eq!(count("list_metrics"), 2);
        assert_eq!(count("get_metric_statistics"), 1);
    }

    #[tokio::test]
    async fn cancellation_discards_everything() {
        let (jobs, cache) = setup();
        let cache = cache.with_latency(Duration::from_millis(50));
        let token = CancellationToken::new();
        let updater = Updater::new(UpdateOptions::default());

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let res = updater.update(&token, &jobs, &cache).await;
        assert!(matches!(res, Err(JobError::Cancelled)));
    }
}

//! Resource discovery through the tagging API.
//!
//! Search tag keys are sent as remote filters; values are regexes applied
//! locally. Paging stops when the backend returns no token or repeats one.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use harvest_clients::{
    ApiCall, ApiCounters, ClientError, RESOURCES_PER_PAGE, ResourcesRequest, TaggingApiClient,
    cancellable,
};
use harvest_core::{DiscoveryJob, Resource, services};

use crate::error::{DiscoveryError, DiscoveryResult};

/// Error type returned by hooks; surfaced as [`DiscoveryError::Hook`].
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Custom enumeration for namespaces the tagging API cannot fully list.
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    async fn enumerate(
        &self,
        token: &CancellationToken,
        job: &DiscoveryJob,
        region: &str,
    ) -> Result<Vec<Resource>, HookError>;
}

/// Post-filter over everything discovered for a namespace.
#[async_trait]
pub trait ResourceFilter: Send + Sync {
    async fn filter(
        &self,
        token: &CancellationToken,
        job: &DiscoveryJob,
        region: &str,
        resources: Vec<Resource>,
    ) -> Result<Vec<Resource>, HookError>;
}

/// Extension points for one namespace.
#[derive(Clone, Default)]
pub struct ServiceHooks {
    pub resource_fn: Option<Arc<dyn ResourceEnumerator>>,
    pub filter_fn: Option<Arc<dyn ResourceFilter>>,
}

/// Hooks keyed by canonical namespace.
pub type HookRegistry = HashMap<String, ServiceHooks>;

pub struct Discoverer {
    tagging: Arc<dyn TaggingApiClient>,
    semaphore: Arc<Semaphore>,
    counters: Arc<ApiCounters>,
    hooks: Arc<HookRegistry>,
}

impl Discoverer {
    /// `semaphore` bounds concurrent tagging calls across the whole scrape.
    pub fn new(
        tagging: Arc<dyn TaggingApiClient>,
        semaphore: Arc<Semaphore>,
        counters: Arc<ApiCounters>,
    ) -> Self {
        Self {
            tagging,
            semaphore,
            counters,
            hooks: Arc::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub async fn discover(
        &self,
        token: &CancellationToken,
        job: &DiscoveryJob,
        region: &str,
    ) -> DiscoveryResult<Vec<Resource>> {
        let svc = services::service(&job.namespace)
            .ok_or_else(|| DiscoveryError::UnknownNamespace(job.namespace.clone()))?;
        let hooks = self.hooks.get(svc.namespace).cloned().unwrap_or_default();
        let expect_resources = !svc.resource_filters.is_empty() || hooks.resource_fn.is_some();

        let mut resources = Vec::new();
        if !svc.resource_filters.is_empty() {
            let req = ResourcesRequest {
                resource_type_filters: svc.resource_filters.iter().map(|f| f.to_string()).collect(),
                tag_keys: job.search_tags.iter().map(|t| t.key.clone()).collect(),
                page_size: RESOURCES_PER_PAGE,
            };
            self.page_through(token, job, region, &req, &mut resources).await?;
        }

        if let Some(enumerate) = &hooks.resource_fn {
            let extra = self
                .run_hook(token, job, enumerate.enumerate(token, job, region))
                .await?;
            debug!(namespace = %job.namespace, region, count = extra.len(), "resource hook returned");
            resources.extend(extra);
        }

        if let Some(filter) = &hooks.filter_fn {
            resources = self
                .run_hook(token, job, filter.filter(token, job, region, resources))
                .await?;
        }

        if expect_resources && resources.is_empty() {
            return Err(DiscoveryError::ExpectedResources {
                namespace: job.namespace.clone(),
                region: region.to_string(),
            });
        }

        debug!(namespace = %job.namespace, region, total = resources.len(), "resources discovered");
        Ok(resources)
    }

    async fn page_through(
        &self,
        token: &CancellationToken,
        job: &DiscoveryJob,
        region: &str,
        req: &ResourcesRequest,
        out: &mut Vec<Resource>,
    ) -> DiscoveryResult<()> {
        let mut next: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let page = {
                let _permit = self.permit().await?;
                self.counters.inc(ApiCall::GetResources);
                cancellable(token, self.tagging.get_resources_page(req, next.as_deref())).await?
            };

            for mapping in page.mappings {
                let resource = Resource {
                    arn: mapping.arn,
                    namespace: job.namespace.clone(),
                    region: region.to_string(),
                    tags: mapping.tags,
                };
                if resource.matches_search_tags(&job.search_tags) {
                    out.push(resource);
                } else {
                    debug!(arn = %resource.arn, "skipping resource, search tags do not match");
                }
            }

            match page.next_token {
                Some(t) if seen.insert(t.clone()) => next = Some(t),
                Some(t) => {
                    warn!(namespace = %job.namespace, region, token = %t, "tagging api repeated a page token, stopping");
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    /// Run a hook under a tagging permit, racing both against `token`.
    async fn run_hook<T>(
        &self,
        token: &CancellationToken,
        job: &DiscoveryJob,
        hook: impl Future<Output = Result<T, HookError>>,
    ) -> DiscoveryResult<T> {
        let call = async {
            let _permit = self.permit().await?;
            hook.await.map_err(|e| DiscoveryError::Hook {
                namespace: job.namespace.clone(),
                message: e.to_string(),
            })
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DiscoveryError::Client(ClientError::Cancelled)),
            res = call => res,
        }
    }

    async fn permit(&self) -> DiscoveryResult<tokio::sync::SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| DiscoveryError::Client(ClientError::Cancelled))
    }
}

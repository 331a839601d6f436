//! Runtime job variants.
//!
//! Discovery and custom-namespace jobs share one run path; they differ only
//! in how listed metrics are attributed to resources.

use harvest_core::{CustomNamespaceJob, DiscoveryJob, Metric, MetricConfig, Resource, Tag};

pub enum Job<'a> {
    /// A discovery job together with the inventory discovered for this run.
    Discovery {
        job: &'a DiscoveryJob,
        resources: &'a [Resource],
    },
    CustomNamespace(&'a CustomNamespaceJob),
}

/// Restrictions applied when listing metrics.
#[derive(Debug, Clone, Copy)]
pub struct ListMetricsParams<'a> {
    pub recently_active_only: bool,
    /// When non-empty, a series is kept only if its dimension names equal
    /// this set.
    pub dimension_name_requirements: &'a [String],
}

/// How datums are tied to a resource name and tags.
#[derive(Debug, Clone, Copy)]
pub enum ResourceEnrichment<'a> {
    /// Associate each series against the discovered inventory.
    Inventory(&'a [Resource]),
    /// Attribute every series to a fixed name, without resource tags.
    Named(&'a str),
}

impl Job<'_> {
    pub fn namespace(&self) -> &str {
        match self {
            Job::Discovery { job, .. } => &job.namespace,
            Job::CustomNamespace(job) => &job.namespace,
        }
    }

    /// Labels attached to everything this job exports.
    pub fn custom_tags(&self) -> &[Tag] {
        match self {
            Job::Discovery { job, .. } => &job.custom_tags,
            Job::CustomNamespace(job) => &job.custom_tags,
        }
    }

    pub fn metrics(&self) -> &[MetricConfig] {
        match self {
            Job::Discovery { job, .. } => &job.metrics,
            Job::CustomNamespace(job) => &job.metrics,
        }
    }

    pub fn list_metrics_params(&self) -> ListMetricsParams<'_> {
        match self {
            Job::Discovery { job, .. } => ListMetricsParams {
                recently_active_only: job.recently_active_only,
                dimension_name_requirements: &job.dimension_name_requirements,
            },
            Job::CustomNamespace(job) => ListMetricsParams {
                recently_active_only: job.recently_active_only,
                dimension_name_requirements: &job.dimension_name_requirements,
            },
        }
    }

    pub fn resource_enrichment(&self) -> ResourceEnrichment<'_> {
        match self {
            Job::Discovery { resources, .. } => ResourceEnrichment::Inventory(*resources),
            Job::CustomNamespace(job) => ResourceEnrichment::Named(&job.name),
        }
    }
}

impl ListMetricsParams<'_> {
    /// Whether a listed series has the required dimension shape.
    pub fn accepts(&self, metric: &Metric) -> bool {
        if self.dimension_name_requirements.is_empty() {
            return true;
        }
        let names = metric.dimension_names();
        names.len() == self.dimension_name_requirements.len()
            && self
                .dimension_name_requirements
                .iter()
                .all(|r| names.contains(r.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::Dimension;

    fn custom_job() -> CustomNamespaceJob {
        CustomNamespaceJob {
            name: "orders-app".to_string(),
            namespace: "Orders/App".to_string(),
            regions: vec!["us-east-1".to_string()],
            roles: vec![Default::default()],
            custom_tags: vec![Tag::new("team", "payments")],
            dimension_name_requirements: vec!["Queue".to_string(), "Host".to_string()],
            recently_active_only: true,
            metrics: Vec::new(),
        }
    }

    #[test]
    fn custom_namespace_accessors() {
        let cfg = custom_job();
        let job = Job::CustomNamespace(&cfg);
        assert_eq!(job.namespace(), "Orders/App");
        assert_eq!(job.custom_tags(), &[Tag::new("team", "payments")]);
        assert!(job.list_metrics_params().recently_active_only);
        assert!(matches!(job.resource_enrichment(), ResourceEnrichment::Named("orders-app")));
    }

    #[test]
    fn dimension_requirements_need_exact_set() {
        let cfg = custom_job();
        let job = Job::CustomNamespace(&cfg);
        let params = job.list_metrics_params();
        let metric = |dims: &[&str]| Metric {
            name: "Depth".to_string(),
            namespace: "Orders/App".to_string(),
            dimensions: dims.iter().map(|d| Dimension::new(*d, "x")).collect(),
        };
        assert!(params.accepts(&metric(&["Host", "Queue"])));
        assert!(!params.accepts(&metric(&["Queue"])));
        assert!(!params.accepts(&metric(&["Queue", "Host", "Zone"])));

        let open = ListMetricsParams {
            recently_active_only: false,
            dimension_name_requirements: &[],
        };
        assert!(open.accepts(&metric(&["Anything"])));
    }
}

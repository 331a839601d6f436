//! Domain types for a scrape.
//!
//! Resources and collected datums live for exactly one scrape; job configs
//! live until the next configuration reload.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Resource name used for datums that could not be tied to a resource.
pub const GLOBAL_RESOURCE: &str = "global";

// ── Tags and dimensions ────────────────────────────────────────────

/// A key/value tag as returned by the tagging API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A tag filter: the key is matched exactly, the value by regex.
#[derive(Debug, Clone)]
pub struct SearchTag {
    pub key: String,
    pub value: Regex,
}

/// One axis of a time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ── Resources ──────────────────────────────────────────────────────

/// A discovered cloud resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Structured unique identifier (ARN).
    pub arn: String,
    pub namespace: String,
    pub region: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Resource {
    /// Whether this resource's tags satisfy every search tag.
    ///
    /// An empty filter matches everything. A filter key missing from the
    /// resource's tags excludes it.
    pub fn matches_search_tags(&self, search_tags: &[SearchTag]) -> bool {
        search_tags.iter().all(|st| {
            self.tags
                .iter()
                .any(|t| t.key == st.key && st.value.is_match(&t.value))
        })
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// A metric series as listed by the metrics API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

impl Metric {
    /// The set of dimension names of this series.
    pub fn dimension_names(&self) -> HashSet<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }
}

/// Retrieval settings for one metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricConfig {
    pub name: String,
    pub statistics: Vec<String>,
    pub period: Duration,
    pub length: Duration,
    pub delay: Duration,
    pub nil_to_zero: bool,
}

// ── Jobs ───────────────────────────────────────────────────────────

/// Credential identity a job runs under. The default role means "the
/// ambient credentials".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub role_arn: Option<String>,
    pub external_id: Option<String>,
}

/// A job that discovers resources by tag and associates metrics to them.
#[derive(Debug, Clone)]
pub struct DiscoveryJob {
    /// Canonical namespace, e.g. `AWS/ApiGateway`.
    pub namespace: String,
    pub regions: Vec<String>,
    pub roles: Vec<Role>,
    pub search_tags: Vec<SearchTag>,
    pub custom_tags: Vec<Tag>,
    pub dimension_name_requirements: Vec<String>,
    pub recently_active_only: bool,
    pub metrics: Vec<MetricConfig>,
}

/// A job with fixed dimensions; no discovery, no association.
#[derive(Debug, Clone)]
pub struct StaticJob {
    pub name: String,
    pub namespace: String,
    pub regions: Vec<String>,
    pub roles: Vec<Role>,
    pub custom_tags: Vec<Tag>,
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<MetricConfig>,
}

/// A job over a user-defined namespace. Datums are attributed to the job
/// name rather than to discovered resources.
#[derive(Debug, Clone)]
pub struct CustomNamespaceJob {
    pub name: String,
    pub namespace: String,
    pub regions: Vec<String>,
    pub roles: Vec<Role>,
    pub custom_tags: Vec<Tag>,
    pub dimension_name_requirements: Vec<String>,
    pub recently_active_only: bool,
    pub metrics: Vec<MetricConfig>,
}

/// All jobs from one configuration load.
#[derive(Debug, Clone, Default)]
pub struct JobsConfig {
    pub discovery: Vec<DiscoveryJob>,
    pub statics: Vec<StaticJob>,
    pub custom_namespace: Vec<CustomNamespaceJob>,
}

impl JobsConfig {
    pub fn is_empty(&self) -> bool {
        self.discovery.is_empty() && self.statics.is_empty() && self.custom_namespace.is_empty()
    }

    pub fn job_count(&self) -> usize {
        self.discovery.len() + self.statics.len() + self.custom_namespace.len()
    }
}

// ── Scrape results ─────────────────────────────────────────────────

/// Where a batch of results came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeContext {
    pub region: String,
    pub account_id: String,
    pub account_alias: String,
    pub custom_tags: Vec<Tag>,
}

/// One exported value: a metric statistic resolved to a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedDatum {
    pub metric_name: String,
    pub namespace: String,
    pub dimensions: Vec<Dimension>,
    /// Resource ARN, the job name for custom namespaces, or [`GLOBAL_RESOURCE`].
    pub resource_name: String,
    pub statistic: String,
    pub value: Option<f64>,
    pub timestamp: Option<SystemTime>,
    /// Tags of the associated resource.
    pub tags: Vec<Tag>,
    pub nil_to_zero: bool,
}

/// Datums produced by one (job, region, role) run.
#[derive(Debug, Clone, Default)]
pub struct MetricResult {
    pub context: ScrapeContext,
    pub data: Vec<CollectedDatum>,
}

/// Resources discovered by one (job, region, role) run.
#[derive(Debug, Clone, Default)]
pub struct ResourceResult {
    pub context: ScrapeContext,
    pub namespace: String,
    pub resources: Vec<Resource>,
}

/// Everything one scrape produced.
#[derive(Debug, Clone, Default)]
pub struct ScrapeResult {
    pub metrics: Vec<MetricResult>,
    pub resources: Vec<ResourceResult>,
    /// Requests made during the scrape, as `(api, count)` pairs.
    pub api_requests: Vec<(String, u64)>,
}

impl ScrapeResult {
    pub fn datum_count(&self) -> usize {
        self.metrics.iter().map(|m| m.data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(tags: &[(&str, &str)]) -> Resource {
        Resource {
            arn: "arn:aws:sqs:us-east-1:123456789012:queue".to_string(),
            namespace: "AWS/SQS".to_string(),
            region: "us-east-1".to_string(),
            tags: tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect(),
        }
    }

    fn search(key: &str, value: &str) -> SearchTag {
        SearchTag {
            key: key.to_string(),
            value: Regex::new(value).unwrap(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(resource(&[]).matches_search_tags(&[]));
        assert!(resource(&[("k1", "v1")]).matches_search_tags(&[]));
    }

    #[test]
    fn exact_tags_match() {
        assert!(resource(&[("k1", "v1")]).matches_search_tags(&[search("k1", "v1")]));
    }

    #[test]
    fn resource_with_more_tags_matches() {
        let r = resource(&[("k1", "v1"), ("k2", "v2")]);
        assert!(r.matches_search_tags(&[search("k1", "v1")]));
    }

    #[test]
    fn filter_with_more_tags_does_not_match() {
        let r = resource(&[("k1", "v1")]);
        assert!(!r.matches_search_tags(&[search("k1", "v1"), search("k2", "v2")]));
    }

    #[test]
    fn missing_key_excludes() {
        assert!(!resource(&[("k1", "v1")]).matches_search_tags(&[search("k2", "v1")]));
    }

    #[test]
    fn value_regex_is_applied() {
        let prod = resource(&[("env", "production")]);
        let dev = resource(&[("env", "dev")]);
        let filter = [search("env", "^prod")];
        assert!(prod.matches_search_tags(&filter));
        assert!(!dev.matches_search_tags(&filter));
    }

    #[test]
    fn dimension_names_is_a_set() {
        let metric = Metric {
            name: "Latency".to_string(),
            namespace: "AWS/ApiGateway".to_string(),
            dimensions: vec![Dimension::new("ApiName", "a"), Dimension::new("Stage", "s")],
        };
        let names = metric.dimension_names();
        assert!(names.contains("ApiName"));
        assert!(names.contains("Stage"));
        assert_eq!(names.len(), 2);
    }
}

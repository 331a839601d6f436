//! Job configuration parser.
//!
//! The on-disk format is TOML. Parsing produces the raw [`JobsFile`];
//! [`JobsFile::validate`] resolves namespace aliases, compiles search tag
//! patterns, applies per-job defaults, and yields a [`JobsConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::*;
use crate::services;

/// Default metric period in seconds.
pub const DEFAULT_PERIOD_SECS: u64 = 300;

/// Errors produced while loading a job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no jobs configured")]
    NoJobs,

    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("job {job}: missing field `{field}`")]
    MissingField { job: String, field: &'static str },

    #[error("job {job}: metric {metric} has no statistics")]
    MissingStatistics { job: String, metric: String },

    #[error("job {job}: metric {metric} has a zero period")]
    ZeroPeriod { job: String, metric: String },

    #[error("invalid search tag pattern for key {key}: {source}")]
    InvalidSearchTag {
        key: String,
        #[source]
        source: regex::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ── File format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsFile {
    #[serde(default)]
    pub discovery: Vec<DiscoveryJobFile>,
    #[serde(default, rename = "static")]
    pub statics: Vec<StaticJobFile>,
    #[serde(default)]
    pub custom_namespace: Vec<CustomNamespaceJobFile>,
}

/// Settings shared by every job kind; metric entries may override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDefaults {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub custom_tags: Vec<Tag>,
    pub statistics: Option<Vec<String>>,
    pub period: Option<u64>,
    pub length: Option<u64>,
    pub delay: Option<u64>,
    pub nil_to_zero: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricFile {
    pub name: String,
    pub statistics: Option<Vec<String>>,
    pub period: Option<u64>,
    pub length: Option<u64>,
    pub delay: Option<u64>,
    pub nil_to_zero: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTagFile {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryJobFile {
    /// Namespace or alias, e.g. `AWS/SQS` or `sqs`.
    pub namespace: String,
    #[serde(flatten)]
    pub defaults: JobDefaults,
    #[serde(default)]
    pub search_tags: Vec<SearchTagFile>,
    #[serde(default)]
    pub dimension_name_requirements: Vec<String>,
    #[serde(default)]
    pub recently_active_only: bool,
    #[serde(default)]
    pub metrics: Vec<MetricFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticJobFile {
    pub name: String,
    pub namespace: String,
    #[serde(flatten)]
    pub defaults: JobDefaults,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub metrics: Vec<MetricFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomNamespaceJobFile {
    pub name: String,
    pub namespace: String,
    #[serde(flatten)]
    pub defaults: JobDefaults,
    #[serde(default)]
    pub dimension_name_requirements: Vec<String>,
    #[serde(default)]
    pub recently_active_only: bool,
    #[serde(default)]
    pub metrics: Vec<MetricFile>,
}

impl JobsFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read, parse, and validate in one step.
    pub fn load(path: &Path) -> ConfigResult<JobsConfig> {
        let jobs = Self::from_file(path)?.validate()?;
        tracing::info!(
            path = %path.display(),
            discovery = jobs.discovery.len(),
            statics = jobs.statics.len(),
            custom_namespace = jobs.custom_namespace.len(),
            "job config loaded"
        );
        Ok(jobs)
    }

    pub fn validate(&self) -> ConfigResult<JobsConfig> {
        let mut out = JobsConfig::default();

        for job in &self.discovery {
            let svc = services::service(&job.namespace)
                .ok_or_else(|| ConfigError::UnknownNamespace(job.namespace.clone()))?;
            let label = svc.namespace.to_string();
            let search_tags = job
                .search_tags
                .iter()
                .map(|st| {
                    Regex::new(&st.value)
                        .map(|value| SearchTag {
                            key: st.key.clone(),
                            value,
                        })
                        .map_err(|source| ConfigError::InvalidSearchTag {
                            key: st.key.clone(),
                            source,
                        })
                })
                .collect::<ConfigResult<Vec<_>>>()?;

            out.discovery.push(DiscoveryJob {
                namespace: svc.namespace.to_string(),
                regions: regions(&label, &job.defaults)?,
                roles: roles(&job.defaults),
                search_tags,
                custom_tags: job.defaults.custom_tags.clone(),
                dimension_name_requirements: job.dimension_name_requirements.clone(),
                recently_active_only: job.recently_active_only,
                metrics: metrics(&label, &job.defaults, &job.metrics)?,
            });
        }

        for job in &self.statics {
            out.statics.push(StaticJob {
                name: non_empty(&job.name, "name", &job.namespace)?,
                namespace: non_empty(&job.namespace, "namespace", &job.name)?,
                regions: regions(&job.name, &job.defaults)?,
                roles: roles(&job.defaults),
                custom_tags: job.defaults.custom_tags.clone(),
                dimensions: job.dimensions.clone(),
                metrics: metrics(&job.name, &job.defaults, &job.metrics)?,
            });
        }

        for job in &self.custom_namespace {
            out.custom_namespace.push(CustomNamespaceJob {
                name: non_empty(&job.name, "name", &job.namespace)?,
                namespace: non_empty(&job.namespace, "namespace", &job.name)?,
                regions: regions(&job.name, &job.defaults)?,
                roles: roles(&job.defaults),
                custom_tags: job.defaults.custom_tags.clone(),
                dimension_name_requirements: job.dimension_name_requirements.clone(),
                recently_active_only: job.recently_active_only,
                metrics: metrics(&job.name, &job.defaults, &job.metrics)?,
            });
        }

        if out.is_empty() {
            return Err(ConfigError::NoJobs);
        }
        Ok(out)
    }
}

fn non_empty(value: &str, field: &'static str, job: &str) -> ConfigResult<String> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField {
            job: job.to_string(),
            field,
        });
    }
    Ok(value.to_string())
}

fn regions(job: &str, defaults: &JobDefaults) -> ConfigResult<Vec<String>> {
    if defaults.regions.is_empty() {
        return Err(ConfigError::MissingField {
            job: job.to_string(),
            field: "regions",
        });
    }
    Ok(defaults.regions.clone())
}

fn roles(defaults: &JobDefaults) -> Vec<Role> {
    if defaults.roles.is_empty() {
        vec![Role::default()]
    } else {
        defaults.roles.clone()
    }
}

fn metrics(job: &str, defaults: &JobDefaults, files: &[MetricFile]) -> ConfigResult<Vec<MetricConfig>> {
    if files.is_empty() {
        return Err(ConfigError::MissingField {
            job: job.to_string(),
            field: "metrics",
        });
    }

    files
        .iter()
        .map(|m| {
            let statistics = m
                .statistics
                .clone()
                .or_else(|| defaults.statistics.clone())
                .unwrap_or_default();
            if statistics.is_empty() {
                return Err(ConfigError::MissingStatistics {
                    job: job.to_string(),
                    metric: m.name.clone(),
                });
            }

            let period = m.period.or(defaults.period).unwrap_or(DEFAULT_PERIOD_SECS);
            if period == 0 {
                return Err(ConfigError::ZeroPeriod {
                    job: job.to_string(),
                    metric: m.name.clone(),
                });
            }
            // Length defaults to one period so every scrape asks for one bucket.
            let length = m.length.or(defaults.length).unwrap_or(period);
            let delay = m.delay.or(defaults.delay).unwrap_or(0);

            Ok(MetricConfig {
                name: m.name.clone(),
                statistics,
                period: Duration::from_secs(period),
                length: Duration::from_secs(length),
                delay: Duration::from_secs(delay),
                nil_to_zero: m.nil_to_zero.or(defaults.nil_to_zero).unwrap_or(false),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[[discovery]]
namespace = "apigateway"
regions = ["us-east-1", "eu-west-1"]
statistics = ["Sum"]
search_tags = [{ key = "env", value = "^prod" }]
custom_tags = [{ key = "team", value = "edge" }]

[[discovery.metrics]]
name = "Latency"
statistics = ["Average", "p99"]
period = 60

[[discovery.metrics]]
name = "Count"

[[static]]
name = "asg-web"
namespace = "AWS/AutoScaling"
regions = ["us-east-1"]
roles = [{ role_arn = "arn:aws:iam::123456789012:role/reader" }]
dimensions = [{ name = "AutoScalingGroupName", value = "web" }]

[[static.metrics]]
name = "GroupInServiceInstances"
statistics = ["Minimum"]

[[custom_namespace]]
name = "app"
namespace = "MyApp/Orders"
regions = ["us-east-1"]
recently_active_only = true

[[custom_namespace.metrics]]
name = "OrdersPlaced"
statistics = ["Sum"]
length = 900
delay = 120
nil_to_zero = true
"#;

    #[test]
    fn parse_and_validate_full() {
        let jobs = JobsFile::parse(FULL).unwrap().validate().unwrap();
        assert_eq!(jobs.job_count(), 3);

        let d = &jobs.discovery[0];
        assert_eq!(d.namespace, "AWS/ApiGateway");
        assert_eq!(d.regions.len(), 2);
        assert_eq!(d.roles, vec![Role::default()]);
        assert_eq!(d.search_tags[0].key, "env");
        assert!(d.search_tags[0].value.is_match("production"));
        assert_eq!(d.metrics[0].statistics, vec!["Average", "p99"]);
        assert_eq!(d.metrics[0].period, Duration::from_secs(60));
        assert_eq!(d.metrics[0].length, Duration::from_secs(60));
        // Job-level statistics apply when the metric has none.
        assert_eq!(d.metrics[1].statistics, vec!["Sum"]);
        assert_eq!(d.metrics[1].period, Duration::from_secs(DEFAULT_PERIOD_SECS));

        let s = &jobs.statics[0];
        assert_eq!(s.roles[0].role_arn.as_deref(), Some("arn:aws:iam::123456789012:role/reader"));
        assert_eq!(s.dimensions[0], Dimension::new("AutoScalingGroupName", "web"));

        let c = &jobs.custom_namespace[0];
        assert!(c.recently_active_only);
        assert_eq!(c.metrics[0].length, Duration::from_secs(900));
        assert_eq!(c.metrics[0].delay, Duration::from_secs(120));
        assert!(c.metrics[0].nil_to_zero);
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let toml = r#"
[[discovery]]
namespace = "AWS/Nope"
regions = ["us-east-1"]
metrics = [{ name = "X", statistics = ["Sum"] }]
"#;
        let err = JobsFile::parse(toml).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNamespace(ns) if ns == "AWS/Nope"));
    }

    #[test]
    fn bad_search_tag_regex_is_rejected() {
        let toml = r#"
[[discovery]]
namespace = "sqs"
regions = ["us-east-1"]
search_tags = [{ key = "env", value = "(" }]
metrics = [{ name = "X", statistics = ["Sum"] }]
"#;
        let err = JobsFile::parse(toml).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSearchTag { .. }));
    }

    #[test]
    fn missing_statistics_is_rejected() {
        let toml = r#"
[[discovery]]
namespace = "sqs"
regions = ["us-east-1"]
metrics = [{ name = "X" }]
"#;
        let err = JobsFile::parse(toml).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingStatistics { .. }));
    }

    #[test]
    fn missing_regions_is_rejected() {
        let toml = r#"
[[custom_namespace]]
name = "app"
namespace = "MyApp"
metrics = [{ name = "X", statistics = ["Sum"] }]
"#;
        let err = JobsFile::parse(toml).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "regions", .. }));
    }

    #[test]
    fn zero_period_is_rejected() {
        let toml = r#"
[[discovery]]
namespace = "sqs"
regions = ["us-east-1"]
metrics = [{ name = "X", statistics = ["Sum"], period = 0 }]
"#;
        let err = JobsFile::parse(toml).unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeriod { .. }));
    }

    #[test]
    fn empty_config_is_rejected() {
        let err = JobsFile::parse("").unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::NoJobs));
    }

    #[test]
    fn syntax_error_is_a_parse_error() {
        assert!(matches!(JobsFile::parse("[[discovery"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.toml");
        std::fs::write(&path, FULL).unwrap();
        let jobs = JobsFile::load(&path).unwrap();
        assert_eq!(jobs.discovery.len(), 1);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(JobsFile::load(&missing), Err(ConfigError::Read { .. })));
    }
}

//! Registry construction.
//!
//! Every scrape yields a brand new registry. Series are grouped into
//! families by name; within a family every series carries the union of the
//! family's label names, missing ones padded with an empty value.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use tracing::debug;

use harvest_core::{CollectedDatum, ScrapeContext, ScrapeResult, Tag, services};

use crate::error::ExporterResult;

/// Self-metric counting API requests made by the scrape.
pub const API_REQUESTS_METRIC: &str = "cloudharvest_api_requests_total";

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Convert label names like `dimension_QueueName` to `dimension_queue_name`.
    pub labels_snake_case: bool,
    /// Emit info metrics for every discovered resource, not only the ones
    /// some datum refers to.
    pub always_return_info_metrics: bool,
}

#[derive(Debug)]
struct Series {
    labels: BTreeMap<String, String>,
    value: f64,
}

#[derive(Debug, Default)]
struct Family {
    help: String,
    series: Vec<Series>,
}

pub fn build_registry(result: &ScrapeResult, opts: &RegistryOptions) -> ExporterResult<Registry> {
    let mut families: BTreeMap<String, Family> = BTreeMap::new();
    let mut referenced: HashSet<&str> = HashSet::new();

    for metrics in &result.metrics {
        for datum in &metrics.data {
            referenced.insert(datum.resource_name.as_str());
            let name = metric_name(&datum.namespace, &datum.metric_name, &datum.statistic);
            let family = families.entry(name).or_insert_with(|| Family {
                help: format!("{} {} {}", datum.namespace, datum.metric_name, datum.statistic),
                ..Default::default()
            });
            family.series.push(Series {
                labels: datum_labels(&metrics.context, datum, opts),
                value: datum_value(datum),
            });
        }
    }

    for discovered in &result.resources {
        let name = format!("{}_info", namespace_prefix(&discovered.namespace));
        for resource in &discovered.resources {
            if !opts.always_return_info_metrics && !referenced.contains(resource.arn.as_str()) {
                continue;
            }
            let mut labels = context_labels(&discovered.context, &resource.arn, opts);
            insert_tags(&mut labels, "tag_", &resource.tags, opts);
            families
                .entry(name.clone())
                .or_insert_with(|| Family {
                    help: format!("{} resource information", discovered.namespace),
                    ..Default::default()
                })
                .series
                .push(Series { labels, value: 0.0 });
        }
    }

    let registry = Registry::new();
    for (name, family) in families {
        register_family(&registry, &name, family)?;
    }
    register_api_requests(&registry, &result.api_requests)?;
    Ok(registry)
}

fn register_family(registry: &Registry, name: &str, family: Family) -> ExporterResult<()> {
    let label_names: BTreeSet<&str> = family
        .series
        .iter()
        .flat_map(|s| s.labels.keys().map(String::as_str))
        .collect();
    let label_names: Vec<&str> = label_names.into_iter().collect();

    let gauge = GaugeVec::new(Opts::new(name, family.help.as_str()), &label_names)?;
    for series in &family.series {
        let values: Vec<&str> = label_names
            .iter()
            .map(|l| series.labels.get(*l).map_or("", String::as_str))
            .collect();
        gauge.with_label_values(&values).set(series.value);
    }
    debug!(metric = name, series = family.series.len(), "registered family");
    registry.register(Box::new(gauge))?;
    Ok(())
}

fn register_api_requests(registry: &Registry, counts: &[(String, u64)]) -> ExporterResult<()> {
    let counter = IntCounterVec::new(
        Opts::new(API_REQUESTS_METRIC, "API requests made during the last scrape"),
        &["api"],
    )?;
    for (api, count) in counts {
        counter.with_label_values(&[api.as_str()]).inc_by(*count);
    }
    registry.register(Box::new(counter))?;
    Ok(())
}

fn datum_value(datum: &CollectedDatum) -> f64 {
    match datum.value {
        Some(v) => v,
        None if datum.nil_to_zero => 0.0,
        None => f64::NAN,
    }
}

fn datum_labels(ctx: &ScrapeContext, datum: &CollectedDatum, opts: &RegistryOptions) -> BTreeMap<String, String> {
    let mut labels = context_labels(ctx, &datum.resource_name, opts);
    for d in &datum.dimensions {
        labels.insert(label_name("dimension_", &d.name, opts), d.value.clone());
    }
    insert_tags(&mut labels, "tag_", &datum.tags, opts);
    labels
}

fn context_labels(ctx: &ScrapeContext, name: &str, opts: &RegistryOptions) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("name".to_string(), name.to_string()),
        ("region".to_string(), ctx.region.clone()),
        ("account_id".to_string(), ctx.account_id.clone()),
        ("account_alias".to_string(), ctx.account_alias.clone()),
    ]);
    insert_tags(&mut labels, "custom_tag_", &ctx.custom_tags, opts);
    labels
}

fn insert_tags(labels: &mut BTreeMap<String, String>, prefix: &str, tags: &[Tag], opts: &RegistryOptions) {
    for tag in tags {
        labels.insert(label_name(prefix, &tag.key, opts), tag.value.clone());
    }
}

fn label_name(prefix: &str, key: &str, opts: &RegistryOptions) -> String {
    let key = if opts.labels_snake_case {
        snake_case(key)
    } else {
        key.to_string()
    };
    sanitize(&format!("{prefix}{key}"))
}

/// `aws_<service>` for supported namespaces, the sanitized namespace otherwise.
fn namespace_prefix(namespace: &str) -> String {
    match services::service(namespace) {
        Some(svc) => format!("aws_{}", svc.short_name()),
        None => sanitize(&snake_case(namespace)),
    }
}

pub fn metric_name(namespace: &str, metric: &str, statistic: &str) -> String {
    let name = format!(
        "{}_{}_{}",
        namespace_prefix(namespace),
        snake_case(metric),
        snake_case(statistic)
    );
    sanitize(&name)
}

/// Insert `_` where a lower-case letter or digit meets an upper-case one,
/// then lower-case everything. `NumberOfMessagesSent` becomes
/// `number_of_messages_sent`; runs of capitals stay together.
fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev: Option<char> = None;
    for c in s.chars() {
        if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
            out.push('_');
        }
        out.extend(c.to_lowercase());
        prev = Some(c);
    }
    out
}

/// Replace anything outside `[a-zA-Z0-9_]` with `_`; never start with a digit.
fn sanitize(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

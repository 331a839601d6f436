//! Metric-to-resource association.
//!
//! Every namespace declares dimension templates, most specific first. A
//! template is an ARN regex whose named groups are metric dimension names.
//! Building an associator indexes the inventory once per template: the values
//! a template captures from an ARN form a signature pointing at that resource.
//! A metric is then resolved by the first template whose dimension names equal
//! the metric's, looking up the signature built from the metric's values.
//!
//! The first structural match decides. When its signature is not in the
//! inventory the metric is reported unassociated, even if a less specific
//! template would have found something.

use std::collections::HashMap;

use tracing::{Level, trace};

use harvest_core::{DimensionTemplate, Metric, Resource, services};

type Signature = Vec<String>;

pub struct Associator<'a> {
    templates: &'static [DimensionTemplate],
    case_insensitive: bool,
    /// One signature index per template, in template order.
    index: Vec<HashMap<Signature, &'a Resource>>,
}

impl<'a> Associator<'a> {
    pub fn new(namespace: &str, resources: &'a [Resource]) -> Self {
        let (templates, case_insensitive) = services::service(namespace)
            .map(|svc| (svc.templates(), svc.case_insensitive))
            .unwrap_or((&[], false));

        let index = templates
            .iter()
            .map(|template| {
                let mut by_signature: HashMap<Signature, &'a Resource> = HashMap::new();
                for resource in resources {
                    let Some(caps) = template.regex.captures(&resource.arn) else {
                        continue;
                    };
                    let signature: Signature = template
                        .dimension_names
                        .iter()
                        .map(|name| normalize(caps.name(name).map_or("", |m| m.as_str()), case_insensitive))
                        .collect();
                    by_signature.entry(signature).or_insert(resource);
                }
                by_signature
            })
            .collect();

        Self {
            templates,
            case_insensitive,
            index,
        }
    }

    /// Resolve `metric` to a resource.
    ///
    /// Returns `(Some(resource), false)` on a hit, `(None, false)` when a
    /// template fits the metric's dimensions but no inventoried resource
    /// carries those values, and `(None, true)` when no template fits at all.
    pub fn associate(&self, metric: &Metric) -> (Option<&'a Resource>, bool) {
        let names = metric.dimension_names();
        for (template, by_signature) in self.templates.iter().zip(&self.index) {
            let fits = names.len() == template.dimension_names.len()
                && template.dimension_names.iter().all(|n| names.contains(n.as_str()));
            if !fits {
                continue;
            }

            let signature: Signature = template
                .dimension_names
                .iter()
                .map(|name| normalize(dimension_value(metric, name), self.case_insensitive))
                .collect();
            let found = by_signature.get(&signature).copied();

            if let Some(resource) = found {
                if tracing::enabled!(Level::TRACE) {
                    let dims: Vec<String> = metric
                        .dimensions
                        .iter()
                        .map(|d| format!("{}={}", d.name, d.value))
                        .collect();
                    trace!(
                        metric = %metric.name,
                        dimensions = %dims.join(","),
                        template = %template.regex,
                        arn = %resource.arn,
                        "found mapping"
                    );
                }
            }
            return (found, false);
        }
        (None, true)
    }
}

fn dimension_value<'m>(metric: &'m Metric, name: &str) -> &'m str {
    metric
        .dimensions
        .iter()
        .find(|d| d.name == name)
        .map_or("", |d| d.value.as_str())
}

fn normalize(value: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

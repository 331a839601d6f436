//! Per-namespace service rules.
//!
//! Each supported namespace declares the resource type filters sent to the
//! tagging API and an ordered list of dimension templates. A template is a
//! regex over the resource ARN whose named capture groups are the metric
//! dimension names it identifies.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Static rule set for one namespace.
#[derive(Debug)]
pub struct ServiceConfig {
    pub namespace: &'static str,
    pub alias: &'static str,
    /// Resource type filters for the tagging API. Empty means the namespace
    /// has no taggable resources.
    pub resource_filters: &'static [&'static str],
    pub dimension_templates: &'static [&'static str],
    /// Compare dimension values to ARN segments ignoring case.
    pub case_insensitive: bool,
}

/// A compiled dimension template.
#[derive(Debug, Clone)]
pub struct DimensionTemplate {
    pub regex: Regex,
    /// Capture group names, in group order.
    pub dimension_names: Vec<String>,
}

impl DimensionTemplate {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        let dimension_names = regex
            .capture_names()
            .flatten()
            .map(str::to_string)
            .collect();
        Ok(Self {
            regex,
            dimension_names,
        })
    }
}

pub static SUPPORTED_SERVICES: &[ServiceConfig] = &[
    ServiceConfig {
        namespace: "AWS/ApiGateway",
        alias: "apigateway",
        resource_filters: &["apigateway"],
        dimension_templates: &[
            "/apis/(?P<ApiId>[^/]+)$",
            "/apis/(?P<ApiId>[^/]+)/stages/(?P<Stage>[^/]+)$",
            "/restapis/(?P<ApiName>[^/]+)$",
            "/restapis/(?P<ApiName>[^/]+)/stages/(?P<Stage>[^/]+)$",
        ],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/ApplicationELB",
        alias: "alb",
        resource_filters: &[
            "elasticloadbalancing:loadbalancer/app",
            "elasticloadbalancing:targetgroup",
        ],
        dimension_templates: &[
            ":(?P<TargetGroup>targetgroup/.+)$",
            ":loadbalancer/(?P<LoadBalancer>.+)$",
        ],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/DynamoDB",
        alias: "dynamodb",
        resource_filters: &["dynamodb:table"],
        dimension_templates: &[":table/(?P<TableName>[^/]+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/EC2",
        alias: "ec2",
        resource_filters: &["ec2:instance"],
        dimension_templates: &["instance/(?P<InstanceId>[^/]+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/ECS",
        alias: "ecs-svc",
        resource_filters: &["ecs:cluster", "ecs:service"],
        dimension_templates: &[
            ":cluster/(?P<ClusterName>[^/]+)$",
            ":service/(?P<ClusterName>[^/]+)/(?P<ServiceName>[^/]+)$",
        ],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/Kinesis",
        alias: "kinesis",
        resource_filters: &["kinesis:stream"],
        dimension_templates: &[":stream/(?P<StreamName>[^/]+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/Lambda",
        alias: "lambda",
        resource_filters: &["lambda:function"],
        dimension_templates: &[":function:(?P<FunctionName>[^:/]+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/Logs",
        alias: "logs",
        resource_filters: &["logs:log-group"],
        dimension_templates: &[":log-group:(?P<LogGroupName>.+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/RDS",
        alias: "rds",
        resource_filters: &["rds:db", "rds:cluster"],
        dimension_templates: &[
            ":db:(?P<DBInstanceIdentifier>[^/]+)$",
            ":cluster:(?P<DBClusterIdentifier>[^/]+)$",
        ],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/S3",
        alias: "s3",
        resource_filters: &["s3"],
        dimension_templates: &["(?P<BucketName>[^:]+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/SageMaker",
        alias: "sagemaker",
        resource_filters: &["sagemaker:endpoint", "sagemaker:inference-component"],
        dimension_templates: &[
            ":endpoint/(?P<EndpointName>[^/]+)$",
            ":inference-component/(?P<InferenceComponentName>[^/]+)$",
        ],
        case_insensitive: true,
    },
    ServiceConfig {
        namespace: "AWS/SNS",
        alias: "sns",
        resource_filters: &["sns"],
        dimension_templates: &["(?P<TopicName>[^:]+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/SQS",
        alias: "sqs",
        resource_filters: &["sqs"],
        dimension_templates: &["(?P<QueueName>[^:]+)$"],
        case_insensitive: false,
    },
    ServiceConfig {
        namespace: "AWS/Usage",
        alias: "usage",
        resource_filters: &[],
        dimension_templates: &[],
        case_insensitive: false,
    },
];

static COMPILED_TEMPLATES: LazyLock<HashMap<&'static str, Vec<DimensionTemplate>>> =
    LazyLock::new(|| {
        SUPPORTED_SERVICES
            .iter()
            .map(|svc| {
                let mut templates: Vec<DimensionTemplate> = svc
                    .dimension_templates
                    .iter()
                    .filter_map(|p| match DimensionTemplate::new(p) {
                        Ok(t) => Some(t),
                        Err(e) => {
                            tracing::error!(namespace = svc.namespace, pattern = p, error = %e, "invalid dimension template");
                            None
                        }
                    })
                    .collect();
                // Most specific first; the sort is stable so ties keep declaration order.
                templates.sort_by(|a, b| b.dimension_names.len().cmp(&a.dimension_names.len()));
                (svc.namespace, templates)
            })
            .collect()
    });

/// Look up a service by namespace or alias.
pub fn service(namespace_or_alias: &str) -> Option<&'static ServiceConfig> {
    SUPPORTED_SERVICES
        .iter()
        .find(|s| s.namespace == namespace_or_alias || s.alias == namespace_or_alias)
}

impl ServiceConfig {
    /// Compiled dimension templates, most specific first.
    pub fn templates(&self) -> &'static [DimensionTemplate] {
        COMPILED_TEMPLATES
            .get(self.namespace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Prometheus-friendly service name, e.g. `apigateway` for `AWS/ApiGateway`.
    pub fn short_name(&self) -> String {
        self.namespace
            .rsplit('/')
            .next()
            .unwrap_or(self.namespace)
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_compiles_and_has_groups() {
        for svc in SUPPORTED_SERVICES {
            assert!(!svc.namespace.is_empty());
            assert!(!svc.alias.is_empty());
            for f in svc.resource_filters {
                assert!(!f.is_empty(), "empty filter for {}", svc.namespace);
            }
            assert_eq!(svc.templates().len(), svc.dimension_templates.len());
            for t in svc.templates() {
                assert!(
                    !t.dimension_names.is_empty(),
                    "template {} of {} has no named groups",
                    t.regex,
                    svc.namespace
                );
            }
        }
    }

    #[test]
    fn lookup_by_namespace_and_alias() {
        assert_eq!(service("AWS/ApiGateway").unwrap().alias, "apigateway");
        assert_eq!(service("apigateway").unwrap().namespace, "AWS/ApiGateway");
        assert!(service("AWS/Nope").is_none());
    }

    #[test]
    fn templates_are_most_specific_first() {
        let names: Vec<usize> = service("AWS/ApiGateway")
            .unwrap()
            .templates()
            .iter()
            .map(|t| t.dimension_names.len())
            .collect();
        assert_eq!(names, vec![2, 2, 1, 1]);
    }

    #[test]
    fn short_name_lowercases_suffix() {
        assert_eq!(service("AWS/ApiGateway").unwrap().short_name(), "apigateway");
        assert_eq!(service("AWS/EC2").unwrap().short_name(), "ec2");
    }
}

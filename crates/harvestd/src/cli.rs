//! Command-line interface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::warn;

use harvest_clients::ConcurrencyConfig;
use harvest_clients::concurrency::{DEFAULT_PER_API_LIMIT, DEFAULT_SINGLE_LIMIT};
use harvest_exporter::RegistryOptions;
use harvest_job::{DEFAULT_METRICS_PER_QUERY, DEFAULT_TAG_CONCURRENCY, UpdateOptions};

pub const FEATURE_ALWAYS_RETURN_INFO_METRICS: &str = "always-return-info-metrics";

#[derive(Parser, Debug)]
#[command(name = "harvestd", about = "Cloud monitoring metrics exporter", version)]
pub struct Cli {
    /// Log level, used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the exporter.
    Run(RunArgs),
    /// Parse and validate a jobs file, then exit.
    VerifyConfig {
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Jobs file (TOML).
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Fixture backend data (JSON), reloaded with the configuration.
    #[arg(long)]
    pub fixture: PathBuf,

    /// Seconds between scrapes.
    #[arg(long, default_value_t = 300)]
    pub scraping_interval: u64,

    /// Limit shared by every metrics API call.
    #[arg(long, default_value_t = DEFAULT_SINGLE_LIMIT)]
    pub cloudwatch_concurrency: usize,

    /// Use per-API limits instead of the shared one.
    #[arg(long)]
    pub cloudwatch_concurrency_per_api_limit_enabled: bool,

    #[arg(long, default_value_t = DEFAULT_PER_API_LIMIT)]
    pub cloudwatch_concurrency_list_metrics_limit: usize,

    #[arg(long, default_value_t = DEFAULT_PER_API_LIMIT)]
    pub cloudwatch_concurrency_get_metric_data_limit: usize,

    #[arg(long, default_value_t = DEFAULT_PER_API_LIMIT)]
    pub cloudwatch_concurrency_get_metric_statistics_limit: usize,

    /// Concurrent tagging API requests.
    #[arg(long, default_value_t = DEFAULT_TAG_CONCURRENCY)]
    pub tag_concurrency: usize,

    /// Queries per GetMetricData call.
    #[arg(long, default_value_t = DEFAULT_METRICS_PER_QUERY)]
    pub metrics_per_query: usize,

    /// Snake-case dimension and tag label names.
    #[arg(long)]
    pub labels_snake_case: bool,

    /// Feature flags, comma separated or repeated.
    #[arg(long, value_delimiter = ',')]
    pub enable_feature: Vec<String>,
}

impl RunArgs {
    pub fn scraping_interval(&self) -> Duration {
        Duration::from_secs(self.scraping_interval.max(1))
    }

    pub fn concurrency(&self) -> ConcurrencyConfig {
        let defaults = ConcurrencyConfig::default();
        if self.cloudwatch_concurrency_per_api_limit_enabled && self.cloudwatch_concurrency != defaults.single_limit {
            warn!(
                single_limit = self.cloudwatch_concurrency,
                "per-API limits enabled, ignoring --cloudwatch-concurrency"
            );
        }
        ConcurrencyConfig {
            single_limit: self.cloudwatch_concurrency,
            per_api_limit_enabled: self.cloudwatch_concurrency_per_api_limit_enabled,
            list_metrics: self.cloudwatch_concurrency_list_metrics_limit,
            get_metric_data: self.cloudwatch_concurrency_get_metric_data_limit,
            get_metric_statistics: self.cloudwatch_concurrency_get_metric_statistics_limit,
        }
    }

    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            metrics_per_query: self.metrics_per_query.max(1),
            tag_concurrency: self.tag_concurrency,
            concurrency: self.concurrency(),
            ..Default::default()
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        let mut opts = RegistryOptions {
            labels_snake_case: self.labels_snake_case,
            ..Default::default()
        };
        for feature in &self.enable_feature {
            match feature.as_str() {
                FEATURE_ALWAYS_RETURN_INFO_METRICS => opts.always_return_info_metrics = true,
                other => warn!(feature = other, "unknown feature flag ignored"),
            }
        }
        opts
    }
}

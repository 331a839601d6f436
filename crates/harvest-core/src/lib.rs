//! harvest-core — shared types for cloudharvest.
//!
//! Holds the scrape data model (resources, metrics, collected datums), the
//! static per-namespace service rules used by discovery and association,
//! and the TOML job configuration parser.

pub mod config;
pub mod model;
pub mod services;

pub use config::{ConfigError, ConfigResult, JobsFile};
pub use model::*;
pub use services::{DimensionTemplate, ServiceConfig};

//! Exporter error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("configuration error: {0}")]
    Config(#[from] harvest_core::ConfigError),

    #[error("client error: {0}")]
    Client(#[from] harvest_clients::ClientError),
}

pub type ExporterResult<T> = Result<T, ExporterError>;

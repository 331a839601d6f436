//! Client error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiCall;

/// Errors returned by the capability interfaces.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{api} request failed: {message}")]
    Api { api: ApiCall, message: String },

    #[error("{api} request throttled")]
    Throttled { api: ApiCall },

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to load fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },
}

impl ClientError {
    pub fn api(api: ApiCall, message: impl Into<String>) -> Self {
        Self::Api {
            api,
            message: message.into(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

//! Pipeline error types.

use harvest_clients::ClientError;
use thiserror::Error;

/// Errors from resource discovery. Scoped to one (job, region, role) run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Filters were declared but nothing came back; usually a
    /// misconfigured search tag or a missing permission.
    #[error("expected to discover resources for {namespace} in {region}, found none")]
    ExpectedResources { namespace: String, region: String },

    #[error("unsupported namespace: {0}")]
    UnknownNamespace(String),

    #[error("tagging api error: {0}")]
    Client(#[from] ClientError),

    #[error("{namespace} resource hook failed: {message}")]
    Hook { namespace: String, message: String },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("metrics api error: {0}")]
    Client(ClientError),

    #[error("scrape cancelled")]
    Cancelled,
}

impl From<ClientError> for JobError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Cancelled => JobError::Cancelled,
            other => JobError::Client(other),
        }
    }
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            JobError::Cancelled | JobError::Discovery(DiscoveryError::Client(ClientError::Cancelled))
        )
    }
}

pub type JobResult<T> = Result<T, JobError>;

//! Orchestrator error types

use std::time::Duration;
use thiserror::Error;

use cloudmesh_common::{AdapterError, ComplianceTier, RegistryError};

/// Why one candidate provider did not receive a resource
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CandidateError {
    /// Adapter call failed or timed out
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Registry refused the record (provider went offline mid-deploy)
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Per-candidate deploy failure
#[derive(Debug, Clone, PartialEq)]
pub struct DeployFailure {
    /// Provider name
    pub provider: String,
    /// Cause
    pub error: CandidateError,
}

/// Deployment errors
#[derive(Error, Debug)]
pub enum DeployError {
    /// No active provider satisfies the requested tier; nothing was created
    #[error("no eligible provider satisfies compliance tier {0}")]
    ComplianceBlocked(ComplianceTier),

    /// Fewer eligible providers than the distribution mode requires; nothing was created
    #[error("distribution mode needs {required} providers, {eligible} eligible")]
    InsufficientProviders {
        /// Required by the mode
        required: usize,
        /// Eligible
        eligible: usize,
    },

    /// Every candidate failed
    #[error("deployment failed on every candidate ({} failures)", failures.len())]
    AllCandidatesFailed {
        /// One entry per candidate, in rank order
        failures: Vec<DeployFailure>,
    },
}

/// Cost analysis errors
#[derive(Error, Debug)]
pub enum CostError {
    /// Analyzer failed
    #[error("cost analysis failed: {0}")]
    Analysis(String),

    /// Analyzer exceeded its deadline
    #[error("cost analysis timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure applying one recommendation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// Resource no longer recorded
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Recommendation needs an operator
    #[error("recommendation cannot be applied automatically: {0}")]
    NotActionable(String),

    /// Registry refused the change
    #[error("apply rejected: {0}")]
    Rejected(String),
}

impl From<RegistryError> for ApplyError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::ResourceNotFound(id) => Self::ResourceNotFound(id),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid JSON for the schema
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values rejected by validation
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Provider set rejected by the registry
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

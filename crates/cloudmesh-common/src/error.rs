//! Error types shared across the control plane

use std::time::Duration;
use thiserror::Error;

use crate::provider::ProviderStatus;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Provider not configured
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Resource not recorded
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Provider definition rejected
    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    /// Duplicate provider name in a configuration set
    #[error("duplicate provider: {0}")]
    DuplicateProvider(String),

    /// Status edge not permitted
    #[error("illegal status transition for {provider}: {from} -> {to}")]
    IllegalTransition {
        /// Provider name
        provider: String,
        /// Current status
        from: ProviderStatus,
        /// Requested status
        to: ProviderStatus,
    },

    /// Recovery attempted without a passing probe
    #[error("recovery of {0} requires a passing health probe")]
    RecoveryRequiresProbe(String),

    /// Resource placement on an offline provider
    #[error("provider {0} is offline")]
    ProviderOffline(String),
}

/// Errors raised by provider adapters and health probes.
///
/// Every adapter call is bounded by a caller-supplied timeout; a timeout is a
/// failure like any other, never a hang.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// Call exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Provider API unreachable or erroring
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// No adapter registered for the provider
    #[error("no adapter for provider {0}")]
    NoAdapter(String),
}

impl AdapterError {
    /// Whether this maps to the ProviderUnavailable class
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

//! Capability traits for the provider adapter layer
//!
//! Concrete AWS/GCP/Azure clients live outside the control plane and are
//! injected at composition time. Each capability has exactly one method.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::error::AdapterError;
use crate::provider::Provider;
use crate::resource::{BackupPolicy, ResourceKind};

/// What to deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Logical name
    pub name: String,
    /// Kind of resource
    pub kind: ResourceKind,
    /// Preferred region; providers in this region get an affinity bonus
    #[serde(default)]
    pub preferred_region: Option<String>,
    /// Provider-agnostic spec
    #[serde(default)]
    pub specs: HashMap<String, serde_json::Value>,
    /// Caller tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Backup policy
    #[serde(default)]
    pub backup: BackupPolicy,
}

impl ResourceSpec {
    /// Spec with defaults
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            preferred_region: None,
            specs: HashMap::new(),
            tags: HashMap::new(),
            backup: BackupPolicy::default(),
        }
    }

    /// Builder: preferred region
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.preferred_region = Some(region.into());
        self
    }

    /// Builder: spec entry
    pub fn with_spec(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.specs.insert(key.into(), value);
        self
    }

    /// Builder: backup policy
    pub fn with_backup(mut self, backup: BackupPolicy) -> Self {
        self.backup = backup;
        self
    }
}

/// Adapter response to a successful deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedResource {
    /// Provider-assigned id
    pub resource_id: String,
    /// Region actually used
    pub region: String,
    /// Effective spec
    pub specs: HashMap<String, serde_json::Value>,
    /// Provider tags
    pub tags: HashMap<String, String>,
    /// Quoted hourly price
    pub hourly_cost: f64,
}

/// Raw health probe measurement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProbeSample {
    /// Round-trip latency in milliseconds
    pub latency_ms: f64,
    /// Availability over the probe window, percent (0-100)
    pub availability: f64,
    /// Current spend rate for the billing period, if the provider reports it
    pub current_spend: Option<f64>,
    /// Provider signalled a compliance drift (e.g. certification lapse)
    pub compliance_drift: bool,
}

impl ProbeSample {
    /// Healthy sample with the given latency
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            availability: 100.0,
            current_spend: None,
            compliance_drift: false,
        }
    }
}

/// Deploy capability of one provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Deploy a resource; must fail with a distinguishable error rather than hang
    async fn deploy(&self, spec: &ResourceSpec) -> Result<DeployedResource, AdapterError>;
}

/// Health probe capability
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe one provider
    async fn probe(&self, provider: &Provider) -> Result<ProbeSample, AdapterError>;
}

/// Run an adapter call under a deadline; elapsed deadline becomes `AdapterError::Timeout`
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_adapter_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, AdapterError>(1)
        };
        let err = with_timeout(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout(_)));
        assert!(err.is_unavailable());

        let fast = async { Ok::<_, AdapterError>(7) };
        assert_eq!(with_timeout(Duration::from_millis(50), fast).await.unwrap(), 7);
    }
}

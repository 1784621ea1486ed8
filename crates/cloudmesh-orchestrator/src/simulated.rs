//! Simulated provider adapters
//!
//! In-process stand-ins for the AWS/GCP/Azure clients. The controller daemon
//! runs on them until real adapters are supplied, and tests use them to
//! inject latency and failures.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cloudmesh_common::{
    AdapterError, DeployedResource, HealthProbe, ProbeSample, Provider, ProviderAdapter, ResourceKind, ResourceSpec,
};

fn kind_slug(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Compute => "vm",
        ResourceKind::Storage => "bucket",
        ResourceKind::Database => "db",
        ResourceKind::Network => "net",
        ResourceKind::Cdn => "cdn",
    }
}

fn kind_multiplier(kind: ResourceKind) -> f64 {
    match kind {
        ResourceKind::Compute => 1.0,
        ResourceKind::Storage => 0.25,
        ResourceKind::Database => 1.5,
        ResourceKind::Network => 0.1,
        ResourceKind::Cdn => 0.2,
    }
}

/// Simulated deploy adapter for one provider
pub struct SimulatedProvider {
    name: String,
    region: String,
    hourly_rate: f64,
    latency: RwLock<Duration>,
    failing: AtomicBool,
    deployed: AtomicU64,
}

impl SimulatedProvider {
    /// Adapter charging `hourly_rate` for one compute unit
    pub fn new(name: impl Into<String>, region: impl Into<String>, hourly_rate: f64) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            hourly_rate,
            latency: RwLock::new(Duration::ZERO),
            failing: AtomicBool::new(false),
            deployed: AtomicU64::new(0),
        }
    }

    /// Delay every deploy call
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Make deploy calls fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful deploys so far
    pub fn deployed(&self) -> u64 {
        self.deployed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedProvider {
    async fn deploy(&self, spec: &ResourceSpec) -> Result<DeployedResource, AdapterError> {
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable(format!("{} API unreachable", self.name)));
        }

        let n = self.deployed.fetch_add(1, Ordering::SeqCst) + 1;
        let mut specs = spec.specs.clone();
        specs.entry("encryption_at_rest".into()).or_insert(true.into());
        specs.entry("audit_logging".into()).or_insert(true.into());

        Ok(DeployedResource {
            resource_id: format!("{}-{}-{}-{:04}", self.name, kind_slug(spec.kind), spec.name, n),
            region: self.region.clone(),
            specs,
            tags: HashMap::from([("simulated".to_string(), "true".to_string())]),
            hourly_cost: self.hourly_rate * kind_multiplier(spec.kind),
        })
    }
}

/// Simulated health probe with per-provider answers
#[derive(Default)]
pub struct SimulatedProbe {
    answers: DashMap<String, Result<ProbeSample, AdapterError>>,
    delays: DashMap<String, Duration>,
}

impl SimulatedProbe {
    /// Probe answering healthy (20ms) for everyone
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the answer for one provider
    pub fn set(&self, provider: &str, answer: Result<ProbeSample, AdapterError>) {
        self.answers.insert(provider.to_string(), answer);
    }

    /// Answer healthy again
    pub fn heal(&self, provider: &str) {
        self.answers.remove(provider);
    }

    /// Delay probes of one provider
    pub fn set_delay(&self, provider: &str, delay: Duration) {
        self.delays.insert(provider.to_string(), delay);
    }
}

#[async_trait]
impl HealthProbe for SimulatedProbe {
    async fn probe(&self, provider: &Provider) -> Result<ProbeSample, AdapterError> {
        let delay = self.delays.get(&provider.name).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .get(&provider.name)
            .map(|a| a.value().clone())
            .unwrap_or_else(|| Ok(ProbeSample::healthy(20.0)))
    }
}

/// One simulated adapter per provider, priced by priority
pub fn simulated_fleet(providers: &[Provider]) -> HashMap<String, Arc<SimulatedProvider>> {
    providers
        .iter()
        .map(|p| {
            let rate = 0.10 + 0.02 * f64::from(p.priority);
            (p.name.clone(), Arc::new(SimulatedProvider::new(&p.name, &p.region, rate)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudmesh_common::{with_timeout, ComplianceTier};

    #[tokio::test]
    async fn test_deploy_ids_and_defaults() {
        let adapter = SimulatedProvider::new("aws", "us-east-1", 0.2);
        let spec = ResourceSpec::new("api", ResourceKind::Database).with_spec("encryption_at_rest", false.into());

        let first = adapter.deploy(&spec).await.unwrap();
        let second = adapter.deploy(&spec).await.unwrap();
        assert_eq!(first.resource_id, "aws-db-api-0001");
        assert_ne!(first.resource_id, second.resource_id);
        assert_eq!(first.specs["encryption_at_rest"], false);
        assert_eq!(first.specs["audit_logging"], true);
        assert!((first.hourly_cost - 0.3).abs() < 1e-9);
        assert_eq!(adapter.deployed(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_distinguishable() {
        let adapter = SimulatedProvider::new("gcp", "us-central1", 0.2);
        adapter.set_failing(true);
        let spec = ResourceSpec::new("api", ResourceKind::Compute);
        assert!(matches!(adapter.deploy(&spec).await, Err(AdapterError::Unavailable(_))));

        adapter.set_failing(false);
        adapter.set_latency(Duration::from_secs(5));
        let result = with_timeout(Duration::from_millis(20), adapter.deploy(&spec)).await;
        assert!(matches!(result, Err(AdapterError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_probe_script() {
        let probe = SimulatedProbe::new();
        let aws = Provider::new("aws", "us-east-1", 1, 100.0, ComplianceTier::All);
        assert_eq!(probe.probe(&aws).await.unwrap().latency_ms, 20.0);

        probe.set("aws", Err(AdapterError::Unavailable("down".into())));
        assert!(probe.probe(&aws).await.is_err());

        probe.heal("aws");
        assert!(probe.probe(&aws).await.is_ok());
    }
}

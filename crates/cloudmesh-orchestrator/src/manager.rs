//! Multi-Cloud Manager (composition root)

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use cloudmesh_common::events::{ComplianceValidated, CostOptimized, DeploymentCompleted};
use cloudmesh_common::{
    with_timeout, AdapterError, BackgroundTasks, ComplianceTier, DistributionMode, EventBus, HealthProbe,
    PlacementRequest, Provider, ProviderAdapter, ProviderRegistry, ProviderSelector, ProviderStatus, RegistryError,
    Resource, ResourceCost, ResourceRegistry, ResourceSpec,
};
use cloudmesh_compliance::{ComplianceEngine, ComplianceReport, ResourceRuleEvaluator, RuleEvaluator};
use cloudmesh_resilience::{
    FailoverConfig, FailoverController, FailoverReason, FailoverReport, HealthMonitor, ReplicationCoordinator,
    ReplicationSettings,
};

use crate::config::ControlPlaneConfig;
use crate::cost::{CostAnalyzer, CostOptimizer, OptimizationReport, UtilizationAnalyzer};
use crate::error::{CandidateError, ConfigError, CostError, DeployError, DeployFailure};

/// Worst-case value reported for latency and cost when metrics collection fails
pub const METRICS_SENTINEL: f64 = 999_999.0;

/// Externally supplied capabilities
pub struct Capabilities {
    /// Deploy adapter per provider name
    pub adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    /// Health probe
    pub probe: Arc<dyn HealthProbe>,
    /// Cost analysis
    pub analyzer: Arc<dyn CostAnalyzer>,
    /// Rule evaluator; defaults to evaluating the manager's resource registry
    pub evaluator: Option<Arc<dyn RuleEvaluator>>,
}

impl Capabilities {
    /// Adapters and probe, with the default analyzer and evaluator
    pub fn new(adapters: HashMap<String, Arc<dyn ProviderAdapter>>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            adapters,
            probe,
            analyzer: Arc::new(UtilizationAnalyzer),
            evaluator: None,
        }
    }

    /// Builder: cost analyzer
    pub fn with_analyzer(mut self, analyzer: Arc<dyn CostAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Builder: rule evaluator
    pub fn with_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }
}

/// Result of a multi-provider deployment
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Correlation token, time ordered
    pub deployment_id: String,
    /// Recorded resources, in provider rank order
    pub resources: Vec<Resource>,
    /// Candidates that failed
    pub failures: Vec<DeployFailure>,
    /// Backup replication jobs serving the deployment
    pub replication_jobs: Vec<Uuid>,
    /// The distribution mode's target count was reached
    pub fully_placed: bool,
    /// When
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Providers that received a resource
    pub fn providers(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.provider.clone()).collect()
    }
}

/// Per-provider figures for dashboards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudMetrics {
    /// Availability percent
    pub availability: f64,
    /// Probe latency, ms
    pub latency_ms: f64,
    /// Monthly spend
    pub cost: f64,
    /// Latency and availability combined, 0-100
    pub performance: f64,
    /// Compliance tier strength, 0-100
    pub compliance: f64,
}

impl CloudMetrics {
    /// Worst-case values for a provider whose metrics could not be collected
    pub fn unavailable() -> Self {
        Self {
            availability: 0.0,
            latency_ms: METRICS_SENTINEL,
            cost: METRICS_SENTINEL,
            performance: 0.0,
            compliance: 0.0,
        }
    }
}

/// Multi-cloud control plane
pub struct MultiCloudManager {
    config: RwLock<ControlPlaneConfig>,
    providers: Arc<ProviderRegistry>,
    resources: Arc<ResourceRegistry>,
    adapters: RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>,
    selector: ProviderSelector,
    health: Arc<HealthMonitor>,
    failover: Arc<FailoverController>,
    replication: Arc<ReplicationCoordinator>,
    cost: Arc<CostOptimizer>,
    compliance: Arc<ComplianceEngine>,
    events: EventBus,
    tasks: BackgroundTasks,
    started: AtomicBool,
}

impl MultiCloudManager {
    /// Wire every component from a validated configuration
    pub fn new(config: ControlPlaneConfig, capabilities: Capabilities) -> Result<Self, ConfigError> {
        config.validate()?;

        let events = EventBus::default();
        let providers = Arc::new(ProviderRegistry::with_providers(config.providers.clone())?);
        let resources = Arc::new(ResourceRegistry::new());
        let replication = Arc::new(ReplicationCoordinator::new(
            config.replication.max_bandwidth_mbps,
            config.timeouts.replication_setup(),
        ));

        let health = Arc::new(
            HealthMonitor::new(
                providers.clone(),
                resources.clone(),
                capabilities.probe.clone(),
                config.health.clone(),
                events.clone(),
            )
            .with_triggers(config.failover.triggers.clone()),
        );
        let failover = Arc::new(FailoverController::new(
            config.failover.clone(),
            providers.clone(),
            resources.clone(),
            replication.clone(),
            capabilities.probe.clone(),
            config.health.clone(),
            events.clone(),
        ));
        health.set_handler(failover.clone());

        let cost = Arc::new(CostOptimizer::new(
            capabilities.analyzer,
            providers.clone(),
            resources.clone(),
            config.timeouts.cost_analysis(),
        ));

        let evaluator = capabilities
            .evaluator
            .unwrap_or_else(|| Arc::new(ResourceRuleEvaluator::new(resources.clone())));
        let compliance = Arc::new(ComplianceEngine::new(
            config.compliance_rules.clone(),
            evaluator,
            config.timeouts.compliance_check(),
        ));

        tracing::info!(
            providers = providers.len(),
            primary = %config.failover.primary,
            "Multi-cloud manager initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            providers,
            resources,
            adapters: RwLock::new(capabilities.adapters),
            selector: ProviderSelector::new(),
            health,
            failover,
            replication,
            cost,
            compliance,
            events,
            tasks: BackgroundTasks::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Deploy `spec` across providers per `mode`, restricted to providers satisfying `tier`.
    ///
    /// Candidates are tried one at a time in rank order. A failed candidate is
    /// recorded and the next one is tried until the mode's target count is
    /// reached or candidates run out.
    pub async fn deploy_multi_cloud(
        &self,
        spec: ResourceSpec,
        mode: DistributionMode,
        tier: ComplianceTier,
    ) -> Result<Deployment, DeployError> {
        let request = PlacementRequest {
            required_tier: tier,
            preferred_region: spec.preferred_region.clone(),
            mode,
        };
        let snapshot = self.providers.snapshot();
        let ranked = self.selector.select_providers(&snapshot, &request);

        let required = mode.min_providers();
        if ranked.is_empty() {
            let any_active = snapshot.iter().any(|p| p.status == ProviderStatus::Active);
            metrics::counter!("cloudmesh_deployments_total", "outcome" => "rejected").increment(1);
            return Err(if any_active {
                tracing::warn!(tier = %tier, "No active provider satisfies the compliance tier");
                DeployError::ComplianceBlocked(tier)
            } else {
                DeployError::InsufficientProviders { required, eligible: 0 }
            });
        }
        if ranked.len() < required {
            metrics::counter!("cloudmesh_deployments_total", "outcome" => "rejected").increment(1);
            return Err(DeployError::InsufficientProviders {
                required,
                eligible: ranked.len(),
            });
        }

        let target = mode.target_count(ranked.len());
        let deployment_id = Uuid::now_v7().to_string();
        let deploy_timeout = self.config.read().timeouts.deploy();
        tracing::info!(
            deployment = %deployment_id, resource = %spec.name,
            mode = ?mode, tier = %tier, candidates = ranked.len(), target,
            "Starting multi-cloud deployment"
        );

        let mut placed = Vec::new();
        let mut failures = Vec::new();
        for candidate in &ranked {
            if placed.len() == target {
                break;
            }
            let provider = &candidate.provider;
            match self.deploy_to(provider, &spec, &deployment_id, deploy_timeout).await {
                Ok(resource) => {
                    tracing::info!(
                        deployment = %deployment_id, provider = %provider.name,
                        resource = %resource.id, score = candidate.score.total,
                        "Resource deployed"
                    );
                    placed.push(resource);
                }
                Err(error) => {
                    tracing::warn!(deployment = %deployment_id, provider = %provider.name, error = %error, "Deploy failed");
                    metrics::counter!("cloudmesh_deploy_failures_total", "provider" => provider.name.clone()).increment(1);
                    failures.push(DeployFailure {
                        provider: provider.name.clone(),
                        error,
                    });
                }
            }
        }

        if placed.is_empty() {
            metrics::counter!("cloudmesh_deployments_total", "outcome" => "failed").increment(1);
            return Err(DeployError::AllCandidatesFailed { failures });
        }

        let replication_jobs = if spec.backup.enabled && spec.backup.cross_region {
            self.setup_backup(&placed, &spec).await
        } else {
            Vec::new()
        };

        let deployment = Deployment {
            fully_placed: placed.len() == target,
            deployment_id,
            resources: placed,
            failures,
            replication_jobs,
            created_at: Utc::now(),
        };

        let outcome = if deployment.fully_placed { "full" } else { "partial" };
        metrics::counter!("cloudmesh_deployments_total", "outcome" => outcome).increment(1);
        self.events.publish(DeploymentCompleted {
            deployment_id: deployment.deployment_id.clone(),
            resources: deployment.resources.iter().map(|r| r.id.clone()).collect(),
            providers: deployment.providers(),
            failed_providers: deployment.failures.iter().map(|f| f.provider.clone()).collect(),
            timestamp: deployment.created_at,
        });
        tracing::info!(
            deployment = %deployment.deployment_id,
            placed = deployment.resources.len(),
            failed = deployment.failures.len(),
            outcome,
            "Multi-cloud deployment finished"
        );
        Ok(deployment)
    }

    async fn deploy_to(
        &self,
        provider: &Provider,
        spec: &ResourceSpec,
        deployment_id: &str,
        deploy_timeout: std::time::Duration,
    ) -> Result<Resource, CandidateError> {
        let adapter = self
            .adapters
            .read()
            .get(&provider.name)
            .cloned()
            .ok_or_else(|| AdapterError::NoAdapter(provider.name.clone()))?;
        let deployed = with_timeout(deploy_timeout, adapter.deploy(spec)).await?;

        let mut tags = spec.tags.clone();
        tags.extend(deployed.tags);
        tags.insert("deployment-id".into(), deployment_id.to_string());
        tags.insert("managed-by".into(), "cloudmesh".into());
        tags.insert("provider".into(), provider.name.clone());

        let resource = Resource {
            id: deployed.resource_id,
            kind: spec.kind,
            provider: provider.name.clone(),
            region: deployed.region,
            specs: deployed.specs,
            cost: ResourceCost::from_hourly(deployed.hourly_cost),
            tags,
            backup: spec.backup.clone(),
            created_at: Utc::now(),
        };
        self.resources.record(resource.clone(), &self.providers)?;
        Ok(resource)
    }

    /// One backup job per hosting provider toward its failover target
    async fn setup_backup(&self, placed: &[Resource], spec: &ResourceSpec) -> Vec<Uuid> {
        let settings = ReplicationSettings {
            frequency: spec.backup.frequency,
            bandwidth_cap_mbps: self.config.read().replication.backup_bandwidth_mbps,
            ..Default::default()
        };
        let hosts: BTreeSet<&str> = placed.iter().map(|r| r.provider.as_str()).collect();

        let mut jobs = Vec::new();
        for source in hosts {
            let snapshot = self.providers.snapshot();
            let Some(target) = self.selector.select_failover_target(&snapshot, source) else {
                tracing::warn!(provider = %source, "No backup target available");
                continue;
            };
            match self
                .replication
                .ensure_job(source, &target.provider.name, settings.clone())
                .await
            {
                Ok(job) => jobs.push(job.id),
                Err(e) => {
                    tracing::warn!(source = %source, target = %target.provider.name, error = %e, "Backup replication setup failed")
                }
            }
        }
        jobs
    }

    /// Fail over away from the provider currently receiving traffic
    pub async fn execute_failover(&self, reason: FailoverReason, target: Option<&str>) -> FailoverReport {
        self.failover.execute_failover(reason, target).await
    }

    /// Run one cost optimization pass
    pub async fn optimize_costs(&self) -> Result<OptimizationReport, CostError> {
        cost_pass(&self.cost, &self.events).await
    }

    /// Run one compliance validation pass
    pub async fn validate_compliance(&self) -> ComplianceReport {
        compliance_pass(&self.compliance, &self.events).await
    }

    /// Metrics for every configured provider.
    ///
    /// Probes run concurrently; a provider whose probe fails gets
    /// `CloudMetrics::unavailable()` instead of being omitted.
    pub async fn get_cloud_metrics(&self) -> BTreeMap<String, CloudMetrics> {
        let max_latency = self.health.thresholds().max_latency_ms;
        let mut probes = JoinSet::new();
        for name in self.providers.names() {
            let health = self.health.clone();
            probes.spawn(async move {
                let sample = health.sample(&name).await;
                (name, sample)
            });
        }

        let mut collected = BTreeMap::new();
        while let Some(joined) = probes.join_next().await {
            let Ok((name, sample)) = joined else {
                continue;
            };
            let entry = match (sample, self.providers.get(&name)) {
                (Ok(sample), Some(provider)) => {
                    let responsiveness = if max_latency > 0.0 {
                        (1.0 - sample.latency_ms / max_latency).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    CloudMetrics {
                        availability: sample.availability,
                        latency_ms: sample.latency_ms,
                        cost: self.resources.monthly_spend(&name),
                        performance: responsiveness * sample.availability,
                        compliance: provider.compliance.score() * 5.0,
                    }
                }
                (Err(e), _) => {
                    tracing::warn!(provider = %name, error = %e, "Metrics collection failed");
                    CloudMetrics::unavailable()
                }
                (Ok(_), None) => CloudMetrics::unavailable(),
            };
            collected.insert(name, entry);
        }

        // a panicked probe task still leaves an entry
        for name in self.providers.names() {
            collected.entry(name).or_insert_with(CloudMetrics::unavailable);
        }
        collected
    }

    /// Start health timers and the periodic cost and compliance passes
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let (health_interval, schedule) = {
            let config = self.config.read();
            (config.failover.health_check_interval(), config.schedule.clone())
        };

        self.health.start(health_interval, &self.tasks);

        let cost = self.cost.clone();
        let events = self.events.clone();
        self.tasks.spawn_periodic("cost-optimizer", schedule.cost_interval(), move || {
            let cost = cost.clone();
            let events = events.clone();
            async move { cost_pass(&cost, &events).await.map(|_| ()) }
        });

        let compliance = self.compliance.clone();
        let events = self.events.clone();
        self.tasks
            .spawn_periodic("compliance-engine", schedule.compliance_interval(), move || {
                let compliance = compliance.clone();
                let events = events.clone();
                async move {
                    compliance_pass(&compliance, &events).await;
                    Ok::<(), Infallible>(())
                }
            });

        tracing::info!(tasks = self.tasks.len(), "Control plane started");
    }

    /// Cancel every background task and wait for in-flight passes
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
        tracing::info!("Control plane stopped");
    }

    /// Replace the provider set; new providers get health timers if the plane is running
    pub fn reconfigure(&self, providers: Vec<Provider>) -> Result<(), ConfigError> {
        let interval = {
            let mut config = self.config.write();
            let mut candidate = config.clone();
            candidate.providers = providers.clone();
            candidate.validate()?;

            self.providers.replace_all(providers)?;
            self.apply_failover(&candidate.failover);
            let interval = candidate.failover.health_check_interval();
            *config = candidate;
            interval
        };

        if self.started.load(Ordering::SeqCst) {
            self.health.start(interval, &self.tasks);
        }
        tracing::info!(providers = self.providers.len(), "Provider set reconfigured");
        Ok(())
    }

    /// Replace the failover policy.
    ///
    /// The armed triggers take effect on the next health check. A new check
    /// interval only applies to timers started afterwards.
    pub fn set_failover_config(&self, failover: FailoverConfig) -> Result<(), ConfigError> {
        let mut config = self.config.write();
        let mut candidate = config.clone();
        candidate.failover = failover;
        candidate.validate()?;

        self.apply_failover(&candidate.failover);
        tracing::info!(
            primary = %candidate.failover.primary,
            triggers = ?candidate.failover.triggers,
            "Failover policy updated"
        );
        *config = candidate;
        Ok(())
    }

    fn apply_failover(&self, failover: &FailoverConfig) {
        self.failover.set_config(failover.clone());
        self.health.set_triggers(failover.triggers.clone());
    }

    /// Register or replace the deploy adapter of one provider
    pub fn register_adapter(&self, provider: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.write().insert(provider.into(), adapter);
    }

    /// Remove a resource record
    pub fn teardown(&self, resource_id: &str) -> Result<Resource, RegistryError> {
        let resource = self.resources.remove(resource_id)?;
        tracing::info!(resource = %resource_id, provider = %resource.provider, "Resource torn down");
        Ok(resource)
    }

    /// Resources tagged with a deployment id
    pub fn deployment_resources(&self, deployment_id: &str) -> Vec<Resource> {
        self.resources
            .all()
            .into_iter()
            .filter(|r| r.tags.get("deployment-id").map(String::as_str) == Some(deployment_id))
            .collect()
    }

    /// Current configuration
    pub fn config(&self) -> ControlPlaneConfig {
        self.config.read().clone()
    }

    /// Provider registry
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Resource registry
    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    /// Event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Health monitor
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Failover controller
    pub fn failover(&self) -> &Arc<FailoverController> {
        &self.failover
    }

    /// Replication coordinator
    pub fn replication(&self) -> &Arc<ReplicationCoordinator> {
        &self.replication
    }

    /// Cost optimizer
    pub fn cost(&self) -> &Arc<CostOptimizer> {
        &self.cost
    }

    /// Compliance engine
    pub fn compliance(&self) -> &Arc<ComplianceEngine> {
        &self.compliance
    }

    /// Background task arena
    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }
}

async fn cost_pass(cost: &CostOptimizer, events: &EventBus) -> Result<OptimizationReport, CostError> {
    let report = cost.optimize().await?;
    events.publish(CostOptimized {
        realized_savings: report.savings,
        recommendations: report.recommendations.len(),
        implemented: report.implemented.len(),
        timestamp: report.optimized_at,
    });
    Ok(report)
}

async fn compliance_pass(compliance: &ComplianceEngine, events: &EventBus) -> ComplianceReport {
    let report = compliance.validate().await;
    events.publish(ComplianceValidated {
        score: report.score,
        compliant: report.compliant,
        violations: report.violations.len(),
        remediated: report.remediated,
        timestamp: report.validated_at,
    });
    report
}

//! Failover Orchestration
//!
//! A failover walks a fixed protocol:
//!
//! ```text
//! Idle → TargetSelection → HealthVerification → ReplicationAcceleration
//!      → TrafficMigration → ConnectionMigration → Verification → Succeeded | Failed
//! ```
//!
//! At most one failover runs per source provider. Every run, including a
//! rejected one, ends in a [`FailoverReport`]; nothing is rolled back once
//! traffic has moved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use cloudmesh_common::events::FailoverFinished;
use cloudmesh_common::{
    with_timeout, AdapterError, EventBus, FailoverTrigger, HealthProbe, ProbeSample, Provider, ProviderRegistry,
    ProviderSelector, ProviderStatus, ResourceRegistry,
};

use crate::health::{DegradationHandler, HealthThresholds};
use crate::replication::{Acceleration, ReplicationCoordinator};
use crate::traffic::{ConnectionTable, MigrationTally, RoutingTable};

/// Failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Master switch
    pub enabled: bool,
    /// Provider that normally serves traffic
    pub primary: String,
    /// Preferred secondary
    pub secondary: Option<String>,
    /// Recovery time objective, minutes
    pub rto_target_minutes: f64,
    /// Recovery point objective, minutes
    pub rpo_target_minutes: f64,
    /// Health check cadence
    pub health_check_interval_secs: u64,
    /// Fail back to the primary once it recovers
    pub auto_failback: bool,
    /// Triggers that start a failover
    pub triggers: BTreeSet<FailoverTrigger>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary: String::new(),
            secondary: None,
            rto_target_minutes: 15.0,
            rpo_target_minutes: 5.0,
            health_check_interval_secs: 30,
            auto_failback: false,
            triggers: FailoverTrigger::all().into_iter().collect(),
        }
    }
}

impl FailoverConfig {
    /// RTO target as a duration
    pub fn rto_target(&self) -> Duration {
        Duration::try_from_secs_f64(self.rto_target_minutes * 60.0).unwrap_or(Duration::ZERO)
    }

    /// Health check cadence
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Why a failover ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// Health trigger fired
    Trigger(FailoverTrigger),
    /// Operator request
    Manual(String),
    /// Returning to the recovered primary
    Failback,
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger(t) => write!(f, "{}", t),
            Self::Manual(note) if note.is_empty() => f.write_str("manual"),
            Self::Manual(note) => write!(f, "manual: {}", note),
            Self::Failback => f.write_str("failback"),
        }
    }
}

/// Protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPhase {
    /// Not started
    Idle,
    /// Choosing the target
    TargetSelection,
    /// Probing the target
    HealthVerification,
    /// Speeding up replication into the target
    ReplicationAcceleration,
    /// Moving traffic and resources
    TrafficMigration,
    /// Moving client connections
    ConnectionMigration,
    /// Checking the result
    Verification,
    /// Verified within the RTO target
    Succeeded,
    /// Anything else
    Failed,
}

/// Why a failover was refused before traffic moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Failover disabled in configuration
    Disabled,
    /// No provider is serving traffic and no primary is configured
    NoSource,
    /// Another failover from the same source is running
    AlreadyInProgress,
    /// No active/standby provider satisfies the source's tier
    NoEligibleTarget,
    /// Requested target is not configured
    UnknownTarget(String),
    /// Requested target is the source or not active/standby
    TargetIneligible(String),
    /// Target failed its health probe
    TargetUnhealthy(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("failover disabled"),
            Self::NoSource => f.write_str("no provider is serving traffic"),
            Self::AlreadyInProgress => f.write_str("failover already in progress"),
            Self::NoEligibleTarget => f.write_str("no eligible target"),
            Self::UnknownTarget(t) => write!(f, "unknown target {}", t),
            Self::TargetIneligible(t) => write!(f, "target {} is not eligible", t),
            Self::TargetUnhealthy(why) => write!(f, "target unhealthy: {}", why),
        }
    }
}

/// Terminal result of a failover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverOutcome {
    /// Verified within the RTO target
    Succeeded,
    /// Refused before traffic moved
    Rejected(RejectReason),
    /// Traffic moved but the target did not verify
    VerificationFailed(String),
    /// Verified but the RTO target was exceeded
    OverBudget,
}

impl FailoverOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Rejected(_) => "rejected",
            Self::VerificationFailed(_) => "verification_failed",
            Self::OverBudget => "over_budget",
        }
    }
}

/// One completed phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverStep {
    /// Phase
    pub phase: FailoverPhase,
    /// Time spent
    pub duration_ms: u64,
    /// Phase succeeded
    pub success: bool,
    /// Detail
    pub detail: Option<String>,
}

/// Structured result of a failover run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverReport {
    /// Failover id
    pub id: Uuid,
    /// Why it ran
    pub reason: FailoverReason,
    /// Source provider
    pub source: String,
    /// Target, when one was chosen
    pub target: Option<String>,
    /// Outcome is `Succeeded`
    pub success: bool,
    /// Outcome
    pub outcome: FailoverOutcome,
    /// Elapsed time, minutes
    pub rto_minutes: f64,
    /// RTO target in force
    pub rto_target_minutes: f64,
    /// Resources re-homed onto the target
    pub migrated_resources: Vec<String>,
    /// Connection migration tally
    pub connections: MigrationTally,
    /// Largest replication lag at acceleration, minutes
    pub estimated_data_loss_minutes: Option<f64>,
    /// Estimated data loss within the RPO target
    pub rpo_met: bool,
    /// Completed phases
    pub steps: Vec<FailoverStep>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub completed_at: DateTime<Utc>,
}

impl FailoverReport {
    /// Whether the run completed `phase`
    pub fn reached(&self, phase: FailoverPhase) -> bool {
        self.steps.iter().any(|s| s.phase == phase)
    }
}

/// In-flight failover
#[derive(Debug, Clone)]
pub struct ActiveFailover {
    /// Failover id
    pub id: Uuid,
    /// Current phase
    pub phase: FailoverPhase,
    /// Start time
    pub started_at: DateTime<Utc>,
}

/// Releases the per-source claim however the run ends
struct InFlight<'a> {
    active: &'a DashMap<String, ActiveFailover>,
    source: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.source);
    }
}

struct Run {
    id: Uuid,
    reason: FailoverReason,
    source: String,
    target: Option<String>,
    started: Instant,
    started_at: DateTime<Utc>,
    elapsed: Option<Duration>,
    steps: Vec<FailoverStep>,
    accelerated: Vec<Acceleration>,
    data_loss_minutes: Option<f64>,
    migrated: Vec<String>,
    connections: MigrationTally,
}

impl Run {
    fn new(source: &str, reason: FailoverReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason,
            source: source.to_string(),
            target: None,
            started: Instant::now(),
            started_at: Utc::now(),
            elapsed: None,
            steps: Vec::new(),
            accelerated: Vec::new(),
            data_loss_minutes: None,
            migrated: Vec::new(),
            connections: MigrationTally::default(),
        }
    }

    fn step(&mut self, phase: FailoverPhase, since: Instant, success: bool, detail: Option<String>) {
        tracing::info!(failover = %self.id, phase = ?phase, success, "Failover step");
        self.steps.push(FailoverStep {
            phase,
            duration_ms: since.elapsed().as_millis() as u64,
            success,
            detail,
        });
    }
}

/// Executes the failover protocol
pub struct FailoverController {
    config: RwLock<FailoverConfig>,
    providers: Arc<ProviderRegistry>,
    resources: Arc<ResourceRegistry>,
    replication: Arc<ReplicationCoordinator>,
    probe: Arc<dyn HealthProbe>,
    thresholds: HealthThresholds,
    selector: ProviderSelector,
    routes: Arc<RoutingTable>,
    connections: Arc<ConnectionTable>,
    events: EventBus,
    active: DashMap<String, ActiveFailover>,
    history: RwLock<Vec<FailoverReport>>,
}

impl FailoverController {
    /// Controller routing initially to `config.primary`
    pub fn new(
        config: FailoverConfig,
        providers: Arc<ProviderRegistry>,
        resources: Arc<ResourceRegistry>,
        replication: Arc<ReplicationCoordinator>,
        probe: Arc<dyn HealthProbe>,
        thresholds: HealthThresholds,
        events: EventBus,
    ) -> Self {
        let initial = Some(config.primary.clone()).filter(|p| !p.is_empty());
        Self {
            config: RwLock::new(config),
            providers,
            resources,
            replication,
            probe,
            thresholds,
            selector: ProviderSelector::new(),
            routes: Arc::new(RoutingTable::new(initial)),
            connections: Arc::new(ConnectionTable::new()),
            events,
            active: DashMap::new(),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Current configuration
    pub fn config(&self) -> FailoverConfig {
        self.config.read().clone()
    }

    /// Replace the configuration
    pub fn set_config(&self, config: FailoverConfig) {
        *self.config.write() = config;
    }

    /// Routing table
    pub fn routes(&self) -> Arc<RoutingTable> {
        self.routes.clone()
    }

    /// Connection table
    pub fn connections(&self) -> Arc<ConnectionTable> {
        self.connections.clone()
    }

    /// Phase of the failover running from `source`, if any
    pub fn active_phase(&self, source: &str) -> Option<FailoverPhase> {
        self.active.get(source).map(|a| a.phase)
    }

    /// All reports, oldest first
    pub fn history(&self) -> Vec<FailoverReport> {
        self.history.read().clone()
    }

    /// Most recent report
    pub fn last_report(&self) -> Option<FailoverReport> {
        self.history.read().last().cloned()
    }

    /// Fail over away from the provider currently receiving traffic
    pub async fn execute_failover(&self, reason: FailoverReason, target: Option<&str>) -> FailoverReport {
        let source = self
            .routes
            .active()
            .unwrap_or_else(|| self.config.read().primary.clone());
        if source.is_empty() {
            let config = self.config();
            let run = Run::new(&source, reason);
            tracing::warn!(failover = %run.id, reason = %run.reason, "Failover requested with no serving provider");
            return self.finish(run, &config, FailoverOutcome::Rejected(RejectReason::NoSource));
        }
        self.failover_from(&source, reason, target).await
    }

    /// Fail over away from `source`
    pub async fn failover_from(&self, source: &str, reason: FailoverReason, target: Option<&str>) -> FailoverReport {
        let config = self.config();
        let mut run = Run::new(source, reason);
        tracing::warn!(failover = %run.id, source = %source, reason = %run.reason, "Executing failover");

        if !config.enabled {
            return self.finish(run, &config, FailoverOutcome::Rejected(RejectReason::Disabled));
        }

        let claimed = match self.active.entry(source.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ActiveFailover {
                    id: run.id,
                    phase: FailoverPhase::Idle,
                    started_at: run.started_at,
                });
                true
            }
        };
        if !claimed {
            return self.finish(run, &config, FailoverOutcome::Rejected(RejectReason::AlreadyInProgress));
        }
        let _claim = InFlight {
            active: &self.active,
            source: source.to_string(),
        };

        let outcome = self.run_protocol(&mut run, &config, target).await;

        for acc in &run.accelerated {
            if let Err(e) = self.replication.restore(acc.job_id) {
                tracing::warn!(job = %acc.job_id, error = %e, "Could not restore replication baseline");
            }
        }
        self.finish(run, &config, outcome)
    }

    fn enter(&self, source: &str, phase: FailoverPhase) {
        if let Some(mut active) = self.active.get_mut(source) {
            active.phase = phase;
        }
    }

    async fn run_protocol(&self, run: &mut Run, config: &FailoverConfig, requested: Option<&str>) -> FailoverOutcome {
        let source = run.source.clone();

        // Target selection
        self.enter(&source, FailoverPhase::TargetSelection);
        let since = Instant::now();
        let target = match self.choose_target(&source, requested) {
            Ok(t) => t,
            Err(reason) => {
                run.step(FailoverPhase::TargetSelection, since, false, Some(reason.to_string()));
                return FailoverOutcome::Rejected(reason);
            }
        };
        run.target = Some(target.clone());
        run.step(FailoverPhase::TargetSelection, since, true, Some(target.clone()));

        // Target health
        self.enter(&source, FailoverPhase::HealthVerification);
        let since = Instant::now();
        if let Err(why) = self.verify_target(&target, &config.triggers).await {
            run.step(FailoverPhase::HealthVerification, since, false, Some(why.clone()));
            return FailoverOutcome::Rejected(RejectReason::TargetUnhealthy(why));
        }
        run.step(FailoverPhase::HealthVerification, since, true, None);

        // Replication
        self.enter(&source, FailoverPhase::ReplicationAcceleration);
        let since = Instant::now();
        run.accelerated = self.replication.accelerate_target(&target);
        run.data_loss_minutes = run
            .accelerated
            .iter()
            .map(|a| a.lag_before.as_secs_f64() / 60.0)
            .fold(None, |max: Option<f64>, lag| Some(max.map_or(lag, |m| m.max(lag))));
        let detail = format!("{} jobs accelerated", run.accelerated.len());
        run.step(FailoverPhase::ReplicationAcceleration, since, true, Some(detail));

        // Traffic
        self.enter(&source, FailoverPhase::TrafficMigration);
        let since = Instant::now();
        self.routes.redirect(&source, &target);
        if self.providers.status(&source) == Some(ProviderStatus::Active) {
            if let Err(e) = self.providers.set_status(&source, ProviderStatus::Standby) {
                tracing::warn!(provider = %source, error = %e, "Could not demote source");
            }
        }
        if self.providers.status(&target) == Some(ProviderStatus::Standby) {
            if let Err(e) = self.providers.set_status(&target, ProviderStatus::Active) {
                tracing::warn!(provider = %target, error = %e, "Could not promote target");
            }
        }
        run.migrated = match run.reason {
            FailoverReason::Failback => self.resources.return_home(&source, &target),
            _ => self.resources.reassign(&source, &target),
        };
        let detail = format!("{} resources re-homed", run.migrated.len());
        run.step(FailoverPhase::TrafficMigration, since, true, Some(detail));

        // Connections
        self.enter(&source, FailoverPhase::ConnectionMigration);
        let since = Instant::now();
        run.connections = self.connections.migrate(&source, &target);
        let detail = format!("{} migrated, {} dropped", run.connections.migrated, run.connections.dropped);
        run.step(FailoverPhase::ConnectionMigration, since, true, Some(detail));

        // Verification
        self.enter(&source, FailoverPhase::Verification);
        let since = Instant::now();
        let verdict = self.reach_target(&target).await.and_then(|_| {
            let stray = run
                .migrated
                .iter()
                .filter(|id| self.resources.get(id).map(|r| r.provider != target).unwrap_or(true))
                .count();
            if stray == 0 {
                Ok(())
            } else {
                Err(format!("{} resources not on target", stray))
            }
        });
        let elapsed = run.started.elapsed();
        run.elapsed = Some(elapsed);

        match verdict {
            Err(why) => {
                run.step(FailoverPhase::Verification, since, false, Some(why.clone()));
                FailoverOutcome::VerificationFailed(why)
            }
            Ok(()) => {
                run.step(FailoverPhase::Verification, since, true, None);
                if elapsed < config.rto_target() {
                    FailoverOutcome::Succeeded
                } else {
                    FailoverOutcome::OverBudget
                }
            }
        }
    }

    fn choose_target(&self, source: &str, requested: Option<&str>) -> Result<String, RejectReason> {
        let snapshot = self.providers.snapshot();
        match requested {
            Some(name) => {
                let provider = snapshot
                    .iter()
                    .find(|p| p.name == name)
                    .ok_or_else(|| RejectReason::UnknownTarget(name.to_string()))?;
                let required = snapshot.iter().find(|p| p.name == source).map(|p| p.compliance);
                let eligible = provider.name != source
                    && matches!(provider.status, ProviderStatus::Active | ProviderStatus::Standby)
                    && required.map_or(true, |tier| provider.satisfies(tier));
                if eligible {
                    Ok(provider.name.clone())
                } else {
                    Err(RejectReason::TargetIneligible(name.to_string()))
                }
            }
            None => self
                .selector
                .select_failover_target(&snapshot, source)
                .map(|r| r.provider.name)
                .ok_or(RejectReason::NoEligibleTarget),
        }
    }

    /// Probe the target; an error or timeout means it is unreachable
    async fn reach_target(&self, target: &str) -> Result<(Provider, ProbeSample), String> {
        let provider = self
            .providers
            .get(target)
            .ok_or_else(|| format!("{} not configured", target))?;
        let sample = with_timeout(self.thresholds.probe_timeout(), self.probe.probe(&provider))
            .await
            .map_err(|e| e.to_string())?;
        Ok((provider, sample))
    }

    /// Pre-flight check of the target against the armed triggers.
    ///
    /// Runs before any resource moves, so cost is judged on the target's own spend.
    async fn verify_target(&self, target: &str, armed: &BTreeSet<FailoverTrigger>) -> Result<(), String> {
        let (provider, sample) = self.reach_target(target).await?;
        let spend = self.resources.monthly_spend(target);
        let fired: Vec<_> = self
            .thresholds
            .exceeded(&provider, &Ok::<_, AdapterError>(sample), spend)
            .into_iter()
            .filter(|t| armed.contains(t))
            .collect();
        if fired.is_empty() {
            Ok(())
        } else {
            Err(format!("thresholds exceeded: {:?}", fired))
        }
    }

    fn finish(&self, mut run: Run, config: &FailoverConfig, outcome: FailoverOutcome) -> FailoverReport {
        let elapsed = run.elapsed.unwrap_or_else(|| run.started.elapsed());
        let success = outcome == FailoverOutcome::Succeeded;
        let final_phase = if success { FailoverPhase::Succeeded } else { FailoverPhase::Failed };
        run.step(final_phase, Instant::now(), success, None);

        let rto_minutes = elapsed.as_secs_f64() / 60.0;
        let rpo_met = run
            .data_loss_minutes
            .map(|loss| loss <= config.rpo_target_minutes)
            .unwrap_or(false);

        let report = FailoverReport {
            id: run.id,
            reason: run.reason,
            source: run.source,
            target: run.target,
            success,
            outcome,
            rto_minutes,
            rto_target_minutes: config.rto_target_minutes,
            migrated_resources: run.migrated,
            connections: run.connections,
            estimated_data_loss_minutes: run.data_loss_minutes,
            rpo_met,
            steps: run.steps,
            started_at: run.started_at,
            completed_at: Utc::now(),
        };

        if success {
            tracing::info!(
                failover = %report.id, source = %report.source, target = ?report.target,
                rto_minutes, "Failover succeeded"
            );
        } else {
            tracing::error!(
                failover = %report.id, source = %report.source, target = ?report.target,
                outcome = report.outcome.label(), rto_minutes, "Failover did not succeed"
            );
        }

        metrics::counter!("cloudmesh_failovers_total", "outcome" => report.outcome.label()).increment(1);
        metrics::histogram!("cloudmesh_failover_duration_seconds").record(elapsed.as_secs_f64());

        self.events.publish(FailoverFinished {
            failover_id: report.id.to_string(),
            reason: report.reason.to_string(),
            source: report.source.clone(),
            target: report.target.clone(),
            rto_minutes,
            success,
            migrated_resources: report.migrated_resources.len(),
            estimated_data_loss_minutes: report.estimated_data_loss_minutes,
            timestamp: report.completed_at,
        });

        self.history.write().push(report.clone());
        report
    }
}

#[async_trait]
impl DegradationHandler for FailoverController {
    async fn handle_degradation(&self, provider: &str, trigger: FailoverTrigger) {
        let config = self.config();
        if !config.enabled || !config.triggers.contains(&trigger) {
            tracing::debug!(provider = %provider, trigger = %trigger, "Trigger not armed for failover");
            return;
        }

        let serving = self.routes.active().as_deref() == Some(provider);
        if !serving && self.resources.by_provider(provider).is_empty() {
            tracing::debug!(provider = %provider, "Degraded provider hosts nothing; no failover");
            return;
        }

        self.failover_from(provider, FailoverReason::Trigger(trigger), None).await;
    }

    async fn handle_recovery(&self, provider: &str) {
        let config = self.config();
        if !config.auto_failback || provider != config.primary {
            return;
        }

        match self.routes.active() {
            Some(current) if current != provider => {
                tracing::info!(primary = %provider, current = %current, "Primary recovered; failing back");
                self.failover_from(&current, FailoverReason::Failback, Some(provider)).await;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::tests::ScriptedProbe;
    use crate::replication::ReplicationSettings;
    use cloudmesh_common::{BackupPolicy, ComplianceTier, Resource, ResourceCost, ResourceKind};
    use std::collections::HashMap;

    struct Fixture {
        providers: Arc<ProviderRegistry>,
        resources: Arc<ResourceRegistry>,
        replication: Arc<ReplicationCoordinator>,
        probe: Arc<ScriptedProbe>,
        events: EventBus,
        controller: FailoverController,
    }

    fn resource(id: &str, provider: &str) -> Resource {
        Resource {
            id: id.into(),
            kind: ResourceKind::Database,
            provider: provider.into(),
            region: "us-east-1".into(),
            specs: HashMap::new(),
            cost: ResourceCost::from_hourly(0.5),
            tags: HashMap::new(),
            backup: BackupPolicy::default(),
            created_at: Utc::now(),
        }
    }

    fn fixture(config: FailoverConfig) -> Fixture {
        let providers = Arc::new(
            ProviderRegistry::with_providers(vec![
                Provider::new("aws", "us-east-1", 1, 5000.0, ComplianceTier::All),
                Provider::new("gcp", "us-central1", 2, 4000.0, ComplianceTier::All)
                    .with_status(ProviderStatus::Standby),
                Provider::new("azure", "eastus", 3, 6000.0, ComplianceTier::Soc2),
            ])
            .unwrap(),
        );
        let resources = Arc::new(ResourceRegistry::new());
        resources.record(resource("db-1", "aws"), &providers).unwrap();
        resources.record(resource("db-2", "aws"), &providers).unwrap();

        let replication = Arc::new(ReplicationCoordinator::new(10_000, Duration::from_secs(5)));
        let probe = Arc::new(ScriptedProbe::default());
        let events = EventBus::default();
        let controller = FailoverController::new(
            config,
            providers.clone(),
            resources.clone(),
            replication.clone(),
            probe.clone(),
            HealthThresholds::default(),
            events.clone(),
        );

        Fixture {
            providers,
            resources,
            replication,
            probe,
            events,
            controller,
        }
    }

    fn config() -> FailoverConfig {
        FailoverConfig {
            primary: "aws".into(),
            secondary: Some("gcp".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_degradation_fails_over_to_standby() {
        let fx = fixture(config());
        let job = fx
            .replication
            .create_job("aws", "gcp", ReplicationSettings::default())
            .await
            .unwrap();
        fx.replication
            .record_sync(job.id, Utc::now() - chrono::Duration::minutes(2))
            .unwrap();
        fx.controller.connections().open("aws", true);
        fx.controller.connections().open("aws", false);
        let mut finished = fx.events.subscribe::<FailoverFinished>();

        fx.providers.set_status("aws", ProviderStatus::Degraded).unwrap();
        fx.controller.handle_degradation("aws", FailoverTrigger::Latency).await;

        let report = fx.controller.last_report().unwrap();
        assert!(report.success, "{:?}", report.outcome);
        assert_eq!(report.reason, FailoverReason::Trigger(FailoverTrigger::Latency));
        assert_eq!(report.target.as_deref(), Some("gcp"));
        assert_eq!(report.migrated_resources, vec!["db-1", "db-2"]);
        assert_eq!(report.connections, MigrationTally { migrated: 1, dropped: 1 });

        let loss = report.estimated_data_loss_minutes.unwrap();
        assert!((1.9..2.5).contains(&loss));
        assert!(report.rpo_met);

        let phases: Vec<_> = report.steps.iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            vec![
                FailoverPhase::TargetSelection,
                FailoverPhase::HealthVerification,
                FailoverPhase::ReplicationAcceleration,
                FailoverPhase::TrafficMigration,
                FailoverPhase::ConnectionMigration,
                FailoverPhase::Verification,
                FailoverPhase::Succeeded,
            ]
        );

        assert_eq!(fx.controller.routes().active().as_deref(), Some("gcp"));
        assert_eq!(fx.providers.status("gcp"), Some(ProviderStatus::Active));
        assert_eq!(fx.providers.status("aws"), Some(ProviderStatus::Degraded));
        assert_eq!(fx.resources.by_provider("gcp").len(), 2);
        assert!(!fx.replication.get(job.id).unwrap().is_accelerated());
        assert!(fx.controller.active_phase("aws").is_none());

        let event = finished.recv().await.unwrap();
        assert!(event.success);
        assert_eq!(event.reason, "latency");
        assert_eq!(event.migrated_resources, 2);
    }

    #[tokio::test]
    async fn test_unhealthy_target_rejects_before_traffic_moves() {
        let fx = fixture(config());
        fx.probe.set("gcp", Err(AdapterError::Unavailable("502".into())));

        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual("drill".into()), Some("gcp"))
            .await;

        assert!(!report.success);
        assert!(matches!(
            report.outcome,
            FailoverOutcome::Rejected(RejectReason::TargetUnhealthy(_))
        ));
        assert!(!report.reached(FailoverPhase::TrafficMigration));
        assert_eq!(fx.controller.routes().active().as_deref(), Some("aws"));
        assert_eq!(fx.resources.by_provider("aws").len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_failovers_from_same_source() {
        let fx = fixture(config());
        fx.probe.set_delay(Duration::from_millis(50));

        let (a, b) = tokio::join!(
            fx.controller.failover_from("aws", FailoverReason::Manual(String::new()), None),
            fx.controller.failover_from("aws", FailoverReason::Manual(String::new()), None),
        );

        let reached = [&a, &b]
            .iter()
            .filter(|r| r.reached(FailoverPhase::TrafficMigration))
            .count();
        assert_eq!(reached, 1);

        let rejected = [&a, &b]
            .iter()
            .filter(|r| r.outcome == FailoverOutcome::Rejected(RejectReason::AlreadyInProgress))
            .count();
        assert_eq!(rejected, 1);
        assert_eq!(fx.controller.routes().switch_count(), 1);
        assert_eq!(fx.controller.history().len(), 2);
    }

    #[tokio::test]
    async fn test_over_budget_is_reported_not_rolled_back() {
        let fx = fixture(FailoverConfig {
            rto_target_minutes: 0.0005,
            ..config()
        });
        fx.probe.set_delay(Duration::from_millis(40));

        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual("slow".into()), None)
            .await;

        assert_eq!(report.outcome, FailoverOutcome::OverBudget);
        assert!(!report.success);
        assert!(report.rto_minutes >= report.rto_target_minutes);
        assert_eq!(fx.controller.routes().active().as_deref(), Some("gcp"));
        assert_eq!(fx.resources.by_provider("gcp").len(), 2);
    }

    #[tokio::test]
    async fn test_no_eligible_target() {
        let fx = fixture(config());
        fx.providers.set_status("gcp", ProviderStatus::Active).unwrap();
        fx.providers.set_status("gcp", ProviderStatus::Degraded).unwrap();

        // azure is only SOC2; aws needs every tier
        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual(String::new()), None)
            .await;
        assert_eq!(report.outcome, FailoverOutcome::Rejected(RejectReason::NoEligibleTarget));
        assert!(report.target.is_none());
        assert!(report.estimated_data_loss_minutes.is_none());
        assert!(!report.rpo_met);
    }

    #[tokio::test]
    async fn test_disabled_and_unarmed_trigger() {
        let fx = fixture(FailoverConfig {
            triggers: [FailoverTrigger::Availability].into_iter().collect(),
            ..config()
        });
        fx.controller.handle_degradation("aws", FailoverTrigger::Cost).await;
        assert!(fx.controller.last_report().is_none());

        fx.controller.set_config(FailoverConfig {
            enabled: false,
            ..config()
        });
        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual(String::new()), None)
            .await;
        assert_eq!(report.outcome, FailoverOutcome::Rejected(RejectReason::Disabled));
    }

    #[tokio::test]
    async fn test_failback_after_primary_recovers() {
        let fx = fixture(FailoverConfig {
            auto_failback: true,
            ..config()
        });
        fx.resources.record(resource("cache-1", "gcp"), &fx.providers).unwrap();

        fx.providers.set_status("aws", ProviderStatus::Degraded).unwrap();
        fx.controller
            .handle_degradation("aws", FailoverTrigger::Availability)
            .await;
        assert_eq!(fx.controller.routes().active().as_deref(), Some("gcp"));

        fx.providers.recover("aws", true).unwrap();
        fx.controller.handle_recovery("aws").await;

        let report = fx.controller.last_report().unwrap();
        assert!(report.success, "{:?}", report.outcome);
        assert_eq!(report.reason, FailoverReason::Failback);
        assert_eq!(report.migrated_resources, vec!["db-1", "db-2"]);
        assert_eq!(fx.controller.routes().active().as_deref(), Some("aws"));
        assert_eq!(fx.resources.get("cache-1").unwrap().provider, "gcp");
        assert_eq!(fx.providers.status("gcp"), Some(ProviderStatus::Standby));
    }

    #[tokio::test]
    async fn test_moved_spend_does_not_fail_verification() {
        let fx = fixture(config());
        let mut heavy = resource("warehouse-1", "aws");
        heavy.cost = ResourceCost::from_hourly(10.0);
        fx.resources.record(heavy, &fx.providers).unwrap();
        assert!(fx.resources.monthly_spend("aws") > 4000.0);

        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual("region drill".into()), Some("gcp"))
            .await;

        assert_eq!(report.outcome, FailoverOutcome::Succeeded);
        assert!(report.success);
        assert_eq!(report.migrated_resources.len(), 3);
        assert!(fx.resources.monthly_spend("gcp") > 4000.0);
        assert_eq!(fx.controller.routes().active().as_deref(), Some("gcp"));
    }

    #[tokio::test]
    async fn test_target_checked_against_armed_triggers_only() {
        let fx = fixture(config());
        fx.probe.set("gcp", Ok(ProbeSample { current_spend: Some(4500.0), ..ProbeSample::healthy(20.0) }));

        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual(String::new()), Some("gcp"))
            .await;
        assert!(matches!(
            report.outcome,
            FailoverOutcome::Rejected(RejectReason::TargetUnhealthy(_))
        ));

        fx.controller.set_config(FailoverConfig {
            triggers: [FailoverTrigger::Availability, FailoverTrigger::Latency].into_iter().collect(),
            ..config()
        });
        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual(String::new()), Some("gcp"))
            .await;
        assert_eq!(report.outcome, FailoverOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_explicit_target_must_satisfy_source_tier() {
        let fx = fixture(config());

        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual(String::new()), Some("azure"))
            .await;

        assert_eq!(
            report.outcome,
            FailoverOutcome::Rejected(RejectReason::TargetIneligible("azure".into()))
        );
        assert!(!report.reached(FailoverPhase::TrafficMigration));
        assert_eq!(fx.controller.routes().active().as_deref(), Some("aws"));
        assert!(fx.resources.by_provider("azure").is_empty());
    }

    #[tokio::test]
    async fn test_no_serving_provider_is_rejected() {
        let fx = fixture(FailoverConfig::default());

        let report = fx
            .controller
            .execute_failover(FailoverReason::Manual(String::new()), None)
            .await;

        assert_eq!(report.outcome, FailoverOutcome::Rejected(RejectReason::NoSource));
        assert!(report.target.is_none());
        assert_eq!(fx.controller.routes().switch_count(), 0);
        assert_eq!(fx.controller.history().len(), 1);
    }
}

//! Provider health monitoring
//!
//! Each probe result is checked against the configured thresholds. A provider
//! that turns unhealthy while active is marked degraded and handed to the
//! registered [`DegradationHandler`]; one that keeps failing is escalated to
//! offline. A passing probe on a degraded or offline provider recovers it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cloudmesh_common::events::{ProviderDegraded, ProviderRecovered};
use cloudmesh_common::{
    with_timeout, AdapterError, BackgroundTasks, EventBus, FailoverTrigger, HealthProbe, ProbeSample, Provider,
    ProviderRegistry, ProviderStatus, ResourceRegistry,
};

use crate::HealthError;

/// Reacts to provider degradation and recovery
#[async_trait]
pub trait DegradationHandler: Send + Sync {
    /// A provider went unhealthy while active
    async fn handle_degradation(&self, provider: &str, trigger: FailoverTrigger);

    /// A degraded/offline provider passed a probe again
    async fn handle_recovery(&self, provider: &str);
}

/// Health thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Latency above this fires the latency trigger
    pub max_latency_ms: f64,
    /// Availability percent below this fires the availability trigger
    pub min_availability: f64,
    /// Consecutive failures before an active provider is degraded
    pub failure_threshold: u32,
    /// Consecutive failures before a degraded provider goes offline
    pub offline_threshold: u32,
    /// Deadline for a single probe
    pub probe_timeout_ms: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_latency_ms: 500.0,
            min_availability: 99.0,
            failure_threshold: 1,
            offline_threshold: 3,
            probe_timeout_ms: 5_000,
        }
    }
}

impl HealthThresholds {
    /// Probe deadline
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Triggers exceeded by a probe result, in trigger order
    pub fn exceeded(&self, provider: &Provider, sample: &Result<ProbeSample, AdapterError>, spend: f64) -> Vec<FailoverTrigger> {
        let sample = match sample {
            Ok(s) => s,
            Err(_) => return vec![FailoverTrigger::Availability],
        };

        let mut fired = Vec::new();
        if sample.latency_ms > self.max_latency_ms {
            fired.push(FailoverTrigger::Latency);
        }
        if sample.availability < self.min_availability {
            fired.push(FailoverTrigger::Availability);
        }
        if sample.current_spend.unwrap_or(spend) > provider.cost_budget {
            fired.push(FailoverTrigger::Cost);
        }
        if sample.compliance_drift {
            fired.push(FailoverTrigger::Compliance);
        }
        fired
    }
}

/// Verdict of one health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Provider name
    pub provider: String,
    /// No configured trigger fired and the probe answered
    pub healthy: bool,
    /// Latency, if the probe answered
    pub latency_ms: Option<f64>,
    /// Availability percent (0 when the probe failed)
    pub availability: f64,
    /// Configured triggers that fired
    pub triggers: Vec<FailoverTrigger>,
    /// Probe error
    pub error: Option<String>,
    /// When
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Trigger reported as the degradation reason
    pub fn reason(&self) -> Option<FailoverTrigger> {
        self.triggers.first().copied()
    }
}

/// Running health state of one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Consecutive unhealthy checks
    pub consecutive_failures: u32,
    /// Last report
    pub last_report: Option<HealthReport>,
    /// Last healthy check
    pub last_healthy: Option<DateTime<Utc>>,
}

enum Transition {
    None,
    Degrade,
    Offline,
    Recover,
}

/// Probes providers and drives status transitions
pub struct HealthMonitor {
    providers: Arc<ProviderRegistry>,
    resources: Arc<ResourceRegistry>,
    probe: Arc<dyn HealthProbe>,
    thresholds: HealthThresholds,
    triggers: RwLock<BTreeSet<FailoverTrigger>>,
    state: DashMap<String, ProviderHealth>,
    handler: RwLock<Option<Arc<dyn DegradationHandler>>>,
    events: EventBus,
    watched: DashMap<String, ()>,
}

impl HealthMonitor {
    /// Monitor that counts every trigger
    pub fn new(
        providers: Arc<ProviderRegistry>,
        resources: Arc<ResourceRegistry>,
        probe: Arc<dyn HealthProbe>,
        thresholds: HealthThresholds,
        events: EventBus,
    ) -> Self {
        Self {
            providers,
            resources,
            probe,
            thresholds,
            triggers: RwLock::new(FailoverTrigger::all().into_iter().collect()),
            state: DashMap::new(),
            handler: RwLock::new(None),
            events,
            watched: DashMap::new(),
        }
    }

    /// Builder: restrict the triggers that count toward an unhealthy verdict
    pub fn with_triggers(self, triggers: BTreeSet<FailoverTrigger>) -> Self {
        self.set_triggers(triggers);
        self
    }

    /// Replace the triggers that count toward an unhealthy verdict
    pub fn set_triggers(&self, triggers: BTreeSet<FailoverTrigger>) {
        *self.triggers.write() = triggers;
    }

    /// Triggers that count toward an unhealthy verdict
    pub fn triggers(&self) -> BTreeSet<FailoverTrigger> {
        self.triggers.read().clone()
    }

    /// Register the degradation handler
    pub fn set_handler(&self, handler: Arc<dyn DegradationHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Thresholds in use
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Single probe under the configured deadline, no state change
    pub async fn sample(&self, name: &str) -> Result<ProbeSample, HealthError> {
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| HealthError::UnknownProvider(name.to_string()))?;
        with_timeout(self.thresholds.probe_timeout(), self.probe.probe(&provider))
            .await
            .map_err(|e| HealthError::Probe(name.to_string(), e))
    }

    /// Evaluate a probe result against thresholds and the trigger set
    pub fn evaluate(&self, provider: &Provider, sample: &Result<ProbeSample, AdapterError>) -> HealthReport {
        let spend = self.resources.monthly_spend(&provider.name);
        let armed = self.triggers.read().clone();
        let triggers: Vec<_> = self
            .thresholds
            .exceeded(provider, sample, spend)
            .into_iter()
            .filter(|t| armed.contains(t))
            .collect();

        let (latency_ms, availability, error) = match sample {
            Ok(s) => (Some(s.latency_ms), s.availability, None),
            Err(e) => (None, 0.0, Some(e.to_string())),
        };

        HealthReport {
            provider: provider.name.clone(),
            healthy: sample.is_ok() && triggers.is_empty(),
            latency_ms,
            availability,
            triggers,
            error,
            checked_at: Utc::now(),
        }
    }

    /// Probe one provider, record the verdict and apply status transitions
    pub async fn check_provider(&self, name: &str) -> Result<HealthReport, HealthError> {
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| HealthError::UnknownProvider(name.to_string()))?;

        let sample = with_timeout(self.thresholds.probe_timeout(), self.probe.probe(&provider)).await;
        let report = self.evaluate(&provider, &sample);

        let transition = {
            let mut state = self.state.entry(name.to_string()).or_default();
            state.last_report = Some(report.clone());

            if report.healthy {
                state.consecutive_failures = 0;
                state.last_healthy = Some(report.checked_at);
                match provider.status {
                    ProviderStatus::Degraded | ProviderStatus::Offline => Transition::Recover,
                    _ => Transition::None,
                }
            } else {
                state.consecutive_failures += 1;
                let failures = state.consecutive_failures;
                match provider.status {
                    ProviderStatus::Active if failures >= self.thresholds.failure_threshold => Transition::Degrade,
                    ProviderStatus::Degraded if failures >= self.thresholds.offline_threshold => Transition::Offline,
                    _ => Transition::None,
                }
            }
        };

        metrics::counter!("cloudmesh_health_checks_total", "provider" => name.to_string(), "healthy" => report.healthy.to_string())
            .increment(1);

        match transition {
            Transition::None => {
                tracing::debug!(provider = %name, healthy = report.healthy, "Health check");
            }
            Transition::Degrade => self.on_degraded(name, &report).await,
            Transition::Offline => {
                tracing::error!(provider = %name, "Provider offline after repeated failures");
                if let Err(e) = self.providers.set_status(name, ProviderStatus::Offline) {
                    tracing::warn!(provider = %name, error = %e, "Offline transition refused");
                }
            }
            Transition::Recover => self.on_recovered(name).await,
        }

        Ok(report)
    }

    async fn on_degraded(&self, name: &str, report: &HealthReport) {
        tracing::warn!(
            provider = %name, triggers = ?report.triggers, latency_ms = ?report.latency_ms,
            availability = report.availability, "Provider degraded"
        );
        if let Err(e) = self.providers.set_status(name, ProviderStatus::Degraded) {
            tracing::warn!(provider = %name, error = %e, "Degraded transition refused");
            return;
        }

        self.events.publish(ProviderDegraded {
            provider: name.to_string(),
            triggers: report.triggers.clone(),
            latency_ms: report.latency_ms,
            availability: report.availability,
            timestamp: Utc::now(),
        });

        let handler = self.handler.read().clone();
        if let (Some(handler), Some(trigger)) = (handler, report.reason()) {
            handler.handle_degradation(name, trigger).await;
        }
    }

    async fn on_recovered(&self, name: &str) {
        if let Err(e) = self.providers.recover(name, true) {
            tracing::warn!(provider = %name, error = %e, "Recovery refused");
            return;
        }

        self.events.publish(ProviderRecovered {
            provider: name.to_string(),
            timestamp: Utc::now(),
        });

        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler.handle_recovery(name).await;
        }
    }

    /// Health state of one provider
    pub fn health(&self, name: &str) -> Option<ProviderHealth> {
        self.state.get(name).map(|s| s.value().clone())
    }

    /// Start one periodic check per registered provider.
    ///
    /// Providers that already have a timer are skipped, so calling this again
    /// after a reconfiguration only adds timers for new providers. A timer
    /// whose provider was removed goes quiet.
    pub fn start(self: &Arc<Self>, interval: Duration, tasks: &BackgroundTasks) {
        for name in self.providers.names() {
            if self.watched.insert(name.clone(), ()).is_some() {
                continue;
            }

            let monitor = self.clone();
            tasks.spawn_periodic(format!("health:{}", name), interval, move || {
                let monitor = monitor.clone();
                let name = name.clone();
                async move {
                    if monitor.providers.get(&name).is_none() {
                        tracing::debug!(provider = %name, "Provider no longer configured; skipping probe");
                        return Ok(());
                    }
                    monitor.check_provider(&name).await.map(|_| ())
                }
            });
        }
        tracing::info!(providers = self.watched.len(), interval_secs = interval.as_secs(), "Health monitor started");
    }
}

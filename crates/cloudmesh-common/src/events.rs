//! Typed control plane events
//!
//! Each event kind has its own broadcast channel. Consumers subscribe to the
//! kinds they care about; there is no wildcard subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::provider::FailoverTrigger;

/// Event kinds carried by the bus
pub trait ControlPlaneEvent: Clone + Send + 'static {
    /// Stable event name
    const KIND: &'static str;

    /// Channel for this kind
    fn channel(bus: &EventBus) -> &broadcast::Sender<Self>;
}

/// A multi-provider deployment finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentCompleted {
    /// Correlation token
    pub deployment_id: String,
    /// Created resource ids
    pub resources: Vec<String>,
    /// Providers that received a resource
    pub providers: Vec<String>,
    /// Providers that failed
    pub failed_providers: Vec<String>,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// A provider turned unhealthy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDegraded {
    /// Provider name
    pub provider: String,
    /// Triggers that fired
    pub triggers: Vec<FailoverTrigger>,
    /// Last latency, if the probe answered
    pub latency_ms: Option<f64>,
    /// Last availability percent
    pub availability: f64,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// A degraded/offline provider passed a probe again
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecovered {
    /// Provider name
    pub provider: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// A failover reached a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverFinished {
    /// Failover id
    pub failover_id: String,
    /// Why it ran
    pub reason: String,
    /// Failing provider
    pub source: String,
    /// Selected target, if one was found
    pub target: Option<String>,
    /// Elapsed time in minutes
    pub rto_minutes: f64,
    /// Succeeded within the RTO target
    pub success: bool,
    /// Resources re-homed onto the target
    pub migrated_resources: usize,
    /// Estimated data loss in minutes, when replication was in place
    pub estimated_data_loss_minutes: Option<f64>,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// A cost optimization pass finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostOptimized {
    /// Savings realized by auto-applied recommendations (monthly)
    pub realized_savings: f64,
    /// Recommendations produced
    pub recommendations: usize,
    /// Recommendations applied automatically
    pub implemented: usize,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// A compliance validation finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceValidated {
    /// Score 0-100
    pub score: u8,
    /// Score >= 95
    pub compliant: bool,
    /// Violations found
    pub violations: usize,
    /// Violations remediated
    pub remediated: usize,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// Event bus with one channel per event kind
#[derive(Debug, Clone)]
pub struct EventBus {
    deployments: broadcast::Sender<DeploymentCompleted>,
    degradations: broadcast::Sender<ProviderDegraded>,
    recoveries: broadcast::Sender<ProviderRecovered>,
    failovers: broadcast::Sender<FailoverFinished>,
    cost: broadcast::Sender<CostOptimized>,
    compliance: broadcast::Sender<ComplianceValidated>,
}

impl EventBus {
    /// Create bus; `capacity` is per channel
    pub fn new(capacity: usize) -> Self {
        Self {
            deployments: broadcast::channel(capacity).0,
            degradations: broadcast::channel(capacity).0,
            recoveries: broadcast::channel(capacity).0,
            failovers: broadcast::channel(capacity).0,
            cost: broadcast::channel(capacity).0,
            compliance: broadcast::channel(capacity).0,
        }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish<E: ControlPlaneEvent>(&self, event: E) {
        let receivers = E::channel(self).send(event).unwrap_or(0);
        tracing::debug!(kind = E::KIND, receivers, "Event published");
    }

    /// Subscribe to one event kind
    pub fn subscribe<E: ControlPlaneEvent>(&self) -> broadcast::Receiver<E> {
        E::channel(self).subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

macro_rules! event_kind {
    ($ty:ty, $field:ident, $kind:literal) => {
        impl ControlPlaneEvent for $ty {
            const KIND: &'static str = $kind;

            fn channel(bus: &EventBus) -> &broadcast::Sender<Self> {
                &bus.$field
            }
        }
    };
}

event_kind!(DeploymentCompleted, deployments, "deployment.completed");
event_kind!(ProviderDegraded, degradations, "provider.degraded");
event_kind!(ProviderRecovered, recoveries, "provider.recovered");
event_kind!(FailoverFinished, failovers, "failover.finished");
event_kind!(CostOptimized, cost, "cost.optimized");
event_kind!(ComplianceValidated, compliance, "compliance.validated");

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_only_see_their_kind() {
        let bus = EventBus::default();
        let mut failovers = bus.subscribe::<FailoverFinished>();
        let mut recoveries = bus.subscribe::<ProviderRecovered>();

        bus.publish(ProviderRecovered {
            provider: "aws".into(),
            timestamp: Utc::now(),
        });

        assert_eq!(recoveries.recv().await.unwrap().provider, "aws");
        assert!(matches!(
            failovers.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(CostOptimized {
            realized_savings: 0.0,
            recommendations: 0,
            implemented: 0,
            timestamp: Utc::now(),
        });
    }
}

//! Cloud Provider Definitions

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistryError;

/// A configured cloud provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    /// Unique provider name (e.g. `aws-primary`)
    pub name: String,
    /// Home region
    pub region: String,
    /// Opaque reference into the credential store; never the secret itself
    pub credential_ref: String,
    /// Priority rank, 1..=3, lower is preferred
    pub priority: u8,
    /// Current status
    #[serde(default)]
    pub status: ProviderStatus,
    /// Spend budget per billing period
    pub cost_budget: f64,
    /// Compliance tier the provider is certified for
    pub compliance: ComplianceTier,
}

impl Provider {
    /// Create an active provider
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        priority: u8,
        cost_budget: f64,
        compliance: ComplianceTier,
    ) -> Self {
        let name = name.into();
        Self {
            credential_ref: format!("secret://providers/{}", name),
            name,
            region: region.into(),
            priority,
            status: ProviderStatus::Active,
            cost_budget,
            compliance,
        }
    }

    /// Builder: set initial status
    pub fn with_status(mut self, status: ProviderStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder: set credential reference
    pub fn with_credentials(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = credential_ref.into();
        self
    }

    /// Validate static fields
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::InvalidProvider("empty provider name".into()));
        }
        if !(1..=3).contains(&self.priority) {
            return Err(RegistryError::InvalidProvider(format!(
                "{}: priority {} outside 1..=3",
                self.name, self.priority
            )));
        }
        if !(self.cost_budget.is_finite() && self.cost_budget > 0.0) {
            return Err(RegistryError::InvalidProvider(format!(
                "{}: cost budget must be positive",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether this provider can host a deployment requiring `required`
    pub fn satisfies(&self, required: ComplianceTier) -> bool {
        self.compliance.satisfies(required)
    }
}

/// Provider status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    /// Serving traffic
    #[default]
    Active,
    /// Warm spare
    Standby,
    /// Failing health checks
    Degraded,
    /// Considered down
    Offline,
}

impl ProviderStatus {
    /// Legal status edges.
    ///
    /// `Degraded -> Active` and `Offline -> Active` are listed here but the
    /// registry only takes them through `recover()`, which demands a passing
    /// health report.
    pub fn can_transition_to(self, next: ProviderStatus) -> bool {
        use ProviderStatus::*;
        matches!(
            (self, next),
            (Active, Degraded)
                | (Degraded, Active)
                | (Degraded, Offline)
                | (Offline, Active)
                | (Active, Standby)
                | (Standby, Active)
        )
    }

    /// Edges that need health evidence
    pub fn is_recovery(self, next: ProviderStatus) -> bool {
        matches!(
            (self, next),
            (ProviderStatus::Degraded, ProviderStatus::Active)
                | (ProviderStatus::Offline, ProviderStatus::Active)
        )
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Standby => "standby",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Compliance tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceTier {
    /// No certification beyond baseline
    Basic,
    /// SOC 2 Type II
    Soc2,
    /// GDPR
    Gdpr,
    /// HIPAA
    Hipaa,
    /// Certified for every tier
    All,
}

impl ComplianceTier {
    /// Placement score contribution (0-20)
    pub fn score(self) -> f64 {
        match self {
            Self::All => 20.0,
            Self::Hipaa => 18.0,
            Self::Gdpr => 16.0,
            Self::Soc2 => 14.0,
            Self::Basic => 10.0,
        }
    }

    /// A provider tier satisfies a required tier when they match, the
    /// provider is certified for everything, or nothing special is required.
    pub fn satisfies(self, required: ComplianceTier) -> bool {
        self == required || self == ComplianceTier::All || required == ComplianceTier::Basic
    }
}

impl fmt::Display for ComplianceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Basic => "basic",
            Self::Soc2 => "soc2",
            Self::Gdpr => "gdpr",
            Self::Hipaa => "hipaa",
            Self::All => "all",
        };
        f.write_str(s)
    }
}

/// Conditions that can trigger a failover
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FailoverTrigger {
    /// Probe latency above threshold
    Latency,
    /// Probe failed or availability below threshold
    Availability,
    /// Spend above budget
    Cost,
    /// Provider reported compliance drift
    Compliance,
}

impl FailoverTrigger {
    /// All triggers
    pub fn all() -> [FailoverTrigger; 4] {
        [Self::Latency, Self::Availability, Self::Cost, Self::Compliance]
    }
}

impl fmt::Display for FailoverTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Latency => "latency",
            Self::Availability => "availability",
            Self::Cost => "cost",
            Self::Compliance => "compliance",
        };
        f.write_str(s)
    }
}

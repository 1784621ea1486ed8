//! Deployed resources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hours in a billing month (30 days)
pub const HOURS_PER_MONTH: f64 = 720.0;
/// Hours in a year
pub const HOURS_PER_YEAR: f64 = 8760.0;

/// A resource deployed on one provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Provider-assigned identifier
    pub id: String,
    /// Kind of resource
    pub kind: ResourceKind,
    /// Owning provider name
    pub provider: String,
    /// Region the resource lives in
    pub region: String,
    /// Opaque provider spec
    pub specs: HashMap<String, serde_json::Value>,
    /// Computed cost
    pub cost: ResourceCost,
    /// Tags
    pub tags: HashMap<String, String>,
    /// Backup policy
    pub backup: BackupPolicy,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Resource {
    /// Spec flag lookup, `false` when absent or not a bool
    pub fn spec_flag(&self, key: &str) -> bool {
        self.specs.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Numeric spec lookup
    pub fn spec_f64(&self, key: &str) -> Option<f64> {
        self.specs.get(key).and_then(|v| v.as_f64())
    }
}

/// Resource kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// VM / container capacity
    Compute,
    /// Object or block storage
    Storage,
    /// Managed database
    Database,
    /// VPC, load balancer, interconnect
    Network,
    /// Edge cache
    Cdn,
}

/// Cost breakdown
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceCost {
    /// Per hour
    pub hourly: f64,
    /// Per 30-day month
    pub monthly: f64,
    /// Per year
    pub yearly: f64,
}

impl ResourceCost {
    /// Derive monthly/yearly from an hourly rate
    pub fn from_hourly(hourly: f64) -> Self {
        Self {
            hourly,
            monthly: hourly * HOURS_PER_MONTH,
            yearly: hourly * HOURS_PER_YEAR,
        }
    }

    /// Scale every period by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self::from_hourly(self.hourly * factor)
    }
}

/// Backup policy attached to a resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupPolicy {
    /// Backups enabled
    pub enabled: bool,
    /// How often
    pub frequency: BackupFrequency,
    /// Number of backups kept
    pub retention: u32,
    /// Replicate to another provider/region
    pub cross_region: bool,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: BackupFrequency::Daily,
            retention: 7,
            cross_region: true,
        }
    }
}

impl BackupPolicy {
    /// No backups
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            cross_region: false,
            ..Default::default()
        }
    }
}

/// Backup / replication cadence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackupFrequency {
    /// Continuous
    Realtime,
    /// Every hour
    Hourly,
    /// Every day
    Daily,
}

impl BackupFrequency {
    /// Nominal interval between syncs in seconds
    pub fn interval_secs(self) -> u64 {
        match self {
            Self::Realtime => 0,
            Self::Hourly => 3600,
            Self::Daily => 86400,
        }
    }
}

//! Control plane configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use cloudmesh_common::{ComplianceTier, Provider, ProviderStatus};
use cloudmesh_compliance::{builtin_rules, ComplianceRule};
use cloudmesh_resilience::{FailoverConfig, HealthThresholds};

use crate::error::ConfigError;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CLOUDMESH_CONFIG";

/// Path used when the environment variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cloudmesh/controller.json";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Configured providers
    pub providers: Vec<Provider>,
    /// Failover policy
    pub failover: FailoverConfig,
    /// Health thresholds
    pub health: HealthThresholds,
    /// Periodic pass cadence
    pub schedule: ScheduleConfig,
    /// External call deadlines
    pub timeouts: TimeoutConfig,
    /// Replication limits
    pub replication: ReplicationConfig,
    /// Compliance rules
    pub compliance_rules: Vec<ComplianceRule>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                Provider::new("aws", "us-east-1", 1, 10_000.0, ComplianceTier::Hipaa),
                Provider::new("gcp", "us-central1", 2, 8_000.0, ComplianceTier::Hipaa)
                    .with_status(ProviderStatus::Standby),
                Provider::new("azure", "eastus", 3, 8_000.0, ComplianceTier::Gdpr),
            ],
            failover: FailoverConfig {
                primary: "aws".into(),
                secondary: Some("gcp".into()),
                ..Default::default()
            },
            health: HealthThresholds::default(),
            schedule: ScheduleConfig::default(),
            timeouts: TimeoutConfig::default(),
            replication: ReplicationConfig::default(),
            compliance_rules: builtin_rules(),
        }
    }
}

impl ControlPlaneConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `$CLOUDMESH_CONFIG` (or the default path); a missing file yields defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        match Self::load(&path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path, "Config not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("no providers configured".into()));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate provider {}", provider.name)));
            }
        }

        let failover = &self.failover;
        if !failover.primary.is_empty() && !names.contains(failover.primary.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "failover primary {} is not a configured provider",
                failover.primary
            )));
        }
        if let Some(secondary) = &failover.secondary {
            if !names.contains(secondary.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "failover secondary {} is not a configured provider",
                    secondary
                )));
            }
        }
        if !(failover.rto_target_minutes > 0.0 && failover.rpo_target_minutes > 0.0) {
            return Err(ConfigError::Invalid("RTO and RPO targets must be positive".into()));
        }
        if failover.health_check_interval_secs == 0 {
            return Err(ConfigError::Invalid("health check interval must be positive".into()));
        }
        if self.health.max_latency_ms.is_nan() || self.health.max_latency_ms <= 0.0 {
            return Err(ConfigError::Invalid("latency ceiling must be positive".into()));
        }
        if self.health.offline_threshold < self.health.failure_threshold {
            return Err(ConfigError::Invalid(
                "offline threshold must not be below the failure threshold".into(),
            ));
        }
        if self.schedule.cost_interval_secs == 0 || self.schedule.compliance_interval_secs == 0 {
            return Err(ConfigError::Invalid("schedule periods must be positive".into()));
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.compliance_rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate compliance rule {}", rule.id)));
            }
        }
        Ok(())
    }
}

/// Periodic pass cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cost optimization period, seconds
    pub cost_interval_secs: u64,
    /// Compliance validation period, seconds
    pub compliance_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cost_interval_secs: 24 * 3600,
            compliance_interval_secs: 6 * 3600,
        }
    }
}

impl ScheduleConfig {
    /// Cost pass period
    pub fn cost_interval(&self) -> Duration {
        Duration::from_secs(self.cost_interval_secs)
    }

    /// Compliance pass period
    pub fn compliance_interval(&self) -> Duration {
        Duration::from_secs(self.compliance_interval_secs)
    }
}

/// Deadlines for calls leaving the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// One adapter deploy call
    pub deploy_ms: u64,
    /// Replication job setup, key exchange included
    pub replication_setup_ms: u64,
    /// One compliance rule check
    pub compliance_check_ms: u64,
    /// Cost analysis
    pub cost_analysis_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            deploy_ms: 30_000,
            replication_setup_ms: 10_000,
            compliance_check_ms: 10_000,
            cost_analysis_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    /// Deploy deadline
    pub fn deploy(&self) -> Duration {
        Duration::from_millis(self.deploy_ms)
    }

    /// Replication setup deadline
    pub fn replication_setup(&self) -> Duration {
        Duration::from_millis(self.replication_setup_ms)
    }

    /// Compliance check deadline
    pub fn compliance_check(&self) -> Duration {
        Duration::from_millis(self.compliance_check_ms)
    }

    /// Cost analysis deadline
    pub fn cost_analysis(&self) -> Duration {
        Duration::from_millis(self.cost_analysis_ms)
    }
}

/// Replication limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Bandwidth ceiling used when a job is accelerated for failover
    pub max_bandwidth_mbps: u32,
    /// Bandwidth cap of steady-state backup jobs
    pub backup_bandwidth_mbps: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_bandwidth_mbps: 10_000,
            backup_bandwidth_mbps: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControlPlaneConfig::default();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.providers.len(), 3);
        assert_eq!(config.failover.primary, "aws");
        assert_eq!(config.schedule.cost_interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ControlPlaneConfig::default();
        config.providers.push(Provider::new("aws", "eu-west-1", 2, 100.0, ComplianceTier::Basic));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ControlPlaneConfig::default();
        config.failover.secondary = Some("oracle".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ControlPlaneConfig::default();
        config.failover.rto_target_minutes = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ControlPlaneConfig::default();
        config.health.max_latency_ms = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ControlPlaneConfig::default();
        config.providers[0].priority = 7;
        assert!(matches!(config.validate(), Err(ConfigError::Registry(_))));
    }

    #[test]
    fn test_save_load_and_partial_file() {
        let dir = std::env::temp_dir().join(format!("cloudmesh-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("controller.json");

        let mut config = ControlPlaneConfig::default();
        config.failover.rto_target_minutes = 10.0;
        config.save(&path).unwrap();
        let loaded = ControlPlaneConfig::load(&path).unwrap();
        assert_eq!(loaded.failover.rto_target_minutes, 10.0);
        assert_eq!(loaded.providers, config.providers);

        std::fs::write(&path, r#"{ "schedule": { "cost_interval_secs": 60, "compliance_interval_secs": 30 } }"#)
            .unwrap();
        let partial = ControlPlaneConfig::load(&path).unwrap();
        assert_eq!(partial.schedule.cost_interval_secs, 60);
        assert_eq!(partial.providers.len(), 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = ControlPlaneConfig::load("/nonexistent/cloudmesh.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

//! Compliance rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// Score penalty per unremediated violation
    pub fn penalty(self) -> u32 {
        match self {
            Self::Critical => 25,
            Self::High => 15,
            Self::Medium => 10,
            Self::Low => 5,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// What a rule checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleType {
    /// Data encrypted at rest
    Encryption,
    /// No public access
    AccessControl,
    /// Resources only in the allowed regions
    DataResidency {
        /// Allowed regions
        allowed_regions: Vec<String>,
    },
    /// Audit logging on
    Logging,
    /// Backups enabled
    Backup,
}

/// A compliance rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRule {
    /// Rule id
    pub id: String,
    /// Display name
    pub name: String,
    /// What is checked
    pub rule_type: RuleType,
    /// Severity of a violation
    pub severity: Severity,
    /// Fix violations without operator approval
    pub auto_remediation: bool,
    /// Check frequency in seconds
    pub check_frequency_secs: u64,
}

impl ComplianceRule {
    /// Rule checked every six hours
    pub fn new(id: &str, name: &str, rule_type: RuleType, severity: Severity, auto_remediation: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rule_type,
            severity,
            auto_remediation,
            check_frequency_secs: 6 * 3600,
        }
    }

    /// Data residency rule; moving data is never automatic
    pub fn data_residency(id: &str, allowed_regions: Vec<String>, severity: Severity) -> Self {
        Self::new(
            id,
            "Data residency",
            RuleType::DataResidency { allowed_regions },
            severity,
            false,
        )
    }

    /// Check frequency
    pub fn check_frequency(&self) -> Duration {
        Duration::from_secs(self.check_frequency_secs)
    }
}

/// Rules every deployment is held to
pub fn builtin_rules() -> Vec<ComplianceRule> {
    vec![
        ComplianceRule::new(
            "CM-ENC-001",
            "Encryption at rest",
            RuleType::Encryption,
            Severity::Critical,
            true,
        ),
        ComplianceRule::new(
            "CM-IAM-001",
            "No public access",
            RuleType::AccessControl,
            Severity::High,
            true,
        ),
        ComplianceRule::new(
            "CM-LOG-001",
            "Audit logging enabled",
            RuleType::Logging,
            Severity::Medium,
            true,
        ),
        ComplianceRule {
            check_frequency_secs: 24 * 3600,
            ..ComplianceRule::new("CM-BAK-001", "Backups enabled", RuleType::Backup, Severity::Medium, true)
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_type_serde() {
        let rule = ComplianceRule::data_residency("eu-only", vec!["eu-west-1".into()], Severity::High);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["rule_type"]["type"], "data_residency");
        assert_eq!(json["severity"], "high");

        let back: ComplianceRule = serde_json::from_value(json).unwrap();
        assert_eq!(back.rule_type, rule.rule_type);
        assert!(!back.auto_remediation);
    }

    #[test]
    fn test_builtin_ids_unique() {
        let rules = builtin_rules();
        let mut ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), rules.len());
    }
}

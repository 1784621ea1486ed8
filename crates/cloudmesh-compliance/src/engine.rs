//! Compliance scan, scoring and remediation
//!
//! Open violations are kept between scans, keyed by (rule, resource), so a
//! violation keeps its discovery time until a scan no longer finds it. A rule
//! whose check fails keeps its previous violations open.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditTrail};
use crate::evaluator::{Finding, RuleEvaluator};
use crate::rules::{ComplianceRule, Severity};
use crate::ComplianceError;

/// Minimum score for a compliant posture
pub const COMPLIANT_SCORE: u8 = 95;

/// A rule violated by one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    /// Violation id
    pub id: Uuid,
    /// Violated rule
    pub rule_id: String,
    /// Severity at discovery
    pub severity: Severity,
    /// Offending resource
    pub resource_id: String,
    /// First seen
    pub discovered_at: DateTime<Utc>,
    /// Fixed
    pub remediated: bool,
    /// What is wrong
    pub details: String,
}

impl ComplianceViolation {
    fn new(rule: &ComplianceRule, finding: Finding) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id.clone(),
            severity: rule.severity,
            resource_id: finding.resource_id,
            discovered_at: Utc::now(),
            remediated: false,
            details: finding.details,
        }
    }

    fn key(&self) -> (String, String) {
        (self.rule_id.clone(), self.resource_id.clone())
    }
}

/// A rule whose check did not complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFailure {
    /// Rule id
    pub rule_id: String,
    /// Error text
    pub error: String,
}

/// Result of one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Open violations after the scan
    pub violations: Vec<ComplianceViolation>,
    /// Rules that could not be checked
    pub failed_rules: Vec<RuleFailure>,
}

/// Result of a validation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Score >= 95
    pub compliant: bool,
    /// Posture score 0-100
    pub score: u8,
    /// Open violations, remediated ones included
    pub violations: Vec<ComplianceViolation>,
    /// Violations fixed by this pass
    pub remediated: usize,
    /// Rules that could not be checked
    pub failed_rules: Vec<RuleFailure>,
    /// When
    pub validated_at: DateTime<Utc>,
}

/// Score a set of violations.
///
/// Starts at 100 and subtracts the severity penalty of every unremediated
/// violation, clamped to 0.
pub fn score(violations: &[ComplianceViolation]) -> u8 {
    let penalty: u32 = violations
        .iter()
        .filter(|v| !v.remediated)
        .map(|v| v.severity.penalty())
        .sum();
    100u32.saturating_sub(penalty) as u8
}

/// Compliance engine
pub struct ComplianceEngine {
    rules: RwLock<Vec<ComplianceRule>>,
    evaluator: Arc<dyn RuleEvaluator>,
    open: RwLock<HashMap<(String, String), ComplianceViolation>>,
    audit: AuditTrail,
    check_timeout: Duration,
}

impl ComplianceEngine {
    /// Engine with a rule set; every rule check and fix runs under `check_timeout`
    pub fn new(rules: Vec<ComplianceRule>, evaluator: Arc<dyn RuleEvaluator>, check_timeout: Duration) -> Self {
        Self {
            rules: RwLock::new(rules),
            evaluator,
            open: RwLock::new(HashMap::new()),
            audit: AuditTrail::new(),
            check_timeout,
        }
    }

    /// Configured rules
    pub fn rules(&self) -> Vec<ComplianceRule> {
        self.rules.read().clone()
    }

    /// Replace the rule set; violations of removed rules are dropped on the next scan
    pub fn set_rules(&self, rules: Vec<ComplianceRule>) {
        *self.rules.write() = rules;
    }

    /// Remediation audit trail
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Open violations, oldest first
    pub fn open_violations(&self) -> Vec<ComplianceViolation> {
        let mut violations: Vec<_> = self.open.read().values().cloned().collect();
        violations.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        violations
    }

    /// Evaluate every rule. One failing rule never aborts the others.
    pub async fn scan(&self) -> ScanReport {
        let rules = self.rules();
        let mut found: HashMap<(String, String), (ComplianceRule, Finding)> = HashMap::new();
        let mut failed_rules = Vec::new();

        for rule in &rules {
            tracing::debug!(rule = %rule.id, "Running compliance check");
            let result = match tokio::time::timeout(self.check_timeout, self.evaluator.evaluate(rule)).await {
                Ok(result) => result,
                Err(_) => Err(ComplianceError::Timeout {
                    rule: rule.id.clone(),
                    limit: self.check_timeout,
                }),
            };

            match result {
                Ok(findings) => {
                    for finding in findings {
                        found.insert((rule.id.clone(), finding.resource_id.clone()), (rule.clone(), finding));
                    }
                }
                Err(e) => {
                    tracing::warn!(rule = %rule.id, error = %e, "Compliance check failed");
                    failed_rules.push(RuleFailure {
                        rule_id: rule.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let configured: HashSet<_> = rules.iter().map(|r| r.id.as_str()).collect();
        let failed: HashSet<_> = failed_rules.iter().map(|f| f.rule_id.as_str()).collect();
        {
            let mut open = self.open.write();
            open.retain(|key, _| {
                configured.contains(key.0.as_str()) && (failed.contains(key.0.as_str()) || found.contains_key(key))
            });
            for (key, (rule, finding)) in found {
                open.entry(key)
                    .and_modify(|v| {
                        v.remediated = false;
                        v.details = finding.details.clone();
                    })
                    .or_insert_with(|| ComplianceViolation::new(&rule, finding));
            }
        }

        let violations = self.open_violations();
        tracing::info!(
            rules = rules.len(),
            violations = violations.len(),
            failed = failed_rules.len(),
            "Compliance scan complete"
        );
        ScanReport {
            violations,
            failed_rules,
        }
    }

    /// Fix one violation, if its rule allows automatic remediation
    pub async fn remediate(&self, violation: &ComplianceViolation) -> Result<ComplianceViolation, ComplianceError> {
        let rule = self
            .rules
            .read()
            .iter()
            .find(|r| r.id == violation.rule_id)
            .cloned()
            .ok_or_else(|| ComplianceError::UnknownRule(violation.rule_id.clone()))?;

        if !rule.auto_remediation {
            self.audit.log(
                AuditAction::RemediationSkipped,
                &rule.id,
                &violation.resource_id,
                "auto-remediation disabled",
            );
            return Err(ComplianceError::AutoRemediationDisabled(rule.id));
        }

        let result = match tokio::time::timeout(
            self.check_timeout,
            self.evaluator.remediate(&rule, &violation.resource_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ComplianceError::Timeout {
                rule: rule.id.clone(),
                limit: self.check_timeout,
            }),
        };

        if let Err(e) = result {
            self.audit
                .log(AuditAction::RemediationFailed, &rule.id, &violation.resource_id, &e.to_string());
            return Err(e);
        }

        self.audit
            .log(AuditAction::RemediationApplied, &rule.id, &violation.resource_id, &violation.details);
        let mut fixed = violation.clone();
        fixed.remediated = true;
        if let Some(open) = self.open.write().get_mut(&violation.key()) {
            open.remediated = true;
        }
        Ok(fixed)
    }

    /// Scan, remediate what may be fixed automatically, and score
    pub async fn validate(&self) -> ComplianceReport {
        let scan = self.scan().await;
        let auto: HashSet<_> = self
            .rules()
            .into_iter()
            .filter(|r| r.auto_remediation)
            .map(|r| r.id)
            .collect();

        let mut remediated = 0;
        for violation in scan
            .violations
            .iter()
            .filter(|v| !v.remediated && auto.contains(&v.rule_id))
        {
            match self.remediate(violation).await {
                Ok(_) => remediated += 1,
                Err(e) => {
                    tracing::warn!(rule = %violation.rule_id, resource = %violation.resource_id, error = %e, "Remediation failed")
                }
            }
        }

        let violations = self.open_violations();
        let score = score(&violations);
        let compliant = score >= COMPLIANT_SCORE;

        metrics::gauge!("cloudmesh_compliance_score").set(score as f64);
        tracing::info!(score, compliant, remediated, "Compliance validated");

        ComplianceReport {
            compliant,
            score,
            violations,
            remediated,
            failed_rules: scan.failed_rules,
            validated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ResourceRuleEvaluator;
    use crate::rules::{builtin_rules, RuleType};
    use async_trait::async_trait;
    use cloudmesh_common::{
        BackupPolicy, ComplianceTier, Provider, ProviderRegistry, Resource, ResourceCost, ResourceKind,
        ResourceRegistry,
    };

    fn violation(severity: Severity, remediated: bool) -> ComplianceViolation {
        ComplianceViolation {
            id: Uuid::new_v4(),
            rule_id: "r".into(),
            severity,
            resource_id: "x".into(),
            discovered_at: Utc::now(),
            remediated,
            details: String::new(),
        }
    }

    #[test]
    fn test_score_penalties() {
        let mut violations = vec![violation(Severity::Critical, false), violation(Severity::High, false)];
        assert_eq!(score(&violations), 60);
        assert!(score(&violations) < COMPLIANT_SCORE);

        for v in &mut violations {
            v.remediated = true;
        }
        assert_eq!(score(&violations), 100);
        assert_eq!(score(&[]), 100);
    }

    #[test]
    fn test_score_clamps_at_zero() {
        let violations: Vec<_> = (0..5).map(|_| violation(Severity::Critical, false)).collect();
        assert_eq!(score(&violations), 0);
    }

    fn resources() -> Arc<ResourceRegistry> {
        let providers = ProviderRegistry::with_providers(vec![Provider::new(
            "aws",
            "us-east-1",
            1,
            5000.0,
            ComplianceTier::All,
        )])
        .unwrap();
        let resources = Arc::new(ResourceRegistry::new());
        let mut specs = std::collections::HashMap::new();
        specs.insert("audit_logging".to_string(), serde_json::json!(true));
        tokio_test::assert_ok!(resources.record(
            Resource {
                id: "db-1".into(),
                kind: ResourceKind::Database,
                provider: "aws".into(),
                region: "eu-west-1".into(),
                specs,
                cost: ResourceCost::from_hourly(1.0),
                tags: Default::default(),
                backup: BackupPolicy::default(),
                created_at: Utc::now(),
            },
            &providers,
        ));
        resources
    }

    fn engine(resources: Arc<ResourceRegistry>) -> ComplianceEngine {
        let mut rules = builtin_rules();
        rules.push(ComplianceRule::data_residency("US-ONLY", vec!["us-east-1".into()], Severity::High));
        ComplianceEngine::new(rules, Arc::new(ResourceRuleEvaluator::new(resources)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_validate_remediates_and_scores() {
        let engine = engine(resources());
        let report = engine.validate().await;

        // encryption fixed automatically, residency needs an operator
        assert_eq!(report.remediated, 1);
        assert_eq!(report.score, 85);
        assert!(!report.compliant);
        assert_eq!(report.violations.len(), 2);
        assert!(report.failed_rules.is_empty());

        let trail = engine.audit().entries();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::RemediationApplied);
        assert!(engine.audit().verify_integrity().valid);
    }

    #[tokio::test]
    async fn test_validate_is_idempotent() {
        let engine = engine(resources());
        let first = engine.validate().await;
        let second = engine.validate().await;
        assert_eq!(first.score, second.score);
        assert_eq!(second.remediated, 0);

        let residency: Vec<_> = second.violations.iter().filter(|v| v.rule_id == "US-ONLY").collect();
        assert_eq!(residency.len(), 1);
        let original = first.violations.iter().find(|v| v.rule_id == "US-ONLY").unwrap();
        assert_eq!(residency[0].discovered_at, original.discovered_at);
    }

    #[tokio::test]
    async fn test_remediate_refused_without_auto_flag() {
        let engine = engine(resources());
        let scan = engine.scan().await;
        let residency = scan.violations.iter().find(|v| v.rule_id == "US-ONLY").unwrap();

        assert!(matches!(
            engine.remediate(residency).await,
            Err(ComplianceError::AutoRemediationDisabled(_))
        ));
        assert_eq!(engine.audit().entries()[0].action, AuditAction::RemediationSkipped);
    }

    /// Fails one rule, hangs on another, reports one finding for the rest
    struct UnreliableEvaluator;

    #[async_trait]
    impl RuleEvaluator for UnreliableEvaluator {
        async fn evaluate(&self, rule: &ComplianceRule) -> Result<Vec<Finding>, ComplianceError> {
            match rule.id.as_str() {
                "broken" => Err(ComplianceError::CheckFailed {
                    rule: rule.id.clone(),
                    reason: "api down".into(),
                }),
                "hangs" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(vec![])
                }
                _ => Ok(vec![Finding {
                    resource_id: "vm-1".into(),
                    details: "bad".into(),
                }]),
            }
        }

        async fn remediate(&self, _rule: &ComplianceRule, _resource_id: &str) -> Result<(), ComplianceError> {
            Err(ComplianceError::CheckFailed {
                rule: "any".into(),
                reason: "read-only".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_rule_failures_are_isolated() {
        let rules = vec![
            ComplianceRule::new("broken", "broken", RuleType::Logging, Severity::Low, false),
            ComplianceRule::new("hangs", "hangs", RuleType::Logging, Severity::Low, false),
            ComplianceRule::new("works", "works", RuleType::AccessControl, Severity::Medium, true),
        ];
        let engine = ComplianceEngine::new(rules, Arc::new(UnreliableEvaluator), Duration::from_millis(20));

        let report = engine.validate().await;
        let failed: Vec<_> = report.failed_rules.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(failed, vec!["broken", "hangs"]);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.remediated, 0);
        assert_eq!(report.score, 90);

        let trail = engine.audit().entries();
        assert_eq!(trail[0].action, AuditAction::RemediationFailed);
    }

    #[tokio::test]
    async fn test_failed_rule_keeps_prior_violations() {
        struct Toggle(parking_lot::Mutex<bool>);

        #[async_trait]
        impl RuleEvaluator for Toggle {
            async fn evaluate(&self, rule: &ComplianceRule) -> Result<Vec<Finding>, ComplianceError> {
                if *self.0.lock() {
                    Err(ComplianceError::CheckFailed {
                        rule: rule.id.clone(),
                        reason: "flaky".into(),
                    })
                } else {
                    Ok(vec![Finding {
                        resource_id: "db-9".into(),
                        details: "unencrypted".into(),
                    }])
                }
            }

            async fn remediate(&self, _: &ComplianceRule, _: &str) -> Result<(), ComplianceError> {
                Ok(())
            }
        }

        let evaluator = Arc::new(Toggle(parking_lot::Mutex::new(false)));
        let rules = vec![ComplianceRule::new("enc", "enc", RuleType::Encryption, Severity::Critical, false)];
        let engine = ComplianceEngine::new(rules, evaluator.clone(), Duration::from_secs(1));

        let first = engine.scan().await;
        assert_eq!(first.violations.len(), 1);

        *evaluator.0.lock() = true;
        let second = engine.scan().await;
        assert_eq!(second.failed_rules.len(), 1);
        assert_eq!(second.violations, first.violations);
    }
}

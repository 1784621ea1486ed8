//! Rule evaluation against recorded resources

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use cloudmesh_common::{BackupPolicy, RegistryError, Resource, ResourceKind, ResourceRegistry};

use crate::rules::{ComplianceRule, RuleType};
use crate::ComplianceError;

/// A resource that fails a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Offending resource
    pub resource_id: String,
    /// What is wrong
    pub details: String,
}

/// Checks rules and applies fixes
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    /// Findings for one rule
    async fn evaluate(&self, rule: &ComplianceRule) -> Result<Vec<Finding>, ComplianceError>;

    /// Fix one finding
    async fn remediate(&self, rule: &ComplianceRule, resource_id: &str) -> Result<(), ComplianceError>;
}

/// Evaluates rules against resource specs in the registry.
///
/// Spec keys consulted: `encryption_at_rest`, `public_access`, `audit_logging`.
pub struct ResourceRuleEvaluator {
    resources: Arc<ResourceRegistry>,
}

impl ResourceRuleEvaluator {
    /// Evaluator over `resources`
    pub fn new(resources: Arc<ResourceRegistry>) -> Self {
        Self { resources }
    }

    fn check(rule_type: &RuleType, resource: &Resource) -> Option<String> {
        match rule_type {
            RuleType::Encryption => {
                let applies = matches!(
                    resource.kind,
                    ResourceKind::Compute | ResourceKind::Storage | ResourceKind::Database
                );
                (applies && !resource.spec_flag("encryption_at_rest")).then(|| "encryption at rest disabled".to_string())
            }
            RuleType::AccessControl => resource
                .spec_flag("public_access")
                .then(|| "publicly accessible".to_string()),
            RuleType::DataResidency { allowed_regions } => {
                let outside = !allowed_regions.is_empty() && !allowed_regions.contains(&resource.region);
                outside.then(|| format!("region {} not allowed", resource.region))
            }
            RuleType::Logging => (!resource.spec_flag("audit_logging")).then(|| "audit logging disabled".to_string()),
            RuleType::Backup => {
                let applies = matches!(resource.kind, ResourceKind::Storage | ResourceKind::Database);
                (applies && !resource.backup.enabled).then(|| "backups disabled".to_string())
            }
        }
    }
}

#[async_trait]
impl RuleEvaluator for ResourceRuleEvaluator {
    async fn evaluate(&self, rule: &ComplianceRule) -> Result<Vec<Finding>, ComplianceError> {
        Ok(self
            .resources
            .all()
            .iter()
            .filter_map(|r| {
                Self::check(&rule.rule_type, r).map(|details| Finding {
                    resource_id: r.id.clone(),
                    details,
                })
            })
            .collect())
    }

    async fn remediate(&self, rule: &ComplianceRule, resource_id: &str) -> Result<(), ComplianceError> {
        let fix: fn(&mut Resource) = match rule.rule_type {
            RuleType::Encryption => |r| {
                r.specs.insert("encryption_at_rest".into(), true.into());
            },
            RuleType::AccessControl => |r| {
                r.specs.insert("public_access".into(), false.into());
            },
            RuleType::Logging => |r| {
                r.specs.insert("audit_logging".into(), true.into());
            },
            RuleType::Backup => |r| r.backup = BackupPolicy::default(),
            RuleType::DataResidency { .. } => {
                return Err(ComplianceError::NotRemediable {
                    rule: rule.id.clone(),
                    resource: resource_id.to_string(),
                })
            }
        };

        self.resources.update(resource_id, fix).map_err(|e| match e {
            RegistryError::ResourceNotFound(id) => ComplianceError::ResourceNotFound(id),
            other => ComplianceError::CheckFailed {
                rule: rule.id.clone(),
                reason: other.to_string(),
            },
        })?;
        tracing::info!(rule = %rule.id, resource = %resource_id, "Remediation applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;
    use chrono::Utc;
    use cloudmesh_common::{ComplianceTier, Provider, ProviderRegistry, ResourceCost};
    use std::collections::HashMap;

    fn registry() -> Arc<ResourceRegistry> {
        let providers =
            ProviderRegistry::with_providers(vec![Provider::new("aws", "us-east-1", 1, 5000.0, ComplianceTier::All)])
                .unwrap();
        let resources = Arc::new(ResourceRegistry::new());
        for (id, kind, region) in [
            ("bucket", ResourceKind::Storage, "us-east-1"),
            ("lb", ResourceKind::Network, "eu-west-1"),
        ] {
            resources
                .record(
                    Resource {
                        id: id.into(),
                        kind,
                        provider: "aws".into(),
                        region: region.into(),
                        specs: HashMap::new(),
                        cost: ResourceCost::from_hourly(0.1),
                        tags: HashMap::new(),
                        backup: BackupPolicy::disabled(),
                        created_at: Utc::now(),
                    },
                    &providers,
                )
                .unwrap();
        }
        resources
    }

    #[tokio::test]
    async fn test_encryption_applies_to_data_kinds_only() {
        let evaluator = ResourceRuleEvaluator::new(registry());
        let rule = ComplianceRule::new("enc", "enc", RuleType::Encryption, Severity::Critical, true);

        let findings = evaluator.evaluate(&rule).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_id, "bucket");

        evaluator.remediate(&rule, "bucket").await.unwrap();
        assert!(evaluator.evaluate(&rule).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_residency_is_not_remediable() {
        let evaluator = ResourceRuleEvaluator::new(registry());
        let rule = ComplianceRule::data_residency("us-only", vec!["us-east-1".into()], Severity::High);

        let findings = evaluator.evaluate(&rule).await.unwrap();
        assert_eq!(findings[0].resource_id, "lb");
        assert!(matches!(
            evaluator.remediate(&rule, "lb").await,
            Err(ComplianceError::NotRemediable { .. })
        ));
    }

    #[tokio::test]
    async fn test_remediate_missing_resource() {
        let evaluator = ResourceRuleEvaluator::new(registry());
        let rule = ComplianceRule::new("bak", "bak", RuleType::Backup, Severity::Medium, true);
        assert!(matches!(
            evaluator.remediate(&rule, "gone").await,
            Err(ComplianceError::ResourceNotFound(_))
        ));
    }
}

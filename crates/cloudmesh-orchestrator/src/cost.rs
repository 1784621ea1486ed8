//! Multi-Cloud Cost Optimization
//!
//! ```text
//! analyze() ──► UsageSummary ──► recommend() ──► [CostRecommendation]
//!                                                   │
//!                     low risk + auto_apply ────────┼──► apply() ──► implemented
//!                     everything else ──────────────┴──► pending approval
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cloudmesh_common::{Provider, ProviderRegistry, ProviderStatus, Resource, ResourceKind, ResourceRegistry};

use crate::error::{ApplyError, CostError};

/// Utilization below this is a rightsizing candidate
pub const RIGHTSIZE_UTILIZATION: f64 = 0.40;

/// Utilization below this is considered idle
pub const IDLE_UTILIZATION: f64 = 0.05;

/// Minimum price advantage before a cross-provider move is proposed
pub const ARBITRAGE_MIN_DISCOUNT: f64 = 0.20;

/// Cost factor applied by a rightsizing or storage tier change
const DOWNSIZE_FACTOR: f64 = 0.5;

/// Spec value marking a resource as moved to the cold storage tier
const INFREQUENT_TIER: &str = "infrequent-access";

/// Recommendation risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Safe to apply unattended
    Low,
    /// Needs a look
    Medium,
    /// Needs approval
    High,
}

/// Recommendation category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationCategory {
    /// Shrink an underused resource
    Rightsize,
    /// Remove an idle resource
    Terminate,
    /// Move rarely read data to a cheaper tier
    StorageTier,
    /// Move to a cheaper provider
    Migrate,
    /// Provider spend above budget
    BudgetOverrun,
}

impl fmt::Display for RecommendationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rightsize => "rightsize",
            Self::Terminate => "terminate",
            Self::StorageTier => "storage-tier",
            Self::Migrate => "migrate",
            Self::BudgetOverrun => "budget-overrun",
        };
        f.write_str(s)
    }
}

/// The change a recommendation performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CostAction {
    /// Scale the resource's cost by `factor`
    Rightsize {
        /// Resource
        resource_id: String,
        /// New cost / old cost
        factor: f64,
    },
    /// Tear the resource down
    Terminate {
        /// Resource
        resource_id: String,
    },
    /// Move to an infrequent-access tier
    StorageTier {
        /// Resource
        resource_id: String,
        /// New cost / old cost
        factor: f64,
    },
    /// Re-home onto a cheaper provider
    Migrate {
        /// Resource
        resource_id: String,
        /// Destination provider
        target: String,
        /// New cost / old cost
        factor: f64,
    },
    /// Review spend of a provider
    ReviewBudget {
        /// Provider
        provider: String,
    },
}

impl CostAction {
    /// Category of this action
    pub fn category(&self) -> RecommendationCategory {
        match self {
            Self::Rightsize { .. } => RecommendationCategory::Rightsize,
            Self::Terminate { .. } => RecommendationCategory::Terminate,
            Self::StorageTier { .. } => RecommendationCategory::StorageTier,
            Self::Migrate { .. } => RecommendationCategory::Migrate,
            Self::ReviewBudget { .. } => RecommendationCategory::BudgetOverrun,
        }
    }
}

/// A savings opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecommendation {
    /// Stable id (`<category>:<subject>`)
    pub id: String,
    /// Change to perform
    pub action: CostAction,
    /// Human readable summary
    pub description: String,
    /// Estimated monthly savings
    pub estimated_savings: f64,
    /// Risk
    pub risk: RiskLevel,
    /// Eligible for unattended execution
    pub auto_apply: bool,
}

impl CostRecommendation {
    fn new(action: CostAction, subject: &str, description: String, estimated_savings: f64, risk: RiskLevel, auto_apply: bool) -> Self {
        Self {
            id: format!("{}:{}", action.category(), subject),
            action,
            description,
            estimated_savings,
            risk,
            auto_apply,
        }
    }

    /// Category
    pub fn category(&self) -> RecommendationCategory {
        self.action.category()
    }

    /// Only low-risk recommendations flagged auto-apply run unattended
    pub fn auto_applicable(&self) -> bool {
        self.risk == RiskLevel::Low && self.auto_apply
    }
}

/// How often a resource's data is read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPattern {
    /// Hot data
    #[default]
    Frequent,
    /// Cold data
    Infrequent,
}

/// Usage of one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resource id
    pub resource_id: String,
    /// Owning provider
    pub provider: String,
    /// Kind
    pub kind: ResourceKind,
    /// Current hourly cost
    pub hourly_cost: f64,
    /// Current monthly cost
    pub monthly_cost: f64,
    /// Average utilization, 0.0-1.0
    pub utilization: f64,
    /// Read pattern
    pub access: AccessPattern,
    /// Already on the infrequent-access storage tier
    #[serde(default)]
    pub cold_tier: bool,
}

/// Spend of one provider against its budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpend {
    /// Provider
    pub provider: String,
    /// Status at analysis time
    pub status: ProviderStatus,
    /// Monthly spend
    pub monthly_spend: f64,
    /// Budget
    pub budget: f64,
}

impl ProviderSpend {
    /// Spend above budget
    pub fn overrun(&self) -> f64 {
        (self.monthly_spend - self.budget).max(0.0)
    }
}

/// Output of the analysis capability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Per provider
    pub providers: Vec<ProviderSpend>,
    /// Per resource
    pub resources: Vec<ResourceUsage>,
}

impl UsageSummary {
    /// Total monthly spend
    pub fn total_spend(&self) -> f64 {
        self.providers.iter().map(|p| p.monthly_spend).sum()
    }
}

/// Pluggable usage analysis
#[async_trait]
pub trait CostAnalyzer: Send + Sync {
    /// Summarize usage of the given resources
    async fn analyze(&self, resources: &[Resource], providers: &[Provider]) -> Result<UsageSummary, CostError>;
}

/// Analyzer reading the `utilization` and `access` spec keys.
///
/// A resource without a `utilization` entry is treated as fully used.
#[derive(Debug, Clone, Default)]
pub struct UtilizationAnalyzer;

#[async_trait]
impl CostAnalyzer for UtilizationAnalyzer {
    async fn analyze(&self, resources: &[Resource], providers: &[Provider]) -> Result<UsageSummary, CostError> {
        let mut spend: HashMap<&str, f64> = HashMap::new();
        let mut usage = Vec::with_capacity(resources.len());

        for r in resources {
            *spend.entry(r.provider.as_str()).or_insert(0.0) += r.cost.monthly;
            let access = match r.specs.get("access").and_then(|v| v.as_str()) {
                Some("infrequent") => AccessPattern::Infrequent,
                _ => AccessPattern::Frequent,
            };
            usage.push(ResourceUsage {
                resource_id: r.id.clone(),
                provider: r.provider.clone(),
                kind: r.kind,
                hourly_cost: r.cost.hourly,
                monthly_cost: r.cost.monthly,
                utilization: r.spec_f64("utilization").unwrap_or(1.0).clamp(0.0, 1.0),
                access,
                cold_tier: r.specs.get("storage_tier").and_then(|v| v.as_str()) == Some(INFREQUENT_TIER),
            });
        }

        Ok(UsageSummary {
            providers: providers
                .iter()
                .map(|p| ProviderSpend {
                    provider: p.name.clone(),
                    status: p.status,
                    monthly_spend: spend.get(p.name.as_str()).copied().unwrap_or(0.0),
                    budget: p.cost_budget,
                })
                .collect(),
            resources: usage,
        })
    }
}

/// Recommendations for a usage summary, largest saving first
pub fn recommend(summary: &UsageSummary) -> Vec<CostRecommendation> {
    let mut recs = Vec::new();

    // cheapest average hourly price per kind among active providers
    let mut prices: HashMap<(ResourceKind, &str), (f64, usize)> = HashMap::new();
    for u in &summary.resources {
        let slot = prices.entry((u.kind, u.provider.as_str())).or_insert((0.0, 0));
        slot.0 += u.hourly_cost;
        slot.1 += 1;
    }
    let active = |name: &str| {
        summary
            .providers
            .iter()
            .any(|p| p.provider == name && p.status == ProviderStatus::Active)
    };

    for u in &summary.resources {
        let id = u.resource_id.as_str();

        if u.utilization < IDLE_UTILIZATION {
            recs.push(CostRecommendation::new(
                CostAction::Terminate { resource_id: id.into() },
                id,
                format!("{} is idle ({:.0}% utilized); remove it", id, u.utilization * 100.0),
                u.monthly_cost,
                RiskLevel::Medium,
                false,
            ));
            continue;
        }

        // at most one shrink per resource per pass
        let tierable = u.kind == ResourceKind::Storage && u.access == AccessPattern::Infrequent && !u.cold_tier;
        if tierable {
            recs.push(CostRecommendation::new(
                CostAction::StorageTier {
                    resource_id: id.into(),
                    factor: DOWNSIZE_FACTOR,
                },
                id,
                format!("{} is rarely read; move it to the infrequent-access tier", id),
                u.monthly_cost * (1.0 - DOWNSIZE_FACTOR),
                RiskLevel::Low,
                true,
            ));
        } else if u.utilization < RIGHTSIZE_UTILIZATION {
            recs.push(CostRecommendation::new(
                CostAction::Rightsize {
                    resource_id: id.into(),
                    factor: DOWNSIZE_FACTOR,
                },
                id,
                format!("{} is {:.0}% utilized; halve its size", id, u.utilization * 100.0),
                u.monthly_cost * (1.0 - DOWNSIZE_FACTOR),
                RiskLevel::Low,
                true,
            ));
        }

        let cheaper = prices
            .iter()
            .filter(|((kind, provider), _)| *kind == u.kind && *provider != u.provider && active(*provider))
            .map(|((_, provider), (total, n))| (*provider, total / *n as f64))
            .filter(|(_, price)| u.hourly_cost > 0.0 && *price <= u.hourly_cost * (1.0 - ARBITRAGE_MIN_DISCOUNT))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        if let Some((target, price)) = cheaper {
            let factor = price / u.hourly_cost;
            recs.push(CostRecommendation::new(
                CostAction::Migrate {
                    resource_id: id.into(),
                    target: target.to_string(),
                    factor,
                },
                id,
                format!("{} costs {:.0}% less on {}", id, (1.0 - factor) * 100.0, target),
                u.monthly_cost * (1.0 - factor),
                RiskLevel::High,
                true,
            ));
        }
    }

    for p in &summary.providers {
        let overrun = p.overrun();
        if overrun > 0.0 {
            recs.push(CostRecommendation::new(
                CostAction::ReviewBudget {
                    provider: p.provider.clone(),
                },
                &p.provider,
                format!(
                    "{} spends {:.2}/month against a budget of {:.2}",
                    p.provider, p.monthly_spend, p.budget
                ),
                overrun,
                RiskLevel::High,
                false,
            ));
        }
    }

    recs.sort_by(|a, b| b.estimated_savings.total_cmp(&a.estimated_savings));
    recs
}

/// An auto-apply that failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyFailure {
    /// Recommendation id
    pub recommendation_id: String,
    /// Cause
    pub error: String,
}

/// Result of one optimization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Realized monthly savings of applied recommendations
    pub savings: f64,
    /// Every recommendation, largest saving first
    pub recommendations: Vec<CostRecommendation>,
    /// Ids applied automatically
    pub implemented: Vec<String>,
    /// Ids waiting for an operator
    pub pending_approval: Vec<String>,
    /// Auto-applies that failed
    pub failed: Vec<ApplyFailure>,
    /// Spend at analysis time
    pub total_spend: f64,
    /// When
    pub optimized_at: DateTime<Utc>,
}

/// Cost optimizer
pub struct CostOptimizer {
    analyzer: Arc<dyn CostAnalyzer>,
    providers: Arc<ProviderRegistry>,
    resources: Arc<ResourceRegistry>,
    analysis_timeout: Duration,
    last_report: RwLock<Option<OptimizationReport>>,
}

impl CostOptimizer {
    /// Optimizer over the shared registries
    pub fn new(
        analyzer: Arc<dyn CostAnalyzer>,
        providers: Arc<ProviderRegistry>,
        resources: Arc<ResourceRegistry>,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            analyzer,
            providers,
            resources,
            analysis_timeout,
            last_report: RwLock::new(None),
        }
    }

    /// Usage summary from the analysis capability, bounded by the analysis timeout
    pub async fn analyze(&self) -> Result<UsageSummary, CostError> {
        let resources = self.resources.all();
        let providers = self.providers.snapshot();
        tokio::time::timeout(self.analysis_timeout, self.analyzer.analyze(&resources, &providers))
            .await
            .map_err(|_| CostError::Timeout(self.analysis_timeout))?
    }

    /// Perform one recommendation; returns realized monthly savings
    pub fn apply(&self, rec: &CostRecommendation) -> Result<f64, ApplyError> {
        let savings = match &rec.action {
            CostAction::Rightsize { resource_id, factor } | CostAction::StorageTier { resource_id, factor } => {
                let tier = matches!(rec.action, CostAction::StorageTier { .. });
                let mut before = 0.0;
                let after = self.resources.update(resource_id, |r| {
                    before = r.cost.monthly;
                    r.cost = r.cost.scaled(*factor);
                    if tier {
                        r.specs.insert("storage_tier".into(), INFREQUENT_TIER.into());
                    } else if let Some(utilization) = r.spec_f64("utilization") {
                        // same load on a smaller footprint
                        let resized = (utilization / factor).min(1.0);
                        r.specs.insert("utilization".into(), resized.into());
                    }
                })?;
                before - after.cost.monthly
            }
            CostAction::Terminate { resource_id } => self.resources.remove(resource_id)?.cost.monthly,
            CostAction::Migrate {
                resource_id,
                target,
                factor,
            } => {
                if self.providers.status(target) != Some(ProviderStatus::Active) {
                    return Err(ApplyError::Rejected(format!("{} is not active", target)));
                }
                let mut before = 0.0;
                let after = self.resources.update(resource_id, |r| {
                    before = r.cost.monthly;
                    r.provider = target.clone();
                    r.cost = r.cost.scaled(*factor);
                })?;
                before - after.cost.monthly
            }
            CostAction::ReviewBudget { .. } => return Err(ApplyError::NotActionable(rec.id.clone())),
        };

        tracing::info!(recommendation = %rec.id, savings, "Cost recommendation applied");
        Ok(savings)
    }

    /// Analyze, recommend, and auto-apply eligible recommendations.
    ///
    /// A failed apply is recorded and the remaining recommendations still run.
    pub async fn optimize(&self) -> Result<OptimizationReport, CostError> {
        let summary = self.analyze().await?;
        let recommendations = recommend(&summary);

        let mut savings = 0.0;
        let mut implemented = Vec::new();
        let mut pending_approval = Vec::new();
        let mut failed = Vec::new();

        for rec in &recommendations {
            if !rec.auto_applicable() {
                pending_approval.push(rec.id.clone());
                continue;
            }
            match self.apply(rec) {
                Ok(realized) => {
                    savings += realized;
                    implemented.push(rec.id.clone());
                }
                Err(e) => {
                    tracing::warn!(recommendation = %rec.id, error = %e, "Auto-apply failed");
                    metrics::counter!("cloudmesh_cost_apply_failures_total").increment(1);
                    failed.push(ApplyFailure {
                        recommendation_id: rec.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        metrics::gauge!("cloudmesh_cost_realized_savings").set(savings);
        metrics::counter!("cloudmesh_cost_recommendations_total").increment(recommendations.len() as u64);
        tracing::info!(
            recommendations = recommendations.len(),
            implemented = implemented.len(),
            pending = pending_approval.len(),
            savings,
            "Cost optimization finished"
        );

        let report = OptimizationReport {
            savings,
            recommendations,
            implemented,
            pending_approval,
            failed,
            total_spend: summary.total_spend(),
            optimized_at: Utc::now(),
        };
        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    /// Report of the most recent successful pass
    pub fn last_report(&self) -> Option<OptimizationReport> {
        self.last_report.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudmesh_common::{BackupPolicy, ComplianceTier, ResourceCost};
    use serde_json::json;

    fn resource(id: &str, provider: &str, kind: ResourceKind, hourly: f64, utilization: f64) -> Resource {
        Resource {
            id: id.into(),
            kind,
            provider: provider.into(),
            region: "us-east-1".into(),
            specs: [("utilization".to_string(), json!(utilization))].into_iter().collect(),
            cost: ResourceCost::from_hourly(hourly),
            tags: HashMap::new(),
            backup: BackupPolicy::default(),
            created_at: Utc::now(),
        }
    }

    fn optimizer(resources: Vec<Resource>, budget: f64) -> (CostOptimizer, Arc<ResourceRegistry>) {
        let providers = Arc::new(
            ProviderRegistry::with_providers(vec![
                Provider::new("aws", "us-east-1", 1, budget, ComplianceTier::All),
                Provider::new("gcp", "us-central1", 2, budget, ComplianceTier::All),
            ])
            .unwrap(),
        );
        let registry = Arc::new(ResourceRegistry::new());
        for r in resources {
            registry.record(r, &providers).unwrap();
        }
        let optimizer = CostOptimizer::new(
            Arc::new(UtilizationAnalyzer),
            providers,
            registry.clone(),
            Duration::from_secs(1),
        );
        (optimizer, registry)
    }

    #[tokio::test]
    async fn test_low_risk_recommendations_auto_apply() {
        let (optimizer, registry) = optimizer(vec![resource("vm-1", "aws", ResourceKind::Compute, 1.0, 0.2)], 1e6);

        let report = optimizer.optimize().await.unwrap();
        assert_eq!(report.implemented, vec!["rightsize:vm-1".to_string()]);
        assert!((report.savings - 360.0).abs() < 1e-9);
        assert!(report.pending_approval.is_empty());
        assert_eq!(registry.get("vm-1").unwrap().cost.hourly, 0.5);
        assert!(optimizer.last_report().is_some());
    }

    #[tokio::test]
    async fn test_repeated_passes_do_not_shrink_again() {
        let mut logs = resource("logs", "aws", ResourceKind::Storage, 1.0, 0.9);
        logs.specs.insert("access".into(), json!("infrequent"));
        let (optimizer, registry) = optimizer(vec![resource("vm-1", "aws", ResourceKind::Compute, 1.0, 0.2), logs], 1e6);

        let first = optimizer.optimize().await.unwrap();
        let mut implemented = first.implemented.clone();
        implemented.sort();
        assert_eq!(implemented, vec!["rightsize:vm-1", "storage-tier:logs"]);

        let vm = registry.get("vm-1").unwrap();
        assert_eq!(vm.cost.hourly, 0.5);
        assert_eq!(vm.spec_f64("utilization"), Some(0.4));
        assert_eq!(registry.get("logs").unwrap().cost.hourly, 0.5);

        for _ in 0..3 {
            let report = optimizer.optimize().await.unwrap();
            assert!(report.implemented.is_empty(), "{:?}", report.implemented);
            assert_eq!(report.savings, 0.0);
        }
        assert_eq!(registry.get("vm-1").unwrap().cost.hourly, 0.5);
        assert_eq!(registry.get("logs").unwrap().cost.hourly, 0.5);
    }

    #[tokio::test]
    async fn test_one_shrink_per_resource() {
        let mut archive = resource("archive", "aws", ResourceKind::Storage, 1.0, 0.2);
        archive.specs.insert("access".into(), json!("infrequent"));
        let providers = [Provider::new("aws", "us-east-1", 1, 1e6, ComplianceTier::All)];

        let summary = UtilizationAnalyzer.analyze(&[archive.clone()], &providers).await.unwrap();
        let ids: Vec<_> = recommend(&summary).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["storage-tier:archive"]);

        archive.specs.insert("storage_tier".into(), json!("infrequent-access"));
        let summary = UtilizationAnalyzer.analyze(&[archive], &providers).await.unwrap();
        let ids: Vec<_> = recommend(&summary).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["rightsize:archive"]);
    }

    #[tokio::test]
    async fn test_high_risk_never_auto_applied() {
        let (optimizer, registry) = optimizer(
            vec![
                resource("vm-aws", "aws", ResourceKind::Compute, 1.0, 0.9),
                resource("vm-gcp", "gcp", ResourceKind::Compute, 0.5, 0.9),
            ],
            1e6,
        );

        let report = optimizer.optimize().await.unwrap();
        let migrate = report
            .recommendations
            .iter()
            .find(|r| r.category() == RecommendationCategory::Migrate)
            .unwrap();
        assert_eq!(migrate.risk, RiskLevel::High);
        assert!(migrate.auto_apply);
        assert!(report.implemented.is_empty());
        assert_eq!(report.pending_approval, vec![migrate.id.clone()]);
        assert_eq!(report.savings, 0.0);
        assert_eq!(registry.get("vm-aws").unwrap().provider, "aws");

        // operator approval
        let realized = optimizer.apply(migrate).unwrap();
        assert!((realized - 360.0).abs() < 1e-9);
        assert_eq!(registry.get("vm-aws").unwrap().provider, "gcp");
    }

    #[tokio::test]
    async fn test_idle_and_budget_need_approval() {
        let (optimizer, registry) = optimizer(vec![resource("db-1", "aws", ResourceKind::Database, 2.0, 0.01)], 1000.0);

        let report = optimizer.optimize().await.unwrap();
        let categories: Vec<_> = report.recommendations.iter().map(|r| r.category()).collect();
        assert_eq!(
            categories,
            vec![RecommendationCategory::Terminate, RecommendationCategory::BudgetOverrun]
        );
        assert!(report.implemented.is_empty());
        assert_eq!(report.pending_approval.len(), 2);
        assert!(registry.get("db-1").is_some());

        let budget = &report.recommendations[1];
        assert!(matches!(optimizer.apply(budget), Err(ApplyError::NotActionable(_))));
    }

    #[tokio::test]
    async fn test_recommendations_sorted_by_savings() {
        let summary = UtilizationAnalyzer
            .analyze(
                &[
                    resource("small", "aws", ResourceKind::Compute, 0.1, 0.3),
                    resource("large", "aws", ResourceKind::Compute, 3.0, 0.3),
                ],
                &[Provider::new("aws", "us-east-1", 1, 1e6, ComplianceTier::All)],
            )
            .await
            .unwrap();

        let recs = recommend(&summary);
        assert_eq!(recs[0].id, "rightsize:large");
        assert_eq!(recs[1].id, "rightsize:small");
    }

    struct StaleAnalyzer;

    #[async_trait]
    impl CostAnalyzer for StaleAnalyzer {
        async fn analyze(&self, _: &[Resource], _: &[Provider]) -> Result<UsageSummary, CostError> {
            let live = resource("live", "aws", ResourceKind::Storage, 1.0, 1.0);
            let gone = resource("gone", "aws", ResourceKind::Storage, 2.0, 1.0);
            let usage = |r: &Resource| ResourceUsage {
                resource_id: r.id.clone(),
                provider: r.provider.clone(),
                kind: r.kind,
                hourly_cost: r.cost.hourly,
                monthly_cost: r.cost.monthly,
                utilization: 1.0,
                access: AccessPattern::Infrequent,
                cold_tier: false,
            };
            Ok(UsageSummary {
                providers: Vec::new(),
                resources: vec![usage(&live), usage(&gone)],
            })
        }
    }

    #[tokio::test]
    async fn test_apply_failure_is_isolated() {
        let (_, registry) = optimizer(vec![resource("live", "aws", ResourceKind::Storage, 1.0, 1.0)], 1e6);
        let providers = Arc::new(
            ProviderRegistry::with_providers(vec![Provider::new("aws", "us-east-1", 1, 1e6, ComplianceTier::All)])
                .unwrap(),
        );
        let optimizer = CostOptimizer::new(Arc::new(StaleAnalyzer), providers, registry.clone(), Duration::from_secs(1));

        let report = optimizer.optimize().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].recommendation_id, "storage-tier:gone");
        assert_eq!(report.implemented, vec!["storage-tier:live".to_string()]);
        assert!((report.savings - 360.0).abs() < 1e-9);
        assert_eq!(registry.get("live").unwrap().specs["storage_tier"], "infrequent-access");
    }

    struct SlowAnalyzer;

    #[async_trait]
    impl CostAnalyzer for SlowAnalyzer {
        async fn analyze(&self, _: &[Resource], _: &[Provider]) -> Result<UsageSummary, CostError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(UsageSummary::default())
        }
    }

    #[tokio::test]
    async fn test_analysis_timeout() {
        let (_, registry) = optimizer(Vec::new(), 1e6);
        let optimizer = CostOptimizer::new(
            Arc::new(SlowAnalyzer),
            Arc::new(ProviderRegistry::new()),
            registry,
            Duration::from_millis(20),
        );
        assert!(matches!(optimizer.optimize().await, Err(CostError::Timeout(_))));
        assert!(optimizer.last_report().is_none());
    }
}

//! Provider placement scoring
//!
//! Every term is normalized to 0.0-1.0 and multiplied by its weight and 100,
//! so a perfect provider scores 100. Weights are relative influence factors:
//! cost efficiency 40%, priority 30%, compliance tier 20%, regional affinity 10%.

use serde::{Deserialize, Serialize};

use crate::provider::{ComplianceTier, Provider, ProviderStatus};

/// How many providers a single placement spans
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMode {
    /// Best provider only
    Primary,
    /// Two providers
    Redundant,
    /// Every eligible provider (at least two)
    Balanced,
}

impl DistributionMode {
    /// Minimum number of providers required
    pub fn min_providers(self) -> usize {
        match self {
            Self::Primary => 1,
            Self::Redundant | Self::Balanced => 2,
        }
    }

    /// How many successful deploys to aim for given `eligible` candidates
    pub fn target_count(self, eligible: usize) -> usize {
        match self {
            Self::Primary => 1,
            Self::Redundant => 2,
            Self::Balanced => eligible.max(2),
        }
    }
}

/// Placement request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// Tier the deployment must satisfy
    pub required_tier: ComplianceTier,
    /// Region that earns the affinity bonus
    pub preferred_region: Option<String>,
    /// Distribution mode
    pub mode: DistributionMode,
}

impl PlacementRequest {
    /// New request
    pub fn new(required_tier: ComplianceTier, mode: DistributionMode) -> Self {
        Self {
            required_tier,
            preferred_region: None,
            mode,
        }
    }

    /// Builder: preferred region
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.preferred_region = Some(region.into());
        self
    }
}

/// Scoring weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Cost efficiency
    pub cost: f64,
    /// Priority rank
    pub priority: f64,
    /// Compliance tier
    pub compliance: f64,
    /// Regional affinity
    pub region: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            cost: 0.40,
            priority: 0.30,
            compliance: 0.20,
            region: 0.10,
        }
    }
}

/// Score breakdown for one provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProviderScore {
    /// Sum of the weighted terms
    pub total: f64,
    /// Cost efficiency term
    pub cost: f64,
    /// Priority term
    pub priority: f64,
    /// Compliance term
    pub compliance: f64,
    /// Regional affinity term
    pub region: f64,
}

/// A provider with its score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedProvider {
    /// Provider snapshot
    pub provider: Provider,
    /// Score
    pub score: ProviderScore,
}

/// Scores and ranks providers. Pure: no side effects.
#[derive(Debug, Clone, Default)]
pub struct ProviderSelector {
    weights: ScoreWeights,
}

impl ProviderSelector {
    /// Selector with default weights
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector with custom weights
    pub fn with_weights(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Score one provider.
    ///
    /// `cheapest_budget` is the lowest budget among the candidates; the
    /// cheapest provider gets the full cost term.
    pub fn score(&self, provider: &Provider, cheapest_budget: f64, preferred_region: Option<&str>) -> ProviderScore {
        let cost_norm = if provider.cost_budget > 0.0 && cheapest_budget > 0.0 {
            (cheapest_budget / provider.cost_budget).min(1.0)
        } else {
            0.0
        };
        let priority_norm = (4 - provider.priority.clamp(1, 3)) as f64 / 3.0;
        let compliance_norm = provider.compliance.score() / ComplianceTier::All.score();
        let region_norm = match preferred_region {
            Some(region) if region == provider.region => 1.0,
            _ => 0.0,
        };

        let cost = cost_norm * self.weights.cost * 100.0;
        let priority = priority_norm * self.weights.priority * 100.0;
        let compliance = compliance_norm * self.weights.compliance * 100.0;
        let region = region_norm * self.weights.region * 100.0;

        ProviderScore {
            total: cost + priority + compliance + region,
            cost,
            priority,
            compliance,
            region,
        }
    }

    /// Rank candidates by descending score; ties keep candidate order
    pub fn rank(&self, candidates: Vec<Provider>, preferred_region: Option<&str>) -> Vec<RankedProvider> {
        let cheapest = candidates
            .iter()
            .map(|p| p.cost_budget)
            .filter(|b| *b > 0.0)
            .fold(f64::INFINITY, f64::min);

        let mut ranked: Vec<_> = candidates
            .into_iter()
            .map(|provider| {
                let score = self.score(&provider, cheapest, preferred_region);
                RankedProvider { provider, score }
            })
            .collect();

        // sort_by is stable, so equal scores keep insertion order
        ranked.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }

    /// Eligible providers for a placement, best first.
    ///
    /// Only active providers whose tier satisfies the request are returned.
    pub fn select_providers(&self, snapshot: &[Provider], request: &PlacementRequest) -> Vec<RankedProvider> {
        let candidates: Vec<_> = snapshot
            .iter()
            .filter(|p| p.status == ProviderStatus::Active && p.satisfies(request.required_tier))
            .cloned()
            .collect();
        self.rank(candidates, request.preferred_region.as_deref())
    }

    /// Best failover target for `source`: an active or standby provider other
    /// than the source that satisfies the source's compliance tier.
    pub fn select_failover_target(&self, snapshot: &[Provider], source: &str) -> Option<RankedProvider> {
        let (tier, region) = snapshot
            .iter()
            .find(|p| p.name == source)
            .map(|p| (p.compliance, Some(p.region.clone())))
            .unwrap_or((ComplianceTier::Basic, None));

        let candidates: Vec<_> = snapshot
            .iter()
            .filter(|p| p.name != source)
            .filter(|p| matches!(p.status, ProviderStatus::Active | ProviderStatus::Standby))
            .filter(|p| p.satisfies(tier))
            .cloned()
            .collect();

        self.rank(candidates, region.as_deref()).into_iter().next()
    }
}

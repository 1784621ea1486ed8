//! CloudMesh Orchestrator - multi-cloud control plane composition root
//!
//! Wires the shared registries, health monitoring, failover, replication,
//! cost optimization and compliance into one `MultiCloudManager` and runs
//! the periodic passes on a single cancellable task arena.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MULTI-CLOUD MANAGER                             │
//! │                                                                         │
//! │   deploy_multi_cloud ──► ProviderSelector ──► ProviderAdapter (rank     │
//! │          │                                     order, one at a time)    │
//! │          └──► ResourceRegistry.record ──► ReplicationCoordinator        │
//! │                                                                         │
//! │  ┌──────────────┐   degraded   ┌────────────────────┐                   │
//! │  │ HealthMonitor├─────────────►│ FailoverController │                   │
//! │  └──────────────┘              └────────────────────┘                   │
//! │                                                                         │
//! │  ┌──────────────┐  daily        ┌──────────────────┐  every 6h          │
//! │  │CostOptimizer │◄──────────────┤ BackgroundTasks  ├──────────►┌──────┐ │
//! │  └──────────────┘               └──────────────────┘           │Compl.│ │
//! │                                                                └──────┘ │
//! │           typed events ──► EventBus (one channel per kind)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cost;
pub mod error;
pub mod manager;
pub mod simulated;

pub use config::{ControlPlaneConfig, ReplicationConfig, ScheduleConfig, TimeoutConfig};
pub use cost::{
    recommend, AccessPattern, ApplyFailure, CostAction, CostAnalyzer, CostOptimizer, CostRecommendation,
    OptimizationReport, ProviderSpend, RecommendationCategory, ResourceUsage, RiskLevel, UsageSummary,
    UtilizationAnalyzer,
};
pub use error::{ApplyError, CandidateError, ConfigError, CostError, DeployError, DeployFailure};
pub use manager::{Capabilities, CloudMetrics, Deployment, MultiCloudManager, METRICS_SENTINEL};
pub use simulated::{simulated_fleet, SimulatedProbe, SimulatedProvider};

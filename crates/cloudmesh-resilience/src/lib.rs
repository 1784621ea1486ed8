//! CloudMesh Resilience
//!
//! Provider health monitoring, cross-provider failover and replication.
//!
//! # Recovery Targets
//!
//! | Failure Mode | RTO | RPO | Strategy |
//! |--------------|-----|-----|----------|
//! | Provider degradation | <15m | <5m | Automatic cross-provider failover |
//! | Provider recovery | <15m | 0 | Optional failback to primary |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CLOUDMESH RESILIENCE                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                      HEALTH MONITOR                              │   │
//! │  │   Periodic probes | latency/availability/cost/compliance         │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │ degradation / recovery               │
//! │  ┌──────────────────────────────▼──────────────────────────────────┐   │
//! │  │                    FAILOVER CONTROLLER                           │   │
//! │  │  select → verify → accelerate → redirect → migrate → verify      │   │
//! │  └──────────┬───────────────────────────────────────┬──────────────┘   │
//! │             │                                       │                  │
//! │  ┌──────────▼───────────┐               ┌───────────▼──────────────┐   │
//! │  │ Replication          │               │ Routing / Connections    │   │
//! │  │ Coordinator          │               │ Tables                   │   │
//! │  └──────────────────────┘               └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod failover;
pub mod health;
pub mod replication;
pub mod traffic;

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use cloudmesh_common::AdapterError;

pub use failover::{
    FailoverConfig, FailoverController, FailoverOutcome, FailoverPhase, FailoverReason, FailoverReport,
    FailoverStep, RejectReason,
};
pub use health::{DegradationHandler, HealthMonitor, HealthReport, HealthThresholds, ProviderHealth};
pub use replication::{
    Acceleration, JobHealth, JobState, ReplicationCoordinator, ReplicationFrequency, ReplicationJob,
    ReplicationSettings,
};
pub use traffic::{ConnectionTable, MigrationTally, RouteChange, RoutingTable};

/// Health monitoring errors
#[derive(Debug, Error)]
pub enum HealthError {
    /// Provider not in the registry
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Probe failed or timed out
    #[error("probe of {0} failed: {1}")]
    Probe(String, AdapterError),
}

/// Replication errors
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Job definition rejected
    #[error("invalid replication job: {0}")]
    InvalidJob(String),

    /// No such job
    #[error("replication job not found: {0}")]
    JobNotFound(Uuid),

    /// Job is not running
    #[error("replication job {0} is not running")]
    NotRunning(Uuid),

    /// Key exchange failed
    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    /// Setup exceeded its deadline
    #[error("replication setup timed out after {0:?}")]
    SetupTimeout(Duration),
}

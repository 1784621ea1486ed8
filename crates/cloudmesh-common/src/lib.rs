//! CloudMesh Common - shared model for the multi-provider control plane
//!
//! This crate holds everything the control plane components agree on:
//! - Provider and resource data model
//! - Provider/resource registries with per-entry locking
//! - Placement scoring (`ProviderSelector`)
//! - Capability traits for the excluded provider adapter layer
//! - Typed event bus and the background task arena
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CLOUDMESH CONTROL PLANE                          │
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Provider   │  │  Resource   │  │  Provider   │  │   Event     │     │
//! │  │  Registry   │  │  Registry   │  │  Selector   │  │    Bus      │     │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘     │
//! │         └────────────────┴────────┬───────┴────────────────┘            │
//! │                                   ▼                                     │
//! │  ┌───────────────────────────────────────────────────────────────┐      │
//! │  │          Capability traits (deploy / probe / analyze)          │      │
//! │  │        AWS | GCP | Azure adapters supplied at composition      │      │
//! │  └───────────────────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod error;
pub mod events;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod selector;
pub mod tasks;

pub use adapter::{with_timeout, DeployedResource, HealthProbe, ProbeSample, ProviderAdapter, ResourceSpec};
pub use error::{AdapterError, RegistryError};
pub use events::{ControlPlaneEvent, EventBus};
pub use provider::{ComplianceTier, FailoverTrigger, Provider, ProviderStatus};
pub use registry::{ProviderRegistry, ResourceRegistry};
pub use resource::{BackupFrequency, BackupPolicy, Resource, ResourceCost, ResourceKind};
pub use selector::{DistributionMode, PlacementRequest, ProviderScore, ProviderSelector, RankedProvider};
pub use tasks::BackgroundTasks;

//! CloudMesh Compliance Engine
//!
//! Continuous compliance for resources placed across providers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        COMPLIANCE ENGINE                                │
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐ │
//! │  │  Encryption  │  │   Access     │  │    Data      │  │  Logging /  │ │
//! │  │   at Rest    │  │   Control    │  │  Residency   │  │   Backup    │ │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └──────┬──────┘ │
//! │         │                 │                 │                 │        │
//! │  ┌──────▼─────────────────▼─────────────────▼─────────────────▼──────┐ │
//! │  │                      SCAN → REMEDIATE → SCORE                      │ │
//! │  │   Per-rule isolation | Persistent violations | 0-100 posture       │ │
//! │  └───────────────────────────────┬───────────────────────────────────┘ │
//! │                                  │                                      │
//! │                       ┌──────────▼─────────┐                            │
//! │                       │    Audit Trail     │                            │
//! │                       │   (Hash Chain)     │                            │
//! │                       └────────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod engine;
pub mod evaluator;
pub mod rules;

use std::time::Duration;
use thiserror::Error;

pub use audit::{AuditAction, AuditEntry, AuditTrail, IntegrityResult};
pub use engine::{score, ComplianceEngine, ComplianceReport, ComplianceViolation, RuleFailure, ScanReport};
pub use evaluator::{Finding, ResourceRuleEvaluator, RuleEvaluator};
pub use rules::{builtin_rules, ComplianceRule, RuleType, Severity};

/// Compliance error types
#[derive(Debug, Error)]
pub enum ComplianceError {
    /// Rule check could not complete
    #[error("check {rule} failed: {reason}")]
    CheckFailed {
        /// Rule id
        rule: String,
        /// Cause
        reason: String,
    },

    /// Rule check or remediation exceeded its deadline
    #[error("rule {rule} timed out after {limit:?}")]
    Timeout {
        /// Rule id
        rule: String,
        /// Deadline
        limit: Duration,
    },

    /// Rule has auto-remediation turned off
    #[error("auto-remediation disabled for rule {0}")]
    AutoRemediationDisabled(String),

    /// Violation cannot be fixed automatically
    #[error("rule {rule} cannot be remediated automatically on {resource}")]
    NotRemediable {
        /// Rule id
        rule: String,
        /// Resource id
        resource: String,
    },

    /// Rule not configured
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// Resource no longer recorded
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
}

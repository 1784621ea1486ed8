//! Remediation Audit Trail (Tamper-Evident)

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const GENESIS: &str = "genesis";

/// Audit trail with hash chain
pub struct AuditTrail {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditTrail {
    /// Empty trail
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Append an entry
    pub fn log(&self, action: AuditAction, rule_id: &str, resource_id: &str, details: &str) {
        // tip read and append under one write lock
        let mut entries = self.entries.write();
        let prev_hash = entries.last().map(|e| e.hash.as_str()).unwrap_or(GENESIS).to_string();
        entries.push(AuditEntry::new(action, rule_id, resource_id, details, &prev_hash));
    }

    /// All entries
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the trail is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify chain integrity
    pub fn verify_integrity(&self) -> IntegrityResult {
        Self::verify(&self.entries.read())
    }

    fn verify(entries: &[AuditEntry]) -> IntegrityResult {
        let mut prev_hash = GENESIS.to_string();
        let mut checked = 0;

        for entry in entries {
            if entry.prev_hash != prev_hash {
                return IntegrityResult {
                    valid: false,
                    checked_count: checked,
                    error: Some(format!("Hash chain broken at entry {}", entry.id)),
                };
            }
            if entry.compute_hash() != entry.hash {
                return IntegrityResult {
                    valid: false,
                    checked_count: checked,
                    error: Some(format!("Entry {} hash mismatch", entry.id)),
                };
            }
            prev_hash = entry.hash.clone();
            checked += 1;
        }

        IntegrityResult {
            valid: true,
            checked_count: checked,
            error: None,
        }
    }

    /// JSON export
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.entries.read())
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Fix applied
    RemediationApplied,
    /// Fix attempted and failed
    RemediationFailed,
    /// Rule does not allow automatic fixes
    RemediationSkipped,
}

/// Audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry id
    pub id: Uuid,
    /// When
    pub timestamp: DateTime<Utc>,
    /// Action
    pub action: AuditAction,
    /// Rule
    pub rule_id: String,
    /// Resource
    pub resource_id: String,
    /// Free text
    pub details: String,
    /// Hash of the previous entry
    pub prev_hash: String,
    /// Hash of this entry
    pub hash: String,
}

impl AuditEntry {
    fn new(action: AuditAction, rule_id: &str, resource_id: &str, details: &str, prev_hash: &str) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            rule_id: rule_id.to_string(),
            resource_id: resource_id.to_string(),
            details: details.to_string(),
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    fn compute_hash(&self) -> String {
        let data = format!(
            "{}|{}|{:?}|{}|{}|{}|{}",
            self.id, self.timestamp, self.action, self.rule_id, self.resource_id, self.details, self.prev_hash
        );
        hex::encode(Sha256::digest(data.as_bytes()))
    }
}

/// Integrity check result
#[derive(Debug, Clone)]
pub struct IntegrityResult {
    /// Chain intact
    pub valid: bool,
    /// Entries verified before the first break
    pub checked_count: usize,
    /// Break description
    pub error: Option<String>,
}

//! Traffic routing and connection tracking

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One routing change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteChange {
    /// Previous active provider
    pub from: Option<String>,
    /// New active provider
    pub to: String,
    /// When
    pub at: DateTime<Utc>,
}

/// Which provider receives traffic
pub struct RoutingTable {
    active: RwLock<Option<String>>,
    changes: RwLock<Vec<RouteChange>>,
}

impl RoutingTable {
    /// Table routing to `initial`
    pub fn new(initial: Option<String>) -> Self {
        Self {
            active: RwLock::new(initial),
            changes: RwLock::new(Vec::new()),
        }
    }

    /// Provider currently receiving traffic
    pub fn active(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Redirect traffic from `source` to `target`.
    ///
    /// Only takes effect when `source` is the active route (or no route is
    /// set). Returns whether the route changed.
    pub fn redirect(&self, source: &str, target: &str) -> bool {
        let mut active = self.active.write();
        let routed_here = match active.as_deref() {
            Some(current) => current == source,
            None => true,
        };
        if !routed_here || active.as_deref() == Some(target) {
            return false;
        }

        let change = RouteChange {
            from: active.clone(),
            to: target.to_string(),
            at: Utc::now(),
        };
        *active = Some(target.to_string());
        self.changes.write().push(change);
        tracing::info!(from = %source, to = %target, "Traffic redirected");
        true
    }

    /// Number of route changes so far
    pub fn switch_count(&self) -> usize {
        self.changes.read().len()
    }

    /// Route change log
    pub fn changes(&self) -> Vec<RouteChange> {
        self.changes.read().clone()
    }
}

#[derive(Debug, Clone)]
struct Connection {
    provider: String,
    migratable: bool,
}

/// Result of migrating connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTally {
    /// Moved to the target
    pub migrated: usize,
    /// Not migratable; closed
    pub dropped: usize,
}

/// Open client connections per provider
#[derive(Default)]
pub struct ConnectionTable {
    connections: DashMap<Uuid, Connection>,
}

impl ConnectionTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection
    pub fn open(&self, provider: &str, migratable: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                provider: provider.to_string(),
                migratable,
            },
        );
        id
    }

    /// Stop tracking a connection
    pub fn close(&self, id: Uuid) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Open connections on a provider
    pub fn count_for(&self, provider: &str) -> usize {
        self.connections.iter().filter(|c| c.provider == provider).count()
    }

    /// Move migratable connections to `target`; the rest are dropped
    pub fn migrate(&self, source: &str, target: &str) -> MigrationTally {
        let mut tally = MigrationTally::default();
        self.connections.retain(|_, conn| {
            if conn.provider != source {
                return true;
            }
            if conn.migratable {
                conn.provider = target.to_string();
                tally.migrated += 1;
                true
            } else {
                tally.dropped += 1;
                false
            }
        });
        tracing::info!(from = %source, to = %target, migrated = tally.migrated, dropped = tally.dropped, "Connections migrated");
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_only_from_active_route() {
        let routes = RoutingTable::new(Some("aws".into()));
        assert!(!routes.redirect("gcp", "azure"));
        assert!(routes.redirect("aws", "gcp"));
        assert_eq!(routes.active().as_deref(), Some("gcp"));
        assert_eq!(routes.switch_count(), 1);
        assert_eq!(routes.changes()[0].from.as_deref(), Some("aws"));
    }

    #[test]
    fn test_migrate_drops_pinned_connections() {
        let conns = ConnectionTable::new();
        conns.open("aws", true);
        conns.open("aws", true);
        conns.open("aws", false);
        conns.open("gcp", true);

        let tally = conns.migrate("aws", "gcp");
        assert_eq!(tally, MigrationTally { migrated: 2, dropped: 1 });
        assert_eq!(conns.count_for("aws"), 0);
        assert_eq!(conns.count_for("gcp"), 3);
    }
}

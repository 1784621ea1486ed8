//! Provider and resource registries
//!
//! Each provider entry carries its own lock so a health-triggered status
//! transition and a deploy-time filter on a different provider never contend,
//! while two operations on the same provider always observe a consistent status.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::provider::{Provider, ProviderStatus};
use crate::resource::Resource;

/// Configured providers and their live status
pub struct ProviderRegistry {
    entries: DashMap<String, Arc<RwLock<Provider>>>,
    /// Insertion order, used for tie-breaking
    order: RwLock<Vec<String>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registry loaded from a provider set
    pub fn with_providers(providers: Vec<Provider>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.replace_all(providers)?;
        Ok(registry)
    }

    /// Replace the whole provider set (re-configuration)
    pub fn replace_all(&self, providers: Vec<Provider>) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for provider in &providers {
            provider.validate()?;
            if !seen.insert(provider.name.clone()) {
                return Err(RegistryError::DuplicateProvider(provider.name.clone()));
            }
        }

        let mut order = self.order.write();
        self.entries.clear();
        order.clear();
        for provider in providers {
            order.push(provider.name.clone());
            self.entries
                .insert(provider.name.clone(), Arc::new(RwLock::new(provider)));
        }
        tracing::info!("Loaded {} providers", order.len());
        Ok(())
    }

    /// Shared handle to one provider entry
    pub fn entry(&self, name: &str) -> Result<Arc<RwLock<Provider>>, RegistryError> {
        self.entries
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::ProviderNotFound(name.to_string()))
    }

    /// Copy of one provider
    pub fn get(&self, name: &str) -> Option<Provider> {
        self.entry(name).ok().map(|e| e.read().clone())
    }

    /// Current status of one provider
    pub fn status(&self, name: &str) -> Option<ProviderStatus> {
        self.entry(name).ok().map(|e| e.read().status)
    }

    /// Provider names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Consistent copy of all providers in insertion order
    pub fn snapshot(&self) -> Vec<Provider> {
        let order = self.order.read();
        order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|e| e.value().read().clone()))
            .collect()
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    /// Whether no providers are configured
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a provider along a legal, non-recovery status edge.
    ///
    /// Returns the previous status. Setting the current status again is a no-op.
    pub fn set_status(&self, name: &str, next: ProviderStatus) -> Result<ProviderStatus, RegistryError> {
        let entry = self.entry(name)?;
        let mut provider = entry.write();
        let prev = provider.status;

        if prev == next {
            return Ok(prev);
        }
        if !prev.can_transition_to(next) {
            return Err(RegistryError::IllegalTransition {
                provider: name.to_string(),
                from: prev,
                to: next,
            });
        }
        if prev.is_recovery(next) {
            return Err(RegistryError::RecoveryRequiresProbe(name.to_string()));
        }

        provider.status = next;
        tracing::info!(provider = %name, from = %prev, to = %next, "Provider status changed");
        Ok(prev)
    }

    /// Bring a degraded/offline provider back to active.
    ///
    /// `probe_passed` must be the verdict of a health probe taken after the
    /// failure; recovery is refused without it.
    pub fn recover(&self, name: &str, probe_passed: bool) -> Result<ProviderStatus, RegistryError> {
        let entry = self.entry(name)?;
        let mut provider = entry.write();
        let prev = provider.status;

        match prev {
            ProviderStatus::Active => Ok(prev),
            ProviderStatus::Standby => Err(RegistryError::IllegalTransition {
                provider: name.to_string(),
                from: prev,
                to: ProviderStatus::Active,
            }),
            ProviderStatus::Degraded | ProviderStatus::Offline => {
                if !probe_passed {
                    return Err(RegistryError::RecoveryRequiresProbe(name.to_string()));
                }
                provider.status = ProviderStatus::Active;
                tracing::info!(provider = %name, from = %prev, "Provider recovered");
                Ok(prev)
            }
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deployed resources
pub struct ResourceRegistry {
    resources: DashMap<String, Resource>,
}

impl ResourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    /// Record a freshly deployed resource.
    ///
    /// The owning provider's entry is read-locked for the duration of the
    /// insert, so a concurrent transition to offline is ordered either
    /// entirely before (insert refused) or after (insert visible).
    pub fn record(&self, resource: Resource, providers: &ProviderRegistry) -> Result<(), RegistryError> {
        let entry = providers.entry(&resource.provider)?;
        let provider = entry.read();
        if provider.status == ProviderStatus::Offline {
            return Err(RegistryError::ProviderOffline(provider.name.clone()));
        }
        tracing::debug!(resource = %resource.id, provider = %resource.provider, "Recording resource");
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Copy of one resource
    pub fn get(&self, id: &str) -> Option<Resource> {
        self.resources.get(id).map(|r| r.value().clone())
    }

    /// Remove a resource record (teardown)
    pub fn remove(&self, id: &str) -> Result<Resource, RegistryError> {
        self.resources
            .remove(id)
            .map(|(_, r)| r)
            .ok_or_else(|| RegistryError::ResourceNotFound(id.to_string()))
    }

    /// Mutate one resource in place
    pub fn update<F>(&self, id: &str, f: F) -> Result<Resource, RegistryError>
    where
        F: FnOnce(&mut Resource),
    {
        let mut entry = self
            .resources
            .get_mut(id)
            .ok_or_else(|| RegistryError::ResourceNotFound(id.to_string()))?;
        f(entry.value_mut());
        Ok(entry.value().clone())
    }

    /// All resources, oldest first
    pub fn all(&self) -> Vec<Resource> {
        let mut all: Vec<_> = self.resources.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Resources owned by one provider
    pub fn by_provider(&self, provider: &str) -> Vec<Resource> {
        self.all().into_iter().filter(|r| r.provider == provider).collect()
    }

    /// Resource count per provider
    pub fn count_by_provider(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for r in self.resources.iter() {
            *counts.entry(r.value().provider.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Monthly spend of one provider's resources
    pub fn monthly_spend(&self, provider: &str) -> f64 {
        self.resources
            .iter()
            .filter(|r| r.value().provider == provider)
            .map(|r| r.value().cost.monthly)
            .sum()
    }

    /// Re-home every resource of `source` onto `target`, returning moved ids
    pub fn reassign(&self, source: &str, target: &str) -> Vec<String> {
        let mut moved = Vec::new();
        for mut r in self.resources.iter_mut() {
            if r.provider == source {
                r.provider = target.to_string();
                r.tags.insert("failover-from".into(), source.to_string());
                moved.push(r.id.clone());
            }
        }
        moved.sort();
        moved
    }

    /// Move resources that failed over from `home` back to it, returning moved ids
    pub fn return_home(&self, current: &str, home: &str) -> Vec<String> {
        let mut moved = Vec::new();
        for mut r in self.resources.iter_mut() {
            if r.provider == current && r.tags.get("failover-from").map(String::as_str) == Some(home) {
                r.provider = home.to_string();
                r.tags.remove("failover-from");
                moved.push(r.id.clone());
            }
        }
        moved.sort();
        moved
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

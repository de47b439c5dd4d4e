//! Adapter registry.
//!
//! Holds registered adapters and their descriptor snapshots. Initialized
//! once at process startup and read-only during a run; the ranking key makes
//! every query result total and reproducible.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::{Adapter, AdapterDescriptor};
use crate::types::ActorKind;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("adapter '{0}' is already registered")]
    Duplicate(String),

    #[error("adapter name must not be empty")]
    EmptyName,
}

struct RegistryEntry {
    adapter: Arc<dyn Adapter>,
    descriptor: AdapterDescriptor,
}

/// Name-keyed adapter registry.
#[derive(Default)]
pub struct AdapterRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register an adapter under its descriptor name.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Result<(), RegistryError> {
        let descriptor = adapter.descriptor();
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.entries.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        tracing::debug!(adapter = %descriptor.name, kind = ?descriptor.kind, "adapter registered");
        self.entries.insert(
            descriptor.name.clone(),
            RegistryEntry { adapter, descriptor },
        );
        Ok(())
    }

    /// Look up an adapter by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.entries.get(name).map(|e| e.adapter.clone())
    }

    /// Descriptor snapshot for a registered adapter.
    pub fn descriptor(&self, name: &str) -> Option<&AdapterDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates for an actor kind holding all required capabilities,
    /// ranked by the total ordering key.
    pub fn query(
        &self,
        actor: ActorKind,
        capabilities_required: &[String],
        prefer_deterministic: bool,
    ) -> Vec<AdapterDescriptor> {
        let mut candidates: Vec<AdapterDescriptor> = self
            .entries
            .values()
            .map(|e| e.descriptor.clone())
            .filter(|d| d.supports_actor(actor))
            .filter(|d| {
                capabilities_required
                    .iter()
                    .all(|cap| d.capabilities.contains(cap))
            })
            .collect();
        candidates.sort_by(|a, b| ranking_key(a, prefer_deterministic).cmp(&ranking_key(b, prefer_deterministic)));
        candidates
    }

    /// Re-probe availability for every registered adapter.
    pub fn refresh_availability<F>(&mut self, probe: F)
    where
        F: Fn(&AdapterDescriptor) -> bool,
    {
        for entry in self.entries.values_mut() {
            entry.descriptor.available = probe(&entry.descriptor);
        }
    }
}

/// Ranking key: `(availability desc, deterministic-first when preferred,
/// estimated_cost asc, name asc)` — the name makes the order total.
fn ranking_key(d: &AdapterDescriptor, prefer_deterministic: bool) -> (bool, bool, u64, String) {
    (
        !d.available,
        prefer_deterministic && !d.is_deterministic(),
        d.estimated_cost,
        d.name.clone(),
    )
}

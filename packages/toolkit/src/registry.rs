//! Shipwright-Toolkit: Tool Registry
//!
//! In-memory, read-mostly index of tools by capability and by id. Writers
//! take the write half of the lock for the whole mutation, so readers never
//! see the two indexes out of sync. Registration is idempotent per id:
//! re-registering replaces the descriptor in place without changing its
//! position in the capability ordering.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityClass;
use crate::tool::ToolSpec;

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, Arc<ToolSpec>>,
    by_capability: HashMap<CapabilityClass, Vec<Arc<ToolSpec>>>,
}

/// Registry statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    /// Tool counts keyed by capability name
    pub by_capability: BTreeMap<String, usize>,
}

/// Capability- and id-indexed tool registry.
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register or replace a tool.
    pub fn register(&self, spec: ToolSpec) {
        let spec = Arc::new(spec);
        let mut inner = self.inner.write();

        if let Some(existing) = inner.by_id.insert(spec.id.clone(), spec.clone()) {
            // Same id: swap in place, and drop from the old capability list
            // if the capability changed
            let list = inner.by_capability.entry(existing.capability).or_default();
            if let Some(slot) = list.iter_mut().find(|t| t.id == spec.id) {
                if existing.capability == spec.capability {
                    *slot = spec;
                    tracing::debug!(tool_id = %existing.id, "Tool re-registered");
                    return;
                }
            }
            list.retain(|t| t.id != spec.id);
        }

        tracing::debug!(tool_id = %spec.id, capability = %spec.capability, "Tool registered");
        inner.by_capability.entry(spec.capability).or_default().push(spec);
    }

    /// Register a batch.
    pub fn register_many(&self, specs: impl IntoIterator<Item = ToolSpec>) {
        for spec in specs {
            self.register(spec);
        }
    }

    /// Tools for a capability, in registration order.
    pub fn get_by_capability(&self, capability: CapabilityClass) -> Vec<Arc<ToolSpec>> {
        self.inner
            .read()
            .by_capability
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Tool by id.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<ToolSpec>> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Remove a tool from both indexes.
    pub fn unregister(&self, id: &str) -> Option<Arc<ToolSpec>> {
        let mut inner = self.inner.write();
        let removed = inner.by_id.remove(id)?;
        if let Some(list) = inner.by_capability.get_mut(&removed.capability) {
            list.retain(|t| t.id != id);
        }
        tracing::debug!(tool_id = %id, "Tool unregistered");
        Some(removed)
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_id.clear();
        inner.by_capability.clear();
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        RegistryStats {
            total_tools: inner.by_id.len(),
            by_capability: inner
                .by_capability
                .iter()
                .filter(|(_, tools)| !tools.is_empty())
                .map(|(cap, tools)| (cap.as_str().to_string(), tools.len()))
                .collect(),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{BackendId, Catalog};
use crate::hardware::HardwareProbe;
use crate::registry::ResourceRegistry;

/// Backends used at least this often survive `cleanup_unused`.
pub const MIN_USES_TO_KEEP: u64 = 3;

/// Disk headroom kept on top of any requested amount.
pub const DISK_MARGIN_MB: u64 = 500;

/// Removes swarm-acquired backends to free capacity.
///
/// Only ids in the registry's swarm-acquired set are ever touched, and a
/// catalog entry flagged `always_keep` is never removed.
pub struct Evictor {
    catalog: Arc<Catalog>,
    registry: Arc<ResourceRegistry>,
    probe: Arc<dyn HardwareProbe>,
}

impl Evictor {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<ResourceRegistry>,
        probe: Arc<dyn HardwareProbe>,
    ) -> Self {
        Self {
            catalog,
            registry,
            probe,
        }
    }

    /// Whether `cleanup_unused` may remove `id`.
    ///
    /// Unknown ids have no catalog entry to protect them and are always
    /// eligible unless kept explicitly.
    pub fn is_cleanup_candidate(&self, id: &str, keep: &[BackendId]) -> bool {
        if keep.iter().any(|k| k == id) {
            return false;
        }
        match self.catalog.get(id) {
            None => true,
            Some(descriptor) if descriptor.always_keep => false,
            Some(_) => self.registry.usage_count(id) < MIN_USES_TO_KEEP,
        }
    }

    /// Remove every eligible swarm-acquired backend; returns how many went.
    pub async fn cleanup_unused(&self, keep: &[BackendId]) -> usize {
        let mut removed = 0;
        for id in self.registry.swarm_acquired() {
            if !self.is_cleanup_candidate(&id, keep) {
                debug!(backend = %id, "Keeping backend");
                continue;
            }
            if self.uninstall(&id).await {
                removed += 1;
            }
        }
        info!(removed, "Cleanup finished");
        removed
    }

    /// Evict least-used backends until free disk reaches
    /// `required_mb + DISK_MARGIN_MB`.
    ///
    /// Returns `false` when candidates run out or an eviction fails. Each
    /// eviction is persisted before the next one is attempted, and the loop
    /// runs at most once per swarm-acquired backend.
    pub async fn free_space_for(&self, required_mb: u64) -> bool {
        let target = required_mb.saturating_add(DISK_MARGIN_MB);
        let acquired = self.registry.swarm_acquired();
        let pinned: Vec<BackendId> = acquired
            .iter()
            .filter(|id| self.catalog.is_always_keep(id))
            .cloned()
            .collect();
        let mut budget = acquired.len();

        loop {
            let free = self.probe.snapshot().await.free_disk_mb;
            if free >= target {
                return true;
            }
            if budget == 0 {
                warn!(free_mb = free, target_mb = target, "Eviction budget exhausted");
                return false;
            }
            budget -= 1;

            let Some(victim) = self.registry.least_used(&pinned) else {
                warn!(free_mb = free, target_mb = target, "No backend left to evict");
                return false;
            };
            if !self.uninstall(&victim).await {
                return false;
            }
        }
    }

    async fn uninstall(&self, id: &str) -> bool {
        info!(backend = id, "Removing backend");
        match self.registry.packages().remove(id).await {
            Ok(()) => {
                if let Err(e) = self.registry.forget(id) {
                    warn!(backend = id, error = %e, "Removed backend but could not persist it");
                }
                true
            }
            Err(e) => {
                warn!(backend = id, error = %e, "Remove failed");
                false
            }
        }
    }
}

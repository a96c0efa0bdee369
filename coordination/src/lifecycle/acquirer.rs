use std::sync::Arc;

use tracing::{info, warn};

use super::Evictor;
use crate::catalog::{BackendId, Catalog, VOTER_MODELS};
use crate::registry::ResourceRegistry;

/// Ensures backends are resident, pulling them when allowed.
pub struct Acquirer {
    catalog: Arc<Catalog>,
    registry: Arc<ResourceRegistry>,
    auto_download: bool,
    evictor: Option<Arc<Evictor>>,
}

impl Acquirer {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<ResourceRegistry>,
        auto_download: bool,
    ) -> Self {
        Self {
            catalog,
            registry,
            auto_download,
            evictor: None,
        }
    }

    /// Free disk through `evictor` before each pull.
    pub fn with_evictor(mut self, evictor: Arc<Evictor>) -> Self {
        self.evictor = Some(evictor);
        self
    }

    /// Whether pulls are allowed when the caller does not say.
    pub fn auto_download(&self) -> bool {
        self.auto_download
    }

    /// Make `id` resident.
    ///
    /// Already resident → `true` with no side effect. Not resident and
    /// `auto_download == false` → `false` with no side effect. Otherwise one
    /// pull is attempted (no retry); only a successful pull touches the
    /// registry.
    pub async fn ensure_available(&self, id: &str, auto_download: bool) -> bool {
        if self.registry.is_resident(id).await {
            return true;
        }
        if !auto_download {
            return false;
        }

        let Some(descriptor) = self.catalog.get(id) else {
            warn!(backend = id, "Refusing to pull a backend missing from the catalog");
            return false;
        };

        if let Some(evictor) = &self.evictor {
            if !evictor.free_space_for(descriptor.size_mb).await {
                warn!(
                    backend = id,
                    size_mb = descriptor.size_mb,
                    "Not enough disk to pull backend"
                );
                return false;
            }
        }

        info!(backend = id, size_mb = descriptor.size_mb, "Pulling backend");
        match self.registry.packages().pull(id).await {
            Ok(()) => {
                info!(backend = id, "Backend pulled");
                if let Err(e) = self.registry.mark_acquired(id) {
                    warn!(backend = id, error = %e, "Pulled backend but could not persist it");
                }
                true
            }
            Err(e) => {
                warn!(backend = id, error = %e, "Pull failed");
                false
            }
        }
    }

    /// Try `preferred`, then each fallback in order; first success wins.
    pub async fn download_with_fallback(
        &self,
        preferred: &str,
        fallbacks: &[BackendId],
        auto_download: bool,
    ) -> Option<BackendId> {
        if self.ensure_available(preferred, auto_download).await {
            return Some(preferred.to_string());
        }
        for fallback in fallbacks {
            if self.ensure_available(fallback, auto_download).await {
                return Some(fallback.clone());
            }
        }
        None
    }

    /// Make the first `count` default voters resident; returns those that are.
    pub async fn download_voters(&self, count: usize) -> Vec<BackendId> {
        let mut ready = Vec::new();
        for id in VOTER_MODELS.iter().take(count) {
            if self.ensure_available(id, self.auto_download).await {
                ready.push(id.to_string());
            }
        }
        ready
    }
}

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{
    BackendId, Catalog, Complexity, TaskKind, TaskRequirement, DEFAULT_ROUTER_MODEL,
};
use crate::hardware::{HardwareProbe, HardwareProfile};
use crate::lifecycle::Acquirer;
use crate::registry::ResourceRegistry;

/// Outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Smallest eligible backend that was already resident.
    Resident(BackendId),
    /// Smallest eligible backend that had to be acquired.
    Acquired(BackendId),
    /// No eligible backend could be used; this is a best-effort stand-in
    /// that may lie outside the requirement's tier window or capabilities.
    Fallback(BackendId),
}

impl Selection {
    pub fn id(&self) -> &str {
        match self {
            Self::Resident(id) | Self::Acquired(id) | Self::Fallback(id) => id,
        }
    }

    pub fn into_id(self) -> BackendId {
        match self {
            Self::Resident(id) | Self::Acquired(id) | Self::Fallback(id) => id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no backend can satisfy tier window [{min_tier}, {max_tier}]")]
    NotFound { min_tier: u8, max_tier: u8 },

    #[error("catalog has no requirement template for {0}")]
    UnknownTask(TaskKind),
}

/// Picks backends for jobs within the run's hardware envelope.
pub struct Selector {
    catalog: Arc<Catalog>,
    registry: Arc<ResourceRegistry>,
    acquirer: Arc<Acquirer>,
    probe: Arc<dyn HardwareProbe>,
    profile: HardwareProfile,
}

impl Selector {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<ResourceRegistry>,
        acquirer: Arc<Acquirer>,
        probe: Arc<dyn HardwareProbe>,
        profile: HardwareProfile,
    ) -> Self {
        Self {
            catalog,
            registry,
            acquirer,
            probe,
            profile,
        }
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// Select a backend for `requirement` under `profile`.
    ///
    /// 1. Tier window `[min_tier (+complexity upgrade), profile tier cap]`;
    ///    an empty window is `NotFound`.
    /// 2. Candidates: in-window backends covering the capabilities,
    ///    smallest first.
    /// 3. First resident candidate using at most 70% of available RAM.
    /// 4. Unless `offline`, first fitting candidate the acquirer can pull.
    /// 5. Otherwise the first catalog backend that is resident (a bare
    ///    `name` matches `name:latest`), else the default router.
    ///
    /// Steps 3 and 4 bump the chosen backend's usage counter; step 5 does not.
    pub async fn select(
        &self,
        requirement: &TaskRequirement,
        complexity: Option<Complexity>,
        profile: &HardwareProfile,
        offline: bool,
    ) -> Result<Selection, SelectError> {
        let min_tier = requirement.effective_min_tier(complexity);
        let max_tier = profile.tier_cap();
        if min_tier > max_tier {
            debug!(min_tier, max_tier, "Tier window is empty");
            return Err(SelectError::NotFound { min_tier, max_tier });
        }

        let candidates = self
            .catalog
            .candidates(&requirement.capabilities, min_tier, max_tier);
        let resident = self.registry.resident().await;

        let snapshot = self.probe.snapshot().await;
        for candidate in &candidates {
            if resident.contains_exact(&candidate.id) && snapshot.fits_ram(candidate.ram_mb) {
                info!(backend = %candidate.id, "Selected resident backend");
                self.record_usage(&candidate.id);
                return Ok(Selection::Resident(candidate.id.clone()));
            }
        }

        if !offline {
            for candidate in &candidates {
                if !snapshot.fits_ram(candidate.ram_mb) {
                    continue;
                }
                if self
                    .acquirer
                    .ensure_available(&candidate.id, self.acquirer.auto_download())
                    .await
                {
                    info!(backend = %candidate.id, "Selected acquired backend");
                    self.record_usage(&candidate.id);
                    return Ok(Selection::Acquired(candidate.id.clone()));
                }
            }
        }

        let fallback = self
            .catalog
            .backends()
            .iter()
            .find(|b| resident.contains_exact(&b.id))
            .map(|b| b.id.clone())
            .unwrap_or_else(|| DEFAULT_ROUTER_MODEL.to_string());
        warn!(backend = %fallback, offline, "No eligible backend, falling back");
        Ok(Selection::Fallback(fallback))
    }

    /// Select from the catalog's template for `kind` under the run's profile.
    pub async fn select_for_task(
        &self,
        kind: TaskKind,
        complexity: Option<Complexity>,
        offline: bool,
    ) -> Result<Selection, SelectError> {
        let requirement = self
            .catalog
            .requirement(kind)
            .ok_or(SelectError::UnknownTask(kind))?;
        self.select(requirement, complexity, &self.profile, offline)
            .await
    }

    pub async fn select_coder(
        &self,
        complexity: Complexity,
        offline: bool,
    ) -> Result<Selection, SelectError> {
        self.select_for_task(TaskKind::CodeGeneration, Some(complexity), offline)
            .await
    }

    /// Router for quick votes, analysis and chat. Never fails: an empty
    /// window degrades to the default router.
    pub async fn select_router(&self, offline: bool) -> BackendId {
        match self
            .select_for_task(TaskKind::Routing, Some(Complexity::Simple), offline)
            .await
        {
            Ok(selection) => selection.into_id(),
            Err(e) => {
                warn!(error = %e, "Router selection failed, using default router");
                DEFAULT_ROUTER_MODEL.to_string()
            }
        }
    }

    /// Up to `count` voting-capable backends, smallest first, that are or can
    /// be made resident. Falls back to the default router alone.
    pub async fn select_voters(&self, count: usize, offline: bool) -> Vec<BackendId> {
        let capabilities = self
            .catalog
            .requirement(TaskKind::Voting)
            .map(|r| r.capabilities.clone())
            .unwrap_or_else(|| ["voting".to_string()].into());
        let candidates = self
            .catalog
            .candidates(&capabilities, 0, self.profile.tier_cap());

        let mut selected = Vec::new();
        for candidate in candidates.into_iter().take(count) {
            if self.acquirer.ensure_available(&candidate.id, !offline).await {
                selected.push(candidate.id.clone());
            }
        }

        if selected.is_empty() {
            warn!("No voter available, voting with the default router");
            selected.push(DEFAULT_ROUTER_MODEL.to_string());
        }
        debug!(voters = ?selected, "Voter pool");
        selected
    }

    /// The configured voter `ids`, in order, that fit under the profile's
    /// tier cap and are or can be made resident. Ids missing from the catalog
    /// are used only when already resident. An empty pool defers to
    /// [`Selector::select_voters`] with the same count.
    pub async fn select_configured_voters(
        &self,
        ids: &[BackendId],
        offline: bool,
    ) -> Vec<BackendId> {
        let tier_cap = self.profile.tier_cap();
        let mut selected: Vec<BackendId> = Vec::new();
        for id in ids {
            if selected.contains(id) {
                continue;
            }
            if let Some(d) = self.catalog.get(id).filter(|d| d.tier > tier_cap) {
                debug!(backend = %id, tier = d.tier, tier_cap, "Configured voter above tier cap");
                continue;
            }
            if self.acquirer.ensure_available(id, !offline).await {
                selected.push(id.clone());
            }
        }

        if selected.is_empty() {
            return self.select_voters(ids.len().max(1), offline).await;
        }
        debug!(voters = ?selected, "Configured voter pool");
        selected
    }

    fn record_usage(&self, id: &str) {
        if let Err(e) = self.registry.record_usage(id) {
            warn!(backend = id, error = %e, "Could not persist usage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{HardwareSnapshot, ProfileName, StaticProbe};
    use crate::registry::tests::FakePackages;

    struct Fixture {
        selector: Selector,
        packages: Arc<FakePackages>,
        registry: Arc<ResourceRegistry>,
        _dir: tempfile::TempDir,
    }

    fn fixture(packages: FakePackages, available_ram_mb: u64, profile: ProfileName) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::builtin());
        let packages = Arc::new(packages);
        let registry = Arc::new(ResourceRegistry::open(
            dir.path().join("registry.json"),
            packages.clone(),
        ));
        let acquirer = Arc::new(Acquirer::new(catalog.clone(), registry.clone(), true));
        let probe = Arc::new(StaticProbe(HardwareSnapshot {
            total_ram_mb: 16_384,
            available_ram_mb,
            free_disk_mb: 50_000,
            cpu_cores: 8,
        }));
        let selector = Selector::new(
            catalog,
            registry.clone(),
            acquirer,
            probe,
            HardwareProfile::for_name(profile),
        );
        Fixture {
            selector,
            packages,
            registry,
            _dir: dir,
        }
    }

    fn code_gen() -> TaskRequirement {
        TaskRequirement::new(["code_generation"], 1)
    }

    #[tokio::test]
    async fn test_only_larger_coder_resident_is_selected() {
        let f = fixture(
            FakePackages::with_resident(&["qwen2.5-coder:3b"]),
            8_000,
            ProfileName::Moderate,
        );
        let profile = f.selector.profile().clone();
        let got = f
            .selector
            .select(&code_gen(), None, &profile, false)
            .await
            .unwrap();
        assert_eq!(got, Selection::Resident("qwen2.5-coder:3b".into()));
        assert_eq!(f.registry.usage_count("qwen2.5-coder:3b"), 1);
        assert!(f.packages.pulls().is_empty());
    }

    #[tokio::test]
    async fn test_smallest_resident_wins() {
        let f = fixture(
            FakePackages::with_resident(&["qwen2.5-coder:3b", "qwen2.5-coder:1.5b"]),
            8_000,
            ProfileName::Moderate,
        );
        let got = f
            .selector
            .select_coder(Complexity::Medium, false)
            .await
            .unwrap();
        assert_eq!(got.id(), "qwen2.5-coder:1.5b");
    }

    #[tokio::test]
    async fn test_resident_over_ram_budget_is_skipped() {
        // 70% of 2000 = 1400: tinyllama (800) fits, phi3:mini (2800) does not.
        let f = fixture(
            FakePackages::with_resident(&["phi3:mini"]),
            2_000,
            ProfileName::Moderate,
        );
        let review = TaskRequirement::new(["review"], 0);
        let profile = f.selector.profile().clone();
        let got = f
            .selector
            .select(&review, None, &profile, false)
            .await
            .unwrap();
        assert_eq!(got, Selection::Acquired("tinyllama".into()));
        assert_eq!(f.packages.pulls(), vec!["tinyllama".to_string()]);
        assert!(f.registry.is_swarm_acquired("tinyllama"));
        assert_eq!(f.registry.usage_count("phi3:mini"), 0);
    }

    #[tokio::test]
    async fn test_empty_tier_window_is_not_found() {
        let f = fixture(FakePackages::default(), 8_000, ProfileName::Minimal);
        let err = f
            .selector
            .select_coder(Complexity::Complex, false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SelectError::NotFound {
                min_tier: 2,
                max_tier: 1
            }
        );
        assert!(f.packages.pulls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_falls_back_to_resident_catalog_backend() {
        let f = fixture(
            FakePackages::with_resident(&["llama3:70b", "tinyllama"]),
            8_000,
            ProfileName::Moderate,
        );
        let got = f
            .selector
            .select_coder(Complexity::Medium, true)
            .await
            .unwrap();
        assert_eq!(got, Selection::Fallback("tinyllama".into()));
        assert!(f.packages.pulls().is_empty());
        assert_eq!(f.registry.usage_count("tinyllama"), 0);
    }

    #[tokio::test]
    async fn test_fallback_matches_tagged_resident_to_catalog_id() {
        let f = fixture(
            FakePackages::with_resident(&["llama3:70b", "tinyllama:latest"]),
            8_000,
            ProfileName::Moderate,
        );
        let got = f
            .selector
            .select_coder(Complexity::Medium, true)
            .await
            .unwrap();
        assert_eq!(got, Selection::Fallback("tinyllama".into()));
        assert_eq!(f.registry.usage_count("tinyllama"), 0);
        assert_eq!(f.registry.usage_count("tinyllama:latest"), 0);
    }

    #[tokio::test]
    async fn test_fallback_default_when_nothing_resident() {
        let f = fixture(FakePackages::default(), 8_000, ProfileName::Moderate);
        let got = f
            .selector
            .select_coder(Complexity::Medium, true)
            .await
            .unwrap();
        assert_eq!(got, Selection::Fallback(DEFAULT_ROUTER_MODEL.into()));
        assert_eq!(f.registry.usage_count(DEFAULT_ROUTER_MODEL), 0);
    }

    #[tokio::test]
    async fn test_failed_pulls_fall_through_to_next_candidate() {
        let packages = FakePackages {
            fail_pull: ["qwen2.5-coder:1.5b".to_string()].into(),
            ..FakePackages::default()
        };
        let f = fixture(packages, 8_000, ProfileName::Moderate);
        let got = f
            .selector
            .select_coder(Complexity::Medium, false)
            .await
            .unwrap();
        assert_eq!(got, Selection::Acquired("qwen2.5-coder:3b".into()));
    }

    #[tokio::test]
    async fn test_non_fallback_selection_respects_window_and_capabilities() {
        let caps = [
            "classification",
            "voting",
            "code_generation",
            "reasoning",
            "review",
        ];
        let catalog = Catalog::builtin();
        let resident: Vec<&str> = catalog.backends().iter().map(|b| b.id.as_str()).collect();
        for profile in ProfileName::all() {
            for cap in caps {
                for min_tier in 0..=2u8 {
                    for available in [600, 2_000, 8_000] {
                        let packages = FakePackages::with_resident(&resident);
                        let f = fixture(packages, available, *profile);
                        let req = TaskRequirement::new([cap], min_tier);
                        let hw = f.selector.profile().clone();
                        let snapshot = f.selector.probe.snapshot().await;
                        match f.selector.select(&req, None, &hw, true).await {
                            Ok(Selection::Resident(id)) | Ok(Selection::Acquired(id)) => {
                                let d = catalog.get(&id).unwrap();
                                assert!(d.tier >= min_tier && d.tier <= hw.tier_cap());
                                assert!(d.capabilities.contains(cap));
                                assert!(snapshot.fits_ram(d.ram_mb), "{id} over RAM budget");
                            }
                            Ok(Selection::Fallback(_)) => {}
                            Err(SelectError::NotFound { min_tier: lo, max_tier: hi }) => {
                                assert!(lo > hi);
                            }
                            Err(e) => panic!("unexpected error {e}"),
                        }
                    }
                }
            }
        }
    }

    /// Counts how often the host is sampled.
    struct CountingProbe {
        inner: StaticProbe,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl HardwareProbe for CountingProbe {
        async fn snapshot(&self) -> HardwareSnapshot {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.snapshot().await
        }
    }

    #[tokio::test]
    async fn test_select_samples_host_once() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::builtin());
        let packages = Arc::new(FakePackages {
            fail_pull: ["qwen2.5-coder:1.5b".to_string()].into(),
            ..FakePackages::default()
        });
        let registry = Arc::new(ResourceRegistry::open(
            dir.path().join("registry.json"),
            packages.clone(),
        ));
        let acquirer = Arc::new(Acquirer::new(catalog.clone(), registry.clone(), true));
        let probe = Arc::new(CountingProbe {
            inner: StaticProbe(HardwareSnapshot {
                total_ram_mb: 16_384,
                available_ram_mb: 8_000,
                free_disk_mb: 50_000,
                cpu_cores: 8,
            }),
            calls: Default::default(),
        });
        let selector = Selector::new(
            catalog,
            registry,
            acquirer,
            probe.clone(),
            HardwareProfile::for_name(ProfileName::Moderate),
        );

        // One failed pull, then an acquisition: two candidates walked.
        let got = selector.select_coder(Complexity::Medium, false).await.unwrap();
        assert_eq!(got, Selection::Acquired("qwen2.5-coder:3b".into()));
        assert_eq!(probe.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_router_selection() {
        let f = fixture(
            FakePackages::with_resident(&["tinyllama", "qwen2.5:0.5b"]),
            8_000,
            ProfileName::Limited,
        );
        assert_eq!(f.selector.select_router(true).await, "qwen2.5:0.5b");
    }

    #[tokio::test]
    async fn test_select_voters_smallest_first_within_count() {
        let f = fixture(FakePackages::default(), 8_000, ProfileName::Moderate);
        let voters = f.selector.select_voters(3, false).await;
        assert_eq!(voters, vec!["qwen2.5:0.5b".to_string(), "tinyllama".to_string()]);
    }

    #[tokio::test]
    async fn test_configured_voters_keep_order_and_tier_cap() {
        let f = fixture(
            FakePackages::with_resident(&["tinyllama", "phi3:mini"]),
            8_000,
            ProfileName::Minimal,
        );
        let ids: Vec<BackendId> = ["tinyllama", "phi3:mini", "tinyllama", "qwen2.5:0.5b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let voters = f.selector.select_configured_voters(&ids, false).await;
        assert_eq!(voters, vec!["tinyllama".to_string(), "qwen2.5:0.5b".to_string()]);
        assert_eq!(f.packages.pulls(), vec!["qwen2.5:0.5b".to_string()]);
    }

    #[tokio::test]
    async fn test_configured_voters_unavailable_defer_to_catalog_pool() {
        let f = fixture(
            FakePackages::with_resident(&["qwen2.5:0.5b"]),
            8_000,
            ProfileName::Moderate,
        );
        let ids = vec!["my-custom-voter".to_string()];
        let voters = f.selector.select_configured_voters(&ids, true).await;
        assert_eq!(voters, vec!["qwen2.5:0.5b".to_string()]);
        assert!(f.packages.pulls().is_empty());
    }

    #[tokio::test]
    async fn test_select_voters_offline_falls_back_to_router() {
        let f = fixture(FakePackages::default(), 8_000, ProfileName::Moderate);
        let voters = f.selector.select_voters(3, true).await;
        assert_eq!(voters, vec![DEFAULT_ROUTER_MODEL.to_string()]);
        assert!(f.packages.pulls().is_empty());
    }
}

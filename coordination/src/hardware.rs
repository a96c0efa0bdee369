//! Hardware profiles: the resource envelope a run is allowed to use.
//!
//! A profile is chosen once per run from a total-RAM ladder. Engines only
//! consume the derived profile and the numeric figures of a
//! [`HardwareSnapshot`]; how those figures are probed is left to a
//! [`HardwareProbe`] implementation supplied by the application.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::{DEFAULT_CODER_MODEL, MAX_TIER};

/// Headroom applied to available memory before a backend is considered to fit.
pub const RAM_SAFETY_FRACTION: f64 = 0.7;

/// Named hardware class, ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileName {
    Minimal,
    Limited,
    Moderate,
    Powerful,
}

impl ProfileName {
    /// Pick the profile for a host with `total_ram_gb` of memory.
    ///
    /// Ladder: `< 6` minimal, `< 12` limited, `< 24` moderate, else powerful.
    pub fn for_total_ram_gb(total_ram_gb: f64) -> Self {
        if total_ram_gb < 6.0 {
            Self::Minimal
        } else if total_ram_gb < 12.0 {
            Self::Limited
        } else if total_ram_gb < 24.0 {
            Self::Moderate
        } else {
            Self::Powerful
        }
    }

    pub fn all() -> &'static [ProfileName] {
        &[
            Self::Minimal,
            Self::Limited,
            Self::Moderate,
            Self::Powerful,
        ]
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Limited => write!(f, "limited"),
            Self::Moderate => write!(f, "moderate"),
            Self::Powerful => write!(f, "powerful"),
        }
    }
}

impl FromStr for ProfileName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "limited" => Ok(Self::Limited),
            "moderate" => Ok(Self::Moderate),
            "powerful" => Ok(Self::Powerful),
            other => Err(format!("unknown hardware profile: {other}")),
        }
    }
}

/// Thresholds attached to a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub name: ProfileName,
    pub min_ram_gb: u32,
    pub max_model_tier: u8,
    pub allow_parallel: bool,
    pub max_loaded_models: usize,
    /// Coder to use when the configuration asks for `"auto"`.
    pub recommended_model: String,
}

impl HardwareProfile {
    pub fn for_name(name: ProfileName) -> Self {
        let (min_ram_gb, max_model_tier, allow_parallel, max_loaded_models, recommended) =
            match name {
                ProfileName::Minimal => (4, 1, false, 1, DEFAULT_CODER_MODEL),
                ProfileName::Limited => (8, 2, false, 1, DEFAULT_CODER_MODEL),
                ProfileName::Moderate => (16, 2, true, 3, "qwen2.5-coder:3b"),
                ProfileName::Powerful => (32, 2, true, 5, "qwen2.5-coder:3b"),
            };
        Self {
            name,
            min_ram_gb,
            max_model_tier,
            allow_parallel,
            max_loaded_models,
            recommended_model: recommended.to_string(),
        }
    }

    /// Profile for a probed host, honouring an explicit override.
    pub fn detect(snapshot: &HardwareSnapshot, overridden: Option<ProfileName>) -> Self {
        let name = overridden
            .unwrap_or_else(|| ProfileName::for_total_ram_gb(snapshot.total_ram_gb()));
        Self::for_name(name)
    }

    /// Upper tier bound for selection, never above the catalog's own ceiling.
    pub fn tier_cap(&self) -> u8 {
        self.max_model_tier.min(MAX_TIER)
    }
}

/// Point-in-time resource figures for the host, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    pub total_ram_mb: u64,
    pub available_ram_mb: u64,
    pub free_disk_mb: u64,
    pub cpu_cores: usize,
}

impl HardwareSnapshot {
    pub fn total_ram_gb(&self) -> f64 {
        self.total_ram_mb as f64 / 1024.0
    }

    /// Whether a backend needing `ram_mb` fits inside the safety margin.
    pub fn fits_ram(&self, ram_mb: u64) -> bool {
        (ram_mb as f64) <= self.available_ram_mb as f64 * RAM_SAFETY_FRACTION
    }

    /// How many backends could be served side by side.
    pub fn parallel_capacity(&self) -> usize {
        if self.available_ram_mb > 8000 {
            3
        } else if self.available_ram_mb > 4000 {
            2
        } else {
            1
        }
    }
}

/// Source of live host figures.
///
/// Probing may read files or spawn processes, so it is awaited rather than
/// run on the executor thread.
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    async fn snapshot(&self) -> HardwareSnapshot;
}

/// Probe returning a fixed snapshot, for tests and for pinning a run.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub HardwareSnapshot);

#[async_trait]
impl HardwareProbe for StaticProbe {
    async fn snapshot(&self) -> HardwareSnapshot {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(total_gb: u64, available_mb: u64) -> HardwareSnapshot {
        HardwareSnapshot {
            total_ram_mb: total_gb * 1024,
            available_ram_mb: available_mb,
            free_disk_mb: 10_000,
            cpu_cores: 4,
        }
    }

    #[test]
    fn test_profile_ladder() {
        assert_eq!(ProfileName::for_total_ram_gb(4.0), ProfileName::Minimal);
        assert_eq!(ProfileName::for_total_ram_gb(6.0), ProfileName::Limited);
        assert_eq!(ProfileName::for_total_ram_gb(11.9), ProfileName::Limited);
        assert_eq!(ProfileName::for_total_ram_gb(16.0), ProfileName::Moderate);
        assert_eq!(ProfileName::for_total_ram_gb(64.0), ProfileName::Powerful);
    }

    #[test]
    fn test_profiles_totally_ordered_by_min_ram() {
        let mins: Vec<u32> = ProfileName::all()
            .iter()
            .map(|n| HardwareProfile::for_name(*n).min_ram_gb)
            .collect();
        assert!(mins.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_minimal_caps_tier_at_one() {
        let profile = HardwareProfile::detect(&snapshot(4, 2000), None);
        assert_eq!(profile.name, ProfileName::Minimal);
        assert_eq!(profile.tier_cap(), 1);
        assert!(!profile.allow_parallel);
    }

    #[test]
    fn test_override_wins() {
        let profile = HardwareProfile::detect(&snapshot(4, 2000), Some(ProfileName::Powerful));
        assert_eq!(profile.name, ProfileName::Powerful);
        assert_eq!(profile.max_loaded_models, 5);
    }

    #[test]
    fn test_fits_ram_uses_seventy_percent() {
        let snap = snapshot(8, 1000);
        assert!(snap.fits_ram(700));
        assert!(!snap.fits_ram(701));
    }

    #[test]
    fn test_parallel_capacity() {
        assert_eq!(snapshot(16, 9000).parallel_capacity(), 3);
        assert_eq!(snapshot(16, 5000).parallel_capacity(), 2);
        assert_eq!(snapshot(16, 4000).parallel_capacity(), 1);
    }

    #[test]
    fn test_profile_name_parse() {
        assert_eq!("Moderate".parse::<ProfileName>(), Ok(ProfileName::Moderate));
        assert!("huge".parse::<ProfileName>().is_err());
    }
}

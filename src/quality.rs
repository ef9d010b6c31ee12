//! Device-capability driven quality tiers and rendering budgets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const MIN_MEMORY_GB: f64 = 4.0;
const MIN_LOGICAL_CORES: u32 = 4;
const MIN_SCREEN_WIDTH: u32 = 1024;
const MIN_TEXTURE_SIZE: u32 = 8192;
/// Points out of five needed for the high tier
const HIGH_TIER_SCORE: u8 = 3;

/// Requested or resolved quality tier. `Auto` is only ever requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Auto,
    Standard,
    High,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityTier::Auto => "auto",
            QualityTier::Standard => "standard",
            QualityTier::High => "high",
        })
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(QualityTier::Auto),
            "standard" | "sd" | "low" => Ok(QualityTier::Standard),
            "high" | "hd" => Ok(QualityTier::High),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// What could be learned about the device. `None` means "could not probe".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub memory_gb: Option<f64>,
    pub logical_cores: Option<u32>,
    pub screen_width: Option<u32>,
    pub max_texture_size: Option<u32>,
    pub is_mobile: Option<bool>,
}

impl DeviceCapabilities {
    /// Capability score from 0 to 5; unknown factors count as capable.
    pub fn score(&self) -> u8 {
        let factors = [
            self.memory_gb.is_none_or(|gb| gb >= MIN_MEMORY_GB),
            self.logical_cores.is_none_or(|n| n >= MIN_LOGICAL_CORES),
            self.screen_width.is_none_or(|w| w >= MIN_SCREEN_WIDTH),
            self.max_texture_size.is_none_or(|t| t >= MIN_TEXTURE_SIZE),
            self.is_mobile.is_none_or(|mobile| !mobile),
        ];
        factors.into_iter().filter(|&ok| ok).count() as u8
    }
}

/// Source of device capabilities.
pub trait CapabilityProbe: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;
}

impl CapabilityProbe for DeviceCapabilities {
    fn capabilities(&self) -> DeviceCapabilities {
        self.clone()
    }
}

/// Probes the host: core count, physical memory where the OS exposes it,
/// and the form factor from the build target. Display factors are left
/// unknown since there is no display here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl CapabilityProbe for SystemProbe {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            memory_gb: system_memory_gb(),
            logical_cores: std::thread::available_parallelism()
                .ok()
                .map(|n| n.get() as u32),
            screen_width: None,
            max_texture_size: None,
            is_mobile: Some(cfg!(any(target_os = "android", target_os = "ios"))),
        }
    }
}

#[cfg(target_os = "linux")]
fn system_memory_gb() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / (1024.0 * 1024.0))
}

#[cfg(not(target_os = "linux"))]
fn system_memory_gb() -> Option<f64> {
    None
}

/// Splat/point count ceilings per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBudgets {
    pub standard: u64,
    pub high: u64,
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            standard: 1_500_000,
            high: 5_000_000,
        }
    }
}

/// Resolves tier requests and maps tiers to budgets.
#[derive(Debug, Clone, Default)]
pub struct QualityTierResolver {
    budgets: TierBudgets,
}

impl QualityTierResolver {
    pub fn new(budgets: TierBudgets) -> Self {
        Self { budgets }
    }

    /// High when the capability score reaches three of five, otherwise Standard
    pub fn detect_tier(&self, probe: &dyn CapabilityProbe) -> QualityTier {
        let caps = probe.capabilities();
        let score = caps.score();
        let tier = if score >= HIGH_TIER_SCORE {
            QualityTier::High
        } else {
            QualityTier::Standard
        };
        debug!(score, %tier, "detected quality tier");
        tier
    }

    pub fn resolve_tier(&self, requested: QualityTier, probe: &dyn CapabilityProbe) -> QualityTier {
        match requested {
            QualityTier::Auto => self.detect_tier(probe),
            concrete => concrete,
        }
    }

    /// Budget for a resolved tier; anything but Standard gets the High budget
    pub fn budget_for(&self, tier: QualityTier) -> u64 {
        match tier {
            QualityTier::Standard => self.budgets.standard,
            _ => self.budgets.high,
        }
    }

    /// Budget for a tier given by name, e.g. from a URL parameter
    pub fn budget_for_name(&self, tier: &str) -> u64 {
        tier.parse()
            .map_or(self.budgets.high, |tier| self.budget_for(tier))
    }
}

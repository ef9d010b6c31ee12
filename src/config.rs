//! Loader configuration.
//!
//! Every field has a default, so a JSON file only needs the values it changes.
//! A few values can also be overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `SCANZIP_TIER` | `requested_tier` |
//! | `SCANZIP_ARCHIVE_KEY` | `archive_key` |
//! | `SCANZIP_READ_AHEAD` | `read_ahead_bytes` |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ArchiveError, ArchiveResult};
use crate::io::RangeFallback;
use crate::quality::{QualityTier, TierBudgets};
use crate::zip::TAIL_WINDOW;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Trailing bytes fetched to find the directory record
    pub tail_window: u64,
    /// Span the manifest request may grow to, covering the entries after it
    pub read_ahead_bytes: u64,
    /// Behaviour when a server ignores `Range`
    pub range_fallback: RangeFallback,
    pub http_timeout_secs: u64,
    /// Retries for connect/timeout failures of a single range request
    pub max_retries: u32,
    pub requested_tier: QualityTier,
    pub budgets: TierBudgets,
    /// Hex key for XOR-obfuscated archives
    pub archive_key: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            tail_window: TAIL_WINDOW,
            read_ahead_bytes: 128 * 1024,
            range_fallback: RangeFallback::Fail,
            http_timeout_secs: 30,
            max_retries: 0,
            requested_tier: QualityTier::Auto,
            budgets: TierBudgets::default(),
            archive_key: None,
        }
    }
}

impl LoaderConfig {
    pub fn from_json(json: &str) -> ArchiveResult<Self> {
        serde_json::from_str(json).map_err(|e| ArchiveError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> ArchiveResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Apply `SCANZIP_*` environment variables.
    pub fn with_env_overrides(self) -> ArchiveResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ArchiveResult<Self> {
        if let Some(tier) = lookup("SCANZIP_TIER") {
            self.requested_tier = tier.parse().map_err(ArchiveError::Config)?;
        }
        if let Some(key) = lookup("SCANZIP_ARCHIVE_KEY") {
            self.archive_key = Some(key).filter(|k| !k.trim().is_empty());
        }
        if let Some(bytes) = lookup("SCANZIP_READ_AHEAD") {
            self.read_ahead_bytes = bytes.trim().parse().map_err(|_| {
                ArchiveError::Config(format!("SCANZIP_READ_AHEAD is not a byte count: {bytes}"))
            })?;
        }
        Ok(self)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

//! On-disk cache of climate expected losses.
//!
//! Cache key: country display name, as used when enriching assessments.
//! Value: the `ExpectedLoss` returned by a climate source.
//!
//! The file is zstd-compressed JSON. A missing or unreadable cache is treated
//! as empty; only writes report errors.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::climate::{ClimateSource, EnrichmentUnavailable, ExpectedLoss};

/// Default cache file name inside the data directory
pub const DEFAULT_CACHE_FILE: &str = "expected_loss_cache.json.zst";

/// In-memory expected-loss cache keyed by country name
pub type ExpectedLossCache = BTreeMap<String, ExpectedLoss>;

/// Load the cache from disk.
///
/// Returns `None` when the file is absent or cannot be decoded (non-fatal).
pub fn read_expected_loss_cache(path: &Path) -> Option<ExpectedLossCache> {
    if !path.exists() {
        return None;
    }
    match load_compressed_json(path) {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to load expected-loss cache: {:#}", e);
            None
        }
    }
}

fn load_compressed_json(path: &Path) -> Result<ExpectedLossCache> {
    let compressed = std::fs::read(path)
        .with_context(|| format!("failed to read expected-loss cache: {}", path.display()))?;
    let bytes = zstd::decode_all(compressed.as_slice()).with_context(|| {
        format!("failed to decompress expected-loss cache: {}", path.display())
    })?;
    let json = std::str::from_utf8(&bytes).context("expected-loss cache is not valid UTF-8")?;
    serde_json::from_str(json).context("failed to parse expected-loss cache JSON")
}

/// Write the cache to disk (zstd level 3).
pub fn write_expected_loss_cache(path: &Path, cache: &ExpectedLossCache) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string(cache).context("failed to serialize expected-loss cache")?;
    let compressed =
        zstd::encode_all(json.as_bytes(), 3).context("failed to compress expected-loss cache")?;
    std::fs::write(path, &compressed)
        .with_context(|| format!("failed to write expected-loss cache: {}", path.display()))
}

/// Climate source answering from a pre-populated cache only
#[derive(Debug, Clone, Default)]
pub struct CachedClimate {
    entries: ExpectedLossCache,
}

impl CachedClimate {
    pub fn new(entries: ExpectedLossCache) -> Self {
        CachedClimate { entries }
    }

    /// Cache from `path`, empty if the file is missing or unreadable
    pub fn load(path: &Path) -> Self {
        CachedClimate::new(read_expected_loss_cache(path).unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClimateSource for CachedClimate {
    fn country_risk(&self, country: &str) -> Result<ExpectedLoss, EnrichmentUnavailable> {
        self.entries
            .get(country)
            .cloned()
            .ok_or(EnrichmentUnavailable::Unsupported)
    }
}

/// Outcome of a populate run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulateSummary {
    pub total: usize,
    pub success: usize,
    /// Already cached or not supported by the source
    pub skipped: usize,
    pub failed: Vec<String>,
}

/// Fetch expected losses for `(code, name)` pairs missing from `cache`
///
/// The source is queried by code; results are stored under the name.
pub fn populate_expected_losses(
    cache: &mut ExpectedLossCache,
    source: &dyn ClimateSource,
    countries: &[(String, String)],
) -> PopulateSummary {
    let mut summary = PopulateSummary {
        total: countries.len(),
        ..Default::default()
    };
    for (code, name) in countries {
        if cache.contains_key(name) {
            summary.skipped += 1;
            continue;
        }
        match source.country_risk(code) {
            Ok(loss) => {
                cache.insert(name.clone(), loss);
                summary.success += 1;
            }
            Err(EnrichmentUnavailable::Unsupported) => {
                tracing::debug!(country = %name, "country not supported by climate source");
                summary.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(country = %name, error = %e, "failed to fetch expected loss");
                summary.failed.push(name.clone());
            }
        }
    }
    summary
}

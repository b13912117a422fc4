//! Configuration file support for supplyrisk
//!
//! Loads assessment settings from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.supplyriskrc.json` in the working directory
//! 3. `supplyrisk.config.json` in the working directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assessment::DEFAULT_TOP_SUPPLIERS;
use crate::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};
use crate::climate::DEFAULT_TIMEOUT;
use crate::loss_cache::DEFAULT_CACHE_FILE;
use crate::matrix::DEFAULT_MEMO_LIMIT;
use crate::model::ModelKind;
use crate::propagate::{MissingSupplierPolicy, PropagationParams};
use crate::risk::{DirectWeights, TotalWeights};

/// Data directory used when neither config nor CLI name one
pub const DEFAULT_DATA_DIR: &str = "data";

/// Tolerance when checking that weight pairs sum to 1
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// supplyrisk configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupplyRiskConfig {
    /// I-O model to assess against (default: oecd)
    #[serde(default)]
    pub model: Option<ModelKind>,

    /// Directory holding risk tables, vocabularies and coefficient files
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Risk blending weights
    #[serde(default)]
    pub weights: Option<WeightConfig>,

    /// Supply-chain traversal settings
    #[serde(default)]
    pub propagation: Option<PropagationConfig>,

    /// Suppliers listed on each assessment (default: 10)
    #[serde(default)]
    pub top_suppliers: Option<usize>,

    /// Climate expected-loss enrichment
    #[serde(default)]
    pub climate: Option<ClimateConfig>,

    /// Assessment and coefficient cache sizing
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

/// Risk blending weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightConfig {
    /// Country share of direct risk (default: 0.7)
    pub country: Option<f64>,
    /// Sector share of direct risk (default: 0.3)
    pub sector: Option<f64>,
    /// Direct share of total risk (default: 0.6)
    pub direct: Option<f64>,
    /// Indirect share of total risk (default: 0.4)
    pub indirect: Option<f64>,
}

/// Supply-chain traversal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagationConfig {
    /// Deepest tier visited (default: 3)
    pub max_tiers: Option<usize>,
    /// Weight per tier, first entry is tier 1 (default: [1.0, 0.4, 0.16])
    pub tier_weights: Option<Vec<f64>>,
    /// Suppliers expanded per node (default: 20)
    pub fan_out: Option<usize>,
    /// Coefficients at or below this are ignored (default: 0.001)
    pub min_coefficient: Option<f64>,
    /// skip_as_is, skip_and_renormalize or fail_fast (default: skip_as_is)
    pub missing_supplier_policy: Option<MissingSupplierPolicy>,
}

/// Climate expected-loss enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClimateConfig {
    /// Enrich assessments at all (default: true)
    pub enabled: Option<bool>,
    /// Climate service root; when absent the on-disk loss cache is used
    pub base_url: Option<String>,
    /// Per-lookup deadline in milliseconds (default: 10000)
    pub timeout_ms: Option<u64>,
    /// Expected-loss cache file, relative paths resolve against data_dir
    pub cache_file: Option<PathBuf>,
}

/// Assessment and coefficient cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Assessment lifetime in seconds (default: 3600)
    pub ttl_seconds: Option<u64>,
    /// Maximum cached assessments, 0 disables the cache (default: 1000)
    pub capacity: Option<usize>,
    /// Memoised coefficient lookups per model (default: 100000)
    pub coefficient_cache_limit: Option<usize>,
}

/// Resolved configuration with defaults filled in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub model: ModelKind,
    pub data_dir: PathBuf,
    /// Direct risk weights
    pub weight_country: f64,
    pub weight_sector: f64,
    /// Total risk weights
    pub weight_direct: f64,
    pub weight_indirect: f64,
    /// Propagation
    pub max_tiers: usize,
    pub tier_weights: Vec<f64>,
    pub fan_out: usize,
    pub min_coefficient: f64,
    pub missing_supplier_policy: MissingSupplierPolicy,
    pub top_suppliers: usize,
    /// Climate enrichment
    pub climate_enabled: bool,
    pub climate_base_url: Option<String>,
    pub climate_timeout_ms: u64,
    pub climate_cache_file: PathBuf,
    /// Caches
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
    pub coefficient_cache_limit: usize,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl SupplyRiskConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(ref w) = self.weights {
            for (name, val) in [
                ("country", w.country),
                ("sector", w.sector),
                ("direct", w.direct),
                ("indirect", w.indirect),
            ] {
                if let Some(v) = val {
                    if !(0.0..=1.0).contains(&v) {
                        anyhow::bail!("weights.{} must be between 0.0 and 1.0 (got {})", name, v);
                    }
                }
            }

            let country = w.country.unwrap_or(0.7);
            let sector = w.sector.unwrap_or(0.3);
            if (country + sector - 1.0).abs() > WEIGHT_SUM_EPSILON {
                anyhow::bail!(
                    "weights.country ({}) and weights.sector ({}) must sum to 1.0",
                    country,
                    sector
                );
            }
            let direct = w.direct.unwrap_or(0.6);
            let indirect = w.indirect.unwrap_or(0.4);
            if (direct + indirect - 1.0).abs() > WEIGHT_SUM_EPSILON {
                anyhow::bail!(
                    "weights.direct ({}) and weights.indirect ({}) must sum to 1.0",
                    direct,
                    indirect
                );
            }
        }

        if let Some(ref p) = self.propagation {
            if let Some(fan_out) = p.fan_out {
                if fan_out == 0 {
                    anyhow::bail!("propagation.fan_out must be at least 1");
                }
            }
            if let Some(min) = p.min_coefficient {
                if !min.is_finite() || min < 0.0 {
                    anyhow::bail!(
                        "propagation.min_coefficient must be non-negative (got {})",
                        min
                    );
                }
            }
            if let Some(ref tiers) = p.tier_weights {
                if tiers.is_empty() {
                    anyhow::bail!("propagation.tier_weights must not be empty");
                }
                for (i, w) in tiers.iter().enumerate() {
                    if !w.is_finite() || *w < 0.0 {
                        anyhow::bail!(
                            "propagation.tier_weights[{}] must be non-negative (got {})",
                            i,
                            w
                        );
                    }
                }
            }
        }

        if let Some(ref c) = self.climate {
            if c.timeout_ms == Some(0) {
                anyhow::bail!("climate.timeout_ms must be positive");
            }
            if let Some(ref url) = c.base_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("climate.base_url must be an http(s) URL (got {})", url);
                }
            }
        }

        if let Some(ref c) = self.cache {
            if c.ttl_seconds == Some(0) {
                anyhow::bail!("cache.ttl_seconds must be positive");
            }
        }

        Ok(())
    }

    /// Resolve config into the form used to build an assessor
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let (w_country, w_sector, w_direct, w_indirect) = match &self.weights {
            Some(w) => (
                w.country.unwrap_or(0.7),
                w.sector.unwrap_or(0.3),
                w.direct.unwrap_or(0.6),
                w.indirect.unwrap_or(0.4),
            ),
            None => (0.7, 0.3, 0.6, 0.4),
        };

        let defaults = PropagationParams::default();
        let (max_tiers, tier_weights, fan_out, min_coefficient, policy) = match &self.propagation
        {
            Some(p) => (
                p.max_tiers.unwrap_or(defaults.max_tiers),
                p.tier_weights.clone().unwrap_or(defaults.tier_weights),
                p.fan_out.unwrap_or(defaults.fan_out),
                p.min_coefficient.unwrap_or(defaults.min_coefficient),
                p.missing_supplier_policy.unwrap_or_default(),
            ),
            None => (
                defaults.max_tiers,
                defaults.tier_weights,
                defaults.fan_out,
                defaults.min_coefficient,
                defaults.missing_supplier_policy,
            ),
        };

        let default_timeout_ms = DEFAULT_TIMEOUT.as_millis() as u64;
        let (climate_enabled, climate_base_url, climate_timeout_ms, cache_file) =
            match &self.climate {
                Some(c) => (
                    c.enabled.unwrap_or(true),
                    c.base_url.clone(),
                    c.timeout_ms.unwrap_or(default_timeout_ms),
                    c.cache_file.clone(),
                ),
                None => (true, None, default_timeout_ms, None),
            };
        let climate_cache_file = match cache_file {
            Some(path) if path.is_absolute() => path,
            Some(path) => data_dir.join(path),
            None => data_dir.join(DEFAULT_CACHE_FILE),
        };

        let (cache_ttl_seconds, cache_capacity, coefficient_cache_limit) = match &self.cache {
            Some(c) => (
                c.ttl_seconds.unwrap_or(DEFAULT_TTL.as_secs()),
                c.capacity.unwrap_or(DEFAULT_CAPACITY),
                c.coefficient_cache_limit.unwrap_or(DEFAULT_MEMO_LIMIT),
            ),
            None => (DEFAULT_TTL.as_secs(), DEFAULT_CAPACITY, DEFAULT_MEMO_LIMIT),
        };

        Ok(ResolvedConfig {
            model: self.model.unwrap_or_default(),
            data_dir,
            weight_country: w_country,
            weight_sector: w_sector,
            weight_direct: w_direct,
            weight_indirect: w_indirect,
            max_tiers,
            tier_weights,
            fan_out,
            min_coefficient,
            missing_supplier_policy: policy,
            top_suppliers: self.top_suppliers.unwrap_or(DEFAULT_TOP_SUPPLIERS),
            climate_enabled,
            climate_base_url,
            climate_timeout_ms,
            climate_cache_file,
            cache_ttl_seconds,
            cache_capacity,
            coefficient_cache_limit,
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        SupplyRiskConfig::default().resolve()
    }

    pub fn direct_weights(&self) -> DirectWeights {
        DirectWeights {
            country: self.weight_country,
            sector: self.weight_sector,
        }
    }

    pub fn total_weights(&self) -> TotalWeights {
        TotalWeights {
            direct: self.weight_direct,
            indirect: self.weight_indirect,
        }
    }

    /// Suppliers are blended with the same direct/indirect split as the root
    pub fn propagation_params(&self) -> PropagationParams {
        PropagationParams {
            max_tiers: self.max_tiers,
            tier_weights: self.tier_weights.clone(),
            supplier_blend: self.total_weights(),
            fan_out: self.fan_out,
            min_coefficient: self.min_coefficient,
            missing_supplier_policy: self.missing_supplier_policy,
        }
    }

    pub fn climate_timeout(&self) -> Duration {
        Duration::from_millis(self.climate_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Discover and load a config file from `root`
///
/// Search order:
/// 1. `.supplyriskrc.json`
/// 2. `supplyrisk.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(root: &Path) -> Result<Option<(SupplyRiskConfig, PathBuf)>> {
    for name in [".supplyriskrc.json", "supplyrisk.config.json"] {
        let path = root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<SupplyRiskConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: SupplyRiskConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `root`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(root)? {
            Some((config, path)) => (config, Some(path)),
            None => (SupplyRiskConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}

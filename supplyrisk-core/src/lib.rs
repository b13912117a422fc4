//! supplyrisk core library - multi-tier supply-chain risk over input-output models

#![deny(warnings)]

// Global invariants enforced in this crate:
// - Every risk vector carries all five risk types, rounded to 2 decimals
// - Country and sector codes are validated against the model before any lookup
// - Caches are owned by the objects that use them; no global mutable state
// - Supplier traversal is bounded by tier depth and fan-out, cycles are cut

pub mod assessment;
pub mod cache;
pub mod climate;
pub mod concordance;
pub mod config;
pub mod loss_cache;
pub mod matrix;
pub mod model;
pub mod propagate;
pub mod report;
pub mod risk;
pub mod scorer;
pub mod tables;

pub use assessment::{AssessOptions, Assessment, AssessmentError, RiskAssessor};
pub use config::ResolvedConfig;
pub use model::{IoModel, ModelKind, ModelRegistry};
pub use report::{render_error_json, render_json, render_text};
pub use risk::{RiskType, RiskVector};

use anyhow::{Context, Result};
use std::sync::Arc;

use cache::AssessmentCache;
use climate::{ClimateSource, HttpClimateClient};
use concordance::CountryCodes;
use loss_cache::CachedClimate;
use tables::RiskTables;

/// File name of the static risk tables inside the data directory
pub const RISK_TABLES_FILE: &str = "risk_tables.json";

/// Load the static risk tables from the configured data directory
pub fn load_risk_tables(config: &ResolvedConfig) -> Result<RiskTables> {
    let path = config.data_dir.join(RISK_TABLES_FILE);
    RiskTables::load(&path)
}

/// Model registry over the configured data directory
///
/// Country display names from `tables` feed name-to-code resolution.
pub fn build_registry(config: &ResolvedConfig, tables: &RiskTables) -> ModelRegistry {
    let codes = CountryCodes::with_names(tables.country_names());
    ModelRegistry::new(&config.data_dir, codes).with_memo_limit(config.coefficient_cache_limit)
}

/// Climate source selected by the config
///
/// A configured `base_url` wins; otherwise the on-disk expected-loss cache
/// is used. Returns `None` when enrichment is disabled.
pub fn build_climate(config: &ResolvedConfig) -> Result<Option<Arc<dyn ClimateSource>>> {
    if !config.climate_enabled {
        return Ok(None);
    }
    let source: Arc<dyn ClimateSource> = match &config.climate_base_url {
        Some(url) => Arc::new(
            HttpClimateClient::new(url, config.climate_timeout())
                .with_context(|| format!("failed to set up climate client for {}", url))?,
        ),
        None => {
            let cached = CachedClimate::load(&config.climate_cache_file);
            tracing::debug!(
                path = %config.climate_cache_file.display(),
                entries = cached.len(),
                "using cached expected losses"
            );
            Arc::new(cached)
        }
    };
    Ok(Some(source))
}

/// Build an assessor for `config.model` with every setting from `config`
pub fn load_assessor(config: &ResolvedConfig) -> Result<RiskAssessor> {
    let tables = load_risk_tables(config)?;
    let registry = build_registry(config, &tables);
    let model = registry
        .get(config.model)
        .with_context(|| format!("failed to load model '{}'", config.model))?;
    assessor_for_model(config, model, Arc::new(tables))
}

/// Build an assessor over an already loaded model
pub fn assessor_for_model(
    config: &ResolvedConfig,
    model: Arc<dyn IoModel>,
    tables: Arc<RiskTables>,
) -> Result<RiskAssessor> {
    let mut builder = RiskAssessor::builder(model, tables)
        .direct_weights(config.direct_weights())
        .total_weights(config.total_weights())
        .propagation(config.propagation_params())
        .top_suppliers(config.top_suppliers)
        .cache(Arc::new(AssessmentCache::new(
            config.cache_ttl(),
            config.cache_capacity,
        )));
    if let Some(source) = build_climate(config)? {
        builder = builder
            .climate(source)
            .climate_timeout(config.climate_timeout());
    }
    Ok(builder.build())
}

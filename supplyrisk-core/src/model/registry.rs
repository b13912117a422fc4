//! Model selection: kinds, descriptors, recommendation and instance cache

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use super::{ExiobaseModel, IcioModel, IoModel};
use crate::concordance::{CodeNormalizer, CountryCodes, CountryVocabulary, SectorConcordance};
use crate::matrix::{CoefficientSource, LazyMatrix, DEFAULT_MEMO_LIMIT};
use crate::tables::Vocabulary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Oecd,
    Exiobase,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Oecd, ModelKind::Exiobase];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Oecd => "oecd",
            ModelKind::Exiobase => "exiobase",
        }
    }

    pub fn country_vocabulary(&self) -> CountryVocabulary {
        match self {
            ModelKind::Oecd => CountryVocabulary::Iso3,
            ModelKind::Exiobase => CountryVocabulary::Iso2,
        }
    }

    /// Frequently requested `(country, sector)` pairs in this model's codes
    pub fn common_assessments(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ModelKind::Oecd => &[
                ("USA", "C10T12"),
                ("CHN", "C10T12"),
                ("DEU", "C10T12"),
                ("USA", "C26"),
                ("CHN", "C26"),
                ("JPN", "C26"),
                ("USA", "C29"),
                ("DEU", "C29"),
                ("CHN", "C29"),
                ("USA", "C13T15"),
                ("CHN", "C13T15"),
                ("IND", "C13T15"),
            ],
            ModelKind::Exiobase => &[
                ("US", "D10T12"),
                ("CN", "D10T12"),
                ("DE", "D10T12"),
                ("US", "D26T27"),
                ("CN", "D26T27"),
                ("JP", "D26T27"),
                ("US", "D29T30"),
                ("DE", "D29T30"),
                ("CN", "D29T30"),
                ("US", "D13T15"),
                ("CN", "D13T15"),
                ("IN", "D13T15"),
            ],
        }
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        match self {
            ModelKind::Oecd => ModelDescriptor {
                id: "oecd",
                name: "OECD ICIO Extended",
                description: "Best for broad geographic coverage (85 countries)",
                strengths: vec![
                    "85 countries including extensive developing country coverage",
                    "56 sectors (ISIC Rev. 4)",
                    "Firm heterogeneity for China and Mexico",
                    "Most recent data: 2020",
                ],
                use_cases: vec![
                    "Sourcing from developing countries",
                    "Broad geographic risk analysis",
                    "Country-specific supply chain mapping",
                    "Trade policy analysis",
                ],
                status: "Available",
            },
            ModelKind::Exiobase => ModelDescriptor {
                id: "exiobase",
                name: "EXIOBASE 3",
                description: "Best for detailed sector analysis and environmental data",
                strengths: vec![
                    "49 regions (44 countries + 5 Rest of World)",
                    "163 industries (mapped to OECD sectors)",
                    "Environmental satellite accounts",
                    "Most recent data: 2022",
                ],
                use_cases: vec![
                    "Detailed manufacturing supply chain analysis",
                    "Environmental footprint assessment",
                    "Sector-specific risk analysis",
                    "Carbon/water/land footprint calculations",
                ],
                status: "Available",
            },
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "oecd" => Ok(ModelKind::Oecd),
            "exiobase" => Ok(ModelKind::Exiobase),
            other => bail!(
                "unknown model type '{}'. Available models: oecd, exiobase",
                other
            ),
        }
    }
}

/// Static metadata shown when listing models
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub strengths: Vec<&'static str>,
    pub use_cases: Vec<&'static str>,
    pub status: &'static str,
}

/// What a caller needs from a model
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    pub country: Option<String>,
    pub needs_environmental_data: bool,
    pub needs_sector_detail: bool,
}

/// Pick a model for the given requirements
///
/// Environmental or detailed-sector needs select EXIOBASE. A specific country
/// selects EXIOBASE only when ICIO cannot serve it.
pub fn recommend_model(requirements: &Requirements) -> ModelKind {
    if requirements.needs_environmental_data || requirements.needs_sector_detail {
        return ModelKind::Exiobase;
    }
    if let Some(country) = &requirements.country {
        let codes = CountryCodes::default();
        if !codes.is_valid_for(country, CountryVocabulary::Iso3)
            && codes.is_valid_for(country, CountryVocabulary::Iso2)
        {
            return ModelKind::Exiobase;
        }
    }
    ModelKind::default()
}

/// Model instances keyed by kind, built at most once
#[derive(Default)]
pub struct ModelCache {
    models: Mutex<HashMap<ModelKind, Arc<dyn IoModel>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_insert_with<F>(&self, kind: ModelKind, build: F) -> Result<Arc<dyn IoModel>>
    where
        F: FnOnce() -> Result<Arc<dyn IoModel>>,
    {
        let mut models = self.models.lock();
        if let Some(model) = models.get(&kind) {
            return Ok(Arc::clone(model));
        }
        let model = build()?;
        models.insert(kind, Arc::clone(&model));
        Ok(model)
    }

    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.models.lock().clear();
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<ModelKind> = self.models.lock().keys().copied().collect();
        f.debug_struct("ModelCache").field("models", &kinds).finish()
    }
}

/// Builds models from a data directory
///
/// Expected files per kind: `<kind>_vocabulary.json`,
/// `<kind>_concordance.json` and the coefficient store
/// (`oecd_icio_coefficients.csv.zst` or `.csv`, `exiobase_coefficients.sqlite`).
#[derive(Debug)]
pub struct ModelRegistry {
    data_dir: PathBuf,
    country_codes: CountryCodes,
    memo_limit: usize,
    cache: ModelCache,
}

impl ModelRegistry {
    pub fn new(data_dir: impl Into<PathBuf>, country_codes: CountryCodes) -> Self {
        ModelRegistry {
            data_dir: data_dir.into(),
            country_codes,
            memo_limit: DEFAULT_MEMO_LIMIT,
            cache: ModelCache::new(),
        }
    }

    pub fn with_memo_limit(mut self, memo_limit: usize) -> Self {
        self.memo_limit = memo_limit;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn available_models(&self) -> Vec<ModelDescriptor> {
        ModelKind::ALL.iter().map(ModelKind::descriptor).collect()
    }

    /// Shared instance for `kind`, built on first request
    pub fn get(&self, kind: ModelKind) -> Result<Arc<dyn IoModel>> {
        self.cache.get_or_try_insert_with(kind, || self.create(kind))
    }

    /// Fresh instance for `kind`, bypassing the cache
    pub fn create(&self, kind: ModelKind) -> Result<Arc<dyn IoModel>> {
        let vocabulary_path = self.data_dir.join(format!("{}_vocabulary.json", kind));
        let vocabulary = Vocabulary::load(&vocabulary_path)?;
        let concordance = self.load_concordance(kind)?;
        let normalizer = CodeNormalizer::new(
            concordance,
            self.country_codes.clone(),
            kind.country_vocabulary(),
            CountryVocabulary::Iso3,
        );
        let matrix = LazyMatrix::with_memo_limit(self.coefficient_source(kind), self.memo_limit);

        tracing::debug!(model = %kind, data_dir = %self.data_dir.display(), "creating model");
        let model: Arc<dyn IoModel> = match kind {
            ModelKind::Oecd => Arc::new(IcioModel::with_matrix(vocabulary, matrix, normalizer)),
            ModelKind::Exiobase => {
                Arc::new(ExiobaseModel::with_matrix(vocabulary, matrix, normalizer))
            }
        };
        Ok(model)
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    fn load_concordance(&self, kind: ModelKind) -> Result<SectorConcordance> {
        let path = self.data_dir.join(format!("{}_concordance.json", kind));
        if path.exists() {
            return SectorConcordance::load(&path);
        }
        match kind {
            ModelKind::Oecd => SectorConcordance::icio_default()
                .context("failed to load built-in ICIO concordance"),
            ModelKind::Exiobase => bail!("missing concordance file: {}", path.display()),
        }
    }

    /// Coefficient store location; a missing file surfaces on first lookup
    fn coefficient_source(&self, kind: ModelKind) -> CoefficientSource {
        match kind {
            ModelKind::Oecd => {
                let compressed = self.data_dir.join("oecd_icio_coefficients.csv.zst");
                let plain = self.data_dir.join("oecd_icio_coefficients.csv");
                if !compressed.exists() && plain.exists() {
                    CoefficientSource::Csv(plain)
                } else {
                    CoefficientSource::Csv(compressed)
                }
            }
            ModelKind::Exiobase => CoefficientSource::Sqlite {
                path: self.data_dir.join("exiobase_coefficients.sqlite"),
                table: "coefficients".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipped_registry() -> ModelRegistry {
        ModelRegistry::new(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../data"),
            CountryCodes::default(),
        )
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("OECD".parse::<ModelKind>().unwrap(), ModelKind::Oecd);
        assert_eq!(" exiobase ".parse::<ModelKind>().unwrap(), ModelKind::Exiobase);
        let err = "gtap".parse::<ModelKind>().unwrap_err();
        assert!(err.to_string().contains("Available models"));
    }

    #[test]
    fn test_recommendation() {
        assert_eq!(recommend_model(&Requirements::default()), ModelKind::Oecd);
        let env = Requirements {
            needs_environmental_data: true,
            ..Default::default()
        };
        assert_eq!(recommend_model(&env), ModelKind::Exiobase);
        let iso3 = Requirements {
            country: Some("VNM".to_string()),
            ..Default::default()
        };
        assert_eq!(recommend_model(&iso3), ModelKind::Oecd);
        let row = Requirements {
            country: Some("WA".to_string()),
            ..Default::default()
        };
        assert_eq!(recommend_model(&row), ModelKind::Exiobase);
    }

    #[test]
    fn test_available_models() {
        let models = shipped_registry().available_models();
        let ids: Vec<&str> = models.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["oecd", "exiobase"]);
    }

    #[test]
    fn test_registry_caches_instances() {
        let registry = shipped_registry();
        let a = registry.get(ModelKind::Oecd).unwrap();
        let b = registry.get(ModelKind::Oecd).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.cache().len(), 1);
        let fresh = registry.create(ModelKind::Oecd).unwrap();
        assert!(!Arc::ptr_eq(&a, &fresh));
        registry.cache().clear();
        assert!(registry.cache().is_empty());
    }

    #[test]
    fn test_missing_data_dir_fails() {
        let registry = ModelRegistry::new("/nonexistent/data", CountryCodes::default());
        assert!(registry.get(ModelKind::Exiobase).is_err());
    }
}

//! Pluggable input-output models
//!
//! Every model exposes the same contract over its own country and sector
//! vocabulary. The propagator and scorer only ever see `dyn IoModel`.

pub mod exiobase;
pub mod icio;
pub mod registry;

pub use exiobase::ExiobaseModel;
pub use icio::IcioModel;
pub use registry::{ModelCache, ModelDescriptor, ModelKind, ModelRegistry};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::concordance::CodeNormalizer;
use crate::matrix::{LazyMatrix, MatrixLoadFailure, MatrixStats};
use crate::tables::Vocabulary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub code: String,
    pub name: String,
    /// Rest-of-World style region with no single-country counterpart
    #[serde(default)]
    pub is_aggregate: bool,
    /// Firm-heterogeneity split of a single country
    #[serde(default)]
    pub is_extended: bool,
}

impl Country {
    pub fn new(code: &str, name: &str) -> Self {
        Country {
            code: code.to_string(),
            name: name.to_string(),
            is_aggregate: false,
            is_extended: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    pub code: String,
    pub name: String,
}

impl Sector {
    pub fn new(code: &str, name: &str) -> Self {
        Sector {
            code: code.to_string(),
            name: name.to_string(),
        }
    }
}

/// Upstream supplier of a country-sector, annotated with display names
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Supplier {
    pub country: String,
    pub country_name: String,
    pub sector: String,
    pub sector_name: String,
    pub coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub country_count: usize,
    pub sector_count: usize,
    pub has_environmental_data: bool,
}

/// Why a pair is not valid for a model
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidPair {
    #[error("country '{0}' is not part of this model")]
    UnknownCountry(String),
    #[error("sector '{0}' is not part of this model")]
    UnknownSector(String),
}

pub trait IoModel: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;

    fn has_environmental_data(&self) -> bool {
        false
    }

    fn countries(&self) -> &[Country];
    fn sectors(&self) -> &[Sector];
    fn country(&self, code: &str) -> Option<&Country>;
    fn sector(&self, code: &str) -> Option<&Sector>;

    /// Translation between this model's codes and the risk tables
    fn normalizer(&self) -> &CodeNormalizer;

    /// Coefficient for `supplier -> buyer`, `0.0` when unrelated
    fn coefficient(
        &self,
        from_country: &str,
        from_sector: &str,
        to_country: &str,
        to_sector: &str,
    ) -> Result<f64, MatrixLoadFailure>;

    /// Strictly descending suppliers above `min_coefficient`, at most `top_n`
    fn top_suppliers(
        &self,
        country: &str,
        sector: &str,
        top_n: usize,
        min_coefficient: f64,
    ) -> Result<Vec<Supplier>, MatrixLoadFailure>;

    fn matrix_stats(&self) -> Result<MatrixStats, MatrixLoadFailure>;

    /// Check a pair against the model's own lists, country first
    fn validate(&self, country: &str, sector: &str) -> Result<(), InvalidPair> {
        if self.country(country).is_none() {
            return Err(InvalidPair::UnknownCountry(country.to_string()));
        }
        if self.sector(sector).is_none() {
            return Err(InvalidPair::UnknownSector(sector.to_string()));
        }
        Ok(())
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            id: self.id().to_string(),
            name: self.name().to_string(),
            version: self.version().to_string(),
            description: self.description().to_string(),
            country_count: self.countries().len(),
            sector_count: self.sectors().len(),
            has_environmental_data: self.has_environmental_data(),
        }
    }
}

/// Vocabulary, coefficient store and normalizer shared by both models
#[derive(Debug)]
pub struct ModelData {
    countries: Vec<Country>,
    sectors: Vec<Sector>,
    country_index: HashMap<String, usize>,
    sector_index: HashMap<String, usize>,
    matrix: LazyMatrix,
    normalizer: CodeNormalizer,
}

impl ModelData {
    pub fn new(vocabulary: Vocabulary, matrix: LazyMatrix, normalizer: CodeNormalizer) -> Self {
        let country_index = vocabulary
            .countries
            .iter()
            .enumerate()
            .map(|(i, c)| (c.code.clone(), i))
            .collect();
        let sector_index = vocabulary
            .sectors
            .iter()
            .enumerate()
            .map(|(i, s)| (s.code.clone(), i))
            .collect();
        ModelData {
            countries: vocabulary.countries,
            sectors: vocabulary.sectors,
            country_index,
            sector_index,
            matrix,
            normalizer,
        }
    }

    pub fn countries(&self) -> &[Country] {
        &self.countries
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn country(&self, code: &str) -> Option<&Country> {
        self.country_index.get(code).map(|i| &self.countries[*i])
    }

    pub fn sector(&self, code: &str) -> Option<&Sector> {
        self.sector_index.get(code).map(|i| &self.sectors[*i])
    }

    pub fn normalizer(&self) -> &CodeNormalizer {
        &self.normalizer
    }

    pub fn matrix(&self) -> &LazyMatrix {
        &self.matrix
    }

    pub fn coefficient(
        &self,
        from_country: &str,
        from_sector: &str,
        to_country: &str,
        to_sector: &str,
    ) -> Result<f64, MatrixLoadFailure> {
        self.matrix
            .coefficient(from_country, from_sector, to_country, to_sector)
    }

    /// Suppliers annotated with names; codes outside the vocabulary keep the
    /// code as their display name
    pub fn top_suppliers(
        &self,
        country: &str,
        sector: &str,
        top_n: usize,
        min_coefficient: f64,
    ) -> Result<Vec<Supplier>, MatrixLoadFailure> {
        let edges = self
            .matrix
            .top_suppliers(country, sector, top_n, min_coefficient)?;
        Ok(edges
            .into_iter()
            .map(|edge| {
                let country_name = self
                    .country(&edge.country)
                    .map_or_else(|| edge.country.clone(), |c| c.name.clone());
                let sector_name = self
                    .sector(&edge.sector)
                    .map_or_else(|| edge.sector.clone(), |s| s.name.clone());
                Supplier {
                    country: edge.country,
                    country_name,
                    sector: edge.sector,
                    sector_name,
                    coefficient: edge.coefficient,
                }
            })
            .collect())
    }

    pub fn matrix_stats(&self) -> Result<MatrixStats, MatrixLoadFailure> {
        self.matrix.stats()
    }
}

/// Implements the data-backed half of `IoModel` by delegating to `self.data`
macro_rules! delegate_model_data {
    () => {
        fn countries(&self) -> &[$crate::model::Country] {
            self.data.countries()
        }

        fn sectors(&self) -> &[$crate::model::Sector] {
            self.data.sectors()
        }

        fn country(&self, code: &str) -> Option<&$crate::model::Country> {
            self.data.country(code)
        }

        fn sector(&self, code: &str) -> Option<&$crate::model::Sector> {
            self.data.sector(code)
        }

        fn normalizer(&self) -> &$crate::concordance::CodeNormalizer {
            self.data.normalizer()
        }

        fn coefficient(
            &self,
            from_country: &str,
            from_sector: &str,
            to_country: &str,
            to_sector: &str,
        ) -> Result<f64, $crate::matrix::MatrixLoadFailure> {
            self.data
                .coefficient(from_country, from_sector, to_country, to_sector)
        }

        fn top_suppliers(
            &self,
            country: &str,
            sector: &str,
            top_n: usize,
            min_coefficient: f64,
        ) -> Result<Vec<$crate::model::Supplier>, $crate::matrix::MatrixLoadFailure> {
            self.data
                .top_suppliers(country, sector, top_n, min_coefficient)
        }

        fn matrix_stats(
            &self,
        ) -> Result<$crate::matrix::MatrixStats, $crate::matrix::MatrixLoadFailure> {
            self.data.matrix_stats()
        }
    };
}
pub(crate) use delegate_model_data;

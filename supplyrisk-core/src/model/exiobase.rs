//! EXIOBASE 3 multi-regional input-output model

use super::{Country, IoModel, ModelData};
use crate::concordance::CodeNormalizer;
use crate::matrix::{CoefficientSource, LazyMatrix};
use crate::tables::Vocabulary;

/// Satellite account categories carried by EXIOBASE
const ENVIRONMENTAL_INDICATORS: [&str; 10] = [
    "CO2 emissions",
    "CH4 emissions",
    "N2O emissions",
    "GHG emissions (CO2 equivalent)",
    "Water consumption",
    "Water withdrawal",
    "Land occupation",
    "Energy use",
    "Material extraction",
    "Waste generation",
];

/// EXIOBASE model: two-letter country codes plus five Rest-of-World regions
#[derive(Debug)]
pub struct ExiobaseModel {
    data: ModelData,
}

impl ExiobaseModel {
    pub fn new(vocabulary: Vocabulary, source: CoefficientSource, normalizer: CodeNormalizer) -> Self {
        Self::with_matrix(vocabulary, LazyMatrix::new(source), normalizer)
    }

    pub fn with_matrix(vocabulary: Vocabulary, matrix: LazyMatrix, normalizer: CodeNormalizer) -> Self {
        ExiobaseModel {
            data: ModelData::new(vocabulary, matrix, normalizer),
        }
    }

    pub fn environmental_indicators(&self) -> &'static [&'static str] {
        &ENVIRONMENTAL_INDICATORS
    }

    pub fn row_regions(&self) -> Vec<&Country> {
        self.data
            .countries()
            .iter()
            .filter(|c| c.is_aggregate)
            .collect()
    }
}

impl IoModel for ExiobaseModel {
    fn id(&self) -> &str {
        "exiobase"
    }

    fn name(&self) -> &str {
        "EXIOBASE 3"
    }

    fn version(&self) -> &str {
        "2022"
    }

    fn description(&self) -> &str {
        "EXIOBASE 3 (2022). Covers 49 regions (44 countries + 5 Rest of World) \
         and 163 industries mapped to OECD sectors. \
         Includes environmental satellite accounts (CO2, water, land use)."
    }

    fn has_environmental_data(&self) -> bool {
        true
    }

    super::delegate_model_data!();
}

//! OECD Inter-Country Input-Output model (extended edition)

use super::{Country, IoModel, ModelData};
use crate::concordance::CodeNormalizer;
use crate::matrix::{CoefficientSource, LazyMatrix};
use crate::tables::Vocabulary;

/// ICIO model: three-letter country codes, ISIC Rev. 4 sectors, with
/// firm-heterogeneity split rows for China and Mexico
#[derive(Debug)]
pub struct IcioModel {
    data: ModelData,
}

impl IcioModel {
    pub fn new(vocabulary: Vocabulary, source: CoefficientSource, normalizer: CodeNormalizer) -> Self {
        Self::with_matrix(vocabulary, LazyMatrix::new(source), normalizer)
    }

    pub fn with_matrix(vocabulary: Vocabulary, matrix: LazyMatrix, normalizer: CodeNormalizer) -> Self {
        IcioModel {
            data: ModelData::new(vocabulary, matrix, normalizer),
        }
    }

    /// Split rows such as `CN1`/`MX2`
    pub fn extended_countries(&self) -> Vec<&Country> {
        self.data
            .countries()
            .iter()
            .filter(|c| c.is_extended)
            .collect()
    }
}

impl IoModel for IcioModel {
    fn id(&self) -> &str {
        "oecd"
    }

    fn name(&self) -> &str {
        "OECD ICIO Extended"
    }

    fn version(&self) -> &str {
        "2020"
    }

    fn description(&self) -> &str {
        "OECD Inter-Country Input-Output tables (Extended Edition, 2020). \
         Covers 85 countries/regions and 56 sectors (ISIC Rev. 4). \
         Includes firm heterogeneity for China and Mexico."
    }

    super::delegate_model_data!();
}

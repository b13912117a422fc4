//! Direct risk of a country-sector from the static risk tables

use std::sync::Arc;

use crate::concordance::NormalizeError;
use crate::model::IoModel;
use crate::risk::{calculate_direct, DirectWeights, RiskVector};
use crate::tables::RiskTables;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DirectRiskError {
    #[error(transparent)]
    Mapping(#[from] NormalizeError),

    #[error("no risk data for country '{country}' / sector '{sector}'")]
    RiskDataNotFound { country: String, sector: String },
}

/// Scores model country-sectors against the risk tables
#[derive(Clone)]
pub struct DirectRiskScorer {
    model: Arc<dyn IoModel>,
    tables: Arc<RiskTables>,
    weights: DirectWeights,
}

impl DirectRiskScorer {
    pub fn new(model: Arc<dyn IoModel>, tables: Arc<RiskTables>, weights: DirectWeights) -> Self {
        DirectRiskScorer {
            model,
            tables,
            weights,
        }
    }

    pub fn weights(&self) -> &DirectWeights {
        &self.weights
    }

    pub fn tables(&self) -> &RiskTables {
        &self.tables
    }

    /// Direct risk for a pair given in the model's own codes
    ///
    /// Formula (per risk type):
    /// direct = round(0.7 * country + 0.3 * sector, 2)
    pub fn compute_direct_risk(
        &self,
        country: &str,
        sector: &str,
    ) -> Result<RiskVector, DirectRiskError> {
        let normalizer = self.model.normalizer();
        let risk_country = normalizer.risk_country(country)?;
        let risk_sector = normalizer.risk_sector(sector)?;

        let (Some(country_record), Some(sector_record)) = (
            self.tables.country(&risk_country),
            self.tables.sector(&risk_sector),
        ) else {
            return Err(DirectRiskError::RiskDataNotFound {
                country: country.to_string(),
                sector: sector.to_string(),
            });
        };

        Ok(calculate_direct(
            &country_record.risk_scores,
            &sector_record.risk_scores,
            &self.weights,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concordance::{
        CodeNormalizer, CountryCodes, CountryVocabulary, SectorConcordance,
    };
    use crate::matrix::CoefficientSource;
    use crate::model::{Country, ExiobaseModel, IcioModel, Sector};
    use crate::risk::RiskType;
    use crate::tables::{RiskRecord, Vocabulary};

    fn tables() -> Arc<RiskTables> {
        Arc::new(RiskTables::new(
            vec![
                RiskRecord::new("USA", "United States", RiskVector::splat(2.0)),
                RiskRecord::new("CHN", "China", RiskVector::splat(4.0)),
            ],
            vec![RiskRecord::new("FOOD", "Food", RiskVector::splat(3.0))],
        ))
    }

    fn icio_scorer() -> DirectRiskScorer {
        let model = IcioModel::new(
            Vocabulary::new(
                vec![Country::new("USA", "United States"), Country::new("MEX", "Mexico")],
                vec![Sector::new("FOOD", "Food"), Sector::new("TEXT", "Textiles")],
            ),
            CoefficientSource::rows(Vec::new()),
            CodeNormalizer::new(
                SectorConcordance::identity(["FOOD"]),
                CountryCodes::default(),
                CountryVocabulary::Iso3,
                CountryVocabulary::Iso3,
            ),
        );
        DirectRiskScorer::new(Arc::new(model), tables(), DirectWeights::default())
    }

    #[test]
    fn test_direct_blend_rounds() {
        let direct = icio_scorer().compute_direct_risk("USA", "FOOD").unwrap();
        for (_, value) in direct.iter() {
            assert_eq!(value, 2.3);
        }
    }

    #[test]
    fn test_missing_country_record() {
        let err = icio_scorer().compute_direct_risk("MEX", "FOOD").unwrap_err();
        assert_eq!(
            err,
            DirectRiskError::RiskDataNotFound {
                country: "MEX".to_string(),
                sector: "FOOD".to_string(),
            }
        );
    }

    #[test]
    fn test_unmapped_sector_is_mapping_error() {
        let err = icio_scorer().compute_direct_risk("USA", "TEXT").unwrap_err();
        assert!(matches!(
            err,
            DirectRiskError::Mapping(NormalizeError::MappingNotFound { .. })
        ));
    }

    #[test]
    fn test_iso2_model_translates_country() {
        let model = ExiobaseModel::new(
            Vocabulary::new(
                vec![Country::new("CN", "China")],
                vec![Sector::new("D10T12", "Food")],
            ),
            CoefficientSource::rows(Vec::new()),
            CodeNormalizer::new(
                SectorConcordance::from_json_str(r#"{"risk_to_model": {"FOOD": "D10T12"}}"#)
                    .unwrap(),
                CountryCodes::default(),
                CountryVocabulary::Iso2,
                CountryVocabulary::Iso3,
            ),
        );
        let scorer = DirectRiskScorer::new(Arc::new(model), tables(), DirectWeights::default());
        let direct = scorer.compute_direct_risk("CN", "D10T12").unwrap();
        assert_eq!(direct[RiskType::Climate], 3.7);

        let err = scorer.compute_direct_risk("WA", "D10T12").unwrap_err();
        assert!(matches!(
            err,
            DirectRiskError::Mapping(NormalizeError::UnmappableCode { .. })
        ));
    }
}

//! Risk assessment orchestration
//!
//! Global invariants enforced:
//! - Validation happens before any coefficient lookup
//! - `total = round(0.6 * direct + 0.4 * indirect, 2)` per risk type
//! - Climate enrichment never turns a successful assessment into a failure
//! - No retries

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{AssessmentCache, CacheKey};
use crate::climate::{ClimateSource, ExpectedLoss, TimeoutClimate};
use crate::concordance::NormalizeError;
use crate::matrix::MatrixLoadFailure;
use crate::model::{Country, InvalidPair, IoModel, ModelInfo, Sector, Supplier};
use crate::propagate::{IndirectRiskPropagator, PropagationError, PropagationParams};
use crate::risk::{calculate_total, round2, DirectWeights, RiskVector, TotalWeights};
use crate::scorer::{DirectRiskError, DirectRiskScorer};
use crate::tables::RiskTables;

/// Suppliers listed on an assessment
pub const DEFAULT_TOP_SUPPLIERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedCode {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// Direct risk scores plus optional climate loss figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectRisk {
    #[serde(flatten)]
    pub scores: RiskVector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_loss: Option<ExpectedLoss>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Methodology {
    pub direct_risk_formula: String,
    pub indirect_risk_formula: String,
    pub total_risk_formula: String,
    pub tier_weights: BTreeMap<String, String>,
    pub max_tiers: usize,
    pub country_weight: f64,
    pub sector_weight: f64,
    pub direct_share: f64,
    pub indirect_share: f64,
    pub supplier_fan_out: usize,
    pub min_coefficient: f64,
    pub missing_supplier_policy: String,
}

impl Methodology {
    pub fn new(direct: &DirectWeights, total: &TotalWeights, params: &PropagationParams) -> Self {
        let tier_weights = (1..=params.max_tiers)
            .map(|tier| (format!("tier_{}", tier), percent(params.tier_weight(tier))))
            .collect();
        Methodology {
            direct_risk_formula: format!(
                "{} country risk + {} sector risk",
                percent(direct.country),
                percent(direct.sector)
            ),
            indirect_risk_formula:
                "Weighted average of supplier total risks using I-O coefficients".to_string(),
            total_risk_formula: format!(
                "{} direct risk + {} indirect risk",
                percent(total.direct),
                percent(total.indirect)
            ),
            tier_weights,
            max_tiers: params.max_tiers,
            country_weight: direct.country,
            sector_weight: direct.sector,
            direct_share: total.direct,
            indirect_share: total.indirect,
            supplier_fan_out: params.fan_out,
            min_coefficient: params.min_coefficient,
            missing_supplier_policy: params.missing_supplier_policy.to_string(),
        }
    }
}

fn percent(weight: f64) -> String {
    format!("{}%", round2(weight * 100.0))
}

/// Complete result for one country-sector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub country: NamedCode,
    pub sector: NamedCode,
    pub model: ModelIdentity,
    pub direct_risk: DirectRisk,
    pub indirect_risk: RiskVector,
    pub total_risk: RiskVector,
    pub top_suppliers: Vec<Supplier>,
    pub methodology: Methodology,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssessmentError {
    #[error("country '{country}' not found in model")]
    UnknownCountry { country: String, sector: String },

    #[error("sector '{sector}' not found in model")]
    UnknownSector { country: String, sector: String },

    #[error("cannot map {country}/{sector} to risk tables: {source}")]
    Mapping {
        country: String,
        sector: String,
        source: NormalizeError,
    },

    #[error("risk data not available for {country}/{sector}")]
    RiskDataNotFound { country: String, sector: String },

    #[error("supplier {supplier_country}/{supplier_sector} of {country}/{sector} has no risk data")]
    SupplierDataMissing {
        country: String,
        sector: String,
        supplier_country: String,
        supplier_sector: String,
    },

    #[error("{source}")]
    MatrixLoad {
        country: String,
        sector: String,
        source: MatrixLoadFailure,
    },
}

impl AssessmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            AssessmentError::UnknownCountry { .. } => "unknown_country",
            AssessmentError::UnknownSector { .. } => "unknown_sector",
            AssessmentError::Mapping { .. } => "mapping",
            AssessmentError::RiskDataNotFound { .. } => "risk_data_not_found",
            AssessmentError::SupplierDataMissing { .. } => "supplier_data_missing",
            AssessmentError::MatrixLoad { .. } => "matrix_load",
        }
    }

    /// Only a failed matrix load is fatal for the model instance
    pub fn is_fatal(&self) -> bool {
        matches!(self, AssessmentError::MatrixLoad { .. })
    }

    pub fn country(&self) -> &str {
        match self {
            AssessmentError::UnknownCountry { country, .. }
            | AssessmentError::UnknownSector { country, .. }
            | AssessmentError::Mapping { country, .. }
            | AssessmentError::RiskDataNotFound { country, .. }
            | AssessmentError::SupplierDataMissing { country, .. }
            | AssessmentError::MatrixLoad { country, .. } => country,
        }
    }

    pub fn sector(&self) -> &str {
        match self {
            AssessmentError::UnknownCountry { sector, .. }
            | AssessmentError::UnknownSector { sector, .. }
            | AssessmentError::Mapping { sector, .. }
            | AssessmentError::RiskDataNotFound { sector, .. }
            | AssessmentError::SupplierDataMissing { sector, .. }
            | AssessmentError::MatrixLoad { sector, .. } => sector,
        }
    }

    /// `{error, kind, country, sector}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "country": self.country(),
            "sector": self.sector(),
        })
    }

    fn from_direct(country: &str, sector: &str, err: DirectRiskError) -> Self {
        match err {
            DirectRiskError::Mapping(source) => AssessmentError::Mapping {
                country: country.to_string(),
                sector: sector.to_string(),
                source,
            },
            DirectRiskError::RiskDataNotFound { .. } => AssessmentError::RiskDataNotFound {
                country: country.to_string(),
                sector: sector.to_string(),
            },
        }
    }

    fn from_propagation(country: &str, sector: &str, err: PropagationError) -> Self {
        match err {
            PropagationError::MatrixLoad(source) => Self::from_matrix(country, sector, source),
            PropagationError::MissingSupplier {
                country: supplier_country,
                sector: supplier_sector,
                ..
            } => AssessmentError::SupplierDataMissing {
                country: country.to_string(),
                sector: sector.to_string(),
                supplier_country,
                supplier_sector,
            },
        }
    }

    fn from_matrix(country: &str, sector: &str, source: MatrixLoadFailure) -> Self {
        AssessmentError::MatrixLoad {
            country: country.to_string(),
            sector: sector.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssessOptions {
    pub skip_external_enrichment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmFailure {
    pub country: String,
    pub sector: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<WarmFailure>,
}

/// Combines direct scoring, propagation and enrichment over one model
pub struct RiskAssessor {
    model: Arc<dyn IoModel>,
    scorer: DirectRiskScorer,
    propagator: IndirectRiskPropagator,
    total_weights: TotalWeights,
    top_suppliers: usize,
    climate: Option<Arc<dyn ClimateSource>>,
    cache: Option<Arc<AssessmentCache>>,
}

pub struct RiskAssessorBuilder {
    model: Arc<dyn IoModel>,
    tables: Arc<RiskTables>,
    direct_weights: DirectWeights,
    total_weights: TotalWeights,
    params: PropagationParams,
    top_suppliers: usize,
    climate: Option<Arc<dyn ClimateSource>>,
    climate_timeout: Option<Duration>,
    cache: Option<Arc<AssessmentCache>>,
}

impl RiskAssessorBuilder {
    pub fn direct_weights(mut self, weights: DirectWeights) -> Self {
        self.direct_weights = weights;
        self
    }

    pub fn total_weights(mut self, weights: TotalWeights) -> Self {
        self.total_weights = weights;
        self
    }

    pub fn propagation(mut self, params: PropagationParams) -> Self {
        self.params = params;
        self
    }

    pub fn top_suppliers(mut self, top_n: usize) -> Self {
        self.top_suppliers = top_n;
        self
    }

    pub fn climate(mut self, source: Arc<dyn ClimateSource>) -> Self {
        self.climate = Some(source);
        self
    }

    /// Bound every climate lookup by `timeout`
    pub fn climate_timeout(mut self, timeout: Duration) -> Self {
        self.climate_timeout = Some(timeout);
        self
    }

    pub fn cache(mut self, cache: Arc<AssessmentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> RiskAssessor {
        let scorer = DirectRiskScorer::new(
            Arc::clone(&self.model),
            self.tables,
            self.direct_weights,
        );
        let propagator =
            IndirectRiskPropagator::new(Arc::clone(&self.model), scorer.clone(), self.params);
        let climate = match (self.climate, self.climate_timeout) {
            (Some(source), Some(timeout)) => {
                Some(Arc::new(TimeoutClimate::new(source, timeout)) as Arc<dyn ClimateSource>)
            }
            (source, _) => source,
        };
        RiskAssessor {
            model: self.model,
            scorer,
            propagator,
            total_weights: self.total_weights,
            top_suppliers: self.top_suppliers,
            climate,
            cache: self.cache,
        }
    }
}

impl RiskAssessor {
    pub fn builder(model: Arc<dyn IoModel>, tables: Arc<RiskTables>) -> RiskAssessorBuilder {
        RiskAssessorBuilder {
            model,
            tables,
            direct_weights: DirectWeights::default(),
            total_weights: TotalWeights::default(),
            params: PropagationParams::default(),
            top_suppliers: DEFAULT_TOP_SUPPLIERS,
            climate: None,
            climate_timeout: None,
            cache: None,
        }
    }

    pub fn model(&self) -> &Arc<dyn IoModel> {
        &self.model
    }

    pub fn model_info(&self) -> ModelInfo {
        self.model.info()
    }

    pub fn countries(&self) -> &[Country] {
        self.model.countries()
    }

    pub fn sectors(&self) -> &[Sector] {
        self.model.sectors()
    }

    pub fn cache(&self) -> Option<&Arc<AssessmentCache>> {
        self.cache.as_ref()
    }

    pub fn methodology(&self) -> Methodology {
        Methodology::new(
            self.scorer.weights(),
            &self.total_weights,
            self.propagator.params(),
        )
    }

    fn validate(&self, country: &str, sector: &str) -> Result<(), AssessmentError> {
        self.model.validate(country, sector).map_err(|e| match e {
            InvalidPair::UnknownCountry(_) => AssessmentError::UnknownCountry {
                country: country.to_string(),
                sector: sector.to_string(),
            },
            InvalidPair::UnknownSector(_) => AssessmentError::UnknownSector {
                country: country.to_string(),
                sector: sector.to_string(),
            },
        })
    }

    pub fn compute_direct_risk(
        &self,
        country: &str,
        sector: &str,
    ) -> Result<RiskVector, AssessmentError> {
        self.scorer
            .compute_direct_risk(country, sector)
            .map_err(|e| AssessmentError::from_direct(country, sector, e))
    }

    pub fn compute_indirect_risk(
        &self,
        country: &str,
        sector: &str,
    ) -> Result<RiskVector, AssessmentError> {
        self.propagator
            .compute_indirect_risk(country, sector)
            .map_err(|e| AssessmentError::from_propagation(country, sector, e))
    }

    /// Total risk without enrichment, suppliers or methodology
    pub fn compute_total_risk(
        &self,
        country: &str,
        sector: &str,
    ) -> Result<RiskVector, AssessmentError> {
        self.validate(country, sector)?;
        let direct = self.compute_direct_risk(country, sector)?;
        let indirect = self.compute_indirect_risk(country, sector)?;
        Ok(calculate_total(&direct, &indirect, &self.total_weights))
    }

    pub fn assess_risk(
        &self,
        country: &str,
        sector: &str,
        options: AssessOptions,
    ) -> Result<Assessment, AssessmentError> {
        let enriched = self.climate.is_some() && !options.skip_external_enrichment;
        let key = CacheKey::new(self.model.id(), country, sector, enriched);
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(hit.as_ref().clone());
        }

        let assessment = self.assess_uncached(country, sector, enriched)?;
        if let Some(cache) = &self.cache {
            cache.insert(key, Arc::new(assessment.clone()));
        }
        Ok(assessment)
    }

    fn assess_uncached(
        &self,
        country: &str,
        sector: &str,
        enriched: bool,
    ) -> Result<Assessment, AssessmentError> {
        self.validate(country, sector)?;
        let country_name = self
            .model
            .country(country)
            .map_or_else(|| country.to_string(), |c| c.name.clone());
        let sector_name = self
            .model
            .sector(sector)
            .map_or_else(|| sector.to_string(), |s| s.name.clone());

        let direct = self.compute_direct_risk(country, sector)?;

        let expected_loss = match &self.climate {
            Some(source) if enriched => source
                .country_risk(&country_name)
                .map_err(|e| {
                    tracing::warn!(country = %country_name, error = %e, "climate enrichment unavailable");
                })
                .ok(),
            _ => None,
        };

        let indirect = self.compute_indirect_risk(country, sector)?;
        let total = calculate_total(&direct, &indirect, &self.total_weights);

        let top_suppliers = self
            .model
            .top_suppliers(country, sector, self.top_suppliers, 0.0)
            .map_err(|e| AssessmentError::from_matrix(country, sector, e))?;

        Ok(Assessment {
            country: NamedCode {
                code: country.to_string(),
                name: country_name,
            },
            sector: NamedCode {
                code: sector.to_string(),
                name: sector_name,
            },
            model: ModelIdentity {
                id: self.model.id().to_string(),
                name: self.model.name().to_string(),
                version: self.model.version().to_string(),
            },
            direct_risk: DirectRisk {
                scores: direct,
                expected_loss,
            },
            indirect_risk: indirect,
            total_risk: total,
            top_suppliers,
            methodology: self.methodology(),
        })
    }

    /// Assess `pairs` in parallel, filling the assessment cache
    pub fn warm(&self, pairs: &[(String, String)], options: AssessOptions) -> WarmSummary {
        self.warm_with_progress(pairs, options, &|| {})
    }

    /// Like `warm`, calling `progress` once per finished pair
    pub fn warm_with_progress(
        &self,
        pairs: &[(String, String)],
        options: AssessOptions,
        progress: &(dyn Fn() + Sync),
    ) -> WarmSummary {
        let results: Vec<Result<(), WarmFailure>> = pairs
            .par_iter()
            .map(|(country, sector)| {
                let result = self
                    .assess_risk(country, sector, options)
                    .map(|_| ())
                    .map_err(|e| WarmFailure {
                        country: country.clone(),
                        sector: sector.clone(),
                        reason: e.to_string(),
                    });
                progress();
                result
            })
            .collect();

        let mut summary = WarmSummary {
            total: pairs.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(()) => summary.succeeded += 1,
                Err(failure) => summary.failed.push(failure),
            }
        }
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "assessment cache warmed"
        );
        summary
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::climate::EnrichmentUnavailable;
    use crate::concordance::{CodeNormalizer, CountryCodes, CountryVocabulary, SectorConcordance};
    use crate::matrix::{CoefficientRow, CoefficientSource};
    use crate::model::IcioModel;
    use crate::risk::RiskType;
    use crate::tables::{RiskRecord, Vocabulary};

    pub(crate) fn sample_assessment(country: &str) -> Assessment {
        Assessment {
            country: NamedCode {
                code: country.to_string(),
                name: country.to_string(),
            },
            sector: NamedCode {
                code: "C10T12".to_string(),
                name: "Food".to_string(),
            },
            model: ModelIdentity {
                id: "oecd".to_string(),
                name: "OECD ICIO Extended".to_string(),
                version: "2020".to_string(),
            },
            direct_risk: DirectRisk {
                scores: RiskVector::splat(2.3),
                expected_loss: None,
            },
            indirect_risk: RiskVector::splat(2.22),
            total_risk: RiskVector::splat(2.27),
            top_suppliers: Vec::new(),
            methodology: Methodology::new(
                &DirectWeights::default(),
                &TotalWeights::default(),
                &PropagationParams::default(),
            ),
        }
    }

    struct FixedClimate;

    impl ClimateSource for FixedClimate {
        fn country_risk(&self, country: &str) -> Result<ExpectedLoss, EnrichmentUnavailable> {
            if country == "United States" {
                Ok(ExpectedLoss {
                    total_annual_loss: 100.0,
                    ..Default::default()
                })
            } else {
                Err(EnrichmentUnavailable::Unsupported)
            }
        }
    }

    fn assessor() -> RiskAssessor {
        let model: Arc<dyn IoModel> = Arc::new(IcioModel::new(
            Vocabulary::new(
                vec![
                    Country::new("USA", "United States"),
                    Country::new("CHN", "China"),
                ],
                vec![Sector::new("FOOD", "Food products")],
            ),
            CoefficientSource::rows(vec![CoefficientRow::new("CHN", "FOOD", "USA", "FOOD", 0.3)]),
            CodeNormalizer::new(
                SectorConcordance::identity(["FOOD"]),
                CountryCodes::default(),
                CountryVocabulary::Iso3,
                CountryVocabulary::Iso3,
            ),
        ));
        let tables = Arc::new(RiskTables::new(
            vec![
                RiskRecord::new("USA", "United States", RiskVector::splat(2.0)),
                RiskRecord::new("CHN", "China", RiskVector::splat(4.0)),
            ],
            vec![RiskRecord::new("FOOD", "Food products", RiskVector::splat(3.0))],
        ));
        RiskAssessor::builder(model, tables)
            .climate(Arc::new(FixedClimate))
            .cache(Arc::new(AssessmentCache::default()))
            .build()
    }

    #[test]
    fn test_methodology_strings() {
        let m = Methodology::new(
            &DirectWeights::default(),
            &TotalWeights::default(),
            &PropagationParams::default(),
        );
        assert_eq!(m.direct_risk_formula, "70% country risk + 30% sector risk");
        assert_eq!(m.total_risk_formula, "60% direct risk + 40% indirect risk");
        assert_eq!(m.tier_weights["tier_1"], "100%");
        assert_eq!(m.tier_weights["tier_2"], "40%");
        assert_eq!(m.tier_weights["tier_3"], "16%");
        assert_eq!(m.missing_supplier_policy, "skip_as_is");
    }

    #[test]
    fn test_assessment_with_enrichment() {
        let a = assessor()
            .assess_risk("USA", "FOOD", AssessOptions::default())
            .unwrap();
        assert_eq!(a.country.name, "United States");
        assert_eq!(a.direct_risk.scores[RiskType::Climate], 2.3);
        assert_eq!(a.indirect_risk[RiskType::Climate], 2.22);
        assert_eq!(a.total_risk[RiskType::Climate], 2.27);
        assert_eq!(
            a.direct_risk.expected_loss.as_ref().map(|l| l.total_annual_loss),
            Some(100.0)
        );
        assert_eq!(a.top_suppliers.len(), 1);
    }

    #[test]
    fn test_enrichment_failure_is_silent() {
        let a = assessor()
            .assess_risk("CHN", "FOOD", AssessOptions::default())
            .unwrap();
        assert!(a.direct_risk.expected_loss.is_none());
    }

    #[test]
    fn test_skip_enrichment() {
        let a = assessor()
            .assess_risk(
                "USA",
                "FOOD",
                AssessOptions {
                    skip_external_enrichment: true,
                },
            )
            .unwrap();
        assert!(a.direct_risk.expected_loss.is_none());
    }

    #[test]
    fn test_error_json_shape() {
        let err = assessor()
            .assess_risk("XXX", "FOOD", AssessOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_country");
        assert!(!err.is_fatal());
        let json = err.to_json();
        assert_eq!(json["kind"], "unknown_country");
        assert_eq!(json["country"], "XXX");
        assert_eq!(json["sector"], "FOOD");
        assert!(json["error"].as_str().unwrap().contains("XXX"));
    }

    #[test]
    fn test_repeat_assessment_hits_cache() {
        let assessor = assessor();
        let first = assessor
            .assess_risk("USA", "FOOD", AssessOptions::default())
            .unwrap();
        let second = assessor
            .assess_risk("USA", "FOOD", AssessOptions::default())
            .unwrap();
        assert_eq!(first, second);
        let stats = assessor.cache().unwrap().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_warm_reports_failures() {
        let assessor = assessor();
        let pairs = vec![
            ("USA".to_string(), "FOOD".to_string()),
            ("CHN".to_string(), "FOOD".to_string()),
            ("XXX".to_string(), "FOOD".to_string()),
        ];
        let summary = assessor.warm(&pairs, AssessOptions::default());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].country, "XXX");
        assert_eq!(assessor.cache().unwrap().len(), 2);
    }

    #[test]
    fn test_direct_risk_json_flattens_scores() {
        let json = serde_json::to_value(sample_assessment("USA")).unwrap();
        assert_eq!(json["direct_risk"]["climate"], 2.3);
        assert!(json["direct_risk"].get("expected_loss").is_none());
        assert_eq!(json["model"]["id"], "oecd");
    }
}

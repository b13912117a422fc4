//! End-to-end assessment scenarios over small in-memory models

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use supplyrisk_core::assessment::{AssessOptions, AssessmentError, RiskAssessor};
use supplyrisk_core::climate::{ClimateSource, EnrichmentUnavailable, ExpectedLoss};
use supplyrisk_core::concordance::{
    CodeNormalizer, CountryCodes, CountryVocabulary, SectorConcordance,
};
use supplyrisk_core::matrix::{CoefficientRow, CoefficientSource, MatrixLoadFailure, MatrixStats};
use supplyrisk_core::model::{Country, IcioModel, IoModel, Sector, Supplier};
use supplyrisk_core::propagate::{IndirectRiskPropagator, PropagationParams};
use supplyrisk_core::risk::{
    calculate_direct, calculate_total, round2, DirectWeights, RiskType, RiskVector, TotalWeights,
};
use supplyrisk_core::scorer::DirectRiskScorer;
use supplyrisk_core::tables::{RiskRecord, RiskTables, Vocabulary};

const EPSILON: f64 = 1e-9;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

/// Wraps a model and counts matrix reads
struct CountingModel {
    inner: Arc<dyn IoModel>,
    supplier_calls: AtomicUsize,
    coefficient_calls: AtomicUsize,
}

impl CountingModel {
    fn new(inner: Arc<dyn IoModel>) -> Self {
        CountingModel {
            inner,
            supplier_calls: AtomicUsize::new(0),
            coefficient_calls: AtomicUsize::new(0),
        }
    }

    fn matrix_reads(&self) -> usize {
        self.supplier_calls.load(Ordering::SeqCst) + self.coefficient_calls.load(Ordering::SeqCst)
    }
}

impl IoModel for CountingModel {
    fn id(&self) -> &str {
        self.inner.id()
    }
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn version(&self) -> &str {
        self.inner.version()
    }
    fn description(&self) -> &str {
        self.inner.description()
    }
    fn countries(&self) -> &[Country] {
        self.inner.countries()
    }
    fn sectors(&self) -> &[Sector] {
        self.inner.sectors()
    }
    fn country(&self, code: &str) -> Option<&Country> {
        self.inner.country(code)
    }
    fn sector(&self, code: &str) -> Option<&Sector> {
        self.inner.sector(code)
    }
    fn normalizer(&self) -> &CodeNormalizer {
        self.inner.normalizer()
    }
    fn coefficient(
        &self,
        from_country: &str,
        from_sector: &str,
        to_country: &str,
        to_sector: &str,
    ) -> Result<f64, MatrixLoadFailure> {
        self.coefficient_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .coefficient(from_country, from_sector, to_country, to_sector)
    }
    fn top_suppliers(
        &self,
        country: &str,
        sector: &str,
        top_n: usize,
        min_coefficient: f64,
    ) -> Result<Vec<Supplier>, MatrixLoadFailure> {
        self.supplier_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .top_suppliers(country, sector, top_n, min_coefficient)
    }
    fn matrix_stats(&self) -> Result<MatrixStats, MatrixLoadFailure> {
        self.inner.matrix_stats()
    }
}

fn model(countries: &[(&str, &str)], sector: &str, rows: Vec<CoefficientRow>) -> Arc<dyn IoModel> {
    Arc::new(IcioModel::new(
        Vocabulary::new(
            countries
                .iter()
                .map(|(code, name)| Country::new(code, name))
                .collect(),
            vec![Sector::new(sector, sector)],
        ),
        CoefficientSource::rows(rows),
        CodeNormalizer::new(
            SectorConcordance::identity([sector]),
            CountryCodes::default(),
            CountryVocabulary::Iso3,
            CountryVocabulary::Iso3,
        ),
    ))
}

/// USA buys FOOD from CHN at 0.5
fn food_model() -> Arc<dyn IoModel> {
    model(
        &[("USA", "United States"), ("CHN", "China")],
        "FOOD",
        vec![CoefficientRow::new("CHN", "FOOD", "USA", "FOOD", 0.5)],
    )
}

fn food_tables() -> Arc<RiskTables> {
    Arc::new(RiskTables::new(
        vec![
            RiskRecord::new("USA", "United States", RiskVector::splat(2.0)),
            RiskRecord::new("CHN", "China", RiskVector::splat(4.0)),
        ],
        vec![RiskRecord::new("FOOD", "Food products", RiskVector::splat(3.0))],
    ))
}

fn cycle_tables() -> Arc<RiskTables> {
    Arc::new(RiskTables::new(
        vec![
            RiskRecord::new("A", "Alpha", RiskVector::splat(2.0)),
            RiskRecord::new("B", "Beta", RiskVector::splat(4.0)),
        ],
        vec![RiskRecord::new("S1", "Sector one", RiskVector::splat(3.0))],
    ))
}

fn cycle_model() -> Arc<dyn IoModel> {
    model(
        &[("A", "Alpha"), ("B", "Beta")],
        "S1",
        vec![
            CoefficientRow::new("A", "S1", "B", "S1", 0.3),
            CoefficientRow::new("B", "S1", "A", "S1", 0.3),
        ],
    )
}

fn propagator(
    model: Arc<dyn IoModel>,
    tables: Arc<RiskTables>,
    params: PropagationParams,
) -> IndirectRiskPropagator {
    let scorer = DirectRiskScorer::new(Arc::clone(&model), tables, DirectWeights::default());
    IndirectRiskPropagator::new(model, scorer, params)
}

struct SlowClimate(Duration);

impl ClimateSource for SlowClimate {
    fn country_risk(&self, _country: &str) -> Result<ExpectedLoss, EnrichmentUnavailable> {
        std::thread::sleep(self.0);
        Ok(ExpectedLoss {
            total_annual_loss: 1.0,
            ..Default::default()
        })
    }
}

#[test]
fn test_direct_risk_blends_country_and_sector() {
    let assessor = RiskAssessor::builder(food_model(), food_tables()).build();
    let direct = assessor.compute_direct_risk("USA", "FOOD").unwrap();
    assert!(approx(direct[RiskType::Climate], 2.30));
    for (_, value) in direct.iter() {
        assert!(approx(value, round2(0.7 * 2.0 + 0.3 * 3.0)));
    }
}

#[test]
fn test_indirect_risk_driven_by_single_supplier() {
    let assessor = RiskAssessor::builder(food_model(), food_tables()).build();
    // CHN: direct 3.70, no suppliers, so its blended total is 0.6 * 3.70
    let indirect = assessor.compute_indirect_risk("USA", "FOOD").unwrap();
    assert!(approx(indirect[RiskType::Climate], 2.22));

    let assessment = assessor
        .assess_risk("USA", "FOOD", AssessOptions::default())
        .unwrap();
    assert!(approx(assessment.total_risk[RiskType::Climate], 2.27));
    assert_eq!(assessment.top_suppliers.len(), 1);
    assert_eq!(assessment.top_suppliers[0].country, "CHN");
    assert_eq!(assessment.top_suppliers[0].country_name, "China");
}

#[test]
fn test_unknown_country_is_a_value_not_a_panic() {
    let counting = Arc::new(CountingModel::new(food_model()));
    let assessor = RiskAssessor::builder(counting.clone(), food_tables()).build();

    let err = assessor
        .assess_risk("XXX", "FOOD", AssessOptions::default())
        .unwrap_err();
    assert!(matches!(err, AssessmentError::UnknownCountry { ref country, .. } if country == "XXX"));
    assert_eq!(counting.matrix_reads(), 0);

    let err = assessor
        .assess_risk("USA", "STEEL", AssessOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), "unknown_sector");
    assert_eq!(counting.matrix_reads(), 0);
}

#[test]
fn test_two_node_cycle_terminates() {
    let propagator = propagator(cycle_model(), cycle_tables(), PropagationParams::default());
    let (risk, trace) = propagator.compute_indirect_risk_traced("A", "S1").unwrap();
    assert!(risk.is_well_formed());
    assert!(risk.iter().all(|(_, v)| v.is_finite() && v > 0.0));
    assert!(trace.cycles_cut >= 1);

    let again = propagator.compute_indirect_risk("A", "S1").unwrap();
    assert_eq!(risk, again);
}

#[test]
fn test_cycle_value() {
    // Tier 2: A's total is 0.6 * 2.30 (its own suppliers are cut), so B's
    // indirect is round(0.4 * 1.38) = 0.55 and B's total 2.22 + 0.22
    let propagator = propagator(cycle_model(), cycle_tables(), PropagationParams::default());
    let risk = propagator.compute_indirect_risk("A", "S1").unwrap();
    assert!(approx(risk[RiskType::Climate], 2.44));
}

#[test]
fn test_top_suppliers_respects_floor() {
    let model = food_model();
    assert!(model
        .top_suppliers("USA", "FOOD", 1, 0.6)
        .unwrap()
        .is_empty());
    assert_eq!(model.top_suppliers("USA", "FOOD", 1, 0.4).unwrap().len(), 1);
}

#[test]
fn test_timeout_leaves_assessment_unenriched() {
    let assessor = RiskAssessor::builder(food_model(), food_tables())
        .climate(Arc::new(SlowClimate(Duration::from_secs(2))))
        .climate_timeout(Duration::from_millis(20))
        .build();

    let started = Instant::now();
    let assessment = assessor
        .assess_risk("USA", "FOOD", AssessOptions::default())
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(assessment.direct_risk.expected_loss.is_none());
    assert!(approx(assessment.total_risk[RiskType::Climate], 2.27));

    let json = serde_json::to_value(&assessment).unwrap();
    assert!(json["direct_risk"].get("expected_loss").is_none());
}

#[test]
fn test_fast_climate_source_enriches() {
    let assessor = RiskAssessor::builder(food_model(), food_tables())
        .climate(Arc::new(SlowClimate(Duration::ZERO)))
        .climate_timeout(Duration::from_secs(5))
        .build();
    let assessment = assessor
        .assess_risk("USA", "FOOD", AssessOptions::default())
        .unwrap();
    assert_eq!(
        assessment
            .direct_risk
            .expected_loss
            .map(|l| l.total_annual_loss),
        Some(1.0)
    );
}

#[test]
fn test_total_risk_algebra() {
    let assessor = RiskAssessor::builder(cycle_model(), cycle_tables()).build();
    for country in ["A", "B"] {
        let direct = assessor.compute_direct_risk(country, "S1").unwrap();
        let indirect = assessor.compute_indirect_risk(country, "S1").unwrap();
        let total = assessor.compute_total_risk(country, "S1").unwrap();
        for risk_type in RiskType::ALL {
            let expected = round2(0.6 * direct[risk_type] + 0.4 * indirect[risk_type]);
            assert!(approx(total[risk_type], expected), "{} {}", country, risk_type);
        }
        assert_eq!(
            total,
            calculate_total(&direct, &indirect, &TotalWeights::default())
        );
    }
}

#[test]
fn test_direct_blend_uses_configured_weights() {
    let weights = DirectWeights {
        country: 0.5,
        sector: 0.5,
    };
    let assessor = RiskAssessor::builder(food_model(), food_tables())
        .direct_weights(weights)
        .build();
    let direct = assessor.compute_direct_risk("CHN", "FOOD").unwrap();
    assert!(approx(direct[RiskType::Political], 3.5));
    assert_eq!(
        direct,
        calculate_direct(&RiskVector::splat(4.0), &RiskVector::splat(3.0), &weights)
    );
}

#[test]
fn test_traversal_is_bounded_by_fan_out_and_depth() {
    // Every node supplies every node, self-loops included
    let codes = ["AAA", "BBB", "CCC", "DDD", "EEE"];
    let mut rows = Vec::new();
    for (i, from) in codes.iter().enumerate() {
        for to in codes.iter() {
            rows.push(CoefficientRow::new(from, "X", to, "X", 0.05 + i as f64 * 0.01));
        }
    }
    let countries: Vec<(&str, &str)> = codes.iter().map(|c| (*c, *c)).collect();
    let counting = Arc::new(CountingModel::new(model(&countries, "X", rows)));
    let tables = Arc::new(RiskTables::new(
        codes
            .iter()
            .map(|c| RiskRecord::new(c, c, RiskVector::splat(1.0)))
            .collect(),
        vec![RiskRecord::new("X", "X", RiskVector::splat(1.0))],
    ));
    let params = PropagationParams {
        fan_out: 3,
        ..PropagationParams::default()
    };
    let propagator = propagator(counting.clone(), tables, params);

    let (risk, trace) = propagator.compute_indirect_risk_traced("AAA", "X").unwrap();
    assert!(risk.is_well_formed());
    // 1 + 3 + 3^2 nodes at most across three tiers
    let calls = counting.supplier_calls.load(Ordering::SeqCst);
    assert!(calls <= 13, "expanded {} nodes", calls);
    assert_eq!(calls, trace.nodes_expanded);
}

#[test]
fn test_pair_without_suppliers_has_zero_indirect_risk() {
    let assessor = RiskAssessor::builder(food_model(), food_tables()).build();
    let indirect = assessor.compute_indirect_risk("CHN", "FOOD").unwrap();
    assert!(indirect.is_zero());
    let total = assessor.compute_total_risk("CHN", "FOOD").unwrap();
    assert!(approx(total[RiskType::Climate], 2.22));
}

#[test]
fn test_top_suppliers_are_strictly_descending() {
    let rows = (0..8)
        .map(|i| {
            let from = format!("S{:02}", i);
            CoefficientRow::new(&from, "X", "BUY", "X", 0.001 * i as f64 + 0.0005)
        })
        .collect();
    let mut countries: Vec<(String, String)> = (0..8)
        .map(|i| (format!("S{:02}", i), format!("Supplier {}", i)))
        .collect();
    countries.push(("BUY".to_string(), "Buyer".to_string()));
    let country_refs: Vec<(&str, &str)> = countries
        .iter()
        .map(|(c, n)| (c.as_str(), n.as_str()))
        .collect();
    let model = model(&country_refs, "X", rows);

    let suppliers = model.top_suppliers("BUY", "X", 5, 0.002).unwrap();
    assert!(suppliers.len() <= 5);
    assert!(suppliers.iter().all(|s| s.coefficient > 0.002));
    assert!(suppliers
        .windows(2)
        .all(|w| w[0].coefficient > w[1].coefficient));
    assert_eq!(suppliers[0].country, "S07");
}

//! Multi-tier indirect risk propagation
//!
//! Global invariants enforced:
//! - Recursion never passes `max_tiers`
//! - A pair already on the current path contributes zero (cycle cut)
//! - Siblings never see each other's path marks
//! - Supplier contributions are folded in supplier order, so results are
//!   deterministic for a given matrix
//!
//! The visited set is the chain of ancestor frames on the stack. Each frame
//! borrows its parent, so extending the path is O(1) and nothing is shared
//! between branches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::matrix::MatrixLoadFailure;
use crate::model::IoModel;
use crate::risk::{RiskVector, TotalWeights};
use crate::scorer::{DirectRiskError, DirectRiskScorer};

/// What to do with a supplier whose direct risk cannot be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSupplierPolicy {
    /// Drop the supplier, keep dividing by the full coefficient sum
    #[default]
    SkipAsIs,
    /// Drop the supplier and divide by the coefficients that contributed
    SkipAndRenormalize,
    /// Abort the propagation with the supplier's error
    FailFast,
}

impl MissingSupplierPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingSupplierPolicy::SkipAsIs => "skip_as_is",
            MissingSupplierPolicy::SkipAndRenormalize => "skip_and_renormalize",
            MissingSupplierPolicy::FailFast => "fail_fast",
        }
    }
}

impl fmt::Display for MissingSupplierPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissingSupplierPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "skip_as_is" => Ok(MissingSupplierPolicy::SkipAsIs),
            "skip_and_renormalize" => Ok(MissingSupplierPolicy::SkipAndRenormalize),
            "fail_fast" => Ok(MissingSupplierPolicy::FailFast),
            other => anyhow::bail!(
                "unknown missing supplier policy '{}' (expected skip_as_is, skip_and_renormalize or fail_fast)",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropagationParams {
    pub max_tiers: usize,
    /// Weight per tier, index 0 is tier 1. Tiers past the end weigh 0.0
    pub tier_weights: Vec<f64>,
    /// Blend of a supplier's own direct and indirect risk
    pub supplier_blend: TotalWeights,
    pub fan_out: usize,
    pub min_coefficient: f64,
    pub missing_supplier_policy: MissingSupplierPolicy,
}

impl Default for PropagationParams {
    fn default() -> Self {
        PropagationParams {
            max_tiers: 3,
            tier_weights: vec![1.0, 0.4, 0.16],
            supplier_blend: TotalWeights::default(),
            fan_out: 20,
            min_coefficient: 0.001,
            missing_supplier_policy: MissingSupplierPolicy::default(),
        }
    }
}

impl PropagationParams {
    pub fn tier_weight(&self, tier: usize) -> f64 {
        tier.checked_sub(1)
            .and_then(|i| self.tier_weights.get(i))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Counters collected during one propagation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropagationTrace {
    /// Calls that fetched suppliers
    pub nodes_expanded: usize,
    pub edges_folded: usize,
    pub edges_skipped: usize,
    pub cycles_cut: usize,
    pub tier_limit_hits: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropagationError {
    #[error(transparent)]
    MatrixLoad(#[from] MatrixLoadFailure),

    #[error("supplier {country}/{sector} has no usable risk data")]
    MissingSupplier {
        country: String,
        sector: String,
        #[source]
        source: DirectRiskError,
    },
}

/// One frame of the current ancestor path
struct VisitedPath<'a> {
    country: &'a str,
    sector: &'a str,
    parent: Option<&'a VisitedPath<'a>>,
}

impl VisitedPath<'_> {
    fn contains(path: Option<&VisitedPath<'_>>, country: &str, sector: &str) -> bool {
        let mut current = path;
        while let Some(frame) = current {
            if frame.country == country && frame.sector == sector {
                return true;
            }
            current = frame.parent;
        }
        false
    }
}

/// Computes inherited risk by walking suppliers tier by tier
#[derive(Clone)]
pub struct IndirectRiskPropagator {
    model: Arc<dyn IoModel>,
    scorer: DirectRiskScorer,
    params: PropagationParams,
}

impl IndirectRiskPropagator {
    pub fn new(model: Arc<dyn IoModel>, scorer: DirectRiskScorer, params: PropagationParams) -> Self {
        IndirectRiskPropagator {
            model,
            scorer,
            params,
        }
    }

    pub fn params(&self) -> &PropagationParams {
        &self.params
    }

    /// Indirect risk of a pair starting at tier 1 with an empty path
    pub fn compute_indirect_risk(
        &self,
        country: &str,
        sector: &str,
    ) -> Result<RiskVector, PropagationError> {
        self.compute_indirect_risk_traced(country, sector)
            .map(|(risk, _)| risk)
    }

    pub fn compute_indirect_risk_traced(
        &self,
        country: &str,
        sector: &str,
    ) -> Result<(RiskVector, PropagationTrace), PropagationError> {
        let mut trace = PropagationTrace::default();
        let risk = self.propagate(country, sector, 1, None, &mut trace)?;
        tracing::debug!(
            country,
            sector,
            nodes_expanded = trace.nodes_expanded,
            edges_folded = trace.edges_folded,
            edges_skipped = trace.edges_skipped,
            cycles_cut = trace.cycles_cut,
            tier_limit_hits = trace.tier_limit_hits,
            "indirect risk propagated"
        );
        Ok((risk, trace))
    }

    /// Formula (per risk type, per supplier s of the node):
    /// supplier_total = 0.6 * direct(s) + 0.4 * indirect(s, tier + 1)
    /// indirect += (coef(s) / sum of coefs) * tier_weight(tier) * supplier_total
    fn propagate(
        &self,
        country: &str,
        sector: &str,
        tier: usize,
        path: Option<&VisitedPath<'_>>,
        trace: &mut PropagationTrace,
    ) -> Result<RiskVector, PropagationError> {
        if tier > self.params.max_tiers {
            trace.tier_limit_hits += 1;
            return Ok(RiskVector::zero());
        }
        if VisitedPath::contains(path, country, sector) {
            trace.cycles_cut += 1;
            return Ok(RiskVector::zero());
        }

        trace.nodes_expanded += 1;
        let suppliers = self.model.top_suppliers(
            country,
            sector,
            self.params.fan_out,
            self.params.min_coefficient,
        )?;
        if suppliers.is_empty() {
            return Ok(RiskVector::zero());
        }

        let here = VisitedPath {
            country,
            sector,
            parent: path,
        };
        let blend = &self.params.supplier_blend;
        let total_coefficient: f64 = suppliers.iter().map(|s| s.coefficient).sum();

        let mut folded: Vec<(f64, RiskVector)> = Vec::with_capacity(suppliers.len());
        for supplier in &suppliers {
            let direct = match self
                .scorer
                .compute_direct_risk(&supplier.country, &supplier.sector)
            {
                Ok(direct) => direct,
                Err(err) => {
                    if self.params.missing_supplier_policy == MissingSupplierPolicy::FailFast {
                        return Err(PropagationError::MissingSupplier {
                            country: supplier.country.clone(),
                            sector: supplier.sector.clone(),
                            source: err,
                        });
                    }
                    tracing::warn!(
                        supplier_country = %supplier.country,
                        supplier_sector = %supplier.sector,
                        tier,
                        error = %err,
                        "skipping supplier without risk data"
                    );
                    trace.edges_skipped += 1;
                    continue;
                }
            };
            let indirect = self.propagate(
                &supplier.country,
                &supplier.sector,
                tier + 1,
                Some(&here),
                trace,
            )?;
            let supplier_total = direct.blend(blend.direct, &indirect, blend.indirect);
            folded.push((supplier.coefficient, supplier_total));
            trace.edges_folded += 1;
        }

        let denominator: f64 = match self.params.missing_supplier_policy {
            MissingSupplierPolicy::SkipAndRenormalize => folded.iter().map(|(c, _)| c).sum(),
            _ => total_coefficient,
        };
        if denominator == 0.0 {
            return Ok(RiskVector::zero());
        }

        let tier_weight = self.params.tier_weight(tier);
        let mut indirect = RiskVector::zero();
        for (coefficient, supplier_total) in &folded {
            let weight = (coefficient / denominator) * tier_weight;
            indirect.add_scaled(supplier_total, weight);
        }
        Ok(indirect.rounded())
    }
}

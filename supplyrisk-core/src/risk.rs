//! Risk vectors and the weighted blends that combine them
//!
//! Global invariants enforced:
//! - Every vector carries exactly the five declared risk types
//! - Blends are rounded to 2 decimal places at the points the methodology names
//! - Deterministic iteration order (declaration order of `RiskType`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// Risk dimensions scored for every country-sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    Climate,
    ModernSlavery,
    Political,
    WaterStress,
    NatureLoss,
}

impl RiskType {
    pub const ALL: [RiskType; 5] = [
        RiskType::Climate,
        RiskType::ModernSlavery,
        RiskType::Political,
        RiskType::WaterStress,
        RiskType::NatureLoss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskType::Climate => "climate",
            RiskType::ModernSlavery => "modern_slavery",
            RiskType::Political => "political",
            RiskType::WaterStress => "water_stress",
            RiskType::NatureLoss => "nature_loss",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round to 2 decimal places, exact halves to even
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// One score per `RiskType`, conventionally in [0, 5]
///
/// Serializes as a flat object keyed by risk type name. Missing keys
/// deserialize as `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RiskScores", into = "RiskScores")]
pub struct RiskVector {
    values: [f64; 5],
}

impl RiskVector {
    pub fn zero() -> Self {
        RiskVector { values: [0.0; 5] }
    }

    /// Build a vector by evaluating `f` once per risk type
    pub fn from_fn(mut f: impl FnMut(RiskType) -> f64) -> Self {
        let mut values = [0.0; 5];
        for risk_type in RiskType::ALL {
            values[risk_type.index()] = f(risk_type);
        }
        RiskVector { values }
    }

    /// Same value for every risk type
    pub fn splat(value: f64) -> Self {
        RiskVector { values: [value; 5] }
    }

    pub fn get(&self, risk_type: RiskType) -> f64 {
        self.values[risk_type.index()]
    }

    pub fn set(&mut self, risk_type: RiskType, value: f64) {
        self.values[risk_type.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (RiskType, f64)> + '_ {
        RiskType::ALL.into_iter().map(|r| (r, self.get(r)))
    }

    /// `self_weight * self + other_weight * other`, unrounded
    pub fn blend(&self, self_weight: f64, other: &RiskVector, other_weight: f64) -> RiskVector {
        RiskVector::from_fn(|r| self_weight * self.get(r) + other_weight * other.get(r))
    }

    /// Accumulate `weight * other` into `self`
    pub fn add_scaled(&mut self, other: &RiskVector, weight: f64) {
        for risk_type in RiskType::ALL {
            self.values[risk_type.index()] += weight * other.get(risk_type);
        }
    }

    pub fn rounded(&self) -> RiskVector {
        RiskVector::from_fn(|r| round2(self.get(r)))
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// True when every value is finite and non-negative
    pub fn is_well_formed(&self) -> bool {
        self.values.iter().all(|v| v.is_finite() && *v >= 0.0)
    }
}

impl Index<RiskType> for RiskVector {
    type Output = f64;

    fn index(&self, risk_type: RiskType) -> &f64 {
        &self.values[risk_type.index()]
    }
}

/// Wire form of a `RiskVector`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
struct RiskScores {
    climate: f64,
    modern_slavery: f64,
    political: f64,
    water_stress: f64,
    nature_loss: f64,
}

impl From<RiskScores> for RiskVector {
    fn from(s: RiskScores) -> Self {
        RiskVector {
            values: [
                s.climate,
                s.modern_slavery,
                s.political,
                s.water_stress,
                s.nature_loss,
            ],
        }
    }
}

impl From<RiskVector> for RiskScores {
    fn from(v: RiskVector) -> Self {
        RiskScores {
            climate: v.get(RiskType::Climate),
            modern_slavery: v.get(RiskType::ModernSlavery),
            political: v.get(RiskType::Political),
            water_stress: v.get(RiskType::WaterStress),
            nature_loss: v.get(RiskType::NatureLoss),
        }
    }
}

/// Country/sector weights for direct risk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectWeights {
    pub country: f64,
    pub sector: f64,
}

impl Default for DirectWeights {
    fn default() -> Self {
        DirectWeights {
            country: 0.7,
            sector: 0.3,
        }
    }
}

/// Direct/indirect weights for total risk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TotalWeights {
    pub direct: f64,
    pub indirect: f64,
}

impl Default for TotalWeights {
    fn default() -> Self {
        TotalWeights {
            direct: 0.6,
            indirect: 0.4,
        }
    }
}

/// Calculate direct risk from static country and sector vectors
///
/// Formula (per risk type):
/// direct = round(0.7 * country + 0.3 * sector, 2)
pub fn calculate_direct(
    country: &RiskVector,
    sector: &RiskVector,
    weights: &DirectWeights,
) -> RiskVector {
    country
        .blend(weights.country, sector, weights.sector)
        .rounded()
}

/// Calculate total risk from direct and indirect vectors
///
/// Formula (per risk type):
/// total = round(0.6 * direct + 0.4 * indirect, 2)
pub fn calculate_total(
    direct: &RiskVector,
    indirect: &RiskVector,
    weights: &TotalWeights,
) -> RiskVector {
    direct
        .blend(weights.direct, indirect, weights.indirect)
        .rounded()
}

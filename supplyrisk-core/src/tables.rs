//! Static reference data: risk tables and model vocabularies

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::model::{Country, Sector};
use crate::risk::RiskVector;

/// One country or sector row in the risk tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub risk_scores: RiskVector,
}

impl RiskRecord {
    pub fn new(code: &str, name: &str, risk_scores: RiskVector) -> Self {
        RiskRecord {
            code: code.to_string(),
            name: name.to_string(),
            risk_scores,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RiskTablesFile {
    countries: Vec<RiskRecord>,
    sectors: Vec<RiskRecord>,
}

/// Country and sector risk vectors keyed by risk-table code
#[derive(Debug, Clone, Default)]
pub struct RiskTables {
    countries: Vec<RiskRecord>,
    sectors: Vec<RiskRecord>,
    country_index: HashMap<String, usize>,
    sector_index: HashMap<String, usize>,
}

impl RiskTables {
    pub fn new(countries: Vec<RiskRecord>, sectors: Vec<RiskRecord>) -> Self {
        let country_index = index_by_code(&countries);
        let sector_index = index_by_code(&sectors);
        RiskTables {
            countries,
            sectors,
            country_index,
            sector_index,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: RiskTablesFile =
            serde_json::from_str(json).context("failed to parse risk tables JSON")?;
        let tables = RiskTables::new(file.countries, file.sectors);
        tables.validate()?;
        Ok(tables)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read risk tables: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("invalid risk tables: {}", path.display()))
    }

    /// Reject non-finite or negative scores
    pub fn validate(&self) -> Result<()> {
        for record in self.countries.iter().chain(self.sectors.iter()) {
            if !record.risk_scores.is_well_formed() {
                bail!(
                    "risk scores for '{}' must be finite and non-negative",
                    record.code
                );
            }
        }
        Ok(())
    }

    pub fn country(&self, code: &str) -> Option<&RiskRecord> {
        self.country_index.get(code).map(|i| &self.countries[*i])
    }

    pub fn sector(&self, code: &str) -> Option<&RiskRecord> {
        self.sector_index.get(code).map(|i| &self.sectors[*i])
    }

    pub fn countries(&self) -> &[RiskRecord] {
        &self.countries
    }

    pub fn sectors(&self) -> &[RiskRecord] {
        &self.sectors
    }

    /// `(code, name)` pairs for building a name lookup
    pub fn country_names(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.countries
            .iter()
            .map(|r| (r.code.as_str(), r.name.as_str()))
    }
}

fn index_by_code(records: &[RiskRecord]) -> HashMap<String, usize> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.code.clone(), i))
        .collect()
}

/// Country and sector lists of one I-O model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    pub countries: Vec<Country>,
    pub sectors: Vec<Sector>,
}

impl Vocabulary {
    pub fn new(countries: Vec<Country>, sectors: Vec<Sector>) -> Self {
        Vocabulary { countries, sectors }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse vocabulary: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskType;

    #[test]
    fn test_parse_risk_tables() {
        let json = r#"{
            "countries": [
                {"code": "USA", "name": "United States", "region": "Americas",
                 "risk_scores": {"climate": 2.8, "political": 2.3}}
            ],
            "sectors": [
                {"code": "D10T12", "name": "Food", "risk_scores": {"climate": 3.0}}
            ]
        }"#;
        let tables = RiskTables::from_json_str(json).unwrap();
        let usa = tables.country("USA").unwrap();
        assert_eq!(usa.risk_scores[RiskType::Climate], 2.8);
        assert_eq!(usa.risk_scores[RiskType::ModernSlavery], 0.0);
        assert!(tables.sector("D10T12").is_some());
        assert!(tables.country("CHN").is_none());
    }

    #[test]
    fn test_negative_score_rejected() {
        let json = r#"{
            "countries": [{"code": "USA", "name": "US", "risk_scores": {"climate": -1.0}}],
            "sectors": []
        }"#;
        let err = RiskTables::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("USA"));
    }

    #[test]
    fn test_vocabulary_flags_default_false() {
        let json = r#"{
            "countries": [{"code": "USA", "name": "United States"},
                          {"code": "WA", "name": "RoW Asia", "is_aggregate": true}],
            "sectors": [{"code": "C10T12", "name": "Food"}]
        }"#;
        let vocab: Vocabulary = serde_json::from_str(json).unwrap();
        assert!(!vocab.countries[0].is_aggregate);
        assert!(vocab.countries[1].is_aggregate);
        assert!(!vocab.countries[1].is_extended);
    }

    #[test]
    fn test_shipped_risk_tables_load() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../data/risk_tables.json");
        let tables = RiskTables::load(&path).unwrap();
        assert!(tables.country("USA").is_some());
        assert!(tables.sector("D10T12").is_some());
    }
}

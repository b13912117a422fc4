//! Code normalization between risk-table and model vocabularies
//!
//! Sector codes go through a concordance table loaded as data. Country codes
//! go through a built-in two-letter/three-letter table. Nothing here falls back
//! to a default code: an unmapped input is always an error.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Country code vocabularies used by the supported models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountryVocabulary {
    /// Two-letter codes with Rest-of-World aggregates (EXIOBASE)
    Iso2,
    /// Three-letter codes (OECD ICIO and the risk tables)
    Iso3,
}

impl fmt::Display for CountryVocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountryVocabulary::Iso2 => f.write_str("ISO2"),
            CountryVocabulary::Iso3 => f.write_str("ISO3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingDirection {
    RiskToModel,
    ModelToRisk,
}

impl fmt::Display for MappingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingDirection::RiskToModel => f.write_str("risk-to-model"),
            MappingDirection::ModelToRisk => f.write_str("model-to-risk"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("no {direction} sector mapping for '{code}'")]
    MappingNotFound {
        code: String,
        direction: MappingDirection,
    },

    #[error("cannot translate country code '{code}' to {target}: {reason}")]
    UnmappableCode {
        code: String,
        target: CountryVocabulary,
        reason: String,
    },

    #[error("country name '{0}' not found")]
    NameNotFound(String),
}

/// Two-letter to three-letter codes for every single-country EXIOBASE region
const ISO2_TO_ISO3: [(&str, &str); 44] = [
    ("AT", "AUT"),
    ("AU", "AUS"),
    ("BE", "BEL"),
    ("BG", "BGR"),
    ("BR", "BRA"),
    ("CA", "CAN"),
    ("CH", "CHE"),
    ("CN", "CHN"),
    ("CY", "CYP"),
    ("CZ", "CZE"),
    ("DE", "DEU"),
    ("DK", "DNK"),
    ("EE", "EST"),
    ("ES", "ESP"),
    ("FI", "FIN"),
    ("FR", "FRA"),
    ("GB", "GBR"),
    ("GR", "GRC"),
    ("HR", "HRV"),
    ("HU", "HUN"),
    ("ID", "IDN"),
    ("IE", "IRL"),
    ("IN", "IND"),
    ("IT", "ITA"),
    ("JP", "JPN"),
    ("KR", "KOR"),
    ("LT", "LTU"),
    ("LU", "LUX"),
    ("LV", "LVA"),
    ("MT", "MLT"),
    ("MX", "MEX"),
    ("NL", "NLD"),
    ("NO", "NOR"),
    ("PL", "POL"),
    ("PT", "PRT"),
    ("RO", "ROU"),
    ("RU", "RUS"),
    ("SE", "SWE"),
    ("SI", "SVN"),
    ("SK", "SVK"),
    ("TR", "TUR"),
    ("TW", "TWN"),
    ("US", "USA"),
    ("ZA", "ZAF"),
];

/// EXIOBASE Rest-of-World regions (Asia, Europe, Africa, Americas, Middle East)
pub const ROW_AGGREGATES: [&str; 5] = ["WA", "WE", "WF", "WL", "WM"];

/// Three-letter ICIO countries with no EXIOBASE counterpart
const ICIO_ONLY: [&str; 44] = [
    "AGO", "ARE", "ARG", "BGD", "BLR", "BRN", "CHL", "CMR", "COL", "CRI", "ETH", "GHA", "HKG",
    "ISL", "ISR", "KAZ", "KEN", "KHM", "LAO", "MAR", "MDG", "MLI", "MMR", "MOZ", "MUS", "MWI",
    "MYS", "NAM", "NGA", "NZL", "PAK", "PER", "PHL", "SAU", "SEN", "SGP", "THA", "TUN", "TZA",
    "UGA", "UKR", "VNM", "ZMB", "ZWE",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConcordanceFile {
    risk_to_model: BTreeMap<String, String>,
    #[serde(default)]
    model_to_risk: BTreeMap<String, String>,
}

/// Sector concordance between the risk-table vocabulary and one model
///
/// `risk_to_model` is one-to-one. `model_to_risk` is the reverse of it,
/// overlaid with the extended many-to-one entries for model sectors that fold
/// into a single risk sector.
#[derive(Debug, Clone, Default)]
pub struct SectorConcordance {
    risk_to_model: HashMap<String, String>,
    model_to_risk: HashMap<String, String>,
}

impl SectorConcordance {
    pub fn new(
        risk_to_model: BTreeMap<String, String>,
        extended: BTreeMap<String, String>,
    ) -> Self {
        let mut model_to_risk = HashMap::new();
        // BTreeMap order makes the reverse deterministic when two risk codes
        // share a model code: the lexicographically first risk code wins
        for (risk, model) in &risk_to_model {
            model_to_risk
                .entry(model.to_uppercase())
                .or_insert_with(|| risk.to_uppercase());
        }
        for (model, risk) in extended {
            model_to_risk.insert(model.to_uppercase(), risk.to_uppercase());
        }

        let risk_to_model = risk_to_model
            .into_iter()
            .map(|(r, m)| (r.to_uppercase(), m.to_uppercase()))
            .collect();

        SectorConcordance {
            risk_to_model,
            model_to_risk,
        }
    }

    /// Identity concordance for a model that already uses risk-table codes
    pub fn identity<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table: BTreeMap<String, String> = codes
            .into_iter()
            .map(|c| {
                let code = c.as_ref().to_uppercase();
                (code.clone(), code)
            })
            .collect();
        SectorConcordance::new(table, BTreeMap::new())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConcordanceFile =
            serde_json::from_str(json).context("failed to parse concordance JSON")?;
        Ok(SectorConcordance::new(file.risk_to_model, file.model_to_risk))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read concordance: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("invalid concordance: {}", path.display()))
    }

    /// Built-in concordance for the OECD ICIO sector vocabulary
    pub fn icio_default() -> Result<Self> {
        Self::from_json_str(include_str!("../../data/oecd_concordance.json"))
    }

    pub fn to_model_sector(&self, risk_code: &str) -> Result<String, NormalizeError> {
        let key = risk_code.trim().to_uppercase();
        self.risk_to_model
            .get(&key)
            .cloned()
            .ok_or(NormalizeError::MappingNotFound {
                code: key,
                direction: MappingDirection::RiskToModel,
            })
    }

    pub fn to_risk_sector(&self, model_code: &str) -> Result<String, NormalizeError> {
        let key = model_code.trim().to_uppercase();
        self.model_to_risk
            .get(&key)
            .cloned()
            .ok_or(NormalizeError::MappingNotFound {
                code: key,
                direction: MappingDirection::ModelToRisk,
            })
    }

    pub fn len(&self) -> usize {
        self.risk_to_model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.risk_to_model.is_empty()
    }
}

/// Built-in country code translation plus the canonical name list
#[derive(Debug, Clone)]
pub struct CountryCodes {
    iso2_to_iso3: HashMap<&'static str, &'static str>,
    iso3_to_iso2: HashMap<&'static str, &'static str>,
    name_to_code: HashMap<String, String>,
}

impl Default for CountryCodes {
    fn default() -> Self {
        CountryCodes {
            iso2_to_iso3: ISO2_TO_ISO3.iter().copied().collect(),
            iso3_to_iso2: ISO2_TO_ISO3.iter().map(|(a, b)| (*b, *a)).collect(),
            name_to_code: HashMap::new(),
        }
    }
}

impl CountryCodes {
    /// Country codes with a canonical `(code, name)` list for name lookups
    pub fn with_names<I, C, N>(names: I) -> Self
    where
        I: IntoIterator<Item = (C, N)>,
        C: Into<String>,
        N: AsRef<str>,
    {
        let mut codes = CountryCodes::default();
        codes.name_to_code = names
            .into_iter()
            .map(|(code, name)| (name.as_ref().trim().to_lowercase(), code.into()))
            .collect();
        codes
    }

    /// Translate a country code into `target`
    ///
    /// Codes already in the target's shape pass through. Rest-of-World
    /// aggregates and ICIO-only countries have no safe translation.
    pub fn normalize(
        &self,
        code: &str,
        target: CountryVocabulary,
    ) -> Result<String, NormalizeError> {
        let code = code.trim().to_uppercase();
        let unmappable = |reason: &str| NormalizeError::UnmappableCode {
            code: code.clone(),
            target,
            reason: reason.to_string(),
        };

        match (target, code.len()) {
            (CountryVocabulary::Iso3, 3) | (CountryVocabulary::Iso2, 2) => Ok(code),
            (CountryVocabulary::Iso3, 2) => {
                if ROW_AGGREGATES.contains(&code.as_str()) {
                    return Err(unmappable("Rest-of-World aggregate has no single country"));
                }
                match self.iso2_to_iso3.get(code.as_str()) {
                    Some(iso3) => Ok((*iso3).to_string()),
                    None => Err(unmappable("unknown two-letter code")),
                }
            }
            (CountryVocabulary::Iso2, 3) => {
                if let Some(iso2) = self.iso3_to_iso2.get(code.as_str()) {
                    return Ok((*iso2).to_string());
                }
                if ICIO_ONLY.contains(&code.as_str()) {
                    Err(unmappable("country not available in EXIOBASE"))
                } else {
                    Err(unmappable("unknown three-letter code"))
                }
            }
            _ => Err(unmappable("invalid country code length")),
        }
    }

    /// Canonical code for a display name (case-insensitive)
    pub fn name_to_code(&self, name: &str) -> Result<String, NormalizeError> {
        self.name_to_code
            .get(&name.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| NormalizeError::NameNotFound(name.to_string()))
    }

    /// True if `code` is usable by a model speaking `vocabulary`
    pub fn is_valid_for(&self, code: &str, vocabulary: CountryVocabulary) -> bool {
        let code = code.trim().to_uppercase();
        match (vocabulary, code.len()) {
            (CountryVocabulary::Iso3, 3) | (CountryVocabulary::Iso2, 2) => true,
            (CountryVocabulary::Iso3, 2) => self.iso2_to_iso3.contains_key(code.as_str()),
            (CountryVocabulary::Iso2, 3) => self.iso3_to_iso2.contains_key(code.as_str()),
            _ => false,
        }
    }

    /// `(iso3, iso2)` pairs present in both vocabularies, sorted by ISO3
    pub fn common_countries(&self) -> Vec<(&'static str, &'static str)> {
        let mut common: Vec<_> = ISO2_TO_ISO3.iter().map(|(a, b)| (*b, *a)).collect();
        common.sort();
        common
    }

    /// Codes that exist only in one vocabulary
    pub fn vocabulary_only(&self, vocabulary: CountryVocabulary) -> Vec<&'static str> {
        let mut codes: Vec<&'static str> = match vocabulary {
            CountryVocabulary::Iso3 => ICIO_ONLY.to_vec(),
            CountryVocabulary::Iso2 => ROW_AGGREGATES.to_vec(),
        };
        codes.sort_unstable();
        codes
    }
}

/// Sector concordance and country translation for one model
#[derive(Debug, Clone)]
pub struct CodeNormalizer {
    sectors: SectorConcordance,
    countries: CountryCodes,
    model_vocabulary: CountryVocabulary,
    risk_vocabulary: CountryVocabulary,
}

impl CodeNormalizer {
    pub fn new(
        sectors: SectorConcordance,
        countries: CountryCodes,
        model_vocabulary: CountryVocabulary,
        risk_vocabulary: CountryVocabulary,
    ) -> Self {
        CodeNormalizer {
            sectors,
            countries,
            model_vocabulary,
            risk_vocabulary,
        }
    }

    /// Risk-table country code for a model country code
    ///
    /// Identical vocabularies pass the code through untouched.
    pub fn risk_country(&self, model_code: &str) -> Result<String, NormalizeError> {
        if self.model_vocabulary == self.risk_vocabulary {
            return Ok(model_code.to_string());
        }
        self.countries.normalize(model_code, self.risk_vocabulary)
    }

    /// Model country code for a risk-table country code
    pub fn model_country(&self, risk_code: &str) -> Result<String, NormalizeError> {
        if self.model_vocabulary == self.risk_vocabulary {
            return Ok(risk_code.to_string());
        }
        self.countries.normalize(risk_code, self.model_vocabulary)
    }

    pub fn risk_sector(&self, model_code: &str) -> Result<String, NormalizeError> {
        self.sectors.to_risk_sector(model_code)
    }

    pub fn model_sector(&self, risk_code: &str) -> Result<String, NormalizeError> {
        self.sectors.to_model_sector(risk_code)
    }

    pub fn sectors(&self) -> &SectorConcordance {
        &self.sectors
    }

    pub fn countries(&self) -> &CountryCodes {
        &self.countries
    }

    pub fn model_vocabulary(&self) -> CountryVocabulary {
        self.model_vocabulary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exiobase_like() -> SectorConcordance {
        SectorConcordance::from_json_str(
            r#"{
                "risk_to_model": {"D05T06": "D05T09", "D07T08": "D05T09", "D10T12": "D10T12"},
                "model_to_risk": {"D35T39": "D35"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_sector_round_trip() {
        let c = exiobase_like();
        assert_eq!(c.to_model_sector("D10T12").unwrap(), "D10T12");
        assert_eq!(c.to_risk_sector("D10T12").unwrap(), "D10T12");
    }

    #[test]
    fn test_many_to_one_reverse_is_deterministic() {
        let c = exiobase_like();
        assert_eq!(c.to_risk_sector("D05T09").unwrap(), "D05T06");
        assert_eq!(c.to_risk_sector("D35T39").unwrap(), "D35");
    }

    #[test]
    fn test_inputs_are_upper_cased() {
        let c = exiobase_like();
        assert_eq!(c.to_model_sector("d10t12").unwrap(), "D10T12");
    }

    #[test]
    fn test_unmapped_sector_is_an_error() {
        let c = exiobase_like();
        let err = c.to_risk_sector("C99").unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MappingNotFound {
                code: "C99".to_string(),
                direction: MappingDirection::ModelToRisk,
            }
        );
    }

    #[test]
    fn test_unknown_concordance_keys_rejected() {
        let result = SectorConcordance::from_json_str(r#"{"risk_to_model": {}, "extra": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_icio_default_covers_food() {
        let c = SectorConcordance::icio_default().unwrap();
        assert_eq!(c.to_model_sector("D10T12").unwrap(), "C10T12");
        assert_eq!(c.to_risk_sector("A02").unwrap(), "D01T03");
    }

    #[test]
    fn test_identity_concordance() {
        let c = SectorConcordance::identity(["FOOD", "AGRI"]);
        assert_eq!(c.to_risk_sector("FOOD").unwrap(), "FOOD");
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_iso2_to_iso3() {
        let codes = CountryCodes::default();
        assert_eq!(
            codes.normalize("de", CountryVocabulary::Iso3).unwrap(),
            "DEU"
        );
        assert_eq!(
            codes.normalize("USA", CountryVocabulary::Iso2).unwrap(),
            "US"
        );
        assert_eq!(
            codes.normalize("USA", CountryVocabulary::Iso3).unwrap(),
            "USA"
        );
    }

    #[test]
    fn test_row_aggregate_is_unmappable() {
        let codes = CountryCodes::default();
        let err = codes.normalize("WA", CountryVocabulary::Iso3).unwrap_err();
        assert!(matches!(err, NormalizeError::UnmappableCode { .. }));
    }

    #[test]
    fn test_icio_only_code_is_unmappable() {
        let codes = CountryCodes::default();
        match codes.normalize("VNM", CountryVocabulary::Iso2) {
            Err(NormalizeError::UnmappableCode { reason, .. }) => {
                assert!(reason.contains("EXIOBASE"));
            }
            other => panic!("expected UnmappableCode, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_length_is_unmappable() {
        let codes = CountryCodes::default();
        assert!(codes.normalize("USAA", CountryVocabulary::Iso3).is_err());
    }

    #[test]
    fn test_name_lookup() {
        let codes = CountryCodes::with_names([("USA", "United States"), ("CHN", "China")]);
        assert_eq!(codes.name_to_code("united states").unwrap(), "USA");
        assert_eq!(
            codes.name_to_code("Atlantis").unwrap_err(),
            NormalizeError::NameNotFound("Atlantis".to_string())
        );
    }

    #[test]
    fn test_validity_and_listings() {
        let codes = CountryCodes::default();
        assert!(codes.is_valid_for("DE", CountryVocabulary::Iso3));
        assert!(!codes.is_valid_for("WA", CountryVocabulary::Iso3));
        assert!(!codes.is_valid_for("VNM", CountryVocabulary::Iso2));
        assert_eq!(codes.common_countries().len(), 44);
        assert_eq!(codes.common_countries()[0], ("AUS", "AU"));
        assert_eq!(
            codes.vocabulary_only(CountryVocabulary::Iso2),
            vec!["WA", "WE", "WF", "WL", "WM"]
        );
    }

    #[test]
    fn test_normalizer_passes_through_shared_vocabulary() {
        let n = CodeNormalizer::new(
            SectorConcordance::identity(["FOOD"]),
            CountryCodes::default(),
            CountryVocabulary::Iso3,
            CountryVocabulary::Iso3,
        );
        assert_eq!(n.risk_country("A").unwrap(), "A");
        assert_eq!(n.risk_sector("FOOD").unwrap(), "FOOD");
    }

    #[test]
    fn test_normalizer_translates_iso2_models() {
        let n = CodeNormalizer::new(
            exiobase_like(),
            CountryCodes::default(),
            CountryVocabulary::Iso2,
            CountryVocabulary::Iso3,
        );
        assert_eq!(n.risk_country("CN").unwrap(), "CHN");
        assert_eq!(n.model_country("CHN").unwrap(), "CN");
        assert!(n.risk_country("WF").is_err());
    }
}

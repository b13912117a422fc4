//! Optional climate expected-loss enrichment
//!
//! Enrichment is soft: every failure mode collapses into
//! `EnrichmentUnavailable` and the assessment carries on without it.

use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Default request timeout for the HTTP client
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Loss figures for one hazard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardLoss {
    #[serde(default)]
    pub annual_loss: f64,
    #[serde(default)]
    pub annual_loss_pct: f64,
    #[serde(default = "unknown_confidence")]
    pub confidence: String,
    #[serde(default)]
    pub details: String,
}

fn unknown_confidence() -> String {
    "Unknown".to_string()
}

/// Expected climate losses for a country
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpectedLoss {
    pub total_annual_loss: f64,
    pub total_annual_loss_pct: f64,
    pub present_value_30yr: f64,
    pub present_value_30yr_pct: f64,
    pub breakdown: BTreeMap<String, HazardLoss>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnrichmentUnavailable {
    #[error("country not supported by climate source")]
    Unsupported,
    #[error("climate lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("climate source error: {0}")]
    ServerError(String),
}

/// Anything that can answer "expected climate loss for this country"
pub trait ClimateSource: Send + Sync {
    /// `country` is a display name or a country code
    fn country_risk(&self, country: &str) -> Result<ExpectedLoss, EnrichmentUnavailable>;
}

/// Bounds another source with a deadline
///
/// The lookup runs on its own thread. On expiry the thread is abandoned and
/// its eventual result dropped. At most `max_in_flight` lookups run at once,
/// abandoned ones included; past that, lookups fail without spawning.
pub struct TimeoutClimate {
    inner: Arc<dyn ClimateSource>,
    timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

/// Default bound on concurrent lookups behind `TimeoutClimate`
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

impl TimeoutClimate {
    pub fn new(inner: Arc<dyn ClimateSource>, timeout: Duration) -> Self {
        TimeoutClimate {
            inner,
            timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Lookups started and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl ClimateSource for TimeoutClimate {
    fn country_risk(&self, country: &str) -> Result<ExpectedLoss, EnrichmentUnavailable> {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= self.max_in_flight {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(country, "climate lookups saturated");
            return Err(EnrichmentUnavailable::ServerError(
                "too many pending climate lookups".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let in_flight = Arc::clone(&self.in_flight);
        let country = country.to_string();
        std::thread::spawn(move || {
            let result = inner.country_risk(&country);
            in_flight.fetch_sub(1, Ordering::AcqRel);
            // Receiver may be gone after a timeout
            let _ = tx.send(result);
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(EnrichmentUnavailable::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EnrichmentUnavailable::ServerError(
                "climate lookup aborted".to_string(),
            )),
        }
    }
}

/// Raw response body of the country assessment endpoint
#[derive(Debug, Deserialize)]
struct CountryAssessment {
    #[serde(default)]
    expected_annual_loss: f64,
    #[serde(default)]
    expected_annual_loss_pct: f64,
    #[serde(default)]
    present_value_30yr: f64,
    #[serde(default)]
    present_value_30yr_pct: f64,
    risk_breakdown: BTreeMap<String, HazardLoss>,
}

impl From<CountryAssessment> for ExpectedLoss {
    fn from(a: CountryAssessment) -> Self {
        ExpectedLoss {
            total_annual_loss: a.expected_annual_loss,
            total_annual_loss_pct: a.expected_annual_loss_pct,
            present_value_30yr: a.present_value_30yr,
            present_value_30yr_pct: a.present_value_30yr_pct,
            breakdown: a.risk_breakdown,
        }
    }
}

/// Map an HTTP status and body onto the enrichment result
fn interpret_response(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<ExpectedLoss, EnrichmentUnavailable> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) if !status.is_success() => {
            return Err(EnrichmentUnavailable::ServerError(format!(
                "API returned status {}",
                status.as_u16()
            )))
        }
        Err(e) => {
            return Err(EnrichmentUnavailable::ServerError(format!(
                "invalid response body: {}",
                e
            )))
        }
    };

    if let Some(error) = value.get("error").and_then(serde_json::Value::as_str) {
        if error == "unsupported" {
            return Err(EnrichmentUnavailable::Unsupported);
        }
        return Err(EnrichmentUnavailable::ServerError(error.to_string()));
    }
    if !status.is_success() {
        return Err(EnrichmentUnavailable::ServerError(format!(
            "API returned status {}",
            status.as_u16()
        )));
    }

    serde_json::from_value::<CountryAssessment>(value)
        .map(ExpectedLoss::from)
        .map_err(|e| EnrichmentUnavailable::ServerError(format!("unexpected payload: {}", e)))
}

/// Client for a climate-risk country assessment service
///
/// POSTs `{"country": <name>}` to `{base_url}/assess/country`. Successful
/// answers are memoised per country for the client's lifetime.
pub struct HttpClimateClient {
    client: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
    memo: DashMap<String, ExpectedLoss>,
}

impl HttpClimateClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpClimateClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            memo: DashMap::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch(&self, country: &str) -> Result<ExpectedLoss, EnrichmentUnavailable> {
        let url = format!("{}/assess/country", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "country": country }))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    EnrichmentUnavailable::Timeout(self.timeout)
                } else {
                    EnrichmentUnavailable::ServerError(e.to_string())
                }
            })?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| EnrichmentUnavailable::ServerError(e.to_string()))?;
        interpret_response(status, &body)
    }
}

impl ClimateSource for HttpClimateClient {
    fn country_risk(&self, country: &str) -> Result<ExpectedLoss, EnrichmentUnavailable> {
        if let Some(hit) = self.memo.get(country) {
            return Ok(hit.clone());
        }
        let loss = self.fetch(country)?;
        self.memo.insert(country.to_string(), loss.clone());
        Ok(loss)
    }
}

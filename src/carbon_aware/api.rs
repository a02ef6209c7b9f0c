//! Carbon intensity API integration

use crate::carbon_aware::types::{
    CarbonProvider, LatestIntensity, Location, PowerBreakdown, Sample,
};
use crate::carbon_aware::History;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("carbon-decider/", env!("CARGO_PKG_VERSION"));

/// Raw `/carbon-intensity/history` response
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    zone: Option<String>,
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    datetime: DateTime<Utc>,
    /// Null when the upstream series has a gap
    carbon_intensity: Option<f64>,
}

/// Raw `/carbon-intensity/latest` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestResponse {
    zone: Option<String>,
    carbon_intensity: f64,
    datetime: DateTime<Utc>,
}

/// Raw `/power-breakdown/latest` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PowerBreakdownResponse {
    zone: Option<String>,
    datetime: DateTime<Utc>,
    #[serde(default)]
    power_consumption_breakdown: BTreeMap<String, Option<f64>>,
    fossil_free_percentage: Option<f64>,
    renewable_percentage: Option<f64>,
    power_consumption_total: Option<f64>,
}

/// Carbon intensity API client
#[derive(Clone)]
pub struct CarbonIntensityAPI {
    client: Client,
    provider: CarbonProvider,
}

impl CarbonIntensityAPI {
    /// Create a client whose requests give up after `timeout`
    pub fn new(provider: CarbonProvider, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::HttpError)?;
        Ok(Self { client, provider })
    }

    /// Underlying HTTP client, shared with the geolocation lookup
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Fetch the trailing 24h of carbon intensity for a location
    pub async fn fetch_history(&self, location: &Location) -> Result<History> {
        match &self.provider {
            CarbonProvider::ElectricityMap { url, token } => {
                self.fetch_electricitymap_history(url, token, location)
                    .await
            }
            CarbonProvider::Mock => Ok(mock_history(Utc::now())),
        }
    }

    /// Fetch the most recent carbon intensity reading for a location
    pub async fn fetch_latest(&self, location: &Location) -> Result<LatestIntensity> {
        match &self.provider {
            CarbonProvider::ElectricityMap { url, token } => {
                let response: LatestResponse = self
                    .get_json(url, token, "carbon-intensity/latest", location)
                    .await?;
                Ok(LatestIntensity {
                    zone: response.zone,
                    carbon_intensity: response.carbon_intensity,
                    timestamp: response.datetime,
                })
            }
            CarbonProvider::Mock => {
                let history = mock_history(Utc::now());
                let current = history
                    .current()
                    .ok_or_else(|| Error::ParseError("Mock history is empty".to_string()))?;
                Ok(LatestIntensity {
                    zone: history.zone.clone(),
                    carbon_intensity: current.carbon_intensity,
                    timestamp: current.timestamp,
                })
            }
        }
    }

    /// Fetch the latest consumption mix per production source for a location
    pub async fn fetch_power_breakdown(&self, location: &Location) -> Result<PowerBreakdown> {
        match &self.provider {
            CarbonProvider::ElectricityMap { url, token } => {
                let response: PowerBreakdownResponse = self
                    .get_json(url, token, "power-breakdown/latest", location)
                    .await?;
                Ok(breakdown_from_response(response))
            }
            CarbonProvider::Mock => Ok(mock_power_breakdown(Utc::now())),
        }
    }

    async fn fetch_electricitymap_history(
        &self,
        base_url: &str,
        token: &str,
        location: &Location,
    ) -> Result<History> {
        let response: HistoryResponse = self
            .get_json(base_url, token, "carbon-intensity/history", location)
            .await?;
        let history = history_from_response(response)?;

        info!(
            "Fetched {} carbon intensity samples for {} from Electricity Maps",
            history.len(),
            location
        );
        if let Some((first, last)) = history.span() {
            debug!("History covers {} .. {}", first, last);
        }

        Ok(history)
    }

    /// GET an Electricity Maps endpoint and decode a successful JSON response
    async fn get_json<T: DeserializeOwned>(
        &self,
        base_url: &str,
        token: &str,
        endpoint: &str,
        location: &Location,
    ) -> Result<T> {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), endpoint);
        debug!("Requesting {} for {}", url, location);

        let mut request = self.client.get(&url).query(&location.query_params());

        if !token.is_empty() {
            request = request.header("auth-token", token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(Error::NetworkError(format!(
                "Electricity Maps API error: {}",
                response.status()
            )));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                Error::ParseError(format!("malformed {endpoint} response: {e}"))
            } else {
                Error::HttpError(e)
            }
        })
    }
}

/// Keep the entries that carry a carbon intensity value
fn history_from_response(response: HistoryResponse) -> Result<History> {
    let total = response.history.len();
    let samples: Vec<Sample> = response
        .history
        .into_iter()
        .filter_map(|entry| match entry.carbon_intensity {
            Some(ci) => Some(Sample::new(entry.datetime, ci)),
            None => {
                warn!("Skipping history entry at {} without carbon intensity", entry.datetime);
                None
            }
        })
        .collect();

    if samples.is_empty() {
        return Err(Error::ParseError(format!(
            "history contains no usable samples ({total} entries)"
        )));
    }

    Ok(History::new(samples).with_zone(response.zone))
}

fn breakdown_from_response(response: PowerBreakdownResponse) -> PowerBreakdown {
    let consumption = response
        .power_consumption_breakdown
        .into_iter()
        .filter_map(|(source, mw)| mw.map(|mw| (source, mw)))
        .collect();

    PowerBreakdown {
        zone: response.zone,
        timestamp: response.datetime,
        consumption,
        fossil_free_percentage: response.fossil_free_percentage,
        renewable_percentage: response.renewable_percentage,
        total_consumption: response.power_consumption_total,
    }
}

/// Synthetic diurnal curve: 24 hourly samples ending at the hour containing `now`
fn mock_history(now: DateTime<Utc>) -> History {
    let end = now
        .duration_trunc(ChronoDuration::hours(1))
        .unwrap_or(now);

    let samples = (0..24)
        .map(|i| {
            let hour = i as f64;
            // Solar dip around midday of the window, evening peak after it
            let phase = (hour - 6.0) / 24.0 * std::f64::consts::TAU;
            let intensity = 250.0 + 80.0 * phase.sin() + 5.0 * (hour * 1.7).cos();
            Sample::new(end - ChronoDuration::hours(23 - i), intensity.max(0.0))
        })
        .collect();

    History::new(samples).with_zone(Some("MOCK".to_string()))
}

/// Fixed consumption mix for offline runs
fn mock_power_breakdown(now: DateTime<Utc>) -> PowerBreakdown {
    let consumption: BTreeMap<String, f64> = [
        ("gas", 4200.0),
        ("wind", 2600.0),
        ("solar", 1400.0),
        ("coal", 800.0),
        ("nuclear", 480.0),
        ("biomass", 320.0),
    ]
    .into_iter()
    .map(|(source, mw)| (source.to_string(), mw))
    .collect();
    let total: f64 = consumption.values().sum();

    PowerBreakdown {
        zone: Some("MOCK".to_string()),
        timestamp: now.duration_trunc(ChronoDuration::hours(1)).unwrap_or(now),
        consumption,
        fossil_free_percentage: Some((2600.0 + 1400.0 + 480.0 + 320.0) / total * 100.0),
        renewable_percentage: Some((2600.0 + 1400.0 + 320.0) / total * 100.0),
        total_consumption: Some(total),
    }
}

//! Types for carbon-aware run decisions

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Seconds per elapsed-hour bucket
const SECONDS_PER_HOUR: i64 = 3600;

/// A single carbon intensity observation
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Observation timestamp
    pub timestamp: DateTime<Utc>,
    /// Carbon intensity in gCO2eq/kWh
    pub carbon_intensity: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, carbon_intensity: f64) -> Self {
        Self {
            timestamp,
            carbon_intensity,
        }
    }
}

/// Trailing carbon intensity history for one location.
///
/// Samples are kept sorted by timestamp. When the upstream series repeats a
/// timestamp, the entry that came last wins.
#[derive(Clone, Debug, Default)]
pub struct History {
    samples: Vec<Sample>,
    /// Zone reported by the API, if any
    pub zone: Option<String>,
}

impl History {
    /// Build a history from samples in arbitrary order
    pub fn new(mut samples: Vec<Sample>) -> Self {
        // Stable sort keeps API order among equal timestamps, so the last one
        // seen is the last one in its run.
        samples.sort_by_key(|s| s.timestamp);

        let mut deduped: Vec<Sample> = Vec::with_capacity(samples.len());
        for sample in samples {
            match deduped.last_mut() {
                Some(prev) if prev.timestamp == sample.timestamp => *prev = sample,
                _ => deduped.push(sample),
            }
        }

        Self {
            samples: deduped,
            zone: None,
        }
    }

    /// Attach the zone identifier reported upstream
    pub fn with_zone(mut self, zone: Option<String>) -> Self {
        self.zone = zone;
        self
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Carbon intensity values in timestamp order
    pub fn intensities(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.carbon_intensity).collect()
    }

    /// Whole hours elapsed since the earliest sample, one entry per sample
    pub fn elapsed_hours(&self) -> Vec<u32> {
        let Some(start) = self.samples.first().map(|s| s.timestamp) else {
            return Vec::new();
        };

        self.samples
            .iter()
            .map(|s| {
                let secs = s.timestamp.signed_duration_since(start).num_seconds();
                (secs.max(0) / SECONDS_PER_HOUR) as u32
            })
            .collect()
    }

    /// Number of distinct elapsed-hour buckets
    pub fn distinct_hours(&self) -> usize {
        let mut hours = self.elapsed_hours();
        hours.dedup();
        hours.len()
    }

    /// The most recent sample
    pub fn current(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Timestamp of the first and last sample
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.samples.first()?.timestamp, self.samples.last()?.timestamp))
    }
}

/// Geographic coordinate pair in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

/// Where to look up carbon intensity
#[derive(Clone, Debug, PartialEq)]
pub enum Location {
    /// Named grid zone (e.g. "NL", "DE")
    Zone(String),
    /// Latitude/longitude pair, resolved to a zone by the API
    Coordinates(Coordinates),
}

impl Location {
    /// Query parameters identifying this location
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        match self {
            Location::Zone(zone) => vec![("zone", zone.clone())],
            Location::Coordinates(c) => vec![
                ("lat", c.latitude.to_string()),
                ("lon", c.longitude.to_string()),
            ],
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Zone(zone) => write!(f, "zone {zone}"),
            Location::Coordinates(c) => write!(f, "lat {:.4}, lon {:.4}", c.latitude, c.longitude),
        }
    }
}

/// Latest carbon intensity reading for a location
#[derive(Clone, Debug, PartialEq)]
pub struct LatestIntensity {
    pub zone: Option<String>,
    pub carbon_intensity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Latest electricity consumption mix for a location
#[derive(Clone, Debug, PartialEq)]
pub struct PowerBreakdown {
    pub zone: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Consumption per production source in MW; sources without data are left out
    pub consumption: BTreeMap<String, f64>,
    pub fossil_free_percentage: Option<f64>,
    pub renewable_percentage: Option<f64>,
    /// Total consumption in MW
    pub total_consumption: Option<f64>,
}

impl PowerBreakdown {
    /// Sources ordered by consumption, largest first
    pub fn ranked_sources(&self) -> Vec<(&str, f64)> {
        let mut sources: Vec<(&str, f64)> = self
            .consumption
            .iter()
            .map(|(source, mw)| (source.as_str(), *mw))
            .collect();
        sources.sort_by(|a, b| b.1.total_cmp(&a.1));
        sources
    }
}

/// Carbon intensity data providers
#[derive(Clone, Debug)]
pub enum CarbonProvider {
    /// Electricity Maps API
    ElectricityMap {
        /// API base URL
        url: String,
        /// API token, sent as the `auth-token` header
        token: String,
    },
    /// Deterministic synthetic data for offline runs
    Mock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_history_sorts_by_timestamp() {
        let history = History::new(vec![
            Sample::new(at(120), 3.0),
            Sample::new(at(0), 1.0),
            Sample::new(at(60), 2.0),
        ]);
        assert_eq!(history.intensities(), vec![1.0, 2.0, 3.0]);
        assert_eq!(history.current().unwrap().carbon_intensity, 3.0);
    }

    #[test]
    fn test_history_keeps_last_duplicate() {
        let history = History::new(vec![
            Sample::new(at(0), 1.0),
            Sample::new(at(60), 2.0),
            Sample::new(at(60), 5.0),
        ]);
        assert_eq!(history.len(), 2);
        assert_eq!(history.intensities(), vec![1.0, 5.0]);
    }

    #[test]
    fn test_elapsed_hours_floor_and_share_buckets() {
        let history = History::new(vec![
            Sample::new(at(0), 1.0),
            Sample::new(at(59), 1.0),
            Sample::new(at(61), 1.0),
            // more than a day later still counts whole hours
            Sample::new(at(25 * 60 + 30), 1.0),
        ]);
        assert_eq!(history.elapsed_hours(), vec![0, 0, 1, 25]);
        assert_eq!(history.distinct_hours(), 3);
    }

    #[test]
    fn test_empty_history() {
        let history = History::new(vec![]);
        assert!(history.is_empty());
        assert!(history.elapsed_hours().is_empty());
        assert!(history.current().is_none());
        assert!(history.span().is_none());
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(52.37, 4.89).is_some());
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, -181.0).is_none());
        assert!(Coordinates::new(f64::NAN, 0.0).is_none());
    }

    #[test]
    fn test_ranked_sources() {
        let breakdown = PowerBreakdown {
            zone: Some("NL".to_string()),
            timestamp: at(0),
            consumption: BTreeMap::from([
                ("coal".to_string(), 800.0),
                ("gas".to_string(), 4200.0),
                ("wind".to_string(), 2600.0),
            ]),
            fossil_free_percentage: None,
            renewable_percentage: None,
            total_consumption: None,
        };
        assert_eq!(
            breakdown.ranked_sources(),
            vec![("gas", 4200.0), ("wind", 2600.0), ("coal", 800.0)]
        );
    }

    #[test]
    fn test_location_query_params() {
        let zone = Location::Zone("NL".to_string());
        assert_eq!(zone.query_params(), vec![("zone", "NL".to_string())]);

        let coords = Location::Coordinates(Coordinates::new(52.5, 4.25).unwrap());
        assert_eq!(
            coords.query_params(),
            vec![("lat", "52.5".to_string()), ("lon", "4.25".to_string())]
        );
    }
}

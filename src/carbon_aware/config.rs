//! Configuration for the decider
//!
//! Every field has a default, so an empty TOML document is a valid config.

use crate::carbon_aware::stats::MEDIAN_SWITCH_RATIO;
use crate::carbon_aware::types::CarbonProvider;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default Electricity Maps endpoint (free tier)
pub const DEFAULT_API_URL: &str = "https://api-access.electricitymaps.com/free-tier";

/// Default IP geolocation endpoint, answers with "lat,lon"
pub const DEFAULT_GEOLOCATION_URL: &str = "https://ipinfo.io/loc";

/// Top-level configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeciderConfig {
    /// Zone used when none is given on the command line
    pub default_zone: Option<String>,
    pub api: ApiConfig,
    pub decision: DecisionConfig,
    pub smoothing: SmoothingConfig,
    pub plot: PlotConfig,
}

impl DeciderConfig {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: DeciderConfig = toml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "api.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !self.decision.near_minimum_std_fraction.is_finite()
            || self.decision.near_minimum_std_fraction < 0.0
        {
            return Err(Error::ConfigError(
                "decision.near_minimum_std_fraction must be a non-negative number".to_string(),
            ));
        }
        if !self.decision.median_switch_ratio.is_finite() || self.decision.median_switch_ratio < 0.0
        {
            return Err(Error::ConfigError(
                "decision.median_switch_ratio must be a non-negative number".to_string(),
            ));
        }
        if !self.decision.below_mean_offset.is_finite() || !self.decision.delta_cutoff.is_finite()
        {
            return Err(Error::ConfigError(
                "decision cutoffs must be finite numbers".to_string(),
            ));
        }
        if let Some(s) = self.smoothing.smoothing_factor {
            if !s.is_finite() || s < 0.0 {
                return Err(Error::ConfigError(format!(
                    "smoothing.smoothing_factor must be >= 0, got {s}"
                )));
            }
        }
        if self.smoothing.fine_points < 2 {
            return Err(Error::ConfigError(
                "smoothing.fine_points must be at least 2".to_string(),
            ));
        }
        if self.plot.width < 200 || self.plot.height < 150 {
            return Err(Error::ConfigError(
                "plot must be at least 200x150 pixels".to_string(),
            ));
        }
        Ok(())
    }
}

/// Carbon intensity API settings
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL
    pub base_url: String,
    /// API token
    pub token: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// IP geolocation endpoint
    pub geolocation_url: String,
    /// Use synthetic data instead of calling the API
    pub mock: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: String::new(),
            timeout_secs: 15,
            geolocation_url: DEFAULT_GEOLOCATION_URL.to_string(),
            mock: false,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn provider(&self) -> CarbonProvider {
        if self.mock {
            CarbonProvider::Mock
        } else {
            CarbonProvider::ElectricityMap {
                url: self.base_url.clone(),
                token: self.token.clone(),
            }
        }
    }
}

/// Threshold rule settings
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Run when current CI is below `mean - below_mean_offset`
    pub below_mean_offset: f64,
    /// Always run when current CI is below `min + std * near_minimum_std_fraction`
    pub near_minimum_std_fraction: f64,
    /// Slope in gCO2eq/kWh/hour below which CI counts as falling fast
    pub delta_cutoff: f64,
    /// Wait while CI is falling fast, unless already near the minimum
    pub use_derivative: bool,
    /// Use the median as the mean when they are more than this many std apart
    pub median_switch_ratio: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            below_mean_offset: 0.0,
            near_minimum_std_fraction: 1.0 / 3.0,
            delta_cutoff: -5.0,
            use_derivative: false,
            median_switch_ratio: MEDIAN_SWITCH_RATIO,
        }
    }
}

/// Trend spline settings
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Target residual sum of squares; `None` means the number of fitted points
    pub smoothing_factor: Option<f64>,
    /// Number of evenly spaced points the curve is evaluated at
    pub fine_points: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: None,
            fine_points: 100,
        }
    }
}

/// Chart dimensions in pixels
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 900,
            height: 540,
        }
    }
}

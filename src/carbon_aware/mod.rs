//! Carbon-aware run decisions
//!
//! Fetches the trailing 24h of grid carbon intensity for a location and
//! decides whether now is a good moment to run a deferrable job.

pub mod api;
pub mod config;
pub mod decision;
pub mod geolocation;
pub mod plot;
pub mod smoothing;
pub mod stats;
pub mod types;

pub use api::CarbonIntensityAPI;
pub use config::{ApiConfig, DeciderConfig, DecisionConfig, PlotConfig, SmoothingConfig};
pub use decision::{decide, Decision, DecisionEngine, DecisionRule, Evaluation, Thresholds};
pub use geolocation::locate_by_ip;
pub use smoothing::{smooth, Trend};
pub use stats::{compute_stats, Stats};
pub use types::{Coordinates, History, LatestIntensity, Location, PowerBreakdown, Sample};

//! Run-now / wait decision
//!
//! The verdict comes from an ordered rule table. Every rule that fires
//! produces a verdict and a later rule overrides an earlier one:
//!
//! | order | rule          | fires when                                   | verdict |
//! |-------|---------------|----------------------------------------------|---------|
//! | 1     | `BelowMean`   | always                                       | `current < mean - offset` |
//! | 2     | `FallingFast` | derivative enabled and `slope < delta_cutoff` | wait    |
//! | 3     | `NearMinimum` | `current < min + std * fraction`             | run     |
//!
//! So being near the 24h minimum always means run, and the falling-fast veto
//! can only suppress a below-mean trigger.

use crate::carbon_aware::config::{DecisionConfig, SmoothingConfig};
use crate::carbon_aware::smoothing::{smooth, Trend, MIN_DISTINCT_HOURS};
use crate::carbon_aware::stats::{compute_stats_with_ratio, Stats};
use crate::carbon_aware::History;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// A rule in the decision table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DecisionRule {
    /// Current CI is below the (offset) 24h mean
    BelowMean,
    /// CI is dropping quickly; waiting is likely to pay off
    FallingFast,
    /// Current CI is close to the 24h minimum
    NearMinimum,
}

impl DecisionRule {
    /// Evaluation order, lowest precedence first
    pub const PRECEDENCE: [DecisionRule; 3] = [
        DecisionRule::BelowMean,
        DecisionRule::FallingFast,
        DecisionRule::NearMinimum,
    ];

    /// Verdict of this rule, or `None` if it does not fire
    fn verdict(self, inputs: &RuleInputs, use_derivative: bool) -> Option<bool> {
        let t = &inputs.thresholds;
        match self {
            DecisionRule::BelowMean => Some(inputs.current_ci < t.below_mean),
            DecisionRule::FallingFast => {
                (use_derivative && inputs.trend_slope < t.falling_fast).then_some(false)
            }
            DecisionRule::NearMinimum => (inputs.current_ci < t.near_minimum).then_some(true),
        }
    }
}

impl fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionRule::BelowMean => "below-mean",
            DecisionRule::FallingFast => "falling-fast",
            DecisionRule::NearMinimum => "near-minimum",
        };
        f.write_str(s)
    }
}

/// Cutoffs derived from the window statistics
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Thresholds {
    /// Run if current CI is below this
    pub below_mean: f64,
    /// Always run if current CI is below this
    pub near_minimum: f64,
    /// Slope below which CI counts as falling fast
    pub falling_fast: f64,
}

impl Thresholds {
    pub fn new(stats: &Stats, config: &DecisionConfig) -> Self {
        Self {
            below_mean: stats.mean - config.below_mean_offset,
            near_minimum: stats.min + stats.std * config.near_minimum_std_fraction,
            falling_fast: config.delta_cutoff,
        }
    }
}

struct RuleInputs {
    thresholds: Thresholds,
    current_ci: f64,
    trend_slope: f64,
}

/// Outcome of the decision rules with the figures behind it
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Decision {
    pub run_now: bool,
    /// Last rule in precedence order that fired
    pub decided_by: DecisionRule,
    pub current_ci: f64,
    pub mean_ci: f64,
    pub trend_slope: f64,
    pub min_ci: f64,
    pub max_ci: f64,
    pub std_ci: f64,
}

/// Apply the rule table to the window statistics, current CI and trend slope
pub fn decide(
    stats: &Stats,
    current_ci: f64,
    trend_slope: f64,
    config: &DecisionConfig,
) -> Decision {
    let inputs = RuleInputs {
        thresholds: Thresholds::new(stats, config),
        current_ci,
        trend_slope,
    };

    // BelowMean always fires, so this starting value is always replaced.
    let mut outcome = (false, DecisionRule::BelowMean);
    for rule in DecisionRule::PRECEDENCE {
        if let Some(verdict) = rule.verdict(&inputs, config.use_derivative) {
            debug!("Rule {} fired: run_now={}", rule, verdict);
            outcome = (verdict, rule);
        }
    }

    Decision {
        run_now: outcome.0,
        decided_by: outcome.1,
        current_ci,
        mean_ci: stats.mean,
        trend_slope,
        min_ci: stats.min,
        max_ci: stats.max,
        std_ci: stats.std,
    }
}

/// Everything computed for one history window
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// Elapsed hour of each sample
    pub hours: Vec<u32>,
    /// Carbon intensity of each sample
    pub intensities: Vec<f64>,
    pub stats: Stats,
    pub trend: Trend,
    pub thresholds: Thresholds,
    pub decision: Decision,
}

/// Turns a history window into a decision
#[derive(Clone, Debug, Default)]
pub struct DecisionEngine {
    decision: DecisionConfig,
    smoothing: SmoothingConfig,
}

impl DecisionEngine {
    pub fn new(decision: DecisionConfig, smoothing: SmoothingConfig) -> Self {
        Self {
            decision,
            smoothing,
        }
    }

    /// Compute statistics, trend and decision for `history`
    pub fn evaluate(&self, history: &History) -> Result<Evaluation> {
        let distinct_hours = history.distinct_hours();
        if distinct_hours < MIN_DISTINCT_HOURS {
            return Err(Error::InsufficientData {
                distinct_hours,
                required: MIN_DISTINCT_HOURS,
            });
        }

        let hours = history.elapsed_hours();
        let intensities = history.intensities();
        let current_ci = history
            .current()
            .map(|s| s.carbon_intensity)
            .ok_or(Error::InsufficientData {
                distinct_hours: 0,
                required: MIN_DISTINCT_HOURS,
            })?;

        let stats = compute_stats_with_ratio(&intensities, self.decision.median_switch_ratio)?;
        let trend = smooth(&hours, &intensities, &self.smoothing)?;
        let thresholds = Thresholds::new(&stats, &self.decision);
        let decision = decide(&stats, current_ci, trend.slope, &self.decision);

        info!(
            "Decision: {} (rule {}, current={:.1}, mean={:.1}, slope={:.2})",
            if decision.run_now { "run now" } else { "wait" },
            decision.decided_by,
            decision.current_ci,
            decision.mean_ci,
            decision.trend_slope
        );

        Ok(Evaluation {
            hours,
            intensities,
            stats,
            trend,
            thresholds,
            decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carbon_aware::types::Sample;
    use chrono::{Duration, TimeZone, Utc};

    fn stats(min: f64, max: f64, mean: f64, std: f64) -> Stats {
        Stats {
            min,
            max,
            mean,
            arithmetic_mean: mean,
            median: mean,
            std,
            median_substituted: false,
        }
    }

    fn with_derivative() -> DecisionConfig {
        DecisionConfig {
            use_derivative: true,
            ..Default::default()
        }
    }

    fn hourly_history(values: &[f64]) -> History {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        History::new(
            values
                .iter()
                .enumerate()
                .map(|(i, &ci)| Sample::new(start + Duration::hours(i as i64), ci))
                .collect(),
        )
    }

    #[test]
    fn test_below_mean_runs() {
        // near-minimum cutoff = 100 + 30/3 = 110
        let d = decide(&stats(100.0, 300.0, 200.0, 30.0), 150.0, 0.0, &DecisionConfig::default());
        assert!(d.run_now);
        assert_eq!(d.decided_by, DecisionRule::BelowMean);
    }

    #[test]
    fn test_above_mean_waits() {
        let d = decide(&stats(100.0, 300.0, 200.0, 30.0), 250.0, 0.0, &DecisionConfig::default());
        assert!(!d.run_now);
        assert_eq!(d.decided_by, DecisionRule::BelowMean);
    }

    #[test]
    fn test_near_minimum_overrides_above_mean() {
        // mean is pulled below the near-minimum cutoff by a tight window
        let s = stats(100.0, 400.0, 105.0, 60.0);
        let current = 110.0;
        assert!(current >= s.mean);
        assert!(current < s.min + s.std / 3.0);

        let d = decide(&s, current, 0.0, &DecisionConfig::default());
        assert!(d.run_now);
        assert_eq!(d.decided_by, DecisionRule::NearMinimum);
    }

    #[test]
    fn test_derivative_veto() {
        let s = stats(100.0, 300.0, 200.0, 30.0);
        let current = 150.0;
        assert!(current < s.mean);
        assert!(current >= s.min + s.std / 3.0);

        let d = decide(&s, current, -12.0, &with_derivative());
        assert!(!d.run_now);
        assert_eq!(d.decided_by, DecisionRule::FallingFast);
    }

    #[test]
    fn test_derivative_ignored_when_disabled() {
        let d = decide(&stats(100.0, 300.0, 200.0, 30.0), 150.0, -12.0, &DecisionConfig::default());
        assert!(d.run_now);
        assert_eq!(d.decided_by, DecisionRule::BelowMean);
    }

    #[test]
    fn test_slope_at_cutoff_is_not_falling_fast() {
        let d = decide(&stats(100.0, 300.0, 200.0, 30.0), 150.0, -5.0, &with_derivative());
        assert!(d.run_now);
    }

    #[test]
    fn test_veto_cannot_suppress_near_minimum() {
        let d = decide(&stats(100.0, 300.0, 200.0, 30.0), 105.0, -40.0, &with_derivative());
        assert!(d.run_now);
        assert_eq!(d.decided_by, DecisionRule::NearMinimum);
    }

    #[test]
    fn test_below_mean_offset() {
        let config = DecisionConfig {
            below_mean_offset: 60.0,
            ..Default::default()
        };
        // 150 < 200 but not < 200 - 60
        let d = decide(&stats(100.0, 300.0, 200.0, 30.0), 150.0, 0.0, &config);
        assert!(!d.run_now);
    }

    #[test]
    fn test_zero_std_window() {
        // flat window: cutoffs collapse onto the constant, nothing is strictly below
        let d = decide(&stats(120.0, 120.0, 120.0, 0.0), 120.0, 0.0, &DecisionConfig::default());
        assert!(!d.run_now);
    }

    #[test]
    fn test_thresholds() {
        let t = Thresholds::new(&stats(60.0, 100.0, 80.0, 12.0), &DecisionConfig::default());
        assert_eq!(t.below_mean, 80.0);
        assert!((t.near_minimum - 64.0).abs() < 1e-12);
        assert_eq!(t.falling_fast, -5.0);
    }

    #[test]
    fn test_decreasing_day_runs_at_trough() {
        // 24 hourly samples sliding from 100 down to 60 at hour 23
        let values: Vec<f64> = (0..24).map(|i| 100.0 - 40.0 * i as f64 / 23.0).collect();
        let history = hourly_history(&values);

        for config in [DecisionConfig::default(), with_derivative()] {
            let engine = DecisionEngine::new(config, SmoothingConfig::default());
            let eval = engine.evaluate(&history).unwrap();

            assert_eq!(eval.decision.current_ci, 60.0);
            assert_eq!(eval.decision.min_ci, 60.0);
            assert!((eval.decision.mean_ci - 80.0).abs() < 1e-9);
            assert!(eval.decision.std_ci > 11.0 && eval.decision.std_ci < 13.0);
            assert!(eval.decision.run_now);
            assert_eq!(eval.decision.decided_by, DecisionRule::NearMinimum);
        }
    }

    #[test]
    fn test_evaluate_reports_trend() {
        let values: Vec<f64> = (0..24).map(|i| 300.0 - 8.0 * i as f64).collect();
        let eval = DecisionEngine::default()
            .evaluate(&hourly_history(&values))
            .unwrap();

        assert_eq!(eval.hours.len(), 24);
        assert_eq!(eval.trend.fine_times.len(), 100);
        assert!((eval.decision.trend_slope + 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_evaluate_rejects_short_history() {
        let err = DecisionEngine::default()
            .evaluate(&hourly_history(&[100.0, 110.0, 90.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientData {
                distinct_hours: 3,
                required: 4
            }
        ));
    }

    #[test]
    fn test_evaluate_rejects_samples_in_one_hour() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let history = History::new(
            (0..6)
                .map(|i| Sample::new(start + Duration::minutes(i * 5), 100.0))
                .collect(),
        );
        assert_eq!(history.len(), 6);
        assert!(matches!(
            DecisionEngine::default().evaluate(&history),
            Err(Error::InsufficientData {
                distinct_hours: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_precedence_order() {
        assert_eq!(
            DecisionRule::PRECEDENCE,
            [
                DecisionRule::BelowMean,
                DecisionRule::FallingFast,
                DecisionRule::NearMinimum
            ]
        );
    }
}

//! Summary statistics over a carbon intensity window

use crate::error::{Error, Result};
use tracing::debug;

/// Mean and median further apart than this many standard deviations means
/// the mean is dominated by outliers, and the median is used instead.
///
/// Note that `|mean - median| <= std` holds for any sample under the
/// population std, so at the default ratio the switch never fires. Lower it
/// via `DecisionConfig::median_switch_ratio` to make the guard bite.
pub const MEDIAN_SWITCH_RATIO: f64 = 2.0;

/// Statistical summary of a carbon intensity window
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    /// Robust mean: the arithmetic mean, or the median when the window is skewed
    pub mean: f64,
    pub arithmetic_mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std: f64,
    /// True when `mean` was replaced by the median
    pub median_substituted: bool,
}

/// Compute min, max, robust mean, median and population std of `values`
pub fn compute_stats(values: &[f64]) -> Result<Stats> {
    compute_stats_with_ratio(values, MEDIAN_SWITCH_RATIO)
}

/// Like [`compute_stats`], with a custom mean/median switch ratio
pub fn compute_stats_with_ratio(values: &[f64], switch_ratio: f64) -> Result<Stats> {
    if values.is_empty() {
        return Err(Error::InvalidInput(
            "cannot compute statistics of an empty series".to_string(),
        ));
    }

    let n = values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let arithmetic_mean = values.iter().sum::<f64>() / n;

    let variance = values
        .iter()
        .map(|&x| {
            let diff = x - arithmetic_mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    let median = median(values);

    // A constant window has std == 0; there is no skew to correct.
    let median_substituted =
        std > 0.0 && (arithmetic_mean - median).abs() / std > switch_ratio;

    if median_substituted {
        debug!(
            "Mean {:.1} is {:.1} std away from median {:.1}, using median",
            arithmetic_mean,
            (arithmetic_mean - median).abs() / std,
            median
        );
    }

    Ok(Stats {
        min,
        max,
        mean: if median_substituted {
            median
        } else {
            arithmetic_mean
        },
        arithmetic_mean,
        median,
        std,
        median_substituted,
    })
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let len = sorted.len();
    if len.is_multiple_of(2) {
        let mid = len / 2;
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[len / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_stats() {
        let stats = compute_stats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.median, 4.5);
        // population std of this classic set is exactly 2
        assert_eq!(stats.std, 2.0);
        assert!(!stats.median_substituted);
    }

    #[test]
    fn test_odd_length_median() {
        let stats = compute_stats(&[3.0, 1.0, 2.0]).unwrap();
        assert_eq!(stats.median, 2.0);
    }

    #[test]
    fn test_constant_values_do_not_divide_by_zero() {
        let stats = compute_stats(&[150.0; 12]).unwrap();
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.mean, 150.0);
        assert_eq!(stats.median, 150.0);
        assert!(!stats.median_substituted);
    }

    #[test]
    fn test_skew_switches_to_median() {
        let values = [100.0, 110.0, 120.0, 130.0, 300.0];
        let stats = compute_stats_with_ratio(&values, 0.25).unwrap();
        assert_eq!(stats.arithmetic_mean, 152.0);
        assert_eq!(stats.median, 120.0);
        assert!((stats.arithmetic_mean - stats.median).abs() / stats.std > 0.25);
        assert!(stats.median_substituted);
        assert_eq!(stats.mean, stats.median);
    }

    #[test]
    fn test_default_ratio_keeps_arithmetic_mean() {
        let values = [100.0, 110.0, 120.0, 130.0, 300.0];
        let stats = compute_stats(&values).unwrap();
        assert!(!stats.median_substituted);
        assert_eq!(stats.mean, stats.arithmetic_mean);
        assert_eq!(stats.mean, 152.0);
    }

    #[test]
    fn test_single_outlier_stays_within_one_std() {
        let mut values = vec![100.0; 49];
        values.push(1000.0);

        let stats = compute_stats(&values).unwrap();
        assert!((stats.arithmetic_mean - 118.0).abs() < 1e-9);
        assert_eq!(stats.median, 100.0);
        assert!((stats.arithmetic_mean - stats.median).abs() <= stats.std);
        assert!(!stats.median_substituted);
    }

    #[test]
    fn test_constant_values_with_zero_ratio() {
        let stats = compute_stats_with_ratio(&[42.0; 5], 0.0).unwrap();
        assert_eq!(stats.mean, 42.0);
        assert!(!stats.median_substituted);
    }

    #[test]
    fn test_empty_input() {
        let err = compute_stats(&[]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("empty series"));
    }
}

//! Smoothed carbon intensity trend
//!
//! The hourly series is noisy and staircase-shaped, so the trend is read off a
//! natural cubic smoothing spline rather than a finite difference between the
//! last two buckets. The spline minimises
//!
//! ```text
//! sum_i (y_i - g(t_i))^2 + alpha * integral g''(t)^2 dt
//! ```
//!
//! and `alpha` is tuned so the residual sum of squares matches the configured
//! smoothing factor.

use crate::carbon_aware::config::SmoothingConfig;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Distinct hours needed to support a cubic fit
pub const MIN_DISTINCT_HOURS: usize = 4;

/// Bisection steps over log10(alpha)
const PENALTY_SEARCH_STEPS: usize = 60;
const PENALTY_LOG_MIN: f64 = -10.0;
const PENALTY_LOG_MAX: f64 = 10.0;
const PENALTY_LOG_LIMIT: f64 = 20.0;

/// Output of [`smooth`]
#[derive(Clone, Debug)]
pub struct Trend {
    /// Evenly spaced hours spanning the window
    pub fine_times: Vec<f64>,
    /// Spline value at each of `fine_times`
    pub fine_values: Vec<f64>,
    /// First derivative at each input hour, in input order
    pub derivatives: Vec<f64>,
    /// Derivative at the most recent sample, gCO2eq/kWh per hour
    pub slope: f64,
    /// Roughness penalty the fit settled on; `None` for a straight-line fit
    pub penalty: Option<f64>,
    /// Residual sum of squares against the hour-averaged points
    pub residual_sum_of_squares: f64,
}

/// Fit a smoothing spline through `(hours, values)` and sample it.
///
/// `hours` and `values` are paired by index and must be in timestamp order;
/// the last pair is the most recent sample. Points sharing an hour are
/// averaged before fitting.
pub fn smooth(hours: &[u32], values: &[f64], config: &SmoothingConfig) -> Result<Trend> {
    if hours.len() != values.len() {
        return Err(Error::InvalidInput(format!(
            "{} hours but {} carbon intensity values",
            hours.len(),
            values.len()
        )));
    }

    let (knots, means) = collapse_by_hour(hours, values);
    if knots.len() < MIN_DISTINCT_HOURS {
        return Err(Error::InsufficientData {
            distinct_hours: knots.len(),
            required: MIN_DISTINCT_HOURS,
        });
    }

    let target = config.smoothing_factor.unwrap_or(knots.len() as f64);
    let (spline, penalty) = CubicSpline::fit(&knots, &means, target)?;
    let residual_sum_of_squares = spline.residual_sum_of_squares(&means);

    debug!(
        "Fitted spline through {} hourly points (target rss={:.2}, rss={:.2}, penalty={:?})",
        knots.len(),
        target,
        residual_sum_of_squares,
        penalty
    );

    let fine_times = linspace(knots[0], knots[knots.len() - 1], config.fine_points);
    let fine_values = fine_times.iter().map(|&t| spline.value(t)).collect();
    let derivatives: Vec<f64> = hours
        .iter()
        .map(|&h| spline.derivative(h as f64))
        .collect();
    let slope = derivatives.last().copied().unwrap_or(0.0);

    Ok(Trend {
        fine_times,
        fine_values,
        derivatives,
        slope,
        penalty,
        residual_sum_of_squares,
    })
}

/// Sorted distinct hours with the mean value at each
fn collapse_by_hour(hours: &[u32], values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut buckets: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for (&hour, &value) in hours.iter().zip(values) {
        let bucket = buckets.entry(hour).or_insert((0.0, 0));
        bucket.0 += value;
        bucket.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(hour, (sum, count))| (hour as f64, sum / count as f64))
        .unzip()
}

fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|i| {
                    if i == count - 1 {
                        end
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Natural cubic spline given by its values and second derivatives at the knots
#[derive(Clone, Debug)]
struct CubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    second_derivatives: Vec<f64>,
}

impl CubicSpline {
    /// Fit with the penalty chosen so the residual sum of squares hits `target`.
    ///
    /// Returns the spline and the penalty used, or `None` when the
    /// least-squares line already meets the target.
    fn fit(x: &[f64], y: &[f64], target: f64) -> Result<(Self, Option<f64>)> {
        if target <= 0.0 {
            return Ok((Self::with_penalty(x, y, 0.0)?, Some(0.0)));
        }

        let line = Self::least_squares_line(x, y);
        if line.residual_sum_of_squares(y) <= target {
            return Ok((line, None));
        }

        // RSS grows monotonically with the penalty, from 0 (interpolation)
        // towards the straight-line RSS.
        let mut lo = PENALTY_LOG_MIN;
        let mut hi = PENALTY_LOG_MAX;
        while hi < PENALTY_LOG_LIMIT
            && Self::with_penalty(x, y, 10f64.powf(hi))?.residual_sum_of_squares(y) < target
        {
            hi += 2.0;
        }

        for _ in 0..PENALTY_SEARCH_STEPS {
            let mid = 0.5 * (lo + hi);
            let rss = Self::with_penalty(x, y, 10f64.powf(mid))?.residual_sum_of_squares(y);
            if rss < target {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let penalty = 10f64.powf(lo);
        Ok((Self::with_penalty(x, y, penalty)?, Some(penalty)))
    }

    /// Reinsch smoothing spline for a fixed penalty `alpha`.
    ///
    /// Solves `(R + alpha Q'Q) gamma = Q'y` for the interior second
    /// derivatives, then `g = y - alpha Q gamma`. `alpha = 0` interpolates.
    fn with_penalty(x: &[f64], y: &[f64], alpha: f64) -> Result<Self> {
        let n = x.len();
        let m = n - 2;
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        if h.iter().any(|&d| d <= 0.0) {
            return Err(Error::NumericalError(
                "spline knots must be strictly increasing".to_string(),
            ));
        }

        // Q is n x m, tridiagonal by column
        let mut q = vec![vec![0.0; m]; n];
        for j in 0..m {
            let k = j + 1;
            q[k - 1][j] = 1.0 / h[k - 1];
            q[k][j] = -1.0 / h[k - 1] - 1.0 / h[k];
            q[k + 1][j] = 1.0 / h[k];
        }

        let mut a = vec![vec![0.0; m]; m];
        for j in 0..m {
            let k = j + 1;
            a[j][j] = (h[k - 1] + h[k]) / 3.0;
            if j + 1 < m {
                a[j][j + 1] = h[k] / 6.0;
                a[j + 1][j] = h[k] / 6.0;
            }
        }
        if alpha > 0.0 {
            for j in 0..m {
                for l in j.saturating_sub(2)..m.min(j + 3) {
                    let qtq: f64 = (0..n).map(|r| q[r][j] * q[r][l]).sum();
                    a[j][l] += alpha * qtq;
                }
            }
        }

        let rhs: Vec<f64> = (0..m)
            .map(|j| (0..n).map(|r| q[r][j] * y[r]).sum())
            .collect();

        let gamma = solve_linear(a, rhs).ok_or_else(|| {
            Error::NumericalError("spline system is singular for the given hours".to_string())
        })?;

        let values = (0..n)
            .map(|r| {
                let correction: f64 = (0..m).map(|j| q[r][j] * gamma[j]).sum();
                y[r] - alpha * correction
            })
            .collect();

        let mut second_derivatives = Vec::with_capacity(n);
        second_derivatives.push(0.0);
        second_derivatives.extend(gamma);
        second_derivatives.push(0.0);

        Ok(Self {
            knots: x.to_vec(),
            values,
            second_derivatives,
        })
    }

    /// The infinite-penalty limit of the smoothing spline
    fn least_squares_line(x: &[f64], y: &[f64]) -> Self {
        let n = x.len() as f64;
        let mean_x = x.iter().sum::<f64>() / n;
        let mean_y = y.iter().sum::<f64>() / n;

        let sxx: f64 = x.iter().map(|&xi| (xi - mean_x).powi(2)).sum();
        let sxy: f64 = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| (xi - mean_x) * (yi - mean_y))
            .sum();
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };

        Self {
            knots: x.to_vec(),
            values: x.iter().map(|&xi| mean_y + slope * (xi - mean_x)).collect(),
            second_derivatives: vec![0.0; x.len()],
        }
    }

    fn residual_sum_of_squares(&self, y: &[f64]) -> f64 {
        self.values
            .iter()
            .zip(y)
            .map(|(g, yi)| (yi - g).powi(2))
            .sum()
    }

    /// Knot interval containing `t`, plus the interpolation weights
    fn locate(&self, t: f64) -> (usize, f64, f64, f64) {
        let last = self.knots.len() - 1;
        let t = t.clamp(self.knots[0], self.knots[last]);
        let i = self
            .knots
            .partition_point(|&k| k <= t)
            .saturating_sub(1)
            .min(last - 1);

        let h = self.knots[i + 1] - self.knots[i];
        let a = (self.knots[i + 1] - t) / h;
        (i, h, a, 1.0 - a)
    }

    fn value(&self, t: f64) -> f64 {
        let (i, h, a, b) = self.locate(t);
        let (g, m) = (&self.values, &self.second_derivatives);
        a * g[i] + b * g[i + 1] + ((a.powi(3) - a) * m[i] + (b.powi(3) - b) * m[i + 1]) * h * h / 6.0
    }

    fn derivative(&self, t: f64) -> f64 {
        let (i, h, a, b) = self.locate(t);
        let (g, m) = (&self.values, &self.second_derivatives);
        (g[i + 1] - g[i]) / h - (3.0 * a * a - 1.0) / 6.0 * h * m[i]
            + (3.0 * b * b - 1.0) / 6.0 * h * m[i + 1]
    }
}

/// Gaussian elimination with partial pivoting
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < f64::EPSILON * 1e-3 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

//! Statistical functions for testing and analysis

use scilib::math::basic::erf;
use std::f64::consts::SQRT_2;

/// Cumulative distribution function for standard normal distribution
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// CDF of a standard normal truncated to `[a, b]`.
pub fn truncated_normal_cdf(x: f64, a: f64, b: f64) -> f64 {
    if x <= a {
        return 0.0;
    }
    if x >= b {
        return 1.0;
    }
    let (fa, fb) = (normal_cdf(a), normal_cdf(b));
    (normal_cdf(x) - fa) / (fb - fa)
}

/// Kolmogorov-Smirnov statistic of a sample against a reference CDF.
///
/// Returns the largest gap between the empirical CDF and `cdf`. An empty
/// sample returns 1.0.
pub fn ks_statistic<F>(samples: &[f64], cdf: F) -> f64
where
    F: Fn(f64) -> f64,
{
    let n = samples.len();
    if n == 0 {
        return 1.0;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut max_diff: f64 = 0.0;
    for (i, &value) in sorted.iter().enumerate() {
        let theoretical = cdf(value);
        let before = i as f64 / n as f64;
        let after = (i + 1) as f64 / n as f64;
        max_diff = max_diff
            .max((before - theoretical).abs())
            .max((after - theoretical).abs());
    }

    max_diff
}

/// Asymptotic KS critical value for `n` samples at significance `alpha`.
pub fn ks_critical_value(n: usize, alpha: f64) -> f64 {
    (-0.5 * (alpha / 2.0).ln()).sqrt() / (n as f64).sqrt()
}

/// Sample mean and (population) variance.
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

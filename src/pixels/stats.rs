//! Scalar statistics used by the noise and consistency scoring stages.
//!
//! The normal CDF is a hand-rolled Abramowitz–Stegun polynomial so the
//! Kolmogorov–Smirnov fit stays dependency-free and bit-for-bit
//! reproducible across platforms.

/// Arithmetic mean. Zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance. Zero for fewer than two samples.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Third standardized moment. Zero when the distribution is degenerate.
pub fn skewness(values: &[f64]) -> f64 {
    let s = std_dev(values);
    if s < 1e-12 || values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / values.len() as f64;
    m3 / s.powi(3)
}

/// Fourth standardized moment (non-excess: a Gaussian scores 3.0).
pub fn kurtosis(values: &[f64]) -> f64 {
    let s = std_dev(values);
    if s < 1e-12 || values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / values.len() as f64;
    m4 / s.powi(4)
}

/// Coefficient of variation: `std / |mean|`. Returns `cap` when the mean is
/// too close to zero to be meaningful.
pub fn coefficient_of_variation(values: &[f64], cap: f64) -> f64 {
    let m = mean(values).abs();
    if m < 1e-9 {
        return cap;
    }
    (std_dev(values) / m).min(cap)
}

/// Percentile by linear interpolation over a **sorted** slice, `p` in [0, 100].
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Error function, Abramowitz & Stegun 7.1.26 (max error ~1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal CDF evaluated at `(x - mu) / sigma`.
pub fn normal_cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    if sigma < 1e-12 {
        return if x < mu { 0.0 } else { 1.0 };
    }
    0.5 * (1.0 + erf((x - mu) / (sigma * std::f64::consts::SQRT_2)))
}

/// One-sample Kolmogorov–Smirnov statistic of a **sorted** sample against
/// `N(mu, sigma)`: the supremum distance between the empirical CDF and the
/// fitted normal CDF.
pub fn ks_statistic_sorted(sorted: &[f64], mu: f64, sigma: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let mut sup = 0.0f64;
    for (i, &x) in sorted.iter().enumerate() {
        let cdf = normal_cdf(x, mu, sigma);
        let ecdf_hi = (i + 1) as f64 / n as f64;
        let ecdf_lo = i as f64 / n as f64;
        sup = sup.max((cdf - ecdf_lo).abs()).max((ecdf_hi - cdf).abs());
    }
    sup
}

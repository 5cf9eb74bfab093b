//! Sensor-noise consistency check.
//!
//! A genuine photograph carries one noise field; a splice brings its own.
//! The residual (high-pass) plane is sliced into overlapping regions and
//! the spread of per-region noise statistics is scored, plus a global
//! goodness-of-fit of the pooled residual against a single Gaussian.

use super::NoiseReport;
use crate::pixels::{ops, stats, GrayImage};
use crate::Result;

const REGION_SIZE: usize = 64;
const REGION_STRIDE: usize = 32;
const CV_CAP: f64 = 1.0;
const KS_ANOMALY_CAP: f64 = 0.5;
const DEGENERATE_SIGMA: f64 = 1e-6;

/// Per-region weights for the coefficient-of-variation mix.
const W_VARIANCE: f64 = 0.4;
const W_SKEWNESS: f64 = 0.3;
const W_KURTOSIS: f64 = 0.2;
const W_SNR: f64 = 0.1;

/// High-pass residual: blurred copy subtracted from the plane, blended
/// with the Laplacian response so both low- and high-order structure
/// contribute.
fn residual_plane(gray: &GrayImage) -> GrayImage {
    let blurred = ops::gaussian_blur(gray, 1.0);
    let lap = ops::laplacian(gray);
    let data = gray
        .data
        .iter()
        .zip(blurred.data.iter())
        .zip(lap.data.iter())
        .map(|((&g, &b), &l)| 0.7 * (g - b) + 0.3 * l)
        .collect();
    GrayImage::from_vec(gray.width, gray.height, data)
}

/// Score the noise-field consistency of a grayscale plane.
///
/// Returns inconsistency in [0, 1]: 0 means one homogeneous noise field,
/// higher means region statistics disagree or the pooled residual is
/// visibly non-Gaussian.
pub fn analyze(gray: &GrayImage) -> Result<NoiseReport> {
    let residual = residual_plane(gray);

    // Flat or synthetic planes have no noise field to be inconsistent.
    let pooled: Vec<f64> = residual.data.iter().map(|&v| v as f64).collect();
    if stats::std_dev(&pooled) < DEGENERATE_SIGMA {
        return Ok(NoiseReport::default());
    }

    let mut variances = Vec::new();
    let mut skews = Vec::new();
    let mut kurts = Vec::new();
    let mut snrs = Vec::new();

    let rw = REGION_SIZE.min(residual.width);
    let rh = REGION_SIZE.min(residual.height);
    let mut region_values = Vec::with_capacity(rw * rh);
    let mut y = 0;
    loop {
        let ry = y.min(residual.height - rh);
        let mut x = 0;
        loop {
            let rx = x.min(residual.width - rw);
            region_values.clear();
            for yy in ry..ry + rh {
                for xx in rx..rx + rw {
                    region_values.push(residual.at(xx, yy) as f64);
                }
            }
            let var = stats::variance(&region_values);
            variances.push(var);
            skews.push(stats::skewness(&region_values));
            kurts.push(stats::kurtosis(&region_values));
            // Estimated SNR of the region: signal level over noise level.
            let signal: f64 = region_values.iter().map(|v| v.abs()).sum::<f64>()
                / region_values.len() as f64;
            let noise = var.sqrt();
            snrs.push(if noise < DEGENERATE_SIGMA { 0.0 } else { signal / noise });

            if rx + rw >= residual.width {
                break;
            }
            x += REGION_STRIDE;
        }
        if ry + rh >= residual.height {
            break;
        }
        y += REGION_STRIDE;
    }

    let regions_analyzed = variances.len();
    let variance_cv = stats::coefficient_of_variation(&variances, CV_CAP);
    let skewness_cv = stats::coefficient_of_variation(&skews, CV_CAP);
    let kurtosis_cv = stats::coefficient_of_variation(&kurts, CV_CAP);
    let snr_cv = stats::coefficient_of_variation(&snrs, CV_CAP);
    let weighted = W_VARIANCE * variance_cv
        + W_SKEWNESS * skewness_cv
        + W_KURTOSIS * kurtosis_cv
        + W_SNR * snr_cv;

    // Gaussian goodness-of-fit on the pooled residual, tails trimmed so a
    // few saturated pixels cannot dominate the fit.
    let mut sorted = pooled;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let lo = stats::percentile_sorted(&sorted, 1.0);
    let hi = stats::percentile_sorted(&sorted, 99.0);
    let trimmed: Vec<f64> = sorted.iter().copied().filter(|&v| v >= lo && v <= hi).collect();
    let mu = stats::mean(&trimmed);
    let sigma = stats::std_dev(&trimmed);
    let ks = if sigma < DEGENERATE_SIGMA {
        0.0
    } else {
        stats::ks_statistic_sorted(&trimmed, mu, sigma)
    };
    let anomaly = (2.0 * ks).min(KS_ANOMALY_CAP);

    let inconsistency = (weighted + anomaly).clamp(0.0, 1.0);
    tracing::debug!(
        regions = regions_analyzed,
        variance_cv,
        ks,
        score = inconsistency,
        "noise consistency"
    );

    Ok(NoiseReport {
        inconsistency_score: inconsistency,
        regions_analyzed,
        variance_cv,
        skewness_cv,
        kurtosis_cv,
        snr_cv,
        ks_statistic: ks,
        gaussian_mu: mu,
        gaussian_sigma: sigma,
        extra: Default::default(),
    })
}

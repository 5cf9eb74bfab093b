//! Analysis workers and their report types.
//!
//! Each worker is self-contained: it receives an owned pixel copy, runs to
//! completion, and returns a serializable report. The reports carry the
//! fields consumers branch on (`score`, flagged anomaly lists) as typed
//! members plus an open `extra` map so algorithms can evolve without
//! breaking stored results.

pub mod compression;
pub mod copy_move;
pub mod edge;
pub mod font;
pub mod noise;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open metadata attached to every report.
pub type ExtraMap = BTreeMap<String, serde_json::Value>;

/// Outcome tier of one full analysis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Success,
    PartialFailure,
    CriticalFailure,
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::PartialFailure => write!(f, "PartialFailure"),
            Self::CriticalFailure => write!(f, "CriticalFailure"),
        }
    }
}

/// Bounding box plus per-region score, produced by copy-move and ELA.
/// Coordinates are in the analyzed (possibly downscaled) image frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousRegion {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
    /// Normalized suspicion in [0, 1].
    pub score: f64,
    pub mean_error: f64,
    pub max_error: f64,
}

/// Edge/tamper worker output: continuity, sharpness, cloning, and noise
/// consistency folded into one edge score.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EdgeReport {
    /// Mean of the four sub-scores below.
    pub score: f64,
    pub continuity: f64,
    pub sharpness: f64,
    pub copy_move_score: f64,
    pub noise_inconsistency: f64,
    pub edge_components: usize,
    pub small_components: usize,
    pub copy_move_regions: Vec<SuspiciousRegion>,
    pub noise: NoiseReport,
    pub extra: ExtraMap,
}

impl EdgeReport {
    /// Fallback record used by the failure tiers: carries only the imposed
    /// score, with a marker so consumers can tell it was never computed.
    pub fn fallback(score: f64) -> Self {
        let mut extra = ExtraMap::new();
        extra.insert("fallback".into(), serde_json::Value::Bool(true));
        Self { score, extra, ..Default::default() }
    }
}

/// Statistical noise model output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NoiseReport {
    pub inconsistency_score: f64,
    pub regions_analyzed: usize,
    pub variance_cv: f64,
    pub skewness_cv: f64,
    pub kurtosis_cv: f64,
    pub snr_cv: f64,
    /// Kolmogorov–Smirnov statistic of the pooled residual against the
    /// fitted Gaussian.
    pub ks_statistic: f64,
    pub gaussian_mu: f64,
    pub gaussian_sigma: f64,
    pub extra: ExtraMap,
}

/// Compression worker output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompressionReport {
    /// Mean of block-artifact, ELA, and recompression scores.
    pub score: f64,
    pub block_artifact_score: f64,
    pub ela_score: f64,
    pub recompression_score: f64,
    /// JPEG grid boundary energy; reported but not part of the mean.
    pub boundary_score: f64,
    pub blocks_analyzed: usize,
    pub ela: ElaReport,
    pub extra: ExtraMap,
}

impl CompressionReport {
    pub fn fallback(score: f64) -> Self {
        let mut extra = ExtraMap::new();
        extra.insert("fallback".into(), serde_json::Value::Bool(true));
        Self { score, extra, ..Default::default() }
    }
}

/// Error Level Analysis record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ElaReport {
    pub score: f64,
    pub mean_error: f64,
    pub std_error: f64,
    pub max_error: f64,
    /// Re-encode quality used for the comparison copy.
    pub quality: u8,
    pub regions: Vec<SuspiciousRegion>,
    pub extra: ExtraMap,
}

/// Font/text consistency worker output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FontReport {
    pub score: f64,
    pub char_consistency: f64,
    pub alignment_score: f64,
    pub stroke_width_cv: f64,
    pub density_cv: f64,
    pub regions_found: usize,
    /// Human-readable inconsistency flags, appended verbatim to the
    /// engine's anomaly list.
    pub inconsistencies: Vec<String>,
    pub penalty: f64,
    pub extra: ExtraMap,
}

impl FontReport {
    pub fn fallback(score: f64) -> Self {
        let mut extra = ExtraMap::new();
        extra.insert("fallback".into(), serde_json::Value::Bool(true));
        Self { score, extra, ..Default::default() }
    }
}

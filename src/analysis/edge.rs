//! Edge and tamper analysis worker.
//!
//! Combines four independent signals over the grayscale plane: edge
//! continuity (splices break contours into fragments), overall sharpness,
//! copy-move detection, and noise-field consistency. The combined
//! `edge_score` is the plain mean of the four.

use super::{copy_move, noise, EdgeReport};
use crate::pixels::{ops, stats, GrayImage, ImageBuffer};
use crate::{ForensicsError, Result};

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const SMALL_COMPONENT_PX: usize = 10;
const SHARPNESS_NORMALIZER: f64 = 1000.0;
const MIN_PLANE_DIM: usize = 16;

/// Run the full edge/tamper pass on an owned pixel buffer.
pub fn analyze(image: &ImageBuffer) -> Result<EdgeReport> {
    let gray = image.to_gray();
    if gray.width < MIN_PLANE_DIM || gray.height < MIN_PLANE_DIM {
        return Err(ForensicsError::FeatureDetection(format!(
            "plane too small for edge analysis: {}x{}",
            gray.width, gray.height
        )));
    }

    let (continuity, edge_components, small_components) = edge_continuity(&gray);
    let sharpness = sharpness_score(&gray);
    let cloning = copy_move::detect(&gray)?;
    let noise_report = noise::analyze(&gray)?;

    let score = (continuity
        + sharpness
        + cloning.score
        + noise_report.inconsistency_score)
        / 4.0;

    tracing::debug!(
        continuity,
        sharpness,
        copy_move = cloning.score,
        noise = noise_report.inconsistency_score,
        score,
        "edge analysis"
    );

    let mut extra = super::ExtraMap::new();
    extra.insert("copy_move_keypoints".into(), cloning.keypoints.into());
    extra.insert("copy_move_inliers".into(), cloning.inliers.into());
    extra.insert("copy_move_tiled".into(), cloning.tiled.into());

    Ok(EdgeReport {
        score,
        continuity,
        sharpness,
        copy_move_score: cloning.score,
        noise_inconsistency: noise_report.inconsistency_score,
        edge_components,
        small_components,
        copy_move_regions: cloning.regions,
        noise: noise_report,
        extra,
    })
}

/// Fraction of edge components that are not tiny fragments. An empty edge
/// map (flat image) has nothing broken and scores 1.0.
fn edge_continuity(gray: &GrayImage) -> (f64, usize, usize) {
    let edges = ops::canny(gray, CANNY_LOW, CANNY_HIGH);
    let components = ops::connected_components(&edges, gray.width, gray.height);
    if components.is_empty() {
        return (1.0, 0, 0);
    }
    let small = components.iter().filter(|c| c.area < SMALL_COMPONENT_PX).count();
    let continuity = 1.0 - small as f64 / components.len() as f64;
    (continuity, components.len(), small)
}

/// Variance of the Laplacian, normalized and clamped. Low for blurred or
/// flat content, saturates for very sharp scans.
fn sharpness_score(gray: &GrayImage) -> f64 {
    let lap = ops::laplacian(gray);
    let values: Vec<f64> = lap.data.iter().map(|&v| v as f64).collect();
    (stats::variance(&values) / SHARPNESS_NORMALIZER).clamp(0.0, 1.0)
}

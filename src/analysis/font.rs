//! Font and text consistency analysis.
//!
//! Tampered amounts and payees are usually retyped in a font that almost
//! matches. Candidate glyph regions are segmented with an adaptive
//! threshold, then stroke width, ink density, and vertical alignment are
//! compared across regions. Documents without text pass trivially.

use super::{ExtraMap, FontReport};
use crate::pixels::{ops, stats, GrayImage, ImageBuffer};
use crate::Result;

const THRESHOLD_WINDOW: usize = 15;
const THRESHOLD_OFFSET: f32 = 10.0;
const MIN_REGION_AREA: usize = 50;
const ASPECT_MIN: f64 = 0.1;
const ASPECT_MAX: f64 = 10.0;
const CV_FLAG_LEVEL: f64 = 0.3;
const FLAG_PENALTY: f64 = 0.1;
const ALIGNMENT_SIGMA_NORM: f64 = 50.0;

const STROKE_FLAG: &str = "high stroke width variation";
const DENSITY_FLAG: &str = "high text density variation";

struct GlyphRegion {
    stroke_width: f64,
    density: f64,
    gray_variance: f64,
    center_y: f64,
}

/// Run the font consistency pass on an owned pixel buffer.
pub fn analyze(image: &ImageBuffer) -> Result<FontReport> {
    let gray = image.to_gray();
    let regions = segment_glyphs(&gray);

    // Nothing to compare: a blank or textless document is consistent.
    if regions.len() < 2 {
        return Ok(FontReport {
            score: 1.0,
            char_consistency: 1.0,
            alignment_score: 1.0,
            regions_found: regions.len(),
            ..Default::default()
        });
    }

    let strokes: Vec<f64> = regions.iter().map(|r| r.stroke_width).collect();
    let densities: Vec<f64> = regions.iter().map(|r| r.density).collect();
    let variances: Vec<f64> = regions.iter().map(|r| r.gray_variance).collect();

    let stroke_width_cv = stats::coefficient_of_variation(&strokes, f64::INFINITY);
    let density_cv = stats::coefficient_of_variation(&densities, f64::INFINITY);
    let char_consistency =
        ((1.0 - stroke_width_cv).max(0.0) + (1.0 - density_cv).max(0.0)) / 2.0;

    let mut inconsistencies = Vec::new();
    let mut penalty = 0.0;
    if stroke_width_cv > CV_FLAG_LEVEL {
        inconsistencies.push(STROKE_FLAG.to_string());
        penalty += FLAG_PENALTY;
    }
    if density_cv > CV_FLAG_LEVEL {
        inconsistencies.push(DENSITY_FLAG.to_string());
        penalty += FLAG_PENALTY;
    }

    let alignment_score = alignment(&regions);
    let score = ((char_consistency + alignment_score) / 2.0 - penalty).max(0.0);

    tracing::debug!(
        regions = regions.len(),
        char_consistency,
        alignment = alignment_score,
        penalty,
        score,
        "font analysis"
    );

    let mut extra = ExtraMap::new();
    if let Some(mean_var) = serde_json::Number::from_f64(stats::mean(&variances)) {
        extra.insert("mean_gray_variance".into(), serde_json::Value::Number(mean_var));
    }

    Ok(FontReport {
        score,
        char_consistency,
        alignment_score,
        stroke_width_cv,
        density_cv,
        regions_found: regions.len(),
        inconsistencies,
        penalty,
        extra,
    })
}

/// Segment candidate glyph boxes and measure their per-region metrics.
fn segment_glyphs(gray: &GrayImage) -> Vec<GlyphRegion> {
    let (w, h) = (gray.width, gray.height);
    let mask = ops::adaptive_threshold(gray, THRESHOLD_WINDOW, THRESHOLD_OFFSET);
    let closed = ops::morph_close(&mask, w, h);
    let dist = ops::distance_transform(&closed, w, h);

    ops::connected_components(&closed, w, h)
        .into_iter()
        .filter(|c| {
            let aspect = c.width() as f64 / c.height() as f64;
            c.area >= MIN_REGION_AREA && (ASPECT_MIN..=ASPECT_MAX).contains(&aspect)
        })
        .map(|c| {
            let mut dist_sum = 0.0f64;
            let mut dist_count = 0usize;
            let mut grays = Vec::with_capacity(c.area);
            for y in c.y0..=c.y1 {
                for x in c.x0..=c.x1 {
                    if closed[y * w + x] {
                        dist_sum += dist[y * w + x] as f64;
                        dist_count += 1;
                        grays.push(gray.at(x, y) as f64);
                    }
                }
            }
            let mean_dist = if dist_count == 0 { 0.0 } else { dist_sum / dist_count as f64 };
            GlyphRegion {
                // Mean chamfer depth is half the stroke thickness.
                stroke_width: 2.0 * mean_dist,
                density: c.area as f64 / (c.width() * c.height()) as f64,
                gray_variance: stats::variance(&grays),
                center_y: (c.y0 + c.y1) as f64 / 2.0,
            }
        })
        .collect()
}

/// Vertical alignment: spread of region centers plus spread of the gaps
/// between vertically-sorted centers, each mapped through `1 − σ/50`.
fn alignment(regions: &[GlyphRegion]) -> f64 {
    let mut centers: Vec<f64> = regions.iter().map(|r| r.center_y).collect();
    centers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let center_term = (1.0 - stats::std_dev(&centers) / ALIGNMENT_SIGMA_NORM).clamp(0.0, 1.0);

    let gaps: Vec<f64> = centers.windows(2).map(|p| p[1] - p[0]).collect();
    let gap_term = if gaps.is_empty() {
        1.0
    } else {
        (1.0 - stats::std_dev(&gaps) / ALIGNMENT_SIGMA_NORM).clamp(0.0, 1.0)
    };
    (center_term + gap_term) / 2.0
}

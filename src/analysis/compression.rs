//! Compression artifact analysis.
//!
//! Three signals: residual energy in high-frequency DCT coefficients per
//! 8×8 block, Error Level Analysis against a fresh JPEG re-encode, and a
//! periodic-pattern check on the frequency spectrum that betrays double
//! compression. JPEG grid boundary energy is measured too, but reported
//! only — it is too noisy on rescaled scans to weight into the score.

use super::{CompressionReport, ElaReport, SuspiciousRegion};
use crate::pixels::{dct, ops, stats, GrayImage, ImageBuffer};
use crate::{ForensicsError, Result};
use image::codecs::jpeg::JpegEncoder;

const MIN_PLANE_DIM: usize = 16;
const BLOCK: usize = 8;
const BLOCK_SCORE_NORMALIZER: f64 = 10.0;
const ELA_STD_NORMALIZER: f64 = 50.0;
const ELA_REGION_MIN_AREA: usize = 25;
const ELA_REGION_KEEP: usize = 10;
const ELA_EQ_THRESHOLD: u8 = 230; // top ~10% after equalization
const SPECTRUM_SIZE: usize = 256;
const SPECTRUM_WINDOW_HALF: usize = 20;
const SPECTRUM_NORMALIZER: f64 = 10_000.0;
const BOUNDARY_NORMALIZER: f64 = 50.0;

/// Run the full compression pass on an owned pixel buffer.
///
/// `jpeg_quality` is the re-encode quality used for the ELA comparison
/// copy.
pub fn analyze(image: &ImageBuffer, jpeg_quality: u8) -> Result<CompressionReport> {
    if image.width < MIN_PLANE_DIM || image.height < MIN_PLANE_DIM {
        return Err(ForensicsError::CompressionAnalysis(format!(
            "plane too small for compression analysis: {}x{}",
            image.width, image.height
        )));
    }
    let gray = image.to_gray();

    let (block_artifact_score, blocks_analyzed) = block_artifacts(&gray);
    let ela = error_level_analysis(image, jpeg_quality)?;
    let recompression_score = recompression_pattern(&gray);
    let boundary_score = boundary_energy(&gray);

    let score = (block_artifact_score + ela.score + recompression_score) / 3.0;
    tracing::debug!(
        block = block_artifact_score,
        ela = ela.score,
        recompression = recompression_score,
        boundary = boundary_score,
        score,
        "compression analysis"
    );

    Ok(CompressionReport {
        score,
        block_artifact_score,
        ela_score: ela.score,
        recompression_score,
        boundary_score,
        blocks_analyzed,
        ela,
        extra: Default::default(),
    })
}

// ─── Block DCT artifacts ───────────────────────────────────────────

/// Mean spread of high-frequency DCT coefficients (row ≥ 4 or col ≥ 4)
/// over every full 8×8 block.
fn block_artifacts(gray: &GrayImage) -> (f64, usize) {
    let mut block = [0.0f32; BLOCK * BLOCK];
    let mut per_block = Vec::new();
    let mut high = Vec::with_capacity(48);
    for by in 0..gray.height / BLOCK {
        for bx in 0..gray.width / BLOCK {
            for y in 0..BLOCK {
                for x in 0..BLOCK {
                    block[y * BLOCK + x] = gray.at(bx * BLOCK + x, by * BLOCK + y);
                }
            }
            let coeffs = dct::dct_8x8(&block);
            high.clear();
            for v in 0..BLOCK {
                for u in 0..BLOCK {
                    if v >= 4 || u >= 4 {
                        high.push(coeffs[v * BLOCK + u] as f64);
                    }
                }
            }
            per_block.push(stats::std_dev(&high));
        }
    }
    let blocks = per_block.len();
    let score = (stats::mean(&per_block) / BLOCK_SCORE_NORMALIZER).clamp(0.0, 1.0);
    (score, blocks)
}

// ─── Error Level Analysis ──────────────────────────────────────────

/// Re-encode at the configured quality and score the per-pixel error.
/// A uniformly-compressed image re-encodes with uniform error; a spliced
/// patch that lived through a different compression history stands out.
fn error_level_analysis(image: &ImageBuffer, quality: u8) -> Result<ElaReport> {
    let encoded = encode_jpeg(image, quality)?;
    let decoded = decode_jpeg(&encoded, image.channels)?;
    if decoded.width != image.width || decoded.height != image.height {
        return Err(ForensicsError::CompressionAnalysis(format!(
            "re-encode changed dimensions: {}x{} -> {}x{}",
            image.width, image.height, decoded.width, decoded.height
        )));
    }

    let original = image.to_gray();
    let resaved = decoded.to_gray();
    let diff: Vec<f64> = original
        .data
        .iter()
        .zip(resaved.data.iter())
        .map(|(&a, &b)| (a - b).abs() as f64)
        .collect();

    let mean_error = stats::mean(&diff);
    let std_error = stats::std_dev(&diff);
    let max_error = diff.iter().cloned().fold(0.0f64, f64::max);
    let score = (std_error / ELA_STD_NORMALIZER + max_error / 255.0).min(1.0);

    let regions = ela_regions(&diff, image.width, image.height);

    Ok(ElaReport {
        score,
        mean_error,
        std_error,
        max_error,
        quality,
        regions,
        extra: Default::default(),
    })
}

/// Localize the error map. Per-pixel JPEG error is speckle, so the
/// difference is aggregated per 8×8 block first; block means from a
/// foreign compression history cohere spatially where single pixels do
/// not. The block means are equalized so the hottest decile sits above a
/// fixed byte threshold, closed to bridge one-block gaps, labeled, and
/// the strongest regions kept. A uniform error map (every block at the
/// same level) equalizes to zero and yields no regions.
fn ela_regions(diff: &[f64], w: usize, h: usize) -> Vec<SuspiciousRegion> {
    let bw = (w + BLOCK - 1) / BLOCK;
    let bh = (h + BLOCK - 1) / BLOCK;

    let mut block_means = vec![0.0f64; bw * bh];
    for by in 0..bh {
        for bx in 0..bw {
            let x1 = ((bx + 1) * BLOCK).min(w);
            let y1 = ((by + 1) * BLOCK).min(h);
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for y in by * BLOCK..y1 {
                for x in bx * BLOCK..x1 {
                    sum += diff[y * w + x];
                    count += 1;
                }
            }
            block_means[by * bw + bx] = sum / count as f64;
        }
    }

    let quantized: Vec<u8> =
        block_means.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect();
    let equalized = ops::equalize_hist(&quantized);
    let mask: Vec<bool> = equalized.iter().map(|&v| v >= ELA_EQ_THRESHOLD).collect();
    let closed = ops::morph_close(&mask, bw, bh);

    let mut regions: Vec<SuspiciousRegion> = ops::connected_components(&closed, bw, bh)
        .into_iter()
        .filter(|c| c.area * BLOCK * BLOCK >= ELA_REGION_MIN_AREA)
        .map(|c| {
            let x0 = c.x0 * BLOCK;
            let y0 = c.y0 * BLOCK;
            let x1 = ((c.x1 + 1) * BLOCK).min(w);
            let y1 = ((c.y1 + 1) * BLOCK).min(h);
            let mut sum = 0.0f64;
            let mut max = 0.0f64;
            let mut count = 0usize;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += diff[y * w + x];
                    max = max.max(diff[y * w + x]);
                    count += 1;
                }
            }
            let mean = if count == 0 { 0.0 } else { sum / count as f64 };
            SuspiciousRegion {
                x: x0,
                y: y0,
                width: x1 - x0,
                height: y1 - y0,
                score: (mean / ELA_STD_NORMALIZER + max / 255.0).min(1.0),
                mean_error: mean,
                max_error: max,
            }
        })
        .collect();
    regions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    regions.truncate(ELA_REGION_KEEP);
    regions
}

fn encode_jpeg(image: &ImageBuffer, quality: u8) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
    let err_map = |e: image::ImageError| {
        ForensicsError::CompressionAnalysis(format!("jpeg encode: {e}"))
    };
    match image.channels {
        1 => {
            let buf = image::GrayImage::from_raw(
                image.width as u32,
                image.height as u32,
                image.data.clone(),
            )
            .ok_or_else(|| {
                ForensicsError::CompressionAnalysis("gray buffer shape mismatch".into())
            })?;
            encoder.encode_image(&buf).map_err(err_map)?;
        }
        _ => {
            let buf = image::RgbImage::from_raw(
                image.width as u32,
                image.height as u32,
                image.data.clone(),
            )
            .ok_or_else(|| {
                ForensicsError::CompressionAnalysis("rgb buffer shape mismatch".into())
            })?;
            encoder.encode_image(&buf).map_err(err_map)?;
        }
    }
    Ok(encoded)
}

fn decode_jpeg(bytes: &[u8], channels: usize) -> Result<ImageBuffer> {
    let dynamic = image::load_from_memory(bytes)
        .map_err(|e| ForensicsError::CompressionAnalysis(format!("jpeg decode: {e}")))?;
    let (width, height) = (dynamic.width() as usize, dynamic.height() as usize);
    let (channels, data) = match channels {
        1 => (1, dynamic.into_luma8().into_raw()),
        _ => (3, dynamic.into_rgb8().into_raw()),
    };
    ImageBuffer::new(width, height, channels, data)
}

// ─── Recompression spectrum ────────────────────────────────────────

/// Double JPEG compression leaves periodic peaks in the spectrum.
///
/// The plane is not transformed at native resolution. It is resampled to
/// a fixed power-of-two size first, which keeps the radix-2 FFT cost
/// bounded and the window spread comparable across input sizes, and then
/// zero-meaned, because the DC bin otherwise dominates the spread on
/// every input regardless of content. The score is the spread of the
/// magnitudes in the window around DC.
fn recompression_pattern(gray: &GrayImage) -> f64 {
    let plane = ops::resample_area(gray, SPECTRUM_SIZE, SPECTRUM_SIZE);
    let mean = plane.data.iter().map(|&v| v as f64).sum::<f64>() / plane.data.len() as f64;
    let centered: Vec<f32> = plane.data.iter().map(|&v| v - mean as f32).collect();
    let spectrum = dct::fft2(&centered, SPECTRUM_SIZE);
    let window = dct::center_window_magnitudes(&spectrum, SPECTRUM_SIZE, SPECTRUM_WINDOW_HALF);
    (stats::std_dev(&window) / SPECTRUM_NORMALIZER).clamp(0.0, 1.0)
}

// ─── Grid boundary energy ──────────────────────────────────────────

/// Mean gradient magnitude sampled along every 8th row and column, where
/// JPEG block seams fall.
fn boundary_energy(gray: &GrayImage) -> f64 {
    let (gx, gy) = ops::sobel(gray);
    let mag = ops::gradient_magnitude(&gx, &gy);
    let mut sum = 0.0f64;
    let mut count = 0usize;
    let mut y = BLOCK;
    while y < gray.height {
        for x in 0..gray.width {
            sum += mag.at(x, y) as f64;
            count += 1;
        }
        y += BLOCK;
    }
    let mut x = BLOCK;
    while x < gray.width {
        for y in 0..gray.height {
            sum += mag.at(x, y) as f64;
            count += 1;
        }
        x += BLOCK;
    }
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64 / BOUNDARY_NORMALIZER).clamp(0.0, 1.0)
}

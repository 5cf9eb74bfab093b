//! Copy-move (cloning) forgery detection.
//!
//! Harris-response keypoints with mean-normalized patch descriptors are
//! self-matched across the image; a consistent geometric transform among
//! the surviving pairs (RANSAC homography) means one region was duplicated
//! elsewhere. Large images are tiled with overlap so matching cost stays
//! bounded; per-tile detections are mapped back to global coordinates.
//!
//! All randomness is a seeded xorshift, so repeated runs on the same
//! buffer are bit-identical.

use super::SuspiciousRegion;
use crate::pixels::{ops, GrayImage};
use crate::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const MAX_KEYPOINTS: usize = 1200;
const DESCRIPTOR_RADIUS: usize = 4; // 8x8 patch
const MATCH_DISTANCE_MAX: f32 = 50.0;
const MIN_SPATIAL_DISTANCE: f32 = 10.0;
const RANSAC_ITERATIONS: usize = 512;
const REPROJECTION_THRESHOLD: f64 = 5.0;
const INLIER_NORMALIZER: f64 = 20.0;
const TILE_PIXEL_THRESHOLD: usize = 2_000_000;
const TILE_SIZE: usize = 1024;
const TILE_OVERLAP: usize = 128;
const RANSAC_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Result of one copy-move pass.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CopyMoveOutcome {
    /// `min(1, inliers / 20)`; tiled images use `(max + mean) / 2` across
    /// tiles.
    pub score: f64,
    pub regions: Vec<SuspiciousRegion>,
    pub keypoints: usize,
    pub candidate_pairs: usize,
    pub inliers: usize,
    pub tiled: bool,
}

/// Detect cloned regions in a grayscale plane.
pub fn detect(gray: &GrayImage) -> Result<CopyMoveOutcome> {
    if gray.pixel_count() > TILE_PIXEL_THRESHOLD {
        detect_tiled(gray)
    } else {
        detect_plane(gray, 0, 0)
    }
}

/// Whole-image matching is superlinear in keypoint count, so large images
/// run per-tile with enough overlap that features spanning a boundary are
/// seen by at least one tile.
fn detect_tiled(gray: &GrayImage) -> Result<CopyMoveOutcome> {
    let step = TILE_SIZE - TILE_OVERLAP;
    let mut origins: Vec<(usize, usize)> = Vec::new();
    let mut y = 0;
    loop {
        let ty = y.min(gray.height.saturating_sub(TILE_SIZE));
        let mut x = 0;
        loop {
            let tx = x.min(gray.width.saturating_sub(TILE_SIZE));
            origins.push((tx, ty));
            if x + TILE_SIZE >= gray.width {
                break;
            }
            x += step;
        }
        if y + TILE_SIZE >= gray.height {
            break;
        }
        y += step;
    }
    origins.dedup();

    tracing::debug!("copy-move: tiling {}x{} into {} tiles", gray.width, gray.height, origins.len());

    let outcomes: Vec<Result<CopyMoveOutcome>> = origins
        .par_iter()
        .map(|&(tx, ty)| {
            let tile = gray.crop(tx, ty, TILE_SIZE, TILE_SIZE);
            detect_plane(&tile, tx, ty)
        })
        .collect();

    let mut merged = CopyMoveOutcome { tiled: true, ..Default::default() };
    let mut scores = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let o = outcome?;
        scores.push(o.score);
        merged.keypoints += o.keypoints;
        merged.candidate_pairs += o.candidate_pairs;
        merged.inliers = merged.inliers.max(o.inliers);
        merged.regions.extend(o.regions);
    }
    let max = scores.iter().cloned().fold(0.0f64, f64::max);
    let mean = if scores.is_empty() { 0.0 } else { scores.iter().sum::<f64>() / scores.len() as f64 };
    merged.score = ((max + mean) / 2.0).min(1.0);
    Ok(merged)
}

/// Single-plane detection; `off_x`/`off_y` translate reported regions into
/// global coordinates when the plane is a tile.
fn detect_plane(gray: &GrayImage, off_x: usize, off_y: usize) -> Result<CopyMoveOutcome> {
    let keypoints = harris_keypoints(gray);
    if keypoints.len() < 8 {
        return Ok(CopyMoveOutcome { keypoints: keypoints.len(), ..Default::default() });
    }

    let (points, descriptors) = extract_descriptors(gray, &keypoints);
    let pairs = match_descriptors(&points, &descriptors);
    if pairs.len() < 4 {
        return Ok(CopyMoveOutcome {
            keypoints: points.len(),
            candidate_pairs: pairs.len(),
            ..Default::default()
        });
    }

    let correspondences: Vec<((f64, f64), (f64, f64))> = pairs
        .iter()
        .map(|&(a, b)| {
            let pa = (points[a].0 as f64, points[a].1 as f64);
            let pb = (points[b].0 as f64, points[b].1 as f64);
            // Orient each pair canonically (scan order) so a single clone
            // produces one consistent transform direction.
            if (pa.1, pa.0) <= (pb.1, pb.0) {
                (pa, pb)
            } else {
                (pb, pa)
            }
        })
        .collect();

    let (inliers, mask) = ransac_homography(&correspondences);
    let score = (inliers as f64 / INLIER_NORMALIZER).min(1.0);

    let mut regions = Vec::new();
    if inliers >= 4 {
        let srcs: Vec<(f64, f64)> = correspondences
            .iter()
            .zip(mask.iter())
            .filter(|(_, &m)| m)
            .map(|(c, _)| c.0)
            .collect();
        let dsts: Vec<(f64, f64)> = correspondences
            .iter()
            .zip(mask.iter())
            .filter(|(_, &m)| m)
            .map(|(c, _)| c.1)
            .collect();
        for cloud in [srcs, dsts] {
            if let Some(region) = bounding_region(&cloud, score, off_x, off_y) {
                regions.push(region);
            }
        }
    }

    Ok(CopyMoveOutcome {
        score,
        regions,
        keypoints: points.len(),
        candidate_pairs: pairs.len(),
        inliers,
        tiled: false,
    })
}

fn bounding_region(
    cloud: &[(f64, f64)],
    score: f64,
    off_x: usize,
    off_y: usize,
) -> Option<SuspiciousRegion> {
    if cloud.is_empty() {
        return None;
    }
    let min_x = cloud.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = cloud.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = cloud.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = cloud.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    Some(SuspiciousRegion {
        x: min_x as usize + off_x,
        y: min_y as usize + off_y,
        width: (max_x - min_x).max(1.0) as usize,
        height: (max_y - min_y).max(1.0) as usize,
        score,
        mean_error: 0.0,
        max_error: 0.0,
    })
}

// ─── Keypoints ─────────────────────────────────────────────────────

/// Harris corner response: strongest local maxima, capped to bound the
/// quadratic matching cost.
fn harris_keypoints(gray: &GrayImage) -> Vec<(usize, usize, f32)> {
    let (w, h) = (gray.width, gray.height);
    if w < 2 * DESCRIPTOR_RADIUS + 1 || h < 2 * DESCRIPTOR_RADIUS + 1 {
        return Vec::new();
    }
    let (gx, gy) = ops::sobel(gray);
    let mut ixx = GrayImage::new(w, h);
    let mut iyy = GrayImage::new(w, h);
    let mut ixy = GrayImage::new(w, h);
    for i in 0..w * h {
        let x = gx.data[i];
        let y = gy.data[i];
        ixx.data[i] = x * x;
        iyy.data[i] = y * y;
        ixy.data[i] = x * y;
    }
    let ixx = ops::gaussian_blur(&ixx, 1.0);
    let iyy = ops::gaussian_blur(&iyy, 1.0);
    let ixy = ops::gaussian_blur(&ixy, 1.0);

    let mut response = GrayImage::new(w, h);
    let mut max_r = 0.0f32;
    for i in 0..w * h {
        let det = ixx.data[i] * iyy.data[i] - ixy.data[i] * ixy.data[i];
        let trace = ixx.data[i] + iyy.data[i];
        let r = det - 0.04 * trace * trace;
        response.data[i] = r;
        max_r = max_r.max(r);
    }
    if max_r <= 1e-6 {
        return Vec::new();
    }
    let threshold = 0.01 * max_r;

    let margin = DESCRIPTOR_RADIUS;
    let mut keypoints = Vec::new();
    for y in margin..h - margin {
        for x in margin..w - margin {
            let r = response.at(x, y);
            if r < threshold {
                continue;
            }
            // 3x3 local maximum.
            let mut is_max = true;
            'nms: for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    if response.at_clamped(x as isize + dx, y as isize + dy) > r {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                keypoints.push((x, y, r));
            }
        }
    }
    keypoints.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    keypoints.truncate(MAX_KEYPOINTS);
    keypoints
}

// ─── Descriptors & matching ────────────────────────────────────────

/// Mean-normalized 8×8 intensity patches around each keypoint.
fn extract_descriptors(
    gray: &GrayImage,
    keypoints: &[(usize, usize, f32)],
) -> (Vec<(usize, usize)>, Vec<[f32; 64]>) {
    let mut points = Vec::with_capacity(keypoints.len());
    let mut descriptors = Vec::with_capacity(keypoints.len());
    for &(x, y, _) in keypoints {
        let mut desc = [0.0f32; 64];
        let mut sum = 0.0f32;
        let mut i = 0;
        for dy in 0..8usize {
            for dx in 0..8usize {
                let sx = x + dx - DESCRIPTOR_RADIUS;
                let sy = y + dy - DESCRIPTOR_RADIUS;
                let v = gray.at(sx, sy);
                desc[i] = v;
                sum += v;
                i += 1;
            }
        }
        let mean = sum / 64.0;
        for v in &mut desc {
            *v -= mean;
        }
        points.push((x, y));
        descriptors.push(desc);
    }
    (points, descriptors)
}

/// Brute-force self-matching (k-NN with k=3): for each descriptor, the
/// zero-distance self-match is skipped by construction, pairs closer than
/// 10 px spatially are ignored, and the next-best neighbor survives only
/// under the distance cutoff. Pairs are deduplicated as unordered.
fn match_descriptors(points: &[(usize, usize)], descriptors: &[[f32; 64]]) -> Vec<(usize, usize)> {
    let max_sq = MATCH_DISTANCE_MAX * MATCH_DISTANCE_MAX;
    let min_spatial_sq = MIN_SPATIAL_DISTANCE * MIN_SPATIAL_DISTANCE;

    let mut pairs: Vec<(usize, usize)> = (0..descriptors.len())
        .into_par_iter()
        .filter_map(|i| {
            let (xi, yi) = points[i];
            let mut best = f32::INFINITY;
            let mut best_j = usize::MAX;
            for j in 0..descriptors.len() {
                if j == i {
                    continue;
                }
                let (xj, yj) = points[j];
                let dx = xi as f32 - xj as f32;
                let dy = yi as f32 - yj as f32;
                if dx * dx + dy * dy < min_spatial_sq {
                    continue;
                }
                let mut dist_sq = 0.0f32;
                for k in 0..64 {
                    let d = descriptors[i][k] - descriptors[j][k];
                    dist_sq += d * d;
                    if dist_sq > best {
                        break;
                    }
                }
                if dist_sq < best {
                    best = dist_sq;
                    best_j = j;
                }
            }
            if best_j != usize::MAX && best < max_sq {
                Some((i.min(best_j), i.max(best_j)))
            } else {
                None
            }
        })
        .collect();
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

// ─── RANSAC homography ─────────────────────────────────────────────

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// RANSAC over candidate correspondences: 4-point DLT homography,
/// reprojection threshold 5 px. Returns the best inlier count and mask.
fn ransac_homography(pairs: &[((f64, f64), (f64, f64))]) -> (usize, Vec<bool>) {
    if pairs.len() < 4 {
        return (0, vec![false; pairs.len()]);
    }
    let mut rng = XorShift64::new(RANSAC_SEED);
    let mut best_count = 0usize;
    let mut best_mask = vec![false; pairs.len()];

    for _ in 0..RANSAC_ITERATIONS {
        // Sample 4 distinct correspondences.
        let mut idx = [0usize; 4];
        let mut filled = 0;
        let mut guard = 0;
        while filled < 4 && guard < 64 {
            let candidate = rng.next_below(pairs.len());
            if !idx[..filled].contains(&candidate) {
                idx[filled] = candidate;
                filled += 1;
            }
            guard += 1;
        }
        if filled < 4 {
            break;
        }
        let sample: Vec<((f64, f64), (f64, f64))> = idx.iter().map(|&i| pairs[i]).collect();
        let h = match solve_homography(&sample) {
            Some(h) => h,
            None => continue,
        };

        let mut mask = vec![false; pairs.len()];
        let mut count = 0usize;
        for (i, &(src, dst)) in pairs.iter().enumerate() {
            if let Some((px, py)) = project(&h, src) {
                let dx = px - dst.0;
                let dy = py - dst.1;
                if (dx * dx + dy * dy).sqrt() < REPROJECTION_THRESHOLD {
                    mask[i] = true;
                    count += 1;
                }
            }
        }
        if count > best_count {
            best_count = count;
            best_mask = mask;
        }
    }
    (best_count, best_mask)
}

/// Direct linear transform on exactly 4 correspondences, fixing `h33 = 1`.
/// Returns `None` for degenerate configurations.
fn solve_homography(sample: &[((f64, f64), (f64, f64))]) -> Option<[f64; 9]> {
    debug_assert_eq!(sample.len(), 4);
    let mut a = [[0.0f64; 9]; 8]; // augmented: 8 unknowns + rhs
    for (k, &((x, y), (u, v))) in sample.iter().enumerate() {
        a[2 * k] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
        a[2 * k + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
    }
    // Gaussian elimination with partial pivoting.
    for col in 0..8 {
        let mut pivot = col;
        for row in col + 1..8 {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot);
        for row in col + 1..8 {
            let factor = a[row][col] / a[col][col];
            for c in col..9 {
                a[row][c] -= factor * a[col][c];
            }
        }
    }
    let mut h = [0.0f64; 9];
    h[8] = 1.0;
    for row in (0..8).rev() {
        let mut acc = a[row][8];
        for c in row + 1..8 {
            acc -= a[row][c] * h[c];
        }
        h[row] = acc / a[row][row];
    }
    Some(h)
}

fn project(h: &[f64; 9], p: (f64, f64)) -> Option<(f64, f64)> {
    let w = h[6] * p.0 + h[7] * p.1 + h[8];
    if w.abs() < 1e-9 {
        return None;
    }
    Some((
        (h[0] * p.0 + h[1] * p.1 + h[2]) / w,
        (h[3] * p.0 + h[4] * p.1 + h[5]) / w,
    ))
}

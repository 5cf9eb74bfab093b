//! Low-level raster operations: filtering, edge detection, labeling,
//! thresholding, morphology, and resampling.
//!
//! Everything here works on [`GrayImage`] float planes with clamped borders
//! and is deterministic given identical input.

use super::GrayImage;

/// Symmetric 1-D Gaussian kernel, radius `ceil(3*sigma)`, normalized.
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    let denom = 2.0 * sigma * sigma;
    for i in 0..=(2 * radius) {
        let d = i as f32 - radius as f32;
        kernel.push((-d * d / denom).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with clamped borders.
pub fn gaussian_blur(src: &GrayImage, sigma: f32) -> GrayImage {
    let kernel = gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    let (w, h) = (src.width, src.height);

    // Horizontal pass.
    let mut tmp = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (i, &k) in kernel.iter().enumerate() {
                let sx = x as isize + i as isize - radius as isize;
                acc += k * src.at_clamped(sx, y as isize);
            }
            tmp.set(x, y, acc);
        }
    }
    // Vertical pass.
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (i, &k) in kernel.iter().enumerate() {
                let sy = y as isize + i as isize - radius as isize;
                acc += k * tmp.at_clamped(x as isize, sy);
            }
            out.set(x, y, acc);
        }
    }
    out
}

/// Sobel gradients: returns `(gx, gy)`.
pub fn sobel(src: &GrayImage) -> (GrayImage, GrayImage) {
    let (w, h) = (src.width, src.height);
    let mut gx = GrayImage::new(w, h);
    let mut gy = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            let tl = src.at_clamped(xi - 1, yi - 1);
            let tc = src.at_clamped(xi, yi - 1);
            let tr = src.at_clamped(xi + 1, yi - 1);
            let ml = src.at_clamped(xi - 1, yi);
            let mr = src.at_clamped(xi + 1, yi);
            let bl = src.at_clamped(xi - 1, yi + 1);
            let bc = src.at_clamped(xi, yi + 1);
            let br = src.at_clamped(xi + 1, yi + 1);
            gx.set(x, y, (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl));
            gy.set(x, y, (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr));
        }
    }
    (gx, gy)
}

pub fn gradient_magnitude(gx: &GrayImage, gy: &GrayImage) -> GrayImage {
    let data = gx
        .data
        .iter()
        .zip(gy.data.iter())
        .map(|(&a, &b)| (a * a + b * b).sqrt())
        .collect();
    GrayImage::from_vec(gx.width, gx.height, data)
}

/// 4-neighbor Laplacian response.
pub fn laplacian(src: &GrayImage) -> GrayImage {
    let (w, h) = (src.width, src.height);
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            let v = src.at_clamped(xi, yi - 1)
                + src.at_clamped(xi - 1, yi)
                + src.at_clamped(xi + 1, yi)
                + src.at_clamped(xi, yi + 1)
                - 4.0 * src.at(x, y);
            out.set(x, y, v);
        }
    }
    out
}

/// Canny-equivalent edge detector: Gaussian smoothing, Sobel gradients,
/// non-maximum suppression, double threshold with hysteresis.
/// Returns a row-major binary edge mask.
pub fn canny(src: &GrayImage, low: f32, high: f32) -> Vec<bool> {
    let (w, h) = (src.width, src.height);
    let smoothed = gaussian_blur(src, 1.4);
    let (gx, gy) = sobel(&smoothed);
    let mag = gradient_magnitude(&gx, &gy);

    // Non-maximum suppression along the quantized gradient direction.
    let mut thin = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let m = mag.at(x, y);
            if m <= 0.0 {
                continue;
            }
            let angle = gy.at(x, y).atan2(gx.at(x, y)).to_degrees();
            let angle = if angle < 0.0 { angle + 180.0 } else { angle };
            let (xi, yi) = (x as isize, y as isize);
            let (n1, n2) = if !(22.5..157.5).contains(&angle) {
                (mag.at_clamped(xi - 1, yi), mag.at_clamped(xi + 1, yi))
            } else if angle < 67.5 {
                (mag.at_clamped(xi + 1, yi - 1), mag.at_clamped(xi - 1, yi + 1))
            } else if angle < 112.5 {
                (mag.at_clamped(xi, yi - 1), mag.at_clamped(xi, yi + 1))
            } else {
                (mag.at_clamped(xi - 1, yi - 1), mag.at_clamped(xi + 1, yi + 1))
            };
            if m >= n1 && m >= n2 {
                thin[y * w + x] = m;
            }
        }
    }

    // Hysteresis: strong pixels seed a flood fill across weak pixels.
    let mut edges = vec![false; w * h];
    let mut stack: Vec<usize> = Vec::new();
    for (i, &m) in thin.iter().enumerate() {
        if m >= high && !edges[i] {
            edges[i] = true;
            stack.push(i);
            while let Some(idx) = stack.pop() {
                let (cx, cy) = (idx % w, idx / w);
                for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        let nx = cx as isize + dx;
                        let ny = cy as isize + dy;
                        if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                            continue;
                        }
                        let ni = ny as usize * w + nx as usize;
                        if !edges[ni] && thin[ni] >= low {
                            edges[ni] = true;
                            stack.push(ni);
                        }
                    }
                }
            }
        }
    }
    edges
}

/// Bounding box and pixel count of one connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentBox {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize, // inclusive
    pub y1: usize, // inclusive
    pub area: usize,
}

impl ComponentBox {
    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }
}

/// 8-connected component labeling over a binary mask.
/// Returns per-component bounding boxes with pixel counts.
pub fn connected_components(mask: &[bool], w: usize, h: usize) -> Vec<ComponentBox> {
    let mut visited = vec![false; w * h];
    let mut boxes = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    for start in 0..w * h {
        if !mask[start] || visited[start] {
            continue;
        }
        let mut comp = ComponentBox {
            x0: start % w,
            y0: start / w,
            x1: start % w,
            y1: start / w,
            area: 0,
        };
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (cx, cy) = (idx % w, idx / w);
            comp.area += 1;
            comp.x0 = comp.x0.min(cx);
            comp.y0 = comp.y0.min(cy);
            comp.x1 = comp.x1.max(cx);
            comp.y1 = comp.y1.max(cy);
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let nx = cx as isize + dx;
                    let ny = cy as isize + dy;
                    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                        continue;
                    }
                    let ni = ny as usize * w + nx as usize;
                    if mask[ni] && !visited[ni] {
                        visited[ni] = true;
                        stack.push(ni);
                    }
                }
            }
        }
        boxes.push(comp);
    }
    boxes
}

/// Adaptive mean threshold: true where `pixel < local_mean - offset`
/// (dark-on-light text). Local mean uses an integral image over a
/// `window × window` neighborhood.
pub fn adaptive_threshold(src: &GrayImage, window: usize, offset: f32) -> Vec<bool> {
    let (w, h) = (src.width, src.height);
    let half = (window / 2) as isize;

    // Integral image with one extra row/column of zeros.
    let mut integral = vec![0.0f64; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0.0f64;
        for x in 0..w {
            row_sum += src.at(x, y) as f64;
            integral[(y + 1) * (w + 1) + (x + 1)] = integral[y * (w + 1) + (x + 1)] + row_sum;
        }
    }
    let area_sum = |x0: usize, y0: usize, x1: usize, y1: usize| -> f64 {
        integral[y1 * (w + 1) + x1] - integral[y0 * (w + 1) + x1] - integral[y1 * (w + 1) + x0]
            + integral[y0 * (w + 1) + x0]
    };

    let mut mask = vec![false; w * h];
    for y in 0..h {
        for x in 0..w {
            let x0 = (x as isize - half).max(0) as usize;
            let y0 = (y as isize - half).max(0) as usize;
            let x1 = (x as isize + half + 1).min(w as isize) as usize;
            let y1 = (y as isize + half + 1).min(h as isize) as usize;
            let n = ((x1 - x0) * (y1 - y0)) as f64;
            let local_mean = area_sum(x0, y0, x1, y1) / n;
            mask[y * w + x] = (src.at(x, y) as f64) < local_mean - offset as f64;
        }
    }
    mask
}

fn dilate3x3(mask: &[bool], w: usize, h: usize) -> Vec<bool> {
    let mut out = vec![false; w * h];
    for y in 0..h {
        for x in 0..w {
            'probe: for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let nx = x as isize + dx;
                    let ny = y as isize + dy;
                    if nx >= 0 && ny >= 0 && nx < w as isize && ny < h as isize {
                        if mask[ny as usize * w + nx as usize] {
                            out[y * w + x] = true;
                            break 'probe;
                        }
                    }
                }
            }
        }
    }
    out
}

fn erode3x3(mask: &[bool], w: usize, h: usize) -> Vec<bool> {
    let mut out = vec![true; w * h];
    for y in 0..h {
        for x in 0..w {
            'probe: for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let nx = x as isize + dx;
                    let ny = y as isize + dy;
                    let on = if nx >= 0 && ny >= 0 && nx < w as isize && ny < h as isize {
                        mask[ny as usize * w + nx as usize]
                    } else {
                        false
                    };
                    if !on {
                        out[y * w + x] = false;
                        break 'probe;
                    }
                }
            }
        }
    }
    out
}

/// Morphological closing (3×3 dilate then erode). Bridges small gaps in
/// a binary mask before labeling.
pub fn morph_close(mask: &[bool], w: usize, h: usize) -> Vec<bool> {
    erode3x3(&dilate3x3(mask, w, h), w, h)
}

/// Two-pass city-block distance transform: distance from each true pixel to
/// the nearest false pixel. False pixels get 0; mask borders count as
/// background.
pub fn distance_transform(mask: &[bool], w: usize, h: usize) -> Vec<f32> {
    let inf = (w + h) as f32 + 1.0;
    let mut dist = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if !mask[i] {
                continue;
            }
            let left = if x > 0 { dist[i - 1] } else { 0.0 };
            let up = if y > 0 { dist[i - w] } else { 0.0 };
            dist[i] = (left.min(up) + 1.0).min(inf);
        }
    }
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            let i = y * w + x;
            if !mask[i] {
                continue;
            }
            let right = if x + 1 < w { dist[i + 1] } else { 0.0 };
            let down = if y + 1 < h { dist[i + w] } else { 0.0 };
            dist[i] = dist[i].min(right.min(down) + 1.0);
        }
    }
    dist
}

/// Histogram equalization over 8-bit values, used to make ELA difference
/// maps visible.
pub fn equalize_hist(values: &[u8]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut hist = [0usize; 256];
    for &v in values {
        hist[v as usize] += 1;
    }
    let mut cdf = [0usize; 256];
    let mut acc = 0usize;
    for (i, &c) in hist.iter().enumerate() {
        acc += c;
        cdf[i] = acc;
    }
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let total = values.len();
    let denom = (total - cdf_min).max(1) as f64;
    values
        .iter()
        .map(|&v| (((cdf[v as usize] - cdf_min) as f64 / denom) * 255.0).round() as u8)
        .collect()
}

/// Area-average resampling to an exact target size.
pub fn resample_area(src: &GrayImage, new_w: usize, new_h: usize) -> GrayImage {
    let mut out = GrayImage::new(new_w, new_h);
    let sx = src.width as f64 / new_w as f64;
    let sy = src.height as f64 / new_h as f64;
    for dy in 0..new_h {
        let y0 = (dy as f64 * sy).floor() as usize;
        let y1 = (((dy + 1) as f64 * sy).ceil() as usize).min(src.height).max(y0 + 1);
        for dx in 0..new_w {
            let x0 = (dx as f64 * sx).floor() as usize;
            let x1 = (((dx + 1) as f64 * sx).ceil() as usize).min(src.width).max(x0 + 1);
            let mut acc = 0.0f64;
            for y in y0..y1 {
                for x in x0..x1 {
                    acc += src.at(x, y) as f64;
                }
            }
            out.set(dx, dy, (acc / ((y1 - y0) * (x1 - x0)) as f64) as f32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_image(w: usize, h: usize) -> GrayImage {
        // Left half dark, right half bright.
        let mut img = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.set(x, y, if x < w / 2 { 20.0 } else { 220.0 });
            }
        }
        img
    }

    #[test]
    fn test_gaussian_blur_preserves_constant() {
        let img = GrayImage::from_vec(16, 16, vec![77.0; 256]);
        let out = gaussian_blur(&img, 1.4);
        assert!(out.data.iter().all(|&v| (v - 77.0).abs() < 0.01));
    }

    #[test]
    fn test_sobel_on_vertical_step() {
        let img = step_image(32, 32);
        let (gx, gy) = sobel(&img);
        // Strong horizontal gradient at the step, none vertically.
        assert!(gx.at(16, 16).abs() > 100.0);
        assert!(gy.at(16, 16).abs() < 1.0);
    }

    #[test]
    fn test_laplacian_zero_on_flat() {
        let img = GrayImage::from_vec(8, 8, vec![42.0; 64]);
        let lap = laplacian(&img);
        assert!(lap.data.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_canny_finds_step_edge() {
        let img = step_image(64, 64);
        let edges = canny(&img, 50.0, 150.0);
        let count = edges.iter().filter(|&&e| e).count();
        assert!(count > 32, "expected a vertical edge line, got {count} pixels");
        // Edge pixels cluster around the step column.
        for (i, &on) in edges.iter().enumerate() {
            if on {
                let x = i % 64;
                assert!((28..=36).contains(&x), "stray edge pixel at column {x}");
            }
        }
    }

    #[test]
    fn test_canny_empty_on_flat() {
        let img = GrayImage::from_vec(32, 32, vec![128.0; 1024]);
        let edges = canny(&img, 50.0, 150.0);
        assert!(edges.iter().all(|&e| !e));
    }

    #[test]
    fn test_connected_components_counts_and_boxes() {
        let w = 8;
        let h = 4;
        let mut mask = vec![false; w * h];
        // Two components: a 2x2 block and an isolated pixel.
        for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
            mask[y * w + x] = true;
        }
        mask[3 * w + 6] = true;
        let comps = connected_components(&mask, w, h);
        assert_eq!(comps.len(), 2);
        let big = comps.iter().find(|c| c.area == 4).expect("2x2 block");
        assert_eq!((big.x0, big.y0, big.x1, big.y1), (1, 1, 2, 2));
        assert!(comps.iter().any(|c| c.area == 1));
    }

    #[test]
    fn test_diagonal_pixels_are_one_component() {
        let w = 4;
        let mut mask = vec![false; 16];
        mask[0] = true; // (0,0)
        mask[5] = true; // (1,1)
        let comps = connected_components(&mask, w, 4);
        assert_eq!(comps.len(), 1, "8-connectivity joins diagonals");
    }

    #[test]
    fn test_adaptive_threshold_finds_dark_square() {
        let mut img = GrayImage::from_vec(32, 32, vec![200.0; 1024]);
        for y in 12..20 {
            for x in 12..20 {
                img.set(x, y, 40.0);
            }
        }
        let mask = adaptive_threshold(&img, 15, 10.0);
        assert!(mask[15 * 32 + 15], "center of dark square must be marked");
        assert!(!mask[2 * 32 + 2], "flat background must not be marked");
    }

    #[test]
    fn test_morph_close_bridges_one_pixel_gap() {
        let w = 9;
        let mut mask = vec![false; w * 3];
        mask[w + 2] = true;
        mask[w + 4] = true; // gap at x=3
        let closed = morph_close(&mask, w, 3);
        assert!(closed[w + 3], "closing should bridge the single-pixel gap");
    }

    #[test]
    fn test_distance_transform_peak_at_center() {
        let w = 9;
        let h = 9;
        let mut mask = vec![false; w * h];
        for y in 2..7 {
            for x in 2..7 {
                mask[y * w + x] = true;
            }
        }
        let dist = distance_transform(&mask, w, h);
        assert_eq!(dist[4 * w + 4], 3.0, "center of 5x5 square");
        assert_eq!(dist[2 * w + 2], 1.0, "corner touches background");
        assert_eq!(dist[0], 0.0);
    }

    #[test]
    fn test_equalize_hist_spreads_range() {
        let values: Vec<u8> = (0..256).map(|i| if i < 128 { 100 } else { 110 }).collect();
        let eq = equalize_hist(&values);
        assert!(eq.contains(&255));
        let lo = eq.iter().min().unwrap();
        assert!(*lo < 10);
    }

    #[test]
    fn test_resample_area_constant() {
        let img = GrayImage::from_vec(100, 60, vec![55.0; 6000]);
        let out = resample_area(&img, 32, 32);
        assert_eq!((out.width, out.height), (32, 32));
        assert!(out.data.iter().all(|&v| (v - 55.0).abs() < 0.01));
    }
}

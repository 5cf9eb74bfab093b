//! Frequency-domain transforms: the 8×8 forward DCT used for block
//! artifact scoring and a radix-2 FFT for the recompression spectrum.
//!
//! Both are table-driven and fully deterministic; the DCT basis matches
//! the JPEG convention (orthonormal, DC at index 0).

use once_cell::sync::Lazy;

/// `COS_TABLE[u][x] = alpha(u) * cos((2x + 1) * u * PI / 16)`.
static COS_TABLE: Lazy<[[f32; 8]; 8]> = Lazy::new(|| {
    let mut table = [[0.0f32; 8]; 8];
    for (u, row) in table.iter_mut().enumerate() {
        let alpha = if u == 0 { (1.0f64 / 8.0).sqrt() } else { (2.0f64 / 8.0).sqrt() };
        for (x, cell) in row.iter_mut().enumerate() {
            let angle = ((2 * x + 1) as f64) * (u as f64) * std::f64::consts::PI / 16.0;
            *cell = (alpha * angle.cos()) as f32;
        }
    }
    table
});

/// Forward 8×8 DCT-II of a row-major block. Output is row-major with the
/// DC coefficient at `[0]`.
pub fn dct_8x8(block: &[f32; 64]) -> [f32; 64] {
    let table = &*COS_TABLE;
    // Rows first.
    let mut rows = [0.0f32; 64];
    for y in 0..8 {
        for u in 0..8 {
            let mut acc = 0.0f32;
            for x in 0..8 {
                acc += table[u][x] * block[y * 8 + x];
            }
            rows[y * 8 + u] = acc;
        }
    }
    // Then columns.
    let mut out = [0.0f32; 64];
    for v in 0..8 {
        for u in 0..8 {
            let mut acc = 0.0f32;
            for y in 0..8 {
                acc += table[v][y] * rows[y * 8 + u];
            }
            out[v * 8 + u] = acc;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub re: f32,
    pub im: f32,
}

impl Complex {
    pub const ZERO: Complex = Complex { re: 0.0, im: 0.0 };

    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    pub fn magnitude(&self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }

    fn mul(self, other: Complex) -> Complex {
        Complex {
            re: self.re * other.re - self.im * other.im,
            im: self.re * other.im + self.im * other.re,
        }
    }

    fn add(self, other: Complex) -> Complex {
        Complex { re: self.re + other.re, im: self.im + other.im }
    }

    fn sub(self, other: Complex) -> Complex {
        Complex { re: self.re - other.re, im: self.im - other.im }
    }
}

/// In-place iterative radix-2 Cooley–Tukey FFT. `buf.len()` must be a
/// power of two.
pub fn fft(buf: &mut [Complex]) {
    let n = buf.len();
    debug_assert!(n.is_power_of_two());
    if n <= 1 {
        return;
    }

    // Bit-reversal permutation.
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = (i.reverse_bits() >> (usize::BITS - bits)) as usize;
        if j > i {
            buf.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * std::f64::consts::PI / len as f64;
        let w_len = Complex::new(angle.cos() as f32, angle.sin() as f32);
        for chunk in buf.chunks_mut(len) {
            let mut w = Complex::new(1.0, 0.0);
            for i in 0..len / 2 {
                let a = chunk[i];
                let b = chunk[i + len / 2].mul(w);
                chunk[i] = a.add(b);
                chunk[i + len / 2] = a.sub(b);
                w = w.mul(w_len);
            }
        }
        len <<= 1;
    }
}

/// 2-D FFT of an `n × n` real plane (`n` a power of two): rows, then
/// columns. Returns the full complex spectrum, row-major.
pub fn fft2(plane: &[f32], n: usize) -> Vec<Complex> {
    debug_assert_eq!(plane.len(), n * n);
    let mut spec: Vec<Complex> = plane.iter().map(|&v| Complex::new(v, 0.0)).collect();

    let mut row = vec![Complex::ZERO; n];
    for y in 0..n {
        row.copy_from_slice(&spec[y * n..(y + 1) * n]);
        fft(&mut row);
        spec[y * n..(y + 1) * n].copy_from_slice(&row);
    }
    let mut col = vec![Complex::ZERO; n];
    for x in 0..n {
        for y in 0..n {
            col[y] = spec[y * n + x];
        }
        fft(&mut col);
        for y in 0..n {
            spec[y * n + x] = col[y];
        }
    }
    spec
}

/// Magnitudes of the `(2*half + 1)²` window centered on the zero-frequency
/// bin after an fftshift (DC moved to `(n/2, n/2)`).
pub fn center_window_magnitudes(spec: &[Complex], n: usize, half: usize) -> Vec<f64> {
    let center = n / 2;
    let mut out = Vec::with_capacity((2 * half + 1) * (2 * half + 1));
    for dy in -(half as isize)..=(half as isize) {
        for dx in -(half as isize)..=(half as isize) {
            // Shifted coordinate (center + d) maps back to ((center + d) + n/2) % n
            // in the unshifted spectrum, which simplifies to d mod n.
            let sy = (center as isize + dy).rem_euclid(n as isize) as usize;
            let sx = (center as isize + dx).rem_euclid(n as isize) as usize;
            let uy = (sy + n / 2) % n;
            let ux = (sx + n / 2) % n;
            out.push(spec[uy * n + ux].magnitude() as f64);
        }
    }
    out
}

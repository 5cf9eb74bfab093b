//! Pixel buffers shared by every analysis stage.
//!
//! [`ImageBuffer`] is the engine's input contract: decoded 8-bit pixels,
//! row-major, interleaved channels. Workers never see the caller's buffer —
//! each job receives its own owned copy, so no aliasing crosses the job
//! boundary. [`GrayImage`] is the internal float plane the numeric stages
//! operate on.

pub mod dct;
pub mod ops;
pub mod stats;

use crate::{ForensicsError, Result};
use serde::{Deserialize, Serialize};

/// Decoded 8-bit image: `height × width × channels`, row-major.
///
/// Channels: 1 = grayscale, 3 = RGB. Upstream file handling owns download
/// and format normalization; this type only validates shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBuffer {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u8>) -> Result<Self> {
        let buf = Self { width, height, channels, data };
        buf.validate()?;
        Ok(buf)
    }

    /// Single-channel convenience constructor.
    pub fn from_gray(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 1, data)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn max_dimension(&self) -> usize {
        self.width.max(self.height)
    }

    /// Shape check. A failure here is a logic bug upstream (the caller
    /// already decoded the image), so it surfaces as `InvalidInput` rather
    /// than entering the failure-tier policy.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ForensicsError::InvalidInput(format!(
                "empty image buffer ({}x{})",
                self.width, self.height
            )));
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(ForensicsError::InvalidInput(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        let expected = self.width * self.height * self.channels;
        if self.data.len() != expected {
            return Err(ForensicsError::InvalidInput(format!(
                "buffer length {} does not match {}x{}x{} = {}",
                self.data.len(),
                self.width,
                self.height,
                self.channels,
                expected
            )));
        }
        Ok(())
    }

    /// ITU-R BT.601 luma conversion into a float plane.
    pub fn to_gray(&self) -> GrayImage {
        let mut data = Vec::with_capacity(self.pixel_count());
        match self.channels {
            1 => data.extend(self.data.iter().map(|&v| v as f32)),
            _ => {
                for px in self.data.chunks_exact(self.channels) {
                    let luma =
                        0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                    data.push(luma);
                }
            }
        }
        GrayImage { width: self.width, height: self.height, data }
    }

    /// Downscale with area-averaging interpolation so that
    /// `max(width, height) <= max_dim`. Returns an unchanged clone when the
    /// image is already within bounds.
    pub fn downscale_area(&self, max_dim: usize) -> ImageBuffer {
        let largest = self.max_dimension();
        if largest <= max_dim || max_dim == 0 {
            return self.clone();
        }
        let scale = max_dim as f64 / largest as f64;
        let new_w = ((self.width as f64 * scale).round() as usize).max(1);
        let new_h = ((self.height as f64 * scale).round() as usize).max(1);

        let mut out = vec![0u8; new_w * new_h * self.channels];
        let sx = self.width as f64 / new_w as f64;
        let sy = self.height as f64 / new_h as f64;
        for dy in 0..new_h {
            let y0 = (dy as f64 * sy).floor() as usize;
            let y1 = (((dy + 1) as f64 * sy).ceil() as usize).min(self.height).max(y0 + 1);
            for dx in 0..new_w {
                let x0 = (dx as f64 * sx).floor() as usize;
                let x1 = (((dx + 1) as f64 * sx).ceil() as usize).min(self.width).max(x0 + 1);
                let area = ((y1 - y0) * (x1 - x0)) as f64;
                for c in 0..self.channels {
                    let mut acc = 0.0f64;
                    for sy_i in y0..y1 {
                        let row = (sy_i * self.width + x0) * self.channels + c;
                        for i in 0..(x1 - x0) {
                            acc += self.data[row + i * self.channels] as f64;
                        }
                    }
                    out[(dy * new_w + dx) * self.channels + c] =
                        (acc / area).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        ImageBuffer { width: new_w, height: new_h, channels: self.channels, data: out }
    }
}

/// Float grayscale plane used by the numeric stages.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, data: vec![0.0; width * height] }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self { width, height, data }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    /// Clamped sample, used by convolution borders.
    #[inline]
    pub fn at_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.at(x, y)
    }

    pub fn crop(&self, x: usize, y: usize, w: usize, h: usize) -> GrayImage {
        let w = w.min(self.width.saturating_sub(x));
        let h = h.min(self.height.saturating_sub(y));
        let mut data = Vec::with_capacity(w * h);
        for row in y..y + h {
            let start = row * self.width + x;
            data.extend_from_slice(&self.data[start..start + w]);
        }
        GrayImage { width: w, height: h, data }
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{PrismError, PrismResult};
use crate::params::RenderTargetSpec;

/// Pixel format of a frame or texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA (4 bytes per pixel).
    Rgba8,
    /// 8-bit RGB (3 bytes per pixel, no alpha).
    Rgb8,
    /// 32-bit float RGBA (16 bytes per pixel).
    Rgba32F,
    /// 32-bit float RGB (12 bytes per pixel, no alpha).
    Rgb32F,
}

impl PixelFormat {
    /// Number of color channels.
    pub fn channel_count(&self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Rgba32F => 4,
            PixelFormat::Rgb8 | PixelFormat::Rgb32F => 3,
        }
    }

    /// Bytes used by a single channel.
    pub fn bytes_per_channel(&self) -> usize {
        if self.is_float() {
            4
        } else {
            1
        }
    }

    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(&self) -> usize {
        self.channel_count() * self.bytes_per_channel()
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelFormat::Rgba8 | PixelFormat::Rgba32F)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PixelFormat::Rgba32F | PixelFormat::Rgb32F)
    }

    /// The float format with the same channel layout.
    pub fn to_float(&self) -> PixelFormat {
        if self.has_alpha() {
            PixelFormat::Rgba32F
        } else {
            PixelFormat::Rgb32F
        }
    }
}

/// An exact ratio, used for sample (pixel) aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const ONE: Rational = Rational { num: 1, den: 1 };

    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Floating-point value; a zero denominator yields 0.0.
    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0 || self.den == 0
    }

    pub fn is_one(&self) -> bool {
        self.den != 0 && self.num == self.den
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational::ONE
    }
}

/// A CPU-resident video frame.
///
/// Rows may be padded: `linesize_pixels` is the distance between two rows in
/// pixels and is never smaller than `width`.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    linesize_pixels: u32,
    sample_aspect_ratio: Rational,
}

impl Frame {
    /// Create a tightly packed frame filled with zeros (transparent black).
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            data: vec![0u8; size],
            width,
            height,
            format,
            linesize_pixels: width,
            sample_aspect_ratio: Rational::ONE,
        }
    }

    /// Create a zeroed frame whose rows are `linesize_pixels` apart.
    pub fn with_linesize(
        width: u32,
        height: u32,
        format: PixelFormat,
        linesize_pixels: u32,
    ) -> PrismResult<Self> {
        if linesize_pixels < width {
            return Err(PrismError::InvalidFrame(format!(
                "linesize {} smaller than width {}",
                linesize_pixels, width
            )));
        }
        let size = (linesize_pixels as usize) * (height as usize) * format.bytes_per_pixel();
        Ok(Self {
            data: vec![0u8; size],
            width,
            height,
            format,
            linesize_pixels,
            sample_aspect_ratio: Rational::ONE,
        })
    }

    /// Create an RGBA8 frame filled with a solid color.
    pub fn solid(width: u32, height: u32, color: &crate::Color) -> Self {
        let pixel = color.to_rgba8();
        let pixel_count = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            data.extend_from_slice(&pixel);
        }
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgba8,
            linesize_pixels: width,
            sample_aspect_ratio: Rational::ONE,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn linesize_pixels(&self) -> u32 {
        self.linesize_pixels
    }

    pub fn linesize_bytes(&self) -> usize {
        self.linesize_pixels as usize * self.format.bytes_per_pixel()
    }

    pub fn sample_aspect_ratio(&self) -> Rational {
        self.sample_aspect_ratio
    }

    pub fn set_sample_aspect_ratio(&mut self, ratio: Rational) {
        self.sample_aspect_ratio = ratio;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The render-target shape of this frame at full resolution.
    pub fn spec(&self) -> RenderTargetSpec {
        RenderTargetSpec::new(self.width, self.height, self.format)
    }

    /// Total number of visible pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Visible bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.linesize_bytes();
        &self.data[start..start + self.width as usize * self.format.bytes_per_pixel()]
    }

    /// Mutable visible bytes of row `y`, without padding.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.linesize_bytes();
        let len = self.width as usize * self.format.bytes_per_pixel();
        &mut self.data[start..start + len]
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.linesize_bytes() + x as usize * self.format.bytes_per_pixel()
    }

    /// Read a pixel as normalized RGBA. Formats without alpha read as opaque.
    pub fn read_pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let mut out = [0.0, 0.0, 0.0, 1.0];
        for (c, value) in out.iter_mut().enumerate().take(self.format.channel_count()) {
            *value = if self.format.is_float() {
                let at = offset + c * 4;
                f32::from_ne_bytes([
                    self.data[at],
                    self.data[at + 1],
                    self.data[at + 2],
                    self.data[at + 3],
                ])
            } else {
                self.data[offset + c] as f32 / 255.0
            };
        }
        Some(out)
    }

    /// Write a normalized RGBA pixel. No-op if out of bounds.
    pub fn write_pixel(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = self.offset(x, y);
        for (c, value) in rgba.iter().enumerate().take(self.format.channel_count()) {
            if self.format.is_float() {
                let at = offset + c * 4;
                self.data[at..at + 4].copy_from_slice(&value.to_ne_bytes());
            } else {
                self.data[offset + c] = (value * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    /// Read a pixel quantized to 8-bit RGBA.
    pub fn get_rgba8(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.read_pixel(x, y)
            .map(|p| p.map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8))
    }

    /// Return a tightly packed copy of this frame in another pixel format.
    pub fn convert(&self, format: PixelFormat) -> Frame {
        let mut out = Frame::new(self.width, self.height, format);
        out.sample_aspect_ratio = self.sample_aspect_ratio;
        if format == self.format {
            for y in 0..self.height {
                out.row_mut(y).copy_from_slice(self.row(y));
            }
            return out;
        }
        for y in 0..self.height {
            for x in 0..self.width {
                if let Some(p) = self.read_pixel(x, y) {
                    out.write_pixel(x, y, p);
                }
            }
        }
        out
    }

    fn require_float_alpha(&self, op: &str) -> PrismResult<()> {
        if !self.format.is_float() || !self.format.has_alpha() {
            return Err(PrismError::UnsupportedConversion(format!(
                "{} requires a float RGBA frame, got {:?}",
                op, self.format
            )));
        }
        Ok(())
    }

    fn map_pixels(&mut self, f: impl Fn([f32; 4]) -> [f32; 4]) {
        for y in 0..self.height {
            for x in 0..self.width {
                if let Some(p) = self.read_pixel(x, y) {
                    self.write_pixel(x, y, f(p));
                }
            }
        }
    }

    /// Multiply color by alpha (straight → premultiplied).
    pub fn associate_alpha(&mut self) -> PrismResult<()> {
        self.require_float_alpha("associate_alpha")?;
        self.map_pixels(|[r, g, b, a]| [r * a, g * a, b * a, a]);
        Ok(())
    }

    /// Divide color by alpha (premultiplied → straight). Zero-alpha pixels are left as is.
    pub fn disassociate_alpha(&mut self) -> PrismResult<()> {
        self.require_float_alpha("disassociate_alpha")?;
        self.map_pixels(|[r, g, b, a]| {
            if a > 0.0 {
                [r / a, g / a, b / a, a]
            } else {
                [r, g, b, a]
            }
        });
        Ok(())
    }

    /// Undo [`Frame::disassociate_alpha`]. Zero-alpha pixels are left as is.
    pub fn reassociate_alpha(&mut self) -> PrismResult<()> {
        self.require_float_alpha("reassociate_alpha")?;
        self.map_pixels(|[r, g, b, a]| {
            if a > 0.0 {
                [r * a, g * a, b * a, a]
            } else {
                [r, g, b, a]
            }
        });
        Ok(())
    }
}

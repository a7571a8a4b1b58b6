use serde::{Deserialize, Serialize};

use crate::frame::PixelFormat;

/// The GPU shape of a render target: nominal size, pixel format and
/// resolution divider.
///
/// Compared structurally; two equal specs describe interchangeable textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderTargetSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Factor by which the working resolution is reduced (1 = full resolution).
    pub divider: u32,
}

impl RenderTargetSpec {
    /// A full-resolution spec.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            divider: 1,
        }
    }

    /// Same spec at a reduced (proxy) resolution. A divider of 0 is treated as 1.
    pub fn with_divider(mut self, divider: u32) -> Self {
        self.divider = divider.max(1);
        self
    }

    /// Same shape in another pixel format.
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Width of the texture actually allocated for this spec.
    pub fn effective_width(&self) -> u32 {
        (self.width / self.divider.max(1)).max(1)
    }

    /// Height of the texture actually allocated for this spec.
    pub fn effective_height(&self) -> u32 {
        (self.height / self.divider.max(1)).max(1)
    }
}

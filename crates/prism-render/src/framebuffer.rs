use tracing::trace;

use crate::device::GraphicsDevice;
use crate::error::RenderResult;
use crate::texture_cache::TextureHandle;

/// The engine's single render-target attachment point.
///
/// Writes go through [`Framebuffer::render_into`], which runs attach, bind,
/// clear, viewport, the caller's draw, release and detach in that order.
/// Readback goes through [`Framebuffer::read_from`], which skips the clear.
/// Both always leave the framebuffer detached.
#[derive(Debug, Default)]
pub struct Framebuffer {
    destroyed: bool,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear `target` to transparent black, then draw into it.
    pub fn render_into<D, F, T>(
        &mut self,
        device: &mut D,
        target: &TextureHandle,
        draw: F,
    ) -> RenderResult<T>
    where
        D: GraphicsDevice + ?Sized,
        F: FnOnce(&mut D) -> RenderResult<T>,
    {
        self.attached(device, target, true, draw)
    }

    /// Attach `target` with its contents intact, for readback.
    pub fn read_from<D, F, T>(
        &mut self,
        device: &mut D,
        target: &TextureHandle,
        read: F,
    ) -> RenderResult<T>
    where
        D: GraphicsDevice + ?Sized,
        F: FnOnce(&mut D) -> RenderResult<T>,
    {
        self.attached(device, target, false, read)
    }

    fn attached<D, F, T>(
        &mut self,
        device: &mut D,
        target: &TextureHandle,
        clear: bool,
        f: F,
    ) -> RenderResult<T>
    where
        D: GraphicsDevice + ?Sized,
        F: FnOnce(&mut D) -> RenderResult<T>,
    {
        trace!(texture = target.texture().0, clear, "attach framebuffer");
        device.attach_framebuffer(target.texture());
        device.bind_framebuffer();
        device.set_viewport(target.width(), target.height());

        let result = if clear {
            device.clear_framebuffer().and_then(|()| f(device))
        } else {
            f(device)
        };

        device.release_framebuffer();
        device.detach_framebuffer();
        result
    }

    /// Release the attachment point. Safe to call more than once.
    pub fn destroy<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        if !self.destroyed {
            device.release_framebuffer();
            device.detach_framebuffer();
            self.destroyed = true;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::error::RenderError;
    use crate::texture_cache::TextureCache;
    use prism_core::{PixelFormat, RenderTargetSpec};
    use std::sync::Arc;

    #[test]
    fn test_detaches_even_when_draw_fails() {
        let mut device = SoftwareDevice::new(Arc::new(Default::default()));
        let cache = TextureCache::new(None);
        let target = cache
            .get(&mut device, RenderTargetSpec::new(2, 2, PixelFormat::Rgba8))
            .unwrap();
        let mut framebuffer = Framebuffer::new();

        let result: RenderResult<()> = framebuffer.render_into(&mut device, &target, |_| {
            Err(RenderError::Device("boom".into()))
        });
        assert!(result.is_err());

        let mut frame = prism_core::Frame::new(2, 2, PixelFormat::Rgba8);
        assert!(device.read_pixels(&mut frame).is_err());
    }

    #[test]
    fn test_render_clears_but_read_keeps_contents() {
        let mut device = SoftwareDevice::new(Arc::new(Default::default()));
        let cache = TextureCache::new(None);
        let target = cache
            .get(&mut device, RenderTargetSpec::new(2, 2, PixelFormat::Rgba8))
            .unwrap();
        device
            .upload_texture(
                target.texture(),
                &prism_core::Frame::solid(2, 2, &prism_core::Color::RED),
            )
            .unwrap();
        let mut framebuffer = Framebuffer::new();

        let mut frame = prism_core::Frame::new(2, 2, PixelFormat::Rgba8);
        framebuffer
            .read_from(&mut device, &target, |device| device.read_pixels(&mut frame))
            .unwrap();
        assert_eq!(frame.get_rgba8(1, 1), Some([255, 0, 0, 255]));

        framebuffer
            .render_into(&mut device, &target, |_| Ok(()))
            .unwrap();
        framebuffer
            .read_from(&mut device, &target, |device| device.read_pixels(&mut frame))
            .unwrap();
        assert_eq!(frame.get_rgba8(1, 1), Some([0, 0, 0, 0]));
        assert_eq!(device.stats().clears, 1);
    }
}

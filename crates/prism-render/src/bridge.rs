//! Moving pixels between CPU frames and GPU textures.

use prism_core::math::IDENTITY;
use prism_core::{Frame, Matrix4, RenderTargetSpec, Rational};
use tracing::{debug, trace};

use crate::color::{ColorMethod, ColorProcessor, StreamInfo};
use crate::device::{set_named_uniform, GraphicsDevice, ProgramId, UniformValue};
use crate::error::RenderResult;
use crate::framebuffer::Framebuffer;
use crate::texture_cache::{TextureCache, TextureHandle};

/// Frame size with non-square pixels made square.
///
/// Only one side grows: wide pixels widen the frame, tall pixels heighten it.
/// A ratio of 1, 0 or below leaves the size as is.
pub fn corrected_dimensions(width: u32, height: u32, ratio: Rational) -> (u32, u32) {
    let r = ratio.to_f64();
    if r <= 0.0 || ratio.is_one() {
        return (width, height);
    }
    if r > 1.0 {
        ((width as f64 * r).round() as u32, height)
    } else {
        (width, (height as f64 / r).round() as u32)
    }
}

/// Borrowed engine state needed to move pixels.
pub(crate) struct Bridge<'a, D: GraphicsDevice> {
    pub device: &'a mut D,
    pub textures: &'a TextureCache,
    pub framebuffer: &'a mut Framebuffer,
    pub copy_program: ProgramId,
}

impl<'a, D: GraphicsDevice> Bridge<'a, D> {
    /// Upload `frame` and bring it into the reference colorspace.
    ///
    /// `processor` must be present unless `method` is `Disabled`.
    pub fn upload(
        self,
        frame: &Frame,
        stream: &StreamInfo,
        target: &RenderTargetSpec,
        method: ColorMethod,
        processor: Option<&mut dyn ColorProcessor>,
    ) -> RenderResult<TextureHandle> {
        match (method, processor) {
            (ColorMethod::Accurate, Some(processor)) => {
                let mut working = frame.convert(frame.format().to_float());
                let has_alpha = working.format().has_alpha();
                if has_alpha && stream.premultiplied_alpha {
                    working.disassociate_alpha()?;
                }
                processor.convert_on_cpu(&mut working)?;
                if has_alpha {
                    if stream.premultiplied_alpha {
                        working.reassociate_alpha()?;
                    } else {
                        working.associate_alpha()?;
                    }
                }
                self.upload_raw(&working)
            }
            (ColorMethod::Fast, Some(processor)) => {
                let source = self.textures.get_for_frame(self.device, frame)?;
                if !processor.is_enabled_on_gpu() {
                    debug!(colorspace = %stream.colorspace, "enabling color processor on gpu");
                    processor.enable_on_gpu(self.device, stream.premultiplied_alpha)?;
                }

                let (width, height) =
                    corrected_dimensions(frame.width(), frame.height(), frame.sample_aspect_ratio());
                let dest = self
                    .textures
                    .get(self.device, RenderTargetSpec::new(width, height, target.format))?;

                self.device.bind_texture(0, Some(source.texture()));
                let result = self
                    .framebuffer
                    .render_into(self.device, &dest, |device| processor.execute_on_gpu(device));
                self.device.bind_texture(0, None);
                result?;
                Ok(dest)
            }
            _ => self.upload_raw(frame),
        }
    }

    /// Upload `frame` as is, then square its pixels if needed.
    pub fn upload_raw(self, frame: &Frame) -> RenderResult<TextureHandle> {
        let handle = self.textures.get_for_frame(self.device, frame)?;
        let (width, height) =
            corrected_dimensions(frame.width(), frame.height(), frame.sample_aspect_ratio());
        if (width, height) == (handle.width(), handle.height()) {
            return Ok(handle);
        }

        trace!(width, height, "stretching upload to square pixels");
        let dest = self
            .textures
            .get(self.device, RenderTargetSpec::new(width, height, handle.spec().format))?;
        blit(self.device, self.framebuffer, self.copy_program, &handle, &dest, &IDENTITY)?;
        Ok(dest)
    }

    /// Read `texture` into `frame`, resizing through the copy program when
    /// the sizes differ. Nothing happens without a texture.
    pub fn download(
        self,
        texture: Option<&TextureHandle>,
        frame: &mut Frame,
        matrix: &Matrix4,
    ) -> RenderResult<()> {
        let Some(texture) = texture else {
            return Ok(());
        };

        let resized;
        let source = if (texture.width(), texture.height()) != (frame.width(), frame.height()) {
            trace!(
                from = ?(texture.width(), texture.height()),
                to = ?(frame.width(), frame.height()),
                "resizing texture for download"
            );
            resized = self.textures.get(self.device, frame.spec())?;
            blit(self.device, self.framebuffer, self.copy_program, texture, &resized, matrix)?;
            &resized
        } else {
            texture
        };

        self.framebuffer
            .read_from(self.device, source, |device| device.read_pixels(frame))
    }
}

/// Draw `source` into `dest` through the copy program.
fn blit<D: GraphicsDevice>(
    device: &mut D,
    framebuffer: &mut Framebuffer,
    copy_program: ProgramId,
    source: &TextureHandle,
    dest: &TextureHandle,
    matrix: &Matrix4,
) -> RenderResult<()> {
    device.bind_program(copy_program);
    set_named_uniform(device, copy_program, "ove_mvpmat", UniformValue::Mat4(*matrix));
    set_named_uniform(device, copy_program, "ove_maintex", UniformValue::Int(0));
    device.bind_texture(0, Some(source.texture()));

    let result = framebuffer.render_into(device, dest, |device| device.draw_fullscreen());

    device.bind_texture(0, None);
    device.release_program();
    result
}

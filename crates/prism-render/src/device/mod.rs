//! The native graphics API boundary.
//!
//! The engine talks to the GPU only through [`GraphicsDevice`], a small
//! OpenGL-shaped surface: textures, a single framebuffer attachment point,
//! numbered texture units, and programs whose uniforms are addressed by name.
//! Two implementations ship with the crate: [`wgpu_backend`] for real GPUs and
//! [`software`], a CPU reference rasterizer used by tests and headless hosts.

pub mod reflect;
pub mod software;
pub mod wgpu_backend;

use prism_core::{Frame, Matrix4, PixelFormat};

use crate::error::RenderResult;

/// Device-local handle of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Device-local handle of a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

/// A live uniform slot inside one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// A value written into a uniform slot.
///
/// Texture uniforms take an `Int` holding the texture unit to sample from.
/// Backends convert between scalar kinds to match the declared uniform type.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec2Array(Vec<[f32; 2]>),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4(Matrix4),
}

impl UniformValue {
    /// Flattened scalar components, in declaration order.
    pub fn components(&self) -> Vec<f64> {
        match self {
            UniformValue::Int(v) => vec![*v as f64],
            UniformValue::Float(v) => vec![*v as f64],
            UniformValue::Bool(v) => vec![if *v { 1.0 } else { 0.0 }],
            UniformValue::Vec2(v) => v.iter().map(|c| *c as f64).collect(),
            UniformValue::Vec2Array(v) => v.iter().flatten().map(|c| *c as f64).collect(),
            UniformValue::Vec3(v) => v.iter().map(|c| *c as f64).collect(),
            UniformValue::Vec4(v) => v.iter().map(|c| *c as f64).collect(),
            UniformValue::Mat4(m) => m.iter().flatten().map(|c| *c as f64).collect(),
        }
    }
}

/// An exclusive, current graphics context and its function table.
///
/// All calls are synchronous. Texture units, the bound program and the
/// framebuffer attachment are device-global state: callers bind, draw and
/// unbind in one uninterrupted sequence.
pub trait GraphicsDevice {
    fn backend_name(&self) -> &'static str;

    /// Vertex stage used when a node supplies none. Emits a full-screen
    /// quad with texture coordinates.
    fn default_vertex_source(&self) -> &'static str;

    /// Fragment stage used when a node supplies none. Samples `ove_maintex`.
    fn default_fragment_source(&self) -> &'static str;

    /// Vertex stage of the copy program: the default quad transformed by the
    /// `ove_mvpmat` uniform.
    fn copy_vertex_source(&self) -> &'static str;

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> RenderResult<TextureId>;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Replace the contents of `texture` with `frame`, honoring its row stride.
    fn upload_texture(&mut self, texture: TextureId, frame: &Frame) -> RenderResult<()>;

    /// Compile both stages and link them. Fails with
    /// [`RenderError::ShaderCompile`](crate::RenderError::ShaderCompile).
    fn compile_program(&mut self, vertex: &str, fragment: &str) -> RenderResult<ProgramId>;

    fn destroy_program(&mut self, program: ProgramId);

    /// Location of a uniform the program actually declares.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: UniformValue);

    fn bind_program(&mut self, program: ProgramId);

    fn release_program(&mut self);

    /// Bind `texture` (or nothing) to a texture unit.
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);

    fn attach_framebuffer(&mut self, texture: TextureId);

    fn bind_framebuffer(&mut self);

    fn release_framebuffer(&mut self);

    fn detach_framebuffer(&mut self);

    fn set_viewport(&mut self, width: u32, height: u32);

    /// Fill the whole bound framebuffer with transparent black.
    fn clear_framebuffer(&mut self) -> RenderResult<()>;

    /// Run the bound program over the viewport of the bound framebuffer.
    fn draw_fullscreen(&mut self) -> RenderResult<()>;

    /// Read the bound framebuffer into `frame`, honoring its row stride.
    fn read_pixels(&mut self, frame: &mut Frame) -> RenderResult<()>;
}

/// A created but not yet current context.
///
/// Created on a control thread, then moved to the worker that will own it.
pub trait NativeContext: Send + 'static {
    type Device: GraphicsDevice;

    /// Make the context current on the calling thread and capture its
    /// function table.
    fn make_current(self) -> RenderResult<Self::Device>;
}

/// Factory for native contexts.
pub trait GraphicsBackend {
    type Context: NativeContext;

    fn create_context(&self) -> RenderResult<Self::Context>;
}

/// Convenience to set a uniform only if the program declares it.
pub(crate) fn set_named_uniform<D: GraphicsDevice + ?Sized>(
    device: &mut D,
    program: ProgramId,
    name: &str,
    value: UniformValue,
) -> bool {
    match device.uniform_location(program, name) {
        Some(location) => {
            device.set_uniform(program, location, value);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_flatten_in_order() {
        assert_eq!(UniformValue::Bool(true).components(), vec![1.0]);
        assert_eq!(
            UniformValue::Vec2Array(vec![[1.0, 2.0], [3.0, 4.0]]).components(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(UniformValue::Mat4(prism_core::math::IDENTITY).components().len(), 16);
    }
}

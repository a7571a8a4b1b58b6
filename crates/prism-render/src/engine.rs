//! The render engine façade.
//!
//! One engine owns one context, framebuffer, texture cache, shader cache and
//! color cache. Build it in two steps: [`PendingEngine::initialize`] on the
//! control thread, then [`PendingEngine::finalize`] on the worker that will
//! render. The finalized engine is pinned to that worker.

use prism_core::{EngineConfig, Frame, Matrix4, RenderTargetSpec, TimeRange};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::color::{ColorCache, ColorManager, ColorMethod, RenderMode, StreamInfo};
use crate::context::{PendingContext, RenderContext};
use crate::device::{GraphicsBackend, GraphicsDevice, NativeContext, ProgramId};
use crate::error::{RenderError, RenderResult};
use crate::framebuffer::Framebuffer;
use crate::node::{InputTable, NodeValue, ShaderNode};
use crate::pass::{PassExecutor, PassRequest};
use crate::shader_cache::ShaderCache;
use crate::texture_cache::{TextureCache, TextureCacheStats};

/// An engine whose context exists but is not yet current.
pub struct PendingEngine<C: NativeContext> {
    context: PendingContext<C>,
    config: EngineConfig,
}

impl<C: NativeContext> PendingEngine<C> {
    /// Create the native context. Failure means the engine must not be used.
    pub fn initialize<B>(backend: &B, config: EngineConfig) -> RenderResult<Self>
    where
        B: GraphicsBackend<Context = C>,
    {
        Ok(Self {
            context: PendingContext::initialize(backend)?,
            config,
        })
    }

    /// Make the context current on this thread and prepare the copy program.
    ///
    /// Never fails: a context that cannot be made current yields an engine
    /// whose every operation returns [`RenderError::NotReady`].
    pub fn finalize(self) -> RenderEngine<C::Device> {
        let mut engine = RenderEngine {
            context: self.context.finalize(),
            framebuffer: Framebuffer::new(),
            textures: TextureCache::new(self.config.cache.max_idle_textures_per_spec),
            shaders: ShaderCache::new(),
            colors: ColorCache::new(),
            copy_program: None,
            config: self.config,
        };

        let failure = match engine.context.device_mut() {
            Ok(device) => {
                let copy_vertex = device.copy_vertex_source();
                match engine.shaders.get_or_compile_source(device, copy_vertex, "") {
                    Ok(program) => {
                        engine.copy_program = Some(program.id());
                        info!(backend = device.backend_name(), "render engine ready");
                        None
                    }
                    Err(err) => Some(err),
                }
            }
            Err(_) => None,
        };
        if let Some(err) = failure {
            warn!("failed to build copy program: {err}");
            engine.context.close();
        }
        engine
    }
}

/// Renders graph nodes on one graphics context.
pub struct RenderEngine<D: GraphicsDevice> {
    context: RenderContext<D>,
    framebuffer: Framebuffer,
    textures: TextureCache,
    shaders: ShaderCache,
    colors: ColorCache,
    copy_program: Option<ProgramId>,
    config: EngineConfig,
}

impl<D: GraphicsDevice> RenderEngine<D> {
    pub fn is_ready(&self) -> bool {
        self.context.is_ready() && self.copy_program.is_some()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> RenderResult<&D> {
        self.context.device()
    }

    pub fn device_mut(&mut self) -> RenderResult<&mut D> {
        self.context.device_mut()
    }

    fn copy_program(&self) -> RenderResult<ProgramId> {
        self.copy_program.ok_or(RenderError::NotReady)
    }

    /// Render `node` into a fresh texture of `target`'s shape.
    pub fn render_node(
        &mut self,
        node: &dyn ShaderNode,
        inputs: &InputTable,
        range: TimeRange,
        target: &RenderTargetSpec,
    ) -> RenderResult<NodeValue> {
        self.copy_program()?;
        let device = self.context.device_mut()?;
        let request = PassRequest {
            node,
            inputs,
            range,
            target: *target,
        };
        PassExecutor {
            device,
            shaders: &mut self.shaders,
            textures: &self.textures,
            framebuffer: &mut self.framebuffer,
        }
        .run(&request)
    }

    /// Upload a decoded frame, converting it into the reference colorspace.
    ///
    /// `target` supplies the pixel format of the result when the transform
    /// runs on the GPU.
    pub fn frame_to_value(
        &mut self,
        frame: &Frame,
        stream: &StreamInfo,
        target: &RenderTargetSpec,
        mode: RenderMode,
        manager: &dyn ColorManager,
    ) -> RenderResult<NodeValue> {
        let copy_program = self.copy_program()?;
        let device = self.context.device_mut()?;
        let method = ColorMethod::for_mode(mode, self.config.color.method);
        let processor = match method {
            ColorMethod::Disabled => None,
            _ => Some(self.colors.resolve(manager, stream)?),
        };
        Bridge {
            device,
            textures: &self.textures,
            framebuffer: &mut self.framebuffer,
            copy_program,
        }
        .upload(frame, stream, target, method, processor)
        .map(NodeValue::from)
    }

    /// Upload a frame that is already in the reference colorspace.
    pub fn pre_cached_frame_to_value(&mut self, frame: &Frame) -> RenderResult<NodeValue> {
        self.copy_program()?;
        let device = self.context.device_mut()?;
        self.textures.get_for_frame(device, frame).map(NodeValue::from)
    }

    /// Read a rendered value back into `frame`.
    ///
    /// Values without a texture leave `frame` untouched. A texture of another
    /// size is first drawn at `frame`'s size through `matrix`.
    pub fn download(
        &mut self,
        value: &NodeValue,
        frame: &mut Frame,
        matrix: &Matrix4,
    ) -> RenderResult<()> {
        let copy_program = self.copy_program()?;
        let device = self.context.device_mut()?;
        Bridge {
            device,
            textures: &self.textures,
            framebuffer: &mut self.framebuffer,
            copy_program,
        }
        .download(value.texture(), frame, matrix)
    }

    /// Destroy idle textures beyond the configured limit.
    pub fn trim(&mut self) -> RenderResult<()> {
        let device = self.context.device_mut()?;
        self.textures.trim(device);
        Ok(())
    }

    pub fn texture_stats(&self) -> TextureCacheStats {
        self.textures.stats()
    }

    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shaders
    }

    pub fn color_cache(&self) -> &ColorCache {
        &self.colors
    }

    /// Release every GPU resource and the context. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.context.is_closed() {
            return;
        }
        if let Ok(device) = self.context.device_mut() {
            self.colors.clear(device);
            self.shaders.clear(device);
            self.textures.clear(device);
            self.framebuffer.destroy(device);
        }
        self.copy_program = None;
        self.context.close();
        debug!("render engine closed");
    }
}

impl<D: GraphicsDevice> Drop for RenderEngine<D> {
    fn drop(&mut self) {
        self.close();
    }
}

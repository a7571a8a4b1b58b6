//! CPU reference rasterizer.
//!
//! Programs are not compiled from text: the fragment source is looked up in a
//! [`SoftwareLibrary`] of registered kernels, so a node's generated source
//! selects a Rust closure that plays the role of its fragment shader. Sampling
//! is nearest-neighbour and every texel is stored as normalized RGBA, quantized
//! to the texture's pixel format on write.
//!
//! The device counts everything it does ([`DeviceStats`]) and records every
//! draw ([`DrawRecord`]) so callers can check pass behaviour without a GPU.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use prism_core::math::{invert_affine_2d, transform_point};
use prism_core::{Frame, PixelFormat};

use super::{
    GraphicsBackend, GraphicsDevice, NativeContext, ProgramId, TextureId, UniformLocation,
    UniformValue,
};
use crate::error::{RenderError, RenderResult};

pub const DEFAULT_VERTEX: &str = "prism-software:vertex:fullscreen";
pub const COPY_VERTEX: &str = "prism-software:vertex:copy(ove_mvpmat)";
pub const DEFAULT_FRAGMENT: &str = "prism-software:fragment:sample(ove_maintex)";

/// A fragment shader written in Rust.
pub type FragmentKernel = Arc<dyn Fn(&FragmentInput<'_>) -> [f32; 4] + Send + Sync>;

struct KernelEntry {
    uniforms: Vec<String>,
    kernel: FragmentKernel,
}

/// Registered fragment programs, keyed by their exact source text.
pub struct SoftwareLibrary {
    kernels: HashMap<String, KernelEntry>,
}

impl SoftwareLibrary {
    /// A library holding only the default fragment program.
    pub fn new() -> Self {
        let mut library = Self {
            kernels: HashMap::new(),
        };
        library.register(DEFAULT_FRAGMENT, &["ove_maintex"], |input| {
            input.sample("ove_maintex", input.uv())
        });
        library
    }

    /// Register `kernel` as the fragment program whose source is `source`.
    ///
    /// `uniforms` are the names the program declares; only those get a
    /// location.
    pub fn register<F>(&mut self, source: impl Into<String>, uniforms: &[&str], kernel: F)
    where
        F: Fn(&FragmentInput<'_>) -> [f32; 4] + Send + Sync + 'static,
    {
        self.kernels.insert(
            source.into(),
            KernelEntry {
                uniforms: uniforms.iter().map(|u| u.to_string()).collect(),
                kernel: Arc::new(kernel),
            },
        );
    }

    pub fn contains(&self, source: &str) -> bool {
        self.kernels.contains_key(source)
    }
}

impl Default for SoftwareLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates [`SoftwareContext`]s. Can be told to fail either init phase.
#[derive(Clone)]
pub struct SoftwareBackend {
    library: Arc<SoftwareLibrary>,
    creation_failure: Option<String>,
    bind_failure: Option<String>,
}

impl SoftwareBackend {
    pub fn new(library: SoftwareLibrary) -> Self {
        Self {
            library: Arc::new(library),
            creation_failure: None,
            bind_failure: None,
        }
    }

    /// Make `create_context` fail with `reason`.
    pub fn failing_creation(mut self, reason: impl Into<String>) -> Self {
        self.creation_failure = Some(reason.into());
        self
    }

    /// Make `make_current` fail with `reason`.
    pub fn failing_bind(mut self, reason: impl Into<String>) -> Self {
        self.bind_failure = Some(reason.into());
        self
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(SoftwareLibrary::new())
    }
}

impl GraphicsBackend for SoftwareBackend {
    type Context = SoftwareContext;

    fn create_context(&self) -> RenderResult<SoftwareContext> {
        if let Some(reason) = &self.creation_failure {
            return Err(RenderError::ContextCreation(reason.clone()));
        }
        Ok(SoftwareContext {
            library: Arc::clone(&self.library),
            bind_failure: self.bind_failure.clone(),
        })
    }
}

pub struct SoftwareContext {
    library: Arc<SoftwareLibrary>,
    bind_failure: Option<String>,
}

impl NativeContext for SoftwareContext {
    type Device = SoftwareDevice;

    fn make_current(self) -> RenderResult<SoftwareDevice> {
        if let Some(reason) = self.bind_failure {
            return Err(RenderError::ContextBind(reason));
        }
        Ok(SoftwareDevice::new(self.library))
    }
}

/// Counters kept by [`SoftwareDevice`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub programs_compiled: usize,
    pub programs_destroyed: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub uploads: usize,
    pub draws: usize,
    pub clears: usize,
    pub readbacks: usize,
}

/// One `draw_fullscreen` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub target: TextureId,
    /// Texture units bound at draw time.
    pub units: Vec<(u32, TextureId)>,
    /// Value of `ove_iteration`, if the program declares it.
    pub iteration: Option<i32>,
}

struct SoftwareTexture {
    width: u32,
    height: u32,
    format: PixelFormat,
    texels: Vec<[f32; 4]>,
}

impl SoftwareTexture {
    fn quantize(&self, [r, g, b, a]: [f32; 4]) -> [f32; 4] {
        let a = if self.format.has_alpha() { a } else { 1.0 };
        let texel = [r, g, b, a];
        if self.format.is_float() {
            return texel;
        }
        texel.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() / 255.0)
    }

    fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = ((uv[0] * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1);
        let y = ((uv[1] * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1);
        self.texels[y as usize * self.width as usize + x as usize]
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VertexStage {
    Fullscreen,
    Copy,
}

struct SoftwareProgram {
    vertex: VertexStage,
    uniforms: Vec<String>,
    values: HashMap<u32, UniformValue>,
    kernel: FragmentKernel,
}

/// What a fragment kernel sees for one pixel.
pub struct FragmentInput<'a> {
    uv: [f32; 2],
    pixel: [u32; 2],
    program: &'a SoftwareProgram,
    units: &'a BTreeMap<u32, TextureId>,
    textures: &'a HashMap<TextureId, SoftwareTexture>,
}

impl<'a> FragmentInput<'a> {
    /// Interpolated texture coordinate; (0, 0) is the top-left corner.
    pub fn uv(&self) -> [f32; 2] {
        self.uv
    }

    pub fn pixel(&self) -> [u32; 2] {
        self.pixel
    }

    pub fn uniform(&self, name: &str) -> Option<&'a UniformValue> {
        let index = self.program.uniforms.iter().position(|u| u == name)?;
        self.program.values.get(&(index as u32))
    }

    pub fn float(&self, name: &str) -> f32 {
        self.scalar(name) as f32
    }

    pub fn int(&self, name: &str) -> i32 {
        self.scalar(name) as i32
    }

    pub fn bool(&self, name: &str) -> bool {
        self.scalar(name) != 0.0
    }

    fn scalar(&self, name: &str) -> f64 {
        self.uniform(name)
            .and_then(|v| v.components().first().copied())
            .unwrap_or(0.0)
    }

    pub fn vec2(&self, name: &str) -> [f32; 2] {
        let c = self.uniform(name).map(|v| v.components()).unwrap_or_default();
        let at = |i: usize| c.get(i).copied().unwrap_or(0.0) as f32;
        [at(0), at(1)]
    }

    /// Nearest sample of the texture uniform `name` at `uv`. Unbound units
    /// read as transparent black.
    pub fn sample(&self, name: &str, uv: [f32; 2]) -> [f32; 4] {
        let unit = self.int(name);
        if unit < 0 {
            return [0.0; 4];
        }
        self.units
            .get(&(unit as u32))
            .and_then(|id| self.textures.get(id))
            .map(|t| t.sample(uv))
            .unwrap_or([0.0; 4])
    }
}

/// A [`GraphicsDevice`] that rasterizes on the CPU.
pub struct SoftwareDevice {
    library: Arc<SoftwareLibrary>,
    textures: HashMap<TextureId, SoftwareTexture>,
    programs: HashMap<ProgramId, SoftwareProgram>,
    next_id: u64,
    units: BTreeMap<u32, TextureId>,
    bound_program: Option<ProgramId>,
    attached: Option<TextureId>,
    framebuffer_bound: bool,
    viewport: (u32, u32),
    stats: DeviceStats,
    draw_log: Vec<DrawRecord>,
}

impl SoftwareDevice {
    pub fn new(library: Arc<SoftwareLibrary>) -> Self {
        Self {
            library,
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
            units: BTreeMap::new(),
            bound_program: None,
            attached: None,
            framebuffer_bound: false,
            viewport: (0, 0),
            stats: DeviceStats::default(),
            draw_log: Vec::new(),
        }
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn draw_log(&self) -> &[DrawRecord] {
        &self.draw_log
    }

    pub fn clear_draw_log(&mut self) {
        self.draw_log.clear();
    }

    /// Units that currently hold a texture, ascending.
    pub fn bound_units(&self) -> Vec<(u32, TextureId)> {
        self.units.iter().map(|(u, t)| (*u, *t)).collect()
    }

    pub fn bound_program(&self) -> Option<ProgramId> {
        self.bound_program
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Size of a live texture.
    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn target(&self) -> RenderResult<TextureId> {
        match (self.attached, self.framebuffer_bound) {
            (Some(texture), true) => Ok(texture),
            _ => Err(RenderError::Device("no framebuffer bound".into())),
        }
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn default_vertex_source(&self) -> &'static str {
        DEFAULT_VERTEX
    }

    fn default_fragment_source(&self) -> &'static str {
        DEFAULT_FRAGMENT
    }

    fn copy_vertex_source(&self) -> &'static str {
        COPY_VERTEX
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> RenderResult<TextureId> {
        if width == 0 || height == 0 {
            return Err(RenderError::Device(format!(
                "cannot create a {width}x{height} texture"
            )));
        }
        let id = TextureId(self.allocate_id());
        let black = if format.has_alpha() {
            [0.0; 4]
        } else {
            [0.0, 0.0, 0.0, 1.0]
        };
        self.textures.insert(
            id,
            SoftwareTexture {
                width,
                height,
                format,
                texels: vec![black; width as usize * height as usize],
            },
        );
        self.stats.textures_created += 1;
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.stats.textures_destroyed += 1;
        }
        self.units.retain(|_, bound| *bound != texture);
        if self.attached == Some(texture) {
            self.attached = None;
        }
    }

    fn upload_texture(&mut self, texture: TextureId, frame: &Frame) -> RenderResult<()> {
        let target = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {texture:?}")))?;
        if (target.width, target.height) != (frame.width(), frame.height()) {
            return Err(RenderError::Device(format!(
                "upload of {}x{} frame into {}x{} texture",
                frame.width(),
                frame.height(),
                target.width,
                target.height
            )));
        }
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                if let Some(p) = frame.read_pixel(x, y) {
                    let texel = target.quantize(p);
                    target.texels[(y * target.width + x) as usize] = texel;
                }
            }
        }
        self.stats.uploads += 1;
        Ok(())
    }

    fn compile_program(&mut self, vertex: &str, fragment: &str) -> RenderResult<ProgramId> {
        let stage = match vertex {
            DEFAULT_VERTEX => VertexStage::Fullscreen,
            COPY_VERTEX => VertexStage::Copy,
            other => {
                return Err(RenderError::ShaderCompile(format!(
                    "unknown vertex program `{other}`"
                )))
            }
        };
        let entry = self.library.kernels.get(fragment).ok_or_else(|| {
            RenderError::ShaderCompile(format!("no kernel registered for `{fragment}`"))
        })?;

        let mut uniforms = entry.uniforms.clone();
        if stage == VertexStage::Copy {
            uniforms.push("ove_mvpmat".to_string());
        }
        let program = SoftwareProgram {
            vertex: stage,
            uniforms,
            values: HashMap::new(),
            kernel: Arc::clone(&entry.kernel),
        };

        let id = ProgramId(self.allocate_id());
        self.programs.insert(id, program);
        self.stats.programs_compiled += 1;
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.stats.programs_destroyed += 1;
        }
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .uniforms
            .iter()
            .position(|u| u == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: UniformValue) {
        if let Some(program) = self.programs.get_mut(&program) {
            program.values.insert(location.0, value);
        }
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.bound_program = Some(program);
    }

    fn release_program(&mut self) {
        self.bound_program = None;
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(texture) => {
                self.units.insert(unit, texture);
            }
            None => {
                self.units.remove(&unit);
            }
        }
    }

    fn attach_framebuffer(&mut self, texture: TextureId) {
        self.attached = Some(texture);
    }

    fn bind_framebuffer(&mut self) {
        self.framebuffer_bound = true;
    }

    fn release_framebuffer(&mut self) {
        self.framebuffer_bound = false;
    }

    fn detach_framebuffer(&mut self) {
        self.attached = None;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn clear_framebuffer(&mut self) -> RenderResult<()> {
        let target_id = self.target()?;
        let target = self
            .textures
            .get_mut(&target_id)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {target_id:?}")))?;
        let clear = target.quantize([0.0; 4]);
        target.texels.fill(clear);
        self.stats.clears += 1;
        Ok(())
    }

    fn draw_fullscreen(&mut self) -> RenderResult<()> {
        let program_id = self
            .bound_program
            .ok_or_else(|| RenderError::Device("draw without a bound program".into()))?;
        let target_id = self.target()?;
        let program = self
            .programs
            .get(&program_id)
            .ok_or_else(|| RenderError::Device(format!("unknown program {program_id:?}")))?;
        let target = self
            .textures
            .get(&target_id)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {target_id:?}")))?;

        let width = self.viewport.0.min(target.width);
        let height = self.viewport.1.min(target.height);

        // Maps the pixel's clip-space position back onto the unit quad.
        let inverse_mvp = match program.vertex {
            VertexStage::Fullscreen => None,
            VertexStage::Copy => {
                let index = program.uniforms.iter().position(|u| u == "ove_mvpmat");
                let mvp = index
                    .and_then(|i| program.values.get(&(i as u32)))
                    .and_then(|v| match v {
                        UniformValue::Mat4(m) => Some(*m),
                        _ => None,
                    })
                    .unwrap_or(prism_core::math::IDENTITY);
                Some(invert_affine_2d(&mvp).ok_or_else(|| {
                    RenderError::Device("ove_mvpmat is not invertible".into())
                })?)
            }
        };

        let mut output = target.texels.clone();
        for y in 0..height {
            for x in 0..width {
                let mut uv = [
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height as f32,
                ];
                if let Some(inverse) = &inverse_mvp {
                    let q = transform_point(inverse, uv[0] * 2.0 - 1.0, 1.0 - uv[1] * 2.0);
                    if q[0].abs() > 1.0 || q[1].abs() > 1.0 {
                        continue;
                    }
                    uv = [(q[0] + 1.0) / 2.0, (1.0 - q[1]) / 2.0];
                }
                let input = FragmentInput {
                    uv,
                    pixel: [x, y],
                    program,
                    units: &self.units,
                    textures: &self.textures,
                };
                let color = (program.kernel)(&input);
                output[(y * target.width + x) as usize] = target.quantize(color);
            }
        }

        let record = DrawRecord {
            program: program_id,
            target: target_id,
            units: self.units.iter().map(|(u, t)| (*u, *t)).collect(),
            iteration: program
                .uniforms
                .iter()
                .position(|u| u == "ove_iteration")
                .and_then(|i| program.values.get(&(i as u32)))
                .and_then(|v| v.components().first().map(|c| *c as i32)),
        };

        if let Some(target) = self.textures.get_mut(&target_id) {
            target.texels = output;
        }
        self.stats.draws += 1;
        self.draw_log.push(record);
        Ok(())
    }

    fn read_pixels(&mut self, frame: &mut Frame) -> RenderResult<()> {
        let target_id = self.target()?;
        let target = self
            .textures
            .get(&target_id)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {target_id:?}")))?;
        let width = frame.width().min(target.width);
        let height = frame.height().min(target.height);
        for y in 0..height {
            for x in 0..width {
                frame.write_pixel(x, y, target.texels[(y * target.width + x) as usize]);
            }
        }
        self.stats.readbacks += 1;
        Ok(())
    }
}

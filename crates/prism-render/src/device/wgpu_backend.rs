//! [`GraphicsDevice`] on top of wgpu.
//!
//! Programs are WGSL. The vertex and fragment sources are concatenated into a
//! single module exporting `vs_main` and `fs_main`; the vertex source defines
//! the `VertexOutput` struct the fragment stage consumes. Uniforms are found by
//! name through [`ProgramLayout`] reflection and staged on the CPU until draw
//! time, when one bind group per `@group` is built from the staged bytes and
//! the textures bound to each unit.
//!
//! All textures sample with a nearest, non-filtering sampler so 8-bit and
//! 32-bit float textures go through the same bind group layout.

use std::collections::{BTreeMap, HashMap};

use prism_core::{Frame, GpuConfig, PixelFormat, PowerPreference};
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use super::reflect::{encode, ProgramLayout, ResourceKind, UniformSlot, FRAGMENT_ENTRY, VERTEX_ENTRY};
use super::{
    GraphicsBackend, GraphicsDevice, NativeContext, ProgramId, TextureId, UniformLocation,
    UniformValue,
};
use crate::error::{RenderError, RenderResult};

pub const DEFAULT_VERTEX_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}
"#;

pub const COPY_VERTEX_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

struct CopyUniforms {
    ove_mvpmat: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> copy_uniforms: CopyUniforms;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.position = copy_uniforms.ove_mvpmat * vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}
"#;

pub const DEFAULT_FRAGMENT_WGSL: &str = r#"
@group(1) @binding(0) var ove_maintex: texture_2d<f32>;
@group(1) @binding(1) var ove_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(ove_maintex, ove_sampler, in.uv);
}
"#;

/// Storage format on the GPU. Three-channel formats are widened to RGBA.
fn storage_format(format: PixelFormat) -> wgpu::TextureFormat {
    if format.is_float() {
        wgpu::TextureFormat::Rgba32Float
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    }
}

fn texel_size(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::Rgba32Float => 16,
        _ => 4,
    }
}

fn encode_texel(format: wgpu::TextureFormat, rgba: [f32; 4], out: &mut Vec<u8>) {
    match format {
        wgpu::TextureFormat::Rgba32Float => out.extend_from_slice(bytemuck::cast_slice(&rgba[..])),
        _ => out.extend(rgba.map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)),
    }
}

fn decode_texel(format: wgpu::TextureFormat, bytes: &[u8]) -> [f32; 4] {
    match format {
        wgpu::TextureFormat::Rgba32Float => {
            let mut texel = [0.0f32; 4];
            bytemuck::cast_slice_mut::<f32, u8>(&mut texel).copy_from_slice(&bytes[..16]);
            texel
        }
        _ => [0, 1, 2, 3].map(|c| bytes[c] as f32 / 255.0),
    }
}

/// Whether rows of `frame` can be copied byte for byte into `format`.
fn same_layout(frame: PixelFormat, format: wgpu::TextureFormat) -> bool {
    matches!(
        (frame, format),
        (PixelFormat::Rgba8, wgpu::TextureFormat::Rgba8Unorm)
            | (PixelFormat::Rgba32F, wgpu::TextureFormat::Rgba32Float)
    )
}

/// Headless wgpu adapter selection.
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    backends: wgpu::Backends,
    power_preference: wgpu::PowerPreference,
}

impl WgpuBackend {
    pub fn new(power_preference: PowerPreference) -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: match power_preference {
                PowerPreference::High => wgpu::PowerPreference::HighPerformance,
                PowerPreference::Low => wgpu::PowerPreference::LowPower,
            },
        }
    }

    pub fn from_config(config: &GpuConfig) -> Self {
        Self::new(config.power_preference)
    }
}

impl Default for WgpuBackend {
    fn default() -> Self {
        Self::new(PowerPreference::High)
    }
}

impl GraphicsBackend for WgpuBackend {
    type Context = WgpuContext;

    fn create_context(&self) -> RenderResult<WgpuContext> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: self.backends,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: self.power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RenderError::ContextCreation("no suitable wgpu adapter".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Prism Headless GPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| RenderError::ContextCreation(e.to_string()))?;

        let info = adapter.get_info();
        debug!(adapter = %info.name, backend = ?info.backend, "created wgpu context");

        Ok(WgpuContext {
            device,
            queue,
            info,
        })
    }
}

/// A wgpu device and queue waiting to be claimed by their worker thread.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
}

impl NativeContext for WgpuContext {
    type Device = WgpuDevice;

    fn make_current(self) -> RenderResult<WgpuDevice> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("prism_nearest_sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let empty = GpuTexture::new(&self.device, 1, 1, PixelFormat::Rgba8, "prism_empty_texture");
        self.queue.write_texture(
            empty.copy_target(),
            &[0, 0, 0, 0],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            empty.extent(),
        );

        Ok(WgpuDevice {
            device: self.device,
            queue: self.queue,
            info: self.info,
            sampler,
            empty,
            textures: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
            units: BTreeMap::new(),
            bound_program: None,
            attached: None,
            framebuffer_bound: false,
            viewport: (0, 0),
        })
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

impl GpuTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32, format: PixelFormat, label: &str) -> Self {
        let format = storage_format(format);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    fn copy_target(&self) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

struct GpuProgram {
    module: wgpu::ShaderModule,
    layout: ProgramLayout,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    /// Staged bytes per uniform-block resource.
    blocks: HashMap<usize, Vec<u8>>,
    /// Unit each texture resource samples from.
    texture_units: HashMap<usize, u32>,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

impl GpuProgram {
    fn pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let (module, layout) = (&self.module, &self.pipeline_layout);
        self.pipelines.entry(format).or_insert_with(|| {
            debug!(?format, "creating render pipeline");
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("prism_program_pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: VERTEX_ENTRY,
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: FRAGMENT_ENTRY,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })
    }
}

/// A current wgpu device with GL-style binding state.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    sampler: wgpu::Sampler,
    empty: GpuTexture,
    textures: HashMap<TextureId, GpuTexture>,
    programs: HashMap<ProgramId, GpuProgram>,
    next_id: u64,
    units: BTreeMap<u32, TextureId>,
    bound_program: Option<ProgramId>,
    attached: Option<TextureId>,
    framebuffer_bound: bool,
    viewport: (u32, u32),
}

impl WgpuDevice {
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn target_id(&self) -> RenderResult<TextureId> {
        match (self.attached, self.framebuffer_bound) {
            (Some(id), true) => Ok(id),
            _ => Err(RenderError::Device("no framebuffer bound".into())),
        }
    }

    fn target(&self) -> RenderResult<&GpuTexture> {
        let id = self.target_id()?;
        self.textures
            .get(&id)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {id:?}")))
    }

    fn check_errors(&self, what: &str) -> RenderResult<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(RenderError::Device(format!("{what}: {err}"))),
            None => Ok(()),
        }
    }
}

impl GraphicsDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn default_vertex_source(&self) -> &'static str {
        DEFAULT_VERTEX_WGSL
    }

    fn default_fragment_source(&self) -> &'static str {
        DEFAULT_FRAGMENT_WGSL
    }

    fn copy_vertex_source(&self) -> &'static str {
        COPY_VERTEX_WGSL
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> RenderResult<TextureId> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = GpuTexture::new(&self.device, width, height, format, "prism_texture");
        self.check_errors("create texture")?;
        let id = TextureId(self.allocate_id());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(gpu) = self.textures.remove(&texture) {
            gpu.texture.destroy();
        }
        self.units.retain(|_, bound| *bound != texture);
        if self.attached == Some(texture) {
            self.attached = None;
        }
    }

    fn upload_texture(&mut self, texture: TextureId, frame: &Frame) -> RenderResult<()> {
        let target = self
            .textures
            .get(&texture)
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

        let row_bytes = frame.width() * texel_size(target.format);
        let mut bytes = Vec::with_capacity((row_bytes * frame.height()) as usize);
        for y in 0..frame.height() {
            if same_layout(frame.format(), target.format) {
                bytes.extend_from_slice(frame.row(y));
                continue;
            }
            for x in 0..frame.width() {
                let texel = frame.read_pixel(x, y).unwrap_or([0.0; 4]);
                encode_texel(target.format, texel, &mut bytes);
            }
        }

        self.queue.write_texture(
            target.copy_target(),
            &bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(frame.height()),
            },
            target.extent(),
        );
        Ok(())
    }

    fn compile_program(&mut self, vertex: &str, fragment: &str) -> RenderResult<ProgramId> {
        let source = format!("{vertex}\n{fragment}");
        let layout = ProgramLayout::from_wgsl(&source)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("prism_program"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let mut bind_group_layouts = Vec::new();
        for group in 0..layout.group_count() {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = layout
                .resources
                .iter()
                .filter(|r| r.group == group)
                .map(|r| wgpu::BindGroupLayoutEntry {
                    binding: r.binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: match r.kind {
                        ResourceKind::UniformBlock { .. } => wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        ResourceKind::Texture => wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        ResourceKind::Sampler => {
                            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering)
                        }
                    },
                    count: None,
                })
                .collect();
            bind_group_layouts.push(self.device.create_bind_group_layout(
                &wgpu::BindGroupLayoutDescriptor {
                    label: Some("prism_program_bind_group_layout"),
                    entries: &entries,
                },
            ));
        }

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("prism_program_pipeline_layout"),
                bind_group_layouts: &bind_group_layouts.iter().collect::<Vec<_>>(),
                push_constant_ranges: &[],
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::ShaderCompile(err.to_string()));
        }

        let blocks = layout
            .resources
            .iter()
            .enumerate()
            .filter_map(|(index, r)| match r.kind {
                ResourceKind::UniformBlock { size } => Some((index, vec![0u8; size as usize])),
                _ => None,
            })
            .collect();

        let id = ProgramId(self.allocate_id());
        self.programs.insert(
            id,
            GpuProgram {
                module,
                layout,
                bind_group_layouts,
                pipeline_layout,
                blocks,
                texture_units: HashMap::new(),
                pipelines: HashMap::new(),
            },
        );
        debug!(program = id.0, "compiled wgsl program");
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let (index, _) = self.programs.get(&program)?.layout.slot(name)?;
        Some(UniformLocation(index as u32))
    }

    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: UniformValue) {
        let Some(program) = self.programs.get_mut(&program) else {
            return;
        };
        match program.layout.slot_at(location.0 as usize) {
            Some(UniformSlot::Block {
                resource,
                offset,
                ty,
            }) => {
                if let Some(block) = program.blocks.get_mut(resource) {
                    if let Some(out) = block.get_mut(*offset as usize..) {
                        encode(ty, &value, out);
                    }
                }
            }
            Some(UniformSlot::Texture { resource }) => {
                if let UniformValue::Int(unit) = value {
                    program.texture_units.insert(*resource, unit.max(0) as u32);
                }
            }
            None => {}
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
        let target = self.target()?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism_clear_encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("prism_clear_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        self.check_errors("clear")
    }

    fn draw_fullscreen(&mut self) -> RenderResult<()> {
        let program_id = self
            .bound_program
            .ok_or_else(|| RenderError::Device("draw without a bound program".into()))?;
        let target_id = self.target_id()?;
        let target = self
            .textures
            .get(&target_id)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {target_id:?}")))?;
        let target_format = target.format;
        let program = self
            .programs
            .get_mut(&program_id)
            .ok_or_else(|| RenderError::Device(format!("unknown program {program_id:?}")))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        program.pipeline(&self.device, target_format);

        let buffers: HashMap<usize, wgpu::Buffer> = program
            .blocks
            .iter()
            .map(|(index, bytes)| {
                let buffer = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("prism_uniform_block"),
                        contents: bytes,
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                (*index, buffer)
            })
            .collect();

        let mut bind_groups = Vec::with_capacity(program.bind_group_layouts.len());
        for (group, layout) in program.bind_group_layouts.iter().enumerate() {
            let entries: Vec<wgpu::BindGroupEntry> = program
                .layout
                .resources
                .iter()
                .enumerate()
                .filter(|(_, r)| r.group == group as u32)
                .filter_map(|(index, r)| {
                    let resource = match r.kind {
                        ResourceKind::UniformBlock { .. } => buffers.get(&index)?.as_entire_binding(),
                        ResourceKind::Texture => {
                            let unit = program.texture_units.get(&index).copied().unwrap_or(0);
                            let view = self
                                .units
                                .get(&unit)
                                .and_then(|id| self.textures.get(id))
                                .map(|t| &t.view)
                                .unwrap_or(&self.empty.view);
                            wgpu::BindingResource::TextureView(view)
                        }
                        ResourceKind::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
                    };
                    Some(wgpu::BindGroupEntry {
                        binding: r.binding,
                        resource,
                    })
                })
                .collect();
            bind_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("prism_program_bind_group"),
                layout,
                entries: &entries,
            }));
        }

        let width = self.viewport.0.clamp(1, target.width);
        let height = self.viewport.1.clamp(1, target.height);
        trace!(program = program_id.0, width, height, "draw");

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism_draw_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("prism_draw_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some(pipeline) = program.pipelines.get(&target_format) {
                pass.set_pipeline(pipeline);
            }
            for (group, bind_group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(group as u32, bind_group, &[]);
            }
            pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));

        self.check_errors("draw")
    }

    fn read_pixels(&mut self, frame: &mut Frame) -> RenderResult<()> {
        let target = self.target()?;
        let width = frame.width().min(target.width);
        let height = frame.height().min(target.height);
        if width == 0 || height == 0 {
            return Ok(());
        }
        let format = target.format;
        let unpadded = width * texel_size(format);
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism_readback_buffer"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            target.copy_target(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RenderError::Device("readback callback dropped".into()))?
            .map_err(|e| RenderError::Device(format!("failed to map readback buffer: {e}")))?;

        {
            let data = slice.get_mapped_range();
            let direct = same_layout(frame.format(), format);
            let texel = texel_size(format) as usize;
            for y in 0..height {
                let start = (y * padded) as usize;
                let row = &data[start..start + unpadded as usize];
                if direct {
                    frame.row_mut(y)[..unpadded as usize].copy_from_slice(row);
                    continue;
                }
                for x in 0..width {
                    let at = x as usize * texel;
                    frame.write_pixel(x, y, decode_texel(format, &row[at..at + texel]));
                }
            }
        }
        buffer.unmap();
        Ok(())
    }
}

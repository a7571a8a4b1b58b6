//! Turns one node render into shader passes.
//!
//! Each request walks Bind → ResolveInputs → Draw (once per iteration) →
//! Unbind. Texture units and the bound program are device-global, so Unbind
//! always runs, including after a failed draw.

use prism_core::{RenderTargetSpec, TimeRange};
use tracing::{error, trace};

use crate::device::{set_named_uniform, GraphicsDevice, ProgramId, UniformValue};
use crate::error::RenderResult;
use crate::framebuffer::Framebuffer;
use crate::node::{InputTable, NodeInput, NodeValue, ShaderNode};
use crate::shader_cache::ShaderCache;
use crate::texture_cache::{TextureCache, TextureHandle};

/// Everything one node render needs from the caller.
pub(crate) struct PassRequest<'a> {
    pub node: &'a dyn ShaderNode,
    pub inputs: &'a InputTable,
    pub range: TimeRange,
    pub target: RenderTargetSpec,
}

/// Output textures of a render.
enum Destinations {
    Single(TextureHandle),
    /// Iteration `i` writes `[i % 2]` and reads `[(i + 1) % 2]`.
    PingPong([TextureHandle; 2]),
}

impl Destinations {
    fn write(&self, iteration: u32) -> &TextureHandle {
        match self {
            Destinations::Single(handle) => handle,
            Destinations::PingPong(ring) => &ring[(iteration % 2) as usize],
        }
    }

    fn previous(&self, iteration: u32) -> Option<&TextureHandle> {
        match self {
            Destinations::Single(_) => None,
            Destinations::PingPong(ring) => Some(&ring[((iteration + 1) % 2) as usize]),
        }
    }
}

/// Texture units handed out during ResolveInputs.
#[derive(Debug, Default)]
struct BoundUnits {
    count: u32,
    feedback: Option<u32>,
}

pub(crate) struct PassExecutor<'a, D: GraphicsDevice> {
    pub device: &'a mut D,
    pub shaders: &'a mut ShaderCache,
    pub textures: &'a TextureCache,
    pub framebuffer: &'a mut Framebuffer,
}

impl<'a, D: GraphicsDevice> PassExecutor<'a, D> {
    pub fn run(self, request: &PassRequest<'_>) -> RenderResult<NodeValue> {
        let PassExecutor {
            device,
            shaders,
            textures,
            framebuffer,
        } = self;

        let program = shaders.get_or_compile(device, request.node, request.inputs)?;
        let program = program.id();
        device.bind_program(program);

        let mut units = BoundUnits::default();
        let result = resolve_inputs(device, program, request, &mut units)
            .and_then(|()| draw(device, textures, framebuffer, program, request, &units));

        if let Err(err) = &result {
            error!(node = request.node.id(), "render failed: {err}");
        }

        for unit in (0..units.count).rev() {
            device.bind_texture(unit, None);
        }
        device.release_program();

        result.map(NodeValue::from)
    }
}

fn resolve_inputs<D: GraphicsDevice>(
    device: &mut D,
    program: ProgramId,
    request: &PassRequest<'_>,
    units: &mut BoundUnits,
) -> RenderResult<()> {
    for input in request.node.inputs() {
        if device.uniform_location(program, &input.id).is_none() {
            continue;
        }

        let fallback;
        let value = match request.inputs.get(&input.id) {
            Some(value) if !value.is_unbound() => value,
            _ => {
                fallback = NodeValue::default_for(input);
                &fallback
            }
        };

        bind_value(device, program, input, value, request.node, units);
    }
    Ok(())
}

fn bind_value<D: GraphicsDevice>(
    device: &mut D,
    program: ProgramId,
    input: &NodeInput,
    value: &NodeValue,
    node: &dyn ShaderNode,
    units: &mut BoundUnits,
) {
    let id = input.id.as_str();
    let uniform = match value {
        NodeValue::Int(v) | NodeValue::Combo(v) => UniformValue::Int(*v),
        NodeValue::Float(v) => UniformValue::Float(*v),
        NodeValue::Vec2(v) => UniformValue::Vec2(*v),
        NodeValue::Vec3(v) => UniformValue::Vec3(*v),
        NodeValue::Vec4(v) => UniformValue::Vec4(*v),
        NodeValue::Matrix(m) => UniformValue::Mat4(*m),
        NodeValue::Color(c) => UniformValue::Vec4(c.to_array()),
        NodeValue::Bool(v) => UniformValue::Bool(*v),
        NodeValue::Vec2Array(points) => {
            set_named_uniform(
                device,
                program,
                &format!("{id}_count"),
                UniformValue::Int(points.len() as i32),
            );
            UniformValue::Vec2Array(points.clone())
        }
        NodeValue::Texture(handle) => {
            let unit = units.count;
            units.count += 1;
            device.bind_texture(unit, handle.as_ref().map(TextureHandle::texture));
            set_named_uniform(
                device,
                program,
                &format!("{id}_enabled"),
                UniformValue::Bool(handle.is_some()),
            );
            if let Some(handle) = handle {
                let nominal = [
                    (handle.width() * handle.divider()) as f32,
                    (handle.height() * handle.divider()) as f32,
                ];
                set_named_uniform(
                    device,
                    program,
                    &format!("{id}_resolution"),
                    UniformValue::Vec2(nominal),
                );
            }
            if node.iterative_input() == Some(id) {
                units.feedback = Some(unit);
            }
            trace!(input = id, unit, bound = handle.is_some(), "bound texture input");
            UniformValue::Int(unit as i32)
        }
        NodeValue::Unbound => return,
    };

    set_named_uniform(device, program, id, uniform);
}

fn draw<D: GraphicsDevice>(
    device: &mut D,
    textures: &TextureCache,
    framebuffer: &mut Framebuffer,
    program: ProgramId,
    request: &PassRequest<'_>,
    units: &BoundUnits,
) -> RenderResult<TextureHandle> {
    let node = request.node;
    let iterations = node.iterations().max(1);

    let destinations = if iterations > 1 && node.iterative_input().is_some() {
        Destinations::PingPong([
            textures.get(device, request.target)?,
            textures.get(device, request.target)?,
        ])
    } else {
        Destinations::Single(textures.get(device, request.target)?)
    };

    set_named_uniform(
        device,
        program,
        "ove_resolution",
        UniformValue::Vec2([request.target.width as f32, request.target.height as f32]),
    );

    if let Some(transition) = node.transition() {
        let at = request.range.in_point();
        for (name, progress) in [
            ("ove_tprog_all", transition.total_progress(at)),
            ("ove_tprog_out", transition.out_progress(at)),
            ("ove_tprog_in", transition.in_progress(at)),
        ] {
            set_named_uniform(device, program, name, UniformValue::Float(progress as f32));
        }
    }

    for iteration in 0..iterations {
        set_named_uniform(
            device,
            program,
            "ove_iteration",
            UniformValue::Int(iteration as i32),
        );

        if iteration > 0 {
            if let (Some(unit), Some(previous)) = (units.feedback, destinations.previous(iteration)) {
                device.bind_texture(unit, Some(previous.texture()));
            }
        }

        let target = destinations.write(iteration);
        framebuffer.render_into(device, target, |device| device.draw_fullscreen())?;
    }

    Ok(destinations.write(iterations - 1).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::{SoftwareDevice, SoftwareLibrary};
    use crate::node::{ParamKind, StaticNode};
    use prism_core::math::scale_translate;
    use prism_core::{Color, Frame, PixelFormat, Timestamp};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Observed = Arc<Mutex<HashMap<String, UniformValue>>>;

    /// Register a kernel that records every declared uniform it sees.
    fn observing(library: &mut SoftwareLibrary, source: &str, uniforms: &[&str]) -> Observed {
        let observed = Observed::default();
        let seen = Arc::clone(&observed);
        let names: Vec<String> = uniforms.iter().map(|u| u.to_string()).collect();
        library.register(source, uniforms, move |input| {
            let mut seen = seen.lock().unwrap();
            for name in &names {
                if let Some(value) = input.uniform(name) {
                    seen.insert(name.clone(), value.clone());
                }
            }
            [0.0, 0.0, 0.0, 1.0]
        });
        observed
    }

    struct Harness {
        device: SoftwareDevice,
        shaders: ShaderCache,
        textures: TextureCache,
        framebuffer: Framebuffer,
    }

    impl Harness {
        fn new(library: SoftwareLibrary) -> Self {
            Self {
                device: SoftwareDevice::new(Arc::new(library)),
                shaders: ShaderCache::new(),
                textures: TextureCache::new(None),
                framebuffer: Framebuffer::new(),
            }
        }

        fn run(&mut self, node: &dyn ShaderNode, inputs: &InputTable) -> RenderResult<NodeValue> {
            let request = PassRequest {
                node,
                inputs,
                range: TimeRange::at(Timestamp::zero()),
                target: RenderTargetSpec::new(2, 2, PixelFormat::Rgba8),
            };
            PassExecutor {
                device: &mut self.device,
                shaders: &mut self.shaders,
                textures: &self.textures,
                framebuffer: &mut self.framebuffer,
            }
            .run(&request)
        }
    }

    #[test]
    fn test_missing_texture_binds_disabled_unit() {
        let mut library = SoftwareLibrary::new();
        library.register("flag", &["tex", "tex_enabled"], |input| {
            let on = if input.bool("tex_enabled") { 1.0 } else { 0.0 };
            [on, 0.0, 0.0, 1.0]
        });
        let mut harness = Harness::new(library);
        let node = StaticNode::new("flag", "flag").with_input(NodeInput::new("tex", ParamKind::Texture));

        let out = harness.run(&node, &InputTable::new()).unwrap();
        assert!(harness.device.bound_units().is_empty());
        assert!(harness.device.bound_program().is_none());

        let handle = out.texture().unwrap().clone();
        let mut frame = Frame::new(2, 2, PixelFormat::Rgba8);
        harness.device.attach_framebuffer(handle.texture());
        harness.device.bind_framebuffer();
        harness.device.read_pixels(&mut frame).unwrap();
        assert_eq!(frame.get_rgba8(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(harness.device.draw_log()[0].units, Vec::new());
    }

    #[test]
    fn test_vec2_array_sets_count() {
        let mut library = SoftwareLibrary::new();
        library.register("count", &["points", "points_count"], |input| {
            [input.int("points_count") as f32 / 255.0, 0.0, 0.0, 1.0]
        });
        let mut harness = Harness::new(library);
        let node =
            StaticNode::new("count", "count").with_input(NodeInput::array("points", ParamKind::Vec2));
        let inputs = InputTable::new().with(
            "points",
            NodeValue::Vec2Array(vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]),
        );

        let out = harness.run(&node, &inputs).unwrap();
        let mut frame = Frame::new(2, 2, PixelFormat::Rgba8);
        harness.device.attach_framebuffer(out.texture().unwrap().texture());
        harness.device.bind_framebuffer();
        harness.device.read_pixels(&mut frame).unwrap();
        assert_eq!(frame.get_rgba8(1, 1), Some([3, 0, 0, 255]));
    }

    #[test]
    fn test_undeclared_inputs_take_no_unit() {
        let mut library = SoftwareLibrary::new();
        library.register("second", &["b"], |input| input.sample("b", input.uv()));
        let mut harness = Harness::new(library);
        let node = StaticNode::new("second", "second")
            .with_input(NodeInput::new("a", ParamKind::Texture))
            .with_input(NodeInput::new("b", ParamKind::Texture));
        let source = harness
            .textures
            .get(&mut harness.device, RenderTargetSpec::new(2, 2, PixelFormat::Rgba8))
            .unwrap();
        let inputs = InputTable::new()
            .with("a", source.clone().into())
            .with("b", source.clone().into());

        harness.run(&node, &inputs).unwrap();
        assert_eq!(harness.device.draw_log()[0].units, vec![(0, source.texture())]);
    }

    #[test]
    fn test_every_value_kind_reaches_the_kernel() {
        let mut library = SoftwareLibrary::new();
        let observed = observing(
            &mut library,
            "kinds",
            &[
                "count", "mode", "offset", "tint3", "tint4", "xform", "color", "flag", "tex",
                "tex_resolution", "tex_enabled",
            ],
        );
        let mut harness = Harness::new(library);
        let node = StaticNode::new("kinds", "kinds")
            .with_input(NodeInput::new("count", ParamKind::Int))
            .with_input(NodeInput::new("mode", ParamKind::Combo))
            .with_input(NodeInput::new("offset", ParamKind::Vec2))
            .with_input(NodeInput::new("tint3", ParamKind::Vec3))
            .with_input(NodeInput::new("tint4", ParamKind::Vec4))
            .with_input(NodeInput::new("xform", ParamKind::Matrix))
            .with_input(NodeInput::new("color", ParamKind::Color))
            .with_input(NodeInput::new("flag", ParamKind::Boolean))
            .with_input(NodeInput::new("tex", ParamKind::Texture));
        let divided = harness
            .textures
            .get(
                &mut harness.device,
                RenderTargetSpec::new(8, 6, PixelFormat::Rgba8).with_divider(2),
            )
            .unwrap();
        assert_eq!((divided.width(), divided.height()), (4, 3));
        let xform = scale_translate(2.0, 3.0, 0.5, -0.5);
        let inputs = InputTable::new()
            .with("count", NodeValue::Int(7))
            .with("mode", NodeValue::Combo(2))
            .with("offset", NodeValue::Vec2([0.25, 0.75]))
            .with("tint3", NodeValue::Vec3([0.1, 0.2, 0.3]))
            .with("tint4", NodeValue::Vec4([0.4, 0.5, 0.6, 0.7]))
            .with("xform", NodeValue::Matrix(xform))
            .with("color", NodeValue::Color(Color::rgba(1.0, 0.5, 0.25, 0.125)))
            .with("flag", NodeValue::Bool(true))
            .with("tex", divided.clone().into());

        harness.run(&node, &inputs).unwrap();

        let seen = observed.lock().unwrap();
        assert_eq!(seen["count"], UniformValue::Int(7));
        assert_eq!(seen["mode"], UniformValue::Int(2));
        assert_eq!(seen["offset"], UniformValue::Vec2([0.25, 0.75]));
        assert_eq!(seen["tint3"], UniformValue::Vec3([0.1, 0.2, 0.3]));
        assert_eq!(seen["tint4"], UniformValue::Vec4([0.4, 0.5, 0.6, 0.7]));
        assert_eq!(seen["xform"], UniformValue::Mat4(xform));
        assert_eq!(seen["color"], UniformValue::Vec4([1.0, 0.5, 0.25, 0.125]));
        assert_eq!(seen["flag"], UniformValue::Bool(true));
        assert_eq!(seen["tex"], UniformValue::Int(0));
        assert_eq!(seen["tex_resolution"], UniformValue::Vec2([8.0, 6.0]));
        assert_eq!(seen["tex_enabled"], UniformValue::Bool(true));
        assert_eq!(harness.device.draw_log()[0].units, vec![(0, divided.texture())]);
    }

    #[test]
    fn test_compile_failure_binds_nothing() {
        let mut harness = Harness::new(SoftwareLibrary::new());
        let node = StaticNode::new("bad", "unregistered");
        assert!(harness.run(&node, &InputTable::new()).is_err());
        assert_eq!(harness.device.stats().draws, 0);
        assert_eq!(harness.textures.stats().allocated, 0);
    }
}

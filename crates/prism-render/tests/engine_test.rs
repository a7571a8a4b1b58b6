use prism_core::hash::hash_frame;
use std::sync::{Arc, Mutex};

use prism_core::math::{scale_translate, IDENTITY};
use prism_core::{
    Color, ColorMethodOverride, EngineConfig, Frame, PixelFormat, Rational, RenderTargetSpec,
    TimeRange, Timestamp,
};
use prism_render::device::UniformValue;
use prism_render::{
    ColorManager, ColorProcessor, InputTable, NodeInput, NodeValue, ParamKind, PendingEngine,
    RenderEngine, RenderError, RenderMode, RenderResult, ShaderNode, SoftwareBackend,
    SoftwareDevice, SoftwareLibrary, StaticNode, StreamInfo, TransitionProgress,
};

fn engine_with(library: SoftwareLibrary, config: EngineConfig) -> RenderEngine<SoftwareDevice> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
    PendingEngine::initialize(&SoftwareBackend::new(library), config)
        .expect("software context")
        .finalize()
}

fn engine(library: SoftwareLibrary) -> RenderEngine<SoftwareDevice> {
    engine_with(library, EngineConfig::default())
}

fn library() -> SoftwareLibrary {
    let mut library = SoftwareLibrary::new();
    library.register("solid-blue", &[], |_| [0.0, 0.0, 1.0, 1.0]);
    library.register("grayscale", &["input_tex", "strength"], |input| {
        let [r, g, b, a] = input.sample("input_tex", input.uv());
        let luma = 0.2126 * r + 0.7152 * g + 0.0722 * b;
        let s = input.float("strength");
        [r + (luma - r) * s, g + (luma - g) * s, b + (luma - b) * s, a]
    });
    library.register(
        "accumulate",
        &["accum", "ove_iteration"],
        |input| {
            let [r, _, _, _] = input.sample("accum", input.uv());
            [r + 0.25, 0.0, 0.0, 1.0]
        },
    );
    library.register("two-inputs", &["a", "b"], |input| {
        let a = input.sample("a", input.uv());
        let b = input.sample("b", input.uv());
        [a[0], b[1], 0.0, 1.0]
    });
    library
}

fn at_zero() -> TimeRange {
    TimeRange::at(Timestamp::zero())
}

fn rgba8(width: u32, height: u32) -> RenderTargetSpec {
    RenderTargetSpec::new(width, height, PixelFormat::Rgba8)
}

/// A frame whose every pixel is distinct.
fn pattern(width: u32, height: u32) -> Frame {
    let mut frame = Frame::new(width, height, PixelFormat::Rgba8);
    for y in 0..height {
        for x in 0..width {
            frame.write_pixel(
                x,
                y,
                [x as f32 * 40.0 / 255.0, y as f32 * 60.0 / 255.0, 200.0 / 255.0, 1.0],
            );
        }
    }
    frame
}

fn download(
    engine: &mut RenderEngine<SoftwareDevice>,
    value: &NodeValue,
    width: u32,
    height: u32,
) -> Frame {
    let mut frame = Frame::new(width, height, PixelFormat::Rgba8);
    engine
        .download(value, &mut frame, &IDENTITY)
        .expect("download should succeed");
    frame
}

struct NoColor;

impl ColorManager for NoColor {
    fn reference_colorspace(&self) -> String {
        "scene_linear".into()
    }

    fn create_processor(&self, _: &str, _: &str) -> RenderResult<Box<dyn ColorProcessor>> {
        Err(RenderError::Device("no processors".into()))
    }
}

#[test]
fn test_engine_is_ready_after_finalize() {
    let engine = engine(library());
    assert!(engine.is_ready());
    assert_eq!(engine.shader_cache().compile_count(), 1);
}

#[test]
fn test_same_sources_compile_once() {
    let mut engine = engine(library());
    let node = StaticNode::new("blue", "solid-blue");
    for _ in 0..3 {
        engine
            .render_node(&node, &InputTable::new(), at_zero(), &rgba8(2, 2))
            .unwrap();
    }
    assert_eq!(engine.shader_cache().compile_count(), 2);
    assert_eq!(engine.device().unwrap().stats().programs_compiled, 2);
}

#[test]
fn test_failed_compile_is_not_cached() {
    let mut engine = engine(library());
    let node = StaticNode::new("broken", "does-not-exist");
    for _ in 0..2 {
        let err = engine
            .render_node(&node, &InputTable::new(), at_zero(), &rgba8(2, 2))
            .unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile(_)));
    }
    assert_eq!(engine.shader_cache().len(), 1);
    assert_eq!(engine.device().unwrap().stats().draws, 0);
}

#[test]
fn test_live_results_never_share_a_texture() {
    let mut engine = engine(library());
    let node = StaticNode::new("blue", "solid-blue");
    let first = engine
        .render_node(&node, &InputTable::new(), at_zero(), &rgba8(4, 4))
        .unwrap();
    let second = engine
        .render_node(&node, &InputTable::new(), at_zero(), &rgba8(4, 4))
        .unwrap();
    assert_ne!(
        first.texture().unwrap().texture(),
        second.texture().unwrap().texture()
    );
    assert_eq!(engine.texture_stats().leased, 2);
}

#[test]
fn test_released_texture_is_reused() {
    let mut engine = engine(library());
    let node = StaticNode::new("blue", "solid-blue");
    let first = engine
        .render_node(&node, &InputTable::new(), at_zero(), &rgba8(4, 4))
        .unwrap();
    let id = first.texture().unwrap().texture();
    drop(first);

    let second = engine
        .render_node(&node, &InputTable::new(), at_zero(), &rgba8(4, 4))
        .unwrap();
    assert_eq!(second.texture().unwrap().texture(), id);
}

#[test]
fn test_repeated_renders_allocate_once() {
    let mut engine = engine(library());
    let node = StaticNode::new("blue", "solid-blue");
    for _ in 0..10 {
        let value = engine
            .render_node(&node, &InputTable::new(), at_zero(), &rgba8(8, 8))
            .unwrap();
        let frame = download(&mut engine, &value, 8, 8);
        assert_eq!(frame.get_rgba8(7, 7), Some([0, 0, 255, 255]));
    }
    assert_eq!(engine.device().unwrap().stats().textures_created, 1);
    assert_eq!(engine.texture_stats().created_total, 1);
}

#[test]
fn test_divided_target_is_smaller() {
    let mut engine = engine(library());
    let node = StaticNode::new("blue", "solid-blue");
    let target = rgba8(8, 6).with_divider(2);
    let value = engine
        .render_node(&node, &InputTable::new(), at_zero(), &target)
        .unwrap();
    let handle = value.texture().unwrap();
    assert_eq!((handle.width(), handle.height()), (4, 3));
    assert_eq!(
        engine.device().unwrap().texture_size(handle.texture()),
        Some((4, 3))
    );
}

#[test]
fn test_upload_download_round_trip() {
    let mut engine = engine(library());
    let source = pattern(5, 3);
    let value = engine.pre_cached_frame_to_value(&source).unwrap();
    let frame = download(&mut engine, &value, 5, 3);
    assert_eq!(frame.data(), source.data());
}

#[test]
fn test_round_trip_honors_padded_rows() {
    let mut engine = engine(library());
    let mut source = Frame::with_linesize(3, 2, PixelFormat::Rgba8, 8).unwrap();
    let packed = pattern(3, 2);
    for y in 0..2 {
        for x in 0..3 {
            source.write_pixel(x, y, packed.read_pixel(x, y).unwrap());
        }
    }

    let value = engine.pre_cached_frame_to_value(&source).unwrap();
    let mut out = Frame::with_linesize(3, 2, PixelFormat::Rgba8, 5).unwrap();
    engine.download(&value, &mut out, &IDENTITY).unwrap();
    for y in 0..2 {
        for x in 0..3 {
            assert_eq!(out.get_rgba8(x, y), packed.get_rgba8(x, y), "pixel ({x}, {y})");
        }
    }
    assert_eq!(hash_frame(&out), hash_frame(&packed));
}

#[test]
fn test_float_round_trip_is_lossless() {
    let mut engine = engine(library());
    let mut source = Frame::new(2, 2, PixelFormat::Rgba32F);
    source.write_pixel(0, 0, [0.123, 1.5, -0.25, 0.5]);
    source.write_pixel(1, 1, [0.333, 0.666, 0.999, 1.0]);

    let value = engine.pre_cached_frame_to_value(&source).unwrap();
    let mut out = Frame::new(2, 2, PixelFormat::Rgba32F);
    engine.download(&value, &mut out, &IDENTITY).unwrap();
    assert_eq!(out.read_pixel(0, 0), Some([0.123, 1.5, -0.25, 0.5]));
    assert_eq!(out.read_pixel(1, 1), Some([0.333, 0.666, 0.999, 1.0]));
}

#[test]
fn test_wide_pixels_are_stretched_on_upload() {
    let mut config = EngineConfig::default();
    config.color.method = ColorMethodOverride::Disabled;
    let mut engine = engine_with(library(), config);

    let mut source = pattern(4, 2);
    source.set_sample_aspect_ratio(Rational::new(2, 1));
    let value = engine
        .frame_to_value(
            &source,
            &StreamInfo::new("sRGB", false),
            &rgba8(4, 2),
            RenderMode::Online,
            &NoColor,
        )
        .unwrap();

    let handle = value.texture().unwrap();
    assert_eq!((handle.width(), handle.height()), (8, 2));

    let frame = download(&mut engine, &value, 8, 2);
    for y in 0..2 {
        for x in 0..8 {
            assert_eq!(frame.get_rgba8(x, y), source.get_rgba8(x / 2, y), "pixel ({x}, {y})");
        }
    }
}

#[test]
fn test_square_pixels_skip_the_stretch() {
    let mut config = EngineConfig::default();
    config.color.method = ColorMethodOverride::Disabled;
    let mut engine = engine_with(library(), config);

    let value = engine
        .frame_to_value(
            &pattern(4, 2),
            &StreamInfo::new("sRGB", false),
            &rgba8(4, 2),
            RenderMode::Online,
            &NoColor,
        )
        .unwrap();
    assert_eq!(value.texture().unwrap().width(), 4);
    assert_eq!(engine.device().unwrap().stats().draws, 0);
}

#[test]
fn test_grayscale_end_to_end() {
    let mut engine = engine(library());
    let red = Frame::solid(4, 4, &Color::RED);
    let texture = engine.pre_cached_frame_to_value(&red).unwrap();

    let node = StaticNode::new("gray", "grayscale")
        .with_input(NodeInput::new("input_tex", ParamKind::Texture))
        .with_input(NodeInput::new("strength", ParamKind::Float));
    let inputs = InputTable::new()
        .with("input_tex", texture)
        .with("strength", NodeValue::Float(1.0));

    let value = engine
        .render_node(&node, &inputs, at_zero(), &rgba8(4, 4))
        .unwrap();
    let frame = download(&mut engine, &value, 4, 4);
    for y in 0..4 {
        for x in 0..4 {
            let [r, g, b, a] = frame.get_rgba8(x, y).unwrap();
            assert_eq!(r, g);
            assert_eq!(g, b);
            assert_eq!(a, 255);
            assert_eq!(r, 54);
        }
    }
}

#[test]
fn test_iterations_alternate_two_targets() {
    let mut engine = engine(library());
    let node = StaticNode::new("accumulate", "accumulate")
        .with_input(NodeInput::new("accum", ParamKind::Texture))
        .with_iterations(3, "accum");

    let target = RenderTargetSpec::new(2, 2, PixelFormat::Rgba32F);
    let value = engine
        .render_node(&node, &InputTable::new(), at_zero(), &target)
        .unwrap();

    let device = engine.device().unwrap();
    let log = device.draw_log();
    assert_eq!(log.len(), 3);
    assert_eq!(
        log.iter().map(|d| d.iteration).collect::<Vec<_>>(),
        vec![Some(0), Some(1), Some(2)]
    );
    assert_ne!(log[0].target, log[1].target);
    assert_eq!(log[0].target, log[2].target);
    assert!(log[0].units.is_empty());
    assert_eq!(log[1].units, vec![(0, log[0].target)]);
    assert_eq!(log[2].units, vec![(0, log[1].target)]);
    assert_eq!(value.texture().unwrap().texture(), log[2].target);
    assert!(device.bound_units().is_empty());

    let mut out = Frame::new(2, 2, PixelFormat::Rgba32F);
    engine.download(&value, &mut out, &IDENTITY).unwrap();
    assert_eq!(out.read_pixel(1, 0), Some([0.75, 0.0, 0.0, 1.0]));
}

#[test]
fn test_single_iteration_uses_one_target() {
    let mut engine = engine(library());
    let node = StaticNode::new("accumulate", "accumulate")
        .with_input(NodeInput::new("accum", ParamKind::Texture))
        .with_iterations(1, "accum");
    engine
        .render_node(&node, &InputTable::new(), at_zero(), &rgba8(2, 2))
        .unwrap();
    assert_eq!(engine.device().unwrap().draw_log().len(), 1);
    assert_eq!(engine.texture_stats().allocated, 1);
}

#[test]
fn test_units_and_program_released_after_render() {
    let mut engine = engine(library());
    let a = engine.pre_cached_frame_to_value(&pattern(2, 2)).unwrap();
    let b = engine.pre_cached_frame_to_value(&pattern(2, 2)).unwrap();
    let node = StaticNode::new("pair", "two-inputs")
        .with_input(NodeInput::new("a", ParamKind::Texture))
        .with_input(NodeInput::new("b", ParamKind::Footage));
    let inputs = InputTable::new().with("a", a.clone()).with("b", b.clone());

    engine
        .render_node(&node, &inputs, at_zero(), &rgba8(2, 2))
        .unwrap();

    let device = engine.device().unwrap();
    assert_eq!(
        device.draw_log()[0].units,
        vec![
            (0, a.texture().unwrap().texture()),
            (1, b.texture().unwrap().texture())
        ]
    );
    assert!(device.bound_units().is_empty());
    assert!(device.bound_program().is_none());
}

#[test]
fn test_download_without_texture_is_a_no_op() {
    let mut engine = engine(library());
    let mut frame = Frame::solid(2, 2, &Color::GREEN);
    engine
        .download(&NodeValue::Float(1.0), &mut frame, &IDENTITY)
        .unwrap();
    engine
        .download(&NodeValue::Texture(None), &mut frame, &IDENTITY)
        .unwrap();
    assert_eq!(frame.get_rgba8(1, 1), Some([0, 255, 0, 255]));
    assert_eq!(engine.device().unwrap().stats().readbacks, 0);
}

#[test]
fn test_download_resizes_to_frame() {
    let mut engine = engine(library());
    let source = pattern(2, 2);
    let value = engine.pre_cached_frame_to_value(&source).unwrap();
    let frame = download(&mut engine, &value, 4, 4);
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(frame.get_rgba8(x, y), source.get_rgba8(x / 2, y / 2), "pixel ({x}, {y})");
        }
    }
}

#[test]
fn test_resize_target_is_cleared_between_downloads() {
    let mut engine = engine(library());
    let red = engine
        .pre_cached_frame_to_value(&Frame::solid(2, 2, &Color::RED))
        .unwrap();
    let first = download(&mut engine, &red, 4, 4);
    assert_eq!(first.get_rgba8(0, 0), Some([255, 0, 0, 255]));
    drop(red);

    let blue = engine
        .pre_cached_frame_to_value(&Frame::solid(2, 2, &Color::BLUE))
        .unwrap();
    let mut second = Frame::new(4, 4, PixelFormat::Rgba8);
    engine
        .download(&blue, &mut second, &scale_translate(0.5, 0.5, 0.0, 0.0))
        .unwrap();
    assert_eq!(second.get_rgba8(1, 1), Some([0, 0, 255, 255]));
    assert_eq!(second.get_rgba8(0, 0), Some([0, 0, 0, 0]));
    assert_eq!(second.get_rgba8(3, 3), Some([0, 0, 0, 0]));
    assert_eq!(engine.device().unwrap().stats().textures_created, 2);
}

/// Progress curves that differ from each other at every instant.
struct Curves;

impl TransitionProgress for Curves {
    fn total_progress(&self, time: Timestamp) -> f64 {
        time.as_seconds() / 4.0
    }

    fn out_progress(&self, time: Timestamp) -> f64 {
        1.0 - time.as_seconds() / 8.0
    }

    fn in_progress(&self, time: Timestamp) -> f64 {
        time.as_seconds() / 2.0
    }
}

struct Crossfade {
    curves: Curves,
}

impl ShaderNode for Crossfade {
    fn id(&self) -> &str {
        "crossfade"
    }

    fn fragment_source(&self, _: &InputTable) -> String {
        "crossfade".into()
    }

    fn inputs(&self) -> &[NodeInput] {
        &[]
    }

    fn transition(&self) -> Option<&dyn TransitionProgress> {
        Some(&self.curves)
    }
}

#[test]
fn test_transition_progress_evaluated_at_in_point() {
    let observed: Arc<Mutex<Vec<(String, UniformValue)>>> = Arc::default();
    let seen = Arc::clone(&observed);
    let mut library = library();
    let names = ["ove_tprog_all", "ove_tprog_out", "ove_tprog_in"];
    library.register("crossfade", &names, move |input| {
        let mut seen = seen.lock().unwrap();
        if seen.is_empty() {
            for name in names {
                if let Some(value) = input.uniform(name) {
                    seen.push((name.to_string(), value.clone()));
                }
            }
        }
        [0.0, 0.0, 0.0, 1.0]
    });
    let mut engine = engine(library);
    let range = TimeRange::new(Timestamp::from_seconds(1.0), Timestamp::from_seconds(3.0));

    engine
        .render_node(&Crossfade { curves: Curves }, &InputTable::new(), range, &rgba8(2, 2))
        .unwrap();

    assert_eq!(
        *observed.lock().unwrap(),
        vec![
            ("ove_tprog_all".to_string(), UniformValue::Float(0.25)),
            ("ove_tprog_out".to_string(), UniformValue::Float(0.875)),
            ("ove_tprog_in".to_string(), UniformValue::Float(0.5)),
        ]
    );
}

#[test]
fn test_bind_failure_makes_every_call_not_ready() {
    let backend = SoftwareBackend::new(library()).failing_bind("surface lost");
    let mut engine = PendingEngine::initialize(&backend, EngineConfig::default())
        .unwrap()
        .finalize();
    assert!(!engine.is_ready());

    let node = StaticNode::new("blue", "solid-blue");
    assert!(matches!(
        engine.render_node(&node, &InputTable::new(), at_zero(), &rgba8(2, 2)),
        Err(RenderError::NotReady)
    ));
    assert!(matches!(
        engine.pre_cached_frame_to_value(&pattern(2, 2)),
        Err(RenderError::NotReady)
    ));
    let mut frame = Frame::new(2, 2, PixelFormat::Rgba8);
    assert!(matches!(
        engine.download(&NodeValue::Texture(None), &mut frame, &IDENTITY),
        Err(RenderError::NotReady)
    ));
    assert!(matches!(engine.trim(), Err(RenderError::NotReady)));
    engine.close();
}

#[test]
fn test_creation_failure_is_an_error() {
    let backend = SoftwareBackend::default().failing_creation("no adapter");
    assert!(matches!(
        PendingEngine::initialize(&backend, EngineConfig::default()),
        Err(RenderError::ContextCreation(_))
    ));
}

#[test]
fn test_close_releases_everything_and_is_idempotent() {
    let mut engine = engine(library());
    let value = engine
        .render_node(
            &StaticNode::new("blue", "solid-blue"),
            &InputTable::new(),
            at_zero(),
            &rgba8(2, 2),
        )
        .unwrap();

    engine.close();
    engine.close();

    assert!(!engine.is_ready());
    assert!(engine.shader_cache().is_empty());
    assert_eq!(engine.texture_stats().allocated, 0);
    assert!(matches!(engine.device(), Err(RenderError::NotReady)));
    drop(value);
}

#[test]
fn test_trim_keeps_configured_idle_count() {
    let mut config = EngineConfig::default();
    config.cache.max_idle_textures_per_spec = Some(1);
    let mut engine = engine_with(library(), config);
    let node = StaticNode::new("blue", "solid-blue");

    let values: Vec<_> = (0..3)
        .map(|_| {
            engine
                .render_node(&node, &InputTable::new(), at_zero(), &rgba8(2, 2))
                .unwrap()
        })
        .collect();
    drop(values);
    assert_eq!(engine.texture_stats().idle, 3);

    engine.trim().unwrap();
    assert_eq!(engine.texture_stats().idle, 1);
    assert_eq!(engine.device().unwrap().stats().textures_destroyed, 2);
}

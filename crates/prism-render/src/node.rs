//! What the engine needs to know about a graph node.

use std::collections::HashMap;

use prism_core::math::IDENTITY;
use prism_core::{Color, Matrix4, Timestamp};

use crate::texture_cache::TextureHandle;

/// Declared kind of a node parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Matrix,
    Color,
    Boolean,
    Combo,
    Texture,
    Footage,
    Buffer,
    Samples,
    Text,
    Rational,
    Font,
    File,
    Decimal,
    Number,
    String,
    Vector,
    Any,
    None,
}

impl ParamKind {
    /// Kinds that occupy a texture unit.
    pub fn is_texture(&self) -> bool {
        matches!(self, ParamKind::Texture | ParamKind::Footage | ParamKind::Buffer)
    }

    /// Kinds that never reach a shader.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            ParamKind::Samples
                | ParamKind::Text
                | ParamKind::Rational
                | ParamKind::Font
                | ParamKind::File
                | ParamKind::Decimal
                | ParamKind::Number
                | ParamKind::String
                | ParamKind::Vector
                | ParamKind::Any
                | ParamKind::None
        )
    }
}

/// One declared input of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInput {
    pub id: String,
    pub kind: ParamKind,
    /// Array inputs bind a list of values; only `Vec2` arrays reach shaders.
    pub array: bool,
}

impl NodeInput {
    pub fn new(id: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            id: id.into(),
            kind,
            array: false,
        }
    }

    pub fn array(id: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            id: id.into(),
            kind,
            array: true,
        }
    }
}

/// A resolved input value, or the output of a render.
#[derive(Debug, Clone)]
pub enum NodeValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec2Array(Vec<[f32; 2]>),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Matrix(Matrix4),
    Color(Color),
    Bool(bool),
    Combo(i32),
    /// `None` is a texture input with nothing connected.
    Texture(Option<TextureHandle>),
    /// A value with no shader representation.
    Unbound,
}

impl NodeValue {
    /// The zero value bound when an input of `kind` has no value.
    pub fn default_for(input: &NodeInput) -> NodeValue {
        match input.kind {
            ParamKind::Vec2 if input.array => NodeValue::Vec2Array(Vec::new()),
            ParamKind::Int => NodeValue::Int(0),
            ParamKind::Float => NodeValue::Float(0.0),
            ParamKind::Vec2 => NodeValue::Vec2([0.0; 2]),
            ParamKind::Vec3 => NodeValue::Vec3([0.0; 3]),
            ParamKind::Vec4 => NodeValue::Vec4([0.0; 4]),
            ParamKind::Matrix => NodeValue::Matrix(IDENTITY),
            ParamKind::Color => NodeValue::Color(Color::TRANSPARENT),
            ParamKind::Boolean => NodeValue::Bool(false),
            ParamKind::Combo => NodeValue::Combo(0),
            ParamKind::Texture | ParamKind::Footage | ParamKind::Buffer => NodeValue::Texture(None),
            _ => NodeValue::Unbound,
        }
    }

    pub fn texture(&self) -> Option<&TextureHandle> {
        match self {
            NodeValue::Texture(handle) => handle.as_ref(),
            _ => None,
        }
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self, NodeValue::Unbound)
    }
}

impl From<TextureHandle> for NodeValue {
    fn from(handle: TextureHandle) -> Self {
        NodeValue::Texture(Some(handle))
    }
}

/// Resolved values for one render, keyed by input id.
#[derive(Debug, Clone, Default)]
pub struct InputTable {
    values: HashMap<String, NodeValue>,
}

impl InputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, value: NodeValue) -> Self {
        self.insert(id, value);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, value: NodeValue) -> Option<NodeValue> {
        self.values.insert(id.into(), value)
    }

    pub fn get(&self, id: &str) -> Option<&NodeValue> {
        self.values.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<NodeValue> {
        self.values.remove(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Progress curves of a transition node.
pub trait TransitionProgress {
    /// 0.0 at the start of the transition, 1.0 at its end.
    fn total_progress(&self, time: Timestamp) -> f64;

    /// 1.0 at the start of the outgoing segment, 0.0 at its end.
    fn out_progress(&self, time: Timestamp) -> f64;

    /// 0.0 at the start of the incoming segment, 1.0 at its end.
    fn in_progress(&self, time: Timestamp) -> f64;
}

/// A node that renders through a shader program.
pub trait ShaderNode {
    /// Stable identity of the node.
    fn id(&self) -> &str;

    /// Vertex source for these inputs. Empty selects the device default.
    fn vertex_source(&self, _inputs: &InputTable) -> String {
        String::new()
    }

    /// Fragment source for these inputs. Empty selects the device default.
    fn fragment_source(&self, inputs: &InputTable) -> String;

    /// Declared inputs, in binding order.
    fn inputs(&self) -> &[NodeInput];

    fn iterations(&self) -> u32 {
        1
    }

    /// Id of the input that receives the previous iteration's output.
    fn iterative_input(&self) -> Option<&str> {
        None
    }

    fn transition(&self) -> Option<&dyn TransitionProgress> {
        None
    }
}

/// A [`ShaderNode`] with fixed sources.
#[derive(Debug, Clone)]
pub struct StaticNode {
    id: String,
    vertex: String,
    fragment: String,
    inputs: Vec<NodeInput>,
    iterations: u32,
    iterative_input: Option<String>,
}

impl StaticNode {
    pub fn new(id: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vertex: String::new(),
            fragment: fragment.into(),
            inputs: Vec::new(),
            iterations: 1,
            iterative_input: None,
        }
    }

    pub fn with_vertex(mut self, vertex: impl Into<String>) -> Self {
        self.vertex = vertex.into();
        self
    }

    pub fn with_input(mut self, input: NodeInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Run `iterations` passes, feeding each result back through `input`.
    pub fn with_iterations(mut self, iterations: u32, input: impl Into<String>) -> Self {
        self.iterations = iterations;
        self.iterative_input = Some(input.into());
        self
    }
}

impl ShaderNode for StaticNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn vertex_source(&self, _inputs: &InputTable) -> String {
        self.vertex.clone()
    }

    fn fragment_source(&self, _inputs: &InputTable) -> String {
        self.fragment.clone()
    }

    fn inputs(&self) -> &[NodeInput] {
        &self.inputs
    }

    fn iterations(&self) -> u32 {
        self.iterations
    }

    fn iterative_input(&self) -> Option<&str> {
        self.iterative_input.as_deref()
    }
}

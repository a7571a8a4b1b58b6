//! WGSL parsing, validation and uniform reflection.
//!
//! WGSL has no loose uniforms, so a program's "uniforms" are the members of
//! its `var<uniform>` structs (or the uniform globals themselves when they are
//! not structs) plus every sampled texture global. Each gets a name-addressed
//! [`UniformSlot`] so the engine can bind values the same way it would on a
//! GL-style API.

use std::collections::HashMap;

use naga::{AddressSpace, ArraySize, ImageClass, ImageDimension, ScalarKind, ShaderStage, TypeInner};

use crate::device::UniformValue;
use crate::error::{RenderError, RenderResult};

/// Vertex entry point every program must export.
pub const VERTEX_ENTRY: &str = "vs_main";
/// Fragment entry point every program must export.
pub const FRAGMENT_ENTRY: &str = "fs_main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    F32,
    I32,
    U32,
}

/// Host-shareable type of a uniform slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformType {
    Scalar(ScalarType),
    Vector(ScalarType, u32),
    Matrix {
        columns: u32,
        rows: u32,
    },
    Array {
        element: Box<UniformType>,
        count: u32,
        stride: u32,
    },
}

impl UniformType {
    /// Size in bytes under uniform address-space layout rules.
    pub fn size(&self) -> u32 {
        match self {
            UniformType::Scalar(_) => 4,
            UniformType::Vector(_, n) => 4 * n,
            UniformType::Matrix { columns, rows } => columns * column_stride(*rows),
            UniformType::Array { count, stride, .. } => count * stride,
        }
    }

    fn component_count(&self) -> usize {
        match self {
            UniformType::Scalar(_) => 1,
            UniformType::Vector(_, n) => *n as usize,
            UniformType::Matrix { columns, rows } => (columns * rows) as usize,
            UniformType::Array { element, count, .. } => element.component_count() * *count as usize,
        }
    }
}

fn column_stride(rows: u32) -> u32 {
    if rows == 2 {
        8
    } else {
        16
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBlock { size: u32 },
    Texture,
    Sampler,
}

/// One `@group/@binding` resource of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformSlot {
    /// Bytes inside the uniform block at `resource`.
    Block {
        resource: usize,
        offset: u32,
        ty: UniformType,
    },
    /// A sampled texture; its value is the texture unit it reads from.
    Texture { resource: usize },
}

/// Reflected resources and named uniform slots of one program.
#[derive(Debug, Clone, Default)]
pub struct ProgramLayout {
    pub resources: Vec<Resource>,
    slots: Vec<UniformSlot>,
    index: HashMap<String, usize>,
}

impl ProgramLayout {
    /// Parse, validate and reflect a complete WGSL program.
    pub fn from_wgsl(source: &str) -> RenderResult<Self> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| RenderError::ShaderCompile(e.emit_to_string(source)))?;

        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .map_err(|e| RenderError::ShaderCompile(format!("{e:?}")))?;

        require_entry(&module, VERTEX_ENTRY, ShaderStage::Vertex)?;
        require_entry(&module, FRAGMENT_ENTRY, ShaderStage::Fragment)?;

        Self::reflect(&module)
    }

    fn reflect(module: &naga::Module) -> RenderResult<Self> {
        let mut layout = ProgramLayout::default();

        for (_, var) in module.global_variables.iter() {
            let (Some(name), Some(binding)) = (&var.name, &var.binding) else {
                continue;
            };
            let resource = layout.resources.len();
            let inner = &module.types[var.ty].inner;

            let kind = match (var.space, inner) {
                (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                    for member in members {
                        let (Some(member_name), Some(ty)) =
                            (&member.name, uniform_type(module, member.ty))
                        else {
                            continue;
                        };
                        layout.insert(
                            member_name,
                            UniformSlot::Block {
                                resource,
                                offset: member.offset,
                                ty,
                            },
                        );
                    }
                    ResourceKind::UniformBlock { size: align16(*span) }
                }
                (AddressSpace::Uniform, _) => {
                    let ty = uniform_type(module, var.ty).ok_or_else(|| {
                        RenderError::ShaderCompile(format!("unsupported uniform type for `{name}`"))
                    })?;
                    let size = align16(ty.size());
                    layout.insert(
                        name,
                        UniformSlot::Block {
                            resource,
                            offset: 0,
                            ty,
                        },
                    );
                    ResourceKind::UniformBlock { size }
                }
                (
                    AddressSpace::Handle,
                    TypeInner::Image {
                        dim: ImageDimension::D2,
                        arrayed: false,
                        class:
                            ImageClass::Sampled {
                                kind: ScalarKind::Float,
                                multi: false,
                            },
                    },
                ) => {
                    layout.insert(name, UniformSlot::Texture { resource });
                    ResourceKind::Texture
                }
                (AddressSpace::Handle, TypeInner::Sampler { comparison: false }) => {
                    ResourceKind::Sampler
                }
                _ => {
                    return Err(RenderError::ShaderCompile(format!(
                        "unsupported resource `{name}`; expected a uniform, texture_2d<f32> or sampler"
                    )))
                }
            };

            layout.resources.push(Resource {
                name: name.clone(),
                group: binding.group,
                binding: binding.binding,
                kind,
            });
        }

        Ok(layout)
    }

    fn insert(&mut self, name: &str, slot: UniformSlot) {
        self.index.insert(name.to_string(), self.slots.len());
        self.slots.push(slot);
    }

    /// Index and description of the slot called `name`.
    pub fn slot(&self, name: &str) -> Option<(usize, &UniformSlot)> {
        let index = *self.index.get(name)?;
        Some((index, &self.slots[index]))
    }

    pub fn slot_at(&self, index: usize) -> Option<&UniformSlot> {
        self.slots.get(index)
    }

    /// Number of bind groups the pipeline layout needs.
    pub fn group_count(&self) -> u32 {
        self.resources.iter().map(|r| r.group + 1).max().unwrap_or(0)
    }
}

fn require_entry(module: &naga::Module, name: &str, stage: ShaderStage) -> RenderResult<()> {
    if module
        .entry_points
        .iter()
        .any(|ep| ep.name == name && ep.stage == stage)
    {
        return Ok(());
    }
    Err(RenderError::ShaderCompile(format!(
        "missing {stage:?} entry point `{name}`"
    )))
}

fn align16(size: u32) -> u32 {
    (size.max(16) + 15) & !15
}

fn scalar_type(scalar: naga::Scalar) -> Option<ScalarType> {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Float, 4) => Some(ScalarType::F32),
        (ScalarKind::Sint, 4) => Some(ScalarType::I32),
        (ScalarKind::Uint, 4) => Some(ScalarType::U32),
        _ => None,
    }
}

fn uniform_type(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<UniformType> {
    match &module.types[ty].inner {
        TypeInner::Scalar(scalar) => scalar_type(*scalar).map(UniformType::Scalar),
        TypeInner::Vector { size, scalar } => {
            Some(UniformType::Vector(scalar_type(*scalar)?, *size as u32))
        }
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => {
            scalar_type(*scalar)?;
            Some(UniformType::Matrix {
                columns: *columns as u32,
                rows: *rows as u32,
            })
        }
        TypeInner::Array {
            base,
            size: ArraySize::Constant(count),
            stride,
        } => Some(UniformType::Array {
            element: Box::new(uniform_type(module, *base)?),
            count: count.get(),
            stride: *stride,
        }),
        _ => None,
    }
}

fn write_scalar(ty: ScalarType, value: f64, out: &mut [u8]) {
    let bytes = match ty {
        ScalarType::F32 => (value as f32).to_le_bytes(),
        ScalarType::I32 => (value as i32).to_le_bytes(),
        ScalarType::U32 => (value.max(0.0) as u32).to_le_bytes(),
    };
    out[..4].copy_from_slice(&bytes);
}

fn encode_components(ty: &UniformType, values: &[f64], out: &mut [u8]) {
    let at = |i: usize| values.get(i).copied().unwrap_or(0.0);
    match ty {
        UniformType::Scalar(s) => write_scalar(*s, at(0), out),
        UniformType::Vector(s, n) => {
            for i in 0..*n as usize {
                write_scalar(*s, at(i), &mut out[i * 4..]);
            }
        }
        UniformType::Matrix { columns, rows } => {
            // Values arrive as a column-major 4x4.
            let stride = column_stride(*rows) as usize;
            for c in 0..*columns as usize {
                for r in 0..*rows as usize {
                    write_scalar(ScalarType::F32, at(c * 4 + r), &mut out[c * stride + r * 4..]);
                }
            }
        }
        UniformType::Array {
            element,
            count,
            stride,
        } => {
            let per = element.component_count().max(1);
            for (i, chunk) in values.chunks(per).take(*count as usize).enumerate() {
                let start = i * *stride as usize;
                encode_components(element, chunk, &mut out[start..]);
            }
        }
    }
}

/// Write `value` into `out` using the layout of `ty`.
///
/// Scalar kinds are converted to the declared type. Vec2 arrays fill one
/// element per pair, so they also bind to `array<vec4<f32>, N>`.
pub fn encode(ty: &UniformType, value: &UniformValue, out: &mut [u8]) {
    if out.len() < ty.size() as usize {
        return;
    }
    match (ty, value) {
        (
            UniformType::Array {
                element,
                count,
                stride,
            },
            UniformValue::Vec2Array(pairs),
        ) => {
            for (i, pair) in pairs.iter().take(*count as usize).enumerate() {
                let start = i * *stride as usize;
                encode_components(element, &[pair[0] as f64, pair[1] as f64], &mut out[start..]);
            }
        }
        _ => encode_components(ty, &value.components(), out),
    }
}

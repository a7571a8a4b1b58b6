//! Compiled programs keyed by their source text.

use std::collections::HashMap;
use std::fmt;

use prism_core::hash::{hash_shader_sources, ContentHash};
use tracing::{debug, warn};

use crate::device::{GraphicsDevice, ProgramId};
use crate::error::RenderResult;
use crate::node::{InputTable, ShaderNode};

/// Digest of a program's vertex and fragment source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderKey(ContentHash);

impl ShaderKey {
    pub fn new(vertex: &str, fragment: &str) -> Self {
        Self(hash_shader_sources(vertex, fragment))
    }
}

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_hex()[..12])
    }
}

/// A linked program. Immutable; uniforms change, the program does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderProgram {
    id: ProgramId,
    key: ShaderKey,
}

impl ShaderProgram {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn key(&self) -> ShaderKey {
        self.key
    }
}

#[derive(Default)]
pub struct ShaderCache {
    programs: HashMap<ShaderKey, ShaderProgram>,
    compile_count: usize,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program for `node` with these inputs, compiled on first use.
    pub fn get_or_compile<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        node: &dyn ShaderNode,
        inputs: &InputTable,
    ) -> RenderResult<ShaderProgram> {
        let vertex = node.vertex_source(inputs);
        let fragment = node.fragment_source(inputs);
        self.get_or_compile_source(device, &vertex, &fragment)
            .inspect_err(|err| warn!(node = node.id(), "shader compile failed: {err}"))
    }

    /// Program for a source pair. Empty stages take the device defaults.
    pub fn get_or_compile_source<D: GraphicsDevice + ?Sized>(
        &mut self,
        device: &mut D,
        vertex: &str,
        fragment: &str,
    ) -> RenderResult<ShaderProgram> {
        let vertex = if vertex.is_empty() {
            device.default_vertex_source()
        } else {
            vertex
        };
        let fragment = if fragment.is_empty() {
            device.default_fragment_source()
        } else {
            fragment
        };

        let key = ShaderKey::new(vertex, fragment);
        if let Some(program) = self.programs.get(&key) {
            return Ok(*program);
        }

        let id = device.compile_program(vertex, fragment)?;
        self.compile_count += 1;
        debug!(%key, program = id.0, "compiled shader program");

        let program = ShaderProgram { id, key };
        self.programs.insert(key, program);
        Ok(program)
    }

    /// Destroy every cached program.
    pub fn clear<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D) {
        for (_, program) in self.programs.drain() {
            device.destroy_program(program.id);
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Successful compiles over the cache's lifetime.
    pub fn compile_count(&self) -> usize {
        self.compile_count
    }
}

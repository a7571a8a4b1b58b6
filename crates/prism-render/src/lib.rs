//! # prism-render
//!
//! The Prism rendering engine. Turns graph nodes into GPU shader passes over
//! pooled textures, moves decoded frames onto the GPU in the reference
//! colorspace and reads rendered textures back into frames.
//!
//! Every GPU call goes through the [`GraphicsDevice`] trait. [`WgpuBackend`]
//! drives real hardware; [`SoftwareBackend`] rasterizes on the CPU.

pub mod bridge;
pub mod color;
pub mod context;
pub mod device;
pub mod engine;
pub mod error;
pub mod framebuffer;
pub mod node;
mod pass;
pub mod shader_cache;
pub mod texture_cache;
pub mod worker;

pub use bridge::corrected_dimensions;
pub use color::{ColorCache, ColorManager, ColorMethod, ColorProcessor, RenderMode, StreamInfo};
pub use device::software::{SoftwareBackend, SoftwareDevice, SoftwareLibrary};
pub use device::wgpu_backend::{WgpuBackend, WgpuDevice};
pub use device::{GraphicsBackend, GraphicsDevice, NativeContext};
pub use engine::{PendingEngine, RenderEngine};
pub use error::{RenderError, RenderResult};
pub use node::{
    InputTable, NodeInput, NodeValue, ParamKind, ShaderNode, StaticNode, TransitionProgress,
};
pub use texture_cache::{TextureCacheStats, TextureHandle};
pub use worker::RenderWorker;

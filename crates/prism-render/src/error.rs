use std::thread::ThreadId;

use prism_core::PrismError;

/// A specialized Result type for engine operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Failures surfaced by the render engine.
///
/// A texture input that resolves to nothing and a size mismatch on download
/// are handled inside the engine and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create graphics context: {0}")]
    ContextCreation(String),

    #[error("failed to make graphics context current: {0}")]
    ContextBind(String),

    #[error("render engine is not ready")]
    NotReady,

    #[error("render engine owned by thread {owner:?} was used from {actual:?}")]
    WrongThread { owner: ThreadId, actual: ThreadId },

    #[error("shader compile error: {0}")]
    ShaderCompile(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("render worker has shut down")]
    WorkerDisconnected,

    #[error(transparent)]
    Core(#[from] PrismError),
}

//! Thread-affine ownership of the native graphics context.
//!
//! Creating a context and making it current are split: [`PendingContext`] is
//! produced on the control thread and is `Send`; [`PendingContext::finalize`]
//! runs on the worker that will issue every later GPU call and pins the
//! resulting [`RenderContext`] to that thread.

use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use crate::device::{GraphicsBackend, GraphicsDevice, NativeContext};
use crate::error::{RenderError, RenderResult};

/// A native context that exists but is not current anywhere yet.
pub struct PendingContext<C: NativeContext> {
    native: C,
}

impl<C: NativeContext> PendingContext<C> {
    /// First init phase. Runs on the control path.
    pub fn initialize<B>(backend: &B) -> RenderResult<Self>
    where
        B: GraphicsBackend<Context = C>,
    {
        match backend.create_context() {
            Ok(native) => Ok(Self { native }),
            Err(err) => {
                warn!("failed to create graphics context: {err}");
                Err(match err {
                    RenderError::ContextCreation(_) => err,
                    other => RenderError::ContextCreation(other.to_string()),
                })
            }
        }
    }

    /// Second init phase. Must run on the owning worker.
    ///
    /// A failure to make the context current is logged and leaves the
    /// returned context permanently not ready.
    pub fn finalize(self) -> RenderContext<C::Device> {
        let owner = thread::current().id();
        let state = match self.native.make_current() {
            Ok(device) => {
                debug!(backend = device.backend_name(), ?owner, "graphics context is current");
                ContextState::Ready(device)
            }
            Err(err) => {
                warn!(?owner, "failed to make graphics context current: {err}");
                ContextState::Failed
            }
        };
        RenderContext { state, owner }
    }
}

enum ContextState<D> {
    Ready(D),
    Failed,
    Closed,
}

/// The device of a finalized context, usable only from its owning thread.
pub struct RenderContext<D> {
    state: ContextState<D>,
    owner: ThreadId,
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// A context that was never created; every call reports `NotReady`.
    pub fn unavailable() -> Self {
        Self {
            state: ContextState::Failed,
            owner: thread::current().id(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ContextState::Ready(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ContextState::Closed)
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    fn check_thread(&self) -> RenderResult<()> {
        let actual = thread::current().id();
        if actual != self.owner {
            return Err(RenderError::WrongThread {
                owner: self.owner,
                actual,
            });
        }
        Ok(())
    }

    pub fn device(&self) -> RenderResult<&D> {
        self.check_thread()?;
        match &self.state {
            ContextState::Ready(device) => Ok(device),
            _ => Err(RenderError::NotReady),
        }
    }

    pub fn device_mut(&mut self) -> RenderResult<&mut D> {
        self.check_thread()?;
        match &mut self.state {
            ContextState::Ready(device) => Ok(device),
            _ => Err(RenderError::NotReady),
        }
    }

    /// Destroy the context. Calling it again does nothing.
    pub fn close(&mut self) {
        if let ContextState::Ready(device) = std::mem::replace(&mut self.state, ContextState::Closed) {
            debug!(backend = device.backend_name(), "destroying graphics context");
        }
    }
}

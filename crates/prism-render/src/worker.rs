//! A dedicated render thread.
//!
//! The engine is bound to the thread that finalized it, so callers on other
//! threads hand it closures. Jobs run in submission order.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use prism_core::EngineConfig;
use tracing::{debug, info, warn};

use crate::device::{GraphicsBackend, GraphicsDevice, NativeContext};
use crate::engine::{PendingEngine, RenderEngine};
use crate::error::{RenderError, RenderResult};

type Job<D> = Box<dyn FnOnce(&mut RenderEngine<D>) + Send>;

/// Owns a thread running one [`RenderEngine`].
pub struct RenderWorker<D: GraphicsDevice + 'static> {
    jobs: Option<Sender<Job<D>>>,
    handle: Option<JoinHandle<()>>,
}

impl<D: GraphicsDevice + 'static> RenderWorker<D> {
    /// Create the context here, then finalize it on a new thread.
    pub fn spawn<B, C>(backend: &B, config: EngineConfig) -> RenderResult<Self>
    where
        B: GraphicsBackend<Context = C>,
        C: NativeContext<Device = D>,
    {
        Self::from_pending(PendingEngine::initialize(backend, config)?)
    }

    pub fn from_pending<C>(pending: PendingEngine<C>) -> RenderResult<Self>
    where
        C: NativeContext<Device = D>,
    {
        let (tx, rx) = crossbeam_channel::unbounded::<Job<D>>();
        let handle = thread::Builder::new()
            .name("prism-render".into())
            .spawn(move || {
                let mut engine = pending.finalize();
                info!(ready = engine.is_ready(), "render worker started");
                for job in rx.iter() {
                    job(&mut engine);
                }
                engine.close();
                debug!("render worker stopped");
            })
            .map_err(|e| RenderError::Device(format!("failed to spawn render worker: {e}")))?;

        Ok(Self {
            jobs: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue `job` without waiting for it.
    pub fn submit<F>(&self, job: F) -> RenderResult<()>
    where
        F: FnOnce(&mut RenderEngine<D>) + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or(RenderError::WorkerDisconnected)?;
        jobs.send(Box::new(job))
            .map_err(|_| RenderError::WorkerDisconnected)
    }

    /// Run `job` on the render thread and wait for its result.
    pub fn run<F, R>(&self, job: F) -> RenderResult<R>
    where
        F: FnOnce(&mut RenderEngine<D>) -> RenderResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.submit(move |engine| {
            let _ = reply_tx.send(job(engine));
        })?;
        reply_rx
            .recv()
            .map_err(|_| RenderError::WorkerDisconnected)?
    }

    /// Drain queued jobs, close the engine and join the thread.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        self.jobs.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RenderError::Device("render worker panicked".into())),
            None => Ok(()),
        }
    }
}

impl<D: GraphicsDevice + 'static> Drop for RenderWorker<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("render worker did not shut down cleanly: {err}");
        }
    }
}

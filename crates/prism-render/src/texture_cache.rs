//! Pooled render-target textures.
//!
//! Textures live in an index-addressed slot arena owned by the cache. A
//! [`TextureHandle`] is a reference-counted lease on one slot: cloning it
//! shares the lease, and dropping the last clone puts the slot back on the
//! idle list for its [`RenderTargetSpec`]. Handles do not hold the device, so
//! surplus idle textures are destroyed on the next call that does.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use prism_core::{Frame, RenderTargetSpec};
use tracing::{debug, trace};

use crate::device::{GraphicsDevice, TextureId};
use crate::error::{RenderError, RenderResult};

struct Slot {
    texture: TextureId,
    spec: RenderTargetSpec,
    leased: bool,
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Option<Slot>>,
    vacant: Vec<usize>,
    idle: HashMap<RenderTargetSpec, Vec<usize>>,
    /// Bumped by `clear`; leases from an older generation are stale.
    generation: u64,
    created_total: usize,
}

impl PoolState {
    fn release(&mut self, index: usize, generation: u64) {
        if generation != self.generation {
            return;
        }
        let Some(Some(slot)) = self.slots.get_mut(index) else {
            return;
        };
        if !slot.leased {
            return;
        }
        slot.leased = false;
        trace!(texture = slot.texture.0, "texture returned to pool");
        self.idle.entry(slot.spec).or_default().push(index);
    }

    fn destroy_slot<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D, index: usize) {
        if let Some(slot) = self.slots.get_mut(index).and_then(Option::take) {
            device.destroy_texture(slot.texture);
            self.vacant.push(index);
        }
    }

    fn trim<D: GraphicsDevice + ?Sized>(&mut self, device: &mut D, keep: usize) {
        let mut surplus = Vec::new();
        for list in self.idle.values_mut() {
            if list.len() > keep {
                // Oldest releases sit at the front.
                surplus.extend(list.drain(..list.len() - keep));
            }
        }
        self.idle.retain(|_, list| !list.is_empty());
        if !surplus.is_empty() {
            debug!(count = surplus.len(), "destroying surplus idle textures");
        }
        for index in surplus {
            self.destroy_slot(device, index);
        }
    }
}

struct Lease {
    pool: Weak<RefCell<PoolState>>,
    index: usize,
    generation: u64,
    texture: TextureId,
    spec: RenderTargetSpec,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            if let Ok(mut state) = pool.try_borrow_mut() {
                state.release(self.index, self.generation);
            }
        }
    }
}

/// A shared lease on a pooled texture.
#[derive(Clone)]
pub struct TextureHandle(Rc<Lease>);

impl TextureHandle {
    pub fn texture(&self) -> TextureId {
        self.0.texture
    }

    /// The spec the texture was requested with.
    pub fn spec(&self) -> RenderTargetSpec {
        self.0.spec
    }

    /// Allocated width, after the divider.
    pub fn width(&self) -> u32 {
        self.0.spec.effective_width()
    }

    /// Allocated height, after the divider.
    pub fn height(&self) -> u32 {
        self.0.spec.effective_height()
    }

    pub fn divider(&self) -> u32 {
        self.0.spec.divider
    }

    /// Number of live clones of this lease.
    pub fn lease_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Whether both handles share one lease.
    pub fn ptr_eq(&self, other: &TextureHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureHandle")
            .field("texture", &self.0.texture)
            .field("spec", &self.0.spec)
            .field("leases", &self.lease_count())
            .finish()
    }
}

/// Counts describing the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureCacheStats {
    /// Textures currently alive, leased or idle.
    pub allocated: usize,
    pub leased: usize,
    pub idle: usize,
    /// Textures created over the cache's lifetime.
    pub created_total: usize,
}

/// Pool of textures keyed by [`RenderTargetSpec`].
pub struct TextureCache {
    state: Rc<RefCell<PoolState>>,
    max_idle_per_spec: Option<usize>,
}

impl TextureCache {
    pub fn new(max_idle_per_spec: Option<usize>) -> Self {
        Self {
            state: Rc::new(RefCell::new(PoolState::default())),
            max_idle_per_spec,
        }
    }

    /// Lease a texture of `spec`, reusing an idle one when possible.
    ///
    /// The returned texture is never leased by another live handle.
    pub fn get<D: GraphicsDevice + ?Sized>(
        &self,
        device: &mut D,
        spec: RenderTargetSpec,
    ) -> RenderResult<TextureHandle> {
        let mut state = self.state.borrow_mut();
        if let Some(keep) = self.max_idle_per_spec {
            state.trim(device, keep);
        }

        let reused = state.idle.get_mut(&spec).and_then(|list| list.pop());
        let index = match reused {
            Some(index) => {
                trace!(index, "reusing pooled texture");
                index
            }
            None => {
                let texture = device.create_texture(
                    spec.effective_width(),
                    spec.effective_height(),
                    spec.format,
                )?;
                debug!(
                    texture = texture.0,
                    width = spec.effective_width(),
                    height = spec.effective_height(),
                    format = ?spec.format,
                    "allocated texture"
                );
                state.created_total += 1;
                let slot = Some(Slot {
                    texture,
                    spec,
                    leased: false,
                });
                match state.vacant.pop() {
                    Some(index) => {
                        state.slots[index] = slot;
                        index
                    }
                    None => {
                        state.slots.push(slot);
                        state.slots.len() - 1
                    }
                }
            }
        };

        let generation = state.generation;
        let Some(slot) = state.slots.get_mut(index).and_then(Option::as_mut) else {
            return Err(RenderError::Device(format!("texture pool slot {index} is empty")));
        };
        slot.leased = true;

        Ok(TextureHandle(Rc::new(Lease {
            pool: Rc::downgrade(&self.state),
            index,
            generation,
            texture: slot.texture,
            spec,
        })))
    }

    /// Lease a texture shaped like `frame` and upload its pixels.
    pub fn get_for_frame<D: GraphicsDevice + ?Sized>(
        &self,
        device: &mut D,
        frame: &Frame,
    ) -> RenderResult<TextureHandle> {
        let handle = self.get(device, frame.spec())?;
        device.upload_texture(handle.texture(), frame)?;
        Ok(handle)
    }

    /// Destroy idle textures beyond the configured per-spec limit.
    pub fn trim<D: GraphicsDevice + ?Sized>(&self, device: &mut D) {
        if let Some(keep) = self.max_idle_per_spec {
            self.state.borrow_mut().trim(device, keep);
        }
    }

    /// Destroy every texture, leased or idle. Outstanding handles become inert.
    pub fn clear<D: GraphicsDevice + ?Sized>(&self, device: &mut D) {
        let mut state = self.state.borrow_mut();
        let count = state.slots.iter().flatten().count();
        for slot in state.slots.drain(..).flatten() {
            device.destroy_texture(slot.texture);
        }
        state.vacant.clear();
        state.idle.clear();
        state.generation += 1;
        debug!(count, "cleared texture cache");
    }

    pub fn stats(&self) -> TextureCacheStats {
        let state = self.state.borrow();
        let allocated = state.slots.iter().flatten().count();
        let leased = state.slots.iter().flatten().filter(|s| s.leased).count();
        TextureCacheStats {
            allocated,
            leased,
            idle: allocated - leased,
            created_total: state.created_total,
        }
    }
}

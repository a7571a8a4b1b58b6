//! The boundary with the color-management subsystem.
//!
//! Processors come from an external [`ColorManager`] and are memoized per
//! colorspace pair for the life of the engine. Which path a frame takes
//! depends on the render mode: online renders favour the accurate CPU
//! transform, offline renders the single-pass GPU one.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use prism_core::{ColorMethodOverride, Frame};
use tracing::debug;

use crate::device::GraphicsDevice;
use crate::error::RenderResult;

/// Why a frame is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Proxy or preview quality.
    Offline,
    /// Final output.
    Online,
}

/// How the colorspace transform is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMethod {
    /// On the CPU, in float, before upload.
    Accurate,
    /// As a shader blit after upload.
    Fast,
    Disabled,
}

impl ColorMethod {
    pub fn for_mode(mode: RenderMode, config: ColorMethodOverride) -> Self {
        match config {
            ColorMethodOverride::Accurate => ColorMethod::Accurate,
            ColorMethodOverride::Fast => ColorMethod::Fast,
            ColorMethodOverride::Disabled => ColorMethod::Disabled,
            ColorMethodOverride::Auto => match mode {
                RenderMode::Online => ColorMethod::Accurate,
                RenderMode::Offline => ColorMethod::Fast,
            },
        }
    }
}

/// Transform from one colorspace to another.
pub trait ColorProcessor {
    /// Transform a float frame with straight alpha in place.
    fn convert_on_cpu(&self, frame: &mut Frame) -> RenderResult<()>;

    /// Allocate GPU resources. Called once, before the first
    /// [`execute_on_gpu`](ColorProcessor::execute_on_gpu).
    fn enable_on_gpu(
        &mut self,
        device: &mut dyn GraphicsDevice,
        premultiplied_alpha: bool,
    ) -> RenderResult<()>;

    fn is_enabled_on_gpu(&self) -> bool;

    /// Draw the transform into the bound framebuffer, reading the texture
    /// bound to unit 0.
    fn execute_on_gpu(&self, device: &mut dyn GraphicsDevice) -> RenderResult<()>;

    /// Free whatever `enable_on_gpu` allocated.
    fn release_gpu(&mut self, _device: &mut dyn GraphicsDevice) {}
}

/// Source of color processors.
pub trait ColorManager {
    /// The working colorspace every stream is converted into.
    fn reference_colorspace(&self) -> String;

    fn create_processor(&self, input: &str, output: &str) -> RenderResult<Box<dyn ColorProcessor>>;
}

/// Color metadata of the stream a frame came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub colorspace: String,
    pub premultiplied_alpha: bool,
}

impl StreamInfo {
    pub fn new(colorspace: impl Into<String>, premultiplied_alpha: bool) -> Self {
        Self {
            colorspace: colorspace.into(),
            premultiplied_alpha,
        }
    }

    /// Key identifying the processor this stream needs.
    pub fn colorspace_match(&self, reference: &str) -> String {
        format!("{}->{}", self.colorspace, reference)
    }
}

/// Processors memoized by colorspace pair.
#[derive(Default)]
pub struct ColorCache {
    processors: HashMap<String, Box<dyn ColorProcessor>>,
}

impl ColorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The processor for `stream`, created through `manager` on first use.
    pub fn resolve(
        &mut self,
        manager: &dyn ColorManager,
        stream: &StreamInfo,
    ) -> RenderResult<&mut dyn ColorProcessor> {
        let reference = manager.reference_colorspace();
        let processor = match self.processors.entry(stream.colorspace_match(&reference)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(key = %entry.key(), "creating color processor");
                entry.insert(manager.create_processor(&stream.colorspace, &reference)?)
            }
        };
        Ok(processor.as_mut())
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Release GPU resources of every processor and forget them.
    pub fn clear(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, mut processor) in self.processors.drain() {
            processor.release_gpu(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Identity;

    impl ColorProcessor for Identity {
        fn convert_on_cpu(&self, _frame: &mut Frame) -> RenderResult<()> {
            Ok(())
        }

        fn enable_on_gpu(&mut self, _: &mut dyn GraphicsDevice, _: bool) -> RenderResult<()> {
            Ok(())
        }

        fn is_enabled_on_gpu(&self) -> bool {
            false
        }

        fn execute_on_gpu(&self, _: &mut dyn GraphicsDevice) -> RenderResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingManager {
        created: Cell<usize>,
    }

    impl ColorManager for CountingManager {
        fn reference_colorspace(&self) -> String {
            "scene_linear".into()
        }

        fn create_processor(&self, _: &str, _: &str) -> RenderResult<Box<dyn ColorProcessor>> {
            self.created.set(self.created.get() + 1);
            Ok(Box::new(Identity))
        }
    }

    #[test]
    fn test_mode_selection() {
        let auto = ColorMethodOverride::Auto;
        assert_eq!(ColorMethod::for_mode(RenderMode::Online, auto), ColorMethod::Accurate);
        assert_eq!(ColorMethod::for_mode(RenderMode::Offline, auto), ColorMethod::Fast);
        assert_eq!(
            ColorMethod::for_mode(RenderMode::Online, ColorMethodOverride::Disabled),
            ColorMethod::Disabled
        );
    }

    #[test]
    fn test_processor_is_memoized_per_key() {
        let manager = CountingManager::default();
        let mut cache = ColorCache::new();
        let srgb = StreamInfo::new("sRGB", false);
        let rec709 = StreamInfo::new("Rec.709", true);

        cache.resolve(&manager, &srgb).unwrap();
        cache.resolve(&manager, &srgb).unwrap();
        cache.resolve(&manager, &rec709).unwrap();

        assert_eq!(manager.created.get(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_match_key_includes_reference() {
        let stream = StreamInfo::new("sRGB", false);
        assert_eq!(stream.colorspace_match("ACEScg"), "sRGB->ACEScg");
    }
}

//! # prism-core
//!
//! Core types and primitives for the Prism node renderer.
//! This crate contains the value types shared between the engine and its
//! callers: CPU frames and pixel formats, render-target specs, colors, time,
//! matrices, content hashing, configuration, and error types.

pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod hash;
pub mod math;
pub mod params;
pub mod time;

pub use config::*;

pub use color::Color;
pub use error::{PrismError, PrismResult};
pub use frame::{Frame, PixelFormat, Rational};
pub use math::Matrix4;
pub use params::RenderTargetSpec;
pub use time::{Duration, TimeRange, Timestamp};

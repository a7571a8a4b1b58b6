use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative span of time, stored as fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Duration {
    seconds: f64,
}

impl Duration {
    /// Create a duration from seconds. Negative input clamps to zero.
    pub fn from_seconds(s: f64) -> Self {
        Self {
            seconds: s.max(0.0),
        }
    }

    pub fn zero() -> Self {
        Self { seconds: 0.0 }
    }

    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }
}

/// A point on the timeline, in seconds from its start.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: f64,
}

impl Timestamp {
    /// Create a timestamp from seconds. Negative input clamps to zero.
    pub fn from_seconds(s: f64) -> Self {
        Self {
            seconds: s.max(0.0),
        }
    }

    pub fn zero() -> Self {
        Self { seconds: 0.0 }
    }

    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }

    /// Absolute distance between two timestamps.
    pub fn duration_to(&self, other: &Timestamp) -> Duration {
        Duration::from_seconds((other.seconds - self.seconds).abs())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = (self.seconds * 1000.0) as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let secs = (total_ms % 60_000) / 1_000;
        let ms = total_ms % 1_000;
        write!(f, "{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, ms)
    }
}

/// The span of time a node is rendered for. Shader uniforms that depend on
/// time are evaluated at the in point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    in_point: Timestamp,
    out_point: Timestamp,
}

impl TimeRange {
    /// Create a range; the bounds are swapped if given in reverse order.
    pub fn new(in_point: Timestamp, out_point: Timestamp) -> Self {
        if out_point < in_point {
            return Self {
                in_point: out_point,
                out_point: in_point,
            };
        }
        Self {
            in_point,
            out_point,
        }
    }

    /// A zero-length range at a single instant.
    pub fn at(t: Timestamp) -> Self {
        Self::new(t, t)
    }

    pub fn in_point(&self) -> Timestamp {
        self.in_point
    }

    pub fn out_point(&self) -> Timestamp {
        self.out_point
    }

    pub fn length(&self) -> Duration {
        self.in_point.duration_to(&self.out_point)
    }
}

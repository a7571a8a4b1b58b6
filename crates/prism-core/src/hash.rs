//! Content hashing.
//!
//! SHA-256 digests identify compiled shader programs by their source text and
//! let tests compare frame contents bit-exactly.

use sha2::{Digest, Sha256};

use crate::frame::Frame;

/// A content hash digest (SHA-256, 32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    fn finish(hasher: Sha256) -> Self {
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        ContentHash::from_bytes(bytes)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the content hash of the visible pixels of a frame.
///
/// Row padding is skipped, so two frames with different strides but the
/// same image hash equal.
pub fn hash_frame(frame: &Frame) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(frame.width().to_le_bytes());
    hasher.update(frame.height().to_le_bytes());
    hasher.update([frame.format() as u8]);
    for y in 0..frame.height() {
        hasher.update(frame.row(y));
    }
    ContentHash::finish(hasher)
}

/// Hash a vertex + fragment source pair.
///
/// Each stage is length-prefixed so moving text between the two stages
/// changes the digest.
pub fn hash_shader_sources(vertex: &str, fragment: &str) -> ContentHash {
    let mut hasher = Sha256::new();
    for source in [vertex, fragment] {
        hasher.update((source.len() as u64).to_le_bytes());
        hasher.update(source.as_bytes());
    }
    ContentHash::finish(hasher)
}

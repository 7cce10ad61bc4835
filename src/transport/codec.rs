//! Wire codec for client messages.
//!
//! bincode encoding framed with size-prepended LZ4.

use crate::core::{Error, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative codec statistics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodecStats {
    /// Frames encoded
    pub frames: u64,
    /// Encoded size before compression, in bytes
    pub original_bytes: u64,
    /// Size on the wire, in bytes
    pub compressed_bytes: u64,
}

impl CodecStats {
    /// Compression ratio (original / compressed).
    pub fn ratio(&self) -> f64 {
        if self.compressed_bytes > 0 {
            self.original_bytes as f64 / self.compressed_bytes as f64
        } else {
            1.0
        }
    }
}

/// Encoder/decoder shared by every call on a transport.
#[derive(Debug, Default)]
pub struct WireCodec {
    frames: AtomicU64,
    original_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
}

impl WireCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a message into one frame.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>> {
        let raw = bincode::serialize(message)?;
        let frame = compress_prepend_size(&raw);

        self.frames.fetch_add(1, Ordering::Relaxed);
        self.original_bytes
            .fetch_add(raw.len() as u64, Ordering::Relaxed);
        self.compressed_bytes
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(frame)
    }

    /// Decode one frame.
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T> {
        let raw = decompress_size_prepended(frame)
            .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
        bincode::deserialize(&raw).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> CodecStats {
        CodecStats {
            frames: self.frames.load(Ordering::Relaxed),
            original_bytes: self.original_bytes.load(Ordering::Relaxed),
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
        }
    }
}

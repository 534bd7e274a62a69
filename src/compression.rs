//! LZ4 compression for stored blobs
//!
//! Every object written to the version store passes through the
//! `CompressionEngine`. Compressed data carries a 4-byte header:
//!
//! - `LZ4F`: LZ4 block with prepended size follows
//! - `\0\0\0\0`: raw content follows
//!
//! so readers never need to know which strategy wrote an object.
//!
//! ```rust
//! use forkpoint::compression::{CompressionEngine, CompressionStrategy};
//!
//! let mut engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let data = b"print('hello')\n".repeat(20);
//! let stored = engine.compress(&data).unwrap();
//! assert_eq!(engine.decompress(&stored).unwrap(), data);
//! ```

use crate::error::{ForkpointError, Result};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::str::FromStr;
use std::time::Instant;
use tracing::trace;

const LZ4_MAGIC: &[u8; 4] = b"LZ4F";
const RAW_MAGIC: &[u8; 4] = &[0, 0, 0, 0];

/// Content below this size is always stored raw
const MIN_COMPRESS_SIZE: usize = 64;

/// When objects are compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionStrategy {
    /// Store everything raw
    None,
    /// LZ4 whenever it makes the object smaller
    #[default]
    Fast,
}

impl FromStr for CompressionStrategy {
    type Err = ForkpointError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionStrategy::None),
            "fast" => Ok(CompressionStrategy::Fast),
            other => Err(ForkpointError::InvalidConfiguration(format!(
                "unknown compression strategy {:?}",
                other
            ))),
        }
    }
}

impl CompressionStrategy {
    /// Name used in the persisted configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionStrategy::None => "none",
            CompressionStrategy::Fast => "fast",
        }
    }
}

/// Running totals kept by an engine
#[derive(Debug, Default, Clone)]
pub struct CompressionStats {
    /// Objects written compressed
    pub objects_compressed: usize,
    /// Objects written raw
    pub objects_stored_raw: usize,
    /// Bytes saved by compression
    pub bytes_saved: usize,
    /// Time spent compressing, in microseconds
    pub compression_time_us: u64,
}

/// Compression engine applying a strategy
#[derive(Debug, Default)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    stats: CompressionStats,
}

impl CompressionEngine {
    /// Create a new compression engine with the specified strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self { strategy, stats: CompressionStats::default() }
    }

    /// Statistics since creation
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Encode content for storage
    pub fn compress(&mut self, content: &[u8]) -> Result<Vec<u8>> {
        if self.strategy == CompressionStrategy::None || content.len() < MIN_COMPRESS_SIZE {
            return Ok(self.store_raw(content));
        }

        let start = Instant::now();
        let compressed = compress_prepend_size(content);
        self.stats.compression_time_us += start.elapsed().as_micros() as u64;

        if compressed.len() >= content.len() {
            trace!("Compression not beneficial ({} bytes), storing raw", content.len());
            return Ok(self.store_raw(content));
        }

        self.stats.objects_compressed += 1;
        self.stats.bytes_saved += content.len() - compressed.len();

        let mut result = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
        result.extend_from_slice(LZ4_MAGIC);
        result.extend_from_slice(&compressed);
        Ok(result)
    }

    /// Decode stored content, whichever strategy wrote it
    pub fn decompress(&self, stored: &[u8]) -> Result<Vec<u8>> {
        if stored.len() < 4 {
            return Err(ForkpointError::Decompression(format!(
                "object too short ({} bytes)",
                stored.len()
            )));
        }

        let (header, body) = stored.split_at(4);
        if header == LZ4_MAGIC {
            decompress_size_prepended(body)
                .map_err(|e| ForkpointError::Decompression(e.to_string()))
        } else if header == RAW_MAGIC {
            Ok(body.to_vec())
        } else {
            Err(ForkpointError::Decompression("unknown object header".to_string()))
        }
    }

    fn store_raw(&mut self, content: &[u8]) -> Vec<u8> {
        self.stats.objects_stored_raw += 1;
        let mut result = Vec::with_capacity(RAW_MAGIC.len() + content.len());
        result.extend_from_slice(RAW_MAGIC);
        result.extend_from_slice(content);
        result
    }
}

//! Payload Compression
//!
//! Optional compression of Tier 2 payloads. Forecast series are repetitive
//! JSON and shrink well; the algorithm used is recorded with each record so
//! readers never need the writer's configuration.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Compression algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
            CompressionAlgorithm::Snappy => write!(f, "snappy"),
        }
    }
}

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for compression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Algorithm applied to new writes
    pub algorithm: CompressionAlgorithm,
    /// Minimum size to compress (smaller payloads are stored as-is)
    pub min_size_bytes: u64,
    /// Compression level (lz4/zstd only)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Zstd,
            min_size_bytes: 1024,
            level: 3,
        }
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through compressor
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// LZ4 compressor (fast compression)
pub struct Lz4Compressor {
    level: i32,
}

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::Compression(format!("LZ4 compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None)
            .map_err(|e| Error::Compression(format!("LZ4 decompression failed: {}", e)))
    }
}

/// Zstd compressor (balanced compression)
pub struct ZstdCompressor {
    level: i32,
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
            .map_err(|e| Error::Compression(format!("Zstd compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|e| Error::Compression(format!("Zstd decompression failed: {}", e)))
    }
}

/// Snappy compressor (very fast, lower ratio)
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::Compression(format!("Snappy decompression failed: {}", e)))
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Compresses with the configured algorithm and decompresses any algorithm
pub struct CompressionManager {
    config: CompressionConfig,
    lz4: Lz4Compressor,
    zstd: ZstdCompressor,
    snappy: SnappyCompressor,
    noop: NoopCompressor,
}

impl CompressionManager {
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            lz4: Lz4Compressor { level: config.level },
            zstd: ZstdCompressor { level: config.level },
            snappy: SnappyCompressor,
            noop: NoopCompressor,
            config,
        }
    }

    fn compressor(&self, algorithm: CompressionAlgorithm) -> &dyn Compressor {
        match algorithm {
            CompressionAlgorithm::None => &self.noop,
            CompressionAlgorithm::Lz4 => &self.lz4,
            CompressionAlgorithm::Zstd => &self.zstd,
            CompressionAlgorithm::Snappy => &self.snappy,
        }
    }

    /// Compress using the configured algorithm
    ///
    /// Returns (stored_data, algorithm_used). Falls back to uncompressed if
    /// compression fails, the payload is too small, or it does not shrink.
    pub fn compress(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        let algorithm = self.config.algorithm;
        if algorithm == CompressionAlgorithm::None || (data.len() as u64) < self.config.min_size_bytes {
            return (Bytes::copy_from_slice(data), CompressionAlgorithm::None);
        }

        match self.compressor(algorithm).compress(data) {
            Ok(compressed) if compressed.len() < data.len() => (Bytes::from(compressed), algorithm),
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                tracing::warn!(algorithm = %algorithm, error = %e, "Compression failed, storing uncompressed");
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Decompress data written with `algorithm`
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        Ok(Bytes::from(self.compressor(algorithm).decompress(data)?))
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &[u8] = br#"{"points":[{"day":1,"balance":1200.5},{"day":2,"balance":1200.5},{"day":3,"balance":1200.5},{"day":4,"balance":1200.5},{"day":5,"balance":1200.5}]}"#;

    fn manager(algorithm: CompressionAlgorithm) -> CompressionManager {
        CompressionManager::with_config(CompressionConfig {
            algorithm,
            min_size_bytes: 16,
            level: 3,
        })
    }

    #[test]
    fn test_each_algorithm_shrinks_repetitive_payloads() {
        for algorithm in [
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Zstd,
            CompressionAlgorithm::Snappy,
        ] {
            let manager = manager(algorithm);
            let (stored, used) = manager.compress(TEST_DATA);
            assert_eq!(used, algorithm);
            assert!(stored.len() < TEST_DATA.len());
            assert_eq!(manager.decompress(&stored, used).unwrap().as_ref(), TEST_DATA);
        }
    }

    #[test]
    fn test_small_payload_not_compressed() {
        let manager = CompressionManager::new();
        let (stored, used) = manager.compress(b"tiny");
        assert_eq!(used, CompressionAlgorithm::None);
        assert_eq!(stored.as_ref(), b"tiny");
    }

    #[test]
    fn test_disabled_compression() {
        let manager = manager(CompressionAlgorithm::None);
        let (stored, used) = manager.compress(TEST_DATA);
        assert_eq!(used, CompressionAlgorithm::None);
        assert_eq!(stored.as_ref(), TEST_DATA);
    }

    #[test]
    fn test_corrupt_payload_fails_to_decompress() {
        let manager = CompressionManager::new();
        assert!(manager
            .decompress(b"definitely not zstd", CompressionAlgorithm::Zstd)
            .is_err());
    }

    #[test]
    fn test_algorithm_serde() {
        let algo: CompressionAlgorithm = serde_yaml::from_str("snappy").unwrap();
        assert_eq!(algo, CompressionAlgorithm::Snappy);
        assert_eq!(CompressionAlgorithm::Lz4.to_string(), "lz4");
    }
}

//! Compression Codec
//!
//! Optional write-time value compression built on flate2. Values are
//! serialized to JSON bytes first; entries remember the algorithm they were
//! written with so a configuration change never breaks reads.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::CompressionConfig;
use crate::error::{CacheError, Result};

// == Algorithm ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    Deflate,
    Zlib,
}

impl CompressionAlgorithm {
    /// Algorithm used when the configured one fails.
    pub const BASELINE: CompressionAlgorithm = CompressionAlgorithm::Gzip;

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Zlib => "zlib",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionAlgorithm::Gzip),
            "deflate" => Ok(CompressionAlgorithm::Deflate),
            "zlib" => Ok(CompressionAlgorithm::Zlib),
            other => Err(CacheError::Compression(format!(
                "unknown compression algorithm '{}'",
                other
            ))),
        }
    }
}

// == Raw Codec ==
/// Compresses `data` with `algorithm` at the default level.
pub fn compress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    let level = Compression::default();
    let out = match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(data).map_err(codec_err)?;
            encoder.finish()
        }
        CompressionAlgorithm::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), level);
            encoder.write_all(data).map_err(codec_err)?;
            encoder.finish()
        }
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data).map_err(codec_err)?;
            encoder.finish()
        }
    };
    out.map_err(codec_err)
}

/// Reverses [`compress`].
pub fn decompress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let read = match algorithm {
        CompressionAlgorithm::Gzip => GzDecoder::new(data).read_to_end(&mut out),
        CompressionAlgorithm::Deflate => DeflateDecoder::new(data).read_to_end(&mut out),
        CompressionAlgorithm::Zlib => ZlibDecoder::new(data).read_to_end(&mut out),
    };
    read.map_err(codec_err)?;
    Ok(out)
}

fn codec_err(err: std::io::Error) -> CacheError {
    CacheError::Compression(err.to_string())
}

// == Stored Value ==
/// Value as held by an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Plain(Value),
    Compressed {
        algorithm: CompressionAlgorithm,
        bytes: Vec<u8>,
    },
}

impl StoredValue {
    pub fn is_compressed(&self) -> bool {
        matches!(self, StoredValue::Compressed { .. })
    }

    /// Returns the original value, decompressing if needed.
    pub fn decode(&self) -> Result<Value> {
        match self {
            StoredValue::Plain(value) => Ok(value.clone()),
            StoredValue::Compressed { algorithm, bytes } => {
                let raw = decompress(*algorithm, bytes)?;
                Ok(serde_json::from_slice(&raw)?)
            }
        }
    }
}

/// Result of encoding a value for storage.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub value: StoredValue,
    /// Serialized size before compression
    pub original_size: usize,
    /// Size actually held (equals `original_size` when uncompressed)
    pub stored_size: usize,
}

// == Compressor ==
/// Applies the configured compression policy to values on write.
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Encodes `value`, compressing when enabled and over the threshold.
    ///
    /// Codec failures never fail the write: the configured algorithm is
    /// tried first, then the baseline, then the value is stored plain.
    /// Compressed output is kept only when it is smaller than the input.
    pub fn encode(&self, value: Value) -> Result<Encoded> {
        let raw = serde_json::to_vec(&value)?;
        let original_size = raw.len();

        if !self.config.enabled || original_size < self.config.threshold {
            return Ok(plain(value, original_size));
        }

        let mut candidates = vec![self.config.algorithm];
        if self.config.algorithm != CompressionAlgorithm::BASELINE {
            candidates.push(CompressionAlgorithm::BASELINE);
        }

        for algorithm in candidates {
            match compress(algorithm, &raw) {
                Ok(bytes) if bytes.len() < original_size => {
                    let stored_size = bytes.len();
                    return Ok(Encoded {
                        value: StoredValue::Compressed { algorithm, bytes },
                        original_size,
                        stored_size,
                    });
                }
                Ok(_) => return Ok(plain(value, original_size)),
                Err(err) => {
                    warn!(%algorithm, error = %err, "compression failed, trying fallback");
                }
            }
        }

        Ok(plain(value, original_size))
    }
}

fn plain(value: Value, size: usize) -> Encoded {
    Encoded {
        value: StoredValue::Plain(value),
        original_size: size,
        stored_size: size,
    }
}

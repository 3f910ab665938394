//! Gzip compression layer for message bodies.
//!
//! Every encoded body carries a one-byte marker:
//!
//! - `0x00` prefix: uncompressed data follows
//! - `0x1f` prefix: gzip-compressed data follows (0x1f is gzip magic byte)
//!
//! Bodies below the threshold, or that gzip fails to shrink, are sent raw.
//! Install it with [`crate::transport::Connection::with_middleware`] on
//! both peers; it runs on the plaintext side of the cipher.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use super::Middleware;
use crate::error::{NetError, NetResult};

/// Marker byte for uncompressed data.
const MARKER_UNCOMPRESSED: u8 = 0x00;

/// Marker byte for gzip-compressed data (also gzip magic byte).
const MARKER_GZIP: u8 = 0x1f;

/// Default minimum body size worth compressing.
pub const DEFAULT_THRESHOLD: usize = 4096;

/// Gzip middleware with a size threshold.
#[derive(Debug, Clone, Copy)]
pub struct Compression {
    threshold: usize,
}

impl Compression {
    /// Compress bodies of at least `threshold` bytes.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

fn with_marker(marker: u8, data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(1 + data.len());
    result.push(marker);
    result.extend_from_slice(data);
    result
}

impl Middleware for Compression {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn encode(&self, data: Vec<u8>) -> NetResult<Vec<u8>> {
        if data.len() < self.threshold {
            return Ok(with_marker(MARKER_UNCOMPRESSED, &data));
        }

        let mut compressed = Vec::with_capacity(data.len());
        compressed.push(MARKER_GZIP);
        {
            let mut encoder = GzEncoder::new(&mut compressed, flate2::Compression::fast());
            encoder
                .write_all(&data)
                .map_err(|e| NetError::protocol(format!("gzip write failed: {e}")))?;
            encoder
                .finish()
                .map_err(|e| NetError::protocol(format!("gzip finish failed: {e}")))?;
        }

        // Only use compressed if actually smaller
        if compressed.len() < data.len() + 1 {
            Ok(compressed)
        } else {
            Ok(with_marker(MARKER_UNCOMPRESSED, &data))
        }
    }

    fn decode(&self, data: Vec<u8>) -> NetResult<Vec<u8>> {
        let Some((&marker, body)) = data.split_first() else {
            return Err(NetError::protocol("compressed body missing marker byte"));
        };

        match marker {
            MARKER_UNCOMPRESSED => Ok(body.to_vec()),
            MARKER_GZIP => {
                let mut decoder = GzDecoder::new(body);
                let mut decompressed = Vec::new();
                decoder
                    .read_to_end(&mut decompressed)
                    .map_err(|e| NetError::protocol(format!("gzip decompress failed: {e}")))?;
                Ok(decompressed)
            }
            other => Err(NetError::protocol(format!(
                "unknown compression marker 0x{other:02x}"
            ))),
        }
    }
}

//! Length-prefixed framing over a byte stream.
//!
//! ```text
//! [u32 LE length] [body: length bytes]
//! ```
//!
//! The body is opaque at this layer: ciphertext+tag for encrypted
//! connections, the handshake envelope for the one asymmetric handshake
//! frame, or serialized JSON when no security is configured. A zero-length
//! body is a valid frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE, READ_CHUNK_SIZE};
use crate::error::{NetError, NetResult};

/// Sizes of one frame on the wire, reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Length header width in bytes.
    pub header_size: usize,
    /// Body length in bytes.
    pub body_size: usize,
    /// Header plus body.
    pub total_size: usize,
}

impl FrameStats {
    /// Stats for a frame carrying `body_size` bytes.
    pub fn for_body(body_size: usize) -> Self {
        Self {
            header_size: FRAME_HEADER_SIZE,
            body_size,
            total_size: FRAME_HEADER_SIZE + body_size,
        }
    }
}

/// Encode a body into a wire-format frame.
///
/// Returns `[u32 LE length][body]`.
pub fn encode_frame(body: &[u8]) -> NetResult<Vec<u8>> {
    let length = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            NetError::transport(format!(
                "Frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                body.len()
            ))
        })?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and pull complete bodies with
/// [`FrameDecoder::next_frame`]. Bytes belonging to a following frame stay
/// buffered for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append raw stream bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete body, if one is fully buffered.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the declared length exceeds the limit.
    pub fn next_frame(&mut self) -> NetResult<Option<Vec<u8>>> {
        let Some(header) = self.buf.get(..FRAME_HEADER_SIZE) else {
            return Ok(None);
        };
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if length > MAX_FRAME_SIZE {
            return Err(NetError::transport(format!(
                "Frame too large: {length} bytes (max {MAX_FRAME_SIZE})"
            )));
        }

        let total = FRAME_HEADER_SIZE + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let body = self.buf[FRAME_HEADER_SIZE..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(body))
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Read one complete frame body, looping over short reads.
///
/// A peer disconnect before the declared length has arrived is an error,
/// never a truncated body.
pub async fn read_frame<R>(reader: &mut R, decoder: &mut FrameDecoder) -> NetResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        if let Some(body) = decoder.next_frame()? {
            return Ok(body);
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(if decoder.has_partial() {
                NetError::transport(format!(
                    "Peer disconnected mid-frame ({} bytes buffered)",
                    decoder.buffered()
                ))
            } else {
                NetError::transport("Peer disconnected")
            });
        }
        decoder.feed(&chunk[..n]);
    }
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> NetResult<FrameStats>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(body)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(FrameStats::for_body(body.len()))
}

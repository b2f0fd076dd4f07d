//! # Frame Codec
//!
//! Split a TCP byte stream into length-prefixed message frames.
//!
//! ## Design Principles
//!
//! 1. **State Machine Pattern**: Explicit decoder states avoid re-reading the
//!    length prefix and keep control flow predictable.
//! 2. **Streaming Friendly**: The decoder consumes from a mutable buffer and
//!    returns `None` when more data is needed.
//! 3. **Bounded Frames**: A frame larger than the configured limit is a
//!    protocol error, so a bad peer cannot make us buffer without bound.
//! 4. **Fail Fast**: Malformed frames end the connection immediately.
//!
//! ## Frame Layout
//!
//! ```text
//! +-------------------+------------------+
//! | length: u32 (BE)  | body: length B   |
//! +-------------------+------------------+
//! ```
//!
//! An empty body is valid and is used as the status request ping.

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FlipError, FlipResult};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Largest frame body accepted by default (1 MiB).
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Frame decoding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The announced body length exceeds the decoder limit.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    Oversized { len: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Length,
    Body,
}

/// Incremental decoder for length-prefixed frames.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    body_len: usize,
    max_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default frame limit.
    pub fn new() -> Self {
        FrameDecoder::with_max_len(MAX_FRAME_LEN)
    }

    /// Creates a decoder that rejects bodies longer than `max_len`.
    pub fn with_max_len(max_len: usize) -> Self {
        FrameDecoder {
            state: DecodeState::Length,
            body_len: 0,
            max_len,
        }
    }

    /// Attempts to take a single frame body from the buffer.
    ///
    /// Returns `Ok(None)` if more data is required.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        loop {
            match self.state {
                DecodeState::Length => {
                    if buf.len() < LENGTH_PREFIX {
                        return Ok(None);
                    }
                    let len = buf.get_u32() as usize;
                    if len > self.max_len {
                        return Err(FrameError::Oversized {
                            len,
                            max: self.max_len,
                        });
                    }
                    self.body_len = len;
                    self.state = DecodeState::Body;
                }
                DecodeState::Body => {
                    if buf.len() < self.body_len {
                        buf.reserve(self.body_len - buf.len());
                        return Ok(None);
                    }
                    let body = buf.split_to(self.body_len);
                    self.state = DecodeState::Length;
                    return Ok(Some(body));
                }
            }
        }
    }

    /// Returns true when no partial frame has been consumed.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Length
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new()
    }
}

/// Appends `body` to `dst` as a single frame.
pub fn encode_frame(body: &[u8], dst: &mut BytesMut) {
    dst.reserve(LENGTH_PREFIX + body.len());
    dst.put_u32(body.len() as u32);
    dst.put_slice(body);
}

/// A byte stream that reads and writes whole frames.
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    decoder: FrameDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        FramedStream {
            stream,
            decoder: FrameDecoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Reads the next frame body.
    ///
    /// Returns `Ok(None)` when the peer closes the connection between frames.
    /// Cancel-safe: partial reads stay buffered for the next call.
    pub async fn read_frame(&mut self) -> FlipResult<Option<BytesMut>> {
        loop {
            if let Some(body) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(Some(body));
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() && self.decoder.is_idle() {
                    return Ok(None);
                }
                return Err(FlipError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )));
            }
        }
    }

    /// Writes one frame and flushes it.
    pub async fn write_frame(&mut self, body: &[u8]) -> FlipResult<()> {
        self.write_buf.clear();
        encode_frame(body, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Encodes and writes a protobuf message.
    pub async fn send_message<M: Message>(&mut self, message: &M) -> FlipResult<()> {
        let body = message.encode_to_vec();
        self.write_frame(&body).await
    }

    /// Reads and decodes the next protobuf message.
    pub async fn recv_message<M: Message + Default>(&mut self) -> FlipResult<Option<M>> {
        match self.read_frame().await? {
            Some(body) => Ok(Some(M::decode(&body[..])?)),
            None => Ok(None),
        }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

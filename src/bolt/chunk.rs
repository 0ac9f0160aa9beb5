//! Chunked message framing.
//!
//! Every Bolt message travels as one or more chunks, each prefixed with a
//! 2-byte big-endian length, and is terminated by a zero-length chunk.
//! A zero-length chunk arriving outside a message is a NOOP keep-alive.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::BoltError;

/// Default maximum chunk payload.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16384;

/// Largest payload a 2-byte length prefix can carry.
pub const MAX_CHUNK_SIZE_LIMIT: usize = u16::MAX as usize;

/// Default maximum reassembled message size (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// End of message marker
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

const HEADER_SIZE: usize = 2;

/// Splits outbound payloads into chunks and reassembles inbound ones.
#[derive(Debug)]
pub struct ChunkCodec {
    max_chunk_size: usize,
    max_message_size: usize,
    /// Payload of the message being reassembled
    message: BytesMut,
    /// At least one non-empty chunk of the current message has arrived
    in_message: bool,
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// `max_chunk_size` is clamped to `1..=65535`.
    pub fn with_limits(max_chunk_size: usize, max_message_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.clamp(1, MAX_CHUNK_SIZE_LIMIT),
            max_message_size,
            message: BytesMut::with_capacity(4096),
            in_message: false,
        }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Append `payload` to `dst` as chunks plus the end marker.
    ///
    /// Nothing reaches the transport until the framed sink is flushed, so
    /// several messages can be batched into one write.
    pub fn write_message(&self, payload: &[u8], dst: &mut BytesMut) {
        let chunks = payload.len().div_ceil(self.max_chunk_size);
        dst.reserve(payload.len() + chunks * HEADER_SIZE + END_MARKER.len());
        for chunk in payload.chunks(self.max_chunk_size) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_slice(&END_MARKER);
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkCodec {
    type Item = BytesMut;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(HEADER_SIZE);
                if !self.in_message {
                    // NOOP
                    continue;
                }
                self.in_message = false;
                return Ok(Some(self.message.split()));
            }

            if src.len() < HEADER_SIZE + chunk_size {
                src.reserve(HEADER_SIZE + chunk_size - src.len());
                return Ok(None);
            }

            let size = self.message.len() + chunk_size;
            if size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size,
                    max: self.max_message_size,
                });
            }

            src.advance(HEADER_SIZE);
            self.message.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
            self.in_message = true;
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() && !self.in_message => Ok(None),
            None => Err(BoltError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Unexpected end of stream",
            ))),
        }
    }
}

impl Encoder<&[u8]> for ChunkCodec {
    type Error = BoltError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.write_message(payload, dst);
        Ok(())
    }
}

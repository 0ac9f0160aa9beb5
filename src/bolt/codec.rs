//! Bolt message codec for tokio_util.
//!
//! Sits on top of [`ChunkCodec`]: requests are laid out for the negotiated
//! version, packed, and chunked; inbound chunks are unpacked into
//! [`Response`]s. Date-times are translated to the connection's dialect on
//! the way out, and a RECORD carrying the other dialect is rejected.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::chunk::{ChunkCodec, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use super::error::BoltError;
use super::handshake::BoltVersion;
use super::message::{tag, Request, Response};
use super::packstream::{pack, unpack, DateTimeEncoding, Value};

/// Version-aware Bolt message codec.
#[derive(Debug)]
pub struct BoltCodec {
    chunks: ChunkCodec,
    version: BoltVersion,
    encoding: DateTimeEncoding,
}

impl BoltCodec {
    /// Codec for `version`. Bolt 5+ always speaks UTC date-times; 4.x
    /// starts on the legacy dialect until the `utc` patch is agreed.
    pub fn new(version: BoltVersion) -> Self {
        Self::with_limits(version, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_limits(version: BoltVersion, max_chunk_size: usize, max_message_size: usize) -> Self {
        let encoding = if version.major >= 5 {
            DateTimeEncoding::Utc
        } else {
            DateTimeEncoding::Legacy
        };
        Self {
            chunks: ChunkCodec::with_limits(max_chunk_size, max_message_size),
            version,
            encoding,
        }
    }

    pub fn version(&self) -> BoltVersion {
        self.version
    }

    pub fn encoding(&self) -> DateTimeEncoding {
        self.encoding
    }

    /// Switch dialect, e.g. once the server accepts the `utc` patch.
    pub fn set_encoding(&mut self, encoding: DateTimeEncoding) {
        self.encoding = encoding;
    }
}

impl Encoder<&Request> for BoltCodec {
    type Error = BoltError;

    fn encode(&mut self, request: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut structure = request.to_structure(self.version)?;
        for field in structure.fields.iter_mut() {
            self.encoding.adapt(field)?;
        }
        let payload = pack(&Value::Structure(structure))?;
        self.chunks.write_message(&payload, dst);
        Ok(())
    }
}

impl Decoder for BoltCodec {
    type Item = Response;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.chunks.decode(src)? {
            Some(payload) => self.parse(&payload).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.chunks.decode_eof(src)? {
            Some(payload) => self.parse(&payload).map(Some),
            None => Ok(None),
        }
    }
}

impl BoltCodec {
    fn parse(&self, payload: &[u8]) -> Result<Response, BoltError> {
        let structure = match unpack(payload)? {
            Value::Structure(s) => s,
            other => {
                return Err(BoltError::protocol(format!(
                    "Expected a message structure, found {}",
                    other.type_name()
                )))
            }
        };
        if structure.tag == tag::RECORD {
            let foreign = structure
                .fields
                .iter()
                .find_map(|field| self.encoding.first_foreign_tag(field));
            if let Some(t) = foreign {
                return Err(BoltError::protocol(format!(
                    "Structure tag 0x{:02X} is not valid for Bolt {} ({:?} date-times)",
                    t, self.version, self.encoding
                )));
            }
        }
        Response::from_structure(structure, self.version.major)
    }
}

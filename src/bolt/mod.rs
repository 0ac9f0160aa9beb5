//! # Bolt Protocol Implementation
//!
//! Low-level Bolt client protocol: everything below the connection pool.
//!
//! ## Overview
//!
//! - **Chunking** - length-prefixed chunk framing of whole messages
//! - **PackStream** - binary serialization for all values
//! - **Message Types** - version-aware requests and typed responses
//! - **Handshake** - protocol version negotiation
//! - **Codec** - async message framing for Tokio
//! - **Pipeline** - FIFO matching of replies to pending requests
//!
//! ## Protocol Versions
//!
//! Bolt 4.0 through 5.8 are negotiated. Features introduced later than
//! the agreed version are refused with [`BoltError::VersionGated`].
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! interacting with the Bolt protocol directly.

pub mod chunk;
pub mod codec;
pub mod error;
pub mod failure;
pub mod handshake;
pub mod message;
pub mod packstream;
pub mod pipeline;

pub use chunk::ChunkCodec;
pub use codec::BoltCodec;
pub use error::{BoltError, BoltResult, HandshakeError};
pub use failure::{FailureMessage, ServerError, ServerErrorKind};
pub use handshake::{BoltVersion, VersionRange, BOLT_MAGIC, DEFAULT_PROPOSALS};
pub use message::{AccessMode, Request, Response, SuccessMessage};
pub use packstream::{PackStreamError, Structure, Value};
pub use pipeline::{PipelineError, ResponseHandler, ResponsePipeline};

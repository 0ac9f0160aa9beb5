//! Bolt protocol error types.

use std::fmt;
use std::io;

use super::failure::ServerError;
use super::handshake::BoltVersion;
use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Bolt protocol errors.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error on the underlying stream
    Io(io::Error),

    Handshake(HandshakeError),

    PackStream(PackStreamError),

    /// Client and server are out of sync: malformed or unexpected message,
    /// or a reply with no pending request
    ProtocolViolation(String),

    /// FAILURE reported by the server
    Server(Box<ServerError>),

    /// Request ignored by the server with no earlier failure on record
    Ignored,

    MessageTooLarge { size: usize, max: usize },

    /// Read or write did not complete in time
    Timeout(String),

    /// Feature used below the version that introduced it
    VersionGated {
        feature: &'static str,
        required: BoltVersion,
        negotiated: BoltVersion,
    },

    /// TLS trust rejected the server
    Security(String),

    /// Operation on a connection that is closed or defunct
    ConnectionClosed,

    /// Cancelled mid-exchange; the connection is no longer usable
    Cancelled,
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::Handshake(e) => write!(f, "Handshake error: {}", e),
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            BoltError::Server(e) => write!(f, "{}", e),
            BoltError::Ignored => write!(f, "Request was ignored by the server"),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            BoltError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            BoltError::VersionGated {
                feature,
                required,
                negotiated,
            } => write!(
                f,
                "{} requires Bolt {} or later, but Bolt {} was negotiated",
                feature, required, negotiated
            ),
            BoltError::Security(msg) => write!(f, "Security error: {}", msg),
            BoltError::ConnectionClosed => write!(f, "Connection closed"),
            BoltError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl BoltError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        BoltError::ProtocolViolation(msg.into())
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, BoltError::ProtocolViolation(_) | BoltError::PackStream(_))
    }

    /// Errors after which the connection must be destroyed rather than reset.
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(
            self,
            BoltError::Server(_) | BoltError::Ignored | BoltError::VersionGated { .. }
        )
    }

    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            BoltError::Server(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::Handshake(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            BoltError::Server(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<HandshakeError> for BoltError {
    fn from(err: HandshakeError) -> Self {
        BoltError::Handshake(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}

impl From<ServerError> for BoltError {
    fn from(err: ServerError) -> Self {
        BoltError::Server(Box::new(err))
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Server agreed to none of the proposals
    NoCompatibleVersion,

    /// Server picked a version that was never proposed
    UnexpectedVersion(BoltVersion),

    InvalidData(String),

    /// Stream ended before the 4-byte reply
    ConnectionClosed,

    Io(String),

    Timeout,
}

impl HandshakeError {
    pub(crate) fn io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => HandshakeError::ConnectionClosed,
            io::ErrorKind::TimedOut => HandshakeError::Timeout,
            _ => HandshakeError::Io(err.to_string()),
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::NoCompatibleVersion => {
                write!(f, "The server does not support any of the protocol versions supported by this driver")
            }
            HandshakeError::UnexpectedVersion(v) => {
                write!(f, "Server agreed to unexpected protocol version {}", v)
            }
            HandshakeError::InvalidData(msg) => write!(f, "Invalid handshake data: {}", msg),
            HandshakeError::ConnectionClosed => {
                write!(f, "Unexpected end of stream when performing handshake")
            }
            HandshakeError::Io(msg) => write!(f, "I/O error during handshake: {}", msg),
            HandshakeError::Timeout => write!(f, "Handshake timed out"),
        }
    }
}

impl std::error::Error for HandshakeError {}

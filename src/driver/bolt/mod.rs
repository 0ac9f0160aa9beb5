//! Client side of a Bolt connection.
//!
//! ```text
//! ConnectionPool
//!   └── BoltConnection
//!         ├── SocketTransport (TCP or TLS, handshake, BoltCodec)
//!         ├── ResponsePipeline (one handler per request in flight)
//!         └── protocol operations (HELLO, RUN/PULL, BEGIN, ROUTE, ...)
//! ```

pub mod connection;
pub mod handlers;
pub mod protocol;
pub mod tls;
pub mod transport;

pub use connection::{AuthorizationStatus, BoltConnection, ConnectionSettings, ConnectionState};
pub use handlers::{ReplySlot, SharedStream, StreamState};
pub use protocol::TelemetryApi;
pub use transport::{SocketTransport, TransportConfig};

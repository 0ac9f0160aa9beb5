//! Socket transport.
//!
//! Resolves a server address, connects (optionally over TLS), negotiates
//! the Bolt version and then moves whole messages through a framed codec.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::bolt::chunk::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use crate::bolt::handshake::{self, BoltVersion, HandshakeError, VersionRange, DEFAULT_PROPOSALS};
use crate::bolt::packstream::DateTimeEncoding;
use crate::bolt::{BoltCodec, BoltError, BoltResult, Request, Response};
use crate::driver::address::ServerAddress;
use crate::driver::config::DriverConfig;

use super::tls;

/// Byte stream a connection runs over: plain TCP or TLS.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Settings for opening a transport.
#[derive(Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Longest wait for a server message. A positive
    /// `connection.recv_timeout_seconds` hint from HELLO replaces it.
    pub read_timeout: Option<Duration>,
    pub keep_alive: bool,
    pub no_delay: bool,
    /// `None` for plaintext
    pub tls: Option<Arc<ClientConfig>>,
    pub proposals: [VersionRange; 4],
    pub max_chunk_size: usize,
    pub max_message_size: usize,
}

impl TransportConfig {
    pub fn from_driver_config(config: &DriverConfig) -> BoltResult<Self> {
        let tls = if config.encrypted {
            Some(tls::client_config(&config.trust_strategy)?)
        } else {
            None
        };
        Ok(Self {
            connect_timeout: config.pool.connection_timeout,
            read_timeout: config.connection_read_timeout,
            keep_alive: config.keep_alive,
            no_delay: config.no_delay,
            tls,
            proposals: DEFAULT_PROPOSALS,
            max_chunk_size: config.max_chunk_size,
            max_message_size: config.max_message_size,
        })
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            keep_alive: true,
            no_delay: true,
            tls: None,
            proposals: DEFAULT_PROPOSALS,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("tls", &self.tls.is_some())
            .field("max_chunk_size", &self.max_chunk_size)
            .finish_non_exhaustive()
    }
}

/// A connected, version-negotiated socket.
pub struct SocketTransport {
    framed: Framed<Box<dyn AsyncStream>, BoltCodec>,
    address: ServerAddress,
    read_timeout: Option<Duration>,
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("address", &self.address)
            .field("version", &self.version())
            .finish()
    }
}

impl SocketTransport {
    /// Resolve `address`, connect to the first reachable candidate and
    /// perform the handshake.
    pub async fn connect(address: &ServerAddress, config: &TransportConfig) -> BoltResult<Self> {
        let tcp = connect_tcp(address, config).await?;

        let mut stream: Box<dyn AsyncStream> = match &config.tls {
            Some(tls_config) => {
                let name = tls::server_name(&address.host)?;
                let connector = TlsConnector::from(tls_config.clone());
                let tls_stream = tokio::time::timeout(config.connect_timeout, connector.connect(name, tcp))
                    .await
                    .map_err(|_| BoltError::Timeout(format!("TLS handshake with {} timed out", address)))?
                    .map_err(|e| BoltError::Security(format!("TLS handshake with {} failed: {}", address, e)))?;
                Box::new(tls_stream)
            }
            None => Box::new(tcp),
        };

        let version = tokio::time::timeout(
            config.connect_timeout,
            handshake::perform(&mut stream, &config.proposals),
        )
        .await
        .map_err(|_| BoltError::Handshake(HandshakeError::Timeout))??;

        Ok(Self::from_stream(stream, address.clone(), version, config))
    }

    /// Wrap an already negotiated stream.
    pub fn from_stream(
        stream: Box<dyn AsyncStream>,
        address: ServerAddress,
        version: BoltVersion,
        config: &TransportConfig,
    ) -> Self {
        let codec = BoltCodec::with_limits(version, config.max_chunk_size, config.max_message_size);
        Self {
            framed: Framed::new(stream, codec),
            address,
            read_timeout: config.read_timeout,
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn version(&self) -> BoltVersion {
        self.framed.codec().version()
    }

    /// Read timeout configured on the client side.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn set_encoding(&mut self, encoding: DateTimeEncoding) {
        self.framed.codec_mut().set_encoding(encoding);
    }

    /// Buffer a message. Nothing is written until [`flush`](Self::flush).
    pub async fn send(&mut self, request: &Request) -> BoltResult<()> {
        self.framed.feed(request).await
    }

    pub async fn flush(&mut self) -> BoltResult<()> {
        SinkExt::<&Request>::flush(&mut self.framed).await
    }

    /// Read one whole message, waiting at most `timeout` when given.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> BoltResult<Response> {
        let next = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.framed.next())
                .await
                .map_err(|_| BoltError::Timeout(format!("No response from {} within {:?}", self.address, limit)))?,
            None => self.framed.next().await,
        };
        match next {
            Some(result) => result,
            None => Err(BoltError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed by server",
            ))),
        }
    }

    pub async fn shutdown(&mut self) -> BoltResult<()> {
        SinkExt::<&Request>::close(&mut self.framed).await
    }
}

async fn connect_tcp(address: &ServerAddress, config: &TransportConfig) -> BoltResult<TcpStream> {
    let candidates: Vec<SocketAddr> = lookup_host(address.to_socket_addr()).await?.collect();
    if candidates.is_empty() {
        return Err(BoltError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("No addresses resolved for {}", address),
        )));
    }

    let mut last_error = None;
    for candidate in candidates {
        debug!("~~ [CONNECT] {}", candidate);
        match tokio::time::timeout(config.connect_timeout, connect_one(candidate, config)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => {
                debug!("~~ [CONNECT] {} failed: {}", candidate, e);
                last_error = Some(BoltError::Io(e));
            }
            Err(_) => {
                debug!("~~ [CONNECT] {} timed out", candidate);
                last_error = Some(BoltError::Timeout(format!(
                    "Failed to connect to {} within {:?}",
                    candidate, config.connect_timeout
                )));
            }
        }
    }
    Err(last_error.unwrap_or(BoltError::ConnectionClosed))
}

async fn connect_one(addr: SocketAddr, config: &TransportConfig) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(config.keep_alive)?;
    socket.set_nodelay(config.no_delay)?;
    socket.connect(addr).await
}

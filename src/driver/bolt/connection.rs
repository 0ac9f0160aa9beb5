//! Bolt protocol connection for client-side use.
//!
//! A [`BoltConnection`] owns one socket transport and the response pipeline
//! for it. Requests are buffered with [`BoltConnection::enqueue`], written
//! with [`BoltConnection::flush`] and answered one message at a time by
//! [`BoltConnection::receive_one`], which routes each reply to the handler
//! that was queued for it.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bolt::{
    BoltError, BoltResult, BoltVersion, Request, Response, ResponseHandler, ResponsePipeline,
    ServerErrorKind, Value,
};
use crate::driver::address::ServerAddress;
use crate::driver::auth::AuthToken;
use crate::driver::config::DriverConfig;

use super::transport::{SocketTransport, TransportConfig};

/// Where the connection stands with respect to authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// HELLO not yet sent
    None,
    /// Authenticated by this checkout
    FreshlyAuthenticated,
    /// Authenticated with a token scoped to a single session
    SessionToken,
    /// The server rejected the credentials
    SecurityError,
    /// The server reported `AuthorizationExpired`
    AuthorizationExpired,
    /// Reused from the pool without re-authentication
    Pooled,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Unusable: protocol violation or cancelled mid-exchange
    Defunct,
    Closed,
}

/// Everything needed to open and initialize connections to any server.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub transport: TransportConfig,
    pub user_agent: String,
    /// Routing context sent in HELLO; `None` for direct drivers
    pub routing_context: Option<HashMap<String, Value>>,
    pub notifications_minimum_severity: Option<String>,
}

impl ConnectionSettings {
    pub fn from_driver_config(config: &DriverConfig) -> BoltResult<Self> {
        let routing_context = config.is_routing().then(|| {
            let mut context: HashMap<String, Value> = config
                .uri
                .routing_context
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect();
            context.insert(
                "address".to_string(),
                Value::from(config.uri.address.to_string()),
            );
            context
        });
        Ok(Self {
            transport: TransportConfig::from_driver_config(config)?,
            user_agent: config.user_agent.clone(),
            routing_context,
            notifications_minimum_severity: config.notifications_minimum_severity.clone(),
        })
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            user_agent: format!("graphbolt/{}", env!("CARGO_PKG_VERSION")),
            routing_context: None,
            notifications_minimum_severity: None,
        }
    }
}

/// Client-side Bolt connection.
pub struct BoltConnection {
    id: u64,
    pub(super) transport: SocketTransport,
    pipeline: ResponsePipeline,
    state: ConnectionState,
    pub(super) server_agent: Option<String>,
    pub(super) connection_id: Option<String>,
    pub(super) read_timeout: Option<Duration>,
    pub(super) utc_patch: bool,
    pub(super) telemetry_enabled: bool,
    pub(super) auth_status: AuthorizationStatus,
    pub(super) auth_token: AuthToken,
    pub(super) authenticated_at: Instant,
    created_at: Instant,
    last_used: Instant,
    cancellation: Option<CancellationToken>,
}

impl fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoltConnection")
            .field("id", &self.id)
            .field("address", self.transport.address())
            .field("version", &self.version())
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("auth_status", &self.auth_status)
            .finish_non_exhaustive()
    }
}

impl BoltConnection {
    /// Connect and negotiate a version. The connection is not yet
    /// authenticated; see [`BoltConnection::hello`].
    pub async fn connect(id: u64, address: &ServerAddress, config: &TransportConfig) -> BoltResult<Self> {
        let transport = SocketTransport::connect(address, config).await?;
        Ok(Self::from_transport(id, transport))
    }

    pub fn from_transport(id: u64, transport: SocketTransport) -> Self {
        let now = Instant::now();
        let read_timeout = transport.read_timeout();
        Self {
            id,
            transport,
            pipeline: ResponsePipeline::new(),
            state: ConnectionState::Open,
            server_agent: None,
            connection_id: None,
            read_timeout,
            utc_patch: false,
            telemetry_enabled: true,
            auth_status: AuthorizationStatus::None,
            auth_token: AuthToken::None,
            authenticated_at: now,
            created_at: now,
            last_used: now,
            cancellation: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        self.transport.address()
    }

    pub fn version(&self) -> BoltVersion {
        self.transport.version()
    }

    /// Server agent reported in the HELLO reply, e.g. `Neo4j/5.20.0`
    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    /// Connection id assigned by the server
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Read timeout recommended by the server, if any
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Whether date-times use the UTC encoding
    pub fn utc_patch(&self) -> bool {
        self.utc_patch
    }

    pub fn auth_status(&self) -> AuthorizationStatus {
        self.auth_status
    }

    pub fn set_auth_status(&mut self, status: AuthorizationStatus) {
        self.auth_status = status;
    }

    pub fn auth_token(&self) -> &AuthToken {
        &self.auth_token
    }

    pub fn authenticated_at(&self) -> Instant {
        self.authenticated_at
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Open, no failure on record and nothing in flight.
    pub fn is_healthy(&self) -> bool {
        self.is_open() && self.pipeline.is_healthy() && self.pipeline.has_no_pending()
    }

    pub fn pipeline(&self) -> &ResponsePipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut ResponsePipeline {
        &mut self.pipeline
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Token observed by every await on this connection until replaced.
    pub fn set_cancellation(&mut self, token: Option<CancellationToken>) {
        self.cancellation = token;
    }

    /// Mark unusable. The pool destroys defunct connections.
    pub fn mark_defunct(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Defunct;
        }
    }

    fn ensure_open(&self) -> BoltResult<()> {
        match self.state {
            ConnectionState::Open => Ok(()),
            _ => Err(BoltError::ConnectionClosed),
        }
    }

    // ========================================================================
    // Exchange primitives
    // ========================================================================

    /// Queue `handler` and buffer `request`. Nothing is written until
    /// [`flush`](Self::flush).
    pub async fn enqueue(&mut self, request: Request, handler: Box<dyn ResponseHandler>) -> BoltResult<()> {
        self.ensure_open()?;
        // Refuse version-gated requests before a handler is left queued.
        request.to_structure(self.version())?;

        self.pipeline.enqueue(handler);
        debug!("C: {}", request);
        if let Err(e) = self.transport.send(&request).await {
            warn!("Failed to send {} to {}: {}", request.name(), self.address(), e);
            self.terminate(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Write everything buffered so far.
    pub async fn flush(&mut self) -> BoltResult<()> {
        self.ensure_open()?;
        let result = match self.cancellation.clone() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(BoltError::Cancelled),
                result = self.transport.flush() => result,
            },
            None => self.transport.flush().await,
        };
        if let Err(e) = result {
            warn!("Failed to flush to {}: {}", self.address(), e);
            self.terminate(&e);
            return Err(e);
        }
        self.touch();
        Ok(())
    }

    /// Read one server message and hand it to its handler.
    pub async fn receive_one(&mut self) -> BoltResult<()> {
        self.ensure_open()?;
        let timeout = self.read_timeout;
        let received = match self.cancellation.clone() {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(BoltError::Cancelled),
                result = self.transport.receive(timeout) => result,
            },
            None => self.transport.receive(timeout).await,
        };

        let response = match received {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to receive from {}: {}", self.address(), e);
                self.terminate(&e);
                return Err(e);
            }
        };

        if let Response::Failure(failure) = &response {
            match ServerErrorKind::from_code(&failure.code) {
                ServerErrorKind::AuthorizationExpired => {
                    self.auth_status = AuthorizationStatus::AuthorizationExpired
                }
                ServerErrorKind::TokenExpired | ServerErrorKind::Authentication => {
                    self.auth_status = AuthorizationStatus::SecurityError
                }
                _ => {}
            }
        }

        if let Err(e) = self.pipeline.dispatch(response) {
            error!("Protocol violation on {}: {}", self.address(), e);
            self.mark_defunct();
            return Err(e);
        }
        self.touch();
        Ok(())
    }

    /// Flush, then receive until every queued handler has its reply.
    pub async fn sync(&mut self) -> BoltResult<()> {
        self.flush().await?;
        while !self.pipeline.has_no_pending() {
            self.receive_one().await?;
        }
        Ok(())
    }

    fn terminate(&mut self, cause: &BoltError) {
        if cause.is_protocol_violation() {
            self.pipeline.fail_protocol(cause.to_string());
            if let Some(error) = self.pipeline.error().cloned() {
                self.pipeline.fail_all(&error);
            }
            self.state = ConnectionState::Defunct;
        } else if matches!(cause, BoltError::Cancelled) {
            self.state = ConnectionState::Defunct;
        } else {
            self.state = ConnectionState::Closed;
        }
    }

    /// Send GOODBYE and shut the socket. Errors are not reported: the
    /// connection is going away either way.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.state == ConnectionState::Open {
            debug!("C: GOODBYE");
            let goodbye = async {
                self.transport.send(&Request::Goodbye).await?;
                self.transport.flush().await
            };
            if let Err(e) = goodbye.await {
                debug!("GOODBYE to {} failed: {}", self.transport.address(), e);
            }
        }
        if let Err(e) = self.transport.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.transport.address(), e);
        }
        self.state = ConnectionState::Closed;
    }
}

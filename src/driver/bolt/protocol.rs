//! Protocol operations.
//!
//! Each operation queues its handlers, writes its requests and then reads
//! only as far as it needs to. Result streams are left with a PULL in
//! flight so records are fetched lazily as the cursor advances.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::bolt::message::{
    HelloMessage, RouteMessage, RunMessage, StreamMessage, TransactionExtra, ALL, LAST_QUERY,
};
use crate::bolt::packstream::DateTimeEncoding;
use crate::bolt::{AccessMode, BoltError, BoltResult, BoltVersion, Request, SuccessMessage, Value};
use crate::driver::auth::AuthToken;
use crate::driver::bookmark::BookmarkTracker;

use super::connection::{AuthorizationStatus, BoltConnection, ConnectionSettings};
use super::handlers::{PullHandler, ReplyHandler, ReplySlot, RunHandler, SharedStream, StreamState};

/// Procedure used for routing before the ROUTE message existed.
pub const ROUTING_PROCEDURE: &str = "CALL dbms.routing.getRoutingTable($context, $database)";

/// Database that serves routing procedures.
pub const SYSTEM_DATABASE: &str = "system";

const RECV_TIMEOUT_HINT: &str = "connection.recv_timeout_seconds";
const TELEMETRY_HINT: &str = "telemetry.enabled";

/// API usage reported through TELEMETRY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryApi {
    ManagedTransaction = 0,
    UnmanagedTransaction = 1,
    AutoCommit = 2,
    DriverLevel = 3,
}

impl BoltConnection {
    // ========================================================================
    // Authentication
    // ========================================================================

    /// HELLO, plus a pipelined LOGON on 5.1+. Applies what the server
    /// reports about itself before returning.
    pub async fn hello(&mut self, settings: &ConnectionSettings, token: AuthToken) -> BoltResult<()> {
        let hello_slot = ReplySlot::new();
        let hello = HelloMessage {
            user_agent: settings.user_agent.clone(),
            auth: token.to_map(),
            routing: settings.routing_context.clone(),
            notifications_minimum_severity: settings.notifications_minimum_severity.clone(),
        };
        self.enqueue(Request::Hello(hello), ReplyHandler::boxed(&hello_slot)).await?;

        let logon_slot = if self.version().supports_logon() {
            let slot = ReplySlot::new();
            self.enqueue(Request::Logon(token.to_map()), ReplyHandler::boxed(&slot)).await?;
            Some(slot)
        } else {
            None
        };

        self.sync().await?;
        let success = hello_slot.take()?;
        self.apply_hello(&success);
        if let Some(slot) = logon_slot {
            slot.take()?;
        }

        self.auth_token = token;
        self.auth_status = AuthorizationStatus::FreshlyAuthenticated;
        self.authenticated_at = Instant::now();
        Ok(())
    }

    fn apply_hello(&mut self, success: &SuccessMessage) {
        self.server_agent = success.server().map(str::to_string);
        self.connection_id = success.connection_id().map(str::to_string);

        let version = self.version();
        if version.negotiates_utc_patch() {
            let patched = success
                .get("patch_bolt")
                .and_then(Value::as_list)
                .is_some_and(|patches| patches.iter().any(|p| p.as_str() == Some("utc")));
            if patched {
                self.utc_patch = true;
                self.transport.set_encoding(DateTimeEncoding::Utc);
            }
        } else if version.major >= 5 {
            self.utc_patch = true;
        }

        if version.supports_hints() {
            let hints = success.get("hints").and_then(Value::as_map);
            if let Some(seconds) = hints.and_then(|h| h.get(RECV_TIMEOUT_HINT)).and_then(Value::as_int) {
                if seconds > 0 {
                    self.read_timeout = Some(Duration::from_secs(seconds as u64));
                }
            }
            if let Some(enabled) = hints.and_then(|h| h.get(TELEMETRY_HINT)).and_then(Value::as_bool) {
                self.telemetry_enabled = enabled;
            }
        }
    }

    /// Swap credentials on a live connection with LOGOFF and LOGON.
    pub async fn reauth(&mut self, token: AuthToken) -> BoltResult<()> {
        let logoff = ReplySlot::new();
        let logon = ReplySlot::new();
        self.enqueue(Request::Logoff, ReplyHandler::boxed(&logoff)).await?;
        self.enqueue(Request::Logon(token.to_map()), ReplyHandler::boxed(&logon)).await?;
        self.sync().await?;
        logoff.take()?;
        logon.take()?;

        self.auth_token = token;
        self.auth_status = AuthorizationStatus::FreshlyAuthenticated;
        self.authenticated_at = Instant::now();
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// RUN with a pipelined PULL of `fetch_size` records. Returns once the
    /// RUN reply is in; the PULL stays in flight.
    pub async fn run(
        &mut self,
        query: &str,
        parameters: HashMap<String, Value>,
        extra: Option<TransactionExtra>,
        fetch_size: i64,
        bookmarks: Option<BookmarkTracker>,
    ) -> BoltResult<SharedStream> {
        let stream = StreamState::shared(bookmarks);
        let run = RunMessage {
            query: query.to_string(),
            parameters,
            extra,
        };
        self.enqueue(Request::Run(run), RunHandler::boxed(&stream)).await?;
        self.enqueue(
            Request::Pull(StreamMessage::new(fetch_size, LAST_QUERY)),
            PullHandler::boxed(&stream),
        )
        .await?;
        stream.lock().pull_in_flight = true;
        self.flush().await?;

        loop {
            {
                let s = stream.lock();
                // A failed or ignored RUN is followed by an IGNORED PULL;
                // read past it so no handler is left queued.
                if s.run_done && (!s.finished || !s.pull_in_flight) {
                    if let Some(error) = s.error() {
                        return Err(error);
                    }
                    break;
                }
            }
            self.receive_one().await?;
        }
        Ok(stream)
    }

    /// Make at least one record available, or finish the stream.
    pub async fn fetch(&mut self, stream: &SharedStream, fetch_size: i64) -> BoltResult<()> {
        loop {
            let pull_qid = {
                let s = stream.lock();
                if !s.records.is_empty() || s.finished || s.consumed {
                    return Ok(());
                }
                (!s.pull_in_flight && s.has_more).then_some(s.qid)
            };
            if let Some(qid) = pull_qid {
                self.enqueue(Request::Pull(StreamMessage::new(fetch_size, qid)), PullHandler::boxed(stream))
                    .await?;
                stream.lock().pull_in_flight = true;
                self.flush().await?;
            }
            self.receive_one().await?;
        }
    }

    /// Throw away whatever the stream still holds, on the client and on
    /// the server, and wait for its summary.
    pub async fn discard(&mut self, stream: &SharedStream) -> BoltResult<()> {
        let in_flight = {
            let mut s = stream.lock();
            s.records.clear();
            s.discarding = true;
            s.pull_in_flight
        };
        // Only the front handler can be tainted; with nothing queued behind
        // it this stream's PULL is the front.
        if in_flight && self.pipeline().pending() == 1 {
            self.pipeline_mut().taint_records()?;
        }
        while stream.lock().pull_in_flight {
            self.receive_one().await?;
        }

        let discard_qid = {
            let s = stream.lock();
            (!s.finished && s.has_more).then_some(s.qid)
        };
        if let Some(qid) = discard_qid {
            self.enqueue(Request::Discard(StreamMessage::new(ALL, qid)), PullHandler::boxed(stream))
                .await?;
            stream.lock().pull_in_flight = true;
            self.flush().await?;
            while !stream.lock().finished {
                self.receive_one().await?;
            }
        }

        let mut s = stream.lock();
        s.consumed = true;
        s.records.clear();
        Ok(())
    }

    /// Pull everything the server still holds for the stream into its
    /// buffer, e.g. before the transaction that owns it ends.
    pub async fn buffer(&mut self, stream: &SharedStream) -> BoltResult<()> {
        loop {
            let pull_qid = {
                let s = stream.lock();
                if s.finished || s.consumed {
                    return Ok(());
                }
                (!s.pull_in_flight && s.has_more).then_some(s.qid)
            };
            if let Some(qid) = pull_qid {
                self.enqueue(Request::Pull(StreamMessage::new(ALL, qid)), PullHandler::boxed(stream))
                    .await?;
                stream.lock().pull_in_flight = true;
                self.flush().await?;
            }
            self.receive_one().await?;
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub async fn begin(&mut self, extra: TransactionExtra) -> BoltResult<()> {
        let slot = ReplySlot::new();
        self.enqueue(Request::Begin(extra), ReplyHandler::boxed(&slot)).await?;
        self.sync().await?;
        slot.take().map(|_| ())
    }

    /// COMMIT. Returns the new bookmark, if the server sent one.
    pub async fn commit(&mut self) -> BoltResult<Option<String>> {
        let slot = ReplySlot::new();
        self.enqueue(Request::Commit, ReplyHandler::boxed(&slot)).await?;
        self.sync().await?;
        let success = slot.take()?;
        Ok(success.bookmark().map(str::to_string))
    }

    pub async fn rollback(&mut self) -> BoltResult<()> {
        let slot = ReplySlot::new();
        self.enqueue(Request::Rollback, ReplyHandler::boxed(&slot)).await?;
        self.sync().await?;
        slot.take().map(|_| ())
    }

    /// RESET: abandon anything in flight and clear a stored failure.
    pub async fn reset(&mut self) -> BoltResult<()> {
        let slot = ReplySlot::new();
        self.enqueue(Request::Reset, ReplyHandler::boxed(&slot)).await?;
        self.sync().await?;
        slot.take()?;
        self.pipeline_mut().clear_error();
        Ok(())
    }

    /// Queue a TELEMETRY report ahead of the next request. Skipped when
    /// the version or the server does not want it.
    pub async fn telemetry(&mut self, api: TelemetryApi) -> BoltResult<()> {
        if !self.version().supports_telemetry() || !self.telemetry_enabled {
            return Ok(());
        }
        // The reply is not interesting; a failure shows up on the next request.
        let slot = ReplySlot::new();
        self.enqueue(Request::Telemetry(api as i64), ReplyHandler::boxed(&slot)).await
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Fetch the raw routing table (`rt`) for `database`.
    pub async fn route(
        &mut self,
        context: HashMap<String, Value>,
        bookmarks: Vec<String>,
        database: Option<String>,
        impersonated_user: Option<String>,
    ) -> BoltResult<HashMap<String, Value>> {
        if self.version() >= BoltVersion::V4_3 {
            let slot = ReplySlot::new();
            let route = RouteMessage {
                routing: context,
                bookmarks,
                database,
                impersonated_user,
            };
            self.enqueue(Request::Route(route), ReplyHandler::boxed(&slot)).await?;
            self.sync().await?;
            let mut success = slot.take()?;
            return success
                .metadata
                .remove("rt")
                .and_then(Value::into_map)
                .ok_or_else(|| BoltError::protocol("ROUTE reply without a routing table"));
        }

        if impersonated_user.is_some() {
            return Err(BoltError::VersionGated {
                feature: "Impersonation",
                required: BoltVersion::V4_4,
                negotiated: self.version(),
            });
        }
        self.route_with_procedure(context, bookmarks, database).await
    }

    async fn route_with_procedure(
        &mut self,
        context: HashMap<String, Value>,
        bookmarks: Vec<String>,
        database: Option<String>,
    ) -> BoltResult<HashMap<String, Value>> {
        let mut parameters = HashMap::new();
        parameters.insert("context".to_string(), Value::Map(context));
        parameters.insert(
            "database".to_string(),
            database.clone().map(Value::from).unwrap_or(Value::Null),
        );
        let extra = TransactionExtra {
            bookmarks,
            mode: AccessMode::Read,
            database: Some(SYSTEM_DATABASE.to_string()),
            ..TransactionExtra::default()
        };

        let stream = self.run(ROUTING_PROCEDURE, parameters, Some(extra), ALL, None).await?;
        while !stream.lock().finished {
            self.receive_one().await?;
        }

        let mut s = stream.lock();
        if let Some(error) = s.error() {
            return Err(error);
        }
        let record = s
            .records
            .pop_front()
            .ok_or_else(|| BoltError::protocol("Routing procedure returned no records"))?;
        let mut rt: HashMap<String, Value> = s.keys.iter().cloned().zip(record).collect();
        if let Some(db) = database {
            rt.entry("db".to_string()).or_insert_with(|| Value::from(db));
        }
        Ok(rt)
    }

    /// GOODBYE and close.
    pub async fn goodbye(&mut self) {
        self.close().await;
    }
}

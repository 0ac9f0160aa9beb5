//! Bolt request messages.
//!
//! Requests are built without a version and laid out for the negotiated
//! version in [`Request::to_structure`]. Fields that a version does not
//! understand are a caller error ([`BoltError::VersionGated`]).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::tag;
use crate::bolt::error::{BoltError, BoltResult};
use crate::bolt::handshake::BoltVersion;
use crate::bolt::packstream::{Structure, Value};

/// Sentinel `n` for PULL and DISCARD: the whole remaining stream.
pub const ALL: i64 = -1;

/// Sentinel qid: the most recent query in the transaction.
pub const LAST_QUERY: i64 = -1;

/// Access mode for transactions and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "READ"),
            AccessMode::Write => write!(f, "WRITE"),
        }
    }
}

/// Transaction metadata shared by BEGIN and auto-commit RUN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionExtra {
    pub bookmarks: Vec<String>,
    pub timeout: Option<Duration>,
    pub metadata: HashMap<String, Value>,
    pub mode: AccessMode,
    pub database: Option<String>,
    pub impersonated_user: Option<String>,
    pub notifications_minimum_severity: Option<String>,
}

impl TransactionExtra {
    fn to_map(&self, version: BoltVersion) -> BoltResult<HashMap<String, Value>> {
        let mut map = HashMap::new();
        if !self.bookmarks.is_empty() {
            map.insert("bookmarks".to_string(), Value::from(self.bookmarks.clone()));
        }
        if let Some(timeout) = self.timeout {
            // Sub-millisecond timeouts round up rather than mean "no timeout".
            let mut millis = timeout.as_millis() as i64;
            if millis == 0 && !timeout.is_zero() {
                millis = 1;
            }
            map.insert("tx_timeout".to_string(), Value::Integer(millis));
        }
        if !self.metadata.is_empty() {
            map.insert("tx_metadata".to_string(), Value::Map(self.metadata.clone()));
        }
        if self.mode == AccessMode::Read {
            map.insert("mode".to_string(), Value::from("r"));
        }
        if let Some(db) = self.database.as_ref().filter(|db| !db.is_empty()) {
            map.insert("db".to_string(), Value::from(db.as_str()));
        }
        if let Some(user) = &self.impersonated_user {
            require(version, BoltVersion::V4_4, "Impersonation")?;
            map.insert("imp_user".to_string(), Value::from(user.as_str()));
        }
        if let Some(severity) = &self.notifications_minimum_severity {
            require(version, BoltVersion::V5_2, "Notification filtering")?;
            map.insert(
                "notifications_minimum_severity".to_string(),
                Value::from(severity.as_str()),
            );
        }
        Ok(map)
    }
}

/// HELLO: client identification, plus credentials before Bolt 5.1.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    pub user_agent: String,
    pub auth: HashMap<String, Value>,
    /// Present only for routing drivers.
    pub routing: Option<HashMap<String, Value>>,
    pub notifications_minimum_severity: Option<String>,
}

impl HelloMessage {
    fn to_map(&self, version: BoltVersion) -> BoltResult<HashMap<String, Value>> {
        let mut map = HashMap::new();
        map.insert("user_agent".to_string(), Value::from(self.user_agent.as_str()));
        if !version.supports_logon() {
            map.extend(self.auth.clone());
        }
        if let Some(routing) = &self.routing {
            map.insert("routing".to_string(), Value::Map(routing.clone()));
        }
        if version.negotiates_utc_patch() {
            map.insert("patch_bolt".to_string(), Value::List(vec![Value::from("utc")]));
        }
        if let Some(severity) = &self.notifications_minimum_severity {
            require(version, BoltVersion::V5_2, "Notification filtering")?;
            map.insert(
                "notifications_minimum_severity".to_string(),
                Value::from(severity.as_str()),
            );
        }
        Ok(map)
    }
}

/// RUN: a query with parameters. `extra` is only sent in auto-commit.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMessage {
    pub query: String,
    pub parameters: HashMap<String, Value>,
    pub extra: Option<TransactionExtra>,
}

/// PULL or DISCARD: `n` records of query `qid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMessage {
    pub n: i64,
    pub qid: i64,
}

impl StreamMessage {
    pub fn new(n: i64, qid: i64) -> Self {
        Self { n, qid }
    }

    fn to_map(self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("n".to_string(), Value::Integer(self.n));
        if self.qid != LAST_QUERY {
            map.insert("qid".to_string(), Value::Integer(self.qid));
        }
        map
    }
}

/// ROUTE: fetch the routing table for a database.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteMessage {
    pub routing: HashMap<String, Value>,
    pub bookmarks: Vec<String>,
    pub database: Option<String>,
    pub impersonated_user: Option<String>,
}

/// All Bolt request messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Hello(HelloMessage),
    Logon(HashMap<String, Value>),
    Logoff,
    Goodbye,
    Reset,
    Run(RunMessage),
    Begin(TransactionExtra),
    Commit,
    Rollback,
    Pull(StreamMessage),
    Discard(StreamMessage),
    Route(RouteMessage),
    Telemetry(i64),
}

impl Request {
    pub fn tag(&self) -> u8 {
        match self {
            Request::Hello(_) => tag::HELLO,
            Request::Logon(_) => tag::LOGON,
            Request::Logoff => tag::LOGOFF,
            Request::Goodbye => tag::GOODBYE,
            Request::Reset => tag::RESET,
            Request::Run(_) => tag::RUN,
            Request::Begin(_) => tag::BEGIN,
            Request::Commit => tag::COMMIT,
            Request::Rollback => tag::ROLLBACK,
            Request::Pull(_) => tag::PULL,
            Request::Discard(_) => tag::DISCARD,
            Request::Route(_) => tag::ROUTE,
            Request::Telemetry(_) => tag::TELEMETRY,
        }
    }

    pub fn name(&self) -> &'static str {
        tag::request_name(self.tag())
    }

    /// Lay the request out for `version`.
    pub fn to_structure(&self, version: BoltVersion) -> BoltResult<Structure> {
        let fields = match self {
            Request::Hello(hello) => vec![Value::Map(hello.to_map(version)?)],
            Request::Logon(auth) => {
                require(version, BoltVersion::V5_1, "LOGON")?;
                vec![Value::Map(auth.clone())]
            }
            Request::Logoff => {
                require(version, BoltVersion::V5_1, "LOGOFF")?;
                vec![]
            }
            Request::Goodbye | Request::Reset | Request::Commit | Request::Rollback => vec![],
            Request::Run(run) => {
                let extra = match &run.extra {
                    Some(extra) => extra.to_map(version)?,
                    None => HashMap::new(),
                };
                vec![
                    Value::from(run.query.as_str()),
                    Value::Map(run.parameters.clone()),
                    Value::Map(extra),
                ]
            }
            Request::Begin(extra) => vec![Value::Map(extra.to_map(version)?)],
            Request::Pull(msg) | Request::Discard(msg) => vec![Value::Map(msg.to_map())],
            Request::Route(route) => {
                require(version, BoltVersion::V4_3, "ROUTE")?;
                let bookmarks = Value::from(route.bookmarks.clone());
                let routing = Value::Map(route.routing.clone());
                if version.supports_impersonation() {
                    let mut extra = HashMap::new();
                    if let Some(db) = &route.database {
                        extra.insert("db".to_string(), Value::from(db.as_str()));
                    }
                    if let Some(user) = &route.impersonated_user {
                        extra.insert("imp_user".to_string(), Value::from(user.as_str()));
                    }
                    vec![routing, bookmarks, Value::Map(extra)]
                } else {
                    if route.impersonated_user.is_some() {
                        require(version, BoltVersion::V4_4, "Impersonation")?;
                    }
                    vec![routing, bookmarks, Value::from(route.database.clone())]
                }
            }
            Request::Telemetry(api) => {
                require(version, BoltVersion::V5_4, "TELEMETRY")?;
                vec![Value::Integer(*api)]
            }
        };
        Ok(Structure::new(self.tag(), fields))
    }
}

/// Log form. Credentials never appear.
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Hello(hello) => write!(f, "HELLO {{user_agent: {:?}}}", hello.user_agent),
            Request::Logon(auth) => write!(
                f,
                "LOGON {{scheme: {}}}",
                auth.get("scheme").map(|s| s.to_string()).unwrap_or_default()
            ),
            Request::Run(run) => write!(f, "RUN {:?} {}", run.query, Value::Map(run.parameters.clone())),
            Request::Pull(m) | Request::Discard(m) => write!(f, "{} {{n: {}, qid: {}}}", self.name(), m.n, m.qid),
            Request::Begin(extra) => write!(f, "BEGIN {{bookmarks: {:?}, db: {:?}}}", extra.bookmarks, extra.database),
            Request::Route(r) => write!(f, "ROUTE {{db: {:?}, bookmarks: {:?}}}", r.database, r.bookmarks),
            Request::Telemetry(api) => write!(f, "TELEMETRY {}", api),
            _ => write!(f, "{}", self.name()),
        }
    }
}

fn require(version: BoltVersion, required: BoltVersion, feature: &'static str) -> BoltResult<()> {
    if version >= required {
        Ok(())
    } else {
        Err(BoltError::VersionGated {
            feature,
            required,
            negotiated: version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_auth() -> HashMap<String, Value> {
        let mut auth = HashMap::new();
        auth.insert("scheme".to_string(), Value::from("basic"));
        auth.insert("principal".to_string(), Value::from("neo4j"));
        auth.insert("credentials".to_string(), Value::from("secret"));
        auth
    }

    fn hello() -> HelloMessage {
        HelloMessage {
            user_agent: "graphbolt/test".to_string(),
            auth: basic_auth(),
            routing: None,
            notifications_minimum_severity: None,
        }
    }

    #[test]
    fn test_hello_credentials_move_to_logon() {
        let v44 = Request::Hello(hello()).to_structure(BoltVersion::V4_4).unwrap();
        let map = v44.fields[0].as_map().unwrap();
        assert_eq!(map["principal"], Value::from("neo4j"));
        assert_eq!(map["patch_bolt"], Value::List(vec![Value::from("utc")]));

        let v51 = Request::Hello(hello()).to_structure(BoltVersion::V5_1).unwrap();
        let map = v51.fields[0].as_map().unwrap();
        assert!(!map.contains_key("principal"));
        assert!(!map.contains_key("patch_bolt"));
    }

    #[test]
    fn test_logon_is_version_gated() {
        let err = Request::Logon(basic_auth()).to_structure(BoltVersion::V5_0).unwrap_err();
        assert!(matches!(err, BoltError::VersionGated { feature: "LOGON", .. }));
        assert!(!err.is_protocol_violation());
        assert!(Request::Logon(basic_auth()).to_structure(BoltVersion::V5_1).is_ok());
    }

    #[test]
    fn test_run_extra_fields() {
        let run = Request::Run(RunMessage {
            query: "RETURN 1".to_string(),
            parameters: HashMap::new(),
            extra: Some(TransactionExtra {
                bookmarks: vec!["bm1".to_string()],
                timeout: Some(Duration::from_micros(10)),
                mode: AccessMode::Read,
                database: Some("movies".to_string()),
                ..TransactionExtra::default()
            }),
        });
        let s = run.to_structure(BoltVersion::V5_0).unwrap();
        assert_eq!(s.tag, tag::RUN);
        let extra = s.fields[2].as_map().unwrap();
        assert_eq!(extra["tx_timeout"], Value::Integer(1));
        assert_eq!(extra["mode"], Value::from("r"));
        assert_eq!(extra["db"], Value::from("movies"));
    }

    #[test]
    fn test_impersonation_needs_4_4() {
        let begin = Request::Begin(TransactionExtra {
            impersonated_user: Some("bob".to_string()),
            ..TransactionExtra::default()
        });
        assert!(begin.to_structure(BoltVersion::V4_3).is_err());
        assert!(begin.to_structure(BoltVersion::V4_4).is_ok());
    }

    #[test]
    fn test_pull_omits_last_qid() {
        let s = Request::Pull(StreamMessage::new(2, LAST_QUERY))
            .to_structure(BoltVersion::V5_0)
            .unwrap();
        let map = s.fields[0].as_map().unwrap();
        assert_eq!(map["n"], Value::Integer(2));
        assert!(!map.contains_key("qid"));
    }

    #[test]
    fn test_route_layout_by_version() {
        let route = Request::Route(RouteMessage {
            database: Some("movies".to_string()),
            ..RouteMessage::default()
        });
        let v43 = route.to_structure(BoltVersion::V4_3).unwrap();
        assert_eq!(v43.fields[2], Value::from("movies"));
        let v44 = route.to_structure(BoltVersion::V4_4).unwrap();
        assert_eq!(v44.fields[2].as_map().unwrap()["db"], Value::from("movies"));
        assert!(route.to_structure(BoltVersion::V4_2).is_err());
    }

    #[test]
    fn test_display_hides_credentials() {
        let shown = Request::Logon(basic_auth()).to_string();
        assert!(!shown.contains("secret"));
        let shown = Request::Hello(hello()).to_string();
        assert!(!shown.contains("secret"));
    }
}

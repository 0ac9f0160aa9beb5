//! Server failures.
//!
//! A FAILURE message carries a map with a status `code`, a `message`, and
//! from Bolt 5.7 the GQL fields `gql_status`, `description`,
//! `diagnostic_record` and a nested `cause`. Decoding fills every GQL field
//! with a default when the server leaves it out, so callers can rely on
//! their presence. Codes have the form
//! `Neo.<Classification>.<Category>.<Title>` and decide the error kind.

use std::collections::HashMap;
use std::fmt;

use super::error::{BoltError, BoltResult};
use super::packstream::Value;

pub const UNKNOWN_CODE: &str = "Neo.DatabaseError.General.UnknownError";
pub const UNKNOWN_MESSAGE: &str = "An unknown error occurred";
pub const UNKNOWN_GQL_STATUS: &str = "50N42";
pub const UNKNOWN_GQL_DESCRIPTION: &str = "error: general processing exception - unexpected error.";

const CLASSIFICATIONS: [&str; 3] = ["CLIENT_ERROR", "DATABASE_ERROR", "TRANSIENT_ERROR"];
const UNKNOWN_CLASSIFICATION: &str = "UNKNOWN";

/// Decoded FAILURE metadata, with GQL defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureMessage {
    pub code: String,
    pub message: String,
    pub gql_status: String,
    pub description: String,
    pub diagnostic_record: HashMap<String, Value>,
    pub raw_classification: Option<String>,
    pub classification: String,
    pub cause: Option<Box<FailureMessage>>,
}

#[derive(Default)]
struct RawFailure {
    code: Option<String>,
    message: Option<String>,
    gql_status: Option<String>,
    description: Option<String>,
    diagnostic_record: Option<HashMap<String, Value>>,
    cause: Option<Box<FailureMessage>>,
}

impl FailureMessage {
    /// A failure with only code and message, as pre-GQL servers send.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_defaults(RawFailure {
            code: Some(code.into()),
            message: Some(message.into()),
            ..RawFailure::default()
        })
    }

    /// Decode the FAILURE map. Unknown keys are a protocol violation.
    /// Below Bolt 5 two transaction codes arrive misclassified as
    /// transient and are corrected here.
    pub fn from_metadata(metadata: HashMap<String, Value>, major_version: u8) -> BoltResult<Self> {
        let mut raw = RawFailure::default();
        for (key, value) in metadata {
            match key.as_str() {
                "neo4j_code" | "code" => {
                    raw.code = Some(fix_legacy_code(major_version, value_to_string(value)));
                }
                "message" => raw.message = Some(value_to_string(value)),
                "gql_status" => raw.gql_status = Some(value_to_string(value)),
                "description" => raw.description = Some(value_to_string(value)),
                "diagnostic_record" => match value {
                    Value::Map(map) => raw.diagnostic_record = Some(map),
                    Value::Null => {}
                    other => {
                        return Err(BoltError::protocol(format!(
                            "diagnostic_record in FAILURE message must be a map, found {}",
                            other.type_name()
                        )))
                    }
                },
                "cause" => match value {
                    Value::Map(map) => raw.cause = Some(Box::new(Self::from_metadata(map, major_version)?)),
                    Value::Null => {}
                    other => {
                        return Err(BoltError::protocol(format!(
                            "cause in FAILURE message must be a map, found {}",
                            other.type_name()
                        )))
                    }
                },
                _ => {
                    return Err(BoltError::protocol(format!(
                        "Unexpected key: {} in FAILURE message.",
                        key
                    )))
                }
            }
        }
        Ok(Self::with_defaults(raw))
    }

    fn with_defaults(raw: RawFailure) -> Self {
        let code = raw.code.unwrap_or_else(|| UNKNOWN_CODE.to_string());
        let message = raw.message.unwrap_or_else(|| UNKNOWN_MESSAGE.to_string());
        let gql_status = raw.gql_status.unwrap_or_else(|| UNKNOWN_GQL_STATUS.to_string());
        let description = match raw.description {
            Some(d) if !d.is_empty() => d,
            _ => format!("{} {}", UNKNOWN_GQL_DESCRIPTION, message),
        };

        let mut diagnostic_record = raw.diagnostic_record.unwrap_or_default();
        for (key, default) in [("OPERATION", ""), ("OPERATION_CODE", "0"), ("CURRENT_SCHEMA", "/")] {
            diagnostic_record
                .entry(key.to_string())
                .or_insert_with(|| Value::String(default.to_string()));
        }

        let (raw_classification, classification) = match diagnostic_record.get("_classification") {
            Some(value) => {
                let known = match value {
                    Value::String(s) if CLASSIFICATIONS.contains(&s.as_str()) => s.clone(),
                    _ => UNKNOWN_CLASSIFICATION.to_string(),
                };
                (Some(value_to_string(value.clone())), known)
            }
            None => (None, UNKNOWN_CLASSIFICATION.to_string()),
        };

        Self {
            code,
            message,
            gql_status,
            description,
            diagnostic_record,
            raw_classification,
            classification,
            cause: raw.cause,
        }
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn fix_legacy_code(major_version: u8, code: String) -> String {
    if major_version >= 5 {
        return code;
    }
    match code.as_str() {
        "Neo.TransientError.Transaction.Terminated" => "Neo.ClientError.Transaction.Terminated".to_string(),
        "Neo.TransientError.Transaction.LockClientStopped" => {
            "Neo.ClientError.Transaction.LockClientStopped".to_string()
        }
        _ => code,
    }
}

/// What a server failure means to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerErrorKind {
    Authentication,
    AuthorizationExpired,
    TokenExpired,
    Forbidden,
    /// Another `Security` code
    UnknownSecurity,
    /// The requested database does not exist
    FatalDiscovery,
    InvalidBookmark,
    InvalidBookmarkMixture,
    StatementArgument,
    Type,
    /// The server rejected the request as malformed
    Protocol,
    Client,
    Transient,
    Database,
}

impl ServerErrorKind {
    /// Classify a status code. Pure: the same code always gives the same kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "Neo.ClientError.Statement.ArgumentError" => return Self::StatementArgument,
            "Neo.ClientError.Statement.TypeError" => return Self::Type,
            "Neo.ClientError.Security.Unauthorized" => return Self::Authentication,
            "Neo.ClientError.Security.AuthorizationExpired" => return Self::AuthorizationExpired,
            "Neo.ClientError.Security.TokenExpired" => return Self::TokenExpired,
            "Neo.ClientError.Security.Forbidden" => return Self::Forbidden,
            "Neo.ClientError.Database.DatabaseNotFound" => return Self::FatalDiscovery,
            "Neo.ClientError.Transaction.InvalidBookmark" => return Self::InvalidBookmark,
            "Neo.ClientError.Transaction.InvalidBookmarkMixture" => return Self::InvalidBookmarkMixture,
            "Neo.ClientError.Request.Invalid" | "Neo.ClientError.Request.InvalidFormat" => return Self::Protocol,
            _ => {}
        }
        let mut parts = code.split('.');
        let classification = parts.nth(1).unwrap_or_default();
        let category = parts.next().unwrap_or_default();
        match (classification, category) {
            ("ClientError", "Security") => Self::UnknownSecurity,
            ("TransientError", _) => Self::Transient,
            ("DatabaseError", _) => Self::Database,
            _ => Self::Client,
        }
    }

    pub fn is_security(self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::AuthorizationExpired | Self::TokenExpired | Self::Forbidden | Self::UnknownSecurity
        )
    }
}

/// A typed server failure, keeping the code, message and GQL chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub code: String,
    pub message: String,
    pub gql_status: String,
    pub description: String,
    pub diagnostic_record: HashMap<String, Value>,
    pub raw_classification: Option<String>,
    pub classification: String,
    pub cause: Option<Box<ServerError>>,
}

impl ServerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        FailureMessage::new(code, message).into()
    }

    /// The server signalled that retrying the work may succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ServerErrorKind::Transient => !matches!(
                self.code.as_str(),
                "Neo.TransientError.Transaction.Terminated" | "Neo.TransientError.Transaction.LockClientStopped"
            ),
            ServerErrorKind::AuthorizationExpired => true,
            _ => false,
        }
    }

    /// Errors that abort routing discovery instead of trying the next router.
    pub fn is_fatal_for_discovery(&self) -> bool {
        match self.kind {
            ServerErrorKind::FatalDiscovery
            | ServerErrorKind::InvalidBookmark
            | ServerErrorKind::InvalidBookmarkMixture
            | ServerErrorKind::StatementArgument
            | ServerErrorKind::Protocol
            | ServerErrorKind::Type => true,
            kind => kind.is_security() && kind != ServerErrorKind::AuthorizationExpired,
        }
    }
}

impl From<FailureMessage> for ServerError {
    fn from(failure: FailureMessage) -> Self {
        Self {
            kind: ServerErrorKind::from_code(&failure.code),
            code: failure.code,
            message: failure.message,
            gql_status: failure.gql_status,
            description: failure.description,
            diagnostic_record: failure.diagnostic_record,
            raw_classification: failure.raw_classification,
            classification: failure.classification,
            cause: failure.cause.map(|c| Box::new(ServerError::from(*c))),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

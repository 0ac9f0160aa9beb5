//! Bolt response messages.

use std::collections::HashMap;
use std::fmt;

use super::tag;
use crate::bolt::error::{BoltError, BoltResult};
use crate::bolt::failure::FailureMessage;
use crate::bolt::packstream::{Structure, Value};

/// A server reply. Every request ends in exactly one SUCCESS, FAILURE or
/// IGNORED; a PULL may be preceded by any number of RECORDs.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(SuccessMessage),
    Record(Vec<Value>),
    Failure(FailureMessage),
    Ignored,
}

impl Response {
    /// Decode a response structure. `major_version` drives FAILURE code fixes.
    pub fn from_structure(s: Structure, major_version: u8) -> BoltResult<Self> {
        let Structure { tag: t, fields } = s;
        let mut fields = fields.into_iter();
        match t {
            tag::SUCCESS => {
                let metadata = match fields.next() {
                    Some(Value::Map(map)) => map,
                    None | Some(Value::Null) => HashMap::new(),
                    Some(other) => {
                        return Err(BoltError::protocol(format!(
                            "SUCCESS metadata must be a map, found {}",
                            other.type_name()
                        )))
                    }
                };
                Ok(Response::Success(SuccessMessage { metadata }))
            }
            tag::RECORD => match fields.next() {
                Some(Value::List(values)) => Ok(Response::Record(values)),
                _ => Err(BoltError::protocol("RECORD must carry a list of values")),
            },
            tag::FAILURE => {
                let metadata = match fields.next() {
                    Some(Value::Map(map)) => map,
                    _ => return Err(BoltError::protocol("FAILURE must carry a metadata map")),
                };
                Ok(Response::Failure(FailureMessage::from_metadata(metadata, major_version)?))
            }
            tag::IGNORED => Ok(Response::Ignored),
            other => Err(BoltError::protocol(format!(
                "Unknown response message tag 0x{:02X}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Record(_) => "RECORD",
            Response::Failure(_) => "FAILURE",
            Response::Ignored => "IGNORED",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Success(s) => write!(f, "SUCCESS {}", Value::Map(s.metadata.clone())),
            Response::Record(values) => write!(f, "RECORD {}", Value::List(values.clone())),
            Response::Failure(e) => write!(f, "FAILURE code: {}, message: {}", e.code, e.message),
            Response::Ignored => write!(f, "IGNORED"),
        }
    }
}

/// SUCCESS metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuccessMessage {
    pub metadata: HashMap<String, Value>,
}

impl SuccessMessage {
    pub fn new(metadata: HashMap<String, Value>) -> Self {
        Self { metadata }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Column names from a RUN reply.
    pub fn fields(&self) -> Vec<String> {
        self.metadata
            .get("fields")
            .and_then(Value::as_list)
            .map(|l| l.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    /// Query id assigned inside an explicit transaction.
    pub fn qid(&self) -> Option<i64> {
        self.metadata.get("qid").and_then(Value::as_int)
    }

    pub fn has_more(&self) -> bool {
        self.metadata.get("has_more").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn bookmark(&self) -> Option<&str> {
        self.metadata.get("bookmark").and_then(Value::as_str)
    }

    pub fn db(&self) -> Option<&str> {
        self.metadata.get("db").and_then(Value::as_str)
    }

    pub fn server(&self) -> Option<&str> {
        self.metadata.get("server").and_then(Value::as_str)
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.metadata.get("connection_id").and_then(Value::as_str)
    }

    pub fn t_first(&self) -> Option<i64> {
        self.metadata.get("t_first").and_then(Value::as_int)
    }

    pub fn t_last(&self) -> Option<i64> {
        self.metadata.get("t_last").and_then(Value::as_int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_success() {
        let mut meta = HashMap::new();
        meta.insert("fields".to_string(), Value::from(vec!["a".to_string(), "b".to_string()]));
        meta.insert("qid".to_string(), Value::Integer(3));
        meta.insert("has_more".to_string(), Value::Boolean(true));
        let response = Response::from_structure(Structure::new(tag::SUCCESS, vec![Value::Map(meta)]), 5).unwrap();
        let Response::Success(success) = response else {
            panic!("expected SUCCESS");
        };
        assert_eq!(success.fields(), vec!["a", "b"]);
        assert_eq!(success.qid(), Some(3));
        assert!(success.has_more());
        assert_eq!(success.bookmark(), None);
    }

    #[test]
    fn test_decode_failure_applies_version() {
        let mut meta = HashMap::new();
        meta.insert("code".to_string(), Value::from("Neo.TransientError.Transaction.Terminated"));
        meta.insert("message".to_string(), Value::from("gone"));
        let s = Structure::new(tag::FAILURE, vec![Value::Map(meta)]);
        let Response::Failure(f) = Response::from_structure(s, 4).unwrap() else {
            panic!("expected FAILURE");
        };
        assert_eq!(f.code, "Neo.ClientError.Transaction.Terminated");
    }

    #[test]
    fn test_decode_record_and_ignored() {
        let record = Structure::new(tag::RECORD, vec![Value::List(vec![Value::Integer(1)])]);
        assert_eq!(
            Response::from_structure(record, 5).unwrap(),
            Response::Record(vec![Value::Integer(1)])
        );
        assert_eq!(
            Response::from_structure(Structure::new(tag::IGNORED, vec![]), 5).unwrap(),
            Response::Ignored
        );
    }

    #[test]
    fn test_unknown_tag_is_violation() {
        let err = Response::from_structure(Structure::new(0x01, vec![]), 5).unwrap_err();
        assert!(err.is_protocol_violation());
    }
}

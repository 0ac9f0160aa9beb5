//! Driver Error Types
//!
//! 드라이버 에러 정의

use thiserror::Error;

use crate::bolt::{BoltError, ServerError, ServerErrorKind};

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug)]
pub enum DriverError {
    /// 연결 에러 (연결 거부, 끊김, 핸드셰이크 실패)
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS 신뢰 실패
    #[error("Security error: {0}")]
    Security(String),

    /// 클라이언트와 서버의 동기화가 깨짐
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// 서버가 보고한 FAILURE
    #[error(transparent)]
    Server(Box<ServerError>),

    /// 이미 소비된 결과에 접근
    #[error("Result consumed: {0}")]
    ResultConsumed(String),

    /// 라우팅 대상 서버가 더 이상 역할을 수행하지 않음
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 서비스 불가
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 연결 획득 타임아웃
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 세션 사용 오류
    #[error("Session error: {0}")]
    Session(String),

    /// 트랜잭션 사용 오류
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// 값 타입 변환 실패
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// 취소됨
    #[error("Operation cancelled")]
    Cancelled,
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 결과 소비 에러 생성
    pub fn result_consumed(msg: impl Into<String>) -> Self {
        Self::ResultConsumed(msg.into())
    }

    /// 세션 만료 에러 생성
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 세션 에러 생성
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// 트랜잭션 에러 생성
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// 타입 변환 에러 생성
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// 서버 에러 참조
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server(e) => Some(e),
            _ => None,
        }
    }

    /// 서버 에러 종류
    pub fn server_kind(&self) -> Option<ServerErrorKind> {
        self.server_error().map(|e| e.kind)
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::ServiceUnavailable(_) | Self::SessionExpired(_) => true,
            Self::Server(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 프로토콜 위반 여부
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }

    /// 연결을 폐기해야 하는 에러 여부
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Security(_)
                | Self::ProtocolViolation(_)
                | Self::Timeout(_)
                | Self::Cancelled
        )
    }

    /// 라우팅 갱신을 즉시 중단해야 하는 에러 여부
    pub fn is_fatal_for_discovery(&self) -> bool {
        match self {
            Self::Server(e) => e.is_fatal_for_discovery(),
            Self::Security(_) | Self::Configuration(_) => true,
            _ => false,
        }
    }
}

// ============================================================================
// BoltError 변환
// ============================================================================

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) => DriverError::Connection(e.to_string()),
            BoltError::Handshake(e) => DriverError::Connection(e.to_string()),
            BoltError::ConnectionClosed => DriverError::Connection("Connection closed".to_string()),
            BoltError::PackStream(e) => DriverError::ProtocolViolation(e.to_string()),
            BoltError::ProtocolViolation(msg) => DriverError::ProtocolViolation(msg),
            err @ BoltError::MessageTooLarge { .. } => DriverError::ProtocolViolation(err.to_string()),
            BoltError::Server(e) => DriverError::Server(e),
            BoltError::Ignored => {
                DriverError::Transaction("Request was ignored by the server".to_string())
            }
            BoltError::Timeout(msg) => DriverError::Timeout(msg),
            err @ BoltError::VersionGated { .. } => DriverError::Configuration(err.to_string()),
            BoltError::Security(msg) => DriverError::Security(msg),
            BoltError::Cancelled => DriverError::Cancelled,
        }
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::Server(Box::new(err))
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::bolt::BoltVersion;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::connection("Connection refused");
        assert_eq!(err.to_string(), "Connection error: Connection refused");

        let err: DriverError = ServerError::new("Neo.ClientError.Statement.SyntaxError", "Invalid syntax").into();
        assert_eq!(err.to_string(), "Neo.ClientError.Statement.SyntaxError: Invalid syntax");
    }

    #[test]
    fn test_driver_error_retryable() {
        assert!(DriverError::service_unavailable("no routers").is_retryable());
        assert!(DriverError::session_expired("leader switched").is_retryable());

        let transient: DriverError =
            ServerError::new("Neo.TransientError.General.TemporarilyUnavailable", "busy").into();
        assert!(transient.is_retryable());

        let terminated: DriverError = ServerError::new("Neo.ClientError.Transaction.Terminated", "gone").into();
        assert!(!terminated.is_retryable());

        let expired: DriverError =
            ServerError::new("Neo.ClientError.Security.AuthorizationExpired", "expired").into();
        assert!(expired.is_retryable());

        assert!(!DriverError::result_consumed("done").is_retryable());
    }

    #[test]
    fn test_bolt_error_conversion() {
        let err: DriverError = BoltError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset")).into();
        assert!(matches!(err, DriverError::Connection(_)));
        assert!(err.is_fatal_to_connection());

        let err: DriverError = BoltError::protocol("No handlers registered").into();
        assert!(err.is_protocol_violation());

        let err: DriverError = BoltError::VersionGated {
            feature: "ROUTE",
            required: BoltVersion::V4_3,
            negotiated: BoltVersion::V4_1,
        }
        .into();
        assert!(matches!(err, DriverError::Configuration(_)));
        assert!(!err.is_fatal_to_connection());
    }

    #[test]
    fn test_fatal_for_discovery() {
        let err: DriverError = ServerError::new("Neo.ClientError.Database.DatabaseNotFound", "nope").into();
        assert!(err.is_fatal_for_discovery());
        assert_eq!(err.server_kind(), Some(ServerErrorKind::FatalDiscovery));

        let err: DriverError =
            ServerError::new("Neo.ClientError.Security.AuthorizationExpired", "expired").into();
        assert!(!err.is_fatal_for_discovery());

        assert!(!DriverError::connection("refused").is_fatal_for_discovery());
    }
}

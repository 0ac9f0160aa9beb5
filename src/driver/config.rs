//! Driver Configuration
//!
//! 드라이버 설정. 파일이나 환경 변수는 읽지 않고 빌더로만 구성한다.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::CertificateDer;

use crate::bolt::chunk::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};

use super::address::{ConnectionUri, Encryption};
use super::auth::{AuthToken, AuthTokenManager, StaticAuthTokenManager};
use super::error::DriverResult;
use super::pool::PoolConfig;
use super::retry::RetryPolicy;

/// 한 번에 모든 레코드를 가져오는 fetch size
pub const FETCH_ALL: i64 = -1;

/// 기본 fetch size
pub const DEFAULT_FETCH_SIZE: i64 = 1000;

// ============================================================================
// TrustStrategy - TLS 신뢰 전략
// ============================================================================

/// 인증서 검증 콜백. 인증서 체인과 검증 에러(있다면)를 받아 신뢰 여부를 돌려준다.
pub type TrustCallback =
    Arc<dyn Fn(&[CertificateDer<'static>], Option<&rustls::Error>) -> bool + Send + Sync>;

/// TLS 신뢰 전략
#[derive(Clone, Default)]
pub enum TrustStrategy {
    /// 시스템 인증서 사용
    #[default]
    TrustSystemCas,
    /// 모든 인증서 신뢰 (개발용)
    TrustAllCertificates,
    /// 특정 인증서만 신뢰 (DER)
    TrustCustomCas { certificates: Vec<Vec<u8>> },
    /// 사용자 콜백으로 판단
    Custom(TrustCallback),
}

impl fmt::Debug for TrustStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustSystemCas => write!(f, "TrustSystemCas"),
            Self::TrustAllCertificates => write!(f, "TrustAllCertificates"),
            Self::TrustCustomCas { certificates } => {
                write!(f, "TrustCustomCas({} certificates)", certificates.len())
            }
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// ============================================================================
// DriverConfig - 드라이버 설정
// ============================================================================

/// 드라이버 설정
#[derive(Clone)]
pub struct DriverConfig {
    /// 연결 URI
    pub uri: ConnectionUri,
    /// 토큰 관리자
    pub auth: Arc<dyn AuthTokenManager>,
    /// TLS 암호화
    pub encrypted: bool,
    /// TLS 신뢰 전략
    pub trust_strategy: TrustStrategy,
    /// 연결 풀 설정
    pub pool: PoolConfig,
    /// 트랜잭션 재시도 정책
    pub retry: RetryPolicy,
    /// 라우팅 테이블 만료 후 삭제까지의 유예
    pub routing_table_purge_delay: Duration,
    /// 서버 응답 대기 한도 (None = 무제한). 서버 힌트가 있으면 힌트를 따른다.
    pub connection_read_timeout: Option<Duration>,
    /// Keep-Alive 활성화
    pub keep_alive: bool,
    /// TCP_NODELAY
    pub no_delay: bool,
    /// User Agent
    pub user_agent: String,
    /// Fetch Size (`FETCH_ALL` = 전체)
    pub fetch_size: i64,
    /// 최대 메시지 크기
    pub max_message_size: usize,
    /// 최대 청크 크기
    pub max_chunk_size: usize,
    /// 서버 알림 최소 심각도 (Bolt 5.2+)
    pub notifications_minimum_severity: Option<String>,
}

impl DriverConfig {
    /// 새 설정 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let uri = ConnectionUri::parse(uri)?;
        let (encrypted, trust_strategy) = match uri.scheme.encryption {
            Encryption::Off => (false, TrustStrategy::default()),
            Encryption::SystemCas => (true, TrustStrategy::TrustSystemCas),
            Encryption::SelfSigned => (true, TrustStrategy::TrustAllCertificates),
        };

        Ok(Self {
            uri,
            auth: StaticAuthTokenManager::shared(auth),
            encrypted,
            trust_strategy,
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            routing_table_purge_delay: Duration::from_secs(30),
            connection_read_timeout: None,
            keep_alive: true,
            no_delay: true,
            user_agent: format!("graphbolt/{}", env!("CARGO_PKG_VERSION")),
            fetch_size: DEFAULT_FETCH_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            notifications_minimum_severity: None,
        })
    }

    /// 빌더 시작
    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri, auth)?;
        Ok(DriverConfigBuilder { config })
    }

    /// 라우팅 드라이버 여부
    pub fn is_routing(&self) -> bool {
        self.uri.scheme.routing
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("uri", &self.uri)
            .field("encrypted", &self.encrypted)
            .field("trust_strategy", &self.trust_strategy)
            .field("pool", &self.pool)
            .field("retry", &self.retry)
            .field("fetch_size", &self.fetch_size)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DriverConfigBuilder - 설정 빌더
// ============================================================================

/// 드라이버 설정 빌더
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// 토큰 관리자 설정
    pub fn with_auth_manager(mut self, manager: Arc<dyn AuthTokenManager>) -> Self {
        self.config.auth = manager;
        self
    }

    /// TLS 암호화 설정
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    /// TLS 신뢰 전략 설정
    pub fn with_trust_strategy(mut self, strategy: TrustStrategy) -> Self {
        self.config.trust_strategy = strategy;
        self
    }

    /// 연결 풀 크기 설정
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.pool.max_size = size;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.acquisition_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.connection_timeout = timeout;
        self
    }

    /// 연결 최대 수명 설정
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.pool.max_lifetime = lifetime;
        self
    }

    /// 유휴 연결 생존 확인 기준 설정
    pub fn with_connection_liveness_check_timeout(mut self, idle: Duration) -> Self {
        self.config.pool.liveness_check_timeout = Some(idle);
        self
    }

    /// 최대 트랜잭션 재시도 시간 설정
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.retry.max_retry_time = time;
        self
    }

    /// 재시도 정책 설정
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// 라우팅 테이블 삭제 유예 설정
    pub fn with_routing_table_purge_delay(mut self, delay: Duration) -> Self {
        self.config.routing_table_purge_delay = delay;
        self
    }

    /// 소켓 읽기 타임아웃 설정
    pub fn with_connection_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_read_timeout = Some(timeout);
        self
    }

    /// Keep-Alive 설정
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// TCP_NODELAY 설정
    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.config.no_delay = no_delay;
        self
    }

    /// User Agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Fetch Size 설정
    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.config.fetch_size = size;
        self
    }

    /// 최대 메시지 크기 설정
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// 최대 청크 크기 설정 (최대 65535)
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.config.max_chunk_size = size;
        self
    }

    /// 알림 최소 심각도 설정
    pub fn with_notifications_minimum_severity(mut self, severity: impl Into<String>) -> Self {
        self.config.notifications_minimum_severity = Some(severity.into());
        self
    }

    /// 빌드
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Driver
//!
//! 드라이버 인스턴스. URI 스킴에 따라 단일 서버 풀이나 라우팅 로드 밸런서를 만든다.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::bolt::{AccessMode, BoltVersion};

use super::address::ServerAddress;
use super::auth::AuthToken;
use super::bolt::ConnectionSettings;
use super::bookmark::BookmarkManager;
use super::config::DriverConfig;
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PoolMetrics, PoolRegistry, PooledConnection};
use super::result::ServerInfo;
use super::routing::{BoltDiscovery, LoadBalancer, RouteRequest, RoutingTableManager};
use super::session::{Session, SessionConfig};

// ============================================================================
// ConnectionProvider - 연결 제공자
// ============================================================================

/// 세션이 연결을 빌리는 곳
pub(crate) enum ConnectionProvider {
    /// `bolt://`: 서버 하나
    Direct(Arc<ConnectionPool>),
    /// `neo4j://`: 라우팅 테이블을 따라 서버 선택
    Routing(LoadBalancer),
}

impl ConnectionProvider {
    pub(crate) async fn acquire(&self, mode: AccessMode, request: &RouteRequest) -> DriverResult<PooledConnection> {
        match self {
            Self::Direct(pool) => pool.acquire().await,
            Self::Routing(balancer) => balancer.acquire(mode, request).await,
        }
    }

    /// 라우팅 모드에서는 에러에 따라 서버를 테이블에서 지운다.
    pub(crate) fn handle_error(&self, err: DriverError, address: &ServerAddress, database: &str) -> DriverError {
        match self {
            Self::Direct(_) => err,
            Self::Routing(balancer) => balancer.handle_error(err, address, database),
        }
    }

    pub(crate) fn metrics(&self) -> Vec<PoolMetrics> {
        match self {
            Self::Direct(pool) => vec![pool.metrics()],
            Self::Routing(balancer) => balancer.registry().metrics(),
        }
    }

    pub(crate) async fn close(&self) {
        match self {
            Self::Direct(pool) => pool.close().await,
            Self::Routing(balancer) => balancer.close().await,
        }
    }
}

// ============================================================================
// Driver - 드라이버
// ============================================================================

/// 드라이버
///
/// 세션을 만들고 연결 풀을 소유한다. 여러 태스크에서 공유해도 된다.
pub struct Driver {
    config: Arc<DriverConfig>,
    provider: Arc<ConnectionProvider>,
    bookmark_manager: Arc<BookmarkManager>,
    open: RwLock<bool>,
}

impl Driver {
    /// 새 드라이버 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        Self::with_config(DriverConfig::new(uri, auth)?)
    }

    /// 설정으로 드라이버 생성. 연결은 처음 필요할 때 맺는다.
    pub fn with_config(config: DriverConfig) -> DriverResult<Self> {
        let settings = ConnectionSettings::from_driver_config(&config)?;
        let address = config.uri.address.clone();

        let provider = if config.is_routing() {
            let routing_context = settings.routing_context.clone().unwrap_or_default();
            let registry = Arc::new(PoolRegistry::new(config.pool.clone(), settings, config.auth.clone()));
            let discovery = Arc::new(BoltDiscovery::new(registry.clone(), routing_context));
            let manager = Arc::new(RoutingTableManager::new(
                vec![address.clone()],
                discovery,
                registry.clone(),
                config.routing_table_purge_delay,
            ));
            ConnectionProvider::Routing(LoadBalancer::new(manager, registry))
        } else {
            ConnectionProvider::Direct(ConnectionPool::new(
                address.clone(),
                config.pool.clone(),
                settings,
                config.auth.clone(),
            ))
        };
        info!(
            "Created {} driver for {}",
            if config.is_routing() { "routing" } else { "direct" },
            address
        );

        Ok(Self {
            config: Arc::new(config),
            provider: Arc::new(provider),
            bookmark_manager: BookmarkManager::shared(),
            open: RwLock::new(true),
        })
    }

    /// 세션 생성
    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(self.provider.clone(), config, &self.config)
    }

    /// 기본 설정의 세션
    pub fn default_session(&self) -> Session {
        self.session(SessionConfig::default())
    }

    /// 세션끼리 공유할 수 있는 기본 북마크 관리자
    pub fn bookmark_manager(&self) -> Arc<BookmarkManager> {
        self.bookmark_manager.clone()
    }

    /// 설정 조회
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 연결을 하나 맺어 서버(라우팅이면 라우팅 테이블까지)에 닿는지 확인
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.get_server_info().await.map(|_| ())
    }

    /// 연결된 서버 정보
    pub async fn get_server_info(&self) -> DriverResult<ServerInfo> {
        self.ensure_open()?;
        let conn = self.provider.acquire(AccessMode::Read, &RouteRequest::default()).await?;
        let info = ServerInfo::of(&conn);
        conn.release().await;
        Ok(info)
    }

    /// 데이터베이스 이름을 지정할 수 있는지 여부 (Bolt 4.0+)
    pub async fn supports_multi_db(&self) -> DriverResult<bool> {
        let info = self.get_server_info().await?;
        Ok(info.protocol_version >= BoltVersion::V4_0)
    }

    /// 서버별 풀 메트릭
    pub fn metrics(&self) -> Vec<PoolMetrics> {
        self.provider.metrics()
    }

    /// 드라이버 닫기. 모든 풀의 유휴 연결을 닫는다.
    pub async fn close(&self) {
        {
            let mut open = self.open.write();
            if !*open {
                return;
            }
            *open = false;
        }
        self.provider.close().await;
        info!("Closed driver for {}", self.config.uri.address);
    }

    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::service_unavailable("Driver is closed"))
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.config.uri.address)
            .field("routing", &self.config.is_routing())
            .field("open", &*self.open.read())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Connection Pool
//!
//! 서버 주소별 연결 풀

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::address::ServerAddress;
use super::auth::AuthTokenManager;
use super::bolt::{AuthorizationStatus, BoltConnection, ConnectionSettings};
use super::error::{DriverError, DriverResult};
use super::routing::PoolManager;
use crate::bolt::ServerErrorKind;

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// 연결 풀 설정
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `max_size` | 100 | 주소당 최대 사용 중 연결 수 |
/// | `acquisition_timeout` | 60초 | 연결 획득 대기 한도 |
/// | `connection_timeout` | 30초 | TCP/TLS/핸드셰이크 한도 |
/// | `max_lifetime` | 1시간 | 연결 최대 수명 |
/// | `liveness_check_timeout` | 없음 | 이보다 오래 쉬었으면 재사용 전 RESET 으로 확인 |
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// 최대 연결 수
    pub max_size: usize,
    /// 연결 획득 타임아웃
    pub acquisition_timeout: Duration,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
    /// 연결 최대 수명
    pub max_lifetime: Duration,
    /// 유휴 연결 생존 확인 기준
    pub liveness_check_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
            liveness_check_timeout: None,
        }
    }
}

impl PoolConfig {
    /// 빌더 패턴으로 풀 설정 생성
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// 풀 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 최대 연결 수 설정
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquisition_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 연결 최대 수명 설정
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    /// 유휴 연결 생존 확인 기준 설정
    pub fn liveness_check_timeout(mut self, idle: Duration) -> Self {
        self.config.liveness_check_timeout = Some(idle);
        self
    }

    /// 설정 빌드
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// PoolMetrics - 풀 메트릭
// ============================================================================

/// 풀 메트릭
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolMetrics {
    /// 서버 주소
    pub address: ServerAddress,
    /// 현재 크기 (유휴 + 사용 중)
    pub size: usize,
    /// 유휴 연결 수
    pub idle: usize,
    /// 사용 중인 연결 수
    pub in_use: usize,
    /// 총 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성 횟수
    pub total_created: u64,
    /// 총 닫힌 연결 수
    pub total_closed: u64,
    /// 총 타임아웃 횟수
    pub total_timeouts: u64,
}

// ============================================================================
// PooledConnection - 풀링된 연결
// ============================================================================

/// 풀에서 빌려온 연결
///
/// [`PooledConnection::release`] 로 반환한다. 반환하지 않고 버리면 연결은
/// 닫히고 풀에서 빠진다.
pub struct PooledConnection {
    conn: BoltConnection,
    lease: Lease,
}

struct Lease {
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
    returned: bool,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.returned {
            self.pool.forget_leased();
        }
    }
}

impl PooledConnection {
    /// 풀로 반환
    pub async fn release(self) {
        let PooledConnection { conn, mut lease } = self;
        lease.returned = true;
        lease.pool.clone().release(conn).await;
        // 연결이 유휴 큐에 들어간 뒤에 허가를 돌려준다
        drop(lease);
    }

    /// 풀에 돌려놓지 않고 닫기
    pub async fn destroy(self) {
        let PooledConnection { conn, mut lease } = self;
        lease.returned = true;
        lease.pool.in_use.fetch_sub(1, Ordering::Relaxed);
        lease.pool.destroy(conn).await;
    }

    /// 연결을 빌려준 풀
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.lease.pool
    }
}

impl Deref for PooledConnection {
    type Target = BoltConnection;

    fn deref(&self) -> &BoltConnection {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut BoltConnection {
        &mut self.conn
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.conn).finish()
    }
}

// ============================================================================
// ConnectionPool - 연결 풀
// ============================================================================

/// 서버 하나에 대한 연결 풀
///
/// 세마포어가 사용 중인 연결 수를 `max_size` 로 제한한다. 유휴 연결은
/// 재사용 전에 검증하고, 검증에 실패하면 재사용하지 않고 닫는다.
pub struct ConnectionPool {
    /// 서버 주소
    address: ServerAddress,
    /// 풀 설정
    config: PoolConfig,
    /// 연결 초기화 설정
    settings: ConnectionSettings,
    /// 토큰 관리자
    auth: Arc<dyn AuthTokenManager>,
    /// 유휴 연결들
    idle_connections: Mutex<VecDeque<BoltConnection>>,
    /// 세마포어 (사용 중 연결 수 제한)
    semaphore: Arc<Semaphore>,
    /// 현재 크기
    size: AtomicUsize,
    /// 사용 중인 연결 수
    in_use: AtomicUsize,
    total_created: AtomicU64,
    total_acquisitions: AtomicU64,
    total_closed: AtomicU64,
    total_timeouts: AtomicU64,
    /// 다음 연결 ID
    next_id: AtomicU64,
    /// 열린 상태
    open: RwLock<bool>,
    /// 서버가 마지막으로 `AuthorizationExpired` 를 보낸 시각.
    /// 그 전에 인증된 연결은 재인증 대상이다.
    auth_expired_at: Mutex<Option<Instant>>,
}

impl ConnectionPool {
    /// 새 연결 풀 생성
    pub fn new(
        address: ServerAddress,
        config: PoolConfig,
        settings: ConnectionSettings,
        auth: Arc<dyn AuthTokenManager>,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Arc::new(Self {
            address,
            config,
            settings,
            auth,
            idle_connections: Mutex::new(VecDeque::new()),
            semaphore,
            size: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            total_acquisitions: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            open: RwLock::new(true),
            auth_expired_at: Mutex::new(None),
        })
    }

    /// 서버 주소
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// 연결 획득
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        if !self.is_open() {
            return Err(DriverError::service_unavailable(format!(
                "Connection pool for {} is closed",
                self.address
            )));
        }

        let permit = match tokio::time::timeout(
            self.config.acquisition_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DriverError::service_unavailable(format!(
                    "Connection pool for {} is closed",
                    self.address
                )))
            }
            Err(_) => {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(DriverError::PoolExhausted(format!(
                    "Failed to obtain a connection from the pool for {} within {:?}",
                    self.address, self.config.acquisition_timeout
                )));
            }
        };

        let conn = match self.reuse_idle().await? {
            Some(conn) => conn,
            None => self.create_connection().await?,
        };

        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            conn,
            lease: Lease {
                pool: self.clone(),
                _permit: permit,
                returned: false,
            },
        })
    }

    /// 검증을 통과한 유휴 연결 꺼내기
    async fn reuse_idle(&self) -> DriverResult<Option<BoltConnection>> {
        loop {
            let next = self.idle_connections.lock().pop_front();
            let Some(mut conn) = next else {
                return Ok(None);
            };
            match self.validate(&mut conn).await {
                Ok(true) => return Ok(Some(conn)),
                Ok(false) => self.destroy(conn).await,
                Err(e) => {
                    self.destroy(conn).await;
                    return Err(e);
                }
            }
        }
    }

    async fn validate(&self, conn: &mut BoltConnection) -> DriverResult<bool> {
        if !conn.is_healthy() {
            return Ok(false);
        }
        if conn.age() > self.config.max_lifetime {
            debug!("Connection {} to {} exceeded its max lifetime", conn.id(), self.address);
            return Ok(false);
        }
        if let Some(threshold) = self.config.liveness_check_timeout {
            if conn.idle_time() > threshold {
                if let Err(e) = conn.reset().await {
                    debug!("Liveness check of connection {} failed: {}", conn.id(), e);
                    return Ok(false);
                }
            }
        }

        let token = self.auth.get_token().await?;
        let expired_at = *self.auth_expired_at.lock();
        let stale = conn.auth_token() != &token
            || expired_at.is_some_and(|at| conn.authenticated_at() <= at);
        if !stale {
            conn.set_auth_status(AuthorizationStatus::Pooled);
            return Ok(true);
        }
        if !conn.version().supports_logon() {
            return Ok(false);
        }
        match conn.reauth(token).await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("Re-authentication of connection {} failed: {}", conn.id(), e);
                Ok(false)
            }
        }
    }

    /// 새 연결 생성
    async fn create_connection(&self) -> DriverResult<BoltConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut conn = BoltConnection::connect(id, &self.address, &self.settings.transport).await?;
        let token = match self.auth.get_token().await {
            Ok(token) => token,
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        };
        if let Err(e) = conn.hello(&self.settings, token.clone()).await {
            if e.server_error().is_some_and(|s| s.kind == ServerErrorKind::TokenExpired) {
                self.auth.on_token_expired(&token);
            }
            conn.close().await;
            return Err(e.into());
        }

        self.size.fetch_add(1, Ordering::Relaxed);
        self.total_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Created connection {} to {} ({}, bolt {})",
            id,
            self.address,
            conn.server_agent().unwrap_or("unknown server"),
            conn.version()
        );
        Ok(conn)
    }

    /// 연결 반환
    async fn release(&self, mut conn: BoltConnection) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        conn.set_cancellation(None);

        match conn.auth_status() {
            AuthorizationStatus::AuthorizationExpired => {
                *self.auth_expired_at.lock() = Some(Instant::now());
            }
            AuthorizationStatus::SecurityError => {
                self.auth.on_token_expired(conn.auth_token());
                self.destroy(conn).await;
                return;
            }
            _ => {}
        }

        if !self.is_open() || !conn.is_open() {
            self.destroy(conn).await;
            return;
        }
        if !conn.is_healthy() {
            if let Err(e) = conn.reset().await {
                debug!("RESET of connection {} failed on release: {}", conn.id(), e);
                self.destroy(conn).await;
                return;
            }
        }
        conn.touch();
        self.idle_connections.lock().push_back(conn);
    }

    async fn destroy(&self, mut conn: BoltConnection) {
        conn.close().await;
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.total_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// 반환되지 않고 버려진 연결 정리
    fn forget_leased(&self) {
        warn!("Connection to {} was dropped without being released", self.address);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.total_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// 풀 닫기. 사용 중인 연결은 반환될 때 닫힌다.
    pub async fn close(&self) {
        *self.open.write() = false;
        self.semaphore.close();
        let drained: Vec<BoltConnection> = self.idle_connections.lock().drain(..).collect();
        for conn in drained {
            self.destroy(conn).await;
        }
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            address: self.address.clone(),
            size: self.size.load(Ordering::Relaxed),
            idle: self.idle_count(),
            in_use: self.in_use.load(Ordering::Relaxed),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }

    /// 풀 크기
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// 유휴 연결 수
    pub fn idle_count(&self) -> usize {
        self.idle_connections.lock().len()
    }

    /// 사용 중인 연결 수
    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use_count())
            .finish()
    }
}

// ============================================================================
// PoolRegistry - 주소별 풀 모음
// ============================================================================

/// 주소별 연결 풀 모음. 라우팅 테이블이 바뀌면 풀을 추가하고 닫는다.
pub struct PoolRegistry {
    pools: RwLock<HashMap<ServerAddress, Arc<ConnectionPool>>>,
    config: PoolConfig,
    settings: ConnectionSettings,
    auth: Arc<dyn AuthTokenManager>,
}

impl PoolRegistry {
    pub fn new(config: PoolConfig, settings: ConnectionSettings, auth: Arc<dyn AuthTokenManager>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            config,
            settings,
            auth,
        }
    }

    /// 주소의 풀. 없으면 만든다.
    pub fn pool(&self, address: &ServerAddress) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.read().get(address) {
            return pool.clone();
        }
        self.pools
            .write()
            .entry(address.clone())
            .or_insert_with(|| {
                ConnectionPool::new(
                    address.clone(),
                    self.config.clone(),
                    self.settings.clone(),
                    self.auth.clone(),
                )
            })
            .clone()
    }

    /// 주소로 연결 획득
    pub async fn acquire(&self, address: &ServerAddress) -> DriverResult<PooledConnection> {
        self.pool(address).acquire().await
    }

    /// 사용 중 연결 수. 풀이 없으면 0.
    pub fn in_use_count(&self, address: &ServerAddress) -> usize {
        self.pools
            .read()
            .get(address)
            .map(|p| p.in_use_count())
            .unwrap_or(0)
    }

    /// 풀 하나를 제거하고 닫기
    pub async fn remove(&self, address: &ServerAddress) {
        let removed = self.pools.write().remove(address);
        if let Some(pool) = removed {
            pool.close().await;
        }
    }

    pub fn addresses(&self) -> Vec<ServerAddress> {
        self.pools.read().keys().cloned().collect()
    }

    pub fn metrics(&self) -> Vec<PoolMetrics> {
        let mut metrics: Vec<PoolMetrics> = self.pools.read().values().map(|p| p.metrics()).collect();
        metrics.sort_by(|a, b| a.address.cmp(&b.address));
        metrics
    }

    /// 모든 풀 닫기
    pub async fn close(&self) {
        let pools: Vec<Arc<ConnectionPool>> = self.pools.write().drain().map(|(_, p)| p).collect();
        join_all(pools.iter().map(|p| p.close())).await;
    }
}

impl PoolManager for PoolRegistry {
    fn add_pools(&self, addresses: &[ServerAddress]) {
        for address in addresses {
            self.pool(address);
        }
    }

    fn update_pools<'a>(
        &'a self,
        added: &'a [ServerAddress],
        removed: &'a [ServerAddress],
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.add_pools(added);
            for address in removed {
                info!("Closing connection pool for {}", address);
                self.remove(address).await;
            }
        })
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("addresses", &self.addresses())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

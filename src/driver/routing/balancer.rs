//! 로드 밸런서
//!
//! 라우팅 테이블에서 역할에 맞는 서버를 골라 연결을 빌려준다.
//! 라운드 로빈으로 시작 위치를 돌리고, 그중 사용 중 연결이 가장 적은 서버를 고른다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bolt::AccessMode;
use crate::driver::address::ServerAddress;
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::pool::{PoolRegistry, PooledConnection};

use super::manager::{RouteRequest, RoutingTableManager};

const NOT_A_LEADER: &str = "Neo.ClientError.Cluster.NotALeader";
const FORBIDDEN_ON_READ_ONLY: &str = "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";

/// 라우팅 드라이버의 연결 제공자
pub struct LoadBalancer {
    manager: Arc<RoutingTableManager>,
    registry: Arc<PoolRegistry>,
    index: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(manager: Arc<RoutingTableManager>, registry: Arc<PoolRegistry>) -> Self {
        Self {
            manager,
            registry,
            index: AtomicUsize::new(0),
        }
    }

    pub fn manager(&self) -> &Arc<RoutingTableManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// `mode` 역할 서버로의 연결
    ///
    /// 연결할 수 없는 서버는 테이블에서 지우고 다음 후보로 넘어간다.
    pub async fn acquire(&self, mode: AccessMode, request: &RouteRequest) -> DriverResult<PooledConnection> {
        let table = self.manager.ensure_routing_table_for(mode, request).await?;
        let mut candidates = table.servers(mode).to_vec();

        while let Some(address) = self.select(&candidates) {
            match self.registry.acquire(&address).await {
                Ok(conn) => return Ok(conn),
                Err(e @ (DriverError::Connection(_) | DriverError::ServiceUnavailable(_))) => {
                    warn!("Failed to connect to {} server {}: {}", mode_name(mode), address, e);
                    self.manager.forget_server(&address, &request.database);
                    candidates.retain(|a| *a != address);
                }
                Err(e) => return Err(e),
            }
        }

        let known = self
            .manager
            .routing_table_for(&request.database)
            .unwrap_or(table);
        Err(DriverError::session_expired(format!(
            "Failed to obtain connection towards {} server. Known routing table is: {}",
            mode_name(mode),
            known
        )))
    }

    /// 라운드 로빈 시작점부터 사용 중 연결이 가장 적은 서버
    fn select(&self, candidates: &[ServerAddress]) -> Option<ServerAddress> {
        if candidates.is_empty() {
            return None;
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed) % candidates.len();
        (0..candidates.len())
            .map(|offset| &candidates[(start + offset) % candidates.len()])
            .min_by_key(|address| self.registry.in_use_count(address))
            .cloned()
    }

    /// 서버에서 받은 에러를 라우팅 관점에서 해석
    ///
    /// 리더가 아니거나 읽기 전용 데이터베이스에 쓰려 한 경우, 그리고 연결이
    /// 끊긴 경우는 테이블을 고치고 `SessionExpired` 로 바꾼다.
    pub fn handle_error(&self, err: DriverError, address: &ServerAddress, database: &str) -> DriverError {
        if let Some(server) = err.server_error() {
            if server.code == NOT_A_LEADER || server.code == FORBIDDEN_ON_READ_ONLY {
                debug!("{} is no longer a writer for '{}'", address, database);
                self.manager.forget_writer(address, database);
                return DriverError::session_expired(format!(
                    "Server at {} no longer accepts writes",
                    address
                ));
            }
            return err;
        }
        if let DriverError::Connection(msg) = &err {
            self.manager.forget_server(address, database);
            return DriverError::session_expired(format!(
                "Server at {} is no longer available: {}",
                address, msg
            ));
        }
        err
    }

    pub async fn close(&self) {
        self.manager.clear();
        self.registry.close().await;
    }
}

fn mode_name(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::Read => "read",
        AccessMode::Write => "write",
    }
}

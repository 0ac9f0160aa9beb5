//! 라우팅 테이블 관리자
//!
//! 데이터베이스별 라우팅 테이블을 캐시하고, 오래되면 라우터에 물어 갱신한다.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::bolt::AccessMode;
use crate::driver::address::ServerAddress;
use crate::driver::error::{DriverError, DriverResult};

use super::table::RoutingTable;

// ============================================================================
// 협력자
// ============================================================================

/// 라우팅 테이블 요청
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRequest {
    /// 빈 문자열이면 홈 데이터베이스
    pub database: String,
    pub impersonated_user: Option<String>,
    pub bookmarks: Vec<String>,
}

impl RouteRequest {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }
}

/// 라우터 하나에서 라우팅 테이블 가져오기
pub trait Discovery: Send + Sync {
    fn discover<'a>(
        &'a self,
        router: &'a ServerAddress,
        request: &'a RouteRequest,
    ) -> BoxFuture<'a, DriverResult<RoutingTable>>;
}

/// 라우팅 테이블 변화에 맞춰 주소별 풀을 유지
pub trait PoolManager: Send + Sync {
    fn add_pools(&self, addresses: &[ServerAddress]);

    fn update_pools<'a>(
        &'a self,
        added: &'a [ServerAddress],
        removed: &'a [ServerAddress],
    ) -> BoxFuture<'a, ()>;
}

// ============================================================================
// RoutingTableManager
// ============================================================================

/// 라우팅 테이블 관리자
///
/// 갱신은 데이터베이스별 잠금 아래에서 한 번에 하나만 일어난다. 알려진
/// 라우터가 모두 실패하면 아직 시도하지 않은 초기 주소로 한 번 더 시도한다.
pub struct RoutingTableManager {
    seeds: Vec<ServerAddress>,
    discovery: Arc<dyn Discovery>,
    pools: Arc<dyn PoolManager>,
    purge_delay: Duration,
    tables: RwLock<HashMap<String, RoutingTable>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoutingTableManager {
    pub fn new(
        seeds: Vec<ServerAddress>,
        discovery: Arc<dyn Discovery>,
        pools: Arc<dyn PoolManager>,
        purge_delay: Duration,
    ) -> Self {
        Self {
            seeds,
            discovery,
            pools,
            purge_delay,
            tables: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 초기 라우터 주소
    pub fn seeds(&self) -> &[ServerAddress] {
        &self.seeds
    }

    /// `mode` 요청에 쓸 수 있는 라우팅 테이블. 필요하면 갱신한다.
    pub async fn ensure_routing_table_for(
        &self,
        mode: AccessMode,
        request: &RouteRequest,
    ) -> DriverResult<RoutingTable> {
        let lock = self.lock_for(&request.database);
        let _guard = lock.lock().await;

        if let Some(table) = self.routing_table_for(&request.database) {
            if !table.is_stale(mode) {
                return Ok(table);
            }
        }

        let refreshed = self.update_routing_table(mode, request).await?;
        self.update(&request.database, refreshed.clone()).await;
        Ok(refreshed)
    }

    /// 캐시된 테이블
    pub fn routing_table_for(&self, database: &str) -> Option<RoutingTable> {
        self.tables.read().get(database).cloned()
    }

    /// 서버를 테이블에서 제거
    pub fn forget_server(&self, address: &ServerAddress, database: &str) {
        if let Some(table) = self.tables.write().get_mut(database) {
            table.forget(address);
        }
    }

    /// 서버를 라이터 목록에서 제거
    pub fn forget_writer(&self, address: &ServerAddress, database: &str) {
        if let Some(table) = self.tables.write().get_mut(database) {
            table.forget_writer(address);
        }
    }

    /// 모든 테이블 제거. 데이터베이스별 갱신 잠금은 유지한다.
    pub fn clear(&self) {
        self.tables.write().clear();
    }

    fn lock_for(&self, database: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(database.to_string())
            .or_default()
            .clone()
    }

    async fn update_routing_table(
        &self,
        mode: AccessMode,
        request: &RouteRequest,
    ) -> DriverResult<RoutingTable> {
        let database = &request.database;
        debug!("Updating routing table for database '{}'.", database);

        let mut existing = self
            .routing_table_for(database)
            .unwrap_or_else(|| RoutingTable::new(database.clone(), Vec::new()));

        let mut prepended_seeds = false;
        if existing.is_reading_in_absence_of_writer(mode) {
            existing.prepend_routers(&self.seeds);
            self.pools.add_pools(&self.seeds);
            prepended_seeds = true;
        }

        let mut tried = HashSet::new();
        let result = match self.try_routers(&mut existing, mode, request, &mut tried).await {
            Ok(None) if !prepended_seeds => {
                let remaining: Vec<ServerAddress> = self
                    .seeds
                    .iter()
                    .filter(|s| !tried.contains(*s))
                    .cloned()
                    .collect();
                if remaining.is_empty() {
                    Ok(None)
                } else {
                    existing.prepend_routers(&remaining);
                    self.pools.add_pools(&remaining);
                    self.try_routers(&mut existing, mode, request, &mut tried).await
                }
            }
            other => other,
        };

        match result {
            Ok(Some(table)) => Ok(table),
            Ok(None) => {
                self.keep_forgotten_routers(existing);
                Err(DriverError::service_unavailable(
                    "Failed to connect to any routing server. \
                     Please make sure that the cluster is up and can be accessed by the driver and retry.",
                ))
            }
            Err(e) => {
                self.keep_forgotten_routers(existing);
                Err(e)
            }
        }
    }

    /// 실패한 라우터를 지운 결과를 캐시에 반영
    fn keep_forgotten_routers(&self, table: RoutingTable) {
        if let Some(cached) = self.tables.write().get_mut(&table.database) {
            *cached = table;
        }
    }

    async fn try_routers(
        &self,
        table: &mut RoutingTable,
        mode: AccessMode,
        request: &RouteRequest,
        tried: &mut HashSet<ServerAddress>,
    ) -> DriverResult<Option<RoutingTable>> {
        let database = &request.database;
        for router in table.routers.clone() {
            tried.insert(router.clone());
            match self.discovery.discover(&router, request).await {
                Ok(fresh) if !fresh.is_stale(mode) => return Ok(Some(fresh)),
                Ok(_) => debug!(
                    "Skipping stale routing table received from server '{}' for database '{}'",
                    router, database
                ),
                Err(e) => {
                    let fail_fast = e.is_fatal_for_discovery();
                    match e.server_error() {
                        Some(server) if fail_fast => error!(
                            "Failed to update routing table from server '{}' for database '{}'. Error code: '{}'",
                            router, database, server.code
                        ),
                        Some(server) => warn!(
                            "Failed to update routing table from server '{}' for database '{}'. Error code: '{}'",
                            router, database, server.code
                        ),
                        None => warn!(
                            "Failed to update routing table from server '{}' for database '{}'. {}",
                            router, database, e
                        ),
                    }
                    if fail_fast {
                        return Err(e);
                    }
                    if is_unreachable(&e) {
                        table.forget(&router);
                    }
                }
            }
        }
        Ok(None)
    }

    /// 새 테이블 저장, 풀 정리, 오래된 테이블 제거
    async fn update(&self, requested: &str, table: RoutingTable) {
        let (added, removed) = {
            let mut tables = self.tables.write();
            let known: BTreeSet<ServerAddress> = [requested, table.database.as_str()]
                .iter()
                .filter_map(|name| tables.get(*name))
                .flat_map(RoutingTable::all_servers)
                .collect();
            let fresh = table.all_servers();

            tables.insert(table.database.clone(), table.clone());
            if requested != table.database {
                tables.insert(requested.to_string(), table.clone());
            }

            // 다른 데이터베이스가 아직 쓰는 서버의 풀은 남긴다
            let in_use: BTreeSet<ServerAddress> =
                tables.values().flat_map(RoutingTable::all_servers).collect();
            let added: Vec<ServerAddress> = fresh.difference(&known).cloned().collect();
            let removed: Vec<ServerAddress> = known
                .difference(&fresh)
                .filter(|a| !in_use.contains(*a))
                .cloned()
                .collect();
            (added, removed)
        };

        self.pools.update_pools(&added, &removed).await;
        self.purge_aged();
        info!("Routing table is updated => {}", table);
    }

    fn purge_aged(&self) {
        let mut tables = self.tables.write();
        let aged: Vec<String> = tables
            .iter()
            .filter(|(_, t)| t.is_expired_for(self.purge_delay))
            .map(|(name, _)| name.clone())
            .collect();
        if aged.is_empty() {
            return;
        }
        let mut locks = self.locks.lock();
        for name in aged {
            debug!("Purging routing table for database '{}'", name);
            tables.remove(&name);
            // 다른 작업이 잡고 있는 잠금은 지우지 않는다
            if locks.get(&name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&name);
            }
        }
    }
}

/// 라우터에 닿지 못한 실패인지 확인
fn is_unreachable(err: &DriverError) -> bool {
    matches!(
        err,
        DriverError::Connection(_)
            | DriverError::ServiceUnavailable(_)
            | DriverError::Timeout(_)
            | DriverError::PoolExhausted(_)
    )
}

impl fmt::Debug for RoutingTableManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTableManager")
            .field("seeds", &self.seeds)
            .field("databases", &self.tables.read().keys().cloned().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::ServerError;
    use crate::driver::routing::table::ServerRole;
    use std::collections::VecDeque;

    fn addr(host: &str) -> ServerAddress {
        ServerAddress::new(host, 7687)
    }

    fn table(database: &str, routers: &[&str], readers: &[&str], writers: &[&str], ttl: u64) -> RoutingTable {
        let mut table = RoutingTable::new(database, routers.iter().map(|h| addr(h)).collect());
        for r in readers {
            table.add_server(ServerRole::Read, addr(r));
        }
        for w in writers {
            table.add_server(ServerRole::Write, addr(w));
        }
        table.ttl = Duration::from_secs(ttl);
        table.expires_at = tokio::time::Instant::now() + table.ttl;
        table
    }

    /// 라우터별로 준비된 결과를 돌려주는 discovery
    #[derive(Default)]
    struct ScriptedDiscovery {
        replies: Mutex<HashMap<ServerAddress, VecDeque<DriverResult<RoutingTable>>>>,
        calls: Mutex<Vec<ServerAddress>>,
    }

    impl ScriptedDiscovery {
        fn reply(&self, router: &str, result: DriverResult<RoutingTable>) {
            self.replies.lock().entry(addr(router)).or_default().push_back(result);
        }

        fn calls(&self) -> Vec<ServerAddress> {
            self.calls.lock().clone()
        }
    }

    impl Discovery for ScriptedDiscovery {
        fn discover<'a>(
            &'a self,
            router: &'a ServerAddress,
            _request: &'a RouteRequest,
        ) -> BoxFuture<'a, DriverResult<RoutingTable>> {
            self.calls.lock().push(router.clone());
            let reply = self
                .replies
                .lock()
                .get_mut(router)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(DriverError::connection("unreachable")));
            Box::pin(async move { reply })
        }
    }

    #[derive(Default)]
    struct RecordingPools {
        added: Mutex<Vec<ServerAddress>>,
        removed: Mutex<Vec<ServerAddress>>,
    }

    impl PoolManager for RecordingPools {
        fn add_pools(&self, addresses: &[ServerAddress]) {
            self.added.lock().extend(addresses.iter().cloned());
        }

        fn update_pools<'a>(
            &'a self,
            added: &'a [ServerAddress],
            removed: &'a [ServerAddress],
        ) -> BoxFuture<'a, ()> {
            self.added.lock().extend(added.iter().cloned());
            self.removed.lock().extend(removed.iter().cloned());
            Box::pin(async {})
        }
    }

    fn manager(seeds: &[&str]) -> (RoutingTableManager, Arc<ScriptedDiscovery>, Arc<RecordingPools>) {
        let discovery = Arc::new(ScriptedDiscovery::default());
        let pools = Arc::new(RecordingPools::default());
        let manager = RoutingTableManager::new(
            seeds.iter().map(|h| addr(h)).collect(),
            discovery.clone(),
            pools.clone(),
            Duration::from_secs(30),
        );
        (manager, discovery, pools)
    }

    #[tokio::test]
    async fn test_fresh_table_is_reused() {
        let (manager, discovery, _) = manager(&["seed"]);
        discovery.reply("seed", Ok(table("", &["r1"], &["a"], &["w"], 300)));

        let request = RouteRequest::default();
        let first = manager.ensure_routing_table_for(AccessMode::Write, &request).await.unwrap();
        let second = manager.ensure_routing_table_for(AccessMode::Read, &request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(discovery.calls(), vec![addr("seed")]);
    }

    #[tokio::test]
    async fn test_falls_back_to_untried_seeds() {
        let (manager, discovery, _) = manager(&["seed1", "seed2"]);
        discovery.reply("seed1", Ok(table("", &["r1", "r2"], &["a"], &["w"], 0)));
        let request = RouteRequest::default();
        // seed1 answers once with a table that is already stale
        assert!(manager.ensure_routing_table_for(AccessMode::Write, &request).await.is_err());

        // cache a table whose routers are dead
        manager.tables.write().insert(String::new(), table("", &["r1", "seed1"], &["a"], &["w"], 0));
        discovery.reply("seed2", Ok(table("", &["seed2"], &["b"], &["w"], 300)));

        let refreshed = manager.ensure_routing_table_for(AccessMode::Write, &request).await.unwrap();
        assert_eq!(refreshed.readers, vec![addr("b")]);
        let calls = discovery.calls();
        // r1 and seed1 from the table, then only the untried seed
        assert_eq!(&calls[calls.len() - 3..], &[addr("r1"), addr("seed1"), addr("seed2")]);
    }

    #[tokio::test]
    async fn test_reading_without_writer_tries_seeds_first() {
        let (manager, discovery, pools) = manager(&["seed"]);
        manager.tables.write().insert(String::new(), table("", &["r1"], &["a"], &[], 0));
        discovery.reply("seed", Ok(table("", &["seed"], &["a"], &["w"], 300)));

        manager
            .ensure_routing_table_for(AccessMode::Read, &RouteRequest::default())
            .await
            .unwrap();
        assert_eq!(discovery.calls(), vec![addr("seed")]);
        assert!(pools.added.lock().contains(&addr("seed")));
    }

    #[tokio::test]
    async fn test_all_routers_fail() {
        let (manager, discovery, _) = manager(&["seed"]);
        manager.tables.write().insert(String::new(), table("", &["r1"], &["a"], &["w"], 0));

        let err = manager
            .ensure_routing_table_for(AccessMode::Write, &RouteRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::ServiceUnavailable(_)));
        assert_eq!(discovery.calls(), vec![addr("r1"), addr("seed")]);
        // unreachable routers are forgotten
        assert!(manager.routing_table_for("").unwrap().routers.is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_error_stops_discovery() {
        let (manager, discovery, _) = manager(&["seed"]);
        manager.tables.write().insert("nope".to_string(), table("nope", &["r1", "r2"], &["a"], &["w"], 0));
        discovery.reply(
            "r1",
            Err(ServerError::new("Neo.ClientError.Database.DatabaseNotFound", "no such db").into()),
        );

        let err = manager
            .ensure_routing_table_for(AccessMode::Write, &RouteRequest::new("nope"))
            .await
            .unwrap_err();
        assert!(err.server_error().is_some());
        assert_eq!(discovery.calls(), vec![addr("r1")]);
    }

    #[tokio::test]
    async fn test_authorization_expired_is_not_fail_fast() {
        let (manager, discovery, _) = manager(&["seed"]);
        manager.tables.write().insert(String::new(), table("", &["r1", "r2"], &["a"], &["w"], 0));
        discovery.reply(
            "r1",
            Err(ServerError::new("Neo.ClientError.Security.AuthorizationExpired", "expired").into()),
        );
        discovery.reply("r2", Ok(table("", &["r2"], &["a"], &["w"], 300)));

        manager
            .ensure_routing_table_for(AccessMode::Write, &RouteRequest::default())
            .await
            .unwrap();
        assert_eq!(discovery.calls(), vec![addr("r1"), addr("r2")]);
    }

    #[tokio::test]
    async fn test_update_diffs_pools_and_caches_resolved_name() {
        let (manager, discovery, pools) = manager(&["seed"]);
        discovery.reply("seed", Ok(table("neo4j", &["seed"], &["a", "b"], &["w"], 0)));
        discovery.reply("seed", Ok(table("neo4j", &["seed"], &["b", "c"], &["w"], 300)));

        // first reply is stale; the second replaces it
        manager.tables.write().insert(String::new(), table("", &["seed"], &["a"], &["w"], 0));
        let _ = manager
            .ensure_routing_table_for(AccessMode::Write, &RouteRequest::default())
            .await;
        let refreshed = manager
            .ensure_routing_table_for(AccessMode::Write, &RouteRequest::default())
            .await
            .unwrap();

        assert_eq!(refreshed.database, "neo4j");
        assert!(manager.routing_table_for("neo4j").is_some());
        assert!(manager.routing_table_for("").is_some());
        let added = pools.added.lock().clone();
        assert!(added.contains(&addr("c")));
    }

    #[tokio::test]
    async fn test_removed_servers_close_pools() {
        let (manager, discovery, pools) = manager(&["seed"]);
        manager
            .tables
            .write()
            .insert("db".to_string(), table("db", &["seed"], &["old"], &["w"], 0));
        discovery.reply("seed", Ok(table("db", &["seed"], &["new"], &["w"], 300)));

        manager
            .ensure_routing_table_for(AccessMode::Read, &RouteRequest::new("db"))
            .await
            .unwrap();
        assert_eq!(pools.removed.lock().clone(), vec![addr("old")]);
    }

    #[tokio::test]
    async fn test_forget_and_clear() {
        let (manager, _, _) = manager(&["seed"]);
        manager.tables.write().insert(String::new(), table("", &["r"], &["a"], &["a"], 300));

        manager.forget_writer(&addr("a"), "");
        let cached = manager.routing_table_for("").unwrap();
        assert!(cached.writers.is_empty());
        assert_eq!(cached.readers, vec![addr("a")]);

        manager.forget_server(&addr("a"), "");
        assert!(manager.routing_table_for("").unwrap().readers.is_empty());

        manager.clear();
        assert!(manager.routing_table_for("").is_none());
    }

    #[tokio::test]
    async fn test_clear_keeps_refresh_single_flight() {
        let (manager, discovery, _) = manager(&["seed"]);
        discovery.reply("seed", Ok(table("", &["r1"], &["a"], &["w"], 300)));

        let lock = manager.lock_for("");
        let guard = lock.lock().await;
        manager.clear();
        assert!(Arc::ptr_eq(&lock, &manager.lock_for("")));

        // a refresh started after clear still waits for the running one
        let request = RouteRequest::default();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            manager.ensure_routing_table_for(AccessMode::Read, &request),
        )
        .await;
        assert!(blocked.is_err());
        assert!(discovery.calls().is_empty());

        drop(guard);
        manager.ensure_routing_table_for(AccessMode::Read, &request).await.unwrap();
        assert_eq!(discovery.calls(), vec![addr("seed")]);
    }
}

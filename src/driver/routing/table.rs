//! 라우팅 테이블
//!
//! 데이터베이스 하나에 대한 서버 역할별 목록과 TTL

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::bolt::{AccessMode, Value};
use crate::driver::address::ServerAddress;
use crate::driver::error::{DriverError, DriverResult};

/// TTL 상한. 서버가 터무니없이 큰 값을 보내도 `Instant` 가 넘치지 않게 한다.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공자
    Route,
    /// 쓰기 트랜잭션 처리 (리더)
    Write,
    /// 읽기 트랜잭션 처리 (팔로워)
    Read,
}

impl ServerRole {
    /// 문자열에서 역할 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    /// 역할을 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

/// 라우팅 테이블
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    /// 데이터베이스 이름 (빈 문자열 = 홈 데이터베이스)
    pub database: String,
    /// 라우터 목록 (라우팅 테이블 조회용)
    pub routers: Vec<ServerAddress>,
    /// 리더 목록 (읽기 트랜잭션용)
    pub readers: Vec<ServerAddress>,
    /// 라이터 목록 (쓰기 트랜잭션용)
    pub writers: Vec<ServerAddress>,
    /// 서버가 알려준 TTL
    pub ttl: Duration,
    /// 만료 시각
    pub expires_at: Instant,
}

impl RoutingTable {
    /// 라우터만 아는, 이미 만료된 테이블
    pub fn new(database: impl Into<String>, routers: Vec<ServerAddress>) -> Self {
        Self {
            database: database.into(),
            routers,
            readers: Vec::new(),
            writers: Vec::new(),
            ttl: Duration::ZERO,
            expires_at: Instant::now(),
        }
    }

    /// ROUTE 응답(또는 라우팅 프로시저 결과)의 `rt` 맵에서 생성.
    /// `db` 가 없으면 요청한 데이터베이스 이름을 쓴다.
    pub fn from_rt(rt: &HashMap<String, Value>, requested_database: &str) -> DriverResult<Self> {
        let ttl_seconds = rt
            .get("ttl")
            .and_then(Value::as_int)
            .ok_or_else(|| malformed("missing integer 'ttl'"))?;
        let ttl = Duration::from_secs(ttl_seconds.max(0) as u64).min(MAX_TTL);
        let database = rt
            .get("db")
            .and_then(Value::as_str)
            .unwrap_or(requested_database)
            .to_string();

        let mut table = Self {
            database,
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            ttl,
            expires_at: Instant::now() + ttl,
        };

        let servers = rt
            .get("servers")
            .and_then(Value::as_list)
            .ok_or_else(|| malformed("missing list 'servers'"))?;
        for server in servers {
            let server = server.as_map().ok_or_else(|| malformed("server entry is not a map"))?;
            let role = server
                .get("role")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("server entry without 'role'"))?;
            let addresses = server
                .get("addresses")
                .and_then(Value::as_list)
                .ok_or_else(|| malformed("server entry without 'addresses'"))?;
            // 모르는 역할은 무시한다
            let Some(role) = ServerRole::parse(role) else {
                continue;
            };
            for address in addresses {
                let address = address
                    .as_str()
                    .ok_or_else(|| malformed("address is not a string"))?;
                table.add_server(role, ServerAddress::parse(address)?);
            }
        }
        Ok(table)
    }

    /// 역할별 서버 추가
    pub fn add_server(&mut self, role: ServerRole, address: ServerAddress) {
        let list = match role {
            ServerRole::Route => &mut self.routers,
            ServerRole::Write => &mut self.writers,
            ServerRole::Read => &mut self.readers,
        };
        if !list.contains(&address) {
            list.push(address);
        }
    }

    /// 역할별 서버 목록
    pub fn servers(&self, mode: AccessMode) -> &[ServerAddress] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }

    /// `mode` 요청에 쓸 수 없는 테이블인지 확인
    pub fn is_stale(&self, mode: AccessMode) -> bool {
        Instant::now() >= self.expires_at
            || self.routers.is_empty()
            || self.servers(mode).is_empty()
    }

    /// 만료 후 `purge_delay` 까지 지나 버려도 되는지 확인
    pub fn is_expired_for(&self, purge_delay: Duration) -> bool {
        Instant::now() >= self.expires_at + purge_delay
    }

    /// 라이터 없이 읽기만 가능한 상태에서 읽기 요청인지 확인
    pub fn is_reading_in_absence_of_writer(&self, mode: AccessMode) -> bool {
        mode == AccessMode::Read && self.writers.is_empty()
    }

    /// 모든 역할의 서버 (중복 제거)
    pub fn all_servers(&self) -> BTreeSet<ServerAddress> {
        self.routers
            .iter()
            .chain(&self.readers)
            .chain(&self.writers)
            .cloned()
            .collect()
    }

    /// 라우터 목록 앞에 추가. 이미 있는 주소는 앞으로 옮긴다.
    pub fn prepend_routers(&mut self, routers: &[ServerAddress]) {
        let mut merged: Vec<ServerAddress> = Vec::with_capacity(routers.len() + self.routers.len());
        for router in routers.iter().chain(&self.routers) {
            if !merged.contains(router) {
                merged.push(router.clone());
            }
        }
        self.routers = merged;
    }

    /// 모든 역할에서 제거
    pub fn forget(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    /// 라이터에서만 제거
    pub fn forget_writer(&mut self, address: &ServerAddress) {
        self.writers.retain(|a| a != address);
    }
}

fn malformed(detail: &str) -> DriverError {
    DriverError::ProtocolViolation(format!("Malformed routing table: {}", detail))
}

fn join(addresses: &[ServerAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remaining = self.expires_at.saturating_duration_since(Instant::now());
        write!(
            f,
            "RoutingTable{{database={}, routers=[{}], writers=[{}], readers=[{}], expiresAfter={}s}}",
            self.database,
            join(&self.routers),
            join(&self.writers),
            join(&self.readers),
            remaining.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str) -> ServerAddress {
        ServerAddress::new(host, 7687)
    }

    fn rt(ttl: i64, servers: &[(&str, &[&str])]) -> HashMap<String, Value> {
        let servers: Vec<Value> = servers
            .iter()
            .map(|(role, addresses)| {
                let mut entry = HashMap::new();
                entry.insert("role".to_string(), Value::from(*role));
                entry.insert(
                    "addresses".to_string(),
                    Value::List(addresses.iter().map(|a| Value::from(*a)).collect()),
                );
                Value::Map(entry)
            })
            .collect();
        let mut rt = HashMap::new();
        rt.insert("ttl".to_string(), Value::Integer(ttl));
        rt.insert("servers".to_string(), Value::List(servers));
        rt
    }

    #[test]
    fn test_server_role_parse() {
        assert_eq!(ServerRole::parse("ROUTE"), Some(ServerRole::Route));
        assert_eq!(ServerRole::parse("route"), Some(ServerRole::Route));
        assert_eq!(ServerRole::parse("WRITE"), Some(ServerRole::Write));
        assert_eq!(ServerRole::parse("READ"), Some(ServerRole::Read));
        assert_eq!(ServerRole::parse("UNKNOWN"), None);
    }

    #[tokio::test]
    async fn test_from_rt() {
        let mut map = rt(
            300,
            &[
                ("ROUTE", &["r1:7687", "r2:7687"]),
                ("WRITE", &["w1:7687"]),
                ("READ", &["r1:7687", "x:7688"]),
            ],
        );
        map.insert("db".to_string(), Value::from("movies"));

        let table = RoutingTable::from_rt(&map, "").unwrap();
        assert_eq!(table.database, "movies");
        assert_eq!(table.routers, vec![addr("r1"), addr("r2")]);
        assert_eq!(table.writers, vec![addr("w1")]);
        assert_eq!(table.readers, vec![addr("r1"), ServerAddress::new("x", 7688)]);
        assert_eq!(table.ttl, Duration::from_secs(300));
        assert_eq!(table.all_servers().len(), 4);
        assert!(!table.is_stale(AccessMode::Read));
        assert!(!table.is_stale(AccessMode::Write));
    }

    #[tokio::test]
    async fn test_from_rt_keeps_requested_database() {
        let table = RoutingTable::from_rt(&rt(10, &[]), "neo4j").unwrap();
        assert_eq!(table.database, "neo4j");
    }

    #[test]
    fn test_from_rt_rejects_malformed() {
        let mut map = rt(10, &[]);
        map.remove("ttl");
        assert!(matches!(
            RoutingTable::from_rt(&map, ""),
            Err(DriverError::ProtocolViolation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_table_is_stale_for_both_modes() {
        let table = RoutingTable::from_rt(
            &rt(10, &[("ROUTE", &["r:7687"]), ("WRITE", &["w:7687"]), ("READ", &["r:7687"])]),
            "",
        )
        .unwrap();
        assert!(!table.is_stale(AccessMode::Read));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(table.is_stale(AccessMode::Read));
        assert!(table.is_stale(AccessMode::Write));
        assert!(!table.is_expired_for(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(table.is_expired_for(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_no_writer_is_stale_for_writes_only() {
        let table =
            RoutingTable::from_rt(&rt(60, &[("ROUTE", &["r:7687"]), ("READ", &["r:7687"])]), "").unwrap();
        assert!(!table.is_stale(AccessMode::Read));
        assert!(table.is_stale(AccessMode::Write));
        assert!(table.is_reading_in_absence_of_writer(AccessMode::Read));
        assert!(!table.is_reading_in_absence_of_writer(AccessMode::Write));
    }

    #[test]
    fn test_prepend_routers() {
        let mut table = RoutingTable::new("", vec![addr("a"), addr("b")]);
        table.prepend_routers(&[addr("seed"), addr("b")]);
        assert_eq!(table.routers, vec![addr("seed"), addr("b"), addr("a")]);
    }

    #[test]
    fn test_forget() {
        let mut table = RoutingTable::new("", vec![addr("a")]);
        table.add_server(ServerRole::Write, addr("a"));
        table.add_server(ServerRole::Read, addr("a"));
        table.add_server(ServerRole::Read, addr("a"));
        assert_eq!(table.readers.len(), 1);

        table.forget_writer(&addr("a"));
        assert!(table.writers.is_empty());
        assert_eq!(table.routers.len(), 1);

        table.forget(&addr("a"));
        assert!(table.all_servers().is_empty());
    }

    #[test]
    fn test_display() {
        let mut table = RoutingTable::new("neo4j", vec![addr("r")]);
        table.add_server(ServerRole::Write, addr("w"));
        let shown = table.to_string();
        assert!(shown.starts_with("RoutingTable{database=neo4j, routers=[r:7687], writers=[w:7687]"));
    }
}

//! 라우팅 모듈
//!
//! `neo4j://` 스킴의 클러스터 라우팅을 지원합니다.
//!
//! # 개요
//!
//! ```text
//! LoadBalancer
//!   ├── RoutingTableManager (데이터베이스별 RoutingTable 캐시와 갱신)
//!   │     └── Discovery (라우터에 ROUTE 요청)
//!   └── PoolRegistry (서버별 ConnectionPool)
//! ```
//!
//! 읽기 요청은 READ 역할 서버로, 쓰기 요청은 WRITE 역할 서버로 보냅니다.
//! 테이블의 TTL 이 지나거나 필요한 역할이 비면 라우터에 다시 묻습니다.

mod balancer;
mod discovery;
mod manager;
mod table;

pub use balancer::LoadBalancer;
pub use discovery::BoltDiscovery;
pub use manager::{Discovery, PoolManager, RouteRequest, RoutingTableManager};
pub use table::{RoutingTable, ServerRole};

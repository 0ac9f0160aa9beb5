//! Driver Module
//!
//! 연결 풀, 라우팅, 세션과 트랜잭션
//!
//! # 구성
//!
//! - 드라이버 (Driver, DriverConfig, AuthToken)
//! - 연결 풀링 (ConnectionPool, PoolConfig)
//! - 라우팅 (LoadBalancer, RoutingTableManager, RoutingTable)
//! - 세션 관리 (Session, SessionConfig, BookmarkManager)
//! - 트랜잭션 API (Transaction, TransactionConfig, RetryPolicy)
//! - 결과 스트리밍 (ResultCursor, Record, ResultSummary)
//!
//! # Example
//!
//! ```ignore
//! use graphbolt::driver::{AuthToken, Driver, SessionConfig, TransactionConfig};
//! use graphbolt::params;
//!
//! // 단일 서버 드라이버 (bolt://)
//! let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("neo4j", "password"))?;
//! let session = driver.session(SessionConfig::default());
//!
//! // 자동 커밋 쿼리
//! let mut result = session.run("MATCH (n) RETURN n LIMIT 10").await?;
//! while let Some(record) = result.next().await? {
//!     println!("{}", record);
//! }
//!
//! // 트랜잭션
//! let tx = session.begin_transaction(TransactionConfig::default()).await?;
//! tx.run(("CREATE (n:Person {name: $name})", params! {"name" => "Alice"})).await?;
//! tx.commit().await?;
//!
//! // 재시도하는 트랜잭션 함수
//! let count = session
//!     .execute_read(|tx| async move {
//!         tx.run("MATCH (n) RETURN count(n) AS c").await?.single().await?.get_int("c")
//!     })
//!     .await?;
//!
//! session.close().await?;
//! driver.close().await;
//! ```
//!
//! `neo4j://` 스킴은 라우팅 드라이버를 만든다. 읽기 세션은 READ 서버로,
//! 쓰기 세션은 WRITE 서버로 간다.

pub mod bolt;
pub mod routing;

mod address;
mod auth;
mod bookmark;
mod config;
mod driver;
mod error;
mod pool;
mod record;
mod result;
mod retry;
mod runner;
mod session;
mod transaction;

#[cfg(test)]
mod testing;

// Re-exports
pub use address::{ConnectionUri, Encryption, Scheme, ServerAddress, DEFAULT_PORT};
pub use auth::{AuthToken, AuthTokenManager, StaticAuthTokenManager};
pub use bookmark::{BookmarkManager, BookmarkTracker};
pub use config::{DriverConfig, DriverConfigBuilder, TrustCallback, TrustStrategy, DEFAULT_FETCH_SIZE, FETCH_ALL};
pub use driver::Driver;
pub use error::{DriverError, DriverResult};
pub use pool::{ConnectionPool, PoolConfig, PoolConfigBuilder, PoolMetrics, PoolRegistry, PooledConnection};
pub use record::{FromValue, Record};
pub use result::{Counters, InputPosition, Notification, QueryType, ResultCursor, ResultSummary, ServerInfo};
pub use retry::RetryPolicy;
pub use runner::{Query, QueryRunner};
pub use session::{Session, SessionConfig, SessionConfigBuilder};
pub use transaction::{Transaction, TransactionConfig, TransactionState};

pub use crate::bolt::AccessMode;

//! # graphbolt
//!
//! An async client for graph databases that speak the Bolt protocol.
//!
//! ## Features
//!
//! - **Bolt 4.0 - 5.8** - version negotiation, chunked framing, PackStream and pipelined requests
//! - **Async/Await** - built on Tokio; records are pulled lazily in fetch-size batches
//! - **Connection Pooling** - per-server pools with liveness checks and re-authentication
//! - **Routing** - `neo4j://` cluster discovery with per-database routing tables
//! - **Transactions** - explicit transactions and retrying transaction functions
//! - **Causal Consistency** - bookmarks, optionally shared between sessions
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use graphbolt::{params, AuthToken, Driver, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Driver::new("neo4j://localhost:7687", AuthToken::basic("neo4j", "password"))?;
//!
//!     let session = driver.session(SessionConfig::builder().with_database("neo4j").build());
//!     let mut result = session
//!         .run(("CREATE (n:Person {name: $name}) RETURN n.name AS name", params! {"name" => "Alice"}))
//!         .await?;
//!     while let Some(record) = result.next().await? {
//!         println!("{}", record.get_string("name")?);
//!     }
//!     let summary = result.consume().await?;
//!     println!("{} nodes created", summary.counters.nodes_created);
//!
//!     session.close().await?;
//!     driver.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Transaction Functions
//!
//! Transient failures are retried with exponential backoff:
//!
//! ```rust,no_run
//! # use graphbolt::{AuthToken, Driver, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("u", "p"))?;
//! let session = driver.session(SessionConfig::default());
//! let created = session
//!     .execute_write(|tx| async move {
//!         let mut result = tx.run("CREATE (n:Node) RETURN id(n) AS id").await?;
//!         result.single().await?.get_int("id")
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - driver, sessions, transactions, pooling and routing
//! - [`bolt`] - the Bolt wire protocol

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bolt;
pub mod driver;

// Re-exports for convenience
pub use driver::{
    AccessMode, AuthToken, Driver, DriverConfig, DriverConfigBuilder, DriverError, DriverResult, Query,
    QueryRunner, Record, ResultCursor, ResultSummary, RetryPolicy, ServerAddress, ServerInfo, Session,
    SessionConfig, SessionConfigBuilder, Transaction, TransactionConfig, TrustStrategy,
};

pub use bolt::{BoltError, BoltVersion, Value};

/// Config alias for convenience
pub type Config = DriverConfig;

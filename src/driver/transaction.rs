//! Transaction API
//!
//! 명시적 트랜잭션

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::bolt::{BoltResult, Value};

use super::bolt::SharedStream;
use super::bookmark::BookmarkTracker;
use super::error::{DriverError, DriverResult};
use super::pool::PooledConnection;
use super::result::{ResultCursor, ServerInfo};
use super::runner::{Query, QueryRunner};
use super::session::ConnectionHolder;

// ============================================================================
// TransactionConfig - 트랜잭션 설정
// ============================================================================

/// 트랜잭션 설정
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// 타임아웃 (`tx_timeout`)
    pub timeout: Option<Duration>,
    /// 메타데이터 (`tx_metadata`)
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// TransactionState - 트랜잭션 상태
// ============================================================================

/// 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 활성 상태
    Active,
    /// 커밋됨
    Committed,
    /// 롤백됨
    RolledBack,
    /// 실패. 롤백만 할 수 있다.
    Failed,
}

impl TransactionState {
    /// 완료 상태 여부
    pub fn is_terminated(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

// ============================================================================
// Transaction - 트랜잭션
// ============================================================================

/// 명시적 트랜잭션
///
/// 복제본은 같은 트랜잭션을 가리킨다. 커밋이나 롤백 전까지 세션의 연결을
/// 붙잡고 있다.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

struct Inner {
    holder: ConnectionHolder,
    state: Mutex<TransactionState>,
    streams: Mutex<Vec<SharedStream>>,
    fetch_size: i64,
    tracker: BookmarkTracker,
    server: ServerInfo,
}

impl Transaction {
    pub(crate) fn new(holder: ConnectionHolder, fetch_size: i64, tracker: BookmarkTracker, server: ServerInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                holder,
                state: Mutex::new(TransactionState::Active),
                streams: Mutex::new(Vec::new()),
                fetch_size,
                tracker,
                server,
            }),
        }
    }

    /// 쿼리 실행
    pub async fn run(&self, query: impl Into<Query>) -> DriverResult<ResultCursor> {
        self.ensure_active()?;
        let query = query.into();
        let inner = &self.inner;

        let outcome = {
            let mut guard = inner.holder.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| DriverError::transaction("Transaction has no connection"))?;
            conn.run(&query.text, query.parameters.clone(), None, inner.fetch_size, None)
                .await
        };

        match outcome {
            Ok(stream) => {
                inner.streams.lock().push(stream.clone());
                Ok(ResultCursor::new(
                    stream,
                    inner.holder.clone(),
                    inner.fetch_size,
                    false,
                    query,
                    inner.server.clone(),
                ))
            }
            Err(e) => {
                *inner.state.lock() = TransactionState::Failed;
                Err(inner.holder.map_error(e, &inner.server.address))
            }
        }
    }

    /// 커밋
    ///
    /// 아직 읽지 않은 레코드를 먼저 모두 받아 둔다. 결과 중 하나라도 실패했으면
    /// 커밋하지 않고 그 에러를 돌려준다.
    pub async fn commit(&self) -> DriverResult<()> {
        self.ensure_active()?;
        let inner = &self.inner;
        let streams = std::mem::take(&mut *inner.streams.lock());

        let outcome = {
            let mut guard = inner.holder.lock().await;
            match guard.as_mut() {
                Some(conn) => buffer_and_commit(conn, &streams).await.map_err(DriverError::from),
                None => Err(DriverError::transaction("Transaction has no connection")),
            }
        };

        match outcome {
            Ok(bookmark) => {
                *inner.state.lock() = TransactionState::Committed;
                if let Some(bookmark) = bookmark {
                    inner.tracker.update(&bookmark);
                }
                inner.holder.release().await;
                Ok(())
            }
            Err(e) => {
                *inner.state.lock() = TransactionState::Failed;
                inner.holder.release().await;
                Err(inner.holder.map_error(e, &inner.server.address))
            }
        }
    }

    /// 롤백
    pub async fn rollback(&self) -> DriverResult<()> {
        let inner = &self.inner;
        let state = *inner.state.lock();
        match state {
            TransactionState::Active => {}
            TransactionState::Failed => {
                *inner.state.lock() = TransactionState::RolledBack;
                inner.holder.release().await;
                return Ok(());
            }
            TransactionState::Committed => {
                return Err(DriverError::transaction("Cannot roll back a transaction that has been committed"));
            }
            TransactionState::RolledBack => {
                return Err(DriverError::transaction("Transaction has already been rolled back"));
            }
        }

        let streams = std::mem::take(&mut *inner.streams.lock());
        let outcome = {
            let mut guard = inner.holder.lock().await;
            match guard.as_mut() {
                // A broken connection has no transaction left to roll back.
                Some(conn) if conn.is_open() && conn.is_healthy() => conn.rollback().await,
                _ => Ok(()),
            }
        };
        for stream in &streams {
            let mut s = stream.lock();
            s.consumed = true;
            s.records.clear();
        }

        *inner.state.lock() = TransactionState::RolledBack;
        inner.holder.release().await;
        outcome.map_err(|e| inner.holder.map_error(e, &inner.server.address))
    }

    /// 열려 있으면 롤백
    pub async fn close(&self) -> DriverResult<()> {
        let state = *self.inner.state.lock();
        match state {
            TransactionState::Active | TransactionState::Failed => self.rollback().await,
            TransactionState::Committed | TransactionState::RolledBack => Ok(()),
        }
    }

    /// 활성 상태 여부
    pub fn is_open(&self) -> bool {
        *self.inner.state.lock() == TransactionState::Active
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    fn ensure_active(&self) -> DriverResult<()> {
        match *self.inner.state.lock() {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(DriverError::transaction("Transaction has been committed")),
            TransactionState::RolledBack => Err(DriverError::transaction("Transaction has been rolled back")),
            TransactionState::Failed => Err(DriverError::transaction(
                "Transaction has failed and can only be rolled back",
            )),
        }
    }
}

async fn buffer_and_commit(conn: &mut PooledConnection, streams: &[SharedStream]) -> BoltResult<Option<String>> {
    for stream in streams {
        conn.buffer(stream).await?;
        let error = stream.lock().error();
        if let Some(error) = error {
            return Err(error);
        }
    }
    conn.commit().await
}

impl QueryRunner for Transaction {
    fn run_query(&self, query: Query) -> BoxFuture<'_, DriverResult<ResultCursor>> {
        Box::pin(self.run(query))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state())
            .field("server", &self.inner.server.address)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::tag;
    use crate::bolt::BoltVersion;
    use crate::driver::session::SessionConfig;
    use crate::driver::testing::{driver_for, failure, record, success, StubServer};

    #[test]
    fn test_transaction_config() {
        let config = TransactionConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_metadata("app", "billing");

        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.metadata["app"], Value::from("billing"));
    }

    #[test]
    fn test_transaction_state() {
        assert!(!TransactionState::Active.is_terminated());
        assert!(TransactionState::Committed.is_terminated());
        assert!(TransactionState::RolledBack.is_terminated());
        assert!(TransactionState::Failed.is_terminated());
    }

    #[tokio::test]
    async fn test_failed_query_blocks_commit() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(tag::RUN, vec![failure("Neo.ClientError.Statement.SyntaxError", "bad")]);

        let driver = driver_for(&server);
        let session = driver.session(SessionConfig::default());
        let tx = session.begin_transaction(TransactionConfig::default()).await.unwrap();

        assert!(tx.run("RETRUN 1").await.is_err());
        assert_eq!(tx.state(), TransactionState::Failed);
        assert!(matches!(tx.commit().await, Err(DriverError::Transaction(_))));

        tx.rollback().await.unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        // the failed connection is RESET, not rolled back
        assert!(server.requests_with(tag::ROLLBACK).is_empty());
        assert!(server.request_tags().contains(&tag::RESET));
        assert_eq!(driver.metrics()[0].in_use, 0);
    }

    #[tokio::test]
    async fn test_streaming_failure_fails_commit() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(tag::RUN, vec![success(&[("fields", Value::from(vec!["x".to_string()])), ("qid", Value::Integer(0))])]);
        server.script(
            tag::PULL,
            vec![
                record(vec![Value::Integer(1)]),
                failure("Neo.ClientError.Statement.ArithmeticError", "/ by zero"),
            ],
        );

        let driver = driver_for(&server);
        let session = driver.session(SessionConfig::default());
        let tx = session.begin_transaction(TransactionConfig::default()).await.unwrap();
        let _result = tx.run("UNWIND [1, 0] AS x RETURN 1 / x").await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.server_error().unwrap().code, "Neo.ClientError.Statement.ArithmeticError");
        assert!(server.requests_with(tag::COMMIT).is_empty());
        assert!(!tx.is_open());
    }

    #[tokio::test]
    async fn test_query_runner_over_transaction() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(tag::RUN, vec![success(&[("fields", Value::from(vec!["n".to_string()]))])]);
        server.script(tag::PULL, vec![record(vec![Value::Integer(9)]), success(&[])]);

        async fn count(runner: &dyn QueryRunner) -> DriverResult<i64> {
            let mut result = runner.run_query(Query::new("RETURN 9 AS n")).await?;
            result.single().await?.get_int("n")
        }

        let driver = driver_for(&server);
        let session = driver.session(SessionConfig::default());
        let tx = session.begin_transaction(TransactionConfig::default()).await.unwrap();
        assert_eq!(count(&tx).await.unwrap(), 9);
        tx.commit().await.unwrap();
        assert_eq!(server.requests_with(tag::COMMIT).len(), 1);
    }
}

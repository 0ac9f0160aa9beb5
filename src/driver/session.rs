//! Session Management
//!
//! 세션 관리. 세션은 한 번에 연결 하나와 트랜잭션 하나만 가진다.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bolt::message::TransactionExtra;
use crate::bolt::{AccessMode, BoltResult};

use super::address::ServerAddress;
use super::bolt::{SharedStream, TelemetryApi};
use super::bookmark::{BookmarkManager, BookmarkTracker};
use super::config::DriverConfig;
use super::driver::ConnectionProvider;
use super::error::{DriverError, DriverResult};
use super::pool::PooledConnection;
use super::result::{ResultCursor, ServerInfo};
use super::retry::RetryPolicy;
use super::routing::RouteRequest;
use super::runner::{Query, QueryRunner};
use super::transaction::{Transaction, TransactionConfig};

// ============================================================================
// SessionConfig - 세션 설정
// ============================================================================

/// 세션 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 데이터베이스 이름 (None = 홈 데이터베이스)
    pub database: Option<String>,
    /// Fetch Size (None = 드라이버 설정)
    pub fetch_size: Option<i64>,
    /// 기본 접근 모드
    pub default_access_mode: AccessMode,
    /// 초기 북마크
    pub bookmarks: Vec<String>,
    /// 임퍼손트 사용자
    pub impersonated_user: Option<String>,
    /// 다른 세션과 공유하는 북마크
    pub bookmark_manager: Option<Arc<BookmarkManager>>,
    /// 취소 토큰
    pub cancellation: Option<CancellationToken>,
}

impl SessionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 빌더 시작
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database: None,
            fetch_size: None,
            default_access_mode: AccessMode::Write,
            bookmarks: Vec::new(),
            impersonated_user: None,
            bookmark_manager: None,
            cancellation: None,
        }
    }
}

// ============================================================================
// SessionConfigBuilder - 세션 설정 빌더
// ============================================================================

/// 세션 설정 빌더
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// 새 빌더 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Fetch Size 설정 (`FETCH_ALL` = 전체)
    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.config.fetch_size = Some(size);
        self
    }

    /// 읽기 모드로 설정
    pub fn with_read_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Read;
        self
    }

    /// 쓰기 모드로 설정
    pub fn with_write_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Write;
        self
    }

    pub fn with_default_access_mode(mut self, mode: AccessMode) -> Self {
        self.config.default_access_mode = mode;
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// 북마크 추가
    pub fn with_bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.config.bookmarks.push(bookmark.into());
        self
    }

    /// 임퍼손트 사용자 설정
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.config.impersonated_user = Some(user.into());
        self
    }

    /// 북마크 공유. 드라이버 기본 관리자는 [`Driver::bookmark_manager`](super::Driver::bookmark_manager).
    pub fn with_bookmark_manager(mut self, manager: Arc<BookmarkManager>) -> Self {
        self.config.bookmark_manager = Some(manager);
        self
    }

    /// 취소 토큰 설정
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.config.cancellation = Some(token);
        self
    }

    /// 빌드
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// ConnectionHolder - 세션 연결
// ============================================================================

/// 세션과 그 결과, 트랜잭션이 함께 쓰는 연결 자리
#[derive(Clone)]
pub(crate) struct ConnectionHolder {
    slot: Arc<tokio::sync::Mutex<Option<PooledConnection>>>,
    provider: Arc<ConnectionProvider>,
    database: String,
    cancellation: Option<CancellationToken>,
}

impl ConnectionHolder {
    pub(crate) fn new(
        provider: Arc<ConnectionProvider>,
        database: String,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            slot: Arc::new(tokio::sync::Mutex::new(None)),
            provider,
            database,
            cancellation,
        }
    }

    /// `mode` 에 맞는 연결을 빌려 자리에 둔다. 이전 연결은 반환한다.
    pub(crate) async fn acquire(&self, mode: AccessMode, request: &RouteRequest) -> DriverResult<()> {
        let acquired = match &self.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(DriverError::Cancelled),
                conn = self.provider.acquire(mode, request) => conn,
            },
            None => self.provider.acquire(mode, request).await,
        };
        let mut conn = acquired?;
        conn.set_cancellation(self.cancellation.clone());

        let previous = self.slot.lock().await.replace(conn);
        if let Some(previous) = previous {
            previous.release().await;
        }
        Ok(())
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, Option<PooledConnection>> {
        self.slot.lock().await
    }

    /// 연결을 풀에 반환
    pub(crate) async fn release(&self) {
        let conn = self.slot.lock().await.take();
        if let Some(conn) = conn {
            conn.release().await;
        }
    }

    /// `address` 에서 난 에러를 라우팅 상태에 반영하고 사용자에게 줄 에러로 바꾼다.
    pub(crate) fn map_error(&self, err: impl Into<DriverError>, address: &ServerAddress) -> DriverError {
        self.provider.handle_error(err.into(), address, &self.database)
    }
}

// ============================================================================
// Session - 세션
// ============================================================================

/// 데이터베이스 세션
///
/// 새 쿼리를 실행하면 아직 다 읽지 않은 이전 결과는 버려진다.
pub struct Session {
    config: SessionConfig,
    fetch_size: i64,
    retry: RetryPolicy,
    notifications_minimum_severity: Option<String>,
    holder: ConnectionHolder,
    tracker: BookmarkTracker,
    last_stream: Mutex<Option<SharedStream>>,
    transaction: Mutex<Option<Transaction>>,
    open: RwLock<bool>,
}

impl Session {
    pub(crate) fn new(provider: Arc<ConnectionProvider>, config: SessionConfig, driver_config: &DriverConfig) -> Self {
        let holder = ConnectionHolder::new(
            provider,
            config.database.clone().unwrap_or_default(),
            config.cancellation.clone(),
        );
        let tracker = BookmarkTracker::new(config.bookmarks.clone(), config.bookmark_manager.clone());
        Self {
            fetch_size: config.fetch_size.unwrap_or(driver_config.fetch_size),
            retry: driver_config.retry.clone(),
            notifications_minimum_severity: driver_config.notifications_minimum_severity.clone(),
            holder,
            tracker,
            last_stream: Mutex::new(None),
            transaction: Mutex::new(None),
            open: RwLock::new(true),
            config,
        }
    }

    /// 쿼리 실행 (auto-commit)
    pub async fn run(&self, query: impl Into<Query>) -> DriverResult<ResultCursor> {
        self.ensure_open()?;
        if self.has_open_transaction() {
            return Err(DriverError::session(
                "Queries cannot be run directly on a session with an open transaction; \
                 either run from within the transaction or use a different session",
            ));
        }
        self.retire_last_result().await;

        let query = query.into();
        let mode = self.config.default_access_mode;
        let request = self.route_request();
        self.holder.acquire(mode, &request).await?;

        let extra = TransactionExtra {
            bookmarks: request.bookmarks,
            mode,
            database: self.config.database.clone(),
            impersonated_user: self.config.impersonated_user.clone(),
            notifications_minimum_severity: self.notifications_minimum_severity.clone(),
            ..TransactionExtra::default()
        };
        let (outcome, server) = {
            let mut guard = self.holder.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| DriverError::session("Session has no connection"))?;
            let server = ServerInfo::of(conn);
            let outcome = start_auto_commit(conn, &query, extra, self.fetch_size, &self.tracker).await;
            (outcome, server)
        };

        match outcome {
            Ok(stream) => {
                *self.last_stream.lock() = Some(stream.clone());
                Ok(ResultCursor::new(stream, self.holder.clone(), self.fetch_size, true, query, server))
            }
            Err(e) => {
                self.holder.release().await;
                Err(self.holder.map_error(e, &server.address))
            }
        }
    }

    /// 트랜잭션 시작
    pub async fn begin_transaction(&self, config: TransactionConfig) -> DriverResult<Transaction> {
        self.ensure_open()?;
        if self.has_open_transaction() {
            return Err(DriverError::session(
                "You cannot begin a transaction on a session with an open transaction; \
                 either run from within the transaction or use a different session",
            ));
        }
        self.retire_last_result().await;
        self.begin(self.config.default_access_mode, config, TelemetryApi::UnmanagedTransaction)
            .await
    }

    /// 읽기 트랜잭션 함수 (재시도 포함)
    pub async fn execute_read<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute(AccessMode::Read, TransactionConfig::default(), work).await
    }

    /// 쓰기 트랜잭션 함수 (재시도 포함)
    pub async fn execute_write<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute(AccessMode::Write, TransactionConfig::default(), work).await
    }

    /// 설정을 지정한 트랜잭션 함수
    ///
    /// `work` 가 성공하고 트랜잭션이 열려 있으면 커밋하고, 실패하면 롤백한다.
    /// 재시도 대상 에러는 재시도 정책에 따라 새 트랜잭션으로 다시 실행한다.
    pub async fn execute<F, Fut, T>(&self, mode: AccessMode, config: TransactionConfig, work: F) -> DriverResult<T>
    where
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.ensure_open()?;
        if self.has_open_transaction() {
            return Err(DriverError::session(
                "You cannot run a transaction function on a session with an open transaction",
            ));
        }
        self.retire_last_result().await;

        let work = &work;
        let config = &config;
        self.retry
            .run(move |attempt| async move {
                debug!("Managed {} transaction, attempt {}", mode, attempt);
                let tx = self.begin(mode, config.clone(), TelemetryApi::ManagedTransaction).await?;
                match work(tx.clone()).await {
                    Ok(value) => {
                        if tx.is_open() {
                            tx.commit().await?;
                        }
                        Ok(value)
                    }
                    Err(e) => {
                        if let Err(rollback) = tx.close().await {
                            debug!("Rollback after a failed transaction function failed: {}", rollback);
                        }
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn begin(&self, mode: AccessMode, config: TransactionConfig, api: TelemetryApi) -> DriverResult<Transaction> {
        let request = self.route_request();
        self.holder.acquire(mode, &request).await?;

        let extra = TransactionExtra {
            bookmarks: request.bookmarks,
            timeout: config.timeout,
            metadata: config.metadata,
            mode,
            database: self.config.database.clone(),
            impersonated_user: self.config.impersonated_user.clone(),
            notifications_minimum_severity: self.notifications_minimum_severity.clone(),
        };
        let (outcome, server) = {
            let mut guard = self.holder.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| DriverError::session("Session has no connection"))?;
            let server = ServerInfo::of(conn);
            let outcome = async {
                conn.telemetry(api).await?;
                conn.begin(extra).await
            }
            .await;
            (outcome, server)
        };

        if let Err(e) = outcome {
            self.holder.release().await;
            return Err(self.holder.map_error(e, &server.address));
        }
        let tx = Transaction::new(self.holder.clone(), self.fetch_size, self.tracker.clone(), server);
        *self.transaction.lock() = Some(tx.clone());
        Ok(tx)
    }

    /// 이 세션의 마지막 북마크
    pub fn last_bookmarks(&self) -> Vec<String> {
        self.tracker.last_bookmarks()
    }

    /// 세션 닫기. 열린 트랜잭션은 롤백하고 남은 결과는 버린다.
    pub async fn close(&self) -> DriverResult<()> {
        {
            let mut open = self.open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }
        let tx = self.transaction.lock().take();
        let rolled_back = match tx {
            Some(tx) => tx.close().await,
            None => Ok(()),
        };
        self.retire_last_result().await;
        self.holder.release().await;
        rolled_back
    }

    /// 세션 설정
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if *self.open.read() {
            Ok(())
        } else {
            Err(DriverError::session("Session is closed"))
        }
    }

    fn has_open_transaction(&self) -> bool {
        self.transaction.lock().as_ref().is_some_and(Transaction::is_open)
    }

    fn route_request(&self) -> RouteRequest {
        RouteRequest {
            database: self.config.database.clone().unwrap_or_default(),
            impersonated_user: self.config.impersonated_user.clone(),
            bookmarks: self.tracker.bookmarks_to_send(),
        }
    }

    /// 마지막 자동 커밋 결과를 버리고 연결을 반환한다.
    async fn retire_last_result(&self) {
        let stream = self.last_stream.lock().take();
        if let Some(stream) = stream {
            let finished = stream.lock().finished;
            let discarded = {
                let mut guard = self.holder.lock().await;
                match guard.as_mut() {
                    Some(conn) if !finished => conn.discard(&stream).await,
                    _ => Ok(()),
                }
            };
            if let Err(e) = discarded {
                debug!("Failed to discard the previous result: {}", e);
            }
            let mut s = stream.lock();
            s.consumed = true;
            s.records.clear();
        }
        self.holder.release().await;
    }
}

async fn start_auto_commit(
    conn: &mut PooledConnection,
    query: &Query,
    extra: TransactionExtra,
    fetch_size: i64,
    tracker: &BookmarkTracker,
) -> BoltResult<SharedStream> {
    conn.telemetry(TelemetryApi::AutoCommit).await?;
    conn.run(
        &query.text,
        query.parameters.clone(),
        Some(extra),
        fetch_size,
        Some(tracker.clone()),
    )
    .await
}

impl QueryRunner for Session {
    fn run_query(&self, query: Query) -> BoxFuture<'_, DriverResult<ResultCursor>> {
        Box::pin(self.run(query))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.config.database)
            .field("mode", &self.config.default_access_mode)
            .field("open", &*self.open.read())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::bolt::message::tag;
    use crate::bolt::{BoltVersion, Value};
    use crate::driver::auth::AuthToken;
    use crate::driver::testing::{driver_for, driver_with, failure, record, success, StubServer};

    fn fields(keys: &[&str]) -> (&'static str, Value) {
        ("fields", Value::from(keys.iter().map(|k| k.to_string()).collect::<Vec<_>>()))
    }

    fn extra_of(request: &crate::bolt::Structure, index: usize) -> HashMap<String, Value> {
        request.fields[index].as_map().cloned().unwrap_or_default()
    }

    #[test]
    fn test_session_config_builder() {
        let token = CancellationToken::new();
        let config = SessionConfig::builder()
            .with_database("mydb")
            .with_fetch_size(500)
            .with_read_access()
            .with_bookmark("b1")
            .with_impersonated_user("jane")
            .with_cancellation(token)
            .build();

        assert_eq!(config.database.as_deref(), Some("mydb"));
        assert_eq!(config.fetch_size, Some(500));
        assert_eq!(config.default_access_mode, AccessMode::Read);
        assert_eq!(config.bookmarks, vec!["b1"]);
        assert_eq!(config.impersonated_user.as_deref(), Some("jane"));
        assert!(config.cancellation.is_some());

        let defaults = SessionConfig::new();
        assert_eq!(defaults.default_access_mode, AccessMode::Write);
        assert!(defaults.bookmark_manager.is_none());
    }

    #[tokio::test]
    async fn test_auto_commit_sends_transaction_metadata() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(tag::RUN, vec![success(&[fields(&["n"])])]);
        server.script(
            tag::PULL,
            vec![record(vec![Value::Integer(1)]), success(&[("bookmark", Value::from("bm:2"))])],
        );

        let driver = driver_for(&server);
        let session = driver.session(
            SessionConfig::builder()
                .with_database("movies")
                .with_read_access()
                .with_bookmark("bm:1")
                .build(),
        );
        let mut result = session.run("MATCH (n) RETURN count(n) AS n").await.unwrap();
        assert_eq!(result.single().await.unwrap().get_int("n").unwrap(), 1);

        let run = &server.requests_with(tag::RUN)[0];
        assert_eq!(run.fields[0], Value::from("MATCH (n) RETURN count(n) AS n"));
        let extra = extra_of(run, 2);
        assert_eq!(extra["db"], Value::from("movies"));
        assert_eq!(extra["mode"], Value::from("r"));
        assert_eq!(extra["bookmarks"], Value::from(vec!["bm:1".to_string()]));

        // TELEMETRY goes out ahead of the RUN
        let tags = server.request_tags();
        let telemetry = tags.iter().position(|t| *t == tag::TELEMETRY).unwrap();
        let run_at = tags.iter().position(|t| *t == tag::RUN).unwrap();
        assert!(telemetry < run_at);
        assert_eq!(server.requests_with(tag::TELEMETRY)[0].fields[0], Value::Integer(2));

        assert_eq!(session.last_bookmarks(), vec!["bm:2"]);
    }

    #[tokio::test]
    async fn test_explicit_transaction_commit() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(tag::RUN, vec![success(&[fields(&["n"]), ("qid", Value::Integer(0))])]);
        server.script(
            tag::PULL,
            vec![record(vec![Value::Integer(1)]), success(&[("has_more", Value::Boolean(true))])],
        );
        server.script(tag::PULL, vec![record(vec![Value::Integer(2)]), success(&[])]);
        server.script(tag::COMMIT, vec![success(&[("bookmark", Value::from("bm:tx"))])]);

        let driver = driver_for(&server);
        let session = driver.session(SessionConfig::builder().with_fetch_size(1).build());
        let tx = session
            .begin_transaction(TransactionConfig::new().with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(tx.is_open());

        let err = session.run("RETURN 1").await.unwrap_err();
        assert!(matches!(err, DriverError::Session(_)));

        let mut result = tx.run("UNWIND [1, 2] AS n RETURN n").await.unwrap();
        tx.commit().await.unwrap();
        assert!(!tx.is_open());

        // records were buffered before COMMIT and stay readable
        let values: Vec<i64> = result
            .collect()
            .await
            .unwrap()
            .iter()
            .map(|r| r.get_int("n").unwrap())
            .collect();
        assert_eq!(values, vec![1, 2]);

        let begin = &server.requests_with(tag::BEGIN)[0];
        assert_eq!(extra_of(begin, 0)["tx_timeout"], Value::Integer(5000));
        let second_pull = &server.requests_with(tag::PULL)[1];
        assert_eq!(second_pull.fields[0].as_map().unwrap()["qid"], Value::Integer(0));
        assert_eq!(session.last_bookmarks(), vec!["bm:tx"]);
        assert_eq!(driver.metrics()[0].in_use, 0);
    }

    #[tokio::test]
    async fn test_rollback_and_close() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;

        let driver = driver_for(&server);
        let session = driver.session(SessionConfig::default());
        let tx = session.begin_transaction(TransactionConfig::default()).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(tx.rollback().await.is_err());

        let _open = session.begin_transaction(TransactionConfig::default()).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(server.requests_with(tag::ROLLBACK).len(), 2);
        assert!(matches!(session.run("RETURN 1").await, Err(DriverError::Session(_))));
        assert_eq!(driver.metrics()[0].in_use, 0);
    }

    #[tokio::test]
    async fn test_execute_write_retries_transient_failures() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        for _ in 0..2 {
            server.script(
                tag::RUN,
                vec![failure("Neo.TransientError.Transaction.DeadlockDetected", "deadlock")],
            );
        }
        server.script(tag::RUN, vec![success(&[fields(&["n"]), ("qid", Value::Integer(0))])]);
        // PULLs behind the failed RUNs are IGNORED without using a script
        server.script(tag::PULL, vec![record(vec![Value::Integer(3)]), success(&[])]);

        let mut config = DriverConfig::new(&format!("bolt://{}", server.address()), AuthToken::none()).unwrap();
        config.retry.initial_delay = Duration::from_millis(5);
        let driver = driver_with(config);
        let session = driver.session(SessionConfig::default());

        let attempts = AtomicU32::new(0);
        let value = session
            .execute_write(|tx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    let mut result = tx.run("CREATE (n) RETURN 3 AS n").await?;
                    result.single().await?.get_int("n")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(server.requests_with(tag::BEGIN).len(), 3);
        assert_eq!(server.requests_with(tag::COMMIT).len(), 1);
        // failed transactions are not rolled back on the wire; the pool RESETs them
        assert!(server.requests_with(tag::ROLLBACK).is_empty());
        assert_eq!(server.requests_with(tag::RESET).len(), 2);
        assert_eq!(driver.metrics()[0].in_use, 0);
        let telemetry = server.requests_with(tag::TELEMETRY);
        assert!(telemetry.iter().all(|t| t.fields[0] == Value::Integer(0)));
    }

    #[tokio::test]
    async fn test_execute_rolls_back_each_failed_attempt() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        let mut config = DriverConfig::new(&format!("bolt://{}", server.address()), AuthToken::none()).unwrap();
        config.retry.initial_delay = Duration::from_millis(5);
        let driver = driver_with(config);
        let session = driver.session(SessionConfig::default());

        let attempts = AtomicU32::new(0);
        let value = session
            .execute_write(|_tx| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        Err(DriverError::service_unavailable("leader switched"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(server.requests_with(tag::BEGIN).len(), 3);
        assert_eq!(server.requests_with(tag::ROLLBACK).len(), 2);
        assert_eq!(server.requests_with(tag::COMMIT).len(), 1);
        assert_eq!(driver.metrics()[0].in_use, 0);
    }

    #[tokio::test]
    async fn test_execute_rolls_back_once_on_non_retryable_error() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        let driver = driver_for(&server);
        let session = driver.session(SessionConfig::default());

        let attempts = AtomicU32::new(0);
        let err = session
            .execute_write(|_tx| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(DriverError::type_conversion("not a number")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::TypeConversion(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(server.requests_with(tag::BEGIN).len(), 1);
        assert_eq!(server.requests_with(tag::ROLLBACK).len(), 1);
        assert!(server.requests_with(tag::COMMIT).is_empty());
    }

    #[tokio::test]
    async fn test_execute_read_gives_up_on_client_errors() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(tag::RUN, vec![failure("Neo.ClientError.Statement.SyntaxError", "bad")]);

        let driver = driver_for(&server);
        let session = driver.session(SessionConfig::default());
        let err = session
            .execute_read(|tx| async move { tx.run("RETRUN 1").await.map(|_| ()) })
            .await
            .unwrap_err();

        assert_eq!(err.server_error().unwrap().code, "Neo.ClientError.Statement.SyntaxError");
        assert_eq!(server.requests_with(tag::BEGIN).len(), 1);
        assert_eq!(extra_of(&server.requests_with(tag::BEGIN)[0], 0)["mode"], Value::from("r"));
    }

    #[tokio::test]
    async fn test_shared_bookmark_manager() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(tag::COMMIT, vec![success(&[("bookmark", Value::from("bm:a"))])]);

        let driver = driver_for(&server);
        let manager = driver.bookmark_manager();
        let writer = driver.session(SessionConfig::builder().with_bookmark_manager(manager.clone()).build());
        writer
            .execute_write(|_tx| async move { Ok(()) })
            .await
            .unwrap();
        assert_eq!(manager.get_bookmarks(), vec!["bm:a"]);

        let reader = driver.session(
            SessionConfig::builder()
                .with_bookmark("bm:own")
                .with_bookmark_manager(manager)
                .build(),
        );
        let tx = reader.begin_transaction(TransactionConfig::default()).await.unwrap();
        tx.close().await.unwrap();

        let begin = &server.requests_with(tag::BEGIN)[1];
        assert_eq!(
            extra_of(begin, 0)["bookmarks"],
            Value::from(vec!["bm:a".to_string(), "bm:own".to_string()])
        );
    }

    #[tokio::test]
    async fn test_cancellation_marks_connection_defunct() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        // RUN is never answered
        server.script(tag::RUN, vec![]);

        let driver = driver_for(&server);
        let token = CancellationToken::new();
        let session = driver.session(SessionConfig::builder().with_cancellation(token.clone()).build());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let err = session.run("RETURN 1").await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, DriverError::Cancelled));
        let metrics = &driver.metrics()[0];
        assert_eq!(metrics.in_use, 0);
        assert_eq!(metrics.idle, 0);
    }
}

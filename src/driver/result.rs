//! Result Cursor
//!
//! 레코드를 fetch size 단위로 당겨오는 지연 결과와 결과 요약

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};

use crate::bolt::{BoltError, BoltVersion, Value};

use super::address::ServerAddress;
use super::bolt::{BoltConnection, SharedStream};
use super::error::{DriverError, DriverResult};
use super::record::Record;
use super::runner::Query;
use super::session::ConnectionHolder;

// ============================================================================
// ServerInfo - 서버 정보
// ============================================================================

/// 결과를 만든 서버
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub address: ServerAddress,
    /// HELLO 응답의 `server` (예: "Neo4j/5.20.0")
    pub agent: Option<String>,
    pub protocol_version: BoltVersion,
}

impl ServerInfo {
    pub(crate) fn of(conn: &BoltConnection) -> Self {
        Self {
            address: conn.address().clone(),
            agent: conn.server_agent().map(str::to_string),
            protocol_version: conn.version(),
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, bolt {})",
            self.address,
            self.agent.as_deref().unwrap_or("unknown"),
            self.protocol_version
        )
    }
}

// ============================================================================
// ResultSummary - 결과 요약
// ============================================================================

/// 결과 요약
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub query: Query,
    pub query_type: QueryType,
    pub counters: Counters,
    pub notifications: Vec<Notification>,
    pub server: ServerInfo,
    /// 쿼리가 실행된 데이터베이스
    pub database: Option<String>,
    /// 첫 레코드를 받을 수 있게 되기까지 걸린 시간 (`t_first`)
    pub result_available_after: Option<Duration>,
    /// 마지막 레코드까지 걸린 시간 (`t_last`)
    pub result_consumed_after: Option<Duration>,
    /// 자동 커밋 쿼리가 남긴 북마크
    pub bookmark: Option<String>,
}

impl ResultSummary {
    /// RUN 과 마지막 PULL/DISCARD 응답의 메타데이터로 생성
    pub fn from_metadata(query: Query, server: ServerInfo, metadata: &HashMap<String, Value>) -> Self {
        let millis = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_int)
                .filter(|ms| *ms >= 0)
                .map(|ms| Duration::from_millis(ms as u64))
        };
        let string = |key: &str| metadata.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            query,
            query_type: string("type")
                .as_deref()
                .and_then(QueryType::parse)
                .unwrap_or_default(),
            counters: metadata
                .get("stats")
                .and_then(Value::as_map)
                .map(Counters::from_stats)
                .unwrap_or_default(),
            notifications: metadata
                .get("notifications")
                .and_then(Value::as_list)
                .map(|list| list.iter().filter_map(Notification::from_value).collect())
                .unwrap_or_default(),
            server,
            database: string("db"),
            result_available_after: millis("t_first"),
            result_consumed_after: millis("t_last"),
            bookmark: string("bookmark"),
        }
    }
}

/// 쿼리 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// 읽기 전용
    #[default]
    ReadOnly,
    /// 읽기/쓰기
    ReadWrite,
    /// 쓰기 전용
    WriteOnly,
    /// 스키마 변경
    SchemaWrite,
}

impl QueryType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Self::ReadOnly),
            "rw" => Some(Self::ReadWrite),
            "w" => Some(Self::WriteOnly),
            "s" => Some(Self::SchemaWrite),
            _ => None,
        }
    }
}

/// 카운터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub system_updates: i64,
}

impl Counters {
    /// `stats` 맵에서 생성. 없는 항목은 0.
    pub fn from_stats(stats: &HashMap<String, Value>) -> Self {
        let get = |key: &str| stats.get(key).and_then(Value::as_int).unwrap_or(0);
        Self {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
            indexes_added: get("indexes-added"),
            indexes_removed: get("indexes-removed"),
            constraints_added: get("constraints-added"),
            constraints_removed: get("constraints-removed"),
            system_updates: get("system-updates"),
        }
    }

    /// 변경 사항 존재 여부
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
            || self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }

    /// 시스템 데이터베이스 변경 존재 여부
    pub fn contains_system_updates(&self) -> bool {
        self.system_updates > 0
    }
}

/// 알림
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub code: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub position: Option<InputPosition>,
}

impl Notification {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        let text = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let position = map.get("position").and_then(Value::as_map).map(|p| {
            let get = |key: &str| p.get(key).and_then(Value::as_int).unwrap_or(0);
            InputPosition {
                offset: get("offset"),
                line: get("line"),
                column: get("column"),
            }
        });
        Some(Self {
            code: text("code"),
            title: text("title"),
            description: text("description"),
            severity: text("severity"),
            position,
        })
    }
}

/// 입력 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPosition {
    pub offset: i64,
    pub line: i64,
    pub column: i64,
}

// ============================================================================
// ResultCursor - 지연 결과
// ============================================================================

enum Buffered {
    Record(Record),
    Failed(BoltError),
    End,
    Empty,
}

fn consumed_error() -> DriverError {
    DriverError::result_consumed(
        "Cannot read from a result after it has been consumed or after a newer query was run in the same session",
    )
}

/// 쿼리 결과
///
/// 버퍼가 비면 같은 연결로 다음 fetch size 만큼을 PULL 한다. 자동 커밋
/// 결과는 끝까지 읽거나 [`consume`](Self::consume) 하면 연결을 풀에 돌려준다.
pub struct ResultCursor {
    stream: SharedStream,
    holder: ConnectionHolder,
    keys: Arc<Vec<String>>,
    fetch_size: i64,
    auto_commit: bool,
    query: Query,
    server: ServerInfo,
    peeked: Option<Record>,
    summary: Option<ResultSummary>,
}

impl ResultCursor {
    pub(crate) fn new(
        stream: SharedStream,
        holder: ConnectionHolder,
        fetch_size: i64,
        auto_commit: bool,
        query: Query,
        server: ServerInfo,
    ) -> Self {
        let keys = Arc::new(stream.lock().keys.clone());
        Self {
            stream,
            holder,
            keys,
            fetch_size,
            auto_commit,
            query,
            server,
            peeked: None,
            summary: None,
        }
    }

    /// 컬럼 이름
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 다음 레코드. 끝이면 `None`.
    pub async fn next(&mut self) -> DriverResult<Option<Record>> {
        if let Some(record) = self.peeked.take() {
            return Ok(Some(record));
        }
        self.advance().await
    }

    /// 다음 레코드를 꺼내지 않고 보기
    pub async fn peek(&mut self) -> DriverResult<Option<&Record>> {
        if self.peeked.is_none() {
            self.peeked = self.advance().await?;
        }
        Ok(self.peeked.as_ref())
    }

    /// 레코드가 정확히 하나인 결과의 그 레코드
    pub async fn single(&mut self) -> DriverResult<Record> {
        let first = self.next().await?.ok_or_else(|| {
            DriverError::type_conversion("Expected a result with a single record, but this result contains no records")
        })?;
        if self.peek().await?.is_some() {
            self.consume().await?;
            return Err(DriverError::type_conversion(
                "Expected a result with a single record, but this result contains more than one",
            ));
        }
        Ok(first)
    }

    /// 남은 레코드 모두
    pub async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// 남은 레코드를 버리고 요약을 받는다. 이후 읽기는 `ResultConsumed`.
    pub async fn consume(&mut self) -> DriverResult<ResultSummary> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        self.peeked = None;
        if self.stream.lock().consumed {
            return Err(consumed_error());
        }

        let discarded = {
            let mut guard = self.holder.lock().await;
            let finished = self.stream.lock().finished;
            match guard.as_mut() {
                Some(conn) if !finished => conn.discard(&self.stream).await,
                _ => {
                    let mut s = self.stream.lock();
                    s.consumed = true;
                    s.records.clear();
                    Ok(())
                }
            }
        };
        let error = match discarded {
            Ok(()) => self.stream.lock().error(),
            Err(e) => Some(e),
        };
        if self.auto_commit {
            self.holder.release().await;
        }
        if let Some(e) = error {
            return Err(self.holder.map_error(e, &self.server.address));
        }

        let summary = ResultSummary::from_metadata(self.query.clone(), self.server.clone(), &self.stream.lock().metadata);
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// 레코드 스트림으로 변환. 에러를 내보낸 뒤에는 끝난다.
    pub fn into_stream(self) -> impl Stream<Item = DriverResult<Record>> + Send {
        stream::unfold(Some(self), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(record)) => Some((Ok(record), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn advance(&mut self) -> DriverResult<Option<Record>> {
        loop {
            match self.buffered()? {
                Buffered::Record(record) => return Ok(Some(record)),
                Buffered::End => {
                    self.finished().await;
                    return Ok(None);
                }
                Buffered::Failed(e) => {
                    self.finished().await;
                    return Err(self.holder.map_error(e, &self.server.address));
                }
                Buffered::Empty => {
                    if let Err(e) = self.pull().await {
                        self.finished().await;
                        return Err(e);
                    }
                }
            }
        }
    }

    fn buffered(&self) -> DriverResult<Buffered> {
        let mut s = self.stream.lock();
        if s.consumed {
            return Err(consumed_error());
        }
        if let Some(values) = s.records.pop_front() {
            return Ok(Buffered::Record(Record::new(self.keys.clone(), values)));
        }
        if !s.finished {
            return Ok(Buffered::Empty);
        }
        Ok(match s.error() {
            Some(e) => Buffered::Failed(e),
            None => Buffered::End,
        })
    }

    async fn pull(&mut self) -> DriverResult<()> {
        let mut guard = self.holder.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| DriverError::result_consumed("The connection behind this result was already released"))?;
        conn.fetch(&self.stream, self.fetch_size)
            .await
            .map_err(|e| self.holder.map_error(e, &self.server.address))
    }

    async fn finished(&mut self) {
        if self.auto_commit {
            self.holder.release().await;
        }
    }
}

impl fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("keys", &self.keys)
            .field("fetch_size", &self.fetch_size)
            .field("auto_commit", &self.auto_commit)
            .field("server", &self.server.address)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

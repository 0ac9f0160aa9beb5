//! Query Runner
//!
//! 쿼리와 쿼리를 실행하는 공통 인터페이스

use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::bolt::Value;

use super::error::DriverResult;
use super::result::ResultCursor;

// ============================================================================
// Query - 쿼리
// ============================================================================

/// 쿼리
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// 쿼리 텍스트
    pub text: String,
    /// 파라미터
    pub parameters: HashMap<String, Value>,
}

impl Query {
    /// 새 쿼리 생성
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    /// 파라미터 추가
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 파라미터들 추가
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl<S: Into<String>> From<(S, HashMap<String, Value>)> for Query {
    fn from((text, params): (S, HashMap<String, Value>)) -> Self {
        Self::new(text).with_params(params)
    }
}

/// 파라미터 맵 생성 매크로
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::<String, $crate::bolt::Value>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::<String, $crate::bolt::Value>::new();
        $(
            map.insert($key.into(), $crate::bolt::Value::from($value));
        )+
        map
    }};
}

// ============================================================================
// QueryRunner - 실행 컨텍스트
// ============================================================================

/// 쿼리를 실행할 수 있는 컨텍스트
///
/// 세션은 자동 커밋 트랜잭션으로, 트랜잭션은 자기 안에서 실행한다.
pub trait QueryRunner: Send + Sync {
    fn run_query(&self, query: Query) -> BoxFuture<'_, DriverResult<ResultCursor>>;
}

// ============================================================================
// Tests
// ============================================================================

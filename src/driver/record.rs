//! Record - 쿼리 결과 레코드
//!
//! 쿼리 결과의 단일 레코드

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bolt::packstream::structures::{Node, Path, Relationship};
use crate::bolt::Value;

use super::error::{DriverError, DriverResult};

// ============================================================================
// FromValue - 값 변환
// ============================================================================

/// 레코드 값에서 Rust 타입으로 변환
pub trait FromValue: Sized {
    fn from_value(value: Value) -> DriverResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> DriverError {
    DriverError::type_conversion(format!("Expected {}, got {}", expected, value.type_name()))
}

impl FromValue for Value {
    fn from_value(value: Value) -> DriverResult<Self> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> DriverResult<Self> {
        value.as_bool().ok_or_else(|| mismatch("Boolean", &value))
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> DriverResult<Self> {
        value.as_int().ok_or_else(|| mismatch("Integer", &value))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> DriverResult<Self> {
        value.as_float().ok_or_else(|| mismatch("Float", &value))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> DriverResult<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: Value) -> DriverResult<Self> {
        match value {
            Value::List(items) => Ok(items),
            other => Err(mismatch("List", &other)),
        }
    }
}

impl FromValue for HashMap<String, Value> {
    fn from_value(value: Value) -> DriverResult<Self> {
        match value {
            Value::Map(map) => Ok(map),
            other => Err(mismatch("Map", &other)),
        }
    }
}

macro_rules! from_structure {
    ($($ty:ty),+) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> DriverResult<Self> {
                    <$ty>::from_value(&value).map_err(|e| DriverError::type_conversion(e.to_string()))
                }
            }
        )+
    };
}

from_structure!(Node, Relationship, Path);

// ============================================================================
// Record - 단일 레코드
// ============================================================================

/// 쿼리 결과 레코드
///
/// 같은 결과의 레코드들은 키 목록을 공유한다.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Record {
    /// 새 레코드 생성
    pub fn new(keys: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// 키 목록
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 값 목록
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 키로 값 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i))
    }

    /// 인덱스로 값 가져오기
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// 키로 타입 변환된 값 가져오기
    pub fn get_as<T: FromValue>(&self, key: &str) -> DriverResult<T> {
        let value = self
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::type_conversion(format!("Key '{}' not found", key)))?;
        T::from_value(value)
    }

    pub fn get_bool(&self, key: &str) -> DriverResult<bool> {
        self.get_as(key)
    }

    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.get_as(key)
    }

    pub fn get_float(&self, key: &str) -> DriverResult<f64> {
        self.get_as(key)
    }

    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.get_as(key)
    }

    pub fn get_node(&self, key: &str) -> DriverResult<Node> {
        self.get_as(key)
    }

    pub fn get_relationship(&self, key: &str) -> DriverResult<Relationship> {
        self.get_as(key)
    }

    pub fn get_path(&self, key: &str) -> DriverResult<Path> {
        self.get_as(key)
    }

    /// Optional 값 가져오기 (없는 키와 Null 은 None)
    pub fn get_optional<T: FromValue>(&self, key: &str) -> DriverResult<Option<T>> {
        match self.get(key) {
            Some(Value::Null) | None => Ok(None),
            Some(v) => T::from_value(v.clone()).map(Some),
        }
    }

    /// Map으로 변환
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::iter::Zip<std::slice::Iter<'a, String>, std::slice::Iter<'a, Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter().zip(self.values.iter())
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Server addresses and connection URIs
//!
//! `bolt://host:port` 형식의 URI 를 해석한다.

use std::collections::HashMap;
use std::fmt;

use super::error::{DriverError, DriverResult};

/// 기본 Bolt 포트
pub const DEFAULT_PORT: u16 = 7687;

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host`, `host:port`, `[v6]:port` 파싱
    pub fn parse(s: &str) -> DriverResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DriverError::configuration("Empty server address"));
        }
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| DriverError::configuration(format!("Invalid server address: {}", s)))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(DriverError::configuration(format!("Invalid server address: {}", s))),
            };
            return Ok(Self::new(host, port));
        }
        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Ok(Self::new(s, DEFAULT_PORT)),
            Some((host, port)) => Ok(Self::new(host, parse_port(port)?)),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }

    /// 소켓 주소로 변환
    pub fn to_socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port: &str) -> DriverResult<u16> {
    port.parse()
        .map_err(|_| DriverError::configuration(format!("Invalid port: {}", port)))
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_socket_addr())
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// Scheme - URI 스킴
// ============================================================================

/// 암호화 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// 평문
    Off,
    /// 시스템 CA 로 검증 (`+s`)
    SystemCas,
    /// 자체 서명 인증서 허용 (`+ssc`)
    SelfSigned,
}

/// URI 스킴
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheme {
    /// 라우팅 여부 (`neo4j`)
    pub routing: bool,
    pub encryption: Encryption,
}

impl Scheme {
    pub fn parse(scheme: &str) -> DriverResult<Self> {
        let (routing, encryption) = match scheme {
            "bolt" => (false, Encryption::Off),
            "bolt+s" => (false, Encryption::SystemCas),
            "bolt+ssc" => (false, Encryption::SelfSigned),
            "neo4j" => (true, Encryption::Off),
            "neo4j+s" => (true, Encryption::SystemCas),
            "neo4j+ssc" => (true, Encryption::SelfSigned),
            other => {
                return Err(DriverError::configuration(format!(
                    "Unsupported URI scheme: {}",
                    other
                )))
            }
        };
        Ok(Self { routing, encryption })
    }
}

// ============================================================================
// ConnectionUri - 연결 URI
// ============================================================================

/// 해석된 연결 URI
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionUri {
    pub scheme: Scheme,
    pub address: ServerAddress,
    /// 쿼리 파라미터 (라우팅 컨텍스트)
    pub routing_context: HashMap<String, String>,
}

impl ConnectionUri {
    pub fn parse(uri: &str) -> DriverResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| DriverError::configuration(format!("Invalid URI: {}", uri)))?;
        let scheme = Scheme::parse(scheme)?;

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let authority = authority.trim_end_matches('/');
        let address = ServerAddress::parse(authority)?;

        let mut routing_context = HashMap::new();
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            if !scheme.routing {
                return Err(DriverError::configuration(
                    "Routing context is not supported for direct (bolt) URIs",
                ));
            }
            for pair in query.split('&') {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| DriverError::configuration(format!("Invalid routing context: {}", pair)))?;
                if key == "address" {
                    return Err(DriverError::configuration(
                        "The key 'address' is reserved for routing context",
                    ));
                }
                routing_context.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self {
            scheme,
            address,
            routing_context,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

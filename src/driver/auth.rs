//! Authentication
//!
//! 인증 토큰과 토큰 관리자

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::bolt::Value;

use super::error::DriverResult;

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
#[derive(Clone, PartialEq, Default)]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// Basic 인증 (사용자명/비밀번호)
    Basic {
        username: String,
        password: String,
        realm: Option<String>,
    },
    /// Bearer 토큰
    Bearer { token: String },
    /// Kerberos 인증
    Kerberos { ticket: String },
    /// 커스텀 인증
    Custom {
        principal: String,
        credentials: String,
        realm: Option<String>,
        scheme: String,
        parameters: HashMap<String, Value>,
    },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Basic 인증 토큰 생성 (realm 포함)
    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    /// Bearer 토큰 생성
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer { token: token.into() }
    }

    /// Kerberos 토큰 생성
    pub fn kerberos(ticket: impl Into<String>) -> Self {
        Self::Kerberos { ticket: ticket.into() }
    }

    /// 인증 없음
    pub fn none() -> Self {
        Self::None
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    /// HELLO / LOGON 에 실리는 필드 맵
    pub fn to_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("scheme".to_string(), Value::from(self.scheme()));
        match self {
            Self::None => {}
            Self::Basic {
                username,
                password,
                realm,
            } => {
                map.insert("principal".to_string(), Value::from(username.as_str()));
                map.insert("credentials".to_string(), Value::from(password.as_str()));
                if let Some(realm) = realm {
                    map.insert("realm".to_string(), Value::from(realm.as_str()));
                }
            }
            Self::Bearer { token } => {
                map.insert("credentials".to_string(), Value::from(token.as_str()));
            }
            Self::Kerberos { ticket } => {
                map.insert("principal".to_string(), Value::from(""));
                map.insert("credentials".to_string(), Value::from(ticket.as_str()));
            }
            Self::Custom {
                principal,
                credentials,
                realm,
                parameters,
                ..
            } => {
                map.insert("principal".to_string(), Value::from(principal.as_str()));
                if !credentials.is_empty() {
                    map.insert("credentials".to_string(), Value::from(credentials.as_str()));
                }
                if let Some(realm) = realm {
                    map.insert("realm".to_string(), Value::from(realm.as_str()));
                }
                if !parameters.is_empty() {
                    map.insert("parameters".to_string(), Value::Map(parameters.clone()));
                }
            }
        }
        map
    }
}

// 비밀번호가 로그에 남지 않도록 수동 구현
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, realm, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("realm", realm)
                .finish_non_exhaustive(),
            Self::Custom { principal, scheme, .. } => f
                .debug_struct("Custom")
                .field("scheme", scheme)
                .field("principal", principal)
                .finish_non_exhaustive(),
            other => write!(f, "AuthToken({})", other.scheme()),
        }
    }
}

// ============================================================================
// AuthTokenManager - 토큰 관리자
// ============================================================================

/// 연결에 사용할 토큰을 제공한다.
///
/// 서버가 토큰 만료를 알리면 `on_token_expired` 가 호출되고, 이후
/// `get_token` 은 갱신된 토큰을 돌려줘야 한다.
pub trait AuthTokenManager: Send + Sync + fmt::Debug {
    fn get_token(&self) -> BoxFuture<'_, DriverResult<AuthToken>>;

    fn on_token_expired(&self, token: &AuthToken);
}

/// 항상 같은 토큰을 돌려주는 관리자
#[derive(Debug, Clone)]
pub struct StaticAuthTokenManager {
    token: AuthToken,
}

impl StaticAuthTokenManager {
    pub fn new(token: AuthToken) -> Self {
        Self { token }
    }

    pub fn shared(token: AuthToken) -> Arc<dyn AuthTokenManager> {
        Arc::new(Self::new(token))
    }
}

impl AuthTokenManager for StaticAuthTokenManager {
    fn get_token(&self) -> BoxFuture<'_, DriverResult<AuthToken>> {
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }

    fn on_token_expired(&self, _token: &AuthToken) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_token_map() {
        let map = AuthToken::basic_with_realm("neo4j", "secret", "native").to_map();
        assert_eq!(map["scheme"], Value::from("basic"));
        assert_eq!(map["principal"], Value::from("neo4j"));
        assert_eq!(map["credentials"], Value::from("secret"));
        assert_eq!(map["realm"], Value::from("native"));
    }

    #[test]
    fn test_bearer_and_none() {
        let map = AuthToken::bearer("jwt").to_map();
        assert_eq!(map["scheme"], Value::from("bearer"));
        assert!(!map.contains_key("principal"));

        let map = AuthToken::none().to_map();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_debug_hides_password() {
        let shown = format!("{:?}", AuthToken::basic("neo4j", "secret"));
        assert!(shown.contains("neo4j"));
        assert!(!shown.contains("secret"));
    }

    #[tokio::test]
    async fn test_static_manager() {
        let manager = StaticAuthTokenManager::new(AuthToken::basic("a", "b"));
        let token = manager.get_token().await.unwrap();
        manager.on_token_expired(&token);
        assert_eq!(manager.get_token().await.unwrap(), token);
    }
}

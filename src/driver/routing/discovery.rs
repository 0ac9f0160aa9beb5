//! 라우터 조회
//!
//! 라우터 연결에서 ROUTE 메시지(4.3 미만은 라우팅 프로시저)로 테이블을 받는다.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::bolt::Value;
use crate::driver::address::ServerAddress;
use crate::driver::error::DriverResult;
use crate::driver::pool::PoolRegistry;

use super::manager::{Discovery, RouteRequest};
use super::table::RoutingTable;

/// 풀에서 라우터 연결을 빌려 라우팅 테이블을 조회
pub struct BoltDiscovery {
    registry: Arc<PoolRegistry>,
    routing_context: HashMap<String, Value>,
}

impl BoltDiscovery {
    pub fn new(registry: Arc<PoolRegistry>, routing_context: HashMap<String, Value>) -> Self {
        Self {
            registry,
            routing_context,
        }
    }

    async fn fetch(&self, router: &ServerAddress, request: &RouteRequest) -> DriverResult<RoutingTable> {
        let mut conn = self.registry.acquire(router).await?;
        let database = (!request.database.is_empty()).then(|| request.database.clone());
        let result = conn
            .route(
                self.routing_context.clone(),
                request.bookmarks.clone(),
                database,
                request.impersonated_user.clone(),
            )
            .await;
        conn.release().await;

        let rt = result?;
        let table = RoutingTable::from_rt(&rt, &request.database)?;
        debug!("Received routing table from {}: {}", router, table);
        Ok(table)
    }
}

impl Discovery for BoltDiscovery {
    fn discover<'a>(
        &'a self,
        router: &'a ServerAddress,
        request: &'a RouteRequest,
    ) -> BoxFuture<'a, DriverResult<RoutingTable>> {
        Box::pin(self.fetch(router, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::tag;
    use crate::bolt::BoltVersion;
    use crate::driver::auth::{AuthToken, StaticAuthTokenManager};
    use crate::driver::bolt::ConnectionSettings;
    use crate::driver::error::DriverError;
    use crate::driver::pool::PoolConfig;
    use crate::driver::testing::{failure, success, StubServer};

    fn registry() -> Arc<PoolRegistry> {
        Arc::new(PoolRegistry::new(
            PoolConfig::default(),
            ConnectionSettings::default(),
            StaticAuthTokenManager::shared(AuthToken::None),
        ))
    }

    fn rt_reply(address: &str) -> Value {
        let server = |role: &str| {
            let mut entry = HashMap::new();
            entry.insert("role".to_string(), Value::from(role));
            entry.insert("addresses".to_string(), Value::from(vec![address.to_string()]));
            Value::Map(entry)
        };
        let mut rt = HashMap::new();
        rt.insert("ttl".to_string(), Value::from(300i64));
        rt.insert("db".to_string(), Value::from("neo4j"));
        rt.insert(
            "servers".to_string(),
            Value::List(vec![server("ROUTE"), server("READ"), server("WRITE")]),
        );
        Value::Map(rt)
    }

    #[tokio::test]
    async fn test_discover_with_route_message() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        let address = server.address().to_string();
        server.script(tag::ROUTE, vec![success(&[("rt", rt_reply(&address))])]);

        let registry = registry();
        let mut context = HashMap::new();
        context.insert("region".to_string(), Value::from("eu"));
        let discovery = BoltDiscovery::new(registry.clone(), context);

        let table = discovery
            .discover(server.address(), &RouteRequest::default())
            .await
            .unwrap();
        assert_eq!(table.database, "neo4j");
        assert_eq!(table.writers, vec![server.address().clone()]);

        let route = &server.requests_with(tag::ROUTE)[0];
        let routing = route.fields[0].as_map().unwrap();
        assert_eq!(routing["region"].as_str(), Some("eu"));
        // home database: no db entry in the extra map
        assert!(!route.fields[2].as_map().unwrap().contains_key("db"));
        // the router connection went back to the pool
        assert_eq!(registry.in_use_count(server.address()), 0);
    }

    #[tokio::test]
    async fn test_discover_failure_releases_connection() {
        let server = StubServer::start(BoltVersion::new(5, 4)).await;
        server.script(
            tag::ROUTE,
            vec![failure("Neo.ClientError.Database.DatabaseNotFound", "missing")],
        );

        let registry = registry();
        let discovery = BoltDiscovery::new(registry.clone(), HashMap::new());
        let err = discovery
            .discover(server.address(), &RouteRequest::new("missing"))
            .await
            .unwrap_err();

        assert!(err.is_fatal_for_discovery());
        assert!(matches!(err, DriverError::Server(_)));
        assert_eq!(registry.in_use_count(server.address()), 0);
    }
}

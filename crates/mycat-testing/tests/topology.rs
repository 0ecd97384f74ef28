//! Host selection tests: SSH tunnels, DNS SRV, replication and failover.
//!
//! Each collaborator is a double from `fixtures`; the connector routes
//! host names to their own mock servers so tests can see which server a
//! connection, or its side connection, reached.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use mycat_client::config::DEFAULT_PORT;
use mycat_client::topology::{FailoverManager, SrvRecord};
use mycat_client::{Config, ConnectionState, Environment, EnvironmentBuilder, Error, SshConfig};
use mycat_protocol::ClientMessageType;
use mycat_testing::fixtures::{
    self, FailoverAttempt, MockTunnels, ScriptedFailover, StaticReplication, StaticSrv, srv,
};
use mycat_testing::{MockConnector, MockServer, Reply};

fn routed(hosts: &[(&str, &MockServer)]) -> (EnvironmentBuilder, MockConnector) {
    let connector = hosts
        .iter()
        .fold(MockConnector::new(MockServer::new()), |connector, (host, server)| {
            connector.with_host(*host, (*server).clone())
        });
    (
        Environment::builder().connector(Arc::new(connector.clone())),
        connector,
    )
}

fn tunnelled_settings() -> Config {
    fixtures::settings().server("db.internal").ssh(SshConfig {
        host_name: Some("bastion".into()),
        ..SshConfig::default()
    })
}

fn attempt(host: &str, pooled: bool) -> FailoverAttempt {
    FailoverAttempt {
        host: host.to_string(),
        pooled,
    }
}

// =============================================================================
// SSH Tunnels
// =============================================================================

#[tokio::test]
async fn test_tunnel_rewrites_host_and_closes_with_connection() {
    let forwarded = MockServer::new();
    let (builder, connector) = routed(&[("127.0.0.1", &forwarded)]);
    let tunnels = Arc::new(MockTunnels::new("127.0.0.1", 40001));
    let env = builder.tunnels(tunnels.clone()).build();

    let mut conn = env.connection(tunnelled_settings());
    conn.open().await.unwrap();
    assert_eq!(tunnels.requested(), vec!["db.internal".to_string()]);
    assert_eq!(connector.attempts(), vec![("127.0.0.1".to_string(), 40001)]);
    assert_eq!(conn.active_settings().unwrap().server, "127.0.0.1");
    assert_eq!(conn.settings().server, "db.internal");
    assert_eq!(forwarded.handshakes(), 1);
    assert_eq!(tunnels.closed(), 0);

    conn.close().await.unwrap();
    assert_eq!(tunnels.closed(), 1);
}

#[tokio::test]
async fn test_failed_open_closes_tunnel() {
    let forwarded = MockServer::new().reject_auth(1045);
    let (builder, _) = routed(&[("127.0.0.1", &forwarded)]);
    let tunnels = Arc::new(MockTunnels::new("127.0.0.1", 40001));
    let env = builder.tunnels(tunnels.clone()).build();

    let mut conn = env.connection(tunnelled_settings());
    assert!(conn.open().await.is_err());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(tunnels.closed(), 1);
}

#[tokio::test]
async fn test_tunnel_without_provider_is_not_supported() {
    let (builder, connector) = routed(&[]);
    let mut conn = builder.build().connection(tunnelled_settings());
    assert!(matches!(conn.open().await, Err(Error::NotSupported(_))));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn test_cancel_through_tunnel_opens_its_own_tunnel() {
    let forwarded = MockServer::new().first_thread(12);
    let (builder, _) = routed(&[("127.0.0.1", &forwarded)]);
    let tunnels = Arc::new(MockTunnels::new("127.0.0.1", 40001));
    let env = builder.tunnels(tunnels.clone()).build();

    let mut conn = env.connection(tunnelled_settings());
    conn.open().await.unwrap();
    conn.cancel_query(5).await.unwrap();

    assert_eq!(
        tunnels.requested(),
        vec!["db.internal".to_string(), "db.internal".to_string()]
    );
    assert!(forwarded.statements().contains(&"KILL QUERY 12".to_string()));
    // Only the side connection's tunnel is gone.
    assert_eq!(tunnels.closed(), 1);
    assert!(conn.ping().await);
}

// =============================================================================
// DNS SRV
// =============================================================================

fn srv_records() -> Vec<SrvRecord> {
    vec![
        srv("h3", 33063, 20, 5),
        srv("h1", 33061, 10, 1),
        srv("h2", 33062, 10, 9),
    ]
}

fn srv_settings() -> Config {
    fixtures::settings()
        .server("_mysqlx._tcp.example.com")
        .dns_srv(true)
}

#[tokio::test]
async fn test_srv_records_tried_by_priority_then_weight() {
    let h1 = MockServer::new();
    let (builder, connector) = routed(&[("h1", &h1)]);
    connector.refuse("h2");
    let resolver = Arc::new(StaticSrv::new(srv_records()));
    let env = builder.srv_resolver(resolver.clone()).build();

    let mut conn = env.connection(srv_settings());
    conn.open().await.unwrap();

    assert_eq!(resolver.lookups(), vec!["_mysqlx._tcp.example.com".to_string()]);
    assert_eq!(
        connector.attempts(),
        vec![("h2".to_string(), 33062), ("h1".to_string(), 33061)]
    );
    let active = conn.active_settings().unwrap();
    assert_eq!(active.server, "h2:33062,h1:33061,h3:33063");
    assert!(!active.dns_srv);
    assert_eq!(h1.handshakes(), 1);
}

#[tokio::test]
async fn test_srv_hosts_become_failover_group() {
    let h1 = MockServer::new().first_thread(61);
    let (builder, connector) = routed(&[("h1", &h1)]);
    connector.refuse("h2");
    let failover = Arc::new(ScriptedFailover::new());
    let env = builder
        .srv_resolver(Arc::new(StaticSrv::new(srv_records())))
        .failover(failover.clone())
        .build();

    let mut conn = env.connection(srv_settings());
    conn.open().await.unwrap();

    assert_eq!(
        failover.attempts(),
        vec![attempt("h2", false), attempt("h1", false)]
    );
    assert_eq!(conn.active_settings().unwrap().server, "h1");
    assert_eq!(conn.active_settings().unwrap().port, 33061);

    // The side connection goes straight to the chosen host.
    conn.cancel_query(5).await.unwrap();
    assert!(h1.statements().contains(&"KILL QUERY 61".to_string()));
}

#[tokio::test]
async fn test_srv_without_records_fails() {
    let (builder, connector) = routed(&[]);
    let env = builder
        .srv_resolver(Arc::new(StaticSrv::new(Vec::new())))
        .build();
    let mut conn = env.connection(srv_settings());
    assert!(matches!(conn.open().await, Err(Error::Config(_))));
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn test_srv_without_resolver_is_not_supported() {
    let (builder, _) = routed(&[]);
    let mut conn = builder.build().connection(srv_settings());
    assert!(matches!(conn.open().await, Err(Error::NotSupported(_))));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

// =============================================================================
// Replication
// =============================================================================

#[tokio::test]
async fn test_replication_group_routes_to_member() {
    let replica = MockServer::new().first_thread(70);
    let (builder, connector) = routed(&[("replica-1", &replica)]);
    let replication = Arc::new(StaticReplication::new(
        "cluster",
        fixtures::settings(),
        "replica-1",
        33070,
    ));
    let env = builder.replication(replication.clone()).build();

    let mut conn = env.connection(fixtures::settings().server("cluster"));
    conn.open().await.unwrap();

    assert_eq!(replication.acquired(), 1);
    assert_eq!(connector.attempts(), vec![("replica-1".to_string(), 33070)]);
    assert_eq!(conn.server_thread(), Some(70));
    let active = conn.active_settings().unwrap();
    assert_eq!((active.server.as_str(), active.port), ("replica-1", 33070));

    conn.cancel_query(5).await.unwrap();
    assert!(replica.statements().contains(&"KILL QUERY 70".to_string()));
    assert_eq!(connector.server().handshakes(), 0);
}

#[tokio::test]
async fn test_plain_server_bypasses_replication() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let replication = Arc::new(StaticReplication::new(
        "cluster",
        fixtures::settings(),
        "replica-1",
        33070,
    ));
    let env = builder.replication(replication.clone()).build();

    let mut conn = env.connection(fixtures::settings());
    conn.open().await.unwrap();
    assert_eq!(replication.acquired(), 0);
    assert_eq!(server.handshakes(), 1);
}

// =============================================================================
// Failover
// =============================================================================

#[tokio::test]
async fn test_failover_skips_refused_host() {
    let a = MockServer::new();
    let b = MockServer::new().first_thread(200);
    let (builder, connector) = routed(&[("a", &a), ("b", &b)]);
    connector.refuse("a");
    let failover = Arc::new(ScriptedFailover::new());
    let env = builder.failover(failover.clone()).build();

    let mut conn = env.connection(fixtures::settings().server("a,b"));
    conn.open().await.unwrap();

    assert_eq!(failover.host_lists(), 1);
    assert_eq!(
        failover.attempts(),
        vec![attempt("a", false), attempt("b", false)]
    );
    assert_eq!(conn.server_thread(), Some(200));
    let active = conn.active_settings().unwrap();
    assert_eq!((active.server.as_str(), active.port), ("b", DEFAULT_PORT));
    // The failover session is the connection's session.
    assert_eq!(b.handshakes(), 1);
    assert_eq!(a.handshakes(), 0);
}

#[tokio::test]
async fn test_single_host_has_no_failover_group() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let failover = Arc::new(ScriptedFailover::new());
    let env = builder.failover(failover.clone()).build();

    let mut conn = env.connection(fixtures::settings());
    conn.open().await.unwrap();
    assert_eq!(failover.host_lists(), 1);
    assert!(failover.attempts().is_empty());
    assert_eq!(server.handshakes(), 1);
}

#[tokio::test]
async fn test_cancel_query_reaches_failover_host() {
    let a = MockServer::new().first_thread(100);
    let b = MockServer::new().first_thread(200);
    let (builder, _) = routed(&[("a", &a), ("b", &b)]);
    let env = builder
        .failover(Arc::new(ScriptedFailover::new().prefer("b")))
        .build();

    let mut conn = env.connection(fixtures::settings().server("a,b"));
    conn.open().await.unwrap();
    assert_eq!(conn.server_thread(), Some(200));

    conn.cancel_query(5).await.unwrap();
    assert!(b.statements().contains(&"KILL QUERY 200".to_string()));
    assert!(!a.statements().iter().any(|s| s.starts_with("KILL")));
    assert_eq!(a.handshakes(), 0);
}

#[tokio::test]
async fn test_failed_open_discards_failover_session() {
    let a = MockServer::new();
    let b = MockServer::new().on("USE", Reply::error(1049, "Unknown database 'missing'"));
    let (builder, _) = routed(&[("a", &a), ("b", &b)]);
    let failover = Arc::new(ScriptedFailover::new().prefer("b"));
    let env = builder.failover(failover.clone()).build();

    let mut conn = env.connection(fixtures::settings().server("a,b").database("missing"));
    let err = conn.open().await.unwrap_err();
    assert!(matches!(err, Error::Server { code: 1049, .. }));

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(conn.active_settings().is_none());
    assert_eq!(conn.server_thread(), None);
    assert!(failover.failover_group().is_none());
    assert_eq!(failover.resets(), 2);
    // Discarded, not closed politely.
    assert!(!b.message_types().contains(&(ClientMessageType::ConClose as u8)));

    let statements = b.statements().len();
    assert!(!conn.ping().await);
    assert_eq!(b.statements().len(), statements);
}

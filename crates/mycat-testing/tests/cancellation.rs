//! Cancellation and command deadline tests.
//!
//! Statement kills travel over a separate side connection; a timed-out
//! command is killed and drained so the connection stays usable.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use mycat_client::{
    CancellationToken, CommandDeadline, CommandTimer, ConnectionState, Error, SideChannelFactory,
};
use mycat_testing::fixtures::{self, RecordingHook};
use mycat_testing::{MockServer, Reply};

// =============================================================================
// Side Channel
// =============================================================================

#[tokio::test]
async fn test_cancel_query_kills_server_thread() {
    let server = MockServer::new().first_thread(42);
    let hook = Arc::new(RecordingHook::new());
    let (builder, _) = fixtures::environment_with_hook(&server, hook.clone());
    let mut conn = builder.build().connection(
        fixtures::settings()
            .pooling(true)
            .auto_enlist(true)
            .connection_timeout(15),
    );
    conn.open().await.unwrap();
    assert_eq!(conn.server_thread(), Some(42));

    conn.cancel_query(5).await.unwrap();
    assert!(server.statements().contains(&"KILL QUERY 42".to_string()));

    let opened = hook.opened();
    assert_eq!(opened.len(), 2);
    let side = &opened[1];
    assert!(!side.pooling);
    assert!(!side.auto_enlist);
    assert_eq!(side.connection_timeout, 5);
    assert_eq!(side.default_command_timeout, 5);

    // The cancelled connection keeps its own session.
    assert_eq!(conn.state(), ConnectionState::Open);
    assert!(conn.ping().await);
}

#[tokio::test]
async fn test_cancel_query_without_thread() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let conn = builder.build().connection(fixtures::settings());

    assert!(matches!(
        conn.cancel_query(5).await,
        Err(Error::InvalidState(_))
    ));
    assert_eq!(server.handshakes(), 0);
}

#[tokio::test]
async fn test_cancel_query_side_connection_refused() {
    let server = MockServer::new();
    let (builder, connector) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    connector.refuse("mock");
    assert!(conn.cancel_query(5).await.is_err());
    assert!(!server.statements().iter().any(|s| s.starts_with("KILL")));
}

// =============================================================================
// Timeout Recovery
// =============================================================================

#[tokio::test]
async fn test_timed_out_statement_is_killed_and_drained() {
    let server = MockServer::new()
        .first_thread(7)
        .on("SELECT SLEEP", Reply::Hang);
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder
        .build()
        .connection(fixtures::settings().default_command_timeout(1));
    conn.open().await.unwrap();

    let err = conn.execute("SELECT SLEEP(60)", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { fatal: false }));
    assert!(server.statements().contains(&"KILL QUERY 7".to_string()));

    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(conn.command_timeout(), 0);
    conn.execute("SELECT 1", &[]).await.unwrap();
}

#[tokio::test]
async fn test_unkillable_statement_aborts_connection() {
    let server = MockServer::new().on("SELECT SLEEP", Reply::Hang);
    let (builder, connector) = fixtures::environment(&server);
    let mut conn = builder
        .build()
        .connection(fixtures::settings().default_command_timeout(1));
    conn.open().await.unwrap();

    // The side connection cannot be opened, so the kill never happens.
    connector.refuse("mock");
    let err = conn.execute("SELECT SLEEP(60)", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { fatal: true }));
    assert!(err.is_fatal());
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_kill_connection_timeout_is_fatal() {
    let server = MockServer::new().on("SELECT SLEEP", Reply::Hang);
    let (builder, _) = fixtures::environment(&server);
    // A kill connection is never rescued by another kill.
    let mut conn = builder
        .build()
        .connection(SideChannelFactory::narrow(&fixtures::settings(), 1));
    conn.open().await.unwrap();

    let err = conn.execute("SELECT SLEEP(60)", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { fatal: true }));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(!server.statements().iter().any(|s| s.starts_with("KILL")));
}

// =============================================================================
// Command Deadlines
// =============================================================================

#[tokio::test]
async fn test_outer_deadline_is_sticky() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    assert!(conn.set_command_timeout(10));
    assert!(!conn.set_command_timeout(5));
    assert_eq!(conn.command_timeout(), 10);

    let inner = CommandTimer::start(&mut conn, 5);
    assert!(!inner.is_armed());
    inner.finish(&mut conn);
    assert_eq!(conn.command_timeout(), 10);

    // Statements run under the outer deadline and leave it in place.
    conn.execute("SELECT 1", &[]).await.unwrap();
    assert_eq!(conn.command_timeout(), 10);
    assert_eq!(
        conn.session().unwrap().lock().await.read_timeout(),
        Some(Duration::from_secs(10))
    );

    conn.clear_command_timeout();
    assert_eq!(conn.command_timeout(), 0);
    assert!(conn.set_command_timeout(5));
}

#[tokio::test]
async fn test_clear_restores_default_deadline() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder
        .build()
        .connection(fixtures::settings().default_command_timeout(30));
    conn.open().await.unwrap();

    let timer = CommandTimer::start(&mut conn, 2);
    assert!(timer.is_armed());
    assert_eq!(
        conn.session().unwrap().lock().await.read_timeout(),
        Some(Duration::from_secs(2))
    );
    timer.finish(&mut conn);
    assert_eq!(
        conn.session().unwrap().lock().await.read_timeout(),
        Some(Duration::from_secs(30))
    );
}

#[tokio::test]
async fn test_deadline_needs_open_connection() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());

    assert!(!conn.set_command_timeout(10));
    assert_eq!(conn.command_timeout(), 0);
}

// =============================================================================
// Cancellation Tokens
// =============================================================================

#[tokio::test]
async fn test_cancelled_token_sends_nothing() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();
    server.clear_log();

    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        conn.execute_with_cancel("SELECT 1", &[], &token).await,
        Err(Error::Cancelled)
    ));
    assert!(matches!(
        conn.ping_with_cancel(&token).await,
        Err(Error::Cancelled)
    ));
    assert!(matches!(
        conn.change_database_with_cancel("shop", &token).await,
        Err(Error::Cancelled)
    ));
    assert!(server.message_types().is_empty());
    assert_eq!(conn.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_live_token_runs_command() {
    let server = MockServer::new().on("SELECT n", Reply::ints("n", [9]));
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    let token = CancellationToken::new();

    conn.open_with_cancel(&token).await.unwrap();
    let rows = conn
        .query_with_cancel("SELECT n", &[], &token)
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();
    assert_eq!(rows[0].get::<i64>(0).unwrap(), 9);
}

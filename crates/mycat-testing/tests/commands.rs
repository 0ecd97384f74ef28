//! Command tests: statements, prepared statements, notices, routine
//! metadata and local transactions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use mycat_client::transaction::{IsolationLevel, TransactionScope};
use mycat_client::{Any, Error};
use mycat_codec::Packet;
use mycat_protocol::crud::{Collection, DataModel, Find, StmtExecute};
use mycat_protocol::expr::{Expr, Limit};
use mycat_protocol::notice::StateParam;
use mycat_protocol::prepare::PreparableMessage;
use mycat_protocol::resultset::{FetchDone, StmtExecuteOk};
use mycat_testing::server::state_notice;
use mycat_testing::{MockServer, Reply, fixtures};

// =============================================================================
// Statements
// =============================================================================

#[tokio::test]
async fn test_query_rows() {
    let server = MockServer::new().on("SELECT n", Reply::ints("n", [1, 2, 3]));
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let rows = conn.query_all("SELECT n FROM t", &[]).await.unwrap();
    let values: Vec<i64> = rows.iter().map(|r| r.get::<i64>(0).unwrap()).collect();
    assert_eq!(values, vec![1, 2, 3]);
    assert_eq!(rows[0].columns()[0].name, "n");
}

#[tokio::test]
async fn test_streamed_rows() {
    let server = MockServer::new().on("SELECT n", Reply::ints("n", [4, 5]));
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let mut stream = conn.query("SELECT n FROM t", &[]).await.unwrap();
    assert_eq!(stream.columns().len(), 1);
    let first = stream.next_row().await.unwrap().unwrap();
    assert_eq!(first.get::<i64>(0).unwrap(), 4);
    // Closing drops the unread row.
    stream.close().await.unwrap();
    drop(stream);

    assert!(conn.ping().await);
}

#[tokio::test]
async fn test_server_error_keeps_connection_open() {
    let server = MockServer::new().on("SELECT broken", Reply::error(1064, "syntax error"));
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let err = conn.execute("SELECT broken", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Server { code: 1064, .. }));
    assert!(!err.is_fatal());
    assert!(conn.ping().await);
}

#[tokio::test]
async fn test_commands_require_open() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());

    assert!(conn.execute("SELECT 1", &[]).await.is_err());
    assert!(conn.query_all("SELECT 1", &[]).await.is_err());
    assert!(server.message_types().is_empty());
}

// =============================================================================
// Notices
// =============================================================================

#[tokio::test]
async fn test_session_notices_outlive_results() {
    let server = MockServer::new().first_thread(42).on_once(
        "INSERT",
        Reply::Packets(vec![
            state_notice(StateParam::RowsAffected, 3u64),
            state_notice(StateParam::CurrentSchema, "archive"),
            state_notice(StateParam::GeneratedInsertId, 7u64),
            Packet::from_server(&FetchDone),
            Packet::from_server(&StmtExecuteOk),
        ]),
    );
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let summary = conn.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    assert_eq!(summary.affected_rows, 3);
    assert_eq!(summary.last_insert_id, Some(7));

    // Per-result state resets; session state does not.
    let summary = conn.execute("UPDATE t SET a = 1", &[]).await.unwrap();
    assert_eq!(summary.affected_rows, 0);
    assert_eq!(summary.last_insert_id, None);

    let session = conn.session().unwrap().lock().await;
    assert_eq!(session.current_schema(), Some("archive"));
    assert_eq!(session.server_thread(), Some(42));
}

// =============================================================================
// Prepared Statements
// =============================================================================

fn books() -> Collection {
    Collection::new("test", "books")
}

#[tokio::test]
async fn test_prepared_sql_matches_direct_execution() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();
    server.clear_log();

    let sql = "SELECT * FROM books WHERE id = ? AND title = ?";
    let args = [Any::from(2i64), Any::from("Dune")];
    conn.execute(sql, &args).await.unwrap();

    let statement = conn
        .prepare(PreparableMessage::Stmt(StmtExecute::sql(
            sql,
            vec![Any::from(1i64), Any::from("Emma")],
        )))
        .await
        .unwrap();
    assert_eq!(statement.parameter_count(), 2);
    conn.execute_prepared(&statement, &args)
        .await
        .unwrap()
        .close()
        .await
        .unwrap();

    let executed = server.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].clone().resolve().unwrap(), executed[1]);
}

#[tokio::test]
async fn test_prepared_find_matches_literal_find() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();
    server.clear_log();

    let find = Find {
        collection: books(),
        data_model: DataModel::Table,
        criteria: Some(Expr::and(
            Expr::eq(Expr::column("author"), Expr::literal("Herbert")),
            Expr::eq(Expr::column("year"), Expr::literal(1965i64)),
        )),
        limit: Some(Limit {
            row_count: 10,
            offset: Some(20),
        }),
        ..Default::default()
    };

    conn.find(&find).await.unwrap().close().await.unwrap();
    let statement = conn
        .prepare(PreparableMessage::Find(find.clone()))
        .await
        .unwrap();
    let args: Vec<Any> = statement
        .literal_args()
        .iter()
        .cloned()
        .map(Any::Scalar)
        .collect();
    conn.execute_prepared(&statement, &args)
        .await
        .unwrap()
        .close()
        .await
        .unwrap();

    let executed = server.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].clone().resolve().unwrap(), executed[1]);
}

#[tokio::test]
async fn test_deallocated_statement_is_gone() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let statement = conn
        .prepare(PreparableMessage::Stmt(StmtExecute::sql(
            "SELECT ?",
            vec![Any::from(1i64)],
        )))
        .await
        .unwrap();
    conn.deallocate(&statement).await.unwrap();

    let err = match conn.execute_prepared(&statement, &[Any::from(1i64)]).await {
        Ok(_) => panic!("execution of a released statement succeeded"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::Server { code: 5110, .. }));
}

#[tokio::test]
async fn test_statement_ids_are_distinct() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let message = PreparableMessage::Stmt(StmtExecute::sql("SELECT 1", vec![]));
    let first = conn.prepare(message.clone()).await.unwrap();
    let second = conn.prepare(message).await.unwrap();
    assert_ne!(first.id(), second.id());
}

// =============================================================================
// Routine Metadata
// =============================================================================

fn routine_server() -> MockServer {
    MockServer::new()
        .on(
            "SELECT * FROM INFORMATION_SCHEMA.ROUTINES",
            Reply::text(
                &["ROUTINE_SCHEMA", "ROUTINE_NAME", "ROUTINE_TYPE"],
                vec![vec![Some("shop"), Some("routine"), Some("PROCEDURE")]],
            ),
        )
        .on(
            "SELECT * FROM INFORMATION_SCHEMA.PARAMETERS",
            Reply::text(
                &["ORDINAL_POSITION", "PARAMETER_NAME", "DATA_TYPE"],
                vec![vec![Some("1"), Some("id"), Some("int")]],
            ),
        )
}

#[tokio::test]
async fn test_procedure_cache_evicts_oldest() {
    let server = routine_server();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder
        .build()
        .connection(fixtures::settings().database("shop").procedure_cache_size(2));
    conn.open().await.unwrap();

    let a = conn.get_procedure("a", None).await.unwrap();
    let b = conn.get_procedure("b", None).await.unwrap();
    assert_eq!(a.key, "a(?)");
    assert!(!a.cached);

    let b_again = conn.get_procedure("b", Some(&b.key)).await.unwrap();
    assert!(b_again.cached);

    conn.get_procedure("c", None).await.unwrap();
    let a_again = conn.get_procedure("a", Some(&a.key)).await.unwrap();
    assert!(!a_again.cached);

    let cache = conn.procedure_cache().unwrap();
    assert_eq!(cache.hard_queries(), 4);
    assert_eq!(cache.soft_queries(), 1);
    assert!(cache.len() <= 2);
}

#[tokio::test]
async fn test_procedure_cache_disabled() {
    let server = routine_server();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder
        .build()
        .connection(fixtures::settings().database("shop").procedure_cache_size(0));
    conn.open().await.unwrap();

    let first = conn.get_procedure("a", None).await.unwrap();
    let second = conn.get_procedure("a", Some(&first.key)).await.unwrap();
    assert!(!second.cached);

    let cache = conn.procedure_cache().unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.hard_queries(), 2);
}

#[tokio::test]
async fn test_unknown_procedure() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder
        .build()
        .connection(fixtures::settings().database("shop"));
    conn.open().await.unwrap();

    let err = conn.get_procedure("missing", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(ref m) if m.contains("'app'")));
}

#[tokio::test]
async fn test_schema_collection() {
    let server = MockServer::new().on(
        "SELECT * FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ?",
        Reply::text(
            &["TABLE_SCHEMA", "TABLE_NAME"],
            vec![
                vec![Some("shop"), Some("books")],
                vec![Some("shop"), Some("orders")],
            ],
        ),
    );
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let tables = conn
        .schema_collection("tables", &[None, Some("shop".into())])
        .await
        .unwrap();
    assert_eq!(tables.rows.len(), 2);
    assert_eq!(tables.rows[1].get("TABLE_NAME"), Some("orders"));

    assert!(matches!(
        conn.schema_collection("widgets", &[]).await,
        Err(Error::InvalidArgument(_))
    ));
}

// =============================================================================
// Local Transactions
// =============================================================================

#[tokio::test]
async fn test_unsupported_isolation_sends_nothing() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();
    server.clear_log();

    for level in [IsolationLevel::Chaos, IsolationLevel::Snapshot] {
        let begun = conn.begin_transaction(level, TransactionScope::Next).await;
        assert!(matches!(begun, Err(Error::NotSupported(_))));
    }
    assert!(server.message_types().is_empty());
}

#[tokio::test]
async fn test_commit() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();
    server.clear_log();

    let tx = conn
        .begin_transaction(IsolationLevel::Serializable, TransactionScope::Next)
        .await
        .unwrap();
    assert_eq!(tx.isolation_level(), IsolationLevel::Serializable);
    tx.commit().await.unwrap();

    assert_eq!(
        server.statements(),
        vec![
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE".to_string(),
            "BEGIN".to_string(),
            "COMMIT".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_nested_transaction_rejected() {
    let server = MockServer::new();
    let (builder, _) = fixtures::environment(&server);
    let mut conn = builder.build().connection(fixtures::settings());
    conn.open().await.unwrap();

    let tx = conn
        .begin_transaction(IsolationLevel::ReadCommitted, TransactionScope::Session)
        .await
        .unwrap();
    drop(tx);
    assert!(matches!(
        conn.begin_transaction(IsolationLevel::ReadCommitted, TransactionScope::Next)
            .await,
        Err(Error::NotSupported(_))
    ));

    conn.execute("ROLLBACK", &[]).await.unwrap();
    let tx = conn
        .begin_transaction(IsolationLevel::ReadCommitted, TransactionScope::Next)
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    assert!(
        server
            .statements()
            .contains(&"SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED".to_string())
    );
}

//! Statement execution against a scripted in-memory connection.

mod common;

use common::{init_tracing, Reply, ScriptedConnection};
use sqlrpc_exec::error::{ExecError, TransportError};
use sqlrpc_exec::query::{CancelDecision, ExecuteOutcome, Parameter, Statement, StatementBuilder};
use sqlrpc_exec::transport::messages::{
    CellValue, Confirmation, ExplainBody, PlanNode, RequestPayload, RequestType,
    ResponsePayload, SystemMetadataCall, SystemMetadataRequest, SystemMetadataResult,
    SystemQueryRow, WireColumn, WireRows,
};
use sqlrpc_exec::transport::{ExplainFormat, SharedConnection};
use sqlrpc_exec::types::SqlDecimal;
use sqlrpc_exec::StatementConfig;
use std::collections::BTreeMap;
use std::time::Duration;

fn statement(conn: SharedConnection) -> Statement {
    Statement::new(conn, StatementConfig::default())
}

fn query_reply(query_id: &str) -> Reply {
    Reply::ok(ResponsePayload::ExecuteQuery {
        query_id: query_id.to_string(),
    })
}

fn update_reply(rows: i64) -> Reply {
    Reply::ok(ResponsePayload::ExecuteUpdate { updated_rows: rows })
}

fn metadata_reply(rows: WireRows) -> Reply {
    Reply::ok(ResponsePayload::FetchSystemMetadata(SystemMetadataResult {
        result_set: Some(rows),
        ..SystemMetadataResult::default()
    }))
}

#[tokio::test]
async fn test_update_round_trip() {
    init_tracing();
    let (conn, script) = ScriptedConnection::new(vec![update_reply(3)]);
    let mut stmt = statement(conn);

    assert_eq!(stmt.execute_update("DELETE FROM t WHERE a < 3").await.unwrap(), 3);

    let requests = script.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].request_type, RequestType::ExecuteUpdate);
    assert_eq!(requests[0].sql.as_deref(), Some("DELETE FROM t WHERE a < 3"));
    assert_eq!(requests[0].force, Some(false));
}

#[tokio::test]
async fn test_query_opens_cursor_and_associates_query() {
    let (conn, script) = ScriptedConnection::new(vec![query_reply("q1"), query_reply("q2")]);
    let mut stmt = statement(conn);

    let rs = stmt.execute_query("SELECT * FROM t").await.unwrap();
    let cursor = rs.cursor().unwrap();
    assert_eq!(cursor.query_id.as_deref(), Some("q1"));
    assert_eq!(cursor.fetch_size, 30_000);
    assert_eq!(stmt.query_id().as_deref(), Some("q1"));
    assert!(script.lock().result_set_open);

    assert!(matches!(
        stmt.execute_query("SELECT 1").await,
        Err(ExecError::ResultSetStillOpen)
    ));

    stmt.close_result_set().await.unwrap();
    stmt.execute_query("SELECT 1").await.unwrap();
    assert_eq!(stmt.query_id().as_deref(), Some("q2"));
    assert_eq!(
        script.requests()[0].payload,
        RequestPayload::ExecuteQuery { fetch_size: 30_000 }
    );
}

#[tokio::test]
async fn test_single_reconnect_recovers() {
    let (conn, script) = ScriptedConnection::new(vec![Reply::Eof, update_reply(5)]);
    let mut stmt = statement(conn);

    assert_eq!(stmt.execute_update("UPDATE t SET a = 1").await.unwrap(), 5);
    assert_eq!(script.reconnects(), 1);
    assert_eq!(script.requests().len(), 2);
}

#[tokio::test]
async fn test_io_error_is_retried() {
    let (conn, script) = ScriptedConnection::new(vec![Reply::IoError, update_reply(1)]);
    let mut stmt = statement(conn);

    assert_eq!(stmt.execute_update("UPDATE t SET a = 1").await.unwrap(), 1);
    assert_eq!(script.reconnects(), 1);
}

#[tokio::test]
async fn test_double_transport_failure_is_fatal() {
    let (conn, script) =
        ScriptedConnection::new(vec![Reply::Eof, Reply::Eof, update_reply(9)]);
    let mut stmt = statement(conn);

    let err = stmt.execute_update("UPDATE t SET a = 1").await.unwrap_err();
    assert!(matches!(
        err,
        ExecError::Transport(TransportError::UnexpectedEof)
    ));
    assert!(err.is_transport());
    assert_eq!(script.requests().len(), 2);
    assert_eq!(script.reconnects(), 1);
}

#[tokio::test]
async fn test_redirect_retries_with_force() {
    let (conn, script) = ScriptedConnection::new(vec![
        Reply::redirect(
            ResponsePayload::ExecuteQuery {
                query_id: String::new(),
            },
            "node2",
            4051,
        ),
        Reply::Eof,
        query_reply("q7"),
    ]);
    let mut stmt = statement(conn);

    let rs = stmt.execute_query("SELECT 1").await.unwrap();
    assert_eq!(rs.cursor().unwrap().query_id.as_deref(), Some("q7"));

    let requests = script.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].force, Some(false));
    assert_eq!(requests[1].force, Some(true));
    assert_eq!(requests[2].force, Some(true));

    let state = script.lock();
    assert_eq!(state.redirects, vec![("node2".to_string(), 4051)]);
    assert_eq!(state.reconnects, 1);
}

#[tokio::test]
async fn test_force_is_one_shot() {
    let (conn, script) = ScriptedConnection::new(vec![
        Reply::redirect(ResponsePayload::ExecuteUpdate { updated_rows: 0 }, "node2", 4051),
        update_reply(1),
        update_reply(2),
    ]);
    let mut stmt = statement(conn);

    stmt.execute_update("UPDATE t SET a = 1").await.unwrap();
    stmt.execute_update("UPDATE t SET a = 2").await.unwrap();

    let forces: Vec<_> = script.requests().iter().map(|r| r.force).collect();
    assert_eq!(forces, vec![Some(false), Some(true), Some(false)]);
}

#[tokio::test]
async fn test_redirect_limit() {
    let redirect = || {
        Reply::redirect(ResponsePayload::ExecuteUpdate { updated_rows: 0 }, "node2", 4051)
    };
    let (conn, _script) = ScriptedConnection::new(vec![redirect(), redirect(), redirect()]);
    let mut stmt = StatementBuilder::new(conn).max_redirects(2).build();

    assert!(matches!(
        stmt.execute_update("UPDATE t SET a = 1").await,
        Err(ExecError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_administrative_requests_skip_force_and_redirect() {
    let (conn, script) = ScriptedConnection::new(vec![Reply::redirect(
        ResponsePayload::KillQuery,
        "node2",
        4051,
    )]);
    let mut stmt = StatementBuilder::new(conn).force(true).build();

    stmt.kill_query("q9").await.unwrap();

    let requests = script.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].force, None);
    assert_eq!(requests[0].sql.as_deref(), Some("q9"));
    assert!(script.lock().redirects.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_kills_query() {
    let (conn, script) = ScriptedConnection::new(vec![
        query_reply("q1"),
        Reply::Hang,
        Reply::ok(ResponsePayload::KillQuery),
    ]);
    let mut stmt = StatementBuilder::new(conn).query_timeout_secs(2).build();
    stmt.execute_query("SELECT * FROM big").await.unwrap();

    let err = stmt.execute_update("UPDATE t SET a = 1").await.unwrap_err();
    match err {
        ExecError::Timeout {
            timeout_secs,
            suppressed,
        } => {
            assert_eq!(timeout_secs, 2);
            assert!(suppressed.is_none());
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    let requests = script.requests();
    assert_eq!(requests[2].request_type, RequestType::KillQuery);
    assert_eq!(requests[2].sql.as_deref(), Some("q1"));
    assert_eq!(script.reconnects(), 1);
    assert_eq!(stmt.query_id(), None);
    assert!(!script.lock().result_set_open);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_failed_kill_as_source() {
    let (conn, script) = ScriptedConnection::new(vec![
        query_reply("q1"),
        Reply::Hang,
        Reply::Eof,
        Reply::Eof,
    ]);
    let mut stmt = StatementBuilder::new(conn).query_timeout_secs(1).build();
    stmt.execute_query("SELECT * FROM big").await.unwrap();

    let err = stmt.execute_update("UPDATE t SET a = 1").await.unwrap_err();
    assert_eq!(err.to_string(), "Timeout of 1 seconds exceeded");
    assert!(matches!(
        err,
        ExecError::Timeout {
            suppressed: Some(TransportError::UnexpectedEof),
            ..
        }
    ));

    let requests = script.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[3].request_type, RequestType::KillQuery);
    assert_eq!(script.reconnects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retries_kill_after_transport_failure() {
    let (conn, script) = ScriptedConnection::new(vec![
        query_reply("q1"),
        Reply::Hang,
        Reply::Eof,
        Reply::ok(ResponsePayload::KillQuery),
    ]);
    let mut stmt = StatementBuilder::new(conn).query_timeout_secs(3).build();
    stmt.execute_query("SELECT * FROM big").await.unwrap();

    let err = stmt.execute_update("UPDATE t SET a = 1").await.unwrap_err();
    assert!(matches!(
        err,
        ExecError::Timeout {
            timeout_secs: 3,
            suppressed: None
        }
    ));

    let requests = script.requests();
    assert_eq!(requests.len(), 4);
    for kill in &requests[2..] {
        assert_eq!(kill.request_type, RequestType::KillQuery);
        assert_eq!(kill.sql.as_deref(), Some("q1"));
    }
    assert_eq!(script.reconnects(), 2);
    assert_eq!(stmt.query_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_from_another_task() {
    let (conn, script) = ScriptedConnection::new(vec![
        query_reply("q1"),
        Reply::Hang,
        Reply::ok(ResponsePayload::KillQuery),
    ]);
    let mut stmt = statement(conn);
    stmt.execute_query("SELECT * FROM big").await.unwrap();

    let handle = stmt.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel().await
    });

    let result = stmt.execute_update("UPDATE t SET a = 1").await;
    assert!(matches!(result, Err(ExecError::Cancelled)));
    assert_eq!(
        canceller.await.unwrap(),
        CancelDecision::Interrupted {
            query_id: "q1".to_string()
        }
    );

    let requests = script.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].request_type, RequestType::KillQuery);
    assert_eq!(stmt.query_id(), None);
    assert!(!stmt.cancel_handle().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_stream_fails_is_not_retried() {
    let (conn, script) = ScriptedConnection::new(vec![
        query_reply("q1"),
        Reply::IoErrorAfter(Duration::from_secs(5)),
        Reply::ok(ResponsePayload::KillQuery),
    ]);
    let mut stmt = statement(conn);
    stmt.execute_query("SELECT * FROM big").await.unwrap();

    let handle = stmt.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel().await
    });

    let result = stmt.execute_update("UPDATE t SET a = 1").await;
    assert!(matches!(result, Err(ExecError::Cancelled)));
    assert!(matches!(
        canceller.await.unwrap(),
        CancelDecision::Interrupted { .. }
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let requests = script.requests();
    let updates = requests
        .iter()
        .filter(|r| r.request_type == RequestType::ExecuteUpdate)
        .count();
    assert_eq!(updates, 1);
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].request_type, RequestType::KillQuery);
    // Only the reset in front of the kill; the failed update is never re-sent.
    assert_eq!(script.reconnects(), 1);
    assert_eq!(stmt.query_id(), None);
    assert!(!stmt.cancel_handle().is_cancelled());
}

#[tokio::test]
async fn test_cancel_before_association_is_noop() {
    let (conn, script) = ScriptedConnection::new(vec![update_reply(1)]);
    let mut stmt = statement(conn);

    assert_eq!(stmt.cancel().await, CancelDecision::Ignored);
    assert_eq!(stmt.execute_update("UPDATE t SET a = 1").await.unwrap(), 1);
    assert_eq!(script.requests().len(), 1);
}

#[tokio::test]
async fn test_cancel_between_calls_cancels_next_call() {
    let (conn, script) = ScriptedConnection::new(vec![query_reply("q1"), update_reply(1)]);
    let mut stmt = statement(conn);
    stmt.execute_query("SELECT 1").await.unwrap();

    assert_eq!(stmt.cancel().await, CancelDecision::Flagged);
    assert_eq!(stmt.cancel().await, CancelDecision::Ignored);

    assert!(matches!(
        stmt.execute_update("UPDATE t SET a = 1").await,
        Err(ExecError::Cancelled)
    ));
    assert_eq!(script.requests().len(), 1);
    assert_eq!(stmt.query_id(), None);

    assert_eq!(stmt.execute_update("UPDATE t SET a = 1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_maxrows_wraps_plain_queries_only() {
    let (conn, script) = ScriptedConnection::new(vec![
        query_reply("q1"),
        Reply::ok(ResponsePayload::ExecuteExplain(ExplainBody::Text(
            "plan".to_string(),
        ))),
    ]);
    let mut stmt = statement(conn);

    assert_eq!(
        stmt.execute("SET MAXROWS 10").await.unwrap(),
        ExecuteOutcome::UpdateCount(0)
    );
    stmt.execute("SELECT * FROM t").await.unwrap();
    stmt.close_result_set().await.unwrap();
    stmt.execute("EXPLAIN SELECT * FROM t").await.unwrap();

    let requests = script.requests();
    assert_eq!(
        requests[0].sql.as_deref(),
        Some("SELECT * FROM (SELECT * FROM t) LIMIT 10")
    );
    assert_eq!(requests[1].sql.as_deref(), Some("SELECT * FROM t"));
}

#[tokio::test]
async fn test_list_indexes_case_handling() {
    let rows = WireRows {
        columns: vec![WireColumn {
            name: "index_name".to_string(),
            type_name: "CHAR".to_string(),
        }],
        rows: vec![vec![CellValue::Text("orders_pk".to_string())]],
    };
    let (conn, script) = ScriptedConnection::new(vec![
        metadata_reply(rows.clone()),
        metadata_reply(rows.clone()),
        metadata_reply(rows),
    ]);
    let mut stmt = statement(conn);

    let outcome = stmt.execute("LIST INDEXES Sales.Orders").await.unwrap();
    let rs = outcome.into_result_set().unwrap();
    assert_eq!(rs.first_column_text(), vec!["orders_pk".to_string()]);

    stmt.execute("list indices \"Sales\".\"Orders\"").await.unwrap();
    stmt.execute("LIST INDEXES Orders").await.unwrap();

    let expected = |schema: &str, table: &str| {
        RequestPayload::FetchSystemMetadata(
            SystemMetadataRequest::new(SystemMetadataCall::GetIndexInfo)
                .with_schema(schema)
                .with_table(table),
        )
    };
    let requests = script.requests();
    assert_eq!(requests[0].payload, expected("sales", "orders"));
    assert_eq!(requests[1].payload, expected("Sales", "Orders"));
    assert_eq!(requests[2].payload, expected("public", "orders"));
}

#[tokio::test]
async fn test_null_and_decimal_literals() {
    let (conn, script) = ScriptedConnection::new(vec![update_reply(1)]);
    let mut stmt = statement(conn);

    stmt.bind(0, Parameter::Null);
    stmt.bind(1, "12.50".parse::<SqlDecimal>().unwrap());
    stmt.execute_update("INSERT INTO t VALUES (?, ?)").await.unwrap();

    assert_eq!(
        script.requests()[0].sql.as_deref(),
        Some("INSERT INTO t VALUES (NULL, DECIMAL(12.50, 4, 2))")
    );
}

#[tokio::test]
async fn test_inline_plan_is_not_substituted() {
    let (conn, script) = ScriptedConnection::new(vec![
        Reply::ok(ResponsePayload::ExecuteInlinePlan {
            query_id: "p1".to_string(),
        }),
    ]);
    let mut stmt = statement(conn);
    stmt.bind(0, 5i32);

    stmt.execute_inline_plan("{\"filter\": \"a = ?\"}").await.unwrap();
    assert_eq!(
        script.requests()[0].sql.as_deref(),
        Some("{\"filter\": \"a = ?\"}")
    );
}

#[tokio::test]
async fn test_marker_underflow_sends_nothing() {
    let (conn, script) = ScriptedConnection::new(vec![]);
    let mut stmt = statement(conn);
    stmt.bind(0, 1i64);

    assert!(matches!(
        stmt.execute_update("UPDATE t SET a = ? WHERE b = ?").await,
        Err(ExecError::InvalidParameterMarker { index: 2 })
    ));
    assert!(script.requests().is_empty());
}

#[tokio::test]
async fn test_warnings_are_collected_and_cleared() {
    let (conn, _script) = ScriptedConnection::new(vec![
        Reply::with_confirmation(
            ResponsePayload::ExecuteUpdate { updated_rows: 2 },
            Confirmation::warning("truncated", "01004", 7),
        ),
        update_reply(1),
    ]);
    let mut stmt = statement(conn);

    stmt.execute_update("UPDATE t SET a = 'x'").await.unwrap();
    assert_eq!(stmt.warnings().len(), 1);
    assert_eq!(stmt.warnings()[0].sql_state, "01004");

    stmt.execute_update("UPDATE t SET a = 'y'").await.unwrap();
    assert!(stmt.warnings().is_empty());
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let (conn, script) = ScriptedConnection::new(vec![Reply::with_confirmation(
        ResponsePayload::ExecuteUpdate { updated_rows: 0 },
        Confirmation::error("table not found", "42S02", -301),
    )]);
    let mut stmt = statement(conn);

    let err = stmt.execute_update("DELETE FROM missing").await.unwrap_err();
    assert_eq!(err.sql_state(), "42S02");
    assert!(matches!(err, ExecError::Server { vendor_code: -301, .. }));
    assert_eq!(script.reconnects(), 0);
}

#[tokio::test]
async fn test_invalid_confirmation_is_protocol_error() {
    let (conn, _script) = ScriptedConnection::new(vec![Reply::with_confirmation(
        ResponsePayload::ExecuteUpdate { updated_rows: 0 },
        Confirmation::invalid(),
    )]);
    let mut stmt = statement(conn);

    assert!(matches!(
        stmt.execute_update("DELETE FROM t").await,
        Err(ExecError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_explain_formats_by_server_version() {
    let plan = PlanNode {
        operator: "scan".to_string(),
        properties: BTreeMap::new(),
        children: vec![],
    };
    let (legacy, legacy_script) = ScriptedConnection::with_schema(
        vec![Reply::ok(ResponsePayload::ExecuteExplain(ExplainBody::Legacy(
            plan,
        )))],
        "public",
        "6.3.2",
    );
    let mut stmt = statement(legacy);
    let text = stmt.explain("SELECT 1", ExplainFormat::Proto).await.unwrap();
    assert_eq!(text, "operator: \"scan\"\n");
    assert_eq!(
        legacy_script.requests()[0].payload,
        RequestPayload::ExecuteExplain { format: None }
    );

    let (modern, modern_script) = ScriptedConnection::new(vec![Reply::ok(
        ResponsePayload::ExecuteExplain(ExplainBody::Text("{}".to_string())),
    )]);
    let mut stmt = statement(modern);
    let rs = stmt
        .execute("explain json SELECT 1")
        .await
        .unwrap()
        .into_result_set()
        .unwrap();
    assert_eq!(rs.rows().unwrap().columns.names(), vec!["explain"]);
    assert_eq!(rs.first_column_text(), vec!["{}".to_string()]);
    assert_eq!(
        modern_script.requests()[0].payload,
        RequestPayload::ExecuteExplain {
            format: Some(ExplainFormat::Json)
        }
    );
}

#[tokio::test]
async fn test_list_all_queries() {
    let (conn, _script) = ScriptedConnection::new(vec![Reply::ok(
        ResponsePayload::SystemWideQueries {
            rows: vec![SystemQueryRow {
                query_id: "q1".to_string(),
                user: "admin".to_string(),
                importance: 0.5,
                estimated_time_ms: 100,
                elapsed_time_ms: 40,
                status: "RUNNING".to_string(),
                server: "node1".to_string(),
                database: "db".to_string(),
                sql: "SELECT 1".to_string(),
            }],
        },
    )]);
    let mut stmt = statement(conn);

    let rs = stmt
        .execute("LIST ALL QUERIES")
        .await
        .unwrap()
        .into_result_set()
        .unwrap();
    let rows = rs.rows().unwrap();
    assert_eq!(rows.columns.len(), 9);
    assert_eq!(rows.get(0, "status"), Some(&CellValue::Text("RUNNING".to_string())));
}

#[tokio::test]
async fn test_export_and_plan_listing() {
    let (conn, script) = ScriptedConnection::new(vec![
        Reply::ok(ResponsePayload::ExecuteExport {
            export_statement: "CREATE TABLE sales.orders (...)".to_string(),
        }),
        Reply::ok(ResponsePayload::ListPlan {
            plan_names: vec!["daily".to_string(), "weekly".to_string()],
        }),
    ]);
    let mut stmt = statement(conn);

    let rs = stmt
        .execute("EXPORT TABLE sales.orders")
        .await
        .unwrap()
        .into_result_set()
        .unwrap();
    assert_eq!(rs.rows().unwrap().columns.names(), vec!["export"]);
    assert_eq!(
        script.requests()[0].sql.as_deref(),
        Some("EXPORT TABLE sales.orders")
    );

    assert_eq!(stmt.list_plan().await.unwrap(), vec!["daily", "weekly"]);
    assert_eq!(script.requests()[1].sql, None);
}

#[tokio::test]
async fn test_session_settings() {
    let (conn, script) = ScriptedConnection::new(vec![Reply::ok(ResponsePayload::KillQuery)]);
    let mut stmt = statement(conn);

    assert_eq!(stmt.execute_update("SET SCHEMA Analytics").await.unwrap(), 0);
    assert_eq!(script.lock().schema, "analytics");

    let rs = stmt.execute_query("GET SCHEMA").await.unwrap();
    assert_eq!(rs.first_column_text(), vec!["analytics".to_string()]);

    assert_eq!(stmt.execute_update("KILL q5").await.unwrap(), 0);
    assert_eq!(script.requests()[0].request_type, RequestType::KillQuery);
}

#[tokio::test]
async fn test_system_metadata_scalars() {
    let (conn, _script) = ScriptedConnection::new(vec![Reply::ok(
        ResponsePayload::FetchSystemMetadata(SystemMetadataResult {
            string_val: "7.1.0".to_string(),
            ..SystemMetadataResult::default()
        }),
    )]);
    let mut stmt = statement(conn);

    let version = stmt
        .fetch_system_metadata_string(SystemMetadataRequest::new(
            SystemMetadataCall::GetDatabaseProductVersion,
        ))
        .await
        .unwrap();
    assert_eq!(version, "7.1.0");
}

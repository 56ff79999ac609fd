//! Query Execution Integration Tests
//!
//! Ad-hoc SQL through `dbprobe::query` against embedded backends, checking the row
//! documents exactly as they are printed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dbprobe::config::{parse_payload, QueryPayload};
use dbprobe::{query, DatabaseConfig};
use pretty_assertions::assert_eq;
use serde_json::json;

fn temp_path(ext: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path =
        std::env::temp_dir().join(format!("dbprobe_query_{}_{id}.{ext}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

async fn rows_json(config: &DatabaseConfig, sql: &str) -> serde_json::Value {
    let rows = query(config, sql).await.expect("query should succeed");
    serde_json::to_value(&rows).unwrap()
}

#[cfg(feature = "duckdb")]
mod duckdb_backend {
    use super::*;

    fn memory() -> DatabaseConfig {
        DatabaseConfig::file("duckdb", ":memory:")
    }

    #[tokio::test]
    async fn test_select_literal() {
        assert_eq!(rows_json(&memory(), "SELECT 1 AS x").await, json!([{"x": 1}]));
    }

    #[tokio::test]
    async fn test_payload_round_trip_from_stdin_shape() {
        let payload: QueryPayload = parse_payload(
            r#"{"config": {"type": "duckdb", "path": ":memory:"}, "sql": "SELECT 'a' AS s, NULL AS n"}"#,
        )
        .unwrap();

        assert_eq!(
            rows_json(&payload.config, &payload.sql).await,
            json!([{"s": "a", "n": null}])
        );
    }

    #[tokio::test]
    async fn test_temporal_and_decimal_rendering() {
        let rows = rows_json(
            &memory(),
            "SELECT DATE '2024-01-01' AS d,
                    TIMESTAMP '2024-01-01 10:30:00' AS ts,
                    12.50::DECIMAL(5,2) AS price",
        )
        .await;

        insta::assert_json_snapshot!(rows, @r###"
        [
          {
            "d": "2024-01-01",
            "ts": "2024-01-01T10:30:00",
            "price": 12.5
          }
        ]
        "###);
    }

    #[tokio::test]
    async fn test_boundary_values_render_as_json() {
        let rows = rows_json(
            &memory(),
            "SELECT 'infinity'::DATE AS d,
                    '-infinity'::TIMESTAMP AS ts,
                    TIMESTAMPTZ '2024-01-01 10:30:00+02' AS tz,
                    {'a': 1, 'b': 'x'} AS s,
                    MAP {'k': [1, 2]} AS m",
        )
        .await;

        insta::assert_json_snapshot!(rows, @r###"
        [
          {
            "d": "infinity",
            "ts": "-infinity",
            "tz": "2024-01-01T08:30:00+00:00",
            "s": {
              "a": 1,
              "b": "x"
            },
            "m": {
              "k": [
                1,
                2
              ]
            }
          }
        ]
        "###);
    }

    #[tokio::test]
    async fn test_trailing_semicolon_is_accepted() {
        assert_eq!(rows_json(&memory(), "SELECT 2 AS y;").await, json!([{"y": 2}]));
    }

    #[tokio::test]
    async fn test_empty_result_is_empty_array() {
        let rows = rows_json(&memory(), "SELECT 1 AS x WHERE false").await;
        assert_eq!(rows, json!([]));
    }

    #[tokio::test]
    async fn test_reads_from_file_database() {
        let path = temp_path("duckdb");
        {
            let conn = duckdb::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE orders (id INTEGER, total DECIMAL(8,2));
                 INSERT INTO orders VALUES (1, 10.00), (2, 2.75);",
            )
            .unwrap();
        }
        let config = DatabaseConfig::file("duckdb", &path);

        let rows = rows_json(&config, "SELECT id, total FROM orders ORDER BY id").await;
        assert_eq!(rows, json!([{"id": 1, "total": 10.0}, {"id": 2, "total": 2.75}]));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_failing_sql_reports_every_strategy() {
        let err = query(&memory(), "SELECT * FROM missing_table").await.unwrap_err();

        assert_eq!(err.error_code(), "QUERY_EXECUTION_ERROR");
        let message = err.message();
        assert!(message.starts_with("expression:"), "unexpected message: {message}");
        assert!(message.contains("raw:"));
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_backend {
    use super::*;

    #[tokio::test]
    async fn test_select_literal() {
        let config = DatabaseConfig::file("sqlite", ":memory:");
        assert_eq!(rows_json(&config, "SELECT 1 AS x").await, json!([{"x": 1}]));
    }

    #[tokio::test]
    async fn test_blob_renders_as_hex() {
        let config = DatabaseConfig::file("sqlite", ":memory:");
        let rows = rows_json(&config, "SELECT X'DEAD01' AS b, 1.5 AS f").await;
        assert_eq!(rows, json!([{"b": "dead01", "f": 1.5}]));
    }

    #[tokio::test]
    async fn test_duplicate_column_names_last_wins() {
        let config = DatabaseConfig::file("sqlite", ":memory:");
        let rows = rows_json(&config, "SELECT 1 AS a, 2 AS a").await;
        assert_eq!(rows, json!([{"a": 2}]));
    }

    #[tokio::test]
    async fn test_writes_are_rejected_on_file_databases() {
        let path = temp_path("db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();
        }
        let config = DatabaseConfig::file("sqlite", &path);

        let err = query(&config, "INSERT INTO t VALUES (1)").await.unwrap_err();
        assert_eq!(err.error_code(), "QUERY_EXECUTION_ERROR");

        let _ = std::fs::remove_file(&path);
    }
}

#[tokio::test]
async fn test_unsupported_backend() {
    let config = DatabaseConfig::new("oracle");
    let err = query(&config, "SELECT 1").await.unwrap_err();
    assert_eq!(err.error_code(), "UNSUPPORTED_BACKEND");
}

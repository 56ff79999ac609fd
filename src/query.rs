//! Ad-hoc SQL execution
//!
//! The executor walks an ordered list of [`Strategy`] values and returns the first one
//! that succeeds. An empty result is a success; only a failure moves on to the next
//! strategy. No validation is applied to the SQL text.

use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::engine::{self, Connector, RawResult, Select};
use crate::error::{ProbeError, Result};
use crate::value::Record;

/// One way of running a SQL string against a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Native execution: cursor rows are zipped with the description, frames are
    /// materialized
    Raw,
    /// Run the SQL as a derived table through the structured query layer
    Expression,
}

impl Strategy {
    /// Attempt order
    pub const ORDER: [Self; 2] = [Self::Raw, Self::Expression];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Expression => "expression",
        }
    }

    async fn run(self, connector: &mut dyn Connector, sql: &str) -> Result<Vec<Record>> {
        match self {
            Self::Raw => match connector.raw_sql(sql).await? {
                RawResult::Cursor(cursor) => Ok(cursor.into_records()),
                RawResult::Tabular(frame) => Ok(frame.into_records()),
            },
            Self::Expression => {
                let frame = connector.execute(&Select::from_sql(sql)).await?;
                Ok(frame.into_records())
            }
        }
    }
}

/// Open a connector for `config` and run `sql`
pub async fn query(config: &DatabaseConfig, sql: &str) -> Result<Vec<Record>> {
    let mut connector = engine::connect(config).await?;

    let rows = query_connector(connector.as_mut(), sql).await;

    if let Err(e) = connector.close().await {
        warn!(error = %e, "failed to close connector");
    }

    rows
}

/// Run `sql` through an already open connector
pub async fn query_connector(connector: &mut dyn Connector, sql: &str) -> Result<Vec<Record>> {
    let mut failures: Vec<(Strategy, ProbeError)> = Vec::new();

    for strategy in Strategy::ORDER {
        match strategy.run(connector, sql).await {
            Ok(rows) => {
                info!(strategy = strategy.name(), rows = rows.len(), "query complete");
                return Ok(rows);
            }
            Err(e) => {
                warn!(strategy = strategy.name(), error = %e, "query strategy failed");
                failures.push((strategy, e));
            }
        }
    }

    Err(ProbeError::query_failed(describe_failures(&failures)))
}

/// Last failure first, earlier ones after it
fn describe_failures(failures: &[(Strategy, ProbeError)]) -> String {
    failures
        .iter()
        .rev()
        .map(|(strategy, err)| {
            let detail = match err {
                ProbeError::QueryExecution(detail) => detail.clone(),
                other => other.message(),
            };
            format!("{}: {detail}", strategy.name())
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeConnector;
    use crate::engine::{BackendKind, Cursor, Frame};
    use crate::value::Scalar;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn one_x() -> Cursor {
        Cursor::new(vec!["x".to_string()], vec![vec![Scalar::Int(1)]])
    }

    #[tokio::test]
    async fn test_cursor_result_is_zipped() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_raw(Ok(RawResult::Cursor(one_x())));

        let rows = query_connector(&mut fake, "SELECT 1 AS x").await.unwrap();
        assert_eq!(serde_json::to_value(&rows).unwrap(), json!([{"x": 1}]));
    }

    #[tokio::test]
    async fn test_tabular_result_is_materialized() {
        let frame = Frame::new(
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![Scalar::Int(1), Scalar::Text("one".to_string())],
                vec![Scalar::Int(2), Scalar::Null],
            ],
        );
        let mut fake =
            FakeConnector::new(BackendKind::Snowflake).with_raw(Ok(RawResult::Tabular(frame)));

        let rows = query_connector(&mut fake, "SELECT a, b FROM t").await.unwrap();
        assert_eq!(
            serde_json::to_value(&rows).unwrap(),
            json!([{"a": 1, "b": "one"}, {"a": 2, "b": null}])
        );
    }

    #[tokio::test]
    async fn test_empty_result_does_not_fall_back() {
        let empty = Cursor::new(vec!["x".to_string()], Vec::new());
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_raw(Ok(RawResult::Cursor(empty)))
            .with_expression(Ok(Frame::new(vec!["x".to_string()], vec![vec![Scalar::Int(9)]])));

        let rows = query_connector(&mut fake, "SELECT x FROM t WHERE false").await.unwrap();
        assert!(rows.is_empty());
        assert!(fake.calls.iter().all(|c| !c.starts_with("execute:")));
    }

    #[tokio::test]
    async fn test_raw_failure_falls_back_to_expression() {
        let mut fake = FakeConnector::new(BackendKind::DuckDb)
            .with_raw(Err("syntax error"))
            .with_expression(Ok(Frame::new(vec!["x".to_string()], vec![vec![Scalar::Int(1)]])));

        let rows = query_connector(&mut fake, "SELECT 1 AS x;").await.unwrap();
        assert_eq!(serde_json::to_value(&rows).unwrap(), json!([{"x": 1}]));
        assert_eq!(
            fake.calls.last().unwrap(),
            "execute:SELECT * FROM (SELECT 1 AS x) AS \"_dbprobe_q\""
        );
    }

    #[tokio::test]
    async fn test_both_strategies_failing_is_query_error() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_raw(Err("relation \"nope\" does not exist"))
            .with_expression(Err("relation \"nope\" does not exist (wrapped)"));

        let err = query_connector(&mut fake, "SELECT * FROM nope").await.unwrap_err();
        assert_eq!(err.error_code(), "QUERY_EXECUTION_ERROR");
        let message = err.message();
        assert!(message.contains("expression: relation \"nope\" does not exist (wrapped)"));
        assert!(message.contains("raw: relation \"nope\" does not exist"));
    }

    #[test]
    fn test_strategy_order() {
        assert_eq!(Strategy::ORDER, [Strategy::Raw, Strategy::Expression]);
        assert_eq!(Strategy::Raw.name(), "raw");
    }
}

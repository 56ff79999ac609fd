//! `MySQL` / `MariaDB` Connector Implementation
//!
//! # Features
//! - TCP connections (`host`, `port`, `user`, `password`, optional `database`)
//! - Schema (database) and table discovery via `information_schema`
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, rustls)
//! - Ad-hoc SQL runs over the text protocol, so cells arrive as bytes and are decoded
//!   from the column type reported by the server
//! - Columns with the binary character set (63) stay as bytes
//! - `mysql`, `performance_schema` and `sys` are hidden from schema listings

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, Opts, OptsBuilder, Row, Value};
use rust_decimal::Decimal;

use crate::config::ConnectionParams;
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Cursor, RawResult, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

const ENGINE: &str = "mysql";
const DEFAULT_PORT: u16 = 3306;
const BINARY_CHARSET: u16 = 63;

/// `MySQL` connector
pub struct MySqlConnector {
    conn: Conn,
}

impl MySqlConnector {
    /// Connect to the configured server
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let opts = build_mysql_opts(params)?;

        let conn = Conn::new(opts).await.map_err(|e| {
            ProbeError::connection_error(format!("Failed to connect to MySQL: {e}"))
        })?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::ListSchemas)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        self.conn
            .query::<String, _>(
                "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA
                 WHERE SCHEMA_NAME NOT IN ('mysql', 'performance_schema', 'sys')
                 ORDER BY SCHEMA_NAME",
            )
            .await
            .map_err(|e| ProbeError::engine_error(ENGINE, format!("Failed to list schemas: {e}")))
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        self.conn
            .exec::<String, _, _>(
                "SELECT TABLE_NAME FROM information_schema.TABLES
                 WHERE TABLE_SCHEMA = ?
                 ORDER BY TABLE_NAME",
                (schema,),
            )
            .await
            .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let rows: Vec<(String, String, String)> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE FROM information_schema.COLUMNS
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
                 ORDER BY ORDINAL_POSITION",
                (schema, name),
            )
            .await
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        if rows.is_empty() {
            return Err(ProbeError::table_metadata(qualified, "table not found"));
        }

        let columns = rows
            .into_iter()
            .map(|(column, data_type, nullable)| {
                ColumnDescriptor::new(column, data_type, nullable == "YES")
            })
            .collect();

        Ok(TableHandle::new(schema, name, columns))
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        let mut result = self
            .conn
            .query_iter(sql)
            .await
            .map_err(|e| ProbeError::query_failed(format!("Failed to execute query: {e}")))?;

        let columns: Vec<Column> = result.columns_ref().to_vec();
        let rows: Vec<Row> = result
            .collect_and_drop()
            .await
            .map_err(|e| ProbeError::query_failed(format!("Failed to fetch rows: {e}")))?;

        let description = columns.iter().map(|c| c.name_str().into_owned()).collect();
        let fetched = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| {
                        row.as_ref(idx)
                            .map_or(Scalar::Null, |value| mysql_value_to_scalar(value, column))
                    })
                    .collect()
            })
            .collect();

        Ok(RawResult::Cursor(Cursor::new(description, fetched)))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| ProbeError::engine_error(ENGINE, format!("Failed to disconnect: {e}")))
    }
}

/// Build connection options from the configured parameters
fn build_mysql_opts(params: &ConnectionParams) -> Result<Opts> {
    let host = required(params.host.as_deref(), "host", BackendKind::MySql)?;
    let user = required(params.user.as_deref(), "user", BackendKind::MySql)?;

    let builder = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(params.port.unwrap_or(DEFAULT_PORT))
        .user(Some(user))
        .pass(params.password.as_deref())
        .db_name(params.database.as_deref());

    Ok(Opts::from(builder))
}

/// Convert one `MySQL` cell to a scalar using its column metadata
fn mysql_value_to_scalar(value: &Value, column: &Column) -> Scalar {
    match value {
        Value::NULL => Scalar::Null,
        Value::Int(i) => Scalar::Int(*i),
        Value::UInt(u) => Scalar::UInt(*u),
        Value::Float(f) => Scalar::Float(f64::from(*f)),
        Value::Double(d) => Scalar::Float(*d),
        Value::Date(year, month, day, hour, minute, second, micro) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));
            match (column.column_type(), date) {
                (ColumnType::MYSQL_TYPE_DATE, Some(date)) => Scalar::Date(date),
                (_, Some(date)) => date
                    .and_hms_micro_opt(u32::from(*hour), u32::from(*minute), u32::from(*second), *micro)
                    .map_or(Scalar::Null, Scalar::DateTime),
                // Zero dates (0000-00-00) have no calendar equivalent
                (_, None) => Scalar::Null,
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            if !negative && *days == 0 {
                if let Some(time) = NaiveTime::from_hms_micro_opt(
                    u32::from(*hours),
                    u32::from(*minutes),
                    u32::from(*seconds),
                    *micros,
                ) {
                    return Scalar::Time(time);
                }
            }
            let sign = if *negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            Scalar::Other(format!("{sign}{total_hours}:{minutes:02}:{seconds:02}.{micros:06}"))
        }
        Value::Bytes(bytes) => decode_text_cell(bytes, column),
    }
}

/// Decode a text-protocol cell according to the column type
fn decode_text_cell(bytes: &[u8], column: &Column) -> Scalar {
    let binary = column.character_set() == BINARY_CHARSET;
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Scalar::Bytes(bytes.to_vec());
    };

    let parsed = match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            if column.flags().contains(ColumnFlags::UNSIGNED_FLAG) {
                text.parse().ok().map(Scalar::UInt)
            } else {
                text.parse().ok().map(Scalar::Int)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text.parse().ok().map(Scalar::Float)
        }
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            Decimal::from_str(text).ok().map(Scalar::Decimal)
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Scalar::Date)
        }
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok().map(Scalar::DateTime)
        }
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            NaiveTime::parse_from_str(text, "%H:%M:%S%.f").ok().map(Scalar::Time)
        }
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(text).ok().map(Scalar::Json),
        ColumnType::MYSQL_TYPE_BIT => Some(Scalar::Bytes(bytes.to_vec())),
        _ if binary => Some(Scalar::Bytes(bytes.to_vec())),
        _ => None,
    };

    parsed.unwrap_or_else(|| Scalar::Text(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(column_type: ColumnType) -> Column {
        Column::new(column_type)
    }

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: Some("localhost".to_string()),
            user: Some("root".to_string()),
            password: Some("test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_opts_defaults() {
        let opts = build_mysql_opts(&params()).unwrap();
        assert_eq!(opts.tcp_port(), 3306);
        assert_eq!(opts.db_name(), None);

        let with_db = build_mysql_opts(&ConnectionParams {
            database: Some("shop".to_string()),
            port: Some(3307),
            ..params()
        })
        .unwrap();
        assert_eq!(with_db.tcp_port(), 3307);
        assert_eq!(with_db.db_name(), Some("shop"));
    }

    #[test]
    fn test_missing_host() {
        let err = build_mysql_opts(&ConnectionParams { host: None, ..params() }).unwrap_err();
        assert!(err.message().contains("mysql requires 'host' parameter"));
    }

    #[test]
    fn test_text_cells_follow_column_type() {
        assert_eq!(
            decode_text_cell(b"42", &column(ColumnType::MYSQL_TYPE_LONG)),
            Scalar::Int(42)
        );
        assert_eq!(
            decode_text_cell(b"12.50", &column(ColumnType::MYSQL_TYPE_NEWDECIMAL)),
            Scalar::Decimal(Decimal::new(1250, 2))
        );
        assert_eq!(
            decode_text_cell(b"2024-01-01", &column(ColumnType::MYSQL_TYPE_DATE)),
            Scalar::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(
            decode_text_cell(b"2024-01-01 10:30:00", &column(ColumnType::MYSQL_TYPE_DATETIME)),
            Scalar::DateTime(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 30, 0).unwrap()
            )
        );
        assert_eq!(
            decode_text_cell(br#"{"a":1}"#, &column(ColumnType::MYSQL_TYPE_JSON)),
            Scalar::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            decode_text_cell(b"hello", &column(ColumnType::MYSQL_TYPE_VAR_STRING)),
            Scalar::Text("hello".to_string())
        );
    }

    #[test]
    fn test_binary_cells() {
        let blob = column(ColumnType::MYSQL_TYPE_BLOB).with_character_set(BINARY_CHARSET);
        assert_eq!(decode_text_cell(b"abc", &blob), Scalar::Bytes(b"abc".to_vec()));
        assert_eq!(
            decode_text_cell(&[0xff, 0xfe], &column(ColumnType::MYSQL_TYPE_VAR_STRING)),
            Scalar::Bytes(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_binary_protocol_values() {
        let date_col = column(ColumnType::MYSQL_TYPE_DATE);
        assert_eq!(
            mysql_value_to_scalar(&Value::Date(2024, 1, 1, 0, 0, 0, 0), &date_col),
            Scalar::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(
            mysql_value_to_scalar(&Value::Date(0, 0, 0, 0, 0, 0, 0), &date_col),
            Scalar::Null
        );

        let time_col = column(ColumnType::MYSQL_TYPE_TIME);
        assert_eq!(
            mysql_value_to_scalar(&Value::Time(false, 0, 1, 2, 3, 0), &time_col),
            Scalar::Time(NaiveTime::from_hms_opt(1, 2, 3).unwrap())
        );
        assert_eq!(
            mysql_value_to_scalar(&Value::Time(true, 1, 2, 0, 0, 0), &time_col),
            Scalar::Other("-26:00:00.000000".to_string())
        );
    }

    #[tokio::test]
    #[ignore = "Requires running MySQL instance"]
    async fn test_select_literal() {
        let mut conn = MySqlConnector::connect(&params()).await.unwrap();
        let RawResult::Cursor(cursor) = conn.raw_sql("SELECT 1 AS x").await.unwrap() else {
            panic!("expected cursor");
        };
        assert_eq!(
            serde_json::to_value(cursor.into_records()).unwrap(),
            serde_json::json!([{"x": 1}])
        );
        Box::new(conn).close().await.unwrap();
    }
}

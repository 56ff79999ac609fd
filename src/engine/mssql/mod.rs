//! SQL Server Connector Implementation
//!
//! # Features
//! - TCP connections with SQL Server authentication (`host`, `port`, `user`, `password`)
//! - Optional `database`; the login's default database is used otherwise
//! - Schema, table and column discovery via `INFORMATION_SCHEMA`
//!
//! # Implementation Notes
//! - Uses `tiberius` over a tokio `TcpStream` (`tokio-util` compat layer)
//! - The server certificate is trusted as presented
//! - The ODBC `driver` parameter is accepted but unused: TDS is spoken natively
//! - Built-in roles (`db_*`), `sys` and `guest` are hidden from schema listings

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::ConnectionParams;
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Cursor, RawResult, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

const ENGINE: &str = "mssql";
const DEFAULT_PORT: u16 = 1433;

/// SQL Server connector
pub struct MsSqlConnector {
    client: Client<Compat<TcpStream>>,
}

impl MsSqlConnector {
    /// Connect to the configured server
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let config = build_config(params)?;

        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            ProbeError::connection_error(format!("Failed to reach SQL Server: {e}"))
        })?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write()).await.map_err(|e| {
            ProbeError::connection_error(format!("Failed to connect to SQL Server: {e}"))
        })?;

        Ok(Self { client })
    }

    /// Run a query and return its first result set
    async fn rows(&mut self, sql: &str) -> std::result::Result<Vec<Row>, tiberius::error::Error> {
        self.client.simple_query(sql).await?.into_first_result().await
    }
}

#[async_trait]
impl Connector for MsSqlConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::MsSql
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::ListSchemas)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        let rows = self
            .rows(
                "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA
                 WHERE SCHEMA_NAME NOT IN ('sys', 'guest')
                 AND SCHEMA_NAME NOT LIKE 'db[_]%'
                 ORDER BY SCHEMA_NAME",
            )
            .await
            .map_err(|e| ProbeError::engine_error(ENGINE, format!("Failed to list schemas: {e}")))?;

        Ok(rows.iter().filter_map(|row| row.get::<&str, _>(0).map(str::to_string)).collect())
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES
                 WHERE TABLE_SCHEMA = @P1
                 ORDER BY TABLE_NAME",
                &[&schema],
            )
            .await
            .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))?;

        Ok(rows.iter().filter_map(|row| row.get::<&str, _>(0).map(str::to_string)).collect())
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let rows = self
            .client
            .query(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS
                 WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
                 ORDER BY ORDINAL_POSITION",
                &[&schema, &name],
            )
            .await
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        let columns: Vec<ColumnDescriptor> = rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(
                    row.get::<&str, _>(0).unwrap_or_default(),
                    row.get::<&str, _>(1).unwrap_or_default(),
                    row.get::<&str, _>(2).map_or(true, |n| n == "YES"),
                )
            })
            .collect();

        if columns.is_empty() {
            return Err(ProbeError::table_metadata(qualified, "table not found"));
        }

        Ok(TableHandle::new(schema, name, columns))
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        let mut stream = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| ProbeError::query_failed(format!("Failed to execute query: {e}")))?;

        let description: Vec<String> = stream
            .columns()
            .await
            .map_err(|e| ProbeError::query_failed(format!("Failed to read columns: {e}")))?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| ProbeError::query_failed(format!("Failed to fetch rows: {e}")))?;

        let fetched = rows
            .into_iter()
            .map(|row| row.into_iter().map(column_data_to_scalar).collect())
            .collect();

        Ok(RawResult::Cursor(Cursor::new(description, fetched)))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client
            .close()
            .await
            .map_err(|e| ProbeError::engine_error(ENGINE, format!("Failed to close session: {e}")))
    }
}

/// Build the TDS client config from the configured parameters
fn build_config(params: &ConnectionParams) -> Result<Config> {
    let host = required(params.host.as_deref(), "host", BackendKind::MsSql)?;
    let user = required(params.user.as_deref(), "user", BackendKind::MsSql)?;
    let password = params.password.as_deref().unwrap_or_default();

    let mut config = Config::new();
    config.host(host);
    config.port(params.port.unwrap_or(DEFAULT_PORT));
    config.authentication(AuthMethod::sql_server(user, password));
    config.application_name("dbprobe");
    config.trust_cert();

    if let Some(database) = params.database.as_deref() {
        config.database(database);
    }

    Ok(config)
}

fn chrono_value<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>, wrap: impl Fn(T) -> Scalar) -> Scalar {
    match T::from_sql(data) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => Scalar::Null,
        Err(e) => Scalar::Other(e.to_string()),
    }
}

/// Convert one TDS cell to a scalar
fn column_data_to_scalar(data: ColumnData<'static>) -> Scalar {
    match data {
        ColumnData::U8(v) => v.map_or(Scalar::Null, |v| Scalar::Int(v.into())),
        ColumnData::I16(v) => v.map_or(Scalar::Null, |v| Scalar::Int(v.into())),
        ColumnData::I32(v) => v.map_or(Scalar::Null, |v| Scalar::Int(v.into())),
        ColumnData::I64(v) => v.map_or(Scalar::Null, Scalar::Int),
        ColumnData::F32(v) => v.map_or(Scalar::Null, |v| Scalar::Float(f64::from(v))),
        ColumnData::F64(v) => v.map_or(Scalar::Null, Scalar::Float),
        ColumnData::Bit(v) => v.map_or(Scalar::Null, Scalar::Bool),
        ColumnData::String(v) => v.map_or(Scalar::Null, |s| Scalar::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(Scalar::Null, |g| Scalar::Other(g.to_string())),
        ColumnData::Binary(v) => v.map_or(Scalar::Null, |b| Scalar::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map_or(Scalar::Null, |n| {
            let scale = u32::from(n.scale());
            Decimal::try_from_i128_with_scale(n.value(), scale)
                .map_or_else(|_| Scalar::Float(f64::from(n)), Scalar::Decimal)
        }),
        ColumnData::Xml(v) => {
            v.map_or(Scalar::Null, |xml| Scalar::Text(xml.into_owned().into_string()))
        }
        ColumnData::Date(_) => chrono_value::<NaiveDate>(&data, Scalar::Date),
        ColumnData::Time(_) => chrono_value::<NaiveTime>(&data, Scalar::Time),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono_value::<NaiveDateTime>(&data, Scalar::DateTime)
        }
        ColumnData::DateTimeOffset(_) => {
            chrono_value::<DateTime<FixedOffset>>(&data, Scalar::DateTimeTz)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tiberius::numeric::Numeric;

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: Some("localhost".to_string()),
            user: Some("sa".to_string()),
            password: Some("Passw0rd!".to_string()),
            driver: Some("ODBC Driver 18 for SQL Server".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_port() {
        let config = build_config(&params()).unwrap();
        assert_eq!(config.get_addr(), "localhost:1433");

        let custom = build_config(&ConnectionParams { port: Some(14330), ..params() }).unwrap();
        assert_eq!(custom.get_addr(), "localhost:14330");
    }

    #[test]
    fn test_missing_user() {
        let err = build_config(&ConnectionParams { user: None, ..params() }).unwrap_err();
        assert!(err.message().contains("mssql requires 'user' parameter"));
    }

    #[test]
    fn test_scalar_cells() {
        assert_eq!(column_data_to_scalar(ColumnData::I32(Some(7))), Scalar::Int(7));
        assert_eq!(column_data_to_scalar(ColumnData::I32(None)), Scalar::Null);
        assert_eq!(column_data_to_scalar(ColumnData::Bit(Some(true))), Scalar::Bool(true));
        assert_eq!(
            column_data_to_scalar(ColumnData::String(Some(Cow::Borrowed("abc")))),
            Scalar::Text("abc".to_string())
        );
        assert_eq!(
            column_data_to_scalar(ColumnData::Binary(Some(Cow::Owned(vec![1, 2])))),
            Scalar::Bytes(vec![1, 2])
        );
    }

    #[test]
    fn test_numeric_keeps_scale() {
        let cell = ColumnData::Numeric(Some(Numeric::new_with_scale(1250, 2)));
        assert_eq!(column_data_to_scalar(cell), Scalar::Decimal(Decimal::new(1250, 2)));
        assert_eq!(
            serde_json::to_value(column_data_to_scalar(ColumnData::Numeric(Some(
                Numeric::new_with_scale(1250, 2)
            ))))
            .unwrap(),
            serde_json::json!(12.5)
        );
    }

    #[tokio::test]
    #[ignore = "Requires running SQL Server instance"]
    async fn test_select_literal() {
        let mut conn = MsSqlConnector::connect(&params()).await.unwrap();
        let RawResult::Cursor(cursor) = conn.raw_sql("SELECT 1 AS x").await.unwrap() else {
            panic!("expected cursor");
        };
        assert_eq!(cursor.description(), ["x"]);
        Box::new(conn).close().await.unwrap();
    }
}

//! `PostgreSQL` / Redshift Connector Implementation
//!
//! # Features
//! - TCP connections (`host`, `port`, `database`, `user`, `password`)
//! - Redshift through the same wire protocol (default port 5439)
//! - Schema, table and column discovery via `information_schema`
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver), the connection task is spawned on the runtime
//! - Plain TCP only (`NoTls`)
//! - Statements are prepared first so empty results still report their columns
//! - NUMERIC is decoded through `rust_decimal`; NaN, infinities and values beyond its range
//!   keep their exact text form

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use crate::config::ConnectionParams;
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Cursor, RawResult, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `PostgreSQL` wire-protocol connector (postgres and redshift)
pub struct PostgresConnector {
    kind: BackendKind,
    client: Client,
}

impl PostgresConnector {
    /// Connect to the configured server
    pub async fn connect(kind: BackendKind, params: &ConnectionParams) -> Result<Self> {
        let pg_config = build_pg_config(kind, params)?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            ProbeError::connection_error(format!("Failed to connect to {kind}: {e}"))
        })?;

        // Connection errors are not logged to prevent credential leakage
        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(Self { kind, client })
    }

    async fn query_strings(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> std::result::Result<Vec<String>, tokio_postgres::Error> {
        let rows = self.client.query(sql, params).await?;
        rows.iter().map(|row| row.try_get::<_, String>(0)).collect()
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::ListSchemas)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        self.query_strings(
            "SELECT schema_name::text
             FROM information_schema.schemata
             WHERE schema_name NOT LIKE 'pg_temp%'
             AND schema_name NOT LIKE 'pg_toast_temp%'
             ORDER BY schema_name",
            &[],
        )
        .await
        .map_err(|e| ProbeError::engine_error(self.kind.as_str(), format!("Failed to list schemas: {e}")))
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        self.query_strings(
            "SELECT table_name::text
             FROM information_schema.tables
             WHERE table_schema = $1
             AND table_type IN ('BASE TABLE', 'VIEW')
             ORDER BY table_name",
            &[&schema],
        )
        .await
        .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&schema, &name],
            )
            .await
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        let columns = rows
            .iter()
            .map(|row| -> std::result::Result<ColumnDescriptor, tokio_postgres::Error> {
                let nullable: String = row.try_get(2)?;
                Ok(ColumnDescriptor::new(
                    row.try_get::<_, String>(0)?,
                    row.try_get::<_, String>(1)?,
                    nullable == "YES",
                ))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        if columns.is_empty() {
            return Err(ProbeError::table_metadata(qualified, "table not found"));
        }

        Ok(TableHandle::new(schema, name, columns))
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| ProbeError::query_failed(format!("Failed to prepare query: {e}")))?;

        let description: Vec<String> =
            stmt.columns().iter().map(|c| c.name().to_string()).collect();

        if description.is_empty() {
            self.client
                .execute(&stmt, &[])
                .await
                .map_err(|e| ProbeError::query_failed(format!("Failed to execute query: {e}")))?;
            return Ok(RawResult::Cursor(Cursor::new(description, Vec::new())));
        }

        let rows = self
            .client
            .query(&stmt, &[])
            .await
            .map_err(|e| ProbeError::query_failed(format!("Failed to execute query: {e}")))?;

        let fetched = rows
            .iter()
            .map(|row| {
                (0..description.len())
                    .map(|idx| postgres_value_to_scalar(row, idx))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<Vec<Scalar>>>>()?;

        Ok(RawResult::Cursor(Cursor::new(description, fetched)))
    }
}

/// Build the driver config, applying the per-kind default port
fn build_pg_config(kind: BackendKind, params: &ConnectionParams) -> Result<Config> {
    let host = required(params.host.as_deref(), "host", kind)?;
    let database = required(params.database.as_deref(), "database", kind)?;
    let user = required(params.user.as_deref(), "user", kind)?;
    let port = params.port.unwrap_or(default_port(kind));

    let mut pg_config = Config::new();
    pg_config
        .host(host)
        .port(port)
        .user(user)
        .dbname(database)
        .application_name("dbprobe")
        .connect_timeout(CONNECT_TIMEOUT);

    if let Some(password) = params.password.as_deref() {
        pg_config.password(password);
    }

    Ok(pg_config)
}

const fn default_port(kind: BackendKind) -> u16 {
    match kind {
        BackendKind::Redshift => 5439,
        _ => 5432,
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        ProbeError::query_failed(format!(
            "Failed to read column '{}': {e}",
            row.columns()[idx].name()
        ))
    })
}

fn array<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    convert: impl Fn(T) -> Scalar,
) -> Result<Scalar> {
    Ok(get::<Vec<Option<T>>>(row, idx)?.map_or(Scalar::Null, |items| {
        Scalar::Json(serde_json::Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Scalar::Null, &convert).to_json())
                .collect(),
        ))
    }))
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Exact text form of a NUMERIC, for values `Decimal` cannot hold
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        numeric_to_text(raw).map(Self).ok_or_else(|| "invalid NUMERIC payload".into())
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Render the binary NUMERIC format: `ndigits`, `weight`, `sign`, `dscale`, then
/// `ndigits` base-10000 digits, the first one weighted `10000^weight`
fn numeric_to_text(raw: &[u8]) -> Option<String> {
    let word = |i: usize| raw.get(i * 2..i * 2 + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    let digits = (0..ndigits).map(|i| word(4 + i)).collect::<Option<Vec<u16>>>()?;

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digit_at = |i: i32| usize::try_from(i).ok().and_then(|i| digits.get(i)).copied().unwrap_or(0);

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit_at(0).to_string());
        for i in 1..=weight {
            text.push_str(&format!("{:04}", digit_at(i)));
        }
    }

    if dscale > 0 {
        let groups = dscale.div_ceil(4);
        let mut fraction = String::with_capacity(groups * 4);
        for k in 1..=groups {
            let k = i32::try_from(k).ok()?;
            fraction.push_str(&format!("{:04}", digit_at(weight + k)));
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Some(text)
}

/// Convert one `PostgreSQL` cell to a scalar
fn postgres_value_to_scalar(row: &Row, idx: usize) -> Result<Scalar> {
    let col_type = row.columns()[idx].type_().clone();

    let value = match col_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Scalar::Bool),
        Type::CHAR => get::<i8>(row, idx)?.map(|v| Scalar::Int(v.into())),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Scalar::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Scalar::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Scalar::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| Scalar::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Scalar::Float(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Scalar::Float),
        Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(idx) {
            Ok(v) => v.map(Scalar::Decimal),
            Err(_) => get::<NumericText>(row, idx)?.map(|v| Scalar::Other(v.0)),
        },
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            get::<String>(row, idx)?.map(Scalar::Text)
        }
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(Scalar::Json),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(Scalar::Bytes),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Scalar::DateTime),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, idx)?.map(|v| Scalar::DateTimeTz(v.fixed_offset()))
        }
        Type::DATE => get::<NaiveDate>(row, idx)?.map(Scalar::Date),
        Type::TIME => get::<NaiveTime>(row, idx)?.map(Scalar::Time),
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Scalar::Other(v.to_string())),
        Type::BOOL_ARRAY => return array::<bool>(row, idx, Scalar::Bool),
        Type::INT2_ARRAY => return array::<i16>(row, idx, |v| Scalar::Int(v.into())),
        Type::INT4_ARRAY => return array::<i32>(row, idx, |v| Scalar::Int(v.into())),
        Type::INT8_ARRAY => return array::<i64>(row, idx, Scalar::Int),
        Type::FLOAT8_ARRAY => return array::<f64>(row, idx, Scalar::Float),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            return array::<String>(row, idx, Scalar::Text)
        }
        // Anything else is read as text when the driver allows it
        ref other => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Scalar::Text),
            Err(_) => Some(Scalar::Other(format!("<{}>", other.name()))),
        },
    };

    Ok(value.unwrap_or(Scalar::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: Some("localhost".to_string()),
            database: Some("postgres".to_string()),
            user: Some("postgres".to_string()),
            password: Some("postgres".to_string()),
            ..Default::default()
        }
    }

    fn numeric_payload(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for word in [digits.len() as u16, weight as u16, sign, dscale].into_iter().chain(digits.iter().copied()) {
            raw.extend_from_slice(&word.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_text_keeps_values_beyond_decimal_range() {
        let big = numeric_payload(10, 0, 0, &[1]);
        assert_eq!(numeric_to_text(&big).unwrap(), format!("1{}", "0".repeat(40)));

        let negative = numeric_payload(0, NUMERIC_NEG, 2, &[12, 5000]);
        assert_eq!(numeric_to_text(&negative).unwrap(), "-12.50");

        let tiny = numeric_payload(-2, 0, 8, &[1]);
        assert_eq!(numeric_to_text(&tiny).unwrap(), "0.00000001");

        let zero = numeric_payload(0, 0, 0, &[]);
        assert_eq!(numeric_to_text(&zero).unwrap(), "0");
    }

    #[test]
    fn test_numeric_text_special_values() {
        assert_eq!(numeric_to_text(&numeric_payload(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
        assert_eq!(numeric_to_text(&numeric_payload(0, NUMERIC_PINF, 0, &[])).unwrap(), "Infinity");
        assert_eq!(numeric_to_text(&numeric_payload(0, NUMERIC_NINF, 0, &[])).unwrap(), "-Infinity");
        assert!(numeric_to_text(&[0, 1]).is_none());
    }

    #[test]
    fn test_default_ports() {
        let pg = build_pg_config(BackendKind::Postgres, &params()).unwrap();
        assert_eq!(pg.get_ports(), [5432]);

        let rs = build_pg_config(BackendKind::Redshift, &params()).unwrap();
        assert_eq!(rs.get_ports(), [5439]);

        let explicit = build_pg_config(
            BackendKind::Postgres,
            &ConnectionParams { port: Some(6543), ..params() },
        )
        .unwrap();
        assert_eq!(explicit.get_ports(), [6543]);
    }

    #[test]
    fn test_password_is_optional() {
        let config = build_pg_config(
            BackendKind::Postgres,
            &ConnectionParams { password: None, ..params() },
        )
        .unwrap();
        assert!(config.get_password().is_none());
    }

    #[test]
    fn test_missing_fields() {
        for (field, p) in [
            ("host", ConnectionParams { host: None, ..params() }),
            ("database", ConnectionParams { database: None, ..params() }),
            ("user", ConnectionParams { user: None, ..params() }),
        ] {
            let err = build_pg_config(BackendKind::Redshift, &p).unwrap_err();
            assert_eq!(err.error_code(), "CONNECTION_ERROR");
            assert!(
                err.message().contains(&format!("redshift requires '{field}' parameter")),
                "{}",
                err.message()
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let p = ConnectionParams {
            host: Some("127.0.0.1".to_string()),
            port: Some(1),
            ..params()
        };
        let err = PostgresConnector::connect(BackendKind::Postgres, &p).await.err().unwrap();
        assert_eq!(err.error_code(), "CONNECTION_ERROR");
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_introspection_queries() {
        let mut conn = PostgresConnector::connect(BackendKind::Postgres, &params()).await.unwrap();
        let schemas = conn.list_schemas().await.unwrap();
        assert!(schemas.contains(&"public".to_string()));

        let RawResult::Cursor(cursor) = conn
            .raw_sql("SELECT 1 AS x, DATE '2024-01-01' AS d, 12.50::numeric AS m")
            .await
            .unwrap()
        else {
            panic!("expected cursor");
        };
        assert_eq!(
            serde_json::to_value(cursor.into_records()).unwrap(),
            serde_json::json!([{"x": 1, "d": "2024-01-01", "m": 12.5}])
        );

        Box::new(conn).close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires a running PostgreSQL server"]
    async fn test_numeric_outside_decimal_range() {
        let mut conn = PostgresConnector::connect(BackendKind::Postgres, &params()).await.unwrap();
        let frame = conn
            .raw_sql("SELECT 1e40::numeric AS big, 'NaN'::numeric AS nan")
            .await
            .unwrap()
            .into_frame();
        assert_eq!(
            serde_json::to_value(frame.into_records()).unwrap(),
            serde_json::json!([{"big": format!("1{}", "0".repeat(40)), "nan": "NaN"}])
        );
    }
}

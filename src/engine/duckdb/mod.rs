//! `DuckDB` Connector Implementation
//!
//! # Features
//! - File-based databases opened read-only (`/path/to/warehouse.duckdb`)
//! - In-memory databases (`:memory:`, read-write since `DuckDB` refuses read-only memory)
//! - Schema and table discovery via `information_schema`, scoped to the attached file
//!
//! # Implementation Notes
//! - Uses the `duckdb` crate (synchronous, bundled engine)
//! - Column names are read from the executed statement so empty results keep their shape
//! - HUGEINT values outside `i64` are kept as decimal strings
//! - LIST / ARRAY / STRUCT / MAP values become nested JSON
//! - `infinity` / `-infinity` dates and timestamps are reported by name
//! - TIMESTAMPTZ values keep their (UTC) offset

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ::duckdb::arrow::datatypes::DataType;
use ::duckdb::types::{OrderedMap, TimeUnit, Value};
use ::duckdb::{params, AccessMode, Config, Connection};

use crate::config::ConnectionParams;
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Cursor, RawResult, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

const ENGINE: &str = "duckdb";

/// `DuckDB` connector
pub struct DuckDbConnector {
    conn: Connection,
}

impl DuckDbConnector {
    /// Open the configured database file
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        let path = required(params.path.as_deref(), "path", BackendKind::DuckDb)?;
        let conn = open_connection(path)?;
        Ok(Self { conn })
    }

    fn list_schemas_sync(&self) -> Result<Vec<String>> {
        query_strings(
            &self.conn,
            "SELECT DISTINCT schema_name
             FROM information_schema.schemata
             WHERE catalog_name = current_database()
             ORDER BY schema_name",
            None,
        )
        .map_err(|e| ProbeError::engine_error(ENGINE, format!("Failed to list schemas: {e}")))
    }

    fn list_tables_sync(&self, schema: &str) -> Result<Vec<String>> {
        query_strings(
            &self.conn,
            "SELECT table_name
             FROM information_schema.tables
             WHERE table_catalog = current_database()
             AND table_schema = ?
             ORDER BY table_name",
            Some(schema),
        )
        .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))
    }

    fn table_sync(&self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let mut stmt = self
            .conn
            .prepare(
                "SELECT column_name, data_type, is_nullable
                 FROM information_schema.columns
                 WHERE table_catalog = current_database()
                 AND table_schema = ?
                 AND table_name = ?
                 ORDER BY ordinal_position",
            )
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        let columns = stmt
            .query_map(params![schema, name], |row| {
                let nullable: Option<String> = row.get(2)?;
                Ok(ColumnDescriptor::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    nullable.map_or(true, |n| n.eq_ignore_ascii_case("YES")),
                ))
            })
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        if columns.is_empty() {
            return Err(ProbeError::table_metadata(qualified, "table not found"));
        }

        Ok(TableHandle::new(schema, name, columns))
    }

    fn run(&self, sql: &str) -> Result<Cursor> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| ProbeError::query_failed(format!("Failed to prepare query: {e}")))?;

        let mut rows = stmt
            .query(params![])
            .map_err(|e| ProbeError::query_failed(format!("Failed to execute query: {e}")))?;

        let (description, zoned) = rows
            .as_ref()
            .map(|s| {
                let names = s.column_names();
                let zoned: Vec<bool> = (0..names.len())
                    .map(|idx| matches!(s.column_type(idx), DataType::Timestamp(_, Some(_))))
                    .collect();
                (names, zoned)
            })
            .unwrap_or_default();

        let mut fetched = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| ProbeError::query_failed(format!("Failed to fetch row: {e}")))?
        {
            let mut values = Vec::with_capacity(description.len());
            for idx in 0..description.len() {
                let value: Value = row.get(idx).map_err(|e| {
                    ProbeError::query_failed(format!("Failed to read column {idx}: {e}"))
                })?;
                let scalar = match (value, zoned.get(idx).copied().unwrap_or(false)) {
                    (Value::Timestamp(unit, v), true) => timestamp_tz_to_scalar(unit, v),
                    (value, _) => duckdb_value_to_scalar(value),
                };
                values.push(scalar);
            }
            fetched.push(values);
        }

        Ok(Cursor::new(description, fetched))
    }
}

#[async_trait]
impl Connector for DuckDbConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckDb
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::ListSchemas)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        self.list_schemas_sync()
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        self.list_tables_sync(schema)
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        self.table_sync(schema, name)
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        self.run(sql).map(RawResult::Cursor)
    }
}

/// Open a `DuckDB` database, read-only unless it lives in memory
fn open_connection(path: &Path) -> Result<Connection> {
    if path.as_os_str() == ":memory:" {
        return Connection::open_in_memory().map_err(|e| {
            ProbeError::connection_error(format!("Failed to open in-memory DuckDB: {e}"))
        });
    }

    let config = Config::default().access_mode(AccessMode::ReadOnly).map_err(|e| {
        ProbeError::connection_error(format!("Failed to configure DuckDB: {e}"))
    })?;

    Connection::open_with_flags(path, config)
        .map_err(|e| ProbeError::connection_error(format!("Failed to open DuckDB database: {e}")))
}

fn query_strings(
    conn: &Connection,
    sql: &str,
    param: Option<&str>,
) -> std::result::Result<Vec<String>, ::duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let names = match param {
        Some(p) => stmt.query_map(params![p], |row| row.get::<_, String>(0))?.collect(),
        None => stmt.query_map(params![], |row| row.get::<_, String>(0))?.collect(),
    };
    names
}

fn micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// `DuckDB` encodes `infinity` / `-infinity` as the extreme values of the storage type
fn infinity_label(positive: bool) -> Scalar {
    Scalar::Other(if positive { "infinity" } else { "-infinity" }.to_string())
}

fn date_to_scalar(days: i32) -> Scalar {
    if days == i32::MAX || days == -i32::MAX {
        return infinity_label(days > 0);
    }
    days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map_or_else(|| Scalar::Other(days.to_string()), Scalar::Date)
}

fn timestamp_utc(unit: TimeUnit, v: i64) -> std::result::Result<DateTime<Utc>, Scalar> {
    if v == i64::MAX || v == -i64::MAX {
        return Err(infinity_label(v > 0));
    }
    DateTime::from_timestamp_micros(micros(unit, v)).ok_or_else(|| Scalar::Other(v.to_string()))
}

fn timestamp_tz_to_scalar(unit: TimeUnit, v: i64) -> Scalar {
    timestamp_utc(unit, v).map_or_else(|s| s, |dt| Scalar::DateTimeTz(dt.fixed_offset()))
}

fn struct_to_json(fields: OrderedMap<String, Value>) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (name, value) in fields.iter() {
        object.insert(name.clone(), duckdb_value_to_scalar(value.clone()).to_json());
    }
    serde_json::Value::Object(object)
}

/// Text keys give an object, any other key type a list of `[key, value]` pairs
fn map_to_json(entries: OrderedMap<Value, Value>) -> serde_json::Value {
    let pairs: Vec<(serde_json::Value, serde_json::Value)> = entries
        .iter()
        .map(|(k, v)| {
            (duckdb_value_to_scalar(k.clone()).to_json(), duckdb_value_to_scalar(v.clone()).to_json())
        })
        .collect();

    if pairs.iter().all(|(k, _)| k.is_string()) {
        let object = pairs
            .into_iter()
            .filter_map(|(k, v)| k.as_str().map(|key| (key.to_string(), v)))
            .collect();
        serde_json::Value::Object(object)
    } else {
        serde_json::Value::Array(
            pairs.into_iter().map(|(k, v)| serde_json::Value::Array(vec![k, v])).collect(),
        )
    }
}

/// Convert a `DuckDB` value to a scalar
fn duckdb_value_to_scalar(value: Value) -> Scalar {
    match value {
        Value::Null => Scalar::Null,
        Value::Boolean(b) => Scalar::Bool(b),
        Value::TinyInt(v) => Scalar::Int(v.into()),
        Value::SmallInt(v) => Scalar::Int(v.into()),
        Value::Int(v) => Scalar::Int(v.into()),
        Value::BigInt(v) => Scalar::Int(v),
        Value::HugeInt(v) => i64::try_from(v).map_or_else(|_| Scalar::Other(v.to_string()), Scalar::Int),
        Value::UHugeInt(v) => u64::try_from(v).map_or_else(|_| Scalar::Other(v.to_string()), Scalar::UInt),
        Value::UTinyInt(v) => Scalar::Int(v.into()),
        Value::USmallInt(v) => Scalar::Int(v.into()),
        Value::UInt(v) => Scalar::Int(v.into()),
        Value::UBigInt(v) => Scalar::UInt(v),
        Value::Float(v) => Scalar::Float(f64::from(v)),
        Value::Double(v) => Scalar::Float(v),
        Value::Decimal(d) => Scalar::Decimal(d),
        Value::Text(s) | Value::Enum(s) => Scalar::Text(s),
        Value::Blob(b) => Scalar::Bytes(b),
        Value::Date32(days) => date_to_scalar(days),
        Value::Timestamp(unit, v) => {
            timestamp_utc(unit, v).map_or_else(|s| s, |dt| Scalar::DateTime(dt.naive_utc()))
        }
        Value::Time64(unit, v) => {
            let us = micros(unit, v);
            let secs = u32::try_from(us.div_euclid(1_000_000)).unwrap_or(0);
            let nanos = u32::try_from(us.rem_euclid(1_000_000) * 1_000).unwrap_or(0);
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map_or_else(|| Scalar::Other(v.to_string()), Scalar::Time)
        }
        Value::Interval { months, days, nanos } => {
            Scalar::Other(format!("{months} months {days} days {nanos} ns"))
        }
        Value::List(items) | Value::Array(items) => Scalar::Json(serde_json::Value::Array(
            items.into_iter().map(|v| duckdb_value_to_scalar(v).to_json()).collect(),
        )),
        Value::Struct(fields) => Scalar::Json(struct_to_json(fields)),
        Value::Map(entries) => Scalar::Json(map_to_json(entries)),
        Value::Union(inner) => duckdb_value_to_scalar(*inner),
        other => Scalar::Other(format!("{other:?}")),
    }
}

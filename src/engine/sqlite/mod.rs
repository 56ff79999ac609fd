//! `SQLite` Connector Implementation
//!
//! # Features
//! - File-based databases opened read-only (`/path/to/db.sqlite`)
//! - In-memory databases (`:memory:`)
//! - Table discovery via `sqlite_master`, columns via `PRAGMA table_info`
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, no async needed)
//! - `SQLite` has no schema enumeration; callers fall back to the `main` schema
//! - Views are listed alongside tables
//! - BLOB values are kept as bytes and rendered as hex in JSON

use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};

use crate::config::ConnectionParams;
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Cursor, RawResult, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

/// `SQLite` connector
pub struct SqliteConnector {
    conn: Connection,
}

impl SqliteConnector {
    /// Open the configured database file
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        let path = required(params.path.as_deref(), "path", BackendKind::Sqlite)?;
        let conn = open_connection(path)?;
        Ok(Self { conn })
    }

    fn list_tables_sync(&self, schema: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
            quote_ident(schema)
        );

        let mut stmt =
            self.conn.prepare(&sql).map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))?;

        Ok(names)
    }

    fn table_sync(&self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let sql = format!("PRAGMA {}.table_info({})", quote_ident(schema), quote_ident(name));

        let mut stmt =
            self.conn.prepare(&sql).map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        // table_info rows: cid, name, type, notnull, dflt_value, pk
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnDescriptor::new(
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? == 0,
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

        let description: Vec<String> =
            stmt.column_names().iter().map(|s| (*s).to_string()).collect();

        if description.is_empty() {
            // Statements without a result set still run, they just yield no rows
            stmt.execute([])
                .map_err(|e| ProbeError::query_failed(format!("Failed to execute query: {e}")))?;
            return Ok(Cursor::new(description, Vec::new()));
        }

        let width = description.len();
        let rows = stmt
            .query([])
            .map_err(|e| ProbeError::query_failed(format!("Failed to execute query: {e}")))?
            .mapped(|row| read_row(row, width))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProbeError::query_failed(format!("Failed to fetch row: {e}")))?;

        Ok(Cursor::new(description, rows))
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
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

/// Open a `SQLite` database read-only
fn open_connection(path: &Path) -> Result<Connection> {
    if path.as_os_str() == ":memory:" {
        return Connection::open_in_memory().map_err(|e| {
            ProbeError::connection_error(format!("Failed to open in-memory SQLite: {e}"))
        });
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .map_err(|e| ProbeError::connection_error(format!("Failed to open SQLite database: {e}")))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn read_row(row: &Row<'_>, width: usize) -> rusqlite::Result<Vec<Scalar>> {
    (0..width).map(|idx| row.get_ref(idx).map(sqlite_value_to_scalar)).collect()
}

/// Convert a `SQLite` value to a scalar
///
/// Text that is not valid UTF-8 is decoded lossily instead of failing the row.
fn sqlite_value_to_scalar(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Integer(i) => Scalar::Int(i),
        ValueRef::Real(f) => Scalar::Float(f),
        ValueRef::Text(bytes) => Scalar::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Scalar::Bytes(bytes.to_vec()),
    }
}

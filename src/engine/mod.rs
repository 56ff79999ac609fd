//! Connector Traits and Core Types
//!
//! This module defines the one contract every backend adapter implements, and the factory
//! that turns a [`DatabaseConfig`] into a live [`Connector`].
//!
//! # Session Design
//! A connector is opened once per command, owned exclusively by the caller, and closed at
//! the end. Nothing is pooled or cached between commands.
//!
//! # Capabilities
//! Not every backend can enumerate schemas. Callers check [`Connector::supports`] before
//! calling an optional operation and substitute a default when it is absent.
//!
//! # Raw Results
//! [`Connector::raw_sql`] returns an explicit [`RawResult`]: driver-based adapters produce a
//! [`Cursor`] (column description plus fetched rows), REST warehouse adapters produce an
//! already materialized [`Frame`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::DatabaseConfig;
use crate::error::{ProbeError, Result};
use crate::value::{Record, Scalar};

pub mod expr;

pub use expr::{Dialect, Select};

#[cfg(feature = "duckdb")]
pub mod duckdb;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(feature = "snowflake")]
pub mod snowflake;

#[cfg(feature = "bigquery")]
pub mod bigquery;

#[cfg(feature = "databricks")]
pub mod databricks;

#[cfg(any(feature = "snowflake", feature = "bigquery", feature = "databricks"))]
pub(crate) mod http;

#[cfg(test)]
pub(crate) mod fake;

/// Supported backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded analytical engine (file)
    DuckDb,
    /// Embedded row store (file)
    Sqlite,
    /// `PostgreSQL` server
    Postgres,
    /// Amazon Redshift (`PostgreSQL` wire protocol)
    Redshift,
    /// `MySQL` / `MariaDB` server
    MySql,
    /// Microsoft SQL Server
    MsSql,
    /// Snowflake cloud warehouse
    Snowflake,
    /// Google `BigQuery`
    BigQuery,
    /// Databricks SQL warehouse
    Databricks,
}

impl BackendKind {
    pub const ALL: [Self; 9] = [
        Self::DuckDb,
        Self::Postgres,
        Self::Redshift,
        Self::MySql,
        Self::MsSql,
        Self::Snowflake,
        Self::BigQuery,
        Self::Databricks,
        Self::Sqlite,
    ];

    /// Get the kind tag as used in the `type` field
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DuckDb => "duckdb",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Redshift => "redshift",
            Self::MySql => "mysql",
            Self::MsSql => "mssql",
            Self::Snowflake => "snowflake",
            Self::BigQuery => "bigquery",
            Self::Databricks => "databricks",
        }
    }

    /// Whether the adapter for this kind is compiled in
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        match self {
            Self::DuckDb => cfg!(feature = "duckdb"),
            Self::Sqlite => cfg!(feature = "sqlite"),
            Self::Postgres | Self::Redshift => cfg!(feature = "postgres"),
            Self::MySql => cfg!(feature = "mysql"),
            Self::MsSql => cfg!(feature = "mssql"),
            Self::Snowflake => cfg!(feature = "snowflake"),
            Self::BigQuery => cfg!(feature = "bigquery"),
            Self::Databricks => cfg!(feature = "databricks"),
        }
    }

    /// Kind tags accepted by this build
    #[must_use]
    pub fn supported() -> Vec<&'static str> {
        Self::ALL.iter().filter(|k| k.is_enabled()).map(Self::as_str).collect()
    }

    /// Embedded file engines default to `main`, everything else to `public`
    #[must_use]
    pub const fn default_schema(&self) -> &'static str {
        match self {
            Self::DuckDb | Self::Sqlite => "main",
            _ => "public",
        }
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        match self {
            Self::MySql | Self::BigQuery | Self::Databricks => Dialect::Backtick,
            Self::MsSql => Dialect::TSql,
            _ => Dialect::Ansi,
        }
    }

    /// Statement used by the connection test
    #[must_use]
    pub const fn ping_sql(&self) -> &'static str {
        match self {
            Self::DuckDb => "SELECT 1 AS test",
            _ => "SELECT 1",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s && k.is_enabled())
            .ok_or_else(|| ProbeError::unsupported_backend(s, &Self::supported()))
    }
}

/// Optional connector operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Enumerate schema names
    ListSchemas,
}

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,

    /// Backend-reported type, as displayed by the backend
    #[serde(rename = "type")]
    pub data_type: String,

    /// `true` when the backend cannot tell
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self { name: name.into(), data_type: data_type.into(), nullable }
    }
}

/// Handle to one table, carrying its column schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    pub schema: String,
    pub name: String,
    columns: Vec<ColumnDescriptor>,
}

impl TableHandle {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> Self {
        Self { schema: schema.into(), name: name.into(), columns }
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    #[must_use]
    pub fn into_columns(self) -> Vec<ColumnDescriptor> {
        self.columns
    }

    /// `SELECT * FROM schema.table`, to be refined with `.count()` or `.limit(n)`
    #[must_use]
    pub fn select(&self) -> Select {
        Select::table(&self.schema, &self.name)
    }

    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Materialized tabular result: column names plus rows of values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

impl Frame {
    #[must_use]
    pub const fn new(columns: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First cell of the first row (scalar queries such as `COUNT(*)`)
    #[must_use]
    pub fn first_value(&self) -> Option<&Scalar> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Position of a column by name
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Keep at most `n` rows
    pub fn truncate(&mut self, n: usize) {
        self.rows.truncate(n);
    }

    /// Convert rows into column-name → value mappings
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        let Self { columns, rows } = self;
        rows.into_iter().map(|row| Record::from_row(&columns, row)).collect()
    }
}

/// Cursor-like raw result: a column description and the rows fetched from the driver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cursor {
    description: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

impl Cursor {
    #[must_use]
    pub const fn new(description: Vec<String>, rows: Vec<Vec<Scalar>>) -> Self {
        Self { description, rows }
    }

    /// Column names, in result order
    #[must_use]
    pub fn description(&self) -> &[String] {
        &self.description
    }

    /// Take every remaining row
    pub fn fetchall(&mut self) -> Vec<Vec<Scalar>> {
        std::mem::take(&mut self.rows)
    }

    /// Zip the description with each fetched row
    #[must_use]
    pub fn into_records(mut self) -> Vec<Record> {
        let rows = self.fetchall();
        rows.into_iter().map(|row| Record::from_row(&self.description, row)).collect()
    }

    #[must_use]
    pub fn into_frame(self) -> Frame {
        Frame::new(self.description, self.rows)
    }
}

/// Outcome of [`Connector::raw_sql`]
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    Cursor(Cursor),
    Tabular(Frame),
}

impl RawResult {
    #[must_use]
    pub fn into_frame(self) -> Frame {
        match self {
            Self::Cursor(cursor) => cursor.into_frame(),
            Self::Tabular(frame) => frame,
        }
    }
}

/// Uniform contract over every backend
///
/// All operations are awaited sequentially by a single caller.
#[async_trait]
pub trait Connector: Send {
    /// Backend kind of this connector
    fn kind(&self) -> BackendKind;

    /// SQL dialect used by the structured layer
    fn dialect(&self) -> Dialect {
        self.kind().dialect()
    }

    /// Whether an optional operation is available
    fn supports(&self, capability: Capability) -> bool;

    /// Enumerate schema names (only when `supports(Capability::ListSchemas)`)
    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        Err(ProbeError::capability_unavailable(format!(
            "{} does not enumerate schemas",
            self.kind()
        )))
    }

    /// Enumerate table (and view) names in a schema
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Resolve a table and read its column schema
    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle>;

    /// Execute SQL through the backend's native path
    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult>;

    /// Execute a structured statement and materialize it
    async fn execute(&mut self, select: &Select) -> Result<Frame> {
        let sql = select.compile(self.dialect());
        Ok(self.raw_sql(&sql).await?.into_frame())
    }

    /// Count rows of a table
    async fn count(&mut self, table: &TableHandle) -> Result<i64> {
        let frame = self.execute(&table.select().count()).await?;
        frame.first_value().and_then(Scalar::as_i64).ok_or_else(|| {
            ProbeError::query_failed(format!(
                "COUNT(*) on {} did not return an integer",
                table.qualified_name()
            ))
        })
    }

    /// Read up to `n` rows of a table
    async fn head(&mut self, table: &TableHandle, n: usize) -> Result<Frame> {
        let mut frame = self.execute(&table.select().limit(n)).await?;
        frame.truncate(n);
        Ok(frame)
    }

    /// Release the session
    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Open a connector for the configured backend
///
/// Unknown kinds fail with `UnsupportedBackend` before any I/O.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn Connector>> {
    let kind: BackendKind = config.kind.parse()?;
    tracing::debug!(kind = %kind, "opening connector");

    #[allow(unused_variables)]
    let params = &config.params;

    let connector: Box<dyn Connector> = match kind {
        #[cfg(feature = "duckdb")]
        BackendKind::DuckDb => Box::new(duckdb::DuckDbConnector::open(params)?),
        #[cfg(feature = "sqlite")]
        BackendKind::Sqlite => Box::new(sqlite::SqliteConnector::open(params)?),
        #[cfg(feature = "postgres")]
        BackendKind::Postgres | BackendKind::Redshift => {
            Box::new(postgres::PostgresConnector::connect(kind, params).await?)
        }
        #[cfg(feature = "mysql")]
        BackendKind::MySql => Box::new(mysql::MySqlConnector::connect(params).await?),
        #[cfg(feature = "mssql")]
        BackendKind::MsSql => Box::new(mssql::MsSqlConnector::connect(params).await?),
        #[cfg(feature = "snowflake")]
        BackendKind::Snowflake => Box::new(snowflake::SnowflakeConnector::connect(params).await?),
        #[cfg(feature = "bigquery")]
        BackendKind::BigQuery => Box::new(bigquery::BigQueryConnector::connect(params).await?),
        #[cfg(feature = "databricks")]
        BackendKind::Databricks => {
            Box::new(databricks::DatabricksConnector::connect(params).await?)
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(ProbeError::unsupported_backend(other.as_str(), &BackendKind::supported()))
        }
    };

    Ok(connector)
}

/// Fetch a required connection parameter or report which one is missing
pub(crate) fn required<'a, T: ?Sized>(
    value: Option<&'a T>,
    field: &str,
    kind: BackendKind,
) -> Result<&'a T> {
    value.ok_or_else(|| ProbeError::connection_error(format!("{kind} requires '{field}' parameter")))
}

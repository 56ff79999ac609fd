//! Schema and table discovery with per-table fault isolation
//!
//! Walks every schema the connector reports (or the backend's default schema when it
//! cannot enumerate them), applies the include/exclude rules, and describes each table:
//! columns, row count and a preview of at most [`PREVIEW_ROWS`] rows.
//!
//! Failures are contained at the smallest unit:
//! - table listing fails: the schema is skipped
//! - column schema fails: the table is reported with `error` and no data
//! - count fails: `row_count` is `-1`
//! - preview fails: `preview` is empty

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::engine::{self, Capability, ColumnDescriptor, Connector};
use crate::error::{ProbeError, Result};
use crate::filter::PatternFilter;
use crate::value::Record;

/// Upper bound on preview rows per table
pub const PREVIEW_ROWS: usize = 10;

/// Schemas never surfaced, compared case-insensitively
pub const SYSTEM_SCHEMAS: [&str; 3] = ["information_schema", "pg_catalog", "pg_toast"];

/// Result of an introspection pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub schemas: Vec<SchemaDescriptor>,
}

impl Catalog {
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&SchemaDescriptor> {
        self.schemas.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaDescriptor {
    pub name: String,
    pub tables: Vec<TableDescriptor>,
}

impl SchemaDescriptor {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    /// `-1` when the count could not be obtained
    pub row_count: i64,
    pub column_count: usize,
    pub preview: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableDescriptor {
    /// Entry for a table whose column schema could not be read
    fn unreadable(name: &str, err: &ProbeError) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            row_count: -1,
            column_count: 0,
            preview: Vec::new(),
            error: Some(err.message()),
        }
    }
}

/// Is `schema` an internal catalog schema?
#[must_use]
pub fn is_system_schema(schema: &str) -> bool {
    SYSTEM_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(schema))
}

/// Open a connector for `config` and introspect it
///
/// Fails only when the connector cannot be opened or when a backend that claims schema
/// enumeration fails to enumerate them.
pub async fn introspect(config: &DatabaseConfig) -> Result<Catalog> {
    let filter = PatternFilter::from_config(config);
    let mut connector = engine::connect(config).await?;

    let catalog = introspect_connector(connector.as_mut(), &filter).await;

    if let Err(e) = connector.close().await {
        warn!(error = %e, "failed to close connector");
    }

    catalog
}

/// Introspect through an already open connector
pub async fn introspect_connector(
    connector: &mut dyn Connector,
    filter: &PatternFilter,
) -> Result<Catalog> {
    let schemas = if connector.supports(Capability::ListSchemas) {
        connector.list_schemas().await?
    } else {
        let default = connector.kind().default_schema();
        debug!(schema = default, "schema listing unavailable, using default schema");
        vec![default.to_string()]
    };

    let mut catalog = Catalog::default();

    for schema in schemas {
        if is_system_schema(&schema) {
            continue;
        }
        if !filter.matches(&schema, None) {
            debug!(schema = %schema, "schema filtered out");
            continue;
        }

        let tables = match connector.list_tables(&schema).await {
            Ok(tables) => tables,
            Err(e) => {
                warn!(schema = %schema, error = %e, "skipping schema, tables could not be listed");
                continue;
            }
        };

        let mut descriptors = Vec::new();
        for table in tables {
            if !filter.matches(&schema, Some(&table)) {
                debug!(schema = %schema, table = %table, "table filtered out");
                continue;
            }
            descriptors.push(describe_table(connector, &schema, &table).await);
        }

        if !descriptors.is_empty() {
            catalog.schemas.push(SchemaDescriptor { name: schema, tables: descriptors });
        }
    }

    info!(
        schemas = catalog.schemas.len(),
        tables = catalog.table_count(),
        "introspection complete"
    );
    Ok(catalog)
}

async fn describe_table(connector: &mut dyn Connector, schema: &str, name: &str) -> TableDescriptor {
    debug!(schema, table = name, "describing table");

    let handle = match connector.table(schema, name).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(schema, table = name, error = %e, "table metadata unavailable");
            return TableDescriptor::unreadable(name, &e);
        }
    };

    let row_count = match connector.count(&handle).await {
        Ok(n) => n,
        Err(e) => {
            debug!(schema, table = name, error = %e, "row count unavailable");
            -1
        }
    };

    let preview = match connector.head(&handle, PREVIEW_ROWS).await {
        Ok(mut frame) => {
            frame.truncate(PREVIEW_ROWS);
            frame.into_records()
        }
        Err(e) => {
            debug!(schema, table = name, error = %e, "preview unavailable");
            Vec::new()
        }
    };

    let columns = handle.into_columns();
    TableDescriptor {
        name: name.to_string(),
        column_count: columns.len(),
        columns,
        row_count,
        preview,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeConnector;
    use crate::engine::BackendKind;
    use crate::value::Scalar;
    use pretty_assertions::assert_eq;

    fn rows(n: i64) -> Vec<Vec<Scalar>> {
        (0..n).map(|i| vec![Scalar::Int(i)]).collect()
    }

    fn no_filter() -> PatternFilter {
        PatternFilter::default()
    }

    #[tokio::test]
    async fn test_default_schema_when_listing_unsupported() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_table("public", "users", &[("id", "integer")], rows(2));

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();

        assert_eq!(catalog.schemas.len(), 1);
        assert_eq!(catalog.schemas[0].name, "public");
        assert!(!fake.calls.contains(&"list_schemas".to_string()));
    }

    #[tokio::test]
    async fn test_embedded_default_schema_is_main() {
        let mut fake = FakeConnector::new(BackendKind::Sqlite)
            .with_table("main", "t", &[("x", "INTEGER")], rows(1));

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();
        assert_eq!(catalog.schemas[0].name, "main");
    }

    #[tokio::test]
    async fn test_system_schemas_never_surface() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_schemas(&["INFORMATION_SCHEMA", "pg_catalog", "Pg_Toast", "public"])
            .with_table("INFORMATION_SCHEMA", "tables", &[("x", "text")], rows(1))
            .with_table("pg_catalog", "pg_class", &[("x", "text")], rows(1))
            .with_table("Pg_Toast", "chunk", &[("x", "text")], rows(1))
            .with_table("public", "users", &[("x", "text")], rows(1));

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();

        let names: Vec<&str> = catalog.schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["public"]);
    }

    #[tokio::test]
    async fn test_schema_without_tables_is_omitted() {
        let mut fake = FakeConnector::new(BackendKind::DuckDb)
            .with_schemas(&["empty", "main"])
            .with_table("main", "t", &[("x", "INTEGER")], rows(1));

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();
        assert!(catalog.schema("empty").is_none());
        assert!(catalog.schemas.iter().all(|s| !s.tables.is_empty()));
    }

    #[tokio::test]
    async fn test_failing_table_listing_skips_schema() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_schemas(&["locked", "public"])
            .with_failing_table_listing("locked", "permission denied for schema locked")
            .with_table("public", "users", &[("id", "integer")], rows(1));

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();
        assert!(catalog.schema("locked").is_none());
        assert!(catalog.schema("public").is_some());
    }

    #[tokio::test]
    async fn test_failing_schema_listing_is_fatal() {
        let mut fake =
            FakeConnector::new(BackendKind::Postgres).with_failing_schema_listing("gone away");

        let result = introspect_connector(&mut fake, &no_filter()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_broken_table_is_reported_with_error() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_table("public", "good", &[("id", "integer")], rows(3))
            .with_table("public", "bad", &[("id", "integer")], rows(3))
            .with_broken_table("public", "bad");

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();
        let schema = catalog.schema("public").unwrap();

        let bad = schema.table("bad").unwrap();
        assert!(bad.error.as_deref().unwrap().contains("permission denied"));
        assert_eq!(bad.row_count, -1);
        assert_eq!(bad.column_count, 0);
        assert!(bad.columns.is_empty());
        assert!(bad.preview.is_empty());

        let good = schema.table("good").unwrap();
        assert!(good.error.is_none());
        assert_eq!(good.row_count, 3);
    }

    #[tokio::test]
    async fn test_count_and_preview_failures_are_contained() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_table("public", "t", &[("id", "integer"), ("name", "text")], rows(4))
            .with_broken_count("public", "t")
            .with_broken_head("public", "t");

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();
        let table = catalog.schema("public").unwrap().table("t").unwrap();

        assert!(table.error.is_none());
        assert_eq!(table.row_count, -1);
        assert_eq!(table.column_count, 2);
        assert!(table.preview.is_empty());
    }

    #[tokio::test]
    async fn test_preview_is_capped() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_table("public", "big", &[("id", "integer")], rows(25));

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();
        let table = catalog.schema("public").unwrap().table("big").unwrap();

        assert_eq!(table.row_count, 25);
        assert_eq!(table.preview.len(), PREVIEW_ROWS);
    }

    #[tokio::test]
    async fn test_filters_apply_to_schemas_and_tables() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_schemas(&["sales", "hr"])
            .with_table("sales", "orders", &[("id", "integer")], rows(1))
            .with_table("sales", "tmp_staging", &[("id", "integer")], rows(1))
            .with_table("hr", "employees", &[("id", "integer")], rows(1));

        let filter = PatternFilter::new(&["sales.*".to_string()], &["sales.tmp_*".to_string()]);
        let catalog = introspect_connector(&mut fake, &filter).await.unwrap();

        assert_eq!(catalog.schemas.len(), 1);
        let sales = catalog.schema("sales").unwrap();
        let tables: Vec<&str> = sales.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tables, vec!["orders"]);
        assert!(!fake.calls.contains(&"list_tables:hr".to_string()));
    }

    #[tokio::test]
    async fn test_error_entry_serializes_error_field_only_when_present() {
        let mut fake = FakeConnector::new(BackendKind::Postgres)
            .with_table("public", "bad", &[("id", "integer")], rows(1))
            .with_broken_table("public", "bad")
            .with_table("public", "ok", &[("id", "integer")], rows(1));

        let catalog = introspect_connector(&mut fake, &no_filter()).await.unwrap();
        let json = serde_json::to_value(&catalog).unwrap();
        let tables = json["schemas"][0]["tables"].as_array().unwrap();

        assert!(tables[0].get("error").is_some());
        assert!(tables[1].get("error").is_none());
        assert_eq!(tables[1]["columns"][0]["type"], "integer");
    }
}

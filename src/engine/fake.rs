//! Scriptable in-memory connector for exercising callers of the contract

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::engine::{
    BackendKind, Capability, ColumnDescriptor, Connector, Frame, RawResult, Select, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

type Key = (String, String);

fn key(schema: &str, table: &str) -> Key {
    (schema.to_string(), table.to_string())
}

pub(crate) struct FakeConnector {
    kind: BackendKind,
    schemas: Option<std::result::Result<Vec<String>, String>>,
    tables: HashMap<String, std::result::Result<Vec<String>, String>>,
    columns: HashMap<Key, Vec<ColumnDescriptor>>,
    rows: HashMap<Key, Vec<Vec<Scalar>>>,
    broken_tables: HashSet<Key>,
    broken_counts: HashSet<Key>,
    broken_heads: HashSet<Key>,
    raw: Option<std::result::Result<RawResult, String>>,
    expression: Option<std::result::Result<Frame, String>>,
    pub calls: Vec<String>,
}

impl FakeConnector {
    /// Connector without schema listing
    pub(crate) fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            schemas: None,
            tables: HashMap::new(),
            columns: HashMap::new(),
            rows: HashMap::new(),
            broken_tables: HashSet::new(),
            broken_counts: HashSet::new(),
            broken_heads: HashSet::new(),
            raw: None,
            expression: None,
            calls: Vec::new(),
        }
    }

    pub(crate) fn with_schemas(mut self, schemas: &[&str]) -> Self {
        self.schemas = Some(Ok(schemas.iter().map(ToString::to_string).collect()));
        self
    }

    pub(crate) fn with_failing_schema_listing(mut self, message: &str) -> Self {
        self.schemas = Some(Err(message.to_string()));
        self
    }

    /// Register a table with `(name, type)` columns and some rows
    pub(crate) fn with_table(
        mut self,
        schema: &str,
        table: &str,
        columns: &[(&str, &str)],
        rows: Vec<Vec<Scalar>>,
    ) -> Self {
        let listed = self.tables.entry(schema.to_string()).or_insert_with(|| Ok(Vec::new()));
        if let Ok(names) = listed {
            names.push(table.to_string());
        }
        self.columns.insert(
            key(schema, table),
            columns.iter().map(|(n, t)| ColumnDescriptor::new(*n, *t, true)).collect(),
        );
        self.rows.insert(key(schema, table), rows);
        self
    }

    pub(crate) fn with_failing_table_listing(mut self, schema: &str, message: &str) -> Self {
        self.tables.insert(schema.to_string(), Err(message.to_string()));
        self
    }

    pub(crate) fn with_broken_table(mut self, schema: &str, table: &str) -> Self {
        self.broken_tables.insert(key(schema, table));
        self
    }

    pub(crate) fn with_broken_count(mut self, schema: &str, table: &str) -> Self {
        self.broken_counts.insert(key(schema, table));
        self
    }

    pub(crate) fn with_broken_head(mut self, schema: &str, table: &str) -> Self {
        self.broken_heads.insert(key(schema, table));
        self
    }

    pub(crate) fn with_raw(mut self, result: std::result::Result<RawResult, &str>) -> Self {
        self.raw = Some(result.map_err(ToString::to_string));
        self
    }

    pub(crate) fn with_expression(mut self, result: std::result::Result<Frame, &str>) -> Self {
        self.expression = Some(result.map_err(ToString::to_string));
        self
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ListSchemas => self.schemas.is_some(),
        }
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        self.calls.push("list_schemas".to_string());
        match &self.schemas {
            Some(Ok(names)) => Ok(names.clone()),
            Some(Err(message)) => Err(ProbeError::engine_error("fake", message.clone())),
            None => Err(ProbeError::capability_unavailable("fake does not enumerate schemas")),
        }
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        self.calls.push(format!("list_tables:{schema}"));
        match self.tables.get(schema) {
            Some(Ok(names)) => Ok(names.clone()),
            Some(Err(message)) => Err(ProbeError::schema_enumeration(schema, message.clone())),
            None => Ok(Vec::new()),
        }
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        self.calls.push(format!("table:{schema}.{name}"));
        let k = key(schema, name);
        if self.broken_tables.contains(&k) {
            return Err(ProbeError::table_metadata(format!("{schema}.{name}"), "permission denied"));
        }
        let columns = self
            .columns
            .get(&k)
            .cloned()
            .ok_or_else(|| ProbeError::table_metadata(format!("{schema}.{name}"), "not found"))?;
        Ok(TableHandle::new(schema, name, columns))
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        self.calls.push(format!("raw_sql:{sql}"));
        match &self.raw {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(ProbeError::query_failed(message.clone())),
            None => Err(ProbeError::query_failed("no raw result scripted")),
        }
    }

    async fn execute(&mut self, select: &Select) -> Result<Frame> {
        self.calls.push(format!("execute:{}", select.compile(self.dialect())));
        match &self.expression {
            Some(Ok(frame)) => Ok(frame.clone()),
            Some(Err(message)) => Err(ProbeError::query_failed(message.clone())),
            None => Err(ProbeError::query_failed("no expression result scripted")),
        }
    }

    async fn count(&mut self, table: &TableHandle) -> Result<i64> {
        let k = key(&table.schema, &table.name);
        if self.broken_counts.contains(&k) {
            return Err(ProbeError::query_failed("count timed out"));
        }
        Ok(self.rows.get(&k).map_or(0, |rows| rows.len() as i64))
    }

    async fn head(&mut self, table: &TableHandle, n: usize) -> Result<Frame> {
        let k = key(&table.schema, &table.name);
        if self.broken_heads.contains(&k) {
            return Err(ProbeError::query_failed("preview failed"));
        }
        let columns = table.columns().iter().map(|c| c.name.clone()).collect();
        // Ignores `n` so callers have to enforce the preview bound themselves
        let _ = n;
        Ok(Frame::new(columns, self.rows.get(&k).cloned().unwrap_or_default()))
    }
}

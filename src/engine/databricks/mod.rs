//! Databricks Connector Implementation
//!
//! # Features
//! - SQL warehouses addressed by server hostname + HTTP path (`/sql/1.0/warehouses/<id>`)
//! - Personal access token authentication
//! - Optional default `catalog` (Unity Catalog) and `schema`
//!
//! # Implementation Notes
//! - SQL Statement Execution API 2.0 over `reqwest`, inline `JSON_ARRAY` results
//! - Statements that outlive the server-side wait are polled until they settle
//! - Follow-up result chunks are fetched through `next_chunk_internal_link`
//! - Metadata comes from `SHOW SCHEMAS`, `SHOW TABLES` and `DESCRIBE TABLE`; Databricks
//!   does not report column nullability there, so every column is reported nullable

use std::str::FromStr;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::config::ConnectionParams;
use crate::engine::http::{self, MAX_POLLS, POLL_INTERVAL};
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Dialect, Frame, RawResult,
    TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

const KIND: BackendKind = BackendKind::Databricks;
const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";

/// Databricks SQL warehouse connector
pub struct DatabricksConnector {
    http: Client,
    base_url: String,
    token: String,
    warehouse_id: String,
    catalog: Option<String>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: Option<String>,
    status: StatementStatus,
    manifest: Option<Manifest>,
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    message: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    schema: ManifestSchema,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ColumnInfo {
    name: String,
    #[serde(default)]
    type_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResultData {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
    next_chunk_internal_link: Option<String>,
}

impl StatementStatus {
    fn is_running(&self) -> bool {
        matches!(self.state.as_str(), "PENDING" | "RUNNING")
    }

    fn failure(&self) -> String {
        let detail = self.error.as_ref().and_then(|e| e.message.clone());
        let code = self.error.as_ref().and_then(|e| e.error_code.clone());
        match (detail, code) {
            (Some(message), Some(code)) => format!("{message} ({code})"),
            (Some(message), None) => message,
            _ => format!("statement ended in state {}", self.state),
        }
    }
}

impl DatabricksConnector {
    /// Validate the configured warehouse address and credentials
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let host = required(params.host.as_deref(), "host", KIND)?;
        let http_path = required(params.http_path.as_deref(), "http_path", KIND)?;
        let token = required(params.token.as_deref(), "token", KIND)?;

        let warehouse_id = warehouse_id(http_path).ok_or_else(|| {
            ProbeError::connection_error(format!(
                "http_path '{http_path}' does not name a SQL warehouse (expected .../warehouses/<id>)"
            ))
        })?;

        Ok(Self {
            http: http::client()?,
            base_url: base_url(host),
            token: token.to_string(),
            warehouse_id,
            catalog: params.catalog.clone(),
            schema: params.schema.clone(),
        })
    }

    async fn statement_status(&self, statement_id: &str) -> Result<StatementResponse> {
        let response = self
            .http
            .get(format!("{}{STATEMENTS_PATH}/{statement_id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| http::transport_error(KIND, &e))?;
        http::read_json(KIND, response).await
    }

    /// Submit a statement, wait for it and collect every chunk
    async fn run(&self, sql: &str) -> Result<Frame> {
        let mut body = json!({
            "statement": sql,
            "warehouse_id": self.warehouse_id,
            "wait_timeout": "30s",
            "on_wait_timeout": "CONTINUE",
            "disposition": "INLINE",
            "format": "JSON_ARRAY",
        });
        if let Some(catalog) = &self.catalog {
            body["catalog"] = json!(catalog);
        }
        if let Some(schema) = &self.schema {
            body["schema"] = json!(schema);
        }

        let response = self
            .http
            .post(format!("{}{STATEMENTS_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(KIND, &e))?;
        let mut statement: StatementResponse = http::read_json(KIND, response)
            .await
            .map_err(|e| ProbeError::query_failed(e.to_string()))?;

        let mut polls = 0;
        while statement.status.is_running() {
            let Some(id) = statement.statement_id.clone() else {
                return Err(ProbeError::query_failed("Databricks returned no statement id"));
            };
            polls += 1;
            if polls > MAX_POLLS {
                return Err(ProbeError::query_failed("Databricks statement did not finish in time"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            statement = self.statement_status(&id).await?;
        }

        if statement.status.state != "SUCCEEDED" {
            return Err(ProbeError::query_failed(statement.status.failure()));
        }

        let columns = statement.manifest.unwrap_or_default().schema.columns;
        let mut result = statement.result.unwrap_or_default();
        let mut raw_rows = std::mem::take(&mut result.data_array);
        let mut next = result.next_chunk_internal_link.take();

        while let Some(link) = next {
            let response = self
                .http
                .get(format!("{}{link}", self.base_url))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| http::transport_error(KIND, &e))?;
            let chunk: ResultData = http::read_json(KIND, response).await?;
            raw_rows.extend(chunk.data_array);
            next = chunk.next_chunk_internal_link;
        }

        let names = columns.iter().map(|c| c.name.clone()).collect();
        let rows = raw_rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| {
                        databricks_value_to_scalar(row.get(idx).and_then(Option::as_deref), column)
                    })
                    .collect()
            })
            .collect();

        Ok(Frame::new(names, rows))
    }

    /// `catalog.schema` prefix for metadata statements
    fn namespace(&self, schema: &str) -> String {
        let dialect = Dialect::Backtick;
        match &self.catalog {
            Some(catalog) => dialect.qualified(catalog, schema),
            None => dialect.quote(schema),
        }
    }
}

#[async_trait]
impl Connector for DatabricksConnector {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::ListSchemas)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        let sql = match &self.catalog {
            Some(catalog) => format!("SHOW SCHEMAS IN {}", Dialect::Backtick.quote(catalog)),
            None => "SHOW SCHEMAS".to_string(),
        };
        let frame = self.run(&sql).await?;
        Ok(text_column(&frame, 0))
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        let sql = format!("SHOW TABLES IN {}", self.namespace(schema));
        let frame = self
            .run(&sql)
            .await
            .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))?;
        let idx = frame.column_index("tableName").unwrap_or(1);
        let mut names = text_column(&frame, idx);
        names.sort();
        Ok(names)
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let sql = format!(
            "DESCRIBE TABLE {}.{}",
            self.namespace(schema),
            Dialect::Backtick.quote(name)
        );
        let frame = self
            .run(&sql)
            .await
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        let columns = columns_from_describe(&frame);
        if columns.is_empty() {
            return Err(ProbeError::table_metadata(qualified, "table has no columns"));
        }

        Ok(TableHandle::new(schema, name, columns))
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        self.run(sql).await.map(RawResult::Tabular)
    }
}

/// Extract the warehouse id from `/sql/1.0/warehouses/<id>`
fn warehouse_id(http_path: &str) -> Option<String> {
    let (_, rest) = http_path.split_once("warehouses/")?;
    let id = rest.split(['/', '?']).next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn base_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

fn text_column(frame: &Frame, idx: usize) -> Vec<String> {
    frame
        .rows
        .iter()
        .filter_map(|row| match row.get(idx) {
            Some(Scalar::Text(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// `DESCRIBE TABLE` lists columns first, then a blank row and `# Partition Information`
/// style sections
fn columns_from_describe(frame: &Frame) -> Vec<ColumnDescriptor> {
    let mut columns = Vec::new();
    for row in &frame.rows {
        let (Some(Scalar::Text(name)), Some(Scalar::Text(data_type))) = (row.first(), row.get(1))
        else {
            break;
        };
        if name.trim().is_empty() || name.starts_with('#') {
            break;
        }
        columns.push(ColumnDescriptor::new(name, data_type, true));
    }
    columns
}

/// Convert one Databricks cell to a scalar using the manifest type name
fn databricks_value_to_scalar(value: Option<&str>, column: &ColumnInfo) -> Scalar {
    let Some(text) = value else {
        return Scalar::Null;
    };

    let decoded = match column.type_name.to_ascii_uppercase().as_str() {
        "BOOLEAN" => text.parse().ok().map(Scalar::Bool),
        "BYTE" | "SHORT" | "INT" | "LONG" => text.parse().ok().map(Scalar::Int),
        "FLOAT" | "DOUBLE" => text.parse().ok().map(Scalar::Float),
        "DECIMAL" => Decimal::from_str(text).ok().map(Scalar::Decimal),
        "DATE" => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Scalar::Date),
        "TIMESTAMP" => DateTime::parse_from_rfc3339(text).ok().map(Scalar::DateTimeTz),
        "TIMESTAMP_NTZ" => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(Scalar::DateTime),
        "BINARY" => base64::engine::general_purpose::STANDARD.decode(text).ok().map(Scalar::Bytes),
        "ARRAY" | "MAP" | "STRUCT" => serde_json::from_str(text).ok().map(Scalar::Json),
        _ => None,
    };

    decoded.unwrap_or_else(|| Scalar::Text(text.to_string()))
}

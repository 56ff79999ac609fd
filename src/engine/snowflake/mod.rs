//! Snowflake Connector Implementation
//!
//! # Features
//! - Password login against `https://<account>.snowflakecomputing.com`
//! - Session scoped to the configured warehouse, database and optional role / schema
//! - Schema, table and column discovery via the database's `INFORMATION_SCHEMA`
//!
//! # Implementation Notes
//! - Speaks the REST session and query endpoints over `reqwest`
//! - Results are requested as JSON; large results arrive in chunks that are downloaded
//!   after the first page
//! - Statements still running after the first response are polled through
//!   `getResultUrl`
//! - Cells arrive as strings and are decoded from the column `rowtype`

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::ConnectionParams;
use crate::engine::http::{self, MAX_POLLS, POLL_INTERVAL};
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Frame, RawResult, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::{from_hex, Scalar};

const KIND: BackendKind = BackendKind::Snowflake;

/// Response codes meaning "still executing, ask again"
const IN_PROGRESS_CODES: [&str; 2] = ["333333", "333334"];

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Snowflake connector
pub struct SnowflakeConnector {
    http: Client,
    base_url: String,
    token: String,
    sequence: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    success: bool,
}

impl<T> Envelope<T> {
    fn failure(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{message} (code {code})"),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => format!("code {code}"),
            (None, None) => "unknown error".to_string(),
        }
    }

    fn in_progress(&self) -> bool {
        self.code.as_deref().is_some_and(|c| IN_PROGRESS_CODES.contains(&c))
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<Vec<Option<String>>>,
    #[serde(default)]
    chunks: Vec<Chunk>,
    #[serde(default)]
    chunk_headers: HashMap<String, String>,
    qrmk: Option<String>,
    query_result_format: Option<String>,
    get_result_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    url: String,
}

impl SnowflakeConnector {
    /// Log in and open a session
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let account = required(params.account.as_deref(), "account", KIND)?;
        let user = required(params.user.as_deref(), "user", KIND)?;
        let password = required(params.password.as_deref(), "password", KIND)?;
        let warehouse = required(params.warehouse.as_deref(), "warehouse", KIND)?;
        let database = required(params.database.as_deref(), "database", KIND)?;

        let http = http::client()?;
        let base_url = base_url(account);

        let mut query = vec![("warehouse", warehouse), ("databaseName", database)];
        if let Some(role) = params.role.as_deref() {
            query.push(("roleName", role));
        }
        if let Some(schema) = params.schema.as_deref() {
            query.push(("schemaName", schema));
        }

        let body = json!({
            "data": {
                "ACCOUNT_NAME": account_name(account),
                "LOGIN_NAME": user,
                "PASSWORD": password,
                "CLIENT_APP_ID": "dbprobe",
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "SESSION_PARAMETERS": {
                    "JDBC_QUERY_RESULT_FORMAT": "JSON",
                    "PYTHON_CONNECTOR_QUERY_RESULT_FORMAT": "JSON"
                }
            }
        });

        let response = http
            .post(format!("{base_url}/session/v1/login-request"))
            .query(&query)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProbeError::connection_error(format!("Failed to reach Snowflake: {e}")))?;

        let envelope: Envelope<LoginData> = http::read_json(KIND, response)
            .await
            .map_err(|e| ProbeError::connection_error(e.to_string()))?;

        if !envelope.success {
            return Err(ProbeError::connection_error(format!(
                "Snowflake login failed: {}",
                envelope.failure()
            )));
        }

        let token = envelope
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| ProbeError::connection_error("Snowflake login returned no session token"))?;

        debug!(account = %account, "snowflake session opened");
        Ok(Self { http, base_url, token, sequence: 0 })
    }

    fn auth_header(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    /// Run a statement with positional text bindings and materialize every row
    async fn run(&mut self, sql: &str, bindings: &[&str]) -> Result<Frame> {
        self.sequence += 1;

        let mut body = json!({
            "sqlText": sql,
            "asyncExec": false,
            "sequenceId": self.sequence,
        });
        if !bindings.is_empty() {
            let binds: serde_json::Map<String, serde_json::Value> = bindings
                .iter()
                .enumerate()
                .map(|(i, value)| ((i + 1).to_string(), json!({"type": "TEXT", "value": value})))
                .collect();
            body["bindings"] = serde_json::Value::Object(binds);
        }

        let response = self
            .http
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", uuid::Uuid::new_v4().to_string())])
            .header("Authorization", self.auth_header())
            .header("Accept", "application/snowflake")
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(KIND, &e))?;

        let mut envelope: Envelope<QueryData> = http::read_json(KIND, response).await?;

        let mut polls = 0;
        while envelope.in_progress() {
            let Some(url) = envelope.data.as_ref().and_then(|d| d.get_result_url.clone()) else {
                break;
            };
            polls += 1;
            if polls > MAX_POLLS {
                return Err(ProbeError::query_failed("Snowflake statement did not finish in time"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .http
                .get(format!("{}{url}", self.base_url))
                .header("Authorization", self.auth_header())
                .header("Accept", "application/snowflake")
                .send()
                .await
                .map_err(|e| http::transport_error(KIND, &e))?;
            envelope = http::read_json(KIND, response).await?;
        }

        if !envelope.success {
            return Err(ProbeError::query_failed(envelope.failure()));
        }

        let data = envelope.data.unwrap_or_default();
        if let Some(format) = data.query_result_format.as_deref() {
            if !format.eq_ignore_ascii_case("json") {
                return Err(ProbeError::engine_error(
                    KIND.as_str(),
                    format!("unsupported result format '{format}'"),
                ));
            }
        }

        let mut raw_rows = data.rowset;
        for chunk in &data.chunks {
            raw_rows.extend(self.download_chunk(chunk, &data.chunk_headers, data.qrmk.as_deref()).await?);
        }

        let columns = data.rowtype.iter().map(|c| c.name.clone()).collect();
        let rows = raw_rows
            .into_iter()
            .map(|row| {
                data.rowtype
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| {
                        snowflake_value_to_scalar(row.get(idx).and_then(Option::as_deref), column)
                    })
                    .collect()
            })
            .collect();

        Ok(Frame::new(columns, rows))
    }

    async fn download_chunk(
        &self,
        chunk: &Chunk,
        headers: &HashMap<String, String>,
        qrmk: Option<&str>,
    ) -> Result<Vec<Vec<Option<String>>>> {
        let mut request = self.http.get(&chunk.url);
        if headers.is_empty() {
            if let Some(key) = qrmk {
                request = request
                    .header("x-amz-server-side-encryption-customer-algorithm", "AES256")
                    .header("x-amz-server-side-encryption-customer-key", key);
            }
        } else {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send().await.map_err(|e| http::transport_error(KIND, &e))?;
        if !response.status().is_success() {
            return Err(ProbeError::engine_error(
                KIND.as_str(),
                format!("chunk download failed with HTTP {}", response.status()),
            ));
        }
        let body = response.text().await.map_err(|e| http::transport_error(KIND, &e))?;
        parse_chunk(&body)
    }

    async fn names(&mut self, sql: &str, bindings: &[&str]) -> Result<Vec<String>> {
        let frame = self.run(sql, bindings).await?;
        Ok(frame
            .rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(Scalar::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl Connector for SnowflakeConnector {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::ListSchemas)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        self.names("SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA ORDER BY SCHEMA_NAME", &[])
            .await
            .map_err(|e| ProbeError::engine_error(KIND.as_str(), format!("Failed to list schemas: {e}")))
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        self.names(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES
             WHERE TABLE_SCHEMA = ?
             ORDER BY TABLE_NAME",
            &[schema],
        )
        .await
        .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let frame = self
            .run(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
                 ORDER BY ORDINAL_POSITION",
                &[schema, name],
            )
            .await
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        let columns: Vec<ColumnDescriptor> = frame
            .rows
            .iter()
            .map(|row| {
                let text = |idx: usize| match row.get(idx) {
                    Some(Scalar::Text(s)) => s.clone(),
                    _ => String::new(),
                };
                ColumnDescriptor::new(text(0), text(1), text(2) != "NO")
            })
            .collect();

        if columns.is_empty() {
            return Err(ProbeError::table_metadata(qualified, "table not found"));
        }

        Ok(TableHandle::new(schema, name, columns))
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        self.run(sql, &[]).await.map(RawResult::Tabular)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .query(&[("delete", "true")])
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| http::transport_error(KIND, &e))?;

        let _: serde_json::Value = http::read_json(KIND, response).await?;
        Ok(())
    }
}

/// Account identifiers may be bare (`xy12345.eu-west-1`) or full host names
fn base_url(account: &str) -> String {
    if account.starts_with("http://") || account.starts_with("https://") {
        account.trim_end_matches('/').to_string()
    } else if account.ends_with(".snowflakecomputing.com") {
        format!("https://{account}")
    } else {
        format!("https://{account}.snowflakecomputing.com")
    }
}

/// The login payload wants only the locator, without region or host suffix
fn account_name(account: &str) -> String {
    let host = account.trim_start_matches("https://").trim_start_matches("http://");
    host.split('.').next().unwrap_or(host).to_uppercase()
}

/// Chunk bodies are a comma-separated list of row arrays without the outer brackets
fn parse_chunk(body: &str) -> Result<Vec<Vec<Option<String>>>> {
    let trimmed = body.trim();
    let wrapped = if trimmed.starts_with("[[") || trimmed == "[]" {
        trimmed.to_string()
    } else {
        format!("[{trimmed}]")
    };
    serde_json::from_str(&wrapped)
        .map_err(|e| ProbeError::engine_error(KIND.as_str(), format!("Invalid result chunk: {e}")))
}

/// Split `secs.fraction` epoch text into whole seconds and nanoseconds
fn epoch_parts(text: &str) -> Option<(i64, u32)> {
    let nanos = (Decimal::from_str(text.trim()).ok()? * Decimal::from(1_000_000_000))
        .trunc()
        .to_i128()?;
    let secs = i64::try_from(nanos.div_euclid(1_000_000_000)).ok()?;
    let sub = u32::try_from(nanos.rem_euclid(1_000_000_000)).ok()?;
    Some((secs, sub))
}

fn decode_timestamp_tz(text: &str) -> Option<DateTime<FixedOffset>> {
    let (epoch, offset) = text.trim().split_once(' ')?;
    let (secs, nanos) = epoch_parts(epoch)?;
    // Offsets are shipped as minutes + 1440
    let minutes: i32 = offset.parse::<i32>().ok()? - 1440;
    let zone = FixedOffset::east_opt(minutes * 60)?;
    Some(DateTime::from_timestamp(secs, nanos)?.with_timezone(&zone))
}

/// Convert one Snowflake cell to a scalar
fn snowflake_value_to_scalar(value: Option<&str>, column: &RowType) -> Scalar {
    let Some(text) = value else {
        return Scalar::Null;
    };

    let decoded = match column.kind.to_ascii_lowercase().as_str() {
        "fixed" => match column.scale {
            Some(0) | None => text.parse().ok().map(Scalar::Int),
            Some(_) => None,
        }
        .or_else(|| Decimal::from_str(text).ok().map(Scalar::Decimal)),
        "real" => text.parse().ok().map(Scalar::Float),
        "boolean" => match text.to_ascii_lowercase().as_str() {
            "1" | "true" => Some(Scalar::Bool(true)),
            "0" | "false" => Some(Scalar::Bool(false)),
            _ => None,
        },
        "date" => text
            .parse::<i32>()
            .ok()
            .and_then(|days| NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE))
            .map(Scalar::Date),
        "time" => epoch_parts(text)
            .and_then(|(secs, nanos)| {
                NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(secs).ok()?, nanos)
            })
            .map(Scalar::Time),
        "timestamp_ntz" => epoch_parts(text)
            .and_then(|(secs, nanos)| DateTime::from_timestamp(secs, nanos))
            .map(|dt| Scalar::DateTime(dt.naive_utc())),
        "timestamp_ltz" => epoch_parts(text)
            .and_then(|(secs, nanos)| DateTime::from_timestamp(secs, nanos))
            .map(|dt| Scalar::DateTimeTz(dt.fixed_offset())),
        "timestamp_tz" => decode_timestamp_tz(text).map(Scalar::DateTimeTz),
        "binary" => from_hex(text).map(Scalar::Bytes),
        "variant" | "object" | "array" | "map" => serde_json::from_str(text).ok().map(Scalar::Json),
        _ => None,
    };

    decoded.unwrap_or_else(|| Scalar::Text(text.to_string()))
}

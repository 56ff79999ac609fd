//! `BigQuery` Connector Implementation
//!
//! # Features
//! - Project-scoped sessions (`project`, optional `location`)
//! - Credentials from `credentials_path`, `GOOGLE_APPLICATION_CREDENTIALS`, or the GCE
//!   metadata server when neither is set
//! - Service-account keys and authorized-user (refresh token) credential files
//! - Datasets are reported as schemas
//!
//! # Implementation Notes
//! - REST v2 over `reqwest`; service-account assertions are signed with `jsonwebtoken`
//! - `jobs.query` is followed by `getQueryResults` polling and paging
//! - Timestamps are requested as integer microseconds
//! - RECORD and REPEATED fields become nested JSON

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ConnectionParams;
use crate::engine::http::{self, MAX_POLLS};
use crate::engine::{
    required, BackendKind, Capability, ColumnDescriptor, Connector, Frame, RawResult, TableHandle,
};
use crate::error::{ProbeError, Result};
use crate::value::Scalar;

const KIND: BackendKind = BackendKind::BigQuery;
const API: &str = "https://bigquery.googleapis.com/bigquery/v2";
const SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const QUERY_TIMEOUT_MS: u64 = 30_000;

/// `BigQuery` connector
pub struct BigQueryConnector {
    http: Client,
    project: String,
    location: Option<String>,
    token: String,
}

/// Credential file contents, discriminated by its `type` field
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Credentials {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Field {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<Field>,
}

impl Field {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref().is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"))
    }

    fn is_required(&self) -> bool {
        self.mode.as_deref().is_some_and(|m| m.eq_ignore_ascii_case("REQUIRED"))
    }

    /// Type as shown in column listings (`ARRAY<INT64>`, `STRUCT<a INT64>`)
    fn display_type(&self) -> String {
        let base = if self.fields.is_empty() {
            self.kind.clone()
        } else {
            let inner: Vec<String> =
                self.fields.iter().map(|f| format!("{} {}", f.name, f.display_type())).collect();
            format!("STRUCT<{}>", inner.join(", "))
        };
        if self.is_repeated() {
            format!("ARRAY<{base}>")
        } else {
            base
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetEntry {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    schema: Option<Schema>,
}

impl BigQueryConnector {
    /// Obtain an access token for the configured project
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let project = required(params.project.as_deref(), "project", KIND)?.to_string();
        let http = http::client()?;

        let credentials_path = params
            .credentials_path
            .clone()
            .or_else(|| std::env::var_os(CREDENTIALS_ENV).map(PathBuf::from));

        let token = match credentials_path {
            Some(path) => {
                let credentials = load_credentials(&path)?;
                fetch_token(&http, &credentials).await?
            }
            None => metadata_token(&http).await?,
        };

        debug!(project = %project, "bigquery session ready");
        Ok(Self { http, project, location: params.location.clone(), token })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| http::transport_error(KIND, &e))?;
        http::read_json(KIND, response).await
    }

    /// Run a statement, wait for completion and read every page
    async fn run(&self, sql: &str) -> Result<Frame> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
            "formatOptions": { "useInt64Timestamp": true },
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let response = self
            .http
            .post(format!("{API}/projects/{}/queries", self.project))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(KIND, &e))?;
        let mut page: QueryResponse = http::read_json(KIND, response)
            .await
            .map_err(|e| ProbeError::query_failed(e.to_string()))?;

        let job = page.job_reference.clone();
        let mut schema = page.schema.take();
        let mut rows: Vec<TableRow> = Vec::new();
        let mut polls = 0;

        loop {
            if page.job_complete {
                if schema.is_none() {
                    schema = page.schema.take();
                }
                rows.append(&mut page.rows);
                if page.page_token.is_none() {
                    break;
                }
            }

            let Some(job) = job.as_ref() else {
                return Err(ProbeError::query_failed("BigQuery returned no job reference"));
            };
            polls += 1;
            if polls > MAX_POLLS {
                return Err(ProbeError::query_failed("BigQuery job did not finish in time"));
            }

            let timeout = QUERY_TIMEOUT_MS.to_string();
            let mut query: Vec<(&str, &str)> = vec![
                ("timeoutMs", timeout.as_str()),
                ("formatOptions.useInt64Timestamp", "true"),
            ];
            if let Some(location) = job.location.as_deref().or(self.location.as_deref()) {
                query.push(("location", location));
            }
            let token = page.page_token.take();
            if let Some(token) = token.as_deref() {
                query.push(("pageToken", token));
            }

            page = self
                .get(&format!("{API}/projects/{}/queries/{}", self.project, job.job_id), &query)
                .await
                .map_err(|e| ProbeError::query_failed(e.to_string()))?;
        }

        let fields = schema.map(|s| s.fields).unwrap_or_default();
        let columns = fields.iter().map(|f| f.name.clone()).collect();
        let values = rows
            .into_iter()
            .map(|row| {
                fields
                    .iter()
                    .zip(row.f)
                    .map(|(field, cell)| bigquery_value_to_scalar(&cell.v, field))
                    .collect()
            })
            .collect();

        Ok(Frame::new(columns, values))
    }
}

#[async_trait]
impl Connector for BigQueryConnector {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::ListSchemas)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>> {
        let url = format!("{API}/projects/{}/datasets", self.project);
        let mut names = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = Vec::new();
            if let Some(t) = token.as_deref() {
                query.push(("pageToken", t));
            }
            let page: DatasetList = self.get(&url, &query).await?;
            names.extend(page.datasets.into_iter().map(|d| d.dataset_reference.dataset_id));

            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(names)
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        let url = format!("{API}/projects/{}/datasets/{schema}/tables", self.project);
        let mut names = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = Vec::new();
            if let Some(t) = token.as_deref() {
                query.push(("pageToken", t));
            }
            let page: TableList = self
                .get(&url, &query)
                .await
                .map_err(|e| ProbeError::schema_enumeration(schema, e.to_string()))?;
            names.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));

            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        names.sort();
        Ok(names)
    }

    async fn table(&mut self, schema: &str, name: &str) -> Result<TableHandle> {
        let qualified = format!("{schema}.{name}");
        let url = format!("{API}/projects/{}/datasets/{schema}/tables/{name}", self.project);
        let resource: TableResource = self
            .get(&url, &[])
            .await
            .map_err(|e| ProbeError::table_metadata(&qualified, e.to_string()))?;

        let columns = resource
            .schema
            .unwrap_or_default()
            .fields
            .iter()
            .map(|f| ColumnDescriptor::new(&f.name, f.display_type(), !f.is_required()))
            .collect();

        Ok(TableHandle::new(schema, name, columns))
    }

    async fn raw_sql(&mut self, sql: &str) -> Result<RawResult> {
        self.run(sql).await.map(RawResult::Tabular)
    }
}

fn load_credentials(path: &Path) -> Result<Credentials> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ProbeError::connection_error(format!(
            "Failed to read credentials file {}: {e}",
            path.display()
        ))
    })?;
    parse_credentials(&contents)
}

fn parse_credentials(contents: &str) -> Result<Credentials> {
    serde_json::from_str(contents)
        .map_err(|e| ProbeError::connection_error(format!("Unsupported credentials file: {e}")))
}

/// Signed JWT assertion for the service-account token exchange
fn service_account_assertion(
    client_email: &str,
    private_key: &str,
    token_uri: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let iat = now.timestamp();
    let claims = Claims { iss: client_email, scope: SCOPE, aud: token_uri, iat, exp: iat + 3600 };
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(|e| ProbeError::connection_error(format!("Invalid service account key: {e}")))?;

    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| ProbeError::connection_error(format!("Failed to sign token request: {e}")))
}

async fn fetch_token(http: &Client, credentials: &Credentials) -> Result<String> {
    let request = match credentials {
        Credentials::ServiceAccount { client_email, private_key, token_uri } => {
            let assertion = service_account_assertion(client_email, private_key, token_uri, Utc::now())?;
            http.post(token_uri).form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
        }
        Credentials::AuthorizedUser { client_id, client_secret, refresh_token } => {
            http.post(DEFAULT_TOKEN_URI).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
        }
    };

    let response = request
        .send()
        .await
        .map_err(|e| ProbeError::connection_error(format!("Token request failed: {e}")))?;
    let token: TokenResponse = http::read_json(KIND, response)
        .await
        .map_err(|e| ProbeError::connection_error(e.to_string()))?;
    Ok(token.access_token)
}

async fn metadata_token(http: &Client) -> Result<String> {
    let response = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| {
            ProbeError::connection_error(format!(
                "No credentials configured and the metadata server is unreachable: {e}"
            ))
        })?;
    let token: TokenResponse = http::read_json(KIND, response)
        .await
        .map_err(|e| ProbeError::connection_error(e.to_string()))?;
    Ok(token.access_token)
}

/// Convert one `BigQuery` cell to a scalar
fn bigquery_value_to_scalar(value: &Value, field: &Field) -> Scalar {
    if value.is_null() {
        return Scalar::Null;
    }

    if field.is_repeated() {
        let element = Field { mode: None, ..field.clone() };
        let items = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| bigquery_value_to_scalar(&item["v"], &element).to_json())
                    .collect()
            })
            .unwrap_or_default();
        return Scalar::Json(Value::Array(items));
    }

    if !field.fields.is_empty() {
        let cells = value["f"].as_array().cloned().unwrap_or_default();
        let object = field
            .fields
            .iter()
            .zip(cells)
            .map(|(child, cell)| (child.name.clone(), bigquery_value_to_scalar(&cell["v"], child).to_json()))
            .collect();
        return Scalar::Json(Value::Object(object));
    }

    let Some(text) = value.as_str() else {
        return Scalar::Json(value.clone());
    };

    let decoded = match field.kind.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => text.parse().ok().map(Scalar::Int),
        "FLOAT" | "FLOAT64" => text.parse().ok().map(Scalar::Float),
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => {
            Decimal::from_str(text).ok().map(Scalar::Decimal)
        }
        "BOOLEAN" | "BOOL" => match text {
            "true" => Some(Scalar::Bool(true)),
            "false" => Some(Scalar::Bool(false)),
            _ => None,
        },
        "BYTES" => base64::engine::general_purpose::STANDARD.decode(text).ok().map(Scalar::Bytes),
        "DATE" => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(Scalar::Date),
        "DATETIME" => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(Scalar::DateTime),
        "TIME" => NaiveTime::parse_from_str(text, "%H:%M:%S%.f").ok().map(Scalar::Time),
        "TIMESTAMP" => parse_timestamp(text).map(|dt| Scalar::DateTimeTz(dt.fixed_offset())),
        "JSON" => serde_json::from_str(text).ok().map(Scalar::Json),
        _ => None,
    };

    decoded.unwrap_or_else(|| Scalar::Text(text.to_string()))
}

/// Integer microseconds, or float seconds from servers ignoring the format option
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(micros) = text.parse::<i64>() {
        return DateTime::from_timestamp_micros(micros);
    }
    let seconds: f64 = text.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}

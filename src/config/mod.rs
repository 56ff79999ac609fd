//! Configuration Management
//!
//! This module defines the connection payloads read from stdin and the registry of
//! named data sources that can be selected with `--source`.
//!
//! # Payloads
//! - [`DatabaseConfig`]: `{"type": "...", "name": "...", "include": [...], "exclude": [...], <params>}`
//! - [`QueryPayload`]: `{"config": {...}, "sql": "..."}`
//!
//! # Source Registry Locations
//! - Local: `.dbprobe/sources.json` (team-shareable, per-project)
//! - Global: `~/.config/dbprobe/sources.json` (per-user)
//!
//! Both files hold `{"databases": [DatabaseConfig, ...]}`. A local entry overrides a
//! global entry with the same name.
//!
//! # Environment Interpolation
//! Any string value in a registry file may contain `{{ env('VAR') }}`. Unset variables
//! become empty strings and are reported with a warning.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProbeError, Result};

/// Connection settings for one backend, as received on stdin
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseConfig {
    /// Backend kind tag (`duckdb`, `postgres`, `snowflake`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Optional display name, echoed by `test-connection`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Glob patterns over `schema.table`; empty admits everything
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Glob patterns over `schema.table`; a match always excludes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Backend-specific connection parameters
    #[serde(flatten)]
    pub params: ConnectionParams,
}

/// Backend-specific connection parameters
///
/// Every field is optional here; each adapter checks the ones it needs when connecting.
/// Unknown fields are ignored.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionParams {
    /// Database file (duckdb, sqlite)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Hostname (postgres, redshift, mysql, mssql) or server hostname (databricks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Snowflake account identifier (`xy12345.eu-central-1`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Default schema for session-scoped backends (snowflake, databricks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// BigQuery project id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Google credentials file (service account or authorized user)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,

    /// BigQuery job location (`EU`, `us-east1`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Databricks SQL warehouse HTTP path (`/sql/1.0/warehouses/<id>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,

    /// ODBC driver name (mssql); accepted for compatibility, the TDS client needs none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

impl DatabaseConfig {
    /// Minimal config for a backend kind with no parameters set
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            include: Vec::new(),
            exclude: Vec::new(),
            params: ConnectionParams::default(),
        }
    }

    /// Config for a file-backed engine (duckdb, sqlite)
    pub fn file(kind: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(kind);
        config.params.path = Some(path.into());
        config
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_filters(mut self, include: &[&str], exclude: &[&str]) -> Self {
        self.include = include.iter().map(ToString::to_string).collect();
        self.exclude = exclude.iter().map(ToString::to_string).collect();
        self
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.kind)
            .field("name", &self.name)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("params", &self.params)
            .finish()
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "<redacted>";
        f.debug_struct("ConnectionParams")
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("account", &self.account)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .field("schema", &self.schema)
            .field("project", &self.project)
            .field("credentials_path", &self.credentials_path)
            .field("location", &self.location)
            .field("http_path", &self.http_path)
            .field("token", &self.token.as_ref().map(|_| REDACTED))
            .field("catalog", &self.catalog)
            .field("driver", &self.driver)
            .finish()
    }
}

/// Payload of the `query` command
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryPayload {
    pub config: DatabaseConfig,
    pub sql: String,
}

/// Payload of `query --source NAME` (the config comes from the registry)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SqlPayload {
    pub sql: String,
}

/// Decode a stdin payload, reporting failures as `MalformedInput`
pub fn parse_payload<T: for<'de> Deserialize<'de>>(input: &str) -> Result<T> {
    serde_json::from_str(input).map_err(|e| ProbeError::malformed_input(e.to_string()))
}

/// Named data source registry (stored in `sources.json`)
///
/// Example:
/// ```json
/// {
///   "databases": [
///     { "name": "warehouse", "type": "duckdb", "path": "./data/warehouse.duckdb" },
///     { "name": "prod", "type": "postgres", "host": "db.internal", "database": "app",
///       "user": "reader", "password": "{{ env('PROD_DB_PASSWORD') }}" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

impl SourceRegistry {
    /// Find a source by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.name.as_deref() == Some(name))
    }

    /// Names of all registered sources, in file order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.databases.iter().filter_map(|db| db.name.as_deref()).collect()
    }

    /// Overlay `other` on top of `self`: same-named entries are replaced, new ones appended
    pub fn merge(&mut self, other: Self) {
        for source in other.databases {
            let existing = source
                .name
                .as_deref()
                .and_then(|name| self.databases.iter().position(|db| db.name.as_deref() == Some(name)));
            match existing {
                Some(idx) => self.databases[idx] = source,
                None => self.databases.push(source),
            }
        }
    }
}

/// Name and kind of a registered source, as listed by `dbprobe sources`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: ConfigLocation,
}

/// Registry file location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLocation {
    /// Local registry: `.dbprobe/sources.json`
    Local,
    /// Global registry: `~/.config/dbprobe/sources.json`
    Global,
}

/// Get path to the local registry (`.dbprobe/sources.json`)
pub fn local_sources_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        ProbeError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".dbprobe").join("sources.json"))
}

/// Get path to the global registry (`~/.config/dbprobe/sources.json`)
pub fn global_sources_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ProbeError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("dbprobe").join("sources.json"))
}

/// Load a registry file, interpolating `{{ env('VAR') }}` in every string value
///
/// A missing file is an empty registry.
pub fn load_sources(path: &Path) -> Result<SourceRegistry> {
    if !path.exists() {
        return Ok(SourceRegistry::default());
    }

    debug!(path = %path.display(), "loading source registry");
    let contents = fs::read_to_string(path)
        .map_err(|e| ProbeError::config_error(format!("Could not read source registry: {e}")))?;

    parse_sources(&contents, |var| std::env::var(var).ok())
}

/// Parse registry text with a caller-supplied variable lookup
pub fn parse_sources<F>(contents: &str, lookup: F) -> Result<SourceRegistry>
where
    F: Fn(&str) -> Option<String>,
{
    let mut raw: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| ProbeError::config_error(format!("Invalid source registry format: {e}")))?;

    interpolate_value(&mut raw, &lookup);

    serde_json::from_value(raw)
        .map_err(|e| ProbeError::config_error(format!("Invalid source registry format: {e}")))
}

/// Load both registries, local entries taking precedence over global ones
pub fn load_with_precedence() -> Result<SourceRegistry> {
    let global = load_sources(&global_sources_path()?)?;
    let local = load_sources(&local_sources_path()?)?;

    let mut merged = global;
    merged.merge(local);
    Ok(merged)
}

/// Resolve a named source from the merged registries
pub fn resolve_source(name: &str) -> Result<DatabaseConfig> {
    let registry = load_with_precedence()?;

    registry.get(name).cloned().ok_or_else(|| {
        ProbeError::config_error(format!(
            "Source '{name}' not found. Available sources: {:?}",
            registry.names()
        ))
    })
}

/// List every named source with the registry it comes from
pub fn list_sources() -> Result<Vec<SourceSummary>> {
    let global = load_sources(&global_sources_path()?)?;
    let local = load_sources(&local_sources_path()?)?;

    let mut summaries: Vec<SourceSummary> = Vec::new();
    for (location, registry) in [(ConfigLocation::Global, global), (ConfigLocation::Local, local)] {
        for source in registry.databases {
            let Some(name) = source.name else { continue };
            let summary = SourceSummary { name, kind: source.kind, location };
            match summaries.iter().position(|s| s.name == summary.name) {
                Some(idx) => summaries[idx] = summary,
                None => summaries.push(summary),
            }
        }
    }

    Ok(summaries)
}

fn env_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"\{\{\s*env\(\s*['"]([^'"]+)['"]\s*\)\s*\}\}"#).ok())
        .as_ref()
}

/// Replace every `{{ env('VAR') }}` occurrence in `text`
pub fn interpolate_env<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(pattern) = env_pattern() else {
        return text.to_string();
    };

    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            lookup(var).unwrap_or_else(|| {
                warn!(variable = var, "environment variable not set, using empty string");
                String::new()
            })
        })
        .into_owned()
}

fn interpolate_value<F>(value: &mut serde_json::Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_json::Value::String(s) => {
            if env_pattern().is_some_and(|re| re.is_match(s)) {
                *s = interpolate_env(s, lookup);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                interpolate_value(item, lookup);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_value(item, lookup);
            }
        }
        _ => {}
    }
}

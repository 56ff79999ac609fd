//! JSON Output Documents
//!
//! Every command writes exactly one JSON document per line.
//!
//! # Output Contract
//! - `introspect`: `{"schemas": [...]}` on stdout
//! - `query`: `[{"col": value, ...}, ...]` on stdout
//! - `test-connection`: `{"status": "ok"|"error", "type": "...", "name": "...", "error": "..."}` on stdout
//! - Any failure: `{"error": "...", "code": "..."}` on stderr, exit status 1

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::config::DatabaseConfig;
use crate::error::ProbeError;

/// Outcome of a connection test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// `"ok"` or `"error"`
    pub status: String,

    /// Backend kind tag as configured
    #[serde(rename = "type")]
    pub kind: String,

    /// Configured source name (`"unknown"` when absent), only on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Failure message, only on error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Successful probe
    pub fn ok(config: &DatabaseConfig) -> Self {
        Self {
            status: "ok".to_string(),
            kind: config.kind.clone(),
            name: Some(config.name.clone().unwrap_or_else(|| "unknown".to_string())),
            error: None,
        }
    }

    /// Failed probe
    pub fn error(config: &DatabaseConfig, err: &ProbeError) -> Self {
        Self {
            status: "error".to_string(),
            kind: config.kind.clone(),
            name: None,
            error: Some(err.message()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Error document written to stderr when a command fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDocument {
    /// Human-readable error message
    pub error: String,

    /// Stable error code (e.g., "CONNECTION_ERROR", "MALFORMED_INPUT")
    pub code: String,
}

impl ErrorDocument {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error: message.into(), code: code.into() }
    }

    pub fn from_error(err: &ProbeError) -> Self {
        Self::new(err.error_code(), err.message())
    }
}

/// Serialize `document` as one compact JSON line
pub fn write_document<W: Write, T: Serialize + ?Sized>(
    writer: &mut W,
    document: &T,
) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, document)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ok_status_defaults_name() {
        let status = ConnectionStatus::ok(&DatabaseConfig::new("duckdb"));
        assert!(status.is_ok());
        assert_eq!(status.name.as_deref(), Some("unknown"));
        assert!(status.error.is_none());
    }

    #[test]
    fn test_ok_status_document() {
        let config = DatabaseConfig::new("duckdb").with_name("warehouse");
        insta::assert_json_snapshot!(ConnectionStatus::ok(&config), @r#"
        {
          "status": "ok",
          "type": "duckdb",
          "name": "warehouse"
        }
        "#);
    }

    #[test]
    fn test_error_status_document() {
        let config = DatabaseConfig::new("postgres").with_name("prod");
        let err = ProbeError::connection_error("could not reach db.internal:5432");
        insta::assert_json_snapshot!(ConnectionStatus::error(&config, &err), @r#"
        {
          "status": "error",
          "type": "postgres",
          "error": "Connection failed: could not reach db.internal:5432"
        }
        "#);
    }

    #[test]
    fn test_error_document() {
        let doc = ErrorDocument::from_error(&ProbeError::malformed_input("EOF while parsing"));
        assert_eq!(doc.code, "MALFORMED_INPUT");
        assert_eq!(doc.error, "Invalid JSON input: EOF while parsing");
    }

    #[test]
    fn test_write_document_is_one_line() {
        let mut buffer = Vec::new();
        write_document(&mut buffer, &ErrorDocument::new("CONFIG_ERROR", "missing")).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "{\"error\":\"missing\",\"code\":\"CONFIG_ERROR\"}\n");
    }
}

//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout dbprobe.
//! All errors are structured and map to stable error codes for JSON output.
//!
//! # Error Categories
//! - `UnsupportedBackend`: The configured `type` is not a known (or compiled-in) backend
//! - `ConnectionError`: Opening a connector failed (unreachable host, bad credentials, missing fields)
//! - `SchemaEnumeration`: Listing tables in one schema failed (the schema is skipped)
//! - `TableMetadata`: Reading one table's column schema failed (the table carries an error)
//! - `QueryExecution`: Running SQL failed
//! - `MalformedInput`: The stdin payload could not be decoded
//! - `CapabilityUnavailable`: A connector was asked for something it does not offer
//! - `EngineError`: Backend-specific failure inside an adapter
//! - `ConfigError`: Named data source registry errors
//!
//! # Containment
//! Only `UnsupportedBackend`, `ConnectionError`, `MalformedInput` and `ConfigError` are fatal
//! for introspection. Schema and table failures are absorbed into the report.

use thiserror::Error;

/// Main error type for dbprobe operations
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The configured backend kind is not supported
    #[error("Unsupported database type: {kind}. Supported: [{supported}]")]
    UnsupportedBackend { kind: String, supported: String },

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    /// Listing tables of a schema failed
    #[error("Failed to enumerate schema '{schema}': {detail}")]
    SchemaEnumeration { schema: String, detail: String },

    /// Reading table metadata failed
    #[error("Failed to read table '{table}': {detail}")]
    TableMetadata { table: String, detail: String },

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    /// Payload could not be decoded or is missing required parameters
    #[error("Invalid JSON input: {0}")]
    MalformedInput(String),

    /// Connector does not offer the requested capability
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (source registry not found, invalid JSON, unknown name)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProbeError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedBackend { .. } => "UNSUPPORTED_BACKEND",
            Self::ConnectionError(_) => "CONNECTION_ERROR",
            Self::SchemaEnumeration { .. } => "SCHEMA_ENUMERATION_ERROR",
            Self::TableMetadata { .. } => "TABLE_METADATA_ERROR",
            Self::QueryExecution(_) => "QUERY_EXECUTION_ERROR",
            Self::MalformedInput(_) => "MALFORMED_INPUT",
            Self::CapabilityUnavailable(_) => "CAPABILITY_UNAVAILABLE",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Human-readable message, safe to include in JSON output
    ///
    /// Messages never contain passwords or tokens; adapters only echo host, database
    /// and driver error text.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create an unsupported backend error listing the supported kinds
    pub fn unsupported_backend(kind: impl Into<String>, supported: &[&str]) -> Self {
        let supported = supported.iter().map(|k| format!("'{k}'")).collect::<Vec<_>>().join(", ");
        Self::UnsupportedBackend { kind: kind.into(), supported }
    }

    /// Create a connection error
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError(message.into())
    }

    /// Create a schema enumeration error
    pub fn schema_enumeration(schema: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaEnumeration { schema: schema.into(), detail: detail.into() }
    }

    /// Create a table metadata error
    pub fn table_metadata(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TableMetadata { table: table.into(), detail: detail.into() }
    }

    /// Create a query execution error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryExecution(message.into())
    }

    /// Create a malformed input error
    pub fn malformed_input(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    /// Create a capability unavailable error
    pub fn capability_unavailable(message: impl Into<String>) -> Self {
        Self::CapabilityUnavailable(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for dbprobe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

//! dbprobe - Read-Only Database Introspection and Query CLI
//!
//! dbprobe connects to a SQL backend described by a JSON configuration, inspects what it
//! contains, runs ad-hoc SQL and checks connectivity. Every result is a JSON document.
//!
//! # Core Principles
//! - One uniform [`Connector`] contract over every backend
//! - Best-effort introspection: a failing schema or table never aborts the whole run
//! - JSON-only output, with one canonical rendering of every value ([`Scalar`])
//! - Nothing persists between commands (one connector per command, closed at the end)
//!
//! # Module Organization
//! - [`error`] - Error types and codes
//! - [`config`] - Payload types and named data sources
//! - [`engine`] - Connector trait, factory and backend adapters
//! - [`filter`] - Include/exclude glob matching
//! - [`introspect`] - Catalog construction
//! - [`query`] - Ad-hoc SQL with strategy fallback
//! - [`connection`] - Connectivity check
//! - [`value`] - Scalars and row records
//! - [`output`] - Output documents
//! - [`logging`] - stderr tracing setup

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod filter;
pub mod introspect;
pub mod logging;
pub mod output;
pub mod query;
pub mod value;

pub use config::{resolve_source, DatabaseConfig, QueryPayload};
pub use connection::test_connection;
pub use engine::{connect, BackendKind, Connector};
pub use error::{ProbeError, Result};
pub use filter::PatternFilter;
pub use introspect::{introspect, Catalog};
pub use output::{ConnectionStatus, ErrorDocument};
pub use query::query;
pub use value::{Record, Scalar};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_exports() {
        let config = DatabaseConfig::new("duckdb");
        let _filter = PatternFilter::from_config(&config);
        assert_eq!(Scalar::Null.to_json(), serde_json::Value::Null);
        assert!("oracle".parse::<BackendKind>().is_err());
    }
}

//! Connectivity check
//!
//! Opens a connector, runs a trivial statement and reports the outcome as a status
//! document. This operation never fails: every error becomes `status: "error"`.

use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::engine::{self, BackendKind};
use crate::error::Result;
use crate::output::ConnectionStatus;

/// Probe the configured backend
pub async fn test_connection(config: &DatabaseConfig) -> ConnectionStatus {
    match probe(config).await {
        Ok(()) => {
            info!(kind = %config.kind, "connection ok");
            ConnectionStatus::ok(config)
        }
        Err(e) => {
            warn!(kind = %config.kind, error = %e, "connection test failed");
            ConnectionStatus::error(config, &e)
        }
    }
}

async fn probe(config: &DatabaseConfig) -> Result<()> {
    let kind: BackendKind = config.kind.parse()?;
    let mut connector = engine::connect(config).await?;

    let outcome = connector.raw_sql(kind.ping_sql()).await.map(|_| ());
    let closed = connector.close().await;

    outcome.and(closed)
}

//! Shared HTTP plumbing for the REST warehouse adapters

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::engine::BackendKind;
use crate::error::{ProbeError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between polls of a long-running statement
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on polls before a statement is reported as timed out
pub const MAX_POLLS: usize = 600;

/// Build the HTTP client used for one connector session
pub fn client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("dbprobe/", env!("CARGO_PKG_VERSION")))
        .gzip(true)
        .build()
        .map_err(|e| ProbeError::connection_error(format!("Failed to build HTTP client: {e}")))
}

/// Decode a JSON response body, turning HTTP failures into engine errors
///
/// Error bodies are kept (truncated) since warehouses put the useful message there.
pub async fn read_json<T: DeserializeOwned>(kind: BackendKind, response: Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProbeError::engine_error(
            kind.as_str(),
            format!("HTTP {status}: {}", truncate(&body, 512)),
        ));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProbeError::engine_error(kind.as_str(), format!("Invalid response body: {e}")))
}

/// Map a transport failure
pub fn transport_error(kind: BackendKind, err: &reqwest::Error) -> ProbeError {
    ProbeError::engine_error(kind.as_str(), format!("Request failed: {err}"))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ééé", 2), "éé");
    }

    #[test]
    fn test_client_builds() {
        assert!(client().is_ok());
    }
}

//! Logging setup for the CLI
//!
//! Logs go to stderr so stdout carries nothing but JSON documents.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::{ProbeError, Result};

/// Environment variable overriding the verbosity flags (`EnvFilter` syntax)
pub const LOG_ENV: &str = "DBPROBE_LOG";

/// Map `-q` / `-v` flags to a level
///
/// * `quiet` - only ERROR
/// * `verbose` - 0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE
#[must_use]
pub const fn level_for(verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::INFO,
        (false, 2) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Initialize structured logging on stderr
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| ProbeError::config_error(format!("Failed to initialize logging: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    // Logging can only be initialized once per test process, so only the level mapping
    // is checked here.
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        let cases = [
            ((true, 0), Level::ERROR),
            ((true, 5), Level::ERROR),
            ((false, 0), Level::WARN),
            ((false, 1), Level::INFO),
            ((false, 2), Level::DEBUG),
            ((false, 9), Level::TRACE),
        ];

        for ((quiet, verbose), expected) in cases {
            assert_eq!(level_for(verbose, quiet), expected, "quiet={quiet}, verbose={verbose}");
        }
    }
}

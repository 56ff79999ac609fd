//! dbprobe CLI Entry Point
//!
//! Subcommands:
//! - `introspect` - Catalog of schemas, tables, columns, row counts and previews
//! - `query` - Run ad-hoc SQL and print the rows
//! - `test-connection` - Connectivity check, always answered with a status document
//! - `sources` - List named data sources
//! - `schema` - JSON schema of a command's stdin payload (hidden)
//!
//! Payloads are read from stdin unless `--source` names a registered data source.
//! All output to stdout is JSON-only. Logs and error documents go to stderr.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use dbprobe::config::{self, parse_payload, DatabaseConfig, QueryPayload, SqlPayload};
use dbprobe::output::{write_document, ErrorDocument};
use dbprobe::{logging, ProbeError};

/// dbprobe - read-only database introspection and query CLI
#[derive(Parser)]
#[command(name = "dbprobe")]
#[command(about = "Inspect SQL backends and run ad-hoc queries, with JSON output")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect schemas, tables and columns
    Introspect {
        /// Named data source (otherwise the config is read from stdin)
        #[arg(long)]
        source: Option<String>,
    },

    /// Execute a SQL statement and print its rows
    Query {
        /// Named data source (otherwise `{config, sql}` is read from stdin)
        #[arg(long)]
        source: Option<String>,

        /// SQL text, used with --source instead of a stdin `{sql}` payload
        #[arg(long, requires = "source")]
        sql: Option<String>,
    },

    /// Check that the backend is reachable
    TestConnection {
        /// Named data source (otherwise the config is read from stdin)
        #[arg(long)]
        source: Option<String>,
    },

    /// List named data sources
    Sources,

    /// Print the JSON schema of a command's stdin payload
    #[command(hide = true)]
    Schema {
        #[arg(value_enum)]
        target: SchemaTarget,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaTarget {
    Introspect,
    Query,
    TestConnection,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose, cli.quiet) {
        eprintln!("{e}");
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Introspect { source } => {
            let config = load_config(source.as_deref())?;
            let catalog = dbprobe::introspect(&config).await?;
            tracing::info!(tables = catalog.table_count(), "introspection finished");
            emit(&catalog)
        }
        Commands::Query { source, sql } => {
            let (config, sql) = match source {
                Some(name) => {
                    let config = config::resolve_source(&name)?;
                    let sql = match sql {
                        Some(sql) => sql,
                        None => parse_payload::<SqlPayload>(&read_stdin()?)?.sql,
                    };
                    (config, sql)
                }
                None => {
                    let payload: QueryPayload = parse_payload(&read_stdin()?)?;
                    (payload.config, payload.sql)
                }
            };
            let rows = dbprobe::query(&config, &sql).await?;
            tracing::info!(rows = rows.len(), "query finished");
            emit(&rows)
        }
        Commands::TestConnection { source } => {
            let config = load_config(source.as_deref())?;
            emit(&dbprobe::test_connection(&config).await)
        }
        Commands::Sources => emit(&config::list_sources()?),
        Commands::Schema { target } => {
            let schema = match target {
                SchemaTarget::Introspect | SchemaTarget::TestConnection => {
                    schemars::schema_for!(DatabaseConfig)
                }
                SchemaTarget::Query => schemars::schema_for!(QueryPayload),
            };
            emit(&schema)
        }
    }
}

/// Config from the registry when a source is named, from stdin otherwise
fn load_config(source: Option<&str>) -> anyhow::Result<DatabaseConfig> {
    let config = match source {
        Some(name) => config::resolve_source(name)?,
        None => parse_payload(&read_stdin()?)?,
    };
    Ok(config)
}

fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| ProbeError::malformed_input(format!("Could not read stdin: {e}")))?;
    Ok(input)
}

fn emit<T: Serialize + ?Sized>(document: &T) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_document(&mut handle, document).context("Failed to write output")
}

/// Error document on stderr
fn report(err: &anyhow::Error) {
    let document = match err.downcast_ref::<ProbeError>() {
        Some(probe) => ErrorDocument::from_error(probe),
        None => ErrorDocument::new("INTERNAL_ERROR", format!("{err:#}")),
    };

    let stderr = io::stderr();
    let mut handle = stderr.lock();
    if write_document(&mut handle, &document).is_err() {
        let _ = writeln!(handle, "{err:#}");
    }
}

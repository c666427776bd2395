//! Command-line interface for deferql.
//!
//! # Usage
//!
//! ```bash
//! # Serve the operations of a fixture over HTTP
//! deferql serve --fixture demos/fixtures/profile.json --port 4000
//!
//! # Print the chunk stream of an operation
//! deferql replay demos/fixtures/profile.json --operation Profile
//!
//! # Same, framed exactly as the HTTP body
//! deferql replay demos/fixtures/profile.json --raw --max-nested-rounds 2
//! ```

mod fixture;

pub use fixture::Fixture;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use deferql_runtime::{
    DeferOverrides, EmitError, ExecutionOutcome, MultipartEncoder, RoundChunk, StreamEmitter,
};
use deferql_server::ServerConfig;
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "deferql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Deferral budgets given on the command line.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct BudgetArgs {
    /// Time budget for deferred rounds in milliseconds (0 disables)
    #[arg(long)]
    pub max_execution_ms: Option<u64>,

    /// Nesting budget for deferred rounds (0 disables)
    #[arg(long)]
    pub max_nested_rounds: Option<usize>,
}

impl BudgetArgs {
    pub fn overrides(&self) -> DeferOverrides {
        DeferOverrides {
            max_execution_ms: self.max_execution_ms,
            max_nested_rounds: self.max_nested_rounds,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Fixture with the operations to serve
        #[arg(short, long)]
        fixture: PathBuf,

        /// Server configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        budgets: BudgetArgs,
    },

    /// Run an operation of a fixture and print its chunks
    Replay {
        /// Fixture file
        fixture: PathBuf,

        /// Operation to run (defaults to the first one)
        #[arg(short, long)]
        operation: Option<String>,

        /// Print the multipart body instead of annotated rounds
        #[arg(long)]
        raw: bool,

        #[command(flatten)]
        budgets: BudgetArgs,
    },
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn Error>> {
    match cli.command {
        Commands::Serve {
            fixture,
            config,
            host,
            port,
            budgets,
        } => {
            let config = server_config(config.as_deref(), host, port, &budgets)?;
            let server = Fixture::load(&fixture)?.server(config)?;

            let names: Vec<&str> = server.operation_names().collect();
            println!(
                "{} {} operation(s): {}",
                "Serving".green().bold(),
                names.len(),
                names.join(", ")
            );
            server.listen().await?;
            Ok(0)
        }
        Commands::Replay {
            fixture,
            operation,
            raw,
            budgets,
        } => {
            let fixture = Fixture::load(&fixture)?;
            let mut printer = ChunkPrinter::new(std::io::stdout(), raw);
            replay(&fixture, operation.as_deref(), &budgets.overrides(), &mut printer).await
        }
    }
}

/// Loads the config file, if any, and applies command-line flags on top.
fn server_config(
    path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
    budgets: &BudgetArgs,
) -> Result<ServerConfig, Box<dyn Error>> {
    let mut config: ServerConfig = match path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = host {
        config = config.host(host);
    }
    if let Some(port) = port {
        config = config.port(port);
    }
    config.defer = config.defer.with_overrides(&budgets.overrides());
    Ok(config)
}

/// Runs one operation of `fixture`, writing every chunk to `printer`.
///
/// Returns exit code 1 when the operation was rejected before execution.
pub async fn replay<W: Write + Send>(
    fixture: &Fixture,
    operation: Option<&str>,
    overrides: &DeferOverrides,
    printer: &mut ChunkPrinter<W>,
) -> Result<i32, Box<dyn Error>> {
    let server = fixture.server(ServerConfig::default())?;
    let operation = operation.or_else(|| fixture.default_operation());

    match server
        .execute_with(operation, fixture.variables.clone(), overrides)
        .await?
    {
        ExecutionOutcome::Complete(response) => {
            let rejected = response.data.is_none() && response.has_errors();
            printer
                .emit(RoundChunk {
                    round: 0,
                    result: response,
                    resolved: Vec::new(),
                    is_final: true,
                })
                .await?;
            Ok(if rejected { 1 } else { 0 })
        }
        ExecutionOutcome::Streaming(stream) => {
            let report = stream.run(printer).await?;
            info!(
                rounds = report.scheduled_rounds,
                drained = report.drained,
                resolved = report.resolved_paths,
                stop = ?report.stop,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "replay finished"
            );
            Ok(0)
        }
    }
}

/// Writes chunks to a terminal or any other writer.
pub struct ChunkPrinter<W> {
    out: W,
    encoder: MultipartEncoder,
    raw: bool,
}

impl<W: Write + Send> ChunkPrinter<W> {
    pub fn new(out: W, raw: bool) -> Self {
        Self {
            out,
            encoder: MultipartEncoder::new(),
            raw,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn format_round(chunk: &RoundChunk) -> Result<String, EmitError> {
    let title = if chunk.round == 0 {
        "Initial response".to_string()
    } else {
        format!("Round {}", chunk.round)
    };

    let mut text = format!("{}\n", title.cyan().bold());
    for path in &chunk.resolved {
        text.push_str(&format!("  {} {}\n", "resolved".green(), path));
    }
    text.push_str(&serde_json::to_string_pretty(&chunk.payload())?);
    text.push('\n');
    if chunk.is_final {
        text.push_str(&format!("{}\n", "Done".green().bold()));
    }
    Ok(text)
}

#[async_trait]
impl<W: Write + Send> StreamEmitter for ChunkPrinter<W> {
    async fn emit(&mut self, chunk: RoundChunk) -> Result<(), EmitError> {
        let text = if self.raw {
            self.encoder.encode(&chunk)?
        } else {
            format_round(&chunk)?
        };
        self.out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|_| EmitError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "operations": {
            "Profile": {
                "root": {
                    "kind": "field",
                    "info": {"name": "user", "parentType": "Query", "type": "User"},
                    "children": {
                        "kind": "parallel",
                        "nodes": [
                            {"kind": "leaf", "field": {
                                "name": "name",
                                "parentType": "User",
                                "type": "String"
                            }},
                            {"kind": "leaf", "field": {
                                "name": "bio",
                                "parentType": "User",
                                "type": "String",
                                "nodes": [{"annotations": [{"directive": "defer"}]}]
                            }}
                        ]
                    }
                }
            },
            "Broken": {
                "root": {"kind": "leaf", "field": {
                    "name": "id",
                    "parentType": "Query",
                    "type": "ID!",
                    "nodes": [{"annotations": [{"directive": "defer"}]}]
                }}
            }
        },
        "root": {"user": {"name": "Alice", "bio": "Hello"}},
        "latency": {"User.bio": 5}
    }"#;

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_replay_args() {
        let cli = Cli::try_parse_from([
            "deferql",
            "replay",
            "profile.json",
            "--raw",
            "--max-nested-rounds",
            "2",
        ])
        .unwrap();

        let Commands::Replay {
            fixture,
            operation,
            raw,
            budgets,
        } = cli.command
        else {
            panic!("expected replay");
        };
        assert_eq!(fixture, PathBuf::from("profile.json"));
        assert!(operation.is_none());
        assert!(raw);
        assert_eq!(
            budgets.overrides(),
            DeferOverrides {
                max_execution_ms: None,
                max_nested_rounds: Some(2),
            }
        );
    }

    #[test]
    fn test_flags_override_defaults() {
        let budgets = BudgetArgs {
            max_execution_ms: Some(250),
            max_nested_rounds: None,
        };
        let config =
            server_config(None, Some("0.0.0.0".to_string()), Some(8080), &budgets).unwrap();
        assert_eq!(config.address(), "0.0.0.0:8080");
        assert_eq!(config.defer.max_execution_ms, 250);
        assert_eq!(config.defer.max_nested_rounds, 0);
    }

    #[tokio::test]
    async fn test_replay_raw() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let mut printer = ChunkPrinter::new(Vec::new(), true);

        let code = replay(&fixture, None, &DeferOverrides::default(), &mut printer)
            .await
            .unwrap();
        assert_eq!(code, 0);

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert!(out.starts_with("---\r\nContent-Type: application/json; charset=utf-8\r\n\r\n"));
        assert!(out.contains(r#"{"data":{"user":{"name":"Alice"}},"hasNext":true}"#));
        assert!(out.contains(r#""incremental":[{"path":["user","bio"],"data":"Hello"}]"#));
        assert!(out.ends_with("\r\n-----\r\n"));
    }

    #[tokio::test]
    async fn test_replay_rounds() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let mut printer = ChunkPrinter::new(Vec::new(), false);

        replay(&fixture, Some("Profile"), &DeferOverrides::default(), &mut printer)
            .await
            .unwrap();

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert!(out.contains("Initial response"));
        assert!(out.contains("Round 1"));
        assert!(out.contains("user.bio"));
        assert!(out.contains("Done"));
    }

    #[tokio::test]
    async fn test_replay_rejected_operation() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let mut printer = ChunkPrinter::new(Vec::new(), true);

        let code = replay(&fixture, Some("Broken"), &DeferOverrides::default(), &mut printer)
            .await
            .unwrap();
        assert_eq!(code, 1);

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert!(out.contains("DEFER_NON_NULLABLE_FIELD"));
        assert!(out.contains(r#""hasNext":false"#));
    }

    #[tokio::test]
    async fn test_replay_unknown_operation() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let mut printer = ChunkPrinter::new(Vec::new(), true);

        let err = replay(&fixture, Some("Missing"), &DeferOverrides::default(), &mut printer)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing"));
    }
}

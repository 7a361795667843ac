//! # Repo Explainer CLI (`rex`)
//!
//! ## Usage
//!
//! ```bash
//! rex --config ./config/rex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rex analyze <path\|url>` | Run the full analysis pipeline |
//! | `rex schema <dir>` | Fold SQL migrations into a schema (no LLM) |
//! | `rex cache clear` | Remove cached summaries |
//! | `rex serve` | Start the HTTP streaming server |
//!
//! ## Examples
//!
//! ```bash
//! # Analyze a local checkout, human progress on stderr
//! rex analyze ./services/billing
//!
//! # Analyze a private repository, NDJSON events on stdout
//! rex analyze https://github.com/acme/shop --token "$GITHUB_TOKEN" --json
//!
//! # Render the ERD of a migrations directory
//! rex schema ./db/migrations --format erd
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use repo_explainer::cache::{CacheKind, SummaryCache};
use repo_explainer::config::{self, Config};
use repo_explainer::ddl::{self, Migration};
use repo_explainer::llm::OpenAiChatClient;
use repo_explainer::orchestrator::{Orchestrator, Target};
use repo_explainer::progress::{self, ProgressMode};
use repo_explainer::server;

/// Repo Explainer: map/reduce repository analysis with LLM summaries,
/// schema extraction and service discovery.
#[derive(Parser)]
#[command(
    name = "rex",
    about = "Repo Explainer: map/reduce repository analysis",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/rex.toml")]
    config: PathBuf,

    /// Debug-level logs on stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a local directory or a git URL.
    ///
    /// Prints the aggregated result as JSON on stdout. With `--json` the
    /// progress events themselves are streamed on stdout as NDJSON and the
    /// final `complete` event carries the result.
    Analyze {
        /// Local path or git URL (https://, ssh://, git@).
        target: String,

        /// Access token for private HTTPS repositories.
        #[arg(long, env = "REX_GIT_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Stream NDJSON progress events on stdout.
        #[arg(long)]
        json: bool,

        /// Bypass the summary cache for this run.
        #[arg(long)]
        no_cache: bool,

        /// Also write the result JSON to this file.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Fold the SQL migrations under a directory into one schema.
    ///
    /// Every `.sql` file below `dir` is a migration, named by its file
    /// name and applied in name order.
    Schema {
        dir: PathBuf,

        #[arg(long, value_enum, default_value_t = SchemaFormat::Erd)]
        format: SchemaFormat,
    },

    /// Manage the summary cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove cached summaries, optionally of one kind only.
    Clear {
        /// `file`, `folder` or `project`.
        #[arg(long, value_parser = parse_kind)]
        kind: Option<CacheKind>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemaFormat {
    /// Mermaid erDiagram.
    Erd,
    /// Consolidated migration.
    Sql,
    /// Canonical schema plus warnings.
    Json,
}

fn parse_kind(s: &str) -> Result<CacheKind, String> {
    CacheKind::parse(s).ok_or_else(|| format!("unknown cache kind '{}'", s))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Analyze {
            target,
            token,
            json,
            no_cache,
            output,
        } => {
            if no_cache {
                cfg.cache.enabled = false;
            }
            run_analyze(cfg, &target, token, json, output.as_deref()).await?;
        }
        Commands::Schema { dir, format } => {
            run_schema(&dir, format)?;
        }
        Commands::Cache {
            action: CacheAction::Clear { kind },
        } => {
            let cache = SummaryCache::from_config(&cfg.cache);
            let removed = match kind {
                Some(kind) => cache.clear(kind).await?,
                None => cache.clear_all().await?,
            };
            println!("Removed {} cache entries from {}", removed, cache.dir().display());
        }
        Commands::Serve => {
            let client = OpenAiChatClient::new(&cfg.llm)?;
            server::run_server(&cfg, Arc::new(client)).await?;
        }
    }

    Ok(())
}

async fn run_analyze(
    cfg: Config,
    target: &str,
    token: Option<String>,
    json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let client = OpenAiChatClient::new(&cfg.llm)?;
    let (sink, mut stream) = progress::channel(cfg.pipeline.bus_capacity);
    let orchestrator = Orchestrator::new(cfg, Arc::new(client));
    let ctx = orchestrator.context();

    let interrupt = ctx.token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mode = if json {
        ProgressMode::Json
    } else {
        ProgressMode::default_for_tty()
    };
    let reporter = mode.reporter();
    let consumer = tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            reporter.report(&event);
        }
    });

    let outcome = orchestrator
        .run(&ctx, Target::parse(target, token), sink)
        .await;
    let _ = consumer.await;
    let result = outcome?;

    let rendered = serde_json::to_string_pretty(&result)?;
    if let Some(path) = output {
        std::fs::write(path, &rendered)
            .with_context(|| format!("Failed to write result: {}", path.display()))?;
    }
    if !json {
        println!("{}", rendered);
    }
    Ok(())
}

fn run_schema(dir: &Path, format: SchemaFormat) -> Result<()> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let mut migrations = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let path = entry.path();
        let is_sql = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("sql"));
        if !entry.file_type().is_file() || !is_sql {
            continue;
        }
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        migrations.push(Migration::new(name, sql));
    }

    let report = ddl::reduce(migrations).into_report()?;
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    match format {
        SchemaFormat::Erd => print!("{}", report.erd),
        SchemaFormat::Sql => print!("{}", report.final_migration),
        SchemaFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

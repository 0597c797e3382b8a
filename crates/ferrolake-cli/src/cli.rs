//! CLI argument definitions for ferrolake.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Run one provider's pipeline and print the run report |
//! | `sources` | List providers with their configured scope and stages |
//! | `path` | Print the snapshot path a run at a given instant writes to |
//! | `sql` | Query the landing warehouse |
//!
//! # Examples
//!
//! ```bash
//! # Scheduled run (cron, systemd timer)
//! ferrolake run binance --config /etc/ferrolake.toml
//!
//! # Where did the 14:30 run land?
//! ferrolake path binance --at 2024-03-05T14:30:00Z
//!
//! # Inspect landed rows
//! ferrolake sql "SELECT symbol, last_price FROM raw_binance LIMIT 5" --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ferrolake_core::{LogFormat, LogLevel, ProviderId};

/// Ferrolake - extract provider data into a partitioned lake and load it
/// into the warehouse.
#[derive(Debug, Parser)]
#[command(
    name = "ferrolake",
    author,
    version,
    about = "Multi-source extraction and landing pipeline",
    long_about = "Ferrolake pulls data from the Binance, YouTube and GitHub APIs, lands each \
run as an immutable Parquet snapshot, bulk-loads it into DuckDB and triggers the \
downstream transformation.\n\
\n\
Use 'ferrolake <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pipeline configuration file. Defaults to ./ferrolake.toml when present.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Overrides the configured log level.
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LevelArg>,

    /// Emit logs on stderr as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.map(LevelArg::into_level)
    }

    pub fn log_format(&self) -> Option<LogFormat> {
        self.log_json.then_some(LogFormat::Json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LevelArg {
    const fn into_level(self) -> LogLevel {
        match self {
            Self::Trace => LogLevel::Trace,
            Self::Debug => LogLevel::Debug,
            Self::Info => LogLevel::Info,
            Self::Warn => LogLevel::Warn,
            Self::Error => LogLevel::Error,
        }
    }
}

/// Provider selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Exchange market snapshots.
    Binance,
    /// Channel uploads and statistics.
    Youtube,
    /// Trending repositories per language.
    Github,
}

impl SourceArg {
    pub const fn provider(self) -> ProviderId {
        match self {
            Self::Binance => ProviderId::Binance,
            Self::Youtube => ProviderId::Youtube,
            Self::Github => ProviderId::Github,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the extract, write, load and transform stages for one provider.
    ///
    /// Prints the run report as JSON. Exits 0 when the run succeeds and 3
    /// when it fails.
    ///
    /// # Examples
    ///
    ///   ferrolake run binance
    ///   ferrolake run github --config ferrolake.toml --pretty
    Run(RunArgs),

    /// List providers, their configured scope and enabled stages.
    Sources(SourcesArgs),

    /// Print the snapshot path for a provider and extraction instant.
    ///
    /// # Examples
    ///
    ///   ferrolake path binance --at 2024-03-05T14:30:00Z
    Path(PathArgs),

    /// Run SQL against the landing warehouse.
    ///
    /// Read-only unless --write is given. Results are capped at --max-rows.
    ///
    /// # Examples
    ///
    ///   ferrolake sql "SELECT COUNT(*) FROM raw_github"
    ///   ferrolake sql "SELECT * FROM load_history ORDER BY loaded_at DESC LIMIT 10"
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(value_enum)]
    pub source: SourceArg,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// Include rate and retry details.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Args)]
pub struct PathArgs {
    #[arg(value_enum)]
    pub source: SourceArg,

    /// RFC3339 UTC instant, e.g. 2024-03-05T14:30:00Z. Defaults to now.
    #[arg(long)]
    pub at: Option<String>,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// SQL query to execute.
    pub query: String,

    /// Allow write statements.
    #[arg(long, default_value_t = false)]
    pub write: bool,

    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 10_000)]
    pub max_rows: usize,

    /// Query timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub query_timeout_ms: u64,
}

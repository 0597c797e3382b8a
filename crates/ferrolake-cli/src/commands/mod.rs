mod path;
mod run;
mod sources;
mod sql;

use ferrolake_core::PipelineConfig;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Rendered payload plus whether the command should exit non-zero.
pub struct CommandResult {
    pub data: Value,
    pub failed: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self { data, failed: false }
    }

    pub fn failed(data: Value) -> Self {
        Self { data, failed: true }
    }
}

pub async fn run(cli: &Cli, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    match &cli.command {
        Command::Run(args) => run::run(args, config).await,
        Command::Sources(args) => sources::run(args, config),
        Command::Path(args) => path::run(args),
        Command::Sql(args) => sql::run(args, config).await,
    }
}

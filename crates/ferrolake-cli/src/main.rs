mod cli;
mod commands;
mod error;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use ferrolake_core::{init_logging, PipelineConfig};

use crate::cli::Cli;
use crate::error::CliError;

const DEFAULT_CONFIG: &str = "ferrolake.toml";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    let mut config = resolve_config(cli.config.as_deref(), |key| std::env::var(key).ok())?;
    if let Some(level) = cli.log_level() {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format() {
        config.logging.format = format;
    }
    init_logging(&config.logging)?;

    let result = commands::run(&cli, &config).await?;
    output::render(&result.data, cli.pretty)?;

    if result.failed {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}

/// Loads the file, overlays the environment and validates the result.
fn resolve_config(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PipelineConfig, CliError> {
    let mut config = load_config(explicit)?;
    config.apply_env(lookup);
    config.validate()?;
    Ok(config)
}

/// An explicit `--config` must exist; the default file is optional.
fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig, CliError> {
    if let Some(path) = explicit {
        return Ok(PipelineConfig::from_file(path)?);
    }

    let default_path = PathBuf::from(DEFAULT_CONFIG);
    if default_path.is_file() {
        Ok(PipelineConfig::from_file(default_path)?)
    } else {
        Ok(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");

        let error = load_config(Some(&dir.path().join("absent.toml"))).expect_err("missing file");

        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn explicit_config_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ferrolake.toml");
        std::fs::write(&path, "[providers.binance]\nsymbols = [\"solusdt\"]\n").expect("write config");

        let config = load_config(Some(&path)).expect("valid config");

        assert_eq!(config.providers.binance.symbols, vec![String::from("solusdt")]);
    }

    #[test]
    fn environment_overlay_is_validated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ferrolake.toml");
        std::fs::write(&path, "").expect("write config");

        let error = resolve_config(Some(&path), |key| {
            (key == "AWS_ACCESS_KEY_ID").then(|| String::from("AKIA-test"))
        })
        .expect_err("secret key missing");

        assert_eq!(error.exit_code(), 2);
    }
}

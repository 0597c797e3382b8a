use ferrolake_core::{partition_path, UtcDateTime};
use serde_json::json;

use crate::cli::PathArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(args: &PathArgs) -> Result<CommandResult, CliError> {
    let extracted_at = match args.at.as_deref() {
        Some(raw) => UtcDateTime::parse(raw)?,
        None => UtcDateTime::now(),
    }
    .truncate_to_seconds();

    let provider = args.source.provider();
    Ok(CommandResult::ok(json!({
        "provider": provider,
        "extracted_at": extracted_at,
        "path": partition_path(provider, extracted_at),
    })))
}

use ferrolake_core::PipelineConfig;
use ferrolake_warehouse::{QueryGuardrails, Warehouse};

use crate::cli::SqlArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &SqlArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let query = args.query.trim().to_owned();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }

    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };
    let allow_write = args.write;
    let warehouse_config = config.warehouse_config();

    let result = tokio::task::spawn_blocking(move || {
        let warehouse = Warehouse::open(warehouse_config)?;
        warehouse.execute_query(&query, guardrails, allow_write)
    })
    .await
    .map_err(|error| CliError::Command(format!("query task aborted: {error}")))??;

    if result.truncated {
        tracing::warn!(
            rows = result.row_count,
            "result truncated (use --max-rows to increase the limit)"
        );
    }

    Ok(CommandResult::ok(serde_json::to_value(&result)?))
}

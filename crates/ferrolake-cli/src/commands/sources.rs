use ferrolake_core::{PipelineConfig, ProviderId};
use serde::Serialize;

use crate::cli::SourcesArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourceEntry {
    provider: ProviderId,
    raw_table: String,
    scope: Vec<String>,
    /// Why the configured scope cannot run, if it cannot.
    #[serde(skip_serializing_if = "Option::is_none")]
    scope_error: Option<String>,
    stages: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<SourceDetails>,
}

#[derive(Debug, Serialize)]
struct SourceDetails {
    min_interval_ms: u128,
    request_timeout_ms: u64,
    max_pages: u32,
    extract_max_retries: u32,
}

pub fn run(args: &SourcesArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let entries = ProviderId::ALL
        .into_iter()
        .map(|provider| describe(provider, config, args.verbose))
        .collect::<Vec<_>>();

    Ok(CommandResult::ok(serde_json::to_value(entries)?))
}

fn describe(provider: ProviderId, config: &PipelineConfig, verbose: bool) -> SourceEntry {
    let (scope, scope_error) = match config.request_for(provider) {
        Ok(request) => (request.sub_scopes().to_vec(), None),
        Err(error) => (Vec::new(), Some(error.to_string())),
    };

    let toggles = config.stages.for_provider(provider);
    let mut stages = vec!["extract", "consolidate"];
    if toggles.write {
        stages.push("write");
        if toggles.load {
            stages.push("load");
            if toggles.transform && config.transform.enabled {
                stages.push("transform");
            }
        }
    }

    let details = verbose.then(|| {
        let policy = config.provider_policy(provider);
        SourceDetails {
            min_interval_ms: policy.min_interval.as_millis(),
            request_timeout_ms: policy.request_timeout_ms(),
            max_pages: policy.max_pages,
            extract_max_retries: config.stage_policies(provider).extract.max_retries,
        }
    });

    SourceEntry {
        provider,
        raw_table: provider.raw_table(),
        scope,
        scope_error,
        stages,
        details,
    }
}

use std::sync::Arc;

use ferrolake_core::config::StorageKind;
use ferrolake_core::{
    BinanceAdapter, CommandTransform, GithubAdapter, HttpClient, LocalObjectStore, ObjectStore,
    Orchestrator, PipelineConfig, ProviderId, ReqwestHttpClient, S3ObjectStore, SnapshotWriter,
    SourceAdapter, ThrottleRegistry, WarehouseLoader, YoutubeAdapter,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &RunArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let provider = args.source.provider();
    let request = config.request_for(provider)?;
    let orchestrator = build_orchestrator(config, provider).await?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current stage");
                cancel.cancel();
            }
        })
    };

    let report = orchestrator.run(&request, &cancel).await;
    interrupt.abort();

    let data = serde_json::to_value(&report)?;
    if report.succeeded() {
        Ok(CommandResult::ok(data))
    } else {
        Ok(CommandResult::failed(data))
    }
}

/// Wires the stages enabled under `[stages.<provider>]`. A disabled stage
/// leaves every later stage unwired as well.
async fn build_orchestrator(
    config: &PipelineConfig,
    provider: ProviderId,
) -> Result<Orchestrator, CliError> {
    let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let throttles = ThrottleRegistry::new();

    let adapter: Arc<dyn SourceAdapter> = match provider {
        ProviderId::Binance => Arc::new(BinanceAdapter::new(
            http_client,
            &throttles,
            config.binance_settings(),
        )),
        ProviderId::Youtube => Arc::new(YoutubeAdapter::new(
            http_client,
            &throttles,
            config.youtube_settings()?,
        )),
        ProviderId::Github => Arc::new(GithubAdapter::new(
            http_client,
            &throttles,
            config.github_settings(),
        )),
    };

    let mut orchestrator = Orchestrator::new(adapter).with_policies(config.stage_policies(provider));
    if let Some(ratio) = config.warehouse.max_rejected_ratio {
        orchestrator = orchestrator.with_max_rejected_ratio(ratio);
    }

    let stages = config.stages.for_provider(provider);
    if !stages.write {
        return Ok(orchestrator);
    }
    let writer = SnapshotWriter::new(build_store(config).await).with_timeout(config.write_timeout());
    if let Err(error) = writer.ensure_container().await {
        warn!(error = %error, "snapshot store is not ready; the write stage will retry");
    }
    orchestrator = orchestrator.with_writer(writer);

    if !stages.load {
        return Ok(orchestrator);
    }
    orchestrator = orchestrator.with_loader(Arc::new(
        WarehouseLoader::new(config.warehouse_config()).with_timeout(config.load_timeout()),
    ));

    if stages.transform && config.transform.enabled {
        orchestrator =
            orchestrator.with_transformer(Arc::new(CommandTransform::new(config.command_settings())));
    }
    Ok(orchestrator)
}

async fn build_store(config: &PipelineConfig) -> Arc<dyn ObjectStore> {
    match (config.storage.kind, config.s3_settings()) {
        (StorageKind::S3, Some(settings)) => {
            info!(bucket = %settings.bucket, region = %settings.region, "writing snapshots to s3");
            Arc::new(S3ObjectStore::connect(settings).await)
        }
        _ => {
            info!(root = %config.storage.root.display(), "writing snapshots to the local filesystem");
            Arc::new(LocalObjectStore::new(&config.storage.root))
        }
    }
}

//! Pipeline orchestration.
//!
//! The [`Orchestrator`] drives one run through extract, consolidate, write,
//! load and transform, applying each stage's [`RetryPolicy`] and recording
//! the outcome in a [`RunReport`]. Stages without a configured component are
//! reported as [`StageStatus::NotImplemented`] together with every stage that
//! depends on them.

mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

pub use state::{ErrorReport, RunReport, RunState, Stage, StageReport, StageStatus};

use self::state::PipelineRun;
use crate::consolidate::consolidate;
use crate::data_source::SourceAdapter;
use crate::load::LoadTrigger;
use crate::retry::RetryPolicy;
use crate::snapshot::SnapshotWriter;
use crate::transform::TransformTrigger;
use crate::{ErrorKind, ExtractionRequest, StageError};

/// Retry policy per retried stage. Consolidation runs inside every extract
/// attempt, so an `EmptyBatch` re-extracts under the `extract` policy.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePolicies {
    pub extract: RetryPolicy,
    pub write: RetryPolicy,
    pub load: RetryPolicy,
    pub transform: RetryPolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        let every_30s = Duration::from_secs(30);
        Self {
            extract: RetryPolicy::fixed(every_30s, 2),
            write: RetryPolicy::fixed(every_30s, 1),
            load: RetryPolicy::fixed(every_30s, 2),
            transform: RetryPolicy::fixed(every_30s, 1),
        }
    }
}

impl StagePolicies {
    /// Single attempt everywhere.
    pub fn no_retry() -> Self {
        Self {
            extract: RetryPolicy::no_retry(),
            write: RetryPolicy::no_retry(),
            load: RetryPolicy::no_retry(),
            transform: RetryPolicy::no_retry(),
        }
    }
}

/// Runs pipelines for one source adapter.
#[derive(Clone)]
pub struct Orchestrator {
    adapter: Arc<dyn SourceAdapter>,
    writer: Option<SnapshotWriter>,
    loader: Option<Arc<dyn LoadTrigger>>,
    transformer: Option<Arc<dyn TransformTrigger>>,
    policies: StagePolicies,
    max_rejected_ratio: Option<f64>,
}

impl Orchestrator {
    /// An orchestrator that only extracts and consolidates; add the later
    /// stages with the `with_*` builders.
    pub fn new(adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            adapter,
            writer: None,
            loader: None,
            transformer: None,
            policies: StagePolicies::default(),
            max_rejected_ratio: None,
        }
    }

    pub fn with_writer(mut self, writer: SnapshotWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn LoadTrigger>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn TransformTrigger>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_policies(mut self, policies: StagePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Rejected-row share above which a load adds a run warning.
    pub fn with_max_rejected_ratio(mut self, ratio: f64) -> Self {
        self.max_rejected_ratio = Some(ratio);
        self
    }

    /// Runs every configured stage for `request`. Never returns an error:
    /// failures end the run in [`RunState::Failed`] and are described in the
    /// report.
    pub async fn run(&self, request: &ExtractionRequest, cancel: &CancellationToken) -> RunReport {
        let mut run = PipelineRun::start(request.provider());
        let span = info_span!("pipeline_run", run_id = %run.run_id, provider = %run.provider);

        async {
            info!(scopes = request.sub_scopes().len(), "pipeline run started");
            let outcome = match self.drive(&mut run, request, cancel).await {
                Ok(()) => run.advance(RunState::Succeeded),
                Err(error) => Err(error),
            };

            match outcome {
                Ok(()) => info!(
                    records = run.record_count,
                    warnings = run.warnings.len(),
                    "pipeline run succeeded"
                ),
                Err(stage_error) => {
                    error!(code = stage_error.code(), error = %stage_error, "pipeline run failed");
                    run.fail(stage_error);
                }
            }
        }
        .instrument(span)
        .await;

        run.into_report()
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        if request.provider() != self.adapter.id() {
            return Err(StageError::invalid_request(format!(
                "{} request cannot run through the {} adapter",
                request.provider(),
                self.adapter.id()
            )));
        }

        enter(run, cancel, Stage::Extract)?;
        let extracted = run_stage(run, Stage::Extract, &self.policies.extract, |_| async move {
            let extraction = self.adapter.extract(request).await?;
            let started = Instant::now();
            let batch = consolidate(vec![extraction.batch])?;
            let mut warnings = extraction
                .skipped
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            warnings.extend(extraction.warnings);
            Ok((batch, warnings, elapsed_ms(started)))
        })
        .await;
        let (batch, warnings, consolidate_ms) = match extracted {
            Ok(extracted) => extracted,
            Err(error) => {
                if error.kind() == ErrorKind::EmptyBatch {
                    run.record_stage(Stage::Consolidate, StageStatus::Failed, 1, 0, Some(&error));
                }
                return Err(error);
            }
        };
        for warning in warnings {
            run.warn(warning);
        }

        enter(run, cancel, Stage::Consolidate)?;
        run.record_stage(Stage::Consolidate, StageStatus::Succeeded, 1, consolidate_ms, None);
        run.record_count = batch.len();

        let Some(writer) = &self.writer else {
            not_implemented(run, &[Stage::Write, Stage::Load, Stage::Transform]);
            return Ok(());
        };
        enter(run, cancel, Stage::Write)?;
        let snapshot = run_stage(run, Stage::Write, &self.policies.write, |_| writer.write(&batch)).await?;
        run.snapshot = Some(snapshot.clone());

        let Some(loader) = &self.loader else {
            not_implemented(run, &[Stage::Load, Stage::Transform]);
            return Ok(());
        };
        enter(run, cancel, Stage::Load)?;
        let snapshots = [snapshot];
        let load = run_stage(run, Stage::Load, &self.policies.load, |_| loader.load(&snapshots)).await?;
        if load.rows_rejected > 0 {
            run.warn(format!(
                "{} of {} rows rejected while loading {}",
                load.rows_rejected, load.rows_parsed, load.table
            ));
        }
        if let Some(max_ratio) = self.max_rejected_ratio {
            let ratio = load.rejected_ratio();
            if ratio > max_ratio {
                run.warn(format!(
                    "rejected row ratio {ratio:.4} exceeds the configured maximum {max_ratio:.4}"
                ));
            }
        }
        run.load = Some(load);

        let Some(transformer) = &self.transformer else {
            not_implemented(run, &[Stage::Transform]);
            return Ok(());
        };
        enter(run, cancel, Stage::Transform)?;
        let transformed = run_stage(run, Stage::Transform, &self.policies.transform, |_| {
            transformer.transform()
        })
        .await?;
        run.transform = Some(transformed);

        Ok(())
    }
}

/// Cancellation is only observed between stages.
fn enter(run: &mut PipelineRun, cancel: &CancellationToken, stage: Stage) -> Result<(), StageError> {
    if cancel.is_cancelled() {
        return Err(StageError::cancelled(format!("run cancelled before the {stage} stage")));
    }
    run.advance(stage.running_state())
}

fn not_implemented(run: &mut PipelineRun, stages: &[Stage]) {
    for stage in stages {
        run.record_stage(*stage, StageStatus::NotImplemented, 0, 0, None);
        run.warn(format!("{stage} stage is not implemented for {}", run.provider));
    }
}

async fn run_stage<T, F, Fut>(
    run: &mut PipelineRun,
    stage: Stage,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, StageError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let started = Instant::now();
    let outcome = policy.run(stage.as_str(), operation).await;
    let duration_ms = elapsed_ms(started);

    match outcome.result {
        Ok(value) => {
            info!(stage = %stage, attempts = outcome.attempts, duration_ms, "stage succeeded");
            run.record_stage(stage, StageStatus::Succeeded, outcome.attempts, duration_ms, None);
            Ok(value)
        }
        Err(error) => {
            run.record_stage(stage, StageStatus::Failed, outcome.attempts, duration_ms, Some(&error));
            Err(error)
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

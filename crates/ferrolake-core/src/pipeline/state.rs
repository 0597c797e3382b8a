use std::fmt::{Display, Formatter};

use serde::Serialize;
use uuid::Uuid;

use crate::load::LoadResult;
use crate::snapshot::Snapshot;
use crate::transform::TransformResult;
use crate::{ErrorKind, ProviderId, StageError, UtcDateTime};

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Extracting,
    Consolidating,
    Writing,
    Loading,
    Transforming,
    Succeeded,
    Failed,
}

impl RunState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Stages advance strictly in order; `Failed` is reachable from any
    /// non-terminal state. A run may finish after any completed stage because
    /// trailing stages can be disabled.
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Self::Failed) => true,
            (Self::Pending, Self::Extracting)
            | (Self::Extracting, Self::Consolidating)
            | (Self::Consolidating, Self::Writing)
            | (Self::Writing, Self::Loading)
            | (Self::Loading, Self::Transforming) => true,
            (Self::Consolidating | Self::Writing | Self::Loading | Self::Transforming, Self::Succeeded) => {
                true
            }
            _ => false,
        }
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Consolidating => "consolidating",
            Self::Writing => "writing",
            Self::Loading => "loading",
            Self::Transforming => "transforming",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Consolidate,
    Write,
    Load,
    Transform,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Consolidate => "consolidate",
            Self::Write => "write",
            Self::Load => "load",
            Self::Transform => "transform",
        }
    }

    pub const fn running_state(self) -> RunState {
        match self {
            Self::Extract => RunState::Extracting,
            Self::Consolidate => RunState::Consolidating,
            Self::Write => RunState::Writing,
            Self::Load => RunState::Loading,
            Self::Transform => RunState::Transforming,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Placeholder stage; never reported as succeeded.
    NotImplemented,
}

/// Terminal error as it appears in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl From<&StageError> for ErrorReport {
    fn from(error: &StageError) -> Self {
        Self {
            kind: error.kind(),
            code: error.code(),
            message: error.message().to_owned(),
            diagnostics: error.diagnostics().map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Serializable summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub provider: ProviderId,
    pub state: RunState,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub stages: Vec<StageReport>,
    pub warnings: Vec<String>,
    pub record_count: usize,
    pub snapshot: Option<Snapshot>,
    pub load: Option<LoadResult>,
    pub transform: Option<TransformResult>,
    pub error: Option<ErrorReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }
}

/// Mutable run record owned by the orchestrator for the duration of a run.
#[derive(Debug)]
pub(crate) struct PipelineRun {
    pub run_id: Uuid,
    pub provider: ProviderId,
    pub started_at: UtcDateTime,
    pub state: RunState,
    pub stages: Vec<StageReport>,
    pub warnings: Vec<String>,
    pub record_count: usize,
    pub snapshot: Option<Snapshot>,
    pub load: Option<LoadResult>,
    pub transform: Option<TransformResult>,
    pub error: Option<StageError>,
}

impl PipelineRun {
    pub fn start(provider: ProviderId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            provider,
            started_at: UtcDateTime::now(),
            state: RunState::Pending,
            stages: Vec::new(),
            warnings: Vec::new(),
            record_count: 0,
            snapshot: None,
            load: None,
            transform: None,
            error: None,
        }
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), StageError> {
        if !self.state.can_transition_to(next) {
            return Err(StageError::invalid_request(format!(
                "illegal run transition {} -> {next}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn record_stage(
        &mut self,
        stage: Stage,
        status: StageStatus,
        attempts: u32,
        duration_ms: u64,
        error: Option<&StageError>,
    ) {
        self.stages.push(StageReport {
            stage,
            status,
            attempts,
            duration_ms,
            error: error.map(ErrorReport::from),
        });
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Terminal transition; `Failed` is always legal from a non-terminal state.
    pub fn fail(&mut self, error: StageError) {
        if !self.state.is_terminal() {
            self.state = RunState::Failed;
        }
        self.error = Some(error);
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            provider: self.provider,
            state: self.state,
            started_at: self.started_at,
            finished_at: UtcDateTime::now(),
            stages: self.stages,
            warnings: self.warnings,
            record_count: self.record_count,
            snapshot: self.snapshot,
            load: self.load,
            transform: self.transform,
            error: self.error.as_ref().map(ErrorReport::from),
        }
    }
}

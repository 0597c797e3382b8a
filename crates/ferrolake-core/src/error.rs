use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ProviderId;

/// Validation errors raised while building requests and configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid source '{value}', expected one of binance, youtube, github")]
    InvalidSource { value: String },

    #[error("{provider} extraction needs at least one {scope}")]
    EmptyScope {
        provider: ProviderId,
        scope: &'static str,
    },

    #[error("{provider} scope entry '{value}' is invalid")]
    InvalidScope { provider: ProviderId, value: String },

    #[error("creation window must be between 1 and {max} days, got {days}", max = crate::domain::MAX_CREATED_WITHIN_DAYS)]
    InvalidWindow { days: u32 },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Pipeline failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Every sub-scope of an extraction failed.
    ExtractionFailed,
    /// Consolidation produced no records.
    EmptyBatch,
    /// The object store could not be reached or did not answer in time.
    StorageUnavailable,
    /// The batch could not be encoded.
    SerializationError,
    /// The warehouse could not be opened or connected.
    LoadUnreachable,
    /// The warehouse was reachable but rejected the bulk-load statement.
    LoadFailed,
    /// The transformation run exited non-zero, could not start, or timed out.
    TransformFailed,
    /// The request or wiring is wrong; retrying cannot help.
    InvalidRequest,
    /// The run was abandoned between stages.
    Cancelled,
}

impl ErrorKind {
    pub const ALL: [Self; 9] = [
        Self::ExtractionFailed,
        Self::EmptyBatch,
        Self::StorageUnavailable,
        Self::SerializationError,
        Self::LoadUnreachable,
        Self::LoadFailed,
        Self::TransformFailed,
        Self::InvalidRequest,
        Self::Cancelled,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            Self::ExtractionFailed => "pipeline.extraction_failed",
            Self::EmptyBatch => "pipeline.empty_batch",
            Self::StorageUnavailable => "pipeline.storage_unavailable",
            Self::SerializationError => "pipeline.serialization_error",
            Self::LoadUnreachable => "pipeline.load_unreachable",
            Self::LoadFailed => "pipeline.load_failed",
            Self::TransformFailed => "pipeline.transform_failed",
            Self::InvalidRequest => "pipeline.invalid_request",
            Self::Cancelled => "pipeline.cancelled",
        }
    }

    /// Whether a stage failing with this kind may be attempted again.
    ///
    /// `TransformFailed` is retryable per stage policy but still ends the run
    /// once retries are exhausted.
    pub const fn retryable(self) -> bool {
        match self {
            Self::ExtractionFailed
            | Self::EmptyBatch
            | Self::StorageUnavailable
            | Self::LoadUnreachable
            | Self::TransformFailed => true,
            Self::SerializationError | Self::LoadFailed | Self::InvalidRequest | Self::Cancelled => {
                false
            }
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured stage error carried through retries into the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    kind: ErrorKind,
    message: String,
    diagnostics: Option<String>,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn extraction_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExtractionFailed, message)
    }

    pub fn empty_batch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyBatch, message)
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationError, message)
    }

    pub fn load_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LoadUnreachable, message)
    }

    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LoadFailed, message)
    }

    /// Transformation failure carrying the captured error output.
    pub fn transform_failed(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransformFailed, message).with_diagnostics(diagnostics)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    pub const fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl Display for StageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for StageError {}

impl From<ValidationError> for StageError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}

//! Source adapter contract.
//!
//! Every provider implements [`SourceAdapter`]. An adapter turns one
//! [`ExtractionRequest`] into an [`Extraction`]: a batch of normalized records
//! plus the sub-scopes it had to skip. Failures of individual sub-scopes are
//! reported through [`SourceError`] and never abort the extraction unless no
//! sub-scope succeeds.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::http_client::HttpError;
use crate::{Batch, ExtractionRequest, ProviderId, StageError};

/// A sub-scope that was skipped during extraction, with its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedScope {
    pub scope: String,
    pub reason: String,
}

impl Display for SkippedScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "skipped {}: {}", self.scope, self.reason)
    }
}

/// Adapter output: the batch, the sub-scopes that did not contribute, and
/// notes on sub-scopes that contributed only part of their rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub batch: Batch,
    pub skipped: Vec<SkippedScope>,
    pub warnings: Vec<String>,
}

/// Adapter-level error classification for a single sub-scope call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    NotFound,
    InvalidResponse,
}

/// Structured error for one failed provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidResponse,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

impl From<HttpError> for SourceError {
    fn from(error: HttpError) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: error.message().to_owned(),
            retryable: error.retryable(),
        }
    }
}

/// Canonical extraction contract implemented by each provider adapter.
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Extracts every sub-scope of `request`.
    ///
    /// Fails with `InvalidRequest` when the request targets another provider
    /// and with `ExtractionFailed` when no sub-scope succeeds.
    fn extract<'a>(
        &'a self,
        request: &'a ExtractionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, StageError>> + Send + 'a>>;
}

//! # Ferrolake Core
//!
//! Extraction and landing pipeline for the ferrolake data lake.
//!
//! ## Overview
//!
//! A pipeline run pulls records from one provider, lands them as an immutable
//! Parquet snapshot and hands the snapshot to the warehouse and the
//! downstream transformation:
//!
//! - **Source adapters** for the exchange, video platform and code index APIs
//! - **Consolidation** of adapter output into one uniform batch
//! - **Snapshot writing** to time-partitioned paths on local disk or S3
//! - **Load and transform triggers** for DuckDB and an external command
//! - **Orchestration** with per-stage retry and a serializable run report
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Binance, YouTube and GitHub source adapters |
//! | [`config`] | TOML pipeline configuration |
//! | [`consolidate`] | Batch consolidation |
//! | [`data_source`] | Source adapter trait and extraction types |
//! | [`domain`] | Records, batches, requests and timestamps |
//! | [`error`] | Validation and stage errors |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`load`] | Warehouse load trigger |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`pipeline`] | Orchestrator, run state and reports |
//! | [`provider_policy`] | Per-provider pacing and limits |
//! | [`retry`] | Stage retry policies |
//! | [`snapshot`] | Parquet encoding and object stores |
//! | [`source`] | Provider identifiers |
//! | [`throttling`] | Shared per-provider rate limiting |
//! | [`transform`] | Transformation trigger |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ferrolake_core::{
//!     BinanceAdapter, BinanceSettings, ExtractionRequest, LocalObjectStore, Orchestrator,
//!     ReqwestHttpClient, SnapshotWriter, ThrottleRegistry,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let throttles = ThrottleRegistry::new();
//!     let adapter = BinanceAdapter::new(
//!         Arc::new(ReqwestHttpClient::new()),
//!         &throttles,
//!         BinanceSettings::default(),
//!     );
//!     let orchestrator = Orchestrator::new(Arc::new(adapter))
//!         .with_writer(SnapshotWriter::new(Arc::new(LocalObjectStore::new("lake"))));
//!
//!     let request = ExtractionRequest::binance(["BTCUSDT", "ETHUSDT"])?;
//!     let report = orchestrator.run(&request, &CancellationToken::new()).await;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │ Orchestrator │──▶│ SourceAdapter│──▶│ HttpClient      │
//! └──────┬───────┘   └──────────────┘   │ + throttle      │
//!        │                              └─────────────────┘
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ consolidate  │──▶│SnapshotWriter│──▶│ LoadTrigger  │──▶│TransformTrig.│
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘   └──────────────┘
//!                           ▼                  ▼
//!                     ObjectStore        ferrolake-warehouse
//! ```

pub mod adapters;
pub mod config;
pub mod consolidate;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod provider_policy;
pub mod retry;
pub mod snapshot;
pub mod source;
pub mod throttling;
pub mod transform;

// Adapter implementations
pub use adapters::{
    BinanceAdapter, BinanceSettings, GithubAdapter, GithubSettings, YoutubeAdapter,
    YoutubeSettings,
};

// Configuration and logging
pub use config::{ConfigError, PipelineConfig};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LoggingError};

// Data source trait and types
pub use consolidate::consolidate;
pub use data_source::{Extraction, SkippedScope, SourceAdapter, SourceError, SourceErrorKind};

// Domain models
pub use domain::{Batch, ExtractionRequest, Record, UtcDateTime, Value};

// Error types
pub use error::{ErrorKind, StageError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};

// Pipeline stages
pub use load::{LoadResult, LoadTrigger, WarehouseLoader};
pub use pipeline::{
    ErrorReport, Orchestrator, RunReport, RunState, Stage, StagePolicies, StageReport, StageStatus,
};
pub use snapshot::{
    partition_path, LocalObjectStore, ObjectStore, S3ObjectStore, S3Settings, Snapshot,
    SnapshotWriter, StoreError, StoredObject,
};
pub use transform::{CommandSettings, CommandTransform, TransformResult, TransformTrigger};

// Policies
pub use provider_policy::ProviderPolicy;
pub use retry::{Backoff, RetryOutcome, RetryPolicy};
pub use throttling::{ProviderThrottle, ThrottleRegistry};

// Source identifiers
pub use source::ProviderId;

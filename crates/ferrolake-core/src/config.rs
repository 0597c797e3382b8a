//! Pipeline configuration loaded from TOML.
//!
//! Every section is optional; missing values fall back to the defaults
//! below. Secrets can be supplied through [`PipelineConfig::apply_env`], which
//! takes a lookup function so that only the caller decides where values come
//! from.
//!
//! ```toml
//! [providers.binance]
//! symbols = ["BTCUSDT", "ETHUSDT"]
//!
//! [providers.github]
//! languages = ["rust", "go"]
//! min_stars = 100
//!
//! [storage]
//! kind = "s3"
//! bucket = "lake"
//! region = "eu-west-1"
//!
//! [warehouse]
//! db_path = "lake/warehouse.duckdb"
//!
//! [retry.load]
//! max_retries = 3
//! delay_ms = 10000
//!
//! [stages.youtube]
//! transform = false
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ferrolake_warehouse::{ObjectStoreAccess, WarehouseConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::{BinanceSettings, GithubSettings, YoutubeSettings};
use crate::logging::LogConfig;
use crate::pipeline::StagePolicies;
use crate::provider_policy::ProviderPolicy;
use crate::retry::RetryPolicy;
use crate::snapshot::S3Settings;
use crate::transform::CommandSettings;
use crate::{ExtractionRequest, ProviderId, ValidationError};

pub const YOUTUBE_API_KEY_ENV: &str = "FERROLAKE_YOUTUBE_API_KEY";
pub const GITHUB_TOKEN_ENV: &str = "FERROLAKE_GITHUB_TOKEN";
pub const WAREHOUSE_PATH_ENV: &str = "FERROLAKE_WAREHOUSE_PATH";
pub const AWS_ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Root of `ferrolake.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub providers: ProvidersConfig,
    pub storage: StorageConfig,
    pub warehouse: WarehouseSection,
    pub transform: TransformSection,
    pub retry: RetrySection,
    pub stages: StagesSection,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub binance: BinanceConfig,
    pub youtube: YoutubeConfig,
    pub github: GithubConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    pub base_url: Option<String>,
    pub symbols: Vec<String>,
    pub request_timeout_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            symbols: ["BTCUSDT", "ETHUSDT", "BNBUSDT"].map(String::from).to_vec(),
            request_timeout_ms: None,
            min_interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub channel_ids: Vec<String>,
    pub request_timeout_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
    /// Upload search pages followed per channel.
    pub max_pages: Option<u32>,
    /// Overrides `[retry.extract]`; quota errors recover slowly.
    pub extract_retry: Option<StageRetryConfig>,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            channel_ids: Vec::new(),
            request_timeout_ms: None,
            min_interval_ms: None,
            max_pages: None,
            extract_retry: Some(StageRetryConfig::new(3, 60_000)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub languages: Vec<String>,
    pub created_within_days: u32,
    pub min_stars: u32,
    pub per_page: u32,
    pub request_timeout_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub max_pages: Option<u32>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            languages: ["python", "javascript", "typescript", "rust", "go"]
                .map(String::from)
                .to_vec(),
            created_within_days: 30,
            min_stars: 50,
            per_page: 30,
            request_timeout_ms: None,
            min_interval_ms: None,
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    S3,
}

/// Where snapshots are written. `root` applies to `local`, the remaining
/// fields to `s3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub root: PathBuf,
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub path_style: bool,
    pub prefix: Option<String>,
    pub write_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Local,
            root: PathBuf::from("lake"),
            bucket: None,
            region: String::from("us-east-1"),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            path_style: false,
            prefix: None,
            write_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSection {
    pub db_path: PathBuf,
    pub max_pool_size: usize,
    pub load_timeout_ms: u64,
    /// Rejected-row share above which a run gets an extra warning.
    pub max_rejected_ratio: Option<f64>,
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("lake/warehouse.duckdb"),
            max_pool_size: 4,
            load_timeout_ms: 300_000,
            max_rejected_ratio: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSection {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

impl Default for TransformSection {
    fn default() -> Self {
        let command = CommandSettings::default();
        Self {
            enabled: true,
            program: command.program,
            args: command.args,
            working_dir: None,
            env: BTreeMap::new(),
            timeout_ms: 1_800_000,
        }
    }
}

/// One stage's retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageRetryConfig {
    pub max_retries: u32,
    pub delay_ms: u64,
    /// Doubles the delay per attempt, capped at `max_delay_ms`.
    pub exponential: bool,
    pub max_delay_ms: Option<u64>,
}

impl Default for StageRetryConfig {
    fn default() -> Self {
        Self::new(1, 30_000)
    }
}

impl StageRetryConfig {
    pub const fn new(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay_ms,
            exponential: false,
            max_delay_ms: None,
        }
    }

    pub fn to_policy(self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        if self.exponential {
            let max = Duration::from_millis(self.max_delay_ms.unwrap_or(self.delay_ms.saturating_mul(8)));
            RetryPolicy::exponential(delay, max, self.max_retries)
        } else {
            RetryPolicy::fixed(delay, self.max_retries)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub extract: StageRetryConfig,
    pub write: StageRetryConfig,
    pub load: StageRetryConfig,
    pub transform: StageRetryConfig,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            extract: StageRetryConfig::new(2, 30_000),
            write: StageRetryConfig::new(1, 30_000),
            load: StageRetryConfig::new(2, 30_000),
            transform: StageRetryConfig::new(1, 30_000),
        }
    }
}

/// Which trailing stages a provider's pipeline actually runs. A disabled
/// stage, and everything after it, is reported as not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToggles {
    pub write: bool,
    pub load: bool,
    pub transform: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            write: true,
            load: true,
            transform: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesSection {
    pub binance: StageToggles,
    pub youtube: StageToggles,
    pub github: StageToggles,
}

impl StagesSection {
    pub const fn for_provider(&self, provider: ProviderId) -> StageToggles {
        match provider {
            ProviderId::Binance => self.binance,
            ProviderId::Youtube => self.youtube,
            ProviderId::Github => self.github,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Fills secrets and the warehouse path from `lookup`. Blank values are
    /// ignored; configured values are overridden.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = read(YOUTUBE_API_KEY_ENV) {
            self.providers.youtube.api_key = Some(key);
        }
        if let Some(token) = read(GITHUB_TOKEN_ENV) {
            self.providers.github.token = Some(token);
        }
        if let Some(path) = read(WAREHOUSE_PATH_ENV) {
            self.warehouse.db_path = PathBuf::from(path);
        }
        if let Some(access_key) = read(AWS_ACCESS_KEY_ID_ENV) {
            self.storage.access_key_id = Some(access_key);
        }
        if let Some(secret_key) = read(AWS_SECRET_ACCESS_KEY_ENV) {
            self.storage.secret_access_key = Some(secret_key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.kind == StorageKind::S3
            && self.storage.bucket.as_deref().map_or(true, |bucket| bucket.trim().is_empty())
        {
            return Err(ConfigError::Invalid(String::from(
                "storage.bucket is required when storage.kind = \"s3\"",
            )));
        }
        if self.storage.access_key_id.is_some() != self.storage.secret_access_key.is_some() {
            return Err(ConfigError::Invalid(String::from(
                "storage.access_key_id and storage.secret_access_key must be set together",
            )));
        }
        if self.warehouse.max_pool_size == 0 {
            return Err(ConfigError::Invalid(String::from(
                "warehouse.max_pool_size must be greater than zero",
            )));
        }
        if let Some(ratio) = self.warehouse.max_rejected_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::Invalid(format!(
                    "warehouse.max_rejected_ratio must be within 0.0..=1.0, got {ratio}"
                )));
            }
        }
        if self.transform.program.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("transform.program must not be empty")));
        }

        let timeouts = [
            ("storage.write_timeout_ms", self.storage.write_timeout_ms),
            ("warehouse.load_timeout_ms", self.warehouse.load_timeout_ms),
            ("transform.timeout_ms", self.transform.timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        Ok(())
    }

    /// The configured scope for `provider`, validated.
    pub fn request_for(&self, provider: ProviderId) -> Result<ExtractionRequest, ConfigError> {
        let request = match provider {
            ProviderId::Binance => ExtractionRequest::binance(&self.providers.binance.symbols)?,
            ProviderId::Youtube => ExtractionRequest::youtube(&self.providers.youtube.channel_ids)?,
            ProviderId::Github => {
                let github = &self.providers.github;
                ExtractionRequest::github(&github.languages, github.created_within_days, github.min_stars)?
            }
        };
        Ok(request)
    }

    pub fn stage_policies(&self, provider: ProviderId) -> StagePolicies {
        let extract = match (provider, self.providers.youtube.extract_retry) {
            (ProviderId::Youtube, Some(youtube)) => youtube,
            _ => self.retry.extract,
        };
        StagePolicies {
            extract: extract.to_policy(),
            write: self.retry.write.to_policy(),
            load: self.retry.load.to_policy(),
            transform: self.retry.transform.to_policy(),
        }
    }

    pub fn provider_policy(&self, provider: ProviderId) -> ProviderPolicy {
        let (timeout_ms, interval_ms, max_pages) = match provider {
            ProviderId::Binance => {
                let binance = &self.providers.binance;
                (binance.request_timeout_ms, binance.min_interval_ms, None)
            }
            ProviderId::Youtube => {
                let youtube = &self.providers.youtube;
                (youtube.request_timeout_ms, youtube.min_interval_ms, youtube.max_pages)
            }
            ProviderId::Github => {
                let github = &self.providers.github;
                (github.request_timeout_ms, github.min_interval_ms, github.max_pages)
            }
        };

        let mut policy = ProviderPolicy::default_for(provider);
        if let Some(timeout_ms) = timeout_ms {
            policy = policy.with_request_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(interval_ms) = interval_ms {
            policy = policy.with_min_interval(Duration::from_millis(interval_ms));
        }
        if let Some(max_pages) = max_pages {
            policy = policy.with_max_pages(max_pages);
        }
        policy
    }

    pub fn binance_settings(&self) -> BinanceSettings {
        let mut settings = BinanceSettings {
            policy: self.provider_policy(ProviderId::Binance),
            ..BinanceSettings::default()
        };
        if let Some(base_url) = &self.providers.binance.base_url {
            settings.base_url = base_url.clone();
        }
        settings
    }

    /// Fails when no API key is configured; the data API refuses anonymous calls.
    pub fn youtube_settings(&self) -> Result<YoutubeSettings, ConfigError> {
        let youtube = &self.providers.youtube;
        let api_key = youtube
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "providers.youtube.api_key is required (or set {YOUTUBE_API_KEY_ENV})"
                ))
            })?;

        let mut settings = YoutubeSettings::new(api_key);
        settings.policy = self.provider_policy(ProviderId::Youtube);
        if let Some(base_url) = &youtube.base_url {
            settings.base_url = base_url.clone();
        }
        Ok(settings)
    }

    pub fn github_settings(&self) -> GithubSettings {
        let github = &self.providers.github;
        let mut settings = GithubSettings {
            token: github.token.clone(),
            per_page: github.per_page,
            policy: self.provider_policy(ProviderId::Github),
            ..GithubSettings::default()
        };
        if let Some(base_url) = &github.base_url {
            settings.base_url = base_url.clone();
        }
        settings
    }

    /// `None` when snapshots are written to the local filesystem.
    pub fn s3_settings(&self) -> Option<S3Settings> {
        let storage = &self.storage;
        if storage.kind != StorageKind::S3 {
            return None;
        }
        Some(S3Settings {
            bucket: storage.bucket.clone().unwrap_or_default(),
            region: storage.region.clone(),
            endpoint: storage.endpoint.clone(),
            access_key_id: storage.access_key_id.clone(),
            secret_access_key: storage.secret_access_key.clone(),
            path_style: storage.path_style,
            prefix: storage.prefix.clone(),
        })
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.write_timeout_ms)
    }

    /// Warehouse settings; S3 storage also grants the warehouse read access
    /// to the bucket.
    pub fn warehouse_config(&self) -> WarehouseConfig {
        let mut config = WarehouseConfig::new(&self.warehouse.db_path);
        config.max_pool_size = self.warehouse.max_pool_size;
        config.object_store = self.s3_settings().map(|s3| ObjectStoreAccess {
            region: s3.region,
            endpoint: s3.endpoint,
            access_key_id: s3.access_key_id,
            secret_access_key: s3.secret_access_key,
            path_style: s3.path_style,
        });
        config
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.warehouse.load_timeout_ms)
    }

    pub fn command_settings(&self) -> CommandSettings {
        let transform = &self.transform;
        CommandSettings {
            program: transform.program.clone(),
            args: transform.args.clone(),
            working_dir: transform.working_dir.clone(),
            env: transform
                .env
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            timeout: Duration::from_millis(transform.timeout_ms),
        }
    }
}

//! Durable object stores for snapshots.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use thiserror::Error;
use tracing::{debug, info};

/// Object store failure. Every variant is treated as the store being unavailable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object path '{path}' must be relative and stay inside the store")]
    InvalidPath { path: String },

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("s3 {operation} failed: {message}")]
    S3 {
        operation: &'static str,
        message: String,
    },
}

/// Location of a written object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// `file://` or `s3://` URL the warehouse can read the object from.
    pub url: String,
    pub size_bytes: u64,
}

/// Write-by-path storage with overwrite semantics.
pub trait ObjectStore: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Writes `bytes` at `path`, replacing any object already there.
    fn put<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject, StoreError>> + Send + 'a>>;

    /// Creates the backing container (directory, bucket) when missing.
    fn ensure_container<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

/// Filesystem store rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let stays_inside = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if path.is_empty() || !stays_inside {
            return Err(StoreError::InvalidPath {
                path: path.to_owned(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn put<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let target = self.resolve(path)?;
            let parent = target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone());
            tokio::fs::create_dir_all(&parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.clone(),
                    source,
                })?;

            // Readers only ever see a complete file.
            let file_name = target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let staging = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
            let size_bytes = bytes.len() as u64;

            tokio::fs::write(&staging, bytes)
                .await
                .map_err(|source| StoreError::Io {
                    path: staging.clone(),
                    source,
                })?;
            if let Err(source) = tokio::fs::rename(&staging, &target).await {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(StoreError::Io {
                    path: target,
                    source,
                });
            }

            let absolute = tokio::fs::canonicalize(&target)
                .await
                .map_err(|source| StoreError::Io {
                    path: target.clone(),
                    source,
                })?;
            debug!(path = %absolute.display(), size_bytes, "snapshot stored locally");

            Ok(StoredObject {
                url: format!("file://{}", absolute.display()),
                size_bytes,
            })
        })
    }

    fn ensure_container<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.root)
                .await
                .map_err(|source| StoreError::Io {
                    path: self.root.clone(),
                    source,
                })
        })
    }
}

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services such as MinIO.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub path_style: bool,
    /// Key prefix prepended to every snapshot path.
    pub prefix: Option<String>,
}

/// S3 bucket store. `put_object` overwrites by nature.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    region: String,
    prefix: Option<String>,
}

impl S3ObjectStore {
    /// Builds the client from explicit credentials when both keys are set,
    /// otherwise from the default AWS provider chain.
    pub async fn connect(settings: S3Settings) -> Self {
        let region = Region::new(settings.region.clone());
        let s3_config = match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "ferrolake-config");
                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(region)
                    .force_path_style(settings.path_style);
                if let Some(endpoint) = &settings.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                builder.build()
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                let mut builder =
                    aws_sdk_s3::config::Builder::from(&shared).force_path_style(settings.path_style);
                if let Some(endpoint) = &settings.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                builder.build()
            }
        };

        info!(bucket = %settings.bucket, region = %settings.region, "s3 snapshot store initialized");
        Self {
            client: Client::from_conf(s3_config),
            bucket: settings.bucket,
            region: settings.region,
            prefix: settings
                .prefix
                .map(|prefix| prefix.trim_matches('/').to_owned())
                .filter(|prefix| !prefix.is_empty()),
        }
    }

    fn key_for(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{path}"),
            None => path.to_owned(),
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn kind(&self) -> &'static str {
        "s3"
    }

    fn put<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let key = self.key_for(path);
            let size_bytes = bytes.len() as u64;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_type("application/vnd.apache.parquet")
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(|error| StoreError::S3 {
                    operation: "put_object",
                    message: DisplayErrorContext(&error).to_string(),
                })?;

            debug!(bucket = %self.bucket, key = %key, size_bytes, "snapshot uploaded");
            Ok(StoredObject {
                url: format!("s3://{}/{key}", self.bucket),
                size_bytes,
            })
        })
    }

    fn ensure_container<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if self
                .client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .is_ok()
            {
                return Ok(());
            }

            let mut request = self.client.create_bucket().bucket(&self.bucket);
            if self.region != "us-east-1" {
                request = request.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                        .build(),
                );
            }
            request.send().await.map_err(|error| StoreError::S3 {
                operation: "create_bucket",
                message: DisplayErrorContext(&error).to_string(),
            })?;

            info!(bucket = %self.bucket, "created snapshot bucket");
            Ok(())
        })
    }
}

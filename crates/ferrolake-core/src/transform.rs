//! Transformation trigger: one external process invocation per run.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::StageError;

/// Captured outcome of a transformation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Runs the downstream transformation after a successful load.
pub trait TransformTrigger: Send + Sync {
    fn transform<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<TransformResult, StageError>> + Send + 'a>>;
}

/// What to execute and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added to the inherited environment.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            program: String::from("dbt"),
            args: vec![String::from("run")],
            working_dir: None,
            env: Vec::new(),
            timeout: Duration::from_secs(1_800),
        }
    }
}

impl CommandSettings {
    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// [`TransformTrigger`] spawning an external command such as `dbt run`.
///
/// A non-zero exit, a spawn failure or a timeout is `TransformFailed`; the
/// process is killed when the timeout elapses.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    settings: CommandSettings,
}

impl CommandTransform {
    pub fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    async fn run(&self) -> Result<TransformResult, StageError> {
        let settings = &self.settings;
        let label = settings.display();

        let mut command = Command::new(&settings.program);
        command
            .args(&settings.args)
            .envs(settings.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &settings.working_dir {
            command.current_dir(dir);
        }

        debug!(command = %label, "spawning transformation");
        let started = Instant::now();
        let child = command.spawn().map_err(|error| {
            StageError::transform_failed(
                format!("could not start '{label}'"),
                error.to_string(),
            )
        })?;

        let output = tokio::time::timeout(settings.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                StageError::transform_failed(
                    format!(
                        "'{label}' did not finish within {} s and was killed",
                        settings.timeout.as_secs()
                    ),
                    String::new(),
                )
            })?
            .map_err(|error| {
                StageError::transform_failed(format!("waiting on '{label}' failed"), error.to_string())
            })?;

        let result = TransformResult {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if !result.success {
            let diagnostics = if result.stderr.trim().is_empty() {
                result.stdout.clone()
            } else {
                result.stderr.clone()
            };
            let status = result
                .exit_code
                .map_or_else(|| String::from("a signal"), |code| format!("status {code}"));
            return Err(StageError::transform_failed(
                format!("'{label}' exited with {status}"),
                diagnostics,
            ));
        }

        info!(command = %label, duration_ms = result.duration_ms, "transformation finished");
        Ok(result)
    }
}

impl TransformTrigger for CommandTransform {
    fn transform<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<TransformResult, StageError>> + Send + 'a>> {
        Box::pin(self.run())
    }
}

use crate::{
    config::{ConnectionParams, EngineKind, ScenarioSpec},
    execution_plan::StorageSpec,
};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to spawn driver: {0}")]
    Spawn(String),

    #[error("scenario execution failed: {0}")]
    Command(String),

    #[error("driver produced unparseable metrics: {0}")]
    InvalidMetrics(String),
}

/// Everything a driver needs to run one benchmark cell.
#[derive(Debug, Clone, Serialize)]
pub struct DriverRequest<'a> {
    pub engine: EngineKind,
    pub storage: StorageSpec,
    pub connection: &'a ConnectionParams,
    pub scenario: &'a ScenarioSpec,
    pub storage_path: &'a Path,
}

/// The consumed "run scenario, return metrics" contract. Metrics are opaque
/// JSON; the orchestrator passes them through to the manifest untouched.
/// Timeouts are enforced by the caller, not the driver.
#[async_trait]
pub trait ScenarioDriver: Send + Sync {
    async fn run_scenario(
        &self,
        request: &DriverRequest<'_>,
    ) -> Result<serde_json::Value, DriverError>;
}

/// Runs the configured driver command and parses its stdout as metrics JSON.
pub struct CommandDriver {
    command: String,
}

impl CommandDriver {
    pub fn new(command: impl Into<String>) -> Self {
        CommandDriver {
            command: command.into(),
        }
    }

    fn render_command(&self, request: &DriverRequest<'_>) -> String {
        self.command
            .replace("{engine}", &request.engine.to_string())
            .replace("{scenario}", &request.scenario.name)
            .replace("{storage}", &request.storage.slug())
            .replace("{storage_path}", &request.storage_path.to_string_lossy())
    }
}

#[async_trait]
impl ScenarioDriver for CommandDriver {
    async fn run_scenario(
        &self,
        request: &DriverRequest<'_>,
    ) -> Result<serde_json::Value, DriverError> {
        let command = self.render_command(request);
        let words = shlex::split(&command).ok_or_else(|| {
            DriverError::Spawn(format!("command string is not POSIX compliant: {}", command))
        })?;
        let (program, args) = words
            .split_first()
            .ok_or_else(|| DriverError::Spawn("empty driver command".to_string()))?;

        let payload = serde_json::to_string(request)
            .map_err(|err| DriverError::Spawn(format!("unable to encode request: {}", err)))?;

        let output = tokio::process::Command::new(program)
            .args(args)
            .env("NFSBENCH_REQUEST", payload)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| DriverError::Spawn(format!("failed to run {}: {}", command, err)))?;
        info!("ran driver command {}", command);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("{} exited with {}", command, output.status)
            } else {
                stderr
            };
            return Err(DriverError::Command(detail));
        }

        serde_json::from_slice(&output.stdout).map_err(|err| {
            DriverError::InvalidMetrics(format!(
                "{} (stdout: {})",
                err,
                String::from_utf8_lossy(&output.stdout).trim()
            ))
        })
    }
}

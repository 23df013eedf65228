use crate::{
    config::{Config, StorageType},
    driver::{DriverRequest, ScenarioDriver},
    execution_plan::{ExecutionPlan, RunUnit, StorageSpec},
    infrastructure::{InfraError, InfrastructureManager},
    results::{ResultsStore, RunResult, RunStatus},
};
use anyhow::{bail, Context};
use chrono::Utc;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drives an execution plan to completion, one unit at a time. Each unit gets
/// a fresh acquire/drive/record/teardown cycle so no unit inherits state from
/// the previous one.
pub struct BenchmarkRunner<'a> {
    config: &'a Config,
    infra: &'a InfrastructureManager,
    driver: &'a dyn ScenarioDriver,
    cancel: CancellationToken,
}

impl<'a> BenchmarkRunner<'a> {
    pub fn new(
        config: &'a Config,
        infra: &'a InfrastructureManager,
        driver: &'a dyn ScenarioDriver,
        cancel: CancellationToken,
    ) -> Self {
        BenchmarkRunner {
            config,
            infra,
            driver,
            cancel,
        }
    }

    /// Runs every unit in the plan. Returns Err only when the session must be
    /// aborted (repeated infrastructure failures); per-unit failures are
    /// recorded and the plan continues.
    pub async fn run(&self, plan: &ExecutionPlan, store: &mut ResultsStore) -> anyhow::Result<()> {
        let mut consecutive_infra_failures = 0u32;
        let threshold = self.config.global.infra.escalation_threshold;

        for unit in plan.units.iter() {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, stopping before {}", unit.run_id);
                println!("{} {}", "cancelled before".yellow(), unit.run_id);
                break;
            }

            println!("{} {}", "running".green(), unit.run_id);
            let started_at = Utc::now();

            let acquired = match self.acquire(unit).await {
                Ok(acquired) => acquired,
                Err(InfraError::StoragePoisoned(reason)) => {
                    // poisoned storage is a known, permanent condition for
                    // this session, not a fresh failure
                    warn!("skipping {}: {}", unit.run_id, reason);
                    println!("{} {}", "skipped".yellow(), unit.run_id);
                    self.record(store, unit, started_at, RunStatus::Skipped, None, Some(reason))?;
                    self.drain_warnings(store).await;
                    continue;
                }
                Err(err) => {
                    warn!("infrastructure failure for {}: {}", unit.run_id, err);
                    println!("{} {}", "failed".red(), unit.run_id);
                    self.record(
                        store,
                        unit,
                        started_at,
                        RunStatus::Failed,
                        None,
                        Some(err.to_string()),
                    )?;
                    self.teardown().await;
                    self.drain_warnings(store).await;

                    consecutive_infra_failures += 1;
                    if consecutive_infra_failures >= threshold {
                        bail!(
                            "aborting session after {} consecutive infrastructure failures",
                            consecutive_infra_failures
                        );
                    }
                    continue;
                }
            };
            consecutive_infra_failures = 0;

            let (status, metrics, error) = self.drive(unit, &acquired).await;

            match status {
                RunStatus::Success => println!("{} {}", "finished".green(), unit.run_id),
                RunStatus::TimedOut => println!("{} {}", "timed out".red(), unit.run_id),
                _ => println!("{} {}", "failed".red(), unit.run_id),
            }
            self.record(store, unit, started_at, status, metrics, error)?;

            if !self.config.global.keep_warm {
                self.teardown().await;
            }
            self.drain_warnings(store).await;
        }

        self.drain_warnings(store).await;
        Ok(())
    }

    /// Brings up everything the unit needs and hands back the storage path the
    /// driver should exercise.
    async fn acquire(&self, unit: &RunUnit) -> Result<PathBuf, InfraError> {
        let storage_path = match unit.storage {
            StorageSpec::Direct => {
                let data_path = self
                    .config
                    .database(unit.database)
                    .and_then(|db| db.connection_for(StorageType::Direct).data_path.clone());
                data_path.unwrap_or_else(|| PathBuf::from("."))
            }
            StorageSpec::Nfs { version } => self.infra.mount_nfs(version).await?,
        };

        // an engine without a managed service is driven over its configured
        // connection only (sqlite, or an externally managed server)
        match self.infra.database_service(unit.database) {
            Ok(name) => {
                let name = name.to_string();
                self.infra.start_service(&name).await?;
            }
            Err(InfraError::NoServiceForEngine(_)) => {}
            Err(err) => return Err(err),
        }

        Ok(storage_path)
    }

    /// Runs the scenario driver under the per-scenario timeout. Cancellation
    /// interrupts a running driver; the unit is recorded as failed.
    async fn drive(
        &self,
        unit: &RunUnit,
        storage_path: &Path,
    ) -> (RunStatus, Option<serde_json::Value>, Option<String>) {
        let database = match self.config.database(unit.database) {
            Some(database) => database,
            None => {
                return (
                    RunStatus::Failed,
                    None,
                    Some(format!("no configuration for engine {}", unit.database)),
                )
            }
        };

        let request = DriverRequest {
            engine: unit.database,
            storage: unit.storage,
            connection: database.connection_for(unit.storage.storage_type()),
            scenario: &unit.scenario,
            storage_path,
        };

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(
                unit.scenario.driver_timeout(),
                self.driver.run_scenario(&request),
            ) => outcome,
            _ = self.cancel.cancelled() => {
                return (
                    RunStatus::Failed,
                    None,
                    Some("cancelled while the scenario was running".to_string()),
                );
            }
        };

        match outcome {
            Ok(Ok(metrics)) => (RunStatus::Success, Some(metrics), None),
            Ok(Err(err)) => (RunStatus::Failed, None, Some(err.to_string())),
            Err(_) => (
                RunStatus::TimedOut,
                None,
                Some(format!(
                    "scenario exceeded its timeout of {}s",
                    unit.scenario.driver_timeout().as_secs()
                )),
            ),
        }
    }

    fn record(
        &self,
        store: &mut ResultsStore,
        unit: &RunUnit,
        started_at: chrono::DateTime<Utc>,
        status: RunStatus,
        metrics: Option<serde_json::Value>,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        store
            .record(RunResult {
                run_id: unit.run_id.clone(),
                database: unit.database,
                storage: unit.storage,
                scenario: unit.scenario.name.clone(),
                status,
                metrics,
                started_at,
                ended_at: Utc::now(),
                error,
            })
            .with_context(|| format!("unable to persist result for {}", unit.run_id))
    }

    /// Returns every service to Stopped and removes the client mount. Always
    /// best-effort; problems surface as manifest warnings.
    async fn teardown(&self) {
        self.infra.stop_all().await;
    }

    async fn drain_warnings(&self, store: &mut ResultsStore) {
        for warning in self.infra.take_warnings().await {
            store.add_warning(warning);
        }
    }
}

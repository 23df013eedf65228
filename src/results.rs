use crate::{config::EngineKind, execution_plan::StorageSpec};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
    TimedOut,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Skipped => write!(f, "skipped"),
            RunStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// The durable outcome of one run unit. Metrics are whatever the driver
/// returned, untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub database: EngineKind,
    pub storage: StorageSpec,
    pub scenario: String,
    pub status: RunStatus,
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: usize,
}

/// The session's external interface: everything the report generator needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_id: String,
    pub output_dir: PathBuf,
    /// Number of units in this session's execution plan.
    pub planned_units: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: SessionCounts,
    pub results: Vec<RunResult>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SessionManifest {
    pub fn fully_successful(&self) -> bool {
        self.results.len() == self.planned_units
            && self.results.iter().all(|r| r.status == RunStatus::Success)
    }
}

/// Append-only, crash-tolerant persistence for run results. Every record is
/// flushed to disk before the call returns.
pub struct ResultsStore {
    manifest_path: PathBuf,
    manifest: SessionManifest,
}

impl ResultsStore {
    pub fn create(
        output_root: &Path,
        session_id: &str,
        planned_units: usize,
    ) -> anyhow::Result<Self> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let output_dir = output_root.join(format!("run_{}", timestamp));
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

        let store = ResultsStore {
            manifest_path: output_dir.join("manifest.json"),
            manifest: SessionManifest {
                session_id: session_id.to_string(),
                output_dir,
                planned_units,
                started_at: Utc::now(),
                finished_at: None,
                counts: SessionCounts::default(),
                results: vec![],
                warnings: vec![],
            },
        };
        store.flush()?;
        Ok(store)
    }

    pub fn output_dir(&self) -> &Path {
        &self.manifest.output_dir
    }

    /// Records one result durably. Results are kept in plan order regardless
    /// of arrival order: run ids embed the plan sequence number, so ordering
    /// by that number restores the plan ordering even if a future parallel
    /// runner records out of order.
    pub fn record(&mut self, result: RunResult) -> anyhow::Result<()> {
        let unit_path = self
            .manifest
            .output_dir
            .join(format!("{}.json", result.run_id));
        let unit_json = serde_json::to_vec_pretty(&result)?;
        fs::write(&unit_path, unit_json)
            .with_context(|| format!("failed to write {}", unit_path.display()))?;

        let pos = self
            .manifest
            .results
            .binary_search_by(|r| plan_order(&r.run_id).cmp(&plan_order(&result.run_id)))
            .unwrap_or_else(|insert_at| insert_at);
        self.manifest.results.insert(pos, result);
        self.recount();
        self.flush()
    }

    pub fn add_warning(&mut self, warning: String) {
        self.manifest.warnings.push(warning);
    }

    fn recount(&mut self) {
        let mut counts = SessionCounts::default();
        for result in self.manifest.results.iter() {
            match result.status {
                RunStatus::Success => counts.success += 1,
                RunStatus::Failed => counts.failed += 1,
                RunStatus::Skipped => counts.skipped += 1,
                RunStatus::TimedOut => counts.timed_out += 1,
            }
        }
        self.manifest.counts = counts;
    }

    // write-temp, fsync, rename: a crash mid-flush leaves the previous
    // manifest intact
    fn flush(&self) -> anyhow::Result<()> {
        let tmp_path = self.manifest_path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&self.manifest)?;
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.manifest_path).with_context(|| {
            format!("failed to move manifest into place at {}", self.manifest_path.display())
        })?;
        Ok(())
    }

    pub fn finalize(mut self) -> anyhow::Result<SessionManifest> {
        self.manifest.finished_at = Some(Utc::now());
        self.flush()?;
        Ok(self.manifest)
    }

    /// Run ids already recorded in a previous session's output directory.
    /// Feeding these into the plan filter gives crash resume: the union of
    /// the old and new manifests covers every planned unit exactly once.
    pub fn recorded_run_ids(results_dir: &Path) -> anyhow::Result<HashSet<String>> {
        let manifest_path = results_dir.join("manifest.json");
        let json = fs::read(&manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let manifest: SessionManifest = serde_json::from_slice(&json)
            .with_context(|| format!("failed to parse {}", manifest_path.display()))?;
        Ok(manifest
            .results
            .into_iter()
            .map(|result| result.run_id)
            .collect())
    }
}

// the index prefix is zero-padded to three digits only, so plans of 1000+
// units would misorder under plain string comparison
fn plan_order(run_id: &str) -> (u64, &str) {
    match run_id.split_once('_') {
        Some((index, rest)) => match index.parse::<u64>() {
            Ok(index) => (index, rest),
            Err(_) => (u64::MAX, run_id),
        },
        None => (u64::MAX, run_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;

    fn result(run_id: &str, status: RunStatus) -> RunResult {
        RunResult {
            run_id: run_id.to_string(),
            database: EngineKind::Postgresql,
            storage: StorageSpec::Direct,
            scenario: "read_heavy".to_string(),
            status,
            metrics: None,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn records_are_durable_immediately() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = ResultsStore::create(dir.path(), "abc12", 2)?;

        store.record(result("001_postgresql_direct_read_heavy", RunStatus::Success))?;

        // the manifest on disk already contains the result
        let ids = ResultsStore::recorded_run_ids(store.output_dir())?;
        assert!(ids.contains("001_postgresql_direct_read_heavy"));

        // and the per-unit file exists
        assert!(store
            .output_dir()
            .join("001_postgresql_direct_read_heavy.json")
            .exists());
        Ok(())
    }

    #[test]
    fn out_of_order_records_end_up_in_plan_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = ResultsStore::create(dir.path(), "abc12", 3)?;

        store.record(result("003_postgresql_direct_c", RunStatus::Success))?;
        store.record(result("001_postgresql_direct_a", RunStatus::Failed))?;
        store.record(result("002_postgresql_direct_b", RunStatus::TimedOut))?;

        let manifest = store.finalize()?;
        let ids: Vec<&str> = manifest.results.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "001_postgresql_direct_a",
                "002_postgresql_direct_b",
                "003_postgresql_direct_c"
            ]
        );
        assert_eq!(manifest.counts.success, 1);
        assert_eq!(manifest.counts.failed, 1);
        assert_eq!(manifest.counts.timed_out, 1);
        assert!(manifest.finished_at.is_some());
        assert!(!manifest.fully_successful());
        Ok(())
    }

    #[test]
    fn ordering_follows_the_numeric_index_beyond_three_digits() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = ResultsStore::create(dir.path(), "abc12", 2)?;

        // "1000" sorts before "999" as a string but not as a plan index
        store.record(result("1000_postgresql_direct_b", RunStatus::Success))?;
        store.record(result("999_postgresql_direct_a", RunStatus::Success))?;

        let manifest = store.finalize()?;
        let ids: Vec<&str> = manifest.results.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["999_postgresql_direct_a", "1000_postgresql_direct_b"]);
        Ok(())
    }

    #[test]
    fn full_success_requires_every_planned_unit() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = ResultsStore::create(dir.path(), "abc12", 2)?;
        store.record(result("001_postgresql_direct_a", RunStatus::Success))?;

        let manifest = store.finalize()?;
        // one successful result, but two were planned
        assert!(!manifest.fully_successful());
        Ok(())
    }
}

use crate::config::{Config, EngineKind, NfsVersion, ScenarioSpec, StorageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};
use term_table::{
    row,
    row::Row,
    rows,
    table_cell::TableCell,
    Table, TableStyle,
};

/// One concrete storage configuration for a run unit. NFS carries exactly one
/// protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageSpec {
    Direct,
    Nfs { version: NfsVersion },
}

impl StorageSpec {
    pub fn storage_type(&self) -> StorageType {
        match self {
            StorageSpec::Direct => StorageType::Direct,
            StorageSpec::Nfs { .. } => StorageType::Nfs,
        }
    }

    pub fn nfs_version(&self) -> Option<NfsVersion> {
        match self {
            StorageSpec::Direct => None,
            StorageSpec::Nfs { version } => Some(*version),
        }
    }

    /// Filesystem and run-id friendly form, e.g. `direct` or `nfs-v3`.
    pub fn slug(&self) -> String {
        match self {
            StorageSpec::Direct => "direct".to_string(),
            StorageSpec::Nfs { version } => format!("nfs-{}", version),
        }
    }
}

impl fmt::Display for StorageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSpec::Direct => write!(f, "direct"),
            StorageSpec::Nfs { version } => write!(f, "nfs/{}", version),
        }
    }
}

/// One benchmark cell: a database engine, a storage configuration and a
/// scenario, plus its derived run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunUnit {
    pub run_id: String,
    pub database: EngineKind,
    pub storage: StorageSpec,
    pub scenario: ScenarioSpec,
}

/// Filters applied on top of the configuration model at plan-build time.
/// Narrowing by database/scenario/storage happens through the pure config
/// overrides; the plan filter only removes already-recorded units when
/// resuming a session.
#[derive(Debug, Clone, Default)]
pub struct PlanFilters {
    pub exclude_run_ids: HashSet<String>,
}

/// An ordered, immutable sequence of run units. A dry run renders it without
/// touching any infrastructure.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub generated_at: DateTime<Utc>,
    /// The filters the plan was built under.
    pub filters: PlanFilters,
    /// Units dropped by the resume filter.
    pub excluded: usize,
    pub units: Vec<RunUnit>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Human readable projection of the plan. Performs no side effects.
    pub fn render(&self) -> String {
        let mut rows = rows![row![
            TableCell::builder("#").build(),
            TableCell::builder("run id").build(),
            TableCell::builder("database").build(),
            TableCell::builder("storage").build(),
            TableCell::builder("scenario").build(),
            TableCell::builder("duration (s)").build()
        ]];
        for (idx, unit) in self.units.iter().enumerate() {
            rows.push(Row::new(vec![
                TableCell::new(format!("{}", idx + 1)),
                TableCell::new(&unit.run_id),
                TableCell::new(unit.database.to_string()),
                TableCell::new(unit.storage.to_string()),
                TableCell::new(&unit.scenario.name),
                TableCell::new(unit.scenario.duration.to_string()),
            ]));
        }

        let table = Table::builder()
            .rows(rows)
            .style(TableStyle::rounded())
            .build();
        let mut rendered = table.render();
        if self.excluded > 0 {
            let mut excluded: Vec<&str> = self
                .filters
                .exclude_run_ids
                .iter()
                .map(String::as_str)
                .collect();
            excluded.sort_unstable();
            rendered.push_str(&format!(
                "{} unit(s) excluded by filters: {}\n",
                self.excluded,
                excluded.join(", ")
            ));
        }
        rendered
    }
}

/// Expands the configuration into run units in a stable, documented order:
/// enabled databases in lexical engine order (outer), storage types in
/// configured order with one unit per configured NFS version (middle),
/// enabled scenarios in declaration order (inner).
///
/// Run ids are sequence numbers over the *unfiltered* cross product, so a
/// resume filter never renumbers the surviving units.
pub fn build_execution_plan(config: &Config, filters: &PlanFilters) -> ExecutionPlan {
    let mut units = vec![];
    let mut index = 0usize;

    for (engine, _) in config.enabled_databases() {
        for storage_type in config.storage.types.iter() {
            let storages: Vec<StorageSpec> = match storage_type {
                StorageType::Direct => vec![StorageSpec::Direct],
                StorageType::Nfs => config
                    .nfs
                    .as_ref()
                    .map(|nfs| {
                        nfs.versions
                            .iter()
                            .map(|version| StorageSpec::Nfs { version: *version })
                            .collect()
                    })
                    .unwrap_or_default(),
            };

            for storage in storages {
                for scenario in config.enabled_scenarios() {
                    index += 1;
                    let run_id = format!(
                        "{:03}_{}_{}_{}",
                        index,
                        engine,
                        storage.slug(),
                        scenario.name
                    );
                    units.push(RunUnit {
                        run_id,
                        database: engine,
                        storage,
                        scenario: scenario.clone(),
                    });
                }
            }
        }
    }

    let before = units.len();
    units.retain(|unit| !filters.exclude_run_ids.contains(&unit.run_id));

    ExecutionPlan {
        generated_at: Utc::now(),
        filters: filters.clone(),
        excluded: before - units.len(),
        units,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fixture() -> Config {
        Config::try_from_path(Path::new("./fixtures/nfsbench.success.yaml"))
            .expect("fixture should load")
    }

    #[test]
    fn plan_expansion_is_deterministic() {
        let cfg = fixture();
        let a = build_execution_plan(&cfg, &PlanFilters::default());
        let b = build_execution_plan(&cfg, &PlanFilters::default());
        assert_eq!(a.units, b.units);
    }

    #[test]
    fn plan_size_matches_the_cross_product() {
        let cfg = fixture();
        let plan = build_execution_plan(&cfg, &PlanFilters::default());

        // 1 enabled database x 2 enabled scenarios x (direct + 2 nfs versions)
        assert_eq!(plan.len(), 1 * 2 * (1 + 2));
    }

    #[test]
    fn databases_outer_storage_middle_scenarios_inner() {
        let cfg = fixture();
        let plan = build_execution_plan(&cfg, &PlanFilters::default());

        let cells: Vec<(EngineKind, StorageSpec, &str)> = plan
            .units
            .iter()
            .map(|u| (u.database, u.storage, u.scenario.name.as_str()))
            .collect();

        use EngineKind::Postgresql as Pg;
        use NfsVersion::*;
        assert_eq!(
            cells,
            vec![
                (Pg, StorageSpec::Direct, "read_heavy"),
                (Pg, StorageSpec::Direct, "heavy_inserts"),
                (Pg, StorageSpec::Nfs { version: V3 }, "read_heavy"),
                (Pg, StorageSpec::Nfs { version: V3 }, "heavy_inserts"),
                (Pg, StorageSpec::Nfs { version: V4 }, "read_heavy"),
                (Pg, StorageSpec::Nfs { version: V4 }, "heavy_inserts"),
            ]
        );
    }

    #[test]
    fn single_version_example_yields_two_units() {
        let cfg = Config::try_from_str(
            r#"
databases:
  postgresql: { enabled: true }
  mysql: { enabled: false }
scenarios:
  - { name: read_heavy, enabled: true, duration: 60 }
storage: { types: [direct, nfs] }
nfs:
  export: "127.0.0.1:/srv/bench"
  mount_point: /mnt/bench
  versions: [v3]
"#,
        )
        .expect("config should load");

        let plan = build_execution_plan(&cfg, &PlanFilters::default());
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.units[0].run_id, "001_postgresql_direct_read_heavy");
        assert_eq!(plan.units[1].run_id, "002_postgresql_nfs-v3_read_heavy");
    }

    #[test]
    fn resume_exclusion_keeps_run_ids_stable() {
        let cfg = fixture();
        let full = build_execution_plan(&cfg, &PlanFilters::default());

        let mut exclude = HashSet::new();
        exclude.insert(full.units[0].run_id.clone());
        exclude.insert(full.units[1].run_id.clone());

        let resumed = build_execution_plan(
            &cfg,
            &PlanFilters {
                exclude_run_ids: exclude,
            },
        );
        assert_eq!(resumed.excluded, 2);
        assert_eq!(resumed.len(), full.len() - 2);
        assert_eq!(resumed.units[0].run_id, full.units[2].run_id);

        // the plan remembers what it was filtered by and the dry-run view
        // shows it
        assert_eq!(resumed.filters.exclude_run_ids.len(), 2);
        let rendered = resumed.render();
        assert!(rendered.contains("excluded by filters"));
        assert!(rendered.contains(&full.units[0].run_id));
    }

    #[test]
    fn render_lists_every_unit() {
        let cfg = fixture();
        let plan = build_execution_plan(&cfg, &PlanFilters::default());
        let rendered = plan.render();
        for unit in plan.units.iter() {
            assert!(rendered.contains(&unit.run_id));
        }
    }
}

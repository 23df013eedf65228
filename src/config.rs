use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown database engine: {0}")]
    UnknownEngine(String),

    #[error("duplicate scenario name: {0}")]
    DuplicateScenario(String),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("no storage types configured")]
    NoStorageTypes,

    #[error("malformed storage option: {0}")]
    MalformedStorageOption(String),

    #[error("nfs storage is configured but the nfs section is missing")]
    MissingNfsSection,

    #[error("nfs storage is configured but no nfs versions are set")]
    MissingNfsVersions,

    #[error("no databases are enabled")]
    NoDatabasesEnabled,

    #[error("no scenarios are enabled")]
    NoScenariosEnabled,

    #[error("invalid service definition: {0}")]
    InvalidService(String),
}

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********

/// The fixed set of database engines the benchmark knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgresql,
    Mysql,
    Sqlite,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Postgresql => write!(f, "postgresql"),
            EngineKind::Mysql => write!(f, "mysql"),
            EngineKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(EngineKind::Postgresql),
            "mysql" => Ok(EngineKind::Mysql),
            "sqlite" => Ok(EngineKind::Sqlite),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Direct,
    Nfs,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Direct => write!(f, "direct"),
            StorageType::Nfs => write!(f, "nfs"),
        }
    }
}

impl FromStr for StorageType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(StorageType::Direct),
            "nfs" => Ok(StorageType::Nfs),
            other => Err(ConfigError::MalformedStorageOption(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NfsVersion {
    V3,
    V4,
}

impl NfsVersion {
    /// The value passed to `mount -o vers=`.
    pub fn mount_arg(&self) -> &'static str {
        match self {
            NfsVersion::V3 => "3",
            NfsVersion::V4 => "4",
        }
    }
}

impl fmt::Display for NfsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NfsVersion::V3 => write!(f, "v3"),
            NfsVersion::V4 => write!(f, "v4"),
        }
    }
}

impl FromStr for NfsVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v3" | "3" => Ok(NfsVersion::V3),
            "v4" | "4" => Ok(NfsVersion::V4),
            other => Err(ConfigError::MalformedStorageOption(format!(
                "unknown nfs version: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParams {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Where the engine keeps its data files (for sqlite this is the db file).
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Connection parameters for the instance backed by local storage.
    #[serde(default)]
    pub direct: ConnectionParams,
    /// Connection parameters for the instance backed by the NFS mount.
    #[serde(default)]
    pub nfs: ConnectionParams,
    /// Engine specific tuning, passed through to the driver untouched.
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

impl DatabaseSpec {
    pub fn connection_for(&self, storage: StorageType) -> &ConnectionParams {
        match storage {
            StorageType::Direct => &self.direct,
            StorageType::Nfs => &self.nfs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Workload duration in seconds.
    pub duration: u64,
    /// Hard per-run timeout in seconds. Defaults to duration plus a grace
    /// period for setup and teardown inside the driver.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
}

impl ScenarioSpec {
    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(self.duration + 60))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    pub types: Vec<StorageType>,
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            types: vec![StorageType::Direct, StorageType::Nfs],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NfsConfig {
    /// The export in `host:/path` form.
    pub export: String,
    pub mount_point: PathBuf,
    pub versions: Vec<NfsVersion>,
    #[serde(default)]
    pub mount_options: Option<String>,
    /// Override for the mount command. Supports `{version}`, `{options}`,
    /// `{export}` and `{mountpoint}` placeholders. Useful for sudo wrappers.
    #[serde(default)]
    pub mount_command: Option<String>,
    #[serde(default)]
    pub umount_command: Option<String>,
}

impl NfsConfig {
    pub fn mount_command_for(&self, version: NfsVersion) -> String {
        let options = self.mount_options.as_deref().unwrap_or("rw,hard");
        let template = self
            .mount_command
            .as_deref()
            .unwrap_or("mount -t nfs -o vers={version},{options} {export} {mountpoint}");
        template
            .replace("{version}", version.mount_arg())
            .replace("{options}", options)
            .replace("{export}", &self.export)
            .replace("{mountpoint}", &self.mount_point.to_string_lossy())
    }

    pub fn unmount_command(&self) -> String {
        let template = self
            .umount_command
            .as_deref()
            .unwrap_or("umount {mountpoint}");
        template.replace("{mountpoint}", &self.mount_point.to_string_lossy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Redirect {
    Null,
    Parent,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    Database,
    NfsServer,
    Sidecar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    pub name: String,
    pub role: ServiceRole,
    /// Required when role is `database`.
    #[serde(default)]
    pub engine: Option<EngineKind>,
    pub up: String,
    #[serde(default)]
    pub down: Option<String>,
    /// Health probe command. Exit code zero means healthy. A service without
    /// one is considered running as soon as `up` has been issued.
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub redirect: Option<Redirect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfraSettings {
    #[serde(default = "default_health_retries")]
    pub health_retries: u32,
    #[serde(default = "default_health_backoff_ms")]
    pub health_backoff_ms: u64,
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,
    /// Upper bound on teardown commands (service down, unmount).
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Consecutive infrastructure failures tolerated before the session is
    /// aborted.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

impl Default for InfraSettings {
    fn default() -> Self {
        InfraSettings {
            health_retries: default_health_retries(),
            health_backoff_ms: default_health_backoff_ms(),
            status_timeout_secs: default_status_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

impl InfraSettings {
    pub fn health_backoff(&self) -> Duration {
        Duration::from_millis(self.health_backoff_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub log_level: Option<String>,
    /// Leave services and mounts in place between run units. Off by default:
    /// warm caches bias the next measurement.
    #[serde(default)]
    pub keep_warm: bool,
    /// Scenario driver command template. Supports `{engine}`, `{scenario}`,
    /// `{storage}` and `{storage_path}` placeholders; the full request is
    /// also passed as JSON in the NFSBENCH_REQUEST environment variable.
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub infra: InfraSettings,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            output_dir: default_output_dir(),
            log_level: None,
            keep_warm: false,
            driver: default_driver(),
            infra: InfraSettings::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_driver() -> String {
    "nfsbench-driver --engine {engine} --scenario {scenario} --storage {storage} --storage-path {storage_path}".to_string()
}

fn default_health_retries() -> u32 {
    10
}

fn default_health_backoff_ms() -> u64 {
    500
}

fn default_status_timeout_secs() -> u64 {
    5
}

fn default_stop_timeout_secs() -> u64 {
    30
}

fn default_escalation_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub storage: StorageSection,
    pub databases: BTreeMap<EngineKind, DatabaseSpec>,
    pub scenarios: Vec<ScenarioSpec>,
    #[serde(default)]
    pub nfs: Option<NfsConfig>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl Config {
    pub fn try_from_path(path: &Path) -> Result<Config, ConfigError> {
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Config::try_from_str(&config_str)
    }

    pub fn try_from_str(conf_str: &str) -> Result<Config, ConfigError> {
        let config = serde_yaml::from_str::<Config>(conf_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // scenario names must be unique within a session
        let mut seen = HashSet::new();
        for scenario in self.scenarios.iter() {
            if !seen.insert(scenario.name.as_str()) {
                return Err(ConfigError::DuplicateScenario(scenario.name.clone()));
            }
        }

        if self.storage.types.is_empty() {
            return Err(ConfigError::NoStorageTypes);
        }
        let mut storage_seen = HashSet::new();
        for storage_type in self.storage.types.iter() {
            if !storage_seen.insert(storage_type) {
                return Err(ConfigError::MalformedStorageOption(format!(
                    "duplicate storage type: {}",
                    storage_type
                )));
            }
        }

        if self.storage.types.contains(&StorageType::Nfs) {
            let nfs = self.nfs.as_ref().ok_or(ConfigError::MissingNfsSection)?;
            if nfs.versions.is_empty() {
                return Err(ConfigError::MissingNfsVersions);
            }
            let mut version_seen = HashSet::new();
            for version in nfs.versions.iter() {
                if !version_seen.insert(version) {
                    return Err(ConfigError::MalformedStorageOption(format!(
                        "duplicate nfs version: {}",
                        version
                    )));
                }
            }
        }

        if !self.databases.values().any(|db| db.enabled) {
            return Err(ConfigError::NoDatabasesEnabled);
        }
        if !self.scenarios.iter().any(|s| s.enabled) {
            return Err(ConfigError::NoScenariosEnabled);
        }

        let mut service_seen = HashSet::new();
        for service in self.services.iter() {
            if !service_seen.insert(service.name.as_str()) {
                return Err(ConfigError::InvalidService(format!(
                    "duplicate service name: {}",
                    service.name
                )));
            }
            if service.role == ServiceRole::Database && service.engine.is_none() {
                return Err(ConfigError::InvalidService(format!(
                    "service {} has role database but no engine",
                    service.name
                )));
            }
        }

        Ok(())
    }

    /// Enabled databases in lexical engine order. The execution plan builder
    /// relies on this ordering for reproducibility.
    pub fn enabled_databases(&self) -> Vec<(EngineKind, &DatabaseSpec)> {
        self.databases
            .iter()
            .filter(|(_, db)| db.enabled)
            .map(|(kind, db)| (*kind, db))
            .collect()
    }

    /// Enabled scenarios in the order they are declared.
    pub fn enabled_scenarios(&self) -> Vec<&ScenarioSpec> {
        self.scenarios.iter().filter(|s| s.enabled).collect()
    }

    pub fn find_scenario(&self, scenario_name: &str) -> Option<&ScenarioSpec> {
        self.scenarios.iter().find(|s| s.name == scenario_name)
    }

    pub fn database(&self, engine: EngineKind) -> Option<&DatabaseSpec> {
        self.databases.get(&engine)
    }

    // ---- pure overrides ----
    //
    // Each consumes the model and returns a re-validated one; the CLI applies
    // these before the execution plan is built.

    pub fn disable_all_databases_except(
        mut self,
        engines: &[EngineKind],
    ) -> Result<Config, ConfigError> {
        for (kind, db) in self.databases.iter_mut() {
            db.enabled = db.enabled && engines.contains(kind);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn filter_scenarios(mut self, names: &[String]) -> Result<Config, ConfigError> {
        for name in names {
            if self.find_scenario(name).is_none() {
                return Err(ConfigError::UnknownScenario(name.clone()));
            }
        }
        for scenario in self.scenarios.iter_mut() {
            scenario.enabled = scenario.enabled && names.contains(&scenario.name);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn filter_storage_types(mut self, types: &[StorageType]) -> Result<Config, ConfigError> {
        self.storage.types.retain(|t| types.contains(t));
        self.validate()?;
        Ok(self)
    }

    pub fn set_nfs_versions(mut self, versions: Vec<NfsVersion>) -> Result<Config, ConfigError> {
        match self.nfs.as_mut() {
            Some(nfs) => nfs.versions = versions,
            None => return Err(ConfigError::MissingNfsSection),
        }
        self.validate()?;
        Ok(self)
    }

    pub fn set_output_dir(mut self, path: &Path) -> Result<Config, ConfigError> {
        self.global.output_dir = path.to_path_buf();
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn can_load_config_file() -> Result<(), ConfigError> {
        let cfg = Config::try_from_path(Path::new("./fixtures/nfsbench.success.yaml"))?;
        assert_eq!(cfg.enabled_databases().len(), 1);
        assert_eq!(cfg.enabled_scenarios().len(), 2);
        Ok(())
    }

    #[test]
    fn bundled_template_is_a_valid_config() -> Result<(), ConfigError> {
        Config::try_from_str(include_str!("../config/default.yaml"))?;
        Ok(())
    }

    #[test]
    fn duplicate_scenario_name_is_rejected() {
        let res = Config::try_from_path(Path::new("./fixtures/nfsbench.duplicate_scenario.yaml"));
        assert!(matches!(res, Err(ConfigError::DuplicateScenario(name)) if name == "read_heavy"));
    }

    #[test]
    fn nfs_without_versions_is_rejected() {
        let res = Config::try_from_path(Path::new("./fixtures/nfsbench.missing_nfs_versions.yaml"));
        assert!(matches!(res, Err(ConfigError::MissingNfsVersions)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let res = Config::try_from_str(
            r#"
databases:
  postgresql: { enabled: true }
scenarios:
  - { name: a, duration: 10 }
storage: { types: [direct] }
surprise: true
"#,
        );
        assert!(matches!(res, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn unknown_engine_kind_is_rejected() {
        assert!(matches!(
            EngineKind::from_str("mariadb"),
            Err(ConfigError::UnknownEngine(_))
        ));

        let res = Config::try_from_str(
            r#"
databases:
  mariadb: { enabled: true }
scenarios:
  - { name: a, duration: 10 }
storage: { types: [direct] }
"#,
        );
        assert!(matches!(res, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn filtering_scenarios_is_pure_and_strict() -> Result<(), ConfigError> {
        let cfg = Config::try_from_path(Path::new("./fixtures/nfsbench.success.yaml"))?;
        let filtered = cfg.filter_scenarios(&["read_heavy".to_string()])?;
        assert_eq!(filtered.enabled_scenarios().len(), 1);

        let cfg = Config::try_from_path(Path::new("./fixtures/nfsbench.success.yaml"))?;
        let res = cfg.filter_scenarios(&["nope".to_string()]);
        assert!(matches!(res, Err(ConfigError::UnknownScenario(_))));
        Ok(())
    }

    #[test]
    fn disabling_every_database_is_rejected() -> Result<(), ConfigError> {
        let cfg = Config::try_from_path(Path::new("./fixtures/nfsbench.success.yaml"))?;
        let res = cfg.disable_all_databases_except(&[EngineKind::Mysql]);
        assert!(matches!(res, Err(ConfigError::NoDatabasesEnabled)));
        Ok(())
    }

    #[test]
    fn storage_type_filter_cannot_empty_the_set() -> Result<(), ConfigError> {
        let cfg = Config::try_from_path(Path::new("./fixtures/nfsbench.success.yaml"))?;
        let res = cfg.filter_storage_types(&[]);
        assert!(matches!(res, Err(ConfigError::NoStorageTypes)));
        Ok(())
    }

    #[test]
    fn mount_command_uses_version_and_options() -> Result<(), ConfigError> {
        let cfg = Config::try_from_path(Path::new("./fixtures/nfsbench.success.yaml"))?;
        let nfs = cfg.nfs.expect("fixture has an nfs section");
        let cmd = nfs.mount_command_for(NfsVersion::V3);
        assert!(cmd.contains("vers=3"));
        assert!(cmd.contains("127.0.0.1:/srv/nfsbench"));
        Ok(())
    }
}

use crate::{
    config::{Config, EngineKind, InfraSettings, NfsConfig, NfsVersion, ServiceRole, ServiceSpec},
    process_control::{self, CommandOutcome},
};
use serde::Serialize;
use std::{fmt, fs, path::PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum InfraError {
    #[error("service {service} failed its health check after {attempts} attempts")]
    Timeout { service: String, attempts: u32 },

    #[error("service {service} is unavailable: {detail}")]
    Unavailable { service: String, detail: String },

    #[error("no service named {0} is configured")]
    UnknownService(String),

    #[error("no database service configured for engine {0}")]
    NoServiceForEngine(EngineKind),

    #[error("nfs storage is not configured")]
    NfsUnconfigured,

    #[error("nfs storage was marked unusable earlier in this session: {0}")]
    StoragePoisoned(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    Unknown,
    Healthy,
    Unhealthy(String),
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Unknown => write!(f, "unknown"),
            Health::Healthy => write!(f, "healthy"),
            Health::Unhealthy(detail) => write!(f, "unhealthy ({})", detail),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub health: Health,
}

#[derive(Debug)]
struct ServiceEntry {
    state: ServiceState,
    health: Health,
    pid: Option<u32>,
}

#[derive(Debug)]
struct ManagedService {
    spec: ServiceSpec,
    // one mutex per service serializes lifecycle transitions for that name
    entry: Mutex<ServiceEntry>,
}

#[derive(Debug, Default)]
struct MountState {
    mounted: Option<NfsVersion>,
    /// Set once an unmount fails; NFS storage is unusable for the rest of
    /// the session after that.
    poisoned: Option<String>,
}

/// Sole owner of service lifecycle state. The benchmark runner never starts
/// or stops anything except through this type.
pub struct InfrastructureManager {
    services: Vec<ManagedService>,
    settings: InfraSettings,
    nfs: Option<NfsConfig>,
    mount: Mutex<MountState>,
    warnings: Mutex<Vec<String>>,
}

impl InfrastructureManager {
    pub fn new(config: &Config) -> Self {
        let services = config
            .services
            .iter()
            .cloned()
            .map(|spec| ManagedService {
                spec,
                entry: Mutex::new(ServiceEntry {
                    state: ServiceState::Stopped,
                    health: Health::Unknown,
                    pid: None,
                }),
            })
            .collect();

        InfrastructureManager {
            services,
            settings: config.global.infra.clone(),
            nfs: config.nfs.clone(),
            mount: Mutex::new(MountState::default()),
            warnings: Mutex::new(vec![]),
        }
    }

    fn find(&self, name: &str) -> Result<&ManagedService, InfraError> {
        self.services
            .iter()
            .find(|service| service.spec.name == name)
            .ok_or_else(|| InfraError::UnknownService(name.to_string()))
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|service| service.spec.name.clone())
            .collect()
    }

    /// The name of the database service backing the given engine.
    pub fn database_service(&self, engine: EngineKind) -> Result<&str, InfraError> {
        self.services
            .iter()
            .find(|service| {
                service.spec.role == ServiceRole::Database && service.spec.engine == Some(engine)
            })
            .map(|service| service.spec.name.as_str())
            .ok_or(InfraError::NoServiceForEngine(engine))
    }

    fn nfs_server_service(&self) -> Option<&ManagedService> {
        self.services
            .iter()
            .find(|service| service.spec.role == ServiceRole::NfsServer)
    }

    pub async fn service_state(&self, name: &str) -> Result<(ServiceState, Health), InfraError> {
        let service = self.find(name)?;
        let entry = service.entry.lock().await;
        Ok((entry.state, entry.health.clone()))
    }

    /// Starts a service and waits for it to become healthy. Idempotent: a
    /// service that is already Running is left untouched (no second process,
    /// no second mount).
    pub async fn start_service(&self, name: &str) -> Result<(), InfraError> {
        let service = self.find(name)?;
        let mut entry = service.entry.lock().await;

        if entry.state == ServiceState::Running {
            debug!("service {} already running", name);
            return Ok(());
        }

        info!("starting service {}", name);
        entry.state = ServiceState::Starting;
        match process_control::run_command_detached(&service.spec.up, service.spec.redirect) {
            Ok(pid) => entry.pid = Some(pid),
            Err(err) => {
                entry.state = ServiceState::Failed;
                entry.health = Health::Unknown;
                return Err(InfraError::Unavailable {
                    service: name.to_string(),
                    detail: err.to_string(),
                });
            }
        }

        let Some(health_cmd) = service.spec.health.as_deref() else {
            // nothing to probe; trust the up command
            entry.state = ServiceState::Running;
            entry.health = Health::Unknown;
            return Ok(());
        };

        let mut last_detail = String::new();
        for attempt in 1..=self.settings.health_retries {
            match process_control::run_command(health_cmd, self.settings.status_timeout()).await {
                CommandOutcome::Success => {
                    entry.state = ServiceState::Running;
                    entry.health = Health::Healthy;
                    info!("service {} is healthy after {} attempt(s)", name, attempt);
                    return Ok(());
                }
                CommandOutcome::Failure(detail) => {
                    debug!("service {} not healthy yet: {}", name, detail);
                    last_detail = detail;
                }
            }
            tokio::time::sleep(self.settings.health_backoff() * attempt).await;
        }

        entry.state = ServiceState::Failed;
        entry.health = Health::Unhealthy(last_detail);
        Err(InfraError::Timeout {
            service: name.to_string(),
            attempts: self.settings.health_retries,
        })
    }

    /// Stops a service. Works from any state, including Failed, and never
    /// leaves the entry in a non-Stopped state: a failing down command is
    /// logged and recorded as a teardown warning instead of propagating.
    pub async fn stop_service(&self, name: &str) -> Result<(), InfraError> {
        self.stop_service_inner(name, false).await
    }

    /// Issues the down command even when this process has no lifecycle state
    /// for the service. A fresh `stop` invocation cannot know what an earlier
    /// process left running, so recorded state must not short-circuit it.
    pub async fn force_stop_service(&self, name: &str) -> Result<(), InfraError> {
        self.stop_service_inner(name, true).await
    }

    async fn stop_service_inner(&self, name: &str, force: bool) -> Result<(), InfraError> {
        let service = self.find(name)?;
        let mut entry = service.entry.lock().await;

        if entry.state == ServiceState::Stopped && !force {
            return Ok(());
        }

        info!("stopping service {}", name);
        entry.state = ServiceState::Stopping;
        if let Some(down) = &service.spec.down {
            let down = match entry.pid {
                Some(pid) => down.replace("{pid}", &pid.to_string()),
                None => down.clone(),
            };
            let outcome = process_control::run_command(&down, self.settings.stop_timeout()).await;
            if let CommandOutcome::Failure(detail) = outcome {
                warn!("failed to stop service {}: {}", name, detail);
                self.push_warning(format!("service {}: down command failed: {}", name, detail))
                    .await;
            }
        }

        entry.state = ServiceState::Stopped;
        entry.health = Health::Unknown;
        entry.pid = None;
        Ok(())
    }

    fn ordered(&self, stopping: bool) -> Vec<&ManagedService> {
        // storage must be up before the databases that sit on it, and torn
        // down after them
        let rank = |role: ServiceRole| match role {
            ServiceRole::NfsServer => 0,
            ServiceRole::Sidecar => 1,
            ServiceRole::Database => 2,
        };
        let mut services: Vec<&ManagedService> = self.services.iter().collect();
        services.sort_by_key(|service| rank(service.spec.role));
        if stopping {
            services.reverse();
        }
        services
    }

    pub async fn start_all(&self) -> Result<(), InfraError> {
        for service in self.ordered(false) {
            self.start_service(&service.spec.name).await?;
        }
        Ok(())
    }

    /// Best-effort: visits every service even when one fails to stop.
    pub async fn stop_all(&self) {
        self.unmount_nfs().await;
        for service in self.ordered(true) {
            if let Err(err) = self.stop_service(&service.spec.name).await {
                warn!("stop_all: {}", err);
            }
        }
    }

    /// `stop_all` without trusting recorded state: every service gets its down
    /// command and the unmount is attempted unconditionally. Used by the CLI,
    /// which starts from a blank lifecycle slate.
    pub async fn force_stop_all(&self) {
        self.force_unmount_nfs().await;
        for service in self.ordered(true) {
            if let Err(err) = self.force_stop_service(&service.spec.name).await {
                warn!("force_stop_all: {}", err);
            }
        }
    }

    /// Read-only snapshot. Each health probe is bounded by the status
    /// timeout; an unreachable service reports unhealthy detail instead of
    /// hanging. Recorded lifecycle states are not mutated.
    pub async fn status(&self) -> Vec<ServiceStatus> {
        let mut statuses = vec![];
        for service in self.services.iter() {
            let state = {
                let entry = service.entry.lock().await;
                entry.state
            };
            let health = match service.spec.health.as_deref() {
                Some(cmd) => {
                    match process_control::run_command(cmd, self.settings.status_timeout()).await {
                        CommandOutcome::Success => Health::Healthy,
                        CommandOutcome::Failure(detail) => Health::Unhealthy(detail),
                    }
                }
                None => Health::Unknown,
            };
            // a fresh process has no lifecycle history; a passing probe is
            // evidence the service is running regardless of recorded state
            let state = match (state, &health) {
                (ServiceState::Stopped, Health::Healthy) => ServiceState::Running,
                (state, _) => state,
            };
            statuses.push(ServiceStatus {
                name: service.spec.name.clone(),
                state,
                health,
            });
        }
        statuses
    }

    // ---- NFS lifecycle ----

    fn nfs(&self) -> Result<&NfsConfig, InfraError> {
        self.nfs.as_ref().ok_or(InfraError::NfsUnconfigured)
    }

    pub async fn nfs_poisoned(&self) -> bool {
        self.mount.lock().await.poisoned.is_some()
    }

    /// Establishes the client mount for the requested protocol version and
    /// returns the storage path, verifying writability before handing it out.
    /// A live mount of the same version is reused; a different version is
    /// unmounted first.
    pub async fn mount_nfs(&self, version: NfsVersion) -> Result<PathBuf, InfraError> {
        let nfs = self.nfs()?;
        let mut mount = self.mount.lock().await;

        if let Some(reason) = &mount.poisoned {
            return Err(InfraError::StoragePoisoned(reason.clone()));
        }

        // the export must be serving before anything touches the mount
        if let Some(server) = self.nfs_server_service() {
            let name = server.spec.name.clone();
            self.start_service(&name).await?;
        }

        if mount.mounted == Some(version) {
            debug!("reusing existing nfs {} mount", version);
            return Ok(nfs.mount_point.clone());
        }
        if mount.mounted.is_some() {
            self.unmount_locked(&mut mount, nfs).await?;
        }

        fs::create_dir_all(&nfs.mount_point).map_err(|err| InfraError::Unavailable {
            service: "nfs-mount".to_string(),
            detail: format!("unable to create mount point: {}", err),
        })?;

        let cmd = nfs.mount_command_for(version);
        info!("mounting nfs {}: {}", version, cmd);
        if let CommandOutcome::Failure(detail) =
            process_control::run_command(&cmd, self.settings.stop_timeout()).await
        {
            return Err(InfraError::Unavailable {
                service: format!("nfs-mount-{}", version),
                detail,
            });
        }

        // writability probe; a read-only or stale mount fails the unit here
        // rather than deep inside the driver
        let probe = nfs.mount_point.join(".nfsbench_probe");
        let probe_result = fs::write(&probe, b"probe").and_then(|_| fs::remove_file(&probe));
        if let Err(err) = probe_result {
            let _ =
                process_control::run_command(&nfs.unmount_command(), self.settings.stop_timeout())
                    .await;
            return Err(InfraError::Unavailable {
                service: format!("nfs-mount-{}", version),
                detail: format!("mount is not writable: {}", err),
            });
        }

        mount.mounted = Some(version);
        Ok(nfs.mount_point.clone())
    }

    /// Best-effort unmount. A failure is logged, recorded as a warning and
    /// poisons NFS storage for the remainder of the session; it never blocks
    /// stopping other services.
    pub async fn unmount_nfs(&self) {
        let Some(nfs) = self.nfs.as_ref() else {
            return;
        };
        let mut mount = self.mount.lock().await;
        let _ = self.unmount_locked(&mut mount, nfs).await;
    }

    /// Issues the unmount command regardless of recorded mount state, for
    /// stop invocations in a fresh process. A failure here usually just means
    /// nothing was mounted, so it is logged but neither warned nor poisoning.
    pub async fn force_unmount_nfs(&self) {
        let Some(nfs) = self.nfs.as_ref() else {
            return;
        };
        let mut mount = self.mount.lock().await;
        let cmd = nfs.unmount_command();
        info!("unmounting nfs: {}", cmd);
        if let CommandOutcome::Failure(detail) =
            process_control::run_command(&cmd, self.settings.stop_timeout()).await
        {
            debug!("unmount: {}", detail);
        }
        mount.mounted = None;
    }

    async fn unmount_locked(
        &self,
        mount: &mut MountState,
        nfs: &NfsConfig,
    ) -> Result<(), InfraError> {
        if mount.mounted.is_none() {
            return Ok(());
        }

        let cmd = nfs.unmount_command();
        info!("unmounting nfs: {}", cmd);
        match process_control::run_command(&cmd, self.settings.stop_timeout()).await {
            CommandOutcome::Success => {
                mount.mounted = None;
                Ok(())
            }
            CommandOutcome::Failure(detail) => {
                warn!(
                    "failed to unmount {}: {}",
                    nfs.mount_point.display(),
                    detail
                );
                self.push_warning(format!(
                    "failed to unmount {}: {}",
                    nfs.mount_point.display(),
                    detail
                ))
                .await;
                mount.mounted = None;
                mount.poisoned = Some(detail.clone());
                Err(InfraError::StoragePoisoned(detail))
            }
        }
    }

    async fn push_warning(&self, warning: String) {
        self.warnings.lock().await.push(warning);
    }

    /// Drains accumulated teardown warnings; the runner folds them into the
    /// session manifest.
    pub async fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.lock().await)
    }
}

#[cfg(test)]
#[cfg(target_family = "unix")]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config_with_services(services_yaml: &str) -> Config {
        let yaml = format!(
            r#"
databases:
  postgresql: {{ enabled: true }}
scenarios:
  - {{ name: smoke, duration: 5 }}
storage: {{ types: [direct] }}
global:
  infra:
    health_retries: 2
    health_backoff_ms: 10
    status_timeout_secs: 1
    stop_timeout_secs: 5
services:
{}
"#,
            services_yaml
        );
        Config::try_from_str(&yaml).expect("test config should load")
    }

    #[tokio::test]
    async fn start_service_is_idempotent() -> Result<(), InfraError> {
        let cfg = config_with_services(
            r#"
  - name: worker
    role: sidecar
    up: "sleep 30"
    down: "kill {pid}"
    health: "true"
    redirect: "null"
"#,
        );
        let infra = InfrastructureManager::new(&cfg);

        infra.start_service("worker").await?;
        let (state, health) = infra.service_state("worker").await?;
        assert_eq!(state, ServiceState::Running);
        assert_eq!(health, Health::Healthy);

        // second start is a no-op success, not a second process
        infra.start_service("worker").await?;
        let (state, _) = infra.service_state("worker").await?;
        assert_eq!(state, ServiceState::Running);

        infra.stop_service("worker").await?;
        let (state, _) = infra.service_state("worker").await?;
        assert_eq!(state, ServiceState::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn unhealthy_service_fails_with_timeout_and_can_still_stop() {
        let cfg = config_with_services(
            r#"
  - name: broken
    role: sidecar
    up: "sleep 30"
    down: "kill {pid}"
    health: "false"
    redirect: "null"
"#,
        );
        let infra = InfrastructureManager::new(&cfg);

        let res = infra.start_service("broken").await;
        assert!(matches!(
            res,
            Err(InfraError::Timeout { attempts: 2, .. })
        ));
        let (state, health) = infra.service_state("broken").await.unwrap();
        assert_eq!(state, ServiceState::Failed);
        assert!(matches!(health, Health::Unhealthy(_)));

        // stop must succeed even from Failed
        infra.stop_service("broken").await.unwrap();
        let (state, _) = infra.service_state("broken").await.unwrap();
        assert_eq!(state, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let cfg = config_with_services(
            r#"
  - name: worker
    role: sidecar
    up: "sleep 1"
    redirect: "null"
"#,
        );
        let infra = InfrastructureManager::new(&cfg);
        assert!(matches!(
            infra.start_service("nope").await,
            Err(InfraError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn status_is_bounded_and_read_only() {
        let cfg = config_with_services(
            r#"
  - name: slow
    role: sidecar
    up: "sleep 30"
    health: "sleep 30"
    redirect: "null"
"#,
        );
        let infra = InfrastructureManager::new(&cfg);

        let statuses = infra.status().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, ServiceState::Stopped);
        match &statuses[0].health {
            Health::Unhealthy(detail) => assert!(detail.contains("timed out")),
            other => panic!("expected a bounded unhealthy probe, got {:?}", other),
        }

        // the snapshot must not have mutated recorded state
        let (state, _) = infra.service_state("slow").await.unwrap();
        assert_eq!(state, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn failed_unmount_poisons_nfs_storage() {
        let mount_dir = tempfile::tempdir().expect("tempdir");
        let yaml = format!(
            r#"
databases:
  postgresql: {{ enabled: true }}
scenarios:
  - {{ name: smoke, duration: 5 }}
storage: {{ types: [direct, nfs] }}
global:
  infra: {{ health_retries: 2, health_backoff_ms: 10, status_timeout_secs: 1, stop_timeout_secs: 5 }}
nfs:
  export: "127.0.0.1:/srv/bench"
  mount_point: {}
  versions: [v3]
  mount_command: "true"
  umount_command: "false"
"#,
            mount_dir.path().display()
        );
        let cfg = Config::try_from_str(&yaml).expect("test config should load");
        let infra = InfrastructureManager::new(&cfg);

        let path = infra.mount_nfs(NfsVersion::V3).await.expect("mount");
        assert_eq!(path, mount_dir.path());

        // same version is reused without a second mount
        infra.mount_nfs(NfsVersion::V3).await.expect("remount");

        // the unmount command fails; storage must be poisoned but teardown
        // must not error
        infra.unmount_nfs().await;
        assert!(infra.nfs_poisoned().await);
        assert!(matches!(
            infra.mount_nfs(NfsVersion::V3).await,
            Err(InfraError::StoragePoisoned(_))
        ));
        assert!(!infra.take_warnings().await.is_empty());
    }

    #[tokio::test]
    async fn fresh_manager_stop_still_issues_down_and_unmount() {
        let dir = tempfile::tempdir().expect("tempdir");
        let down_marker = dir.path().join("down.ran");
        let umount_marker = dir.path().join("umount.ran");
        let yaml = format!(
            r#"
databases:
  postgresql: {{ enabled: true }}
scenarios:
  - {{ name: smoke, duration: 5 }}
storage: {{ types: [direct, nfs] }}
global:
  infra: {{ health_retries: 2, health_backoff_ms: 10, status_timeout_secs: 1, stop_timeout_secs: 5 }}
nfs:
  export: "127.0.0.1:/srv/bench"
  mount_point: {mount_point}
  versions: [v3]
  umount_command: "touch {umount_marker}"
services:
  - name: worker
    role: sidecar
    up: "sleep 30"
    down: "touch {down_marker}"
    redirect: "null"
"#,
            mount_point = dir.path().display(),
            down_marker = down_marker.display(),
            umount_marker = umount_marker.display()
        );
        let cfg = Config::try_from_str(&yaml).expect("test config should load");

        // nothing was ever started in this process; the recorded state for
        // every service is Stopped and no mount is recorded
        let infra = InfrastructureManager::new(&cfg);
        infra.force_stop_all().await;

        assert!(down_marker.exists());
        assert!(umount_marker.exists());
        let (state, _) = infra.service_state("worker").await.unwrap();
        assert_eq!(state, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn status_reports_running_when_the_probe_passes() {
        let cfg = config_with_services(
            r#"
  - name: external
    role: sidecar
    up: "sleep 30"
    health: "true"
    redirect: "null"
"#,
        );
        let infra = InfrastructureManager::new(&cfg);

        // this process never started the service, but the probe sees it
        let statuses = infra.status().await;
        assert_eq!(statuses[0].state, ServiceState::Running);
        assert_eq!(statuses[0].health, Health::Healthy);
    }

    #[tokio::test]
    async fn start_and_stop_visit_services_in_role_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let log = dir.path().join("order.log");
        // each health probe greps for the service's own line, so start_service
        // only returns once the detached up command has hit the log
        let yaml = format!(
            r#"
databases:
  postgresql: {{ enabled: true }}
scenarios:
  - {{ name: smoke, duration: 5 }}
storage: {{ types: [direct] }}
global:
  infra: {{ health_retries: 10, health_backoff_ms: 10, status_timeout_secs: 1, stop_timeout_secs: 5 }}
services:
  - name: db
    role: database
    engine: postgresql
    up: "sh -c 'echo db-up >> {log}'"
    down: "sh -c 'echo db-down >> {log}'"
    health: "grep -q db-up {log}"
    redirect: "null"
  - name: side
    role: sidecar
    up: "sh -c 'echo side-up >> {log}'"
    down: "sh -c 'echo side-down >> {log}'"
    health: "grep -q side-up {log}"
    redirect: "null"
  - name: nfs
    role: nfs-server
    up: "sh -c 'echo nfs-up >> {log}'"
    down: "sh -c 'echo nfs-down >> {log}'"
    health: "grep -q nfs-up {log}"
    redirect: "null"
"#,
            log = log.display()
        );
        let cfg = Config::try_from_str(&yaml)?;
        let infra = InfrastructureManager::new(&cfg);

        infra.start_all().await?;
        infra.stop_all().await;

        let lines: Vec<String> = std::fs::read_to_string(&log)?
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "nfs-up", "side-up", "db-up", "db-down", "side-down", "nfs-down"
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn switching_nfs_versions_unmounts_in_between() -> anyhow::Result<()> {
        let mount_dir = tempfile::tempdir()?;
        let log = mount_dir.path().join("mount.log");
        let yaml = format!(
            r#"
databases:
  postgresql: {{ enabled: true }}
scenarios:
  - {{ name: smoke, duration: 5 }}
storage: {{ types: [direct, nfs] }}
global:
  infra: {{ health_retries: 2, health_backoff_ms: 10, status_timeout_secs: 1, stop_timeout_secs: 5 }}
nfs:
  export: "127.0.0.1:/srv/bench"
  mount_point: {mount_point}
  versions: [v3, v4]
  mount_command: "sh -c 'echo mount-{{version}} >> {log}'"
  umount_command: "sh -c 'echo umount >> {log}'"
"#,
            mount_point = mount_dir.path().display(),
            log = log.display()
        );
        let cfg = Config::try_from_str(&yaml)?;
        let infra = InfrastructureManager::new(&cfg);

        infra.mount_nfs(NfsVersion::V3).await.expect("mount v3");
        infra.mount_nfs(NfsVersion::V4).await.expect("mount v4");
        // same version again is a reuse, not a remount
        infra.mount_nfs(NfsVersion::V4).await.expect("reuse v4");

        let lines: Vec<String> = std::fs::read_to_string(&log)?
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines, vec!["mount-3", "umount", "mount-4"]);
        Ok(())
    }
}

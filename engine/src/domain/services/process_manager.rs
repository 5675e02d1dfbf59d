//! Process manager
//! Authoritative registry of managed processes and their live instances.
//! Sole mutator of instance state.

use crate::constants::process::{BASE_PORT, PORT_PROBE_ATTEMPTS, RESTART_DELAY};
use crate::domain::entities::{Instance, InstanceSnapshot, ManagedProcess, ProcessSpec};
use crate::domain::error::{DomainError, Result};
use crate::domain::ports::{ExitHandle, ProcessExecutor, SpawnConfig};
use crate::domain::services::VersionManager;
use crate::domain::value_objects::{extract_tag_from_filename, InstanceStatus, Version};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ProcessManager {
    processes: RwLock<HashMap<String, Arc<ManagedProcess>>>,
    executor: Arc<dyn ProcessExecutor>,
    version_manager: RwLock<Option<Arc<VersionManager>>>,
    data_dir: PathBuf,
    binaries_dir: PathBuf,
    /// Port allocation cursor. A hint, not an authority: the TCP bind probe
    /// is the true gate, and two near-simultaneous starts may both advance
    /// past the same winning candidate.
    next_port: Mutex<u16>,
    restart_delay: Duration,
    cancel: CancellationToken,
}

impl ProcessManager {
    pub fn new(
        specs: Vec<ProcessSpec>,
        executor: Arc<dyn ProcessExecutor>,
        data_dir: impl Into<PathBuf>,
        binaries_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        let processes = specs
            .into_iter()
            .map(|spec| {
                let name = spec.name.clone();
                (name, Arc::new(ManagedProcess::new(spec)))
            })
            .collect();

        Self {
            processes: RwLock::new(processes),
            executor,
            version_manager: RwLock::new(None),
            data_dir: data_dir.into(),
            binaries_dir: binaries_dir.into(),
            next_port: Mutex::new(BASE_PORT),
            restart_delay: RESTART_DELAY,
            cancel,
        }
    }

    /// Override the auto-restart back-off (used by tests)
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn set_version_manager(&self, version_manager: Arc<VersionManager>) {
        *self
            .version_manager
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(version_manager);
    }

    fn version_manager(&self) -> Option<Arc<VersionManager>> {
        self.version_manager
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Make sure every configured process has a runnable binary on disk,
    /// downloading the latest release when necessary.
    pub async fn initialize(&self) -> Result<()> {
        let specs: Vec<ProcessSpec> = {
            let processes = self.processes.read().unwrap_or_else(|e| e.into_inner());
            processes.values().map(|p| p.spec().clone()).collect()
        };

        for spec in specs {
            self.ensure_binary_exists(&spec).await?;
        }
        Ok(())
    }

    async fn ensure_binary_exists(&self, spec: &ProcessSpec) -> Result<()> {
        if let Some(configured) = &spec.binary_path {
            let resolved = resolve_binary_path(configured, spec.work_dir.as_deref());
            if resolved.exists() {
                debug!(process = %spec.name, path = %resolved.display(), "binary already present");
                return Ok(());
            }
            let version_manager = match (spec.repository.is_empty(), self.version_manager()) {
                (false, Some(vm)) => vm,
                _ => {
                    return Err(DomainError::BinaryNotFound(format!(
                        "{}: binary not found and no repository configured",
                        spec.name
                    )))
                }
            };

            info!(process = %spec.name, repository = %spec.repository, "provisioning binary from latest release");
            let version = version_manager.resolve(&spec.repository, "latest").await?;
            let dest = versioned_binary_path(&self.binaries_dir, &spec.repository, &version.tag);
            if !dest.exists() {
                let name = spec.name.clone();
                let tag = version.tag.clone();
                version_manager
                    .download(&version, &dest, &move |downloaded, total| {
                        if total > 0 {
                            debug!(
                                process = %name,
                                tag = %tag,
                                percent = downloaded as f64 / total as f64 * 100.0,
                                "downloading binary"
                            );
                        }
                    })
                    .await?;
            }
            if let Some(parent) = resolved.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;
            }
            // Windows has no symlinks worth relying on; copy into place
            std::fs::copy(&dest, &resolved)
                .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;
            info!(process = %spec.name, tag = %version.tag, path = %resolved.display(), "binary provisioned");
            return Ok(());
        }

        // No pinned path: the versioned layout is authoritative
        if self
            .detect_latest_binary(&spec.name, &spec.repository)
            .is_ok()
        {
            return Ok(());
        }
        let version_manager = match (spec.repository.is_empty(), self.version_manager()) {
            (false, Some(vm)) => vm,
            _ => {
                return Err(DomainError::BinaryNotFound(format!(
                    "{}: no versioned binary and no repository configured",
                    spec.name
                )))
            }
        };
        let version = version_manager.resolve(&spec.repository, "latest").await?;
        let dest = versioned_binary_path(&self.binaries_dir, &spec.repository, &version.tag);
        if !dest.exists() {
            version_manager.download(&version, &dest, &|_, _| {}).await?;
            info!(process = %spec.name, tag = %version.tag, path = %dest.display(), "binary provisioned");
        }
        Ok(())
    }

    fn managed(&self, name: &str) -> Result<Arc<ManagedProcess>> {
        self.processes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::ProcessNotFound(name.to_string()))
    }

    /// Start a new instance of `name`.
    ///
    /// A failed start never leaves a half-registered instance: the instance
    /// is only added to the registry after the child is running.
    pub async fn start(self: &Arc<Self>, name: &str) -> Result<InstanceSnapshot> {
        let managed = self.managed(name)?;
        let spec = managed.spec().clone();

        let running = managed.running_instances().len();
        if running >= spec.max_instances {
            return Err(DomainError::MaxInstancesReached {
                name: name.to_string(),
                max: spec.max_instances,
            });
        }

        let start_port = *self.next_port.lock().unwrap_or_else(|e| e.into_inner());
        let port = find_available_port(start_port, PORT_PROBE_ATTEMPTS)?;
        *self.next_port.lock().unwrap_or_else(|e| e.into_inner()) = port + 1;

        let binary = match &spec.binary_path {
            Some(configured) => resolve_binary_path(configured, spec.work_dir.as_deref()),
            None => {
                let detected = self.detect_latest_binary(name, &spec.repository)?;
                debug!(process = %name, path = %detected.display(), "auto-detected binary");
                detected
            }
        };
        if !binary.exists() {
            return Err(DomainError::BinaryNotFound(binary.display().to_string()));
        }

        // Record the running version when the filename carries a tag
        if let Some(version_manager) = self.version_manager() {
            let filename = binary
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(tag) = extract_tag_from_filename(&filename) {
                if let Err(e) = version_manager
                    .set_current(name, Version::from_tag(&tag))
                    .await
                {
                    warn!(process = %name, error = %e, "failed to record version");
                } else {
                    debug!(process = %name, tag = %tag, port = port, "recorded version from binary path");
                }
            }
        }

        let env_file = self.env_file_path(name);
        if !env_file.exists() {
            return Err(DomainError::EnvFileMissing(env_file.display().to_string()));
        }

        info!(process = %name, port = port, binary = %binary.display(), "starting instance");
        let handle = self
            .executor
            .spawn(SpawnConfig {
                binary,
                args: spec.args.clone(),
                working_dir: spec.work_dir.clone(),
                env_file: env_file.clone(),
                extra_env: vec![("GRPC_PORT".to_string(), port.to_string())],
            })
            .await?;

        let instance = Arc::new(Instance::new(
            name,
            handle.pid,
            port,
            env_file,
            handle.stderr,
        ));
        instance.set_status(InstanceStatus::Running);
        managed.add_instance(instance.clone());

        let snapshot = instance.snapshot();
        tokio::spawn(Self::monitor(
            self.clone(),
            managed,
            instance,
            handle.exit,
        ));

        Ok(snapshot)
    }

    /// Exit monitor: blocks on the child, settles the final status, removes
    /// the instance, and schedules an auto-restart after a failed exit.
    async fn monitor(
        manager: Arc<ProcessManager>,
        managed: Arc<ManagedProcess>,
        instance: Arc<Instance>,
        exit: ExitHandle,
    ) {
        let code = exit.await;
        instance.mark_exited();

        let deliberate = matches!(
            instance.status(),
            InstanceStatus::Stopping | InstanceStatus::Stopped
        );
        let failed = if deliberate || code == 0 {
            instance.set_status(InstanceStatus::Stopped);
            info!(
                process = %instance.process_name(),
                instance = %instance.id(),
                pid = instance.pid(),
                port = instance.port(),
                "instance stopped"
            );
            false
        } else {
            instance.set_status(InstanceStatus::Failed);
            let stderr = instance.stderr().contents();
            if stderr.is_empty() {
                error!(
                    process = %instance.process_name(),
                    instance = %instance.id(),
                    pid = instance.pid(),
                    port = instance.port(),
                    exit_code = code,
                    "instance failed (no stderr output)"
                );
            } else {
                error!(
                    process = %instance.process_name(),
                    instance = %instance.id(),
                    pid = instance.pid(),
                    port = instance.port(),
                    exit_code = code,
                    stderr = %stderr,
                    "instance failed"
                );
            }
            true
        };

        managed.remove_instance(instance.id());

        if failed && managed.spec().auto_restart {
            tokio::select! {
                _ = manager.cancel.cancelled() => return,
                _ = tokio::time::sleep(manager.restart_delay) => {}
            }
            if let Err(e) = manager.start(instance.process_name()).await {
                warn!(
                    process = %instance.process_name(),
                    error = %e,
                    "auto-restart failed"
                );
            }
        }
    }

    /// Forceful stop of one instance
    pub async fn stop(&self, name: &str, instance_id: &str) -> Result<()> {
        let managed = self.managed(name)?;
        let instance = managed
            .instance(instance_id)
            .ok_or_else(|| DomainError::InstanceNotFound(instance_id.to_string()))?;

        instance.set_status(InstanceStatus::Stopping);
        if let Err(e) = self.executor.kill(instance.pid()).await {
            if !instance.has_exited() {
                return Err(e);
            }
        }
        instance.wait_exited().await;
        instance.set_status(InstanceStatus::Stopped);
        managed.remove_instance(instance_id);
        Ok(())
    }

    /// Graceful stop: termination signal first, forceful kill after
    /// `timeout`. The instance is always removed.
    pub async fn stop_gracefully(
        &self,
        name: &str,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<()> {
        let managed = self.managed(name)?;
        let instance = managed
            .instance(instance_id)
            .ok_or_else(|| DomainError::InstanceNotFound(instance_id.to_string()))?;

        instance.set_status(InstanceStatus::Stopping);
        info!(
            process = %name,
            instance = %instance_id,
            pid = instance.pid(),
            timeout = ?timeout,
            "initiating graceful shutdown"
        );

        if let Err(e) = self
            .executor
            .request_termination(instance.pid(), instance.port())
            .await
        {
            warn!(process = %name, instance = %instance_id, error = %e, "termination signal failed, forcing kill");
            return self.force_kill(&managed, &instance).await;
        }

        match tokio::time::timeout(timeout, instance.wait_exited()).await {
            Ok(()) => {
                info!(process = %name, instance = %instance_id, "instance exited gracefully");
                instance.set_status(InstanceStatus::Stopped);
                managed.remove_instance(instance_id);
                Ok(())
            }
            Err(_) => {
                warn!(process = %name, instance = %instance_id, "graceful timeout reached, forcing kill");
                self.force_kill(&managed, &instance).await
            }
        }
    }

    async fn force_kill(
        &self,
        managed: &Arc<ManagedProcess>,
        instance: &Arc<Instance>,
    ) -> Result<()> {
        if let Err(e) = self.executor.kill(instance.pid()).await {
            if !instance.has_exited() {
                warn!(pid = instance.pid(), error = %e, "force kill failed");
            }
        }
        instance.wait_exited().await;
        instance.set_status(InstanceStatus::Stopped);
        managed.remove_instance(instance.id());
        Ok(())
    }

    /// Concurrent forceful stop of every instance of `name`
    pub async fn stop_all(&self, name: &str) -> Result<()> {
        let managed = self.managed(name)?;
        let instances = managed.instances();

        let results =
            join_all(instances.iter().map(|inst| self.stop(name, inst.id()))).await;

        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Internal(format!(
                "failed to stop some instances: {}",
                errors.join("; ")
            )))
        }
    }

    /// Read-only snapshot of every instance of `name`
    pub fn status(&self, name: &str) -> Result<Vec<InstanceSnapshot>> {
        let managed = self.managed(name)?;
        Ok(managed.instances().iter().map(|i| i.snapshot()).collect())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .processes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn repository_of(&self, name: &str) -> Option<String> {
        self.processes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|p| p.spec().repository.clone())
            .filter(|r| !r.is_empty())
    }

    pub fn spec_of(&self, name: &str) -> Option<ProcessSpec> {
        self.processes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|p| p.spec().clone())
    }

    pub fn env_file_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.env"))
    }

    /// Cancel the root context and stop everything
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let names = self.list();
        let results = join_all(names.iter().map(|name| self.stop_all(name))).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(process = %name, error = %e, "errors while stopping during shutdown");
            }
        }
    }

    /// Newest versioned binary under `binaries/<repoBasename>/`
    fn detect_latest_binary(&self, name: &str, repository: &str) -> Result<PathBuf> {
        let base = repo_basename(repository).unwrap_or(name);
        let dir = self.binaries_dir.join(base);

        let entries = std::fs::read_dir(&dir)
            .map_err(|_| DomainError::BinaryNotFound(format!("{name}: {} unreadable", dir.display())))?;

        let mut latest: Option<(String, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(tag) = extract_tag_from_filename(&filename) else {
                continue;
            };
            // Plain string comparison is the documented ordering model
            if latest.as_ref().map(|(t, _)| tag > *t).unwrap_or(true) {
                latest = Some((tag, path));
            }
        }

        latest
            .map(|(_, path)| path)
            .ok_or_else(|| DomainError::BinaryNotFound(format!("{name}: no versioned file in {}", dir.display())))
    }
}

/// Basename of an `owner/repo` identifier
pub fn repo_basename(repository: &str) -> Option<&str> {
    repository.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Destination for a downloaded artifact:
/// `binaries/<repoBasename>/<repoBasename>_<tag>.exe`
pub fn versioned_binary_path(binaries_dir: &Path, repository: &str, tag: &str) -> PathBuf {
    let base = repo_basename(repository).unwrap_or(repository);
    binaries_dir.join(base).join(format!("{base}_{tag}.exe"))
}

fn resolve_binary_path(configured: &Path, work_dir: Option<&Path>) -> PathBuf {
    if configured.is_absolute() {
        return configured.to_path_buf();
    }
    match work_dir {
        Some(dir) => dir.join(configured),
        None => configured.to_path_buf(),
    }
}

/// Probe up to `attempts` consecutive candidates from `start` with a TCP
/// bind; the first successful bind is closed and adopted. Ports are not
/// reserved: the bind is the gate, the cursor only a hint.
fn find_available_port(start: u16, attempts: u16) -> Result<u16> {
    for offset in 0..attempts {
        let port = start + offset;
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => {
                drop(listener);
                return Ok(port);
            }
            Err(_) => continue,
        }
    }
    Err(DomainError::PortExhausted { start, attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockExecutor;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        manager: Arc<ProcessManager>,
        executor: Arc<MockExecutor>,
        _dirs: TempDir,
    }

    fn fixture(specs: Vec<ProcessSpec>) -> Fixture {
        let dirs = TempDir::new().unwrap();
        let data_dir = dirs.path().join("data");
        let binaries_dir = dirs.path().join("binaries");
        std::fs::create_dir_all(&data_dir).unwrap();

        for spec in &specs {
            std::fs::write(data_dir.join(format!("{}.env", spec.name)), "KEY=value\n").unwrap();
            // Pinned binary that exists
            let bin = dirs.path().join(format!("{}_v1.0.0.exe", spec.name));
            std::fs::write(&bin, b"exe").unwrap();
        }

        let specs = specs
            .into_iter()
            .map(|mut spec| {
                if spec.binary_path.is_none() {
                    spec.binary_path =
                        Some(dirs.path().join(format!("{}_v1.0.0.exe", spec.name)));
                }
                spec
            })
            .collect();

        let executor = Arc::new(MockExecutor::new());
        let manager = Arc::new(
            ProcessManager::new(
                specs,
                executor.clone(),
                data_dir,
                binaries_dir,
                CancellationToken::new(),
            )
            .with_restart_delay(Duration::from_millis(50)),
        );
        Fixture {
            manager,
            executor,
            _dirs: dirs,
        }
    }

    fn spec(name: &str, max: usize) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            repository: "owner/repo".to_string(),
            max_instances: max,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_registers_running_instance() {
        let fx = fixture(vec![spec("svc", 2)]);
        let snap = fx.manager.start("svc").await.unwrap();
        assert_eq!(snap.status, InstanceStatus::Running);
        assert!(snap.pid > 0);
        assert!(snap.port >= BASE_PORT);
        assert_eq!(fx.manager.status("svc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_unknown_process_is_rejected() {
        let fx = fixture(vec![spec("svc", 2)]);
        let err = fx.manager.start("ghost").await.unwrap_err();
        assert!(matches!(err, DomainError::ProcessNotFound(_)));
    }

    #[tokio::test]
    async fn test_max_instances_enforced() {
        let fx = fixture(vec![spec("svc", 1)]);
        fx.manager.start("svc").await.unwrap();
        let err = fx.manager.start("svc").await.unwrap_err();
        assert!(matches!(err, DomainError::MaxInstancesReached { .. }));
    }

    #[tokio::test]
    async fn test_missing_env_file_fails_start() {
        let fx = fixture(vec![spec("svc", 2)]);
        std::fs::remove_file(fx.manager.env_file_path("svc")).unwrap();
        let err = fx.manager.start("svc").await.unwrap_err();
        assert!(matches!(err, DomainError::EnvFileMissing(_)));
        assert!(fx.manager.status("svc").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_spawn_leaves_no_instance() {
        let fx = fixture(vec![spec("svc", 2)]);
        fx.executor
            .fail_spawn
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(fx.manager.start("svc").await.is_err());
        assert!(fx.manager.status("svc").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_then_stop_round_trip() {
        let fx = fixture(vec![spec("svc", 2)]);
        let before = fx.manager.status("svc").unwrap().len();
        let snap = fx.manager.start("svc").await.unwrap();
        fx.manager.stop("svc", &snap.id).await.unwrap();
        assert_eq!(fx.manager.status("svc").unwrap().len(), before);
        assert_eq!(fx.executor.live_children(), 0);
    }

    #[tokio::test]
    async fn test_deliberate_stop_does_not_auto_restart() {
        let mut s = spec("svc", 2);
        s.auto_restart = true;
        let fx = fixture(vec![s]);
        let snap = fx.manager.start("svc").await.unwrap();
        fx.manager.stop("svc", &snap.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fx.manager.status("svc").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_exit_triggers_auto_restart() {
        let mut s = spec("svc", 2);
        s.auto_restart = true;
        let fx = fixture(vec![s]);
        let snap = fx.manager.start("svc").await.unwrap();
        // Crash without any stderr output: still transitions to failed and
        // restarts after the back-off.
        fx.executor.exit_pid(snap.pid, 3);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let instances = fx.manager.status("svc").unwrap();
        assert_eq!(instances.len(), 1);
        assert_ne!(instances[0].id, snap.id);
        assert_eq!(instances[0].status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_clean_exit_does_not_auto_restart() {
        let mut s = spec("svc", 2);
        s.auto_restart = true;
        let fx = fixture(vec![s]);
        let snap = fx.manager.start("svc").await.unwrap();
        fx.executor.exit_pid(snap.pid, 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(fx.manager.status("svc").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_graceful_stop_timeout_promoted_to_kill() {
        let fx = fixture(vec![spec("svc", 2)]);
        let snap = fx.manager.start("svc").await.unwrap();
        // The mock ignores the termination request, so the graceful window
        // elapses and the stop is promoted to a forceful kill.
        fx.manager
            .stop_gracefully("svc", &snap.id, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(fx.manager.status("svc").unwrap().is_empty());
        assert_eq!(fx.executor.term_requests.lock().unwrap().len(), 1);
        assert_eq!(fx.executor.kill_requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_graceful_stop_clean_exit_skips_kill() {
        let fx = fixture(vec![spec("svc", 2)]);
        fx.executor
            .honor_termination
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let snap = fx.manager.start("svc").await.unwrap();
        fx.manager
            .stop_gracefully("svc", &snap.id, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(fx.manager.status("svc").unwrap().is_empty());
        assert!(fx.executor.kill_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_stops_every_instance() {
        let fx = fixture(vec![spec("svc", 3)]);
        for _ in 0..3 {
            fx.manager.start("svc").await.unwrap();
        }
        fx.manager.stop_all("svc").await.unwrap();
        assert!(fx.manager.status("svc").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_leaves_no_children() {
        let fx = fixture(vec![spec("a", 2), spec("b", 2)]);
        fx.manager.start("a").await.unwrap();
        fx.manager.start("b").await.unwrap();
        fx.manager.shutdown().await;
        assert_eq!(fx.executor.live_children(), 0);
        assert!(fx.manager.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_distinct_instances_get_distinct_ports() {
        let fx = fixture(vec![spec("svc", 3)]);
        let a = fx.manager.start("svc").await.unwrap();
        let b = fx.manager.start("svc").await.unwrap();
        assert_ne!(a.port, b.port);
    }

    #[test]
    fn test_port_probe_skips_occupied_ports() {
        // Hold two consecutive ports; the probe must land on the third.
        let base = 46101;
        let _a = TcpListener::bind(("0.0.0.0", base)).unwrap();
        let _b = TcpListener::bind(("0.0.0.0", base + 1)).unwrap();
        let port = find_available_port(base, 10).unwrap();
        assert_eq!(port, base + 2);
    }

    #[test]
    fn test_port_probe_exhaustion_is_distinguishable() {
        let base = 46201;
        let _held: Vec<TcpListener> = (0..10)
            .map(|i| TcpListener::bind(("0.0.0.0", base + i)).unwrap())
            .collect();
        let err = find_available_port(base, 10).unwrap_err();
        assert!(matches!(err, DomainError::PortExhausted { .. }));
    }

    #[test]
    fn test_detect_latest_binary_prefers_greatest_tag() {
        let dirs = TempDir::new().unwrap();
        let bin_dir = dirs.path().join("binaries").join("repo");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join("repo_v1.2.3.exe"), b"old").unwrap();
        std::fs::write(bin_dir.join("repo_v1.12.1.exe"), b"newer").unwrap();
        std::fs::write(bin_dir.join("repo.exe"), b"unversioned").unwrap();

        let manager = ProcessManager::new(
            vec![],
            Arc::new(MockExecutor::new()),
            dirs.path().join("data"),
            dirs.path().join("binaries"),
            CancellationToken::new(),
        );
        let path = manager.detect_latest_binary("svc", "owner/repo").unwrap();
        // Lexicographic over "vX.Y.Z": v1.2.3 > v1.12.1 — the documented
        // comparison model, correct only for aligned field widths.
        assert_eq!(path.file_name().unwrap(), "repo_v1.2.3.exe");
    }

    #[test]
    fn test_versioned_binary_path_layout() {
        let path = versioned_binary_path(Path::new("binaries"), "owner/R", "v1.2.3");
        assert_eq!(path, PathBuf::from("binaries/R/R_v1.2.3.exe"));
    }
}

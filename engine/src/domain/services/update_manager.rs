//! Update manager
//! Staged hot-deploy pipeline with repository-level download coordination
//! and update status broadcast.

use crate::constants::update::{RETIRE_TIMEOUT, WARMUP, WATCHER_CHANNEL_CAPACITY};
use crate::domain::error::{DomainError, Result};
use crate::domain::services::process_manager::versioned_binary_path;
use crate::domain::services::{ProcessManager, VersionManager};
use crate::domain::value_objects::{InstanceStatus, UpdateStage, UpdateStatus, VersionInfo};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

pub struct UpdateManager {
    process_manager: Arc<ProcessManager>,
    version_manager: Arc<VersionManager>,
    binaries_dir: PathBuf,
    /// At most one UpdateStatus with completed=false per name
    updates: Mutex<HashMap<String, UpdateStatus>>,
    /// Repository-scoped download mutexes, lazily allocated per identifier.
    /// Guarantees at-most-one concurrent download per repository across all
    /// logical names that share it.
    repo_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Watcher bag keyed by update id; removal on disconnect is a linear
    /// scan during broadcast
    watchers: Mutex<HashMap<String, Vec<mpsc::Sender<UpdateStatus>>>>,
    warmup: Duration,
    retire_timeout: Duration,
}

impl UpdateManager {
    pub fn new(
        process_manager: Arc<ProcessManager>,
        version_manager: Arc<VersionManager>,
        binaries_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let binaries_dir = binaries_dir.into();
        std::fs::create_dir_all(&binaries_dir).map_err(|e| {
            DomainError::Internal(format!("create {}: {e}", binaries_dir.display()))
        })?;
        Ok(Self {
            process_manager,
            version_manager,
            binaries_dir,
            updates: Mutex::new(HashMap::new()),
            repo_locks: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            warmup: WARMUP,
            retire_timeout: RETIRE_TIMEOUT,
        })
    }

    /// Override the warm-up and retire windows (used by tests)
    pub fn with_timings(mut self, warmup: Duration, retire_timeout: Duration) -> Self {
        self.warmup = warmup;
        self.retire_timeout = retire_timeout;
        self
    }

    /// Begin an update of `name` to `target_tag` (empty or `"latest"` means
    /// latest). Returns the update id; the pipeline runs in the background
    /// and is observable via `status`/`subscribe`.
    pub fn update(self: &Arc<Self>, name: &str, target_tag: &str, force: bool) -> Result<String> {
        let update_id = format!("upd_{}_{}", name, Utc::now().timestamp());
        {
            // Check and claim atomically: at most one non-completed status
            let mut updates = self.updates.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(status) = updates.get(name) {
                if !status.completed {
                    return Err(DomainError::UpdateInProgress(name.to_string()));
                }
            }
            updates.insert(name.to_string(), UpdateStatus::new(name, &update_id));
        }

        let this = self.clone();
        let name = name.to_string();
        let target = target_tag.to_string();
        tokio::spawn(async move {
            this.perform_update(&name, &target, force).await;
        });

        Ok(update_id)
    }

    /// Rollback = update to the previous (or an explicit historical) tag
    /// with force. Fails when history holds fewer than two entries.
    pub async fn rollback(self: &Arc<Self>, name: &str, target_tag: &str) -> Result<String> {
        let version = if target_tag.is_empty() {
            self.version_manager.previous(name).await?
        } else {
            let info = self.version_manager.load_info(name).await?;
            info.history
                .iter()
                .find(|v| v.tag == target_tag)
                .cloned()
                .ok_or_else(|| DomainError::VersionNotInHistory {
                    name: name.to_string(),
                    tag: target_tag.to_string(),
                })?
        };
        self.update(name, &version.tag, true)
    }

    pub fn status(&self, name: &str) -> Option<UpdateStatus> {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Attach a watcher to an update id. The current frame is replayed
    /// immediately when the update is already known.
    pub fn subscribe(&self, update_id: &str) -> mpsc::Receiver<UpdateStatus> {
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);
        let current = self
            .updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|s| s.update_id == update_id)
            .cloned();
        if let Some(status) = current {
            let _ = tx.try_send(status);
        }
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(update_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub async fn check_for_updates(&self, name: &str, repository: &str) -> Result<VersionInfo> {
        self.version_manager.check_for_updates(name, repository).await
    }

    /// Store + broadcast one status transition. Frames to watchers with a
    /// full channel are dropped silently; closed watchers are pruned.
    fn set_status(&self, status: UpdateStatus) {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(status.process_name.clone(), status.clone());

        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = watchers.get_mut(&status.update_id) {
            list.retain(|tx| match tx.try_send(status.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            });
            if list.is_empty() {
                watchers.remove(&status.update_id);
            }
        }
    }

    fn current_status(&self, name: &str) -> UpdateStatus {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_else(|| UpdateStatus::new(name, ""))
    }

    fn repo_lock(&self, repository: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.repo_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(repository.to_string())
            .or_default()
            .clone()
    }

    async fn perform_update(self: &Arc<Self>, name: &str, target_tag: &str, force: bool) {
        info!(process = %name, target = %target_tag, force = force, "starting update");
        let mut status = self.current_status(name);

        let Some(repository) = self.process_manager.repository_of(name) else {
            status.fail("failed to get repository for process");
            self.set_status(status);
            return;
        };

        // Stage 1: resolve the target release
        status.stage = UpdateStage::FetchingVersion;
        status.message = "Fetching version information".to_string();
        status.progress = 10.0;
        self.set_status(status.clone());

        let target_version = match self.version_manager.resolve(&repository, target_tag).await {
            Ok(v) => v,
            Err(e) => {
                warn!(process = %name, error = %e, "failed to fetch version");
                status.fail(format!("failed to fetch version: {e}"));
                self.set_status(status);
                return;
            }
        };

        let current = self.version_manager.current(name).await.ok();
        if !force
            && current
                .map(|c| c.tag == target_version.tag)
                .unwrap_or(false)
        {
            info!(process = %name, tag = %target_version.tag, "already on target version");
            status.complete("already on target version");
            self.set_status(status);
            return;
        }

        // Stage 2: download under the repository lock
        status.stage = UpdateStage::Downloading;
        status.message = format!("Downloading version {}", target_version.tag);
        status.progress = 20.0;
        self.set_status(status.clone());

        let dest = versioned_binary_path(&self.binaries_dir, &repository, &target_version.tag);
        let repo_lock = self.repo_lock(&repository);
        info!(process = %name, repository = %repository, "acquiring repository lock");
        let guard = repo_lock.lock().await;

        if dest.exists() {
            // A peer sharing this repository already pulled the artifact
            info!(path = %dest.display(), "binary already on disk, skipping download");
            drop(guard);
        } else {
            let base = status.clone();
            let progress_cb = move |downloaded: u64, total: u64| {
                if total > 0 {
                    let mut frame = base.clone();
                    frame.progress = 20.0 + downloaded as f64 / total as f64 * 50.0;
                    frame.message = format!(
                        "Downloading: {:.1} MB / {:.1} MB",
                        downloaded as f64 / 1024.0 / 1024.0,
                        total as f64 / 1024.0 / 1024.0
                    );
                    self.set_status(frame);
                }
            };
            let result = self
                .version_manager
                .download(&target_version, &dest, &progress_cb)
                .await;
            drop(guard);

            if let Err(e) = result {
                warn!(process = %name, error = %e, "download failed");
                status.fail(format!("failed to download binary: {e}"));
                self.set_status(status);
                return;
            }
            info!(process = %name, path = %dest.display(), "download completed");
        }

        // Stage 3: hot deploy — start the replacement first
        status.stage = UpdateStage::StartingNew;
        status.message = "Starting new instance".to_string();
        status.progress = 75.0;
        self.set_status(status.clone());

        let new_instance = match self.process_manager.start(name).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(process = %name, error = %e, "failed to start new instance");
                status.fail(format!("failed to start new instance: {e}"));
                self.set_status(status);
                return;
            }
        };
        tokio::time::sleep(self.warmup).await;

        // Stage 4: retire the old instances gracefully
        status.stage = UpdateStage::StoppingOld;
        status.message = "Gracefully stopping old instances".to_string();
        status.progress = 85.0;
        self.set_status(status.clone());

        let instances = self.process_manager.status(name).unwrap_or_default();
        for inst in instances {
            if inst.id == new_instance.id || inst.status != InstanceStatus::Running {
                continue;
            }
            if let Err(e) = self
                .process_manager
                .stop_gracefully(name, &inst.id, self.retire_timeout)
                .await
            {
                warn!(process = %name, instance = %inst.id, error = %e, "failed to stop old instance");
            }
        }

        // Stage 5: record the new current version
        status.stage = UpdateStage::UpdatingVersion;
        status.message = "Updating version information".to_string();
        status.progress = 95.0;
        self.set_status(status.clone());

        if let Err(e) = self
            .version_manager
            .set_current(name, target_version.clone())
            .await
        {
            warn!(process = %name, error = %e, "failed to update version tracking");
        }

        status.complete(format!(
            "Successfully updated to version {}",
            target_version.tag
        ));
        self.set_status(status);
        info!(process = %name, tag = %target_version.tag, "update completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ProcessSpec;
    use crate::domain::ports::mocks::{MockExecutor, MockReleaseSource};
    use crate::domain::value_objects::Version;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        update_manager: Arc<UpdateManager>,
        process_manager: Arc<ProcessManager>,
        version_manager: Arc<VersionManager>,
        source: Arc<MockReleaseSource>,
        dirs: TempDir,
    }

    fn release(tag: &str) -> Version {
        Version {
            tag: tag.to_string(),
            asset_url: format!("https://example.invalid/{tag}/app.exe"),
            asset_name: "app.exe".to_string(),
            size: 1024,
            ..Default::default()
        }
    }

    fn fixture(names: &[&str], repository: &str, releases: Vec<Version>) -> Fixture {
        let dirs = TempDir::new().unwrap();
        let data_dir = dirs.path().join("data");
        let binaries_dir = dirs.path().join("binaries");
        std::fs::create_dir_all(&data_dir).unwrap();

        let specs: Vec<ProcessSpec> = names
            .iter()
            .map(|name| {
                std::fs::write(data_dir.join(format!("{name}.env")), "KEY=value\n").unwrap();
                let bin = dirs.path().join(format!("{name}_v0.0.1.exe"));
                std::fs::write(&bin, b"exe").unwrap();
                ProcessSpec {
                    name: name.to_string(),
                    repository: repository.to_string(),
                    binary_path: Some(bin),
                    max_instances: 4,
                    ..Default::default()
                }
            })
            .collect();

        let executor = Arc::new(MockExecutor::new());
        executor.honor_termination.store(true, Ordering::SeqCst);
        let source = Arc::new(
            MockReleaseSource::new(releases).with_download_delay(Duration::from_millis(50)),
        );
        let version_manager =
            Arc::new(VersionManager::new(&data_dir, source.clone()).unwrap());
        let process_manager = Arc::new(ProcessManager::new(
            specs,
            executor,
            data_dir,
            binaries_dir.clone(),
            CancellationToken::new(),
        ));
        process_manager.set_version_manager(version_manager.clone());
        let update_manager = Arc::new(
            UpdateManager::new(
                process_manager.clone(),
                version_manager.clone(),
                binaries_dir,
            )
            .unwrap()
            .with_timings(Duration::from_millis(20), Duration::from_millis(500)),
        );
        Fixture {
            update_manager,
            process_manager,
            version_manager,
            source,
            dirs,
        }
    }

    async fn wait_completed(manager: &Arc<UpdateManager>, name: &str) -> UpdateStatus {
        for _ in 0..200 {
            if let Some(status) = manager.status(name) {
                if status.completed {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("update for {name} did not complete");
    }

    #[tokio::test]
    async fn test_update_pipeline_completes_and_records_version() {
        let fx = fixture(&["svc"], "owner/R", vec![release("v1.2.3")]);
        let update_id = fx.update_manager.update("svc", "v1.2.3", false).unwrap();
        assert!(update_id.starts_with("upd_svc_"));

        let status = wait_completed(&fx.update_manager, "svc").await;
        assert_eq!(status.stage, UpdateStage::Completed);
        assert!(status.error.is_none());
        assert_eq!(
            fx.version_manager.current("svc").await.unwrap().tag,
            "v1.2.3"
        );
        assert!(fx
            .dirs
            .path()
            .join("binaries/R/R_v1.2.3.exe")
            .exists());
        // Hot deploy left exactly the replacement instance running
        assert_eq!(fx.process_manager.status("svc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_update_is_rejected() {
        let fx = fixture(&["svc"], "owner/R", vec![release("v1.0.0"), release("v1.0.1")]);
        fx.update_manager.update("svc", "v1.0.0", false).unwrap();
        // First pipeline is still in flight (download delay); the second
        // request must be rejected immediately.
        let err = fx.update_manager.update("svc", "v1.0.1", false).unwrap_err();
        assert!(matches!(err, DomainError::UpdateInProgress(_)));
        let status = wait_completed(&fx.update_manager, "svc").await;
        assert_eq!(status.stage, UpdateStage::Completed);
    }

    #[tokio::test]
    async fn test_shared_repository_downloads_exactly_once() {
        let fx = fixture(&["A", "B"], "owner/R", vec![release("v1.2.3")]);
        let id_a = fx.update_manager.update("A", "v1.2.3", false).unwrap();
        let id_b = fx.update_manager.update("B", "v1.2.3", false).unwrap();
        assert_ne!(id_a, id_b);

        let status_a = wait_completed(&fx.update_manager, "A").await;
        let status_b = wait_completed(&fx.update_manager, "B").await;
        assert_eq!(status_a.stage, UpdateStage::Completed);
        assert_eq!(status_b.stage, UpdateStage::Completed);

        // The repository lock made the second waiter find the artifact
        assert_eq!(fx.source.downloads.load(Ordering::SeqCst), 1);
        assert!(fx.dirs.path().join("binaries/R/R_v1.2.3.exe").exists());
    }

    #[tokio::test]
    async fn test_already_on_target_is_a_no_op() {
        let fx = fixture(&["svc"], "owner/R", vec![release("v1.2.3")]);
        fx.version_manager
            .set_current("svc", release("v1.2.3"))
            .await
            .unwrap();

        fx.update_manager.update("svc", "v1.2.3", false).unwrap();
        let status = wait_completed(&fx.update_manager, "svc").await;
        assert_eq!(status.stage, UpdateStage::Completed);
        assert_eq!(status.message, "already on target version");
        // No instance started, no artifact pulled
        assert!(fx.process_manager.status("svc").unwrap().is_empty());
        assert_eq!(fx.source.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_repository_fails_pipeline() {
        let fx = fixture(&["svc"], "", vec![release("v1.0.0")]);
        fx.update_manager.update("svc", "v1.0.0", false).unwrap();
        let status = wait_completed(&fx.update_manager, "svc").await;
        assert_eq!(status.stage, UpdateStage::Failed);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_completed_update_permits_next_one() {
        let fx = fixture(&["svc"], "owner/R", vec![release("v1.0.0"), release("v1.0.1")]);
        fx.update_manager.update("svc", "v1.0.1", false).unwrap();
        wait_completed(&fx.update_manager, "svc").await;
        // The previous status is terminal, so a new update may begin
        fx.update_manager.update("svc", "v1.0.0", false).unwrap();
        wait_completed(&fx.update_manager, "svc").await;
    }

    #[tokio::test]
    async fn test_rollback_requires_history() {
        let fx = fixture(&["svc"], "owner/R", vec![release("v1.0.0")]);
        let err = fx.update_manager.rollback("svc", "").await.unwrap_err();
        assert!(matches!(err, DomainError::NoPreviousVersion(_)));
    }

    #[tokio::test]
    async fn test_rollback_targets_previous_version() {
        let fx = fixture(
            &["svc"],
            "owner/R",
            vec![release("v1.0.0"), release("v1.1.0")],
        );
        fx.version_manager
            .set_current("svc", release("v1.0.0"))
            .await
            .unwrap();
        fx.version_manager
            .set_current("svc", release("v1.1.0"))
            .await
            .unwrap();

        fx.update_manager.rollback("svc", "").await.unwrap();
        let status = wait_completed(&fx.update_manager, "svc").await;
        assert_eq!(status.stage, UpdateStage::Completed);
        assert_eq!(
            fx.version_manager.current("svc").await.unwrap().tag,
            "v1.0.0"
        );
    }

    #[tokio::test]
    async fn test_watcher_observes_transitions_in_order() {
        let fx = fixture(&["svc"], "owner/R", vec![release("v1.2.3")]);
        let update_id = fx.update_manager.update("svc", "v1.2.3", false).unwrap();
        let mut rx = fx.update_manager.subscribe(&update_id);

        let mut stages = Vec::new();
        while let Some(frame) = rx.recv().await {
            let completed = frame.completed;
            stages.push(frame.stage);
            if completed {
                break;
            }
        }
        assert_eq!(stages.last(), Some(&UpdateStage::Completed));
        // Dispatch order is preserved even if some frames were dropped
        let position = |s: &UpdateStage| stages.iter().position(|x| x == s);
        if let (Some(a), Some(b)) = (
            position(&UpdateStage::StartingNew),
            position(&UpdateStage::StoppingOld),
        ) {
            assert!(a < b);
        }
    }
}

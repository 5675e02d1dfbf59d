//! Version manager
//! Resolves tags against the release source and tracks current + bounded
//! history per process, persisted as one JSON document per logical name.

use crate::domain::error::{DomainError, Result};
use crate::domain::ports::{ProgressFn, ReleaseSource};
use crate::domain::value_objects::{Version, VersionInfo};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct VersionManager {
    data_dir: PathBuf,
    source: Arc<dyn ReleaseSource>,
    /// Cache of persisted documents. Concurrent mutation is serialized under
    /// this single mutex.
    state: Mutex<HashMap<String, VersionInfo>>,
}

impl VersionManager {
    pub fn new(data_dir: impl Into<PathBuf>, source: Arc<dyn ReleaseSource>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| DomainError::VersionStore(format!("create {}: {e}", data_dir.display())))?;
        Ok(Self {
            data_dir,
            source,
            state: Mutex::new(HashMap::new()),
        })
    }

    fn version_file_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.version.json"))
    }

    fn load_locked(
        &self,
        state: &mut HashMap<String, VersionInfo>,
        name: &str,
    ) -> Result<VersionInfo> {
        if let Some(info) = state.get(name) {
            return Ok(info.clone());
        }

        let path = self.version_file_path(name);
        let info = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| DomainError::VersionStore(format!("read {}: {e}", path.display())))?;
            serde_json::from_str(&data)
                .map_err(|e| DomainError::VersionStore(format!("parse {}: {e}", path.display())))?
        } else {
            VersionInfo::new(name)
        };
        state.insert(name.to_string(), info.clone());
        Ok(info)
    }

    fn save_locked(&self, state: &mut HashMap<String, VersionInfo>, info: VersionInfo) -> Result<()> {
        let path = self.version_file_path(&info.process_name);
        let data = serde_json::to_string_pretty(&info)
            .map_err(|e| DomainError::VersionStore(e.to_string()))?;
        std::fs::write(&path, data)
            .map_err(|e| DomainError::VersionStore(format!("write {}: {e}", path.display())))?;
        state.insert(info.process_name.clone(), info);
        Ok(())
    }

    pub async fn load_info(&self, name: &str) -> Result<VersionInfo> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, name)
    }

    /// Record `version` as current, moving it to the head of the bounded
    /// history, and persist.
    pub async fn set_current(&self, name: &str, version: Version) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut info = self.load_locked(&mut state, name)?;
        info.set_current(version);
        self.save_locked(&mut state, info)
    }

    pub async fn current(&self, name: &str) -> Result<Version> {
        self.load_info(name)
            .await?
            .current_version
            .ok_or_else(|| DomainError::NoCurrentVersion(name.to_string()))
    }

    /// The version before current (history[1])
    pub async fn previous(&self, name: &str) -> Result<Version> {
        self.load_info(name)
            .await?
            .previous()
            .cloned()
            .ok_or_else(|| DomainError::NoPreviousVersion(name.to_string()))
    }

    /// Resolve a tag to a release. Empty or `"latest"` means the current
    /// latest release.
    pub async fn resolve(&self, repository: &str, tag: &str) -> Result<Version> {
        if tag.is_empty() || tag == "latest" {
            self.source.latest_release(repository).await
        } else {
            self.source.release_by_tag(repository, tag).await
        }
    }

    pub async fn list(&self, repository: &str, limit: usize) -> Result<Vec<Version>> {
        self.source.list_releases(repository, limit).await
    }

    /// Fetch the latest release and persist whether an update is available
    pub async fn check_for_updates(&self, name: &str, repository: &str) -> Result<VersionInfo> {
        let latest = self.source.latest_release(repository).await?;

        let mut state = self.state.lock().await;
        let mut info = self.load_locked(&mut state, name)?;
        info.update_available = match &info.current_version {
            Some(current) => current.tag != latest.tag,
            None => true,
        };
        info.latest_version = Some(latest);
        self.save_locked(&mut state, info.clone())?;
        debug!(
            process = %name,
            repository = %repository,
            update_available = info.update_available,
            "checked for updates"
        );
        Ok(info)
    }

    /// Stream the artifact for `version` to `dest`
    pub async fn download(
        &self,
        version: &Version,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        if version.asset_url.is_empty() {
            return Err(DomainError::ArtifactUnavailable(version.tag.clone()));
        }
        self.source.download(version, dest, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockReleaseSource;
    use tempfile::TempDir;

    fn release(tag: &str) -> Version {
        Version {
            tag: tag.to_string(),
            asset_url: format!("https://example.invalid/{tag}/app.exe"),
            asset_name: "app.exe".to_string(),
            size: 3,
            ..Default::default()
        }
    }

    fn manager(dir: &TempDir, releases: Vec<Version>) -> VersionManager {
        VersionManager::new(dir.path(), Arc::new(MockReleaseSource::new(releases))).unwrap()
    }

    #[tokio::test]
    async fn test_set_current_then_current_round_trip() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![]);
        vm.set_current("svc", release("v1.2.3")).await.unwrap();
        assert_eq!(vm.current("svc").await.unwrap().tag, "v1.2.3");
    }

    #[tokio::test]
    async fn test_persistence_survives_cache_loss() {
        let dir = TempDir::new().unwrap();
        {
            let vm = manager(&dir, vec![]);
            vm.set_current("svc", release("v1.2.3")).await.unwrap();
        }
        let vm = manager(&dir, vec![]);
        let info = vm.load_info("svc").await.unwrap();
        assert_eq!(info.current_version.unwrap().tag, "v1.2.3");
        assert_eq!(info.history.len(), 1);
    }

    #[tokio::test]
    async fn test_version_file_schema() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![]);
        vm.set_current("svc", release("v1.0.0")).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("svc.version.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["process_name"], "svc");
        assert_eq!(doc["current_version"]["tag"], "v1.0.0");
        assert_eq!(doc["update_available"], false);
        assert!(doc["history"].is_array());
    }

    #[tokio::test]
    async fn test_history_truncated_after_eleven_versions() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![]);
        for i in 0..11 {
            vm.set_current("svc", release(&format!("v1.0.{i}")))
                .await
                .unwrap();
        }
        let info = vm.load_info("svc").await.unwrap();
        assert_eq!(info.history.len(), 10);
        assert!(!info.history.iter().any(|v| v.tag == "v1.0.0"));
    }

    #[tokio::test]
    async fn test_previous_returns_second_entry() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![]);
        vm.set_current("svc", release("v1.0.0")).await.unwrap();
        vm.set_current("svc", release("v1.1.0")).await.unwrap();
        assert_eq!(vm.previous("svc").await.unwrap().tag, "v1.0.0");
    }

    #[tokio::test]
    async fn test_previous_fails_with_short_history() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![]);
        vm.set_current("svc", release("v1.0.0")).await.unwrap();
        assert!(matches!(
            vm.previous("svc").await.unwrap_err(),
            DomainError::NoPreviousVersion(_)
        ));
    }

    #[tokio::test]
    async fn test_resolve_latest_and_specific() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![release("v2.0.0"), release("v1.0.0")]);
        assert_eq!(vm.resolve("owner/r", "latest").await.unwrap().tag, "v2.0.0");
        assert_eq!(vm.resolve("owner/r", "").await.unwrap().tag, "v2.0.0");
        assert_eq!(vm.resolve("owner/r", "v1.0.0").await.unwrap().tag, "v1.0.0");
    }

    #[tokio::test]
    async fn test_check_for_updates_flags_new_tag() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![release("v2.0.0")]);
        vm.set_current("svc", release("v1.0.0")).await.unwrap();
        let info = vm.check_for_updates("svc", "owner/r").await.unwrap();
        assert!(info.update_available);
        assert_eq!(info.latest_version.unwrap().tag, "v2.0.0");

        vm.set_current("svc", release("v2.0.0")).await.unwrap();
        let info = vm.check_for_updates("svc", "owner/r").await.unwrap();
        assert!(!info.update_available);
    }

    #[tokio::test]
    async fn test_download_without_asset_url_is_distinguishable() {
        let dir = TempDir::new().unwrap();
        let vm = manager(&dir, vec![]);
        let bare = Version::from_tag("v1.0.0");
        let err = vm
            .download(&bare, &dir.path().join("out.exe"), &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ArtifactUnavailable(_)));
    }
}

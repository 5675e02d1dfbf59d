//! Mock port implementations shared by service unit tests

use crate::domain::error::{DomainError, Result};
use crate::domain::ports::{
    ProcessExecutor, ProgressFn, ReleaseSource, SpawnConfig, SpawnHandle, StderrBuffer,
};
use crate::domain::value_objects::Version;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Executor whose "children" are oneshot channels: tests control exit codes.
pub struct MockExecutor {
    next_pid: AtomicU32,
    children: Mutex<HashMap<u32, oneshot::Sender<i32>>>,
    pub fail_spawn: AtomicBool,
    /// When true, `request_termination` makes the child exit cleanly
    pub honor_termination: AtomicBool,
    pub term_requests: Mutex<Vec<(u32, u16)>>,
    pub kill_requests: Mutex<Vec<u32>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            children: Mutex::new(HashMap::new()),
            fail_spawn: AtomicBool::new(false),
            honor_termination: AtomicBool::new(false),
            term_requests: Mutex::new(Vec::new()),
            kill_requests: Mutex::new(Vec::new()),
        }
    }

    /// Make the child with `pid` exit with `code`
    pub fn exit_pid(&self, pid: u32, code: i32) {
        if let Some(tx) = self.children.lock().unwrap().remove(&pid) {
            let _ = tx.send(code);
        }
    }

    pub fn live_children(&self) -> usize {
        self.children.lock().unwrap().len()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessExecutor for MockExecutor {
    async fn spawn(&self, _config: SpawnConfig) -> Result<SpawnHandle> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(DomainError::SpawnFailed("mock spawn failure".into()));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.children.lock().unwrap().insert(pid, tx);
        let exit = Box::pin(async move { rx.await.unwrap_or(-1) });
        Ok(SpawnHandle {
            pid,
            exit,
            stderr: StderrBuffer::new(),
        })
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        self.kill_requests.lock().unwrap().push(pid);
        self.exit_pid(pid, -1);
        Ok(())
    }

    async fn request_termination(&self, pid: u32, port: u16) -> Result<()> {
        self.term_requests.lock().unwrap().push((pid, port));
        if self.honor_termination.load(Ordering::SeqCst) {
            self.exit_pid(pid, 0);
        }
        Ok(())
    }
}

/// Release source serving a fixed set of releases and writing dummy bytes on
/// download. Counts downloads so tests can assert the repository lock.
pub struct MockReleaseSource {
    pub releases: Mutex<Vec<Version>>,
    pub downloads: AtomicUsize,
    pub download_delay: Duration,
}

impl MockReleaseSource {
    pub fn new(releases: Vec<Version>) -> Self {
        Self {
            releases: Mutex::new(releases),
            downloads: AtomicUsize::new(0),
            download_delay: Duration::from_millis(0),
        }
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }
}

#[async_trait]
impl ReleaseSource for MockReleaseSource {
    async fn latest_release(&self, repository: &str) -> Result<Version> {
        self.releases
            .lock()
            .unwrap()
            .first()
            .cloned()
            .ok_or_else(|| DomainError::ReleaseSource(format!("no releases for {repository}")))
    }

    async fn release_by_tag(&self, repository: &str, tag: &str) -> Result<Version> {
        self.releases
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.tag == tag)
            .cloned()
            .ok_or_else(|| {
                DomainError::ReleaseSource(format!("release {tag} not found in {repository}"))
            })
    }

    async fn list_releases(&self, _repository: &str, limit: usize) -> Result<Vec<Version>> {
        let releases = self.releases.lock().unwrap();
        Ok(releases.iter().take(limit).cloned().collect())
    }

    async fn download(
        &self,
        version: &Version,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        if self.download_delay > Duration::from_millis(0) {
            tokio::time::sleep(self.download_delay).await;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;
        }
        std::fs::write(dest, version.tag.as_bytes())
            .map_err(|e| DomainError::DownloadFailed(e.to_string()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        progress(version.size, version.size);
        Ok(())
    }
}

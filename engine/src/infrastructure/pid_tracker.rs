//! Pid tracker
//! Line-oriented pid file used to reap orphaned children from a previous
//! supervisor run.

use crate::infrastructure::kill::force_kill_pid;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

pub struct PidTracker {
    file_path: PathBuf,
    lock: Mutex<()>,
}

impl PidTracker {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_pids(&self) -> io::Result<Vec<u32>> {
        let contents = std::fs::read_to_string(&self.file_path)?;
        Ok(contents
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn write_pids(&self, pids: &[u32]) -> io::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body: String = pids.iter().map(|p| format!("{p}\n")).collect();
        std::fs::write(&self.file_path, body)
    }

    pub fn add(&self, pid: u32) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut pids = match self.read_pids() {
            Ok(pids) => pids,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        pids.push(pid);
        self.write_pids(&pids)
    }

    pub fn remove(&self, pid: u32) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let pids = match self.read_pids() {
            Ok(pids) => pids,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let remaining: Vec<u32> = pids.into_iter().filter(|p| *p != pid).collect();
        self.write_pids(&remaining)
    }

    /// Kill every recorded pid and rewrite the file with the survivors
    pub fn cleanup_orphans(&self) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let pids = match self.read_pids() {
            Ok(pids) => pids,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if pids.is_empty() {
            return Ok(());
        }

        info!(count = pids.len(), "cleaning up orphaned processes");
        let mut remaining = Vec::new();
        for pid in pids {
            match force_kill_pid(pid) {
                Ok(()) => info!(pid = pid, "killed orphaned process"),
                Err(e) => {
                    warn!(pid = pid, error = %e, "failed to kill orphan, will retry next run");
                    remaining.push(pid);
                }
            }
        }
        self.write_pids(&remaining)
    }
}

//! Instance entity
//! One OS child process under supervision

use crate::domain::ports::StderrBuffer;
use crate::domain::value_objects::InstanceStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::Notify;
use uuid::Uuid;

/// A single supervised OS process.
///
/// Instances weakly refer back to their parent by logical name; the parent
/// holds the owning list. Status transitions are serialized through the
/// per-instance lock and are totally ordered per instance.
pub struct Instance {
    id: String,
    process_name: String,
    pid: u32,
    port: u16,
    started_at: DateTime<Utc>,
    env_file: PathBuf,
    status: RwLock<InstanceStatus>,
    stderr: StderrBuffer,
    exited: Notify,
    exited_flag: AtomicBool,
}

impl Instance {
    pub fn new(
        process_name: impl Into<String>,
        pid: u32,
        port: u16,
        env_file: PathBuf,
        stderr: StderrBuffer,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            process_name: process_name.into(),
            pid,
            port,
            started_at: Utc::now(),
            env_file,
            status: RwLock::new(InstanceStatus::Starting),
            stderr,
            exited: Notify::new(),
            exited_flag: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stderr(&self) -> &StderrBuffer {
        &self.stderr
    }

    pub fn status(&self) -> InstanceStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: InstanceStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Mark the underlying OS process as exited and wake all waiters
    pub fn mark_exited(&self) {
        self.exited_flag.store(true, Ordering::Release);
        self.exited.notify_waiters();
    }

    pub fn has_exited(&self) -> bool {
        self.exited_flag.load(Ordering::Acquire)
    }

    /// Wait until the OS process has exited
    pub async fn wait_exited(&self) {
        loop {
            let notified = self.exited.notified();
            if self.exited_flag.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            process_name: self.process_name.clone(),
            pid: self.pid,
            port: self.port,
            status: self.status(),
            start_time: self.started_at,
            env_file_path: self.env_file.display().to_string(),
        }
    }
}

/// Read-only view of an instance for the management surface
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub process_name: String,
    pub pid: u32,
    pub port: u16,
    pub status: InstanceStatus,
    pub start_time: DateTime<Utc>,
    pub env_file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new("svc", 42, 5001, PathBuf::from("data/svc.env"), StderrBuffer::new())
    }

    #[test]
    fn test_new_instance_starts_in_starting() {
        let inst = instance();
        assert_eq!(inst.status(), InstanceStatus::Starting);
        assert!(!inst.id().is_empty());
    }

    #[test]
    fn test_status_transition() {
        let inst = instance();
        inst.set_status(InstanceStatus::Running);
        assert_eq!(inst.status(), InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_wait_exited_returns_after_mark() {
        let inst = std::sync::Arc::new(instance());
        let waiter = inst.clone();
        let handle = tokio::spawn(async move { waiter.wait_exited().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        inst.mark_exited();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_exited_immediate_when_already_exited() {
        let inst = instance();
        inst.mark_exited();
        tokio::time::timeout(std::time::Duration::from_millis(100), inst.wait_exited())
            .await
            .expect("should not block");
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let inst = instance();
        inst.set_status(InstanceStatus::Running);
        let snap = inst.snapshot();
        assert_eq!(snap.pid, 42);
        assert_eq!(snap.port, 5001);
        assert_eq!(snap.status, InstanceStatus::Running);
    }
}

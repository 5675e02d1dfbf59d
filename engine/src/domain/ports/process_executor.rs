//! Process executor port
//! Driven adapter boundary between the supervision logic and the OS

use crate::domain::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Future resolving to the child's exit code once it terminates.
/// Wait failures are folded into a non-zero code by the implementation.
pub type ExitHandle = Pin<Box<dyn Future<Output = i32> + Send>>;

/// In-memory capture of a child's standard error
#[derive(Debug, Clone, Default)]
pub struct StderrBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl StderrBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: &[u8]) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.extend_from_slice(chunk);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|b| b.is_empty()).unwrap_or(true)
    }

    pub fn contents(&self) -> String {
        self.inner
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

/// Everything the executor needs to launch one instance
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Environment injection file; a missing file is a hard failure
    pub env_file: PathBuf,
    /// Merged over the file contents (e.g. `GRPC_PORT`)
    pub extra_env: Vec<(String, String)>,
}

/// A successfully launched child
pub struct SpawnHandle {
    pub pid: u32,
    pub exit: ExitHandle,
    pub stderr: StderrBuffer,
}

/// Port abstracting process launch and termination.
///
/// The supervisor exclusively owns every child it spawns; termination is
/// addressed by pid so stop paths never contend with the exit monitor for
/// the child handle.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Launch a child, capturing stderr and returning an exit handle
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnHandle>;

    /// Forceful kill
    async fn kill(&self, pid: u32) -> Result<()>;

    /// Termination signal path for graceful stop: HTTP `POST /shutdown` on
    /// the instance port first, OS-level soft termination as a fallback.
    async fn request_termination(&self, pid: u32, port: u16) -> Result<()>;
}

//! Tokio process executor
//! Real implementation of the ProcessExecutor port: spawns managed
//! binaries, captures stderr, and terminates by pid.

use crate::constants::process::SHUTDOWN_REQUEST_TIMEOUT;
use crate::domain::error::{DomainError, Result};
use crate::domain::ports::{ProcessExecutor, SpawnConfig, SpawnHandle, StderrBuffer};
use crate::infrastructure::env_file;
use crate::infrastructure::kill::{force_kill_pid, term_signal_pid};
use crate::infrastructure::pid_tracker::PidTracker;
use async_trait::async_trait;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct TokioProcessExecutor {
    http: reqwest::Client,
    pid_tracker: Option<Arc<PidTracker>>,
}

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self::with_pid_tracker(None)
    }

    pub fn with_pid_tracker(pid_tracker: Option<Arc<PidTracker>>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SHUTDOWN_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, pid_tracker }
    }
}

impl Default for TokioProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnHandle> {
        info!(
            binary = %config.binary.display(),
            args = ?config.args,
            "spawning process"
        );

        // The environment file must exist; a missing file fails the launch
        let file_env = env_file::load(&config.env_file)?;

        let mut cmd = Command::new(&config.binary);
        cmd.args(&config.args);
        if let Some(dir) = &config.working_dir {
            debug!(working_dir = %dir.display(), "setting working directory");
            cmd.current_dir(dir);
        }

        // Parent environment is inherited; the file and the per-instance
        // entries are merged on top
        for (key, value) in &file_env {
            cmd.env(key, value);
        }
        for (key, value) in &config.extra_env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            error!(binary = %config.binary.display(), error = %e, "failed to spawn process");
            DomainError::SpawnFailed(e.to_string())
        })?;
        let pid = child.id();

        // Drain stderr into the in-memory buffer on a dedicated thread
        let stderr = StderrBuffer::new();
        if let Some(mut pipe) = child.stderr.take() {
            let buffer = stderr.clone();
            std::thread::spawn(move || {
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.append(&chunk[..n]),
                    }
                }
            });
        }

        if let Some(tracker) = &self.pid_tracker {
            if let Err(e) = tracker.add(pid) {
                warn!(pid = pid, error = %e, "failed to track pid");
            }
        }

        info!(pid = pid, "process spawned");

        // Reap on a blocking thread, hand the exit code back to the monitor
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tracker = self.pid_tracker.clone();
        tokio::spawn(async move {
            let exit_code = tokio::task::spawn_blocking(move || match child.wait() {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    debug!(pid = pid, exit_code = code, "process exited");
                    code
                }
                Err(e) => {
                    error!(pid = pid, error = %e, "failed to wait for process");
                    -1
                }
            })
            .await
            .unwrap_or(-1);

            if let Some(tracker) = tracker {
                if let Err(e) = tracker.remove(pid) {
                    warn!(pid = pid, error = %e, "failed to untrack pid");
                }
            }
            let _ = tx.send(exit_code);
        });
        let exit = Box::pin(async move { rx.await.unwrap_or(-1) });

        Ok(SpawnHandle { pid, exit, stderr })
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        info!(pid = pid, "killing process");
        tokio::task::spawn_blocking(move || force_kill_pid(pid))
            .await
            .map_err(|e| DomainError::Internal(e.to_string()))?
            .map_err(|e| DomainError::Internal(format!("failed to kill process {pid}: {e}")))
    }

    async fn request_termination(&self, pid: u32, port: u16) -> Result<()> {
        // Platform-independent path first: the supervised servers expose
        // `POST /shutdown` on their allocated port
        if port > 0 {
            let url = format!("http://localhost:{port}/shutdown");
            match self.http.post(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(pid = pid, port = port, "HTTP shutdown signal accepted");
                    return Ok(());
                }
                Ok(resp) => {
                    debug!(pid = pid, status = %resp.status(), "HTTP shutdown endpoint refused");
                }
                Err(e) => {
                    debug!(pid = pid, error = %e, "HTTP shutdown endpoint unreachable");
                }
            }
        }

        // Fall back to the OS soft-termination path
        debug!(pid = pid, "falling back to OS termination signal");
        tokio::task::spawn_blocking(move || term_signal_pid(pid))
            .await
            .map_err(|e| DomainError::Internal(e.to_string()))?
            .map_err(|e| DomainError::Internal(format!("failed to signal process {pid}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn env_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("svc.env");
        env_file::generate(&path, "svc", &HashMap::new(), 0).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_reap_clean_exit() {
        let dir = TempDir::new().unwrap();
        let executor = TokioProcessExecutor::new();
        let handle = executor
            .spawn(SpawnConfig {
                binary: PathBuf::from("/bin/sh"),
                args: vec!["-c".to_string(), "exit 0".to_string()],
                working_dir: None,
                env_file: env_file(&dir),
                extra_env: vec![("GRPC_PORT".to_string(), "5001".to_string())],
            })
            .await
            .unwrap();
        assert!(handle.pid > 0);
        let code = handle.exit.await;
        assert_eq!(code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_captures_stderr_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let executor = TokioProcessExecutor::new();
        let handle = executor
            .spawn(SpawnConfig {
                binary: PathBuf::from("/bin/sh"),
                args: vec!["-c".to_string(), "echo boom 1>&2; exit 3".to_string()],
                working_dir: None,
                env_file: env_file(&dir),
                extra_env: vec![],
            })
            .await
            .unwrap();
        let code = handle.exit.await;
        assert_eq!(code, 3);
        // Reader thread may trail the reap by a moment
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(handle.stderr.contents().contains("boom"));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let dir = TempDir::new().unwrap();
        let executor = TokioProcessExecutor::new();
        let err = executor
            .spawn(SpawnConfig {
                binary: PathBuf::from("/nonexistent/command"),
                args: vec![],
                working_dir: None,
                env_file: env_file(&dir),
                extra_env: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_spawn_missing_env_file_fails() {
        let dir = TempDir::new().unwrap();
        let executor = TokioProcessExecutor::new();
        let err = executor
            .spawn(SpawnConfig {
                binary: PathBuf::from("/bin/true"),
                args: vec![],
                working_dir: None,
                env_file: dir.path().join("absent.env"),
                extra_env: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::EnvFileMissing(_)));
    }
}

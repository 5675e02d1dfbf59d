//! Startup singleton guard
//! Lock file in the system temp directory ensuring at most one supervisor,
//! plus a best-effort sweep of orphaned supervised executables by name.

use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::infrastructure::kill::force_kill_pid;

const LOCK_FILE_NAME: &str = "gowinproc.lock";

/// Exclusive-create lock file carrying the supervisor's pid in decimal
/// ASCII. A stale holder is killed and displaced.
pub struct SingletonGuard {
    path: PathBuf,
}

impl SingletonGuard {
    pub fn acquire() -> io::Result<Self> {
        Self::acquire_at(std::env::temp_dir().join(LOCK_FILE_NAME))
    }

    pub fn acquire_at(path: PathBuf) -> io::Result<Self> {
        match Self::try_create(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                info!(path = %path.display(), "lock file exists, displacing old supervisor");
                if let Ok(contents) = std::fs::read_to_string(&path) {
                    if let Ok(old_pid) = contents.trim().parse::<u32>() {
                        if old_pid != std::process::id() {
                            match force_kill_pid(old_pid) {
                                Ok(()) => info!(pid = old_pid, "killed old supervisor"),
                                Err(e) => {
                                    warn!(pid = old_pid, error = %e, "failed to kill old supervisor")
                                }
                            }
                        }
                    }
                }
                std::fs::remove_file(&path)?;
                Self::try_create(&path)?;
            }
            Err(e) => return Err(e),
        }
        info!(path = %path.display(), pid = std::process::id(), "lock file created");
        Ok(Self { path })
    }

    fn try_create(path: &PathBuf) -> io::Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        write!(file, "{}", std::process::id())
    }

    pub fn release(self) {
        // Removal happens in Drop
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

/// Kill any process whose image name matches one of `names`, skipping the
/// supervisor itself. Hard-coded to the Windows `tasklist`/`taskkill`
/// tooling; a silent no-op elsewhere.
pub fn sweep_orphans_by_name(names: &[String]) {
    #[cfg(windows)]
    {
        let current_pid = std::process::id();
        for name in names {
            let filter = format!("IMAGENAME eq {name}");
            let output = match std::process::Command::new("tasklist")
                .args(["/FI", &filter, "/FO", "CSV", "/NH"])
                .output()
            {
                Ok(output) => output,
                Err(e) => {
                    warn!(image = %name, error = %e, "tasklist failed");
                    continue;
                }
            };

            for line in String::from_utf8_lossy(&output.stdout).lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // CSV: "ImageName","PID","SessionName","SessionNumber","MemUsage"
                let mut fields = line.split(',');
                let _image = fields.next();
                let Some(pid_field) = fields.next() else {
                    continue;
                };
                let Ok(pid) = pid_field.trim_matches('"').parse::<u32>() else {
                    continue;
                };
                if pid == current_pid {
                    continue;
                }
                match force_kill_pid(pid) {
                    Ok(()) => info!(image = %name, pid = pid, "killed orphaned executable"),
                    Err(e) => warn!(image = %name, pid = pid, error = %e, "failed to kill orphan"),
                }
            }
        }
    }

    #[cfg(not(windows))]
    {
        tracing::debug!(names = ?names, "orphan sweep by image name is Windows-only, skipping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gowinproc.lock");
        let guard = SingletonGuard::acquire_at(path.clone()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        guard.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_displaces_stale_holder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gowinproc.lock");
        // A dead pid from a previous run
        std::fs::write(&path, "3999999").unwrap();

        let guard = SingletonGuard::acquire_at(path.clone()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        drop(guard);
    }

    #[test]
    fn test_release_removes_file_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gowinproc.lock");
        {
            let _guard = SingletonGuard::acquire_at(path.clone()).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}

//! Pid-addressed process termination
//!
//! Managed binaries are plain executables; termination goes through the
//! platform's own tooling (`taskkill` on Windows, signals elsewhere) instead
//! of holding OS handles.

use std::io;

/// Forceful kill. A pid that no longer exists counts as success: the goal
/// is that the process is not running.
pub fn force_kill_pid(pid: u32) -> io::Result<()> {
    #[cfg(windows)]
    {
        let output = std::process::Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output()?;
        // Exit code 128: process not found, already gone
        if output.status.success() || output.status.code() == Some(128) {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "taskkill failed for PID {pid}: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        ))
    }

    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process killing not implemented on this platform",
        ))
    }
}

/// Soft termination request: `taskkill` without `/F` (WM_CLOSE) on Windows,
/// SIGTERM elsewhere.
pub fn term_signal_pid(pid: u32) -> io::Result<()> {
    #[cfg(windows)]
    {
        let output = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "taskkill failed for PID {pid}: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        ))
    }

    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }
        Err(io::Error::last_os_error())
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process signalling not implemented on this platform",
        ))
    }
}

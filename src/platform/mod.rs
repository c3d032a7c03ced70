//! Platform process control - signals, liveness checks, app launching

use anyhow::{Context, Result};

/// Terminate a process gracefully
pub fn terminate_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) == 0 {
                Ok(())
            } else {
                anyhow::bail!(
                    "Failed to terminate process: {}",
                    std::io::Error::last_os_error()
                )
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Force kill a process
pub fn kill_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGKILL) == 0 {
                Ok(())
            } else {
                anyhow::bail!(
                    "Failed to kill process: {}",
                    std::io::Error::last_os_error()
                )
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe {
            // kill with signal 0 checks if process exists without sending a signal
            libc::kill(pid as i32, 0) == 0
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Launch an application or open a path with the system opener
pub fn open_application(path: &str) -> Result<()> {
    open::that_detached(path).with_context(|| format!("Failed to open {}", path))
}

/// Process control seam for the app registry
pub trait ProcessControl: Send + Sync {
    /// Ask a process to terminate (SIGTERM)
    fn terminate(&self, pid: u32) -> Result<()>;
    /// Force-kill a process (SIGKILL)
    fn force_terminate(&self, pid: u32) -> Result<()>;
    /// Whether a process is still alive
    fn is_running(&self, pid: u32) -> bool;
    /// Launch an application from a path
    fn launch(&self, path: &str) -> Result<()>;
}

/// Live implementation backed by OS signals and the system opener
pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn terminate(&self, pid: u32) -> Result<()> {
        terminate_process(pid)
    }

    fn force_terminate(&self, pid: u32) -> Result<()> {
        kill_process(pid)
    }

    fn is_running(&self, pid: u32) -> bool {
        is_process_running(pid)
    }

    fn launch(&self, path: &str) -> Result<()> {
        open_application(path)
    }
}

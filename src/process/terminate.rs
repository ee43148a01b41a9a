//! Killing a child together with everything it spawned.
//!
//! On POSIX every child is started as the leader of its own process group,
//! so signalling the group reaches its workers. On Windows `taskkill /t`
//! walks the tree by parent pid.

use std::io;
use std::sync::Arc;

pub trait TreeTerminator: Send + Sync {
    /// Ask the tree rooted at `pid` to stop. `force` escalates to an
    /// uncatchable kill where the platform distinguishes the two.
    /// A tree that already exited is not an error.
    fn terminate_tree(&self, pid: u32, force: bool) -> io::Result<()>;

    /// Whether any process of the tree rooted at `pid` may still be running.
    fn tree_alive(&self, pid: u32) -> bool;
}

#[cfg(unix)]
pub struct ProcessGroupTerminator;

#[cfg(unix)]
impl TreeTerminator for ProcessGroupTerminator {
    fn terminate_tree(&self, pid: u32, force: bool) -> io::Result<()> {
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        let pgid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: killpg only sends a signal; pgid is the leader pid of a
        // group created at spawn time.
        let rc = unsafe { libc::killpg(pgid, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }

    fn tree_alive(&self, pid: u32) -> bool {
        let Ok(pgid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 only checks that the group exists.
        unsafe { libc::killpg(pgid, 0) == 0 }
    }
}

#[cfg(windows)]
pub struct TaskkillTerminator;

#[cfg(windows)]
impl TreeTerminator for TaskkillTerminator {
    fn terminate_tree(&self, pid: u32, _force: bool) -> io::Result<()> {
        // /f is always passed: console children routinely ignore the polite form.
        let out = std::process::Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/t", "/f"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .output()?;
        if !out.status.success() {
            tracing::debug!(
                "taskkill /pid {pid} exited {:?}: {}",
                out.status.code(),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }

    fn tree_alive(&self, _pid: u32) -> bool {
        // taskkill /f is already final
        false
    }
}

/// The terminator for the platform this binary was built for.
pub fn platform_terminator() -> Arc<dyn TreeTerminator> {
    #[cfg(unix)]
    {
        Arc::new(ProcessGroupTerminator)
    }
    #[cfg(windows)]
    {
        Arc::new(TaskkillTerminator)
    }
}

//! Liveness checks for ticket holders

use gpuq_core::HolderId;

/// Answers whether a ticket holder still exists
pub trait LivenessOracle: Send + Sync {
    /// Whether `holder` is still running
    fn is_alive(&self, holder: &HolderId) -> bool;
}

/// Liveness of local OS processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLiveness;

impl LivenessOracle for ProcessLiveness {
    fn is_alive(&self, holder: &HolderId) -> bool {
        is_pid_alive(holder.pid())
    }
}

/// Probe a PID with signal 0. A process owned by another user answers
/// `EPERM`, which still means it exists.
#[cfg(unix)]
#[allow(unsafe_code)]
fn is_pid_alive(pid: u32) -> bool {
    // 0 and negative values address process groups, not a single process
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission checks,
    // no signal is delivered.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_pid_alive(_pid: u32) -> bool {
    // No cheap probe available; never prune on a guess.
    true
}

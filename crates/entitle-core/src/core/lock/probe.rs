/// Process-table queries the lock manager relies on.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: i32) -> bool;
    /// Whether this process may clean up locks left by other users.
    fn is_privileged(&self) -> bool;
}

/// Liveness and privilege checks against the real process table. Unix only:
/// elsewhere there is no signal-0 probe, so callers must supply their own.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

#[cfg(unix)]
impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 only performs the existence and permission checks.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn is_privileged(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }
}

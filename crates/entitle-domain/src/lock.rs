use serde::{Deserialize, Serialize};

/// Sole content of the lock file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub lock_pid: String,
    pub lock_holder: String,
}

impl LockRecord {
    pub fn new(pid: u32, holder: impl Into<String>) -> Self {
        Self {
            lock_pid: pid.to_string(),
            lock_holder: holder.into(),
        }
    }

    /// The recorded pid, or `None` when it is not a positive integer.
    #[must_use]
    pub fn pid(&self) -> Option<i32> {
        self.lock_pid.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
    }
}

//! Single-host advisory lock guarding every mutation of entitlement state.
//!
//! The lock is a JSON file naming the holder's pid and label. A record whose
//! pid no longer exists is stale: a privileged caller removes it and carries
//! on, an unprivileged caller keeps reporting it as held because it cannot
//! tell whether it may touch another user's lock.
//!
//! Reading, stale cleanup and creation of the record happen while holding an
//! exclusive `flock` on a sidecar guard file, so two callers can never both
//! decide the same stale record is theirs to replace.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use entitle_domain::LockRecord;
use fs4::FileExt;
use tracing::{debug, warn};

mod probe;

pub use probe::ProcessProbe;
#[cfg(unix)]
pub use probe::SystemProbe;

use crate::core::config::{Config, LockConfig};
use crate::core::store::{DataFile, Notice, NoticeStore, StateFileError};

/// Identity recorded in an existing lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: i32,
    pub holder: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unable to perform: {request}.\nOperation in progress: {holder} (pid:{pid})")]
pub struct LockHeldError {
    pub request: String,
    pub holder: String,
    pub pid: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(transparent)]
    Held(#[from] LockHeldError),
    #[error(
        "corrupted lock file at {}; remove it to continue: sudo rm {}",
        .path.display(),
        .path.display()
    )]
    Corrupt { path: PathBuf },
    #[error(transparent)]
    Store(#[from] StateFileError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LockError {
    #[must_use]
    pub fn held(&self) -> Option<&LockHeldError> {
        match self {
            LockError::Held(err) => Some(err),
            _ => None,
        }
    }
}

pub struct LockManager {
    record: DataFile<LockRecord>,
    guard_path: PathBuf,
    notices: NoticeStore,
    probe: Arc<dyn ProcessProbe>,
    spin: LockConfig,
}

impl LockManager {
    #[cfg(unix)]
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_probe(config, Arc::new(SystemProbe))
    }

    #[must_use]
    pub fn with_probe(config: &Config, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            record: DataFile::new(config.paths().lock_file()),
            guard_path: config.paths().lock_guard_file(),
            notices: NoticeStore::new(config.paths()),
            probe,
            spin: *config.lock(),
        }
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.record.path()
    }

    /// Reads the current holder, clearing a stale record when privileged.
    pub fn check_lock_info(&self) -> Result<Option<LockHolder>, LockError> {
        let _exclusive = self.exclusive()?;
        self.inspect()
    }

    fn inspect(&self) -> Result<Option<LockHolder>, LockError> {
        let record = match self.record.read() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(StateFileError::Invalid { .. }) => return Err(self.corrupt()),
            Err(err) => return Err(err.into()),
        };
        let Some(pid) = record.pid() else {
            return Err(self.corrupt());
        };
        let current = LockHolder {
            pid,
            holder: record.lock_holder,
        };
        if self.probe.is_alive(pid) {
            return Ok(Some(current));
        }
        if !self.probe.is_privileged() {
            debug!(pid, holder = %current.holder, "stale lock file found; not privileged to remove it");
            return Ok(Some(current));
        }
        warn!(pid, holder = %current.holder, "removing stale lock file");
        self.record.delete()?;
        Ok(None)
    }

    /// Takes the lock for `holder` or fails immediately with the current holder.
    pub fn acquire(&self, holder: &str) -> Result<LockGuard<'_>, LockError> {
        let pid = std::process::id();
        let record = LockRecord::new(pid, holder);
        {
            let _exclusive = self.exclusive()?;
            if let Some(current) = self.inspect()? {
                return Err(held_error(holder, current).into());
            }
            if !self.record.create_new(&record)? {
                return match self.inspect()? {
                    Some(current) => Err(held_error(holder, current).into()),
                    None => Err(anyhow!(
                        "could not create lock file {}",
                        self.record.path().display()
                    )
                    .into()),
                };
            }
        }
        if let Err(err) = self
            .notices
            .add(Notice::OperationInProgress, &format!("Operation in progress: {holder}"))
        {
            self.record.delete()?;
            return Err(err.into());
        }
        debug!(holder, pid, "lock acquired");
        Ok(LockGuard {
            manager: self,
            holder: holder.to_string(),
            pid,
            released: false,
        })
    }

    /// Calls [`acquire`](Self::acquire) up to `max_retries` times, sleeping
    /// `sleep` between attempts. The last `LockHeldError` is returned when the
    /// budget runs out; any other error stops the spin at once.
    pub fn retry_acquire(
        &self,
        holder: &str,
        sleep: Duration,
        max_retries: u32,
    ) -> Result<LockGuard<'_>, LockError> {
        debug!(holder, "spin lock starting");
        let max_attempts = max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.acquire(holder) {
                Err(LockError::Held(err)) if attempt < max_attempts => {
                    debug!(attempt, %err, "lock held; spinning");
                    thread::sleep(sleep);
                }
                other => return other,
            }
        }
    }

    /// Spins with the configured interactive budget.
    pub fn spin_acquire(&self, holder: &str) -> Result<LockGuard<'_>, LockError> {
        self.retry_acquire(holder, self.spin.sleep, self.spin.max_retries)
    }

    /// Runs `f` while holding the lock; the lock is released on every exit path.
    pub fn with_lock<R>(&self, holder: &str, f: impl FnOnce() -> R) -> Result<R, LockError> {
        let _guard = self.acquire(holder)?;
        Ok(f())
    }

    pub fn with_spin_lock<R>(&self, holder: &str, f: impl FnOnce() -> R) -> Result<R, LockError> {
        let _guard = self.spin_acquire(holder)?;
        Ok(f())
    }

    /// Unconditionally removes the lock record and the in-progress notice.
    pub fn clear_lock_file(&self) -> anyhow::Result<()> {
        self.record.delete()?;
        self.notices.remove(Notice::OperationInProgress)?;
        Ok(())
    }

    /// Blocks until this process holds the guard file; dropping the handle
    /// lets the next caller in.
    fn exclusive(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.guard_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.guard_path)
            .with_context(|| format!("failed to open {}", self.guard_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock {}", self.guard_path.display()))?;
        Ok(file)
    }

    fn corrupt(&self) -> LockError {
        LockError::Corrupt {
            path: self.record.path().to_path_buf(),
        }
    }
}

fn held_error(request: &str, current: LockHolder) -> LockHeldError {
    LockHeldError {
        request: request.to_string(),
        holder: current.holder,
        pid: current.pid,
    }
}

/// Proof of holding the lock. Dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    holder: String,
    pid: u32,
    released: bool,
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("holder", &self.holder)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl LockGuard<'_> {
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn release(mut self) -> anyhow::Result<()> {
        self.released = true;
        debug!(holder = %self.holder, "lock released");
        self.manager.clear_lock_file()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!(holder = %self.holder, "lock released");
        if let Err(err) = self.manager.clear_lock_file() {
            warn!(%err, holder = %self.holder, "failed to release lock");
        }
    }
}

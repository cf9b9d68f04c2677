use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use entitle_domain::RetrySchedule;
use tracing::warn;

const DEFAULT_DATA_DIR: &str = "/var/lib/entitle";
const DEFAULT_RUN_DIR: &str = "/run/entitle";
const DEFAULT_LOCK_SLEEP_SECS: u64 = 1;
const DEFAULT_LOCK_MAX_RETRIES: u32 = 12;

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) paths: PathsConfig,
    pub(crate) lock: LockConfig,
    pub(crate) retry: RetryConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if a configured directory is not absolute.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let data_dir = dir_var(snapshot, "ENTITLE_DATA_DIR", DEFAULT_DATA_DIR)?;
        let run_dir = dir_var(snapshot, "ENTITLE_RUN_DIR", DEFAULT_RUN_DIR)?;
        Ok(Self {
            paths: PathsConfig { data_dir, run_dir },
            lock: LockConfig {
                sleep: Duration::from_secs(parse_or(
                    snapshot,
                    "ENTITLE_LOCK_SLEEP_SECS",
                    DEFAULT_LOCK_SLEEP_SECS,
                )),
                max_retries: parse_or(snapshot, "ENTITLE_LOCK_MAX_RETRIES", DEFAULT_LOCK_MAX_RETRIES),
            },
            retry: RetryConfig {
                schedule: snapshot
                    .var("ENTITLE_RETRY_INTERVALS")
                    .map(parse_schedule)
                    .filter(|schedule| !schedule.is_empty())
                    .unwrap_or_default(),
            },
        })
    }

    /// Places both the data and run directories under `root`.
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        Self {
            paths: PathsConfig {
                data_dir: root.join("data"),
                run_dir: root.join("run"),
            },
            lock: LockConfig {
                sleep: Duration::from_secs(DEFAULT_LOCK_SLEEP_SECS),
                max_retries: DEFAULT_LOCK_MAX_RETRIES,
            },
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.retry.schedule = schedule;
        self
    }

    #[must_use]
    pub fn with_lock_budget(mut self, sleep: Duration, max_retries: u32) -> Self {
        self.lock = LockConfig { sleep, max_retries };
        self
    }

    #[must_use]
    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    #[must_use]
    pub fn lock(&self) -> &LockConfig {
        &self.lock
    }

    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

/// Well-known file locations. Everything under `run_dir` is expected to
/// vanish on reboot; `data_dir` persists.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub run_dir: PathBuf,
}

impl PathsConfig {
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.run_dir.join("lock")
    }

    /// Sidecar file whose `flock` serializes lock inspection and creation.
    #[must_use]
    pub fn lock_guard_file(&self) -> PathBuf {
        self.run_dir.join("lock.guard")
    }

    #[must_use]
    pub fn machine_token_file(&self) -> PathBuf {
        self.data_dir.join("machine-token.json")
    }

    #[must_use]
    pub fn retry_state_file(&self) -> PathBuf {
        self.data_dir.join("retry-auto-attach-state.json")
    }

    #[must_use]
    pub fn retry_options_file(&self) -> PathBuf {
        self.data_dir.join("retry-auto-attach-options.json")
    }

    #[must_use]
    pub fn transient_notices_dir(&self) -> PathBuf {
        self.run_dir.join("notices")
    }

    #[must_use]
    pub fn permanent_notices_dir(&self) -> PathBuf {
        self.data_dir.join("notices")
    }

    #[must_use]
    pub fn auto_attach_status_file(&self) -> PathBuf {
        self.run_dir.join("messages").join("auto-attach-status")
    }

    #[must_use]
    pub fn auto_attach_total_failure_file(&self) -> PathBuf {
        self.data_dir
            .join("messages")
            .join("auto-attach-total-failure")
    }

    #[must_use]
    pub fn auto_attach_failed_flag(&self) -> PathBuf {
        self.run_dir.join("flags").join("auto-attach-failed")
    }
}

/// Spin budget for interactive callers waiting on the lock.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    pub sleep: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RetryConfig {
    pub schedule: RetrySchedule,
}

fn dir_var(snapshot: &EnvSnapshot, key: &str, default: &str) -> Result<PathBuf> {
    let path = PathBuf::from(snapshot.var(key).unwrap_or(default));
    if !path.is_absolute() {
        bail!("{key} must be an absolute path (got {})", path.display());
    }
    Ok(path)
}

fn parse_or<T: std::str::FromStr + Copy>(snapshot: &EnvSnapshot, key: &str, default: T) -> T {
    match snapshot.var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

fn parse_schedule(raw: &str) -> RetrySchedule {
    let secs: Vec<u64> = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse::<u64>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(entry = part, "ignoring invalid retry interval");
                None
            }
        })
        .collect();
    RetrySchedule::from_secs(&secs)
}

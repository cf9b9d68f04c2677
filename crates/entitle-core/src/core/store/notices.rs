use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::data_file::{remove_if_present, write_atomic};
use crate::core::config::PathsConfig;

/// Human-facing notices consumed by the status surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Notice {
    OperationInProgress,
    AutoAttachRetryFailure,
    AutoAttachRetryTotalFailure,
}

impl Notice {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Notice::OperationInProgress => "operation-in-progress",
            Notice::AutoAttachRetryFailure => "auto-attach-retry-failure",
            Notice::AutoAttachRetryTotalFailure => "auto-attach-retry-total-failure",
        }
    }

    /// Permanent notices survive reboots; transient ones live under the run dir.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        matches!(self, Notice::AutoAttachRetryTotalFailure)
    }
}

#[derive(Debug, Clone)]
pub struct NoticeStore {
    transient_dir: PathBuf,
    permanent_dir: PathBuf,
}

impl NoticeStore {
    #[must_use]
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            transient_dir: paths.transient_notices_dir(),
            permanent_dir: paths.permanent_notices_dir(),
        }
    }

    fn path(&self, notice: Notice) -> PathBuf {
        let dir = if notice.is_permanent() {
            &self.permanent_dir
        } else {
            &self.transient_dir
        };
        dir.join(notice.label())
    }

    pub fn add(&self, notice: Notice, message: &str) -> Result<()> {
        let path = self.path(notice);
        write_atomic(&path, message.as_bytes())
            .with_context(|| format!("failed to write notice {}", path.display()))
    }

    pub fn remove(&self, notice: Notice) -> Result<()> {
        let path = self.path(notice);
        remove_if_present(&path)
            .with_context(|| format!("failed to remove notice {}", path.display()))
    }

    pub fn read(&self, notice: Notice) -> Result<Option<String>> {
        let path = self.path(notice);
        match fs::read_to_string(&path) {
            Ok(message) => Ok(Some(message)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read notice {}", path.display()))
            }
        }
    }

    /// All notices currently present, as `(label, message)` sorted by label.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let mut notices = Vec::new();
        for dir in [&self.transient_dir, &self.permanent_dir] {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to list notices in {}", dir.display()))
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let label = entry.file_name().to_string_lossy().to_string();
                if label.starts_with('.') {
                    continue;
                }
                let message = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read notice {}", path.display()))?;
                notices.push((label, message));
            }
        }
        notices.sort();
        Ok(notices)
    }
}

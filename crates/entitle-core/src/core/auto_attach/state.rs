use entitle_domain::{RetryAutoAttachOptions, RetryAutoAttachState};
use tracing::warn;

use crate::core::config::PathsConfig;
use crate::core::store::{DataFile, StateFileError};

/// Persisted retry progress and the attach options replayed on each attempt.
///
/// Only the retry process writes these files, so no lock is taken here.
#[derive(Debug)]
pub struct RetryStateStore {
    state: DataFile<RetryAutoAttachState>,
    options: DataFile<RetryAutoAttachOptions>,
}

impl RetryStateStore {
    #[must_use]
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            state: DataFile::new(paths.retry_state_file()),
            options: DataFile::new(paths.retry_options_file()),
        }
    }

    /// A corrupt state file is removed and reported as absent.
    pub fn load_state(&self) -> Result<Option<RetryAutoAttachState>, StateFileError> {
        discard_invalid(&self.state)
    }

    pub fn save_state(&self, state: &RetryAutoAttachState) -> Result<(), StateFileError> {
        self.state.write(state)
    }

    /// Missing or corrupt options fall back to the contract defaults.
    pub fn load_options(&self) -> Result<RetryAutoAttachOptions, StateFileError> {
        Ok(discard_invalid(&self.options)?.unwrap_or_default())
    }

    /// Records `options` unless a record already exists. Returns whether it
    /// was written.
    pub fn save_options_once(&self, options: &RetryAutoAttachOptions) -> Result<bool, StateFileError> {
        self.options.create_new(options)
    }

    pub fn clear(&self) -> Result<(), StateFileError> {
        self.state.delete()?;
        self.options.delete()
    }
}

fn discard_invalid<T>(file: &DataFile<T>) -> Result<Option<T>, StateFileError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    match file.read() {
        Err(err) if err.is_invalid() => {
            warn!(%err, "discarding invalid retry record");
            file.delete()?;
            Ok(None)
        }
        other => other,
    }
}

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum StateFileError {
    #[error("{} does not contain a valid record: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StateFileError {
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// A JSON record stored as the whole content of one file.
#[derive(Debug)]
pub struct DataFile<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> DataFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record; a missing file is `Ok(None)`.
    pub fn read(&self) -> Result<Option<T>, StateFileError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StateFileError::Invalid {
                path: self.path.clone(),
                source,
            })
    }

    /// Replaces the record atomically.
    pub fn write(&self, record: &T) -> Result<(), StateFileError> {
        let bytes = self.encode(record)?;
        write_atomic(&self.path, &bytes).map_err(|source| self.io_error(source))
    }

    /// Writes the record only if no file exists yet. Returns `false` when
    /// another writer got there first; readers never see a partial record.
    pub fn create_new(&self, record: &T) -> Result<bool, StateFileError> {
        let bytes = self.encode(record)?;
        let tmp = staged(&self.path, &bytes).map_err(|source| self.io_error(source))?;
        match tmp.persist_noclobber(&self.path) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(self.io_error(err.error)),
        }
    }

    /// Removes the file; already absent counts as success.
    pub fn delete(&self) -> Result<(), StateFileError> {
        remove_if_present(&self.path).map_err(|source| self.io_error(source))
    }

    fn encode(&self, record: &T) -> Result<Vec<u8>, StateFileError> {
        serde_json::to_vec(record).map_err(|source| StateFileError::Invalid {
            path: self.path.clone(),
            source,
        })
    }

    fn io_error(&self, source: io::Error) -> StateFileError {
        StateFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = staged(path, contents)?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

pub(crate) fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn staged(path: &Path, contents: &[u8]) -> io::Result<NamedTempFile> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

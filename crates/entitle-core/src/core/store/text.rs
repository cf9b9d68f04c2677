use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::data_file::{remove_if_present, write_atomic};

/// A plain-text file whose presence and content drive a status surface.
#[derive(Debug, Clone)]
pub struct TextArtifact {
    path: PathBuf,
}

impl TextArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn write(&self, contents: &str) -> Result<()> {
        write_atomic(&self.path, contents.as_bytes())
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    pub fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    pub fn remove(&self) -> Result<()> {
        remove_if_present(&self.path)
            .with_context(|| format!("failed to remove {}", self.path.display()))
    }
}

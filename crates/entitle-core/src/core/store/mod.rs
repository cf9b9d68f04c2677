//! On-disk records: JSON data files, notices, and plain-text status artifacts.

mod data_file;
mod notices;
mod text;

pub use data_file::{DataFile, StateFileError};
pub use notices::{Notice, NoticeStore};
pub use text::TextArtifact;

//! Track path parsing.
//!
//! Host paths look like `assets://raw/beep.mp3` or `data://em/test.mp3`.
//! Only the last `/` matters; the scheme is kept as part of the directory.

use serde::Serialize;

/// A track path split into directory and file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilePathInfo {
    pub full_path: String,
    /// Everything up to and including the last `/`, or empty.
    pub directory: String,
    /// Everything after the last `/`, or the whole path.
    pub filename: String,
}

impl FilePathInfo {
    pub fn parse(full_path: &str) -> Self {
        let (directory, filename) = match full_path.rfind('/') {
            Some(idx) => full_path.split_at(idx + 1),
            None => ("", full_path),
        };
        Self {
            full_path: full_path.to_string(),
            directory: directory.to_string(),
            filename: filename.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.full_path.is_empty()
    }
}

impl From<&str> for FilePathInfo {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

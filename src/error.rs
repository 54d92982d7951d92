//src/error.rs

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A chunk size cannot be derived from an empty mapping file.
    #[error("input file {} is empty", .path.display())]
    EmptyInput { path: PathBuf },

    #[error("no accessions could be extracted from {}", .path.display())]
    EmptyAccessionSet { path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid partition layout: {0}")]
    InvalidPartitionLayout(String),

    #[error("worker failure: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, FilterError>;

impl FilterError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        FilterError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Attach a path to a bare `io::Result`.
pub(crate) trait IoContext<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| FilterError::io(path, e))
    }
}

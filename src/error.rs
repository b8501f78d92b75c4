use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by alignment models, feature extraction and decoding
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A required input file does not exist
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// A feature vector disagrees with its feature configuration
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// A context window position did not resolve to exactly one token
    #[error("invalid context window: {0}")]
    InvalidWindow(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    /// An external process exited unsuccessfully
    #[error("external process failed: {0}")]
    Process(String),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    pub(crate) fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn schema<S: Into<String>>(msg: S) -> Self {
        Error::SchemaMismatch(msg.into())
    }
}

/// Open a file for reading, reporting a missing file by name
pub(crate) fn open_existing(path: &std::path::Path) -> Result<std::fs::File> {
    if !path.exists() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    Ok(std::fs::File::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_names_path() {
        let err = open_existing(std::path::Path::new("/nonexistent/model.colibri.alignmodel-keys"))
            .unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
        assert!(err.to_string().contains("model.colibri.alignmodel-keys"));
    }
}

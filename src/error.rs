use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Corrupt ledger file {}: {source}", .path.display())]
    LedgerCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage error: {message}")]
    Storage { message: String, retryable: bool },

    #[error("Upload failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl Error {
    /// Whether a retry with a fresh upload session could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

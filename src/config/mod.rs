use std::env;
use std::path::PathBuf;

/// Runtime configuration for the upload pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Chunk size for multipart uploads in bytes (default: 10 MB; values
    /// below the 5 MB S3 part minimum are clamped by the store)
    pub chunk_size: usize,

    /// Maximum upload attempts per file; 0 means retry forever (default: 5)
    pub max_attempts: u32,

    /// Base delay between retries in seconds (default: 5)
    pub retry_delay_secs: u64,

    /// Number of concurrent workers (default: 10)
    pub workers: usize,

    /// Path of the persisted upload ledger (default: "uploaded_files.json")
    pub ledger_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 10 * 1024 * 1024, // 10 MB
            max_attempts: 5,
            retry_delay_secs: 5,
            workers: 10,
            ledger_path: PathBuf::from("uploaded_files.json"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            chunk_size: env::var("UPLOAD_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.chunk_size),

            max_attempts: env::var("UPLOAD_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_attempts),

            retry_delay_secs: env::var("UPLOAD_RETRY_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.retry_delay_secs),

            workers: env::var("UPLOAD_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.workers),

            ledger_path: env::var("UPLOAD_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.ledger_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delay_secs, 5);
        assert_eq!(config.workers, 10);
        assert_eq!(config.ledger_path, PathBuf::from("uploaded_files.json"));
    }
}

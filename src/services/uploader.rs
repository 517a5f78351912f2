use crate::error::{Error, Result};
use crate::services::ledger::Ledger;
use crate::services::storage::{ObjectStore, content_type_for};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Longest single backoff wait, regardless of attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    AlreadyUploaded,
}

/// Uploads one file per call, consulting and updating the ledger, and
/// retrying transient storage failures with exponential backoff.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<Ledger>,
    /// 0 means retry forever at the fixed base delay.
    max_attempts: u32,
    retry_delay: Duration,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<Ledger>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            max_attempts,
            retry_delay,
        }
    }

    pub async fn upload(&self, local_path: &Path, relative_path: &str) -> Result<UploadOutcome> {
        if self.ledger.contains(relative_path) {
            info!(path = relative_path, "Skipping already uploaded file");
            return Ok(UploadOutcome::AlreadyUploaded);
        }

        let content_type = content_type_for(local_path);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            // Each attempt is a fresh session, never a resume of partial chunks.
            match self.store.put(relative_path, local_path, content_type).await {
                Ok(()) => {
                    info!(path = relative_path, content_type, "Uploaded file");
                    self.ledger.record(relative_path)?;
                    return Ok(UploadOutcome::Uploaded);
                }
                Err(e) if e.is_retryable() => {
                    if self.max_attempts > 0 && attempt >= self.max_attempts {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        path = relative_path,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Transient upload error, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        if self.max_attempts == 0 {
            // Unbounded mode keeps the original fixed-delay cadence.
            return self.retry_delay;
        }

        let factor = 1u32 << (attempt - 1).min(16);
        (self.retry_delay * factor).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyStore {
        failures_remaining: AtomicU32,
        retryable: bool,
        puts: Mutex<Vec<(String, String)>>,
    }

    impl FlakyStore {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                failures_remaining: AtomicU32::new(failures),
                retryable,
                puts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn put(&self, key: &str, _local_path: &Path, content_type: &str) -> Result<()> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Storage {
                    message: "injected failure".to_string(),
                    retryable: self.retryable,
                });
            }
            self.puts
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string()));
            Ok(())
        }
    }

    fn fixture(store: Arc<dyn ObjectStore>, max_attempts: u32) -> (Uploader, Arc<Ledger>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(Ledger::load(dir.path().join("ledger.json")).unwrap());
        let uploader = Uploader::new(store, ledger.clone(), max_attempts, Duration::from_millis(1));
        (uploader, ledger, dir)
    }

    #[tokio::test]
    async fn test_retry_then_succeed_records_once() {
        let store = Arc::new(FlakyStore::new(2, true));
        let (uploader, ledger, dir) = fixture(store.clone(), 5);

        let local = dir.path().join("data.bin");
        std::fs::write(&local, b"x").unwrap();

        let outcome = uploader.upload(&local, "data.bin").await.unwrap();
        assert_eq!(outcome, UploadOutcome::Uploaded);

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert!(ledger.contains("data.bin"));
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let store = Arc::new(FlakyStore::new(1, false));
        let (uploader, ledger, dir) = fixture(store.clone(), 5);

        let local = dir.path().join("data.bin");
        std::fs::write(&local, b"x").unwrap();

        let err = uploader.upload(&local, "data.bin").await.unwrap_err();
        assert!(matches!(err, Error::Storage { retryable: false, .. }));
        assert!(store.puts.lock().unwrap().is_empty());
        assert!(!ledger.contains("data.bin"));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let store = Arc::new(FlakyStore::new(10, true));
        let (uploader, ledger, dir) = fixture(store.clone(), 3);

        let local = dir.path().join("data.bin");
        std::fs::write(&local, b"x").unwrap();

        let err = uploader.upload(&local, "data.bin").await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert!(!ledger.contains("data.bin"));
    }

    #[tokio::test]
    async fn test_ledgered_file_skipped() {
        let store = Arc::new(FlakyStore::new(0, true));
        let (uploader, ledger, dir) = fixture(store.clone(), 5);

        ledger.record("data.bin").unwrap();

        let local = dir.path().join("data.bin");
        std::fs::write(&local, b"x").unwrap();

        let outcome = uploader.upload(&local, "data.bin").await.unwrap();
        assert_eq!(outcome, UploadOutcome::AlreadyUploaded);
        assert!(store.puts.lock().unwrap().is_empty());
    }
}

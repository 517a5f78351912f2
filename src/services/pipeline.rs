use crate::error::Result;
use crate::services::ledger::Ledger;
use crate::services::unpack::{self, FileKind};
use crate::services::uploader::{UploadOutcome, Uploader};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

/// Counters shared across workers for the end-of-run summary.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub uploaded: AtomicU64,
    pub extracted: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

/// Result of one full pipeline run.
#[derive(Debug)]
pub struct RunReport {
    pub uploaded: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Relative path and error message for every file that terminally failed.
    pub failures: Vec<(String, String)>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

struct Shared {
    root: PathBuf,
    uploader: Arc<Uploader>,
    ledger: Arc<Ledger>,
    stats: PipelineStats,
    failures: Mutex<Vec<(String, String)>>,
    /// Relative paths already claimed this run, so a re-scan after
    /// extraction cannot dispatch the same file twice.
    seen: Mutex<HashSet<String>>,
}

impl Shared {
    fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        // Object keys use forward slashes regardless of platform.
        rel.to_string_lossy().replace('\\', "/")
    }

    fn record_failure(&self, relative_path: &str, message: String) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        self.failures
            .lock()
            .expect("failure list mutex poisoned")
            .push((relative_path.to_string(), message));
    }
}

/// Decrements the in-flight counter when a worker finishes, even if its
/// task unwinds, so the dispatch loop always sees completion.
struct InFlightGuard(Arc<AtomicU64>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Walks the source tree and drives extraction and uploads through a
/// single work queue feeding a bounded worker pool.
///
/// ZIP extraction re-submits the freshly exposed files onto the same
/// queue instead of spawning a nested pool per directory level, so total
/// concurrency stays bounded by `workers` no matter how deeply archives
/// nest.
pub struct Pipeline {
    shared: Arc<Shared>,
    workers: usize,
}

impl Pipeline {
    pub fn new(root: PathBuf, uploader: Arc<Uploader>, ledger: Arc<Ledger>, workers: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                root,
                uploader,
                ledger,
                stats: PipelineStats::default(),
                failures: Mutex::new(Vec::new()),
                seen: Mutex::new(HashSet::new()),
            }),
            workers: workers.max(1),
        }
    }

    pub async fn run(self) -> Result<RunReport> {
        let shared = self.shared;

        info!(root = %shared.root.display(), workers = self.workers, "Starting upload pipeline");

        let (task_tx, mut task_rx) = mpsc::unbounded_channel::<PathBuf>();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let in_flight = Arc::new(AtomicU64::new(0));
        let mut tasks: Vec<(String, tokio::task::JoinHandle<()>)> = Vec::new();

        // Seed the queue with the initial walk of the source tree.
        let initial = scan(&shared.root)?;
        for path in initial {
            enqueue(&shared, &task_tx, &in_flight, path);
        }

        // Dispatch loop: pull a file, take a worker permit, process it.
        // The queue is drained when nothing is queued or in flight.
        loop {
            let task = match tokio::time::timeout(Duration::from_millis(50), task_rx.recv()).await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(_) => {
                    if in_flight.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    continue;
                }
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore is never closed; bail out if it somehow is.
                Err(_) => break,
            };

            let relative_path = shared.relative_path(&task);
            let shared = Arc::clone(&shared);
            let tx = task_tx.clone();
            let in_flight_clone = Arc::clone(&in_flight);

            let handle = tokio::spawn(async move {
                let _guard = InFlightGuard(Arc::clone(&in_flight_clone));
                process_file(&shared, &tx, &in_flight_clone, task).await;
                drop(permit);
            });
            tasks.push((relative_path, handle));
        }

        // Join every worker; a panicked worker is a failed file, not a hang.
        for (relative_path, handle) in tasks {
            if let Err(e) = handle.await {
                error!(path = %relative_path, error = %e, "Worker task aborted");
                shared.record_failure(&relative_path, e.to_string());
            }
        }

        let report = RunReport {
            uploaded: shared.stats.uploaded.load(Ordering::Relaxed),
            extracted: shared.stats.extracted.load(Ordering::Relaxed),
            skipped: shared.stats.skipped.load(Ordering::Relaxed),
            failed: shared.stats.failed.load(Ordering::Relaxed),
            failures: std::mem::take(
                &mut *shared.failures.lock().expect("failure list mutex poisoned"),
            ),
        };

        info!(
            uploaded = report.uploaded,
            extracted = report.extracted,
            skipped = report.skipped,
            failed = report.failed,
            "Pipeline run completed"
        );

        Ok(report)
    }
}

/// Enumerates regular files under `dir`. Archive-metadata directories are
/// pruned; hidden names are filtered for files only, so dot-directories
/// are still descended into.
fn scan(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_dir(dir, &mut files)?;
    Ok(files)
}

fn walk_dir(current: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if unpack::is_metadata_dir(&path) {
                debug!(path = %path.display(), "Skipping metadata directory");
                continue;
            }
            walk_dir(&path, files)?;
        } else if file_type.is_file() {
            if unpack::is_skipped(&path) {
                debug!(path = %path.display(), "Skipping filtered file");
                continue;
            }
            files.push(path);
        }
    }

    Ok(())
}

/// Queues a candidate file unless the ledger already has it or it was
/// claimed earlier in this run.
fn enqueue(
    shared: &Arc<Shared>,
    tx: &mpsc::UnboundedSender<PathBuf>,
    in_flight: &Arc<AtomicU64>,
    path: PathBuf,
) {
    let relative_path = shared.relative_path(&path);

    if shared.ledger.contains(&relative_path) {
        info!(path = %relative_path, "Skipping already uploaded file");
        shared.stats.skipped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    {
        let mut seen = shared.seen.lock().expect("seen set mutex poisoned");
        if !seen.insert(relative_path) {
            return;
        }
    }

    in_flight.fetch_add(1, Ordering::SeqCst);
    if tx.send(path).is_err() {
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn process_file(
    shared: &Arc<Shared>,
    tx: &mpsc::UnboundedSender<PathBuf>,
    in_flight: &Arc<AtomicU64>,
    path: PathBuf,
) {
    let relative_path = shared.relative_path(&path);

    match unpack::classify(&path) {
        FileKind::Zip => {
            debug!(path = %path.display(), "Processing ZIP file");
            let zip_path = path.clone();
            let extracted = tokio::task::spawn_blocking(move || unpack::extract_zip(&zip_path))
                .await
                .unwrap_or_else(|e| Err(std::io::Error::other(e).into()));

            match extracted {
                Ok(parent) => {
                    shared.stats.extracted.fetch_add(1, Ordering::Relaxed);
                    // Newly exposed files (including nested archives) go
                    // back onto the same queue.
                    match scan(&parent) {
                        Ok(new_files) => {
                            for new_path in new_files {
                                enqueue(shared, tx, in_flight, new_path);
                            }
                        }
                        Err(e) => {
                            warn!(dir = %parent.display(), error = %e, "Re-scan after extraction failed");
                            shared.record_failure(&relative_path, e.to_string());
                        }
                    }
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to extract ZIP file");
                    shared.record_failure(&relative_path, e.to_string());
                }
            }
        }
        FileKind::Bz2 => {
            debug!(path = %path.display(), "Processing BZ2 file");

            // Claim the output key before the output file exists on disk,
            // so a concurrent re-scan cannot enqueue the half-written file.
            let output_rel = shared.relative_path(&unpack::bz2_output_path(&path));
            {
                let mut seen = shared.seen.lock().expect("seen set mutex poisoned");
                seen.insert(output_rel.clone());
            }

            let bz2_path = path.clone();
            let decompressed = tokio::task::spawn_blocking(move || unpack::decompress_bz2(&bz2_path))
                .await
                .unwrap_or_else(|e| Err(std::io::Error::other(e).into()));

            match decompressed {
                Ok(output) => {
                    shared.stats.extracted.fetch_add(1, Ordering::Relaxed);
                    // Single-stream output goes straight to upload, no re-scan.
                    upload(shared, &output, &output_rel).await;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to decompress BZ2 file");
                    shared.record_failure(&relative_path, e.to_string());
                }
            }
        }
        FileKind::Plain => {
            upload(shared, &path, &relative_path).await;
        }
    }
}

async fn upload(shared: &Arc<Shared>, local_path: &Path, relative_path: &str) {
    match shared.uploader.upload(local_path, relative_path).await {
        Ok(UploadOutcome::Uploaded) => {
            shared.stats.uploaded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(UploadOutcome::AlreadyUploaded) => {
            shared.stats.skipped.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(path = relative_path, error = %e, "Upload failed");
            shared.record_failure(relative_path, e.to_string());
        }
    }
}

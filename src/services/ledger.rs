use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Persisted record of relative paths already uploaded to the bucket.
///
/// Backed by a single JSON array of strings. The in-memory set and the
/// full-file rewrite share one mutex so concurrent workers cannot lose
/// each other's entries.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Mutex<HashSet<String>>,
}

impl Ledger {
    /// Loads the ledger from `path`. A missing file yields an empty ledger;
    /// an unreadable or unparsable file is a fatal error so a wiped ledger
    /// can never silently trigger a re-upload storm.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let list: Vec<String> = serde_json::from_str(&contents).map_err(|source| {
                    Error::LedgerCorrupt {
                        path: path.clone(),
                        source,
                    }
                })?;
                list.into_iter().collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "Loaded upload ledger");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.entries
            .lock()
            .expect("ledger mutex poisoned")
            .contains(relative_path)
    }

    /// Records a completed upload and rewrites the persisted file.
    ///
    /// Returns `false` without touching disk if the path was already
    /// recorded, so a retried upload cannot double-record.
    pub fn record(&self, relative_path: &str) -> Result<bool> {
        let mut entries = self.entries.lock().expect("ledger mutex poisoned");

        if !entries.insert(relative_path.to_string()) {
            return Ok(false);
        }

        self.persist(&entries)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ledger mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full rewrite via a temp file in the same directory, renamed over the
    /// old ledger so a crash mid-write never corrupts it. Caller holds the
    /// entries lock.
    fn persist(&self, entries: &HashSet<String>) -> Result<()> {
        let mut list: Vec<&String> = entries.iter().collect();
        list.sort();

        let json = serde_json::to_string(&list).expect("string list serialization cannot fail");

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::PriceObservation;

/// Bounded price history persisted as a single JSON array, newest last.
/// The whole file is rewritten on every append.
pub struct HistoryStore {
    path: PathBuf,
    cap: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self { path: path.into(), cap }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored log. A missing, unreadable or corrupt file yields an empty log;
    /// inside a valid array, entries that do not decode are dropped one by one.
    pub fn load(&self) -> Vec<PriceObservation> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("[HISTORY] {} not found, starting a new log", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("[HISTORY] cannot read {}: {e} — treating as empty", self.path.display());
                return Vec::new();
            }
        };

        let values = match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!("[HISTORY] {} is corrupt ({e}) — treating as empty", self.path.display());
                return Vec::new();
            }
        };

        values
            .into_iter()
            .enumerate()
            .filter_map(|(idx, value)| match serde_json::from_value::<PriceObservation>(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("[HISTORY] dropping entry {idx} in {}: {e}", self.path.display());
                    None
                }
            })
            .collect()
    }

    /// Appends one observation, keeps the newest `cap` entries and rewrites the file.
    /// Returns the stored length.
    pub fn append(&self, observation: PriceObservation) -> Result<usize> {
        let mut entries = self.load();
        push_bounded(&mut entries, observation, self.cap);
        self.write_atomic(&entries)?;
        info!("[HISTORY] {} entries in {}", entries.len(), self.path.display());
        Ok(entries.len())
    }

    /// Writes to a sibling temp file, then renames it over the target.
    fn write_atomic(&self, entries: &[PriceObservation]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        let written = fs::write(&tmp_path, json).and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Pushes `item` and drops from the front until at most `cap` remain.
pub fn push_bounded<T>(entries: &mut Vec<T>, item: T, cap: usize) {
    entries.push(item);
    if entries.len() > cap {
        let excess = entries.len() - cap;
        entries.drain(..excess);
    }
}

//! Atomically swapped mapping table snapshots
//!
//! Readers take an `Arc` to the current table and keep using it for the
//! whole request. A reload parses into a fresh table and swaps the pointer;
//! a failed parse leaves the previous snapshot in place.

use super::table::OrderedMappingTable;
use crate::error::Result;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Content fingerprint used to skip reparsing unchanged files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    digest: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let bytes = fs::read(path).ok()?;
        Some(Fingerprint {
            len: bytes.len() as u64,
            digest: xxh3_64(&bytes),
        })
    }
}

/// Mapping table that can be reloaded from its file while in use
pub struct ReloadableTable {
    path: Option<PathBuf>,
    current: RwLock<Arc<OrderedMappingTable>>,
    fingerprint: Mutex<Option<Fingerprint>>,
}

impl ReloadableTable {
    /// Load the initial snapshot; fails if the file does not parse
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fingerprint = Fingerprint::of(&path);
        let table = OrderedMappingTable::load(&path)?;
        Ok(ReloadableTable {
            path: Some(path),
            current: RwLock::new(Arc::new(table)),
            fingerprint: Mutex::new(fingerprint),
        })
    }

    /// Fixed table with no backing file; reloads are no-ops
    pub fn fixed(table: OrderedMappingTable) -> Self {
        ReloadableTable {
            path: None,
            current: RwLock::new(Arc::new(table)),
            fingerprint: Mutex::new(None),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<OrderedMappingTable> {
        Arc::clone(&self.current.read())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reparse the file and swap it in
    ///
    /// Returns `Ok(true)` if the snapshot was replaced. On error the previous
    /// snapshot stays active.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let fingerprint = Fingerprint::of(path);
        match OrderedMappingTable::load(path) {
            Ok(table) => {
                *self.current.write() = Arc::new(table);
                *self.fingerprint.lock() = fingerprint;
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "Reload of {} failed, keeping previous table: {}",
                    path.display(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Reload only if the file's contents changed since the last load
    pub fn reload_if_modified(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let now = Fingerprint::of(path);
        if now.is_some() && now == *self.fingerprint.lock() {
            debug!("{} unchanged, skipping reload", path.display());
            return Ok(false);
        }

        info!("{} changed, reloading", path.display());
        self.reload()
    }
}

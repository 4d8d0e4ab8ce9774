//! Hard-link lease directory
//!
//! Layout of a gridmapdir:
//!
//! ```text
//! gridmapdir/
//!   .lock                          allocation lock
//!   testa0 testa1 ... testa9       one empty file per pool account
//!   CN%3Dusera%2CDC%3Dexample...   lease: hard link to the leased slot
//! ```
//!
//! A slot is free while its link count is 1. Lease names are the URL-encoded
//! subject key, and since keys always contain `=` every lease name contains
//! `%`, which keeps them apart from slot names. The lease timestamp is the
//! mtime of the shared inode.

use super::lock::PoolLock;
use super::store::{slot_index, Lease, LeaseKey, LeaseStore, PoolSlot, SlotState};
use crate::error::{MappingError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

const LOCK_FILE: &str = ".lock";

#[derive(Debug)]
struct ScanEntry {
    name: String,
    ino: u64,
    nlink: u64,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct Scan {
    slots: Vec<ScanEntry>,
    links: Vec<ScanEntry>,
}

impl Scan {
    fn slot_by_ino(&self, ino: u64) -> Option<&ScanEntry> {
        self.slots.iter().find(|e| e.ino == ino)
    }

    fn link_by_ino(&self, ino: u64) -> Option<&ScanEntry> {
        self.links.iter().find(|e| e.ino == ino)
    }
}

fn is_lease_name(name: &str) -> bool {
    name.contains('%')
}

fn decode_key(name: &str) -> Option<LeaseKey> {
    let decoded = urlencoding::decode(name).ok()?;
    LeaseKey::new(decoded.into_owned()).ok()
}

fn touch(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

/// File-system lease store shared by every process on the host
#[derive(Debug, Clone)]
pub struct GridmapDir {
    root: PathBuf,
    /// Slot name by inode, as of the last directory scan
    slot_inodes: Arc<Mutex<HashMap<u64, String>>>,
}

impl GridmapDir {
    /// Open an existing gridmapdir
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root)
            .map_err(|e| MappingError::storage(&format!("open {}", root.display()), e))?;
        if !meta.is_dir() {
            return Err(MappingError::Storage(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(GridmapDir {
            root,
            slot_inodes: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create slot files `<pool>0` .. `<pool>{count-1}`, keeping existing ones
    pub fn create_pool(&self, pool: &str, count: u64) -> Result<()> {
        for index in 0..count {
            let path = self.root.join(format!("{}{}", pool, index));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(MappingError::storage("create pool slot", e)),
            }
        }
        debug!("Pool {} has {} slots in {}", pool, count, self.root.display());
        Ok(())
    }

    fn link_path(&self, subject: &LeaseKey) -> PathBuf {
        self.root.join(urlencoding::encode(subject.as_str()).as_ref())
    }

    fn scan(&self) -> Result<Scan> {
        let mut scan = Scan::default();
        let entries =
            fs::read_dir(&self.root).map_err(|e| MappingError::storage("scan gridmapdir", e))?;

        for entry in entries {
            let entry = entry.map_err(|e| MappingError::storage("scan gridmapdir", e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Released by a peer between readdir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(MappingError::storage("stat gridmapdir entry", e)),
            };
            if !meta.is_file() {
                continue;
            }
            let item = ScanEntry {
                ino: meta.ino(),
                nlink: meta.nlink(),
                modified: meta
                    .modified()
                    .map_err(|e| MappingError::storage("read lease time", e))?,
                name,
            };
            if is_lease_name(&item.name) {
                scan.links.push(item);
            } else {
                scan.slots.push(item);
            }
        }

        *self.slot_inodes.lock() = scan
            .slots
            .iter()
            .map(|e| (e.ino, e.name.clone()))
            .collect();
        Ok(scan)
    }

    /// Slot sharing inode `ino`, trying the cached name before a full scan
    fn slot_of_inode(&self, ino: u64) -> Result<Option<String>> {
        let cached = self.slot_inodes.lock().get(&ino).cloned();
        if let Some(name) = cached {
            match fs::symlink_metadata(self.root.join(&name)) {
                Ok(meta) if meta.ino() == ino => return Ok(Some(name)),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(MappingError::storage("stat slot", e)),
            }
        }
        Ok(self.scan()?.slot_by_ino(ino).map(|e| e.name.clone()))
    }
}

impl LeaseStore for GridmapDir {
    fn lock(&self, deadline: Option<Instant>) -> Result<PoolLock> {
        PoolLock::acquire(&self.root.join(LOCK_FILE), deadline)
    }

    fn slots(&self, pool: &str) -> Result<Vec<PoolSlot>> {
        let scan = self.scan()?;
        let mut slots: Vec<PoolSlot> = scan
            .slots
            .iter()
            .filter_map(|entry| {
                let index = slot_index(pool, &entry.name)?;
                let state = if entry.nlink <= 1 {
                    SlotState::Free
                } else {
                    scan.link_by_ino(entry.ino)
                        .and_then(|link| {
                            decode_key(&link.name).map(|subject| SlotState::Leased {
                                subject,
                                since: link.modified,
                            })
                        })
                        .unwrap_or(SlotState::Unavailable)
                };
                Some(PoolSlot {
                    name: entry.name.clone(),
                    index,
                    state,
                })
            })
            .collect();

        slots.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)));
        Ok(slots)
    }

    fn lease_of(&self, subject: &LeaseKey) -> Result<Option<Lease>> {
        let link = self.link_path(subject);
        let meta = match fs::symlink_metadata(&link) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MappingError::storage("stat lease", e)),
        };

        match self.slot_of_inode(meta.ino())? {
            Some(slot) => Ok(Some(Lease {
                slot,
                subject: subject.clone(),
                since: meta
                    .modified()
                    .map_err(|e| MappingError::storage("read lease time", e))?,
            })),
            None => {
                warn!(
                    "Lease of {} points at no slot (slot file removed?), dropping it",
                    subject
                );
                self.release(subject)?;
                Ok(None)
            }
        }
    }

    fn bind(&self, slot: &str, subject: &LeaseKey) -> Result<bool> {
        let slot_path = self.root.join(slot);
        let meta =
            fs::symlink_metadata(&slot_path).map_err(|e| MappingError::storage("stat slot", e))?;
        if meta.nlink() != 1 {
            return Ok(false);
        }

        let link = self.link_path(subject);
        match fs::hard_link(&slot_path, &link) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(MappingError::storage("link lease", e)),
        }

        // A peer that skipped the lock may have linked the same slot
        let nlink = fs::symlink_metadata(&slot_path)
            .map_err(|e| MappingError::storage("stat slot", e))?
            .nlink();
        if nlink > 2 {
            warn!("Slot {} was bound concurrently, backing off", slot);
            fs::remove_file(&link).map_err(|e| MappingError::storage("unlink lease", e))?;
            return Ok(false);
        }

        touch(&link).map_err(|e| MappingError::storage("stamp lease", e))?;
        Ok(true)
    }

    fn renew(&self, subject: &LeaseKey) -> Result<()> {
        touch(&self.link_path(subject)).map_err(|e| MappingError::storage("renew lease", e))
    }

    fn release(&self, subject: &LeaseKey) -> Result<bool> {
        match fs::remove_file(self.link_path(subject)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MappingError::storage("release lease", e)),
        }
    }

    fn leases(&self) -> Result<Vec<Lease>> {
        let scan = self.scan()?;
        let mut leases: Vec<Lease> = scan
            .links
            .iter()
            .filter_map(|link| {
                let subject = decode_key(&link.name)?;
                let slot = scan.slot_by_ino(link.ino)?;
                Some(Lease {
                    slot: slot.name.clone(),
                    subject,
                    since: link.modified,
                })
            })
            .collect();
        leases.sort_by(|a, b| a.slot.cmp(&b.slot));
        Ok(leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(s: &str) -> LeaseKey {
        LeaseKey::new(s).unwrap()
    }

    fn pool_dir(count: u64) -> (tempfile::TempDir, GridmapDir) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GridmapDir::open(tmp.path()).unwrap();
        dir.create_pool("testa", count).unwrap();
        (tmp, dir)
    }

    #[test]
    fn test_slots_sorted_numerically() {
        let (_tmp, dir) = pool_dir(12);
        dir.create_pool("testb", 2).unwrap();

        let names: Vec<String> = dir.slots("testa").unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 12);
        assert_eq!(names[0], "testa0");
        assert_eq!(names[2], "testa2");
        assert_eq!(names[11], "testa11");
        assert!(dir.slots("testa").unwrap().iter().all(|s| s.is_free()));
        assert_eq!(dir.slots("testb").unwrap().len(), 2);
        assert!(dir.slots("testc").unwrap().is_empty());
    }

    #[test]
    fn test_bind_is_exclusive() {
        let (_tmp, dir) = pool_dir(2);
        let a = key("CN=a");
        let b = key("CN=b");

        assert!(dir.bind("testa0", &a).unwrap());
        assert!(!dir.bind("testa0", &b).unwrap());
        // One lease per subject
        assert!(!dir.bind("testa1", &a).unwrap());

        let slots = dir.slots("testa").unwrap();
        match &slots[0].state {
            SlotState::Leased { subject, .. } => assert_eq!(subject, &a),
            other => panic!("expected leased slot, got {:?}", other),
        }
        assert!(slots[1].is_free());
    }

    #[test]
    fn test_lease_lookup_and_release() {
        let (_tmp, dir) = pool_dir(3);
        let subject = key("CN=usera,DC=example,DC=org");

        assert_eq!(dir.lease_of(&subject).unwrap(), None);
        assert!(dir.bind("testa1", &subject).unwrap());

        let lease = dir.lease_of(&subject).unwrap().unwrap();
        assert_eq!(lease.slot, "testa1");
        assert_eq!(dir.leases().unwrap(), vec![lease]);

        assert!(dir.release(&subject).unwrap());
        assert!(!dir.release(&subject).unwrap());
        assert!(dir.slots("testa").unwrap().iter().all(|s| s.is_free()));
    }

    #[test]
    fn test_renew_moves_timestamp() {
        let (tmp, dir) = pool_dir(1);
        let subject = key("CN=a");
        dir.bind("testa0", &subject).unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        OpenOptions::new()
            .write(true)
            .open(tmp.path().join("testa0"))
            .unwrap()
            .set_modified(past)
            .unwrap();
        let before = dir.lease_of(&subject).unwrap().unwrap().since;

        dir.renew(&subject).unwrap();
        let after = dir.lease_of(&subject).unwrap().unwrap().since;
        assert!(after > before);
        assert!(dir.renew(&key("CN=nobody")).is_err());
    }

    #[test]
    fn test_orphaned_lease_dropped() {
        let (tmp, dir) = pool_dir(1);
        let subject = key("CN=a");
        dir.bind("testa0", &subject).unwrap();
        fs::remove_file(tmp.path().join("testa0")).unwrap();

        assert_eq!(dir.lease_of(&subject).unwrap(), None);
        assert!(!dir.release(&subject).unwrap());
    }

    #[test]
    fn test_lease_follows_renamed_slot() {
        let (tmp, dir) = pool_dir(1);
        let subject = key("CN=a");
        dir.bind("testa0", &subject).unwrap();
        assert_eq!(dir.lease_of(&subject).unwrap().unwrap().slot, "testa0");

        fs::rename(tmp.path().join("testa0"), tmp.path().join("testa5")).unwrap();
        assert_eq!(dir.lease_of(&subject).unwrap().unwrap().slot, "testa5");

        // A clone shares the slot cache
        assert_eq!(dir.clone().lease_of(&subject).unwrap().unwrap().slot, "testa5");
    }

    #[test]
    fn test_open_requires_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, "").unwrap();
        assert!(GridmapDir::open(&file).is_err());
        assert!(GridmapDir::open(tmp.path().join("missing")).is_err());
    }
}

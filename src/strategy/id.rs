//! Numeric id resolution for login and group names
//!
//! A resolver must give the same answer for a name for the lifetime of the
//! process. [`SystemIds`] asks the name service switch directly; wrap it in
//! [`CachedIds`] to pin answers and avoid repeated NSS round trips.

use crate::error::{MappingError, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::num::NonZeroUsize;

/// Maps a login or group name to a numeric id
pub trait IdResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<u32>;
}

impl<R: IdResolver + ?Sized> IdResolver for std::sync::Arc<R> {
    fn resolve(&self, name: &str) -> Result<u32> {
        (**self).resolve(name)
    }
}

/// Fixed in-memory name to id table
#[derive(Debug, Clone, Default)]
pub struct StaticIdTable {
    ids: HashMap<String, u32>,
}

impl StaticIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, id: u32) {
        self.ids.insert(name.into(), id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for StaticIdTable {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        StaticIdTable {
            ids: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl From<HashMap<String, u32>> for StaticIdTable {
    fn from(ids: HashMap<String, u32>) -> Self {
        StaticIdTable { ids }
    }
}

impl IdResolver for StaticIdTable {
    fn resolve(&self, name: &str) -> Result<u32> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| MappingError::UnknownIdentifier(name.to_string()))
    }
}

/// Which system database to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdDatabase {
    /// `getpwnam_r(3)`, yields UIDs
    Passwd,
    /// `getgrnam_r(3)`, yields GIDs
    Group,
}

/// Name service lookups through libc
#[derive(Debug, Clone, Copy)]
pub struct SystemIds {
    database: IdDatabase,
}

impl SystemIds {
    pub fn users() -> Self {
        SystemIds {
            database: IdDatabase::Passwd,
        }
    }

    pub fn groups() -> Self {
        SystemIds {
            database: IdDatabase::Group,
        }
    }

    pub fn database(&self) -> IdDatabase {
        self.database
    }
}

const INITIAL_BUFFER: usize = 1024;
const MAX_BUFFER: usize = 1 << 20;

fn lookup_uid(name: &CString) -> io::Result<Option<u32>> {
    let mut buf = vec![0 as libc::c_char; INITIAL_BUFFER];
    loop {
        // SAFETY: passwd is plain old data; getpwnam_r fills it and points
        // its string fields into `buf`, which outlives this iteration.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < MAX_BUFFER {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        return Ok((!result.is_null()).then_some(pwd.pw_uid));
    }
}

fn lookup_gid(name: &CString) -> io::Result<Option<u32>> {
    let mut buf = vec![0 as libc::c_char; INITIAL_BUFFER];
    loop {
        // SAFETY: as in lookup_uid, for struct group
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                name.as_ptr(),
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < MAX_BUFFER {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        return Ok((!result.is_null()).then_some(grp.gr_gid));
    }
}

impl IdResolver for SystemIds {
    fn resolve(&self, name: &str) -> Result<u32> {
        let cname =
            CString::new(name).map_err(|_| MappingError::UnknownIdentifier(name.to_string()))?;

        let found = match self.database {
            IdDatabase::Passwd => lookup_uid(&cname),
            IdDatabase::Group => lookup_gid(&cname),
        }
        .map_err(|e| MappingError::storage("name service lookup", e))?;

        found.ok_or_else(|| MappingError::UnknownIdentifier(name.to_string()))
    }
}

/// Memoizes successful lookups of an inner resolver
pub struct CachedIds<R> {
    inner: R,
    cache: Mutex<LruCache<String, u32>>,
}

impl<R: IdResolver> CachedIds<R> {
    pub fn new(inner: R, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        CachedIds {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl<R: IdResolver> IdResolver for CachedIds<R> {
    fn resolve(&self, name: &str) -> Result<u32> {
        if let Some(id) = self.cache.lock().get(name) {
            return Ok(*id);
        }
        let id = self.inner.resolve(name)?;
        self.cache.lock().put(name.to_string(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_static_table() {
        let table: StaticIdTable = [("testa0", 3), ("testa1", 4)].into_iter().collect();
        assert_eq!(table.resolve("testa0").unwrap(), 3);
        assert_eq!(table.resolve("testa1").unwrap(), 4);
        assert!(matches!(
            table.resolve("testa2"),
            Err(MappingError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn test_system_root() {
        assert_eq!(SystemIds::users().resolve("root").unwrap(), 0);
        assert!(matches!(
            SystemIds::users().resolve("no-such-user-gridmap-test"),
            Err(MappingError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            SystemIds::groups().resolve("bad\0name"),
            Err(MappingError::UnknownIdentifier(_))
        ));
    }

    struct Counting {
        calls: AtomicUsize,
    }

    impl IdResolver for Counting {
        fn resolve(&self, name: &str) -> Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if name == "missing" {
                Err(MappingError::UnknownIdentifier(name.into()))
            } else {
                Ok(name.len() as u32)
            }
        }
    }

    #[test]
    fn test_cache_pins_successes_only() {
        let cached = CachedIds::new(
            Counting {
                calls: AtomicUsize::new(0),
            },
            8,
        );

        assert_eq!(cached.resolve("abc").unwrap(), 3);
        assert_eq!(cached.resolve("abc").unwrap(), 3);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        assert!(cached.resolve("missing").is_err());
        assert!(cached.resolve("missing").is_err());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cached.cached(), 1);
    }
}

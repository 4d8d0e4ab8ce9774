//! Cross-process allocation lock
//!
//! `flock(2)` on a file in the pool directory. The kernel drops the lock
//! when the holder exits, so a crashed process never wedges allocation.

use crate::error::{MappingError, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Held allocation lock; released on drop
#[derive(Debug)]
pub struct PoolLock {
    file: Option<File>,
}

impl PoolLock {
    /// Take an exclusive lock on `path`, creating the file if needed
    ///
    /// With a deadline the lock is polled until it is reached, then
    /// `MappingError::Timeout` is returned. Without one the call blocks.
    pub fn acquire(path: &Path, deadline: Option<Instant>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| MappingError::storage("open pool lock", e))?;
        let fd = file.as_raw_fd();
        let started = Instant::now();

        match deadline {
            None => loop {
                // SAFETY: fd belongs to `file`, which is alive here
                if unsafe { libc::flock(fd, libc::LOCK_EX) } == 0 {
                    break;
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(MappingError::storage("lock pool", err));
                }
            },
            Some(deadline) => loop {
                // SAFETY: as above
                if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == 0 {
                    break;
                }
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {}
                    _ => return Err(MappingError::storage("lock pool", err)),
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(MappingError::Timeout(now - started));
                }
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            },
        }

        debug!("Acquired pool lock {}", path.display());
        Ok(PoolLock { file: Some(file) })
    }

    /// A guard that holds nothing, for stores that are atomic on their own
    pub fn unlocked() -> Self {
        PoolLock { file: None }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // SAFETY: fd is valid until `file` drops at the end of this block
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

//! Pool account leasing
//!
//! Leases are sticky: a subject keeps its account for as long as the lease
//! lives, across processes and restarts, because all state is in the store.

use super::store::{slot_index_among, Lease, LeaseKey, LeaseStore, PoolSlot, SlotState};
use crate::error::{MappingError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Default lease lifetime (30 days)
pub const DEFAULT_LEASE_LIFETIME: Duration = Duration::from_secs(30 * 24 * 3600);

/// Default number of extra attempts for a failed renewal
pub const DEFAULT_STORAGE_RETRIES: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// How lease age is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeasePolicy {
    /// Every use resets the timestamp, so only idle leases expire. A lease
    /// that is past its lifetime but still present is renewed on use.
    #[default]
    RenewOnUse,
    /// Age counts from bind; an expired lease is dropped and the subject
    /// gets a fresh allocation
    FixedTtl,
}

/// Allocates and tracks pool account leases
#[derive(Clone)]
pub struct PoolAccountManager {
    store: Arc<dyn LeaseStore>,
    lifetime: Duration,
    policy: LeasePolicy,
    retries: u32,
    pools: Arc<RwLock<Vec<String>>>,
}

impl std::fmt::Debug for PoolAccountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAccountManager")
            .field("lifetime", &self.lifetime)
            .field("policy", &self.policy)
            .field("retries", &self.retries)
            .field("pools", &*self.pools.read())
            .finish_non_exhaustive()
    }
}

impl PoolAccountManager {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        PoolAccountManager {
            store,
            lifetime: DEFAULT_LEASE_LIFETIME,
            policy: LeasePolicy::default(),
            retries: DEFAULT_STORAGE_RETRIES,
            pools: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_policy(mut self, policy: LeasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_pools<I, S>(self, pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_pools(pools);
        self
    }

    /// Replace the configured pool names
    ///
    /// Slot names are attributed to the longest configured pool they start
    /// with. Clones of this manager share the list.
    pub fn set_pools<I, S>(&self, pools: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = pools.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        if *self.pools.read() != names {
            debug!("Configured pools: {:?}", names);
            *self.pools.write() = names;
        }
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.pools.read().clone()
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn policy(&self) -> LeasePolicy {
        self.policy
    }

    fn is_expired(&self, since: SystemTime, now: SystemTime) -> bool {
        // A timestamp in the future (clock step) counts as fresh
        now.duration_since(since)
            .map(|age| age > self.lifetime)
            .unwrap_or(false)
    }

    fn renew_with_retry(&self, subject: &LeaseKey) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.renew(subject) {
                Ok(()) => return Ok(()),
                Err(MappingError::Storage(reason)) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Renewing lease of {} failed ({}), retry {}/{}",
                        subject, reason, attempt, self.retries
                    );
                    thread::sleep(RETRY_BACKOFF * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Lease an account from `pool` for `subject`
    ///
    /// Returns the subject's current account if its lease is live, otherwise
    /// binds the lowest free slot, otherwise reclaims the lowest expired
    /// slot held by someone else.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` when every slot is live, `Timeout` when the store
    /// lock is not acquired by `deadline`, `Storage` on I/O failure.
    pub fn lease(
        &self,
        pool: &str,
        subject: &LeaseKey,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let _lock = self.store.lock(deadline)?;
        let now = SystemTime::now();
        let pools = self.pool_names();

        if let Some(existing) = self.store.lease_of(subject)? {
            if slot_index_among(pool, &existing.slot, &pools).is_none() {
                info!(
                    "{} held {} outside pool {}, releasing it",
                    subject, existing.slot, pool
                );
                self.store.release(subject)?;
            } else {
                let expired = self.is_expired(existing.since, now);
                match self.policy {
                    LeasePolicy::RenewOnUse => {
                        self.renew_with_retry(subject)?;
                        debug!("Reusing lease {} for {}", existing.slot, subject);
                        return Ok(existing.slot);
                    }
                    LeasePolicy::FixedTtl if !expired => {
                        debug!("Reusing lease {} for {}", existing.slot, subject);
                        return Ok(existing.slot);
                    }
                    LeasePolicy::FixedTtl => {
                        info!("Lease {} of {} expired, reallocating", existing.slot, subject);
                        self.store.release(subject)?;
                    }
                }
            }
        }

        let slots: Vec<PoolSlot> = self
            .store
            .slots(pool)?
            .into_iter()
            .filter(|s| slot_index_among(pool, &s.name, &pools).is_some())
            .collect();

        for slot in slots.iter().filter(|s| s.is_free()) {
            if self.store.bind(&slot.name, subject)? {
                info!("Leased {} to {}", slot.name, subject);
                return Ok(slot.name.clone());
            }
            warn!("Lost race for {}, trying next slot", slot.name);
        }

        for slot in &slots {
            let SlotState::Leased {
                subject: holder,
                since,
            } = &slot.state
            else {
                continue;
            };
            if holder == subject || !self.is_expired(*since, now) {
                continue;
            }
            info!(
                "Reclaiming expired lease {} from {} for {}",
                slot.name, holder, subject
            );
            self.store.release(holder)?;
            if self.store.bind(&slot.name, subject)? {
                info!("Leased {} to {}", slot.name, subject);
                return Ok(slot.name.clone());
            }
        }

        Err(MappingError::PoolExhausted {
            pool: pool.to_string(),
            size: slots.len(),
        })
    }

    /// Drop the lease of `subject`; `Ok(false)` if it had none
    pub fn release(&self, subject: &LeaseKey) -> Result<bool> {
        let _lock = self.store.lock(None)?;
        let released = self.store.release(subject)?;
        if released {
            info!("Released lease of {}", subject);
        }
        Ok(released)
    }

    /// Release every expired lease, returning how many were dropped
    pub fn reclaim_expired(&self) -> Result<usize> {
        let _lock = self.store.lock(None)?;
        let now = SystemTime::now();
        let mut reclaimed = 0;

        for lease in self.store.leases()? {
            if self.is_expired(lease.since, now) && self.store.release(&lease.subject)? {
                info!("Reclaimed expired lease {} from {}", lease.slot, lease.subject);
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    pub fn leases(&self) -> Result<Vec<Lease>> {
        self.store.leases()
    }

    /// Whether `lease` is past its lifetime now
    pub fn lease_expired(&self, lease: &Lease) -> bool {
        self.is_expired(lease.since, SystemTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{GridmapDir, PoolLock};
    use std::fs::OpenOptions;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Gridmapdir whose next `failures` renewals fail with `Storage`
    struct FlakyRenewals {
        inner: GridmapDir,
        failures: AtomicU32,
    }

    impl LeaseStore for FlakyRenewals {
        fn lock(&self, deadline: Option<Instant>) -> Result<PoolLock> {
            self.inner.lock(deadline)
        }

        fn slots(&self, pool: &str) -> Result<Vec<PoolSlot>> {
            self.inner.slots(pool)
        }

        fn lease_of(&self, subject: &LeaseKey) -> Result<Option<Lease>> {
            self.inner.lease_of(subject)
        }

        fn bind(&self, slot: &str, subject: &LeaseKey) -> Result<bool> {
            self.inner.bind(slot, subject)
        }

        fn renew(&self, subject: &LeaseKey) -> Result<()> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(MappingError::Storage("disk full".into()));
            }
            self.inner.renew(subject)
        }

        fn release(&self, subject: &LeaseKey) -> Result<bool> {
            self.inner.release(subject)
        }

        fn leases(&self) -> Result<Vec<Lease>> {
            self.inner.leases()
        }
    }

    fn setup(count: u64) -> (tempfile::TempDir, PoolAccountManager) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GridmapDir::open(tmp.path()).unwrap();
        dir.create_pool("testa", count).unwrap();
        (tmp, PoolAccountManager::new(Arc::new(dir)))
    }

    fn key(s: &str) -> LeaseKey {
        LeaseKey::new(s).unwrap()
    }

    fn age_slot(root: &Path, slot: &str, age: Duration) {
        OpenOptions::new()
            .write(true)
            .open(root.join(slot))
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    #[test]
    fn test_sticky_lease() {
        let (_tmp, manager) = setup(3);
        let a = key("CN=a");

        let first = manager.lease("testa", &a, None).unwrap();
        assert_eq!(first, "testa0");
        for _ in 0..10 {
            assert_eq!(manager.lease("testa", &a, None).unwrap(), first);
        }
        assert_eq!(manager.lease("testa", &key("CN=b"), None).unwrap(), "testa1");
    }

    #[test]
    fn test_exhaustion() {
        let (_tmp, manager) = setup(2);
        manager.lease("testa", &key("CN=a"), None).unwrap();
        manager.lease("testa", &key("CN=b"), None).unwrap();

        match manager.lease("testa", &key("CN=c"), None) {
            Err(MappingError::PoolExhausted { pool, size }) => {
                assert_eq!(pool, "testa");
                assert_eq!(size, 2);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_pool_is_exhausted() {
        let (_tmp, manager) = setup(0);
        assert!(matches!(
            manager.lease("testa", &key("CN=a"), None),
            Err(MappingError::PoolExhausted { size: 0, .. })
        ));
    }

    #[test]
    fn test_release_frees_slot() {
        let (_tmp, manager) = setup(1);
        let a = key("CN=a");
        manager.lease("testa", &a, None).unwrap();
        assert!(manager.release(&a).unwrap());
        assert!(!manager.release(&a).unwrap());
        assert_eq!(manager.lease("testa", &key("CN=b"), None).unwrap(), "testa0");
    }

    #[test]
    fn test_expired_lease_reclaimed_for_other_subject() {
        let (tmp, manager) = setup(2);
        let manager = manager.with_lifetime(Duration::from_secs(60));
        manager.lease("testa", &key("CN=a"), None).unwrap();
        manager.lease("testa", &key("CN=b"), None).unwrap();

        age_slot(tmp.path(), "testa1", Duration::from_secs(120));

        assert_eq!(manager.lease("testa", &key("CN=c"), None).unwrap(), "testa1");
        let holders: Vec<String> = manager
            .leases()
            .unwrap()
            .into_iter()
            .map(|l| l.subject.to_string())
            .collect();
        assert_eq!(holders, vec!["CN=a", "CN=c"]);
    }

    #[test]
    fn test_renew_on_use_keeps_expired_lease() {
        let (tmp, manager) = setup(2);
        let manager = manager.with_lifetime(Duration::from_secs(60));
        let a = key("CN=a");
        manager.lease("testa", &key("CN=x"), None).unwrap();
        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa1");

        age_slot(tmp.path(), "testa1", Duration::from_secs(120));
        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa1");

        let lease = manager.leases().unwrap().pop().unwrap();
        assert!(!manager.lease_expired(&lease));
    }

    #[test]
    fn test_fixed_ttl_reallocates() {
        let (tmp, manager) = setup(2);
        let manager = manager
            .with_lifetime(Duration::from_secs(60))
            .with_policy(LeasePolicy::FixedTtl);
        let a = key("CN=a");

        assert_eq!(manager.lease("testa", &key("CN=x"), None).unwrap(), "testa0");
        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa1");
        manager.release(&key("CN=x")).unwrap();

        // Use within the lifetime does not move the timestamp
        age_slot(tmp.path(), "testa1", Duration::from_secs(30));
        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa1");
        let since = manager.leases().unwrap()[0].since;
        assert!(SystemTime::now().duration_since(since).unwrap() >= Duration::from_secs(29));

        // Once expired the subject gets the lowest free slot
        age_slot(tmp.path(), "testa1", Duration::from_secs(120));
        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa0");
    }

    #[test]
    fn test_lease_moves_between_pools() {
        let (tmp, manager) = setup(1);
        GridmapDir::open(tmp.path())
            .unwrap()
            .create_pool("testb", 1)
            .unwrap();
        let a = key("CN=a");

        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa0");
        assert_eq!(manager.lease("testb", &a, None).unwrap(), "testb0");
        assert_eq!(manager.leases().unwrap().len(), 1);
        assert_eq!(manager.lease("testa", &key("CN=b"), None).unwrap(), "testa0");
    }

    #[test]
    fn test_longer_pool_name_owns_its_slots() {
        let (tmp, manager) = setup(1);
        GridmapDir::open(tmp.path())
            .unwrap()
            .create_pool("testa1", 2)
            .unwrap();
        let manager = manager.with_pools(["testa", "testa1"]);
        let b = key("CN=b");

        assert_eq!(manager.lease("testa", &key("CN=a"), None).unwrap(), "testa0");
        assert!(matches!(
            manager.lease("testa", &key("CN=c"), None),
            Err(MappingError::PoolExhausted { size: 1, .. })
        ));

        assert_eq!(manager.lease("testa1", &b, None).unwrap(), "testa10");
        assert_eq!(manager.lease("testa1", &b, None).unwrap(), "testa10");
        assert_eq!(manager.leases().unwrap().len(), 2);
    }

    #[test]
    fn test_renewal_retries_storage_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GridmapDir::open(tmp.path()).unwrap();
        dir.create_pool("testa", 1).unwrap();
        let store = Arc::new(FlakyRenewals {
            inner: dir,
            failures: AtomicU32::new(0),
        });
        let manager = PoolAccountManager::new(store.clone()).with_retries(2);
        let a = key("CN=a");

        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa0");

        store.failures.store(2, Ordering::SeqCst);
        assert_eq!(manager.lease("testa", &a, None).unwrap(), "testa0");
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);

        store.failures.store(3, Ordering::SeqCst);
        assert!(matches!(
            manager.lease("testa", &a, None),
            Err(MappingError::Storage(_))
        ));
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);

        // The lease itself survives a failed renewal
        assert_eq!(manager.leases().unwrap().len(), 1);
    }

    #[test]
    fn test_reclaim_expired() {
        let (tmp, manager) = setup(3);
        let manager = manager.with_lifetime(Duration::from_secs(60));
        for s in ["CN=a", "CN=b", "CN=c"] {
            manager.lease("testa", &key(s), None).unwrap();
        }
        age_slot(tmp.path(), "testa0", Duration::from_secs(120));
        age_slot(tmp.path(), "testa2", Duration::from_secs(120));

        assert_eq!(manager.reclaim_expired().unwrap(), 2);
        assert_eq!(manager.leases().unwrap().len(), 1);
        assert_eq!(manager.reclaim_expired().unwrap(), 0);
    }

    #[test]
    fn test_lease_times_out_on_held_lock() {
        let (tmp, manager) = setup(1);
        let store = GridmapDir::open(tmp.path()).unwrap();
        let _held = store.lock(None).unwrap();

        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(matches!(
            manager.lease("testa", &key("CN=a"), Some(deadline)),
            Err(MappingError::Timeout(_))
        ));
    }
}

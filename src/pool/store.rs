//! Storage abstraction for pool account leases
//!
//! The manager only talks to a [`LeaseStore`]; how leases are made durable
//! and atomic is up to the store. [`super::GridmapDir`] is the standard
//! file-system implementation.

use super::lock::PoolLock;
use crate::error::{MappingError, Result};
use crate::identity::DistinguishedName;
use std::fmt;
use std::time::{Instant, SystemTime};

/// Identifies the subject holding a lease
///
/// Keys are derived from DNs and therefore always contain `=`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseKey(String);

impl LeaseKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if !key.contains('=') {
            return Err(MappingError::malformed(&key, "lease key must be DN-derived"));
        }
        Ok(LeaseKey(key))
    }

    /// Key for a DN, optionally qualified by group names
    ///
    /// ```
    /// use gridmap_rs::{DistinguishedName, pool::LeaseKey};
    ///
    /// let dn = DistinguishedName::parse("/DC=org/DC=example/CN=UserA").unwrap();
    /// assert_eq!(LeaseKey::for_subject(&dn, &[]).as_str(), "CN=usera,DC=example,DC=org");
    /// assert_eq!(
    ///     LeaseKey::for_subject(&dn, &["testa".into(), "testb".into()]).as_str(),
    ///     "CN=usera,DC=example,DC=org:testa:testb"
    /// );
    /// ```
    pub fn for_subject(dn: &DistinguishedName, groups: &[String]) -> Self {
        let mut key = dn.canonical().to_string();
        for group in groups {
            key.push(':');
            key.push_str(group);
        }
        LeaseKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binding state of one pool slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Leased { subject: LeaseKey, since: SystemTime },
    /// Linked by something this store does not recognize; never allocated
    /// or reclaimed
    Unavailable,
}

/// One account of a pool (`testa3` is index 3 of pool `testa`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSlot {
    pub name: String,
    pub index: u64,
    pub state: SlotState,
}

impl PoolSlot {
    pub fn is_free(&self) -> bool {
        matches!(self.state, SlotState::Free)
    }
}

/// A current lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub slot: String,
    pub subject: LeaseKey,
    pub since: SystemTime,
}

/// Index of `slot` within `pool`, if the name is `<pool><digits>`
pub fn slot_index(pool: &str, slot: &str) -> Option<u64> {
    let digits = slot.strip_prefix(pool)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Index of `slot` within `pool`, given every configured pool name
///
/// A name that also reads as a slot of a longer pool in `pools` belongs to
/// that pool: with pools `testa` and `testa1`, `testa10` is `testa1` index 0.
pub fn slot_index_among(pool: &str, slot: &str, pools: &[String]) -> Option<u64> {
    let index = slot_index(pool, slot)?;
    let claimed = pools
        .iter()
        .any(|other| other.len() > pool.len() && slot_index(other, slot).is_some());
    (!claimed).then_some(index)
}

/// Durable lease storage shared by every process using the pool
///
/// Implementations must make [`LeaseStore::bind`] atomic: two concurrent
/// binds of the same slot cannot both succeed, even from different
/// processes. Callers hold the store lock around read-modify-write
/// sequences.
pub trait LeaseStore: Send + Sync {
    /// Serialize allocation; `None` waits indefinitely
    fn lock(&self, deadline: Option<Instant>) -> Result<PoolLock>;

    /// Slots of `pool`, lowest index first
    fn slots(&self, pool: &str) -> Result<Vec<PoolSlot>>;

    /// Current lease of `subject`, if any
    fn lease_of(&self, subject: &LeaseKey) -> Result<Option<Lease>>;

    /// Bind a free slot; `Ok(false)` if the slot or subject is already taken
    fn bind(&self, slot: &str, subject: &LeaseKey) -> Result<bool>;

    /// Reset the lease timestamp of `subject` to now
    fn renew(&self, subject: &LeaseKey) -> Result<()>;

    /// Drop the lease of `subject`; `Ok(false)` if it had none
    fn release(&self, subject: &LeaseKey) -> Result<bool>;

    /// All current leases
    fn leases(&self) -> Result<Vec<Lease>>;
}

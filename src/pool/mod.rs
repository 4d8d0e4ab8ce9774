//! Persistent pool account leases

mod gridmapdir;
mod lock;
mod manager;
mod store;

pub use gridmapdir::GridmapDir;
pub use lock::PoolLock;
pub use manager::{LeasePolicy, PoolAccountManager, DEFAULT_LEASE_LIFETIME, DEFAULT_STORAGE_RETRIES};
pub use store::{slot_index, slot_index_among, Lease, LeaseKey, LeaseStore, PoolSlot, SlotState};

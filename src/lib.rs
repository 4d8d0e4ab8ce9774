//! # gridmap-rs - Grid Identity to POSIX Account Mapping
//!
//! `gridmap-rs` turns an X.509 distinguished name plus its attribute group
//! memberships (FQANs) into a local account: login, UID, primary GID and
//! secondary GIDs. Accounts come either straight from the mapping file or
//! from pools of interchangeable accounts leased persistently through a
//! shared gridmapdir.
//!
//! - **Mapping files** in the classic `"<pattern>" <indicator>` format,
//!   first match wins
//! - **Pool leases** that stay sticky across processes and restarts
//! - **Hot reload** of mapping files without blocking lookups
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridmap_rs::{AccountMapper, DistinguishedName, Fqan, MapperConfig, Result};
//!
//! # fn main() -> Result<()> {
//! let config = MapperConfig::load("/etc/gridmap/gridmap.toml")?;
//! let mapper = AccountMapper::from_config(&config)?;
//!
//! let dn = DistinguishedName::parse("/DC=org/DC=example/CN=usera")?;
//! let primary = Fqan::parse("/switch")?;
//! let account = mapper.map_to_account(&dn, Some(&primary), &[])?;
//!
//! println!("{} uid={} gid={}", account.login(), account.uid(), account.primary_gid());
//! # Ok(())
//! # }
//! ```
//!
//! ## Background Maintenance
//!
//! ```rust,no_run
//! use gridmap_rs::{AccountMapper, MapperConfig, Refresher, Result};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let config = MapperConfig::load("/etc/gridmap/gridmap.toml")?;
//! let mapper = Arc::new(AccountMapper::from_config(&config)?);
//!
//! // Reloads changed mapping files and reclaims expired leases until dropped
//! let _refresher = Refresher::start(Arc::clone(&mapper), config.refresh_interval());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod mapfile;
pub mod mapper;
pub mod matching;
pub mod pool;
pub mod refresh;
pub mod strategy;

pub use config::{IdSource, MapperConfig};
pub use error::{MappingError, ParseErrorKind, Result};
pub use identity::{DistinguishedName, Fqan};
pub use mapfile::{MappingEntry, OrderedMappingTable, ReloadableTable};
pub use mapper::{AccountMapper, Group, LeaseSubject, PosixAccount};
pub use pool::{GridmapDir, LeasePolicy, PoolAccountManager};
pub use refresh::{refresh_once, RefreshReport, Refresher};
pub use strategy::{AccountIndicator, IdResolver, KeyPrecedence};

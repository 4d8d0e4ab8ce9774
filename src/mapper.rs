//! Identity to POSIX account mapping
//!
//! [`AccountMapper`] ties the pieces together: the account map picks a pool
//! or literal account, the pool manager leases a concrete login, the group
//! map picks group names, and the id resolvers turn names into numbers.

use crate::config::{IdSource, MapperConfig};
use crate::error::{MappingError, Result};
use crate::identity::{DistinguishedName, Fqan};
use crate::mapfile::{OrderedMappingTable, ReloadableTable};
use crate::pool::{GridmapDir, LeaseKey, PoolAccountManager};
use crate::strategy::{
    AccountIndicator, AccountIndicatorStrategy, CachedIds, GroupNameStrategy, IdResolver,
    KeyPrecedence, StaticIdTable, SystemIds,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// POSIX group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Group {
    name: String,
    gid: u32,
}

impl Group {
    pub fn new(name: impl Into<String>, gid: u32) -> Self {
        Group {
            name: name.into(),
            gid,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }
}

/// Result of a successful mapping
///
/// Two accounts are equal when their UIDs are; the UID is the identity the
/// operating system acts on.
#[derive(Debug, Clone, Serialize)]
pub struct PosixAccount {
    login: String,
    uid: u32,
    primary_group: Group,
    secondary_groups: Vec<Group>,
}

impl PosixAccount {
    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn primary_group(&self) -> &Group {
        &self.primary_group
    }

    pub fn primary_gid(&self) -> u32 {
        self.primary_group.gid
    }

    /// Secondary groups in caller order, never containing the primary GID
    pub fn secondary_groups(&self) -> &[Group] {
        &self.secondary_groups
    }

    pub fn secondary_gids(&self) -> Vec<u32> {
        self.secondary_groups.iter().map(|g| g.gid).collect()
    }
}

impl PartialEq for PosixAccount {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for PosixAccount {}

impl Hash for PosixAccount {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

/// What a pool lease is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseSubject {
    /// One lease per DN, whatever groups it presents
    #[default]
    Dn,
    /// One lease per DN and group name combination
    DnAndGroups,
}

/// Pool names referenced by an account map
fn pool_names(table: &OrderedMappingTable) -> Vec<String> {
    table
        .iter()
        .flat_map(|e| e.indicators())
        .filter_map(|i| match AccountIndicator::parse(i) {
            AccountIndicator::Pool(pool) => Some(pool),
            AccountIndicator::Account(_) => None,
        })
        .collect()
}

/// Maps grid identities to POSIX accounts
pub struct AccountMapper {
    account_map: Arc<ReloadableTable>,
    group_map: Arc<ReloadableTable>,
    accounts: AccountIndicatorStrategy,
    groups: GroupNameStrategy,
    pools: PoolAccountManager,
    uids: Arc<dyn IdResolver>,
    gids: Arc<dyn IdResolver>,
    lease_subject: LeaseSubject,
}

impl AccountMapper {
    pub fn new(
        account_map: Arc<ReloadableTable>,
        group_map: Arc<ReloadableTable>,
        pools: PoolAccountManager,
        uids: Arc<dyn IdResolver>,
        gids: Arc<dyn IdResolver>,
    ) -> Self {
        pools.set_pools(pool_names(&account_map.snapshot()));
        AccountMapper {
            account_map,
            group_map,
            accounts: AccountIndicatorStrategy::default(),
            groups: GroupNameStrategy,
            pools,
            uids,
            gids,
            lease_subject: LeaseSubject::default(),
        }
    }

    /// Build a mapper from a validated configuration
    ///
    /// Loads both mapping files and opens the gridmapdir; any failure here
    /// is fatal to startup.
    pub fn from_config(config: &MapperConfig) -> Result<Self> {
        config.check()?;

        let account_map = Arc::new(ReloadableTable::open(&config.account_mapfile)?);
        let group_map = Arc::new(ReloadableTable::open(&config.group_mapfile)?);
        let store = GridmapDir::open(&config.gridmapdir)?;
        let pools = PoolAccountManager::new(Arc::new(store))
            .with_lifetime(config.lease_lifetime())
            .with_policy(config.lease_policy)
            .with_retries(config.storage_retries);

        let (uids, gids): (Arc<dyn IdResolver>, Arc<dyn IdResolver>) = match config.id_source {
            IdSource::Static => (
                Arc::new(StaticIdTable::from(config.uids.clone())),
                Arc::new(StaticIdTable::from(config.gids.clone())),
            ),
            IdSource::System => (
                Arc::new(CachedIds::new(SystemIds::users(), config.id_cache_size)),
                Arc::new(CachedIds::new(SystemIds::groups(), config.id_cache_size)),
            ),
        };

        info!(
            "Account mapper ready: {} account entries, {} group entries, pool dir {}",
            account_map.snapshot().len(),
            group_map.snapshot().len(),
            config.gridmapdir.display()
        );

        Ok(AccountMapper::new(account_map, group_map, pools, uids, gids)
            .with_precedence(config.key_precedence)
            .with_lease_subject(config.lease_subject))
    }

    pub fn with_precedence(mut self, precedence: KeyPrecedence) -> Self {
        self.accounts = AccountIndicatorStrategy::new(precedence);
        self
    }

    pub fn with_lease_subject(mut self, lease_subject: LeaseSubject) -> Self {
        self.lease_subject = lease_subject;
        self
    }

    pub fn account_map(&self) -> &Arc<ReloadableTable> {
        &self.account_map
    }

    pub fn group_map(&self) -> &Arc<ReloadableTable> {
        &self.group_map
    }

    pub fn pools(&self) -> &PoolAccountManager {
        &self.pools
    }

    /// Map an identity, waiting as long as needed for the pool lock
    ///
    /// # Errors
    ///
    /// In order of evaluation: `NoMappingFound` for the account, then
    /// `NoMappingFound` for the primary group name, then `PoolExhausted`,
    /// `Storage` or `UnknownIdentifier` for the login, then
    /// `UnknownIdentifier` for the primary GID. Secondary groups never fail
    /// the call.
    pub fn map_to_account(
        &self,
        dn: &DistinguishedName,
        primary: Option<&Fqan>,
        secondary: &[Fqan],
    ) -> Result<PosixAccount> {
        self.map_inner(dn, primary, secondary, None)
    }

    /// As [`AccountMapper::map_to_account`], failing with `Timeout` if the
    /// pool lock is not acquired within `timeout`
    pub fn map_to_account_with_timeout(
        &self,
        dn: &DistinguishedName,
        primary: Option<&Fqan>,
        secondary: &[Fqan],
        timeout: Duration,
    ) -> Result<PosixAccount> {
        self.map_inner(dn, primary, secondary, Some(Instant::now() + timeout))
    }

    /// Lease subject key the mapper uses for this identity
    pub fn lease_key(
        &self,
        dn: &DistinguishedName,
        primary: Option<&Fqan>,
        secondary: &[Fqan],
    ) -> LeaseKey {
        let groups = self.group_map.snapshot();
        let primary_name = self.groups.primary_group(&groups, dn, primary);
        let secondary_names = self.groups.group_indicators(&groups, secondary);
        self.subject_key(dn, primary_name.as_deref(), &secondary_names)
    }

    fn subject_key(
        &self,
        dn: &DistinguishedName,
        primary_name: Option<&str>,
        secondary_names: &[String],
    ) -> LeaseKey {
        match self.lease_subject {
            LeaseSubject::Dn => LeaseKey::for_subject(dn, &[]),
            LeaseSubject::DnAndGroups => {
                let names: Vec<String> = primary_name
                    .map(str::to_string)
                    .into_iter()
                    .chain(secondary_names.iter().cloned())
                    .collect();
                LeaseKey::for_subject(dn, &names)
            }
        }
    }

    fn map_inner(
        &self,
        dn: &DistinguishedName,
        primary: Option<&Fqan>,
        secondary: &[Fqan],
        deadline: Option<Instant>,
    ) -> Result<PosixAccount> {
        let account_table = self.account_map.snapshot();
        let group_table = self.group_map.snapshot();
        self.pools.set_pools(pool_names(&account_table));

        let indicators = self
            .accounts
            .account_indicators(&account_table, dn, primary)?;

        let primary_name = self.groups.primary_group(&group_table, dn, primary);
        let secondary_names = self.groups.group_indicators(&group_table, secondary);
        let subject = self.subject_key(dn, primary_name.as_deref(), &secondary_names);

        // Checked before leasing so a denied request never holds a slot
        let primary_name = primary_name.ok_or_else(|| {
            MappingError::NoMappingFound(match primary {
                Some(fqan) => format!("no primary group mapping for {} / {}", dn, fqan),
                None => format!("no primary group mapping for {}", dn),
            })
        })?;

        let login = self.resolve_login(&indicators, &subject, deadline)?;
        let uid = self.uids.resolve(&login)?;
        let primary_gid = self.gids.resolve(&primary_name)?;

        let mut seen = HashSet::from([primary_gid]);
        let secondary_groups = secondary_names
            .into_iter()
            .filter_map(|name| match self.gids.resolve(&name) {
                Ok(gid) => seen.insert(gid).then(|| Group::new(name, gid)),
                Err(e) => {
                    warn!("Dropping secondary group {}: {}", name, e);
                    None
                }
            })
            .collect();

        info!("Mapped {} to {} (uid {})", dn, login, uid);
        Ok(PosixAccount {
            login,
            uid,
            primary_group: Group::new(primary_name, primary_gid),
            secondary_groups,
        })
    }

    /// First indicator that yields a login; an exhausted pool falls through
    /// to the next indicator
    fn resolve_login(
        &self,
        indicators: &[AccountIndicator],
        subject: &LeaseKey,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let mut last_err = None;
        for indicator in indicators {
            match indicator {
                AccountIndicator::Account(login) => return Ok(login.clone()),
                AccountIndicator::Pool(pool) => match self.pools.lease(pool, subject, deadline) {
                    Ok(login) => return Ok(login),
                    Err(e @ MappingError::PoolExhausted { .. }) => {
                        debug!("{}, trying next indicator", e);
                        last_err = Some(e);
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Err(last_err.unwrap_or_else(|| {
            MappingError::NoMappingFound(format!("no usable account indicator for {}", subject))
        }))
    }
}

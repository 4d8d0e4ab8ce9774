//! Indicator mapping strategies
//!
//! The account strategy resolves the account indicator (a pool name or a
//! literal login) from the account map; the group strategy resolves POSIX
//! group names from the group map. Both scan the table in file order and
//! stop at the first matching entry.

use crate::error::{MappingError, Result};
use crate::identity::{DistinguishedName, Fqan};
use crate::mapfile::{MappingEntry, OrderedMappingTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Prefix marking a pool indicator in the account map (`.testa`)
pub const POOL_PREFIX: char = '.';

/// Which entry kind wins when both a DN and an FQAN entry match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPrecedence {
    /// Earliest matching entry, whatever its kind
    #[default]
    FileOrder,
    /// Any matching DN entry before any matching FQAN entry
    PreferDn,
    /// Any matching FQAN entry before any matching DN entry
    PreferFqan,
}

/// Resolved account indicator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountIndicator {
    /// Lease an account from the named pool
    Pool(String),
    /// Use this login name directly
    Account(String),
}

impl AccountIndicator {
    /// Interpret a mapping file indicator
    ///
    /// ```
    /// use gridmap_rs::strategy::AccountIndicator;
    ///
    /// assert_eq!(AccountIndicator::parse(".testa"), AccountIndicator::Pool("testa".into()));
    /// assert_eq!(AccountIndicator::parse("atlas001"), AccountIndicator::Account("atlas001".into()));
    /// ```
    pub fn parse(indicator: &str) -> Self {
        match indicator.strip_prefix(POOL_PREFIX) {
            Some(pool) if !pool.is_empty() => AccountIndicator::Pool(pool.to_string()),
            _ => AccountIndicator::Account(indicator.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AccountIndicator::Pool(name) | AccountIndicator::Account(name) => name,
        }
    }

    pub fn is_pool(&self) -> bool {
        matches!(self, AccountIndicator::Pool(_))
    }
}

impl fmt::Display for AccountIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountIndicator::Pool(name) => write!(f, "{}{}", POOL_PREFIX, name),
            AccountIndicator::Account(name) => f.write_str(name),
        }
    }
}

fn first_entry<'t>(
    table: &'t OrderedMappingTable,
    dn: &DistinguishedName,
    fqan: Option<&Fqan>,
    precedence: KeyPrecedence,
) -> Option<&'t MappingEntry> {
    let by_dn = |e: &MappingEntry| e.matches_dn(dn);
    let by_fqan = |e: &MappingEntry| fqan.is_some_and(|f| e.matches_fqan(f));

    match precedence {
        KeyPrecedence::FileOrder => table.first_match(|e| by_dn(e) || by_fqan(e)),
        KeyPrecedence::PreferDn => table.first_match(by_dn).or_else(|| table.first_match(by_fqan)),
        KeyPrecedence::PreferFqan => table
            .first_match(by_fqan)
            .or_else(|| table.first_match(by_dn)),
    }
}

/// Primary strategy: DN and primary FQAN to account indicator
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountIndicatorStrategy {
    precedence: KeyPrecedence,
}

impl AccountIndicatorStrategy {
    pub fn new(precedence: KeyPrecedence) -> Self {
        AccountIndicatorStrategy { precedence }
    }

    pub fn precedence(&self) -> KeyPrecedence {
        self.precedence
    }

    /// All indicators of the first matching entry, in priority order
    pub fn account_indicators(
        &self,
        table: &OrderedMappingTable,
        dn: &DistinguishedName,
        primary: Option<&Fqan>,
    ) -> Result<Vec<AccountIndicator>> {
        let entry = first_entry(table, dn, primary, self.precedence).ok_or_else(|| {
            MappingError::NoMappingFound(match primary {
                Some(fqan) => format!("no account mapping for {} / {}", dn, fqan),
                None => format!("no account mapping for {}", dn),
            })
        })?;

        debug!(
            "Account map line {} (\"{}\") matched {}",
            entry.line(),
            entry.pattern(),
            dn
        );
        Ok(entry
            .indicators()
            .iter()
            .map(|i| AccountIndicator::parse(i))
            .collect())
    }

    /// First indicator of the first matching entry
    pub fn account_indicator(
        &self,
        table: &OrderedMappingTable,
        dn: &DistinguishedName,
        primary: Option<&Fqan>,
    ) -> Result<AccountIndicator> {
        self.account_indicators(table, dn, primary)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                MappingError::NoMappingFound(format!("empty account mapping for {}", dn))
            })
    }
}

/// Secondary strategy: FQANs to POSIX group names
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupNameStrategy;

impl GroupNameStrategy {
    /// Group name for one FQAN, if any FQAN entry matches
    pub fn group_name(&self, table: &OrderedMappingTable, fqan: &Fqan) -> Option<String> {
        table
            .first_match(|e| e.matches_fqan(fqan))
            .map(|e| e.first_indicator().to_string())
    }

    /// Primary group name
    ///
    /// With a primary FQAN only FQAN entries are consulted. Without one the
    /// first DN entry matching the subject is used.
    pub fn primary_group(
        &self,
        table: &OrderedMappingTable,
        dn: &DistinguishedName,
        primary: Option<&Fqan>,
    ) -> Option<String> {
        match primary {
            Some(fqan) => self.group_name(table, fqan),
            None => table
                .first_match(|e| e.matches_dn(dn))
                .map(|e| e.first_indicator().to_string()),
        }
    }

    /// Group names for each FQAN in caller order, skipping unmapped ones
    pub fn group_indicators(&self, table: &OrderedMappingTable, fqans: &[Fqan]) -> Vec<String> {
        fqans
            .iter()
            .filter_map(|fqan| {
                let name = self.group_name(table, fqan);
                if name.is_none() {
                    debug!("No group mapping for {}, skipping", fqan);
                }
                name
            })
            .collect()
    }
}

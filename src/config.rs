//! Mapper configuration
//!
//! ```toml
//! account_mapfile = "/etc/grid-security/grid-mapfile"
//! group_mapfile = "/etc/grid-security/groupmapfile"
//! gridmapdir = "/etc/grid-security/gridmapdir"
//! refresh_interval_secs = 300
//! lease_lifetime_secs = 2592000
//! lease_policy = "renew-on-use"
//! key_precedence = "file-order"
//! lease_subject = "dn"
//! id_source = "system"
//! ```

use crate::error::{MappingError, Result};
use crate::mapper::LeaseSubject;
use crate::pool::{LeasePolicy, DEFAULT_LEASE_LIFETIME, DEFAULT_STORAGE_RETRIES};
use crate::strategy::KeyPrecedence;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Where login and group ids come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdSource {
    /// The `[uids]` and `[gids]` tables of this file
    Static,
    /// The host's passwd and group databases
    #[default]
    System,
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_lease_lifetime() -> u64 {
    DEFAULT_LEASE_LIFETIME.as_secs()
}

fn default_storage_retries() -> u32 {
    DEFAULT_STORAGE_RETRIES
}

fn default_id_cache_size() -> usize {
    1024
}

fn validate_id_tables(config: &MapperConfig) -> std::result::Result<(), ValidationError> {
    if config.id_source == IdSource::Static && config.uids.is_empty() {
        let mut err = ValidationError::new("static_ids");
        err.message = Some("id_source = \"static\" needs a non-empty [uids] table".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_id_tables"))]
pub struct MapperConfig {
    /// Account map (DN/FQAN to pool or login)
    pub account_mapfile: PathBuf,
    /// Group map (FQAN to group name)
    pub group_mapfile: PathBuf,
    /// Pool lease directory
    pub gridmapdir: PathBuf,

    /// Seconds between mapping file and lease maintenance passes
    #[serde(default = "default_refresh_interval")]
    #[validate(range(min = 1))]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_lease_lifetime")]
    #[validate(range(min = 1))]
    pub lease_lifetime_secs: u64,

    #[serde(default)]
    pub lease_policy: LeasePolicy,

    #[serde(default)]
    pub key_precedence: KeyPrecedence,

    #[serde(default)]
    pub lease_subject: LeaseSubject,

    /// Extra attempts for a failed lease renewal
    #[serde(default = "default_storage_retries")]
    #[validate(range(max = 10))]
    pub storage_retries: u32,

    #[serde(default)]
    pub id_source: IdSource,

    /// Entries kept by each system id cache
    #[serde(default = "default_id_cache_size")]
    #[validate(range(min = 1))]
    pub id_cache_size: usize,

    #[serde(default)]
    pub uids: HashMap<String, u32>,

    #[serde(default)]
    pub gids: HashMap<String, u32>,
}

impl MapperConfig {
    /// Config with default tunables for the given files
    pub fn new(
        account_mapfile: impl Into<PathBuf>,
        group_mapfile: impl Into<PathBuf>,
        gridmapdir: impl Into<PathBuf>,
    ) -> Self {
        MapperConfig {
            account_mapfile: account_mapfile.into(),
            group_mapfile: group_mapfile.into(),
            gridmapdir: gridmapdir.into(),
            refresh_interval_secs: default_refresh_interval(),
            lease_lifetime_secs: default_lease_lifetime(),
            lease_policy: LeasePolicy::default(),
            key_precedence: KeyPrecedence::default(),
            lease_subject: LeaseSubject::default(),
            storage_retries: default_storage_retries(),
            id_source: IdSource::default(),
            id_cache_size: default_id_cache_size(),
            uids: HashMap::new(),
            gids: HashMap::new(),
        }
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MapperConfig =
            toml::from_str(text).map_err(|e| MappingError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| MappingError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
            .map_err(|e| MappingError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Run field validation
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| MappingError::Config(e.to_string()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn lease_lifetime(&self) -> Duration {
        Duration::from_secs(self.lease_lifetime_secs)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| MappingError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
account_mapfile = "/etc/grid-security/grid-mapfile"
group_mapfile = "/etc/grid-security/groupmapfile"
gridmapdir = "/etc/grid-security/gridmapdir"
"#;

    #[test]
    fn test_defaults() {
        let config = MapperConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.lease_lifetime(), DEFAULT_LEASE_LIFETIME);
        assert_eq!(config.lease_policy, LeasePolicy::RenewOnUse);
        assert_eq!(config.key_precedence, KeyPrecedence::FileOrder);
        assert_eq!(config.lease_subject, LeaseSubject::Dn);
        assert_eq!(config.id_source, IdSource::System);
        assert_eq!(config.storage_retries, DEFAULT_STORAGE_RETRIES);
    }

    #[test]
    fn test_full_config() {
        let text = format!(
            "{}{}",
            MINIMAL,
            r#"
lease_lifetime_secs = 60
lease_policy = "fixed-ttl"
key_precedence = "prefer-dn"
lease_subject = "dn-and-groups"
id_source = "static"

[uids]
testa0 = 3
testa1 = 4

[gids]
testa = 3
"#
        );
        let config = MapperConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.lease_policy, LeasePolicy::FixedTtl);
        assert_eq!(config.key_precedence, KeyPrecedence::PreferDn);
        assert_eq!(config.lease_subject, LeaseSubject::DnAndGroups);
        assert_eq!(config.uids.get("testa1"), Some(&4));
        assert_eq!(config.gids.len(), 1);
    }

    #[test]
    fn test_rejects_invalid() {
        let zero = format!("{}refresh_interval_secs = 0\n", MINIMAL);
        assert!(matches!(
            MapperConfig::from_toml_str(&zero),
            Err(MappingError::Config(_))
        ));

        let empty_static = format!("{}id_source = \"static\"\n", MINIMAL);
        assert!(MapperConfig::from_toml_str(&empty_static).is_err());

        let unknown = format!("{}colour = \"blue\"\n", MINIMAL);
        assert!(MapperConfig::from_toml_str(&unknown).is_err());

        assert!(MapperConfig::from_toml_str("gridmapdir = \"/x\"").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = MapperConfig::new("a", "b", "c");
        config.id_source = IdSource::Static;
        config.uids.insert("testa0".into(), 3);
        let text = config.to_toml_string().unwrap();
        let back = MapperConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.uids, config.uids);
        assert_eq!(back.account_mapfile, PathBuf::from("a"));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridmap.toml");
        fs::write(&path, MINIMAL).unwrap();
        assert!(MapperConfig::load(&path).is_ok());
        assert!(MapperConfig::load(dir.path().join("missing.toml")).is_err());
    }
}

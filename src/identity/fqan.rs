//! Fully Qualified Attribute Names
//!
//! An FQAN is a VO group path with an optional role:
//! `/atlas/production/Role=pilot`. The legacy `/Capability=NULL` suffix
//! emitted by older attribute authorities is accepted and dropped.

use crate::error::{MappingError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

const ROLE_PREFIX: &str = "Role=";
const CAPABILITY_PREFIX: &str = "Capability=";

/// Role value meaning "no role"
pub const NULL_ROLE: &str = "NULL";

/// Characters allowed in group and role names
const COMPONENT_PATTERN: &str = r"^[A-Za-z0-9_.\-]+$";

pub(crate) fn component_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(COMPONENT_PATTERN).expect("static component pattern"))
}

/// Parsed FQAN
///
/// Two FQANs are equal when their group paths and roles are equal. A
/// `Role=NULL` FQAN is the same value as the bare group path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqan {
    groups: Vec<String>,
    role: Option<String>,
}

impl Fqan {
    /// Parse an FQAN string
    ///
    /// # Errors
    ///
    /// Returns `MalformedKey` if the string is empty, has an empty group,
    /// contains characters outside `[A-Za-z0-9_.-]`, or has a `Role=`
    /// segment that is not the last one.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridmap_rs::Fqan;
    ///
    /// let fqan = Fqan::parse("/atlas/production/Role=pilot").unwrap();
    /// assert_eq!(fqan.vo(), "atlas");
    /// assert_eq!(fqan.role(), Some("pilot"));
    /// assert_eq!(fqan.to_string(), "/atlas/production/Role=pilot");
    ///
    /// assert!(Fqan::parse("/atlas/Role=pilot/production").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let segments = split_segments(input)?;

        let mut groups = Vec::new();
        let mut role = None;
        let mut closed = false;

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();

            if let Some(value) = segment.strip_prefix(CAPABILITY_PREFIX) {
                if !last || value != NULL_ROLE {
                    return Err(MappingError::malformed(
                        input,
                        "only a trailing Capability=NULL is accepted",
                    ));
                }
                continue;
            }

            if closed {
                return Err(MappingError::malformed(
                    input,
                    "Role= must be the final path segment",
                ));
            }

            if let Some(value) = segment.strip_prefix(ROLE_PREFIX) {
                if groups.is_empty() {
                    return Err(MappingError::malformed(input, "role without group"));
                }
                validate_component(input, value)?;
                if value != NULL_ROLE {
                    role = Some(value.to_string());
                }
                closed = true;
                continue;
            }

            validate_component(input, segment)?;
            groups.push(segment.to_string());
        }

        if groups.is_empty() {
            return Err(MappingError::malformed(input, "no group path"));
        }

        Ok(Fqan { groups, role })
    }

    /// Construct from already-validated parts
    pub fn new(groups: Vec<String>, role: Option<String>) -> Result<Self> {
        let input = format!("/{}", groups.join("/"));
        if groups.is_empty() {
            return Err(MappingError::malformed(&input, "no group path"));
        }
        for g in &groups {
            validate_component(&input, g)?;
        }
        if let Some(r) = &role {
            validate_component(&input, r)?;
        }
        let role = role.filter(|r| r != NULL_ROLE);
        Ok(Fqan { groups, role })
    }

    /// Group path components, VO first
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// The VO (first group path component)
    pub fn vo(&self) -> &str {
        &self.groups[0]
    }

    /// The role, `None` for `Role=NULL` or no role
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Group path without the role (`/atlas/production`)
    pub fn group_path(&self) -> String {
        let mut path = String::new();
        for g in &self.groups {
            path.push('/');
            path.push_str(g);
        }
        path
    }
}

/// Split a slash path into segments, rejecting empty input and empty segments
pub(crate) fn split_segments(input: &str) -> Result<Vec<&str>> {
    if input.is_empty() {
        return Err(MappingError::malformed(input, "empty string"));
    }
    let rest = input
        .strip_prefix('/')
        .ok_or_else(|| MappingError::malformed(input, "must start with '/'"))?;

    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(MappingError::malformed(input, "empty group"));
    }
    Ok(segments)
}

fn validate_component(input: &str, component: &str) -> Result<()> {
    if component_regex().is_match(component) {
        Ok(())
    } else {
        Err(MappingError::malformed(
            input,
            format!("illegal characters in '{}'", component),
        ))
    }
}

impl fmt::Display for Fqan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for g in &self.groups {
            write!(f, "/{}", g)?;
        }
        if let Some(role) = &self.role {
            write!(f, "/{}{}", ROLE_PREFIX, role)?;
        }
        Ok(())
    }
}

impl FromStr for Fqan {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self> {
        Fqan::parse(s)
    }
}

impl TryFrom<String> for Fqan {
    type Error = MappingError;

    fn try_from(s: String) -> Result<Self> {
        Fqan::parse(&s)
    }
}

impl From<Fqan> for String {
    fn from(fqan: Fqan) -> String {
        fqan.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_only() {
        let fqan = Fqan::parse("/switch/group1").unwrap();
        assert_eq!(fqan.groups(), &["switch".to_string(), "group1".to_string()]);
        assert_eq!(fqan.role(), None);
        assert_eq!(fqan.to_string(), "/switch/group1");
    }

    #[test]
    fn test_null_role_is_no_role() {
        let a = Fqan::parse("/switch/Role=NULL").unwrap();
        let b = Fqan::parse("/switch").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "/switch");
    }

    #[test]
    fn test_capability_suffix() {
        let fqan = Fqan::parse("/atlas/Role=NULL/Capability=NULL").unwrap();
        assert_eq!(fqan.to_string(), "/atlas");

        let fqan = Fqan::parse("/atlas/lcg1/Role=admin/Capability=NULL").unwrap();
        assert_eq!(fqan.role(), Some("admin"));

        assert!(Fqan::parse("/atlas/Capability=write").is_err());
        assert!(Fqan::parse("/atlas/Capability=NULL/Role=admin").is_err());
    }

    #[test]
    fn test_malformed() {
        assert!(Fqan::parse("").is_err());
        assert!(Fqan::parse("/").is_err());
        assert!(Fqan::parse("switch").is_err());
        assert!(Fqan::parse("/switch//group").is_err());
        assert!(Fqan::parse("/switch/").is_err());
        assert!(Fqan::parse("/swi tch").is_err());
        assert!(Fqan::parse("/switch/gr*oup").is_err());
        assert!(Fqan::parse("/switch/Role=a/b").is_err());
        assert!(Fqan::parse("/switch/Role=").is_err());
        assert!(Fqan::parse("/Role=admin").is_err());
    }

    #[test]
    fn test_accessors() {
        let fqan = Fqan::parse("/atlas/production/Role=pilot").unwrap();
        assert_eq!(fqan.vo(), "atlas");
        assert_eq!(fqan.group_path(), "/atlas/production");
    }

    #[test]
    fn test_new_validates() {
        let fqan = Fqan::new(vec!["vo".into(), "g".into()], Some("r".into())).unwrap();
        assert_eq!(fqan.to_string(), "/vo/g/Role=r");
        assert!(Fqan::new(vec![], None).is_err());
        assert!(Fqan::new(vec!["a/b".into()], None).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let fqan = Fqan::parse("/vo/Role=r").unwrap();
        let json = serde_json::to_string(&fqan).unwrap();
        assert_eq!(json, "\"/vo/Role=r\"");
        let back: Fqan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fqan);
        assert!(serde_json::from_str::<Fqan>("\"bad\"").is_err());
    }
}

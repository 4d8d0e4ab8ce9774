//! Mapping file patterns
//!
//! FQAN patterns support wildcards in the group path:
//! - `*` - Matches any single group (e.g., `/atlas/*/Role=pilot`)
//! - `**` - As the last group, matches any number of subgroups (e.g., `/atlas/**`)
//!
//! and in the role: `Role=*` (any role), `Role=prod*` (glob), `Role=NULL`
//! (no role). A pattern without a role accepts any role.
//!
//! DN patterns are DNs in either syntax; an RDN value of exactly `*`
//! matches any value of that attribute.

use crate::error::{MappingError, Result};
use crate::identity::{component_regex, split_segments, DistinguishedName, NULL_ROLE};
use std::fmt;

/// One group component of an FQAN pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupPattern {
    Literal(String),
    /// `*`
    AnyOne,
    /// Trailing `**`
    AnyRest,
}

/// Role part of an FQAN pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RolePattern {
    /// No `Role=` segment, any role (or none) matches
    Unspecified,
    /// `Role=NULL`, only role-less FQANs match
    Null,
    /// `Role=<glob>`
    Glob(String),
}

/// Parsed FQAN pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FqanPattern {
    groups: Vec<GroupPattern>,
    role: RolePattern,
}

impl FqanPattern {
    pub fn parse(input: &str) -> Result<Self> {
        let segments = split_segments(input)?;
        let mut groups = Vec::new();
        let mut role = RolePattern::Unspecified;

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let closed = !matches!(role, RolePattern::Unspecified)
                || matches!(groups.last(), Some(GroupPattern::AnyRest));

            if let Some(value) = segment.strip_prefix("Capability=") {
                if !last || value != NULL_ROLE {
                    return Err(MappingError::malformed(
                        input,
                        "only a trailing Capability=NULL is accepted",
                    ));
                }
                continue;
            }

            if let Some(value) = segment.strip_prefix("Role=") {
                if !matches!(role, RolePattern::Unspecified) {
                    return Err(MappingError::malformed(input, "duplicate Role="));
                }
                if groups.is_empty() {
                    return Err(MappingError::malformed(input, "role without group"));
                }
                role = parse_role(input, value)?;
                continue;
            }

            if closed {
                let reason = if matches!(role, RolePattern::Unspecified) {
                    "'**' must be the last group"
                } else {
                    "Role= must be the final path segment"
                };
                return Err(MappingError::malformed(input, reason));
            }

            let group = match *segment {
                "*" => GroupPattern::AnyOne,
                "**" => GroupPattern::AnyRest,
                literal if component_regex().is_match(literal) => {
                    GroupPattern::Literal(literal.to_string())
                }
                other => {
                    return Err(MappingError::malformed(
                        input,
                        format!("illegal characters in '{}'", other),
                    ))
                }
            };
            groups.push(group);
        }

        match groups.first() {
            None => Err(MappingError::malformed(input, "no group path")),
            Some(GroupPattern::Literal(_)) => Ok(FqanPattern { groups, role }),
            Some(_) => Err(MappingError::malformed(
                input,
                "the VO component cannot be a wildcard",
            )),
        }
    }

    pub fn groups(&self) -> &[GroupPattern] {
        &self.groups
    }

    pub fn role(&self) -> &RolePattern {
        &self.role
    }
}

fn parse_role(input: &str, value: &str) -> Result<RolePattern> {
    if value == NULL_ROLE {
        return Ok(RolePattern::Null);
    }
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c == '*' || c.is_ascii_alphanumeric() || "_.-".contains(c));
    if valid {
        Ok(RolePattern::Glob(value.to_string()))
    } else {
        Err(MappingError::malformed(
            input,
            format!("illegal role pattern '{}'", value),
        ))
    }
}

impl fmt::Display for FqanPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for g in &self.groups {
            match g {
                GroupPattern::Literal(s) => write!(f, "/{}", s)?,
                GroupPattern::AnyOne => f.write_str("/*")?,
                GroupPattern::AnyRest => f.write_str("/**")?,
            }
        }
        match &self.role {
            RolePattern::Unspecified => Ok(()),
            RolePattern::Null => write!(f, "/Role={}", NULL_ROLE),
            RolePattern::Glob(g) => write!(f, "/Role={}", g),
        }
    }
}

/// DN pattern (a DN whose `*` values are wildcards)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnPattern(DistinguishedName);

impl DnPattern {
    pub fn parse(input: &str) -> Result<Self> {
        DistinguishedName::parse(input).map(DnPattern)
    }

    pub fn dn(&self) -> &DistinguishedName {
        &self.0
    }

    pub fn has_wildcard(&self) -> bool {
        self.0
            .rdns()
            .iter()
            .flat_map(|rdn| rdn.avas())
            .any(|ava| ava.value() == "*")
    }
}

impl fmt::Display for DnPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pattern of a mapping table entry, kind decided by syntax
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    Dn(DnPattern),
    Fqan(FqanPattern),
}

impl KeyPattern {
    /// Parse a pattern, choosing DN or FQAN syntax
    ///
    /// A string is a DN if it does not start with `/` and contains `=`, or if
    /// it starts with `/` and its first segment is an `attr=value` pair
    /// (other than `Role=`). Everything else starting with `/` is an FQAN.
    ///
    /// ```
    /// use gridmap_rs::matching::KeyPattern;
    ///
    /// assert!(matches!(KeyPattern::parse("/DC=org/CN=x").unwrap(), KeyPattern::Dn(_)));
    /// assert!(matches!(KeyPattern::parse("CN=x,DC=org").unwrap(), KeyPattern::Dn(_)));
    /// assert!(matches!(KeyPattern::parse("/atlas/Role=pilot").unwrap(), KeyPattern::Fqan(_)));
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        if Self::looks_like_dn(input) {
            DnPattern::parse(input).map(KeyPattern::Dn)
        } else if input.starts_with('/') {
            FqanPattern::parse(input).map(KeyPattern::Fqan)
        } else {
            Err(MappingError::malformed(
                input,
                "neither a DN nor an FQAN pattern",
            ))
        }
    }

    fn looks_like_dn(input: &str) -> bool {
        match input.strip_prefix('/') {
            Some(rest) => {
                let first = rest.split('/').next().unwrap_or("");
                first.contains('=') && !first.starts_with("Role=")
            }
            None => input.contains('='),
        }
    }

    pub fn is_dn(&self) -> bool {
        matches!(self, KeyPattern::Dn(_))
    }

    pub fn is_fqan(&self) -> bool {
        matches!(self, KeyPattern::Fqan(_))
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Dn(p) => p.fmt(f),
            KeyPattern::Fqan(p) => p.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqan_pattern_parse() {
        let p = FqanPattern::parse("/atlas/*/Role=prod*").unwrap();
        assert_eq!(
            p.groups(),
            &[
                GroupPattern::Literal("atlas".into()),
                GroupPattern::AnyOne
            ]
        );
        assert_eq!(p.role(), &RolePattern::Glob("prod*".into()));
        assert_eq!(p.to_string(), "/atlas/*/Role=prod*");
    }

    #[test]
    fn test_fqan_pattern_null_and_unspecified_role() {
        assert_eq!(
            FqanPattern::parse("/atlas/Role=NULL").unwrap().role(),
            &RolePattern::Null
        );
        assert_eq!(
            FqanPattern::parse("/atlas").unwrap().role(),
            &RolePattern::Unspecified
        );
        assert_eq!(
            FqanPattern::parse("/atlas/Role=NULL/Capability=NULL")
                .unwrap()
                .to_string(),
            "/atlas/Role=NULL"
        );
    }

    #[test]
    fn test_fqan_pattern_rest_wildcard() {
        let p = FqanPattern::parse("/atlas/**/Role=pilot").unwrap();
        assert_eq!(p.groups().last(), Some(&GroupPattern::AnyRest));
        assert!(FqanPattern::parse("/atlas/**/sub").is_err());
    }

    #[test]
    fn test_fqan_pattern_malformed() {
        assert!(FqanPattern::parse("/*").is_err());
        assert!(FqanPattern::parse("/atlas/Role=a/Role=b").is_err());
        assert!(FqanPattern::parse("/atlas/Role=a/sub").is_err());
        assert!(FqanPattern::parse("/atlas/gr?up").is_err());
        assert!(FqanPattern::parse("/atlas/Role=a b").is_err());
        assert!(FqanPattern::parse("/atlas//x").is_err());
    }

    #[test]
    fn test_key_pattern_kind() {
        assert!(KeyPattern::parse("/DC=org/DC=example/CN=usera")
            .unwrap()
            .is_dn());
        assert!(KeyPattern::parse("cn=usera,dc=example,dc=org")
            .unwrap()
            .is_dn());
        assert!(KeyPattern::parse("/switch").unwrap().is_fqan());
        assert!(KeyPattern::parse("/switch/Role=admin").unwrap().is_fqan());
        assert!(KeyPattern::parse("switch").is_err());
        assert!(KeyPattern::parse("").is_err());
    }

    #[test]
    fn test_dn_pattern_wildcard() {
        assert!(DnPattern::parse("CN=*,DC=example,DC=org")
            .unwrap()
            .has_wildcard());
        assert!(!DnPattern::parse("CN=usera,DC=example,DC=org")
            .unwrap()
            .has_wildcard());
    }
}

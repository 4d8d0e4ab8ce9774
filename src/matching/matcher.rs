//! Match strategies for mapping table patterns
//!
//! Both matchers are total: any well-formed pattern and key yield a boolean,
//! never an error or panic.

use super::pattern::{DnPattern, FqanPattern, GroupPattern, RolePattern};
use crate::identity::{Ava, DistinguishedName, Fqan, Rdn};

/// Decides whether a candidate key is matched by a pattern
pub trait KeyMatcher {
    type Pattern: ?Sized;
    type Key: ?Sized;

    fn matches(&self, pattern: &Self::Pattern, candidate: &Self::Key) -> bool;
}

/// Canonical DN comparison with single-component `*` values
#[derive(Debug, Clone, Copy, Default)]
pub struct DnMatcher;

impl DnMatcher {
    fn ava_matches(pattern: &Ava, candidate: &Ava) -> bool {
        pattern.attribute() == candidate.attribute()
            && (pattern.value() == "*" || pattern.folded() == candidate.folded())
    }

    /// Every pattern AVA pairs with a distinct candidate AVA
    fn rdn_matches(pattern: &Rdn, candidate: &Rdn) -> bool {
        if pattern.avas().len() != candidate.avas().len() {
            return false;
        }

        // Literals first: a wildcard can take any value a literal leaves over
        let (wild, literal): (Vec<&Ava>, Vec<&Ava>) =
            pattern.avas().iter().partition(|a| a.value() == "*");
        let mut used = vec![false; candidate.avas().len()];

        for pava in literal.into_iter().chain(wild) {
            let found = candidate
                .avas()
                .iter()
                .enumerate()
                .position(|(i, cava)| !used[i] && Self::ava_matches(pava, cava));
            match found {
                Some(i) => used[i] = true,
                None => return false,
            }
        }
        true
    }
}

impl KeyMatcher for DnMatcher {
    type Pattern = DnPattern;
    type Key = DistinguishedName;

    fn matches(&self, pattern: &DnPattern, candidate: &DistinguishedName) -> bool {
        let pattern = pattern.dn();

        // Fast path, also the only path for wildcard-free patterns
        if pattern == candidate {
            return true;
        }

        let (prdns, crdns) = (pattern.rdns(), candidate.rdns());
        if prdns.len() != crdns.len() {
            return false;
        }

        prdns
            .iter()
            .zip(crdns)
            .all(|(p, c)| Self::rdn_matches(p, c))
    }
}

/// Component-wise FQAN comparison with group and role wildcards
#[derive(Debug, Clone, Copy, Default)]
pub struct FqanMatcher;

impl FqanMatcher {
    fn groups_match(pattern: &[GroupPattern], groups: &[String]) -> bool {
        for (i, part) in pattern.iter().enumerate() {
            match part {
                GroupPattern::AnyRest => return true,
                GroupPattern::AnyOne => {
                    if i >= groups.len() {
                        return false;
                    }
                }
                GroupPattern::Literal(name) => {
                    if groups.get(i) != Some(name) {
                        return false;
                    }
                }
            }
        }
        pattern.len() == groups.len()
    }

    fn role_matches(pattern: &RolePattern, role: Option<&str>) -> bool {
        match (pattern, role) {
            (RolePattern::Unspecified, _) => true,
            (RolePattern::Null, role) => role.is_none(),
            (RolePattern::Glob(_), None) => false,
            (RolePattern::Glob(glob), Some(role)) => glob_match(glob, role),
        }
    }
}

impl KeyMatcher for FqanMatcher {
    type Pattern = FqanPattern;
    type Key = Fqan;

    fn matches(&self, pattern: &FqanPattern, candidate: &Fqan) -> bool {
        Self::groups_match(pattern.groups(), candidate.groups())
            && Self::role_matches(pattern.role(), candidate.role())
    }
}

/// `*` glob matching (no other metacharacters)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];

    if text.len() < first.len() + last.len() {
        return false;
    }
    if !text.starts_with(first) || !text.ends_with(last) {
        return false;
    }

    // Middle parts must appear in order between prefix and suffix
    let mut pos = first.len();
    let end = text.len() - last.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..end].find(part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    true
}

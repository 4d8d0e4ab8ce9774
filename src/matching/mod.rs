//! Pattern matching of DNs and FQANs against mapping table entries

mod matcher;
mod pattern;

pub use matcher::{glob_match, DnMatcher, FqanMatcher, KeyMatcher};
pub use pattern::{DnPattern, FqanPattern, GroupPattern, KeyPattern, RolePattern};

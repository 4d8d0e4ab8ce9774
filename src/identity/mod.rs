//! Identity keys: distinguished names and FQANs

mod dn;
mod fqan;

pub use dn::{Ava, DistinguishedName, Rdn};
pub use fqan::{Fqan, NULL_ROLE};

pub(crate) use fqan::{component_regex, split_segments};

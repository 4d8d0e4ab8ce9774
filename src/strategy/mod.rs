//! Pluggable resolution strategies

mod id;
mod indicator;

pub use id::{CachedIds, IdDatabase, IdResolver, StaticIdTable, SystemIds};
pub use indicator::{
    AccountIndicator, AccountIndicatorStrategy, GroupNameStrategy, KeyPrecedence, POOL_PREFIX,
};

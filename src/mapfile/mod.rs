//! Mapping files (grid-mapfile and group map) and their in-memory tables

mod escape;
mod parser;
mod reload;
mod table;

pub use escape::read_quoted;
pub use parser::parse_line;
pub use reload::ReloadableTable;
pub use table::{MappingEntry, OrderedMappingTable};

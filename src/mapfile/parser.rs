//! Line parser for account and group mapping files
//!
//! ```text
//! # comment
//! "/DC=org/DC=example/CN=usera"  .testa
//! "/switch/Role=admin"           .admins, special
//! ```

use super::escape::read_quoted;
use super::table::MappingEntry;
use crate::error::ParseErrorKind;
use crate::matching::KeyPattern;

/// Parse one line; `Ok(None)` for blank and comment lines
pub fn parse_line(line: &str, number: usize) -> Result<Option<MappingEntry>, ParseErrorKind> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let (pattern, rest) = read_quoted(trimmed)?;
    let pattern =
        KeyPattern::parse(&pattern).map_err(|e| ParseErrorKind::InvalidPattern(e.to_string()))?;

    let rest = rest.trim();
    if rest.is_empty() {
        return Err(ParseErrorKind::MissingIndicators);
    }
    let mut indicators = Vec::new();
    for chunk in rest.split(',') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            return Err(ParseErrorKind::EmptyIndicator);
        }
        indicators.extend(chunk.split_whitespace().map(str::to_string));
    }

    MappingEntry::new(pattern, indicators, number).map(Some)
}

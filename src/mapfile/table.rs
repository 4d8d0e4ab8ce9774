//! Ordered mapping table
//!
//! Entries keep file order because lookups are first-match-wins.

use super::parser::parse_line;
use crate::error::{MappingError, ParseErrorKind, Result};
use crate::identity::{DistinguishedName, Fqan};
use crate::matching::{DnMatcher, FqanMatcher, KeyMatcher, KeyPattern};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One mapping line: a pattern and its ordered indicators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pattern: KeyPattern,
    indicators: Vec<String>,
    line: usize,
}

impl MappingEntry {
    /// Fails with `MissingIndicators` if `indicators` is empty
    pub fn new(
        pattern: KeyPattern,
        indicators: Vec<String>,
        line: usize,
    ) -> std::result::Result<Self, ParseErrorKind> {
        if indicators.is_empty() {
            return Err(ParseErrorKind::MissingIndicators);
        }
        Ok(MappingEntry {
            pattern,
            indicators,
            line,
        })
    }

    pub fn pattern(&self) -> &KeyPattern {
        &self.pattern
    }

    /// Indicators in priority order
    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }

    /// First (highest priority) indicator; every entry has at least one
    pub fn first_indicator(&self) -> &str {
        &self.indicators[0]
    }

    /// Source line number (1-based), 0 for programmatic entries
    pub fn line(&self) -> usize {
        self.line
    }

    /// Match against a DN; FQAN entries never match
    pub fn matches_dn(&self, dn: &DistinguishedName) -> bool {
        match &self.pattern {
            KeyPattern::Dn(p) => DnMatcher.matches(p, dn),
            KeyPattern::Fqan(_) => false,
        }
    }

    /// Match against an FQAN; DN entries never match
    pub fn matches_fqan(&self, fqan: &Fqan) -> bool {
        match &self.pattern {
            KeyPattern::Fqan(p) => FqanMatcher.matches(p, fqan),
            KeyPattern::Dn(_) => false,
        }
    }
}

/// Immutable, ordered sequence of mapping entries
#[derive(Debug, Clone, Default)]
pub struct OrderedMappingTable {
    entries: Vec<MappingEntry>,
    source: Option<PathBuf>,
}

impl OrderedMappingTable {
    pub fn from_entries(entries: Vec<MappingEntry>) -> Self {
        OrderedMappingTable {
            entries,
            source: None,
        }
    }

    /// Load a mapping file
    ///
    /// # Errors
    ///
    /// Any malformed line fails the whole load with `MappingFileParse`. A
    /// file without entries fails with `ParseErrorKind::NoEntries`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            MappingError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let mut table = Self::parse_str(&text, path)?;
        table.source = Some(path.to_path_buf());
        info!(
            "Loaded {} mapping entries from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse mapping file text; `origin` is used for error messages only
    pub fn parse_str(text: &str, origin: &Path) -> Result<Self> {
        let mut entries: Vec<MappingEntry> = Vec::new();
        let mut seen: HashMap<KeyPattern, usize> = HashMap::new();

        for (idx, line) in text.lines().enumerate() {
            let number = idx + 1;
            let entry = parse_line(line, number).map_err(|kind| MappingError::MappingFileParse {
                path: origin.to_path_buf(),
                line: number,
                kind,
            })?;

            let Some(entry) = entry else {
                continue;
            };

            if let Some(first) = seen.get(entry.pattern()) {
                warn!(
                    "{}:{}: duplicate pattern \"{}\" (first defined on line {}, which wins)",
                    origin.display(),
                    number,
                    entry.pattern(),
                    first
                );
            } else {
                seen.insert(entry.pattern().clone(), number);
            }
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(MappingError::MappingFileParse {
                path: origin.to_path_buf(),
                line: 0,
                kind: ParseErrorKind::NoEntries,
            });
        }

        debug!("Parsed {} entries from {}", entries.len(), origin.display());
        Ok(OrderedMappingTable {
            entries,
            source: None,
        })
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MappingEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File this table was loaded from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// First entry accepted by `predicate`, in file order
    pub fn first_match<F>(&self, predicate: F) -> Option<&MappingEntry>
    where
        F: Fn(&MappingEntry) -> bool,
    {
        self.entries.iter().find(|e| predicate(*e))
    }
}

impl<'a> IntoIterator for &'a OrderedMappingTable {
    type Item = &'a MappingEntry;
    type IntoIter = std::slice::Iter<'a, MappingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

//! Error types for account mapping operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Mapping operation result type
pub type Result<T> = std::result::Result<T, MappingError>;

/// Reason a single mapping file line was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unsupported escape sequence '\\{0}'")]
    UnsupportedEscape(String),

    #[error("invalid escape value '{0}'")]
    InvalidEscapeValue(String),

    #[error("pattern must be enclosed in double quotes")]
    UnquotedPattern,

    #[error("unterminated quoted pattern")]
    UnterminatedQuote,

    #[error("no indicators after pattern")]
    MissingIndicators,

    #[error("empty indicator in list")]
    EmptyIndicator,

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("file contains no mapping entries")]
    NoEntries,
}

/// Account mapping errors
///
/// Every failure mode of [`crate::AccountMapper::map_to_account`] surfaces as
/// one of these variants; there is no fallback account.
#[derive(Error, Debug)]
pub enum MappingError {
    /// DN or FQAN string could not be parsed
    #[error("Malformed key '{input}': {reason}")]
    MalformedKey { input: String, reason: String },

    /// A mapping file line was rejected, which fails the whole load
    #[error("Mapping file {}:{line}: {kind}", path.display())]
    MappingFileParse {
        path: PathBuf,
        line: usize,
        kind: ParseErrorKind,
    },

    /// No table entry matched the identity for a mandatory resolution
    #[error("No mapping found: {0}")]
    NoMappingFound(String),

    /// Every slot of the pool is leased to another subject
    #[error("Pool '{pool}' exhausted: all {size} accounts leased")]
    PoolExhausted { pool: String, size: usize },

    /// Indicator has no numeric id
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// Pool directory I/O or lock failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Caller deadline passed while waiting on the pool lock
    #[error("Timed out after {0:?} waiting for pool lock")]
    Timeout(Duration),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MappingError {
    pub(crate) fn malformed(input: &str, reason: impl Into<String>) -> Self {
        MappingError::MalformedKey {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(context: &str, err: std::io::Error) -> Self {
        MappingError::Storage(format!("{}: {}", context, err))
    }
}

//! Error types for epoch and scope validation

use thiserror::Error;

/// Errors that can occur while validating an epoch identifier
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EpochParseError {
    /// Empty or whitespace-only input
    #[error("epoch cannot be empty")]
    Empty,

    /// The zero sentinel used by callers for "unset"
    #[error("epoch '{input}' is the unset sentinel")]
    Sentinel { input: String },

    /// Input contains characters that cannot appear in a scope label
    #[error("epoch '{input}' contains the record delimiter or whitespace")]
    InvalidCharacters { input: String },
}

//! Errors raised while building or evaluating a string policy.

use thiserror::Error;

/// Errors produced by generators, rules, and the policy parser.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Requested length is below the minimum
    #[error("length must be >= {min}, got {length}")]
    LengthTooShort {
        /// Requested length
        length: usize,
        /// Minimum accepted length
        min: usize,
    },

    /// Rule minimums cannot fit in the requested length
    #[error("specified rules require at least {required} characters but length is {length}")]
    RulesExceedLength {
        /// Sum of every rule's minimum
        required: usize,
        /// Requested length
        length: usize,
    },

    /// No rule contributed any character
    #[error("no charset specified")]
    EmptyCharset,

    /// The aggregate charset contains a non-printable rune
    #[error("charset contains non-printable character {0:?}")]
    NonPrintable(char),

    /// The aggregate charset is too large for byte-based sampling
    #[error("charset must contain at most 256 characters, got {0}")]
    CharsetTooLarge(usize),

    /// A rule block names a kind the registry does not know
    #[error("unrecognized rule type {0:?}")]
    UnknownRule(String),

    /// A rule's configuration is malformed
    #[error("invalid {kind} rule: {reason}")]
    InvalidRule {
        /// Rule kind
        kind: String,
        /// What was wrong
        reason: String,
    },

    /// The policy text could not be parsed
    #[error("unable to parse policy: {0}")]
    Parse(String),

    /// Generation could not satisfy every rule before the deadline
    #[error("unable to generate string within {0:?}")]
    Timeout(std::time::Duration),

    /// A base62 string contains a character outside the alphabet
    #[error("invalid base62 character {0:?}")]
    InvalidBase62(char),

    /// JSON encoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The system random source failed
    #[error("random source failure: {0}")]
    Random(#[from] rand::Error),
}

impl PolicyError {
    /// Create an invalid rule error.
    #[must_use]
    pub fn invalid_rule(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Whether trying the same generation again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Random(_))
    }
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PolicyError::LengthTooShort { length: 4, min: 10 };
        assert_eq!(err.to_string(), "length must be >= 10, got 4");

        let err = PolicyError::UnknownRule("lowercase".to_string());
        assert_eq!(err.to_string(), "unrecognized rule type \"lowercase\"");
    }

    #[test]
    fn test_retryable() {
        assert!(PolicyError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(!PolicyError::EmptyCharset.is_retryable());
    }
}

//! Credit engine error model.

use thiserror::Error;

/// Result type used across the engine.
pub type CreditResult<T> = Result<T, CreditError>;

/// Engine-level error.
///
/// The first group are deterministic business failures that callers are
/// expected to handle; `Conflict` and `Storage` are infrastructure failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CreditError {
    /// Balance too low to cover a deduction or refund.
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// Unknown operation/plan/pack, or a validation predicate rejected the params.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Malformed pack definition or pack reference.
    #[error("invalid pack: {0}")]
    InvalidPack(String),

    /// Malformed input (non-positive amount, past expiration, bad period, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or concurrency constraint was violated at commit.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The persistence layer failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CreditError {
    pub fn insufficient(required: i64, available: i64) -> Self {
        Self::InsufficientCredits {
            required,
            available,
        }
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn invalid_pack(msg: impl Into<String>) -> Self {
        Self::InvalidPack(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// True for business failures; false for infrastructure failures.
    pub fn is_domain(&self) -> bool {
        !matches!(self, Self::Conflict(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_conflict_are_not_domain_errors() {
        assert!(CreditError::insufficient(10, 5).is_domain());
        assert!(CreditError::invalid_operation("x").is_domain());
        assert!(!CreditError::conflict("dup").is_domain());
        assert!(!CreditError::storage("poisoned").is_domain());
    }

    #[test]
    fn insufficient_message_names_both_amounts() {
        let msg = CreditError::insufficient(120, 30).to_string();
        assert!(msg.contains("120"));
        assert!(msg.contains("30"));
    }
}

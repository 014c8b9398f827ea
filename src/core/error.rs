use thiserror::Error;

/// Errors that reject a run before the first simulated year.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} {reason}")]
    InvalidParameter {
        field: &'static str,
        reason: &'static str,
    },
    #[error("return sequence has {actual} entries but {expected} years are simulated")]
    InsufficientReturns { expected: usize, actual: usize },
    #[error("a CSV return source cannot be combined with --mu/--sigma")]
    ConflictingReturnSources,
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidParameter { field, reason }
    }
}

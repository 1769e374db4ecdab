use thiserror::Error;

/// Errors returned while creating a token authority or issuing tokens.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("system random source failed: {0}")]
    Entropy(String),
    #[error("invalid secret key: {0}")]
    InvalidSecret(String),
}

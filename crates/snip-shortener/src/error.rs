use snip_core::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("short key not found: {0}")]
    NotFound(String),
    #[error("short key has been deleted: {0}")]
    Gone(String),
    #[error("token error: {0}")]
    Token(#[from] snip_auth::TokenError),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

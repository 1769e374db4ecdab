//! URL shortener service.
//!
//! [`ShortenerService`] ties a [`snip_core::Storage`] backend to the key
//! codec and the token authority. Transport adapters call into it with plain
//! strings and get plain values back.

pub mod error;
pub mod service;

pub use error::{Result, ShortenerError};
pub use service::{ServiceConfig, Shortened, ShortenerService, TokenGrant};

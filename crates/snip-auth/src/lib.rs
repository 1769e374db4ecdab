//! Opaque, stateless user tokens.
//!
//! A token is `hex(user_id || HMAC-SHA256(secret, user_id))` where `user_id`
//! is four random bytes. Tokens never expire and cannot be revoked: they are
//! permanent anonymous identities, valid for as long as the secret is kept.

mod authority;
pub mod error;

pub use authority::{TokenAuthority, SECRET_KEY_LEN, TOKEN_HEX_LEN, USER_ID_LEN};
pub use error::TokenError;

use crate::error::TokenError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random user id embedded in every token.
pub const USER_ID_LEN: usize = 4;

/// Length of a generated secret key.
pub const SECRET_KEY_LEN: usize = 32;

const MAC_LEN: usize = 32;

/// Length of a hex-encoded token.
pub const TOKEN_HEX_LEN: usize = (USER_ID_LEN + MAC_LEN) * 2;

/// Issues and verifies user tokens signed with a secret held in memory.
///
/// Replacing the secret invalidates every token issued under the old one.
#[derive(Clone)]
pub struct TokenAuthority {
    secret: Vec<u8>,
}

impl TokenAuthority {
    /// Creates an authority from raw secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Creates an authority with a fresh [`SECRET_KEY_LEN`]-byte secret.
    pub fn generate() -> Result<Self, TokenError> {
        Ok(Self::new(random_bytes::<SECRET_KEY_LEN>()?))
    }

    /// Creates an authority from a hex-encoded secret.
    pub fn from_hex(secret: &str) -> Result<Self, TokenError> {
        let bytes = hex::decode(secret.trim()).map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
        if bytes.is_empty() {
            return Err(TokenError::InvalidSecret("secret key is empty".to_string()));
        }
        Ok(Self::new(bytes))
    }

    /// Returns the secret as hex, suitable for persisting in configuration.
    pub fn secret_hex(&self) -> String {
        hex::encode(&self.secret)
    }

    /// Issues a token for a new random user id.
    ///
    /// Fails only when the system random source does.
    pub fn issue(&self) -> Result<String, TokenError> {
        let user_id = random_bytes::<USER_ID_LEN>()?;
        let mac = self.mac(&user_id)?.finalize().into_bytes();

        let mut token = Vec::with_capacity(USER_ID_LEN + MAC_LEN);
        token.extend_from_slice(&user_id);
        token.extend_from_slice(&mac);
        Ok(hex::encode(token))
    }

    /// Returns `true` if `token` was issued under this authority's secret.
    ///
    /// Malformed input of any kind yields `false`.
    pub fn verify(&self, token: &str) -> bool {
        self.user_id(token).is_some()
    }

    /// Returns the user id embedded in a valid token.
    pub fn user_id(&self, token: &str) -> Option<[u8; USER_ID_LEN]> {
        let decoded = hex::decode(token).ok()?;
        if decoded.len() <= USER_ID_LEN {
            return None;
        }
        let (user_id, claimed) = decoded.split_at(USER_ID_LEN);

        // verify_slice compares in constant time and rejects wrong lengths.
        self.mac(user_id).ok()?.verify_slice(claimed).ok()?;
        user_id.try_into().ok()
    }

    fn mac(&self, user_id: &[u8]) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
        mac.update(user_id);
        Ok(mac)
    }
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N], TokenError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).map_err(|e| TokenError::Entropy(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(b"0123456789abcdef0123456789abcdef".to_vec())
    }

    #[test]
    fn issued_token_verifies() {
        let authority = authority();
        let token = authority.issue().unwrap();

        assert_eq!(token.len(), TOKEN_HEX_LEN);
        assert!(authority.verify(&token));
    }

    #[test]
    fn tokens_are_distinct() {
        let authority = authority();
        let first = authority.issue().unwrap();
        let second = authority.issue().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn known_vector_verifies() {
        // user id 00000001 signed with the secret "key".
        let authority = TokenAuthority::new(b"key".to_vec());
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(&[0, 0, 0, 1]);
        let token = format!("00000001{}", hex::encode(mac.finalize().into_bytes()));

        assert!(authority.verify(&token));
        assert_eq!(authority.user_id(&token), Some([0, 0, 0, 1]));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let authority = authority();
        let token = authority.issue().unwrap();

        let mut bytes = hex::decode(&token).unwrap();
        bytes[0] ^= 0xff;
        assert!(!authority.verify(&hex::encode(&bytes)));

        let mut bytes = hex::decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(!authority.verify(&hex::encode(&bytes)));
    }

    #[test]
    fn other_secret_rejects_token() {
        let token = authority().issue().unwrap();
        let other = TokenAuthority::new(b"another secret".to_vec());
        assert!(!other.verify(&token));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let authority = authority();
        let token = authority.issue().unwrap();

        assert!(!authority.verify(""));
        assert!(!authority.verify("not hex at all"));
        assert!(!authority.verify("0011"));
        assert!(!authority.verify("00112233"));
        assert!(!authority.verify(&token[..token.len() - 2]));
        assert!(!authority.verify(&format!("{token}00")));
    }

    #[test]
    fn generated_secret_round_trips_through_hex() {
        let authority = TokenAuthority::generate().unwrap();
        let token = authority.issue().unwrap();

        let restored = TokenAuthority::from_hex(&authority.secret_hex()).unwrap();
        assert!(restored.verify(&token));
        assert_eq!(authority.secret_hex().len(), SECRET_KEY_LEN * 2);
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(matches!(
            TokenAuthority::from_hex("zz"),
            Err(TokenError::InvalidSecret(_))
        ));
        assert!(matches!(
            TokenAuthority::from_hex(""),
            Err(TokenError::InvalidSecret(_))
        ));
    }

    #[test]
    fn debug_hides_secret() {
        let rendered = format!("{:?}", authority());
        assert!(!rendered.contains("0123456789"));
    }
}

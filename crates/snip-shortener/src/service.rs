use crate::error::{Result, ShortenerError};
use snip_auth::TokenAuthority;
use snip_core::pipeline::{fan_out, DeleteRequest, DEFAULT_WORKERS};
use snip_core::{BatchEntry, Storage, StorageError, StorageStats};
use snip_generator::{Generator, KeyCodec, DEFAULT_COUNTER_FLOOR, DEFAULT_SUFFIX_LEN};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

/// How many fresh keys `shorten` tries before giving up on key collisions.
const MAX_KEY_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ServiceConfig {
    /// Hex-encoded signing secret. A fresh one is generated when absent or invalid.
    #[builder(default, setter(into, strip_option))]
    pub secret_key: Option<String>,
    #[builder(default = DEFAULT_SUFFIX_LEN)]
    pub suffix_len: usize,
    /// Channels used to fan out batch deletions.
    #[builder(default = DEFAULT_WORKERS)]
    pub delete_workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Outcome of [`ShortenerService::shorten`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    /// A new key was created for the URL.
    Created(String),
    /// The URL was already shortened; this is the key it got back then.
    Existing(String),
}

impl Shortened {
    pub fn key(&self) -> &str {
        match self {
            Shortened::Created(key) | Shortened::Existing(key) => key,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Shortened::Existing(_))
    }

    pub fn into_key(self) -> String {
        match self {
            Shortened::Created(key) | Shortened::Existing(key) => key,
        }
    }
}

/// A token handed back to the caller, and whether it was freshly issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub issued: bool,
}

/// The URL shortener use cases.
///
/// Holds no state of its own beyond the key counter and the signing secret,
/// so every method can be called concurrently from any number of tasks.
#[derive(Debug)]
pub struct ShortenerService<S> {
    storage: Arc<S>,
    codec: KeyCodec,
    authority: TokenAuthority,
    delete_workers: usize,
}

impl<S: Storage> ShortenerService<S> {
    /// Creates the service on top of `storage`.
    ///
    /// The key counter continues from the record count the backend reports.
    /// Fails only if a signing secret has to be generated and the system
    /// random source is unusable.
    pub async fn new(storage: S, config: ServiceConfig) -> Result<Self> {
        let authority = authority_from(config.secret_key.as_deref())?;

        let last_id = storage.last_id().await;
        if last_id.is_none() {
            warn!(
                floor = DEFAULT_COUNTER_FLOOR,
                "backend did not report a record count, starting key counter at floor"
            );
        }
        let codec = KeyCodec::seeded(last_id).with_suffix_len(config.suffix_len);
        info!(counter = codec.current(), "shortener service ready");

        Ok(Self {
            storage: Arc::new(storage),
            codec,
            authority,
            delete_workers: config.delete_workers,
        })
    }

    /// Shortens `full_url` on behalf of `owner`.
    ///
    /// A URL that is already stored is not an error: its existing key comes
    /// back as [`Shortened::Existing`].
    pub async fn shorten(&self, full_url: &str, owner: &str) -> Result<Shortened> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let key = self.codec.generate();

            match self.storage.set_new_url(&key, full_url, owner, true).await {
                Ok(()) => {
                    debug!(key = %key, "shortened url");
                    return Ok(Shortened::Created(key));
                }
                Err(StorageError::Duplicate { existing_key, .. }) => {
                    debug!(key = %existing_key, "url already shortened");
                    return Ok(Shortened::Existing(existing_key));
                }
                Err(StorageError::Conflict(taken)) if attempt < MAX_KEY_ATTEMPTS => {
                    warn!(key = %taken, attempt, "generated key already taken, retrying");
                }
                Err(err) => return Err(storage_to_shortener_error(err)),
            }
        }
    }

    /// Stores caller-keyed entries and returns the keys that were accepted.
    ///
    /// Entries whose key or URL already exist are skipped, not reported.
    pub async fn shorten_batch(&self, batch: &[BatchEntry], owner: &str) -> Result<Vec<String>> {
        let accepted = self
            .storage
            .set_batch_urls(batch, owner)
            .await
            .map_err(storage_to_shortener_error)?;
        debug!(requested = batch.len(), accepted = accepted.len(), "stored url batch");
        Ok(accepted)
    }

    /// Returns the URL behind `key`.
    pub async fn resolve(&self, key: &str) -> Result<String> {
        self.storage
            .get_url(key)
            .await
            .map_err(storage_to_shortener_error)
    }

    /// Returns every live `key -> url` pair created by `owner`.
    pub async fn list_owned(&self, owner: &str) -> Result<HashMap<String, String>> {
        self.storage
            .get_all_urls(owner)
            .await
            .map_err(storage_to_shortener_error)
    }

    /// Soft-deletes `keys` on behalf of `owner` in the background.
    ///
    /// Keys `owner` did not create are left alone. The returned handle
    /// completes once the backend has processed every request; callers that
    /// do not care may drop it.
    pub fn delete_owned(&self, keys: Vec<String>, owner: &str) -> JoinHandle<()> {
        let requests: Vec<DeleteRequest> = keys
            .into_iter()
            .map(|key| DeleteRequest::new(key, owner))
            .collect();
        let count = requests.len();
        let inputs = fan_out(requests, self.delete_workers);
        let storage = Arc::clone(&self.storage);

        tokio::spawn(async move {
            match storage.delete_batch(inputs).await {
                Ok(()) => debug!(count, "delete batch finished"),
                Err(err) => error!(count, error = %err, "delete batch failed"),
            }
        })
    }

    /// Returns `existing` if it is a valid token, otherwise a fresh one.
    pub fn issue_or_validate_token(&self, existing: Option<&str>) -> Result<TokenGrant> {
        if let Some(token) = existing.filter(|token| self.authority.verify(token)) {
            return Ok(TokenGrant {
                token: token.to_string(),
                issued: false,
            });
        }

        let token = self.authority.issue()?;
        debug!("issued new token");
        Ok(TokenGrant {
            token,
            issued: true,
        })
    }

    pub fn verify_token(&self, token: &str) -> bool {
        self.authority.verify(token)
    }

    pub async fn ping(&self) -> Result<()> {
        self.storage.ping().await.map_err(storage_to_shortener_error)
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        self.storage.stats().await.map_err(storage_to_shortener_error)
    }
}

fn authority_from(secret_key: Option<&str>) -> Result<TokenAuthority> {
    match secret_key {
        Some(secret) => match TokenAuthority::from_hex(secret) {
            Ok(authority) => return Ok(authority),
            Err(err) => warn!(error = %err, "configured secret key is unusable, generating a new one"),
        },
        None => info!("no secret key configured, generating a new one"),
    }
    Ok(TokenAuthority::generate()?)
}

/// Converts a StorageError to a ShortenerError.
fn storage_to_shortener_error(e: StorageError) -> ShortenerError {
    match e {
        StorageError::NotFound(key) => ShortenerError::NotFound(key),
        StorageError::Gone(key) => ShortenerError::Gone(key),
        other => ShortenerError::Storage(other),
    }
}

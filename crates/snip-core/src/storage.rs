use crate::error::Result;
use crate::pipeline::DeleteReceiver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Marker inserted between the short key and the original URL when a record
/// is soft-deleted: `"<key>_deleted=<original>"`.
pub const DELETED_MARKER: &str = "_deleted=";

/// Builds the audit value stored in place of a deleted record's URL.
pub fn deleted_url(key: &str, full_url: &str) -> String {
    format!("{key}{DELETED_MARKER}{full_url}")
}

/// A stored URL mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// The short key. Unique and immutable once set.
    pub short_key: String,
    /// The original URL, or the deletion marker once the record is gone.
    pub full_url: String,
    /// Token of the user that created the record.
    pub owner: String,
    /// `false` once the record has been soft-deleted.
    pub available: bool,
}

/// One entry of a batch shorten request.
///
/// The correlation id supplied by the caller becomes the short key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub correlation_id: String,
    pub original_url: String,
}

impl BatchEntry {
    pub fn new(correlation_id: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            original_url: original_url.into(),
        }
    }
}

/// Aggregate counters reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Number of stored records, deleted ones included.
    pub urls: u64,
    /// Number of distinct owners.
    pub users: u64,
}

/// The storage contract shared by every backend.
///
/// Records are never physically removed: deletion flips availability and
/// rewrites the stored URL to the [`deleted_url`] marker.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Stores `full_url` under `key` for `owner`.
    ///
    /// Returns `Err(Duplicate)` carrying the existing key if the URL is already
    /// mapped, and `Err(Conflict)` if `key` is taken.
    async fn set_new_url(&self, key: &str, full_url: &str, owner: &str, available: bool)
        -> Result<()>;

    /// Writes `record` as-is, replacing whatever `key` held before.
    ///
    /// Used to rebuild state from a journal, where a later record for the
    /// same key supersedes an earlier one. Backends without an upsert fall
    /// back to [`set_new_url`](Storage::set_new_url).
    async fn restore(&self, record: &UrlRecord) -> Result<()> {
        self.set_new_url(
            &record.short_key,
            &record.full_url,
            &record.owner,
            record.available,
        )
        .await
    }

    /// Returns the URL stored under `key`.
    ///
    /// Unknown keys yield `Err(NotFound)`, deleted ones `Err(Gone)`.
    async fn get_url(&self, key: &str) -> Result<String>;

    /// Returns every available `key -> url` mapping created by `owner`.
    /// An unknown owner yields an empty map.
    async fn get_all_urls(&self, owner: &str) -> Result<HashMap<String, String>>;

    /// Stores a batch of entries for `owner` and returns the keys that were
    /// accepted, in batch order. Entries whose key or URL is already present
    /// are skipped. Only the first entry for each correlation id is
    /// considered; later entries repeating it are skipped even if the first
    /// one was rejected.
    async fn set_batch_urls(&self, batch: &[BatchEntry], owner: &str) -> Result<Vec<String>>;

    /// Drains every input channel and soft-deletes each requested key whose
    /// recorded owner matches the request.
    async fn delete_batch(&self, inputs: Vec<DeleteReceiver>) -> Result<()>;

    /// Number of records currently stored, used to seed key generation.
    async fn last_id(&self) -> Option<u64>;

    /// Checks that the underlying medium is reachable.
    async fn ping(&self) -> Result<()>;

    /// Returns record and owner counts.
    async fn stats(&self) -> Result<StorageStats>;
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for Arc<T> {
    async fn set_new_url(
        &self,
        key: &str,
        full_url: &str,
        owner: &str,
        available: bool,
    ) -> Result<()> {
        (**self).set_new_url(key, full_url, owner, available).await
    }

    async fn restore(&self, record: &UrlRecord) -> Result<()> {
        (**self).restore(record).await
    }

    async fn get_url(&self, key: &str) -> Result<String> {
        (**self).get_url(key).await
    }

    async fn get_all_urls(&self, owner: &str) -> Result<HashMap<String, String>> {
        (**self).get_all_urls(owner).await
    }

    async fn set_batch_urls(&self, batch: &[BatchEntry], owner: &str) -> Result<Vec<String>> {
        (**self).set_batch_urls(batch, owner).await
    }

    async fn delete_batch(&self, inputs: Vec<DeleteReceiver>) -> Result<()> {
        (**self).delete_batch(inputs).await
    }

    async fn last_id(&self) -> Option<u64> {
        (**self).last_id().await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn stats(&self) -> Result<StorageStats> {
        (**self).stats().await
    }
}

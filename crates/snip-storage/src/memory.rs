use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::pipeline::{fan_in, DeleteReceiver};
use snip_core::storage::deleted_url;
use snip_core::{BatchEntry, Result, Storage, StorageError, StorageStats, UrlRecord};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Tables {
    key_to_url: HashMap<String, String>,
    owner_to_keys: HashMap<String, Vec<String>>,
    key_available: HashMap<String, bool>,
    /// Reverse index over every stored URL, deletion markers included.
    url_to_key: HashMap<String, String>,
}

impl Tables {
    fn insert(&mut self, key: &str, full_url: &str, owner: &str, available: bool) -> Result<()> {
        if let Some(existing_key) = self.url_to_key.get(full_url) {
            return Err(StorageError::Duplicate {
                existing_key: existing_key.clone(),
                url: full_url.to_string(),
            });
        }
        if self.key_to_url.contains_key(key) {
            return Err(StorageError::Conflict(key.to_string()));
        }
        self.upsert(key, full_url, owner, available);
        Ok(())
    }

    /// Writes the record unconditionally, replacing what `key` held before.
    fn upsert(&mut self, key: &str, full_url: &str, owner: &str, available: bool) {
        if let Some(previous) = self.key_to_url.insert(key.to_string(), full_url.to_string()) {
            if self.url_to_key.get(&previous).is_some_and(|k| k == key) {
                self.url_to_key.remove(&previous);
            }
        }
        self.url_to_key.insert(full_url.to_string(), key.to_string());
        self.key_available.insert(key.to_string(), available);

        let keys = self.owner_to_keys.entry(owner.to_string()).or_default();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    fn is_owner(&self, key: &str, owner: &str) -> bool {
        self.owner_to_keys
            .get(owner)
            .is_some_and(|keys| keys.iter().any(|k| k == key))
    }

    fn is_available(&self, key: &str) -> bool {
        self.key_available.get(key).copied().unwrap_or(false)
    }

    /// Soft-deletes `key` if `owner` created it and it is still available.
    fn soft_delete(&mut self, key: &str, owner: &str) -> bool {
        if !self.is_owner(key, owner) || !self.is_available(key) {
            return false;
        }
        let Some(full_url) = self.key_to_url.get_mut(key) else {
            return false;
        };

        let marker = deleted_url(key, full_url);
        let original = std::mem::replace(full_url, marker.clone());
        self.url_to_key.remove(&original);
        self.url_to_key.insert(marker, key.to_string());
        self.key_available.insert(key.to_string(), false);
        true
    }
}

/// In-memory implementation of the [`Storage`] trait.
///
/// All maps live behind one reader/writer lock: lookups run in parallel,
/// mutations are exclusive. The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct MemStore {
    tables: RwLock<Tables>,
}

impl MemStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `key -> url` pairs that belong to
    /// no particular owner.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for (key, url) in entries {
                if let Err(err) = tables.insert(key.as_ref(), url.as_ref(), "", true) {
                    debug!(error = %err, "skipping initial entry");
                }
            }
        }
        store
    }

    /// Returns a snapshot of every stored record, sorted by key.
    pub fn records(&self) -> Vec<UrlRecord> {
        let tables = self.tables.read();
        let owners: HashMap<&str, &str> = tables
            .owner_to_keys
            .iter()
            .flat_map(|(owner, keys)| keys.iter().map(move |k| (k.as_str(), owner.as_str())))
            .collect();

        let mut records: Vec<UrlRecord> = tables
            .key_to_url
            .iter()
            .map(|(key, url)| UrlRecord {
                short_key: key.clone(),
                full_url: url.clone(),
                owner: owners.get(key.as_str()).copied().unwrap_or_default().to_string(),
                available: tables.is_available(key),
            })
            .collect();
        records.sort_by(|a, b| a.short_key.cmp(&b.short_key));
        records
    }

    pub fn len(&self) -> usize {
        self.tables.read().key_to_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemStore {
    async fn set_new_url(
        &self,
        key: &str,
        full_url: &str,
        owner: &str,
        available: bool,
    ) -> Result<()> {
        self.tables.write().insert(key, full_url, owner, available)
    }

    async fn restore(&self, record: &UrlRecord) -> Result<()> {
        self.tables.write().upsert(
            &record.short_key,
            &record.full_url,
            &record.owner,
            record.available,
        );
        Ok(())
    }

    async fn get_url(&self, key: &str) -> Result<String> {
        let tables = self.tables.read();
        let Some(full_url) = tables.key_to_url.get(key) else {
            return Err(StorageError::NotFound(key.to_string()));
        };
        if !tables.is_available(key) {
            return Err(StorageError::Gone(key.to_string()));
        }
        Ok(full_url.clone())
    }

    async fn get_all_urls(&self, owner: &str) -> Result<HashMap<String, String>> {
        let tables = self.tables.read();
        let Some(keys) = tables.owner_to_keys.get(owner) else {
            return Ok(HashMap::new());
        };

        Ok(keys
            .iter()
            .filter(|key| tables.is_available(key))
            .filter_map(|key| {
                tables
                    .key_to_url
                    .get(key)
                    .map(|url| (key.clone(), url.clone()))
            })
            .collect())
    }

    async fn set_batch_urls(&self, batch: &[BatchEntry], owner: &str) -> Result<Vec<String>> {
        let mut accepted = Vec::with_capacity(batch.len());
        let mut seen = HashSet::with_capacity(batch.len());
        let mut tables = self.tables.write();

        for entry in batch {
            if !seen.insert(entry.correlation_id.as_str()) {
                trace!(key = %entry.correlation_id, "repeated batch key, skipping");
                continue;
            }
            if tables.key_to_url.contains_key(&entry.correlation_id) {
                trace!(key = %entry.correlation_id, "batch key already exists, skipping");
                continue;
            }
            match tables.insert(&entry.correlation_id, &entry.original_url, owner, true) {
                Ok(()) => accepted.push(entry.correlation_id.clone()),
                Err(err) => debug!(key = %entry.correlation_id, error = %err, "skipping batch entry"),
            }
        }

        Ok(accepted)
    }

    async fn delete_batch(&self, inputs: Vec<DeleteReceiver>) -> Result<()> {
        let mut merged = fan_in(inputs);

        while let Some(request) = merged.recv().await {
            let deleted = self.tables.write().soft_delete(&request.key, &request.owner);
            if deleted {
                debug!(key = %request.key, "soft-deleted short key");
            } else {
                debug!(key = %request.key, "delete skipped: not owned or already deleted");
            }
        }

        Ok(())
    }

    async fn last_id(&self) -> Option<u64> {
        Some(self.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let tables = self.tables.read();
        Ok(StorageStats {
            urls: tables.key_to_url.len() as u64,
            users: tables.owner_to_keys.len() as u64,
        })
    }
}

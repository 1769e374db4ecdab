use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snip_core::pipeline::{self, fan_in, DeleteReceiver, RoundRobin};
use snip_core::storage::deleted_url;
use snip_core::{BatchEntry, Result, Storage, StorageError, StorageStats, UrlRecord};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// One line of the journal file.
///
/// `available` is optional for compatibility with older journals that did
/// not record it; a missing value means the record is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub short_key: String,
    pub full_url: String,
    pub user_id: String,
    #[serde(default)]
    pub available: Option<bool>,
}

impl JournalEntry {
    pub fn new(short_key: &str, full_url: &str, user_id: &str, available: bool) -> Self {
        Self {
            short_key: short_key.to_string(),
            full_url: full_url.to_string(),
            user_id: user_id.to_string(),
            available: Some(available),
        }
    }

    pub fn into_record(self) -> UrlRecord {
        UrlRecord {
            short_key: self.short_key,
            full_url: self.full_url,
            owner: self.user_id,
            available: self.available.unwrap_or(true),
        }
    }
}

/// Append-only journal file.
///
/// The file is opened, written and closed on every append, so nothing keeps
/// a handle across calls and external rotation is tolerated. Appends are
/// serialized by an internal lock.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entries` as one JSON object per line.
    pub async fn append(&self, entries: &[JournalEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads every entry in write order. A missing file reads as empty.
    pub async fn read_all(&self) -> Result<Vec<JournalEntry>> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|e| {
                StorageError::InvalidData(format!(
                    "{}:{line_no}: {e}",
                    self.path.display()
                ))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

/// A [`Storage`] decorator that makes any backend durable through a journal.
///
/// Every mutation is applied to the inner store first and then appended to
/// the journal. Reads go straight to the inner store.
#[derive(Debug, Clone)]
pub struct JournalStore<S> {
    inner: Arc<S>,
    journal: Arc<Journal>,
}

impl<S: Storage> JournalStore<S> {
    /// Replays the journal at `path` into `inner` and returns the wrapped store.
    ///
    /// The file is created if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>, inner: S) -> Result<Self> {
        let journal = Journal::new(path);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(journal.path())
            .await?;

        let entries = journal.read_all().await?;
        let count = entries.len();
        for entry in entries {
            let record = entry.into_record();
            if let Err(err) = inner.restore(&record).await {
                warn!(key = %record.short_key, error = %err, "journal record not replayed");
            }
        }

        info!(path = %journal.path().display(), count, "journal replayed");

        Ok(Self {
            inner: Arc::new(inner),
            journal: Arc::new(journal),
        })
    }

    /// Returns a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Storage> Storage for JournalStore<S> {
    async fn set_new_url(
        &self,
        key: &str,
        full_url: &str,
        owner: &str,
        available: bool,
    ) -> Result<()> {
        self.inner.set_new_url(key, full_url, owner, available).await?;
        self.journal
            .append(&[JournalEntry::new(key, full_url, owner, available)])
            .await
    }

    async fn restore(&self, record: &UrlRecord) -> Result<()> {
        self.inner.restore(record).await?;
        self.journal
            .append(&[JournalEntry::new(
                &record.short_key,
                &record.full_url,
                &record.owner,
                record.available,
            )])
            .await
    }

    async fn get_url(&self, key: &str) -> Result<String> {
        self.inner.get_url(key).await
    }

    async fn get_all_urls(&self, owner: &str) -> Result<HashMap<String, String>> {
        self.inner.get_all_urls(owner).await
    }

    async fn set_batch_urls(&self, batch: &[BatchEntry], owner: &str) -> Result<Vec<String>> {
        let accepted = self.inner.set_batch_urls(batch, owner).await?;

        self.journal.append(&accepted_entries(batch, &accepted, owner)).await?;

        Ok(accepted)
    }

    async fn delete_batch(&self, inputs: Vec<DeleteReceiver>) -> Result<()> {
        // The inner store consumes its own channel set. Everything we receive
        // is journaled (when authorized) and then forwarded to it.
        let workers = inputs.len();
        let (senders, forwarded) = pipeline::channels(workers);
        let mut merged = fan_in(inputs);
        let inner = Arc::clone(&self.inner);
        let journal = Arc::clone(&self.journal);

        tokio::spawn(async move {
            let mut dispatcher = RoundRobin::new(senders);
            while let Some(request) = merged.recv().await {
                match owned_url(inner.as_ref(), &request.key, &request.owner).await {
                    Some(full_url) => {
                        let entry = JournalEntry::new(
                            &request.key,
                            &deleted_url(&request.key, &full_url),
                            &request.owner,
                            false,
                        );
                        if let Err(err) = journal.append(&[entry]).await {
                            warn!(key = %request.key, error = %err, "failed to journal deletion");
                        }
                    }
                    None => trace!(key = %request.key, "delete not journaled: not owned"),
                }

                if !dispatcher.send(request).await {
                    debug!("inner store stopped consuming delete requests");
                    break;
                }
            }
        });

        self.inner.delete_batch(forwarded).await
    }

    async fn last_id(&self) -> Option<u64> {
        self.inner.last_id().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn stats(&self) -> Result<StorageStats> {
        self.inner.stats().await
    }
}

/// Pairs every accepted key with the URL of its first batch entry. Stores
/// only consider the first entry for a key, so that is the one they kept.
fn accepted_entries(batch: &[BatchEntry], accepted: &[String], owner: &str) -> Vec<JournalEntry> {
    let accepted: HashSet<&str> = accepted.iter().map(String::as_str).collect();
    let mut journaled = HashSet::with_capacity(accepted.len());

    batch
        .iter()
        .filter(|entry| accepted.contains(entry.correlation_id.as_str()))
        .filter(|entry| journaled.insert(entry.correlation_id.as_str()))
        .map(|entry| JournalEntry::new(&entry.correlation_id, &entry.original_url, owner, true))
        .collect()
}

/// Returns the URL of `key` if `owner` created it and it is still available.
async fn owned_url<S: Storage + ?Sized>(store: &S, key: &str, owner: &str) -> Option<String> {
    match store.get_all_urls(owner).await {
        Ok(mut urls) => urls.remove(key),
        Err(err) => {
            warn!(key = %key, error = %err, "could not check ownership for journal");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;
    use snip_core::pipeline::{fan_out, DeleteRequest};
    use tempfile::TempDir;

    fn journal_path(dir: &TempDir) -> PathBuf {
        dir.path().join("storage.jsonl")
    }

    async fn open(path: &Path) -> JournalStore<MemStore> {
        JournalStore::open(path, MemStore::new()).await.unwrap()
    }

    #[tokio::test]
    async fn open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);

        let store = open(&path).await;

        assert!(path.exists());
        assert_eq!(store.last_id().await, Some(0));
    }

    #[tokio::test]
    async fn writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = open(&path).await;

        store.set_new_url("k1", "https://a.example", "alice", true).await.unwrap();
        store.set_new_url("k2", "https://b.example", "bob", true).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"short_key":"k1","full_url":"https://a.example","user_id":"alice","available":true}"#
        );
    }

    #[tokio::test]
    async fn failed_insert_is_not_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = open(&path).await;

        store.set_new_url("k1", "https://a.example", "alice", true).await.unwrap();
        let err = store
            .set_new_url("k2", "https://a.example", "bob", true)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Duplicate { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn replay_restores_every_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);

        let before = {
            let store = open(&path).await;
            store.set_new_url("a1", "https://a1.example", "alice", true).await.unwrap();
            store.set_new_url("a2", "https://a2.example", "alice", true).await.unwrap();
            store.set_new_url("b1", "https://b1.example", "bob", true).await.unwrap();
            store
                .set_batch_urls(
                    &[
                        BatchEntry::new("c1", "https://c1.example"),
                        BatchEntry::new("a1", "https://ignored.example"),
                    ],
                    "carol",
                )
                .await
                .unwrap();
            let requests = vec![DeleteRequest::new("a2", "alice"), DeleteRequest::new("b1", "alice")];
            store.delete_batch(fan_out(requests, 2)).await.unwrap();

            let mut snapshot = HashMap::new();
            for owner in ["alice", "bob", "carol"] {
                snapshot.insert(owner, store.get_all_urls(owner).await.unwrap());
            }
            snapshot
        };

        let restored = open(&path).await;
        for (owner, urls) in &before {
            assert_eq!(&restored.get_all_urls(owner).await.unwrap(), urls, "owner {owner}");
        }
        assert_eq!(before["alice"].len(), 1);
        assert_eq!(before["bob"].len(), 1);
        assert!(matches!(
            restored.get_url("a2").await.unwrap_err(),
            StorageError::Gone(_)
        ));
        assert_eq!(restored.inner().records(), {
            let again = open(&path).await;
            again.inner().records()
        });
    }

    #[tokio::test]
    async fn batch_journals_the_stored_url_for_repeated_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = open(&path).await;

        let accepted = store
            .set_batch_urls(
                &[
                    BatchEntry::new("x", "https://first.example"),
                    BatchEntry::new("x", "https://second.example"),
                ],
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(accepted, vec!["x"]);

        let restored = open(&path).await;
        assert_eq!(restored.get_url("x").await.unwrap(), "https://first.example");
    }

    /// Soft-deletes the first accepted key right after a batch lands, as a
    /// concurrent delete from the owner would.
    struct DeletesAfterBatch(MemStore);

    #[async_trait]
    impl Storage for DeletesAfterBatch {
        async fn set_new_url(&self, key: &str, url: &str, owner: &str, available: bool) -> Result<()> {
            self.0.set_new_url(key, url, owner, available).await
        }

        async fn restore(&self, record: &UrlRecord) -> Result<()> {
            self.0.restore(record).await
        }

        async fn get_url(&self, key: &str) -> Result<String> {
            self.0.get_url(key).await
        }

        async fn get_all_urls(&self, owner: &str) -> Result<HashMap<String, String>> {
            self.0.get_all_urls(owner).await
        }

        async fn set_batch_urls(&self, batch: &[BatchEntry], owner: &str) -> Result<Vec<String>> {
            let accepted = self.0.set_batch_urls(batch, owner).await?;
            if let Some(first) = accepted.first() {
                let requests = vec![DeleteRequest::new(first.clone(), owner)];
                self.0.delete_batch(fan_out(requests, 1)).await?;
            }
            Ok(accepted)
        }

        async fn delete_batch(&self, inputs: Vec<DeleteReceiver>) -> Result<()> {
            self.0.delete_batch(inputs).await
        }

        async fn last_id(&self) -> Option<u64> {
            self.0.last_id().await
        }

        async fn ping(&self) -> Result<()> {
            self.0.ping().await
        }

        async fn stats(&self) -> Result<StorageStats> {
            self.0.stats().await
        }
    }

    #[tokio::test]
    async fn batch_is_journaled_when_a_key_is_deleted_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = JournalStore::open(&path, DeletesAfterBatch(MemStore::new()))
            .await
            .unwrap();

        let accepted = store
            .set_batch_urls(
                &[
                    BatchEntry::new("a", "https://a.example"),
                    BatchEntry::new("b", "https://b.example"),
                ],
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(accepted, vec!["a", "b"]);

        assert!(matches!(store.get_url("a").await, Err(StorageError::Gone(_))));

        let restored = open(&path).await;
        assert_eq!(restored.get_url("b").await.unwrap(), "https://b.example");
        assert_eq!(Journal::new(&path).read_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_repeating_a_rejected_key_journals_nothing_for_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = open(&path).await;
        store.set_new_url("k1", "https://taken.example", "bob", true).await.unwrap();

        let accepted = store
            .set_batch_urls(
                &[
                    BatchEntry::new("x", "https://taken.example"),
                    BatchEntry::new("x", "https://fresh.example"),
                    BatchEntry::new("y", "https://y.example"),
                ],
                "alice",
            )
            .await
            .unwrap();
        assert_eq!(accepted, vec!["y"]);

        let restored = open(&path).await;
        assert!(matches!(
            restored.get_url("x").await.unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert_eq!(Journal::new(&path).read_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deletion_appends_marker_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = open(&path).await;

        store.set_new_url("k1", "https://a.example", "alice", true).await.unwrap();
        store
            .delete_batch(fan_out(vec![DeleteRequest::new("k1", "alice")], 4))
            .await
            .unwrap();

        let entries = Journal::new(&path).read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], JournalEntry::new("k1", "k1_deleted=https://a.example", "alice", false));
    }

    #[tokio::test]
    async fn unauthorized_deletion_is_not_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = open(&path).await;

        store.set_new_url("k1", "https://a.example", "alice", true).await.unwrap();
        store
            .delete_batch(fan_out(vec![DeleteRequest::new("k1", "mallory")], 4))
            .await
            .unwrap();

        assert_eq!(Journal::new(&path).read_all().await.unwrap().len(), 1);
        assert_eq!(store.get_url("k1").await.unwrap(), "https://a.example");
    }

    #[tokio::test]
    async fn legacy_lines_default_to_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        std::fs::write(
            &path,
            concat!(
                r#"{"short_key":"old","full_url":"https://old.example","user_id":"alice"}"#,
                "\n\n",
                r#"{"short_key":"nul","full_url":"https://nul.example","user_id":"alice","available":null}"#,
                "\n",
            ),
        )
        .unwrap();

        let store = open(&path).await;

        assert_eq!(store.get_url("old").await.unwrap(), "https://old.example");
        assert_eq!(store.get_url("nul").await.unwrap(), "https://nul.example");
        assert_eq!(store.get_all_urls("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_journal_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        std::fs::write(&path, "{not json}\n").unwrap();

        let err = JournalStore::open(&path, MemStore::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn survives_external_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let store = open(&path).await;

        store.set_new_url("k1", "https://a.example", "alice", true).await.unwrap();
        std::fs::rename(&path, dir.path().join("rotated.jsonl")).unwrap();
        store.set_new_url("k2", "https://b.example", "alice", true).await.unwrap();

        let entries = Journal::new(&path).read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].short_key, "k2");
    }
}

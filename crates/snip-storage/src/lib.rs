//! Storage backends for the snip URL shortener.
//!
//! Three implementations of [`snip_core::Storage`] live here: the in-memory
//! [`MemStore`], the durable [`JournalStore`] decorator and the SQL-backed
//! [`PostgresStore`]. [`open`] picks one from a [`StorageConfig`].

pub mod journal;
pub mod memory;
pub mod postgres;

pub use journal::{Journal, JournalEntry, JournalStore};
pub use memory::MemStore;
pub use postgres::PostgresStore;

use snip_core::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

/// Selects and configures the storage backend.
///
/// A DSN wins over a journal path. With neither set, data lives in memory only.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct StorageConfig {
    #[builder(default, setter(into, strip_option))]
    pub database_dsn: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub file_storage_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Name of the backend this configuration selects.
    pub fn backend_name(&self) -> &'static str {
        if self.database_dsn.is_some() {
            "postgres"
        } else if self.file_storage_path.is_some() {
            "journal"
        } else {
            "memory"
        }
    }
}

/// Opens the backend selected by `config`.
///
/// Backends are tried in order of preference: PostgreSQL, then the journal,
/// then plain memory. A backend that cannot be opened is logged and the next
/// configured one is tried, so a broken DSN still keeps the journal durable.
pub async fn open(config: &StorageConfig) -> Arc<dyn Storage> {
    if let Some(dsn) = &config.database_dsn {
        match PostgresStore::connect(dsn).await {
            Ok(store) => {
                info!(backend = "postgres", "storage backend ready");
                return Arc::new(store);
            }
            Err(err) => warn!(error = %err, "postgres unavailable, falling back"),
        }
    }

    if let Some(path) = &config.file_storage_path {
        match JournalStore::open(path.clone(), MemStore::new()).await {
            Ok(store) => {
                info!(backend = "journal", path = %path.display(), "storage backend ready");
                return Arc::new(store);
            }
            Err(err) => warn!(error = %err, path = %path.display(), "journal unavailable, falling back"),
        }
    }

    info!(backend = "memory", "storage backend ready");
    Arc::new(MemStore::new())
}

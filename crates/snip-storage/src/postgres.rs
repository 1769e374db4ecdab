use async_trait::async_trait;
use snip_core::pipeline::{fan_in, DeleteReceiver};
use snip_core::storage::DELETED_MARKER;
use snip_core::{BatchEntry, Result, Storage, StorageError, StorageStats};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Deadline applied to every statement sent to the database.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline for establishing the first pool connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// PostgreSQL implementation of the [`Storage`] trait.
///
/// Records live in a single `urls` table. Deletion is soft: the row stays,
/// `available` flips to false and `full_url` is rewritten to the deletion
/// marker so the original URL can be shortened again.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store from an existing pool. The schema must already exist.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `dsn` and applies pending migrations.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(dsn)
            .await
            .map_err(map_sqlx_error)?;

        let store = Self::new(pool);
        store.migrate().await?;
        info!("connected to postgres");
        Ok(store)
    }

    /// Applies the bundled migrations. Already applied ones are skipped.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Query(format!("migration failed: {e}")))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn existing_key_for(&self, full_url: &str) -> Result<Option<String>> {
        let row = timed(
            "lookup by url",
            sqlx::query("SELECT short_id FROM urls WHERE full_url = $1")
                .bind(full_url)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.map(|row| row.try_get("short_id").map_err(map_sqlx_error))
            .transpose()
    }

    async fn count(&self, sql: &'static str) -> Result<u64> {
        let row = timed("count", sqlx::query(sql).fetch_one(&self.pool)).await?;
        let count: i64 = row.try_get(0).map_err(map_sqlx_error)?;
        u64::try_from(count).map_err(|e| StorageError::InvalidData(format!("negative count: {e}")))
    }
}

/// Runs `fut` under [`QUERY_TIMEOUT`], keeping the raw driver error for callers
/// that need to inspect it.
async fn deadline<T, F>(operation: &str, fut: F) -> Result<std::result::Result<T, sqlx::Error>>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    tokio::time::timeout(QUERY_TIMEOUT, fut).await.map_err(|_| {
        StorageError::Timeout(format!("{operation} exceeded {}ms", QUERY_TIMEOUT.as_millis()))
    })
}

async fn timed<T, F>(operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    deadline(operation, fut).await?.map_err(map_sqlx_error)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl Storage for PostgresStore {
    async fn set_new_url(
        &self,
        key: &str,
        full_url: &str,
        owner: &str,
        available: bool,
    ) -> Result<()> {
        let result = deadline(
            "insert url",
            sqlx::query(
                r#"
                INSERT INTO urls (short_id, full_url, user_id, available)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(key)
            .bind(full_url)
            .bind(owner)
            .bind(available)
            .execute(&self.pool),
        )
        .await?;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => match self.existing_key_for(full_url).await? {
                Some(existing_key) => Err(StorageError::Duplicate {
                    existing_key,
                    url: full_url.to_string(),
                }),
                None => Err(StorageError::Conflict(key.to_string())),
            },
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn get_url(&self, key: &str) -> Result<String> {
        let row = timed(
            "get url",
            sqlx::query("SELECT full_url, available FROM urls WHERE short_id = $1")
                .bind(key)
                .fetch_optional(&self.pool),
        )
        .await?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(key.to_string()));
        };

        let available: bool = row.try_get("available").map_err(map_sqlx_error)?;
        if !available {
            return Err(StorageError::Gone(key.to_string()));
        }
        row.try_get("full_url").map_err(map_sqlx_error)
    }

    async fn get_all_urls(&self, owner: &str) -> Result<HashMap<String, String>> {
        let rows = timed(
            "list urls",
            sqlx::query(
                r#"
                SELECT short_id, full_url
                FROM urls
                WHERE user_id = $1
                  AND available = TRUE
                "#,
            )
            .bind(owner)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("short_id").map_err(map_sqlx_error)?;
                let url: String = row.try_get("full_url").map_err(map_sqlx_error)?;
                Ok((key, url))
            })
            .collect()
    }

    async fn set_batch_urls(&self, batch: &[BatchEntry], owner: &str) -> Result<Vec<String>> {
        let mut tx = timed("begin batch", self.pool.begin()).await?;
        let mut accepted = Vec::with_capacity(batch.len());
        let mut seen = HashSet::with_capacity(batch.len());

        for entry in batch {
            if !seen.insert(entry.correlation_id.as_str()) {
                debug!(key = %entry.correlation_id, "repeated batch key, skipping");
                continue;
            }
            let result = timed(
                "insert batch url",
                sqlx::query(
                    r#"
                    INSERT INTO urls (short_id, full_url, user_id, available)
                    VALUES ($1, $2, $3, TRUE)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&entry.correlation_id)
                .bind(&entry.original_url)
                .bind(owner)
                .execute(&mut *tx),
            )
            .await?;

            if result.rows_affected() > 0 {
                accepted.push(entry.correlation_id.clone());
            } else {
                debug!(key = %entry.correlation_id, "batch entry conflicts, skipping");
            }
        }

        timed("commit batch", tx.commit()).await?;
        Ok(accepted)
    }

    async fn delete_batch(&self, inputs: Vec<DeleteReceiver>) -> Result<()> {
        let mut merged = fan_in(inputs);
        let mut tx = timed("begin delete", self.pool.begin()).await?;
        let mut failure: Option<StorageError> = None;

        // Keep draining after a failure so the producers never block on a
        // full channel. The aborted transaction is rolled back on drop.
        while let Some(request) = merged.recv().await {
            if failure.is_some() {
                continue;
            }

            let result = timed(
                "soft delete",
                sqlx::query(
                    r#"
                    UPDATE urls
                    SET full_url = short_id || $3 || full_url,
                        available = FALSE
                    WHERE user_id = $1
                      AND short_id = $2
                      AND available = TRUE
                    "#,
                )
                .bind(&request.owner)
                .bind(&request.key)
                .bind(DELETED_MARKER)
                .execute(&mut *tx),
            )
            .await;

            match result {
                Ok(done) if done.rows_affected() > 0 => {
                    debug!(key = %request.key, "soft-deleted short key");
                }
                Ok(_) => debug!(key = %request.key, "delete skipped: not owned or already deleted"),
                Err(err) => {
                    error!(key = %request.key, error = %err, "soft delete failed, rolling back batch");
                    failure = Some(err);
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        timed("commit delete", tx.commit()).await
    }

    async fn last_id(&self) -> Option<u64> {
        match self.count("SELECT COUNT(*) FROM urls").await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(error = %err, "could not read record count");
                None
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        timed("ping", sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }

    async fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            urls: self.count("SELECT COUNT(*) FROM urls").await?,
            users: self
                .count("SELECT COUNT(DISTINCT user_id) FROM urls")
                .await?,
        })
    }
}

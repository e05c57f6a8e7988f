use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;

use crate::types::Verdict;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("verdict store error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("verdict store migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Persistent verdict cache keyed by image URI. Each operation is atomic on
/// its own; nothing spans more than one key.
#[async_trait]
pub trait VerdictStore: Send + Sync {
    async fn get(&self, uri: &str) -> Result<Option<Verdict>, CacheError>;

    /// Upsert: replaces any verdict already stored for `verdict.uri`.
    async fn put(&self, verdict: &Verdict) -> Result<(), CacheError>;

    /// Removing an absent entry is not an error.
    async fn delete(&self, uri: &str) -> Result<(), CacheError>;
}

pub struct SqliteVerdictStore {
    pool: SqlitePool,
}

impl SqliteVerdictStore {
    #[tracing::instrument]
    pub async fn connect(database_url: &str) -> Result<Self, CacheError> {
        tracing::info!("Opening verdict store");
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Single-connection in-memory store; the database lives as long as the pool.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, CacheError> {
        tracing::debug!("Running verdict store migrations");
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl VerdictStore for SqliteVerdictStore {
    async fn get(&self, uri: &str) -> Result<Option<Verdict>, CacheError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT pass FROM verdict WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(pass,)| Verdict {
            uri: uri.to_string(),
            pass,
        }))
    }

    async fn put(&self, verdict: &Verdict) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO verdict (uri, pass, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(uri) DO UPDATE SET
                pass = excluded.pass,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&verdict.uri)
        .bind(verdict.pass)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, uri: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM verdict WHERE uri = ?")
            .bind(uri)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(uri: &str, pass: bool) -> Verdict {
        Verdict {
            uri: uri.to_string(),
            pass,
        }
    }

    #[tokio::test]
    async fn get_on_empty_store_is_a_miss() {
        let store = SqliteVerdictStore::in_memory().await.unwrap();
        assert_eq!(store.get("https://example.com/a.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_previous_verdict() {
        let store = SqliteVerdictStore::in_memory().await.unwrap();
        let uri = "https://example.com/a.jpg";

        store.put(&verdict(uri, true)).await.unwrap();
        assert_eq!(store.get(uri).await.unwrap(), Some(verdict(uri, true)));

        store.put(&verdict(uri, false)).await.unwrap();
        assert_eq!(store.get(uri).await.unwrap(), Some(verdict(uri, false)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SqliteVerdictStore::in_memory().await.unwrap();
        let uri = "https://example.com/a.jpg";

        store.put(&verdict(uri, true)).await.unwrap();
        store.delete(uri).await.unwrap();
        assert_eq!(store.get(uri).await.unwrap(), None);
        store.delete(uri).await.unwrap();
    }

    #[tokio::test]
    async fn verdicts_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("verdicts.db").display());
        let uri = "https://example.com/b.jpg";

        {
            let store = SqliteVerdictStore::connect(&url).await.unwrap();
            store.put(&verdict(uri, false)).await.unwrap();
            store.pool.close().await;
        }

        let store = SqliteVerdictStore::connect(&url).await.unwrap();
        assert_eq!(store.get(uri).await.unwrap(), Some(verdict(uri, false)));
    }
}

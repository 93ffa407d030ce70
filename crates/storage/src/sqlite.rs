use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use snafu::ResultExt;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::{
    CreateStorageDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqlitePragmaSnafu,
    SqliteQuerySnafu, SqliteSchemaSnafu, StorageResult,
};
use crate::{BoxFuture, KeyValueStore};

const DEFAULT_DATABASE_FILE: &str = "murmur/history.db";

/// SQLite-backed key/value store: one `kv_entries` table, WAL journal,
/// single-connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStore {
    /// Default database location under the platform data directory.
    pub fn default_database_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|path| path.join(DEFAULT_DATABASE_FILE))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE))
    }

    /// Opens (and bootstraps) the store at `database_location`, which may be
    /// a filesystem path, a `sqlite:` URL, or `:memory:`.
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        // Explicit PRAGMA writes make bootstrap behavior deterministic.
        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at_unix_seconds INTEGER NOT NULL DEFAULT (unixepoch())
            );",
        )
        .execute(&pool)
        .await
        .context(SqliteSchemaSnafu {
            stage: "sqlite-open-create-kv-table",
        })?;

        tracing::info!(database_url = %database_url, "opened sqlite key/value store");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

impl KeyValueStore for SqliteStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        Box::pin(async move {
            sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = ?1;")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .context(SqliteQuerySnafu { stage: "kv-get" })
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO kv_entries (key, value, updated_at_unix_seconds)
                 VALUES (?1, ?2, unixepoch())
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at_unix_seconds = excluded.updated_at_unix_seconds;",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu { stage: "kv-set" })?;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM kv_entries WHERE key = ?1;")
                .bind(key)
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu { stage: "kv-remove" })?;
            Ok(())
        })
    }
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateStorageDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_normalize_to_sqlite_urls() {
        assert_eq!(normalize_database_url(":memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_database_url("sqlite::memory:"),
            "sqlite::memory:"
        );
        assert_eq!(
            normalize_database_url("/tmp/murmur/history.db"),
            "sqlite:///tmp/murmur/history.db"
        );
    }

    #[tokio::test]
    async fn kv_round_trip_on_an_in_memory_database() {
        let store = SqliteStore::open(":memory:").await.unwrap();

        assert_eq!(store.get("history-store").await.unwrap(), None);
        store
            .set("history-store", "{\"chat_options\":{}}".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get("history-store").await.unwrap().as_deref(),
            Some("{\"chat_options\":{}}")
        );

        store
            .set("history-store", "{\"chat_options\":{\"model\":\"m\"}}".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get("history-store").await.unwrap().as_deref(),
            Some("{\"chat_options\":{\"model\":\"m\"}}")
        );

        store.remove("history-store").await.unwrap();
        assert_eq!(store.get("history-store").await.unwrap(), None);
    }
}

use crate::storage::{EventStore, StorageResult, StorageError};
use crate::events::track::EventRecord;
use crate::config;

use std::sync::Arc;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use indoc::indoc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use log;

/// The events table, one row per tracked event, never updated
const SCHEMA: &str = indoc! {"
    CREATE TABLE IF NOT EXISTS events(
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        event    TEXT,
        ts       DATETIME,
        url      TEXT,
        ref      TEXT,
        props    JSON
    );
"};

const INSERT_EVENT: &str = indoc! {"
    INSERT INTO events(event, ts, url, ref, props)
    VALUES (?, ?, ?, ?, json(?))
"};

const COUNT_EVENTS: &str = "SELECT COUNT(*) FROM events";

/// SQLite event store
/// Writes are serialised by SQLite itself (WAL journal, busy timeout), the pool only hands out connections
pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
    write_timeout: Option<Duration>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and makes sure the events table exists
    pub async fn open(settings: &config::Storage) -> StorageResult<Arc<Self>> {
        let options = SqliteConnectOptions::new()
            .filename(&settings.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(*settings.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(*settings.acquire_timeout)
            .connect_with(options).await
            .map_err(|e| StorageError::Initialisation(format!("{}: {}", settings.path.display(), e)))?;

        log::debug!("opened sqlite database at {}", settings.path.display());

        let store = Self {
            pool,
            path: settings.path.clone(),
            write_timeout: settings.write_timeout.map(|t| *t),
        };
        store.create_schema().await?;
        Ok(Arc::new(store))
    }

    /// Creates the events table if it does not exist yet, safe to call any number of times
    pub async fn create_schema(&self) -> StorageResult<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool).await
            .map(|_| ())
            .map_err(|e| StorageError::Initialisation(format!("failed to create events table: {}", e)))
    }

    /// Reads an event back
    #[cfg(test)]
    pub async fn fetch(&self, id: i64) -> StorageResult<Option<EventRecord>> {
        use sqlx::Row;

        let row = sqlx::query("SELECT event, ts, url, ref, props FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool).await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let query_error = |e: sqlx::Error| StorageError::Query(e.to_string());
        let properties: Option<String> = row.try_get("props").map_err(query_error)?;
        Ok(Some(EventRecord {
            event: row.try_get("event").map_err(query_error)?,
            timestamp: row.try_get("ts").map_err(query_error)?,
            url: row.try_get("url").map_err(query_error)?,
            referrer: row.try_get("ref").map_err(query_error)?,
            properties: EventRecord::properties_from_json(properties.as_deref())
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        }))
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    /// Appends an event, properties go in as a JSON document
    async fn insert(&self, record: &EventRecord) -> StorageResult<i64> {
        let properties = record.properties_json()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let insert = sqlx::query(INSERT_EVENT)
            .bind(record.event.as_str())
            .bind(record.timestamp)
            .bind(record.url.as_str())
            .bind(record.referrer.as_str())
            .bind(properties)
            .execute(&self.pool);

        let result = match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, insert).await
                .map_err(|_| StorageError::Timeout(limit.into()))?,
            None => insert.await,
        };

        result
            .map(|done| done.last_insert_rowid())
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    async fn count(&self) -> StorageResult<i64> {
        sqlx::query_scalar::<_, i64>(COUNT_EVENTS)
            .fetch_one(&self.pool).await
            .map_err(|e| StorageError::Query(e.to_string()))
    }
}

impl Display for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "sqlite:{}", self.path.display())
    }
}

pub mod sqlite;

use crate::events::track::EventRecord;
use crate::storage::sqlite::SqliteStore;
use crate::config;

use std::sync::Arc;
use std::fmt::Display;
use thiserror::Error;
use async_trait::async_trait;

/// Enum used by event stores to report errors
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Failure to open the store or to create its schema
    #[error("failed to initialise storage: {0}")]
    Initialisation(String),

    /// The engine rejected a read or a write
    #[error("query failed: {0}")]
    Query(String),

    /// The event's properties could not be turned into a JSON document
    #[error("failed to serialise properties: {0}")]
    Serialization(String),

    /// The write did not complete in time
    #[error("write timed out after {0}")]
    Timeout(humantime::Duration),
}

/// Convenience type: storage result
pub type StorageResult<T> = Result<T, StorageError>;

/// The EventStore trait: append-only storage for tracked events
/// Implementations are shared by all request tasks and must handle concurrent use on their own
#[async_trait]
pub trait EventStore: Display + Send + Sync {
    /// Appends an event, returns its identifier
    async fn insert(&self, record: &EventRecord) -> StorageResult<i64>;
    /// Total number of events stored so far
    async fn count(&self) -> StorageResult<i64>;
}

/// Convenience type: a shared store
pub type Store = Arc<dyn EventStore>;

/// Opens the store described in the configuration, creating its schema if needed
pub async fn init_store(storage_config: &config::Storage) -> StorageResult<Store> {
    let store = SqliteStore::open(storage_config).await?;
    log::info!("events will be stored in {}", store);
    Ok(store)
}

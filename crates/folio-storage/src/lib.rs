//! Keyed record storage for folio: the `RecordStore` interface and its
//! Postgres and in-memory implementations.

use async_trait::async_trait;
use folio_core::{Collection, CollectionSchema, Record, ValidationError};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

pub const CRATE_NAME: &str = "folio-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("collection {0} not found")]
    CollectionNotFound(String),
    #[error("collection {0} already exists")]
    AlreadyExists(String),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("stored value could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Query-and-upsert interface over named collections of JSON records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_collection_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] when the name is taken.
    async fn create_collection(&self, schema: CollectionSchema) -> Result<Collection, StoreError>;

    /// Records whose `field` equals `value` exactly, oldest first.
    async fn find_records_by_field(
        &self,
        collection_id: Uuid,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<Record>, StoreError>;

    async fn find_record(&self, collection_id: Uuid, id: Uuid) -> Result<Option<Record>, StoreError>;

    /// All records of a collection, oldest first.
    async fn list_records(&self, collection_id: Uuid) -> Result<Vec<Record>, StoreError>;

    /// Validates against the collection schema, then inserts or overwrites by
    /// record id. Bumps `record.updated`.
    async fn save_record(&self, record: &mut Record) -> Result<(), StoreError>;
}

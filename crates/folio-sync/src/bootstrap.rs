use std::sync::Arc;

use folio_core::{portfolio_schema, Collection, CollectionSchema};
use folio_storage::{RecordStore, StoreError};
use tracing::{debug, info};

use crate::SchemaBootstrapError;

/// Makes sure the destination collection exists before any record write.
pub struct SchemaBootstrapper {
    store: Arc<dyn RecordStore>,
    schema: CollectionSchema,
}

impl SchemaBootstrapper {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_schema(store, portfolio_schema())
    }

    pub fn with_schema(store: Arc<dyn RecordStore>, schema: CollectionSchema) -> Self {
        Self { store, schema }
    }

    pub fn collection_name(&self) -> &str {
        &self.schema.name
    }

    /// Idempotent. An existing collection is returned as-is even if its shape
    /// differs from the expected schema.
    pub async fn ensure_schema(&self) -> Result<Collection, SchemaBootstrapError> {
        if let Some(existing) = self.find().await? {
            debug!(collection = %existing.name(), "collection present");
            return Ok(existing);
        }

        info!(collection = %self.schema.name, "collection missing; creating");
        match self.store.create_collection(self.schema.clone()).await {
            Ok(created) => Ok(created),
            // Lost a race with another creator; theirs is as good as ours.
            Err(StoreError::AlreadyExists(_)) => self
                .find()
                .await?
                .ok_or_else(|| self.error(StoreError::CollectionNotFound(self.schema.name.clone()))),
            Err(err) => Err(self.error(err)),
        }
    }

    async fn find(&self) -> Result<Option<Collection>, SchemaBootstrapError> {
        self.store
            .find_collection_by_name(&self.schema.name)
            .await
            .map_err(|err| self.error(err))
    }

    fn error(&self, source: StoreError) -> SchemaBootstrapError {
        SchemaBootstrapError {
            collection: self.schema.name.clone(),
            source,
        }
    }
}

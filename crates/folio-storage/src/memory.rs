use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use folio_core::{Collection, CollectionSchema, Record};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{RecordStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    collections: Vec<Collection>,
    records: HashMap<Uuid, Vec<Record>>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_collection_creation: bool,
    fail_saves_where: Vec<(String, JsonValue)>,
}

/// In-process store with the same semantics as [`crate::PgRecordStore`].
/// Supports injected faults so callers can exercise their error paths.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: RwLock<MemoryState>,
    faults: Mutex<FaultPlan>,
    create_collection_calls: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `create_collection` calls, successful or not.
    pub fn create_collection_calls(&self) -> usize {
        self.create_collection_calls.load(Ordering::SeqCst)
    }

    pub fn fail_collection_creation(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_collection_creation = true;
        }
    }

    /// Every save of a record whose `field` equals `value` fails.
    pub fn fail_saves_where(&self, field: &str, value: impl Into<JsonValue>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_saves_where.push((field.to_string(), value.into()));
        }
    }

    fn collection_creation_fails(&self) -> bool {
        self.faults
            .lock()
            .map(|f| f.fail_collection_creation)
            .unwrap_or(false)
    }

    fn save_fails(&self, record: &Record) -> bool {
        self.faults
            .lock()
            .map(|f| {
                f.fail_saves_where
                    .iter()
                    .any(|(field, value)| record.data.get(field) == Some(value))
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_collection_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let state = self.state.read().await;
        Ok(state.collections.iter().find(|c| c.name() == name).cloned())
    }

    async fn create_collection(&self, schema: CollectionSchema) -> Result<Collection, StoreError> {
        self.create_collection_calls.fetch_add(1, Ordering::SeqCst);
        if self.collection_creation_fails() {
            return Err(StoreError::Unavailable(format!(
                "cannot create collection {}",
                schema.name
            )));
        }

        let mut state = self.state.write().await;
        if state.collections.iter().any(|c| c.name() == schema.name) {
            return Err(StoreError::AlreadyExists(schema.name));
        }
        let collection = Collection {
            id: Uuid::new_v4(),
            schema,
            created: Utc::now(),
        };
        state.collections.push(collection.clone());
        state.records.insert(collection.id, Vec::new());
        Ok(collection)
    }

    async fn find_records_by_field(
        &self,
        collection_id: Uuid,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<Record>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&collection_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.data.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_record(&self, collection_id: Uuid, id: Uuid) -> Result<Option<Record>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&collection_id)
            .and_then(|records| records.iter().find(|r| r.id == id).cloned()))
    }

    async fn list_records(&self, collection_id: Uuid) -> Result<Vec<Record>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.get(&collection_id).cloned().unwrap_or_default())
    }

    async fn save_record(&self, record: &mut Record) -> Result<(), StoreError> {
        if self.save_fails(record) {
            return Err(StoreError::Unavailable(format!("write of record {} refused", record.id)));
        }

        let mut state = self.state.write().await;
        let schema = state
            .collections
            .iter()
            .find(|c| c.id == record.collection_id)
            .map(|c| c.schema.clone())
            .ok_or_else(|| StoreError::CollectionNotFound(record.collection_id.to_string()))?;
        let dropped = schema.retain_declared(&mut record.data);
        if !dropped.is_empty() {
            debug!(collection = %schema.name, ?dropped, "dropping fields the collection does not declare");
        }
        schema.validate(&record.data)?;
        record.updated = Utc::now();

        let records = state.records.entry(record.collection_id).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}

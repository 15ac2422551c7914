use std::sync::Arc;

use folio_core::{Collection, ProjectRecord, Record, RemoteRepository, NATURAL_KEY_FIELD};
use folio_storage::{RecordStore, StoreError};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Create-or-update of portfolio records keyed by `repo_name`.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn upsert(
        &self,
        collection: &Collection,
        remote: &RemoteRepository,
    ) -> Result<UpsertOutcome, PersistenceError> {
        let fail = |source: StoreError| PersistenceError {
            repo_name: remote.name.clone(),
            source,
        };

        let matches = self
            .store
            .find_records_by_field(
                collection.id,
                NATURAL_KEY_FIELD,
                &JsonValue::from(remote.name.as_str()),
            )
            .await
            .map_err(fail)?;

        // The key is unique by convention only; extra matches are left alone.
        let (mut record, outcome) = match matches.into_iter().next() {
            Some(existing) => (existing, UpsertOutcome::Updated),
            None => (Record::new(collection), UpsertOutcome::Created),
        };

        for (field, value) in ProjectRecord::from_remote(remote).to_fields() {
            record.set(field, value);
        }
        self.store.save_record(&mut record).await.map_err(fail)?;

        info!(repo_name = %remote.name, record_id = %record.id, ?outcome, "repository synced");
        Ok(outcome)
    }
}

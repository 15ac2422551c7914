use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::{Collection, CollectionSchema, Record};
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{RecordStore, StoreError};

/// Postgres-backed store. Collections keep their schema as JSONB, records keep
/// their fields in a JSONB `data` column.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("storage migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn schema_for(&self, collection_id: Uuid) -> Result<CollectionSchema, StoreError> {
        let row = sqlx::query("SELECT schema_json FROM collections WHERE id = $1")
            .bind(collection_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::CollectionNotFound(collection_id.to_string()))?;
        let schema_json: JsonValue = row.try_get("schema_json")?;
        Ok(serde_json::from_value(schema_json)?)
    }
}

fn record_from_row(row: &PgRow) -> Result<Record, StoreError> {
    let data: Map<String, JsonValue> = serde_json::from_value(row.try_get("data")?)?;
    Ok(Record {
        id: row.try_get("id")?,
        collection_id: row.try_get("collection_id")?,
        data,
        created: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_collection_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, schema_json, created_at
              FROM collections
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let schema_json: JsonValue = row.try_get("schema_json")?;
        Ok(Some(Collection {
            id: row.try_get("id")?,
            schema: serde_json::from_value(schema_json)?,
            created: row.try_get("created_at")?,
        }))
    }

    async fn create_collection(&self, schema: CollectionSchema) -> Result<Collection, StoreError> {
        let id = Uuid::new_v4();
        let created = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO collections (id, name, schema_json, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&schema.name)
        .bind(serde_json::to_value(&schema)?)
        .bind(created)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(schema.name));
        }
        Ok(Collection {
            id,
            schema,
            created,
        })
    }

    async fn find_records_by_field(
        &self,
        collection_id: Uuid,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection_id, data, created_at, updated_at
              FROM records
             WHERE collection_id = $1
               AND data -> $2 = $3
             ORDER BY created_at, id
            "#,
        )
        .bind(collection_id)
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn find_record(&self, collection_id: Uuid, id: Uuid) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, collection_id, data, created_at, updated_at
              FROM records
             WHERE collection_id = $1
               AND id = $2
            "#,
        )
        .bind(collection_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_records(&self, collection_id: Uuid) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection_id, data, created_at, updated_at
              FROM records
             WHERE collection_id = $1
             ORDER BY created_at, id
            "#,
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn save_record(&self, record: &mut Record) -> Result<(), StoreError> {
        let schema = self.schema_for(record.collection_id).await?;
        let dropped = schema.retain_declared(&mut record.data);
        if !dropped.is_empty() {
            debug!(collection = %schema.name, ?dropped, "dropping fields the collection does not declare");
        }
        schema.validate(&record.data)?;
        record.updated = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO records (id, collection_id, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
               SET data = EXCLUDED.data,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(record.collection_id)
        .bind(JsonValue::Object(record.data.clone()))
        .bind(record.created)
        .bind(record.updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use folio_core::portfolio_schema;
    use serde_json::json;

    async fn store_from_env() -> PgRecordStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
        let store = PgRecordStore::connect(&url).await.expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    fn project(collection: &Collection, repo_name: &str, created: DateTime<Utc>) -> Record {
        let mut record = Record::new(collection);
        record.created = created;
        record.set("username", "bob");
        record.set("repo_name", repo_name);
        record.set("link_to_repo", format!("https://x/{repo_name}"));
        record
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database in DATABASE_URL"]
    async fn natural_key_lookup_is_exact_and_oldest_first() {
        let store = store_from_env().await;
        let mut schema = portfolio_schema();
        schema.name = format!("github_projects_{}", Uuid::new_v4().simple());
        let collection = store.create_collection(schema).await.unwrap();

        let now = Utc::now();
        let mut newer = project(&collection, "alpha", now);
        let mut older = project(&collection, "alpha", now - Duration::hours(1));
        let mut other_case = project(&collection, "Alpha", now - Duration::hours(2));
        for record in [&mut newer, &mut older, &mut other_case] {
            store.save_record(record).await.unwrap();
        }

        let found = store
            .find_records_by_field(collection.id, "repo_name", &json!("alpha"))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id).collect();
        assert_eq!(ids, [older.id, newer.id]);

        let none = store
            .find_records_by_field(collection.id, "repo_name", &json!("ALPHA"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database in DATABASE_URL"]
    async fn save_drops_fields_the_collection_does_not_declare() {
        let store = store_from_env().await;
        let mut schema = portfolio_schema();
        schema.name = format!("github_projects_{}", Uuid::new_v4().simple());
        schema.fields.retain(|f| f.name != "tags");
        let collection = store.create_collection(schema).await.unwrap();

        let mut record = project(&collection, "alpha", Utc::now());
        record.set("tags", json!(["rust"]));
        store.save_record(&mut record).await.unwrap();

        let stored = store.find_record(collection.id, record.id).await.unwrap().unwrap();
        assert!(!stored.data.contains_key("tags"));
        assert_eq!(stored.get_str("repo_name"), Some("alpha"));
    }
}

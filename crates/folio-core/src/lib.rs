//! Core domain model for folio: synced repositories, stored project records and
//! the collection schema they live in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "folio-core";

/// Logical name of the collection that holds the portfolio.
pub const PORTFOLIO_COLLECTION: &str = "github_projects";

/// Natural key field of [`ProjectRecord`].
pub const NATURAL_KEY_FIELD: &str = "repo_name";

/// One repository as reported upstream for a single sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub name: String,
    pub url: String,
    pub owner_login: String,
    pub owner_avatar_url: String,
    pub description: String,
    /// ISO-8601 text exactly as supplied upstream.
    pub last_updated_at: String,
    pub star_count: u64,
    pub fork_count: u64,
}

/// Persisted shape of a portfolio entry, keyed by `repo_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub username: String,
    pub repo_name: String,
    pub image_link: String,
    pub tags: Vec<String>,
    pub link_to_repo: String,
    pub description: String,
    pub stars: u64,
    pub fork: u64,
    pub contributor: u64,
}

impl ProjectRecord {
    /// Sync always writes empty `tags` and a zero `contributor`.
    pub fn from_remote(remote: &RemoteRepository) -> Self {
        Self {
            username: remote.owner_login.clone(),
            repo_name: remote.name.clone(),
            image_link: remote.owner_avatar_url.clone(),
            tags: Vec::new(),
            link_to_repo: remote.url.clone(),
            description: remote.description.clone(),
            stars: remote.star_count,
            fork: remote.fork_count,
            contributor: 0,
        }
    }

    pub fn to_fields(&self) -> Map<String, JsonValue> {
        let mut fields = Map::new();
        fields.insert("username".into(), JsonValue::from(self.username.clone()));
        fields.insert(NATURAL_KEY_FIELD.into(), JsonValue::from(self.repo_name.clone()));
        fields.insert("image_link".into(), JsonValue::from(self.image_link.clone()));
        fields.insert("tags".into(), JsonValue::from(self.tags.clone()));
        fields.insert("link_to_repo".into(), JsonValue::from(self.link_to_repo.clone()));
        fields.insert("description".into(), JsonValue::from(self.description.clone()));
        fields.insert("stars".into(), JsonValue::from(self.stars));
        fields.insert("fork".into(), JsonValue::from(self.fork));
        fields.insert("contributor".into(), JsonValue::from(self.contributor));
        fields
    }

    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(JsonValue::Object(record.data.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Json,
    Number,
}

impl FieldType {
    fn accepts(self, value: &JsonValue) -> bool {
        match self {
            FieldType::Text => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Json => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl SchemaField {
    pub fn new(name: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required,
        }
    }
}

/// Per-operation access rules. `Some("")` is public, `None` is locked to the
/// process itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessRules {
    pub list_rule: Option<String>,
    pub view_rule: Option<String>,
    pub create_rule: Option<String>,
    pub update_rule: Option<String>,
    pub delete_rule: Option<String>,
}

impl AccessRules {
    /// Public reads, no external writes.
    pub fn public_read_only() -> Self {
        Self {
            list_rule: Some(String::new()),
            view_rule: Some(String::new()),
            create_rule: None,
            update_rule: None,
            delete_rule: None,
        }
    }

    pub fn list_is_public(&self) -> bool {
        matches!(self.list_rule.as_deref(), Some(""))
    }

    pub fn view_is_public(&self) -> bool {
        matches!(self.view_rule.as_deref(), Some(""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}`: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<SchemaField>,
    pub rules: AccessRules,
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Removes keys the schema does not declare and returns their names.
    /// Stores call this before [`CollectionSchema::validate`] so that writes
    /// into an older, narrower collection keep the columns it does have.
    pub fn retain_declared(&self, data: &mut Map<String, JsonValue>) -> Vec<String> {
        let mut dropped = Vec::new();
        data.retain(|key, _| {
            let declared = self.field(key).is_some();
            if !declared {
                dropped.push(key.clone());
            }
            declared
        });
        dropped
    }

    /// Checks record data against the declared fields before it is written.
    pub fn validate(&self, data: &Map<String, JsonValue>) -> Result<(), ValidationError> {
        for key in data.keys() {
            if self.field(key).is_none() {
                return Err(ValidationError::new(key, "unknown field"));
            }
        }

        for field in &self.fields {
            match data.get(&field.name) {
                None | Some(JsonValue::Null) => {
                    if field.required {
                        return Err(ValidationError::new(&field.name, "missing required value"));
                    }
                }
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        return Err(ValidationError::new(
                            &field.name,
                            format!("expected {:?} value", field.field_type),
                        ));
                    }
                    if field.required && value.as_str().is_some_and(str::is_empty) {
                        return Err(ValidationError::new(&field.name, "cannot be blank"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// The nine-field schema of the portfolio collection.
pub fn portfolio_schema() -> CollectionSchema {
    CollectionSchema {
        name: PORTFOLIO_COLLECTION.to_string(),
        fields: vec![
            SchemaField::new("username", FieldType::Text, true),
            SchemaField::new(NATURAL_KEY_FIELD, FieldType::Text, true),
            SchemaField::new("image_link", FieldType::Text, false),
            SchemaField::new("tags", FieldType::Json, false),
            SchemaField::new("link_to_repo", FieldType::Text, true),
            SchemaField::new("description", FieldType::Text, false),
            SchemaField::new("stars", FieldType::Number, false),
            SchemaField::new("fork", FieldType::Number, false),
            SchemaField::new("contributor", FieldType::Number, false),
        ],
        rules: AccessRules::public_read_only(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub schema: CollectionSchema,
    pub created: DateTime<Utc>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub data: Map<String, JsonValue>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Record {
    /// A fresh, unsaved record in `collection`.
    pub fn new(collection: &Collection) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            collection_id: collection.id,
            data: Map::new(),
            created: now,
            updated: now,
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<JsonValue>) {
        self.data.insert(field.into(), value.into());
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(JsonValue::as_str)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.data.get(field).and_then(JsonValue::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha() -> RemoteRepository {
        RemoteRepository {
            name: "alpha".into(),
            url: "https://x/alpha".into(),
            owner_login: "bob".into(),
            owner_avatar_url: "https://x/a.png".into(),
            description: String::new(),
            last_updated_at: "2024-01-01T00:00:00Z".into(),
            star_count: 3,
            fork_count: 1,
        }
    }

    #[test]
    fn project_record_maps_remote_fields() {
        let record = ProjectRecord::from_remote(&alpha());
        let fields = record.to_fields();
        assert_eq!(fields.len(), 9);
        assert_eq!(fields["repo_name"], "alpha");
        assert_eq!(fields["link_to_repo"], "https://x/alpha");
        assert_eq!(fields["username"], "bob");
        assert_eq!(fields["stars"], 3);
        assert_eq!(fields["fork"], 1);
        assert_eq!(fields["tags"], serde_json::json!([]));
        assert_eq!(fields["contributor"], 0);
    }

    #[test]
    fn portfolio_schema_accepts_synced_record_with_empty_description() {
        let schema = portfolio_schema();
        assert_eq!(schema.fields.len(), 9);
        let fields = ProjectRecord::from_remote(&alpha()).to_fields();
        assert!(schema.validate(&fields).is_ok());
    }

    #[test]
    fn validation_rejects_blank_required_text() {
        let schema = portfolio_schema();
        let mut remote = alpha();
        remote.owner_login = String::new();
        let err = schema
            .validate(&ProjectRecord::from_remote(&remote).to_fields())
            .unwrap_err();
        assert_eq!(err.field, "username");
    }

    #[test]
    fn validation_rejects_wrong_type_and_unknown_fields() {
        let schema = portfolio_schema();
        let mut fields = ProjectRecord::from_remote(&alpha()).to_fields();
        fields.insert("stars".into(), JsonValue::from("three"));
        assert_eq!(schema.validate(&fields).unwrap_err().field, "stars");

        let mut fields = ProjectRecord::from_remote(&alpha()).to_fields();
        fields.insert("languages".into(), JsonValue::from("rust"));
        assert_eq!(schema.validate(&fields).unwrap_err().field, "languages");
    }

    #[test]
    fn retain_declared_drops_columns_an_older_schema_lacks() {
        let mut schema = portfolio_schema();
        schema.fields.retain(|f| !["tags", "fork", "contributor"].contains(&f.name.as_str()));
        let mut fields = ProjectRecord::from_remote(&alpha()).to_fields();

        let mut dropped = schema.retain_declared(&mut fields);
        dropped.sort();
        assert_eq!(dropped, vec!["contributor", "fork", "tags"]);
        assert_eq!(fields.len(), 6);
        assert!(schema.validate(&fields).is_ok());
    }

    #[test]
    fn portfolio_rules_are_public_read_locked_write() {
        let rules = portfolio_schema().rules;
        assert!(rules.list_is_public());
        assert!(rules.view_is_public());
        assert!(rules.create_rule.is_none());
        assert!(rules.update_rule.is_none());
        assert!(rules.delete_rule.is_none());
    }
}

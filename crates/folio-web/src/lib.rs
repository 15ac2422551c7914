//! Axum front for folio: the public site directory plus read-only access to
//! synced collections.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use folio_core::{Collection, Record};
use folio_storage::{RecordStore, StoreError};
use serde_json::{json, Map, Value as JsonValue};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "folio-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub public_dir: PathBuf,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, public_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            public_dir: public_dir.into(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let public = ServeDir::new(&state.public_dir);
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/collections/{name}/records", get(list_records_handler))
        .route("/api/collections/{name}/records/{id}", get(view_record_handler))
        .fallback_service(public)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding web listener on port {port}"))
}

/// Serves until `shutdown` resolves.
pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, public_dir = %state.public_dir.display(), "serving");
    }
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("web server failed")
}

async fn health_handler() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

async fn list_records_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    let collection = match load_collection(state.store.as_ref(), &name).await {
        Ok(collection) => collection,
        Err(resp) => return resp,
    };
    if !collection.schema.rules.list_is_public() {
        return json_error(StatusCode::FORBIDDEN, "listing this collection is not allowed");
    }

    match state.store.list_records(collection.id).await {
        Ok(records) => {
            let items: Vec<JsonValue> = records.iter().map(|r| record_json(&collection, r)).collect();
            Json(json!({ "totalItems": items.len(), "items": items })).into_response()
        }
        Err(err) => store_error(err),
    }
}

async fn view_record_handler(
    State(state): State<Arc<AppState>>,
    AxumPath((name, id)): AxumPath<(String, String)>,
) -> Response {
    let collection = match load_collection(state.store.as_ref(), &name).await {
        Ok(collection) => collection,
        Err(resp) => return resp,
    };
    if !collection.schema.rules.view_is_public() {
        return json_error(StatusCode::FORBIDDEN, "viewing this collection is not allowed");
    }
    let Ok(id) = Uuid::parse_str(&id) else {
        return json_error(StatusCode::NOT_FOUND, "record not found");
    };

    match state.store.find_record(collection.id, id).await {
        Ok(Some(record)) => Json(record_json(&collection, &record)).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "record not found"),
        Err(err) => store_error(err),
    }
}

async fn load_collection(store: &dyn RecordStore, name: &str) -> Result<Collection, Response> {
    match store.find_collection_by_name(name).await {
        Ok(Some(collection)) => Ok(collection),
        Ok(None) => Err(json_error(StatusCode::NOT_FOUND, "collection not found")),
        Err(err) => Err(store_error(err)),
    }
}

fn record_json(collection: &Collection, record: &Record) -> JsonValue {
    let mut out = Map::new();
    out.insert("id".into(), JsonValue::from(record.id.to_string()));
    out.insert("collectionId".into(), JsonValue::from(collection.id.to_string()));
    out.insert("collectionName".into(), JsonValue::from(collection.name()));
    out.insert("created".into(), JsonValue::from(record.created.to_rfc3339()));
    out.insert("updated".into(), JsonValue::from(record.updated.to_rfc3339()));
    for (field, value) in &record.data {
        out.insert(field.clone(), value.clone());
    }
    JsonValue::Object(out)
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn store_error(err: StoreError) -> Response {
    error!(error = %err, "record store query failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
}

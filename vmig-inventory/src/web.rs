//! Read-only inventory query surface.
//!
//! A thin projection of the per-provider record tables:
//!
//! ```text
//! GET /providers/:ns/:name/:collection        -> [records]
//! GET /providers/:ns/:name/:collection/:id    -> record, blob expanded
//! ```
//!
//! `?name=` filters a collection by the record name attribute.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::container::ReconcilerContainer;
use crate::model::store::{Store, StoreError};
use crate::model::{Record, Ref, ResourceKind};

pub fn router(container: Arc<ReconcilerContainer>) -> Router {
    Router::new()
        .route("/providers/:ns/:name/:collection", get(list_collection))
        .route("/providers/:ns/:name/:collection/:id", get(get_item))
        .with_state(container)
}

/// API error response.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    fn not_found(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: StatusCode::NOT_FOUND,
        }
    }

    fn internal(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::not_found(msg),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ListParams {
    name: Option<String>,
}

/// Collection view of a record.
#[derive(Serialize)]
struct RecordSummary {
    id: String,
    name: String,
    revision: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<Ref>,
}

impl From<Record> for RecordSummary {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            name: record.name,
            revision: record.revision,
            parent: record.parent,
        }
    }
}

/// Item view: the encoded blob expanded.
#[derive(Serialize)]
struct RecordDetail {
    id: String,
    name: String,
    revision: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<Ref>,
    object: serde_json::Value,
}

impl From<Record> for RecordDetail {
    fn from(record: Record) -> Self {
        let object = serde_json::Value::Object(record.properties());
        Self {
            id: record.id,
            name: record.name,
            revision: record.revision,
            parent: record.parent,
            object,
        }
    }
}

async fn list_collection(
    State(container): State<Arc<ReconcilerContainer>>,
    Path((namespace, name, collection)): Path<(String, String, String)>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<RecordSummary>>, ApiError> {
    let (kind, store) = lookup(&container, &namespace, &name, &collection)?;
    let records = store.list(kind, params.name.as_deref()).await?;

    Ok(Json(records.into_iter().map(RecordSummary::from).collect()))
}

async fn get_item(
    State(container): State<Arc<ReconcilerContainer>>,
    Path((namespace, name, collection, id)): Path<(String, String, String, String)>,
) -> Result<Json<RecordDetail>, ApiError> {
    let (kind, store) = lookup(&container, &namespace, &name, &collection)?;
    let record = store.get(kind, &Record::pk_for(&id)).await?;

    Ok(Json(RecordDetail::from(record)))
}

fn lookup(
    container: &ReconcilerContainer,
    namespace: &str,
    name: &str,
    collection: &str,
) -> Result<(ResourceKind, Arc<Store>), ApiError> {
    let Some(kind) = ResourceKind::from_collection(collection) else {
        return Err(ApiError::not_found(format!(
            "unknown collection: {collection}"
        )));
    };
    let Some(reconciler) = container.find(namespace, name) else {
        return Err(ApiError::not_found(format!(
            "unknown provider: {namespace}/{name}"
        )));
    };
    let Some(store) = reconciler.db() else {
        return Err(ApiError::internal("inventory not open"));
    };

    Ok((kind, store))
}

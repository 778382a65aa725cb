//! Handlers for `/recordschemas` endpoints.
//!
//! Schemas are immutable, so only list, create and retrieve exist.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/recordschemas` | `record_type`, `schema__<path>[__<op>]` filters; `limit` / `offset` |
//! | `POST` | `/recordschemas` | Body: `{"record_type":"<uuid>","schema":{...}}`; returns 201 |
//! | `GET`  | `/recordschemas/{id}` | 404 if not found |

use std::sync::Arc;

use ashlar_core::{filter::SchemaFilter, schema::RecordSchema, store::SchemaStore};
use axum::{
  Json,
  extract::{Path, Query, State, rejection::JsonRejection},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
  error::ApiError,
  listing::{Listing, Params, Paging, pairs},
};

/// `GET /recordschemas[?record_type=..][&schema__title=..][&limit=..]`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<Params>,
) -> Result<Json<Listing<RecordSchema>>, ApiError>
where
  S: SchemaStore,
{
  let paging = Paging::from_params(&params)?;
  let filter = SchemaFilter::from_params(pairs(&params))?;
  let schemas = store.list_schemas(&filter).await.map_err(ApiError::store)?;
  Ok(Json(paging.apply(schemas)))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub record_type: Uuid,
  pub schema:      Value,
}

/// `POST /recordschemas` — appends a new version to the record type's chain.
pub async fn create<S>(
  State(store): State<Arc<S>>,
  body: Result<Json<CreateBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
  S: SchemaStore,
{
  let Json(body) = body?;
  let schema = store
    .create_schema(body.record_type, body.schema)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(schema)))
}

/// `GET /recordschemas/{id}`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<RecordSchema>, ApiError>
where
  S: SchemaStore,
{
  let schema = store
    .get_schema(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("record schema {id} not found")))?;
  Ok(Json(schema))
}

//! Handlers for `/recordtypes` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/recordtypes` | Optional `limit` / `offset` |
//! | `POST` | `/recordtypes` | Body: [`NewRecordType`]; returns 201 |
//! | `GET`  | `/recordtypes/{id}` | 404 if not found |
//! | `GET`  | `/recordtypes/{id}/recent_counts` | Trailing 30/90/365 day counts |

use std::sync::Arc;

use ashlar_core::{
  aggregate::RecentCounts,
  record_type::{NewRecordType, RecordType},
  store::{QueryEngine, RecordTypeStore},
};
use axum::{
  Json,
  extract::{Path, Query, State, rejection::JsonRejection},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
  error::ApiError,
  listing::{Listing, Params, Paging},
};

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /recordtypes[?limit=..][&offset=..]`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<Params>,
) -> Result<Json<Listing<RecordType>>, ApiError>
where
  S: RecordTypeStore,
{
  let paging = Paging::from_params(&params)?;
  let record_types = store.list_record_types().await.map_err(ApiError::store)?;
  Ok(Json(paging.apply(record_types)))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /recordtypes` — body: `{"label":"Incident","plural_label":"Incidents"}`
pub async fn create<S>(
  State(store): State<Arc<S>>,
  body: Result<Json<NewRecordType>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
  S: RecordTypeStore,
{
  let Json(body) = body?;
  let record_type = store
    .create_record_type(body)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(record_type)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /recordtypes/{id}`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<RecordType>, ApiError>
where
  S: RecordTypeStore,
{
  let record_type = store
    .get_record_type(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("record type {id} not found")))?;
  Ok(Json(record_type))
}

// ─── Recent counts ────────────────────────────────────────────────────────────

/// `GET /recordtypes/{id}/recent_counts`
pub async fn recent_counts<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<RecentCounts>, ApiError>
where
  S: QueryEngine,
{
  let counts = store
    .recent_counts(id, Utc::now())
    .await
    .map_err(ApiError::store)?;
  Ok(Json(counts))
}

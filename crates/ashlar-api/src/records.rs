//! Handlers for `/records` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/records` | Filter parameters, see [`RecordFilter::from_params`]; `?query` returns the SQL instead |
//! | `POST` | `/records` | Body: `{"record_type":"<uuid>","occurred_from":..,"geom":..,"data":..}`; returns 201 |
//! | `GET`  | `/records/toddow` | Same filters; hour / weekday buckets |
//! | `GET`  | `/records/{id}` | 404 if not found |

use std::sync::Arc;

use ashlar_core::{
  aggregate::ToddowBucket,
  filter::RecordFilter,
  record::Record,
  store::{QueryEngine, RecordRepository},
};
use axum::{
  Json,
  extract::{Path, Query, State, rejection::JsonRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{
  error::ApiError,
  listing::{Listing, Params, pairs},
};

/// Parameter that asks for the composed query rather than its results.
const QUERY_PARAM: &str = "query";

// ─── Query ────────────────────────────────────────────────────────────────────

/// `GET /records[?in_bbox=..][&data__severity=..][&occurred_min=..][&limit=..]`
///
/// With `query` present, responds `{"query": "<sql>"}` and runs nothing.
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<Params>,
) -> Result<Response, ApiError>
where
  S: QueryEngine,
{
  let explain = params.iter().any(|(k, _)| k == QUERY_PARAM);
  let filter = RecordFilter::from_params(pairs(&params).filter(|(k, _)| *k != QUERY_PARAM))?;

  if explain {
    let sql = store.explain_records(&filter).await.map_err(ApiError::store)?;
    return Ok(Json(json!({ "query": sql })).into_response());
  }

  let records = store.query_records(&filter).await.map_err(ApiError::store)?;
  let listing: Listing<Record> = match filter.limit {
    None => Listing::Plain(records),
    Some(_) => Listing::Page {
      count:   store.count_records(&filter).await.map_err(ApiError::store)?,
      results: records,
    },
  };
  Ok(Json(listing).into_response())
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// Body of `POST /records`: the target record type next to the candidate
/// record fields.
#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub record_type: Uuid,
  #[serde(flatten)]
  pub payload:     Map<String, Value>,
}

/// `POST /records` — validated against the record type's current schema.
pub async fn create<S>(
  State(store): State<Arc<S>>,
  body: Result<Json<CreateBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
  S: RecordRepository,
{
  let Json(body) = body?;
  let record = store
    .create_record(body.record_type, Value::Object(body.payload))
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(record)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /records/{id}`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Record>, ApiError>
where
  S: RecordRepository,
{
  let record = store
    .get_record(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("record {id} not found")))?;
  Ok(Json(record))
}

// ─── Aggregation ──────────────────────────────────────────────────────────────

/// `GET /records/toddow` — pagination parameters are ignored.
pub async fn toddow<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<Params>,
) -> Result<Json<Vec<ToddowBucket>>, ApiError>
where
  S: QueryEngine,
{
  let filter = RecordFilter::from_params(pairs(&params))?;
  let buckets = store.toddow(&filter).await.map_err(ApiError::store)?;
  Ok(Json(buckets))
}

//! Handlers for `/boundaries` and `/boundarypolygons` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/boundaries` | Optional `limit` / `offset` |
//! | `POST`   | `/boundaries` | Body: [`NewBoundary`]; 201, or 409 on a duplicate label |
//! | `GET`    | `/boundaries/{id}` | 404 if not found |
//! | `DELETE` | `/boundaries/{id}` | 204; removes its polygons too |
//! | `GET`    | `/boundaries/{id}/geojson` | FeatureCollection of every polygon |
//! | `GET`    | `/boundarypolygons` | `boundary`, `in_bbox`, `data__..` filters; `limit` / `offset` |

use std::sync::Arc;

use ashlar_core::{
  boundary::{Boundary, BoundaryPolygon, NewBoundary},
  filter::PolygonFilter,
  store::BoundaryEngine,
};
use axum::{
  Json,
  extract::{Path, Query, State, rejection::JsonRejection},
  http::StatusCode,
  response::IntoResponse,
};
use geojson::FeatureCollection;
use uuid::Uuid;

use crate::{
  error::ApiError,
  listing::{Listing, Params, Paging, pairs},
};

// ─── Boundaries ───────────────────────────────────────────────────────────────

/// `GET /boundaries`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<Params>,
) -> Result<Json<Listing<Boundary>>, ApiError>
where
  S: BoundaryEngine,
{
  let paging = Paging::from_params(&params)?;
  let boundaries = store.list_boundaries().await.map_err(ApiError::store)?;
  Ok(Json(paging.apply(boundaries)))
}

/// `POST /boundaries`
pub async fn create<S>(
  State(store): State<Arc<S>>,
  body: Result<Json<NewBoundary>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
  S: BoundaryEngine,
{
  let Json(body) = body?;
  let boundary = store.create_boundary(body).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(boundary)))
}

/// `GET /boundaries/{id}`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Boundary>, ApiError>
where
  S: BoundaryEngine,
{
  let boundary = store
    .get_boundary(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("boundary {id} not found")))?;
  Ok(Json(boundary))
}

/// `DELETE /boundaries/{id}`
pub async fn delete_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: BoundaryEngine,
{
  store.delete_boundary(id).await.map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

/// `GET /boundaries/{id}/geojson`
pub async fn geojson<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<FeatureCollection>, ApiError>
where
  S: BoundaryEngine,
{
  let collection = store.export_geojson(id).await.map_err(ApiError::store)?;
  Ok(Json(collection))
}

// ─── Polygons ─────────────────────────────────────────────────────────────────

/// `GET /boundarypolygons[?boundary=..][&in_bbox=..][&data__name=..][&limit=..]`
pub async fn list_polygons<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<Params>,
) -> Result<Json<Listing<BoundaryPolygon>>, ApiError>
where
  S: BoundaryEngine,
{
  let filter = PolygonFilter::from_params(pairs(&params))?;
  let polygons = store.list_polygons(&filter).await.map_err(ApiError::store)?;
  let listing = match filter.limit {
    None => Listing::Plain(polygons),
    Some(_) => Listing::Page {
      count:   store.count_polygons(&filter).await.map_err(ApiError::store)?,
      results: polygons,
    },
  };
  Ok(Json(listing))
}

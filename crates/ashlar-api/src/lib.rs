//! JSON REST API for Ashlar.
//!
//! Exposes an axum [`Router`] backed by any [`ashlar_core::store::AshlarStore`].
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", ashlar_api::api_router(store.clone()))
//! ```

pub mod boundaries;
pub mod error;
pub mod listing;
pub mod record_types;
pub mod records;
pub mod schemas;

use std::sync::Arc;

use ashlar_core::store::AshlarStore;
use axum::{Router, routing::get};

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: AshlarStore,
{
  Router::new()
    // Record types
    .route("/recordtypes", get(record_types::list::<S>).post(record_types::create::<S>))
    .route("/recordtypes/{id}", get(record_types::get_one::<S>))
    .route("/recordtypes/{id}/recent_counts", get(record_types::recent_counts::<S>))
    // Schemas
    .route("/recordschemas", get(schemas::list::<S>).post(schemas::create::<S>))
    .route("/recordschemas/{id}", get(schemas::get_one::<S>))
    // Records
    .route("/records", get(records::list::<S>).post(records::create::<S>))
    .route("/records/toddow", get(records::toddow::<S>))
    .route("/records/{id}", get(records::get_one::<S>))
    // Boundaries
    .route("/boundaries", get(boundaries::list::<S>).post(boundaries::create::<S>))
    .route(
      "/boundaries/{id}",
      get(boundaries::get_one::<S>).delete(boundaries::delete_one::<S>),
    )
    .route("/boundaries/{id}/geojson", get(boundaries::geojson::<S>))
    .route("/boundarypolygons", get(boundaries::list_polygons::<S>))
    .with_state(store)
}

#[cfg(test)]
mod tests;

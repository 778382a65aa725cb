//! Repository traits implemented by storage backends.
//!
//! The traits are split per capability so that callers can depend on just
//! what they use; [`AshlarStore`] bundles all of them for the HTTP layer.
//! Backends are injected values (e.g. `ashlar_store_sqlite::SqliteStore`),
//! never global state.

use std::future::Future;

use chrono::{DateTime, Utc};
use geojson::FeatureCollection;
use serde_json::Value;
use uuid::Uuid;

use crate::{
  aggregate::{RecentCounts, ToddowBucket},
  boundary::{Boundary, BoundaryPolygon, NewBoundary},
  error::Error,
  filter::{PolygonFilter, RecordFilter, SchemaFilter},
  geometry::Srid,
  record::Record,
  record_type::{NewRecordType, RecordType},
  schema::RecordSchema,
};

/// Lets callers recover the domain error from a backend error, e.g. to pick
/// an HTTP status without knowing the backend.
pub trait DomainError: std::error::Error + Send + Sync + 'static {
  /// The domain error, if this is one rather than a storage failure.
  fn domain(&self) -> Option<&Error>;
}

/// Common base of every repository trait.
pub trait Store: Send + Sync {
  type Error: DomainError;

  /// The spatial reference all geometries in this store use.
  fn srid(&self) -> Srid;
}

// ─── Record types ────────────────────────────────────────────────────────────

pub trait RecordTypeStore: Store {
  fn create_record_type(
    &self,
    input: NewRecordType,
  ) -> impl Future<Output = Result<RecordType, Self::Error>> + Send + '_;

  /// Returns `None` if not found.
  fn get_record_type(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<RecordType>, Self::Error>> + Send + '_;

  /// All record types ordered by `plural_label`.
  fn list_record_types(
    &self,
  ) -> impl Future<Output = Result<Vec<RecordType>, Self::Error>> + Send + '_;
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

/// Immutable schema documents linked into one version chain per record
/// type. There is no update or delete.
pub trait SchemaStore: Store {
  /// Compile `document`, then append it as the next version of
  /// `record_type`'s chain and link the previous head to it, atomically.
  ///
  /// Fails with [`Error::SchemaCompile`] before writing anything if the
  /// document is malformed, [`Error::RecordTypeNotFound`] if the type does
  /// not exist and [`Error::ChainIntegrity`] if the stored chain is broken.
  fn create_schema(
    &self,
    record_type: Uuid,
    document: Value,
  ) -> impl Future<Output = Result<RecordSchema, Self::Error>> + Send + '_;

  /// The head of the chain; [`Error::NoCurrentSchema`] if there is none yet.
  fn current_schema(
    &self,
    record_type: Uuid,
  ) -> impl Future<Output = Result<RecordSchema, Self::Error>> + Send + '_;

  /// [`Error::SchemaVersionNotFound`] if the version does not exist.
  fn schema_version(
    &self,
    record_type: Uuid,
    version: u32,
  ) -> impl Future<Output = Result<RecordSchema, Self::Error>> + Send + '_;

  fn get_schema(
    &self,
    schema_id: Uuid,
  ) -> impl Future<Output = Result<Option<RecordSchema>, Self::Error>> + Send + '_;

  /// Schemas ordered by record type, then version.
  fn list_schemas<'a>(
    &'a self,
    filter: &'a SchemaFilter,
  ) -> impl Future<Output = Result<Vec<RecordSchema>, Self::Error>> + Send + 'a;
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Append-only record storage.
pub trait RecordRepository: Store {
  /// Validate `payload` against the current schema of `record_type` and
  /// store it bound to that schema version.
  ///
  /// Fails with [`Error::Validation`] carrying every violation, writing
  /// nothing, if the payload is invalid.
  fn create_record(
    &self,
    record_type: Uuid,
    payload: Value,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + '_;

  fn get_record(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + '_;

  fn query_records<'a>(
    &'a self,
    filter: &'a RecordFilter,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  /// Number of matching records, ignoring the filter's limit and offset.
  fn count_records<'a>(
    &'a self,
    filter: &'a RecordFilter,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}

/// Introspection and aggregation over record filters.
pub trait QueryEngine: RecordRepository {
  /// The query `query_records` would run, with parameters rendered as
  /// escaped literals. Never executes it.
  fn explain_records<'a>(
    &'a self,
    filter: &'a RecordFilter,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'a;

  /// Time-of-day / day-of-week counts of the matching records. See
  /// [`crate::aggregate::toddow`].
  fn toddow<'a>(
    &'a self,
    filter: &'a RecordFilter,
  ) -> impl Future<Output = Result<Vec<ToddowBucket>, Self::Error>> + Send + 'a;

  /// Trailing 30/90/365 day counts across every schema version of
  /// `record_type`. [`Error::RecordTypeNotFound`] if it does not exist.
  fn recent_counts(
    &self,
    record_type: Uuid,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<RecentCounts, Self::Error>> + Send + '_;
}

// ─── Boundaries ──────────────────────────────────────────────────────────────

pub trait BoundaryEngine: Store {
  /// Validate the polygons and store the boundary with them in one
  /// transaction. A duplicate label fails with [`Error::Conflict`].
  fn create_boundary(
    &self,
    input: NewBoundary,
  ) -> impl Future<Output = Result<Boundary, Self::Error>> + Send + '_;

  fn get_boundary(
    &self,
    boundary_id: Uuid,
  ) -> impl Future<Output = Result<Option<Boundary>, Self::Error>> + Send + '_;

  /// Ordered by `display_field`, then label.
  fn list_boundaries(
    &self,
  ) -> impl Future<Output = Result<Vec<Boundary>, Self::Error>> + Send + '_;

  /// Remove a boundary and its polygons.
  fn delete_boundary(
    &self,
    boundary_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_polygons<'a>(
    &'a self,
    filter: &'a PolygonFilter,
  ) -> impl Future<Output = Result<Vec<BoundaryPolygon>, Self::Error>> + Send + 'a;

  fn count_polygons<'a>(
    &'a self,
    filter: &'a PolygonFilter,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Every polygon of the boundary as a FeatureCollection, fully
  /// materialised.
  fn export_geojson(
    &self,
    boundary_id: Uuid,
  ) -> impl Future<Output = Result<FeatureCollection, Self::Error>> + Send + '_;
}

/// Everything the HTTP layer needs.
pub trait AshlarStore:
  RecordTypeStore + SchemaStore + QueryEngine + BoundaryEngine + 'static
{
}

impl<T> AshlarStore for T where
  T: RecordTypeStore + SchemaStore + QueryEngine + BoundaryEngine + 'static
{
}

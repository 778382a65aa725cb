//! Records — the geotemporal events themselves.
//!
//! A record is written once, after validation, and never updated. It stays
//! bound to the exact schema version it was validated against, so later
//! schema versions cannot reinterpret it.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::point_geojson;

/// A stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub record_id:      Uuid,
  pub record_type_id: Uuid,
  /// The schema version that was current when the record was created.
  pub schema_id:      Uuid,
  pub occurred_from:  DateTime<Utc>,
  pub occurred_to:    Option<DateTime<Utc>>,
  /// Location in the store's SRID, exchanged as a GeoJSON Point.
  #[serde(with = "point_geojson")]
  pub geom:           Point,
  pub data:           serde_json::Value,
  /// Server-assigned; never changes after creation.
  pub created_at:     DateTime<Utc>,
}

/// A candidate record that has passed validation.
///
/// Only produced by [`crate::validator::ValidationResult::into_record`]; the
/// store stamps the ids and `created_at` on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
  pub occurred_from: DateTime<Utc>,
  pub occurred_to:   Option<DateTime<Utc>>,
  pub geom:          Point,
  pub data:          serde_json::Value,
}

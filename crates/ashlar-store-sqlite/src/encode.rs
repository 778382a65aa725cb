//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 UTC strings with millisecond precision, so text
//! order is chronological order. JSON documents are stored as compact JSON.
//! UUIDs are stored as hyphenated lowercase strings.

use ashlar_core::{
  boundary::{Boundary, BoundaryPolygon},
  geometry::polygon_geojson,
  record::Record,
  record_type::RecordType,
  schema::RecordSchema,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use geo::Point;
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>> { s.map(decode_uuid).transpose() }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Millis, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

/// The current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(3) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `record_types` row.
pub struct RawRecordType {
  pub record_type_id: String,
  pub label:          String,
  pub plural_label:   String,
  pub description:    Option<String>,
  pub active:         bool,
  pub created_at:     String,
}

impl RawRecordType {
  pub const COLUMNS: &'static str =
    "record_type_id, label, plural_label, description, active, created_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_type_id: row.get(0)?,
      label:          row.get(1)?,
      plural_label:   row.get(2)?,
      description:    row.get(3)?,
      active:         row.get(4)?,
      created_at:     row.get(5)?,
    })
  }

  pub fn into_record_type(self) -> Result<RecordType> {
    Ok(RecordType {
      record_type_id: decode_uuid(&self.record_type_id)?,
      label:          self.label,
      plural_label:   self.plural_label,
      description:    self.description,
      active:         self.active,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values of a `record_schemas` row plus its derived predecessor, in the
/// order of [`crate::sql::SCHEMA_COLUMNS`].
pub struct RawSchema {
  pub schema_id:           String,
  pub record_type_id:      String,
  pub version:             u32,
  pub schema_json:         String,
  pub created_at:          String,
  pub next_version_id:     Option<String>,
  pub previous_version_id: Option<String>,
}

impl RawSchema {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      schema_id:           row.get(0)?,
      record_type_id:      row.get(1)?,
      version:             row.get(2)?,
      schema_json:         row.get(3)?,
      created_at:          row.get(4)?,
      next_version_id:     row.get(5)?,
      previous_version_id: row.get(6)?,
    })
  }

  pub fn into_schema(self) -> Result<RecordSchema> {
    Ok(RecordSchema {
      schema_id:        decode_uuid(&self.schema_id)?,
      record_type_id:   decode_uuid(&self.record_type_id)?,
      version:          self.version,
      schema:           serde_json::from_str(&self.schema_json)?,
      created_at:       decode_dt(&self.created_at)?,
      next_version:     decode_opt_uuid(self.next_version_id.as_deref())?,
      previous_version: decode_opt_uuid(self.previous_version_id.as_deref())?,
    })
  }
}

/// Raw values of a `records` row, in the order of
/// [`crate::sql::RECORD_COLUMNS`].
pub struct RawRecord {
  pub record_id:      String,
  pub record_type_id: String,
  pub schema_id:      String,
  pub occurred_from:  String,
  pub occurred_to:    Option<String>,
  pub geom_x:         f64,
  pub geom_y:         f64,
  pub data_json:      String,
  pub created_at:     String,
}

impl RawRecord {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:      row.get(0)?,
      record_type_id: row.get(1)?,
      schema_id:      row.get(2)?,
      occurred_from:  row.get(3)?,
      occurred_to:    row.get(4)?,
      geom_x:         row.get(5)?,
      geom_y:         row.get(6)?,
      data_json:      row.get(7)?,
      created_at:     row.get(8)?,
    })
  }

  pub fn into_record(self) -> Result<Record> {
    Ok(Record {
      record_id:      decode_uuid(&self.record_id)?,
      record_type_id: decode_uuid(&self.record_type_id)?,
      schema_id:      decode_uuid(&self.schema_id)?,
      occurred_from:  decode_dt(&self.occurred_from)?,
      occurred_to:    self.occurred_to.as_deref().map(decode_dt).transpose()?,
      geom:           Point::new(self.geom_x, self.geom_y),
      data:           serde_json::from_str(&self.data_json)?,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawBoundary {
  pub boundary_id:   String,
  pub label:         String,
  pub display_field: Option<String>,
  pub data_json:     String,
  pub created_at:    String,
}

impl RawBoundary {
  pub const COLUMNS: &'static str = "boundary_id, label, display_field, data_json, created_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      boundary_id:   row.get(0)?,
      label:         row.get(1)?,
      display_field: row.get(2)?,
      data_json:     row.get(3)?,
      created_at:    row.get(4)?,
    })
  }

  pub fn into_boundary(self) -> Result<Boundary> {
    Ok(Boundary {
      boundary_id:   decode_uuid(&self.boundary_id)?,
      label:         self.label,
      display_field: self.display_field,
      data:          serde_json::from_str(&self.data_json)?,
      created_at:    decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values of a `boundary_polygons` row, in the order of
/// [`crate::sql::POLYGON_COLUMNS`].
pub struct RawPolygon {
  pub polygon_id:  String,
  pub boundary_id: String,
  pub geom_json:   String,
  pub data_json:   String,
}

impl RawPolygon {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      polygon_id:  row.get(0)?,
      boundary_id: row.get(1)?,
      geom_json:   row.get(2)?,
      data_json:   row.get(3)?,
    })
  }

  pub fn into_polygon(self) -> Result<BoundaryPolygon> {
    let mut geom = serde_json::Deserializer::from_str(&self.geom_json);
    Ok(BoundaryPolygon {
      polygon_id:  decode_uuid(&self.polygon_id)?,
      boundary_id: decode_uuid(&self.boundary_id)?,
      geom:        polygon_geojson::deserialize(&mut geom)?,
      data:        serde_json::from_str(&self.data_json)?,
    })
  }
}

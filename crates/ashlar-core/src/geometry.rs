//! Geometry helpers: spatial reference bounds, GeoJSON parsing and rendering,
//! and bounding boxes.
//!
//! Geometries are exchanged as GeoJSON and held as [`geo`] types. All
//! coordinates are interpreted in the single SRID the process is configured
//! with; no reprojection happens anywhere.

use std::fmt;

use geo::{Coord, Intersects, LineString, Point, Polygon, Rect, coord};
use serde::{Deserialize, Serialize};

/// Half the width of the EPSG:3857 projected world, in metres.
pub const WEB_MERCATOR_LIMIT: f64 = 20_037_508.342_789_244;

// ─── Srid ────────────────────────────────────────────────────────────────────

/// Spatial reference system identifier that governs how coordinates are
/// interpreted. Fixed for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Srid(pub u32);

impl Srid {
  /// Geographic longitude/latitude.
  pub const WGS84: Srid = Srid(4326);
  /// Spherical (web) Mercator.
  pub const WEB_MERCATOR: Srid = Srid(3857);

  /// Check that `(x, y)` is a usable coordinate in this reference system.
  ///
  /// Known systems are bounded to their valid domain; any other SRID only
  /// requires finite values.
  pub fn check(&self, x: f64, y: f64) -> Result<(), String> {
    if !x.is_finite() || !y.is_finite() {
      return Err(format!("coordinates must be finite, got ({x}, {y})"));
    }
    match *self {
      Self::WGS84 => {
        if !(-180.0..=180.0).contains(&x) {
          return Err(format!("longitude out of range [-180, 180]: {x}"));
        }
        if !(-90.0..=90.0).contains(&y) {
          return Err(format!("latitude out of range [-90, 90]: {y}"));
        }
      }
      Self::WEB_MERCATOR => {
        if x.abs() > WEB_MERCATOR_LIMIT || y.abs() > WEB_MERCATOR_LIMIT {
          return Err(format!(
            "coordinate ({x}, {y}) is outside the EPSG:3857 extent"
          ));
        }
      }
      _ => {}
    }
    Ok(())
  }
}

impl Default for Srid {
  fn default() -> Self { Self::WEB_MERCATOR }
}

impl fmt::Display for Srid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "EPSG:{}", self.0)
  }
}

// ─── GeoJSON parsing ─────────────────────────────────────────────────────────

fn parse_geometry(value: &serde_json::Value) -> Result<geojson::Value, String> {
  serde_json::from_value::<geojson::Geometry>(value.clone())
    .map(|g| g.value)
    .map_err(|e| format!("not a GeoJSON geometry: {e}"))
}

fn kind(value: &geojson::Value) -> &'static str {
  match value {
    geojson::Value::Point(_) => "Point",
    geojson::Value::MultiPoint(_) => "MultiPoint",
    geojson::Value::LineString(_) => "LineString",
    geojson::Value::MultiLineString(_) => "MultiLineString",
    geojson::Value::Polygon(_) => "Polygon",
    geojson::Value::MultiPolygon(_) => "MultiPolygon",
    geojson::Value::GeometryCollection(_) => "GeometryCollection",
  }
}

fn position_to_coord(position: &[f64]) -> Result<Coord, String> {
  match position {
    [x, y] | [x, y, _] => Ok(coord! { x: *x, y: *y }),
    other => Err(format!(
      "a position needs 2 or 3 numbers, found {}",
      other.len()
    )),
  }
}

/// Parse a GeoJSON Point and check it against `srid`.
pub fn point_from_geojson(
  value: &serde_json::Value,
  srid: Srid,
) -> Result<Point, String> {
  let point = point_from_geometry(parse_geometry(value)?)?;
  srid.check(point.x(), point.y())?;
  Ok(point)
}

fn point_from_geometry(value: geojson::Value) -> Result<Point, String> {
  match value {
    geojson::Value::Point(position) => Ok(Point::from(position_to_coord(&position)?)),
    other => Err(format!("expected a Point, found {}", kind(&other))),
  }
}

/// Parse a GeoJSON Polygon and check every ring against `srid`.
///
/// Each ring must be closed and hold at least four positions.
pub fn polygon_from_geojson(
  value: &serde_json::Value,
  srid: Srid,
) -> Result<Polygon, String> {
  let polygon = polygon_from_geometry(parse_geometry(value)?)?;
  for c in polygon
    .exterior()
    .coords()
    .chain(polygon.interiors().iter().flat_map(|r| r.coords()))
  {
    srid.check(c.x, c.y)?;
  }
  Ok(polygon)
}

fn polygon_from_geometry(value: geojson::Value) -> Result<Polygon, String> {
  let rings = match value {
    geojson::Value::Polygon(rings) => rings,
    other => {
      return Err(format!("expected a Polygon, found {}", kind(&other)));
    }
  };
  if rings.is_empty() {
    return Err("a polygon needs an exterior ring".to_owned());
  }

  let mut parsed = Vec::with_capacity(rings.len());
  for (idx, ring) in rings.iter().enumerate() {
    let coords = ring
      .iter()
      .map(|p| position_to_coord(p))
      .collect::<Result<Vec<_>, _>>()?;
    if coords.len() < 4 {
      return Err(format!(
        "ring {idx} needs at least 4 positions, found {}",
        coords.len()
      ));
    }
    if coords.first() != coords.last() {
      return Err(format!("ring {idx} is not closed"));
    }
    parsed.push(LineString::new(coords));
  }

  let exterior = parsed.remove(0);
  Ok(Polygon::new(exterior, parsed))
}

// ─── GeoJSON rendering ───────────────────────────────────────────────────────

fn ring_positions(ring: &LineString) -> Vec<Vec<f64>> {
  ring.coords().map(|c| vec![c.x, c.y]).collect()
}

pub fn point_geometry(point: &Point) -> geojson::Geometry {
  geojson::Geometry::new(geojson::Value::Point(vec![point.x(), point.y()]))
}

pub fn polygon_geometry(polygon: &Polygon) -> geojson::Geometry {
  let mut rings = vec![ring_positions(polygon.exterior())];
  rings.extend(polygon.interiors().iter().map(ring_positions));
  geojson::Geometry::new(geojson::Value::Polygon(rings))
}

/// `#[serde(with = "...")]` adapter storing a [`Point`] as GeoJSON.
pub mod point_geojson {
  use geo::Point;
  use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

  pub fn serialize<S: Serializer>(point: &Point, s: S) -> Result<S::Ok, S::Error> {
    super::point_geometry(point).serialize(s)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Point, D::Error> {
    let geometry = geojson::Geometry::deserialize(d)?;
    super::point_from_geometry(geometry.value).map_err(D::Error::custom)
  }
}

/// `#[serde(with = "...")]` adapter storing a [`Polygon`] as GeoJSON.
pub mod polygon_geojson {
  use geo::Polygon;
  use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

  pub fn serialize<S: Serializer>(polygon: &Polygon, s: S) -> Result<S::Ok, S::Error> {
    super::polygon_geometry(polygon).serialize(s)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Polygon, D::Error> {
    let geometry = geojson::Geometry::deserialize(d)?;
    super::polygon_from_geometry(geometry.value).map_err(D::Error::custom)
  }
}

// ─── Bounding boxes ──────────────────────────────────────────────────────────

/// An axis-aligned rectangle in the store's SRID, boundary inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  rect: Rect,
}

impl BoundingBox {
  /// Corners may be given in any order; they are normalised.
  pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
    Self {
      rect: Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }),
    }
  }

  /// Parse the `minx,miny,maxx,maxy` form used by the `in_bbox` parameter.
  pub fn parse(s: &str) -> Result<Self, String> {
    let parts = s
      .split(',')
      .map(|p| p.trim().parse::<f64>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| format!("bounding box {s:?} is not numeric: {e}"))?;
    match parts[..] {
      [min_x, min_y, max_x, max_y]
        if parts.iter().all(|v| v.is_finite()) =>
      {
        Ok(Self::new(min_x, min_y, max_x, max_y))
      }
      _ => Err(format!(
        "bounding box {s:?} must be four finite numbers minx,miny,maxx,maxy"
      )),
    }
  }

  /// The smallest box enclosing `polygon`'s exterior ring.
  pub fn envelope(polygon: &Polygon) -> Self {
    let mut coords = polygon.exterior().coords();
    let Some(first) = coords.next() else {
      return Self::new(0.0, 0.0, 0.0, 0.0);
    };
    let (mut min, mut max) = (*first, *first);
    for c in coords {
      min.x = min.x.min(c.x);
      min.y = min.y.min(c.y);
      max.x = max.x.max(c.x);
      max.y = max.y.max(c.y);
    }
    Self { rect: Rect::new(min, max) }
  }

  pub fn min_x(&self) -> f64 { self.rect.min().x }

  pub fn min_y(&self) -> f64 { self.rect.min().y }

  pub fn max_x(&self) -> f64 { self.rect.max().x }

  pub fn max_y(&self) -> f64 { self.rect.max().y }

  pub fn contains_point(&self, point: &Point) -> bool {
    (self.min_x()..=self.max_x()).contains(&point.x())
      && (self.min_y()..=self.max_y()).contains(&point.y())
  }

  pub fn intersects_polygon(&self, polygon: &Polygon) -> bool {
    polygon.intersects(&self.rect.to_polygon())
  }
}

impl fmt::Display for BoundingBox {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{},{},{},{}",
      self.min_x(),
      self.min_y(),
      self.max_x(),
      self.max_y()
    )
  }
}

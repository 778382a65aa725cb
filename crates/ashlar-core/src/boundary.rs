//! Boundaries: named geographic areas made of polygons.

use chrono::{DateTime, Utc};
use geo::Polygon;
use geojson::{Feature, FeatureCollection, JsonObject, feature::Id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  Error, Result, Violation,
  geometry::{Srid, polygon_from_geojson, polygon_geojson, polygon_geometry},
};

/// A named area (district, ward, ...). `label` is unique per store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
  pub boundary_id:   Uuid,
  pub label:         String,
  /// Name of the `data` attribute used to caption polygons.
  pub display_field: Option<String>,
  pub data:          Value,
  pub created_at:    DateTime<Utc>,
}

/// One polygon of a [`Boundary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryPolygon {
  pub polygon_id:  Uuid,
  pub boundary_id: Uuid,
  #[serde(with = "polygon_geojson")]
  pub geom:        Polygon,
  pub data:        Value,
}

fn empty_object() -> Value { Value::Object(Default::default()) }

/// Input to [`crate::store::BoundaryEngine::create_boundary`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewBoundary {
  pub label:         String,
  #[serde(default)]
  pub display_field: Option<String>,
  #[serde(default = "empty_object")]
  pub data:          Value,
  #[serde(default)]
  pub polygons:      Vec<NewPolygon>,
}

/// A polygon as submitted: GeoJSON geometry plus attributes.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPolygon {
  pub geom: Value,
  #[serde(default = "empty_object")]
  pub data: Value,
}

impl NewBoundary {
  /// Check the label and parse every polygon in `srid`.
  ///
  /// Returns the parsed polygons in submission order, or
  /// [`Error::Validation`] with one violation per bad field.
  pub fn validate(&self, srid: Srid) -> Result<Vec<Polygon>> {
    let mut violations = Vec::new();
    if self.label.trim().is_empty() {
      violations.push(Violation::new("/label", "must not be empty"));
    }

    let mut polygons = Vec::with_capacity(self.polygons.len());
    for (i, polygon) in self.polygons.iter().enumerate() {
      match polygon_from_geojson(&polygon.geom, srid) {
        Ok(p) => polygons.push(p),
        Err(reason) => violations.push(Violation::new(format!("/polygons/{i}/geom"), reason)),
      }
    }

    if violations.is_empty() {
      Ok(polygons)
    } else {
      Err(Error::Validation(violations))
    }
  }
}

/// Render polygons as a GeoJSON FeatureCollection. Object `data` becomes the
/// feature properties; any other non-null value is wrapped as `{"data": ..}`.
pub fn feature_collection(polygons: &[BoundaryPolygon]) -> FeatureCollection {
  let features = polygons
    .iter()
    .map(|polygon| Feature {
      bbox:            None,
      geometry:        Some(polygon_geometry(&polygon.geom)),
      id:              Some(Id::String(polygon.polygon_id.to_string())),
      properties:      properties(&polygon.data),
      foreign_members: None,
    })
    .collect();
  FeatureCollection {
    bbox: None,
    features,
    foreign_members: None,
  }
}

fn properties(data: &Value) -> Option<JsonObject> {
  match data {
    Value::Object(map) => Some(map.clone()),
    Value::Null => None,
    other => {
      let mut map = JsonObject::new();
      map.insert("data".to_owned(), other.clone());
      Some(map)
    }
  }
}

#[cfg(test)]
mod tests {
  use geo::polygon;
  use serde_json::json;

  use super::*;

  fn square() -> Value {
    json!({ "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]] })
  }

  #[test]
  fn reports_bad_polygons_by_index() {
    let input: NewBoundary = serde_json::from_value(json!({
      "label": "Wards",
      "polygons": [
        { "geom": square() },
        { "geom": { "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [0, 0]]] } },
        { "geom": { "type": "Point", "coordinates": [0, 0] } }
      ]
    }))
    .unwrap();
    let Err(Error::Validation(v)) = input.validate(Srid::WGS84) else {
      panic!("expected a validation error");
    };
    let paths: Vec<_> = v.iter().map(|v| v.path.as_str()).collect();
    assert_eq!(paths, ["/polygons/1/geom", "/polygons/2/geom"]);
  }

  #[test]
  fn accepts_valid_input_with_defaults() {
    let input: NewBoundary = serde_json::from_value(json!({
      "label": "Wards",
      "polygons": [{ "geom": square(), "data": { "name": "Ward 1" } }]
    }))
    .unwrap();
    assert_eq!(input.data, json!({}));
    assert_eq!(input.validate(Srid::WGS84).unwrap().len(), 1);
  }

  #[test]
  fn feature_collection_carries_ids_and_properties() {
    let polygon = BoundaryPolygon {
      polygon_id:  Uuid::new_v4(),
      boundary_id: Uuid::new_v4(),
      geom:        polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
      data:        json!({ "name": "Ward 1" }),
    };
    let fc = feature_collection(std::slice::from_ref(&polygon));
    let rendered = serde_json::to_value(&fc).unwrap();
    assert_eq!(rendered["type"], "FeatureCollection");
    let feature = &rendered["features"][0];
    assert_eq!(feature["id"], json!(polygon.polygon_id.to_string()));
    assert_eq!(feature["properties"]["name"], "Ward 1");
    assert_eq!(feature["geometry"]["type"], "Polygon");
  }
}

//! Router tests against an in-memory SQLite store.

use std::sync::Arc;

use ashlar_core::geometry::Srid;
use ashlar_store_sqlite::SqliteStore;
use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use super::api_router;

async fn app() -> Router {
  let store = SqliteStore::open_in_memory(Srid::WGS84).await.unwrap();
  api_router(Arc::new(store))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let mut builder = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(json) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };
  let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let value = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, value)
}

/// A record type with one schema; returns the record type id.
async fn incident_type(app: &Router) -> String {
  let (status, rt) = call(
    app,
    "POST",
    "/recordtypes",
    Some(json!({ "label": "Incident", "plural_label": "Incidents" })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  let id = rt["record_type_id"].as_str().unwrap().to_owned();

  let (status, _) = call(
    app,
    "POST",
    "/recordschemas",
    Some(json!({
      "record_type": id,
      "schema": {
        "type": "object",
        "properties": { "severity": { "enum": ["minor", "major"] } },
        "required": ["severity"]
      }
    })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  id
}

fn record(record_type: &str, at: &str, severity: &str) -> Value {
  json!({
    "record_type": record_type,
    "occurred_from": at,
    "geom": { "type": "Point", "coordinates": [1.0, 2.0] },
    "data": { "severity": severity }
  })
}

// ── Record types & schemas ─────────────────────────────────────────────────

#[tokio::test]
async fn record_type_lifecycle() {
  let app = app().await;
  let id = incident_type(&app).await;

  let (status, body) = call(&app, "GET", &format!("/recordtypes/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["label"], "Incident");

  let (status, body) = call(&app, "GET", "/recordtypes", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body.as_array().unwrap().len(), 1);

  let (status, body) = call(&app, "GET", &format!("/recordtypes/{id}/recent_counts"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "month": 0, "quarter": 0, "year": 0 }));

  let missing = uuid::Uuid::new_v4();
  let (status, _) = call(&app, "GET", &format!("/recordtypes/{missing}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_labels_are_rejected_with_violations() {
  let app = app().await;
  let (status, body) = call(
    &app,
    "POST",
    "/recordtypes",
    Some(json!({ "label": " ", "plural_label": "Incidents" })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["violations"][0]["path"], "/label");
}

#[tokio::test]
async fn schema_versions_and_compile_errors() {
  let app = app().await;
  let id = incident_type(&app).await;

  let (status, body) = call(
    &app,
    "POST",
    "/recordschemas",
    Some(json!({ "record_type": id, "schema": { "type": "object", "properties": [] } })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["violations"][0]["path"], "/properties");

  let (status, v2) = call(
    &app,
    "POST",
    "/recordschemas",
    Some(json!({ "record_type": id, "schema": { "type": "object", "title": "v2" } })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(v2["version"], 2);

  let (_, listed) = call(&app, "GET", &format!("/recordschemas?record_type={id}"), None).await;
  let listed = listed.as_array().unwrap();
  assert_eq!(listed.len(), 2);
  assert_eq!(listed[0]["next_version"], v2["schema_id"]);
  assert_eq!(listed[1]["previous_version"], listed[0]["schema_id"]);

  let (_, filtered) = call(&app, "GET", "/recordschemas?schema__title=v2", None).await;
  assert_eq!(filtered.as_array().unwrap().len(), 1);

  let schema_id = v2["schema_id"].as_str().unwrap();
  let (status, fetched) = call(&app, "GET", &format!("/recordschemas/{schema_id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(fetched, v2);
}

// ── Records ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_records_return_every_violation() {
  let app = app().await;
  let id = incident_type(&app).await;
  let (status, body) = call(
    &app,
    "POST",
    "/records",
    Some(json!({
      "record_type": id,
      "occurred_from": "not a date",
      "geom": { "type": "Point", "coordinates": [500.0, 0.0] },
      "data": {}
    })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  let paths: Vec<_> = body["violations"]
    .as_array()
    .unwrap()
    .iter()
    .map(|v| v["path"].as_str().unwrap().to_owned())
    .collect();
  assert_eq!(paths, ["/occurred_from", "/geom", "/data/severity"]);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
  let app = app().await;
  let (status, body) = call(&app, "POST", "/records", Some(json!({ "record_type": "nope" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].is_string());
}

#[tokio::test]
async fn records_query_paginate_and_explain() {
  let app = app().await;
  let id = incident_type(&app).await;
  for (at, severity) in [
    ("2015-04-27T00:10:00Z", "major"),
    ("2015-04-27T00:40:00Z", "minor"),
    ("2015-04-30T13:00:00Z", "major"),
  ] {
    let (status, _) = call(&app, "POST", "/records", Some(record(&id, at, severity))).await;
    assert_eq!(status, StatusCode::CREATED);
  }

  let (_, plain) = call(&app, "GET", "/records?data__severity=major", None).await;
  assert_eq!(plain.as_array().unwrap().len(), 2);

  let (_, page) = call(&app, "GET", "/records?ordering=-occurred_from&limit=1", None).await;
  assert_eq!(page["count"], 3);
  assert_eq!(page["results"][0]["occurred_from"], "2015-04-30T13:00:00Z");

  let record_id = page["results"][0]["record_id"].as_str().unwrap();
  let (status, fetched) = call(&app, "GET", &format!("/records/{record_id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(fetched, page["results"][0]);

  let (status, explained) = call(&app, "GET", "/records?query&data__severity=major", None).await;
  assert_eq!(status, StatusCode::OK);
  let sql = explained["query"].as_str().unwrap();
  assert!(sql.contains("'major'"), "{sql}");

  let (_, toddow) = call(&app, "GET", "/records/toddow?limit=1", None).await;
  assert_eq!(toddow, json!([
    { "tod": 0, "dow": 2, "count": 2 },
    { "tod": 13, "dow": 5, "count": 1 },
  ]));

  let (_, counts) = call(&app, "GET", &format!("/recordtypes/{id}/recent_counts"), None).await;
  assert_eq!(counts["year"], 0);
}

#[tokio::test]
async fn bad_filters_are_bad_requests() {
  let app = app().await;
  for uri in ["/records?in_bbox=1,2,3", "/records?ordering=label", "/boundarypolygons?limit=x"] {
    let (status, body) = call(&app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    assert!(body["error"].is_string(), "{uri}");
  }
}

// ── Boundaries ────────────────────────────────────────────────────────────

fn wards() -> Value {
  json!({
    "label": "Wards",
    "display_field": "name",
    "polygons": [{
      "geom": {
        "type": "Polygon",
        "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]
      },
      "data": { "name": "Ward 1" }
    }]
  })
}

#[tokio::test]
async fn boundary_lifecycle() {
  let app = app().await;
  let (status, boundary) = call(&app, "POST", "/boundaries", Some(wards())).await;
  assert_eq!(status, StatusCode::CREATED);
  let id = boundary["boundary_id"].as_str().unwrap().to_owned();

  let (status, body) = call(&app, "POST", "/boundaries", Some(wards())).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body, json!({ "error": "uniqueness constraint violation" }));

  let (_, listed) = call(&app, "GET", "/boundaries?limit=10", None).await;
  assert_eq!(listed["count"], 1);

  let (_, polygons) = call(&app, "GET", "/boundarypolygons?in_bbox=0.5,0.5,3,3", None).await;
  assert_eq!(polygons[0]["data"]["name"], "Ward 1");
  assert_eq!(polygons[0]["geom"]["type"], "Polygon");

  let (status, fc) = call(&app, "GET", &format!("/boundaries/{id}/geojson"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(fc["type"], "FeatureCollection");
  assert_eq!(fc["features"][0]["properties"]["name"], "Ward 1");

  let (status, _) = call(&app, "DELETE", &format!("/boundaries/{id}"), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = call(&app, "GET", &format!("/boundaries/{id}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = call(&app, "DELETE", &format!("/boundaries/{id}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

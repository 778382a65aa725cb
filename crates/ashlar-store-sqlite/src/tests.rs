//! Integration tests for `SqliteStore` against in-memory and temporary-file
//! databases.

use ashlar_core::{
  Error as CoreError,
  aggregate::{RecentCounts, ToddowBucket},
  boundary::NewBoundary,
  filter::{PolygonFilter, RecordFilter, SchemaFilter},
  geometry::Srid,
  record_type::NewRecordType,
  schema::check_chain,
  store::{BoundaryEngine, DomainError, QueryEngine, RecordRepository, RecordTypeStore, SchemaStore},
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory(Srid::WGS84)
    .await
    .expect("in-memory store")
}

fn core(err: &Error) -> &CoreError { err.domain().expect("domain error") }

fn incident_schema(extra: &str) -> Value {
  let mut properties = json!({
    "severity": { "type": "string", "enum": ["minor", "major", "fatal"] },
    "vehicles": { "type": "integer", "minimum": 0 }
  });
  if !extra.is_empty() {
    properties[extra] = json!({ "type": "string" });
  }
  json!({
    "type": "object",
    "properties": properties,
    "required": ["severity"]
  })
}

fn payload(at: &str, x: f64, y: f64, data: Value) -> Value {
  json!({
    "occurred_from": at,
    "geom": { "type": "Point", "coordinates": [x, y] },
    "data": data
  })
}

async fn incident_type(s: &SqliteStore) -> Uuid {
  let rt = s
    .create_record_type(NewRecordType::new("Incident", "Incidents"))
    .await
    .unwrap();
  s.create_schema(rt.record_type_id, incident_schema("")).await.unwrap();
  rt.record_type_id
}

// ─── Store lifecycle ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reopening_with_another_srid_fails() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("ashlar.sqlite3");
  drop(SqliteStore::open(&path, Srid::WGS84).await.unwrap());

  assert!(SqliteStore::open(&path, Srid::WGS84).await.is_ok());
  let err = SqliteStore::open(&path, Srid::WEB_MERCATOR).await.err().unwrap();
  assert!(matches!(err, Error::SridMismatch { stored: Srid(4326), requested: Srid(3857) }));
}

// ─── Record types ────────────────────────────────────────────────────────────

#[tokio::test]
async fn record_types_list_by_plural_label() {
  let s = store().await;
  s.create_record_type(NewRecordType::new("Inspection", "Inspections")).await.unwrap();
  let created = s
    .create_record_type(NewRecordType::new("Crash", "Crashes"))
    .await
    .unwrap();

  let labels: Vec<_> = s
    .list_record_types()
    .await
    .unwrap()
    .into_iter()
    .map(|t| t.plural_label)
    .collect();
  assert_eq!(labels, ["Crashes", "Inspections"]);

  let fetched = s.get_record_type(created.record_type_id).await.unwrap().unwrap();
  assert_eq!(fetched, created);
  assert!(s.get_record_type(Uuid::new_v4()).await.unwrap().is_none());
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sequential_schemas_form_a_chain() {
  let s = store().await;
  let rt = s
    .create_record_type(NewRecordType::new("Incident", "Incidents"))
    .await
    .unwrap()
    .record_type_id;

  for extra in ["", "a", "b", "c"] {
    s.create_schema(rt, incident_schema(extra)).await.unwrap();
  }

  let filter = SchemaFilter {
    record_type: Some(rt),
    ..SchemaFilter::default()
  };
  let chain = s.list_schemas(&filter).await.unwrap();
  assert_eq!(chain.iter().map(|c| c.version).collect::<Vec<_>>(), [1, 2, 3, 4]);
  check_chain(&chain).unwrap();
  assert_eq!(chain[0].previous_version, None);
  assert_eq!(chain[1].previous_version, Some(chain[0].schema_id));
  assert_eq!(chain[2].next_version, Some(chain[3].schema_id));

  let current = s.current_schema(rt).await.unwrap();
  assert_eq!(current.schema_id, chain[3].schema_id);
  assert!(current.is_current());

  let v2 = s.schema_version(rt, 2).await.unwrap();
  assert_eq!(v2, chain[1]);
  assert_eq!(s.get_schema(v2.schema_id).await.unwrap(), Some(v2));
}

#[tokio::test]
async fn schema_errors() {
  let s = store().await;
  let missing = Uuid::new_v4();
  let err = s.create_schema(missing, incident_schema("")).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::RecordTypeNotFound(id) if *id == missing));

  let rt = s
    .create_record_type(NewRecordType::new("Incident", "Incidents"))
    .await
    .unwrap()
    .record_type_id;
  let err = s.current_schema(rt).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::NoCurrentSchema(_)));
  assert!(core(&err).is_not_found());

  let err = s.create_schema(rt, json!({ "type": "object", "properties": 3 })).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::SchemaCompile(v) if v[0].path == "/properties"));
  assert!(s.list_schemas(&SchemaFilter::default()).await.unwrap().is_empty());

  s.create_schema(rt, incident_schema("")).await.unwrap();
  let err = s.schema_version(rt, 2).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::SchemaVersionNotFound { version: 2, .. }));
}

#[tokio::test]
async fn list_schemas_filters_on_the_document() {
  let s = store().await;
  let rt = incident_type(&s).await;
  s.create_schema(rt, incident_schema("weather")).await.unwrap();

  let filter = SchemaFilter::from_params([("schema__properties__weather__type", "string")]).unwrap();
  let found = s.list_schemas(&filter).await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].version, 2);
}

#[tokio::test]
async fn stored_schemas_cannot_be_rewritten() {
  let s = store().await;
  let rt = incident_type(&s).await;
  s.create_schema(rt, incident_schema("a")).await.unwrap();

  let results: Vec<bool> = s
    .conn
    .call(|conn| {
      Ok(
        [
          "UPDATE record_schemas SET schema_json = '{}'",
          "UPDATE record_schemas SET next_version_id = NULL WHERE next_version_id IS NOT NULL",
          "DELETE FROM record_schemas",
        ]
        .iter()
        .map(|stmt| conn.execute(stmt, []).is_err())
        .collect(),
      )
    })
    .await
    .unwrap();
  assert_eq!(results, [true, true, true]);
}

#[tokio::test]
async fn concurrent_schema_creation_on_one_handle() {
  let s = store().await;
  let rt = s
    .create_record_type(NewRecordType::new("Incident", "Incidents"))
    .await
    .unwrap()
    .record_type_id;

  let tasks: Vec<_> = (0..8)
    .map(|i| {
      let s = s.clone();
      tokio::spawn(async move { s.create_schema(rt, incident_schema(&format!("f{i}"))).await })
    })
    .collect();
  for task in tasks {
    task.await.unwrap().unwrap();
  }

  let filter = SchemaFilter {
    record_type: Some(rt),
    ..SchemaFilter::default()
  };
  let chain = s.list_schemas(&filter).await.unwrap();
  assert_eq!(chain.len(), 8);
  check_chain(&chain).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_schema_creation_across_handles() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("ashlar.sqlite3");
  let first = SqliteStore::open(&path, Srid::WGS84).await.unwrap();
  let rt = first
    .create_record_type(NewRecordType::new("Incident", "Incidents"))
    .await
    .unwrap()
    .record_type_id;

  let mut handles = vec![first];
  for _ in 0..3 {
    handles.push(SqliteStore::open(&path, Srid::WGS84).await.unwrap());
  }

  let tasks: Vec<_> = handles
    .iter()
    .cloned()
    .flat_map(|s| (0..4).map(move |i| (s.clone(), i)))
    .map(|(s, i)| {
      tokio::spawn(async move { s.create_schema(rt, incident_schema(&format!("f{i}"))).await })
    })
    .collect();
  for task in tasks {
    task.await.unwrap().unwrap();
  }

  let filter = SchemaFilter {
    record_type: Some(rt),
    ..SchemaFilter::default()
  };
  let chain = handles[2].list_schemas(&filter).await.unwrap();
  assert_eq!(chain.len(), 16);
  check_chain(&chain).unwrap();
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn records_stay_bound_to_their_schema_version() {
  let s = store().await;
  let rt = incident_type(&s).await;
  let v1 = s.current_schema(rt).await.unwrap();

  let record = s
    .create_record(rt, payload("2015-04-27T13:00:00Z", 1.0, 2.0, json!({ "severity": "major" })))
    .await
    .unwrap();
  assert_eq!(record.schema_id, v1.schema_id);

  // Version 2 makes a new field mandatory; the old record is untouched.
  let mut stricter = incident_schema("driver");
  stricter["required"] = json!(["severity", "driver"]);
  s.create_schema(rt, stricter).await.unwrap();
  s.create_schema(rt, incident_schema("weather")).await.unwrap();

  let fetched = s.get_record(record.record_id).await.unwrap().unwrap();
  assert_eq!(fetched, record);
  let compiled = ashlar_core::validator::CompiledSchema::compile(
    &s.get_schema(fetched.schema_id).await.unwrap().unwrap().schema,
  )
  .unwrap();
  assert!(compiled.validate_data(&fetched.data, "/data").is_empty());

  let newer = s
    .create_record(rt, payload("2015-04-28T13:00:00Z", 1.0, 2.0, json!({ "severity": "minor" })))
    .await
    .unwrap();
  assert_eq!(newer.schema_id, s.current_schema(rt).await.unwrap().schema_id);
}

#[tokio::test]
async fn invalid_records_write_nothing() {
  let s = store().await;
  let rt = incident_type(&s).await;

  let err = s
    .create_record(rt, payload("2015-04-27T13:00:00Z", 1.0, 2.0, json!({ "vehicles": 2 })))
    .await
    .unwrap_err();
  let CoreError::Validation(violations) = core(&err) else {
    panic!("expected a validation error, got {err}");
  };
  assert_eq!(violations[0].path, "/data/severity");

  let mut backwards = payload("2015-04-27T13:00:00Z", 1.0, 2.0, json!({ "severity": "minor" }));
  backwards["occurred_to"] = json!("2015-04-27T12:00:00Z");
  let err = s.create_record(rt, backwards).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::Validation(v) if v[0].path == "/occurred_to"));

  assert_eq!(s.count_records(&RecordFilter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn records_need_a_current_schema() {
  let s = store().await;
  let rt = s
    .create_record_type(NewRecordType::new("Incident", "Incidents"))
    .await
    .unwrap()
    .record_type_id;
  let err = s
    .create_record(rt, payload("2015-04-27T13:00:00Z", 0.0, 0.0, json!({})))
    .await
    .unwrap_err();
  assert!(matches!(core(&err), CoreError::NoCurrentSchema(_)));
}

/// Records spread over a week with distinct attributes, in insertion order.
async fn seeded() -> (SqliteStore, Uuid) {
  let s = store().await;
  let rt = incident_type(&s).await;
  let rows = [
    // Monday 00:10, Monday 00:50, Thursday 13:00
    ("2015-04-27T00:10:00Z", 1.0, 1.0, json!({ "severity": "major", "vehicles": 2, "note": "Wet Road" })),
    ("2015-05-04T00:50:00Z", 5.0, 5.0, json!({ "severity": "minor", "vehicles": 1, "note": "dry" })),
    ("2015-04-30T13:00:00Z", 20.0, 20.0, json!({ "severity": "fatal", "vehicles": 3 })),
  ];
  for (at, x, y, data) in rows {
    s.create_record(rt, payload(at, x, y, data)).await.unwrap();
  }
  (s, rt)
}

#[tokio::test]
async fn query_records_applies_the_filter_pipeline() {
  let (s, _) = seeded().await;
  let all = s.query_records(&RecordFilter::new()).await.unwrap();
  assert_eq!(all.len(), 3);

  for params in [
    vec![("in_bbox", "0,0,5,5")],
    vec![("data__vehicles__gte", "2")],
    vec![("data__severity__in", "major,fatal")],
    vec![("data__note__icontains", "ROAD")],
    vec![("data__note__contains", "Road")],
    vec![("occurred_min", "2015-04-28"), ("occurred_max", "2015-05-04")],
    vec![("data__vehicles", "2.0")],
    vec![("data__missing", "null")],
    vec![("ordering", "-occurred_from"), ("limit", "2"), ("offset", "1")],
  ] {
    let filter = RecordFilter::from_params(params.iter().copied()).unwrap();
    let from_sql = s.query_records(&filter).await.unwrap();
    assert_eq!(from_sql, filter.apply(all.clone()), "{params:?}");
    assert_eq!(
      s.count_records(&filter).await.unwrap(),
      filter.unpaged().apply(all.clone()).len() as u64,
      "{params:?}"
    );
  }
}

#[tokio::test]
async fn explain_renders_without_touching_data() {
  let (s, rt) = seeded().await;
  let filter = RecordFilter::from_params([("data__note", "it's; DELETE FROM records")]).unwrap();
  let sql = s.explain_records(&filter).await.unwrap();
  assert!(sql.starts_with("SELECT "), "{sql}");
  assert!(sql.contains("'it''s; DELETE FROM records'"), "{sql}");

  let counts = s.count_records(&RecordFilter::new()).await.unwrap();
  assert_eq!(counts, 3);
  assert!(s.current_schema(rt).await.is_ok());
}

#[tokio::test]
async fn toddow_buckets_by_hour_and_weekday() {
  let (s, _) = seeded().await;
  let buckets = s.toddow(&RecordFilter::new()).await.unwrap();
  assert_eq!(buckets, [
    ToddowBucket { tod: 0, dow: 2, count: 2 },
    ToddowBucket { tod: 13, dow: 5, count: 1 },
  ]);

  let all = s.query_records(&RecordFilter::new()).await.unwrap();
  assert_eq!(buckets, ashlar_core::aggregate::toddow(&all));
}

#[tokio::test]
async fn recent_counts_span_schema_versions() {
  let s = store().await;
  let rt = incident_type(&s).await;
  let now = Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap();
  let at = |days: i64| (now - Duration::days(days)).to_rfc3339();

  s.create_record(rt, payload(&at(1), 0.0, 0.0, json!({ "severity": "minor" }))).await.unwrap();
  s.create_record(rt, payload(&at(60), 0.0, 0.0, json!({ "severity": "minor" }))).await.unwrap();
  s.create_schema(rt, incident_schema("weather")).await.unwrap();
  s.create_record(rt, payload(&at(10), 0.0, 0.0, json!({ "severity": "minor" }))).await.unwrap();
  s.create_record(rt, payload(&at(200), 0.0, 0.0, json!({ "severity": "minor" }))).await.unwrap();
  s.create_record(rt, payload(&at(500), 0.0, 0.0, json!({ "severity": "minor" }))).await.unwrap();

  let counts = s.recent_counts(rt, now).await.unwrap();
  assert_eq!(counts, RecentCounts { month: 2, quarter: 3, year: 4 });

  let err = s.recent_counts(Uuid::new_v4(), now).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::RecordTypeNotFound(_)));
}

// ─── Boundaries ──────────────────────────────────────────────────────────────

fn square(x: f64, y: f64, size: f64) -> Value {
  json!({
    "type": "Polygon",
    "coordinates": [[[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]]
  })
}

fn wards(label: &str) -> NewBoundary {
  serde_json::from_value(json!({
    "label": label,
    "display_field": "name",
    "polygons": [
      { "geom": square(0.0, 0.0, 1.0), "data": { "name": "Ward 1" } },
      { "geom": square(10.0, 10.0, 1.0), "data": { "name": "Ward 2" } }
    ]
  }))
  .unwrap()
}

#[tokio::test]
async fn duplicate_boundary_label_conflicts_without_partial_write() {
  let s = store().await;
  let first = s.create_boundary(wards("Wards")).await.unwrap();

  let err = s.create_boundary(wards("Wards")).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::Conflict(_)));

  assert_eq!(s.list_boundaries().await.unwrap(), [first]);
  assert_eq!(s.count_polygons(&PolygonFilter::default()).await.unwrap(), 2);
}

#[tokio::test]
async fn invalid_polygons_are_rejected_by_index() {
  let s = store().await;
  let mut input = wards("Wards");
  input.polygons[1].geom = json!({ "type": "Polygon", "coordinates": [[[0, 0], [1, 1], [0, 0]]] });
  let err = s.create_boundary(input).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::Validation(v) if v[0].path == "/polygons/1/geom"));
  assert!(s.list_boundaries().await.unwrap().is_empty());
}

#[tokio::test]
async fn polygons_filter_by_box_and_data() {
  let s = store().await;
  let boundary = s.create_boundary(wards("Wards")).await.unwrap();
  s.create_boundary(wards("Precincts")).await.unwrap();

  let filter = PolygonFilter::from_params([("in_bbox", "0.5,0.5,2,2")]).unwrap();
  let hits = s.list_polygons(&filter).await.unwrap();
  assert_eq!(hits.len(), 2);

  let id = boundary.boundary_id.to_string();
  let filter = PolygonFilter::from_params([
    ("boundary", id.as_str()),
    ("data__name", "Ward 2"),
  ])
  .unwrap();
  let hits = s.list_polygons(&filter).await.unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].boundary_id, boundary.boundary_id);

  // Envelope overlaps the triangle's bounding box but not the triangle.
  let triangle: NewBoundary = serde_json::from_value(json!({
    "label": "Triangle",
    "polygons": [{ "geom": {
      "type": "Polygon",
      "coordinates": [[[20, 20], [30, 20], [20, 30], [20, 20]]]
    } }]
  }))
  .unwrap();
  s.create_boundary(triangle).await.unwrap();
  let filter = PolygonFilter::from_params([("in_bbox", "28,28,29,29")]).unwrap();
  assert!(s.list_polygons(&filter).await.unwrap().is_empty());

  let paged = PolygonFilter::from_params([("in_bbox", "-100,-100,100,100"), ("limit", "2"), ("offset", "1")])
    .unwrap();
  assert_eq!(s.list_polygons(&paged).await.unwrap().len(), 2);
  assert_eq!(s.count_polygons(&paged).await.unwrap(), 5);
}

#[tokio::test]
async fn geojson_export_and_cascading_delete() {
  let s = store().await;
  let boundary = s.create_boundary(wards("Wards")).await.unwrap();

  let fc = s.export_geojson(boundary.boundary_id).await.unwrap();
  assert_eq!(fc.features.len(), 2);
  let names: Vec<_> = fc
    .features
    .iter()
    .map(|f| f.properties.as_ref().unwrap()["name"].clone())
    .collect();
  assert_eq!(names, [json!("Ward 1"), json!("Ward 2")]);

  s.delete_boundary(boundary.boundary_id).await.unwrap();
  assert!(s.get_boundary(boundary.boundary_id).await.unwrap().is_none());
  assert_eq!(s.count_polygons(&PolygonFilter::default()).await.unwrap(), 0);

  let err = s.delete_boundary(boundary.boundary_id).await.unwrap_err();
  assert!(matches!(core(&err), CoreError::BoundaryNotFound(_)));
  let err = s.export_geojson(boundary.boundary_id).await.unwrap_err();
  assert!(core(&err).is_not_found());
}

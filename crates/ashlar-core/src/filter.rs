//! The filter pipeline shared by record queries, polygon listings and schema
//! listings.
//!
//! Filters are built from flat query parameters (`in_bbox=..`,
//! `data__severity__in=major,fatal`, `occurred_min=..`). Every predicate can
//! be evaluated in memory through `matches`; storage backends translate the
//! same predicates into their own query language and must agree with the
//! in-memory result.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  boundary::BoundaryPolygon,
  geometry::BoundingBox,
  record::Record,
  schema::RecordSchema,
  validator::json_eq,
};

/// Separator between path segments and the operator in predicate keys.
pub const SEPARATOR: &str = "__";

// ─── JSON attribute predicates ───────────────────────────────────────────────

/// Comparison applied to the value found at a [`JsonPredicate`] path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum JsonOp {
  /// Type-strict equality; numbers compare by value.
  #[default]
  Exact,
  /// Substring of a string, or membership in an array.
  Contains,
  /// ASCII case-insensitive substring of a string.
  Icontains,
  Gt,
  Gte,
  Lt,
  Lte,
  /// Exact match against any of a list.
  In,
}

impl JsonOp {
  pub fn is_ordering(&self) -> bool {
    matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
  }
}

/// A predicate over one path inside a JSON document.
///
/// For [`JsonOp::In`] `value` is an array of alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPredicate {
  pub path:  Vec<String>,
  pub op:    JsonOp,
  pub value: Value,
}

/// Interpret a raw parameter value: JSON when it parses, else a string.
pub fn parse_value(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

impl JsonPredicate {
  pub fn new(path: Vec<String>, op: JsonOp, value: Value) -> Result<Self> {
    if path.is_empty() {
      return Err(Error::InvalidFilter("a JSON predicate needs a path".into()));
    }
    if let Some(bad) = path.iter().find(|s| s.is_empty() || s.contains('"')) {
      return Err(Error::InvalidFilter(format!("invalid path segment {bad:?}")));
    }
    if op.is_ordering() && !(value.is_number() || value.is_string()) {
      return Err(Error::InvalidFilter(format!(
        "{op} compares numbers or strings, got {value}"
      )));
    }
    if op == JsonOp::In && !value.is_array() {
      return Err(Error::InvalidFilter("`in` needs a list of values".into()));
    }
    Ok(Self { path, op, value })
  }

  /// Parse a parameter such as `data__driver__age__gte=18`.
  ///
  /// Returns `Ok(None)` when `key` does not start with `<prefix>__`. A
  /// trailing segment naming an operator is taken as the operator; a key
  /// with a single segment is always a path.
  pub fn from_param(prefix: &str, key: &str, raw: &str) -> Result<Option<Self>> {
    let Some(rest) = key
      .strip_prefix(prefix)
      .and_then(|k| k.strip_prefix(SEPARATOR))
    else {
      return Ok(None);
    };

    let mut path: Vec<String> = rest.split(SEPARATOR).map(str::to_owned).collect();
    let op = match path.as_slice() {
      [_, .., last] => JsonOp::from_str(last).ok(),
      _ => None,
    };
    if op.is_some() {
      path.pop();
    }
    let op = op.unwrap_or_default();

    let value = match op {
      JsonOp::In => Value::Array(raw.split(',').map(parse_value).collect()),
      _ => parse_value(raw),
    };
    Self::new(path, op, value).map(Some)
  }

  /// SQLite/MySQL style JSON path with every segment quoted:
  /// `$."driver"."age"`.
  pub fn json_path(&self) -> String {
    let mut out = String::from("$");
    for segment in &self.path {
      out.push_str(".\"");
      out.push_str(segment);
      out.push('"');
    }
    out
  }

  /// The needle used by substring operators.
  pub fn needle(&self) -> String {
    match &self.value {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    }
  }

  /// The value at this predicate's path, if every segment resolves through
  /// objects.
  pub fn lookup<'a>(&self, document: &'a Value) -> Option<&'a Value> {
    self
      .path
      .iter()
      .try_fold(document, |node, segment| node.as_object()?.get(segment))
  }

  pub fn matches(&self, document: &Value) -> bool {
    let Some(target) = self.lookup(document) else {
      return false;
    };
    match self.op {
      JsonOp::Exact => exact(target, &self.value),
      JsonOp::In => self
        .value
        .as_array()
        .is_some_and(|alternatives| alternatives.iter().any(|v| exact(target, v))),
      JsonOp::Contains => match target {
        Value::String(s) => s.contains(&self.needle()),
        Value::Array(items) => items.iter().any(|item| exact(item, &self.value)),
        _ => false,
      },
      JsonOp::Icontains => match target {
        Value::String(s) => s
          .to_ascii_lowercase()
          .contains(&self.needle().to_ascii_lowercase()),
        _ => false,
      },
      JsonOp::Gt | JsonOp::Gte | JsonOp::Lt | JsonOp::Lte => {
        let ordering = match (target, &self.value) {
          (Value::Number(t), Value::Number(v)) => {
            t.as_f64().zip(v.as_f64()).and_then(|(t, v)| t.partial_cmp(&v))
          }
          (Value::String(t), Value::String(v)) => Some(t.as_str().cmp(v.as_str())),
          _ => None,
        };
        ordering.is_some_and(|o| match self.op {
          JsonOp::Gt => o.is_gt(),
          JsonOp::Gte => o.is_ge(),
          JsonOp::Lt => o.is_lt(),
          _ => o.is_le(),
        })
      }
    }
  }
}

/// Type-strict equality: scalars by value, composites by exact content.
fn exact(target: &Value, wanted: &Value) -> bool {
  match (target, wanted) {
    (Value::Number(_), Value::Number(_)) => json_eq(target, wanted),
    _ => target == wanted,
  }
}

fn data_predicates<'a>(
  prefix: &str,
  params: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<JsonPredicate>> {
  let mut out = Vec::new();
  for (key, raw) in params {
    if let Some(p) = JsonPredicate::from_param(prefix, key, raw)? {
      out.push(p);
    }
  }
  Ok(out)
}

// ─── Parameter parsing helpers ───────────────────────────────────────────────

fn parse_uuid(key: &str, raw: &str) -> Result<Uuid> {
  Uuid::parse_str(raw)
    .map_err(|e| Error::InvalidFilter(format!("{key}: {raw:?} is not a UUID: {e}")))
}

fn parse_count(key: &str, raw: &str) -> Result<u64> {
  raw
    .parse()
    .map_err(|_| Error::InvalidFilter(format!("{key}: {raw:?} is not a non-negative integer")))
}

fn parse_bbox(raw: &str) -> Result<BoundingBox> {
  BoundingBox::parse(raw).map_err(|e| Error::InvalidFilter(format!("in_bbox: {e}")))
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date. A bare date
/// covers the whole day, so it resolves to its first instant for lower bounds
/// and its last millisecond for upper bounds.
fn parse_instant(key: &str, raw: &str, upper: bool) -> Result<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Ok(dt.with_timezone(&Utc));
  }
  let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
    Error::InvalidFilter(format!("{key}: {raw:?} is not an RFC 3339 timestamp or a date"))
  })?;
  let time = if upper {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
  } else {
    NaiveTime::from_hms_opt(0, 0, 0)
  };
  time
    .map(|t| date.and_time(t).and_utc())
    .ok_or_else(|| Error::InvalidFilter(format!("{key}: {raw:?} is out of range")))
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// One conjunct of a [`RecordFilter`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPredicate {
  RecordType(Uuid),
  Schema(Uuid),
  /// Point inside the box, boundary inclusive.
  InBbox(BoundingBox),
  /// `occurred_from` within `[min, max]`; an absent bound is open.
  Occurred {
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
  },
  Data(JsonPredicate),
}

impl RecordPredicate {
  pub fn matches(&self, record: &Record) -> bool {
    match self {
      Self::RecordType(id) => record.record_type_id == *id,
      Self::Schema(id) => record.schema_id == *id,
      Self::InBbox(bbox) => bbox.contains_point(&record.geom),
      Self::Occurred { min, max } => {
        min.is_none_or(|m| record.occurred_from >= m)
          && max.is_none_or(|m| record.occurred_from <= m)
      }
      Self::Data(p) => p.matches(&record.data),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordOrdering {
  /// Insertion order.
  #[default]
  Inserted,
  OccurredFrom,
  OccurredFromDesc,
}

impl FromStr for RecordOrdering {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "occurred_from" => Ok(Self::OccurredFrom),
      "-occurred_from" => Ok(Self::OccurredFromDesc),
      other => Err(Error::InvalidFilter(format!("unsupported ordering {other:?}"))),
    }
  }
}

/// Conjunctive predicates plus ordering and pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
  pub predicates: Vec<RecordPredicate>,
  pub ordering:   RecordOrdering,
  pub limit:      Option<u64>,
  pub offset:     Option<u64>,
}

impl RecordFilter {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, predicate: RecordPredicate) -> Self {
    self.predicates.push(predicate);
    self
  }

  pub fn ordered(mut self, ordering: RecordOrdering) -> Self {
    self.ordering = ordering;
    self
  }

  pub fn paged(mut self, limit: Option<u64>, offset: Option<u64>) -> Self {
    self.limit = limit;
    self.offset = offset;
    self
  }

  /// The same predicates without pagination, for counting.
  pub fn unpaged(&self) -> Self {
    Self {
      limit: None,
      offset: None,
      ..self.clone()
    }
  }

  /// Build a filter from query parameters. Parameters that are not filters
  /// are ignored; malformed filter values fail with
  /// [`Error::InvalidFilter`].
  pub fn from_params<'a>(
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Result<Self> {
    let mut filter = Self::new();
    let mut occurred = (None, None);
    let mut data = Vec::new();

    for (key, raw) in params {
      match key {
        "record_type" => filter
          .predicates
          .push(RecordPredicate::RecordType(parse_uuid(key, raw)?)),
        "schema" => filter
          .predicates
          .push(RecordPredicate::Schema(parse_uuid(key, raw)?)),
        "in_bbox" => filter.predicates.push(RecordPredicate::InBbox(parse_bbox(raw)?)),
        "occurred_min" => occurred.0 = Some(parse_instant(key, raw, false)?),
        "occurred_max" => occurred.1 = Some(parse_instant(key, raw, true)?),
        "ordering" => filter.ordering = raw.parse()?,
        "limit" => filter.limit = Some(parse_count(key, raw)?),
        "offset" => filter.offset = Some(parse_count(key, raw)?),
        _ => data.push((key, raw)),
      }
    }

    let (min, max) = occurred;
    if min.is_some() || max.is_some() {
      filter.predicates.push(RecordPredicate::Occurred { min, max });
    }
    filter.predicates.extend(
      data_predicates("data", data)?
        .into_iter()
        .map(RecordPredicate::Data),
    );
    Ok(filter)
  }

  pub fn matches(&self, record: &Record) -> bool {
    self.predicates.iter().all(|p| p.matches(record))
  }

  /// Evaluate the whole filter over records given in insertion order.
  pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
    let mut hits: Vec<Record> = records.into_iter().filter(|r| self.matches(r)).collect();
    match self.ordering {
      RecordOrdering::Inserted => {}
      RecordOrdering::OccurredFrom => hits.sort_by_key(|r| r.occurred_from),
      RecordOrdering::OccurredFromDesc => {
        hits.sort_by(|a, b| b.occurred_from.cmp(&a.occurred_from))
      }
    }
    paginate(hits, self.limit, self.offset)
  }
}

fn paginate<T>(items: Vec<T>, limit: Option<u64>, offset: Option<u64>) -> Vec<T> {
  let offset = usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX);
  let limit = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
  items.into_iter().skip(offset).take(limit).collect()
}

// ─── Boundary polygons ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonFilter {
  pub boundary: Option<Uuid>,
  /// Polygons intersecting the box.
  pub bbox:     Option<BoundingBox>,
  pub data:     Vec<JsonPredicate>,
  pub limit:    Option<u64>,
  pub offset:   Option<u64>,
}

impl PolygonFilter {
  pub fn for_boundary(boundary: Uuid) -> Self {
    Self {
      boundary: Some(boundary),
      ..Self::default()
    }
  }

  pub fn from_params<'a>(
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Result<Self> {
    let mut filter = Self::default();
    let mut data = Vec::new();
    for (key, raw) in params {
      match key {
        "boundary" => filter.boundary = Some(parse_uuid(key, raw)?),
        "in_bbox" => filter.bbox = Some(parse_bbox(raw)?),
        "limit" => filter.limit = Some(parse_count(key, raw)?),
        "offset" => filter.offset = Some(parse_count(key, raw)?),
        _ => data.push((key, raw)),
      }
    }
    filter.data = data_predicates("data", data)?;
    Ok(filter)
  }

  pub fn unpaged(&self) -> Self {
    Self {
      limit: None,
      offset: None,
      ..self.clone()
    }
  }

  pub fn matches(&self, polygon: &BoundaryPolygon) -> bool {
    self.boundary.is_none_or(|b| polygon.boundary_id == b)
      && self
        .bbox
        .is_none_or(|bbox| bbox.intersects_polygon(&polygon.geom))
      && self.data.iter().all(|p| p.matches(&polygon.data))
  }

  pub fn apply(&self, polygons: impl IntoIterator<Item = BoundaryPolygon>) -> Vec<BoundaryPolygon> {
    let hits = polygons.into_iter().filter(|p| self.matches(p)).collect();
    paginate(hits, self.limit, self.offset)
  }
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

/// Filter for schema listings; `schema__<path>` predicates run over the
/// schema document itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaFilter {
  pub record_type: Option<Uuid>,
  pub document:    Vec<JsonPredicate>,
}

impl SchemaFilter {
  pub fn from_params<'a>(
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Result<Self> {
    let mut filter = Self::default();
    let mut document = Vec::new();
    for (key, raw) in params {
      match key {
        "record_type" => filter.record_type = Some(parse_uuid(key, raw)?),
        _ => document.push((key, raw)),
      }
    }
    filter.document = data_predicates("schema", document)?;
    Ok(filter)
  }

  pub fn matches(&self, schema: &RecordSchema) -> bool {
    self.record_type.is_none_or(|t| schema.record_type_id == t)
      && self.document.iter().all(|p| p.matches(&schema.schema))
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use geo::Point;
  use serde_json::json;

  use super::*;

  fn pred(key: &str, raw: &str) -> JsonPredicate {
    JsonPredicate::from_param("data", key, raw).unwrap().unwrap()
  }

  fn record(hour: u32, x: f64, data: Value) -> Record {
    Record {
      record_id:      Uuid::new_v4(),
      record_type_id: Uuid::nil(),
      schema_id:      Uuid::nil(),
      occurred_from:  Utc.with_ymd_and_hms(2015, 4, 27, hour, 0, 0).unwrap(),
      occurred_to:    None,
      geom:           Point::new(x, 0.0),
      data,
      created_at:     Utc::now(),
    }
  }

  #[test]
  fn parses_path_and_operator() {
    let p = pred("data__driver__age__gte", "18");
    assert_eq!(p.path, ["driver", "age"]);
    assert_eq!(p.op, JsonOp::Gte);
    assert_eq!(p.value, json!(18));
    assert_eq!(p.json_path(), r#"$."driver"."age""#);
  }

  #[test]
  fn single_segment_is_always_a_path() {
    let p = pred("data__in", "x");
    assert_eq!(p.path, ["in"]);
    assert_eq!(p.op, JsonOp::Exact);
    assert_eq!(p.value, json!("x"));
  }

  #[test]
  fn in_splits_on_commas() {
    let p = pred("data__severity__in", "major,3,true");
    assert_eq!(p.value, json!(["major", 3, true]));
  }

  #[test]
  fn other_prefixes_are_not_predicates() {
    assert_eq!(JsonPredicate::from_param("data", "database", "1").unwrap(), None);
    assert_eq!(JsonPredicate::from_param("data", "limit", "1").unwrap(), None);
  }

  #[test]
  fn rejects_bad_predicates() {
    assert!(JsonPredicate::from_param("data", "data__a__gt", "true").is_err());
    assert!(JsonPredicate::from_param("data", "data__a____b", "1").is_err());
    assert!(JsonPredicate::from_param("data", "data__a\"b", "1").is_err());
  }

  #[test]
  fn exact_is_type_strict() {
    let doc = json!({ "n": 5, "s": "5", "f": 5.0, "b": true, "z": null, "o": { "k": [1] } });
    assert!(pred("data__n", "5").matches(&doc));
    assert!(pred("data__f", "5").matches(&doc));
    assert!(!pred("data__s", "5").matches(&doc));
    assert!(pred("data__s", "\"5\"").matches(&doc));
    assert!(pred("data__b", "true").matches(&doc));
    assert!(pred("data__z", "null").matches(&doc));
    assert!(!pred("data__missing", "null").matches(&doc));
    assert!(pred("data__o", r#"{"k":[1]}"#).matches(&doc));
  }

  #[test]
  fn contains_and_icontains() {
    let doc = json!({ "name": "Market Street", "tags": ["rain", 4] });
    assert!(pred("data__name__contains", "Street").matches(&doc));
    assert!(!pred("data__name__contains", "street").matches(&doc));
    assert!(pred("data__name__icontains", "street").matches(&doc));
    assert!(pred("data__tags__contains", "rain").matches(&doc));
    assert!(pred("data__tags__contains", "4").matches(&doc));
    assert!(!pred("data__tags__contains", "ra").matches(&doc));
    assert!(!pred("data__tags__icontains", "rain").matches(&doc));
  }

  #[test]
  fn ordering_operators_compare_like_types_only() {
    let doc = json!({ "n": 7, "s": "b" });
    assert!(pred("data__n__gt", "6.5").matches(&doc));
    assert!(pred("data__n__lte", "7").matches(&doc));
    assert!(!pred("data__n__lt", "7").matches(&doc));
    assert!(pred("data__s__gte", "a").matches(&doc));
    assert!(!pred("data__s__gt", "1").matches(&doc));
  }

  #[test]
  fn record_filter_from_params() {
    let id = Uuid::new_v4();
    let id_text = id.to_string();
    let filter = RecordFilter::from_params([
      ("record_type", id_text.as_str()),
      ("in_bbox", "0,0,10,10"),
      ("occurred_min", "2015-04-27"),
      ("occurred_max", "2015-04-27"),
      ("ordering", "-occurred_from"),
      ("limit", "5"),
      ("data__severity", "major"),
      ("format", "json"),
    ])
    .unwrap();

    assert_eq!(filter.ordering, RecordOrdering::OccurredFromDesc);
    assert_eq!(filter.limit, Some(5));
    assert_eq!(filter.predicates.len(), 4);
    assert_eq!(filter.predicates[0], RecordPredicate::RecordType(id));
    let RecordPredicate::Occurred { min, max } = &filter.predicates[2] else {
      panic!("expected an occurrence range");
    };
    assert_eq!(*min, Some(Utc.with_ymd_and_hms(2015, 4, 27, 0, 0, 0).unwrap()));
    assert!(max.unwrap() > Utc.with_ymd_and_hms(2015, 4, 27, 23, 59, 59).unwrap());
  }

  #[test]
  fn malformed_params_are_invalid_filters() {
    for params in [
      [("in_bbox", "1,2,3")],
      [("occurred_min", "last week")],
      [("limit", "-1")],
      [("ordering", "label")],
      [("schema", "nope")],
    ] {
      assert!(matches!(
        RecordFilter::from_params(params),
        Err(Error::InvalidFilter(_))
      ));
    }
  }

  #[test]
  fn apply_filters_orders_and_pages() {
    let records = vec![
      record(13, 1.0, json!({ "severity": "major" })),
      record(9, 2.0, json!({ "severity": "minor" })),
      record(11, 3.0, json!({ "severity": "major" })),
      record(10, 50.0, json!({ "severity": "major" })),
    ];
    let filter = RecordFilter::from_params([
      ("in_bbox", "0,-1,10,1"),
      ("data__severity", "major"),
      ("ordering", "occurred_from"),
    ])
    .unwrap();
    let hits = filter.apply(records.clone());
    assert_eq!(hits, [records[2].clone(), records[0].clone()]);

    let page = filter.clone().paged(Some(1), Some(1)).apply(records.clone());
    assert_eq!(page, [records[0].clone()]);
    assert_eq!(filter.unpaged(), filter);
  }

  #[test]
  fn occurred_bounds_are_inclusive() {
    let r = record(12, 0.0, json!({}));
    let at = r.occurred_from;
    let p = RecordPredicate::Occurred { min: Some(at), max: Some(at) };
    assert!(p.matches(&r));
    let p = RecordPredicate::Occurred { min: None, max: Some(at - chrono::Duration::seconds(1)) };
    assert!(!p.matches(&r));
  }

  #[test]
  fn schema_filter_reads_the_document() {
    let filter = SchemaFilter::from_params([("schema__title", "Incident")]).unwrap();
    assert_eq!(filter.document[0].path, ["title"]);
    assert!(filter.document[0].matches(&json!({ "title": "Incident" })));
  }
}

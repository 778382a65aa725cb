//! Translation of the core filter pipeline into parameterised SQLite queries.
//!
//! Every predicate becomes a `WHERE` conjunct whose result agrees with the
//! in-memory `matches` of the same predicate. Placeholders are numbered
//! (`?1`, `?2`, ...) so that a bound JSON path can be referenced more than
//! once.

use ashlar_core::filter::{
  JsonOp, JsonPredicate, PolygonFilter, RecordFilter, RecordOrdering, RecordPredicate,
  SchemaFilter,
};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

use crate::encode::{encode_dt, encode_uuid};

pub const RECORD_COLUMNS: &str = "record_id, record_type_id, schema_id, occurred_from, \
                                  occurred_to, geom_x, geom_y, data_json, created_at";

pub const POLYGON_COLUMNS: &str =
  "polygon_id, boundary_id, geom_json, data_json";

pub const SCHEMA_COLUMNS: &str = "s.schema_id, s.record_type_id, s.version, s.schema_json, \
   s.created_at, s.next_version_id, \
   (SELECT p.schema_id FROM record_schemas p WHERE p.next_version_id = s.schema_id)";

// ─── Parameters ──────────────────────────────────────────────────────────────

/// An owned bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
  Integer(i64),
  Real(f64),
  Text(String),
}

impl SqlParam {
  fn number(n: &Number) -> Self {
    match n.as_i64() {
      Some(i) => Self::Integer(i),
      None => Self::Real(n.as_f64().unwrap_or(f64::NAN)),
    }
  }

  fn count(n: u64) -> Self { Self::Integer(i64::try_from(n).unwrap_or(i64::MAX)) }

  /// SQL literal for this value.
  fn literal(&self) -> String {
    match self {
      Self::Integer(i) => i.to_string(),
      Self::Real(f) => format!("{f:?}"),
      Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
  }
}

impl ToSql for SqlParam {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(match self {
      Self::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
      Self::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
      Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
    })
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// SQL text plus its bind parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
  pub sql:    String,
  pub params: Vec<SqlParam>,
}

impl Query {
  /// Add a parameter and return its placeholder.
  pub fn bind(&mut self, param: SqlParam) -> String {
    self.params.push(param);
    format!("?{}", self.params.len())
  }

  fn bind_text(&mut self, text: impl Into<String>) -> String { self.bind(SqlParam::Text(text.into())) }

  /// The SQL with every placeholder replaced by its escaped literal.
  ///
  /// Placeholders without a parameter are left as they are.
  pub fn render(&self) -> String {
    let mut out = String::with_capacity(self.sql.len());
    let mut rest = self.sql.as_str();
    while let Some(at) = rest.find('?') {
      out.push_str(&rest[..at]);
      let digits = rest[at + 1..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len() - at - 1);
      let token = &rest[at..at + 1 + digits];
      let param = token[1..]
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| self.params.get(i));
      match param {
        Some(p) => out.push_str(&p.literal()),
        None => out.push_str(token),
      }
      rest = &rest[at + 1 + digits..];
    }
    out.push_str(rest);
    out
  }
}

// ─── JSON predicates ─────────────────────────────────────────────────────────

/// Type-strict equality of a JSON value given by its SQLite `json_type` and
/// SQL value expressions.
fn exact(ty: &str, val: &str, wanted: &Value, q: &mut Query) -> String {
  match wanted {
    Value::Null => format!("{ty} = 'null'"),
    Value::Bool(true) => format!("{ty} = 'true'"),
    Value::Bool(false) => format!("{ty} = 'false'"),
    Value::Number(n) => {
      let p = q.bind(SqlParam::number(n));
      format!("({ty} IN ('integer', 'real') AND {val} = {p})")
    }
    Value::String(s) => {
      let p = q.bind_text(s.as_str());
      format!("({ty} = 'text' AND {val} = {p})")
    }
    Value::Array(_) => {
      let p = q.bind_text(wanted.to_string());
      format!("({ty} = 'array' AND {val} = {p})")
    }
    Value::Object(_) => {
      let p = q.bind_text(wanted.to_string());
      format!("({ty} = 'object' AND {val} = {p})")
    }
  }
}

/// Render one JSON predicate over the JSON text column `column`.
pub fn json_condition(column: &str, predicate: &JsonPredicate, q: &mut Query) -> String {
  let path = q.bind_text(predicate.json_path());
  let ty = format!("json_type({column}, {path})");
  let val = format!("json_extract({column}, {path})");

  match predicate.op {
    JsonOp::Exact => exact(&ty, &val, &predicate.value, q),
    JsonOp::In => {
      let alternatives: Vec<String> = predicate
        .value
        .as_array()
        .map(|list| list.iter().map(|v| exact(&ty, &val, v, q)).collect())
        .unwrap_or_default();
      if alternatives.is_empty() {
        "0".to_owned()
      } else {
        format!("({})", alternatives.join(" OR "))
      }
    }
    JsonOp::Contains => {
      let needle = q.bind_text(predicate.needle());
      let member = exact("je.type", "je.value", &predicate.value, q);
      format!(
        "(CASE {ty} \
         WHEN 'text' THEN instr({val}, {needle}) > 0 \
         WHEN 'array' THEN EXISTS (SELECT 1 FROM json_each({column}, {path}) AS je WHERE {member}) \
         ELSE 0 END)"
      )
    }
    JsonOp::Icontains => {
      let needle = q.bind_text(predicate.needle().to_ascii_lowercase());
      format!("({ty} = 'text' AND instr(lower({val}), {needle}) > 0)")
    }
    JsonOp::Gt | JsonOp::Gte | JsonOp::Lt | JsonOp::Lte => {
      let cmp = match predicate.op {
        JsonOp::Gt => ">",
        JsonOp::Gte => ">=",
        JsonOp::Lt => "<",
        _ => "<=",
      };
      match &predicate.value {
        Value::Number(n) => {
          let p = q.bind(SqlParam::number(n));
          format!("({ty} IN ('integer', 'real') AND {val} {cmp} {p})")
        }
        Value::String(s) => {
          let p = q.bind_text(s.as_str());
          format!("({ty} = 'text' AND {val} {cmp} {p})")
        }
        // Rejected when the predicate is built.
        _ => "0".to_owned(),
      }
    }
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

fn record_condition(predicate: &RecordPredicate, q: &mut Query) -> String {
  match predicate {
    RecordPredicate::RecordType(id) => format!("record_type_id = {}", q.bind_text(encode_uuid(*id))),
    RecordPredicate::Schema(id) => format!("schema_id = {}", q.bind_text(encode_uuid(*id))),
    RecordPredicate::InBbox(bbox) => {
      let (min_x, min_y) = (q.bind(SqlParam::Real(bbox.min_x())), q.bind(SqlParam::Real(bbox.min_y())));
      let (max_x, max_y) = (q.bind(SqlParam::Real(bbox.max_x())), q.bind(SqlParam::Real(bbox.max_y())));
      format!("geom_x BETWEEN {min_x} AND {max_x} AND geom_y BETWEEN {min_y} AND {max_y}")
    }
    RecordPredicate::Occurred { min, max } => {
      let mut parts = Vec::new();
      if let Some(min) = min {
        parts.push(format!("occurred_from >= {}", q.bind_text(encode_dt(*min))));
      }
      if let Some(max) = max {
        parts.push(format!("occurred_from <= {}", q.bind_text(encode_dt(*max))));
      }
      if parts.is_empty() { "1".to_owned() } else { parts.join(" AND ") }
    }
    RecordPredicate::Data(p) => json_condition("data_json", p, q),
  }
}

fn where_clause(conditions: &[String]) -> String {
  if conditions.is_empty() {
    String::new()
  } else {
    format!(" WHERE {}", conditions.join(" AND "))
  }
}

fn record_where(filter: &RecordFilter, q: &mut Query) -> String {
  let conditions: Vec<String> = filter
    .predicates
    .iter()
    .map(|p| record_condition(p, q))
    .collect();
  where_clause(&conditions)
}

fn paging(limit: Option<u64>, offset: Option<u64>, q: &mut Query) -> String {
  match (limit, offset) {
    (None, None) => String::new(),
    (limit, offset) => {
      let limit = q.bind(limit.map_or(SqlParam::Integer(-1), SqlParam::count));
      let offset = q.bind(SqlParam::count(offset.unwrap_or(0)));
      format!(" LIMIT {limit} OFFSET {offset}")
    }
  }
}

/// The row query behind `query_records`.
pub fn select_records(filter: &RecordFilter) -> Query {
  let mut q = Query::default();
  let filter_sql = record_where(filter, &mut q);
  let order = match filter.ordering {
    RecordOrdering::Inserted => "rowid",
    RecordOrdering::OccurredFrom => "occurred_from, rowid",
    RecordOrdering::OccurredFromDesc => "occurred_from DESC, rowid",
  };
  let page = paging(filter.limit, filter.offset, &mut q);
  q.sql = format!("SELECT {RECORD_COLUMNS} FROM records{filter_sql} ORDER BY {order}{page}");
  q
}

pub fn count_records(filter: &RecordFilter) -> Query {
  let mut q = Query::default();
  let filter_sql = record_where(filter, &mut q);
  q.sql = format!("SELECT COUNT(*) FROM records{filter_sql}");
  q
}

/// Hour / weekday buckets (Sunday = 1) of the records matching `filter`,
/// ignoring its pagination.
pub fn toddow(filter: &RecordFilter) -> Query {
  let mut q = Query::default();
  let filter_sql = record_where(filter, &mut q);
  q.sql = format!(
    "SELECT CAST(strftime('%H', occurred_from) AS INTEGER) AS tod, \
            CAST(strftime('%w', occurred_from) AS INTEGER) + 1 AS dow, \
            COUNT(*) \
     FROM records{filter_sql} \
     GROUP BY tod, dow ORDER BY tod, dow"
  );
  q
}

// ─── Polygons ────────────────────────────────────────────────────────────────

/// Candidate polygons for `filter`. A bounding box is only checked against
/// the stored envelopes here, so callers refine the rows and paginate
/// afterwards; without a box, pagination is applied in SQL.
pub fn select_polygons(filter: &PolygonFilter) -> Query {
  let mut q = Query::default();
  let mut conditions = Vec::new();
  if let Some(boundary) = filter.boundary {
    conditions.push(format!("boundary_id = {}", q.bind_text(encode_uuid(boundary))));
  }
  if let Some(bbox) = filter.bbox {
    let min_x = q.bind(SqlParam::Real(bbox.min_x()));
    let min_y = q.bind(SqlParam::Real(bbox.min_y()));
    let max_x = q.bind(SqlParam::Real(bbox.max_x()));
    let max_y = q.bind(SqlParam::Real(bbox.max_y()));
    conditions.push(format!(
      "max_x >= {min_x} AND min_x <= {max_x} AND max_y >= {min_y} AND min_y <= {max_y}"
    ));
  }
  for predicate in &filter.data {
    conditions.push(json_condition("data_json", predicate, &mut q));
  }
  let filter_sql = where_clause(&conditions);
  let page = if filter.bbox.is_none() {
    paging(filter.limit, filter.offset, &mut q)
  } else {
    String::new()
  };
  q.sql = format!("SELECT {POLYGON_COLUMNS} FROM boundary_polygons{filter_sql} ORDER BY rowid{page}");
  q
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

pub fn select_schemas(filter: &SchemaFilter) -> Query {
  let mut q = Query::default();
  let mut conditions = Vec::new();
  if let Some(record_type) = filter.record_type {
    conditions.push(format!("s.record_type_id = {}", q.bind_text(encode_uuid(record_type))));
  }
  for predicate in &filter.document {
    conditions.push(json_condition("s.schema_json", predicate, &mut q));
  }
  let filter_sql = where_clause(&conditions);
  q.sql = format!(
    "SELECT {SCHEMA_COLUMNS} FROM record_schemas s{filter_sql} ORDER BY s.record_type_id, s.version"
  );
  q
}

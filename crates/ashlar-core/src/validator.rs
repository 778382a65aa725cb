//! Schema compilation and record validation.
//!
//! [`CompiledSchema::compile`] turns a JSON-Schema-style document into a
//! checked tree, reporting every malformed keyword at once. [`Validator`]
//! then checks candidate record payloads against a compiled schema and the
//! envelope invariants every record shares (occurrence window, location).
//!
//! Validation is pure: it neither touches storage nor reads the clock, and
//! data problems are always reported as [`Violation`]s, never as errors.

use std::{
  collections::{BTreeMap, HashMap},
  str::FromStr,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result, Violation,
  geometry::{Srid, point_from_geojson},
  record::NewRecord,
};

// ─── JSON pointers ───────────────────────────────────────────────────────────

/// Append one reference token to a JSON pointer, escaping per RFC 6901.
pub fn pointer(base: &str, token: &str) -> String {
  format!("{base}/{}", token.replace('~', "~0").replace('/', "~1"))
}

fn unescape_token(token: &str) -> String {
  token.replace("~1", "/").replace("~0", "~")
}

// ─── Keyword vocabularies ────────────────────────────────────────────────────

/// Primitive types accepted by the `type` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum JsonType {
  String,
  Number,
  Integer,
  Boolean,
  Array,
  Object,
  Null,
}

impl JsonType {
  pub fn matches(&self, value: &Value) -> bool {
    match self {
      Self::String => value.is_string(),
      Self::Number => value.is_number(),
      Self::Integer => {
        value.is_i64()
          || value.is_u64()
          || value.as_f64().is_some_and(|f| f.fract() == 0.0)
      }
      Self::Boolean => value.is_boolean(),
      Self::Array => value.is_array(),
      Self::Object => value.is_object(),
      Self::Null => value.is_null(),
    }
  }

  fn of(value: &Value) -> &'static str {
    match value {
      Value::Null => "null",
      Value::Bool(_) => "boolean",
      Value::Number(n) if n.is_f64() => "number",
      Value::Number(_) => "integer",
      Value::String(_) => "string",
      Value::Array(_) => "array",
      Value::Object(_) => "object",
    }
  }
}

/// String formats that are enforced. Other `format` names are accepted as
/// annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Format {
  DateTime,
  Date,
  Uuid,
  Email,
  Uri,
}

impl Format {
  fn check(&self, s: &str) -> bool {
    match self {
      Self::DateTime => DateTime::parse_from_rfc3339(s).is_ok(),
      Self::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
      Self::Uuid => Uuid::parse_str(s).is_ok(),
      Self::Email => match s.split_once('@') {
        Some((local, domain)) => {
          !local.is_empty()
            && !domain.is_empty()
            && !domain.contains('@')
            && !s.chars().any(char::is_whitespace)
        }
        None => false,
      },
      Self::Uri => match s.split_once(':') {
        Some((scheme, rest)) => {
          let mut chars = scheme.chars();
          chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
            && !rest.is_empty()
            && !s.chars().any(char::is_whitespace)
        }
        None => false,
      },
    }
  }
}

// ─── Compiled schema ─────────────────────────────────────────────────────────

/// One compiled (sub)schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaNode {
  /// Accepted types; empty means any type.
  pub types:                 Vec<JsonType>,
  pub enumeration:           Option<Vec<Value>>,
  pub format:                Option<Format>,
  pub properties:            BTreeMap<String, SchemaNode>,
  pub required:              Vec<String>,
  pub additional_properties: bool,
  pub items:                 Option<Box<SchemaNode>>,
  pub min_items:             Option<u64>,
  pub max_items:             Option<u64>,
  pub minimum:               Option<f64>,
  pub maximum:               Option<f64>,
  pub min_length:            Option<u64>,
  pub max_length:            Option<u64>,
}

/// A schema document that has been checked and resolved, ready to validate
/// record data.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
  root: SchemaNode,
}

impl CompiledSchema {
  /// Compile a JSON-Schema-style document.
  ///
  /// Supported keywords: `type`, `properties`, `required`,
  /// `additionalProperties`, `items`, `minItems`, `maxItems`, `enum`,
  /// `format`, `minimum`, `maximum`, `minLength`, `maxLength`,
  /// `definitions` and local `$ref`s (`#/definitions/<name>`). Unknown
  /// keywords are treated as annotations.
  ///
  /// Fails with [`Error::SchemaCompile`] listing every problem found.
  pub fn compile(document: &Value) -> Result<Self> {
    let Some(object) = document.as_object() else {
      return Err(Error::SchemaCompile(vec![Violation::new(
        "",
        "schema document must be a JSON object",
      )]));
    };

    let mut compiler = Compiler::new(object);
    compiler.compile_definitions();
    let root = compiler.node(document, "");

    if !root.types.is_empty() && root.types != [JsonType::Object] {
      compiler.problem("/type", "the root schema must describe an object");
    }

    if compiler.problems.is_empty() {
      Ok(Self { root })
    } else {
      Err(Error::SchemaCompile(compiler.problems))
    }
  }

  pub fn root(&self) -> &SchemaNode { &self.root }

  /// Validate a bare `data` value. Violation paths are rooted at `base`.
  pub fn validate_data(&self, data: &Value, base: &str) -> Vec<Violation> {
    let mut out = Vec::new();
    check(&self.root, data, base, &mut out);
    out
  }
}

const DEFINITIONS_PREFIX: &str = "#/definitions/";

enum Definition {
  Compiled(SchemaNode),
  InProgress,
}

struct Compiler<'a> {
  definitions: Option<&'a Map<String, Value>>,
  resolved:    HashMap<String, Definition>,
  problems:    Vec<Violation>,
}

impl<'a> Compiler<'a> {
  fn new(root: &'a Map<String, Value>) -> Self {
    Self {
      definitions: None,
      resolved:    HashMap::new(),
      problems:    Vec::new(),
    }
    .with_definitions(root)
  }

  fn with_definitions(mut self, root: &'a Map<String, Value>) -> Self {
    match root.get("definitions") {
      None => {}
      Some(Value::Object(defs)) => self.definitions = Some(defs),
      Some(_) => self.problem("/definitions", "must be an object"),
    }
    self
  }

  fn problem(&mut self, path: impl Into<String>, reason: impl Into<String>) {
    self.problems.push(Violation::new(path, reason));
  }

  /// Compile every definition once, so problems inside them are reported
  /// even when nothing references them.
  fn compile_definitions(&mut self) {
    if let Some(defs) = self.definitions {
      for name in defs.keys() {
        self.resolve(name, "");
      }
    }
  }

  fn resolve(&mut self, name: &str, ref_path: &str) -> SchemaNode {
    match self.resolved.get(name) {
      Some(Definition::Compiled(node)) => return node.clone(),
      Some(Definition::InProgress) => {
        self.problem(ref_path, format!("circular reference to definition {name:?}"));
        return SchemaNode::default();
      }
      None => {}
    }

    let Some(value) = self.definitions.and_then(|defs| defs.get(name)) else {
      self.problem(ref_path, format!("unknown definition {name:?}"));
      return SchemaNode::default();
    };

    self.resolved.insert(name.to_owned(), Definition::InProgress);
    let node = self.node(value, &pointer("/definitions", name));
    self
      .resolved
      .insert(name.to_owned(), Definition::Compiled(node.clone()));
    node
  }

  fn node(&mut self, value: &Value, path: &str) -> SchemaNode {
    let Some(obj) = value.as_object() else {
      self.problem(path, "a schema must be a JSON object");
      return SchemaNode::default();
    };

    if let Some(reference) = obj.get("$ref") {
      let ref_path = pointer(path, "$ref");
      return match reference.as_str() {
        Some(r) if r.starts_with(DEFINITIONS_PREFIX) => {
          let name = unescape_token(&r[DEFINITIONS_PREFIX.len()..]);
          self.resolve(&name, &ref_path)
        }
        _ => {
          self.problem(ref_path, "only local references of the form #/definitions/<name> are supported");
          SchemaNode::default()
        }
      };
    }

    let mut node = SchemaNode {
      additional_properties: true,
      ..SchemaNode::default()
    };

    if let Some(ty) = obj.get("type") {
      node.types = self.types(ty, &pointer(path, "type"));
    }

    if let Some(values) = obj.get("enum") {
      match values.as_array() {
        Some(list) if !list.is_empty() => node.enumeration = Some(list.clone()),
        _ => self.problem(pointer(path, "enum"), "must be a non-empty array"),
      }
    }

    if let Some(format) = obj.get("format") {
      match format.as_str() {
        Some(name) => node.format = Format::from_str(name).ok(),
        None => self.problem(pointer(path, "format"), "must be a string"),
      }
    }

    if let Some(props) = obj.get("properties") {
      let props_path = pointer(path, "properties");
      match props.as_object() {
        Some(props) => {
          for (name, sub) in props {
            let sub_node = self.node(sub, &pointer(&props_path, name));
            node.properties.insert(name.clone(), sub_node);
          }
        }
        None => self.problem(props_path, "must be an object"),
      }
    }

    if let Some(required) = obj.get("required") {
      let names = required
        .as_array()
        .and_then(|list| list.iter().map(|v| v.as_str().map(str::to_owned)).collect());
      match names {
        Some(names) => node.required = names,
        None => self.problem(pointer(path, "required"), "must be an array of strings"),
      }
    }

    if let Some(additional) = obj.get("additionalProperties") {
      match additional.as_bool() {
        Some(allowed) => node.additional_properties = allowed,
        None => self.problem(pointer(path, "additionalProperties"), "must be a boolean"),
      }
    }

    if let Some(items) = obj.get("items") {
      node.items = Some(Box::new(self.node(items, &pointer(path, "items"))));
    }

    node.minimum = self.number(obj, "minimum", path);
    node.maximum = self.number(obj, "maximum", path);
    node.min_length = self.count(obj, "minLength", path);
    node.max_length = self.count(obj, "maxLength", path);
    node.min_items = self.count(obj, "minItems", path);
    node.max_items = self.count(obj, "maxItems", path);

    node
  }

  fn types(&mut self, value: &Value, path: &str) -> Vec<JsonType> {
    let names: Vec<(String, &Value)> = match value {
      Value::String(_) => vec![(path.to_owned(), value)],
      Value::Array(list) if !list.is_empty() => list
        .iter()
        .enumerate()
        .map(|(i, v)| (pointer(path, &i.to_string()), v))
        .collect(),
      _ => {
        self.problem(path, "must be a type name or a non-empty array of type names");
        return Vec::new();
      }
    };

    let mut types = Vec::new();
    for (at, name) in names {
      match name.as_str().map(JsonType::from_str) {
        Some(Ok(ty)) => types.push(ty),
        _ => self.problem(at, format!("unknown type {name}")),
      }
    }
    types
  }

  fn number(&mut self, obj: &Map<String, Value>, key: &str, path: &str) -> Option<f64> {
    let value = obj.get(key)?;
    let number = value.as_f64();
    if number.is_none() {
      self.problem(pointer(path, key), "must be a number");
    }
    number
  }

  fn count(&mut self, obj: &Map<String, Value>, key: &str, path: &str) -> Option<u64> {
    let value = obj.get(key)?;
    let count = value.as_u64();
    if count.is_none() {
      self.problem(pointer(path, key), "must be a non-negative integer");
    }
    count
  }
}

// ─── Structural checks ───────────────────────────────────────────────────────

fn check(node: &SchemaNode, value: &Value, path: &str, out: &mut Vec<Violation>) {
  if !node.types.is_empty() && !node.types.iter().any(|t| t.matches(value)) {
    let expected = node
      .types
      .iter()
      .map(ToString::to_string)
      .collect::<Vec<_>>()
      .join(" or ");
    out.push(Violation::new(
      path,
      format!("expected {expected}, found {}", JsonType::of(value)),
    ));
    return;
  }

  if let Some(allowed) = &node.enumeration
    && !allowed.iter().any(|a| json_eq(a, value))
  {
    out.push(Violation::new(path, "value is not one of the allowed values"));
  }

  match value {
    Value::String(s) => {
      let len = s.chars().count() as u64;
      if let Some(min) = node.min_length
        && len < min
      {
        out.push(Violation::new(path, format!("must be at least {min} characters long")));
      }
      if let Some(max) = node.max_length
        && len > max
      {
        out.push(Violation::new(path, format!("must be at most {max} characters long")));
      }
      if let Some(format) = node.format
        && !format.check(s)
      {
        out.push(Violation::new(path, format!("is not a valid {format}")));
      }
    }
    Value::Number(n) => {
      let n = n.as_f64().unwrap_or(f64::NAN);
      if let Some(min) = node.minimum
        && n < min
      {
        out.push(Violation::new(path, format!("must be at least {min}")));
      }
      if let Some(max) = node.maximum
        && n > max
      {
        out.push(Violation::new(path, format!("must be at most {max}")));
      }
    }
    Value::Array(items) => {
      let len = items.len() as u64;
      if let Some(min) = node.min_items
        && len < min
      {
        out.push(Violation::new(path, format!("must contain at least {min} items")));
      }
      if let Some(max) = node.max_items
        && len > max
      {
        out.push(Violation::new(path, format!("must contain at most {max} items")));
      }
      if let Some(item_node) = &node.items {
        for (i, item) in items.iter().enumerate() {
          check(item_node, item, &pointer(path, &i.to_string()), out);
        }
      }
    }
    Value::Object(fields) => {
      for name in &node.required {
        if !fields.contains_key(name) {
          out.push(Violation::new(pointer(path, name), "required property is missing"));
        }
      }
      for (name, field) in fields {
        match node.properties.get(name) {
          Some(sub) => check(sub, field, &pointer(path, name), out),
          None if !node.additional_properties => out.push(Violation::new(
            pointer(path, name),
            "additional property is not allowed",
          )),
          None => {}
        }
      }
    }
    Value::Null | Value::Bool(_) => {}
  }
}

/// JSON equality with numbers compared by value (`1` equals `1.0`).
pub fn json_eq(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
    (Value::Array(x), Value::Array(y)) => {
      x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_eq(l, r))
    }
    (Value::Object(x), Value::Object(y)) => {
      x.len() == y.len()
        && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| json_eq(v, w)))
    }
    _ => a == b,
  }
}

// ─── Record validation ───────────────────────────────────────────────────────

/// Outcome of [`Validator::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
  /// Every problem found. Empty means valid.
  pub violations: Vec<Violation>,
  candidate:      Option<NewRecord>,
}

impl ValidationResult {
  pub fn is_valid(&self) -> bool { self.violations.is_empty() }

  /// The validated record, or [`Error::Validation`] with every violation.
  pub fn into_record(self) -> Result<NewRecord> {
    match self.candidate {
      Some(record) if self.violations.is_empty() => Ok(record),
      _ => Err(Error::Validation(self.violations)),
    }
  }
}

/// Checks candidate record payloads against a compiled schema plus the
/// invariants shared by every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
  srid: Srid,
}

impl Validator {
  pub fn new(srid: Srid) -> Self { Self { srid } }

  pub fn srid(&self) -> Srid { self.srid }

  /// Validate a candidate payload of the form
  /// `{"occurred_from", "occurred_to"?, "geom", "data"}`.
  ///
  /// `occurred_from` and `occurred_to` are RFC 3339 timestamps with
  /// `occurred_to >= occurred_from`; `geom` is a GeoJSON Point valid in the
  /// configured SRID; `data` must satisfy `schema`. Other keys are ignored.
  pub fn validate(&self, schema: &CompiledSchema, payload: &Value) -> ValidationResult {
    let Some(fields) = payload.as_object() else {
      return ValidationResult {
        violations: vec![Violation::new("", "a record must be a JSON object")],
        candidate:  None,
      };
    };

    let mut violations = Vec::new();

    let occurred_from = match fields.get("occurred_from") {
      None | Some(Value::Null) => {
        violations.push(Violation::new("/occurred_from", "required property is missing"));
        None
      }
      Some(v) => timestamp(v, "/occurred_from", &mut violations),
    };

    let occurred_to = match fields.get("occurred_to") {
      None | Some(Value::Null) => None,
      Some(v) => timestamp(v, "/occurred_to", &mut violations),
    };

    if let (Some(from), Some(to)) = (occurred_from, occurred_to)
      && to < from
    {
      violations.push(Violation::new(
        "/occurred_to",
        "must not be earlier than occurred_from",
      ));
    }

    let geom = match fields.get("geom") {
      None | Some(Value::Null) => {
        violations.push(Violation::new("/geom", "required property is missing"));
        None
      }
      Some(v) => match point_from_geojson(v, self.srid) {
        Ok(point) => Some(point),
        Err(reason) => {
          violations.push(Violation::new("/geom", reason));
          None
        }
      },
    };

    let data = match fields.get("data") {
      None => {
        violations.push(Violation::new("/data", "required property is missing"));
        None
      }
      Some(v) => {
        violations.extend(schema.validate_data(v, "/data"));
        Some(v)
      }
    };

    let candidate = match (occurred_from, geom, data) {
      (Some(occurred_from), Some(geom), Some(data)) => Some(NewRecord {
        occurred_from,
        occurred_to,
        geom,
        data: data.clone(),
      }),
      _ => None,
    };

    ValidationResult { violations, candidate }
  }
}

fn timestamp(value: &Value, path: &str, out: &mut Vec<Violation>) -> Option<DateTime<Utc>> {
  let parsed = value
    .as_str()
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.with_timezone(&Utc));
  if parsed.is_none() {
    out.push(Violation::new(path, "must be an RFC 3339 timestamp"));
  }
  parsed
}

//! Error types for `ashlar-core`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single problem found in a schema document or a record payload.
///
/// `path` is a JSON pointer (RFC 6901) into the offending document; the empty
/// string denotes the document root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
  pub path:   String,
  pub reason: String,
}

impl Violation {
  pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      path:   path.into(),
      reason: reason.into(),
    }
  }
}

fn summarize(violations: &[Violation]) -> String {
  match violations {
    [] => "no details".to_owned(),
    [only] => format!("{}: {}", display_path(&only.path), only.reason),
    [first, rest @ ..] => format!(
      "{}: {} (and {} more)",
      display_path(&first.path),
      first.reason,
      rest.len()
    ),
  }
}

fn display_path(path: &str) -> &str { if path.is_empty() { "/" } else { path } }

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed schema document: {}", summarize(.0))]
  SchemaCompile(Vec<Violation>),

  #[error("validation failed: {}", summarize(.0))]
  Validation(Vec<Violation>),

  #[error("record type not found: {0}")]
  RecordTypeNotFound(Uuid),

  #[error("record schema not found: {0}")]
  SchemaNotFound(Uuid),

  #[error("record type {record_type} has no schema version {version}")]
  SchemaVersionNotFound { record_type: Uuid, version: u32 },

  #[error("record type {0} has no schema yet")]
  NoCurrentSchema(Uuid),

  #[error("boundary not found: {0}")]
  BoundaryNotFound(Uuid),

  #[error("conflict: {0}")]
  Conflict(String),

  /// A version-chain invariant does not hold. Never expected in correct
  /// operation; indicates a concurrency bug or external tampering.
  #[error("schema chain for record type {record_type} is corrupt: {detail}")]
  ChainIntegrity { record_type: Uuid, detail: String },

  #[error("invalid filter: {0}")]
  InvalidFilter(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether this error means a referenced entity does not exist.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::RecordTypeNotFound(_)
        | Self::SchemaNotFound(_)
        | Self::SchemaVersionNotFound { .. }
        | Self::NoCurrentSchema(_)
        | Self::BoundaryNotFound(_)
    )
  }

  /// The violation list carried by compile and validation failures.
  pub fn violations(&self) -> Option<&[Violation]> {
    match self {
      Self::SchemaCompile(v) | Self::Validation(v) => Some(v),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_summarizes_first_violation() {
    let err = Error::Validation(vec![
      Violation::new("/data/name", "required property is missing"),
      Violation::new("/geom", "expected a GeoJSON Point"),
    ]);
    assert_eq!(
      err.to_string(),
      "validation failed: /data/name: required property is missing (and 1 more)"
    );
  }

  #[test]
  fn root_path_displays_as_slash() {
    let err = Error::SchemaCompile(vec![Violation::new("", "must be an object")]);
    assert_eq!(err.to_string(), "malformed schema document: /: must be an object");
  }
}

//! Record schemas and their version chain.
//!
//! A schema document is immutable once stored. Evolution appends a new
//! version and links the previous head to it through `next_version`, so the
//! versions of one record type form a singly-linked list, oldest to newest.
//! Records keep pointing at the exact version they were validated against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One immutable version of a record type's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
  pub schema_id:        Uuid,
  pub record_type_id:   Uuid,
  /// 1-based, gap-free and increasing within a record type.
  pub version:          u32,
  /// The JSON-Schema-style document the record `data` is checked against.
  pub schema:           serde_json::Value,
  pub created_at:       DateTime<Utc>,
  /// The schema that superseded this one; `None` for the current version.
  pub next_version:     Option<Uuid>,
  /// Inverse of `next_version`; derived on read, never stored.
  pub previous_version: Option<Uuid>,
}

impl RecordSchema {
  /// Whether this is the head of its chain.
  pub fn is_current(&self) -> bool { self.next_version.is_none() }
}

/// Check the chain invariants over every schema of one record type.
///
/// Expects the full chain; returns a description of the first broken
/// invariant. Used by backends and tests to assert chain health.
pub fn check_chain(schemas: &[RecordSchema]) -> Result<(), String> {
  if schemas.is_empty() {
    return Ok(());
  }

  let mut ordered: Vec<&RecordSchema> = schemas.iter().collect();
  ordered.sort_by_key(|s| s.version);

  let heads = ordered.iter().filter(|s| s.is_current()).count();
  if heads != 1 {
    return Err(format!("expected exactly one current version, found {heads}"));
  }

  for (idx, schema) in ordered.iter().enumerate() {
    let expected = idx as u32 + 1;
    if schema.version != expected {
      return Err(format!(
        "expected version {expected}, found {}",
        schema.version
      ));
    }

    let next = ordered.get(idx + 1).map(|s| s.schema_id);
    if schema.next_version != next {
      return Err(format!(
        "version {} links to {:?}, expected {:?}",
        schema.version, schema.next_version, next
      ));
    }

    let previous = idx.checked_sub(1).map(|p| ordered[p].schema_id);
    if schema.previous_version != previous {
      return Err(format!(
        "version {} has previous {:?}, expected {:?}",
        schema.version, schema.previous_version, previous
      ));
    }
  }

  Ok(())
}

//! Record types — the named kinds of event that own a schema chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, Violation};

/// A kind of geotemporal event (e.g. "Incident", "Inspection").
///
/// A record type owns an ordered chain of [`RecordSchema`](crate::schema::RecordSchema)
/// versions; the newest one governs records created today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
  pub record_type_id: Uuid,
  pub label:          String,
  pub plural_label:   String,
  pub description:    Option<String>,
  pub active:         bool,
  pub created_at:     DateTime<Utc>,
}

/// Input to [`crate::store::RecordTypeStore::create_record_type`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewRecordType {
  pub label:        String,
  pub plural_label: String,
  #[serde(default)]
  pub description:  Option<String>,
  #[serde(default = "default_active")]
  pub active:       bool,
}

fn default_active() -> bool { true }

impl NewRecordType {
  pub fn new(label: impl Into<String>, plural_label: impl Into<String>) -> Self {
    Self {
      label:        label.into(),
      plural_label: plural_label.into(),
      description:  None,
      active:       true,
    }
  }

  /// Both labels must be non-blank.
  pub fn validate(&self) -> Result<()> {
    let violations: Vec<Violation> = [("/label", &self.label), ("/plural_label", &self.plural_label)]
      .into_iter()
      .filter(|(_, value)| value.trim().is_empty())
      .map(|(path, _)| Violation::new(path, "must not be empty"))
      .collect();
    if violations.is_empty() { Ok(()) } else { Err(Error::Validation(violations)) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blank_labels_are_rejected() {
    assert!(NewRecordType::new("Incident", "Incidents").validate().is_ok());
    let err = NewRecordType::new(" ", "").validate().unwrap_err();
    assert_eq!(err.violations().map(<[_]>::len), Some(2));
  }
}

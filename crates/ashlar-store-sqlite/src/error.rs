//! Error type for `ashlar-store-sqlite`.

use ashlar_core::{geometry::Srid, store::DomainError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] ashlar_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// The database was created for a different spatial reference.
  #[error("store was created with {stored}, refusing to open it as {requested}")]
  SridMismatch { stored: Srid, requested: Srid },
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { Self::Database(tokio_rusqlite::Error::Rusqlite(e)) }
}

impl DomainError for Error {
  fn domain(&self) -> Option<&ashlar_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

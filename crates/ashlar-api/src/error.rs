//! API error type and [`axum::response::IntoResponse`] implementation.

use ashlar_core::{Error as CoreError, Violation, store::DomainError};
use axum::{
  Json,
  extract::rejection::JsonRejection,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// A schema document or record payload was rejected.
  #[error("{message}")]
  Invalid {
    message:    String,
    violations: Vec<Violation>,
  },

  #[error("uniqueness constraint violation")]
  Conflict,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Map a backend error, keeping the status of its domain error if it has
  /// one.
  pub fn store<E: DomainError>(e: E) -> Self {
    let classified = e.domain().and_then(Self::classify);
    classified.unwrap_or_else(|| Self::Store(Box::new(e)))
  }

  /// The client-facing error for `err`, or `None` for internal failures.
  fn classify(err: &CoreError) -> Option<Self> {
    match err {
      CoreError::SchemaCompile(v) | CoreError::Validation(v) => Some(Self::Invalid {
        message:    err.to_string(),
        violations: v.clone(),
      }),
      CoreError::InvalidFilter(m) => Some(Self::BadRequest(m.clone())),
      CoreError::Conflict(_) => Some(Self::Conflict),
      e if e.is_not_found() => Some(Self::NotFound(e.to_string())),
      _ => None,
    }
  }
}

impl From<CoreError> for ApiError {
  fn from(e: CoreError) -> Self {
    let classified = Self::classify(&e);
    classified.unwrap_or_else(|| Self::Store(Box::new(e)))
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, Json(json!({ "error": m }))).into_response(),
      ApiError::BadRequest(m) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": m }))).into_response()
      }
      ApiError::Invalid { message, violations } => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message, "violations": violations })),
      )
        .into_response(),
      ApiError::Conflict => (
        StatusCode::CONFLICT,
        Json(json!({ "error": "uniqueness constraint violation" })),
      )
        .into_response(),
      ApiError::Store(e) => {
        error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;

  #[test]
  fn domain_errors_keep_their_meaning() {
    let id = Uuid::nil();
    assert!(matches!(ApiError::from(CoreError::BoundaryNotFound(id)), ApiError::NotFound(_)));
    assert!(matches!(ApiError::from(CoreError::Conflict("x".into())), ApiError::Conflict));
    assert!(matches!(
      ApiError::from(CoreError::InvalidFilter("bad".into())),
      ApiError::BadRequest(m) if m == "bad"
    ));
    let invalid = ApiError::from(CoreError::Validation(vec![Violation::new("/geom", "missing")]));
    assert!(matches!(invalid, ApiError::Invalid { violations, .. } if violations[0].path == "/geom"));
  }

  #[test]
  fn chain_corruption_is_internal() {
    let err = ApiError::from(CoreError::ChainIntegrity {
      record_type: Uuid::nil(),
      detail:      "2 current versions".into(),
    });
    assert!(matches!(err, ApiError::Store(_)));
    assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}

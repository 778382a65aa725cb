//! HTTP server wiring for Ashlar: configuration and the top-level router.

use std::{path::PathBuf, sync::Arc};

use ashlar_core::{geometry::Srid, store::AshlarStore};
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `ASHLAR_*` environment variables.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  /// Spatial reference of every geometry in the store.
  #[serde(default)]
  pub srid:       Srid,
}

fn default_host() -> String { "127.0.0.1".to_owned() }

fn default_port() -> u16 { 8000 }

fn default_store_path() -> PathBuf { PathBuf::from("ashlar.sqlite3") }

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       default_host(),
      port:       default_port(),
      store_path: default_store_path(),
      srid:       Srid::default(),
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The API router for `store` with request tracing.
pub fn router<S>(store: Arc<S>) -> Router
where
  S: AshlarStore,
{
  ashlar_api::api_router(store).layer(TraceLayer::new_for_http())
}

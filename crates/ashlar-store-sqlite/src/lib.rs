//! SQLite backend for Ashlar.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. JSON predicates run on SQLite's
//! built-in JSON functions; points are stored as coordinate columns and
//! polygons as GeoJSON with a precomputed envelope.

mod boundary;
mod encode;
mod schema;
mod sql;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;

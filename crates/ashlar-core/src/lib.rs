//! Core types and trait definitions for Ashlar.
//!
//! Ashlar defines versioned schemas for geotemporal event records, validates
//! records against the schema that is current when they are created, and
//! describes the filters and aggregations served over them.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement the traits in [`store`]; the validator and the filter
//! pipeline are pure and can be exercised without any backend.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod aggregate;
pub mod boundary;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod record;
pub mod record_type;
pub mod schema;
pub mod store;
pub mod validator;

pub use error::{Error, Result, Violation};

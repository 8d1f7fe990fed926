//! Same-origin relay for a FHIR consulting site.
//!
//! - [`feed`] fetches, parses and caches the podcast RSS feed server-side
//! - [`catalog`] holds the resources and tools catalogs and their search
//! - [`render`] turns both into HTML with untrusted markup stripped
//! - [`server`] exposes everything over HTTP with `axum`

pub mod catalog;
pub mod config;
pub mod feed;
pub mod render;
pub mod server;
pub mod util;

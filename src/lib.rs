//! Streaming ingestion of Reddit submission and comment dumps into per-project Postgres schemas.
//!
//! The core is [`services::import_file`]: a zstd (or plain) NDJSON source is decoded line by line,
//! parsed, filtered by subreddit, buffered into batches and upserted into a tenant
//! [`db::Namespace`] through [`db::SchemaWriter`]. The HTTP handlers are a thin layer over it.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod preflight;
pub mod services;
pub mod state;

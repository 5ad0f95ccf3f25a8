//! Caption Pipeline
//!
//! Moves an uploaded photo through three independently deployed stages:
//! ingestion (record + photo blob + queue message), captioning (queue
//! consumer that writes the caption) and generation (a poller that turns
//! captions into new images and notifies the requester). The stages only
//! share PostgreSQL, Redis and an S3-compatible bucket.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod stages;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

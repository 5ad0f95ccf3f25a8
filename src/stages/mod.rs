//! The three pipeline stages and the plumbing they share.
//!
//! Stages never call each other. Ingestion pushes onto the caption queue,
//! captioning pulls from it and writes `ready` rows, and generation polls for
//! those rows on a fixed period.

pub mod captioning;
pub mod events;
pub mod generation;
pub mod ingestion;
pub mod scheduler;

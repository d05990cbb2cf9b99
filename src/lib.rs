//! Bounded, durable producer-consumer pipeline.
//!
//! Rows are drained from an upstream PostgreSQL source into an embedded
//! SQLite work queue, fanned out through three parallel delay calls per row,
//! and the responses are persisted back into the same queue row. On shutdown
//! the queue file is the self-describing artifact of the run.

pub mod cli;
pub mod config;
pub mod models;
pub mod remote;
pub mod repository;
pub mod services;
pub mod upstream;

//! Upstream row source abstraction.
//!
//! The pipeline only sees a paginated iterator: given `(limit, offset)` it
//! gets back a possibly-empty sequence of rows in stable `id` order. The
//! trait keeps the producer backend-agnostic so tests can substitute an
//! in-memory source.

mod postgres;

pub use postgres::PgRowSource;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::SourceRow;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("{0}")]
    Config(String),
}

/// A paginated source of upstream rows.
///
/// Contract: ordering is by `id` ascending and pagination is stable under
/// that ordering; an empty page means the source is exhausted.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<SourceRow>, UpstreamError>;
}

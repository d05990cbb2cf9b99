//! PostgreSQL row source.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};

use super::{RowSource, UpstreamError};
use crate::config::UpstreamConfig;
use crate::models::SourceRow;

/// Paginated reader over a single upstream table.
///
/// Rows are serialized server-side with `row_to_json` so the record is
/// preserved verbatim as the queue payload.
pub struct PgRowSource {
    client: Client,
    table: String,
}

impl PgRowSource {
    /// Connect to the upstream database and spawn the connection task.
    pub async fn connect(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        if !is_valid_identifier(&config.table) {
            return Err(UpstreamError::Config(format!(
                "invalid upstream table name '{}'",
                config.table
            )));
        }

        let (client, connection) = config.pg_config().connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            client,
            table: config.table.clone(),
        })
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<SourceRow>, UpstreamError> {
        // Table name is validated at connect time; everything else is bound.
        // The id cast tolerates int4 and int8 key columns alike.
        let sql = format!(
            "SELECT id::bigint, row_to_json(t)::text FROM {} t ORDER BY id LIMIT $1 OFFSET $2",
            self.table
        );
        let rows = self
            .client
            .query(&sql, &[&(limit as i64), &(offset as i64)])
            .await?;

        Ok(rows
            .iter()
            .map(|row| SourceRow {
                source_id: row.get(0),
                payload: row.get(1),
            })
            .collect())
    }
}

/// A conservative SQL identifier check for the configured table name.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_identifier("items"));
        assert!(is_valid_identifier("_staging_rows"));
        assert!(is_valid_identifier("t2"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("items; DROP TABLE items"));
        assert!(!is_valid_identifier("items t"));
    }
}

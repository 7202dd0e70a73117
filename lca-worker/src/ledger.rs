//! Ledger of event ids whose results have been committed. A row here means the event
//! must never be processed again.
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProcessedEventRecord {
    pub event_id: String,
    pub processed_at: DateTime<Utc>,
}

pub async fn has_processed<'c, E>(executor: E, event_id: &str) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query_scalar::<_, bool>(
        r#"
            SELECT EXISTS (SELECT 1 FROM lca_processed_events WHERE event_id = $1)
        "#,
    )
    .bind(event_id)
    .fetch_one(executor)
    .await
}

/// Append `event_id` to the ledger and return the new record. Returns `None` if it was
/// already there, in which case nothing is written.
pub async fn mark_processed<'c, E>(
    executor: E,
    event_id: &str,
) -> Result<Option<ProcessedEventRecord>, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, ProcessedEventRecord>(
        r#"
            INSERT INTO lca_processed_events (event_id, processed_at)
            VALUES ($1, NOW())
            ON CONFLICT (event_id) DO NOTHING
            RETURNING event_id, processed_at
        "#,
    )
    .bind(event_id)
    .fetch_optional(executor)
    .await
}

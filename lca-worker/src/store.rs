use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::{
    compute::LcaMetrics,
    error::ProcessingError,
    ledger,
    results::{self, ComputationResult},
};

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(ComputationResult),
    /// Another worker marked the event first. Nothing was written.
    AlreadyProcessed,
}

/// Durable state of the pipeline: the processed-event ledger and the latest result
/// per product.
#[async_trait]
pub trait LcaStore: Send + Sync {
    async fn has_processed(&self, event_id: &str) -> Result<bool, ProcessingError>;

    /// Upsert the product's result and, if `event_id` is set, mark that event processed.
    /// Both writes land or neither does.
    async fn commit_result(
        &self,
        product_id: &str,
        metrics: &LcaMetrics,
        artifact_uri: Option<&str>,
        event_id: Option<&str>,
    ) -> Result<CommitOutcome, ProcessingError>;

    async fn latest_result(
        &self,
        product_id: &str,
    ) -> Result<Option<ComputationResult>, ProcessingError>;
}

pub struct PgLcaStore {
    pool: PgPool,
}

impl PgLcaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LcaStore for PgLcaStore {
    async fn has_processed(&self, event_id: &str) -> Result<bool, ProcessingError> {
        Ok(ledger::has_processed(&self.pool, event_id).await?)
    }

    async fn commit_result(
        &self,
        product_id: &str,
        metrics: &LcaMetrics,
        artifact_uri: Option<&str>,
        event_id: Option<&str>,
    ) -> Result<CommitOutcome, ProcessingError> {
        let mut txn = self.pool.begin().await?;

        if let Some(event_id) = event_id {
            match ledger::mark_processed(&mut *txn, event_id).await? {
                Some(record) => debug!(
                    event_id,
                    processed_at = %record.processed_at,
                    "Marked event processed"
                ),
                None => {
                    info!(event_id, "Event was committed concurrently, rolling back");
                    txn.rollback().await?;
                    return Ok(CommitOutcome::AlreadyProcessed);
                }
            }
        }

        let result = results::upsert_latest(&mut *txn, product_id, metrics, artifact_uri).await?;
        txn.commit().await?;

        Ok(CommitOutcome::Committed(result))
    }

    async fn latest_result(
        &self,
        product_id: &str,
    ) -> Result<Option<ComputationResult>, ProcessingError> {
        Ok(results::latest_for_product(&self.pool, product_id).await?)
    }
}

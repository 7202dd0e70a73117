use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    artifact::{ArtifactSnapshot, ArtifactWriter},
    compute::{compute, LcaMetrics},
    error::{EventError, ProcessingError},
    event::NormalizedEvent,
    factors::{resolve_factors, FactorRepository},
    publisher::CompletionPublisher,
    results::ComputationResult,
    store::{CommitOutcome, LcaStore},
};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed(ComputationResult),
    /// The event id is already in the ledger. Nothing was written or published.
    Duplicate,
}

/// A committed computation together with the metrics it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredComputation {
    pub result: ComputationResult,
    pub metrics: LcaMetrics,
}

/// Everything needed to turn one event into a stored result and a completion event.
/// Shared by the consumer and the synchronous entry points.
pub struct LcaPipeline {
    factors: Arc<dyn FactorRepository>,
    store: Arc<dyn LcaStore>,
    artifacts: ArtifactWriter,
    publisher: CompletionPublisher,
}

impl LcaPipeline {
    pub fn new(
        factors: Arc<dyn FactorRepository>,
        store: Arc<dyn LcaStore>,
        artifacts: ArtifactWriter,
        publisher: CompletionPublisher,
    ) -> Self {
        Self {
            factors,
            store,
            artifacts,
            publisher,
        }
    }

    pub fn store(&self) -> &dyn LcaStore {
        self.store.as_ref()
    }

    /// One processing attempt for a consumed event. Safe to call again after an error:
    /// the ledger check runs first, and nothing durable happens before the commit.
    pub async fn process_event(
        &self,
        event: &NormalizedEvent,
    ) -> Result<PipelineOutcome, ProcessingError> {
        if let Some(event_id) = event.event_id.as_deref() {
            if self.store.has_processed(event_id).await? {
                info!(
                    event_id,
                    product_id = %event.product_id,
                    "Event already processed, skipping"
                );
                return Ok(PipelineOutcome::Duplicate);
            }
        }

        match self
            .compute_and_store(event, event.event_id.as_deref())
            .await?
        {
            Some(stored) => {
                self.publish(&stored, event).await;
                Ok(PipelineOutcome::Completed(stored.result))
            }
            None => Ok(PipelineOutcome::Duplicate),
        }
    }

    /// Resolve factors, compute, write the audit artifact and commit the result. When
    /// `ledger_event_id` is set the event is marked processed in the same commit, and
    /// `None` is returned if it had already been marked.
    pub async fn compute_and_store(
        &self,
        event: &NormalizedEvent,
        ledger_event_id: Option<&str>,
    ) -> Result<Option<StoredComputation>, ProcessingError> {
        let resolved = resolve_factors(self.factors.as_ref(), event).await?;
        let metrics = compute(event, &resolved);
        if let Some(metric) = metrics.non_finite_total() {
            return Err(EventError::MetricOutOfRange {
                product_id: event.product_id.clone(),
                metric,
            }
            .into());
        }

        let run_id = Uuid::new_v4().to_string();
        let snapshot = ArtifactSnapshot {
            input: event,
            result: &metrics,
            product_id: &event.product_id,
            run_id: &run_id,
            computed_at: Utc::now(),
        };
        let artifact_uri = self
            .artifacts
            .write_snapshot(&event.product_id, &run_id, &snapshot)
            .await;

        let outcome = self
            .store
            .commit_result(
                &event.product_id,
                &metrics,
                artifact_uri.as_deref(),
                ledger_event_id,
            )
            .await?;

        match outcome {
            CommitOutcome::Committed(result) => {
                debug!(
                    product_id = %event.product_id,
                    result_id = %result.id,
                    co2_kg = metrics.co2_kg,
                    "Committed result"
                );
                Ok(Some(StoredComputation { result, metrics }))
            }
            CommitOutcome::AlreadyProcessed => Ok(None),
        }
    }

    pub async fn publish(&self, stored: &StoredComputation, event: &NormalizedEvent) -> bool {
        self.publisher
            .publish(&stored.result, event, &stored.metrics)
            .await
    }
}

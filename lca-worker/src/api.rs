//! Request/response entry points for computing outside the consumer, e.g. from an
//! HTTP handler. These never touch the processed-event ledger.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    compute::{Breakdown, FactorVersions},
    error::ProcessingError,
    event::NormalizedEvent,
    pipeline::LcaPipeline,
    results::ComputationResult,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LcaResponse {
    #[serde(rename = "resultId")]
    pub result_id: Uuid,
    #[serde(rename = "productId")]
    pub product_id: String,
    pub co2_kg: f64,
    pub water_l: f64,
    pub energy_mj: f64,
    pub breakdown: Breakdown,
    pub factors_versions: FactorVersions,
    pub artifact_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "eventId")]
    pub event_id: Option<String>,
    #[serde(rename = "correlationId")]
    pub correlation_id: Option<String>,
}

impl LcaResponse {
    pub fn from_result(
        result: ComputationResult,
        event_id: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            result_id: result.id,
            product_id: result.product_id,
            co2_kg: result.co2_kg,
            water_l: result.water_l,
            energy_mj: result.energy_mj,
            breakdown: result.breakdown,
            factors_versions: result.factors_versions,
            artifact_uri: result.artifact_uri,
            created_at: result.created_at,
            event_id,
            correlation_id,
        }
    }
}

/// Compute and store metrics for `event` right away, then announce them like the
/// consumer would. Calling it twice with the same event recomputes and overwrites.
pub async fn compute_on_demand(
    pipeline: &LcaPipeline,
    event: NormalizedEvent,
) -> Result<LcaResponse, ProcessingError> {
    event.validate()?;

    let stored = pipeline
        .compute_and_store(&event, None)
        .await?
        .ok_or_else(|| ProcessingError::Other("result was not committed".to_string()))?;
    pipeline.publish(&stored, &event).await;

    info!(
        product_id = %event.product_id,
        result_id = %stored.result.id,
        "Computed on demand"
    );

    Ok(LcaResponse::from_result(
        stored.result,
        event.event_id,
        event.correlation_id,
    ))
}

pub async fn latest_result(
    pipeline: &LcaPipeline,
    product_id: &str,
) -> Result<Option<LcaResponse>, ProcessingError> {
    Ok(pipeline
        .store()
        .latest_result(product_id)
        .await?
        .map(|result| LcaResponse::from_result(result, None, None)))
}

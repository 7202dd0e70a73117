use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_kafka::kafka_producer::{
    owned_headers, send_raw_to_kafka, KafkaContext, KafkaProduceError,
};
use rdkafka::{
    error::KafkaError,
    producer::{FutureProducer, Producer},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    compute::{Breakdown, FactorVersions, LcaMetrics, StageMetrics},
    event::NormalizedEvent,
    metric_consts::PUBLISH_FAILURES,
    results::ComputationResult,
};

/// Anything we can produce raw messages to. Sends resolve once the message is
/// acknowledged or has definitely failed.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(String, Vec<u8>)],
    ) -> Result<(), KafkaProduceError>;
}

pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaSink {
    pub fn new(producer: FutureProducer<KafkaContext>) -> Self {
        Self { producer }
    }

    /// Wait for everything still queued in the producer to be delivered.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(timeout)
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(String, Vec<u8>)],
    ) -> Result<(), KafkaProduceError> {
        send_raw_to_kafka(&self.producer, topic, key, payload, owned_headers(headers)).await
    }
}

/// Notification that a product's metrics were (re)computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub event_id: String,
    pub product_id: String,
    pub result_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub co2_kg: f64,
    pub water_liters: f64,
    pub energy_mj: f64,
    pub calculated_at: DateTime<Utc>,
    pub lca: StageMetrics,
    pub breakdown: Breakdown,
    pub versions: FactorVersions,
    #[serde(rename = "artifact_uri")]
    pub artifact_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CompletionEvent {
    pub fn new(result: &ComputationResult, event: &NormalizedEvent, metrics: &LcaMetrics) -> Self {
        let totals = StageMetrics {
            co2_kg: metrics.co2_kg,
            water_l: metrics.water_l,
            energy_mj: metrics.energy_mj,
        };

        Self {
            event_id: event
                .event_id
                .clone()
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            product_id: event.product_id.clone(),
            result_id: result.id,
            occurred_at: event.occurred_at.unwrap_or_else(Utc::now),
            co2_kg: totals.co2_kg,
            water_liters: totals.water_l,
            energy_mj: totals.energy_mj,
            calculated_at: result.created_at,
            lca: totals,
            breakdown: metrics.breakdown,
            versions: metrics.versions.clone(),
            artifact_uri: result.artifact_uri.clone(),
            correlation_id: event.correlation_id.clone(),
        }
    }
}

pub struct CompletionPublisher {
    sink: Arc<dyn MessageSink>,
    topic: String,
}

impl CompletionPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
        }
    }

    /// Publish the completion notification keyed by product id. The result is already
    /// committed at this point, so a failed publish is logged and otherwise ignored.
    /// Returns whether the broker acknowledged the message.
    pub async fn publish(
        &self,
        result: &ComputationResult,
        event: &NormalizedEvent,
        metrics: &LcaMetrics,
    ) -> bool {
        let completion = CompletionEvent::new(result, event, metrics);

        let payload = match serde_json::to_vec(&completion) {
            Ok(payload) => payload,
            Err(err) => {
                metrics::counter!(PUBLISH_FAILURES).increment(1);
                error!(product_id = %event.product_id, "Failed to encode completion event: {err}");
                return false;
            }
        };

        match self
            .sink
            .send(&self.topic, Some(&completion.product_id), &payload, &[])
            .await
        {
            Ok(()) => {
                info!(
                    product_id = %completion.product_id,
                    event_id = %completion.event_id,
                    result_id = %completion.result_id,
                    topic = %self.topic,
                    "Published completion event"
                );
                true
            }
            Err(err) => {
                metrics::counter!(PUBLISH_FAILURES).increment(1);
                error!(
                    product_id = %completion.product_id,
                    topic = %self.topic,
                    "Failed to publish completion event: {err}"
                );
                false
            }
        }
    }
}

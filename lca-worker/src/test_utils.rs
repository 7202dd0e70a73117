use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common_kafka::{
    kafka_consumer::{OffsetErr, RawMessage, RecvErr},
    kafka_producer::KafkaProduceError,
};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use uuid::Uuid;

use crate::{
    artifact::{ArtifactWriter, BlobClient},
    compute::{Breakdown, FactorVersions, LcaMetrics},
    consumer::MessageSource,
    error::{ArtifactError, ProcessingError},
    factors::{EmissionFactor, FactorKind, StaticFactors},
    ledger::ProcessedEventRecord,
    pipeline::LcaPipeline,
    publisher::{CompletionPublisher, MessageSink},
    results::ComputationResult,
    store::{CommitOutcome, LcaStore},
};

pub fn factor(class: &str, version: &str, co2: f64, water: f64, energy: f64) -> EmissionFactor {
    EmissionFactor {
        class: class.to_string(),
        version: version.to_string(),
        co2,
        water,
        energy,
        updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

/// The demo reference data the service ships with, all at version v1.
pub fn reference_factors() -> StaticFactors {
    let ingredients = [
        ("DAIRY", 9.2, 1000.0, 15.0),
        ("SWEETENER", 3.5, 600.0, 5.0),
        ("GRAIN", 2.1, 400.0, 4.0),
        ("MEAT", 27.0, 15000.0, 50.0),
        ("VEGETABLE", 0.9, 300.0, 2.0),
        ("FRUIT", 1.1, 500.0, 2.5),
        ("OIL", 5.0, 200.0, 8.0),
        ("OTHER", 1.0, 200.0, 4.0),
    ];
    let packaging = [
        ("GLASS", 1.8, 150.0, 6.0),
        ("PLASTIC", 2.2, 100.0, 8.0),
        ("PAPER", 1.2, 80.0, 3.0),
        ("ALUMINUM", 10.0, 50.0, 20.0),
        ("OTHER", 2.0, 120.0, 5.0),
    ];
    let transport = [
        ("TRUCK", 0.1, 0.0, 0.05),
        ("SHIP", 0.015, 0.0, 0.01),
        ("AIR", 0.6, 0.0, 0.4),
    ];

    let mut factors = StaticFactors::new();
    for (kind, rows) in [
        (FactorKind::Ingredient, &ingredients[..]),
        (FactorKind::Packaging, &packaging[..]),
        (FactorKind::Transport, &transport[..]),
    ] {
        for (class, co2, water, energy) in rows {
            factors = factors.with_factor(kind, factor(class, "v1", *co2, *water, *energy));
        }
    }
    factors
}

/// Postgres stand-in. Commits can be made to fail a number of times to exercise retries.
#[derive(Default)]
pub struct MemoryStore {
    results: Mutex<HashMap<String, ComputationResult>>,
    ledger: Mutex<HashMap<String, ProcessedEventRecord>>,
    failing_commits: AtomicU32,
    commit_attempts: AtomicU32,
}

impl MemoryStore {
    pub fn failing_commits(count: u32) -> Self {
        let store = Self::default();
        store.failing_commits.store(count, Ordering::SeqCst);
        store
    }

    pub fn commit_attempts(&self) -> u32 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    pub fn ledger(&self) -> Vec<ProcessedEventRecord> {
        self.ledger.lock().unwrap().values().cloned().collect()
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn result_for(&self, product_id: &str) -> Option<ComputationResult> {
        self.results.lock().unwrap().get(product_id).cloned()
    }
}

#[async_trait]
impl LcaStore for MemoryStore {
    async fn has_processed(&self, event_id: &str) -> Result<bool, ProcessingError> {
        Ok(self.ledger.lock().unwrap().contains_key(event_id))
    }

    async fn commit_result(
        &self,
        product_id: &str,
        metrics: &LcaMetrics,
        artifact_uri: Option<&str>,
        event_id: Option<&str>,
    ) -> Result<CommitOutcome, ProcessingError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(ProcessingError::Other("database unavailable".to_string()));
        }

        let mut ledger = self.ledger.lock().unwrap();
        if let Some(event_id) = event_id {
            if ledger.contains_key(event_id) {
                return Ok(CommitOutcome::AlreadyProcessed);
            }
            ledger.insert(
                event_id.to_string(),
                ProcessedEventRecord {
                    event_id: event_id.to_string(),
                    processed_at: Utc::now(),
                },
            );
        }

        let mut results = self.results.lock().unwrap();
        let result = match results.remove(product_id) {
            Some(existing) => overwrite_result(existing, metrics, artifact_uri),
            None => overwrite_result(
                ComputationResult {
                    id: Uuid::now_v7(),
                    product_id: product_id.to_string(),
                    co2_kg: 0.0,
                    water_l: 0.0,
                    energy_mj: 0.0,
                    breakdown: Breakdown::default(),
                    factors_versions: FactorVersions::default(),
                    artifact_uri: None,
                    created_at: Utc::now(),
                },
                metrics,
                artifact_uri,
            ),
        };
        results.insert(product_id.to_string(), result.clone());

        Ok(CommitOutcome::Committed(result))
    }

    async fn latest_result(
        &self,
        product_id: &str,
    ) -> Result<Option<ComputationResult>, ProcessingError> {
        Ok(self.result_for(product_id))
    }
}

// Same in-place overwrite as the postgres upsert: id and creation time are kept.
fn overwrite_result(
    mut result: ComputationResult,
    metrics: &LcaMetrics,
    artifact_uri: Option<&str>,
) -> ComputationResult {
    result.co2_kg = metrics.co2_kg;
    result.water_l = metrics.water_l;
    result.energy_mj = metrics.energy_mj;
    result.breakdown = metrics.breakdown;
    result.factors_versions = metrics.versions.clone();
    result.artifact_uri = artifact_uri.map(str::to_string);
    result
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
}

/// Records every message that was sent. Sends fail while `failures_left` is non-zero.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentMessage>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    pub fn failing_times(count: u32) -> Self {
        let sink = Self::default();
        sink.failures_left.store(count, Ordering::SeqCst);
        sink
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &[(String, Vec<u8>)],
    ) -> Result<(), KafkaProduceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(KafkaProduceError::KafkaProduceError {
                error: KafkaError::MessageProduction(RDKafkaErrorCode::BrokerNotAvailable),
            });
        }

        self.sent.lock().unwrap().push(SentMessage {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            payload: payload.to_vec(),
            headers: headers.to_vec(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobClient {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    unavailable: bool,
}

impl MemoryBlobClient {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{bucket}/{key}"))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobClient for MemoryBlobClient {
    async fn ensure_bucket(&self, _bucket: &str) -> Result<(), ArtifactError> {
        if self.unavailable {
            return Err(ArtifactError::OperationFailed("connection refused".to_string()));
        }
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), ArtifactError> {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), data);
        Ok(())
    }
}

/// A pre-loaded queue of messages. Acks are offsets, recorded when committed.
#[derive(Clone, Default)]
pub struct VecSource {
    queue: Arc<Mutex<VecDeque<RawMessage>>>,
    committed: Arc<Mutex<Vec<i64>>>,
}

impl VecSource {
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        let queue = payloads
            .into_iter()
            .enumerate()
            .map(|(offset, payload)| raw_message(payload, offset as i64))
            .collect();
        Self {
            queue: Arc::new(Mutex::new(queue)),
            committed: Arc::default(),
        }
    }

    pub fn committed(&self) -> Vec<i64> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSource for VecSource {
    type Ack = i64;

    async fn recv(&self, timeout: Duration) -> Result<Option<(RawMessage, i64)>, RecvErr> {
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(message) => {
                let offset = message.offset;
                Ok(Some((message, offset)))
            }
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
                Ok(None)
            }
        }
    }

    async fn commit(&self, ack: i64) -> Result<(), OffsetErr> {
        self.committed.lock().unwrap().push(ack);
        Ok(())
    }
}

pub fn raw_message(payload: Vec<u8>, offset: i64) -> RawMessage {
    RawMessage {
        payload: Some(payload),
        key: None,
        headers: vec![("source".to_string(), b"normalizer".to_vec())],
        partition: 0,
        offset,
    }
}

pub const COMPLETED_TOPIC: &str = "lca.completed";
pub const BUCKET: &str = "ecolabel-acv";

pub fn test_pipeline(
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    blobs: Arc<MemoryBlobClient>,
) -> LcaPipeline {
    LcaPipeline::new(
        Arc::new(reference_factors()),
        store,
        ArtifactWriter::new(blobs, BUCKET, "reports", "minio"),
        CompletionPublisher::new(sink, COMPLETED_TOPIC),
    )
}

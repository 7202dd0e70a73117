use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_kafka::kafka_consumer::{Offset, OffsetErr, RawMessage, RecvErr, SingleTopicConsumer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dead_letter::{dead_letter_headers, DeadLetterReason, DeadLetterRouter},
    error::EventError,
    event::NormalizedEvent,
    metric_consts::{
        EVENTS_COMPLETED, EVENTS_DEAD_LETTERED, EVENTS_RECEIVED, EVENTS_SKIPPED,
        MESSAGE_PROCESSING_TIME, OFFSET_COMMIT_FAILURES, PROCESSING_RETRIES, RECV_ERRORS,
    },
    pipeline::{LcaPipeline, PipelineOutcome},
    retry::RetryPolicy,
};

pub type InboundMessage = RawMessage;

/// Where messages come from. Every received message hands out an `Ack`, which must be
/// committed once the message is fully handled.
#[async_trait]
pub trait MessageSource: Send + Sync {
    type Ack: Send;

    async fn recv(
        &self,
        timeout: Duration,
    ) -> Result<Option<(InboundMessage, Self::Ack)>, RecvErr>;

    async fn commit(&self, ack: Self::Ack) -> Result<(), OffsetErr>;
}

pub struct KafkaSource {
    consumer: SingleTopicConsumer,
}

impl KafkaSource {
    pub fn new(consumer: SingleTopicConsumer) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    type Ack = Offset;

    async fn recv(&self, timeout: Duration) -> Result<Option<(InboundMessage, Offset)>, RecvErr> {
        self.consumer.recv_raw(timeout).await
    }

    // Blocks the worker thread until the broker acks. There is one consumer task and the
    // next message must not start before this one is committed.
    async fn commit(&self, ack: Offset) -> Result<(), OffsetErr> {
        ack.commit()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Completed { result_id: Uuid },
    Skipped,
    DeadLettered(DeadLetterReason),
}

impl MessageOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Completed { .. } => "completed",
            MessageOutcome::Skipped => "skipped",
            MessageOutcome::DeadLettered(_) => "dead_lettered",
        }
    }
}

pub struct EventConsumer<S: MessageSource> {
    source: S,
    pipeline: Arc<LcaPipeline>,
    dead_letters: DeadLetterRouter,
    retry_policy: RetryPolicy,
    poll_timeout: Duration,
}

impl<S: MessageSource> EventConsumer<S> {
    pub fn new(
        source: S,
        pipeline: Arc<LcaPipeline>,
        dead_letters: DeadLetterRouter,
        retry_policy: RetryPolicy,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            pipeline,
            dead_letters,
            retry_policy,
            poll_timeout,
        }
    }

    /// Poll and process messages one at a time until `shutdown` resolves. A message
    /// that is already being processed is always finished and committed first.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting event consumer");

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping event consumer");
                    return;
                }
                received = self.source.recv(self.poll_timeout) => received,
            };

            let (message, ack) = match received {
                Ok(Some(received)) => received,
                Ok(None) => continue,
                Err(err) => {
                    metrics::counter!(RECV_ERRORS).increment(1);
                    error!("Failed to receive message: {err}");
                    continue;
                }
            };

            self.handle(&message, ack).await;
        }
    }

    /// Process a message and then commit it, whatever the outcome.
    pub async fn handle(&self, message: &InboundMessage, ack: S::Ack) -> MessageOutcome {
        let outcome = self.process_message(message).await;

        if let Err(err) = self.source.commit(ack).await {
            metrics::counter!(OFFSET_COMMIT_FAILURES).increment(1);
            error!(
                partition = message.partition,
                offset = message.offset,
                "Failed to commit offset: {err}"
            );
        }

        outcome
    }

    pub async fn process_message(&self, message: &InboundMessage) -> MessageOutcome {
        let started = Instant::now();
        metrics::counter!(EVENTS_RECEIVED).increment(1);

        let outcome = self.process_inner(message).await;

        match &outcome {
            MessageOutcome::Completed { .. } => {
                metrics::counter!(EVENTS_COMPLETED).increment(1);
            }
            MessageOutcome::Skipped => metrics::counter!(EVENTS_SKIPPED).increment(1),
            MessageOutcome::DeadLettered(reason) => {
                metrics::counter!(EVENTS_DEAD_LETTERED, "reason" => reason.as_str()).increment(1);
            }
        }
        metrics::histogram!(MESSAGE_PROCESSING_TIME, "outcome" => outcome.as_str())
            .record(started.elapsed().as_millis() as f64);

        outcome
    }

    async fn process_inner(&self, message: &InboundMessage) -> MessageOutcome {
        let event = match message
            .payload
            .as_deref()
            .ok_or(EventError::EmptyPayload)
            .and_then(NormalizedEvent::from_slice)
        {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    "Rejecting invalid event: {err}"
                );
                return self
                    .dead_letter(message, DeadLetterReason::InvalidEvent, &err.to_string())
                    .await;
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let err = match self.pipeline.process_event(&event).await {
                Ok(PipelineOutcome::Completed(result)) => {
                    info!(
                        product_id = %event.product_id,
                        event_id = ?event.event_id,
                        correlation_id = ?event.correlation_id,
                        result_id = %result.id,
                        attempt,
                        "Processed event"
                    );
                    return MessageOutcome::Completed {
                        result_id: result.id,
                    };
                }
                Ok(PipelineOutcome::Duplicate) => return MessageOutcome::Skipped,
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(product_id = %event.product_id, "Rejecting event: {err}");
                return self
                    .dead_letter(message, DeadLetterReason::InvalidEvent, &err.to_string())
                    .await;
            }

            if !self.retry_policy.should_retry(attempt) {
                error!(
                    product_id = %event.product_id,
                    event_id = ?event.event_id,
                    attempt,
                    "Processing failed on the final attempt: {err}"
                );
                return self
                    .dead_letter(message, DeadLetterReason::RetriesExhausted, &err.to_string())
                    .await;
            }

            let wait = self.retry_policy.retry_interval(attempt);
            metrics::counter!(PROCESSING_RETRIES).increment(1);
            warn!(
                product_id = %event.product_id,
                event_id = ?event.event_id,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Processing failed, retrying: {err}"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn dead_letter(
        &self,
        message: &InboundMessage,
        reason: DeadLetterReason,
        error: &str,
    ) -> MessageOutcome {
        let raw = message.payload.as_deref().unwrap_or_default();
        let headers = dead_letter_headers(&message.headers, reason, error);

        // The message is committed either way, otherwise one bad message would stall
        // the partition
        if let Err(err) = self.dead_letters.route(raw, &headers).await {
            error!(
                partition = message.partition,
                offset = message.offset,
                "Dropping message that could not be dead-lettered: {err}"
            );
        }

        MessageOutcome::DeadLettered(reason)
    }
}

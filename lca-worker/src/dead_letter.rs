use std::sync::Arc;

use tracing::{error, warn};

use crate::{
    error::DeadLetterError, metric_consts::DEAD_LETTER_FAILURES, publisher::MessageSink,
    retry::RetryPolicy,
};

pub const DLQ_REASON_HEADER: &str = "lca-dlq-reason";
pub const DLQ_ERROR_HEADER: &str = "lca-dlq-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The payload could not be decoded or failed validation.
    InvalidEvent,
    /// Processing failed on every allowed attempt.
    RetriesExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::InvalidEvent => "invalid_event",
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Build the headers for a dead-lettered copy: the original ones, then the reason
/// and the last error.
pub fn dead_letter_headers(
    original: &[(String, Vec<u8>)],
    reason: DeadLetterReason,
    error: &str,
) -> Vec<(String, Vec<u8>)> {
    let mut headers = original.to_vec();
    headers.push((DLQ_REASON_HEADER.to_string(), reason.as_str().as_bytes().to_vec()));
    headers.push((DLQ_ERROR_HEADER.to_string(), error.as_bytes().to_vec()));
    headers
}

pub struct DeadLetterRouter {
    sink: Arc<dyn MessageSink>,
    topic: String,
    retry_policy: RetryPolicy,
}

impl DeadLetterRouter {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        topic: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            topic: topic.into(),
            retry_policy,
        }
    }

    /// Forward `raw` to the dead-letter topic byte for byte.
    pub async fn route(
        &self,
        raw: &[u8],
        headers: &[(String, Vec<u8>)],
    ) -> Result<(), DeadLetterError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.sink.send(&self.topic, None, raw, headers).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if !self.retry_policy.should_retry(attempt) {
                metrics::counter!(DEAD_LETTER_FAILURES).increment(1);
                error!(topic = %self.topic, attempt, "Giving up on dead-lettering message: {err}");
                return Err(DeadLetterError::Exhausted {
                    topic: self.topic.clone(),
                    attempts: attempt,
                    error: err.to_string(),
                });
            }

            warn!(topic = %self.topic, attempt, "Failed to dead-letter message, retrying: {err}");
            tokio::time::sleep(self.retry_policy.retry_interval(attempt)).await;
        }
    }
}

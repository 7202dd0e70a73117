use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::{error::SdkError, primitives::ByteStream};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    compute::LcaMetrics, error::ArtifactError, event::NormalizedEvent,
    metric_consts::ARTIFACT_WRITE_FAILURES,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ArtifactError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactError>;
}

pub struct S3Impl {
    inner: aws_sdk_s3::Client,
}

impl S3Impl {
    pub fn new(inner: aws_sdk_s3::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BlobClient for S3Impl {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ArtifactError> {
        match self.inner.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        match self.inner.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket, "Created artifact bucket");
                Ok(())
            }
            // Lost a race with another instance creating it
            Err(SdkError::ServiceError(err)) if err.err().is_bucket_already_owned_by_you() => {
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ArtifactError> {
        self.inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }
}

/// Audit record of one computation run: the event as received and what was computed
/// from it.
#[derive(Debug, Serialize)]
pub struct ArtifactSnapshot<'a> {
    pub input: &'a NormalizedEvent,
    pub result: &'a LcaMetrics,
    #[serde(rename = "productId")]
    pub product_id: &'a str,
    #[serde(rename = "runId")]
    pub run_id: &'a str,
    pub computed_at: DateTime<Utc>,
}

pub struct ArtifactWriter {
    client: Arc<dyn BlobClient>,
    bucket: String,
    prefix: String,
    uri_scheme: String,
    bucket_ready: OnceCell<()>,
}

impl ArtifactWriter {
    pub fn new(
        client: Arc<dyn BlobClient>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        uri_scheme: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            uri_scheme: uri_scheme.into(),
            bucket_ready: OnceCell::new(),
        }
    }

    pub fn key_for(&self, product_id: &str, run_id: &str) -> String {
        format!("{}/{}/{}.json", self.prefix, product_id, run_id)
    }

    /// Store the snapshot and return its URI. Object storage is not required for a
    /// computation to succeed, so failures are logged and reported as `None`.
    pub async fn write_snapshot(
        &self,
        product_id: &str,
        run_id: &str,
        snapshot: &ArtifactSnapshot<'_>,
    ) -> Option<String> {
        match self.try_write(product_id, run_id, snapshot).await {
            Ok(uri) => Some(uri),
            Err(err) => {
                metrics::counter!(ARTIFACT_WRITE_FAILURES).increment(1);
                warn!(
                    product_id,
                    run_id,
                    bucket = %self.bucket,
                    "Failed to write artifact: {err}"
                );
                None
            }
        }
    }

    async fn try_write(
        &self,
        product_id: &str,
        run_id: &str,
        snapshot: &ArtifactSnapshot<'_>,
    ) -> Result<String, ArtifactError> {
        // A failed init leaves the cell empty, so the next write tries again
        self.bucket_ready
            .get_or_try_init(|| self.client.ensure_bucket(&self.bucket))
            .await?;

        let key = self.key_for(product_id, run_id);
        let body = serde_json::to_vec(snapshot)?;
        self.client
            .put(&self.bucket, &key, body, "application/json")
            .await?;

        Ok(format!("{}://{}/{}", self.uri_scheme, self.bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compute::compute, factors::ResolvedFactors};

    fn sample_event() -> NormalizedEvent {
        NormalizedEvent::from_slice(
            br#"{"eventId": "e-1", "productId": "p1",
                 "ingredients": [{"name": "milk", "category": "DAIRY", "quantity_g": 1000}]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_write_snapshot_returns_uri() {
        let event = sample_event();
        let metrics = compute(&event, &ResolvedFactors::default());

        let mut client = MockBlobClient::new();
        client
            .expect_ensure_bucket()
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_put()
            .withf(|bucket, key, data, content_type| {
                let body: serde_json::Value = serde_json::from_slice(data).unwrap();
                bucket.to_string() == "ecolabel-acv"
                    && key.to_string() == "reports/p1/run-1.json"
                    && content_type.to_string() == "application/json"
                    && body["productId"] == "p1"
                    && body["runId"] == "run-1"
                    && body["input"]["eventId"] == "e-1"
                    && body["result"]["co2_kg"] == 0.0
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let writer = ArtifactWriter::new(Arc::new(client), "ecolabel-acv", "reports", "minio");
        let snapshot = ArtifactSnapshot {
            input: &event,
            result: &metrics,
            product_id: "p1",
            run_id: "run-1",
            computed_at: Utc::now(),
        };

        let uri = writer.write_snapshot("p1", "run-1", &snapshot).await;
        assert_eq!(uri.as_deref(), Some("minio://ecolabel-acv/reports/p1/run-1.json"));
    }

    #[tokio::test]
    async fn test_bucket_is_ensured_once() {
        let event = sample_event();
        let metrics = compute(&event, &ResolvedFactors::default());

        let mut client = MockBlobClient::new();
        client
            .expect_ensure_bucket()
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_put()
            .times(2)
            .returning(|_, _, _, _| Ok(()));

        let writer = ArtifactWriter::new(Arc::new(client), "b", "reports", "s3");
        for run_id in ["run-1", "run-2"] {
            let snapshot = ArtifactSnapshot {
                input: &event,
                result: &metrics,
                product_id: "p1",
                run_id,
                computed_at: Utc::now(),
            };
            assert!(writer.write_snapshot("p1", run_id, &snapshot).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_failures_yield_none_and_bucket_init_is_retried() {
        let event = sample_event();
        let metrics = compute(&event, &ResolvedFactors::default());

        let mut client = MockBlobClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_ensure_bucket()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ArtifactError::OperationFailed("unreachable".to_string())));
        client
            .expect_ensure_bucket()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        client
            .expect_put()
            .times(1)
            .returning(|_, _, _, _| Err(ArtifactError::OperationFailed("denied".to_string())));

        let writer = ArtifactWriter::new(Arc::new(client), "b", "reports", "minio");
        let snapshot = ArtifactSnapshot {
            input: &event,
            result: &metrics,
            product_id: "p1",
            run_id: "run-1",
            computed_at: Utc::now(),
        };

        assert_eq!(writer.write_snapshot("p1", "run-1", &snapshot).await, None);
        assert_eq!(writer.write_snapshot("p1", "run-1", &snapshot).await, None);
    }
}

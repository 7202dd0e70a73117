use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors that stop the service from starting or keep running. These are never
/// tied to a single message.
#[derive(Debug, Error)]
pub enum UnhandledError {
    #[error("Config error: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("Kafka error: {0}")]
    KafkaError(#[from] KafkaError),
    #[error("Sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("S3 error: {0}")]
    S3Error(#[from] ArtifactError),
}

/// The inbound message does not describe a valid product event. Never retried.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Message has no payload")]
    EmptyPayload,
    #[error("Payload is not a valid event: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("productId must be a non-empty identifier")]
    MissingProductId,
    #[error("ingredient {index} has an empty name")]
    EmptyIngredientName { index: usize },
    #[error("{field} must be a finite, non-negative number, got {value}")]
    NegativeQuantity { field: String, value: f64 },
    #[error("{metric} overflowed for product {product_id}, input quantities are too large")]
    MetricOutOfRange {
        product_id: String,
        metric: &'static str,
    },
}

/// A failure while computing or persisting a result. Worth retrying.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Failed to encode result: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidEvent(#[from] EventError),
    #[error("Processing failed: {0}")]
    Other(String),
}

impl ProcessingError {
    /// Validation failures are permanent, everything else may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProcessingError::InvalidEvent(_))
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Object storage operation failed: {0}")]
    OperationFailed(String),
    #[error("Failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl<E> From<aws_sdk_s3::error::SdkError<E>> for ArtifactError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: aws_sdk_s3::error::SdkError<E>) -> Self {
        ArtifactError::OperationFailed(aws_sdk_s3::error::DisplayErrorContext(err).to_string())
    }
}

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Failed to route message to {topic} after {attempts} attempts: {error}")]
    Exhausted {
        topic: String,
        attempts: u32,
        error: String,
    },
}

use std::{sync::Arc, time::Duration};

use aws_config::{BehaviorVersion, Region};
use common_kafka::{kafka_consumer::SingleTopicConsumer, kafka_producer::create_kafka_producer};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{error, info};

use crate::{
    artifact::{ArtifactWriter, S3Impl},
    config::Config,
    consumer::{EventConsumer, KafkaSource},
    dead_letter::DeadLetterRouter,
    error::UnhandledError,
    factors::PgFactorRepository,
    pipeline::LcaPipeline,
    publisher::{CompletionPublisher, KafkaSink},
    store::PgLcaStore,
};

const PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Every external client the worker holds, created once at startup and released
/// through `close`.
pub struct AppContext {
    pub config: Config,
    pub pool: PgPool,
    pub kafka_consumer: SingleTopicConsumer,
    pub kafka_sink: Arc<KafkaSink>,
    pub pipeline: Arc<LcaPipeline>,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, UnhandledError> {
        let options = PgPoolOptions::new().max_connections(config.max_pg_connections);
        let pool = options.connect(&config.database_url).await?;

        if config.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations applied");
        }

        let kafka_consumer =
            SingleTopicConsumer::new(config.kafka.clone(), config.consumer.clone())?;
        let kafka_sink = Arc::new(KafkaSink::new(create_kafka_producer(&config.kafka).await?));

        let aws_credentials = aws_sdk_s3::config::Credentials::new(
            &config.object_storage_access_key_id,
            &config.object_storage_secret_access_key,
            None,
            None,
            "environment",
        );
        let aws_conf = aws_sdk_s3::config::Builder::new()
            .region(Region::new(config.object_storage_region.clone()))
            .endpoint_url(&config.object_storage_endpoint)
            .credentials_provider(aws_credentials)
            .behavior_version(BehaviorVersion::latest())
            // MinIO serves buckets as paths, not subdomains
            .force_path_style(true)
            .build();
        let s3_client = S3Impl::new(aws_sdk_s3::Client::from_conf(aws_conf));

        let artifacts = ArtifactWriter::new(
            Arc::new(s3_client),
            config.object_storage_bucket.clone(),
            config.artifact_prefix.clone(),
            config.artifact_uri_scheme.clone(),
        );
        let publisher =
            CompletionPublisher::new(kafka_sink.clone(), config.lca_completed_topic.clone());
        let pipeline = LcaPipeline::new(
            Arc::new(PgFactorRepository::new(pool.clone())),
            Arc::new(PgLcaStore::new(pool.clone())),
            artifacts,
            publisher,
        );

        info!(
            "AppContext initialized, subscribed to topic {}",
            config.consumer.kafka_consumer_topic
        );

        Ok(Self {
            config: config.clone(),
            pool,
            kafka_consumer,
            kafka_sink,
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn event_consumer(&self) -> EventConsumer<KafkaSource> {
        let retry_policy = self.config.retry_policy();
        EventConsumer::new(
            KafkaSource::new(self.kafka_consumer.clone()),
            self.pipeline.clone(),
            DeadLetterRouter::new(
                self.kafka_sink.clone(),
                self.config.dlq_topic.clone(),
                retry_policy.clone(),
            ),
            retry_policy,
            self.config.poll_timeout.0,
        )
    }

    /// Leave the consumer group, deliver whatever the producer still has queued and
    /// close the database pool.
    pub async fn close(self) {
        self.kafka_consumer.close();

        if let Err(err) = self.kafka_sink.flush(PRODUCER_FLUSH_TIMEOUT) {
            error!("Failed to flush kafka producer: {err}");
        }

        self.pool.close().await;
        info!("AppContext closed");
    }
}

use std::time::Duration;

use metrics::gauge;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientContext;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

/// Client context shared by the producer and the consumer. Turns librdkafka's
/// periodic statistics into gauges.
#[derive(Default)]
pub struct KafkaContext {}

impl ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("kafka_callback_queue_depth", "client" => stats.name.clone())
            .set(stats.replyq as f64);
        gauge!("kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("kafka_producer_queue_bytes").set(stats.msg_size as f64);

        for broker in stats.brokers.values() {
            let broker_id = broker.nodeid.to_string();
            gauge!("kafka_broker_requests_pending", "broker" => broker_id.clone())
                .set(broker.outbuf_cnt as f64);
            if let Some(rtt) = &broker.rtt {
                gauge!("kafka_broker_rtt_avg_us", "broker" => broker_id).set(rtt.avg as f64);
            }
        }

        for (topic, topic_stats) in &stats.topics {
            for partition in topic_stats.partitions.values() {
                // librdkafka reports -1 for the internal unassigned partition and for unknown lag
                if partition.partition < 0 || partition.consumer_lag < 0 {
                    continue;
                }
                gauge!(
                    "kafka_consumer_lag",
                    "topic" => topic.clone(),
                    "partition" => partition.partition.to_string()
                )
                .set(partition.consumer_lag as f64);
            }
        }
    }
}

impl ConsumerContext for KafkaContext {}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = config.client_config();
    client_config
        .set("acks", &config.kafka_producer_acks)
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set("compression.codec", &config.kafka_compression_codec)
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        );

    debug!("rdkafka producer configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext::default())?;

    // Fail at startup rather than on the first send if no broker is reachable
    match producer.client().fetch_metadata(None, METADATA_TIMEOUT) {
        Ok(metadata) => {
            info!(
                brokers = metadata.brokers().len(),
                topics = metadata.topics().len(),
                "Connected to Kafka"
            );
        }
        Err(err) => {
            error!("Failed to fetch metadata from Kafka brokers: {err}");
            return Err(err);
        }
    }

    Ok(producer)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Build rdkafka headers from plain key/value pairs.
pub fn owned_headers(headers: &[(String, Vec<u8>)]) -> Option<OwnedHeaders> {
    if headers.is_empty() {
        return None;
    }
    let owned = headers.iter().fold(OwnedHeaders::new(), |acc, (key, value)| {
        acc.insert(Header {
            key,
            value: Some(value),
        })
    });
    Some(owned)
}

/// Produce a single payload and wait for the broker to acknowledge it. The bytes are
/// sent exactly as given.
pub async fn send_raw_to_kafka<C: ClientContext + 'static>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    key: Option<&str>,
    payload: &[u8],
    headers: Option<OwnedHeaders>,
) -> Result<(), KafkaProduceError> {
    let record = FutureRecord {
        topic,
        key,
        payload: Some(payload),
        timestamp: None,
        partition: None,
        headers,
    };

    let delivery = match kafka_producer.send_result(record) {
        Ok(f) => f,
        Err((e, _)) => return Err(KafkaProduceError::KafkaProduceError { error: e }),
    };

    match delivery.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err((e, _))) => Err(KafkaProduceError::KafkaProduceError { error: e }),
        Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
    }
}

use std::sync::{Arc, Weak};
use std::time::Duration;

use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    message::Headers,
    Message, TopicPartitionList,
};
use tracing::debug;

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::kafka_producer::KafkaContext;

/// A consumer bound to a single topic, handing out raw messages and
/// committing offsets only when the caller says so.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

/// An owned copy of a consumed message. The payload is kept as the exact bytes
/// read from the broker, so it can be forwarded elsewhere unmodified.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub payload: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub partition: i32,
    pub offset: i64,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = common_config.client_config();
        client_config
            .set("group.id", consumer_config.kafka_consumer_group)
            .set(
                "session.timeout.ms",
                consumer_config.kafka_consumer_session_timeout_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                consumer_config.kafka_consumer_max_poll_interval_ms.to_string(),
            )
            .set(
                "auto.offset.reset",
                consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            // Offsets are only ever committed explicitly, per message
            .set("enable.auto.offset.store", "false");

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(KafkaContext::default())?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Wait up to `timeout` for the next message. Returns `Ok(None)` when nothing
    /// arrived in time.
    pub async fn recv_raw(
        &self,
        timeout: Duration,
    ) -> Result<Option<(RawMessage, Offset)>, RecvErr> {
        let message = match tokio::time::timeout(timeout, self.inner.consumer.recv()).await {
            Ok(message) => message?,
            Err(_elapsed) => return Ok(None),
        };

        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        let raw = RawMessage {
            payload: message.payload().map(<[u8]>::to_vec),
            key: message.key().map(<[u8]>::to_vec),
            headers,
            partition: message.partition(),
            offset: message.offset(),
        };

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: raw.partition,
            offset: raw.offset,
        };

        Ok(Some((raw, offset)))
    }

    /// Leave the consumer group cleanly, so the partitions are handed over
    /// without waiting for the session timeout.
    pub fn close(&self) {
        self.inner.consumer.unsubscribe();
    }
}

#[derive(Debug)]
pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    /// Synchronously commit this message as consumed. The committed position is the
    /// next offset to read, as Kafka expects.
    pub fn commit(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &inner.topic,
            self.partition,
            rdkafka::Offset::Offset(self.offset + 1),
        )?;
        inner.consumer.commit(&tpl, CommitMode::Sync)?;
        Ok(())
    }
}

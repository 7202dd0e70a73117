use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "lcalite-service")]
    pub kafka_client_id: String,

    // Every send is awaited before the offset is committed, keep batches small
    #[envconfig(default = "5")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "64")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "100000")]
    pub kafka_producer_queue_messages: u32,

    #[envconfig(default = "all")]
    pub kafka_producer_acks: String, // 0, 1, all

    // Delivery gives up after this, and the send returns an error
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
}

impl KafkaConfig {
    /// Settings shared by every client we create: brokers, identity, TLS and statistics.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("client.id", &self.kafka_client_id)
            .set("statistics.interval.ms", "10000");

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        client_config
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Must stay off for consumers that commit each message themselves
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "45000")]
    pub kafka_consumer_session_timeout_ms: u32,

    // Upper bound on how long one message may take, retries and backoff included
    #[envconfig(default = "300000")]
    pub kafka_consumer_max_poll_interval_ms: u32,
}

impl ConsumerConfig {
    /// Group, topic and commit mode depend on the service, so they have no derive
    /// default. Call this before loading the config to fill in whichever of them the
    /// environment leaves unset.
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str, auto_commit: bool) {
        let defaults = [
            ("KAFKA_CONSUMER_GROUP", consumer_group.to_string()),
            ("KAFKA_CONSUMER_TOPIC", consumer_topic.to_string()),
            ("KAFKA_CONSUMER_AUTO_COMMIT", auto_commit.to_string()),
        ];
        for (name, value) in defaults {
            if std::env::var(name).is_err() {
                std::env::set_var(name, value);
            }
        }
    }
}

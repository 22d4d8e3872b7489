//! Kafka record sink.

use std::time::Duration;

use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use rook_core::error::CrawlError;
use rook_core::record::Record;
use rook_core::traits::RecordSink;

/// Publishes records as JSON to one Kafka topic.
///
/// Keys are the record's sink key, so re-crawls of the same message land
/// on the same partition and compacting consumers see one live value per
/// message.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl KafkaSink {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, CrawlError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| CrawlError::SinkError(format!("producer creation failed: {e}")))?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
            delivery_timeout: Duration::from_secs(5),
        })
    }
}

impl RecordSink for KafkaSink {
    async fn publish(&self, record: &Record) -> Result<(), CrawlError> {
        let key = record.sink_key();
        let payload = serde_json::to_string(record)?;

        let message = FutureRecord::to(&self.topic).key(&key).payload(&payload);
        self.producer
            .send(message, self.delivery_timeout)
            .await
            .map_err(|(e, _)| CrawlError::SinkError(e.to_string()))?;

        tracing::debug!(%key, topic = %self.topic, "Record published");
        Ok(())
    }
}

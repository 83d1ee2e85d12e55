//! Click event publisher.
//!
//! Events travel: bounded in-process queue -> detached sender task ->
//! broker, keyed by short code. Anything that cannot make that trip
//! (queue overflow, broker outage) is appended to the Redis fallback
//! stream instead, which the ingestion worker drains separately. The
//! redirect path therefore never waits on the broker and never loses
//! an event to a full queue.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use redis::aio::ConnectionManager;
use redis::streams::StreamMaxlen;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{IngestionConfig, KafkaConfig};
use crate::models::ClickEvent;
use crate::service::ClickPublisher;
use crate::{metrics, Error, Result};

/// Kafka-backed publisher with a Redis-stream fallback channel.
pub struct KafkaClickPublisher {
    queue: mpsc::Sender<ClickEvent>,
    fallback: FallbackStream,
}

/// Append-only Redis stream holding events the broker didn't take.
#[derive(Clone)]
struct FallbackStream {
    conn: ConnectionManager,
    key: String,
    maxlen: usize,
}

impl FallbackStream {
    async fn append(&self, event: &ClickEvent) -> Result<()> {
        let mut conn = self.conn.clone();
        let delta = event.delta.to_string();
        let _: String = conn
            .xadd_maxlen(
                &self.key,
                StreamMaxlen::Approx(self.maxlen),
                "*",
                &[
                    ("short_code", event.short_code.as_str()),
                    ("delta", delta.as_str()),
                ],
            )
            .await?;
        metrics::clicks::FALLBACK.inc();
        Ok(())
    }
}

impl KafkaClickPublisher {
    /// Build the producer and spawn the detached sender task.
    pub fn new(
        kafka: &KafkaConfig,
        ingestion: &IngestionConfig,
        fallback_conn: ConnectionManager,
    ) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &kafka.brokers)
            .set("message.timeout.ms", kafka.publish_timeout_ms.to_string())
            .set("queue.buffering.max.messages", "100000")
            .set("queue.buffering.max.ms", "5")
            .set("acks", "1")
            .create()
            .map_err(|e| Error::Internal(format!("failed to create kafka producer: {e}")))?;

        let fallback = FallbackStream {
            conn: fallback_conn,
            key: ingestion.fallback_stream_key.clone(),
            maxlen: ingestion.fallback_stream_maxlen,
        };

        let (tx, rx) = mpsc::channel(kafka.publish_queue_size);
        tokio::spawn(sender_loop(
            producer,
            kafka.click_topic.clone(),
            Duration::from_millis(kafka.publish_timeout_ms),
            rx,
            fallback.clone(),
        ));

        Ok(Self {
            queue: tx,
            fallback,
        })
    }
}

/// Drains the queue into the broker; failed sends divert to the
/// fallback stream so the event survives the outage.
async fn sender_loop(
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
    mut rx: mpsc::Receiver<ClickEvent>,
    fallback: FallbackStream,
) {
    while let Some(event) = rx.recv().await {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("unserializable click event: {e}");
                continue;
            }
        };

        let record = FutureRecord::to(&topic)
            .payload(&payload)
            .key(&event.short_code);

        match producer.send(record, timeout).await {
            Ok(_) => metrics::clicks::PUBLISHED.inc(),
            Err((e, _)) => {
                tracing::warn!(short_code = %event.short_code, "broker publish failed: {e}");
                if let Err(e) = fallback.append(&event).await {
                    metrics::clicks::DROPPED.inc();
                    tracing::error!(
                        short_code = %event.short_code,
                        "fallback stream append failed, click event lost: {e}"
                    );
                }
            }
        }
    }
    tracing::debug!("click publisher queue closed, sender task exiting");
}

#[async_trait]
impl ClickPublisher for KafkaClickPublisher {
    /// Enqueue for the sender task; a full queue writes the fallback
    /// stream synchronously so the event is preserved either way.
    async fn publish(&self, event: ClickEvent) -> Result<()> {
        match self.queue.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event))
            | Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(
                    short_code = %event.short_code,
                    "publish queue unavailable, writing fallback stream"
                );
                self.fallback.append(&event).await
            }
        }
    }
}

//! Click ingestion worker.
//!
//! One worker owns a subset of broker partitions (consumer group
//! assignment) plus its private aggregation hash `agg:<worker_id>`.
//! Records aggregate in memory per poll iteration, land in the hash
//! with one pipelined round-trip, and flush to the OLTP counter and
//! the OLAP table on a time/size trigger. A separate cadence drains
//! the fallback stream that caught events during broker outages.
//!
//! The loop never dies on a bad record: schema mismatches are skipped
//! with a warning, and OLTP outages back off while the broker buffers
//! the lag.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::cache::keys;
use crate::config::{IngestionConfig, KafkaConfig};
use crate::ingest::{ClickAggregates, OlapSink};
use crate::models::{CachedUrlPayload, ClickEvent};
use crate::service::{UrlCache, UrlStore};
use crate::{metrics, Error, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct IngestWorker {
    consumer: StreamConsumer,
    redis: ConnectionManager,
    store: Arc<dyn UrlStore>,
    cache: Arc<dyn UrlCache>,
    olap: OlapSink,
    config: IngestionConfig,
    consumer_name: String,
    agg_key: String,
}

impl IngestWorker {
    pub fn new(
        kafka: &KafkaConfig,
        config: IngestionConfig,
        consumer_name: String,
        redis: ConnectionManager,
        store: Arc<dyn UrlStore>,
        cache: Arc<dyn UrlCache>,
        olap: OlapSink,
    ) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &kafka.brokers)
            .set("group.id", &config.consumer_group)
            .set("client.id", &consumer_name)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .create()
            .map_err(|e| Error::Internal(format!("failed to create kafka consumer: {e}")))?;

        consumer
            .subscribe(&[&kafka.click_topic])
            .map_err(|e| Error::Internal(format!("failed to subscribe to click topic: {e}")))?;

        let agg_key = keys::agg(&consumer_name);
        Ok(Self {
            consumer,
            redis,
            store,
            cache,
            olap,
            config,
            consumer_name,
            agg_key,
        })
    }

    /// Run forever. Only startup-time misconfiguration errors escape;
    /// runtime dependency failures back off and retry in place.
    pub async fn run(&self) -> Result<()> {
        self.ensure_fallback_group().await?;
        if let Err(e) = self.olap.ensure_table().await {
            tracing::warn!("olap DDL failed, inserts will retry: {e}");
        }

        tracing::info!(
            consumer = %self.consumer_name,
            group = %self.config.consumer_group,
            "ingestion worker started"
        );

        let flush_interval = Duration::from_secs(self.config.flush_interval_seconds);
        let drain_interval = Duration::from_secs(self.config.fallback_drain_interval_seconds);
        let mut last_flush = Instant::now();
        let mut last_drain = Instant::now();
        let mut flush_failures: u32 = 0;
        let mut hash_len: usize = 0;

        loop {
            if flush_failures == 0 {
                match self.poll_iteration().await {
                    Ok(applied) if applied > 0 => {
                        hash_len = self.hash_len().await.unwrap_or(hash_len);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("poll iteration failed: {e}"),
                }
            } else {
                // OLTP is struggling; stop polling so the broker holds
                // the backlog, and retry the flush below.
                let backoff = backoff_for(flush_failures);
                tracing::warn!(
                    flush_failures,
                    backoff_seconds = backoff.as_secs(),
                    "flush failing, polling paused"
                );
                tokio::time::sleep(backoff).await;
            }

            if last_drain.elapsed() >= drain_interval {
                match self.drain_fallback().await {
                    Ok(drained) if drained > 0 => {
                        tracing::debug!(drained, "fallback stream drained");
                        hash_len = self.hash_len().await.unwrap_or(hash_len);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("fallback drain failed: {e}"),
                }
                last_drain = Instant::now();
            }

            if last_flush.elapsed() >= flush_interval
                || hash_len >= self.config.flush_size_threshold
            {
                match self.flush().await {
                    Ok(flushed) => {
                        if flushed > 0 {
                            tracing::info!(deltas = flushed, "flush complete");
                        }
                        flush_failures = 0;
                        hash_len = 0;
                    }
                    Err(e) => {
                        flush_failures += 1;
                        tracing::error!(flush_failures, "flush failed: {e}");
                    }
                }
                last_flush = Instant::now();
            }
        }
    }

    /// Poll the broker for up to `batch_size` records within
    /// `block_ms`, validate, aggregate, and apply the iteration's map
    /// to the shared hash in one pipelined round-trip. Returns the
    /// number of deltas applied.
    async fn poll_iteration(&self) -> Result<i64> {
        let deadline = Duration::from_millis(self.config.block_ms);
        let started = Instant::now();
        let mut pending = ClickAggregates::new();
        let mut records = 0usize;

        while records < self.config.batch_size && started.elapsed() < deadline {
            let remaining = deadline.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(msg)) => {
                    records += 1;
                    if let Some(payload) = msg.payload() {
                        match serde_json::from_slice::<ClickEvent>(payload) {
                            Ok(event) if event.is_valid() => {
                                pending.add_event(&event);
                                metrics::ingest::EVENTS_CONSUMED.inc();
                            }
                            Ok(event) => {
                                metrics::ingest::EVENTS_SKIPPED.inc();
                                tracing::warn!(
                                    short_code = %event.short_code,
                                    delta = event.delta,
                                    "skipping out-of-range click event"
                                );
                            }
                            Err(e) => {
                                metrics::ingest::EVENTS_SKIPPED.inc();
                                tracing::warn!("skipping malformed click payload: {e}");
                            }
                        }
                    }
                    self.consumer.commit_message(&msg, CommitMode::Async).ok();
                }
                Ok(Err(e)) => {
                    tracing::warn!("kafka recv error: {e}");
                    break;
                }
                // Timeout: poll window is over, proceed to flush checks.
                Err(_) => break,
            }
        }

        if pending.is_empty() {
            return Ok(0);
        }
        let total = pending.total();
        self.apply_to_hash(&pending).await?;
        Ok(total)
    }

    /// One pipelined HINCRBY per aggregated code.
    async fn apply_to_hash(&self, aggregates: &ClickAggregates) -> Result<()> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for (code, delta) in aggregates.iter() {
            pipe.hincr(&self.agg_key, code, *delta).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn hash_len(&self) -> Result<usize> {
        let mut conn = self.redis.clone();
        let len: usize = conn.hlen(&self.agg_key).await?;
        metrics::ingest::AGG_HASH_SIZE.set(len as i64);
        Ok(len)
    }

    /// Drain the whole pipeline once: read-and-clear the hash, apply
    /// the deltas to the OLTP counter, write fresh snapshots back to
    /// the cache, settle the click buffers, and append OLAP rows.
    /// Returns the number of deltas flushed.
    async fn flush(&self) -> Result<i64> {
        let mut conn = self.redis.clone();

        // Atomic read-and-clear. A crash between here and the OLTP
        // update loses this flush's deltas; that narrow window is the
        // accepted trade-off, and OLAP rows bound the drift.
        let (raw, _deleted): (HashMap<String, String>, i64) = redis::pipe()
            .atomic()
            .hgetall(&self.agg_key)
            .del(&self.agg_key)
            .query_async(&mut conn)
            .await?;

        let aggregates = ClickAggregates::from_raw_hash(raw);
        if aggregates.is_empty() {
            return Ok(0);
        }
        let total = aggregates.total();
        let deltas = aggregates.into_deltas();

        let updated = match self.store.apply_click_deltas(&deltas).await {
            Ok(updated) => updated,
            Err(e) => {
                // The hash was already cleared; put the deltas back so
                // the next flush retries them.
                self.rebuffer(&deltas).await;
                return Err(e);
            }
        };
        metrics::ingest::DELTAS_FLUSHED.inc_by(total as u64);

        // Write the updated counts back instead of deleting, so the
        // next redirect stays a cache hit.
        let payloads: Vec<CachedUrlPayload> =
            updated.iter().map(CachedUrlPayload::from).collect();
        if let Err(e) = self.cache.store_batch(&payloads).await {
            tracing::warn!("cache write-back failed: {e}");
        }

        if let Err(e) = self.cache.decr_click_buffers(&deltas).await {
            tracing::warn!("click buffer settle failed: {e}");
        }

        match self.olap.insert_deltas(&deltas).await {
            Ok(rows) => metrics::ingest::OLAP_ROWS.inc_by(rows as u64),
            // Never re-buffered: OLAP divergence is reconciled
            // out-of-band.
            Err(e) => tracing::warn!("olap insert failed, rows dropped: {e}"),
        }

        Ok(total)
    }

    async fn rebuffer(&self, deltas: &[(String, i64)]) {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for (code, delta) in deltas {
            pipe.hincr(&self.agg_key, code, *delta).ignore();
        }
        if let Err(e) = pipe.query_async::<_, ()>(&mut conn).await {
            tracing::error!(
                deltas = deltas.len(),
                "re-buffering drained deltas failed, counts lost: {e}"
            );
        }
    }

    /// Create the fallback stream's consumer group (and the stream
    /// itself) if missing.
    async fn ensure_fallback_group(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let result: std::result::Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(
                &self.config.fallback_stream_key,
                &self.config.consumer_group,
                "$",
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // Group already exists from an earlier worker: fine.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull pending fallback records, fold them into the aggregation
    /// hash, and ack. Returns the number of events drained.
    async fn drain_fallback(&self) -> Result<usize> {
        let mut conn = self.redis.clone();
        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.consumer_name)
            .count(self.config.batch_size);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.config.fallback_stream_key], &[">"], &options)
            .await?;

        let mut aggregates = ClickAggregates::new();
        let mut ack_ids = Vec::new();

        for stream in reply.keys {
            for entry in stream.ids {
                let short_code: Option<String> = entry.get("short_code");
                let delta: Option<i64> = entry.get("delta");
                match (short_code, delta) {
                    (Some(code), Some(delta))
                        if (ClickEvent {
                            short_code: code.clone(),
                            delta,
                        })
                        .is_valid() =>
                    {
                        aggregates.add(&code, delta);
                    }
                    _ => {
                        tracing::warn!(id = %entry.id, "skipping malformed fallback record");
                    }
                }
                // Malformed records are acked too; redelivery cannot
                // fix them.
                ack_ids.push(entry.id.clone());
            }
        }

        if ack_ids.is_empty() {
            return Ok(0);
        }

        let drained = aggregates.total();
        if !aggregates.is_empty() {
            self.apply_to_hash(&aggregates).await?;
        }

        let _: i64 = conn
            .xack(
                &self.config.fallback_stream_key,
                &self.config.consumer_group,
                &ack_ids,
            )
            .await?;

        metrics::ingest::FALLBACK_DRAINED.inc_by(drained.max(0) as u64);
        Ok(drained as usize)
    }
}

fn backoff_for(failures: u32) -> Duration {
    let exp = Duration::from_secs(1 << failures.min(5));
    exp.min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_for(1), Duration::from_secs(2));
        assert_eq!(backoff_for(2), Duration::from_secs(4));
        assert_eq!(backoff_for(4), Duration::from_secs(16));
        assert_eq!(backoff_for(10), MAX_BACKOFF);
        assert_eq!(backoff_for(u32::MAX), MAX_BACKOFF);
    }
}

//! Redis-backed URL cache.
//!
//! Reads go to the replica connection, writes to the primary. Every
//! TTL carries jitter so entries written in one burst (warmer batch,
//! flush write-back) never expire in one burst.

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::cache::keys;
use crate::config::CacheConfig;
use crate::models::CachedUrlPayload;
use crate::service::UrlCache;
use crate::{metrics, Error, Result};

/// Marker stored under `url:<code>` for codes known to be absent, so
/// repeat lookups of junk codes don't hit the OLTP store.
const NEGATIVE_SENTINEL: &str = "__nx__";

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CachedUrlPayload),
    /// The code was recently confirmed absent.
    Negative,
    Miss,
}

/// Apply `± jitter` (a fraction, e.g. 0.2) to a base TTL.
#[must_use]
pub fn jittered_ttl(base_seconds: u64, jitter: f64) -> u64 {
    if base_seconds == 0 || jitter <= 0.0 {
        return base_seconds;
    }
    let spread = rand::thread_rng().gen_range(-jitter..=jitter);
    let scaled = (base_seconds as f64 * (1.0 + spread)).round();
    scaled.max(1.0) as u64
}

/// URL cache over a writer (primary) and reader (replica) connection.
#[derive(Clone)]
pub struct RedisUrlCache {
    writer: ConnectionManager,
    reader: ConnectionManager,
    config: CacheConfig,
}

impl RedisUrlCache {
    #[must_use]
    pub fn new(writer: ConnectionManager, reader: ConnectionManager, config: CacheConfig) -> Self {
        Self {
            writer,
            reader,
            config,
        }
    }

    fn url_ttl(&self) -> u64 {
        jittered_ttl(self.config.url_ttl_seconds, self.config.ttl_jitter)
    }

    /// Liveness probe against the primary, for health endpoints.
    pub async fn ping(&self) -> bool {
        let mut conn = self.writer.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[async_trait]
impl UrlCache for RedisUrlCache {
    /// Read `url:<code>` from the replica.
    async fn lookup(&self, short_code: &str) -> Result<CacheLookup> {
        let mut conn = self.reader.clone();
        let raw: Option<String> = conn.get(keys::url(short_code)).await?;

        match raw {
            None => {
                metrics::cache::CACHE_MISSES
                    .with_label_values(&["replica"])
                    .inc();
                Ok(CacheLookup::Miss)
            }
            Some(ref v) if v == NEGATIVE_SENTINEL => {
                metrics::cache::CACHE_HITS
                    .with_label_values(&["negative"])
                    .inc();
                Ok(CacheLookup::Negative)
            }
            Some(json) => match serde_json::from_str::<CachedUrlPayload>(&json) {
                Ok(payload) => {
                    metrics::cache::CACHE_HITS.with_label_values(&["hit"]).inc();
                    Ok(CacheLookup::Hit(payload))
                }
                Err(e) => {
                    // A corrupt entry behaves like a miss; the caller
                    // repopulates it from the OLTP store.
                    tracing::warn!(short_code, "corrupt cache entry: {e}");
                    Ok(CacheLookup::Miss)
                }
            },
        }
    }

    /// Write-through a snapshot with TTL + jitter.
    async fn store(&self, payload: &CachedUrlPayload) -> Result<()> {
        let mut conn = self.writer.clone();
        let json = serde_json::to_string(payload)?;
        let _: () = conn
            .set_ex(keys::url(&payload.short_code), json, self.url_ttl())
            .await?;
        Ok(())
    }

    async fn store_negative(&self, short_code: &str) -> Result<()> {
        let mut conn = self.writer.clone();
        let _: () = conn
            .set_ex(
                keys::url(short_code),
                NEGATIVE_SENTINEL,
                self.config.negative_ttl_seconds,
            )
            .await?;
        Ok(())
    }

    /// One pipelined round-trip for a batch of snapshots (warmer, flush
    /// write-back). Each entry gets its own jittered TTL.
    async fn store_batch(&self, payloads: &[CachedUrlPayload]) -> Result<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer.clone();
        let mut pipe = redis::pipe();
        for payload in payloads {
            let json = serde_json::to_string(payload)?;
            pipe.set_ex(keys::url(&payload.short_code), json, self.url_ttl())
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// `SET NX EX` on `lock:<code>` against the primary. Returns the
    /// token required to release.
    async fn try_lock(&self, short_code: &str) -> Result<Option<String>> {
        let lock_key = keys::lock(short_code);
        let token = nanoid::nanoid!(12);
        let mut conn = self.writer.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(self.config.lock_ttl_seconds)
            .query_async(&mut conn)
            .await?;

        if acquired.is_some() {
            tracing::debug!(lock_key = %lock_key, "lock acquired");
            Ok(Some(token))
        } else {
            tracing::debug!(lock_key = %lock_key, "lock held elsewhere");
            Ok(None)
        }
    }

    /// Release the lock only if we still hold it; a lock that expired
    /// and was reacquired by another instance must not be deleted.
    async fn unlock(&self, short_code: &str, token: &str) -> Result<()> {
        let script = Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
            "#,
        );

        let mut conn = self.writer.clone();
        let released: i32 = script
            .key(keys::lock(short_code))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Internal(format!("failed to release lock: {e}")))?;

        if released == 0 {
            tracing::debug!(short_code, "lock already expired at release");
        }
        Ok(())
    }

    /// Atomic INCR on `click_buffer:<code>`; the TTL is attached on
    /// the first increment of a window.
    async fn incr_click_buffer(&self, short_code: &str) -> Result<i64> {
        let key = keys::click_buffer(short_code);
        let mut conn = self.writer.clone();
        let count: i64 = conn.incr(&key, 1i64).await?;
        if count == 1 {
            let _: () = conn
                .expire(&key, self.config.click_buffer_ttl_seconds as i64)
                .await?;
        }
        Ok(count)
    }

    async fn read_click_buffer(&self, short_code: &str) -> Result<i64> {
        let mut conn = self.reader.clone();
        let value: Option<i64> = conn.get(keys::click_buffer(short_code)).await?;
        Ok(value.unwrap_or(0))
    }

    /// Subtract flushed deltas from the per-code buffers in one
    /// pipelined round-trip. Buffers can go slightly negative when a
    /// buffer expired between redirect and flush; readers clamp to 0.
    async fn decr_click_buffers(&self, deltas: &[(String, i64)]) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer.clone();
        let mut pipe = redis::pipe();
        for (code, delta) in deltas {
            pipe.cmd("DECRBY")
                .arg(keys::click_buffer(code))
                .arg(*delta)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Bump the code's score in the hot set; the set expires a window
    /// after its first write.
    async fn bump_hot(&self, short_code: &str) -> Result<()> {
        let mut conn = self.writer.clone();
        let score: f64 = conn.zincr(keys::HOT_URLS, short_code, 1i64).await?;
        if score <= 1.0 {
            let _: () = conn
                .expire(keys::HOT_URLS, self.config.hot_set_ttl_seconds as i64)
                .await?;
        }
        Ok(())
    }

    /// Top-N codes by recent click score, hottest first.
    async fn hot_top(&self, n: usize) -> Result<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.reader.clone();
        let codes: Vec<String> = conn
            .zrevrange(keys::HOT_URLS, 0, n as isize - 1)
            .await?;
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..1000 {
            let ttl = jittered_ttl(3600, 0.2);
            assert!((2880..=4320).contains(&ttl), "ttl {ttl} out of ±20% band");
        }
    }

    #[test]
    fn jitter_disabled_is_identity() {
        assert_eq!(jittered_ttl(3600, 0.0), 3600);
        assert_eq!(jittered_ttl(0, 0.2), 0);
    }

    #[test]
    fn jitter_never_rounds_to_zero() {
        for _ in 0..100 {
            assert!(jittered_ttl(1, 0.9) >= 1);
        }
    }
}

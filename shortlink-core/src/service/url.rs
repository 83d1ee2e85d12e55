//! Shorten/redirect handler core.
//!
//! The redirect path is cache-first: a hit never touches the OLTP
//! store, a miss is coalesced twice (in-process singleflight, then the
//! cross-instance `lock:<code>` key) before a single store read
//! repopulates the cache. Click accounting runs in a detached task and
//! can never fail a redirect.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheLookup, SingleFlight, SingleFlightError};
use crate::models::{validate_custom_code, CachedUrlPayload, ClickEvent, Url};
use crate::service::{ClickPublisher, Minter, UrlCache, UrlStore};
use crate::{Error, Result};

/// Tunables the edge wiring lifts out of the config sections.
#[derive(Debug, Clone)]
pub struct UrlServiceOptions {
    /// Collision retries on the generated-code shorten path.
    pub mint_retries: u32,
    /// Cache polls while another instance holds the population lock.
    pub lock_retry_count: u32,
    pub lock_retry_delay: Duration,
}

impl Default for UrlServiceOptions {
    fn default() -> Self {
        Self {
            mint_retries: 3,
            lock_retry_count: 3,
            lock_retry_delay: Duration::from_millis(50),
        }
    }
}

struct Inner {
    store: Arc<dyn UrlStore>,
    cache: Arc<dyn UrlCache>,
    publisher: Arc<dyn ClickPublisher>,
    minter: Arc<dyn Minter>,
    flight: SingleFlight<String, Option<CachedUrlPayload>, String>,
    opts: UrlServiceOptions,
}

/// URL shortening and redirect service.
#[derive(Clone)]
pub struct UrlService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UrlService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlService").finish()
    }
}

impl UrlService {
    #[must_use]
    pub fn new(
        store: Arc<dyn UrlStore>,
        cache: Arc<dyn UrlCache>,
        publisher: Arc<dyn ClickPublisher>,
        minter: Arc<dyn Minter>,
        opts: UrlServiceOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cache,
                publisher,
                minter,
                flight: SingleFlight::new(),
                opts,
            }),
        }
    }

    /// Create a short URL.
    ///
    /// Custom codes fail fast on conflict; generated codes trust the
    /// allocator for uniqueness and keep a bounded retry purely as
    /// defense-in-depth against allocator misuse.
    pub async fn shorten(&self, original_url: &str, custom_code: Option<&str>) -> Result<Url> {
        validate_original_url(original_url)?;

        if let Some(custom) = custom_code {
            return self.shorten_custom(original_url, custom).await;
        }
        self.shorten_generated(original_url).await
    }

    async fn shorten_custom(&self, original_url: &str, custom: &str) -> Result<Url> {
        validate_custom_code(custom)?;

        let id = self.inner.minter.next_id().await?;
        let url = Url::new(id, custom.to_string(), original_url.to_string());

        let inserted = self.inner.store.insert(&url).await.map_err(|e| {
            if e.is_collision() {
                Error::AlreadyExists(format!("custom code '{custom}' is already taken"))
            } else {
                e
            }
        })?;

        self.write_through(&inserted).await;
        tracing::info!(short_code = %inserted.short_code, "created short url (custom code)");
        Ok(inserted)
    }

    async fn shorten_generated(&self, original_url: &str) -> Result<Url> {
        let attempts = self.inner.opts.mint_retries + 1;
        for attempt in 0..attempts {
            let (id, code) = self.inner.minter.next_code().await?;
            let url = Url::new(id, code, original_url.to_string());

            match self.inner.store.insert(&url).await {
                Ok(inserted) => {
                    self.write_through(&inserted).await;
                    tracing::info!(short_code = %inserted.short_code, "created short url");
                    return Ok(inserted);
                }
                Err(e) if e.is_collision() => {
                    // A generated code colliding means the allocator
                    // namespace was reused; retry with a fresh code.
                    tracing::warn!(
                        short_code = %url.short_code,
                        attempt,
                        "generated code collided, reminting"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Exhausted(self.inner.opts.mint_retries))
    }

    /// Resolve a short code for a redirect and account the click.
    ///
    /// Click accounting is detached: the caller can answer 307 as soon
    /// as this returns.
    pub async fn redirect(&self, short_code: &str) -> Result<CachedUrlPayload> {
        let payload = self.resolve(short_code).await?;
        self.spawn_click_tracking(short_code);
        Ok(payload)
    }

    /// Statistics for a code: the authoritative count plus clicks still
    /// sitting in the buffer, for near-real-time reads between flushes.
    pub async fn stats(&self, short_code: &str) -> Result<Url> {
        let payload = self.resolve(short_code).await?;

        let buffered = match self.inner.cache.read_click_buffer(short_code).await {
            Ok(n) => n.max(0),
            Err(e) => {
                tracing::warn!(short_code, "click buffer read failed: {e}");
                0
            }
        };

        let mut url = Url::from(payload);
        url.clicks += buffered;
        Ok(url)
    }

    /// Cache-first lookup shared by redirect and stats.
    async fn resolve(&self, short_code: &str) -> Result<CachedUrlPayload> {
        match self.inner.cache.lookup(short_code).await {
            Ok(CacheLookup::Hit(payload)) => return Ok(payload),
            Ok(CacheLookup::Negative) => {
                return Err(Error::NotFound(format!("unknown code: {short_code}")))
            }
            Ok(CacheLookup::Miss) => {}
            Err(e) => {
                // Degraded cache is survivable; the store read below is
                // the last line and its failure is the 503.
                tracing::warn!(short_code, "cache read failed, falling back to store: {e}");
            }
        }

        let this = self.clone();
        let code = short_code.to_string();
        let loaded = self
            .inner
            .flight
            .do_work(short_code.to_string(), async move {
                this.load_with_lock(&code).await.map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| match e {
                SingleFlightError::WorkerFailed => {
                    Error::Internal("redirect lookup leader failed".to_string())
                }
                SingleFlightError::Inner(msg) => Error::Unavailable(msg),
            })?;

        loaded.ok_or_else(|| Error::NotFound(format!("unknown code: {short_code}")))
    }

    /// The miss path behind the in-process singleflight: take the
    /// cross-instance lock, double-check the cache, then read the
    /// store and populate.
    async fn load_with_lock(&self, short_code: &str) -> Result<Option<CachedUrlPayload>> {
        let token = match self.inner.cache.try_lock(short_code).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(short_code, "lock acquisition failed, reading store: {e}");
                return self.load_from_store(short_code).await;
            }
        };

        if let Some(token) = token {
            // Another instance may have populated between our miss and
            // the lock grant.
            if let Ok(CacheLookup::Hit(payload)) = self.inner.cache.lookup(short_code).await {
                self.unlock_best_effort(short_code, &token).await;
                return Ok(Some(payload));
            }

            let result = self.load_from_store(short_code).await;
            // TTL is the safety net if this release is lost.
            self.unlock_best_effort(short_code, &token).await;
            return result;
        }

        // The lock holder is populating; wait for its write to land.
        for _ in 0..self.inner.opts.lock_retry_count {
            tokio::time::sleep(self.inner.opts.lock_retry_delay).await;
            match self.inner.cache.lookup(short_code).await {
                Ok(CacheLookup::Hit(payload)) => return Ok(Some(payload)),
                Ok(CacheLookup::Negative) => return Ok(None),
                Ok(CacheLookup::Miss) | Err(_) => {}
            }
        }

        // The holder may have crashed; its TTL will clear the lock,
        // meanwhile serve from the store directly.
        self.load_from_store(short_code).await
    }

    async fn load_from_store(&self, short_code: &str) -> Result<Option<CachedUrlPayload>> {
        match self.inner.store.get_by_code(short_code).await? {
            None => {
                if let Err(e) = self.inner.cache.store_negative(short_code).await {
                    tracing::warn!(short_code, "negative cache write failed: {e}");
                }
                Ok(None)
            }
            Some(url) => {
                let payload = CachedUrlPayload::from(&url);
                self.write_through(&url).await;
                Ok(Some(payload))
            }
        }
    }

    async fn unlock_best_effort(&self, short_code: &str, token: &str) {
        if let Err(e) = self.inner.cache.unlock(short_code, token).await {
            tracing::debug!(short_code, "lock release failed: {e}");
        }
    }

    /// OLTP is already consistent at this point; a lost cache write
    /// self-heals on the next miss.
    async fn write_through(&self, url: &Url) {
        let payload = CachedUrlPayload::from(url);
        if let Err(e) = self.inner.cache.store(&payload).await {
            tracing::warn!(short_code = %url.short_code, "cache write-through failed: {e}");
        }
    }

    /// Fire-and-forget click accounting: buffer increment, hot-set
    /// score, broker publish. Failures are logged and swallowed; the
    /// redirect already succeeded.
    fn spawn_click_tracking(&self, short_code: &str) {
        let inner = self.inner.clone();
        let code = short_code.to_string();
        tokio::spawn(async move {
            if let Err(e) = inner.cache.incr_click_buffer(&code).await {
                tracing::warn!(short_code = %code, "click buffer increment failed: {e}");
            }
            if let Err(e) = inner.cache.bump_hot(&code).await {
                tracing::debug!(short_code = %code, "hot set update failed: {e}");
            }
            if let Err(e) = inner.publisher.publish(ClickEvent::single(&*code)).await {
                tracing::warn!(short_code = %code, "click publish failed: {e}");
            }
        });
    }
}

/// Accept http(s) URLs with a host; everything else is caller error.
fn validate_original_url(url: &str) -> Result<()> {
    const MAX_URL_LENGTH: usize = 8192;

    if url.len() > MAX_URL_LENGTH {
        return Err(Error::InvalidInput("URL too long".to_string()));
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidInput(
            "URL must not contain whitespace".to_string(),
        ));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| Error::InvalidInput("URL must be http or https".to_string()))?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err(Error::InvalidInput("URL has no host".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use std::sync::Mutex;

    // ─── in-memory fakes for the four capability seams ───

    #[derive(Default)]
    struct MemStore {
        rows: Mutex<HashMap<String, Url>>,
        reads: AtomicU32,
        /// Forced `AlreadyExists` failures before inserts succeed.
        forced_collisions: AtomicU32,
        read_delay: Option<Duration>,
    }

    impl MemStore {
        fn with_read_delay(delay: Duration) -> Self {
            Self {
                read_delay: Some(delay),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl UrlStore for MemStore {
        async fn insert(&self, url: &Url) -> Result<Url> {
            if self.forced_collisions.load(Ordering::SeqCst) > 0 {
                self.forced_collisions.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::AlreadyExists("forced".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(&url.short_code) {
                return Err(Error::AlreadyExists("Short code already taken".to_string()));
            }
            rows.insert(url.short_code.clone(), url.clone());
            Ok(url.clone())
        }

        async fn get_by_code(&self, short_code: &str) -> Result<Option<Url>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.rows.lock().unwrap().get(short_code).cloned())
        }

        async fn apply_click_deltas(&self, deltas: &[(String, i64)]) -> Result<Vec<Url>> {
            let mut rows = self.rows.lock().unwrap();
            let mut updated = Vec::new();
            for (code, delta) in deltas {
                if let Some(url) = rows.get_mut(code) {
                    url.clicks += delta;
                    updated.push(url.clone());
                }
            }
            Ok(updated)
        }

        async fn top_by_clicks(&self, limit: i64) -> Result<Vec<Url>> {
            let mut all: Vec<Url> = self.rows.lock().unwrap().values().cloned().collect();
            all.sort_by(|a, b| b.clicks.cmp(&a.clicks));
            all.truncate(limit as usize);
            Ok(all)
        }

        async fn get_by_codes(&self, short_codes: &[String]) -> Result<Vec<Url>> {
            let rows = self.rows.lock().unwrap();
            Ok(short_codes.iter().filter_map(|c| rows.get(c).cloned()).collect())
        }
    }

    #[derive(Default)]
    struct MemCache {
        entries: Mutex<HashMap<String, String>>,
        locks: Mutex<HashMap<String, String>>,
        buffers: Mutex<HashMap<String, i64>>,
        hot: Mutex<HashMap<String, i64>>,
    }

    const NEG: &str = "__nx__";

    #[async_trait]
    impl UrlCache for MemCache {
        async fn lookup(&self, short_code: &str) -> Result<CacheLookup> {
            match self.entries.lock().unwrap().get(short_code) {
                None => Ok(CacheLookup::Miss),
                Some(v) if v == NEG => Ok(CacheLookup::Negative),
                Some(json) => Ok(CacheLookup::Hit(serde_json::from_str(json)?)),
            }
        }

        async fn store(&self, payload: &CachedUrlPayload) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(payload.short_code.clone(), serde_json::to_string(payload)?);
            Ok(())
        }

        async fn store_negative(&self, short_code: &str) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(short_code.to_string(), NEG.to_string());
            Ok(())
        }

        async fn store_batch(&self, payloads: &[CachedUrlPayload]) -> Result<()> {
            for payload in payloads {
                self.store(payload).await?;
            }
            Ok(())
        }

        async fn try_lock(&self, short_code: &str) -> Result<Option<String>> {
            let mut locks = self.locks.lock().unwrap();
            if locks.contains_key(short_code) {
                return Ok(None);
            }
            let token = nanoid::nanoid!(8);
            locks.insert(short_code.to_string(), token.clone());
            Ok(Some(token))
        }

        async fn unlock(&self, short_code: &str, token: &str) -> Result<()> {
            let mut locks = self.locks.lock().unwrap();
            if locks.get(short_code).map(String::as_str) == Some(token) {
                locks.remove(short_code);
            }
            Ok(())
        }

        async fn incr_click_buffer(&self, short_code: &str) -> Result<i64> {
            let mut buffers = self.buffers.lock().unwrap();
            let count = buffers.entry(short_code.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn read_click_buffer(&self, short_code: &str) -> Result<i64> {
            Ok(*self.buffers.lock().unwrap().get(short_code).unwrap_or(&0))
        }

        async fn decr_click_buffers(&self, deltas: &[(String, i64)]) -> Result<()> {
            let mut buffers = self.buffers.lock().unwrap();
            for (code, delta) in deltas {
                *buffers.entry(code.clone()).or_insert(0) -= delta;
            }
            Ok(())
        }

        async fn bump_hot(&self, short_code: &str) -> Result<()> {
            *self
                .hot
                .lock()
                .unwrap()
                .entry(short_code.to_string())
                .or_insert(0) += 1;
            Ok(())
        }

        async fn hot_top(&self, n: usize) -> Result<Vec<String>> {
            let hot = self.hot.lock().unwrap();
            let mut scored: Vec<(String, i64)> =
                hot.iter().map(|(k, v)| (k.clone(), *v)).collect();
            scored.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(scored.into_iter().take(n).map(|(k, _)| k).collect())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<ClickEvent>>,
    }

    #[async_trait]
    impl ClickPublisher for RecordingPublisher {
        async fn publish(&self, event: ClickEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct SeqMinter {
        next: AtomicI64,
    }

    impl SeqMinter {
        fn new() -> Self {
            Self {
                next: AtomicI64::new(1),
            }
        }
    }

    #[async_trait]
    impl Minter for SeqMinter {
        async fn next_id(&self) -> Result<i64> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        async fn next_code(&self) -> Result<(i64, String)> {
            let id = self.next_id().await?;
            Ok((id, crate::models::encode_base62(id, 7)?))
        }
    }

    struct Harness {
        service: UrlService,
        store: Arc<MemStore>,
        cache: Arc<MemCache>,
        publisher: Arc<RecordingPublisher>,
    }

    fn harness_with_store(store: MemStore) -> Harness {
        let store = Arc::new(store);
        let cache = Arc::new(MemCache::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let minter = Arc::new(SeqMinter::new());
        let service = UrlService::new(
            store.clone(),
            cache.clone(),
            publisher.clone(),
            minter,
            UrlServiceOptions {
                lock_retry_delay: Duration::from_millis(5),
                ..UrlServiceOptions::default()
            },
        );
        Harness {
            service,
            store,
            cache,
            publisher,
        }
    }

    fn harness() -> Harness {
        harness_with_store(MemStore::default())
    }

    // ─── shorten ───

    #[tokio::test]
    async fn shorten_generates_padded_code_and_writes_through() {
        let h = harness();
        let url = h
            .service
            .shorten("https://example.com", None)
            .await
            .unwrap();

        assert_eq!(url.short_code.len(), 7);
        assert_eq!(url.clicks, 0);

        // Served from the write-through entry, no store read.
        let payload = h.service.redirect(&url.short_code).await.unwrap();
        assert_eq!(payload.original_url, "https://example.com");
        assert_eq!(h.store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shorten_rejects_bad_urls() {
        let h = harness();
        assert!(h.service.shorten("ftp://example.com", None).await.is_err());
        assert!(h.service.shorten("not a url", None).await.is_err());
        assert!(h.service.shorten("https://", None).await.is_err());
        assert!(h
            .service
            .shorten("https://example.com/has space", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn custom_code_conflict_is_reported() {
        let h = harness();
        h.service
            .shorten("https://x.example", Some("gh"))
            .await
            .unwrap();

        let err = h
            .service
            .shorten("https://y.example", Some("gh"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn custom_code_with_invalid_chars_is_rejected() {
        let h = harness();
        let err = h
            .service
            .shorten("https://x.example", Some("bad code!"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn generated_collisions_retry_then_succeed() {
        let store = MemStore::default();
        store.forced_collisions.store(2, Ordering::SeqCst);
        let h = harness_with_store(store);

        let url = h.service.shorten("https://example.com", None).await.unwrap();
        // Two collisions consumed ids 1 and 2; the surviving row got 3.
        assert_eq!(url.id, 3);
    }

    #[tokio::test]
    async fn generated_collisions_beyond_retry_limit_exhaust() {
        let store = MemStore::default();
        store.forced_collisions.store(100, Ordering::SeqCst);
        let h = harness_with_store(store);

        let err = h
            .service
            .shorten("https://example.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exhausted(3)), "got {err:?}");
    }

    // ─── redirect ───

    #[tokio::test]
    async fn redirect_miss_populates_cache_then_hits() {
        let h = harness();
        // Seed the store directly; the cache starts cold.
        h.store
            .insert(&Url::new(9, "abcdefg".into(), "https://example.com".into()))
            .await
            .unwrap();

        let first = h.service.redirect("abcdefg").await.unwrap();
        assert_eq!(first.original_url, "https://example.com");
        assert_eq!(h.store.reads.load(Ordering::SeqCst), 1);

        let second = h.service.redirect("abcdefg").await.unwrap();
        assert_eq!(second.original_url, "https://example.com");
        // Second request came from cache.
        assert_eq!(h.store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_code_is_negative_cached() {
        let h = harness();

        let err = h.service.redirect("missing1").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(h.store.reads.load(Ordering::SeqCst), 1);

        // Second request is answered by the negative marker.
        let err = h.service.redirect("missing1").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(h.store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_miss_storm_reads_store_once() {
        let h = harness_with_store(MemStore::with_read_delay(Duration::from_millis(30)));
        h.store
            .insert(&Url::new(1, "stormed".into(), "https://example.com".into()))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let service = h.service.clone();
            handles.push(tokio::spawn(
                async move { service.redirect("stormed").await },
            ));
        }
        for handle in handles {
            let payload = handle.await.unwrap().unwrap();
            assert_eq!(payload.original_url, "https://example.com");
        }

        assert_eq!(
            h.store.reads.load(Ordering::SeqCst),
            1,
            "singleflight must collapse the storm to one store read"
        );
    }

    #[tokio::test]
    async fn redirect_tracks_click_without_blocking() {
        let h = harness();
        h.service
            .shorten("https://example.com", Some("clicky"))
            .await
            .unwrap();

        h.service.redirect("clicky").await.unwrap();
        // Accounting runs in a detached task.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = h.publisher.events.lock().unwrap().clone();
        assert_eq!(events, vec![ClickEvent::single("clicky")]);
        assert_eq!(h.cache.read_click_buffer("clicky").await.unwrap(), 1);
        assert_eq!(h.cache.hot_top(1).await.unwrap(), vec!["clicky".to_string()]);
    }

    // ─── stats ───

    #[tokio::test]
    async fn stats_adds_buffered_clicks() {
        let h = harness();
        h.service
            .shorten("https://example.com", Some("counted"))
            .await
            .unwrap();

        for _ in 0..5 {
            h.service.redirect("counted").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = h.service.stats("counted").await.unwrap();
        // OLTP still says 0; the buffer carries the pending 5.
        assert_eq!(stats.clicks, 5);
    }

    #[tokio::test]
    async fn stats_on_unknown_code_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.service.stats("nothere").await,
            Err(Error::NotFound(_))
        ));
    }

    // ─── validation ───

    #[test]
    fn original_url_validation() {
        assert!(validate_original_url("https://example.com").is_ok());
        assert!(validate_original_url("http://example.com/path?q=1#f").is_ok());
        assert!(validate_original_url("ftp://example.com").is_err());
        assert!(validate_original_url("https://").is_err());
        assert!(validate_original_url("https://exa mple.com").is_err());
        assert!(validate_original_url(&format!("https://e.com/{}", "a".repeat(9000))).is_err());
    }
}

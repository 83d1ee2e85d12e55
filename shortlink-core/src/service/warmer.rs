//! Cache warmer.
//!
//! Refreshes the hottest codes ahead of their TTL so a mass expiry
//! never turns into a miss storm. Hotness comes from the `hot_urls`
//! score set when the edges populate it, with the OLTP click ranking
//! as the fallback ordering. The warmer only refreshes URL snapshots;
//! click counters stay owned by the ingestion worker.

use std::sync::Arc;
use std::time::Duration;

use crate::config::WarmerConfig;
use crate::models::CachedUrlPayload;
use crate::service::{UrlCache, UrlStore};
use crate::{metrics, Result};

pub struct CacheWarmer {
    store: Arc<dyn UrlStore>,
    cache: Arc<dyn UrlCache>,
    config: WarmerConfig,
}

impl CacheWarmer {
    #[must_use]
    pub fn new(store: Arc<dyn UrlStore>, cache: Arc<dyn UrlCache>, config: WarmerConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Tick forever. Errors are logged and the next tick retries; the
    /// warmer is an optimization and must never take anything down.
    pub async fn run(&self) {
        let interval = Duration::from_secs(self.config.interval_seconds);
        tracing::info!(
            interval_seconds = self.config.interval_seconds,
            top_n = self.config.top_n,
            "cache warmer started"
        );

        loop {
            match self.warm_once().await {
                Ok(count) => tracing::debug!(warmed = count, "cache warm tick complete"),
                Err(e) => tracing::warn!("cache warm tick failed: {e}"),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One warming pass. Returns how many entries were refreshed.
    pub async fn warm_once(&self) -> Result<usize> {
        let top_n = self.config.top_n;

        // Prefer the live hot set; it reflects the current window
        // rather than all-time click totals.
        let hot_codes = match self.cache.hot_top(top_n).await {
            Ok(codes) => codes,
            Err(e) => {
                tracing::warn!("hot set read failed, using click ranking: {e}");
                Vec::new()
            }
        };

        let (urls, source) = if hot_codes.is_empty() {
            (self.store.top_by_clicks(top_n as i64).await?, "clicks")
        } else {
            (self.store.get_by_codes(&hot_codes).await?, "hot_set")
        };

        if urls.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<CachedUrlPayload> = urls.iter().map(CachedUrlPayload::from).collect();
        self.cache.store_batch(&payloads).await?;

        metrics::cache::WARMED_ENTRIES
            .with_label_values(&[source])
            .inc_by(payloads.len() as u64);
        tracing::info!(warmed = payloads.len(), source, "cache warmed");
        Ok(payloads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLookup;
    use crate::models::Url;
    use crate::service::traits::{UrlCache, UrlStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FixedStore {
        rows: Vec<Url>,
    }

    #[async_trait]
    impl UrlStore for FixedStore {
        async fn insert(&self, _url: &Url) -> crate::Result<Url> {
            unimplemented!("warmer never inserts")
        }

        async fn get_by_code(&self, _short_code: &str) -> crate::Result<Option<Url>> {
            unimplemented!("warmer never reads single codes")
        }

        async fn apply_click_deltas(
            &self,
            _deltas: &[(String, i64)],
        ) -> crate::Result<Vec<Url>> {
            unimplemented!("warmer never updates clicks")
        }

        async fn top_by_clicks(&self, limit: i64) -> crate::Result<Vec<Url>> {
            let mut rows = self.rows.clone();
            rows.sort_by(|a, b| b.clicks.cmp(&a.clicks));
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn get_by_codes(&self, short_codes: &[String]) -> crate::Result<Vec<Url>> {
            Ok(self
                .rows
                .iter()
                .filter(|u| short_codes.contains(&u.short_code))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct BatchCache {
        entries: Mutex<HashMap<String, CachedUrlPayload>>,
        hot: Vec<String>,
    }

    #[async_trait]
    impl UrlCache for BatchCache {
        async fn lookup(&self, _short_code: &str) -> crate::Result<CacheLookup> {
            Ok(CacheLookup::Miss)
        }

        async fn store(&self, payload: &CachedUrlPayload) -> crate::Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(payload.short_code.clone(), payload.clone());
            Ok(())
        }

        async fn store_negative(&self, _short_code: &str) -> crate::Result<()> {
            Ok(())
        }

        async fn store_batch(&self, payloads: &[CachedUrlPayload]) -> crate::Result<()> {
            let mut entries = self.entries.lock().unwrap();
            for payload in payloads {
                entries.insert(payload.short_code.clone(), payload.clone());
            }
            Ok(())
        }

        async fn try_lock(&self, _short_code: &str) -> crate::Result<Option<String>> {
            Ok(None)
        }

        async fn unlock(&self, _short_code: &str, _token: &str) -> crate::Result<()> {
            Ok(())
        }

        async fn incr_click_buffer(&self, _short_code: &str) -> crate::Result<i64> {
            Ok(0)
        }

        async fn read_click_buffer(&self, _short_code: &str) -> crate::Result<i64> {
            Ok(0)
        }

        async fn decr_click_buffers(&self, _deltas: &[(String, i64)]) -> crate::Result<()> {
            Ok(())
        }

        async fn bump_hot(&self, _short_code: &str) -> crate::Result<()> {
            Ok(())
        }

        async fn hot_top(&self, n: usize) -> crate::Result<Vec<String>> {
            Ok(self.hot.iter().take(n).cloned().collect())
        }
    }

    fn url(code: &str, clicks: i64) -> Url {
        let mut u = Url::new(clicks, code.to_string(), format!("https://{code}.example"));
        u.clicks = clicks;
        u
    }

    #[tokio::test]
    async fn warms_top_clicked_when_hot_set_is_empty() {
        let store = Arc::new(FixedStore {
            rows: vec![url("cold", 1), url("warm", 50), url("hot", 500)],
        });
        let cache = Arc::new(BatchCache::default());
        let warmer = CacheWarmer::new(
            store,
            cache.clone(),
            WarmerConfig {
                interval_seconds: 30,
                top_n: 2,
            },
        );

        let warmed = warmer.warm_once().await.unwrap();
        assert_eq!(warmed, 2);

        let entries = cache.entries.lock().unwrap();
        assert!(entries.contains_key("hot"));
        assert!(entries.contains_key("warm"));
        assert!(!entries.contains_key("cold"));
    }

    #[tokio::test]
    async fn prefers_hot_set_when_populated() {
        let store = Arc::new(FixedStore {
            rows: vec![url("alltime", 9000), url("trending", 3)],
        });
        let cache = Arc::new(BatchCache {
            hot: vec!["trending".to_string()],
            ..BatchCache::default()
        });
        let warmer = CacheWarmer::new(
            store,
            cache.clone(),
            WarmerConfig {
                interval_seconds: 30,
                top_n: 10,
            },
        );

        let warmed = warmer.warm_once().await.unwrap();
        assert_eq!(warmed, 1);
        assert!(cache.entries.lock().unwrap().contains_key("trending"));
    }

    #[tokio::test]
    async fn empty_store_warms_nothing() {
        let store = Arc::new(FixedStore::default());
        let cache = Arc::new(BatchCache::default());
        let warmer = CacheWarmer::new(store, cache, WarmerConfig::default());
        assert_eq!(warmer.warm_once().await.unwrap(), 0);
    }
}

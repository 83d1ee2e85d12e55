//! Capability seams of the redirect/shorten handler.
//!
//! The handler depends on four capability sets injected at wiring
//! time; tests swap in-memory fakes for all of them.

use async_trait::async_trait;

use crate::cache::CacheLookup;
use crate::models::{CachedUrlPayload, ClickEvent, Url};
use crate::service::allocator::IdRange;
use crate::Result;

/// Authoritative URL storage (OLTP).
#[async_trait]
pub trait UrlStore: Send + Sync {
    /// Optimistic insert; unique violations surface as `AlreadyExists`.
    async fn insert(&self, url: &Url) -> Result<Url>;

    async fn get_by_code(&self, short_code: &str) -> Result<Option<Url>>;

    /// Batched `clicks += delta` returning the updated records.
    async fn apply_click_deltas(&self, deltas: &[(String, i64)]) -> Result<Vec<Url>>;

    async fn top_by_clicks(&self, limit: i64) -> Result<Vec<Url>>;

    async fn get_by_codes(&self, short_codes: &[String]) -> Result<Vec<Url>>;
}

/// Shared URL cache (derived, rebuildable view of the store).
#[async_trait]
pub trait UrlCache: Send + Sync {
    async fn lookup(&self, short_code: &str) -> Result<CacheLookup>;

    async fn store(&self, payload: &CachedUrlPayload) -> Result<()>;

    async fn store_negative(&self, short_code: &str) -> Result<()>;

    async fn store_batch(&self, payloads: &[CachedUrlPayload]) -> Result<()>;

    /// Miss-population lock; `Some(token)` when acquired.
    async fn try_lock(&self, short_code: &str) -> Result<Option<String>>;

    async fn unlock(&self, short_code: &str, token: &str) -> Result<()>;

    async fn incr_click_buffer(&self, short_code: &str) -> Result<i64>;

    async fn read_click_buffer(&self, short_code: &str) -> Result<i64>;

    async fn decr_click_buffers(&self, deltas: &[(String, i64)]) -> Result<()>;

    async fn bump_hot(&self, short_code: &str) -> Result<()>;

    async fn hot_top(&self, n: usize) -> Result<Vec<String>>;
}

/// Click event sink. Implementations must preserve the event somewhere
/// durable (broker or fallback stream) without blocking the redirect.
#[async_trait]
pub trait ClickPublisher: Send + Sync {
    async fn publish(&self, event: ClickEvent) -> Result<()>;
}

/// Local short-code mint backed by pre-reserved id ranges.
#[async_trait]
pub trait Minter: Send + Sync {
    /// Next unique id (custom-code rows take ids without a code).
    async fn next_id(&self) -> Result<i64>;

    /// Next unique id together with its base-62 code.
    async fn next_code(&self) -> Result<(i64, String)>;
}

/// Source of disjoint id ranges (the allocator service, or the
/// allocator itself when co-located).
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn allocate(&self, size: i64) -> Result<IdRange>;
}

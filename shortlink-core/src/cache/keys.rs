//! Redis key schema.
//!
//! Every key used by the system is constructed here so the layout
//! stays greppable and collision-free across the edge handlers, the
//! ingestion workers and the warmer.

/// Hot-key score set, shared by all edges.
///
/// Type: Sorted Set, TTL 1h
/// Member: short code, Score: recent click count
pub const HOT_URLS: &str = "hot_urls";

/// Cached URL snapshot.
///
/// Type: String (JSON `CachedUrlPayload`), TTL 1h ± jitter
#[must_use]
pub fn url(short_code: &str) -> String {
    format!("url:{short_code}")
}

/// Singleflight lock taken while populating `url:<code>` on a miss.
///
/// Type: String (lock token), TTL 5s
#[must_use]
pub fn lock(short_code: &str) -> String {
    format!("lock:{short_code}")
}

/// Per-code counter of clicks not yet flushed to the OLTP store.
///
/// Type: Integer, TTL 5m
#[must_use]
pub fn click_buffer(short_code: &str) -> String {
    format!("click_buffer:{short_code}")
}

/// A worker's private aggregation hash.
///
/// Type: Hash short_code -> accumulated delta, no TTL
#[must_use]
pub fn agg(worker_id: &str) -> String {
    format!("agg:{worker_id}")
}

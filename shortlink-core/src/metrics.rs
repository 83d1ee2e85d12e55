//! Prometheus metrics collection for production monitoring
//!
//! All metrics register against a shared registry that each binary
//! exposes via its /metrics endpoint.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Render the registry in the Prometheus text exposition format.
#[must_use]
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buf) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Cache operations
pub mod cache {
    use super::{register_int_counter_vec_with_registry, IntCounterVec, REGISTRY};

    /// Cache hit counter, labelled by outcome (`hit`, `negative`)
    pub static CACHE_HITS: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "cache_hits_total",
            "Total number of cache hits",
            &["outcome"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_HITS")
    });

    /// Cache miss counter
    pub static CACHE_MISSES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "cache_misses_total",
            "Total number of cache misses",
            &["source"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_MISSES")
    });

    /// Entries refreshed by the warmer
    pub static WARMED_ENTRIES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "cache_warmed_entries_total",
            "Cache entries written by the warmer",
            &["source"],
            REGISTRY.clone()
        )
        .expect("Failed to register WARMED_ENTRIES")
    });
}

/// Click pipeline
pub mod clicks {
    use super::{register_int_counter_with_registry, IntCounter, REGISTRY};

    /// Click events published to the broker
    pub static PUBLISHED: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "click_events_published_total",
            "Click events published to the broker",
            REGISTRY.clone()
        )
        .expect("Failed to register PUBLISHED")
    });

    /// Click events diverted to the fallback stream
    pub static FALLBACK: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "click_events_fallback_total",
            "Click events diverted to the fallback stream",
            REGISTRY.clone()
        )
        .expect("Failed to register FALLBACK")
    });

    /// Click events lost (broker and fallback both failed)
    pub static DROPPED: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "click_events_dropped_total",
            "Click events lost after broker and fallback both failed",
            REGISTRY.clone()
        )
        .expect("Failed to register DROPPED")
    });
}

/// Database operations
pub mod database {
    use super::{
        register_histogram_vec_with_registry, register_int_counter_vec_with_registry, HistogramVec,
        IntCounterVec, REGISTRY,
    };

    /// Query duration histogram
    pub static DB_QUERY_DURATION: std::sync::LazyLock<HistogramVec> =
        std::sync::LazyLock::new(|| {
            register_histogram_vec_with_registry!(
                "db_query_duration_seconds",
                "Database query duration in seconds",
                &["operation"],
                REGISTRY.clone()
            )
            .expect("Failed to register DB_QUERY_DURATION")
        });

    /// Query error counter
    pub static DB_QUERY_ERRORS: std::sync::LazyLock<IntCounterVec> =
        std::sync::LazyLock::new(|| {
            register_int_counter_vec_with_registry!(
                "db_query_errors_total",
                "Total number of database query errors",
                &["operation"],
                REGISTRY.clone()
            )
            .expect("Failed to register DB_QUERY_ERRORS")
        });
}

/// Ingestion worker
pub mod ingest {
    use super::{
        register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter,
        IntGauge, REGISTRY,
    };

    /// Broker records consumed
    pub static EVENTS_CONSUMED: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "ingest_events_consumed_total",
            "Broker click records consumed",
            REGISTRY.clone()
        )
        .expect("Failed to register EVENTS_CONSUMED")
    });

    /// Records skipped on schema mismatch
    pub static EVENTS_SKIPPED: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "ingest_events_skipped_total",
            "Click records skipped on schema mismatch",
            REGISTRY.clone()
        )
        .expect("Failed to register EVENTS_SKIPPED")
    });

    /// Deltas applied to the OLTP counter
    pub static DELTAS_FLUSHED: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "ingest_deltas_flushed_total",
            "Click deltas applied to the OLTP counter",
            REGISTRY.clone()
        )
        .expect("Failed to register DELTAS_FLUSHED")
    });

    /// Analytic rows inserted into the OLAP store
    pub static OLAP_ROWS: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "ingest_olap_rows_total",
            "Analytic rows inserted into the OLAP store",
            REGISTRY.clone()
        )
        .expect("Failed to register OLAP_ROWS")
    });

    /// Events drained from the fallback stream
    pub static FALLBACK_DRAINED: std::sync::LazyLock<IntCounter> =
        std::sync::LazyLock::new(|| {
            register_int_counter_with_registry!(
                "ingest_fallback_drained_total",
                "Click events drained from the fallback stream",
                REGISTRY.clone()
            )
            .expect("Failed to register FALLBACK_DRAINED")
        });

    /// Codes currently buffered in the aggregation hash
    pub static AGG_HASH_SIZE: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "ingest_agg_hash_size",
            "Short codes currently buffered in the aggregation hash",
            REGISTRY.clone()
        )
        .expect("Failed to register AGG_HASH_SIZE")
    });
}

/// Range allocator
pub mod allocator {
    use super::{register_int_counter_vec_with_registry, IntCounterVec, REGISTRY};

    /// Allocations served, labelled by backend (`primary`, `secondary`)
    pub static ALLOCATIONS: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "allocator_allocations_total",
            "Ranges vended, by backing KV",
            &["backend"],
            REGISTRY.clone()
        )
        .expect("Failed to register ALLOCATIONS")
    });

    /// Allocation failures, labelled by backend
    pub static FAILURES: std::sync::LazyLock<IntCounterVec> = std::sync::LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "allocator_failures_total",
            "Allocation attempts that failed, by backing KV",
            &["backend"],
            REGISTRY.clone()
        )
        .expect("Failed to register FAILURES")
    });
}

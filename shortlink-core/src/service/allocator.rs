//! Range allocator: vends disjoint `[start, end]` id blocks.
//!
//! A single atomic INCRBY on a persisted counter is the whole
//! algorithm; the counter KV must run with append-only persistence so
//! no increment is ever replayed after a restart. The allocator keeps
//! no record of who owns which range; it is write-only history, and
//! ranges are never reclaimed.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::service::RangeSource;
use crate::{metrics, Error, Result};

/// Largest block a single call may reserve, unless the deployment
/// configures a lower ceiling (`allocator.max_block`).
pub const MAX_BLOCK: i64 = 1_000_000;

/// An inclusive id range owned by exactly one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IdRange {
    pub start: i64,
    pub end: i64,
}

impl IdRange {
    #[must_use]
    pub const fn size(&self) -> i64 {
        self.end - self.start + 1
    }
}

/// Reject sizes that would corrupt the counter or starve the id space.
pub fn validate_range_size(size: i64, max_block: i64) -> Result<()> {
    if size <= 0 {
        return Err(Error::InvalidInput(format!(
            "range size must be positive, got {size}"
        )));
    }
    if size > max_block {
        return Err(Error::InvalidInput(format!(
            "range size {size} exceeds maximum block of {max_block}"
        )));
    }
    Ok(())
}

/// Counter-backed allocator with primary/secondary failover.
///
/// The two KVs are independent; the secondary's counter must be seeded
/// by the operator strictly above anything the primary can ever reach,
/// so ranges stay disjoint across a failover.
#[derive(Clone)]
pub struct RangeAllocator {
    primary: ConnectionManager,
    secondary: ConnectionManager,
    key: String,
    max_block: i64,
}

impl RangeAllocator {
    #[must_use]
    pub fn new(
        primary: ConnectionManager,
        secondary: ConnectionManager,
        key: String,
        max_block: i64,
    ) -> Self {
        Self {
            primary,
            secondary,
            key,
            max_block,
        }
    }

    /// Reserve `size` ids. The caller owns every integer in the
    /// returned inclusive range.
    pub async fn allocate(&self, size: i64) -> Result<IdRange> {
        validate_range_size(size, self.max_block)?;

        match self.increment(self.primary.clone(), size).await {
            Ok(range) => {
                metrics::allocator::ALLOCATIONS
                    .with_label_values(&["primary"])
                    .inc();
                Ok(range)
            }
            Err(primary_err) => {
                metrics::allocator::FAILURES
                    .with_label_values(&["primary"])
                    .inc();
                tracing::warn!("primary allocator KV failed, trying secondary: {primary_err}");

                match self.increment(self.secondary.clone(), size).await {
                    Ok(range) => {
                        metrics::allocator::ALLOCATIONS
                            .with_label_values(&["secondary"])
                            .inc();
                        Ok(range)
                    }
                    Err(secondary_err) => {
                        metrics::allocator::FAILURES
                            .with_label_values(&["secondary"])
                            .inc();
                        tracing::error!(
                            "both allocator KVs failed: primary: {primary_err}; secondary: {secondary_err}"
                        );
                        Err(Error::Unavailable(
                            "both allocator backends unavailable".to_string(),
                        ))
                    }
                }
            }
        }
    }

    async fn increment(&self, mut conn: ConnectionManager, size: i64) -> Result<IdRange> {
        let end: i64 = conn.incr(&self.key, size).await?;
        Ok(IdRange {
            start: end - size + 1,
            end,
        })
    }

    /// Per-backend liveness, for the service's health endpoint.
    /// The allocator is serviceable while either backend answers.
    pub async fn backend_health(&self) -> (bool, bool) {
        (
            Self::ping(self.primary.clone()).await,
            Self::ping(self.secondary.clone()).await,
        )
    }

    async fn ping(mut conn: ConnectionManager) -> bool {
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[async_trait]
impl RangeSource for RangeAllocator {
    async fn allocate(&self, size: i64) -> Result<IdRange> {
        Self::allocate(self, size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_validation_bounds() {
        assert!(validate_range_size(1, MAX_BLOCK).is_ok());
        assert!(validate_range_size(1000, MAX_BLOCK).is_ok());
        assert!(validate_range_size(MAX_BLOCK, MAX_BLOCK).is_ok());

        assert!(validate_range_size(0, MAX_BLOCK).is_err());
        assert!(validate_range_size(-5, MAX_BLOCK).is_err());
        assert!(validate_range_size(MAX_BLOCK + 1, MAX_BLOCK).is_err());
    }

    #[test]
    fn configured_ceiling_is_honored() {
        assert!(validate_range_size(500, 500).is_ok());
        assert!(validate_range_size(501, 500).is_err());
    }

    #[test]
    fn range_arithmetic() {
        // INCRBY returns the post-increment value; the range is the
        // `size` integers ending there.
        let end = 2000_i64;
        let size = 1000_i64;
        let range = IdRange {
            start: end - size + 1,
            end,
        };
        assert_eq!(range.start, 1001);
        assert_eq!(range.size(), size);
    }
}

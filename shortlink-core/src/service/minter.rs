//! Edge code minter.
//!
//! Holds one pre-reserved id block and hands out ids locally; when the
//! block runs out it refills from the range source. The refill is
//! serialized behind the block mutex, so concurrent minters during a
//! refill simply wait for the new block.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::encode_base62;
use crate::service::{Minter, RangeSource};
use crate::Result;

struct IdBlock {
    next: i64,
    end: i64,
}

/// Thread-safe minter over a `(next, end)` block.
pub struct CodeMinter {
    source: Arc<dyn RangeSource>,
    block: Mutex<Option<IdBlock>>,
    block_size: i64,
    code_length: usize,
}

impl CodeMinter {
    #[must_use]
    pub fn new(source: Arc<dyn RangeSource>, block_size: i64, code_length: usize) -> Self {
        Self {
            source,
            block: Mutex::new(None),
            block_size,
            code_length,
        }
    }

    async fn take_id(&self) -> Result<i64> {
        let mut guard = self.block.lock().await;

        if let Some(block) = guard.as_mut() {
            if block.next <= block.end {
                let id = block.next;
                block.next += 1;
                return Ok(id);
            }
        }

        // Block exhausted or never fetched. A failed refill leaves the
        // minter empty and the caller sees the allocator error.
        let range = self.source.allocate(self.block_size).await?;
        tracing::debug!(start = range.start, end = range.end, "minted new id block");

        let id = range.start;
        *guard = Some(IdBlock {
            next: range.start + 1,
            end: range.end,
        });
        Ok(id)
    }
}

#[async_trait]
impl Minter for CodeMinter {
    async fn next_id(&self) -> Result<i64> {
        self.take_id().await
    }

    async fn next_code(&self) -> Result<(i64, String)> {
        let id = self.take_id().await?;
        let code = encode_base62(id, self.code_length)?;
        Ok((id, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::allocator::IdRange;
    use crate::Error;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    /// Counter-backed range source, the allocator's arithmetic without
    /// the KV.
    struct CounterSource {
        counter: AtomicI64,
        calls: AtomicI64,
        fail: AtomicBool,
    }

    impl CounterSource {
        fn new() -> Self {
            Self {
                counter: AtomicI64::new(0),
                calls: AtomicI64::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RangeSource for CounterSource {
        async fn allocate(&self, size: i64) -> Result<IdRange> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Unavailable("allocator down".to_string()));
            }
            let end = self.counter.fetch_add(size, Ordering::SeqCst) + size;
            Ok(IdRange {
                start: end - size + 1,
                end,
            })
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_within_a_block() {
        let source = Arc::new(CounterSource::new());
        let minter = CodeMinter::new(source.clone(), 10, 7);

        for expected in 1..=10 {
            assert_eq!(minter.next_id().await.unwrap(), expected);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Eleventh id triggers a refill.
        assert_eq!(minter.next_id().await.unwrap(), 11);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_minters_never_collide() {
        let source = Arc::new(CounterSource::new());
        let minter = Arc::new(CodeMinter::new(source, 16, 7));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let minter = minter.clone();
            handles.push(tokio::spawn(async move {
                let mut codes = Vec::new();
                for _ in 0..50 {
                    codes.push(minter.next_code().await.unwrap());
                }
                codes
            }));
        }

        let mut seen_ids = HashSet::new();
        let mut seen_codes = HashSet::new();
        for handle in handles {
            for (id, code) in handle.await.unwrap() {
                assert!(seen_ids.insert(id), "duplicate id {id}");
                assert!(seen_codes.insert(code.clone()), "duplicate code {code}");
                assert!(code.len() >= 7);
            }
        }
        assert_eq!(seen_ids.len(), 400);
    }

    #[tokio::test]
    async fn refill_failure_surfaces_and_recovers() {
        let source = Arc::new(CounterSource::new());
        let minter = CodeMinter::new(source.clone(), 2, 7);

        assert!(minter.next_id().await.is_ok());
        assert!(minter.next_id().await.is_ok());

        source.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            minter.next_id().await,
            Err(Error::Unavailable(_))
        ));

        // Allocator comes back; minting resumes where the counter
        // left off.
        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(minter.next_id().await.unwrap(), 3);
    }
}

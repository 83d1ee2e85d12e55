//! Singleflight for cache stampede protection
//!
//! Wraps the `async_singleflight` crate so that, within one process,
//! concurrent redirect misses for the same short code execute the
//! backing-store load at most once. The cross-instance half of the
//! guarantee comes from the Redis `lock:<code>` key; this wrapper
//! keeps a burst of local requests from all racing for that lock.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Error type for `SingleFlight` operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleFlightError<E> {
    /// The leader task panicked or was cancelled
    #[error("singleflight leader dropped or panicked")]
    WorkerFailed,
    /// The underlying operation failed
    #[error("{0}")]
    Inner(E),
}

/// Deduplicates concurrent executions by key.
///
/// When multiple tasks attempt the same operation simultaneously,
/// only one executes while the rest wait for its result.
#[derive(Clone)]
pub struct SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    group: Arc<async_singleflight::Group<V, E>>,
    _key: std::marker::PhantomData<K>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            group: Arc::new(async_singleflight::Group::new()),
            _key: std::marker::PhantomData,
        }
    }

    /// Execute `f` once per in-flight key; followers wait for the
    /// leader's result.
    ///
    /// `Group::work` returns `Result<V, Option<E>>`: `Err(Some(e))` is
    /// the inner error, `Err(None)` means the leader was dropped after
    /// the library's retry attempts.
    pub async fn do_work<Fut>(&self, key: K, f: Fut) -> Result<V, SingleFlightError<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        let key_str = format!("{:?}", key);
        match self.group.work(&key_str, f).await {
            (Some(value), _, _) => Ok(value),
            (None, Some(inner), _) => Err(SingleFlightError::Inner(inner)),
            (None, None, _) => Err(SingleFlightError::WorkerFailed),
        }
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn deduplicates_concurrent_requests() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let sf = sf.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                sf.do_work("same_key".to_string(), async move {
                    sleep(Duration::from_millis(50)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(123)
                })
                .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, 123);
        }

        // The loader ran exactly once for the whole burst
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let sf1 = sf.clone();
        let c1 = counter.clone();
        let h1 = tokio::spawn(async move {
            sf1.do_work("key1".to_string(), async move {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
        });

        let sf2 = sf.clone();
        let c2 = counter.clone();
        let h2 = tokio::spawn(async move {
            sf2.do_work("key2".to_string(), async move {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await
        });

        assert_eq!(h1.await.unwrap().unwrap(), 1);
        assert_eq!(h2.await.unwrap().unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn error_propagates_and_key_recovers() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();

        let result = sf
            .do_work("flaky".to_string(), async { Err("boom".to_string()) })
            .await;
        match result {
            Err(SingleFlightError::Inner(msg)) => assert_eq!(msg, "boom"),
            _ => panic!("expected Inner error"),
        }

        let result = sf.do_work("flaky".to_string(), async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}

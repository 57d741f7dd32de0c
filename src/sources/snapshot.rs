//! Time-limited memo for data an adapter fetches from its upstream

use crate::error::SourceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Holds the last fetched value for `ttl`, refreshing lazily on the first
/// read after it expires
///
/// Concurrent readers of an expired snapshot wait on one refresh instead of
/// all hitting the remote API.
pub struct Snapshot<T> {
    ttl: Duration,
    slot: Mutex<Option<(Arc<T>, Instant)>>,
}

impl<T> Snapshot<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Returns the memoized value, calling `fetch` if there is none or it is
    /// older than the TTL
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<Arc<T>, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((value, fetched_at)) = slot.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = Arc::new(fetch().await?);
        *slot = Some((value.clone(), Instant::now()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_snapshot_memoizes_within_ttl() {
        let snapshot = Snapshot::new(Duration::from_secs(60));
        let fetches = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = snapshot
                .get_or_refresh(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(*value, vec![1, 2, 3]);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_refreshes_after_expiry_and_keeps_errors_out() {
        let snapshot: Snapshot<u32> = Snapshot::new(Duration::ZERO);

        let err = snapshot
            .get_or_refresh(|| async { Err(SourceError::throttled("test")) })
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::throttled("test"));

        assert_eq!(*snapshot.get_or_refresh(|| async { Ok(1) }).await.unwrap(), 1);
        assert_eq!(*snapshot.get_or_refresh(|| async { Ok(2) }).await.unwrap(), 2);
    }
}

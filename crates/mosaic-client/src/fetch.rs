//! Fetcher traits the client is parameterized over.
//!
//! These mirror the log's read surface: a checkpoint, hash tiles and entry
//! bundles. Any `Fn` closure returning a sendable future implements the
//! matching trait, so tests and personalities can plug in HTTP clients,
//! drivers or captured fixtures without adapters.

use std::future::Future;

use async_trait::async_trait;

use mosaic_core::layout;

use crate::error::ClientError;

/// Fetches the current signed checkpoint.
#[async_trait]
pub trait CheckpointFetcher: Send + Sync {
    /// Fetch the latest checkpoint note bytes.
    async fn fetch_checkpoint(&self) -> Result<Vec<u8>, ClientError>;
}

#[async_trait]
impl<F, Fut> CheckpointFetcher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, ClientError>> + Send,
{
    async fn fetch_checkpoint(&self) -> Result<Vec<u8>, ClientError> {
        self().await
    }
}

/// Fetches hash tiles by `(level, index, partial width)`.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch the tile at `(level, index)` with partial width `p` (0 for a
    /// complete tile).
    async fn fetch_tile(&self, level: u64, index: u64, p: u8) -> Result<Vec<u8>, ClientError>;
}

#[async_trait]
impl<F, Fut> TileFetcher for F
where
    F: Fn(u64, u64, u8) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, ClientError>> + Send,
{
    async fn fetch_tile(&self, level: u64, index: u64, p: u8) -> Result<Vec<u8>, ClientError> {
        self(level, index, p).await
    }
}

/// Fetches entry bundles by `(index, partial width)`.
#[async_trait]
pub trait EntryBundleFetcher: Send + Sync {
    /// Fetch the entry bundle at `index` with partial width `p`.
    async fn fetch_entry_bundle(&self, index: u64, p: u8) -> Result<Vec<u8>, ClientError>;
}

#[async_trait]
impl<F, Fut> EntryBundleFetcher for F
where
    F: Fn(u64, u8) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, ClientError>> + Send,
{
    async fn fetch_entry_bundle(&self, index: u64, p: u8) -> Result<Vec<u8>, ClientError> {
        self(index, p).await
    }
}

/// Fetch the entry bundle `index` from a log of `log_size` entries,
/// requesting exactly the partial width the size implies.
pub async fn fetch_entry_bundle<F: EntryBundleFetcher>(
    fetcher: &F,
    index: u64,
    log_size: u64,
) -> Result<Vec<u8>, ClientError> {
    let p = layout::partial_tile_size(0, index, log_size);
    fetcher.fetch_entry_bundle(index, p).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_bundle_addressing() {
        // Mirrors the partial/full addressing cases: a 34-entry log asks
        // for bundle 0 at partial width 34; a log two full bundles plus 45
        // entries deep asks for bundle 1 complete.
        let asked = Arc::new(AtomicU64::new(0));
        let asked_p = Arc::new(AtomicU64::new(u64::MAX));
        let fetcher = {
            let asked = asked.clone();
            let asked_p = asked_p.clone();
            move |index: u64, p: u8| {
                let asked = asked.clone();
                let asked_p = asked_p.clone();
                async move {
                    asked.store(index, Ordering::Relaxed);
                    asked_p.store(p as u64, Ordering::Relaxed);
                    Ok::<_, ClientError>(Vec::new())
                }
            }
        };

        fetch_entry_bundle(&fetcher, 0, 34).await.unwrap();
        assert_eq!(asked.load(Ordering::Relaxed), 0);
        assert_eq!(asked_p.load(Ordering::Relaxed), 34);

        fetch_entry_bundle(&fetcher, 1, 2 * 256 + 45).await.unwrap();
        assert_eq!(asked.load(Ordering::Relaxed), 1);
        assert_eq!(asked_p.load(Ordering::Relaxed), 0);
    }
}

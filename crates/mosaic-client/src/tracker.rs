//! Verified tracking of a growing log.

use std::time::Duration;

use tracing::{debug, info, warn};

use mosaic_core::SequencedIndex;
use mosaic_crypto::{parse_checkpoint, Checkpoint, Verifier};

use crate::error::ClientError;
use crate::fetch::{CheckpointFetcher, TileFetcher};
use crate::proof::{verify_consistency, ProofBuilder};

/// A checkpoint the tracker has verified and adopted.
#[derive(Debug, Clone)]
pub struct TrackedCheckpoint {
    /// The raw note bytes as served.
    pub raw: Vec<u8>,
    /// The parsed commitment.
    pub checkpoint: Checkpoint,
}

/// Maintains a verified view of the log.
///
/// Every `update` fetches the served checkpoint, verifies its signatures
/// and origin, and proves it consistent with the previously adopted
/// checkpoint before moving to it. A served checkpoint committing to a
/// tree irreconcilable with the adopted one fails with `ForkDetected`.
pub struct LogStateTracker<T: TileFetcher, C: CheckpointFetcher> {
    tile_fetcher: T,
    checkpoint_fetcher: C,
    origin: String,
    verifiers: Vec<Verifier>,
    current: Option<TrackedCheckpoint>,
}

impl<T: TileFetcher, C: CheckpointFetcher> LogStateTracker<T, C> {
    /// Create a tracker with no adopted checkpoint; the first successful
    /// `update` adopts whatever verifies.
    pub fn new(
        tile_fetcher: T,
        checkpoint_fetcher: C,
        origin: impl Into<String>,
        verifiers: Vec<Verifier>,
    ) -> Self {
        Self {
            tile_fetcher,
            checkpoint_fetcher,
            origin: origin.into(),
            verifiers,
            current: None,
        }
    }

    /// The currently adopted checkpoint, if any.
    pub fn current(&self) -> Option<&TrackedCheckpoint> {
        self.current.as_ref()
    }

    /// Fetch and verify the served checkpoint, adopting it when it is a
    /// consistent successor of the held one.
    ///
    /// Returns the raw bytes of the checkpoint held after the update. An
    /// unchanged or older-but-consistent served checkpoint leaves the held
    /// one in place.
    pub async fn update(&mut self) -> Result<Vec<u8>, ClientError> {
        let raw = self.checkpoint_fetcher.fetch_checkpoint().await?;
        let fetched = parse_checkpoint(&raw, &self.origin, &self.verifiers)?;

        let held = match &self.current {
            None => {
                info!(size = fetched.size, "Adopting initial checkpoint");
                return Ok(self.adopt(raw, fetched));
            }
            Some(held) => held.checkpoint.clone(),
        };

        if fetched.size > held.size {
            let mut builder = ProofBuilder::new(fetched.size, &self.tile_fetcher);
            let proof = builder.consistency_proof(held.size).await?;
            verify_consistency(held.size, fetched.size, &proof, &held.root, &fetched.root)
                .map_err(|e| fork(&held, &fetched, e))?;
            debug!(from = held.size, to = fetched.size, "Consistency verified");
            return Ok(self.adopt(raw, fetched));
        }

        if fetched.size == held.size {
            if fetched.root != held.root {
                return Err(fork(
                    &held,
                    &fetched,
                    ClientError::proof("same size, different root"),
                ));
            }
            // Same commitment; adopt the freshest bytes (the signature set
            // may have changed).
            return Ok(self.adopt(raw, fetched));
        }

        // The served checkpoint is older than the held one. Keep ours, but
        // insist the older commitment lies on our timeline.
        let mut builder = ProofBuilder::new(held.size, &self.tile_fetcher);
        let proof = builder.consistency_proof(fetched.size).await?;
        verify_consistency(fetched.size, held.size, &proof, &fetched.root, &held.root)
            .map_err(|e| fork(&fetched, &held, e))?;
        warn!(
            served = fetched.size,
            held = held.size,
            "Served checkpoint is older than the held one"
        );
        Ok(self
            .current
            .as_ref()
            .map(|c| c.raw.clone())
            .expect("held checkpoint present"))
    }

    fn adopt(&mut self, raw: Vec<u8>, checkpoint: Checkpoint) -> Vec<u8> {
        self.current = Some(TrackedCheckpoint {
            raw: raw.clone(),
            checkpoint,
        });
        raw
    }
}

fn fork(older: &Checkpoint, newer: &Checkpoint, cause: ClientError) -> ClientError {
    match cause {
        ClientError::Proof(detail) => ClientError::ForkDetected(format!(
            "checkpoint at size {} irreconcilable with size {}: {detail}",
            older.size, newer.size
        )),
        other => other,
    }
}

/// Polls the published checkpoint until it covers an assigned index.
///
/// Bridges the gap between sequencing (an index future resolving) and
/// publication (a checkpoint committing to a size beyond that index).
pub struct PublicationAwaiter {
    poll_interval: Duration,
}

impl PublicationAwaiter {
    /// Create an awaiter polling at `poll_interval`.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Wait for `index_future` to resolve, then poll the checkpoint until
    /// a published one covers the assigned index. Returns the index and
    /// the covering checkpoint bytes.
    pub async fn await_publication<C, Fut, E>(
        &self,
        checkpoint_fetcher: &C,
        origin: &str,
        verifiers: &[Verifier],
        index_future: Fut,
    ) -> Result<(SequencedIndex, Vec<u8>), ClientError>
    where
        C: CheckpointFetcher,
        Fut: std::future::Future<Output = Result<SequencedIndex, E>>,
        E: std::fmt::Display,
    {
        let sequenced = index_future
            .await
            .map_err(|e| ClientError::Append(e.to_string()))?;

        loop {
            match checkpoint_fetcher.fetch_checkpoint().await {
                Ok(raw) => {
                    let checkpoint = parse_checkpoint(&raw, origin, verifiers)?;
                    if checkpoint.size > sequenced.index {
                        return Ok((sequenced, raw));
                    }
                }
                Err(e) if e.is_not_found() => {
                    // No checkpoint published yet; keep waiting.
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

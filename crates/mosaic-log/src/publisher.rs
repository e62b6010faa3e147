//! Checkpoint publisher task.
//!
//! Owns the signed checkpoint row. Wakes on a one-slot signal from the
//! integrator and on a periodic ticker, and replaces the checkpoint unless
//! one was published within the configured interval. Publisher errors are
//! logged and retried on the next wake; they never reach the integrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mosaic_crypto::{sign_note, Checkpoint, NoteError, Signer};
use mosaic_storage::{LogDriver, LogTransaction, StoreError};

pub(crate) struct CheckpointPublisher<D> {
    driver: Arc<D>,
    origin: String,
    signers: Vec<Signer>,
    interval: Duration,
}

#[derive(Debug, thiserror::Error)]
enum PublishError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Note(#[from] NoteError),
}

impl<D: LogDriver + 'static> CheckpointPublisher<D> {
    pub(crate) fn new(
        driver: Arc<D>,
        origin: String,
        signers: Vec<Signer>,
        interval: Duration,
    ) -> Self {
        Self {
            driver,
            origin,
            signers,
            interval,
        }
    }

    /// Spawn the publisher loop.
    pub(crate) fn spawn(
        self,
        updated_rx: mpsc::Receiver<()>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(updated_rx, shutdown).await;
        })
    }

    async fn run(self, mut updated_rx: mpsc::Receiver<()>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_millis = self.interval.as_millis() as u64,
            "Checkpoint publisher started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Checkpoint publisher shutting down");
                    break;
                }
                signal = updated_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.publish().await {
                warn!(error = %e, "Failed to publish checkpoint");
            }
        }
    }

    /// Publish a checkpoint for the current tree state, unless one was
    /// published less than `interval` ago.
    async fn publish(&self) -> Result<(), PublishError> {
        let mut txn = self.driver.begin().await?;

        let now = Utc::now().timestamp_millis();
        if let Some(at) = txn.checkpoint_published_at().await? {
            if now.saturating_sub(at) < self.interval.as_millis() as i64 {
                debug!("Skipping publish, checkpoint is fresh");
                return Ok(());
            }
        }

        let state = txn
            .tree_state()
            .await?
            .ok_or_else(|| StoreError::corrupt("tree state missing"))?;
        let checkpoint = Checkpoint {
            origin: self.origin.clone(),
            size: state.size,
            root: state.root,
        };
        let note = sign_note(&checkpoint.marshal(), &self.signers)?;
        txn.put_checkpoint(note, now).await?;
        txn.commit().await?;

        info!(size = state.size, "Published checkpoint");
        Ok(())
    }
}

//! The integrator: single-writer owner of tree mutation.
//!
//! Exactly one integrator task runs per log. It consumes batches from the
//! queue, assigns contiguous indices, extends entry bundles and hash tiles,
//! and commits the new tree state in one driver transaction. Re-running the
//! same batch at the same starting size reproduces byte-identical writes,
//! so a retry after a storage conflict is safe.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use mosaic_core::layout::ENTRY_BUNDLE_WIDTH;
use mosaic_core::{Entry, HashTile, SequencedIndex, TreeState};
use mosaic_storage::{LogDriver, LogTransaction, StoreError};

use crate::compact::{frontier_tile_ids, CompactRange, TileWriter};
use crate::error::AppendError;
use crate::queue::Batch;

pub(crate) struct Integrator<D> {
    driver: Arc<D>,
    state: TreeState,
    cp_tx: mpsc::Sender<()>,
}

impl<D: LogDriver> Integrator<D> {
    /// Create the integrator, initialising the tree state on a fresh store.
    pub(crate) async fn init(driver: Arc<D>, cp_tx: mpsc::Sender<()>) -> Result<Self, StoreError> {
        let mut txn = driver.begin().await?;
        let state = match txn.tree_state().await? {
            Some(state) => state,
            None => {
                info!("Initialising empty tree state");
                let state = TreeState::empty();
                txn.put_tree_state(state).await?;
                txn.commit().await?;
                state
            }
        };
        let integrator = Self {
            driver,
            state,
            cp_tx,
        };
        // Ask the publisher for a checkpoint covering whatever we found.
        integrator.signal_publisher();
        Ok(integrator)
    }

    /// Current integrated tree state.
    pub(crate) fn state(&self) -> TreeState {
        self.state
    }

    fn signal_publisher(&self) {
        // One-slot channel: a pending signal already covers this update.
        let _ = self.cp_tx.try_send(());
    }

    /// Run the integration loop until shutdown, draining queued batches
    /// with `ShuttingDown` once the signal arrives.
    pub(crate) async fn run(
        mut self,
        mut batch_rx: mpsc::UnboundedReceiver<Batch>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    batch_rx.close();
                    while let Ok(batch) = batch_rx.try_recv() {
                        batch.fail(AppendError::ShuttingDown);
                    }
                    break;
                }
                batch = batch_rx.recv() => match batch {
                    Some(batch) => self.handle(batch).await,
                    None => break,
                },
            }
        }
        info!("Integrator stopped");
    }

    async fn handle(&mut self, batch: Batch) {
        match self.sequence_batch(&batch.entries).await {
            Ok(first) => {
                for (i, tx) in batch.responders.into_iter().enumerate() {
                    let _ = tx.send(Ok(SequencedIndex {
                        index: first + i as u64,
                        is_duplicate: false,
                    }));
                }
            }
            Err(err) => {
                error!(error = %err, entries = batch.entries.len(), "Batch failed");
                batch.fail(AppendError::Integration(err));
            }
        }
    }

    /// Integrate a batch, returning the index assigned to its first entry.
    ///
    /// A storage conflict is retried once at the batch boundary; any other
    /// error aborts the batch.
    pub(crate) async fn sequence_batch(&mut self, entries: &[Entry]) -> Result<u64, StoreError> {
        if entries.is_empty() {
            return Ok(self.state.size);
        }
        match self.integrate_once(entries).await {
            Err(StoreError::Conflict(msg)) => {
                warn!(conflict = %msg, "Write conflict, retrying batch");
                self.integrate_once(entries).await
            }
            other => other,
        }
    }

    async fn integrate_once(&mut self, entries: &[Entry]) -> Result<u64, StoreError> {
        let mut txn = self.driver.begin().await?;
        let from = match txn.tree_state().await? {
            Some(state) => state.size,
            None => return Err(StoreError::corrupt("tree state missing")),
        };

        self.append_bundles(&mut *txn, from, entries).await?;

        // Load the right-frontier tiles and extend the tree.
        let mut tiles = HashMap::new();
        for (id, width) in frontier_tile_ids(from) {
            let tile = txn.tile(id).await?.ok_or_else(|| {
                StoreError::corrupt(format!("frontier tile {}/{} missing", id.level, id.index))
            })?;
            if tile.width() < width as usize {
                return Err(StoreError::corrupt(format!(
                    "frontier tile {}/{} holds {} nodes, expected {}",
                    id.level,
                    id.index,
                    tile.width(),
                    width
                )));
            }
            tiles.insert(id, HashTile::new(tile.nodes()[..width as usize].to_vec()));
        }

        let mut range = CompactRange::from_tiles(from, &tiles)?;
        let mut writer = TileWriter::seeded(tiles);
        for entry in entries {
            range.append(entry.leaf_hash(), &mut writer);
        }

        let new_state = TreeState {
            size: range.size(),
            root: range.root(),
        };
        for (id, tile) in writer.into_modified() {
            txn.put_tile(id, tile).await?;
        }
        txn.put_tree_state(new_state).await?;
        txn.commit().await?;

        debug!(from, to = new_state.size, "Integrated batch");
        self.state = new_state;
        self.signal_publisher();
        Ok(from)
    }

    /// Serialize the batch into entry bundles: extend the trailing partial
    /// bundle, seal every bundle that fills, and write the new tail.
    async fn append_bundles(
        &self,
        txn: &mut dyn LogTransaction,
        from: u64,
        entries: &[Entry],
    ) -> Result<(), StoreError> {
        let mut bundle_index = from / ENTRY_BUNDLE_WIDTH;
        let mut entries_in_bundle = from % ENTRY_BUNDLE_WIDTH;
        let mut buffer = BytesMut::new();

        if entries_in_bundle > 0 {
            let partial = txn.entry_bundle(bundle_index).await?.ok_or_else(|| {
                StoreError::corrupt(format!("bundle {bundle_index} missing at size {from}"))
            })?;
            if partial.size as u64 != entries_in_bundle {
                return Err(StoreError::corrupt(format!(
                    "bundle {bundle_index} holds {} entries, expected {entries_in_bundle}",
                    partial.size
                )));
            }
            buffer.extend_from_slice(&partial.data);
        }

        for (i, entry) in entries.iter().enumerate() {
            buffer.extend_from_slice(&entry.marshal_bundle_data(from + i as u64));
            entries_in_bundle += 1;
            if entries_in_bundle == ENTRY_BUNDLE_WIDTH {
                txn.put_entry_bundle(
                    bundle_index,
                    entries_in_bundle as u32,
                    buffer.split().freeze(),
                )
                .await?;
                bundle_index += 1;
                entries_in_bundle = 0;
            }
        }
        if entries_in_bundle > 0 {
            txn.put_entry_bundle(bundle_index, entries_in_bundle as u32, buffer.freeze())
                .await?;
        }
        Ok(())
    }
}

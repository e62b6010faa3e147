//! In-memory driver for tests and simulation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use mosaic_core::{layout, HashTile, TileId, TreeState};

use crate::driver::{check_partial_width, BundleRecord, LogDriver, LogReader, LogTransaction};
use crate::error::StoreError;

/// An in-memory implementation of the driver contract.
///
/// Cloning is cheap and shares the underlying store.
#[derive(Clone)]
pub struct MemoryDriver {
    inner: Arc<Inner>,
}

struct Inner {
    tiles: DashMap<TileId, HashTile>,
    bundles: DashMap<u64, BundleRecord>,
    tree_state: RwLock<Option<TreeState>>,
    checkpoint: RwLock<Option<(Vec<u8>, i64)>>,
    write_lock: Arc<Mutex<()>>,
}

impl MemoryDriver {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tiles: DashMap::new(),
                bundles: DashMap::new(),
                tree_state: RwLock::new(None),
                checkpoint: RwLock::new(None),
                write_lock: Arc::new(Mutex::new(())),
            }),
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogReader for MemoryDriver {
    async fn read_checkpoint(&self) -> Result<Vec<u8>, StoreError> {
        self.inner
            .checkpoint
            .read()
            .await
            .as_ref()
            .map(|(note, _)| note.clone())
            .ok_or_else(|| StoreError::not_found("checkpoint"))
    }

    async fn read_tile(&self, level: u64, index: u64, p: u8) -> Result<Vec<u8>, StoreError> {
        let id = TileId::new(level, index);
        let tile = self
            .inner
            .tiles
            .get(&id)
            .ok_or_else(|| StoreError::not_found(layout::tile_path(level, index, p)))?;
        check_partial_width(
            &layout::tile_path(level, index, p),
            tile.width() as u64,
            p,
            layout::TILE_WIDTH,
        )?;
        Ok(tile.marshal())
    }

    async fn read_entry_bundle(&self, index: u64, p: u8) -> Result<Vec<u8>, StoreError> {
        let bundle = self
            .inner
            .bundles
            .get(&index)
            .ok_or_else(|| StoreError::not_found(layout::entries_path(index, p)))?;
        check_partial_width(
            &layout::entries_path(index, p),
            bundle.size as u64,
            p,
            layout::ENTRY_BUNDLE_WIDTH,
        )?;
        Ok(bundle.data.to_vec())
    }

    async fn integrated_size(&self) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .tree_state
            .read()
            .await
            .map(|s| s.size)
            .unwrap_or(0))
    }
}

#[async_trait]
impl LogDriver for MemoryDriver {
    async fn begin(&self) -> Result<Box<dyn LogTransaction>, StoreError> {
        let guard = self.inner.write_lock.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            _guard: guard,
            staged_tiles: HashMap::new(),
            staged_bundles: HashMap::new(),
            staged_state: None,
            staged_checkpoint: None,
        }))
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    _guard: OwnedMutexGuard<()>,
    staged_tiles: HashMap<TileId, HashTile>,
    staged_bundles: HashMap<u64, BundleRecord>,
    staged_state: Option<TreeState>,
    staged_checkpoint: Option<(Vec<u8>, i64)>,
}

#[async_trait]
impl LogTransaction for MemoryTransaction {
    async fn tree_state(&mut self) -> Result<Option<TreeState>, StoreError> {
        if let Some(state) = self.staged_state {
            return Ok(Some(state));
        }
        Ok(*self.inner.tree_state.read().await)
    }

    async fn tile(&mut self, id: TileId) -> Result<Option<HashTile>, StoreError> {
        if let Some(tile) = self.staged_tiles.get(&id) {
            return Ok(Some(tile.clone()));
        }
        Ok(self.inner.tiles.get(&id).map(|t| t.clone()))
    }

    async fn entry_bundle(&mut self, index: u64) -> Result<Option<BundleRecord>, StoreError> {
        if let Some(bundle) = self.staged_bundles.get(&index) {
            return Ok(Some(bundle.clone()));
        }
        Ok(self.inner.bundles.get(&index).map(|b| b.clone()))
    }

    async fn checkpoint_published_at(&mut self) -> Result<Option<i64>, StoreError> {
        if let Some((_, at)) = &self.staged_checkpoint {
            return Ok(Some(*at));
        }
        Ok(self.inner.checkpoint.read().await.as_ref().map(|(_, at)| *at))
    }

    async fn put_tile(&mut self, id: TileId, tile: HashTile) -> Result<(), StoreError> {
        self.staged_tiles.insert(id, tile);
        Ok(())
    }

    async fn put_entry_bundle(
        &mut self,
        index: u64,
        size: u32,
        data: Bytes,
    ) -> Result<(), StoreError> {
        self.staged_bundles.insert(index, BundleRecord { size, data });
        Ok(())
    }

    async fn put_tree_state(&mut self, state: TreeState) -> Result<(), StoreError> {
        self.staged_state = Some(state);
        Ok(())
    }

    async fn put_checkpoint(
        &mut self,
        note: Vec<u8>,
        published_at: i64,
    ) -> Result<(), StoreError> {
        self.staged_checkpoint = Some((note, published_at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        for (id, tile) in this.staged_tiles {
            this.inner.tiles.insert(id, tile);
        }
        for (index, bundle) in this.staged_bundles {
            this.inner.bundles.insert(index, bundle);
        }
        if let Some(state) = this.staged_state {
            *this.inner.tree_state.write().await = Some(state);
        }
        if let Some(cp) = this.staged_checkpoint {
            *this.inner.checkpoint.write().await = Some(cp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_store_is_empty() {
        let driver = MemoryDriver::new();
        assert_eq!(driver.integrated_size().await.unwrap(), 0);
        assert!(driver.read_checkpoint().await.unwrap_err().is_not_found());
        assert!(driver.read_tile(0, 0, 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_partial_read_policy() {
        let driver = MemoryDriver::new();
        let mut txn = driver.begin().await.unwrap();
        let tile = HashTile::new(vec![[7u8; 32]; 5]);
        txn.put_tile(TileId::new(0, 0), tile.clone()).await.unwrap();
        txn.commit().await.unwrap();

        // Requests at or below the stored width return the stored tile.
        for p in 1..=5 {
            assert_eq!(driver.read_tile(0, 0, p).await.unwrap(), tile.marshal());
        }
        // Requests beyond it, including "full", are NotFound.
        assert!(driver.read_tile(0, 0, 6).await.unwrap_err().is_not_found());
        assert!(driver.read_tile(0, 0, 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let driver = MemoryDriver::new();
        {
            let mut txn = driver.begin().await.unwrap();
            txn.put_tree_state(TreeState { size: 9, root: [1; 32] })
                .await
                .unwrap();
            // Dropped without commit.
        }
        assert_eq!(driver.integrated_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_reads_its_own_writes() {
        let driver = MemoryDriver::new();
        let mut txn = driver.begin().await.unwrap();
        txn.put_entry_bundle(3, 2, Bytes::from_static(b"xy"))
            .await
            .unwrap();
        let got = txn.entry_bundle(3).await.unwrap().unwrap();
        assert_eq!(got.size, 2);
        txn.commit().await.unwrap();

        assert_eq!(driver.read_entry_bundle(3, 2).await.unwrap(), b"xy");
    }
}

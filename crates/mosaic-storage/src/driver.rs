//! The persistence driver contract.
//!
//! [`LogReader`] is the lock-free read surface every consumer (serving
//! personality, follower, clients-in-test) uses. [`LogDriver::begin`] hands
//! out the single-writer transaction the integrator and checkpoint publisher
//! mutate the tree through. A driver admits one write transaction at a time;
//! dropping an uncommitted transaction discards every buffered write.

use async_trait::async_trait;
use bytes::Bytes;

use mosaic_core::{HashTile, TileId, TreeState};

use crate::error::StoreError;

/// A stored entry bundle: its entry count and serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    /// Number of entries serialized in `data` (1..=256).
    pub size: u32,
    /// The bundle bytes.
    pub data: Bytes,
}

/// Read access to the four object families.
///
/// Tile and bundle reads follow the partial-object policy: a request for
/// partial width `p` (`0` meaning the complete object) returns the stored
/// object unmodified when its width is at least `p`, and `NotFound` when the
/// store holds fewer entries than requested.
#[async_trait]
pub trait LogReader: Send + Sync {
    /// Latest published checkpoint note bytes.
    async fn read_checkpoint(&self) -> Result<Vec<u8>, StoreError>;

    /// Hash tile `(level, index)` at partial width `p`.
    async fn read_tile(&self, level: u64, index: u64, p: u8) -> Result<Vec<u8>, StoreError>;

    /// Entry bundle `index` at partial width `p`.
    async fn read_entry_bundle(&self, index: u64, p: u8) -> Result<Vec<u8>, StoreError>;

    /// Size of the currently integrated tree (0 for a fresh store).
    async fn integrated_size(&self) -> Result<u64, StoreError>;
}

/// A single-writer transaction over the store.
///
/// Reads observe earlier writes buffered in the same transaction. `commit`
/// makes every buffered write visible; anything short of commit leaves the
/// store untouched.
#[async_trait]
pub trait LogTransaction: Send {
    /// Current tree state, if any has been written.
    async fn tree_state(&mut self) -> Result<Option<TreeState>, StoreError>;

    /// Stored row of the addressed tile, whatever its width.
    async fn tile(&mut self, id: TileId) -> Result<Option<HashTile>, StoreError>;

    /// Stored bundle record at `index`, whatever its size.
    async fn entry_bundle(&mut self, index: u64) -> Result<Option<BundleRecord>, StoreError>;

    /// Millisecond timestamp of the last checkpoint publication.
    async fn checkpoint_published_at(&mut self) -> Result<Option<i64>, StoreError>;

    /// Replace the addressed tile row.
    async fn put_tile(&mut self, id: TileId, tile: HashTile) -> Result<(), StoreError>;

    /// Replace the bundle at `index`.
    async fn put_entry_bundle(
        &mut self,
        index: u64,
        size: u32,
        data: Bytes,
    ) -> Result<(), StoreError>;

    /// Replace the tree state.
    async fn put_tree_state(&mut self, state: TreeState) -> Result<(), StoreError>;

    /// Replace the published checkpoint.
    async fn put_checkpoint(&mut self, note: Vec<u8>, published_at: i64)
        -> Result<(), StoreError>;

    /// Commit every buffered write atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// A complete driver: snapshot reads plus the write transaction.
#[async_trait]
pub trait LogDriver: LogReader {
    /// Start a write transaction. Waits until no other transaction is open.
    async fn begin(&self) -> Result<Box<dyn LogTransaction>, StoreError>;
}

/// Clamp a stored object against the partial-read policy.
///
/// `stored` is the number of entries the store holds, `requested` the
/// partial width asked for (`0` meaning complete).
pub(crate) fn check_partial_width(
    what: &str,
    stored: u64,
    requested: u8,
    full_width: u64,
) -> Result<(), StoreError> {
    let want = if requested == 0 {
        full_width
    } else {
        requested as u64
    };
    if want > stored {
        return Err(StoreError::not_found(format!(
            "{what}: {want} entries requested, {stored} stored"
        )));
    }
    Ok(())
}

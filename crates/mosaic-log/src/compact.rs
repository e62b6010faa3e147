//! Compact-range Merkle tree extension.
//!
//! Appending a batch to a tree of size `s` only needs the hashes on the
//! tree's right frontier: the roots of the perfect subtrees in the binary
//! decomposition of `s`. Those all live in the rightmost partial tile of
//! each tile level, so integration is O(batch + log N) regardless of tree
//! size.
//!
//! [`CompactRange`] holds the frontier peaks and appends leaves one at a
//! time, merging completed sibling subtrees upward. Every node that lands
//! on a stored tile row is recorded in a [`TileWriter`], which accumulates
//! the set of tiles the batch modifies.

use std::collections::{HashMap, HashSet};

use mosaic_core::layout::{self, TILE_HEIGHT, TILE_WIDTH};
use mosaic_core::{hasher, Hash, HashTile, TileId};
use mosaic_storage::StoreError;

/// Tiles required to reconstruct the frontier at `size`, with the partial
/// width each is expected to hold.
pub(crate) fn frontier_tile_ids(size: u64) -> Vec<(TileId, u8)> {
    let mut ids = Vec::new();
    let mut level = 0u64;
    while TILE_HEIGHT as u64 * level < u64::BITS as u64 {
        let row = size >> (TILE_HEIGHT as u64 * level);
        if row == 0 {
            break;
        }
        let width = row % TILE_WIDTH;
        if width != 0 {
            ids.push((TileId::new(level, row / TILE_WIDTH), width as u8));
        }
        level += 1;
    }
    ids
}

/// Accumulates tile rows touched by an integration.
///
/// Seeded with the loaded frontier tiles so partial rows are extended in
/// place; only tiles that actually receive nodes are emitted.
pub(crate) struct TileWriter {
    tiles: HashMap<TileId, HashTile>,
    dirty: HashSet<TileId>,
}

impl TileWriter {
    /// Create a writer over the loaded frontier tiles.
    pub(crate) fn seeded(tiles: HashMap<TileId, HashTile>) -> Self {
        Self {
            tiles,
            dirty: HashSet::new(),
        }
    }

    /// Record the hash of the completed node `(level, index)`.
    ///
    /// Only nodes on stored rows (levels that are a multiple of the tile
    /// height) are persisted; interior nodes are recomputed on read.
    fn set_node(&mut self, level: u64, index: u64, hash: Hash) {
        let (tile_level, tile_index, node_level, node_index) =
            layout::node_coords_to_tile_address(level, index);
        if node_level != 0 {
            return;
        }
        let id = TileId::new(tile_level, tile_index);
        let pos = node_index as usize;
        let tile = self.tiles.entry(id).or_default();
        debug_assert_eq!(pos, tile.width(), "non-contiguous tile row write");
        tile.push(hash);
        self.dirty.insert(id);
    }

    /// The tiles modified since seeding.
    pub(crate) fn into_modified(self) -> Vec<(TileId, HashTile)> {
        let dirty = self.dirty;
        self.tiles
            .into_iter()
            .filter(|(id, _)| dirty.contains(id))
            .collect()
    }
}

/// The right frontier of a tree: one peak hash per set bit of `size`,
/// ordered from the highest subtree to the lowest.
pub(crate) struct CompactRange {
    size: u64,
    peaks: Vec<Hash>,
}

impl CompactRange {
    /// Reconstruct the frontier at `size` from the loaded frontier tiles.
    pub(crate) fn from_tiles(
        size: u64,
        tiles: &HashMap<TileId, HashTile>,
    ) -> Result<Self, StoreError> {
        let mut peaks = Vec::new();
        let mut offset = 0u64;
        for bit in (0..u64::BITS as u64).rev() {
            if (size >> bit) & 1 == 0 {
                continue;
            }
            peaks.push(subtree_root(bit, offset >> bit, tiles)?);
            offset += 1 << bit;
        }
        Ok(Self { size, peaks })
    }

    /// Number of leaves covered.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Append one leaf hash, merging completed subtrees upward and
    /// recording every completed stored-row node in `sink`.
    pub(crate) fn append(&mut self, leaf: Hash, sink: &mut TileWriter) {
        sink.set_node(0, self.size, leaf);

        let mut hash = leaf;
        let mut level = 0u64;
        let mut index = self.size;
        let mut remaining = self.size;
        while remaining & 1 == 1 {
            let left = self.peaks.pop().expect("frontier out of sync with size");
            hash = hasher::node_hash(&left, &hash);
            level += 1;
            index >>= 1;
            sink.set_node(level, index, hash);
            remaining >>= 1;
        }
        self.peaks.push(hash);
        self.size += 1;
    }

    /// Current RFC 6962 root over the covered leaves.
    pub(crate) fn root(&self) -> Hash {
        match self.peaks.split_last() {
            None => hasher::empty_root(),
            Some((last, rest)) => {
                let mut root = *last;
                for peak in rest.iter().rev() {
                    root = hasher::node_hash(peak, &root);
                }
                root
            }
        }
    }
}

/// Hash of the complete subtree node `(level, index)`, computed from the
/// stored row of its enclosing tile.
fn subtree_root(
    level: u64,
    index: u64,
    tiles: &HashMap<TileId, HashTile>,
) -> Result<Hash, StoreError> {
    let (tile_level, tile_index, node_level, node_index) =
        layout::node_coords_to_tile_address(level, index);
    let id = TileId::new(tile_level, tile_index);
    let tile = tiles.get(&id).ok_or_else(|| {
        StoreError::corrupt(format!("missing frontier tile {}/{}", id.level, id.index))
    })?;

    let pos = (node_index as usize) << node_level;
    let count = 1usize << node_level;
    if pos + count > tile.width() {
        return Err(StoreError::corrupt(format!(
            "frontier tile {}/{} holds {} nodes, need {}",
            id.level,
            id.index,
            tile.width(),
            pos + count
        )));
    }

    let mut row = tile.nodes()[pos..pos + count].to_vec();
    while row.len() > 1 {
        row = row
            .chunks(2)
            .map(|pair| hasher::node_hash(&pair[0], &pair[1]))
            .collect();
    }
    Ok(row[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::leaf_hash;

    /// Reference RFC 6962 root over leaf payloads, computed the slow way.
    fn reference_root(leaves: &[Vec<u8>]) -> Hash {
        fn largest_power_of_two_smaller_than(n: usize) -> usize {
            1 << (usize::BITS - 1 - (n - 1).leading_zeros())
        }
        fn mth(hashes: &[Hash]) -> Hash {
            match hashes.len() {
                0 => hasher::empty_root(),
                1 => hashes[0],
                n => {
                    let k = largest_power_of_two_smaller_than(n);
                    hasher::node_hash(&mth(&hashes[..k]), &mth(&hashes[k..]))
                }
            }
        }
        let hashes: Vec<Hash> = leaves.iter().map(|l| leaf_hash(l)).collect();
        mth(&hashes)
    }

    /// Append `total` leaves in `batch`-sized chunks through fresh
    /// frontiers, as the integrator does, returning the final root and the
    /// accumulated tile set.
    fn grow(total: u64, batch: usize) -> (Hash, HashMap<TileId, HashTile>) {
        let mut store: HashMap<TileId, HashTile> = HashMap::new();
        let mut size = 0u64;
        let mut root = hasher::empty_root();
        while size < total {
            let mut loaded = HashMap::new();
            for (id, width) in frontier_tile_ids(size) {
                let tile = store.get(&id).expect("frontier tile missing");
                assert!(tile.width() >= width as usize);
                loaded.insert(id, HashTile::new(tile.nodes()[..width as usize].to_vec()));
            }
            let mut range = CompactRange::from_tiles(size, &loaded).unwrap();
            let mut writer = TileWriter::seeded(loaded);
            let n = batch.min((total - size) as usize);
            for i in 0..n {
                let payload = format!("leaf-{}", size + i as u64);
                range.append(leaf_hash(payload.as_bytes()), &mut writer);
            }
            root = range.root();
            for (id, tile) in writer.into_modified() {
                store.insert(id, tile);
            }
            size += n as u64;
        }
        (root, store)
    }

    #[test]
    fn test_empty_range_root() {
        let range = CompactRange::from_tiles(0, &HashMap::new()).unwrap();
        assert_eq!(range.root(), hasher::empty_root());
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let mut range = CompactRange::from_tiles(0, &HashMap::new()).unwrap();
        let mut writer = TileWriter::seeded(HashMap::new());
        range.append(leaf_hash(b"hello"), &mut writer);
        assert_eq!(range.root(), leaf_hash(b"hello"));
        assert_eq!(range.size(), 1);
    }

    #[test]
    fn test_two_leaf_root() {
        let mut range = CompactRange::from_tiles(0, &HashMap::new()).unwrap();
        let mut writer = TileWriter::seeded(HashMap::new());
        range.append(leaf_hash(b"a"), &mut writer);
        range.append(leaf_hash(b"b"), &mut writer);
        assert_eq!(
            range.root(),
            hasher::node_hash(&leaf_hash(b"a"), &leaf_hash(b"b"))
        );
    }

    #[test]
    fn test_roots_match_reference_at_every_size() {
        for total in [1u64, 2, 3, 4, 5, 7, 8, 15, 16, 17, 63, 64, 65, 100] {
            let (got, _) = grow(total, 1);
            let leaves: Vec<Vec<u8>> = (0..total)
                .map(|i| format!("leaf-{i}").into_bytes())
                .collect();
            assert_eq!(got, reference_root(&leaves), "size {total}");
        }
    }

    #[test]
    fn test_batching_does_not_change_roots() {
        for batch in [1usize, 2, 3, 7, 50, 300] {
            let (root, _) = grow(300, batch);
            let (baseline, _) = grow(300, 1);
            assert_eq!(root, baseline, "batch {batch}");
        }
    }

    #[test]
    fn test_tile_boundary_writes() {
        // 257 leaves: tile (0,0) seals, tile (0,1) opens, and the level-8
        // node covering the first 256 leaves lands in tile (1,0).
        let (_, store) = grow(257, 257);
        assert_eq!(store.get(&TileId::new(0, 0)).unwrap().width(), 256);
        assert_eq!(store.get(&TileId::new(0, 1)).unwrap().width(), 1);
        assert_eq!(store.get(&TileId::new(1, 0)).unwrap().width(), 1);
    }

    #[test]
    fn test_sealed_tiles_never_rewritten() {
        // Grow leaf by leaf, snapshotting tile (0,0) when it seals.
        let (_, at_256) = grow(256, 1);
        let sealed = at_256.get(&TileId::new(0, 0)).unwrap().clone();
        let (_, at_600) = grow(600, 1);
        assert_eq!(at_600.get(&TileId::new(0, 0)).unwrap(), &sealed);
    }

    #[test]
    fn test_frontier_tile_ids() {
        assert!(frontier_tile_ids(0).is_empty());
        assert_eq!(frontier_tile_ids(1), vec![(TileId::new(0, 0), 1)]);
        assert_eq!(frontier_tile_ids(255), vec![(TileId::new(0, 0), 255)]);
        // 256 = one sealed tile, frontier moves entirely to level 1.
        assert_eq!(frontier_tile_ids(256), vec![(TileId::new(1, 0), 1)]);
        assert_eq!(
            frontier_tile_ids(258),
            vec![(TileId::new(0, 1), 2), (TileId::new(1, 0), 1)]
        );
        // 768 leaves: three sealed level-0 tiles, partial level-1 row.
        assert_eq!(frontier_tile_ids(768), vec![(TileId::new(1, 0), 3)]);
    }
}

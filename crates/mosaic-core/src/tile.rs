//! Hash tiles and tree state.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::hasher::{Hash, HASH_SIZE};
use crate::layout::TILE_WIDTH;

/// Address of a hash tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    /// Tile level (0 holds the leaf hashes).
    pub level: u64,
    /// Tile index within its level.
    pub index: u64,
}

impl TileId {
    /// Create a new tile address.
    pub fn new(level: u64, index: u64) -> Self {
        Self { level, index }
    }
}

/// The stored row of one tile: between 1 and 256 node hashes.
///
/// A tile spans 8 tree levels but only its bottom row is persisted; the
/// interior hashes are recomputed from the row on demand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HashTile {
    nodes: Vec<Hash>,
}

impl HashTile {
    /// Create a tile from a row of node hashes.
    pub fn new(nodes: Vec<Hash>) -> Self {
        debug_assert!(nodes.len() <= TILE_WIDTH as usize);
        Self { nodes }
    }

    /// Decode a tile from its wire form: concatenated 32-byte hashes.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.is_empty() || data.len() % HASH_SIZE != 0 {
            return Err(CodecError::malformed(format!(
                "hash tile of {} bytes",
                data.len()
            )));
        }
        let count = data.len() / HASH_SIZE;
        if count > TILE_WIDTH as usize {
            return Err(CodecError::malformed(format!("hash tile of {count} nodes")));
        }
        let nodes = data
            .chunks_exact(HASH_SIZE)
            .map(|c| {
                let mut h = [0u8; HASH_SIZE];
                h.copy_from_slice(c);
                h
            })
            .collect();
        Ok(Self { nodes })
    }

    /// Encode the tile to its wire form.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.nodes.len() * HASH_SIZE);
        for n in &self.nodes {
            out.extend_from_slice(n);
        }
        out
    }

    /// Number of stored nodes.
    pub fn width(&self) -> usize {
        self.nodes.len()
    }

    /// The stored row.
    pub fn nodes(&self) -> &[Hash] {
        &self.nodes
    }

    /// Append a node to the row.
    pub fn push(&mut self, node: Hash) {
        debug_assert!(self.nodes.len() < TILE_WIDTH as usize);
        self.nodes.push(node);
    }
}

/// The current integrated tree: its size and RFC 6962 root hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    /// Number of integrated leaves.
    pub size: u64,
    /// Merkle root over those leaves.
    pub root: Hash,
}

impl TreeState {
    /// Tree state of a freshly initialised, empty log.
    pub fn empty() -> Self {
        Self {
            size: 0,
            root: crate::hasher::empty_root(),
        }
    }
}

/// The position assigned to an admitted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencedIndex {
    /// Index of the entry within the log.
    pub index: u64,
    /// True when the entry was already present and no new slot was used.
    pub is_duplicate: bool,
}

//! # Mosaic Core
//!
//! Pure foundations shared by every Mosaic crate: RFC 6962 Merkle hashing,
//! the tile/bundle layout arithmetic, and the wire codecs for entries,
//! entry bundles and hash tiles.
//!
//! Nothing in this crate performs I/O. Storage adapters, the writer and the
//! client all consume the same layout math from here so that the objects one
//! side writes are exactly the objects the other side addresses.
//!
//! ## Shape of the tree
//!
//! The log is an append-only RFC 6962 Merkle tree over opaque byte entries.
//! Leaf hashes and internal nodes are stored in fixed-shape **tiles**: 256
//! hashes wide, 8 levels tall. Entries themselves are grouped into **entry
//! bundles** of up to 256 length-prefixed payloads. Both families are
//! left-dense: object `k` exists iff the tree is big enough to need it, and
//! once an object reaches its full width of 256 it is sealed and never
//! rewritten.

pub mod entry;
pub mod error;
pub mod hasher;
pub mod layout;
pub mod tile;

pub use entry::{parse_bundle, Entry};
pub use error::CodecError;
pub use hasher::{empty_root, leaf_hash, node_hash, Hash, HASH_SIZE};
pub use layout::{ENTRY_BUNDLE_WIDTH, TILE_HEIGHT, TILE_WIDTH};
pub use tile::{HashTile, SequencedIndex, TileId, TreeState};

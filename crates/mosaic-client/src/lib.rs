//! # Mosaic Client
//!
//! The verifying reader of a Mosaic log. Given fetchers for the checkpoint
//! and tile resources, this crate maintains a verified view of the log and
//! builds inclusion and consistency proofs out of stored tiles:
//!
//! - [`LogStateTracker`]: fetches checkpoints, verifies their signatures
//!   and origin, and only adopts a new checkpoint after proving it
//!   consistent with the previously held one. Conflicting roots surface as
//!   [`ClientError::ForkDetected`].
//! - [`ProofBuilder`] and [`NodeCache`]: lazily fetch the tiles containing
//!   the internal nodes a proof needs, rehashing within a tile to reach
//!   nodes above its stored row.
//! - [`verify_inclusion`] / [`verify_consistency`]: RFC 6962 proof checks.
//! - [`PublicationAwaiter`]: polls the checkpoint until an assigned index
//!   is covered by a published checkpoint.

pub mod error;
pub mod fetch;
pub mod node_cache;
pub mod proof;
pub mod tracker;

pub use error::ClientError;
pub use fetch::{fetch_entry_bundle, CheckpointFetcher, EntryBundleFetcher, TileFetcher};
pub use node_cache::NodeCache;
pub use proof::{verify_consistency, verify_inclusion, ProofBuilder};
pub use tracker::{LogStateTracker, PublicationAwaiter, TrackedCheckpoint};

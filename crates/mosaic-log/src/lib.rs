//! # Mosaic Log
//!
//! The writer half of a Mosaic log: batched admission, tile-aligned Merkle
//! integration, periodic signed checkpoints, and the antispam follower.
//!
//! The moving parts, in dependency order:
//!
//! - The queue: accepts concurrent `add` calls, forms batches bounded by
//!   count and age, and hands each batch to the integrator.
//! - The integrator task: the single owner of tree mutation. It assigns
//!   contiguous indices, appends entry bundles, extends the Merkle tree via
//!   a compact range over the right-frontier tiles, and commits everything
//!   in one driver transaction.
//! - The checkpoint publisher task: wakes on integration or on a timer and
//!   replaces the signed checkpoint, rate-limited by the publish interval.
//! - [`Antispam`]: an independent follower that streams committed bundles
//!   into a persistent `leaf hash -> index` index, short-circuiting
//!   duplicate submissions and applying pushback when it lags too far.
//!
//! [`Appender`] wires the pieces together over any
//! [`LogDriver`](mosaic_storage::LogDriver).

mod antispam;
mod appender;
mod compact;
mod error;
mod integrator;
mod options;
mod publisher;
mod queue;

pub use antispam::{leaf_bundle_hasher, Antispam, AntispamOptions, BundleHasher, Follower};
pub use appender::Appender;
pub use error::{AppendError, FollowerError};
pub use options::AppendOptions;
pub use queue::IndexFuture;

pub use mosaic_core::SequencedIndex;

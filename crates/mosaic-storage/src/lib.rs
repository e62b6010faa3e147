//! # Mosaic Storage
//!
//! The persistence driver contract for the Mosaic log, plus two adapters:
//!
//! - [`MemoryDriver`]: an in-memory adapter for tests and simulation.
//! - [`FileDriver`]: a filesystem adapter using the tile path layout, with
//!   temp-file-plus-rename atomicity per object and a single lock around the
//!   tree-state mutation path.
//!
//! A driver stores four object families: the signed checkpoint, the tree
//! state, hash tiles and entry bundles. Readers get lock-free snapshot reads
//! with the partial-object policy (stored width smaller than requested is
//! `NotFound`; larger is returned as stored); all writes flow through a
//! single-writer transaction owned by the integrator or publisher.

pub mod driver;
pub mod error;
pub mod file;
pub mod memory;

pub use driver::{BundleRecord, LogDriver, LogReader, LogTransaction};
pub use error::StoreError;
pub use file::FileDriver;
pub use memory::MemoryDriver;

/// Storage schema version understood by this crate.
///
/// Persistent adapters record it on initialisation and refuse to open state
/// written under a different version.
pub const COMPATIBILITY_VERSION: u32 = 1;

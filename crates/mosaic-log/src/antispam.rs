//! Antispam / deduplication follower.
//!
//! [`Antispam`] maintains a persistent `leaf hash -> first index` table by
//! streaming committed entry bundles in order. It is never on the critical
//! path of `add`: it only enables the duplicate short-circuit and the
//! pushback signal the queue consults.
//!
//! The follower holds a cursor of entries processed. Each step reads the
//! bundle at the cursor (at the partial width implied by the integrated
//! size), inserts first occurrences, and advances the cursor in the same
//! index transaction. A cursor of `p` makes negative lookups authoritative
//! only for indices below `p`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use mosaic_core::{layout, CodecError, Hash};
use mosaic_storage::LogReader;

use crate::error::FollowerError;

// Key: 32-byte leaf hash, value: first index it occupies.
const DEDUP: TableDefinition<&[u8], u64> = TableDefinition::new("dedup");
// Single-row table holding the follower cursor.
const FOLLOWER: TableDefinition<&str, u64> = TableDefinition::new("follower");

const CURSOR_KEY: &str = "entries_processed";

/// Parses a bundle's bytes into the leaf hash of each entry.
pub type BundleHasher = fn(&[u8]) -> Result<Vec<Hash>, CodecError>;

/// The default bundle hasher: decode the bundle and leaf-hash each entry.
pub fn leaf_bundle_hasher(bundle: &[u8]) -> Result<Vec<Hash>, CodecError> {
    Ok(mosaic_core::parse_bundle(bundle)?
        .iter()
        .map(|e| mosaic_core::leaf_hash(e))
        .collect())
}

/// Configuration for the antispam follower.
#[derive(Debug, Clone)]
pub struct AntispamOptions {
    /// Follower lag (integrated size minus cursor) above which new
    /// admissions are pushed back.
    pub pushback_threshold: u64,
    /// How often the follower polls for new bundles when caught up.
    pub poll_interval: Duration,
}

impl Default for AntispamOptions {
    fn default() -> Self {
        Self {
            pushback_threshold: 1024,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Persistent `leaf hash -> index` antispam index.
pub struct Antispam {
    db: Arc<Database>,
    options: AntispamOptions,
    pushback: Arc<AtomicBool>,
}

impl Antispam {
    /// Open (creating if necessary) the index database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, options: AntispamOptions) -> Result<Self, FollowerError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| FollowerError::index(e.to_string()))?;
        }
        let db = Database::create(path.as_ref()).map_err(|e| FollowerError::index(e.to_string()))?;

        // Make sure both tables exist before anyone reads.
        let txn = db
            .begin_write()
            .map_err(|e| FollowerError::index(e.to_string()))?;
        txn.open_table(DEDUP)
            .map_err(|e| FollowerError::index(e.to_string()))?;
        txn.open_table(FOLLOWER)
            .map_err(|e| FollowerError::index(e.to_string()))?;
        txn.commit().map_err(|e| FollowerError::index(e.to_string()))?;

        info!("Opened antispam index");
        Ok(Self {
            db: Arc::new(db),
            options,
            pushback: Arc::new(AtomicBool::new(false)),
        })
    }

    /// First index assigned to `hash`, if the follower has seen it.
    ///
    /// `None` is authoritative only for entries below the current cursor.
    pub fn index(&self, hash: &Hash) -> Result<Option<u64>, FollowerError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| FollowerError::index(e.to_string()))?;
        let table = txn
            .open_table(DEDUP)
            .map_err(|e| FollowerError::index(e.to_string()))?;
        let value = table
            .get(hash.as_slice())
            .map_err(|e| FollowerError::index(e.to_string()))?
            .map(|v| v.value());
        Ok(value)
    }

    /// Number of log entries the follower has processed.
    pub fn entries_processed(&self) -> Result<u64, FollowerError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| FollowerError::index(e.to_string()))?;
        let table = txn
            .open_table(FOLLOWER)
            .map_err(|e| FollowerError::index(e.to_string()))?;
        let value = table
            .get(CURSOR_KEY)
            .map_err(|e| FollowerError::index(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(0);
        Ok(value)
    }

    /// The pushback flag the queue consults. Set while the follower lags
    /// beyond the threshold, cleared as soon as it catches back up.
    pub fn pushback_flag(&self) -> Arc<AtomicBool> {
        self.pushback.clone()
    }

    /// Create the follower task body for this index.
    pub fn follower(&self, bundle_hasher: BundleHasher) -> Follower {
        Follower {
            db: self.db.clone(),
            options: self.options.clone(),
            pushback: self.pushback.clone(),
            bundle_hasher,
        }
    }
}

/// The streaming consumer populating an [`Antispam`] index.
pub struct Follower {
    db: Arc<Database>,
    options: AntispamOptions,
    pushback: Arc<AtomicBool>,
    bundle_hasher: BundleHasher,
}

impl Follower {
    /// Spawn the follow loop against a log reader.
    pub fn spawn<R: LogReader + 'static>(
        self,
        reader: Arc<R>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(reader, shutdown).await;
        })
    }

    async fn run<R: LogReader>(self, reader: Arc<R>, mut shutdown: broadcast::Receiver<()>) {
        info!("Antispam follower started");
        let mut failures: u32 = 0;
        loop {
            match self.step(reader.as_ref()).await {
                Ok(made_progress) => {
                    failures = 0;
                    if made_progress {
                        // More bundles may already be committed; keep going.
                        continue;
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Antispam follower halted");
                    return;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, failures, "Antispam follower step failed");
                }
            }

            let delay = backoff(self.options.poll_interval, failures);
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Antispam follower shutting down");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Process at most one bundle. Returns true when the cursor advanced.
    async fn step<R: LogReader>(&self, reader: &R) -> Result<bool, FollowerError> {
        let size = reader.integrated_size().await?;
        let processed = self.entries_processed()?;

        let lag = size.saturating_sub(processed);
        let over = lag > self.options.pushback_threshold;
        if self.pushback.swap(over, Ordering::Relaxed) != over {
            if over {
                warn!(lag, "Follower lagging, enabling pushback");
            } else {
                info!(lag, "Follower caught up, clearing pushback");
            }
        }

        if processed >= size {
            return Ok(false);
        }

        let bundle_index = processed / layout::ENTRY_BUNDLE_WIDTH;
        let partial = layout::partial_tile_size(0, bundle_index, size);
        let bundle = reader.read_entry_bundle(bundle_index, partial).await?;
        let hashes =
            (self.bundle_hasher)(&bundle).map_err(|e| FollowerError::Corrupt(e.to_string()))?;

        let first = bundle_index * layout::ENTRY_BUNDLE_WIDTH;
        let next = first + hashes.len() as u64;
        if next <= processed {
            // The stored bundle is no newer than the cursor; wait for more.
            return Ok(false);
        }

        let txn = self
            .db
            .begin_write()
            .map_err(|e| FollowerError::index(e.to_string()))?;
        {
            let mut dedup = txn
                .open_table(DEDUP)
                .map_err(|e| FollowerError::index(e.to_string()))?;
            for (i, hash) in hashes.iter().enumerate() {
                let index = first + i as u64;
                if index < processed {
                    continue;
                }
                // Keep the first occurrence only; processing is in order, so
                // any stored index is already the minimum.
                let seen = dedup
                    .get(hash.as_slice())
                    .map_err(|e| FollowerError::index(e.to_string()))?
                    .is_some();
                if !seen {
                    dedup
                        .insert(hash.as_slice(), index)
                        .map_err(|e| FollowerError::index(e.to_string()))?;
                }
            }
            let mut follower = txn
                .open_table(FOLLOWER)
                .map_err(|e| FollowerError::index(e.to_string()))?;
            follower
                .insert(CURSOR_KEY, next)
                .map_err(|e| FollowerError::index(e.to_string()))?;
        }
        txn.commit().map_err(|e| FollowerError::index(e.to_string()))?;

        debug!(from = processed, to = next, "Indexed bundle");
        Ok(true)
    }

    fn entries_processed(&self) -> Result<u64, FollowerError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| FollowerError::index(e.to_string()))?;
        let table = txn
            .open_table(FOLLOWER)
            .map_err(|e| FollowerError::index(e.to_string()))?;
        Ok(table
            .get(CURSOR_KEY)
            .map_err(|e| FollowerError::index(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(0))
    }
}

/// Poll interval grown exponentially with consecutive failures, capped at
/// five seconds.
fn backoff(base: Duration, failures: u32) -> Duration {
    const MAX: Duration = Duration::from_secs(5);
    if failures == 0 {
        return base.min(MAX);
    }
    base.saturating_mul(2u32.saturating_pow(failures.min(16))).min(MAX)
}

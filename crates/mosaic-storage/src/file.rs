//! Filesystem driver.
//!
//! Objects live under a root directory using the shared tile path layout
//! (`tile/<level>/...`, `tile/entries/...`, `checkpoint`), with the tree
//! state and schema row as small records under `state/`. Every write goes to
//! a temp file in the target directory and is renamed into place, so readers
//! never observe a torn object; between the renames of one commit a reader
//! can observe a tile as briefly absent, which surfaces as a retryable
//! `NotFound`.
//!
//! A single async mutex serializes write transactions, making this a
//! single-writer store per process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

use mosaic_core::{layout, HashTile, TileId, TreeState};

use crate::driver::{check_partial_width, BundleRecord, LogDriver, LogReader, LogTransaction};
use crate::error::StoreError;
use crate::COMPATIBILITY_VERSION;

const CHECKPOINT_FILE: &str = "checkpoint";
const STATE_DIR: &str = "state";
const TREE_STATE_FILE: &str = "state/tree";
const VERSION_FILE: &str = "state/version";

/// Schema row recorded when a store is first initialised.
#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    compatibility_version: u32,
}

/// A filesystem implementation of the driver contract.
#[derive(Clone, Debug)]
pub struct FileDriver {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileDriver {
    /// Open (creating if necessary) a store rooted at `root`.
    ///
    /// Fails with `SchemaMismatch` when the directory was initialised by an
    /// incompatible version of this crate.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STATE_DIR)).await?;

        let version_path = root.join(VERSION_FILE);
        match fs::read(&version_path).await {
            Ok(bytes) => {
                let record: VersionRecord = postcard::from_bytes(&bytes)
                    .map_err(|e| StoreError::corrupt(format!("schema row: {e}")))?;
                if record.compatibility_version != COMPATIBILITY_VERSION {
                    return Err(StoreError::SchemaMismatch {
                        found: record.compatibility_version,
                        want: COMPATIBILITY_VERSION,
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let record = VersionRecord {
                    compatibility_version: COMPATIBILITY_VERSION,
                };
                write_atomic(&version_path, &postcard::to_allocvec(&record)?).await?;
                info!("Initialised log store");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    async fn read_tree_state(&self) -> Result<Option<TreeState>, StoreError> {
        match fs::read(self.path(TREE_STATE_FILE)).await {
            Ok(bytes) => {
                let state: TreeState = postcard::from_bytes(&bytes)
                    .map_err(|e| StoreError::corrupt(format!("tree state: {e}")))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a tile or bundle object, honouring the partial policy: try the
    /// sealed object first, then the widest stored partial.
    async fn read_object(
        &self,
        full_rel: &str,
        partial_rel: impl Fn(u8) -> String,
        requested: u8,
    ) -> Result<(Vec<u8>, u64), StoreError> {
        match fs::read(self.path(full_rel)).await {
            Ok(bytes) => return Ok((bytes, layout::TILE_WIDTH)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // No sealed object; look for the widest partial.
        let partial_dir = self.path(&format!("{full_rel}.p"));
        let mut widest: Option<u8> = None;
        match fs::read_dir(&partial_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if let Some(w) = entry.file_name().to_str().and_then(|n| n.parse::<u8>().ok())
                    {
                        widest = Some(widest.map_or(w, |cur| cur.max(w)));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let w = widest.ok_or_else(|| StoreError::not_found(full_rel.to_string()))?;
        if requested == 0 || requested > w {
            return Err(StoreError::not_found(partial_rel(requested)));
        }
        let bytes = fs::read(self.path(&partial_rel(w))).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                // Raced a writer sealing the object; momentary absence.
                StoreError::not_found(partial_rel(w))
            } else {
                StoreError::from(e)
            }
        })?;
        Ok((bytes, w as u64))
    }
}

#[async_trait]
impl LogReader for FileDriver {
    async fn read_checkpoint(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.path(CHECKPOINT_FILE)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(CHECKPOINT_FILE))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_tile(&self, level: u64, index: u64, p: u8) -> Result<Vec<u8>, StoreError> {
        let (bytes, stored) = self
            .read_object(
                &layout::tile_path(level, index, 0),
                |w| layout::tile_path(level, index, w),
                p,
            )
            .await?;
        check_partial_width(
            &layout::tile_path(level, index, p),
            stored,
            p,
            layout::TILE_WIDTH,
        )?;
        Ok(bytes)
    }

    async fn read_entry_bundle(&self, index: u64, p: u8) -> Result<Vec<u8>, StoreError> {
        let (bytes, stored) = self
            .read_object(
                &layout::entries_path(index, 0),
                |w| layout::entries_path(index, w),
                p,
            )
            .await?;
        check_partial_width(
            &layout::entries_path(index, p),
            stored,
            p,
            layout::ENTRY_BUNDLE_WIDTH,
        )?;
        Ok(bytes)
    }

    async fn integrated_size(&self) -> Result<u64, StoreError> {
        Ok(self.read_tree_state().await?.map(|s| s.size).unwrap_or(0))
    }
}

#[async_trait]
impl LogDriver for FileDriver {
    async fn begin(&self) -> Result<Box<dyn LogTransaction>, StoreError> {
        let guard = self.write_lock.clone().lock_owned().await;
        Ok(Box::new(FileTransaction {
            driver: self.clone(),
            _guard: guard,
            tiles: Vec::new(),
            bundles: Vec::new(),
            state: None,
            checkpoint: None,
        }))
    }
}

struct FileTransaction {
    driver: FileDriver,
    _guard: OwnedMutexGuard<()>,
    tiles: Vec<(TileId, HashTile)>,
    bundles: Vec<(u64, u32, Bytes)>,
    state: Option<TreeState>,
    checkpoint: Option<Vec<u8>>,
}

#[async_trait]
impl LogTransaction for FileTransaction {
    async fn tree_state(&mut self) -> Result<Option<TreeState>, StoreError> {
        if let Some(state) = self.state {
            return Ok(Some(state));
        }
        self.driver.read_tree_state().await
    }

    async fn tile(&mut self, id: TileId) -> Result<Option<HashTile>, StoreError> {
        if let Some((_, tile)) = self.tiles.iter().rev().find(|(i, _)| *i == id) {
            return Ok(Some(tile.clone()));
        }
        match self.driver.read_tile(id.level, id.index, 1).await {
            Ok(bytes) => Ok(Some(HashTile::parse(&bytes).map_err(|e| {
                StoreError::corrupt(format!("tile {}/{}: {e}", id.level, id.index))
            })?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn entry_bundle(&mut self, index: u64) -> Result<Option<BundleRecord>, StoreError> {
        if let Some((_, size, data)) = self.bundles.iter().rev().find(|(i, _, _)| *i == index) {
            return Ok(Some(BundleRecord {
                size: *size,
                data: data.clone(),
            }));
        }
        match self.driver.read_entry_bundle(index, 1).await {
            Ok(bytes) => {
                let size = mosaic_core::parse_bundle(&bytes)
                    .map_err(|e| StoreError::corrupt(format!("bundle {index}: {e}")))?
                    .len() as u32;
                Ok(Some(BundleRecord {
                    size,
                    data: Bytes::from(bytes),
                }))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn checkpoint_published_at(&mut self) -> Result<Option<i64>, StoreError> {
        match fs::metadata(self.driver.path(CHECKPOINT_FILE)).await {
            Ok(meta) => {
                let modified = meta.modified()?;
                let millis = modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .map_err(|e| StoreError::io(e.to_string()))?
                    .as_millis() as i64;
                Ok(Some(millis))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_tile(&mut self, id: TileId, tile: HashTile) -> Result<(), StoreError> {
        self.tiles.push((id, tile));
        Ok(())
    }

    async fn put_entry_bundle(
        &mut self,
        index: u64,
        size: u32,
        data: Bytes,
    ) -> Result<(), StoreError> {
        self.bundles.push((index, size, data));
        Ok(())
    }

    async fn put_tree_state(&mut self, state: TreeState) -> Result<(), StoreError> {
        self.state = Some(state);
        Ok(())
    }

    async fn put_checkpoint(
        &mut self,
        note: Vec<u8>,
        _published_at: i64,
    ) -> Result<(), StoreError> {
        // The rename stamps the file's mtime, which doubles as published_at.
        self.checkpoint = Some(note);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let driver = &this.driver;

        // Data objects first, tree state last: a reader that sees the new
        // size can always resolve the objects it implies.
        for (index, size, data) in &this.bundles {
            let p = if *size as u64 == layout::ENTRY_BUNDLE_WIDTH {
                0
            } else {
                *size as u8
            };
            let rel = layout::entries_path(*index, p);
            write_atomic(&driver.path(&rel), data).await?;
            debug!(path = %rel, size, "Wrote entry bundle");
        }
        for (id, tile) in &this.tiles {
            let width = tile.width() as u64;
            let p = if width == layout::TILE_WIDTH {
                0
            } else {
                width as u8
            };
            let rel = layout::tile_path(id.level, id.index, p);
            write_atomic(&driver.path(&rel), &tile.marshal()).await?;
            debug!(path = %rel, width, "Wrote hash tile");
        }
        if let Some(state) = this.state {
            write_atomic(
                &driver.path(TREE_STATE_FILE),
                &postcard::to_allocvec(&state)?,
            )
            .await?;
            debug!(size = state.size, "Wrote tree state");
        }
        if let Some(note) = this.checkpoint {
            write_atomic(&driver.path(CHECKPOINT_FILE), &note).await?;
            debug!("Wrote checkpoint");
        }
        Ok(())
    }
}

/// Write `data` to `path` atomically: temp file in the same directory,
/// fsync, rename into place.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let mut file = fs::File::create(&temp).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp, path).await?;
    Ok(())
}

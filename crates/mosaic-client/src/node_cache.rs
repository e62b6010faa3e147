//! Tile-backed resolution of internal tree nodes.

use std::collections::HashMap;

use mosaic_core::{hasher, layout, Hash, HashTile, TileId};

use crate::error::ClientError;
use crate::fetch::TileFetcher;

/// Resolves internal node hashes from fetched tiles.
///
/// Tiles are fetched at the partial width implied by `log_size` and kept
/// for the cache's lifetime; a proof touches O(log N) tiles, each fetched
/// once. Nodes above a tile's stored row are recomputed by hashing the
/// covered span of the row.
pub struct NodeCache<'a, F: TileFetcher> {
    log_size: u64,
    fetcher: &'a F,
    tiles: HashMap<TileId, HashTile>,
}

impl<'a, F: TileFetcher> NodeCache<'a, F> {
    /// Create a cache over a log of `log_size` entries.
    pub fn new(fetcher: &'a F, log_size: u64) -> Self {
        Self {
            log_size,
            fetcher,
            tiles: HashMap::new(),
        }
    }

    /// The log size this cache addresses.
    pub fn log_size(&self) -> u64 {
        self.log_size
    }

    /// Hash of the tree node `(level, index)`.
    ///
    /// Fails with `OutOfRange` when the fetched tile does not contain the
    /// addressed position, which happens when the tree has skewed between
    /// fetches.
    pub async fn get_node(&mut self, level: u64, index: u64) -> Result<Hash, ClientError> {
        let (tile_level, tile_index, node_level, node_index) =
            layout::node_coords_to_tile_address(level, index);
        let id = TileId::new(tile_level, tile_index);

        if !self.tiles.contains_key(&id) {
            let p = layout::partial_tile_size(tile_level, tile_index, self.log_size);
            let bytes = self.fetcher.fetch_tile(tile_level, tile_index, p).await?;
            let tile = HashTile::parse(&bytes).map_err(|e| {
                ClientError::malformed(format!("tile {tile_level}/{tile_index}: {e}"))
            })?;
            self.tiles.insert(id, tile);
        }
        let tile = &self.tiles[&id];

        let start = (node_index as usize) << node_level;
        let count = 1usize << node_level;
        if start + count > tile.width() {
            return Err(ClientError::out_of_range(format!(
                "node {level}/{index} not in tile {tile_level}/{tile_index} of width {}",
                tile.width()
            )));
        }

        let mut row = tile.nodes()[start..start + count].to_vec();
        while row.len() > 1 {
            row = row
                .chunks(2)
                .map(|pair| hasher::node_hash(&pair[0], &pair[1]))
                .collect();
        }
        Ok(row[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_skewed_tile_is_out_of_range() {
        // The fetcher serves a tile that only knows about one leaf, while
        // the cache believes the tree is larger.
        let fetcher = |_level: u64, _index: u64, _p: u8| async move {
            Ok::<_, ClientError>(HashTile::new(vec![[7u8; 32]]).marshal())
        };
        let mut cache = NodeCache::new(&fetcher, 10);

        assert_eq!(cache.get_node(0, 0).await.unwrap(), [7u8; 32]);
        assert!(matches!(
            cache.get_node(0, 1).await,
            Err(ClientError::OutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn test_in_tile_rehashing() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let fetcher = |_level: u64, _index: u64, _p: u8| async move {
            Ok::<_, ClientError>(HashTile::new(vec![a, b]).marshal())
        };
        let mut cache = NodeCache::new(&fetcher, 2);

        assert_eq!(
            cache.get_node(1, 0).await.unwrap(),
            hasher::node_hash(&a, &b)
        );
    }

    #[tokio::test]
    async fn test_malformed_tile_rejected() {
        let fetcher =
            |_level: u64, _index: u64, _p: u8| async move { Ok::<_, ClientError>(vec![0u8; 33]) };
        let mut cache = NodeCache::new(&fetcher, 2);
        assert!(matches!(
            cache.get_node(0, 0).await,
            Err(ClientError::Malformed(_))
        ));
    }
}

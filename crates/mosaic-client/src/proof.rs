//! RFC 6962 inclusion and consistency proofs over stored tiles.
//!
//! Proof generation decomposes the tree the way the Merkle tree hash is
//! defined: split at the largest power of two, descend into the half
//! holding the target, and emit the root of the other half. Roots of
//! non-perfect ranges are synthesized by folding the range's perfect
//! subtree peaks, all of which are complete nodes resolvable from tiles.

use mosaic_core::{hasher, Hash};

use crate::error::ClientError;
use crate::fetch::TileFetcher;
use crate::node_cache::NodeCache;

/// Builds proofs against a log of a fixed size, lazily fetching the tiles
/// the proof nodes live in.
pub struct ProofBuilder<'a, F: TileFetcher> {
    size: u64,
    cache: NodeCache<'a, F>,
}

impl<'a, F: TileFetcher> ProofBuilder<'a, F> {
    /// Create a builder for proofs at `size`. Valid for any size including
    /// zero, for which the only derivable root is the empty root.
    pub fn new(size: u64, fetcher: &'a F) -> Self {
        Self {
            size,
            cache: NodeCache::new(fetcher, size),
        }
    }

    /// The size proofs are built at.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The root hash at this builder's size, derived from stored tiles.
    pub async fn root(&mut self) -> Result<Hash, ClientError> {
        if self.size == 0 {
            return Ok(hasher::empty_root());
        }
        range_root(&mut self.cache, 0, self.size).await
    }

    /// Inclusion proof for the leaf at `index`.
    ///
    /// Ill-formed for `index >= size`, including any index in an empty
    /// tree.
    pub async fn inclusion_proof(&mut self, index: u64) -> Result<Vec<Hash>, ClientError> {
        if index >= self.size {
            return Err(ClientError::proof(format!(
                "inclusion of index {index} in tree of size {}",
                self.size
            )));
        }

        // Descend towards the leaf, remembering each sibling range.
        let mut siblings = Vec::new();
        let (mut lo, mut hi) = (0u64, self.size);
        while hi - lo > 1 {
            let mid = lo + largest_power_of_two_smaller_than(hi - lo);
            if index < mid {
                siblings.push((mid, hi));
                hi = mid;
            } else {
                siblings.push((lo, mid));
                lo = mid;
            }
        }

        // Emit bottom-up.
        let mut proof = Vec::with_capacity(siblings.len());
        for (lo, hi) in siblings.into_iter().rev() {
            proof.push(range_root(&mut self.cache, lo, hi).await?);
        }
        Ok(proof)
    }

    /// Consistency proof from a previously observed `from_size` to this
    /// builder's size.
    pub async fn consistency_proof(&mut self, from_size: u64) -> Result<Vec<Hash>, ClientError> {
        if from_size > self.size {
            return Err(ClientError::proof(format!(
                "consistency from {from_size} to smaller size {}",
                self.size
            )));
        }
        if from_size == self.size || from_size == 0 {
            // Identical trees and the empty tree are trivially consistent.
            return Ok(Vec::new());
        }

        // Descend to the subtree whose right edge is the old boundary.
        let mut siblings = Vec::new();
        let (mut lo, mut hi) = (0u64, self.size);
        let mut old_is_subtree = true;
        while from_size < hi {
            let mid = lo + largest_power_of_two_smaller_than(hi - lo);
            if from_size <= mid {
                siblings.push((mid, hi));
                hi = mid;
            } else {
                siblings.push((lo, mid));
                lo = mid;
                old_is_subtree = false;
            }
        }

        let mut proof = Vec::with_capacity(siblings.len() + 1);
        if !old_is_subtree {
            // The verifier cannot reconstruct this subtree root from the
            // old root alone; it seeds the proof.
            proof.push(range_root(&mut self.cache, lo, hi).await?);
        }
        for (lo, hi) in siblings.into_iter().rev() {
            proof.push(range_root(&mut self.cache, lo, hi).await?);
        }
        Ok(proof)
    }
}

/// Root of the leaf range `[lo, hi)`: fold the range's perfect subtree
/// peaks right to left.
async fn range_root<F: TileFetcher>(
    cache: &mut NodeCache<'_, F>,
    lo: u64,
    hi: u64,
) -> Result<Hash, ClientError> {
    debug_assert!(lo < hi);
    let mut peaks = Vec::new();
    let mut at = lo;
    while at < hi {
        let by_alignment = if at == 0 { 63 } else { at.trailing_zeros() };
        let by_remaining = 63 - (hi - at).leading_zeros();
        let level = by_alignment.min(by_remaining) as u64;
        peaks.push(cache.get_node(level, at >> level).await?);
        at += 1 << level;
    }

    let (last, rest) = peaks.split_last().expect("non-empty range");
    let mut root = *last;
    for peak in rest.iter().rev() {
        root = hasher::node_hash(peak, &root);
    }
    Ok(root)
}

fn largest_power_of_two_smaller_than(n: u64) -> u64 {
    debug_assert!(n > 1);
    1 << (63 - (n - 1).leading_zeros())
}

fn inner_proof_size(index: u64, size: u64) -> usize {
    (64 - (index ^ (size - 1)).leading_zeros()) as usize
}

/// Verify an RFC 6962 inclusion proof.
pub fn verify_inclusion(
    index: u64,
    size: u64,
    leaf_hash: &Hash,
    proof: &[Hash],
    root: &Hash,
) -> Result<(), ClientError> {
    if index >= size {
        return Err(ClientError::proof(format!(
            "index {index} not in tree of size {size}"
        )));
    }
    let inner = inner_proof_size(index, size);
    let border = (index >> inner).count_ones() as usize;
    if proof.len() != inner + border {
        return Err(ClientError::proof(format!(
            "inclusion proof of {} hashes, want {}",
            proof.len(),
            inner + border
        )));
    }

    let mut hash = *leaf_hash;
    for (i, sibling) in proof[..inner].iter().enumerate() {
        if (index >> i) & 1 == 0 {
            hash = hasher::node_hash(&hash, sibling);
        } else {
            hash = hasher::node_hash(sibling, &hash);
        }
    }
    for sibling in &proof[inner..] {
        hash = hasher::node_hash(sibling, &hash);
    }

    if hash != *root {
        return Err(ClientError::proof("inclusion proof does not match root"));
    }
    Ok(())
}

/// Verify an RFC 6962 consistency proof between two tree sizes.
pub fn verify_consistency(
    size1: u64,
    size2: u64,
    proof: &[Hash],
    root1: &Hash,
    root2: &Hash,
) -> Result<(), ClientError> {
    if size1 > size2 {
        return Err(ClientError::proof(format!(
            "consistency from {size1} to smaller size {size2}"
        )));
    }
    if size1 == size2 {
        if !proof.is_empty() {
            return Err(ClientError::proof("unexpected proof for identical sizes"));
        }
        if root1 != root2 {
            return Err(ClientError::proof("identical sizes with different roots"));
        }
        return Ok(());
    }
    if size1 == 0 {
        if !proof.is_empty() {
            return Err(ClientError::proof("unexpected proof from empty tree"));
        }
        return Ok(());
    }

    let shift = size1.trailing_zeros() as usize;
    let full_inner = inner_proof_size(size1 - 1, size2);
    let border = ((size1 - 1) >> full_inner).count_ones() as usize;
    let inner = full_inner - shift;

    // When the old size is a power of two its root is itself a node of the
    // new tree and seeds the chain; otherwise the first proof hash does.
    let (seed, rest) = if size1 == 1 << shift {
        (*root1, proof)
    } else {
        match proof.split_first() {
            Some((seed, rest)) => (*seed, rest),
            None => return Err(ClientError::proof("empty consistency proof")),
        }
    };
    if rest.len() != inner + border {
        return Err(ClientError::proof(format!(
            "consistency proof of {} hashes, want {}",
            rest.len(),
            inner + border
        )));
    }

    let mask = (size1 - 1) >> shift;

    // Reconstruct the old root: only right turns consume a proof hash.
    let mut hash1 = seed;
    for (i, sibling) in rest[..inner].iter().enumerate() {
        if (mask >> i) & 1 == 1 {
            hash1 = hasher::node_hash(sibling, &hash1);
        }
    }
    for sibling in &rest[inner..] {
        hash1 = hasher::node_hash(sibling, &hash1);
    }
    if hash1 != *root1 {
        return Err(ClientError::proof(
            "consistency proof does not match old root",
        ));
    }

    // Reconstruct the new root from the same material.
    let mut hash2 = seed;
    for (i, sibling) in rest[..inner].iter().enumerate() {
        if (mask >> i) & 1 == 0 {
            hash2 = hasher::node_hash(&hash2, sibling);
        } else {
            hash2 = hasher::node_hash(sibling, &hash2);
        }
    }
    for sibling in &rest[inner..] {
        hash2 = hasher::node_hash(sibling, &hash2);
    }
    if hash2 != *root2 {
        return Err(ClientError::proof(
            "consistency proof does not match new root",
        ));
    }
    Ok(())
}

//! End-to-end client tests against a reference log.
//!
//! The log here is built naively (full recomputation over all leaves), so
//! the proof machinery is checked against an implementation that shares no
//! code with it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mosaic_client::{
    verify_consistency, verify_inclusion, ClientError, LogStateTracker, ProofBuilder,
    PublicationAwaiter,
};
use mosaic_core::{hasher, layout, leaf_hash, Hash, HashTile, SequencedIndex};
use mosaic_crypto::{sign_note, Checkpoint, Signer, Verifier};

const ORIGIN: &str = "example.com/mosaic/testdata";

/// A reference log over `n` generated leaves, serving tiles and signed
/// checkpoints.
struct TestLog {
    leaves: Vec<Vec<u8>>,
    signer: Signer,
}

impl TestLog {
    fn new(prefix: &str, n: u64) -> Self {
        Self {
            leaves: (0..n).map(|i| format!("{prefix}-{i}").into_bytes()).collect(),
            signer: Signer::generate(ORIGIN).unwrap(),
        }
    }

    fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    fn verifier(&self) -> Verifier {
        self.signer.verifier()
    }

    /// RFC 6962 root over the first `n` leaves, computed recursively.
    fn root_at(&self, n: u64) -> Hash {
        fn mth(hashes: &[Hash]) -> Hash {
            match hashes.len() {
                0 => hasher::empty_root(),
                1 => hashes[0],
                len => {
                    let k = 1 << (usize::BITS - 1 - (len - 1).leading_zeros());
                    hasher::node_hash(&mth(&hashes[..k]), &mth(&hashes[k..]))
                }
            }
        }
        let hashes: Vec<Hash> = self.leaves[..n as usize]
            .iter()
            .map(|l| leaf_hash(l))
            .collect();
        mth(&hashes)
    }

    /// The stored row of tile `(level, index)`, or None if absent.
    fn tile_row(&self, level: u64, index: u64) -> Option<Vec<Hash>> {
        let mut row: Vec<Hash> = self.leaves.iter().map(|l| leaf_hash(l)).collect();
        for _ in 0..(level * layout::TILE_HEIGHT as u64) {
            row = row
                .chunks(2)
                .filter(|pair| pair.len() == 2)
                .map(|pair| hasher::node_hash(&pair[0], &pair[1]))
                .collect();
        }
        let start = (index * layout::TILE_WIDTH) as usize;
        if start >= row.len() {
            return None;
        }
        let end = (start + layout::TILE_WIDTH as usize).min(row.len());
        Some(row[start..end].to_vec())
    }

    fn serve_tile(&self, level: u64, index: u64, p: u8) -> Result<Vec<u8>, ClientError> {
        let row = self
            .tile_row(level, index)
            .ok_or_else(|| ClientError::not_found(layout::tile_path(level, index, p)))?;
        let requested = if p == 0 {
            layout::TILE_WIDTH as usize
        } else {
            p as usize
        };
        if requested > row.len() {
            return Err(ClientError::not_found(layout::tile_path(level, index, p)));
        }
        Ok(HashTile::new(row).marshal())
    }

    fn checkpoint_at(&self, n: u64) -> Vec<u8> {
        let body = Checkpoint {
            origin: ORIGIN.to_string(),
            size: n,
            root: self.root_at(n),
        }
        .marshal();
        sign_note(&body, std::slice::from_ref(&self.signer)).unwrap()
    }
}

fn tile_fetcher(
    log: &Arc<TestLog>,
) -> impl Fn(u64, u64, u8) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<u8>, ClientError>> + Send>>
       + Send
       + Sync {
    let log = log.clone();
    move |level, index, p| {
        let log = log.clone();
        Box::pin(async move { log.serve_tile(level, index, p) })
    }
}

#[tokio::test]
async fn test_root_from_tiles_matches_reference() {
    for n in [1u64, 2, 3, 4, 7, 8, 9, 255, 256, 257, 300, 513] {
        let log = Arc::new(TestLog::new("entry", n));
        let fetcher = tile_fetcher(&log);
        let mut builder = ProofBuilder::new(n, &fetcher);
        assert_eq!(builder.root().await.unwrap(), log.root_at(n), "size {n}");
    }
}

#[tokio::test]
async fn test_inclusion_proofs_verify() {
    for n in [1u64, 2, 3, 5, 8, 13, 256, 300] {
        let log = Arc::new(TestLog::new("entry", n));
        let fetcher = tile_fetcher(&log);
        let mut builder = ProofBuilder::new(n, &fetcher);
        let root = log.root_at(n);

        for index in 0..n {
            let proof = builder.inclusion_proof(index).await.unwrap();
            let leaf = leaf_hash(&log.leaves[index as usize]);
            verify_inclusion(index, n, &leaf, &proof, &root)
                .unwrap_or_else(|e| panic!("index {index} of {n}: {e}"));

            // The proof must not verify a different leaf.
            let wrong = leaf_hash(b"not this entry");
            assert!(verify_inclusion(index, n, &wrong, &proof, &root).is_err());
        }
    }
}

#[tokio::test]
async fn test_consistency_proofs_verify() {
    for (from, to) in [
        (0u64, 5u64),
        (1, 2),
        (2, 3),
        (3, 7),
        (4, 6),
        (5, 7),
        (7, 7),
        (10, 27),
        (100, 256),
        (256, 300),
    ] {
        let log = Arc::new(TestLog::new("entry", to));
        let fetcher = tile_fetcher(&log);
        let mut builder = ProofBuilder::new(to, &fetcher);
        let proof = builder.consistency_proof(from).await.unwrap();
        verify_consistency(from, to, &proof, &log.root_at(from), &log.root_at(to))
            .unwrap_or_else(|e| panic!("{from} -> {to}: {e}"));
    }
}

#[tokio::test]
async fn test_consistency_fails_against_tampered_tile() {
    let log = Arc::new(TestLog::new("entry", 27));
    let fetcher = {
        let log = log.clone();
        move |level: u64, index: u64, p: u8| {
            let log = log.clone();
            async move {
                let mut bytes = log.serve_tile(level, index, p)?;
                if level == 0 && index == 0 {
                    bytes[0] ^= 0x01;
                }
                Ok::<_, ClientError>(bytes)
            }
        }
    };

    let mut builder = ProofBuilder::new(27, &fetcher);
    let proof = builder.consistency_proof(10).await.unwrap();
    assert!(
        verify_consistency(10, 27, &proof, &log.root_at(10), &log.root_at(27)).is_err(),
        "tampered tile produced a valid-looking proof"
    );
}

#[tokio::test]
async fn test_node_cache_resolves_exactly_complete_nodes() {
    use mosaic_client::NodeCache;

    let n = 300u64;
    let log = Arc::new(TestLog::new("entry", n));
    let fetcher = tile_fetcher(&log);
    let mut cache = NodeCache::new(&fetcher, n);

    for level in [0u64, 1, 2, 3, 4, 8] {
        let complete = n >> level;
        // The last complete node resolves; the first incomplete one is out
        // of range even though its tile exists.
        assert!(
            cache.get_node(level, complete - 1).await.is_ok(),
            "node {level}/{} should resolve",
            complete - 1
        );
        assert!(
            matches!(
                cache.get_node(level, complete).await,
                Err(ClientError::OutOfRange(_))
            ),
            "node {level}/{complete} should be out of range"
        );
    }
}

#[tokio::test]
async fn test_zero_size_builder() {
    let log = Arc::new(TestLog::new("entry", 0));
    let fetcher = tile_fetcher(&log);
    let mut builder = ProofBuilder::new(0, &fetcher);

    assert_eq!(builder.root().await.unwrap(), hasher::empty_root());
    assert!(matches!(
        builder.inclusion_proof(0).await,
        Err(ClientError::Proof(_))
    ));
}

/// A checkpoint fetcher serving a scripted sequence: the front entry until
/// advanced.
#[derive(Clone)]
struct CheckpointScript {
    entries: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl CheckpointScript {
    fn new(entries: Vec<Vec<u8>>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries.into())),
        }
    }

    fn advance(&self) {
        self.entries.lock().unwrap().pop_front();
    }

    fn fetcher(
        &self,
    ) -> impl Fn() -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<u8>, ClientError>> + Send>,
    > + Send
           + Sync {
        let entries = self.entries.clone();
        move || {
            let entries = entries.clone();
            Box::pin(async move {
                entries
                    .lock()
                    .unwrap()
                    .front()
                    .cloned()
                    .ok_or_else(|| ClientError::not_found("checkpoint"))
            })
        }
    }
}

#[tokio::test]
async fn test_tracker_follows_consistent_checkpoints() {
    let log = Arc::new(TestLog::new("entry", 12));
    let sizes = [0u64, 2, 3, 5, 6, 12];
    let script =
        CheckpointScript::new(sizes.iter().map(|&n| log.checkpoint_at(n)).collect());

    let mut tracker = LogStateTracker::new(
        tile_fetcher(&log),
        script.fetcher(),
        ORIGIN,
        vec![log.verifier()],
    );
    for &n in &sizes {
        // Ed25519 signing is deterministic, so re-signing reproduces the
        // exact served bytes.
        let raw = tracker.update().await.unwrap();
        assert_eq!(raw, log.checkpoint_at(n));
        let held = tracker.current().unwrap();
        assert_eq!(held.checkpoint.size, n);
        assert_eq!(held.checkpoint.root, log.root_at(n));
        script.advance();
    }
}

#[tokio::test]
async fn test_tracker_retains_newer_checkpoint_when_served_old() {
    let log = Arc::new(TestLog::new("entry", 8));
    let script = CheckpointScript::new(
        [5u64, 2, 0, 3]
            .iter()
            .map(|&n| log.checkpoint_at(n))
            .collect(),
    );

    let mut tracker = LogStateTracker::new(
        tile_fetcher(&log),
        script.fetcher(),
        ORIGIN,
        vec![log.verifier()],
    );
    for _ in 0..4 {
        tracker.update().await.unwrap();
        assert_eq!(tracker.current().unwrap().checkpoint.size, 5);
        script.advance();
    }
}

#[tokio::test]
async fn test_tracker_accepts_repeated_checkpoint() {
    let log = Arc::new(TestLog::new("entry", 4));
    let cp = log.checkpoint_at(4);
    let script = CheckpointScript::new(vec![cp.clone(), cp.clone(), cp.clone()]);

    let mut tracker = LogStateTracker::new(
        tile_fetcher(&log),
        script.fetcher(),
        ORIGIN,
        vec![log.verifier()],
    );
    for _ in 0..3 {
        let raw = tracker.update().await.unwrap();
        assert_eq!(raw, cp);
        script.advance();
    }
}

#[tokio::test]
async fn test_tracker_detects_fork_at_same_size() {
    let log_a = Arc::new(TestLog::new("entry", 3));
    // Same signer so the forged checkpoint verifies; different content.
    let mut log_b = TestLog::new("forged", 3);
    log_b.signer = Signer::from_key_string(&log_a.signer.key_string()).unwrap();

    let script =
        CheckpointScript::new(vec![log_a.checkpoint_at(3), log_b.checkpoint_at(3)]);
    let mut tracker = LogStateTracker::new(
        tile_fetcher(&log_a),
        script.fetcher(),
        ORIGIN,
        vec![log_a.verifier()],
    );

    tracker.update().await.unwrap();
    script.advance();
    assert!(matches!(
        tracker.update().await,
        Err(ClientError::ForkDetected(_))
    ));
}

#[tokio::test]
async fn test_tracker_detects_inconsistent_growth() {
    // The tracker holds a checkpoint over different content than the log
    // that later serves a bigger checkpoint and its tiles.
    let log_a = Arc::new(TestLog::new("entry", 3));
    let mut log_b = TestLog::new("forged", 5);
    log_b.signer = Signer::from_key_string(&log_a.signer.key_string()).unwrap();
    let log_b = Arc::new(log_b);

    let script =
        CheckpointScript::new(vec![log_a.checkpoint_at(3), log_b.checkpoint_at(5)]);
    let mut tracker = LogStateTracker::new(
        tile_fetcher(&log_b),
        script.fetcher(),
        ORIGIN,
        vec![log_a.verifier()],
    );

    tracker.update().await.unwrap();
    script.advance();
    assert!(matches!(
        tracker.update().await,
        Err(ClientError::ForkDetected(_))
    ));
}

#[tokio::test]
async fn test_tracker_rejects_bad_signature() {
    let log = Arc::new(TestLog::new("entry", 2));
    let other = Signer::generate(ORIGIN).unwrap();
    let script = CheckpointScript::new(vec![log.checkpoint_at(2)]);

    let mut tracker = LogStateTracker::new(
        tile_fetcher(&log),
        script.fetcher(),
        ORIGIN,
        vec![other.verifier()],
    );
    assert!(matches!(
        tracker.update().await,
        Err(ClientError::Note(_))
    ));
}

#[tokio::test]
async fn test_publication_awaiter() {
    let log = Arc::new(TestLog::new("entry", 6));
    let published: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));

    let fetcher = {
        let published = published.clone();
        move || {
            let published = published.clone();
            async move {
                published
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| ClientError::not_found("checkpoint"))
            }
        }
    };

    // Publish a covering checkpoint shortly after the await starts.
    {
        let published = published.clone();
        let cp = log.checkpoint_at(6);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *published.lock().unwrap() = Some(cp);
        });
    }

    let awaiter = PublicationAwaiter::new(Duration::from_millis(10));
    let sequenced = async {
        Ok::<_, ClientError>(SequencedIndex {
            index: 4,
            is_duplicate: false,
        })
    };
    let (seq, raw) = awaiter
        .await_publication(&fetcher, ORIGIN, &[log.verifier()], sequenced)
        .await
        .unwrap();
    assert_eq!(seq.index, 4);
    assert_eq!(raw, log.checkpoint_at(6));
}

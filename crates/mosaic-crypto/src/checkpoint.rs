//! Checkpoint bodies: the `(origin, size, root)` commitment carried in a
//! signed note.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use mosaic_core::{Hash, HASH_SIZE};

use crate::error::NoteError;
use crate::note::{open_note, Verifier};

/// A parsed checkpoint commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// The log's origin line.
    pub origin: String,
    /// Committed tree size.
    pub size: u64,
    /// Committed root hash.
    pub root: Hash,
}

impl Checkpoint {
    /// Format the checkpoint body: origin line, decimal size, base64url root.
    pub fn marshal(&self) -> String {
        format!(
            "{}\n{}\n{}\n",
            self.origin,
            self.size,
            URL_SAFE_NO_PAD.encode(self.root)
        )
    }

    /// Parse a checkpoint body, enforcing the expected origin.
    ///
    /// Lines beyond the first three are extension lines and are ignored.
    pub fn parse(body: &str, origin: &str) -> Result<Self, NoteError> {
        let mut lines = body.lines();
        let got_origin = lines
            .next()
            .ok_or_else(|| NoteError::malformed("checkpoint: missing origin line"))?;
        if got_origin != origin {
            return Err(NoteError::signature(format!(
                "checkpoint origin {got_origin:?}, want {origin:?}"
            )));
        }
        let size: u64 = lines
            .next()
            .ok_or_else(|| NoteError::malformed("checkpoint: missing size line"))?
            .parse()
            .map_err(|_| NoteError::malformed("checkpoint: bad size line"))?;
        let root_b64 = lines
            .next()
            .ok_or_else(|| NoteError::malformed("checkpoint: missing root line"))?;
        let root_bytes = URL_SAFE_NO_PAD
            .decode(root_b64)
            .map_err(|e| NoteError::malformed(format!("checkpoint root: {e}")))?;
        if root_bytes.len() != HASH_SIZE {
            return Err(NoteError::malformed("checkpoint root: bad length"));
        }
        let mut root = [0u8; HASH_SIZE];
        root.copy_from_slice(&root_bytes);
        Ok(Self {
            origin: got_origin.to_string(),
            size,
            root,
        })
    }
}

/// Open a signed checkpoint note and parse its body.
///
/// The note must carry a valid signature from at least one of `verifiers`
/// and commit to the expected `origin`.
pub fn parse_checkpoint(
    note: &[u8],
    origin: &str,
    verifiers: &[Verifier],
) -> Result<Checkpoint, NoteError> {
    let (body, _names) = open_note(note, verifiers)?;
    Checkpoint::parse(&body, origin)
}

//! Signed note envelope.
//!
//! A note is a text body followed by a blank line and one signature line per
//! signer. Signature lines have the form `— <name> <base64(key_id || sig)>`.
//! The key id is the first four bytes of `SHA-256(name || "\n" || 0x01 || public_key)`,
//! binding each signature to a specific named key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::error::NoteError;

/// Marker at the start of every signature line.
const SIG_PREFIX: &str = "— ";

/// Algorithm byte for Ed25519 keys in key strings and key-id hashing.
const ALG_ED25519: u8 = 0x01;

const KEY_ID_LEN: usize = 4;
const SIG_LEN: usize = 64;

fn key_id(name: &str, public_key: &VerifyingKey) -> [u8; KEY_ID_LEN] {
    let mut h = Sha256::new();
    h.update(name.as_bytes());
    h.update(b"\n");
    h.update([ALG_ED25519]);
    h.update(public_key.as_bytes());
    let digest = h.finalize();
    let mut id = [0u8; KEY_ID_LEN];
    id.copy_from_slice(&digest[..KEY_ID_LEN]);
    id
}

fn check_name(name: &str) -> Result<(), NoteError> {
    if name.is_empty() || name.chars().any(|c| c == '\n' || c == ' ' || c == '+') {
        return Err(NoteError::malformed(format!("signer name {name:?}")));
    }
    Ok(())
}

/// A named Ed25519 signing key.
pub struct Signer {
    name: String,
    key_id: [u8; KEY_ID_LEN],
    key: SigningKey,
}

impl Signer {
    /// Create a signer from a name and signing key.
    pub fn new(name: impl Into<String>, key: SigningKey) -> Result<Self, NoteError> {
        let name = name.into();
        check_name(&name)?;
        let key_id = key_id(&name, &key.verifying_key());
        Ok(Self { name, key_id, key })
    }

    /// Generate a signer with a fresh random key.
    pub fn generate(name: impl Into<String>) -> Result<Self, NoteError> {
        Self::new(name, SigningKey::generate(&mut OsRng))
    }

    /// Parse a signer key string of the form
    /// `PRIVATE+KEY+<name>+<keyid-hex>+<base64(alg || seed)>`.
    pub fn from_key_string(s: &str) -> Result<Self, NoteError> {
        let rest = s
            .strip_prefix("PRIVATE+KEY+")
            .ok_or_else(|| NoteError::malformed("signer key string: missing prefix"))?;
        let (name, id_hex, material) = split_key_string(rest)?;
        let seed: [u8; 32] = material
            .try_into()
            .map_err(|_| NoteError::malformed("signer key string: bad seed length"))?;
        let signer = Self::new(name, SigningKey::from_bytes(&seed))?;
        if hex::encode(signer.key_id) != id_hex {
            return Err(NoteError::malformed("signer key string: key id mismatch"));
        }
        Ok(signer)
    }

    /// Serialize this signer to its key string.
    pub fn key_string(&self) -> String {
        let mut material = vec![ALG_ED25519];
        material.extend_from_slice(&self.key.to_bytes());
        format!(
            "PRIVATE+KEY+{}+{}+{}",
            self.name,
            hex::encode(self.key_id),
            URL_SAFE_NO_PAD.encode(material)
        )
    }

    /// The verifier matching this signer.
    pub fn verifier(&self) -> Verifier {
        Verifier {
            name: self.name.clone(),
            key_id: self.key_id,
            key: self.key.verifying_key(),
        }
    }

    /// The signer's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named Ed25519 verification key.
#[derive(Debug, Clone)]
pub struct Verifier {
    name: String,
    key_id: [u8; KEY_ID_LEN],
    key: VerifyingKey,
}

impl Verifier {
    /// Create a verifier from a name and public key.
    pub fn new(name: impl Into<String>, key: VerifyingKey) -> Result<Self, NoteError> {
        let name = name.into();
        check_name(&name)?;
        let key_id = key_id(&name, &key);
        Ok(Self { name, key_id, key })
    }

    /// Parse a verifier key string of the form
    /// `<name>+<keyid-hex>+<base64(alg || public_key)>`.
    pub fn from_key_string(s: &str) -> Result<Self, NoteError> {
        let (name, id_hex, material) = split_key_string(s)?;
        let public: [u8; 32] = material
            .try_into()
            .map_err(|_| NoteError::malformed("verifier key string: bad key length"))?;
        let key = VerifyingKey::from_bytes(&public)
            .map_err(|e| NoteError::malformed(format!("verifier key string: {e}")))?;
        let verifier = Self::new(name, key)?;
        if hex::encode(verifier.key_id) != id_hex {
            return Err(NoteError::malformed("verifier key string: key id mismatch"));
        }
        Ok(verifier)
    }

    /// Serialize this verifier to its key string.
    pub fn key_string(&self) -> String {
        let mut material = vec![ALG_ED25519];
        material.extend_from_slice(self.key.as_bytes());
        format!(
            "{}+{}+{}",
            self.name,
            hex::encode(self.key_id),
            URL_SAFE_NO_PAD.encode(material)
        )
    }

    /// The verifier's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Split `<name>+<keyid-hex>+<base64 material>` and strip the algorithm byte.
fn split_key_string(s: &str) -> Result<(&str, &str, Vec<u8>), NoteError> {
    let mut parts = s.rsplitn(3, '+');
    let material_b64 = parts
        .next()
        .ok_or_else(|| NoteError::malformed("key string"))?;
    let id_hex = parts
        .next()
        .ok_or_else(|| NoteError::malformed("key string"))?;
    let name = parts
        .next()
        .ok_or_else(|| NoteError::malformed("key string"))?;
    if name.is_empty() || id_hex.len() != KEY_ID_LEN * 2 {
        return Err(NoteError::malformed("key string"));
    }
    let material = URL_SAFE_NO_PAD
        .decode(material_b64)
        .map_err(|e| NoteError::malformed(format!("key string: {e}")))?;
    match material.split_first() {
        Some((&ALG_ED25519, key)) => Ok((name, id_hex, key.to_vec())),
        _ => Err(NoteError::malformed("key string: unknown algorithm")),
    }
}

/// Sign `body` with every signer, producing the full note bytes.
///
/// The body must be newline-terminated text without blank lines. Signature
/// lines appear in signer order, so repeated signing with the same signer
/// set yields identical bytes.
pub fn sign_note(body: &str, signers: &[Signer]) -> Result<Vec<u8>, NoteError> {
    if body.is_empty() || !body.ends_with('\n') || body.contains("\n\n") {
        return Err(NoteError::malformed("note body"));
    }
    if signers.is_empty() {
        return Err(NoteError::malformed("note: no signers"));
    }

    let mut note = String::from(body);
    note.push('\n');
    for signer in signers {
        let sig = signer.key.sign(body.as_bytes());
        let mut blob = Vec::with_capacity(KEY_ID_LEN + SIG_LEN);
        blob.extend_from_slice(&signer.key_id);
        blob.extend_from_slice(&sig.to_bytes());
        note.push_str(SIG_PREFIX);
        note.push_str(&signer.name);
        note.push(' ');
        note.push_str(&URL_SAFE_NO_PAD.encode(blob));
        note.push('\n');
    }
    Ok(note.into_bytes())
}

/// Verify a note against the configured verifiers.
///
/// Returns the body text and the names of the verifiers that vouched for it.
/// Signature lines from unknown keys are ignored; at least one configured
/// verifier must match or the note is rejected.
pub fn open_note(note: &[u8], verifiers: &[Verifier]) -> Result<(String, Vec<String>), NoteError> {
    let text = std::str::from_utf8(note).map_err(|_| NoteError::malformed("note: not utf-8"))?;
    let split = text
        .find("\n\n")
        .ok_or_else(|| NoteError::malformed("note: missing signature block"))?;
    // The signed message includes the body's trailing newline.
    let body = &text[..split + 1];
    let sig_block = &text[split + 2..];

    let mut verified = Vec::new();
    let mut saw_sig_line = false;
    for line in sig_block.lines() {
        let rest = match line.strip_prefix(SIG_PREFIX) {
            Some(rest) => rest,
            None => return Err(NoteError::malformed("note: bad signature line")),
        };
        saw_sig_line = true;
        let (name, blob_b64) = rest
            .split_once(' ')
            .ok_or_else(|| NoteError::malformed("note: bad signature line"))?;
        let blob = URL_SAFE_NO_PAD
            .decode(blob_b64)
            .map_err(|e| NoteError::malformed(format!("note signature: {e}")))?;
        if blob.len() != KEY_ID_LEN + SIG_LEN {
            return Err(NoteError::malformed("note signature: bad length"));
        }

        let (id, sig_bytes) = blob.split_at(KEY_ID_LEN);
        for v in verifiers {
            if v.name == name && v.key_id == id {
                let sig = Signature::from_slice(sig_bytes)
                    .map_err(|e| NoteError::malformed(format!("note signature: {e}")))?;
                v.key
                    .verify(body.as_bytes(), &sig)
                    .map_err(|_| NoteError::signature(format!("key {name}")))?;
                verified.push(v.name.clone());
            }
        }
    }
    if !saw_sig_line {
        return Err(NoteError::malformed("note: empty signature block"));
    }
    if verified.is_empty() {
        return Err(NoteError::signature("no known key vouches for this note"));
    }
    Ok((body.to_string(), verified))
}

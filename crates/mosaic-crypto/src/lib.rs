//! # Mosaic Crypto
//!
//! The signed-note checkpoint layer: checkpoint bodies committing to
//! `(origin, size, root)`, and the note envelope that carries one or more
//! Ed25519 signatures over a body.
//!
//! A checkpoint note looks like:
//!
//! ```text
//! example.com/mosaic/demo
//! 42
//! 8fPmNYHz2V1p2DPZ0wsKRA3XxEU_SHY4573fUNEIkVU
//!
//! — example.com/mosaic/demo Yx5hXg...
//! ```
//!
//! The body is the first block (origin line, decimal size, base64url-encoded
//! root); each trailing line binds a named key's signature over the whole
//! body. Keys are identified by name plus a 4-byte key id so rotated keys
//! with the same name cannot be confused.

pub mod checkpoint;
pub mod error;
pub mod note;

pub use checkpoint::{parse_checkpoint, Checkpoint};
pub use error::NoteError;
pub use note::{open_note, sign_note, Signer, Verifier};

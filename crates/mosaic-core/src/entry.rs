//! Entries and the entry-bundle codec.
//!
//! An entry is an opaque client payload. Within an entry bundle each entry is
//! stored as a big-endian `u16` length prefix followed by the raw payload, so
//! a single entry is limited to 65535 bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::hasher::{leaf_hash, Hash};
use crate::layout::ENTRY_BUNDLE_WIDTH;

/// An opaque payload admitted to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    data: Bytes,
}

impl Entry {
    /// Create an entry, rejecting payloads too large for the bundle encoding.
    pub fn new(data: impl Into<Bytes>) -> Result<Self, CodecError> {
        let data = data.into();
        if data.len() > u16::MAX as usize {
            return Err(CodecError::EntryTooLarge(data.len()));
        }
        Ok(Self { data })
    }

    /// The raw payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// RFC 6962 leaf hash of the payload. Also the entry's dedup identity.
    pub fn leaf_hash(&self) -> Hash {
        leaf_hash(&self.data)
    }

    /// Serialize the entry for inclusion in the bundle at the assigned
    /// `index`.
    ///
    /// The default encoding does not bind the index; it is passed so that
    /// position-binding serializations keep the same signature.
    pub fn marshal_bundle_data(&self, _index: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.data.len());
        buf.put_u16(self.data.len() as u16);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// Decode an entry bundle into its payloads.
///
/// Fails with `Malformed` on truncated data or on more than 256 entries.
pub fn parse_bundle(data: &[u8]) -> Result<Vec<Bytes>, CodecError> {
    let mut entries = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(CodecError::malformed("entry bundle: truncated length prefix"));
        }
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[2..];
        if rest.len() < len {
            return Err(CodecError::malformed("entry bundle: truncated entry"));
        }
        entries.push(Bytes::copy_from_slice(&rest[..len]));
        rest = &rest[len..];
        if entries.len() > ENTRY_BUNDLE_WIDTH as usize {
            return Err(CodecError::malformed("entry bundle: too many entries"));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_round_trip() {
        let payloads: Vec<&[u8]> = vec![b"hello", b"", b"a longer entry payload"];
        let mut bundle = Vec::new();
        for (i, p) in payloads.iter().enumerate() {
            let e = Entry::new(Bytes::copy_from_slice(p)).unwrap();
            bundle.extend_from_slice(&e.marshal_bundle_data(i as u64));
        }

        let parsed = parse_bundle(&bundle).unwrap();
        assert_eq!(parsed.len(), payloads.len());
        for (got, want) in parsed.iter().zip(payloads) {
            assert_eq!(&got[..], want);
        }
    }

    #[test]
    fn test_oversize_entry_rejected() {
        let big = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            Entry::new(big),
            Err(CodecError::EntryTooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_bundle_rejected() {
        let e = Entry::new(Bytes::from_static(b"payload")).unwrap();
        let mut bundle = e.marshal_bundle_data(0).to_vec();
        bundle.truncate(bundle.len() - 1);
        assert!(parse_bundle(&bundle).is_err());

        // A lone length byte is also malformed.
        assert!(parse_bundle(&[0x00]).is_err());
    }

    #[test]
    fn test_leaf_hash_matches_hasher() {
        let e = Entry::new(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(e.leaf_hash(), crate::hasher::leaf_hash(b"hello"));
    }
}

//! Stable row identifiers and their remote-service encoding.
//!
//! A [`HeapRef`] names a row of the base table as a `(block, offset)`
//! pair. The remote service only understands string vector ids, so every
//! `HeapRef` has a canonical 12-lowercase-hex-digit encoding: the high and
//! low halves of the block number followed by the offset, each as four hex
//! digits. The encoding is total and injective; decoding anything else is
//! a corruption of remote state and fails loudly.
//!
//! # Examples
//!
//! ```
//! use remora::id::HeapRef;
//!
//! let href = HeapRef::new(0x1234_5678, 0x9abc);
//! assert_eq!(href.vector_id(), "123456789abc");
//! assert_eq!(HeapRef::from_vector_id("123456789abc").unwrap(), href);
//! ```

use miette::Diagnostic;
use thiserror::Error;

/// Length of the remote vector id: three 16-bit fields, four hex digits each.
pub const VECTOR_ID_LEN: usize = 12;

/// Size of a `HeapRef` as stored in a buffer page item (two bytes padding).
pub const HEAP_REF_SIZE: usize = 8;

/// Errors raised while decoding a remote vector id.
#[derive(Debug, Error, Diagnostic)]
pub enum IdError {
    /// The id did not consist of exactly twelve hex digits.
    #[error("invalid vector id: {id:?}")]
    #[diagnostic(
        code(remora::id::invalid_vector_id),
        help("vector ids are exactly 12 lowercase hexadecimal characters")
    )]
    InvalidVectorId { id: String },
}

/// Identifier of a row in the base table.
///
/// `offset` 0 never names a live row; `HeapRef::default()` doubles as the
/// sentinel representative of the initial checkpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef {
    pub block: u32,
    pub offset: u16,
}

impl HeapRef {
    #[must_use]
    pub fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }

    /// Encode into the remote vector id: `%04x%04x%04x` over
    /// `(block >> 16, block & 0xffff, offset)`.
    #[must_use]
    pub fn vector_id(&self) -> String {
        format!(
            "{:04x}{:04x}{:04x}",
            self.block >> 16,
            self.block & 0xffff,
            self.offset
        )
    }

    /// Decode a remote vector id back into a `HeapRef`.
    pub fn from_vector_id(id: &str) -> Result<Self, IdError> {
        let invalid = || IdError::InvalidVectorId { id: id.to_string() };
        if id.len() != VECTOR_ID_LEN || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let hi = u32::from_str_radix(&id[0..4], 16).map_err(|_| invalid())?;
        let lo = u32::from_str_radix(&id[4..8], 16).map_err(|_| invalid())?;
        let offset = u16::from_str_radix(&id[8..12], 16).map_err(|_| invalid())?;
        Ok(Self {
            block: (hi << 16) | lo,
            offset,
        })
    }

    /// On-disk item form: block, offset, two zero bytes of padding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEAP_REF_SIZE] {
        let mut out = [0u8; HEAP_REF_SIZE];
        out[0..4].copy_from_slice(&self.block.to_le_bytes());
        out[4..6].copy_from_slice(&self.offset.to_le_bytes());
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; HEAP_REF_SIZE]) -> Self {
        Self {
            block: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            offset: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
        }
    }

    /// Seeded hash used by the scan-time bloom filter.
    #[must_use]
    pub fn hash(&self, seed: u64) -> u32 {
        let packed = (u64::from(self.block) << 16) | u64::from(self.offset);
        murmurhash64(packed.wrapping_add(seed)) as u32
    }
}

impl std::fmt::Display for HeapRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

// Finalizer of MurmurHash3, as used by the hnsw tid hash.
fn murmurhash64(data: u64) -> u64 {
    let mut h = data;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn vector_id_round_trip() {
        let href = HeapRef::new(0x1234_5678, 0x9abc);
        let id = href.vector_id();
        assert_eq!(id, "123456789abc");
        assert_eq!(HeapRef::from_vector_id(&id).unwrap(), href);
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "123", "123456789abcd", "12345678zabc", "123456789ABC-"] {
            assert!(HeapRef::from_vector_id(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn uppercase_hex_still_decodes() {
        // The service canonically returns lowercase but decoding is
        // case-insensitive, matching scanf semantics.
        assert_eq!(
            HeapRef::from_vector_id("123456789ABC").unwrap(),
            HeapRef::new(0x1234_5678, 0x9abc)
        );
    }

    #[test]
    fn disk_round_trip() {
        let href = HeapRef::new(7, 3);
        assert_eq!(HeapRef::from_bytes(&href.to_bytes()), href);
    }

    #[test]
    fn hash_varies_with_seed() {
        let href = HeapRef::new(42, 1);
        assert_ne!(href.hash(0), href.hash(1));
    }

    proptest! {
        #[test]
        fn prop_vector_id_round_trip(block in any::<u32>(), offset in any::<u16>()) {
            let href = HeapRef::new(block, offset);
            let id = href.vector_id();
            prop_assert_eq!(id.len(), VECTOR_ID_LEN);
            prop_assert_eq!(HeapRef::from_vector_id(&id).unwrap(), href);
        }

        #[test]
        fn prop_disk_round_trip(block in any::<u32>(), offset in any::<u16>()) {
            let href = HeapRef::new(block, offset);
            prop_assert_eq!(HeapRef::from_bytes(&href.to_bytes()), href);
        }
    }
}

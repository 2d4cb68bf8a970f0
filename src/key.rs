//! The 16-byte key type and its external collaborators (hashing, packing).
//!
//! Construction of a `Key` from an application identifier is the caller's job;
//! `Key::from_u64` is a convenience for the common case of packing a 64-bit
//! integer, not a requirement.

use std::fmt;

/// A fixed-width 16-byte identifier used as the map's key type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Key(pub [u8; 16]);

impl Key {
    /// Packs `x` into the low 8 bytes little-endian; the high 8 bytes are zero.
    ///
    /// Byte `i` (0 <= i < 8) equals `(x >> (8*i)) & 0xff`. Exact layout matters
    /// for cross-implementation test parity.
    pub fn from_u64(x: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&x.to_le_bytes());
        Key(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:02x?})", self.0)
    }
}

/// The supplied hash function: CRC32-IEEE over the 16 key bytes, per the
/// external-collaborator contract (the core assumes a deterministic 32-bit
/// hash; any such function suffices, but CRC32-IEEE is what the rest of the
/// test suite and the scenarios in the spec assume).
pub fn hash(key: &Key) -> u32 {
    crc32fast::hash(&key.0)
}

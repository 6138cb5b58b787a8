//! Message digests, used both for content-addressing wire message type
//! ids and for general-purpose hashing needs of protocols built on this
//! runtime.

#[cfg(feature = "crypto_hash_blake3")]
mod blake3_backend;

#[cfg(feature = "crypto_hash_blake3")]
pub use blake3_backend::Digest;

use crate::runtime::error::*;

/// Hashes `bytes`, returning a fixed-length digest.
pub fn hash(bytes: &[u8]) -> Digest {
    Digest::of(bytes)
}

/// Hashes the concatenation of `parts`, in order.
pub fn hash_many<'a, I: IntoIterator<Item = &'a [u8]>>(parts: I) -> Digest {
    Digest::of_many(parts)
}

pub(crate) fn parse_digest(raw: &[u8]) -> Result<Digest> {
    Digest::from_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = hash(b"hello");
        let b = hash(b"hello");
        assert_eq!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn hash_many_matches_concatenation() {
        let a = hash_many([&b"foo"[..], &b"bar"[..]]);
        let b = hash(b"foobar");
        assert_eq!(a.as_ref(), b.as_ref());
    }
}

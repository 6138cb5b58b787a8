use crate::runtime::error::*;

/// A fixed-length message digest.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    pub const LENGTH: usize = blake3::OUT_LEN;

    pub(super) fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub(super) fn of_many<'a, I: IntoIterator<Item = &'a [u8]>>(parts: I) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        let mut out = [0u8; Self::LENGTH];
        out.copy_from_slice(hasher.finalize().as_bytes());
        Self(out)
    }

    /// Reads a `Digest` out of a byte slice of at least `LENGTH` bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::LENGTH {
            return Err("digest has an invalid length").wrapped(ErrorKind::CryptoHash);
        }
        let mut inner = [0u8; Self::LENGTH];
        inner.copy_from_slice(&raw[..Self::LENGTH]);
        Ok(Self(inner))
    }

    /// Truncates this digest down to a 16-byte wire type id.
    pub fn truncate16(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.0[..16]);
        out
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", hex(&self.0))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

//! Peer identity signing keys, used to authenticate the connection
//! handshake and sign wire headers. Kept separate from [`super::schnorr`],
//! which provides the aggregatable Schnorr keys CoSi needs: identity keys
//! are ordinary, non-aggregatable Ed25519 keys.

use rand_core::{OsRng, RngCore};
use ring::signature::{self, Ed25519KeyPair, KeyPair as _};

use crate::runtime::error::*;

/// The length, in bytes, of a serialized [`PublicKey`].
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// An Ed25519 key pair identifying one peer.
pub struct KeyPair {
    inner: Ed25519KeyPair,
    seed: [u8; 32],
}

/// The public half of a [`KeyPair`].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

/// An Ed25519 signature.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Signature([u8; Signature::LENGTH]);

impl KeyPair {
    /// Generates a new random key pair.
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Deterministically derives a key pair from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let inner = Ed25519KeyPair::from_seed_unchecked(&seed)
            .expect("32-byte seed is always valid for Ed25519");
        Self { inner, seed }
    }

    /// Returns this key pair's public key.
    pub fn public_key(&self) -> PublicKey {
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(self.inner.public_key().as_ref());
        PublicKey(out)
    }

    /// Signs `msg`, producing a [`Signature`].
    pub fn sign(&self, msg: &[u8]) -> Signature {
        let sig = self.inner.sign(msg);
        let mut out = [0u8; Signature::LENGTH];
        out.copy_from_slice(sig.as_ref());
        Signature(out)
    }

    /// Returns the 32-byte seed this key pair was derived from.
    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_seed(self.seed)
    }
}

impl PublicKey {
    pub const LENGTH: usize = PUBLIC_KEY_LENGTH;

    /// Reads a `PublicKey` from a byte slice of at least `LENGTH` bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::LENGTH {
            return Err("public key has an invalid length").wrapped(ErrorKind::CryptoSignature);
        }
        let mut out = [0u8; Self::LENGTH];
        out.copy_from_slice(&raw[..Self::LENGTH]);
        Ok(Self(out))
    }

    /// Verifies that `sig` is a valid signature of `msg` under this key.
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> Result<()> {
        let key = signature::UnparsedPublicKey::new(&signature::ED25519, &self.0[..]);
        key.verify(msg, &sig.0[..]).simple(ErrorKind::CryptoSignature)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex(&self.0))
    }
}

impl Signature {
    pub const LENGTH: usize = 64;

    /// Reads a `Signature` from a byte slice of at least `LENGTH` bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::LENGTH {
            return Err("signature has an invalid length").wrapped(ErrorKind::CryptoSignature);
        }
        let mut out = [0u8; Self::LENGTH];
        out.copy_from_slice(&raw[..Self::LENGTH]);
        Ok(Self(out))
    }

    /// Returns an all-zero placeholder signature, used before the
    /// handshake negotiates a real one.
    pub fn zeroed() -> Self {
        Self([0u8; Self::LENGTH])
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}..)", &hex(&self.0)[..8])
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = KeyPair::random();
        let sig = kp.sign(b"hello");
        kp.public_key().verify(b"hello", &sig).expect("valid signature");
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = KeyPair::random();
        let sig = kp.sign(b"hello");
        assert!(kp.public_key().verify(b"goodbye", &sig).is_err());
    }

    #[test]
    fn from_seed_is_deterministic() {
        let seed = [7u8; 32];
        let a = KeyPair::from_seed(seed);
        let b = KeyPair::from_seed(seed);
        assert_eq!(a.public_key(), b.public_key());
    }
}

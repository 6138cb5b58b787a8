//! Aggregatable Schnorr primitives over the Ristretto group, supporting
//! the CoSi protocol's commutative point/scalar aggregation, commitment,
//! challenge, and response operations.
//!
//! None of this module's group arithmetic is novel: it is a thin,
//! CoSi-shaped facade over `curve25519-dalek`.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand_core::OsRng;
use sha2::Sha512;

use crate::runtime::error::*;

/// A Schnorr secret/public key pair over Ristretto255.
#[derive(Clone)]
pub struct KeyPair {
    secret: Scalar,
    public: RistrettoPoint,
}

/// A Schnorr public key, or an aggregate of several (aggregation is just
/// point addition, so the two are represented identically).
#[derive(Copy, Clone, Debug)]
pub struct PublicKey(RistrettoPoint);

/// A per-round random commitment `r`, kept secret until the response
/// phase.
#[derive(Copy, Clone)]
pub struct Commitment {
    r: Scalar,
    point: RistrettoPoint,
}

/// The public point of a [`Commitment`], or an aggregate of several.
#[derive(Copy, Clone, Debug)]
pub struct CommitmentPoint(RistrettoPoint);

/// A Fiat-Shamir challenge scalar, `c = H(aggregate commitment ‖
/// aggregate public key ‖ message)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Challenge(Scalar);

/// A per-node Schnorr response `s = r + c * sk`, or an aggregate of
/// several (aggregation is scalar addition).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Response(Scalar);

/// A complete collective signature: the challenge and the aggregate
/// response, exposed by the root as a challenge‖responseSum pair.
#[derive(Copy, Clone, Debug)]
pub struct Signature {
    pub challenge: Challenge,
    pub response: Response,
}

impl KeyPair {
    /// Generates a new random key pair.
    pub fn random() -> Self {
        let secret = Scalar::random(&mut OsRng);
        let public = &secret * RISTRETTO_BASEPOINT_POINT;
        Self { secret, public }
    }

    /// Returns this key pair's public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public)
    }

    /// Produces a fresh, random commitment for one signing round.
    pub fn commit(&self) -> Commitment {
        let r = Scalar::random(&mut OsRng);
        let point = &r * RISTRETTO_BASEPOINT_POINT;
        Commitment { r, point }
    }

    /// Computes this node's response to `challenge`, given the secret
    /// randomness `commitment` produced earlier in the round.
    pub fn respond(&self, commitment: &Commitment, challenge: Challenge) -> Response {
        Response(commitment.r + challenge.0 * self.secret)
    }
}

impl PublicKey {
    pub const LENGTH: usize = 32;

    /// The additive identity — aggregating zero public keys yields this.
    pub fn identity() -> Self {
        PublicKey(RistrettoPoint::identity())
    }

    /// Aggregates a set of public keys by point addition. Commutative:
    /// the order of `keys` does not affect the result.
    pub fn aggregate<'a, I: IntoIterator<Item = &'a PublicKey>>(keys: I) -> Self {
        keys.into_iter().fold(Self::identity(), |acc, k| PublicKey(acc.0 + k.0))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::LENGTH {
            return Err("public key has an invalid length").wrapped(ErrorKind::CryptoSchnorr);
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&raw[..32]);
        CompressedRistretto(buf)
            .decompress()
            .map(PublicKey)
            .ok_or(()).simple(ErrorKind::CryptoSchnorr)
    }
}

impl Eq for PublicKey {}
impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Commitment {
    /// Returns the public point of this commitment, safe to broadcast.
    pub fn point(&self) -> CommitmentPoint {
        CommitmentPoint(self.point)
    }
}

impl CommitmentPoint {
    /// Aggregates a set of commitment points by point addition.
    /// Commutative: child arrival order does not affect the result.
    pub fn aggregate<'a, I: IntoIterator<Item = &'a CommitmentPoint>>(points: I) -> Self {
        points.into_iter().fold(
            CommitmentPoint(RistrettoPoint::identity()),
            |acc, p| CommitmentPoint(acc.0 + p.0),
        )
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 32 {
            return Err("commitment point has an invalid length").wrapped(ErrorKind::CryptoSchnorr);
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&raw[..32]);
        CompressedRistretto(buf).decompress().map(CommitmentPoint).ok_or(()).simple(ErrorKind::CryptoSchnorr)
    }
}

impl Challenge {
    /// Derives the Fiat-Shamir challenge from the aggregate commitment,
    /// the aggregate public key, and the message being signed.
    pub fn derive(agg_commitment: &CommitmentPoint, agg_public: &PublicKey, message: &[u8]) -> Self {
        let scalar = Scalar::hash_from_bytes::<Sha512>(
            &[
                agg_commitment.to_bytes().as_slice(),
                agg_public.to_bytes().as_slice(),
                message,
            ]
            .concat(),
        );
        Challenge(scalar)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        scalar_from_slice(raw).map(Challenge)
    }
}

impl Response {
    /// Aggregates a set of responses by scalar addition. Commutative:
    /// child arrival order does not affect the result.
    pub fn aggregate<'a, I: IntoIterator<Item = &'a Response>>(responses: I) -> Self {
        responses.into_iter().fold(Response(Scalar::ZERO), |acc, r| Response(acc.0 + r.0))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        scalar_from_slice(raw).map(Response)
    }
}

impl Signature {
    /// Verifies a collective signature against an aggregate public key
    /// and the signed message.
    ///
    /// Reconstructs `R' = s*G - c*P` and checks that hashing `R'` again
    /// reproduces `c`.
    pub fn verify(&self, agg_public: &PublicKey, message: &[u8]) -> Result<()> {
        let r_prime = &self.response.0 * RISTRETTO_BASEPOINT_POINT - self.challenge.0 * agg_public.0;
        let recomputed = Challenge::derive(&CommitmentPoint(r_prime), agg_public, message);
        if recomputed == self.challenge {
            Ok(())
        } else {
            Err("collective signature does not verify").simple(ErrorKind::CryptoSchnorr)
        }
    }
}

fn scalar_from_slice(raw: &[u8]) -> Result<Scalar> {
    if raw.len() < 32 {
        return Err("scalar has an invalid length").wrapped(ErrorKind::CryptoSchnorr);
    }
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&raw[..32]);
    Option::from(Scalar::from_canonical_bytes(buf)).ok_or(()).simple(ErrorKind::CryptoSchnorr)
}

/// Verifies a fully assembled collective signature against the roster's
/// public keys and the signed message.
pub fn verify_signature(pub_keys: &[PublicKey], message: &[u8], signature: &Signature) -> Result<()> {
    let agg = PublicKey::aggregate(pub_keys.iter());
    signature.verify(&agg, message)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn signing_round(parties: usize, message: &[u8]) -> (Signature, PublicKey) {
        let keys: Vec<KeyPair> = (0..parties).map(|_| KeyPair::random()).collect();
        let commitments: Vec<_> = keys.iter().map(|k| k.commit()).collect();
        let points: Vec<_> = commitments.iter().map(|c| c.point()).collect();
        let agg_commitment = CommitmentPoint::aggregate(points.iter());

        let pubkeys: Vec<_> = keys.iter().map(|k| k.public_key()).collect();
        let agg_public = PublicKey::aggregate(pubkeys.iter());

        let challenge = Challenge::derive(&agg_commitment, &agg_public, message);
        let responses: Vec<_> = keys
            .iter()
            .zip(commitments.iter())
            .map(|(k, c)| k.respond(c, challenge))
            .collect();
        let agg_response = Response::aggregate(responses.iter());

        (Signature { challenge, response: agg_response }, agg_public)
    }

    #[test]
    fn collective_signature_verifies() {
        let (sig, agg_public) = signing_round(5, b"hello");
        sig.verify(&agg_public, b"hello").expect("valid signature");
    }

    #[test]
    fn aggregation_is_commutative() {
        let a = KeyPair::random().public_key();
        let b = KeyPair::random().public_key();
        let c = KeyPair::random().public_key();
        let forward = PublicKey::aggregate([&a, &b, &c]);
        let shuffled = PublicKey::aggregate([&c, &a, &b]);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn tampered_message_fails_verification() {
        let (sig, agg_public) = signing_round(3, b"hello");
        assert!(sig.verify(&agg_public, b"goodbye").is_err());
    }

    #[test]
    fn verify_signature_helper_matches_direct_verify() {
        let keys: Vec<KeyPair> = (0..4).map(|_| KeyPair::random()).collect();
        let commitments: Vec<_> = keys.iter().map(|k| k.commit()).collect();
        let points: Vec<_> = commitments.iter().map(|c| c.point()).collect();
        let agg_commitment = CommitmentPoint::aggregate(points.iter());
        let pubkeys: Vec<_> = keys.iter().map(|k| k.public_key()).collect();
        let agg_public = PublicKey::aggregate(pubkeys.iter());
        let challenge = Challenge::derive(&agg_commitment, &agg_public, b"msg");
        let responses: Vec<_> = keys.iter().zip(&commitments).map(|(k, c)| k.respond(c, challenge)).collect();
        let sig = Signature { challenge, response: Response::aggregate(responses.iter()) };

        verify_signature(&pubkeys, b"msg", &sig).expect("valid");
    }
}

//! Types associated with messages traded between hosts, and between a
//! host's internal tasks.

use std::mem::MaybeUninit;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runtime::crypto::identity::PublicKey;
use crate::runtime::error::*;

/// A 16-byte wire type id, identifying the schema of a message payload.
pub type TypeId = [u8; 16];

/// The id of a peer in the overlay: a v5-UUID derived from its public
/// key.
pub type PeerId = Uuid;

/// The id of a [`crate::runtime::overlay::Roster`].
pub type RosterId = Uuid;

/// The id of a [`crate::runtime::overlay::Tree`].
pub type TreeId = Uuid;

/// The id of a [`crate::runtime::overlay::TreeNode`] within a tree.
pub type TreeNodeId = Uuid;

/// The id of a running protocol instance (a `roster-id/tree-id/
/// protocol-id/round-id/tree-node-id` tuple).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct InstanceToken {
    pub roster_id: RosterId,
    pub tree_id: TreeId,
    pub protocol_id: Uuid,
    pub round_id: Uuid,
    pub tree_node_id: TreeNodeId,
}

impl InstanceToken {
    pub fn new(roster_id: RosterId, tree_id: TreeId, protocol_id: Uuid, round_id: Uuid, tree_node_id: TreeNodeId) -> Self {
        Self { roster_id, tree_id, protocol_id, round_id, tree_node_id }
    }

    /// Returns a copy of this token addressed at a different tree node,
    /// used by `Overlay::send_to_tree_node`.
    pub fn with_tree_node(&self, tree_node_id: TreeNodeId) -> Self {
        Self { tree_node_id, ..*self }
    }

    /// Collapses this 80-byte token down to a single 16-byte digest,
    /// suitable as a small, comparable map key.
    pub fn digest(&self) -> Uuid {
        let mut bytes = Vec::with_capacity(16 * 5);
        bytes.extend_from_slice(self.roster_id.as_bytes());
        bytes.extend_from_slice(self.tree_id.as_bytes());
        bytes.extend_from_slice(self.protocol_id.as_bytes());
        bytes.extend_from_slice(self.round_id.as_bytes());
        bytes.extend_from_slice(self.tree_node_id.as_bytes());
        Uuid::new_v5(&Uuid::NAMESPACE_URL, &bytes)
    }
}

/// A peer's stable identity: its public key and known network addresses.
/// The id is a pure function of the public key.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct PeerIdentity {
    id: PeerId,
    #[serde(with = "public_key_serde")]
    public_key: PublicKey,
    addresses: Vec<String>,
}

impl PeerIdentity {
    /// Builds a `PeerIdentity` from a public key and its known
    /// addresses. The id is derived deterministically from the key.
    pub fn new(public_key: PublicKey, addresses: Vec<String>) -> Self {
        let id = identity_id(&public_key);
        Self { id, public_key, addresses }
    }

    /// Builds a placeholder identity for a peer whose public key we
    /// don't know yet, only its id and addresses (as remembered from an
    /// earlier connection). Never sent on the wire.
    pub(crate) fn new_unchecked(id: PeerId, addresses: Vec<String>) -> Self {
        Self { id, public_key: PublicKey::from_bytes(&[0u8; PublicKey::LENGTH]).expect("zeroed key decodes"), addresses }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }
}

impl crate::runtime::communication::serialize::WireType for PeerIdentity {
    const NAME: &'static str = "communication/PeerIdentity";
}

/// Computes a peer identity's id: `v5-UUID(URL-namespace, "id/" ‖
/// hex(pubkey))`. A pure function of the public key.
pub fn identity_id(public_key: &PublicKey) -> PeerId {
    let mut name = String::with_capacity(3 + public_key.as_ref().len() * 2);
    name.push_str("id/");
    for b in public_key.as_ref() {
        name.push_str(&format!("{:02x}", b));
    }
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

mod public_key_serde {
    use super::*;
    use serde::Deserializer;
    use serde::de::Error as _;

    pub fn serialize<S: serde::Serializer>(key: &PublicKey, s: S) -> std::result::Result<S::Ok, S::Error> {
        serde_bytes::serialize(key.as_ref(), s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<PublicKey, D::Error> {
        let bytes: Vec<u8> = serde_bytes::deserialize(d)?;
        PublicKey::from_bytes(&bytes).map_err(D::Error::custom)
    }
}

/// A fixed-size header sent before every payload on the wire. Contains
/// the protocol version and the origin/destination peer ids, so a
/// receiver can validate the handshake before touching the payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct Header {
    pub(crate) version: u32,
    pub(crate) from: [u8; 16],
    pub(crate) to: [u8; 16],
    pub(crate) length: u64,
}

impl Header {
    pub const LENGTH: usize = std::mem::size_of::<Self>();
    pub const CURRENT_VERSION: u32 = 0;

    pub fn new(from: PeerId, to: PeerId, length: u64) -> Self {
        Self { version: Self::CURRENT_VERSION, from: *from.as_bytes(), to: *to.as_bytes(), length }
    }

    pub fn from(&self) -> PeerId {
        Uuid::from_bytes(self.from)
    }

    pub fn to(&self) -> PeerId {
        Uuid::from_bytes(self.to)
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    unsafe fn serialize_into_unchecked(self, buf: &mut [u8]) {
        let raw: [u8; Self::LENGTH] = std::mem::transmute(self);
        buf[..Self::LENGTH].copy_from_slice(&raw[..]);
    }

    /// Serializes this header into a buffer of at least `LENGTH` bytes.
    pub fn serialize_into(self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < Self::LENGTH {
            return Err("buffer is too short to serialize a header into").wrapped(ErrorKind::CommunicationMessage);
        }
        Ok(unsafe { self.serialize_into_unchecked(buf) })
    }

    unsafe fn deserialize_from_unchecked(buf: &[u8]) -> Self {
        let mut raw: [u8; Self::LENGTH] = MaybeUninit::uninit().assume_init();
        raw.copy_from_slice(&buf[..Self::LENGTH]);
        std::mem::transmute(raw)
    }

    /// Deserializes a header out of a buffer of at least `LENGTH` bytes.
    pub fn deserialize_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err("buffer is too short to deserialize a header from").wrapped(ErrorKind::CommunicationMessage);
        }
        Ok(unsafe { Self::deserialize_from_unchecked(buf) })
    }
}

/// A message to be sent over the wire: a [`Header`] followed by a
/// serialized [`SystemMessage`] payload.
#[derive(Debug)]
pub struct WireMessage<'a> {
    header: Header,
    payload: &'a [u8],
}

impl<'a> WireMessage<'a> {
    pub fn new(from: PeerId, to: PeerId, payload: &'a [u8]) -> Self {
        Self { header: Header::new(from, to, payload.len() as u64), payload }
    }

    pub fn into_inner(self) -> (Header, &'a [u8]) {
        (self.header, self.payload)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn is_valid(&self) -> bool {
        self.header.version == Header::CURRENT_VERSION
    }
}

/// The envelope a `TreeNodeInstance` sends to another tree node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub from: InstanceToken,
    pub to: InstanceToken,
    #[serde(with = "serde_bytes")]
    pub inner_type_id: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub inner_bytes: Vec<u8>,
}

impl Envelope {
    pub fn type_id(&self) -> TypeId {
        let mut id = [0u8; 16];
        id.copy_from_slice(&self.inner_type_id[..16]);
        id
    }
}

/// A node in a `SendTree` reply's nested marshalling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeNodeMarshal {
    pub node_id: TreeNodeId,
    pub peer_id: PeerId,
    pub children: Vec<TreeNodeMarshal>,
}

/// The reply to a `RequestTree`. Empty (`root: None`) when the roster is
/// unknown to the replier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeMarshal {
    pub tree_id: TreeId,
    pub roster_id: RosterId,
    pub root: Option<TreeNodeMarshal>,
}

/// The reply to a `RequestRoster`. Empty (`members: None`) when the
/// roster is unknown to the replier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RosterMarshal {
    pub roster_id: RosterId,
    pub members: Option<Vec<PeerIdentity>>,
}

/// The outer message catalogue: every message a `Conn`
/// carries is one of these variants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SystemMessage {
    /// First message on every new connection.
    Identity(PeerIdentity),
    /// Lazy pull: request an unknown roster from its sender.
    RequestRoster(RosterId),
    /// Reply to `RequestRoster`.
    SendRoster(RosterMarshal),
    /// Lazy pull: request an unknown tree from its sender.
    RequestTree(TreeId),
    /// Reply to `RequestTree`.
    SendTree(TreeMarshal),
    /// The protocol-carrying envelope, opaque to the overlay.
    Envelope(Envelope),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::crypto::identity::KeyPair;

    #[test]
    fn header_roundtrips() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let (header, _) = WireMessage::new(from, to, b"payload").into_inner();
        let mut buf = [0u8; Header::LENGTH];
        header.serialize_into(&mut buf).unwrap();
        let decoded = Header::deserialize_from(&buf).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(decoded.from(), from);
        assert_eq!(decoded.to(), to);
    }

    #[test]
    fn identity_id_is_pure_function_of_public_key() {
        let kp = KeyPair::random();
        let a = identity_id(&kp.public_key());
        let b = identity_id(&kp.public_key());
        assert_eq!(a, b);

        let expected_name = format!(
            "id/{}",
            kp.public_key().as_ref().iter().map(|b| format!("{:02x}", b)).collect::<String>()
        );
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_URL, expected_name.as_bytes());
        assert_eq!(a, expected);
    }

    #[test]
    fn instance_token_digest_is_deterministic() {
        let t = InstanceToken::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(t.digest(), t.digest());
    }
}

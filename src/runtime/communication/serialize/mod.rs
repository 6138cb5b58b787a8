//! The wire codec: every message that leaves a host goes through
//! [`encode`], every message that arrives goes through [`decode`].
//! `bincode` is the only format on the wire.
//!
//! Message schemas are additionally registered in a process-wide
//! registry keyed by a 16-byte type id (a truncated hash of the
//! schema's name). Registration is a one-time boot operation; its only
//! purpose here is to catch accidental type-id collisions early, since
//! decoding itself always happens against a statically known Rust type.

use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::runtime::collections::{hash_map, HashMap};
use crate::runtime::crypto::hash;
use crate::runtime::error::*;

use super::message::TypeId;

/// A message schema that can travel on the wire. `NAME` must be unique
/// process-wide; [`register`] panics on a collision.
pub trait WireType: Serialize + DeserializeOwned {
    const NAME: &'static str;
}

/// Computes the wire type id of `T`: a truncated hash of [`WireType::NAME`].
pub fn type_id<T: WireType>() -> TypeId {
    hash::hash(T::NAME.as_bytes()).truncate16()
}

static REGISTRY: OnceLock<Mutex<HashMap<TypeId, &'static str>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<TypeId, &'static str>> {
    REGISTRY.get_or_init(|| Mutex::new(hash_map()))
}

/// Registers `T`'s schema in the process-wide type registry.
pub fn register<T: WireType>() {
    let id = type_id::<T>();
    let mut reg = registry().lock();
    if let Some(existing) = reg.get(&id) {
        if *existing != T::NAME {
            panic!("wire type id collision between '{}' and '{}'", existing, T::NAME);
        }
        return;
    }
    reg.insert(id, T::NAME);
}

/// Initializes the registry with the built-in control messages and every
/// protocol's own message types. Called once from [`crate::runtime::init`].
pub fn init_registry() {
    register::<super::message::PeerIdentity>();
    crate::runtime::protocols::cosi::register_types();
    crate::runtime::protocols::count::register_types();
}

/// Serializes `value` with the crate's wire format.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).wrapped(ErrorKind::CommunicationSerialize)
}

/// Deserializes a `T` out of `bytes`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).wrapped(ErrorKind::CommunicationSerialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Ping(u32);

    impl WireType for Ping {
        const NAME: &'static str = "test/Ping";
    }

    #[test]
    fn roundtrips_through_bincode() {
        let encoded = encode(&Ping(7)).unwrap();
        let decoded: Ping = decode(&encoded).unwrap();
        assert_eq!(decoded, Ping(7));
    }

    #[test]
    fn type_id_is_stable() {
        assert_eq!(type_id::<Ping>(), type_id::<Ping>());
    }

    #[test]
    fn register_is_idempotent_for_the_same_type() {
        register::<Ping>();
        register::<Ping>();
    }
}

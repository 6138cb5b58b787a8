//! `sigtree` hosts multi-round, tree-structured cryptographic protocols
//! over a shared authenticated transport.
//!
//! The crate multiplexes many concurrent protocol instances, routes typed
//! messages to the correct instance and tree node, aggregates per-round
//! child messages, and retires instances cleanly. The canonical protocol
//! built on top of the runtime is collective Schnorr signing (CoSi).
//!
//! By default, the implementation details live under [`runtime`], hidden
//! unless the `expose_impl` feature is enabled.

#[cfg(not(feature = "expose_impl"))]
mod runtime;

#[cfg(feature = "expose_impl")]
pub mod runtime;

pub use runtime::{init, Host, HostConfig, InitConfig, InitGuard};
pub use runtime::error::{Error, ErrorKind, Result};

pub use runtime::async_exec::{block_on, spawn};
pub use runtime::overlay::{Overlay, Roster, Tree, TreeNode, TreeNodeIndex};
pub use runtime::instance::TreeNodeInstance;
pub use runtime::protocol::ProtocolInstance;
pub use runtime::communication::{PeerIdentity, Router, RouterConfig, SystemMessage};
pub use runtime::communication::message::{InstanceToken, PeerId, RosterId, TreeId, TreeNodeId};
pub use runtime::crypto::schnorr;
pub use runtime::crypto::identity::KeyPair as IdentityKeyPair;

/// The wire codec surface a custom [`ProtocolInstance`] needs to define
/// its own message types: implement [`serialize::WireType`] on a
/// `Serialize + DeserializeOwned` struct and pass it to
/// [`TreeNodeInstance::register_channel`]/`send_to`.
pub mod serialize {
    pub use crate::runtime::communication::serialize::{decode, encode, register, type_id, WireType};
}

/// Concrete protocols built on top of the runtime.
pub mod protocols {
    pub use crate::runtime::protocols::cosi::Cosi;
    pub use crate::runtime::protocols::count::Count;
}

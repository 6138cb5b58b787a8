//! The trait every protocol implementation (CoSi, count, ...) hangs off
//! of.

use crate::runtime::instance::TreeNodeInstance;

/// A running protocol instance, rooted at one [`TreeNodeInstance`].
///
/// `start`/`dispatch`/`shutdown` are synchronous hooks: a protocol that
/// needs to wait on network traffic does so by spawning its own task
/// (via [`crate::runtime::async_exec::spawn`]) out of `start`, driven by
/// channels obtained from [`TreeNodeInstance::register_channel`].
pub trait ProtocolInstance: Send + Sync {
    /// Returns the tree-node instance this protocol is attached to.
    fn instance(&self) -> &TreeNodeInstance;

    /// Called once, right after the instance is registered with the
    /// overlay. The default implementation does nothing; most
    /// protocols override it to register channels and spawn their
    /// driving task.
    fn start(self: std::sync::Arc<Self>) {}

    /// Called whenever the overlay cannot route an inbound message to
    /// any channel registered by `start`. Protocols that register a
    /// channel for every message type they expect never need this.
    fn dispatch(&self) {}

    /// Called when the host is closing. The default implementation does
    /// nothing; override to cancel in-flight timeouts or wake up a
    /// blocked task.
    fn shutdown(&self) {}
}

//! Implementation details of `sigtree`.
//!
//! Hidden to the user, unless explicitly enabled with the `expose_impl`
//! feature flag.

pub mod async_exec;
pub mod collections;
pub mod communication;
pub mod crypto;
pub mod error;
pub mod instance;
pub mod overlay;
pub mod protocol;
pub mod protocols;

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tracing::info;

use error::*;
use overlay::{Overlay, Roster, Tree};
use communication::{PeerId, Router, RouterConfig};

static INITIALIZED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Configures the init process of the runtime.
pub struct InitConfig {
    /// Number of worker threads used by the async runtime.
    pub async_threads: usize,
}

/// Handle to global runtime state. When dropped, the data is
/// deinitialized.
pub struct InitGuard;

/// Initializes process-wide global data: the async runtime and the wire
/// codec's type registry. Should be called before any other method in
/// this crate, otherwise runtime panics may ensue.
pub unsafe fn init(c: InitConfig) -> Result<Option<InitGuard>> {
    if INITIALIZED.swap(true, std::sync::atomic::Ordering::SeqCst) {
        return Ok(None);
    }
    async_exec::init(c.async_threads)?;
    communication::serialize::init_registry();
    tracing::trace!("sigtree runtime initialized");
    Ok(Some(InitGuard))
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        INITIALIZED.store(false, std::sync::atomic::Ordering::SeqCst);
        async_exec::drop();
    }
}

/// Configuration used to bootstrap a [`Host`].
pub struct HostConfig {
    /// Transport-level router configuration (listen address, signing
    /// key, TLS settings). This host's id is derived from the signing
    /// key, not chosen independently.
    pub router: RouterConfig,
}

/// A `Host` is the per-process object a user of this crate programs
/// against: it owns a [`Router`] (transport multiplexer) and an
/// [`Overlay`] (roster/tree/instance registry), and wires incoming
/// decoded messages from the former into the latter.
///
/// There is no persisted state, and no CLI surface: every method here is
/// a plain async function call.
pub struct Host {
    id: PeerId,
    router: Arc<Router>,
    overlay: Arc<Overlay>,
    processing: SyncMutex<bool>,
}

impl Host {
    /// Constructs a new, unstarted `Host`.
    pub fn new(cfg: HostConfig) -> Result<Self> {
        let router = Router::new(cfg.router)?;
        let id = router.id();
        let overlay = Overlay::new(id, Arc::clone(&router));
        Ok(Self {
            id,
            router,
            overlay,
            processing: SyncMutex::new(false),
        })
    }

    /// Returns this host's id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Returns a handle to the host's [`Overlay`].
    pub fn overlay(&self) -> &Arc<Overlay> {
        &self.overlay
    }

    /// Returns a handle to the host's [`Router`].
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Idempotent: after this call returns, the host is accepting
    /// incoming connections.
    pub async fn listen(&self) -> Result<()> {
        self.router.listen().await
    }

    /// Opens a connection to `peer`, performing the identity handshake.
    pub async fn connect(&self, peer: &communication::PeerIdentity) -> Result<()> {
        self.router.connect(peer).await
    }

    /// Begins dispatching incoming messages into the [`Overlay`]. Must be
    /// called before any protocol instance is started.
    pub fn start_process_messages(self: &Arc<Self>) {
        let mut processing = self.processing.lock();
        if *processing {
            return;
        }
        *processing = true;
        let overlay = Arc::clone(&self.overlay);
        let router = Arc::clone(&self.router);
        router.set_dispatcher(overlay);
        info!(host = %self.id, "processing messages");
    }

    /// Registers a roster known ahead of time (not learned via lazy pull).
    pub fn register_roster(&self, roster: Roster) {
        self.overlay.register_roster(roster);
    }

    /// Registers a tree known ahead of time (not learned via lazy pull).
    pub fn register_tree(&self, tree: Tree) {
        self.overlay.register_tree(tree);
    }

    /// Closes all connections, stops the listener, and drains instance
    /// dispatchers.
    pub async fn close(&self) -> Result<()> {
        self.overlay.done_all().await;
        self.router.stop().await
    }
}

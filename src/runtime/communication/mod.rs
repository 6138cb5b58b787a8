//! Transport: dialing, accepting, and framing connections to peers. A
//! `Router` dials peers on demand rather than eagerly connecting to a
//! fixed, known set at startup.

#[cfg(not(feature = "expose_impl"))]
mod socket;

#[cfg(feature = "expose_impl")]
pub mod socket;

pub mod channel;
pub mod conn;
pub mod message;
pub mod serialize;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_tls::{TlsAcceptor, TlsConnector};
use parking_lot::Mutex;
use rustls::{ClientConfig, ServerConfig};
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::runtime::async_exec as rt;
use crate::runtime::collections::{hash_map, HashMap};
use crate::runtime::crypto::identity::KeyPair;
use crate::runtime::error::*;

pub use self::conn::Conn;
pub use self::message::{Header, PeerId, PeerIdentity, SystemMessage};

use self::conn::Stream;

/// Something that wants to receive inbound [`SystemMessage`]s handled
/// by a [`Router`]. Implemented by [`crate::runtime::overlay::Overlay`];
/// kept as a trait here so `communication` never has to depend on
/// `overlay`.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, from: PeerId, message: SystemMessage);
}

/// Bootstraps a [`Router`].
pub struct RouterConfig {
    /// This host's signing key pair; its public key, hashed, is this
    /// host's [`PeerId`].
    pub identity_key: KeyPair,
    /// The address to accept inbound connections on.
    pub listen_addr: SocketAddr,
    /// TLS configuration used when dialing a peer.
    pub client_config: ClientConfig,
    /// TLS configuration used when accepting a connection.
    pub server_config: ServerConfig,
}

/// Live connections to one peer, most-recently-established first, plus
/// the addresses we know to reach it at.
struct PeerEntry {
    addresses: Mutex<Vec<String>>,
    conns: tokio::sync::Mutex<Vec<Conn>>,
}

impl PeerEntry {
    fn new(addresses: Vec<String>) -> Arc<Self> {
        Arc::new(Self { addresses: Mutex::new(addresses), conns: tokio::sync::Mutex::new(Vec::new()) })
    }
}

/// Owns this host's identity and every live connection to a peer.
/// Dials peers lazily: a `RequestRoster`/`Envelope`/etc addressed at a
/// peer with no live connection triggers a dial first.
pub struct Router {
    id: PeerId,
    identity_key: Arc<KeyPair>,
    listen_addr: SocketAddr,
    acceptor: TlsAcceptor,
    connector: TlsConnector,
    peers: Mutex<HashMap<PeerId, Arc<PeerEntry>>>,
    dispatcher: Mutex<Option<Arc<dyn Dispatch>>>,
    stopped: AtomicBool,
}

impl Router {
    /// Builds a `Router` around `cfg`. Does not bind a socket yet; call
    /// [`Router::listen`] to start accepting connections.
    pub fn new(cfg: RouterConfig) -> Result<Arc<Self>> {
        let id = message::identity_id(&cfg.identity_key.public_key());
        let acceptor: TlsAcceptor = cfg.server_config.into();
        let connector: TlsConnector = cfg.client_config.into();

        Ok(Arc::new(Self {
            id,
            identity_key: Arc::new(cfg.identity_key),
            listen_addr: cfg.listen_addr,
            acceptor,
            connector,
            peers: Mutex::new(hash_map()),
            dispatcher: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.identity_key.public_key(), vec![self.listen_addr.to_string()])
    }

    /// Registers the sink for inbound messages. Calling this more than
    /// once replaces the previous dispatcher.
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatch>) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    fn entry_for(&self, peer_id: PeerId, addresses: Vec<String>) -> Arc<PeerEntry> {
        let mut peers = self.peers.lock();
        peers
            .entry(peer_id)
            .or_insert_with(|| PeerEntry::new(addresses))
            .clone()
    }

    /// Binds the listen address and starts accepting connections.
    pub async fn listen(self: &Arc<Self>) -> Result<()> {
        let listener = socket::bind(self.listen_addr).await.wrapped(ErrorKind::CommunicationRouter)?;

        let this = self.clone();
        rt::spawn(Self::accept_loop(this, listener));

        tracing::info!(router = %self.id, addr = %self.listen_addr, "listening");
        Ok(())
    }

    async fn accept_loop(router: Arc<Self>, listener: socket::Listener) {
        loop {
            if router.stopped.load(Ordering::Acquire) {
                return;
            }
            match listener.accept().await {
                Ok(sock) => {
                    let router = router.clone();
                    rt::spawn(Self::accept_one(router, sock));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    async fn accept_one(router: Arc<Self>, sock: socket::Socket) {
        let tls = match router.acceptor.accept(sock.compat()).await {
            Ok(s) => Stream::Server(s),
            Err(e) => {
                tracing::warn!(error = %e, "TLS handshake failed on accept");
                return;
            }
        };

        // the peer id isn't known until its `Identity` message arrives
        let mut handshake_conn = Conn::new(router.id, tls);
        let identity = match handshake_conn.receive().await {
            Ok((_, SystemMessage::Identity(identity))) => identity,
            _ => return,
        };
        let conn = Conn::new(identity.id(), handshake_conn.into_stream());
        router.register_connection(identity, conn).await;
    }

    /// Dials `peer`, performs the identity handshake, and registers the
    /// resulting connection. Idempotent: calling it while a connection
    /// already exists just adds a redundant one.
    pub async fn connect(self: &Arc<Self>, peer: &PeerIdentity) -> Result<()> {
        const RETRIES: usize = 3;

        let addr = peer.addresses().first().ok_or(()).simple(ErrorKind::CommunicationRouter)?;
        let sockaddr: SocketAddr = addr.parse().wrapped(ErrorKind::CommunicationRouter)?;

        let mut last_err = Error::simple(ErrorKind::CommunicationRouter);
        for attempt in 0..RETRIES {
            match self.dial_once(peer.clone(), sockaddr).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = e;
                    Conn::retry_delay(attempt).await;
                }
            }
        }
        Err(last_err)
    }

    async fn dial_once(self: &Arc<Self>, peer: PeerIdentity, addr: SocketAddr) -> Result<()> {
        let sock = socket::connect(addr).await.wrapped(ErrorKind::CommunicationRouter)?;
        let hostname = addr.ip().to_string();
        let tls = self.connector.connect(hostname, sock.compat()).await.wrapped(ErrorKind::CommunicationRouter)?;

        let mut conn = Conn::new(peer.id(), Stream::Client(tls));
        conn.send(self.id, &SystemMessage::Identity(self.identity())).await?;
        self.register_connection(peer, conn).await;
        Ok(())
    }

    async fn register_connection(self: &Arc<Self>, identity: PeerIdentity, conn: Conn) {
        let peer_id = identity.id();
        let entry = self.entry_for(peer_id, identity.addresses().to_vec());
        if !identity.addresses().is_empty() {
            *entry.addresses.lock() = identity.addresses().to_vec();
        }
        entry.conns.lock().await.insert(0, conn);

        let router = self.clone();
        rt::spawn(async move { router.receive_loop(peer_id, entry).await });
    }

    /// Reads messages off this peer's primary connection until it
    /// closes, handing each one to the registered dispatcher. One of
    /// these tasks runs per live peer connection.
    async fn receive_loop(self: Arc<Self>, peer_id: PeerId, entry: Arc<PeerEntry>) {
        loop {
            let result = {
                let mut conns = entry.conns.lock().await;
                match conns.first_mut() {
                    Some(conn) => conn.receive().await,
                    None => return,
                }
            };
            match result {
                Ok((header, message)) => {
                    if let Some(dispatcher) = self.dispatcher.lock().clone() {
                        dispatcher.dispatch(header.from(), message);
                    }
                }
                Err(e) => {
                    tracing::debug!(peer = %peer_id, error = %e, "connection closed");
                    let mut conns = entry.conns.lock().await;
                    if !conns.is_empty() {
                        conns.remove(0);
                    }
                    return;
                }
            }
        }
    }

    /// Sends `message` to `peer`, dialing it first if there is no live
    /// connection.
    pub async fn send_to(self: &Arc<Self>, peer: &PeerIdentity, message: &SystemMessage) -> Result<()> {
        let entry = self.entry_for(peer.id(), peer.addresses().to_vec());
        if entry.conns.lock().await.is_empty() {
            self.connect(peer).await?;
        }

        let mut conns = entry.conns.lock().await;
        let conn = conns.first_mut().ok_or(()).simple(ErrorKind::CommunicationRouter)?;
        let result = conn.send(self.id, message).await;
        if result.is_err() {
            conns.remove(0);
        }
        result
    }

    /// Stops accepting new connections. Existing connections are left
    /// to close naturally — there is no proactive stale-`Conn` detection.
    pub async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }
}

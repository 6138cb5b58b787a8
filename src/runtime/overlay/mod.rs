//! The overlay: roster/tree/instance-token bookkeeping layered on top
//! of the raw [`crate::runtime::communication::Router`]. Uses a
//! `HashMap`-registry-behind-a-lock pattern for the roster/tree/instance
//! maps, and buffers out-of-order envelopes until the tree or roster
//! they reference resolves.

mod tree;

pub use tree::{Tree, TreeNode, TreeNodeIndex};

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::runtime::collections::{hash_map, HashMap};
use crate::runtime::communication::message::{
    Envelope, InstanceToken, PeerId, RosterId, RosterMarshal, SystemMessage, TreeId, TreeMarshal, TreeNodeId, TreeNodeMarshal,
};
use crate::runtime::communication::{Dispatch, PeerIdentity, Router};
use crate::runtime::error::*;
use crate::runtime::instance::{InstanceHandle, TreeNodeInstance};
use crate::runtime::protocol::ProtocolInstance;

/// An ordered list of the peers participating in a protocol run. Its id
/// is a random v4-UUID, minted once when the roster is created.
#[derive(Clone, Debug)]
pub struct Roster {
    id: RosterId,
    members: Vec<PeerIdentity>,
}

impl Roster {
    pub fn new(members: Vec<PeerIdentity>) -> Self {
        Self { id: Uuid::new_v4(), members }
    }

    pub fn id(&self) -> RosterId {
        self.id
    }

    pub fn members(&self) -> &[PeerIdentity] {
        &self.members
    }

    pub fn aggregate_public_key(&self) -> Vec<u8> {
        // placeholder aggregation target: callers that need the actual
        // CoSi aggregate key derive it from `crypto::schnorr::PublicKey`
        // values carried alongside the roster by the protocol, since a
        // `Roster` only knows about identity (Ed25519) keys.
        self.members.iter().flat_map(|m| m.public_key().as_ref().to_vec()).collect()
    }

    fn to_marshal(&self) -> RosterMarshal {
        RosterMarshal { roster_id: self.id, members: Some(self.members.clone()) }
    }
}

/// Five hashes stitched into a single, deterministic id for a running
/// protocol instance. See [`InstanceToken::digest`].
pub(crate) fn instance_key(token: &InstanceToken) -> Uuid {
    token.digest()
}

struct PendingEnvelope {
    from_peer: PeerId,
    envelope: Envelope,
}

/// Builds, registers, and starts a `ProtocolInstance` for a
/// `protocol_id` the overlay hasn't seen an instance of yet, the moment
/// an envelope referencing it arrives. Registered once per protocol
/// type via `Overlay::register_protocol_factory`, not per round: the
/// per-round identity (tree node, round id) comes from the envelope's
/// own destination token, not from the factory.
type ProtocolFactory = Box<dyn Fn(TreeNodeInstance) -> InstanceHandle + Send + Sync>;

/// Registry of rosters, trees, and running protocol instances for one
/// host, plus the lazy-pull machinery that resolves a reference to an
/// unknown roster or tree by asking whoever sent it.
pub struct Overlay {
    id: PeerId,
    router: Arc<Router>,
    rosters: Mutex<HashMap<RosterId, Roster>>,
    trees: Mutex<HashMap<TreeId, Tree>>,
    instances: Mutex<HashMap<Uuid, InstanceHandle>>,
    /// Envelopes that arrived addressed at a tree/roster we don't have
    /// yet, buffered until the corresponding `SendTree`/`SendRoster`
    /// resolves them.
    pending: Mutex<Vec<PendingEnvelope>>,
    /// Factories that can materialize a fresh instance for a given
    /// `protocol_id` the moment an envelope for it shows up, rather
    /// than requiring the destination host to have called
    /// `start_protocol` itself ahead of time.
    factories: Mutex<HashMap<Uuid, ProtocolFactory>>,
    weak_self: Weak<Overlay>,
}

impl Overlay {
    pub fn new(id: PeerId, router: Arc<Router>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id,
            router,
            rosters: Mutex::new(hash_map()),
            trees: Mutex::new(hash_map()),
            instances: Mutex::new(hash_map()),
            pending: Mutex::new(Vec::new()),
            factories: Mutex::new(hash_map()),
            weak_self: weak_self.clone(),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn register_roster(&self, roster: Roster) {
        self.rosters.lock().insert(roster.id(), roster);
    }

    pub fn register_tree(&self, tree: Tree) {
        self.trees.lock().insert(tree.id(), tree);
    }

    pub fn roster(&self, id: RosterId) -> Option<Roster> {
        self.rosters.lock().get(&id).cloned()
    }

    pub fn tree(&self, id: TreeId) -> Option<Tree> {
        self.trees.lock().get(&id).cloned()
    }

    /// Starts this host's participation in a protocol run, for the given
    /// roster/tree pair. Every node in the tree — root and non-root
    /// alike — calls this on its own `Overlay` to bind the run to its
    /// own tree node; only the resulting `ProtocolInstance`'s behavior
    /// (root vs. non-root) differs. Returns a handle the caller can
    /// await on.
    pub fn start_protocol<P: ProtocolInstance + 'static>(
        self: &Arc<Self>,
        protocol_id: Uuid,
        round_id: Uuid,
        tree: &Tree,
        build: impl FnOnce(TreeNodeInstance) -> P,
    ) -> Result<Arc<P>> {
        let my_node = tree.find_by_peer(self.id).ok_or(()).simple(ErrorKind::OverlayTree)?;
        let token = InstanceToken::new(tree.roster_id(), tree.id(), protocol_id, round_id, my_node.id());

        let tni = TreeNodeInstance::new(self.clone(), token, tree.clone());
        let protocol = Arc::new(build(tni));

        let handle = InstanceHandle::new(&protocol);
        self.instances.lock().insert(instance_key(&token), handle);

        protocol.clone().start();

        Ok(protocol)
    }

    /// Registers a factory that lazily materializes a `ProtocolInstance`
    /// for `protocol_id` the first time this host sees an envelope
    /// addressed to it, without the host ever having called
    /// `start_protocol` itself. `build` only needs to know how to wire
    /// up the protocol from a `TreeNodeInstance` — the round's tree
    /// node and round id come from the triggering envelope, not from
    /// the call site.
    pub fn register_protocol_factory<P, F>(&self, protocol_id: Uuid, build: F)
    where
        P: ProtocolInstance + 'static,
        F: Fn(TreeNodeInstance) -> P + Send + Sync + 'static,
    {
        let factory: ProtocolFactory = Box::new(move |tni| {
            let protocol = Arc::new(build(tni));
            let handle = InstanceHandle::new(&protocol);
            protocol.start();
            handle
        });
        self.factories.lock().insert(protocol_id, factory);
    }

    pub(crate) fn remove_instance(&self, key: Uuid) {
        self.instances.lock().remove(&key);
    }

    /// Sends an envelope from `from` to the tree node `to_node`, in the
    /// same tree as `from`. `from` is carried onto the wire unchanged
    /// as `Envelope::from`, so the receiver can tell exactly which
    /// tree node a message originated from (needed for e.g. telling a
    /// parent's message apart from a child's during aggregation).
    pub fn send_to_tree_node(self: &Arc<Self>, from: InstanceToken, to_node: TreeNodeId, inner_type_id: [u8; 16], inner_bytes: Vec<u8>) -> Result<()> {
        let tree = self.tree(from.tree_id).ok_or(()).simple(ErrorKind::OverlayTree)?;
        let node = tree.find(to_node).ok_or(()).simple(ErrorKind::OverlayTree)?;
        let peer = self.peer_for(&tree, node.peer_id())?;

        let envelope = Envelope {
            from,
            to: from.with_tree_node(node.id()),
            inner_type_id: inner_type_id.to_vec(),
            inner_bytes,
        };

        let router = self.router.clone();
        crate::runtime::async_exec::spawn(async move {
            let _ = router.send_to(&peer, &SystemMessage::Envelope(envelope)).await;
        });
        Ok(())
    }

    fn peer_for(&self, tree: &Tree, peer_id: PeerId) -> Result<PeerIdentity> {
        let roster = self.roster(tree.roster_id()).ok_or(()).simple(ErrorKind::OverlayRoster)?;
        roster
            .members()
            .iter()
            .find(|m| m.id() == peer_id)
            .cloned()
            .ok_or(())
            .simple(ErrorKind::OverlayRoster)
    }

    fn route_envelope(self: &Arc<Self>, from_peer: PeerId, envelope: Envelope) {
        let key = instance_key(&envelope.to);
        let handle = self.instances.lock().get(&key).cloned();
        match handle {
            Some(handle) => handle.deliver(envelope),
            None if self.tree(envelope.to.tree_id).is_none() => {
                // we don't even know the tree this envelope belongs to
                // yet; pull it (and, once that resolves, the roster
                // behind it) from whoever sent it, then replay
                let tree_id = envelope.to.tree_id;
                self.pending.lock().push(PendingEnvelope { from_peer, envelope });
                self.reply(from_peer, SystemMessage::RequestTree(tree_id));
            }
            None => self.lazily_create_or_buffer(key, from_peer, envelope),
        }
    }

    /// Called once the destination tree is known but no instance has
    /// been started for this round. If a factory was registered for
    /// this envelope's `protocol_id`, builds, registers, and starts a
    /// fresh instance on the spot and hands the envelope straight to
    /// it. Otherwise buffers it the way a protocol's own phase logic
    /// buffers out-of-order input, on the chance `start_protocol` is
    /// called locally soon after.
    fn lazily_create_or_buffer(self: &Arc<Self>, key: Uuid, from_peer: PeerId, envelope: Envelope) {
        let has_factory = self.factories.lock().contains_key(&envelope.to.protocol_id);
        if !has_factory {
            self.pending.lock().push(PendingEnvelope { from_peer, envelope });
            return;
        }

        let tree = match self.tree(envelope.to.tree_id) {
            Some(tree) => tree,
            None => {
                self.pending.lock().push(PendingEnvelope { from_peer, envelope });
                return;
            }
        };
        let tni = TreeNodeInstance::new(self.clone(), envelope.to, tree);
        let handle = {
            let factories = self.factories.lock();
            match factories.get(&envelope.to.protocol_id) {
                Some(factory) => factory(tni),
                None => return,
            }
        };
        self.instances.lock().insert(key, handle.clone());
        handle.deliver(envelope);
    }

    fn handle_request_roster(self: &Arc<Self>, from: PeerId, roster_id: RosterId) {
        let marshal = match self.roster(roster_id) {
            Some(roster) => roster.to_marshal(),
            None => RosterMarshal { roster_id, members: None },
        };
        self.reply(from, SystemMessage::SendRoster(marshal));
    }

    fn handle_send_roster(self: &Arc<Self>, marshal: RosterMarshal) {
        if let Some(members) = marshal.members {
            self.rosters.lock().insert(marshal.roster_id, Roster { id: marshal.roster_id, members });
            self.drain_pending();
        }
    }

    fn handle_request_tree(self: &Arc<Self>, from: PeerId, tree_id: TreeId) {
        let marshal = match self.tree(tree_id) {
            Some(tree) => tree.to_marshal(),
            None => TreeMarshal { tree_id, roster_id: Uuid::nil(), root: None },
        };
        self.reply(from, SystemMessage::SendTree(marshal));
    }

    fn handle_send_tree(self: &Arc<Self>, marshal: TreeMarshal) {
        if let Some(root) = marshal.root {
            let roster_id = marshal.roster_id;
            let tree = Tree::from_marshal(marshal.tree_id, roster_id, root);
            self.register_tree(tree);

            if self.roster(roster_id).is_none() {
                // the tree is only half the picture; the pending
                // envelopes still need a roster to resolve the peer
                // behind each tree node, so chase it down too
                if let Some(from_peer) = self.pending.lock().first().map(|p| p.from_peer) {
                    self.reply(from_peer, SystemMessage::RequestRoster(roster_id));
                }
            }
            self.drain_pending();
        }
    }

    fn drain_pending(self: &Arc<Self>) {
        let pending: Vec<_> = std::mem::take(&mut *self.pending.lock());
        for p in pending {
            self.route_envelope(p.from_peer, p.envelope);
        }
    }

    /// Sends `message` to `to`. Looks `to` up in a known roster first (to
    /// recover its advertised addresses); falls back to an address-less
    /// identity otherwise, which works as long as a connection to `to`
    /// is already live — true whenever this is a reply to something `to`
    /// just sent us.
    fn reply(self: &Arc<Self>, to: PeerId, message: SystemMessage) {
        let peer = {
            let rosters = self.rosters.lock();
            rosters.values().flat_map(|r| r.members()).find(|m| m.id() == to).cloned()
        }
        .unwrap_or_else(|| PeerIdentity::new_unchecked(to, Vec::new()));

        let router = self.router.clone();
        crate::runtime::async_exec::spawn(async move {
            let _ = router.send_to(&peer, &message).await;
        });
    }

    /// Shuts down every running protocol instance and clears all
    /// registries. Called by `Host::close`.
    pub async fn done_all(&self) {
        let handles: Vec<_> = self.instances.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

impl Dispatch for Overlay {
    fn dispatch(&self, from: PeerId, message: SystemMessage) {
        // `Dispatch::dispatch` is a synchronous callback invoked from
        // the router's receive loop; work that needs `&Arc<Self>` is
        // re-entered through a cloned `Arc` inside a spawned task.
        let this = match self.self_arc() {
            Some(a) => a,
            None => return,
        };
        match message {
            SystemMessage::Identity(_) => {}
            SystemMessage::RequestRoster(id) => this.handle_request_roster(from, id),
            SystemMessage::SendRoster(marshal) => this.handle_send_roster(marshal),
            SystemMessage::RequestTree(id) => this.handle_request_tree(from, id),
            SystemMessage::SendTree(marshal) => this.handle_send_tree(marshal),
            SystemMessage::Envelope(envelope) => this.route_envelope(from, envelope),
        }
    }
}

impl Overlay {
    /// Re-derives an owning `Arc<Self>` for use inside the `Dispatch`
    /// callback, which only receives `&self`. Every `Overlay` in this
    /// crate is always held behind an `Arc` (see [`Overlay::new`]), so
    /// this never fails in practice; it returns `None` defensively
    /// rather than panicking if that invariant is ever broken.
    fn self_arc(&self) -> Option<Arc<Self>> {
        // Safety note: there is no sound general way to recover `Arc<Self>`
        // from `&self` without storing a weak handle. `Overlay` therefore
        // keeps one.
        self.weak_self.upgrade()
    }
}

//! `TreeNodeInstance`: the per-protocol-run handle a [`crate::runtime::
//! protocol::ProtocolInstance`] uses to talk to the rest of its tree.
//! The protocol author drives phase transitions directly through
//! [`TreeNodeInstance::register_channel`] / [`TreeNodeInstance::
//! register_handler`] rather than a fixed phase enum owned by the
//! runtime.
//!
//! Every inbound envelope is pushed onto one bounded queue and drained
//! by one dispatcher task per instance, so messages for the same
//! instance are always decoded and delivered in the order they arrive
//! — nothing else touches the per-type registry concurrently. A type
//! registered as an *aggregate* channel or handler buffers messages
//! from children until every child has reported, then delivers them as
//! a single batch; this is the behavior both CoSi and the count
//! protocol need and previously hand-rolled themselves.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::collections::{hash_map, HashMap};
use crate::runtime::communication::channel::{self, MessageRx, MessageTx};
use crate::runtime::communication::message::{Envelope, InstanceToken, PeerId, TreeNodeId, TypeId};
use crate::runtime::communication::serialize::{self, WireType};
use crate::runtime::error::*;
use crate::runtime::overlay::{instance_key, Overlay, Tree};
use crate::runtime::protocol::ProtocolInstance;

/// Inbound messages registered through [`TreeNodeInstance::register_channel`]
/// are queued no deeper than this before the instance starts dropping
/// the oldest ones; a well-behaved protocol drains faster than its peers
/// produce.
const CHANNEL_BOUND: usize = 64;

type DispatchFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Box<dyn Fn(TreeNodeId, Vec<u8>) -> DispatchFuture + Send + Sync>;
type OnDone = Box<dyn FnOnce() + Send>;

struct Inner {
    overlay: Arc<Overlay>,
    token: InstanceToken,
    tree: Tree,
    registry: Mutex<HashMap<TypeId, Handler>>,
    raw_tx: MessageTx<Envelope>,
    stop_tx: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    done: AtomicBool,
    on_done: Mutex<Option<OnDone>>,
}

/// A handle to one running protocol instance's position in its tree.
/// Cheap to clone; every clone shares the same registry, queue, and
/// dispatcher task.
#[derive(Clone)]
pub struct TreeNodeInstance {
    inner: Arc<Inner>,
}

impl TreeNodeInstance {
    pub(crate) fn new(overlay: Arc<Overlay>, token: InstanceToken, tree: Tree) -> Self {
        let (raw_tx, raw_rx) = channel::new_message_channel(CHANNEL_BOUND);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        let inner = Arc::new(Inner {
            overlay,
            token,
            tree,
            registry: Mutex::new(hash_map()),
            raw_tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            done: AtomicBool::new(false),
            on_done: Mutex::new(None),
        });
        spawn_dispatcher(inner.clone(), raw_rx, stop_rx);
        Self { inner }
    }

    /// Registers a callback to run once, the moment [`TreeNodeInstance::
    /// done`] tears this instance down. A protocol that needs to wake
    /// up a caller blocked on its result (the way [`crate::runtime::
    /// protocols::cosi::Cosi::signature`] and [`crate::runtime::
    /// protocols::count::Count::total`] do via their own `oneshot`)
    /// normally does that directly instead of through this hook; this
    /// exists for an embedder that needs to react to teardown without
    /// owning the protocol object itself.
    pub fn on_done(&self, f: impl FnOnce() + Send + 'static) {
        *self.inner.on_done.lock() = Some(Box::new(f));
    }

    pub fn token(&self) -> InstanceToken {
        self.inner.token
    }

    pub fn tree(&self) -> &Tree {
        &self.inner.tree
    }

    fn my_tree_node_id(&self) -> TreeNodeId {
        self.inner.token.tree_node_id
    }

    pub fn is_root(&self) -> bool {
        self.inner.tree.find(self.my_tree_node_id()).map(|n| n.is_root()).unwrap_or(false)
    }

    pub fn is_leaf(&self) -> bool {
        self.inner.tree.find(self.my_tree_node_id()).map(|n| n.is_leaf()).unwrap_or(true)
    }

    pub fn parent(&self) -> Option<TreeNodeId> {
        self.inner.tree.find(self.my_tree_node_id()).and_then(|n| n.parent()).map(|p| p.id())
    }

    pub fn children(&self) -> Vec<TreeNodeId> {
        self.inner
            .tree
            .find(self.my_tree_node_id())
            .map(|n| n.children().map(|c| c.id()).collect())
            .unwrap_or_default()
    }

    pub fn root_peer_id(&self) -> Option<PeerId> {
        self.inner.tree.root().map(|r| r.peer_id())
    }

    /// Registers a channel for messages of type `T`. Every inbound
    /// envelope whose type id matches `T`'s is decoded and pushed here
    /// as soon as it arrives. Exactly one channel or handler may be
    /// registered per type.
    pub fn register_channel<T>(&self) -> MessageRx<T>
    where
        T: WireType + Send + 'static,
    {
        let (tx, rx) = channel::new_message_channel(CHANNEL_BOUND);
        self.insert_handler::<T>(move |_from, value| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(value).await;
            })
        });
        rx
    }

    /// Registers an *aggregate* channel for messages of type `T`:
    /// messages arriving from a child are buffered until one has
    /// arrived from every child, then delivered as a single `Vec<T>`
    /// batch and the buffer is cleared. A message arriving from the
    /// parent bypasses the buffer and is delivered immediately as a
    /// one-element batch.
    pub fn register_aggregate_channel<T>(&self) -> MessageRx<Vec<T>>
    where
        T: WireType + Send + 'static,
    {
        let (tx, rx) = channel::new_message_channel(CHANNEL_BOUND);
        let aggregator = self.aggregator::<T>();
        self.insert_handler::<T>(move |from, value| {
            let tx = tx.clone();
            let batch = aggregator.push(from, value);
            Box::pin(async move {
                if let Some(batch) = batch {
                    tx.send(batch).await;
                }
            })
        });
        rx
    }

    /// Registers a plain callback for messages of type `T`, invoked
    /// synchronously in this instance's dispatcher task.
    pub fn register_handler<T, F>(&self, handler: F)
    where
        T: WireType + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.insert_handler::<T>(move |_from, value| {
            handler(value);
            Box::pin(async {})
        });
    }

    /// Registers an aggregating callback for messages of type `T`,
    /// invoked once a full batch from every child (or one message from
    /// the parent) is ready. Aggregation semantics identical to
    /// [`TreeNodeInstance::register_aggregate_channel`].
    pub fn register_aggregate_handler<T, F>(&self, handler: F)
    where
        T: WireType + Send + 'static,
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let aggregator = self.aggregator::<T>();
        self.insert_handler::<T>(move |from, value| {
            if let Some(batch) = aggregator.push(from, value) {
                handler(batch);
            }
            Box::pin(async {})
        });
    }

    fn aggregator<T: Send + 'static>(&self) -> Aggregator<T> {
        Aggregator { expected: self.children().len(), parent: self.parent(), buffer: Arc::new(Mutex::new(Vec::new())) }
    }

    fn insert_handler<T>(&self, f: impl Fn(TreeNodeId, T) -> DispatchFuture + Send + Sync + 'static)
    where
        T: WireType + Send + 'static,
    {
        let type_id = serialize::type_id::<T>();
        self.inner.registry.lock().insert(
            type_id,
            Box::new(move |from, bytes| match serialize::decode::<T>(&bytes) {
                Ok(value) => f(from, value),
                Err(_) => {
                    tracing::warn!(r#type = T::NAME, "dropping message that failed to decode");
                    Box::pin(async {})
                }
            }),
        );
    }

    /// Pushes a freshly arrived envelope onto this instance's queue.
    /// Non-blocking: a full queue drops the message, matching the
    /// overlay's invariant that routing never waits on a slow protocol.
    pub(crate) fn route(&self, envelope: Envelope) {
        if !self.inner.raw_tx.try_send(envelope) {
            tracing::warn!(token = ?self.inner.token, "dropping envelope: instance queue is full or closed");
        }
    }

    /// Sends a message of type `T` to a specific tree node.
    pub fn send_to<T: WireType>(&self, to: TreeNodeId, message: &T) -> Result<()> {
        let bytes = serialize::encode(message)?;
        let type_id = serialize::type_id::<T>();
        self.inner.overlay.send_to_tree_node(self.inner.token, to, type_id, bytes)
    }

    /// Sends a message of type `T` to this node's parent. A no-op for
    /// the root, which has none.
    pub fn send_to_parent<T: WireType>(&self, message: &T) -> Result<()> {
        match self.parent() {
            Some(parent) => self.send_to(parent, message),
            None => Ok(()),
        }
    }

    /// Sends a message of type `T` to every direct child.
    pub fn send_to_children<T: WireType>(&self, message: &T) -> Result<()> {
        for child in self.children() {
            self.send_to(child, message)?;
        }
        Ok(())
    }

    /// Sends a message of type `T` to every other node in the tree.
    pub fn broadcast<T: WireType>(&self, message: &T) -> Result<()> {
        let mine = self.my_tree_node_id();
        let mut stack: Vec<_> = self.inner.tree.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            if node.id() != mine {
                self.send_to(node.id(), message)?;
            }
            stack.extend(node.children());
        }
        Ok(())
    }

    /// Stops the dispatcher, removes this instance from its `Overlay`,
    /// and invokes the on-done callback if one was registered.
    /// Idempotent.
    pub fn done(&self) {
        if self.inner.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.overlay.remove_instance(instance_key(&self.inner.token));
        if let Some(stop_tx) = self.inner.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        if let Some(cb) = self.inner.on_done.lock().take() {
            cb();
        }
    }
}

/// Buffers messages of type `T` arriving from children until every
/// child has reported, per the aggregation rule in
/// [`TreeNodeInstance::register_aggregate_channel`].
struct Aggregator<T> {
    expected: usize,
    parent: Option<TreeNodeId>,
    buffer: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Aggregator<T> {
    fn clone(&self) -> Self {
        Self { expected: self.expected, parent: self.parent, buffer: self.buffer.clone() }
    }
}

impl<T> Aggregator<T> {
    /// Folds one more message in. Returns the completed batch once
    /// `len(buffer) == len(children)`, or immediately for a
    /// from-the-parent message.
    fn push(&self, from: TreeNodeId, value: T) -> Option<Vec<T>> {
        if Some(from) == self.parent {
            return Some(vec![value]);
        }
        let mut buffer = self.buffer.lock();
        buffer.push(value);
        if buffer.len() >= self.expected {
            Some(std::mem::take(&mut *buffer))
        } else {
            None
        }
    }
}

/// Drains `raw_rx` until either the channel closes or `stop_rx` fires,
/// decoding and delivering one envelope at a time so that per-instance
/// message order is preserved.
fn spawn_dispatcher(inner: Arc<Inner>, mut raw_rx: MessageRx<Envelope>, mut stop_rx: tokio::sync::oneshot::Receiver<()>) {
    crate::runtime::async_exec::spawn(async move {
        loop {
            tokio::select! {
                envelope = raw_rx.recv() => {
                    match envelope {
                        Some(envelope) => dispatch_one(&inner, envelope).await,
                        None => break,
                    }
                }
                _ = &mut stop_rx => break,
            }
        }
    });
}

async fn dispatch_one(inner: &Arc<Inner>, envelope: Envelope) {
    let fut = {
        let registry = inner.registry.lock();
        registry.get(&envelope.type_id()).map(|h| h(envelope.from.tree_node_id, envelope.inner_bytes))
    };
    match fut {
        Some(fut) => fut.await,
        None => tracing::warn!(token = ?envelope.to, "dropping envelope: no channel or handler registered for its type"),
    }
}

/// The overlay's handle onto a running instance: just enough to route
/// envelopes into it and tell it to wind down.
#[derive(Clone)]
pub struct InstanceHandle {
    instance: TreeNodeInstance,
}

impl InstanceHandle {
    pub(crate) fn new<P: ProtocolInstance + 'static>(protocol: &Arc<P>) -> Self {
        InstanceHandle { instance: protocol.instance().clone() }
    }

    pub(crate) fn deliver(&self, envelope: Envelope) {
        self.instance.route(envelope);
    }

    pub(crate) async fn shutdown(&self) {
        self.instance.done();
    }
}

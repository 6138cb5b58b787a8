//! A prepare/count protocol: the root floods a `Prepare` down the tree,
//! every node reports its subtree size back up as a `NodeIsUp`, and the
//! root publishes the grand total once every direct child has reported,
//! or finishes with just its own count if a timeout elapses first.
//!
//! Supplements the CoSi protocol with a second, much simpler
//! [`ProtocolInstance`] that exercises the same [`TreeNodeInstance`]
//! surface with a bounded per-instance timeout layered on top.

use std::sync::Arc;
use std::time::Duration;

use futures_timer::Delay;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::runtime::communication::channel::MessageRx;
use crate::runtime::communication::serialize::{self, WireType};
use crate::runtime::error::*;
use crate::runtime::instance::TreeNodeInstance;
use crate::runtime::protocol::ProtocolInstance;

/// Default deadline the root waits for every direct child's subtree to
/// report in before publishing a partial total.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Serialize, Deserialize)]
struct Prepare;

impl WireType for Prepare {
    const NAME: &'static str = "count/Prepare";
}

#[derive(Clone, Serialize, Deserialize)]
struct NodeIsUp {
    subtree_size: u32,
}

impl WireType for NodeIsUp {
    const NAME: &'static str = "count/NodeIsUp";
}

/// Registers this protocol's wire types. Called once from
/// [`crate::runtime::communication::serialize::init_registry`].
pub fn register_types() {
    serialize::register::<Prepare>();
    serialize::register::<NodeIsUp>();
}

/// One node's participation in a single count round.
pub struct Count {
    instance: TreeNodeInstance,
    timeout: Duration,
    finished: Mutex<bool>,
    aggregate_rx: Mutex<Option<MessageRx<Vec<NodeIsUp>>>>,
    result_tx: Mutex<Option<oneshot::Sender<u32>>>,
    result_rx: Mutex<Option<oneshot::Receiver<u32>>>,
}

impl Count {
    pub fn new(instance: TreeNodeInstance, timeout: Duration) -> Self {
        let (result_tx, result_rx) = oneshot::channel();
        Self {
            instance,
            timeout,
            finished: Mutex::new(false),
            aggregate_rx: Mutex::new(None),
            result_tx: Mutex::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
        }
    }

    /// Blocks the caller (the root, in practice) until the count is
    /// published. Can only be awaited once.
    pub async fn total(&self) -> Result<u32> {
        let rx = self.result_rx.lock().take().ok_or(()).simple(ErrorKind::ProtocolCount)?;
        rx.await.simple(ErrorKind::ProtocolCount)
    }

    fn finish(&self, total: u32) {
        let mut finished = self.finished.lock();
        if *finished {
            return;
        }
        *finished = true;
        drop(finished);
        if let Some(tx) = self.result_tx.lock().take() {
            let _ = tx.send(total);
        }
    }

    async fn drive_prepare(self: Arc<Self>, mut rx: MessageRx<Prepare>) {
        if self.instance.is_root() {
            return;
        }
        if rx.recv().await.is_none() {
            return;
        }
        let _ = self.instance.send_to_children(&Prepare);
        self.collect().await;
    }

    /// Sums this node's own count against whatever its direct children
    /// report, racing the round's timeout. `register_aggregate_channel`
    /// delivers exactly one batch once every child has reported; if the
    /// timeout wins the race instead, this node gives up on its subtree
    /// and reports (or finishes, at the root) just its own count.
    async fn collect(self: &Arc<Self>) {
        let children = self.instance.children().len();

        let total = if children == 0 {
            1
        } else {
            let mut rx = self.aggregate_rx.lock().take().expect("collect runs once");
            tokio::select! {
                batch = rx.recv() => 1 + batch.map(|b| b.iter().map(|r| r.subtree_size).sum::<u32>()).unwrap_or(0),
                _ = Delay::new(self.timeout) => 1,
            }
        };

        if self.instance.is_root() {
            self.finish(total);
        } else {
            let _ = self.instance.send_to_parent(&NodeIsUp { subtree_size: total });
        }
    }
}

impl ProtocolInstance for Count {
    fn instance(&self) -> &TreeNodeInstance {
        &self.instance
    }

    fn start(self: Arc<Self>) {
        let prepare_rx = self.instance.register_channel::<Prepare>();
        if !self.instance.children().is_empty() {
            *self.aggregate_rx.lock() = Some(self.instance.register_aggregate_channel::<NodeIsUp>());
        }

        crate::runtime::async_exec::spawn(self.clone().drive_prepare(prepare_rx));

        if self.instance.is_root() {
            let _ = self.instance.send_to_children(&Prepare);
            let this = self.clone();
            crate::runtime::async_exec::spawn(async move { this.collect().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_types_is_idempotent() {
        register_types();
        register_types();
    }
}

//! Coverage for a custom message type traveling end to end between two
//! tree nodes, and for the lazy pull that materializes an unknown tree
//! and roster when an envelope references them.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_timer::Delay;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sigtree::serialize::WireType;
use sigtree::{InstanceToken, ProtocolInstance, Roster, Tree, TreeNodeInstance};

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
struct Ping {
    value: i64,
}

impl WireType for Ping {
    const NAME: &'static str = "echo_and_lazy_pull::Ping";
}

/// The simplest possible `ProtocolInstance`: a leaf sends one `Ping` up
/// to its parent; the root collects it into a `oneshot`.
struct Echo {
    instance: TreeNodeInstance,
    value: i64,
    result_tx: parking_lot::Mutex<Option<oneshot::Sender<i64>>>,
    result_rx: parking_lot::Mutex<Option<oneshot::Receiver<i64>>>,
}

impl Echo {
    fn new(instance: TreeNodeInstance, value: i64) -> Self {
        let (result_tx, result_rx) = oneshot::channel();
        Self {
            instance,
            value,
            result_tx: parking_lot::Mutex::new(Some(result_tx)),
            result_rx: parking_lot::Mutex::new(Some(result_rx)),
        }
    }

    async fn received(&self) -> i64 {
        let rx = self.result_rx.lock().take().expect("awaited once");
        rx.await.expect("a ping arrives")
    }
}

impl ProtocolInstance for Echo {
    fn instance(&self) -> &TreeNodeInstance {
        &self.instance
    }

    fn start(self: Arc<Self>) {
        let mut rx = self.instance.register_channel::<Ping>();
        if self.instance.is_root() {
            let this = self.clone();
            sigtree::spawn(async move {
                if let Some(ping) = rx.recv().await {
                    if let Some(tx) = this.result_tx.lock().take() {
                        let _ = tx.send(ping.value);
                    }
                }
            });
        } else {
            let _ = self.instance.send_to_parent(&Ping { value: self.value });
        }
    }
}

#[test]
fn a_leaf_pings_its_parent_over_the_wire() {
    common::ensure_init();
    sigtree::block_on(async {
        let (root_host, root_id, _) = common::spawn_host(common::free_addr()).await;
        let (leaf_host, leaf_id, _) = common::spawn_host(common::free_addr()).await;

        let roster = Roster::new(vec![root_id.clone(), leaf_id.clone()]);
        let tree = Tree::balanced(roster.id(), &[root_id.id(), leaf_id.id()], 2);

        root_host.register_roster(roster.clone());
        root_host.register_tree(tree.clone());
        leaf_host.register_roster(roster);
        leaf_host.register_tree(tree.clone());

        let protocol_id = Uuid::new_v4();
        let round_id = Uuid::new_v4();

        let root_echo = root_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Echo::new(tni, 0))
            .expect("root joins");
        leaf_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Echo::new(tni, 3))
            .expect("leaf joins");

        assert_eq!(root_echo.received().await, 3);

        root_host.close().await.expect("root closes");
        leaf_host.close().await.expect("leaf closes");
    });
}

#[test]
fn an_envelope_for_an_unknown_tree_triggers_a_lazy_pull() {
    common::ensure_init();
    sigtree::block_on(async {
        let (h1, id1, _) = common::spawn_host(common::free_addr()).await;
        let (h2, id2, _) = common::spawn_host(common::free_addr()).await;

        let roster = Roster::new(vec![id1.clone(), id2.clone()]);
        let tree = Tree::balanced(roster.id(), &[id1.id(), id2.id()], 2);

        // only h1 knows the roster/tree up front; h2 starts blind
        h1.register_roster(roster.clone());
        h1.register_tree(tree.clone());

        let h1_node = tree.find_by_peer(id1.id()).expect("h1 has a node in the tree");
        let h2_node = tree.find_by_peer(id2.id()).expect("h2 has a node in the tree");
        let from = InstanceToken::new(tree.roster_id(), tree.id(), Uuid::new_v4(), Uuid::new_v4(), h1_node.id());

        h1.overlay()
            .send_to_tree_node(from, h2_node.id(), [0u8; 16], b"opaque payload".to_vec())
            .expect("h1 addresses an envelope at h2's tree node");

        // give the RequestTree/SendTree/RequestRoster/SendRoster round
        // trip a few beats to settle
        Delay::new(Duration::from_millis(200)).await;

        assert!(h2.overlay().tree(tree.id()).is_some(), "h2 pulled the tree it didn't know");
        assert!(h2.overlay().roster(roster.id()).is_some(), "h2 pulled the roster behind the tree");

        h1.close().await.expect("h1 closes");
        h2.close().await.expect("h2 closes");
    });
}

/// A `ProtocolInstance` that forwards the first `Ping` it receives
/// straight to a test-provided `oneshot::Sender`, used to observe a
/// protocol instance the test never called `start_protocol` for itself.
struct Catcher {
    instance: TreeNodeInstance,
    caught: parking_lot::Mutex<Option<oneshot::Sender<i64>>>,
}

impl ProtocolInstance for Catcher {
    fn instance(&self) -> &TreeNodeInstance {
        &self.instance
    }

    fn start(self: Arc<Self>) {
        let mut rx = self.instance.register_channel::<Ping>();
        sigtree::spawn(async move {
            if let Some(ping) = rx.recv().await {
                if let Some(tx) = self.caught.lock().take() {
                    let _ = tx.send(ping.value);
                }
            }
        });
    }
}

#[test]
fn a_message_for_a_never_started_instance_lazily_creates_it() {
    common::ensure_init();
    sigtree::block_on(async {
        let (root_host, root_id, _) = common::spawn_host(common::free_addr()).await;
        let (leaf_host, leaf_id, _) = common::spawn_host(common::free_addr()).await;

        let roster = Roster::new(vec![root_id.clone(), leaf_id.clone()]);
        let tree = Tree::balanced(roster.id(), &[root_id.id(), leaf_id.id()], 2);

        root_host.register_roster(roster.clone());
        root_host.register_tree(tree.clone());
        leaf_host.register_roster(roster);
        leaf_host.register_tree(tree.clone());

        let protocol_id = Uuid::new_v4();
        let round_id = Uuid::new_v4();

        // the root never calls `start_protocol` itself; it only
        // registers a factory ahead of time, and the leaf's ping should
        // be enough to materialize its instance on the spot
        let (caught_tx, caught_rx) = oneshot::channel::<i64>();
        let caught_tx = parking_lot::Mutex::new(Some(caught_tx));
        root_host.overlay().register_protocol_factory(protocol_id, move |tni| Catcher {
            instance: tni,
            caught: parking_lot::Mutex::new(caught_tx.lock().take()),
        });

        leaf_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Echo::new(tni, 7))
            .expect("leaf joins");

        let value = caught_rx.await.expect("the factory ran once the leaf's ping arrived");
        assert_eq!(value, 7);

        root_host.close().await.expect("root closes");
        leaf_host.close().await.expect("leaf closes");
    });
}

//! End-to-end coverage of the connection lifecycle: dial, handshake,
//! and a clean close followed by listening again on a new address.

mod common;

use std::time::Duration;

use futures_timer::Delay;

use sigtree::{Roster, Tree};

#[test]
fn two_hosts_handshake_and_register_a_shared_tree() {
    common::ensure_init();
    sigtree::block_on(async {
        let (h1, id1, _) = common::spawn_host(common::free_addr()).await;
        let (h2, id2, _) = common::spawn_host(common::free_addr()).await;

        h2.connect(&id1).await.expect("h2 dials h1");
        // give the spun-up receive loop a beat to register on both ends
        Delay::new(Duration::from_millis(50)).await;

        let roster = Roster::new(vec![id1.clone(), id2.clone()]);
        let tree = Tree::balanced(roster.id(), &[id1.id(), id2.id()], 2);

        h1.register_roster(roster.clone());
        h1.register_tree(tree.clone());
        h2.register_roster(roster);
        h2.register_tree(tree.clone());

        assert_eq!(tree.root().expect("root exists").peer_id(), id1.id());
        assert_eq!(tree.root().expect("root exists").children().count(), 1);

        h1.close().await.expect("h1 closes");
        h2.close().await.expect("h2 closes");
    });
}

#[test]
fn a_host_can_listen_again_on_a_new_address_after_closing() {
    common::ensure_init();
    sigtree::block_on(async {
        let (h1, id1, _) = common::spawn_host(common::free_addr()).await;
        let (h2, _, _) = common::spawn_host(common::free_addr()).await;

        h2.connect(&id1).await.expect("first connect succeeds");
        h1.close().await.expect("h1 closes");
        h2.close().await.expect("h2 closes");

        // a brand new host, as if h1 came back up listening somewhere else
        let (h1_reopened, id1_reopened, _) = common::spawn_host(common::free_addr()).await;
        h2.connect(&id1_reopened).await.expect("reconnect to the new address succeeds");
        h1_reopened.close().await.expect("second close succeeds");
    });
}

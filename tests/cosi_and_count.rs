//! End-to-end coverage of the two bundled protocols over a real
//! three-host, root-plus-two-leaves tree connected through actual
//! TCP+TLS sockets: collective Schnorr signing and subtree counting.

mod common;

use std::time::Duration;

use uuid::Uuid;

use sigtree::protocols::{Cosi, Count};
use sigtree::{schnorr, Roster, Tree};

#[test]
fn three_hosts_produce_a_verifiable_collective_signature() {
    common::ensure_init();
    sigtree::block_on(async {
        let (root_host, root_id, root_key) = common::spawn_host(common::free_addr()).await;
        let (leaf1_host, leaf1_id, leaf1_key) = common::spawn_host(common::free_addr()).await;
        let (leaf2_host, leaf2_id, leaf2_key) = common::spawn_host(common::free_addr()).await;

        let roster = Roster::new(vec![root_id.clone(), leaf1_id.clone(), leaf2_id.clone()]);
        let tree = Tree::balanced(roster.id(), &[root_id.id(), leaf1_id.id(), leaf2_id.id()], 2);

        for host in [&root_host, &leaf1_host, &leaf2_host] {
            host.register_roster(roster.clone());
            host.register_tree(tree.clone());
        }

        let public_keys = vec![root_key.public_key(), leaf1_key.public_key(), leaf2_key.public_key()];
        let message = b"ready for launch".to_vec();
        let protocol_id = Uuid::new_v4();
        let round_id = Uuid::new_v4();

        // leaves first, so their channels are registered before the
        // root's announcement can possibly reach them
        let leaf1_cosi = leaf1_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Cosi::new(tni, leaf1_key, Vec::new(), Vec::new()))
            .expect("leaf1 joins the round");
        let leaf2_cosi = leaf2_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Cosi::new(tni, leaf2_key, Vec::new(), Vec::new()))
            .expect("leaf2 joins the round");

        let root_cosi = root_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Cosi::new(tni, root_key, public_keys.clone(), message.clone()))
            .expect("root starts the round");

        let signature = root_cosi.signature().await.expect("collective signature is produced");
        schnorr::verify_signature(&public_keys, &message, &signature).expect("signature verifies against the roster");

        // the leaves never produce a result of their own; they're only
        // driven to completion so their final `send_to_parent` actually
        // lands before the hosts are torn down
        drop(leaf1_cosi);
        drop(leaf2_cosi);

        root_host.close().await.expect("root closes");
        leaf1_host.close().await.expect("leaf1 closes");
        leaf2_host.close().await.expect("leaf2 closes");
    });
}

#[test]
fn three_hosts_count_the_whole_tree() {
    common::ensure_init();
    sigtree::block_on(async {
        let (root_host, root_id, _) = common::spawn_host(common::free_addr()).await;
        let (leaf1_host, leaf1_id, _) = common::spawn_host(common::free_addr()).await;
        let (leaf2_host, leaf2_id, _) = common::spawn_host(common::free_addr()).await;

        let roster = Roster::new(vec![root_id.clone(), leaf1_id.clone(), leaf2_id.clone()]);
        let tree = Tree::balanced(roster.id(), &[root_id.id(), leaf1_id.id(), leaf2_id.id()], 2);

        for host in [&root_host, &leaf1_host, &leaf2_host] {
            host.register_roster(roster.clone());
            host.register_tree(tree.clone());
        }

        let protocol_id = Uuid::new_v4();
        let round_id = Uuid::new_v4();
        let timeout = Duration::from_secs(5);

        let _leaf1_count = leaf1_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Count::new(tni, timeout))
            .expect("leaf1 joins the count");
        let _leaf2_count = leaf2_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Count::new(tni, timeout))
            .expect("leaf2 joins the count");

        let root_count = root_host
            .overlay()
            .start_protocol(protocol_id, round_id, &tree, |tni| Count::new(tni, timeout))
            .expect("root starts the count");

        let total = root_count.total().await.expect("count completes before the timeout");
        assert_eq!(total, 3);

        root_host.close().await.expect("root closes");
        leaf1_host.close().await.expect("leaf1 closes");
        leaf2_host.close().await.expect("leaf2 closes");
    });
}

#[test]
fn a_lone_root_counts_itself_without_waiting_for_children() {
    common::ensure_init();
    sigtree::block_on(async {
        let (root_host, root_id, _) = common::spawn_host(common::free_addr()).await;

        let roster = Roster::new(vec![root_id.clone()]);
        let tree = Tree::balanced(roster.id(), &[root_id.id()], 2);
        root_host.register_roster(roster);
        root_host.register_tree(tree.clone());

        let root_count = root_host
            .overlay()
            .start_protocol(Uuid::new_v4(), Uuid::new_v4(), &tree, |tni| Count::new(tni, Duration::from_millis(50)))
            .expect("root starts the count");

        let total = root_count.total().await.expect("a childless root finishes immediately");
        assert_eq!(total, 1);

        root_host.close().await.expect("root closes");
    });
}

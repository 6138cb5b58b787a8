//! A `Tree` overlays a parent/child structure on top of a [`super::Roster`].
//! Stored as a flat arena (`Vec<TreeNodeData>` indexed by
//! [`TreeNodeIndex`]) rather than a pointer graph, so the whole
//! structure is `Clone` and trivially shareable across tasks.

use uuid::Uuid;

use crate::runtime::communication::message::{PeerId, RosterId, TreeId, TreeNodeId, TreeNodeMarshal};

/// An index into a [`Tree`]'s node arena.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TreeNodeIndex(usize);

#[derive(Clone, Debug)]
struct TreeNodeData {
    id: TreeNodeId,
    peer_id: PeerId,
    parent: Option<TreeNodeIndex>,
    children: Vec<TreeNodeIndex>,
}

/// A read-only view of one node in a [`Tree`].
#[derive(Copy, Clone, Debug)]
pub struct TreeNode<'a> {
    tree: &'a Tree,
    index: TreeNodeIndex,
}

impl<'a> TreeNode<'a> {
    pub fn id(&self) -> TreeNodeId {
        self.data().id
    }

    pub fn peer_id(&self) -> PeerId {
        self.data().peer_id
    }

    pub fn index(&self) -> TreeNodeIndex {
        self.index
    }

    pub fn is_root(&self) -> bool {
        self.data().parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.data().children.is_empty()
    }

    pub fn parent(&self) -> Option<TreeNode<'a>> {
        self.data().parent.map(|i| self.tree.node(i))
    }

    pub fn children(&self) -> impl Iterator<Item = TreeNode<'a>> + 'a {
        let tree = self.tree;
        self.data().children.clone().into_iter().map(move |i| tree.node(i))
    }

    fn data(&self) -> &'a TreeNodeData {
        &self.tree.nodes[self.index.0]
    }
}

/// A rooted tree over the peers of a [`super::Roster`]. Its id is a
/// v5-UUID derived from the roster id and the root peer's id, so two
/// hosts that independently build "the same" tree agree on its id
/// without exchanging one.
#[derive(Clone, Debug)]
pub struct Tree {
    id: TreeId,
    roster_id: RosterId,
    nodes: Vec<TreeNodeData>,
    root: TreeNodeIndex,
}

impl Tree {
    /// Builds a tree id deterministically: `v5-UUID(roster-id ‖
    /// root-peer-id)`.
    fn derive_id(roster_id: RosterId, root_peer_id: PeerId) -> TreeId {
        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(roster_id.as_bytes());
        bytes.extend_from_slice(root_peer_id.as_bytes());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes)
    }

    /// Builds a balanced N-ary tree over `members`, with `members[0]`
    /// as the root and a branching factor of `fan_out` children per
    /// node.
    pub fn balanced(roster_id: RosterId, members: &[PeerId], fan_out: usize) -> Self {
        assert!(!members.is_empty(), "a tree needs at least a root");
        let fan_out = fan_out.max(1);

        let mut nodes: Vec<TreeNodeData> = members
            .iter()
            .map(|&peer_id| TreeNodeData { id: Uuid::new_v4(), peer_id, parent: None, children: Vec::new() })
            .collect();

        for i in 1..nodes.len() {
            let parent_idx = (i - 1) / fan_out;
            nodes[i].parent = Some(TreeNodeIndex(parent_idx));
            let child_idx = TreeNodeIndex(i);
            nodes[parent_idx].children.push(child_idx);
        }

        let id = Self::derive_id(roster_id, members[0]);
        Self { id, roster_id, nodes, root: TreeNodeIndex(0) }
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn roster_id(&self) -> RosterId {
        self.roster_id
    }

    pub fn root(&self) -> Option<TreeNode<'_>> {
        self.nodes.get(self.root.0).map(|_| self.node(self.root))
    }

    pub fn node(&self, index: TreeNodeIndex) -> TreeNode<'_> {
        TreeNode { tree: self, index }
    }

    pub fn find(&self, node_id: TreeNodeId) -> Option<TreeNode<'_>> {
        self.nodes.iter().position(|n| n.id == node_id).map(|i| self.node(TreeNodeIndex(i)))
    }

    pub fn find_by_peer(&self, peer_id: PeerId) -> Option<TreeNode<'_>> {
        self.nodes.iter().position(|n| n.peer_id == peer_id).map(|i| self.node(TreeNodeIndex(i)))
    }

    pub fn to_marshal(&self) -> super::super::communication::message::TreeMarshal {
        super::super::communication::message::TreeMarshal {
            tree_id: self.id,
            roster_id: self.roster_id,
            root: self.root().map(|r| self.marshal_subtree(r)),
        }
    }

    fn marshal_subtree(&self, node: TreeNode<'_>) -> TreeNodeMarshal {
        TreeNodeMarshal {
            node_id: node.id(),
            peer_id: node.peer_id(),
            children: node.children().map(|c| self.marshal_subtree(c)).collect(),
        }
    }

    pub fn from_marshal(tree_id: TreeId, roster_id: RosterId, root: TreeNodeMarshal) -> Self {
        let mut nodes = Vec::new();
        let root_idx = Self::unmarshal_subtree(&mut nodes, &root, None);
        Self { id: tree_id, roster_id, nodes, root: root_idx }
    }

    fn unmarshal_subtree(nodes: &mut Vec<TreeNodeData>, marshal: &TreeNodeMarshal, parent: Option<TreeNodeIndex>) -> TreeNodeIndex {
        let index = TreeNodeIndex(nodes.len());
        nodes.push(TreeNodeData { id: marshal.node_id, peer_id: marshal.peer_id, parent, children: Vec::new() });
        let children: Vec<TreeNodeIndex> =
            marshal.children.iter().map(|c| Self::unmarshal_subtree(nodes, c, Some(index))).collect();
        nodes[index.0].children = children;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(n: usize) -> Vec<PeerId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn balanced_tree_assigns_every_member_a_parent_except_root() {
        let roster_id = Uuid::new_v4();
        let members = peers(7);
        let tree = Tree::balanced(roster_id, &members, 2);
        let root = tree.root().unwrap();
        assert!(root.is_root());
        assert_eq!(root.children().count(), 2);
        for node_id in members.iter().skip(1) {
            let node = tree.find_by_peer(*node_id).unwrap();
            assert!(node.parent().is_some());
        }
    }

    #[test]
    fn tree_id_is_deterministic_given_roster_and_root() {
        let roster_id = Uuid::new_v4();
        let members = peers(4);
        let a = Tree::balanced(roster_id, &members, 2);
        let b = Tree::balanced(roster_id, &members, 2);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn marshal_roundtrip_preserves_structure() {
        let roster_id = Uuid::new_v4();
        let members = peers(5);
        let tree = Tree::balanced(roster_id, &members, 2);
        let marshal = tree.to_marshal();
        let rebuilt = Tree::from_marshal(marshal.tree_id, marshal.roster_id, marshal.root.unwrap());
        assert_eq!(rebuilt.root().unwrap().children().count(), tree.root().unwrap().children().count());
    }
}

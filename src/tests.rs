extern crate std;

use std::{ops::Range, prelude::v1::*, ptr::NonNull};

use cordyceps::Linked;
use proptest::prelude::*;

use crate::map::AvlMap;
use crate::model::{self, TestNode};

use super::*;

fn key_of(node: Option<NonNull<TestNode>>) -> Option<u32> {
    node.map(|node| unsafe { node.as_ref().key })
}

fn root_key(tree: &AvlTree<TestNode>) -> Option<u32> {
    key_of(tree.root)
}

fn children_of(tree: &AvlTree<TestNode>, key: u32) -> (Option<u32>, Option<u32>) {
    let node = tree.get_raw(&key).expect("key not found");

    unsafe {
        let links = TestNode::links(node);
        (
            key_of(links.as_ref().left()),
            key_of(links.as_ref().right()),
        )
    }
}

fn tree_of(keys: &[u32]) -> AvlTree<TestNode> {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for &key in keys {
        tree.insert(TestNode::new(key)).expect("keys are distinct");
        tree.assert_invariants();
    }

    tree
}

fn insert_find_all(keys: &[u32]) {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for &key in keys {
        tree.insert(Box::new(TestNode {
            links: Links::new(),
            key,
        }))
        .expect("keys are distinct");
        tree.assert_invariants();
        assert!(tree.is_avl());
    }

    for key in keys {
        let node = tree.get_raw(key).expect("item not found");
        assert_eq!(unsafe { node.as_ref().key() }, key);
    }
}

#[test]
fn zero_elems_find() {
    insert_find_all(&[]);
}

#[test]
fn single_elem_find() {
    insert_find_all(&[0]);
}

#[test]
fn two_elems_find() {
    insert_find_all(&[0, 1]);
    insert_find_all(&[1, 0]);
}

#[test]
fn three_elems_find() {
    insert_find_all(&[0, 1, 2]);
    insert_find_all(&[0, 2, 1]);
    insert_find_all(&[1, 0, 2]);
    insert_find_all(&[1, 2, 0]);
    insert_find_all(&[2, 0, 1]);
    insert_find_all(&[2, 1, 0]);
}

#[test]
fn four_elems_find() {
    insert_find_all(&[0, 1, 2, 3]);
    insert_find_all(&[0, 1, 3, 2]);
    insert_find_all(&[0, 2, 1, 3]);
    insert_find_all(&[0, 2, 3, 1]);
    insert_find_all(&[0, 3, 1, 2]);
    insert_find_all(&[0, 3, 2, 1]);

    insert_find_all(&[1, 0, 2, 3]);
    insert_find_all(&[1, 0, 3, 2]);
    insert_find_all(&[1, 2, 0, 3]);
    insert_find_all(&[1, 2, 3, 0]);
    insert_find_all(&[1, 3, 0, 2]);
    insert_find_all(&[1, 3, 2, 0]);

    insert_find_all(&[2, 0, 1, 3]);
    insert_find_all(&[2, 0, 3, 1]);
    insert_find_all(&[2, 1, 0, 3]);
    insert_find_all(&[2, 1, 3, 0]);
    insert_find_all(&[2, 3, 0, 1]);
    insert_find_all(&[2, 3, 1, 0]);

    insert_find_all(&[3, 0, 1, 2]);
    insert_find_all(&[3, 0, 2, 1]);
    insert_find_all(&[3, 1, 0, 2]);
    insert_find_all(&[3, 1, 2, 0]);
    insert_find_all(&[3, 2, 0, 1]);
    insert_find_all(&[3, 2, 1, 0]);
}

#[test]
fn empty_tree_is_valid() {
    let tree: AvlTree<TestNode> = AvlTree::new();

    assert!(tree.is_empty());
    assert!(tree.is_bst());
    assert!(tree.is_avl());
    assert_eq!(tree.height(), 0);
    assert_eq!(tree.first().map(|node| node.key), None);
    assert_eq!(tree.last().map(|node| node.key), None);
}

#[test]
fn insert_ascending_rotates_left_at_root() {
    let tree = tree_of(&[1, 2, 3]);

    assert_eq!(root_key(&tree), Some(2));
    assert_eq!(children_of(&tree, 2), (Some(1), Some(3)));
    assert_eq!(tree.height(), 2);
}

#[test]
fn insert_descending_rotates_right_at_root() {
    let tree = tree_of(&[3, 2, 1]);

    assert_eq!(root_key(&tree), Some(2));
    assert_eq!(children_of(&tree, 2), (Some(1), Some(3)));
    assert_eq!(tree.height(), 2);
}

#[test]
fn insert_zigzag_double_rotates_at_root() {
    let tree = tree_of(&[1, 3, 2]);

    assert_eq!(root_key(&tree), Some(2));
    assert_eq!(children_of(&tree, 2), (Some(1), Some(3)));
    assert_eq!(tree.height(), 2);
}

#[test]
fn insert_interior_double_rotation() {
    let tree = tree_of(&[10, 20, 30, 40, 50, 25]);

    assert!(tree.is_avl());
    assert_eq!(root_key(&tree), Some(30));
    assert_eq!(tree.height(), 3);
    assert_eq!(children_of(&tree, 30), (Some(20), Some(40)));
    assert_eq!(children_of(&tree, 20), (Some(10), Some(25)));
    assert_eq!(children_of(&tree, 40), (None, Some(50)));
}

#[test]
fn duplicate_insert_leaves_tree_unchanged() {
    let mut tree = tree_of(&[2, 1, 3]);

    let err = tree
        .insert(TestNode::new(2))
        .err()
        .expect("duplicate key must be rejected");
    assert_eq!(err.into_inner().key, 2);

    assert_eq!(tree.len(), 3);
    assert!(tree.is_bst());
    assert!(tree.is_avl());
    tree.assert_invariants();
}

#[test]
fn len_counts_only_successful_inserts() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for key in [5, 3, 5, 8, 3, 1, 8, 9] {
        let _ = tree.insert(TestNode::new(key));
        tree.assert_invariants();
    }

    assert_eq!(tree.len(), 5);
}

#[test]
fn sequential_inserts_stay_balanced() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for key in 1..=100 {
        tree.insert(TestNode::new(key)).expect("keys are distinct");

        tree.assert_invariants();
        assert!(tree.is_avl());
        assert!(tree.height() <= model::height_bound(tree.len()));
    }

    assert_eq!(tree.len(), 100);
}

#[test]
fn iter_yields_keys_in_ascending_order() {
    let tree = tree_of(&[8, 3, 10, 1, 6, 14, 4, 7, 13]);

    let keys: Vec<u32> = tree.iter().map(|node| node.key).collect();
    assert_eq!(keys, &[1, 3, 4, 6, 7, 8, 10, 13, 14]);
    assert_eq!(tree.iter().len(), tree.len());
}

#[test]
fn postorder_visits_children_before_parents() {
    let tree = tree_of(&[2, 1, 3]);

    let mut keys = Vec::new();
    tree.postorder(|node| keys.push(node.key));

    assert_eq!(keys, &[1, 3, 2]);
}

#[test]
fn rotate_without_pivot_child_is_a_noop() {
    let mut tree = tree_of(&[1]);
    let root = tree.root.expect("tree is nonempty");

    unsafe {
        assert_eq!(tree.rotate_left(root), root);
        assert_eq!(tree.rotate_right(root), root);
    }

    assert_eq!(root_key(&tree), Some(1));
    tree.assert_invariants();
}

#[test]
fn rotations_relink_parents_and_preserve_len() {
    let mut tree = tree_of(&[4, 2, 6, 1, 3, 5, 7]);

    // Rotate an interior subtree and its mirror; order is preserved even
    // though the balance invariant is momentarily the caller's problem.
    let node = tree.get_raw(&2).expect("key not found");
    let new_root = unsafe { tree.rotate_left(node) };
    assert_eq!(unsafe { new_root.as_ref().key }, 3);

    assert_eq!(tree.len(), 7);
    assert!(tree.is_bst());

    let node = tree.get_raw(&3).expect("key not found");
    let new_root = unsafe { tree.rotate_right(node) };
    assert_eq!(unsafe { new_root.as_ref().key }, 2);

    assert_eq!(tree.len(), 7);
    assert!(tree.is_bst());
    tree.assert_invariants();
}

#[test]
fn balance_factor_reflects_subtree_heights() {
    let tree = tree_of(&[4, 2, 6, 1]);

    let root = tree.root.expect("tree is nonempty");
    unsafe {
        assert_eq!(tree.height_of(root), 3);
        assert_eq!(tree.balance_factor(root), 1);

        let leaf = tree.get_raw(&1).expect("key not found");
        assert_eq!(tree.height_of(leaf), 1);
        assert_eq!(tree.balance_factor(leaf), 0);
    }
}

#[test]
fn dotgraph_renders_every_key() {
    let tree = tree_of(&[2, 1, 3]);

    let mut dot = String::new();
    tree.dotgraph("test", &mut dot).expect("fmt::Write to a String cannot fail");

    assert!(dot.starts_with("digraph"));
    for key in ["\"1\"", "\"2\"", "\"3\""] {
        assert!(dot.contains(key), "missing {key} in {dot}");
    }
}

#[test]
fn map_insert_get_and_iterate() {
    let mut map: AvlMap<u32, &str> = AvlMap::new();

    assert!(map.insert(2, "two").is_ok());
    assert!(map.insert(1, "one").is_ok());
    assert!(map.insert(3, "three").is_ok());
    assert_eq!(map.insert(2, "again"), Err((2, "again")));

    assert_eq!(map.len(), 3);
    assert_eq!(map.get(&2), Some(&"two"));
    assert!(map.contains_key(&1));
    assert!(!map.contains_key(&4));

    *map.get_mut(&3).expect("key not found") = "drei";
    assert_eq!(map.get(&3), Some(&"drei"));

    assert_eq!(map.first_key_value(), Some((&1, &"one")));
    assert_eq!(map.last_key_value(), Some((&3, &"drei")));

    let entries: Vec<(u32, &str)> = map.iter().map(|(&k, &v)| (k, v)).collect();
    assert_eq!(entries, &[(1, "one"), (2, "two"), (3, "drei")]);

    map.clear();
    assert!(map.is_empty());
}

#[test]
fn map_from_iterator_keeps_first_occurrence() {
    let map: AvlMap<u32, &str> = [(1, "a"), (2, "b"), (1, "c")].into_iter().collect();

    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&1), Some(&"a"));
    assert_eq!(map.height(), 2);
}

#[cfg(miri)]
const FUZZ_RANGE: Range<usize> = 0..10;

#[cfg(not(miri))]
const FUZZ_RANGE: Range<usize> = 0..1000;

proptest::proptest! {
    #![proptest_config(ProptestConfig {
        max_shrink_iters: 65536,
        .. ProptestConfig::default()
    })]

    #[test]
    fn btree_equivalence(ops in proptest::collection::vec(model::op_strategy(), FUZZ_RANGE)) {
        model::run_btree_equivalence(ops);
    }
}

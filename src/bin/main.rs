use std::ptr::NonNull;

use cordyceps::Linked;
use cordyceps_avl::{AvlTree, Links, TreeNode};

#[derive(Debug)]
#[repr(C)]
struct TestNode {
    links: Links<TestNode>,
    key: u32,
}

impl TestNode {
    fn new(key: u32) -> Box<TestNode> {
        Box::new(TestNode {
            links: Links::new(),
            key,
        })
    }
}

unsafe impl Linked<Links<TestNode>> for TestNode {
    type Handle = Box<TestNode>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        NonNull::new(Box::into_raw(r)).unwrap()
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        unsafe { Box::from_raw(ptr.as_ptr()) }
    }

    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<TestNode>> {
        // SAFETY: Self is #[repr(C)] and `links` is first field
        ptr.cast()
    }
}

impl TreeNode<Links<TestNode>> for TestNode {
    type Key = u32;

    fn key(&self) -> &Self::Key {
        &self.key
    }
}

fn main() {
    let mut tree: AvlTree<TestNode> = AvlTree::new();

    for key in [2, 0, 3, 4, 5, 1, 6] {
        tree.insert(TestNode::new(key)).expect("keys are distinct");
        tree.assert_invariants();
        println!("{:?}", tree.iter().map(|node| node.key).collect::<Vec<_>>());
    }

    assert!(tree.is_avl());
    println!("height: {}", tree.height());

    let mut dot = String::new();
    tree.dotgraph("demo", &mut dot)
        .expect("writing to a String cannot fail");
    println!("{dot}");

    drop(tree);
}

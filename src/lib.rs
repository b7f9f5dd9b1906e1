//! An intrusive AVL tree.

// Conventions used in comments:
// - The height of a node `x` is denoted `h(x)`, with `h(nil) = 0`.
// - The balance factor of `x` is `bf(x) = h(left(x)) - h(right(x))`.
//
// The fundamental invariants of an AVL tree are:
// 1. BST order: keys in the left subtree of `x` are less than the key of `x`,
//    which is less than the keys in its right subtree.
// 2. Balance: `bf(x)` is -1, 0 or 1 for every node `x`.
//
// Every node caches `h(x)` in its links. The cache is refreshed along the
// insertion path and by rotations, so it is exact between public operations.

use core::{
    borrow::Borrow, cell::UnsafeCell, cmp::Ordering, fmt, marker::PhantomPinned, mem, ops::Not,
    pin::Pin, ptr::NonNull,
};

use cordyceps::Linked;
use thiserror::Error;

mod debug;
mod iter;
pub mod map;
#[cfg(any(test, feature = "model"))]
pub mod model;
#[cfg(test)]
mod tests;

pub use iter::Iter;

pub trait TreeNode<L>: Linked<L> {
    type Key: Ord;

    fn key(&self) -> &Self::Key;
}

/// An intrusive AVL tree.
///
/// The tree never allocates: items are linked in via the node type's embedded
/// [`Links`] and owned by the tree as `T::Handle`s until removed by
/// [`clear`][AvlTree::clear] or `Drop`.
pub struct AvlTree<T>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    root: Link<T>,
    len: usize,
}

pub struct Links<T: ?Sized> {
    inner: UnsafeCell<LinksInner<T>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Dir {
    Left = 0,
    Right = 1,
}

impl Not for Dir {
    type Output = Dir;

    fn not(self) -> Self::Output {
        match self {
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }
}

#[repr(C)]
struct LinksInner<T: ?Sized> {
    parent: Link<T>,
    children: [Link<T>; 2],
    height: i8,
    _unpin: PhantomPinned,
}

type Link<T> = Option<NonNull<T>>;

/// The error returned when [`AvlTree::insert`] rejects an item.
#[derive(Debug, Error)]
pub enum InsertError<H> {
    /// A node with an equal key is already in the tree.
    ///
    /// The rejected item is carried in the error, so the caller regains
    /// ownership of it.
    #[error("key is already present in the tree")]
    Duplicate(H),
}

impl<H> InsertError<H> {
    /// Consumes the error, returning the rejected item.
    pub fn into_inner(self) -> H {
        match self {
            InsertError::Duplicate(item) => item,
        }
    }
}

impl<T> AvlTree<T>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    /// Returns a new empty tree.
    pub const fn new() -> AvlTree<T> {
        AvlTree { root: None, len: 0 }
    }

    /// Returns `true` if the tree contains no elements.
    pub const fn is_empty(&self) -> bool {
        let empty = self.len() == 0;

        if cfg!(debug_assertions) {
            // Can't use assert_eq!() in const fn.
            assert!(empty == self.root.is_none());
        }

        empty
    }

    /// Returns the number of elements in the tree.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns the height of the tree.
    ///
    /// The empty tree has height 0; a tree holding a single element has
    /// height 1.
    pub fn height(&self) -> i8 {
        unsafe { self.height_raw(self.root) }
    }

    /// Returns the cached height of the subtree rooted at `node`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` is an element of `self`, and not of
    /// any other tree.
    pub unsafe fn height_of(&self, node: NonNull<T>) -> i8 {
        unsafe { T::links(node).as_ref().height() }
    }

    /// Returns the balance factor of `node`: the height of its left subtree
    /// minus the height of its right subtree.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` is an element of `self`, and not of
    /// any other tree.
    pub unsafe fn balance_factor(&self, node: NonNull<T>) -> i8 {
        unsafe { self.balance_raw(node) }
    }

    /// Returns a reference to the node corresponding to `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<Pin<&T>>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let ptr = self.get_raw(key)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_ref())) }
    }

    /// Returns a mutable reference to the node corresponding to `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<Pin<&mut T>>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let mut ptr = self.get_raw(key)?;
        unsafe { Some(Pin::new_unchecked(ptr.as_mut())) }
    }

    /// Returns `true` if the tree contains a node corresponding to `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.get_raw(key).is_some()
    }

    fn get_raw<Q>(&self, key: &Q) -> Link<T>
    where
        T::Key: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        let mut opt_cur = self.root;

        loop {
            let cur = opt_cur?;

            unsafe {
                match key.cmp(cur.as_ref().key().borrow()) {
                    Ordering::Less => opt_cur = T::links(cur).as_ref().left(),
                    Ordering::Equal => return Some(cur),
                    Ordering::Greater => opt_cur = T::links(cur).as_ref().right(),
                }
            }
        }
    }

    /// Returns the minimum element of the tree.
    pub fn first(&self) -> Option<Pin<&T>> {
        let root = self.root?;

        unsafe {
            let (first, _) = self.min_in_subtree(root);
            Some(Pin::new_unchecked(first.as_ref()))
        }
    }

    /// Returns the maximum element of the tree.
    pub fn last(&self) -> Option<Pin<&T>> {
        let mut cur = self.root?;

        unsafe {
            while let Some(right) = T::links(cur).as_ref().right() {
                cur = right;
            }

            Some(Pin::new_unchecked(cur.as_ref()))
        }
    }

    /// Returns an iterator over the elements of the tree, in ascending key
    /// order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self)
    }

    /// Inserts an item into the tree.
    ///
    /// On success, returns a reference to the newly linked node. If a node
    /// with an equal key is already present, the tree is left unmodified and
    /// the item is handed back in the error.
    ///
    /// This operation completes in _O(log(n))_ time.
    pub fn insert(&mut self, item: T::Handle) -> Result<Pin<&T>, InsertError<T::Handle>> {
        let ptr = T::into_ptr(item);

        let Some(root) = self.root else {
            // Tree is empty. Set `item` as the root and return.
            unsafe {
                let links = T::links(ptr).as_mut();
                links.set_parent(None);
                links.set_left(None);
                links.set_right(None);
                links.set_height(1);
            }

            self.root = Some(ptr);
            self.len += 1;
            return Ok(unsafe { Pin::new_unchecked(ptr.as_ref()) });
        };

        // Descend the tree, looking for a suitable leaf.
        let mut cur = root;
        let dir = loop {
            let ordering = unsafe { ptr.as_ref().key().cmp(cur.as_ref().key()) };

            let dir = match ordering {
                Ordering::Less => Dir::Left,
                Ordering::Greater => Dir::Right,
                Ordering::Equal => {
                    // Nothing has been linked yet; reconstitute the handle
                    // and give it back.
                    return Err(InsertError::Duplicate(unsafe { T::from_ptr(ptr) }));
                }
            };

            match unsafe { T::links(cur).as_ref().child(dir) } {
                // Descend.
                Some(child) => cur = child,

                // Attach `item` here.
                None => break dir,
            }
        };

        unsafe {
            T::links(cur).as_mut().set_child(dir, Some(ptr));

            let links = T::links(ptr).as_mut();
            links.set_parent(Some(cur));
            links.set_left(None);
            links.set_right(None);
            links.set_height(1);

            self.rebalance_inserted(cur);
        }

        self.len += 1;

        Ok(unsafe { Pin::new_unchecked(ptr.as_ref()) })
    }

    // Walks from `node` up to the root after an insertion below `node`,
    // refreshing each cached height and restoring the balance invariant with
    // at most one single or double rotation per level.
    //
    // Heights keep changing above a level even when no rotation fires there,
    // so every ancestor is visited.
    unsafe fn rebalance_inserted(&mut self, node: NonNull<T>) {
        let mut opt_cur = Some(node);

        while let Some(cur) = opt_cur {
            unsafe {
                self.update_height(cur);

                let local_root = match self.balance_raw(cur) {
                    bf if bf > 1 => {
                        let left = T::links(cur)
                            .as_ref()
                            .left()
                            .expect("left-heavy node must have a left child");

                        // A right-leaning left child requires a double
                        // rotation; make the subtree left-left first.
                        if self.balance_raw(left) < 0 {
                            self.rotate_left(left);
                        }

                        self.rotate_right(cur)
                    }

                    bf if bf < -1 => {
                        let right = T::links(cur)
                            .as_ref()
                            .right()
                            .expect("right-heavy node must have a right child");

                        if self.balance_raw(right) > 0 {
                            self.rotate_right(right);
                        }

                        self.rotate_left(cur)
                    }

                    _ => cur,
                };

                opt_cur = T::links(local_root).as_ref().parent();
            }
        }
    }

    /// Rotates the subtree rooted at `node` to the left, returning the new
    /// local subtree root.
    ///
    /// The right child of `node` becomes the local root, with `node` as its
    /// left child; the pivot's former left subtree becomes `node`'s right
    /// subtree. The former parent of `node` (or the tree's root handle) is
    /// re-pointed at the returned node, and the cached heights of the two
    /// pivoted nodes are refreshed. Returns `node` unchanged if it has no
    /// right child.
    ///
    /// BST order and node count are preserved; the tree-wide balance
    /// invariant is the caller's concern.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` is an element of `self`, and not of
    /// any other tree.
    pub unsafe fn rotate_left(&mut self, node: NonNull<T>) -> NonNull<T> {
        unsafe {
            match T::links(node).as_ref().right() {
                Some(pivot) => {
                    self.rotate_at(node, pivot);
                    pivot
                }
                None => node,
            }
        }
    }

    /// Rotates the subtree rooted at `node` to the right, returning the new
    /// local subtree root.
    ///
    /// The mirror image of [`rotate_left`][AvlTree::rotate_left], pivoting on
    /// the left child. Returns `node` unchanged if it has no left child.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `node` is an element of `self`, and not of
    /// any other tree.
    pub unsafe fn rotate_right(&mut self, node: NonNull<T>) -> NonNull<T> {
        unsafe {
            match T::links(node).as_ref().left() {
                Some(pivot) => {
                    self.rotate_at(node, pivot);
                    pivot
                }
                None => node,
            }
        }
    }

    // Performs a rotation, moving `up` up and its parent `down` down, then
    // refreshes the cached heights of both.
    fn rotate_at(&mut self, down: NonNull<T>, up: NonNull<T>) {
        unsafe {
            // - `down` becomes the `dir` child of `up`.
            // - `across` goes from the `dir` child of `up` to the `!dir`
            //   child of `down`.
            let dir = if T::links(down).as_ref().right() == Some(up) {
                Dir::Left
            } else {
                Dir::Right
            };

            let across = T::links(up).as_ref().child(dir);
            T::links(down).as_mut().set_child(!dir, across);
            self.maybe_set_parent(across, Some(down));

            T::links(up).as_mut().set_child(dir, Some(down));
            let parent = T::links(down).as_mut().set_parent(Some(up));
            T::links(up).as_mut().set_parent(parent);

            match parent {
                Some(parent) => self.replace_child(parent, down, Some(up)),
                None => self.root = Some(up),
            }

            // `down` is now below `up`; refresh bottom-up.
            self.update_height(down);
            self.update_height(up);
        }
    }

    /// Returns `true` if the keys of the tree are in binary search order.
    ///
    /// Every tree produced by the public API satisfies this; it is exposed
    /// for tests and assertions and is not consulted by `insert`.
    pub fn is_bst(&self) -> bool {
        match self.root {
            Some(root) => unsafe { self.is_bst_at(root, None, None) },
            None => true,
        }
    }

    unsafe fn is_bst_at(
        &self,
        node: NonNull<T>,
        min: Option<&T::Key>,
        max: Option<&T::Key>,
    ) -> bool {
        unsafe {
            let key = node.as_ref().key();

            // Each key must respect the tightest bounds implied by all of its
            // ancestors, not just its immediate parent's key.
            if min.is_some_and(|min| key <= min) || max.is_some_and(|max| key >= max) {
                return false;
            }

            let left_ok = match T::links(node).as_ref().left() {
                Some(left) => self.is_bst_at(left, min, Some(key)),
                None => true,
            };

            left_ok
                && match T::links(node).as_ref().right() {
                    Some(right) => self.is_bst_at(right, Some(key), max),
                    None => true,
                }
        }
    }

    /// Returns `true` if the tree is a valid AVL tree: the keys are in binary
    /// search order, and at every node the subtree heights differ by at most
    /// one.
    ///
    /// Heights are recomputed from scratch rather than read from the caches,
    /// so a stale cache cannot mask an imbalance. The empty tree is valid.
    pub fn is_avl(&self) -> bool {
        self.is_bst() && self.recompute_height(self.root).is_some()
    }

    // Recomputes the height of the subtree rooted at `node`, ignoring the
    // cached heights. Returns `None` if any node in the subtree violates the
    // balance invariant.
    fn recompute_height(&self, node: Link<T>) -> Option<i8> {
        let Some(node) = node else {
            return Some(0);
        };

        unsafe {
            let lh = self.recompute_height(T::links(node).as_ref().left())?;
            let rh = self.recompute_height(T::links(node).as_ref().right())?;

            ((lh - rh).abs() <= 1).then(|| 1 + lh.max(rh))
        }
    }

    #[doc(hidden)]
    pub fn assert_invariants(&self) {
        let mut count = 0;

        if let Some(root) = self.root {
            unsafe {
                assert!(
                    T::links(root).as_ref().parent().is_none(),
                    "root parent pointer must be unset"
                );

                self.assert_invariants_at(root, &mut count);
            }
        }

        assert_eq!(count, self.len, "node count must match `len`");
        assert!(self.is_bst(), "keys must be in search order");
    }

    #[allow(clippy::only_used_in_recursion)]
    unsafe fn assert_invariants_at(&self, node: NonNull<T>, count: &mut usize) -> i8 {
        *count += 1;

        unsafe {
            let mut child_heights = [0; 2];

            for dir in [Dir::Left, Dir::Right] {
                if let Some(child) = T::links(node).as_ref().child(dir) {
                    // Ensure the child's parent link points to this node.
                    let parent = T::links(child)
                        .as_ref()
                        .parent()
                        .expect("child parent pointer not set");
                    assert_eq!(node, parent);

                    child_heights[dir as usize] = self.assert_invariants_at(child, count);
                }
            }

            let [lh, rh] = child_heights;

            // Ensure the balance invariant holds.
            assert!((lh - rh).abs() <= 1, "node is unbalanced");

            // Ensure the cached height is exact.
            let height = 1 + lh.max(rh);
            assert_eq!(
                T::links(node).as_ref().height(),
                height,
                "stale height cache"
            );

            height
        }
    }

    /// Visits the nodes of the tree in postorder, applying `visit` to each.
    ///
    /// Children are visited before their parent; the root is visited last.
    pub fn postorder<F>(&self, mut visit: F)
    where
        F: FnMut(Pin<&T>),
    {
        unsafe { self.postorder_at(self.root, &mut visit) }
    }

    unsafe fn postorder_at<F>(&self, node: Link<T>, visit: &mut F)
    where
        F: FnMut(Pin<&T>),
    {
        let Some(node) = node else {
            return;
        };

        unsafe {
            self.postorder_at(T::links(node).as_ref().left(), visit);
            self.postorder_at(T::links(node).as_ref().right(), visit);
            visit(Pin::new_unchecked(node.as_ref()));
        }
    }

    /// Clears the tree, removing all elements.
    pub fn clear(&mut self) {
        let mut opt_cur = self.root;

        while let Some(cur) = opt_cur {
            unsafe {
                // Descend to the minimum node.
                let (cur, parent) = self.min_in_subtree(cur);
                let parent = parent.or_else(|| T::links(cur).as_ref().parent());

                let right = T::links(cur).as_ref().right();

                // Elevate the node's right child (which may be None).
                self.replace_child_or_set_root(parent, cur, right);
                self.maybe_set_parent(right, parent);

                // Drop the node.
                drop(T::from_ptr(cur));
                self.len -= 1;

                // If the node had no right child, climb to the parent. If the
                // node had no parent, the tree is empty.
                opt_cur = right.or(parent);
            }
        }

        debug_assert!(self.root.is_none());
        debug_assert_eq!(self.len(), 0);
    }

    // Support methods ========================================================

    #[inline]
    unsafe fn height_raw(&self, node: Link<T>) -> i8 {
        node.map(|node| unsafe { T::links(node).as_ref().height() })
            .unwrap_or(0)
    }

    #[inline]
    unsafe fn balance_raw(&self, node: NonNull<T>) -> i8 {
        unsafe {
            let links = T::links(node).as_ref();
            self.height_raw(links.left()) - self.height_raw(links.right())
        }
    }

    // Refreshes the cached height of `node` from its children's caches.
    #[inline]
    unsafe fn update_height(&mut self, node: NonNull<T>) {
        unsafe {
            let links = T::links(node).as_ref();
            let height = self
                .height_raw(links.left())
                .max(self.height_raw(links.right()))
                .checked_add(1)
                .expect("subtree height overflow");

            T::links(node).as_mut().set_height(height);
        }
    }

    unsafe fn maybe_set_parent(&mut self, opt_node: Link<T>, parent: Link<T>) {
        let Some(node) = opt_node else {
            return;
        };

        unsafe { T::links(node).as_mut().set_parent(parent) };
    }

    #[inline]
    unsafe fn replace_child_or_set_root(
        &mut self,
        parent: Link<T>,
        old_child: NonNull<T>,
        new_child: Link<T>,
    ) {
        match parent {
            Some(parent) => unsafe { self.replace_child(parent, old_child, new_child) },
            None => self.root = new_child,
        }
    }

    // Replaces the child pointer of `parent` pointing at `old_child` with
    // `new_child`.
    //
    // `new_child`'s parent pointer is not updated.
    //
    // # Safety
    //
    // The caller must ensure that the following conditions hold:
    // - `old_child` is a child node of `parent`.
    // - `new_child` is not already a child node of `parent`.
    #[inline]
    unsafe fn replace_child(
        &mut self,
        parent: NonNull<T>,
        old_child: NonNull<T>,
        new_child: Link<T>,
    ) {
        unsafe {
            let dir = self.which_child(parent, old_child);

            if let Some(new_child) = new_child {
                debug_assert_ne!(
                    T::links(parent).as_ref().child(!dir),
                    Some(new_child),
                    "`new_child` must not be a child of `parent`"
                );
            }

            T::links(parent).as_mut().set_child(dir, new_child);
        }
    }

    // Returns the in-order successor of `node`, if any.
    unsafe fn successor(&self, node: NonNull<T>) -> Link<T> {
        unsafe {
            if let Some(right) = T::links(node).as_ref().right() {
                let (min, _) = self.min_in_subtree(right);
                return Some(min);
            }

            // Ascend until we leave a left subtree.
            let mut cur = node;
            while let Some(parent) = T::links(cur).as_ref().parent() {
                if self.which_child(parent, cur) == Dir::Left {
                    return Some(parent);
                }

                cur = parent;
            }

            None
        }
    }

    // Returns the minimum node in the subtree.
    //
    // If the subtree root is not the minimum, also returns the minimum node's
    // parent.
    #[inline]
    unsafe fn min_in_subtree(&self, root: NonNull<T>) -> (NonNull<T>, Option<NonNull<T>>) {
        let mut parent = None;
        let mut cur = root;

        while let Some(left) = unsafe { T::links(cur).as_ref().left() } {
            parent = Some(cur);
            cur = left;
        }

        (cur, parent)
    }

    unsafe fn which_child(&self, parent: NonNull<T>, child: NonNull<T>) -> Dir {
        if unsafe { T::links(parent).as_ref().left() } == Some(child) {
            Dir::Left
        } else {
            Dir::Right
        }
    }
}

impl<T> Drop for AvlTree<T>
where
    T: TreeNode<Links<T>> + ?Sized,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: ?Sized> Links<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(LinksInner {
                parent: None,
                children: [None; 2],
                height: 1,
                _unpin: PhantomPinned,
            }),
        }
    }

    #[inline]
    fn height(&self) -> i8 {
        unsafe { (*self.inner.get()).height }
    }

    #[inline]
    fn parent(&self) -> Link<T> {
        unsafe { (*self.inner.get()).parent }
    }

    #[inline]
    fn child(&self, dir: Dir) -> Link<T> {
        unsafe { (*self.inner.get()).children[dir as usize] }
    }

    #[inline]
    fn left(&self) -> Link<T> {
        self.child(Dir::Left)
    }

    #[inline]
    fn right(&self) -> Link<T> {
        self.child(Dir::Right)
    }

    #[inline]
    fn set_parent(&mut self, parent: Link<T>) -> Link<T> {
        mem::replace(&mut self.inner.get_mut().parent, parent)
    }

    #[inline]
    fn set_child(&mut self, dir: Dir, child: Link<T>) -> Link<T> {
        mem::replace(&mut self.inner.get_mut().children[dir as usize], child)
    }

    #[inline]
    fn set_left(&mut self, left: Link<T>) -> Link<T> {
        self.set_child(Dir::Left, left)
    }

    #[inline]
    fn set_right(&mut self, right: Link<T>) -> Link<T> {
        self.set_child(Dir::Right, right)
    }

    #[inline]
    fn set_height(&mut self, height: i8) {
        self.inner.get_mut().height = height;
    }
}

impl<T: ?Sized> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("parent", &self.parent())
            .field("left", &self.left())
            .field("right", &self.right())
            .field("height", &self.height())
            .finish()
    }
}

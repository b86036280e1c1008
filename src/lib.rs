//! Persistent multi-metric rope.
//!
//! A balanced multiway tree storing an ordered sequence of items, with fast
//! concatenation, splitting, insertion, removal and position lookup under
//! several simultaneous coordinate systems ("metrics"). Unmodified subtrees
//! are shared between snapshots, never copied; in-place mutation first
//! establishes exclusive ownership of every node it touches.
//!
//! The engine is generic over three contracts: [`Summary`] (the aggregate
//! cached per subtree), [`Item`] (the terminal payload stored in leaves) and
//! [`Metric`] (a pluggable mapping from summaries to a scalar position
//! space). A canonical UTF-8 text instantiation lives in [`text`].

use std::fmt;
use std::ops::Range;

mod builder;
mod index;
mod node;
pub mod text;

pub use index::Index;

use builder::Builder;
use index::Path;
use node::{Node, NodeVal};

// === Contracts ===

/// Aggregate statistic cached for every node and leaf item.
///
/// `add`/`subtract` must be exact inverses and associative with respect to
/// concatenation of the summarized content; `Default` is the identity.
pub trait Summary: Clone + Default + PartialEq + fmt::Debug {
    /// Upper bound on children per inner node. The lower bound for non-root
    /// nodes is half this. Must be at least 4, so a deficient node always
    /// has a neighbor to merge or redistribute with.
    const MAX_CHILDREN: usize;
    /// Size budget for a single leaf item, in base units.
    const MAX_ITEM_LEN: usize;

    fn add(&mut self, other: &Self);
    fn subtract(&mut self, other: &Self);
}

/// Terminal payload stored in leaves.
///
/// Items report their own summary contribution, can be split at an
/// element-local offset, and can absorb a neighbor during compaction. Items
/// handed to the rope must already respect the leaf size budget.
pub trait Item: Clone + fmt::Debug {
    type Summary: Summary;

    fn summarize(&self) -> Self::Summary;

    /// Length in base units. Must equal `summarize()`'s notion of size for
    /// whatever metric treats base units as positions.
    fn len(&self) -> usize;

    /// Whether this item is small enough to be folded into a neighbor.
    fn is_undersized(&self) -> bool;

    /// Split at `offset` base units: `self` keeps the prefix, the suffix is
    /// returned.
    fn split_at(&mut self, offset: usize) -> Self;

    /// Append `other`'s content. Callers guarantee the combined size fits the
    /// leaf budget.
    fn merge(&mut self, other: Self);
}

/// A coordinate system over the tree.
///
/// `measure` must be additive: measuring a combined summary equals the sum of
/// the parts. `to_offset` resolves a residual position inside one item to an
/// element-local base-unit offset.
pub trait Metric<I: Item> {
    fn measure(summary: &I::Summary) -> usize;
    fn to_offset(item: &I, pos: usize) -> usize;
}

// === Rope ===

/// A persistent sequence of items. Cloning is O(1) and shares all nodes.
#[derive(Clone, Debug)]
pub struct Rope<I: Item> {
    root: Node<I>,
    version: u64,
}

impl<I: Item> Default for Rope<I> {
    fn default() -> Self {
        Rope::new()
    }
}

impl<I: Item> Rope<I> {
    pub fn new() -> Self {
        Rope { root: Node::empty(), version: 0 }
    }

    pub fn from_item(item: I) -> Self {
        Rope { root: Node::new_leaf(vec![item]), version: 0 }
    }

    /// Total length in base units.
    #[inline]
    pub fn len(&self) -> usize {
        self.root.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of items stored.
    #[inline]
    pub fn item_count(&self) -> usize {
        self.root.count()
    }

    /// Aggregate summary of the whole sequence.
    #[inline]
    pub fn summary(&self) -> &I::Summary {
        self.root.summary()
    }

    /// Total size in `M`'s position space.
    #[inline]
    pub fn measure<M: Metric<I>>(&self) -> usize {
        M::measure(self.root.summary())
    }

    /// Current revision counter. Advances on every structural mutation,
    /// invalidating previously issued [`Index`] values.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether two ropes share the same root node.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.root.ptr_eq(&other.root)
    }

    /// Exhaustively verify all tree invariants. Intended for debug and test
    /// builds; production code assumes them by construction.
    pub fn assert_invariants(&self) {
        self.root.check_invariants(true);
    }

    #[inline]
    fn bump(&mut self) {
        self.version += 1;
    }

    fn check_index(&self, index: &Index) {
        assert_eq!(
            index.version, self.version,
            "stale index: the rope was mutated after this index was issued"
        );
    }

    fn collapse_root(&mut self) {
        while self.root.height() > 0 && self.root.child_count() == 1 {
            self.root = self.root.children()[0].clone();
        }
    }

    fn grow_root(&mut self, spawn: Node<I>) {
        let old = std::mem::replace(&mut self.root, Node::empty());
        self.root = Node::new_internal(vec![old, spawn]);
    }
}

// === Navigation ===

impl<I: Item> Rope<I> {
    /// Locate `pos` in metric `M`, returning an index to the containing item
    /// and the residual offset (in `M` units) inside it.
    ///
    /// When `pos` falls exactly on a seam between items, `prefer_end` selects
    /// the item ending there instead of the one starting there. Positions at
    /// the very end of the rope yield the one-past-last index.
    pub fn find<M: Metric<I>>(&self, pos: usize, prefer_end: bool) -> (Index, usize) {
        let total = self.measure::<M>();
        assert!(pos <= total, "position {pos} out of bounds (len {total})");
        if self.is_empty() || (pos == total && !prefer_end) {
            return (Index::new(self.end_path(), self.version), 0);
        }
        let mut node = &self.root;
        let mut pos = pos;
        let mut path = Path::new();
        loop {
            match &node.body().val {
                NodeVal::Internal(children) => {
                    let mut next = None;
                    for (i, child) in children.iter().enumerate() {
                        let m = M::measure(child.summary());
                        if pos < m || (prefer_end && pos == m) {
                            next = Some(i);
                            break;
                        }
                        pos -= m;
                    }
                    let Some(i) = next else {
                        unreachable!("measure drift during descent");
                    };
                    path.push(i);
                    node = &children[i];
                }
                NodeVal::Leaf(items) => {
                    for (i, item) in items.iter().enumerate() {
                        let m = M::measure(&item.summarize());
                        if pos < m || (prefer_end && pos == m) {
                            path.push(i);
                            return (Index::new(path, self.version), pos);
                        }
                        pos -= m;
                    }
                    unreachable!("measure drift during leaf scan");
                }
            }
        }
    }

    /// Convert a metric position to a base-unit offset.
    fn base_offset_of<M: Metric<I>>(&self, pos: usize, prefer_end: bool) -> usize {
        let total = self.measure::<M>();
        assert!(pos <= total, "position {pos} out of bounds (len {total})");
        let mut node = &self.root;
        let mut pos = pos;
        let mut base = 0;
        loop {
            match &node.body().val {
                NodeVal::Internal(children) => {
                    let mut descended = false;
                    for child in children {
                        let m = M::measure(child.summary());
                        if pos < m || (prefer_end && pos == m) {
                            node = child;
                            descended = true;
                            break;
                        }
                        pos -= m;
                        base += child.len();
                    }
                    if !descended {
                        return base;
                    }
                }
                NodeVal::Leaf(items) => {
                    for item in items {
                        let m = M::measure(&item.summarize());
                        if pos < m || (prefer_end && pos == m) {
                            return base + M::to_offset(item, pos);
                        }
                        pos -= m;
                        base += item.len();
                    }
                    return base;
                }
            }
        }
    }

    /// Path of the one-past-last item.
    fn end_path(&self) -> Path {
        let mut path = Path::new();
        let mut node = &self.root;
        loop {
            match &node.body().val {
                NodeVal::Internal(children) => {
                    let last = children.len() - 1;
                    path.push(last);
                    node = &children[last];
                }
                NodeVal::Leaf(items) => {
                    path.push(items.len());
                    return path;
                }
            }
        }
    }

    /// Base-unit offset of the item addressed by `path`.
    fn base_of_path(&self, path: &[usize]) -> usize {
        let mut node = &self.root;
        let mut base = 0;
        for (depth, &slot) in path.iter().enumerate() {
            match &node.body().val {
                NodeVal::Internal(children) => {
                    assert!(slot < children.len(), "index slot out of range");
                    for child in &children[..slot] {
                        base += child.len();
                    }
                    node = &children[slot];
                }
                NodeVal::Leaf(items) => {
                    assert!(slot <= items.len(), "index slot out of range");
                    assert_eq!(depth + 1, path.len(), "index deeper than the tree");
                    for item in &items[..slot] {
                        base += item.len();
                    }
                }
            }
        }
        base
    }

    /// Ordinal (zero-based item number) of the item addressed by `path`.
    fn ordinal_of_path(&self, path: &[usize]) -> usize {
        let mut node = &self.root;
        let mut n = 0;
        for &slot in path {
            match &node.body().val {
                NodeVal::Internal(children) => {
                    assert!(slot < children.len(), "index slot out of range");
                    for child in &children[..slot] {
                        n += child.count();
                    }
                    node = &children[slot];
                }
                NodeVal::Leaf(items) => {
                    assert!(slot <= items.len(), "index slot out of range");
                    n += slot;
                }
            }
        }
        n
    }

    /// Path of the item with ordinal `n`; `n == item_count()` yields the
    /// one-past-last path.
    fn path_of_ordinal(&self, mut n: usize) -> Path {
        assert!(n <= self.root.count(), "ordinal out of range");
        let mut path = Path::new();
        let mut node = &self.root;
        loop {
            match &node.body().val {
                NodeVal::Leaf(_) => {
                    path.push(n);
                    return path;
                }
                NodeVal::Internal(children) => {
                    let mut chosen = None;
                    for (i, child) in children.iter().enumerate() {
                        if n < child.count() {
                            chosen = Some(i);
                            break;
                        }
                        n -= child.count();
                    }
                    let i = match chosen {
                        Some(i) => i,
                        None => {
                            // One past the end: follow the rightmost spine.
                            let last = children.len() - 1;
                            n = children[last].count();
                            last
                        }
                    };
                    path.push(i);
                    node = &children[i];
                }
            }
        }
    }

    fn item_at(&self, path: &[usize]) -> &I {
        let mut node = &self.root;
        for (depth, &slot) in path.iter().enumerate() {
            match &node.body().val {
                NodeVal::Internal(children) => {
                    assert!(slot < children.len(), "index slot out of range");
                    node = &children[slot];
                }
                NodeVal::Leaf(items) => {
                    assert!(slot < items.len(), "index does not address an item");
                    assert_eq!(depth + 1, path.len(), "index deeper than the tree");
                    return &items[slot];
                }
            }
        }
        unreachable!("index shorter than the tree")
    }

    /// Path of the item starting exactly at base offset `base`. Panics when
    /// the offset falls strictly inside an item.
    fn boundary_path_of_base(&self, base: usize) -> Path {
        debug_assert!(base < self.root.len());
        let mut node = &self.root;
        let mut base = base;
        let mut path = Path::new();
        loop {
            match &node.body().val {
                NodeVal::Internal(children) => {
                    let mut acc = 0;
                    let mut next = 0;
                    for (i, child) in children.iter().enumerate() {
                        if base < acc + child.len() {
                            next = i;
                            break;
                        }
                        acc += child.len();
                    }
                    path.push(next);
                    node = &children[next];
                    base -= acc;
                }
                NodeVal::Leaf(items) => {
                    let mut acc = 0;
                    for (i, item) in items.iter().enumerate() {
                        if base == acc {
                            path.push(i);
                            return path;
                        }
                        assert!(
                            base >= acc + item.len(),
                            "position does not fall on an element boundary"
                        );
                        acc += item.len();
                    }
                    unreachable!("offset drift during leaf scan");
                }
            }
        }
    }
}

// === Mutation ===

impl<I: Item> Rope<I> {
    fn insert_at_base(&mut self, item: I, base: usize) {
        if let Some(spawn) = self.root.insert_item(item, base) {
            self.grow_root(spawn);
        }
        self.bump();
    }

    /// Insert `item` at `pos` in metric `M`. A position strictly inside an
    /// existing item splits that item at the element-local boundary.
    pub fn insert<M: Metric<I>>(&mut self, item: I, pos: usize) {
        let base = self.base_offset_of::<M>(pos, false);
        self.insert_at_base(item, base);
    }

    /// Insert `item` immediately before the item addressed by `at`.
    pub fn insert_at(&mut self, item: I, at: &Index) {
        self.check_index(at);
        let base = self.base_of_path(&at.path);
        self.insert_at_base(item, base);
    }

    pub fn push(&mut self, item: I) {
        let base = self.root.len();
        self.insert_at_base(item, base);
    }

    pub fn push_front(&mut self, item: I) {
        self.insert_at_base(item, 0);
    }

    /// Remove and return the item starting exactly at `pos` in metric `M`.
    /// Panics if `pos` falls strictly inside an item.
    pub fn remove<M: Metric<I>>(&mut self, pos: usize) -> I {
        let base = self.base_offset_of::<M>(pos, false);
        assert!(base < self.root.len(), "cannot remove at the end of the rope");
        let path = self.boundary_path_of_base(base);
        let item = self.root.remove_at_path(&path);
        self.collapse_root();
        self.bump();
        item
    }

    /// Remove and return the item addressed by `at`.
    pub fn remove_at(&mut self, at: &Index) -> I {
        self.check_index(at);
        // Validates that the path addresses an existing item.
        let _ = self.item_at(&at.path);
        let item = self.root.remove_at_path(&at.path);
        self.collapse_root();
        self.bump();
        item
    }

    /// Concatenate two ropes. If either side is empty the other side's tree
    /// is returned whole; otherwise only the seam path is touched.
    pub fn join(left: Rope<I>, right: Rope<I>) -> Rope<I> {
        let version = left.version.max(right.version) + 1;
        Rope { root: Node::join(left.root, right.root), version }
    }

    pub fn append(&mut self, other: Rope<I>) {
        let root = std::mem::replace(&mut self.root, Node::empty());
        self.root = Node::join(root, other.root);
        self.bump();
    }

    pub fn prepend(&mut self, other: Rope<I>) {
        let root = std::mem::replace(&mut self.root, Node::empty());
        self.root = Node::join(other.root, root);
        self.bump();
    }
}

// === Decomposition ===

impl<I: Item> Rope<I> {
    fn split_at_base(self, base: usize) -> (Rope<I>, Rope<I>) {
        let version = self.version + 1;
        let mut b = Builder::new();
        b.cut(&self.root, base);
        let (left, right) = b.finalize_split();
        (
            Rope { root: left, version },
            Rope { root: right, version },
        )
    }

    /// Split into two independent ropes at `pos` in metric `M`. Subtrees
    /// entirely on one side of the cut are shared with the original tree.
    pub fn split<M: Metric<I>>(self, pos: usize) -> (Rope<I>, Rope<I>) {
        let base = self.base_offset_of::<M>(pos, false);
        self.split_at_base(base)
    }

    /// Split immediately before the item addressed by `at`.
    pub fn split_at(self, at: &Index) -> (Rope<I>, Rope<I>) {
        self.check_index(at);
        let base = self.base_of_path(&at.path);
        self.split_at_base(base)
    }

    /// Tear out `range` (in metric `M`), returning the outside pieces plus
    /// the stitched-together inside piece.
    fn carve<M: Metric<I>>(&self, range: Range<usize>) -> (Node<I>, Node<I>, Node<I>) {
        assert!(range.start <= range.end, "invalid range");
        let start = self.base_offset_of::<M>(range.start, false);
        let end = self.base_offset_of::<M>(range.end, false);
        let mut b = Builder::new();
        b.cut(&self.root, start);
        let left = b.finalize_before();
        let rest = b.finalize_after();
        let mut b = Builder::new();
        b.cut(&rest, end - start);
        let (mid, right) = b.finalize_split();
        (left, mid, right)
    }

    /// Delete the half-open `range` in metric `M`.
    pub fn remove_subrange<M: Metric<I>>(&mut self, range: Range<usize>) {
        let (left, _, right) = self.carve::<M>(range);
        self.root = Node::join(left, right);
        self.collapse_root();
        self.bump();
    }

    /// Replace the half-open `range` in metric `M` with `new`.
    pub fn replace_subrange<M: Metric<I>>(&mut self, range: Range<usize>, new: Rope<I>) {
        let (left, _, right) = self.carve::<M>(range);
        self.root = Node::join(Node::join(left, new.root), right);
        self.collapse_root();
        self.bump();
    }

    /// Remove the half-open `range` in metric `M` from this rope and return
    /// it as an independent rope.
    pub fn extract<M: Metric<I>>(&mut self, range: Range<usize>) -> Rope<I> {
        let (left, mid, right) = self.carve::<M>(range);
        self.root = Node::join(left, right);
        self.collapse_root();
        self.bump();
        Rope { root: mid, version: 0 }
    }
}

// === Traversal ===

impl<I: Item> Rope<I> {
    /// Visit items depth-first, left to right, until `f` returns `false`.
    /// Returns whether the traversal ran to completion.
    pub fn for_each_while(&self, mut f: impl FnMut(&I) -> bool) -> bool {
        walk(&self.root, &[], &mut None, &mut |item, _| f(item))
    }

    /// Visit items starting from `pos` in metric `M`. Only the first item
    /// visited receives its element-local start offset (in base units); it is
    /// the only one that may be entered partway.
    pub fn for_each_from<M: Metric<I>>(
        &self,
        pos: usize,
        mut f: impl FnMut(&I, Option<usize>) -> bool,
    ) -> bool {
        let (index, remaining) = self.find::<M>(pos, false);
        let mut first = if self.ordinal_of_path(&index.path) < self.item_count() {
            Some(M::to_offset(self.item_at(&index.path), remaining))
        } else {
            None
        };
        walk(&self.root, &index.path, &mut first, &mut f)
    }

    /// Visit every item with exclusive ownership, correcting cached summaries
    /// by the per-item before/after delta. Returns whether the traversal ran
    /// to completion.
    pub fn mutating_for_each(&mut self, mut f: impl FnMut(&mut I) -> bool) -> bool {
        let mut visited = 0;
        let done = mutating_walk(&mut self.root, &[], &mut visited, &mut f);
        self.bump();
        done
    }

    /// Like [`mutating_for_each`](Self::mutating_for_each) but starting at
    /// `at`. On return `at` addresses the next unvisited item (or the end)
    /// under the rope's new version.
    pub fn mutating_for_each_from(
        &mut self,
        at: &mut Index,
        mut f: impl FnMut(&mut I) -> bool,
    ) -> bool {
        self.check_index(at);
        let start = self.ordinal_of_path(&at.path);
        let start_path: Vec<usize> = at.path.to_vec();
        let mut visited = 0;
        let done = mutating_walk(&mut self.root, &start_path, &mut visited, &mut f);
        self.bump();
        let next = if done { self.item_count() } else { start + visited };
        at.path = self.path_of_ordinal(next);
        at.version = self.version;
        done
    }
}

fn walk<I: Item>(
    node: &Node<I>,
    start: &[usize],
    first_local: &mut Option<usize>,
    f: &mut impl FnMut(&I, Option<usize>) -> bool,
) -> bool {
    match &node.body().val {
        NodeVal::Leaf(items) => {
            let s = start.first().copied().unwrap_or(0).min(items.len());
            for item in &items[s..] {
                if !f(item, first_local.take()) {
                    return false;
                }
            }
            true
        }
        NodeVal::Internal(children) => {
            let s = start.first().copied().unwrap_or(0);
            for (i, child) in children.iter().enumerate().skip(s) {
                let sub = if i == s && start.len() > 1 { &start[1..] } else { &[] };
                if !walk(child, sub, first_local, f) {
                    return false;
                }
            }
            true
        }
    }
}

fn mutating_walk<I: Item>(
    node: &mut Node<I>,
    start: &[usize],
    visited: &mut usize,
    f: &mut impl FnMut(&mut I) -> bool,
) -> bool {
    let body = node.make_mut();
    let (done, sub, add, len_before, len_after) = match &mut body.val {
        NodeVal::Leaf(items) => {
            let s = start.first().copied().unwrap_or(0).min(items.len());
            let mut done = true;
            let mut sub = I::Summary::default();
            let mut add = I::Summary::default();
            let mut len_before = 0;
            let mut len_after = 0;
            for item in &mut items[s..] {
                let before = item.summarize();
                len_before += item.len();
                let keep = f(item);
                sub.add(&before);
                add.add(&item.summarize());
                len_after += item.len();
                *visited += 1;
                if !keep {
                    done = false;
                    break;
                }
            }
            (done, sub, add, len_before, len_after)
        }
        NodeVal::Internal(children) => {
            let s = start.first().copied().unwrap_or(0);
            let mut done = true;
            let mut sub = I::Summary::default();
            let mut add = I::Summary::default();
            let mut len_before = 0;
            let mut len_after = 0;
            for (i, child) in children.iter_mut().enumerate().skip(s) {
                let sub_path = if i == s && start.len() > 1 { &start[1..] } else { &[] };
                let before = child.summary().clone();
                len_before += child.len();
                let keep = mutating_walk(child, sub_path, visited, f);
                sub.add(&before);
                add.add(child.summary());
                len_after += child.len();
                if !keep {
                    done = false;
                    break;
                }
            }
            (done, sub, add, len_before, len_after)
        }
    };
    body.summary.subtract(&sub);
    body.summary.add(&add);
    body.len = body.len + len_after - len_before;
    done
}

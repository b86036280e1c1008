//! The tree node and its primitive mutators.
//!
//! Nodes are reference counted and copy-on-write: a node may be shared by any
//! number of tree snapshots, and every in-place mutation path goes through
//! [`Node::make_mut`], which clones the node body first if it is shared.
//! Children deeper in the tree stay shared until they themselves change.

use std::sync::Arc;

use crate::{Item, Summary};

#[inline]
pub(crate) fn max_children<I: Item>() -> usize {
    <I::Summary as Summary>::MAX_CHILDREN
}

#[inline]
pub(crate) fn min_children<I: Item>() -> usize {
    <I::Summary as Summary>::MAX_CHILDREN / 2
}

#[inline]
fn item_budget<I: Item>() -> usize {
    <I::Summary as Summary>::MAX_ITEM_LEN
}

/// Tree node handle. Cloning is cheap (bumps a reference count).
#[derive(Clone, Debug)]
pub(crate) struct Node<I: Item> {
    arc: Arc<NodeBody<I>>,
}

#[derive(Clone, Debug)]
pub(crate) struct NodeBody<I: Item> {
    /// 0 for leaves; inner nodes are one taller than their children.
    pub height: usize,
    /// Total length of the subtree in base units.
    pub len: usize,
    /// Total number of items in the subtree.
    pub count: usize,
    /// Cached aggregate over the whole subtree.
    pub summary: I::Summary,
    pub val: NodeVal<I>,
}

#[derive(Clone, Debug)]
pub(crate) enum NodeVal<I: Item> {
    Leaf(Vec<I>),
    Internal(Vec<Node<I>>),
}

// === Construction ===

impl<I: Item> Node<I> {
    pub fn empty() -> Self {
        Node::new_leaf(Vec::new())
    }

    pub fn new_leaf(items: Vec<I>) -> Self {
        let mut body = NodeBody {
            height: 0,
            len: 0,
            count: 0,
            summary: I::Summary::default(),
            val: NodeVal::Leaf(items),
        };
        refresh_body(&mut body);
        Node { arc: Arc::new(body) }
    }

    pub fn new_internal(children: Vec<Node<I>>) -> Self {
        debug_assert!(!children.is_empty());
        let height = children[0].height() + 1;
        let mut body = NodeBody {
            height,
            len: 0,
            count: 0,
            summary: I::Summary::default(),
            val: NodeVal::Internal(children),
        };
        refresh_body(&mut body);
        Node { arc: Arc::new(body) }
    }

    /// Take ownership of the body, cloning it only if the node is shared.
    fn into_body(self) -> NodeBody<I> {
        Arc::try_unwrap(self.arc).unwrap_or_else(|arc| (*arc).clone())
    }
}

// === Accessors ===

impl<I: Item> Node<I> {
    #[inline]
    pub fn body(&self) -> &NodeBody<I> {
        &self.arc
    }

    /// Exclusive access to the body. This is the uniqueness check that makes
    /// structural sharing safe: if the node is referenced by another snapshot
    /// the body is cloned before the mutable borrow is handed out.
    #[inline]
    pub fn make_mut(&mut self) -> &mut NodeBody<I> {
        Arc::make_mut(&mut self.arc)
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.body().height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.body().len
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.body().count
    }

    #[inline]
    pub fn summary(&self) -> &I::Summary {
        &self.body().summary
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body().count == 0
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.body().height == 0
    }

    /// Number of direct children (items for a leaf, nodes for an inner node).
    #[inline]
    pub fn child_count(&self) -> usize {
        match &self.body().val {
            NodeVal::Leaf(items) => items.len(),
            NodeVal::Internal(children) => children.len(),
        }
    }

    pub fn items(&self) -> &[I] {
        match &self.body().val {
            NodeVal::Leaf(items) => items,
            NodeVal::Internal(_) => panic!("items() called on internal node"),
        }
    }

    pub fn children(&self) -> &[Node<I>] {
        match &self.body().val {
            NodeVal::Internal(children) => children,
            NodeVal::Leaf(_) => panic!("children() called on leaf node"),
        }
    }

    /// Whether two handles point at the same underlying node.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.arc, &other.arc)
    }
}

/// Recompute the cached length, item count and summary of one body from its
/// direct children. Children are assumed to already be coherent.
pub(crate) fn refresh_body<I: Item>(body: &mut NodeBody<I>) {
    let mut len = 0;
    let mut count = 0;
    let mut summary = I::Summary::default();
    match &body.val {
        NodeVal::Leaf(items) => {
            for item in items {
                len += item.len();
                count += 1;
                summary.add(&item.summarize());
            }
        }
        NodeVal::Internal(children) => {
            for child in children {
                len += child.len();
                count += child.count();
                summary.add(child.summary());
            }
        }
    }
    body.len = len;
    body.count = count;
    body.summary = summary;
}

// === Primitive mutators ===

impl<I: Item> Node<I> {
    /// Detach children `[k..]` into a new sibling, keeping `[0, k)`.
    pub fn split_off(&mut self, k: usize) -> Node<I> {
        let body = self.make_mut();
        let spawn = match &mut body.val {
            NodeVal::Leaf(items) => Node::new_leaf(items.split_off(k)),
            NodeVal::Internal(children) => Node::new_internal(children.split_off(k)),
        };
        refresh_body(body);
        spawn
    }

    /// Detach children `[0, k)` into a new sibling, keeping `[k..]`.
    fn take_front(&mut self, k: usize) -> Node<I> {
        let body = self.make_mut();
        let spawn = match &mut body.val {
            NodeVal::Leaf(items) => Node::new_leaf(items.drain(..k).collect()),
            NodeVal::Internal(children) => Node::new_internal(children.drain(..k).collect()),
        };
        refresh_body(body);
        spawn
    }

    /// Append all of `other`'s children. Both nodes must have the same height.
    fn absorb(&mut self, other: Node<I>) {
        debug_assert_eq!(self.height(), other.height());
        let other_body = other.into_body();
        let body = self.make_mut();
        match (&mut body.val, other_body.val) {
            (NodeVal::Leaf(items), NodeVal::Leaf(mut more)) => items.append(&mut more),
            (NodeVal::Internal(children), NodeVal::Internal(mut more)) => {
                children.append(&mut more)
            }
            _ => unreachable!("absorb: sibling kinds differ"),
        }
        refresh_body(body);
    }

    /// Prepend all of `other`'s children. Both nodes must have the same height.
    fn absorb_front(&mut self, other: Node<I>) {
        debug_assert_eq!(self.height(), other.height());
        let other_body = other.into_body();
        let body = self.make_mut();
        match (&mut body.val, other_body.val) {
            (NodeVal::Leaf(items), NodeVal::Leaf(more)) => {
                items.splice(0..0, more);
            }
            (NodeVal::Internal(children), NodeVal::Internal(more)) => {
                children.splice(0..0, more);
            }
            _ => unreachable!("absorb_front: sibling kinds differ"),
        }
        refresh_body(body);
    }
}

/// Move children between the adjacent siblings `nodes[a]` and `nodes[a + 1]`
/// until `nodes[a]` holds exactly `target` children. The workhorse beneath
/// deficiency fixing and rotate-before-split.
pub(crate) fn redistribute_children<I: Item>(nodes: &mut [Node<I>], a: usize, target: usize) {
    let (left, right) = nodes.split_at_mut(a + 1);
    let na = &mut left[a];
    let nb = &mut right[0];
    debug_assert_eq!(na.height(), nb.height());
    let have = na.child_count();
    if have > target {
        let moved = na.split_off(target);
        nb.absorb_front(moved);
    } else if have < target {
        let moved = nb.take_front(target - have);
        na.absorb(moved);
    }
}

/// Restore the size invariant for the undersized child `nodes[slot]`.
///
/// Tries, in order: merge into the left neighbor, merge into the right
/// neighbor, and finally an even redistribution with whichever neighbor
/// exists. Exactly one of the three applies.
pub(crate) fn fix_deficiency<I: Item>(nodes: &mut Vec<Node<I>>, slot: usize) {
    let max = max_children::<I>();
    if slot > 0 && nodes[slot - 1].child_count() + nodes[slot].child_count() <= max {
        let deficient = nodes.remove(slot);
        nodes[slot - 1].absorb(deficient);
        return;
    }
    if slot + 1 < nodes.len()
        && nodes[slot].child_count() + nodes[slot + 1].child_count() <= max
    {
        let right = nodes.remove(slot + 1);
        nodes[slot].absorb(right);
        return;
    }
    // No merge fits: split the surplus evenly. The combined count exceeds
    // max >= 2 * min, so both halves end up within bounds. Requires
    // MAX_CHILDREN >= 4: with min 1 a lone child could have no neighbor.
    debug_assert!(max >= 4, "branching factor too small for deficiency repair");
    debug_assert!(nodes.len() >= 2, "deficient node has no neighbor");
    let a = if slot > 0 { slot - 1 } else { slot };
    let total = nodes[a].child_count() + nodes[a + 1].child_count();
    redistribute_children(nodes, a, total / 2);
}

// === Insertion ===

impl<I: Item> Node<I> {
    /// Insert `item` at base-unit offset `offset` within this subtree.
    ///
    /// Returns the spawn node if this node had to split; the caller attaches
    /// it as the next sibling (or grows the tree by one level at the root).
    pub fn insert_item(&mut self, item: I, offset: usize) -> Option<Node<I>> {
        debug_assert!(offset <= self.len());
        debug_assert!(item.len() <= item_budget::<I>(), "item exceeds leaf size budget");
        let max = max_children::<I>();
        let body = self.make_mut();
        let spawn = match &mut body.val {
            NodeVal::Leaf(items) => insert_into_leaf(items, item, offset, max),
            NodeVal::Internal(children) => {
                // Pick the boundary child; positions on a seam go to the left
                // child so appends coalesce into existing leaves.
                let (slot, acc) = loop {
                    let mut acc = 0;
                    let mut pick = children.len() - 1;
                    let mut pick_acc = 0;
                    for (i, child) in children.iter().enumerate() {
                        if acc + child.len() >= offset {
                            pick = i;
                            pick_acc = acc;
                            break;
                        }
                        acc += child.len();
                        pick_acc = acc;
                    }
                    // Rotate before split: if the target child is full and a
                    // neighbor has room, shift children over instead of
                    // letting the insertion split and grow the tree.
                    if children[pick].child_count() == max {
                        let left_ok =
                            pick > 0 && children[pick - 1].child_count() <= max - 2;
                        let right_ok = pick + 1 < children.len()
                            && children[pick + 1].child_count() <= max - 2;
                        if left_ok {
                            let total = children[pick - 1].child_count() + max;
                            redistribute_children(children, pick - 1, total / 2);
                            continue;
                        } else if right_ok {
                            let total = max + children[pick + 1].child_count();
                            redistribute_children(children, pick, total / 2);
                            continue;
                        }
                    }
                    break (pick, pick_acc);
                };
                let child_spawn = children[slot].insert_item(item, offset - acc);
                match child_spawn {
                    None => None,
                    Some(spawn) => {
                        if children.len() < max {
                            children.insert(slot + 1, spawn);
                            None
                        } else {
                            Some(split_and_insert(children, slot + 1, spawn, max))
                        }
                    }
                }
            }
        };
        refresh_body(body);
        spawn
    }
}

/// Insert into a leaf's item vector, splitting the leaf if it is full.
fn insert_into_leaf<I: Item>(
    items: &mut Vec<I>,
    item: I,
    offset: usize,
    max: usize,
) -> Option<Node<I>> {
    // Locate the slot; an offset strictly inside an item splits that item at
    // the element-local boundary first.
    let mut acc = 0;
    let mut slot = items.len();
    for i in 0..items.len() {
        let l = items[i].len();
        if offset < acc + l {
            if offset == acc {
                slot = i;
            } else {
                let right = items[i].split_at(offset - acc);
                items.insert(i + 1, right);
                slot = i + 1;
            }
            break;
        }
        acc += l;
    }

    // Opportunistic compaction: fold an undersized item into a neighbor
    // instead of growing the leaf.
    if item.is_undersized() {
        let budget = item_budget::<I>();
        if slot > 0 && items[slot - 1].len() + item.len() <= budget {
            items[slot - 1].merge(item);
            return None;
        }
        if slot < items.len() && item.len() + items[slot].len() <= budget {
            let right = std::mem::replace(&mut items[slot], item);
            items[slot].merge(right);
            return None;
        }
    }

    if items.len() < max {
        items.insert(slot, item);
        return None;
    }
    Some(split_and_insert(items, slot, item, max))
}

/// Split a full child container around an insertion slot and place the new
/// child on whichever side its slot falls into. If the slot is in the low
/// half, the old node keeps `max - min` children; symmetric for the high
/// half. Returns the spawn.
fn split_and_insert<C: SpawnFrom<I>, I: Item>(
    children: &mut Vec<C>,
    slot: usize,
    child: C,
    max: usize,
) -> Node<I> {
    let min = max / 2;
    let keep = if slot <= max / 2 { max - min } else { min };
    let mut spawn = children.split_off(keep);
    if slot <= keep {
        children.insert(slot, child);
    } else {
        spawn.insert(slot - keep, child);
    }
    C::node_from(spawn)
}

/// Glue that lets the split rule work over both leaf items and child nodes.
pub(crate) trait SpawnFrom<I: Item>: Sized {
    fn node_from(children: Vec<Self>) -> Node<I>;
}

impl<I: Item> SpawnFrom<I> for I {
    fn node_from(children: Vec<Self>) -> Node<I> {
        Node::new_leaf(children)
    }
}

impl<I: Item> SpawnFrom<I> for Node<I> {
    fn node_from(children: Vec<Self>) -> Node<I> {
        Node::new_internal(children)
    }
}

// === Removal ===

impl<I: Item> Node<I> {
    /// Remove the item addressed by `path` (one child slot per level).
    ///
    /// Deficient children are repaired on the way back up; the root itself is
    /// exempt from the minimum-size invariant.
    pub fn remove_at_path(&mut self, path: &[usize]) -> I {
        let min = min_children::<I>();
        let body = self.make_mut();
        let removed = match &mut body.val {
            NodeVal::Leaf(items) => {
                debug_assert_eq!(path.len(), 1);
                assert!(path[0] < items.len(), "index slot out of range");
                items.remove(path[0])
            }
            NodeVal::Internal(children) => {
                let slot = path[0];
                assert!(slot < children.len(), "index slot out of range");
                let removed = children[slot].remove_at_path(&path[1..]);
                if children[slot].child_count() < min {
                    fix_deficiency(children, slot);
                }
                removed
            }
        };
        refresh_body(body);
        removed
    }
}

// === Join / graft ===

impl<I: Item> Node<I> {
    /// Concatenate two trees, sharing the untouched side entirely when one of
    /// them is empty and touching only the seam path otherwise.
    pub fn join(left: Node<I>, right: Node<I>) -> Node<I> {
        if left.is_empty() {
            return right;
        }
        if right.is_empty() {
            return left;
        }
        if left.height() >= right.height() {
            let mut left = left;
            match left.graft_back(right) {
                Some(remainder) => Node::new_internal(vec![left, remainder]),
                None => left,
            }
        } else {
            let mut right = right;
            match right.graft_front(left) {
                Some(remainder) => Node::new_internal(vec![remainder, right]),
                None => right,
            }
        }
    }

    /// Append `other` (no taller than `self`) at the back seam.
    ///
    /// A returned remainder has the same height as `self` and must be
    /// attached as the next sibling one level up.
    fn graft_back(&mut self, other: Node<I>) -> Option<Node<I>> {
        debug_assert!(self.height() >= other.height());
        if self.height() == other.height() {
            return rebalance_back(self, other);
        }
        let max = max_children::<I>();
        let min = min_children::<I>();
        let body = self.make_mut();
        let NodeVal::Internal(children) = &mut body.val else {
            unreachable!("graft_back descended into a leaf");
        };
        let last = children.len() - 1;
        let remainder = children[last].graft_back(other);
        let spawn = match remainder {
            None => None,
            Some(node) => {
                if children.len() < max {
                    children.push(node);
                    None
                } else {
                    let mut spawn = children.split_off(min);
                    spawn.push(node);
                    Some(Node::new_internal(spawn))
                }
            }
        };
        refresh_body(body);
        spawn
    }

    /// Prepend `other` (no taller than `self`) at the front seam.
    ///
    /// A returned remainder attaches as the *previous* sibling one level up.
    fn graft_front(&mut self, other: Node<I>) -> Option<Node<I>> {
        debug_assert!(self.height() >= other.height());
        if self.height() == other.height() {
            return rebalance_front(other, self);
        }
        let max = max_children::<I>();
        let min = min_children::<I>();
        let body = self.make_mut();
        let NodeVal::Internal(children) = &mut body.val else {
            unreachable!("graft_front descended into a leaf");
        };
        let remainder = children[0].graft_front(other);
        let spawn = match remainder {
            None => None,
            Some(node) => {
                if children.len() < max {
                    children.insert(0, node);
                    None
                } else {
                    // Keep the rightmost `min` children; everything else,
                    // preceded by the remainder, becomes the spawn.
                    let tail = children.split_off(max - min);
                    let mut spawn = vec![node];
                    spawn.append(children);
                    *children = tail;
                    Some(Node::new_internal(spawn))
                }
            }
        };
        refresh_body(body);
        spawn
    }
}

/// Rebalance two same-height siblings so the sequence reads `a` then `b`.
/// Merges them into `a` if the combined size fits one node, otherwise
/// redistributes so both meet the minimum and returns the right node.
fn rebalance_back<I: Item>(a: &mut Node<I>, b: Node<I>) -> Option<Node<I>> {
    let max = max_children::<I>();
    let min = min_children::<I>();
    let mut b = b;
    merge_seam_items(a, &mut b);
    if b.child_count() == 0 {
        return None;
    }
    if a.child_count() + b.child_count() <= max {
        a.absorb(b);
        return None;
    }
    let total = a.child_count() + b.child_count();
    // Leans left, like a bulk load would.
    let target = max.min(total - min);
    let mut pair = [a.clone(), b];
    redistribute_children(&mut pair, 0, target);
    let [new_a, new_b] = pair;
    *a = new_a;
    Some(new_b)
}

/// Mirror of [`rebalance_back`]: the sequence reads `a` then `b`, `b` is the
/// node kept in place, and any overflow is returned as the *left* node.
fn rebalance_front<I: Item>(a: Node<I>, b: &mut Node<I>) -> Option<Node<I>> {
    let max = max_children::<I>();
    let min = min_children::<I>();
    let mut a = a;
    merge_seam_items(&mut a, b);
    if a.child_count() == 0 {
        return None;
    }
    if a.child_count() + b.child_count() <= max {
        b.absorb_front(a);
        return None;
    }
    let total = a.child_count() + b.child_count();
    let target = total - max.min(total - min);
    let mut pair = [a, b.clone()];
    redistribute_children(&mut pair, 0, target);
    let [new_a, new_b] = pair;
    *b = new_b;
    Some(new_a)
}

/// If the seam between two leaves holds an undersized item, fold it into its
/// neighbor across the seam. Compaction only; never required for balance.
fn merge_seam_items<I: Item>(a: &mut Node<I>, b: &mut Node<I>) {
    if !a.is_leaf() || a.child_count() == 0 || b.child_count() == 0 {
        return;
    }
    let budget = item_budget::<I>();
    let last = &a.items()[a.child_count() - 1];
    let first = &b.items()[0];
    if (last.is_undersized() || first.is_undersized())
        && last.len() + first.len() <= budget
    {
        let b_body = b.make_mut();
        let NodeVal::Leaf(b_items) = &mut b_body.val else { unreachable!() };
        let first = b_items.remove(0);
        refresh_body(b_body);
        let a_body = a.make_mut();
        let NodeVal::Leaf(a_items) = &mut a_body.val else { unreachable!() };
        a_items.last_mut().unwrap().merge(first);
        refresh_body(a_body);
    }
}

// === Consistency check ===

impl<I: Item> Node<I> {
    /// Exhaustively verify the tree invariants: uniform height, cached
    /// aggregates matching recomputation, child counts within bounds, and
    /// leaf items within the size budget. Debug/test tool, not a hot path.
    pub fn check_invariants(&self, is_root: bool) {
        let body = self.body();
        let max = max_children::<I>();
        let min = min_children::<I>();
        match &body.val {
            NodeVal::Leaf(items) => {
                assert_eq!(body.height, 0);
                assert!(items.len() <= max, "leaf has {} items, max {}", items.len(), max);
                if !is_root {
                    assert!(
                        items.len() >= min,
                        "non-root leaf has {} items, min {}",
                        items.len(),
                        min
                    );
                }
                for item in items {
                    assert!(item.len() > 0, "empty item stored in leaf");
                    assert!(
                        item.len() <= item_budget::<I>(),
                        "item of size {} exceeds budget {}",
                        item.len(),
                        item_budget::<I>()
                    );
                }
            }
            NodeVal::Internal(children) => {
                assert!(children.len() <= max);
                let floor = if is_root { 2 } else { min };
                assert!(
                    children.len() >= floor,
                    "internal node has {} children, min {}",
                    children.len(),
                    floor
                );
                for child in children {
                    assert_eq!(child.height() + 1, body.height, "uneven tree height");
                    child.check_invariants(false);
                }
            }
        }
        let mut recomputed = self.clone().into_body();
        refresh_body(&mut recomputed);
        assert_eq!(body.len, recomputed.len, "cached len out of date");
        assert_eq!(body.count, recomputed.count, "cached item count out of date");
        assert_eq!(body.summary, recomputed.summary, "cached summary out of date");
    }
}

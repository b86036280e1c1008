//! Two-ended fragment accumulator used while tearing a tree apart.
//!
//! Splitting and range surgery descend the boundary path, pushing every
//! already-passed subtree into the builder as a shared handle (never a deep
//! copy). `finalize_before`/`finalize_after` stitch the fragments back into
//! coherent trees by joining them innermost-outward, so the small fragments
//! near the cut are merged first and each join touches only the seam.

use crate::node::{Node, NodeVal};
use crate::Item;

pub(crate) struct Builder<I: Item> {
    /// Fragments left of the cut, in sequence order (outermost first).
    before: Vec<Node<I>>,
    /// Fragments right of the cut, in *reverse* sequence order.
    after: Vec<Node<I>>,
}

impl<I: Item> Builder<I> {
    pub fn new() -> Self {
        Builder { before: Vec::new(), after: Vec::new() }
    }

    fn push_before(&mut self, node: Node<I>) {
        if !node.is_empty() {
            self.before.push(node);
        }
    }

    fn push_after(&mut self, node: Node<I>) {
        if !node.is_empty() {
            self.after.push(node);
        }
    }

    fn push_before_item(&mut self, item: I) {
        if item.len() > 0 {
            self.before.push(Node::new_leaf(vec![item]));
        }
    }

    fn push_after_item(&mut self, item: I) {
        if item.len() > 0 {
            self.after.push(Node::new_leaf(vec![item]));
        }
    }

    /// Cut `node` at base-unit offset `at`, distributing everything before
    /// the cut to the before side and everything after it to the after side.
    /// Untouched subtrees are pushed wholesale; only the boundary item is
    /// split element-locally.
    pub fn cut(&mut self, node: &Node<I>, at: usize) {
        assert!(at <= node.len(), "split position out of bounds");
        if at == 0 {
            self.push_after(node.clone());
            return;
        }
        if at == node.len() {
            self.push_before(node.clone());
            return;
        }
        match &node.body().val {
            NodeVal::Leaf(items) => {
                let mut acc = 0;
                let mut boundary = items.len();
                for (i, item) in items.iter().enumerate() {
                    if at < acc + item.len() {
                        boundary = i;
                        break;
                    }
                    acc += item.len();
                    self.push_before_item(item.clone());
                }
                let mut rest = boundary;
                let mut split_right = None;
                if boundary < items.len() && at > acc {
                    // The cut lands inside this item: split it in two.
                    let mut left = items[boundary].clone();
                    let right = left.split_at(at - acc);
                    self.push_before_item(left);
                    split_right = Some(right);
                    rest = boundary + 1;
                }
                for item in items[rest..].iter().rev() {
                    self.push_after_item(item.clone());
                }
                // The right half sits closest to the cut, so it goes on top
                // of the after stack, after the trailing items.
                if let Some(right) = split_right {
                    self.push_after_item(right);
                }
            }
            NodeVal::Internal(children) => {
                let mut acc = 0;
                let mut boundary = 0;
                for (i, child) in children.iter().enumerate() {
                    if at < acc + child.len() {
                        boundary = i;
                        break;
                    }
                    acc += child.len();
                    self.push_before(child.clone());
                }
                for child in children[boundary + 1..].iter().rev() {
                    self.push_after(child.clone());
                }
                self.cut(&children[boundary], at - acc);
            }
        }
    }

    /// Collapse the before side into one tree.
    pub fn finalize_before(&mut self) -> Node<I> {
        let mut acc = match self.before.pop() {
            Some(node) => node,
            None => return Node::empty(),
        };
        while let Some(node) = self.before.pop() {
            acc = Node::join(node, acc);
        }
        acc
    }

    /// Collapse the after side into one tree.
    pub fn finalize_after(&mut self) -> Node<I> {
        let mut acc = match self.after.pop() {
            Some(node) => node,
            None => return Node::empty(),
        };
        while let Some(node) = self.after.pop() {
            acc = Node::join(acc, node);
        }
        acc
    }

    /// Collapse both sides into the split pair.
    pub fn finalize_split(mut self) -> (Node<I>, Node<I>) {
        (self.finalize_before(), self.finalize_after())
    }
}

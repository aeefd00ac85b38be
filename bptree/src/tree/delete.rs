//! Removal and rebalancing.
//!
//! After an entry leaves its leaf, the recorded path is walked bottom-up.
//! At every level:
//!
//! 1. a node below `min_keys` is rebalanced through its parent: borrow one
//!    entry from a sibling that can spare it (left first, unless the node
//!    is the first child), otherwise merge with a sibling;
//! 2. a separator equal to the removed key is replaced with the smallest
//!    key of the subtree to its right.
//!
//! A merge that drains the root discards it and promotes the surviving
//! child; the walk stops there. A drained non-root parent keeps its single
//! child and is rebalanced one level up.
//!
//! Separators are copies of leaf keys, so without step 2 a removed key
//! could linger in the internal levels. Routing stays correct either way;
//! the fix-up keeps the internal levels tidy.

use tracing::debug;

use crate::codec::SlotCodec;
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::tree::TreeContext;
use crate::tree::node::{InternalNode, LeafNode, TreeNode};
use crate::tree::path::TreePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rebalanced {
    InPlace,
    RootCollapsed,
}

fn kinds_differ() -> IndexError {
    IndexError::corruption("siblings of different node kinds")
}

fn unwritten() -> IndexError {
    IndexError::corruption("node without a pointer during rebalance")
}

impl<KC, VC> TreeContext<'_, KC, VC>
where
    KC: SlotCodec,
    KC::Item: Ord + Clone,
    VC: SlotCodec,
{
    /// Remove `key`. Returns `false`, touching nothing, if it is absent.
    pub fn remove(&mut self, key: &KC::Item) -> Result<bool, IndexError> {
        let Some(root) = self.root()? else {
            return Ok(false);
        };
        let TreePath {
            mut ancestors,
            mut leaf,
        } = self.resolve_path(root, key)?;
        let Ok(slot) = leaf.search(key, self.keys)? else {
            return Ok(false);
        };

        leaf.remove_entry(slot);
        self.persist(leaf.buffer_mut())?;

        let mut current = TreeNode::Leaf(leaf);
        while let Some(mut parent) = ancestors.pop() {
            if current.key_count() < self.layout.min_keys()
                && self.rebalance(current, &mut parent)? == Rebalanced::RootCollapsed
            {
                return Ok(true);
            }
            self.replace_separator(&mut parent, key)?;
            current = TreeNode::Internal(parent);
        }
        Ok(true)
    }

    fn replace_separator(
        &mut self,
        node: &mut InternalNode,
        removed: &KC::Item,
    ) -> Result<(), IndexError> {
        let Ok(index) = node.keys(self.keys)?.binary_search(removed) else {
            return Ok(());
        };
        let right = node
            .child_at(index + 1)?
            .ok_or_else(|| IndexError::corruption("separator without right child"))?;
        if let Some(successor) = self.subtree_min(right)? {
            node.set_key(index, &successor, self.keys)?;
            self.persist(node.buffer_mut())?;
            debug!(node = ?node.pointer(), index, "replaced stale separator");
        }
        Ok(())
    }

    fn rebalance(
        &mut self,
        node: TreeNode,
        parent: &mut InternalNode,
    ) -> Result<Rebalanced, IndexError> {
        let pointer = node.pointer().ok_or_else(unwritten)?;
        let children = parent.children()?;
        let index = children
            .iter()
            .position(|&child| child == pointer)
            .ok_or_else(|| IndexError::corruption(format!("{pointer} missing from its parent")))?;
        if children.len() < 2 {
            return Err(IndexError::corruption("underflowed node has no siblings"));
        }
        let min_keys = self.layout.min_keys();

        if index > 0 {
            let left = self.read(children[index - 1])?;
            if left.key_count() > min_keys {
                self.borrow_from_left(node, left, parent, index)?;
                return Ok(Rebalanced::InPlace);
            }
        }
        if index + 1 < children.len() {
            let right = self.read(children[index + 1])?;
            if right.key_count() > min_keys {
                self.borrow_from_right(node, right, parent, index)?;
                return Ok(Rebalanced::InPlace);
            }
        }

        let partner_index = if index + 1 < children.len() {
            index + 1
        } else {
            index - 1
        };
        let partner = self.read(children[partner_index])?;
        self.merge(node, index, partner, partner_index, parent)
    }

    fn borrow_from_left(
        &mut self,
        node: TreeNode,
        donor: TreeNode,
        parent: &mut InternalNode,
        index: usize,
    ) -> Result<(), IndexError> {
        match (node, donor) {
            (TreeNode::Leaf(mut node), TreeNode::Leaf(mut donor)) => {
                let last = donor.key_count() - 1;
                let key = donor.key_at(last, self.keys)?;
                let value = donor.value_at(last, self.values)?;
                donor.remove_entry(last);
                node.insert_entry(0, &key, &value, self.keys, self.values)?;
                parent.set_key(index - 1, &key, self.keys)?;
                self.persist(donor.buffer_mut())?;
                self.persist(node.buffer_mut())?;
            }
            (TreeNode::Internal(mut node), TreeNode::Internal(mut donor)) => {
                let mut donor_keys = donor.keys(self.keys)?;
                let mut donor_children = donor.children()?;
                let (Some(moved_key), Some(moved_child)) =
                    (donor_keys.pop(), donor_children.pop())
                else {
                    return Err(IndexError::corruption("empty donor"));
                };
                let separator = parent.key_at(index - 1, self.keys)?;

                let mut keys = node.keys(self.keys)?;
                let mut children = node.children()?;
                keys.insert(0, separator);
                children.insert(0, moved_child);

                donor.set_contents(&donor_keys, &donor_children, self.keys)?;
                node.set_contents(&keys, &children, self.keys)?;
                parent.set_key(index - 1, &moved_key, self.keys)?;
                self.persist(donor.buffer_mut())?;
                self.persist(node.buffer_mut())?;
            }
            _ => return Err(kinds_differ()),
        }
        self.persist(parent.buffer_mut())?;
        debug!(parent = ?parent.pointer(), index, "borrowed from left sibling");
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        node: TreeNode,
        donor: TreeNode,
        parent: &mut InternalNode,
        index: usize,
    ) -> Result<(), IndexError> {
        match (node, donor) {
            (TreeNode::Leaf(mut node), TreeNode::Leaf(mut donor)) => {
                let key = donor.key_at(0, self.keys)?;
                let value = donor.value_at(0, self.values)?;
                donor.remove_entry(0);
                let count = node.key_count();
                node.insert_entry(count, &key, &value, self.keys, self.values)?;
                parent.set_key(index, &donor.key_at(0, self.keys)?, self.keys)?;
                self.persist(donor.buffer_mut())?;
                self.persist(node.buffer_mut())?;
            }
            (TreeNode::Internal(mut node), TreeNode::Internal(mut donor)) => {
                let mut donor_keys = donor.keys(self.keys)?;
                let mut donor_children = donor.children()?;
                if donor_keys.is_empty() || donor_children.is_empty() {
                    return Err(IndexError::corruption("empty donor"));
                }
                let moved_key = donor_keys.remove(0);
                let moved_child = donor_children.remove(0);
                let separator = parent.key_at(index, self.keys)?;

                let mut keys = node.keys(self.keys)?;
                let mut children = node.children()?;
                keys.push(separator);
                children.push(moved_child);

                donor.set_contents(&donor_keys, &donor_children, self.keys)?;
                node.set_contents(&keys, &children, self.keys)?;
                parent.set_key(index, &moved_key, self.keys)?;
                self.persist(donor.buffer_mut())?;
                self.persist(node.buffer_mut())?;
            }
            _ => return Err(kinds_differ()),
        }
        self.persist(parent.buffer_mut())?;
        debug!(parent = ?parent.pointer(), index, "borrowed from right sibling");
        Ok(())
    }

    /// Fold two siblings into the one holding more keys (the underflowed
    /// node on a tie) and drop the other from the parent.
    fn merge(
        &mut self,
        node: TreeNode,
        index: usize,
        partner: TreeNode,
        partner_index: usize,
        parent: &mut InternalNode,
    ) -> Result<Rebalanced, IndexError> {
        let (mut keep, keep_index, gone, gone_index) = if partner.key_count() > node.key_count() {
            (partner, partner_index, node, index)
        } else {
            (node, index, partner, partner_index)
        };
        let gone_pointer = gone.pointer().ok_or_else(unwritten)?;
        let gone_left = gone_index < keep_index;

        // An empty leaf folded into its right neighbour takes the separator
        // on its left with it, unless it is the first child.
        let separator_index = if !gone_left {
            keep_index
        } else if gone.is_leaf() && gone.key_count() == 0 && gone_index > 0 {
            gone_index - 1
        } else {
            gone_index
        };

        match (&mut keep, gone) {
            (TreeNode::Leaf(keep), TreeNode::Leaf(gone)) => {
                self.merge_leaves(keep, &gone, gone_left)?;
            }
            (TreeNode::Internal(keep), TreeNode::Internal(gone)) => {
                let between = parent.key_at(gone_index.min(keep_index), self.keys)?;
                self.merge_internals(keep, &gone, between, gone_left)?;
            }
            _ => return Err(kinds_differ()),
        }
        self.session.remove(gone_pointer)?;

        let mut keys = parent.keys(self.keys)?;
        let mut children = parent.children()?;
        if separator_index >= keys.len() || gone_index >= children.len() {
            return Err(IndexError::corruption("merge outside parent bounds"));
        }
        keys.remove(separator_index);
        children.remove(gone_index);
        parent.set_contents(&keys, &children, self.keys)?;

        debug!(
            parent = ?parent.pointer(),
            kept = ?keep.pointer(),
            removed = %gone_pointer,
            "merged siblings"
        );

        if keys.is_empty() && parent.is_root() {
            keep.set_root(true);
            let new_root = self.persist(keep.buffer_mut())?;
            self.session.set_root(Some(new_root))?;
            if let Some(old_root) = parent.pointer() {
                self.session.remove(old_root)?;
            }
            debug!(root = %new_root, "collapsed root");
            return Ok(Rebalanced::RootCollapsed);
        }

        self.persist(keep.buffer_mut())?;
        self.persist(parent.buffer_mut())?;
        Ok(Rebalanced::InPlace)
    }

    fn merge_leaves(
        &mut self,
        keep: &mut LeafNode,
        gone: &LeafNode,
        gone_left: bool,
    ) -> Result<(), IndexError> {
        let kept = keep.entries(self.keys, self.values)?;
        let removed = gone.entries(self.keys, self.values)?;
        let entries: Vec<_> = if gone_left {
            removed.into_iter().chain(kept).collect()
        } else {
            kept.into_iter().chain(removed).collect()
        };
        keep.set_entries(&entries, self.keys, self.values)?;

        if gone_left {
            let previous = gone.previous_sibling()?;
            keep.set_previous_sibling(previous);
            if let Some(previous) = previous {
                self.relink(previous, keep.pointer(), LinkSide::Next)?;
            }
        } else {
            let next = gone.next_sibling()?;
            keep.set_next_sibling(next);
            if let Some(next) = next {
                self.relink(next, keep.pointer(), LinkSide::Previous)?;
            }
        }
        Ok(())
    }

    fn relink(
        &mut self,
        neighbour: Pointer,
        target: Option<Pointer>,
        side: LinkSide,
    ) -> Result<(), IndexError> {
        let mut leaf = self.read_leaf(neighbour)?;
        match side {
            LinkSide::Previous => leaf.set_previous_sibling(target),
            LinkSide::Next => leaf.set_next_sibling(target),
        }
        self.persist(leaf.buffer_mut())?;
        Ok(())
    }

    fn merge_internals(
        &self,
        keep: &mut InternalNode,
        gone: &InternalNode,
        between: KC::Item,
        gone_left: bool,
    ) -> Result<(), IndexError> {
        let (mut keys, mut children, tail_keys, tail_children) = if gone_left {
            (
                gone.keys(self.keys)?,
                gone.children()?,
                keep.keys(self.keys)?,
                keep.children()?,
            )
        } else {
            (
                keep.keys(self.keys)?,
                keep.children()?,
                gone.keys(self.keys)?,
                gone.children()?,
            )
        };
        keys.push(between);
        keys.extend(tail_keys);
        children.extend(tail_children);
        keep.set_contents(&keys, &children, self.keys)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum LinkSide {
    Previous,
    Next,
}

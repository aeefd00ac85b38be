//! Insertion and split propagation.
//!
//! A full leaf is split in two: the existing leaf keeps the lower
//! `min_keys + 1` entries and a new right sibling takes the rest. The
//! sibling's first key is promoted into the parent. A parent that
//! overflows splits in turn around its middle key, which moves up a level.
//! When the root splits, a new internal root is grown above it.

use std::slice;

use tracing::debug;

use crate::codec::SlotCodec;
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::tree::TreeContext;
use crate::tree::node::{InternalNode, LeafNode};
use crate::tree::path::TreePath;

/// A node split in two, waiting for its separator to land in the parent.
struct Split<K> {
    separator: K,
    left: Pointer,
    right: Pointer,
}

impl<KC, VC> TreeContext<'_, KC, VC>
where
    KC: SlotCodec,
    KC::Item: Ord + Clone,
    VC: SlotCodec,
{
    /// Insert a new entry. Returns the leaf that holds it afterwards.
    pub fn insert(&mut self, key: KC::Item, value: VC::Item) -> Result<LeafNode, IndexError> {
        let root = self.root_or_create()?;
        let TreePath {
            ancestors,
            mut leaf,
        } = self.resolve_path(root, &key)?;

        let slot = match leaf.search(&key, self.keys)? {
            Ok(_) => return Err(IndexError::KeyExists),
            Err(slot) => slot,
        };

        if !leaf.is_full() {
            leaf.insert_entry(slot, &key, &value, self.keys, self.values)?;
            self.persist(leaf.buffer_mut())?;
            return Ok(leaf);
        }

        let (holder, split) = self.split_leaf(leaf, slot, key, value)?;
        self.propagate(ancestors, split)?;
        Ok(holder)
    }

    /// Overwrite the value of an existing key. Returns the updated leaf, or
    /// `None` when the key is absent.
    pub fn update(
        &mut self,
        key: &KC::Item,
        value: &VC::Item,
    ) -> Result<Option<LeafNode>, IndexError> {
        let Some(root) = self.root()? else {
            return Ok(None);
        };
        let mut leaf = self.find_leaf(root, key)?;
        let Ok(slot) = leaf.search(key, self.keys)? else {
            return Ok(None);
        };
        leaf.set_value_at(slot, value, self.values)?;
        self.persist(leaf.buffer_mut())?;
        Ok(Some(leaf))
    }

    /// Update the key if present, insert it otherwise.
    pub fn upsert(&mut self, key: KC::Item, value: VC::Item) -> Result<LeafNode, IndexError> {
        match self.update(&key, &value)? {
            Some(leaf) => Ok(leaf),
            None => self.insert(key, value),
        }
    }

    fn split_leaf(
        &mut self,
        mut leaf: LeafNode,
        slot: usize,
        key: KC::Item,
        value: VC::Item,
    ) -> Result<(LeafNode, Split<KC::Item>), IndexError> {
        let mut entries = leaf.entries(self.keys, self.values)?;
        entries.insert(slot, (key, value));

        let keep = self.layout.min_keys() + 1;
        let upper = entries.split_off(keep);
        let separator = upper
            .first()
            .map(|(key, _)| key.clone())
            .ok_or_else(|| IndexError::corruption("leaf split produced an empty sibling"))?;

        let old_next = leaf.next_sibling()?;
        let mut sibling = self.new_leaf()?;
        sibling.set_entries(&upper, self.keys, self.values)?;
        sibling.set_previous_sibling(leaf.pointer());
        sibling.set_next_sibling(old_next);
        let right = self.persist(sibling.buffer_mut())?;

        if let Some(next) = old_next {
            let mut next_leaf = self.read_leaf(next)?;
            next_leaf.set_previous_sibling(Some(right));
            self.persist(next_leaf.buffer_mut())?;
        }

        leaf.set_entries(&entries, self.keys, self.values)?;
        leaf.set_next_sibling(Some(right));
        leaf.set_root(false);
        let left = self.persist(leaf.buffer_mut())?;

        debug!(%left, %right, "split leaf");

        let holder = if slot < keep { leaf } else { sibling };
        Ok((
            holder,
            Split {
                separator,
                left,
                right,
            },
        ))
    }

    /// Carry a split up the recorded path until a parent absorbs it or a
    /// new root is grown.
    fn propagate(
        &mut self,
        mut ancestors: Vec<InternalNode>,
        split: Split<KC::Item>,
    ) -> Result<(), IndexError> {
        let mut pending = Some(split);
        while let Some(Split {
            separator,
            left,
            right,
        }) = pending.take()
        {
            let Some(mut parent) = ancestors.pop() else {
                return self.grow_root(separator, left, right);
            };

            let mut keys = parent.keys(self.keys)?;
            let mut children = parent.children()?;
            let index = children
                .iter()
                .position(|&child| child == left)
                .ok_or_else(|| IndexError::corruption(format!("{left} missing from its parent")))?;
            keys.insert(index, separator);
            children.insert(index + 1, right);

            if keys.len() <= self.layout.max_keys() {
                parent.set_contents(&keys, &children, self.keys)?;
                self.persist(parent.buffer_mut())?;
                return Ok(());
            }

            let middle = self.layout.degree() / 2;
            let right_keys = keys.split_off(middle + 1);
            let right_children = children.split_off(middle + 1);
            let promoted = keys
                .pop()
                .ok_or_else(|| IndexError::corruption("internal split without a middle key"))?;

            parent.set_root(false);
            parent.set_contents(&keys, &children, self.keys)?;
            let parent_pointer = self.persist(parent.buffer_mut())?;

            let mut sibling = self.new_internal()?;
            sibling.set_contents(&right_keys, &right_children, self.keys)?;
            let sibling_pointer = self.persist(sibling.buffer_mut())?;

            debug!(left = %parent_pointer, right = %sibling_pointer, "split internal node");

            pending = Some(Split {
                separator: promoted,
                left: parent_pointer,
                right: sibling_pointer,
            });
        }
        Ok(())
    }

    fn grow_root(
        &mut self,
        separator: KC::Item,
        left: Pointer,
        right: Pointer,
    ) -> Result<(), IndexError> {
        let mut root = self.new_internal()?;
        root.set_contents(slice::from_ref(&separator), &[left, right], self.keys)?;
        root.set_root(true);
        let pointer = self.persist(root.buffer_mut())?;
        self.session.set_root(Some(pointer))?;
        debug!(root = %pointer, "grew new root");
        Ok(())
    }
}

//! Node model: one owned buffer, read as a leaf or an internal node.
//!
//! The buffer is the single source of truth. Typed accessors decode slots
//! on demand through the tree's codecs and mutators write straight back
//! into the bytes, so a node can always be persisted as-is.

use crate::codec::{CodecError, SlotCodec};
use crate::pointer::Pointer;
use crate::tree::layout::{FLAG_LEAF, FLAG_ROOT, NodeLayout};

/// Raw node bytes plus the node's own address once it has been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBuffer {
    pointer: Option<Pointer>,
    data: Vec<u8>,
}

impl NodeBuffer {
    #[must_use]
    pub const fn new(pointer: Option<Pointer>, data: Vec<u8>) -> Self {
        Self { pointer, data }
    }

    /// Address of the node; `None` until first written.
    #[must_use]
    pub const fn pointer(&self) -> Option<Pointer> {
        self.pointer
    }

    pub const fn set_pointer(&mut self, pointer: Pointer) {
        self.pointer = Some(pointer);
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn is_root(&self) -> bool {
        NodeLayout::flags(&self.data) & FLAG_ROOT != 0
    }

    fn set_root(&mut self, root: bool) {
        NodeLayout::set_flag(&mut self.data, FLAG_ROOT, root);
    }
}

fn check_size(layout: &NodeLayout, data: &[u8]) -> Result<(), CodecError> {
    if data.len() == layout.node_size() {
        Ok(())
    } else {
        Err(CodecError::WidthMismatch {
            expected: layout.node_size(),
            actual: data.len(),
        })
    }
}

fn check_capacity(capacity: usize, requested: usize) -> Result<(), CodecError> {
    if requested <= capacity {
        Ok(())
    } else {
        Err(CodecError::SlotOverflow {
            capacity,
            requested,
        })
    }
}

fn write_pointer(out: &mut [u8], pointer: Option<Pointer>) {
    match pointer {
        Some(pointer) => out.copy_from_slice(&pointer.to_bytes()),
        None => out.fill(0),
    }
}

/// A decoded node.
#[derive(Debug, Clone)]
pub enum TreeNode {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl TreeNode {
    /// Interpret stored bytes as a node of this tree.
    pub fn decode(pointer: Pointer, data: Vec<u8>, layout: NodeLayout) -> Result<Self, CodecError> {
        check_size(&layout, &data)?;
        let buffer = NodeBuffer::new(Some(pointer), data);
        if NodeLayout::flags(buffer.as_bytes()) & FLAG_LEAF != 0 {
            Ok(Self::Leaf(LeafNode { buffer, layout }))
        } else {
            Ok(Self::Internal(InternalNode { buffer, layout }))
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    #[must_use]
    pub const fn pointer(&self) -> Option<Pointer> {
        self.buffer().pointer()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.buffer().is_root()
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.key_count(),
            Self::Internal(internal) => internal.key_count(),
        }
    }

    #[must_use]
    pub const fn buffer(&self) -> &NodeBuffer {
        match self {
            Self::Leaf(leaf) => &leaf.buffer,
            Self::Internal(internal) => &internal.buffer,
        }
    }

    pub const fn buffer_mut(&mut self) -> &mut NodeBuffer {
        match self {
            Self::Leaf(leaf) => &mut leaf.buffer,
            Self::Internal(internal) => &mut internal.buffer,
        }
    }

    pub fn set_root(&mut self, root: bool) {
        self.buffer_mut().set_root(root);
    }
}

/// Leaf: sorted key/value slots plus previous/next sibling pointers.
#[derive(Debug, Clone)]
pub struct LeafNode {
    buffer: NodeBuffer,
    layout: NodeLayout,
}

impl LeafNode {
    /// Turn an empty buffer from the backend into a fresh leaf.
    pub fn from_empty(mut data: Vec<u8>, layout: NodeLayout) -> Result<Self, CodecError> {
        check_size(&layout, &data)?;
        data.fill(0);
        NodeLayout::set_flag(&mut data, FLAG_LEAF, true);
        Ok(Self {
            buffer: NodeBuffer::new(None, data),
            layout,
        })
    }

    #[must_use]
    pub const fn pointer(&self) -> Option<Pointer> {
        self.buffer.pointer()
    }

    #[must_use]
    pub const fn buffer(&self) -> &NodeBuffer {
        &self.buffer
    }

    pub const fn buffer_mut(&mut self) -> &mut NodeBuffer {
        &mut self.buffer
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.buffer.is_root()
    }

    pub fn set_root(&mut self, root: bool) {
        self.buffer.set_root(root);
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.layout.leaf_count(&self.buffer.data)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.key_count() >= self.layout.max_keys()
    }

    pub fn key_at<KC: SlotCodec>(&self, i: usize, keys: &KC) -> Result<KC::Item, CodecError> {
        keys.decode(self.layout.leaf_key(&self.buffer.data, i))
    }

    pub fn value_at<VC: SlotCodec>(&self, i: usize, values: &VC) -> Result<VC::Item, CodecError> {
        values.decode(self.layout.leaf_value(&self.buffer.data, i))
    }

    pub fn keys<KC: SlotCodec>(&self, keys: &KC) -> Result<Vec<KC::Item>, CodecError> {
        (0..self.key_count()).map(|i| self.key_at(i, keys)).collect()
    }

    pub fn entries<KC: SlotCodec, VC: SlotCodec>(
        &self,
        keys: &KC,
        values: &VC,
    ) -> Result<Vec<(KC::Item, VC::Item)>, CodecError> {
        (0..self.key_count())
            .map(|i| Ok((self.key_at(i, keys)?, self.value_at(i, values)?)))
            .collect()
    }

    /// Binary search for `key`: `Ok(slot)` if present, `Err(insert_at)`
    /// otherwise.
    pub fn search<KC>(&self, key: &KC::Item, keys: &KC) -> Result<Result<usize, usize>, CodecError>
    where
        KC: SlotCodec,
        KC::Item: Ord,
    {
        let (mut low, mut high) = (0, self.key_count());
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key_at(mid, keys)?.cmp(key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(low))
    }

    /// Insert an entry at slot `i`, shifting later slots right.
    pub fn insert_entry<KC: SlotCodec, VC: SlotCodec>(
        &mut self,
        i: usize,
        key: &KC::Item,
        value: &VC::Item,
        keys: &KC,
        values: &VC,
    ) -> Result<(), CodecError> {
        let count = self.key_count();
        check_capacity(self.layout.max_keys(), count + 1)?;

        let mut key_bytes = vec![0u8; self.layout.key_width()];
        let mut value_bytes = vec![0u8; self.layout.value_width()];
        keys.encode(key, &mut key_bytes)?;
        values.encode(value, &mut value_bytes)?;

        let slot = i.min(count);
        self.layout.open_leaf_slot(&mut self.buffer.data, slot, count);
        self.layout
            .leaf_key_mut(&mut self.buffer.data, slot)
            .copy_from_slice(&key_bytes);
        self.layout
            .leaf_value_mut(&mut self.buffer.data, slot)
            .copy_from_slice(&value_bytes);
        Ok(())
    }

    /// Remove slot `i`, shifting later slots left.
    pub fn remove_entry(&mut self, i: usize) {
        let count = self.key_count();
        if i < count {
            self.layout.close_leaf_slot(&mut self.buffer.data, i, count);
        }
    }

    pub fn set_value_at<VC: SlotCodec>(
        &mut self,
        i: usize,
        value: &VC::Item,
        values: &VC,
    ) -> Result<(), CodecError> {
        values.encode(value, self.layout.leaf_value_mut(&mut self.buffer.data, i))
    }

    /// Replace all entries, zeroing the unused tail.
    pub fn set_entries<KC: SlotCodec, VC: SlotCodec>(
        &mut self,
        entries: &[(KC::Item, VC::Item)],
        keys: &KC,
        values: &VC,
    ) -> Result<(), CodecError> {
        check_capacity(self.layout.max_keys(), entries.len())?;
        self.layout.clear_leaf_slots(&mut self.buffer.data);
        for (i, (key, value)) in entries.iter().enumerate() {
            keys.encode(key, self.layout.leaf_key_mut(&mut self.buffer.data, i))?;
            values.encode(value, self.layout.leaf_value_mut(&mut self.buffer.data, i))?;
        }
        Ok(())
    }

    pub fn previous_sibling(&self) -> Result<Option<Pointer>, CodecError> {
        Pointer::from_bytes(self.layout.previous_sibling(&self.buffer.data))
    }

    pub fn next_sibling(&self) -> Result<Option<Pointer>, CodecError> {
        Pointer::from_bytes(self.layout.next_sibling(&self.buffer.data))
    }

    pub fn set_previous_sibling(&mut self, pointer: Option<Pointer>) {
        write_pointer(
            self.layout.previous_sibling_mut(&mut self.buffer.data),
            pointer,
        );
    }

    pub fn set_next_sibling(&mut self, pointer: Option<Pointer>) {
        write_pointer(self.layout.next_sibling_mut(&mut self.buffer.data), pointer);
    }
}

/// Internal node: sorted separator keys and `keys + 1` child pointers.
#[derive(Debug, Clone)]
pub struct InternalNode {
    buffer: NodeBuffer,
    layout: NodeLayout,
}

impl InternalNode {
    /// Turn an empty buffer from the backend into a fresh internal node.
    pub fn from_empty(mut data: Vec<u8>, layout: NodeLayout) -> Result<Self, CodecError> {
        check_size(&layout, &data)?;
        data.fill(0);
        Ok(Self {
            buffer: NodeBuffer::new(None, data),
            layout,
        })
    }

    #[must_use]
    pub const fn pointer(&self) -> Option<Pointer> {
        self.buffer.pointer()
    }

    #[must_use]
    pub const fn buffer(&self) -> &NodeBuffer {
        &self.buffer
    }

    pub const fn buffer_mut(&mut self) -> &mut NodeBuffer {
        &mut self.buffer
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.buffer.is_root()
    }

    pub fn set_root(&mut self, root: bool) {
        self.buffer.set_root(root);
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.layout.internal_key_count(&self.buffer.data)
    }

    pub fn key_at<KC: SlotCodec>(&self, i: usize, keys: &KC) -> Result<KC::Item, CodecError> {
        keys.decode(self.layout.internal_key(&self.buffer.data, i))
    }

    pub fn keys<KC: SlotCodec>(&self, keys: &KC) -> Result<Vec<KC::Item>, CodecError> {
        (0..self.key_count()).map(|i| self.key_at(i, keys)).collect()
    }

    pub fn set_key<KC: SlotCodec>(
        &mut self,
        i: usize,
        key: &KC::Item,
        keys: &KC,
    ) -> Result<(), CodecError> {
        check_capacity(self.layout.max_keys(), i + 1)?;
        keys.encode(key, self.layout.internal_key_mut(&mut self.buffer.data, i))
    }

    pub fn child_at(&self, i: usize) -> Result<Option<Pointer>, CodecError> {
        if i >= self.layout.degree() {
            return Ok(None);
        }
        Pointer::from_bytes(self.layout.child(&self.buffer.data, i))
    }

    pub fn children(&self) -> Result<Vec<Pointer>, CodecError> {
        (0..self.layout.child_count(&self.buffer.data))
            .map(|i| self.child_at(i)?.ok_or(CodecError::NullPointer))
            .collect()
    }

    pub fn index_of_child(&self, pointer: Pointer) -> Result<Option<usize>, CodecError> {
        Ok(self.children()?.iter().position(|&child| child == pointer))
    }

    /// Rewrite every key and child slot, zeroing the unused tail.
    pub fn set_contents<KC: SlotCodec>(
        &mut self,
        keys: &[KC::Item],
        children: &[Pointer],
        codec: &KC,
    ) -> Result<(), CodecError> {
        check_capacity(self.layout.max_keys(), keys.len())?;
        check_capacity(self.layout.degree(), children.len())?;

        self.layout.clear_internal_slots(&mut self.buffer.data);
        for (i, child) in children.iter().enumerate() {
            write_pointer(self.layout.child_mut(&mut self.buffer.data, i), Some(*child));
        }
        for (i, key) in keys.iter().enumerate() {
            codec.encode(key, self.layout.internal_key_mut(&mut self.buffer.data, i))?;
        }
        Ok(())
    }

    /// Child responsible for `key`: an exact separator match goes right,
    /// otherwise the child left of the first larger separator.
    pub fn route<KC>(&self, key: &KC::Item, keys: &KC) -> Result<Pointer, CodecError>
    where
        KC: SlotCodec,
        KC::Item: Ord,
    {
        let index = match self.keys(keys)?.binary_search(key) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        self.child_at(index)?.ok_or(CodecError::NullPointer)
    }
}

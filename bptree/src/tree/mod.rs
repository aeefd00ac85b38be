//! B+Tree algorithms over an [`IoSession`].
//!
//! [`TreeContext`] bundles what every algorithm step needs: the node layout,
//! the key and value codecs, and the session of the current operation. The
//! algorithms themselves live in submodules as further `impl` blocks:
//!
//! - `path`: descent, lookups, leaf chain walks;
//! - `insert`: leaf insertion and split propagation;
//! - `delete`: removal, separator fix-up, borrow/merge/collapse;
//! - [`iter`]: ordered and range iteration over the leaf chain.
//!
//! # Design
//!
//! Nodes are read into owned buffers, mutated in memory and persisted
//! explicitly. Propagation (splits upward, rebalancing upward) is iterative
//! over the path recorded on the way down; nothing recurses.

mod delete;
mod insert;
pub mod iter;
pub mod layout;
pub mod node;
mod path;

use crate::codec::SlotCodec;
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::session::IoSession;
use layout::NodeLayout;
use node::{InternalNode, LeafNode, NodeBuffer, TreeNode};

/// Everything one tree operation works with.
pub struct TreeContext<'a, KC, VC> {
    layout: NodeLayout,
    keys: &'a KC,
    values: &'a VC,
    session: &'a mut dyn IoSession,
}

impl<'a, KC, VC> TreeContext<'a, KC, VC>
where
    KC: SlotCodec,
    KC::Item: Ord + Clone,
    VC: SlotCodec,
{
    pub fn new(
        layout: NodeLayout,
        keys: &'a KC,
        values: &'a VC,
        session: &'a mut dyn IoSession,
    ) -> Self {
        Self {
            layout,
            keys,
            values,
            session,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> NodeLayout {
        self.layout
    }

    pub(crate) fn read(&mut self, pointer: Pointer) -> Result<TreeNode, IndexError> {
        let data = self.session.read(pointer)?;
        Ok(TreeNode::decode(pointer, data, self.layout)?)
    }

    pub(crate) fn read_leaf(&mut self, pointer: Pointer) -> Result<LeafNode, IndexError> {
        match self.read(pointer)? {
            TreeNode::Leaf(leaf) => Ok(leaf),
            TreeNode::Internal(_) => Err(IndexError::corruption(format!(
                "expected leaf at {pointer}"
            ))),
        }
    }

    pub(crate) fn new_leaf(&self) -> Result<LeafNode, IndexError> {
        Ok(LeafNode::from_empty(self.session.empty_node(), self.layout)?)
    }

    pub(crate) fn new_internal(&self) -> Result<InternalNode, IndexError> {
        Ok(InternalNode::from_empty(
            self.session.empty_node(),
            self.layout,
        )?)
    }

    /// Write a node through the session: a first write assigns its pointer,
    /// later writes update it in place.
    pub(crate) fn persist(&mut self, buffer: &mut NodeBuffer) -> Result<Pointer, IndexError> {
        if let Some(pointer) = buffer.pointer() {
            self.session.update(pointer, buffer.as_bytes())?;
            return Ok(pointer);
        }
        let pointer = self.session.write(buffer.as_bytes())?;
        buffer.set_pointer(pointer);
        Ok(pointer)
    }

    pub(crate) fn root(&mut self) -> Result<Option<Pointer>, IndexError> {
        Ok(self.session.root_pointer()?)
    }

    /// Root of the tree, creating an empty root leaf on first use.
    pub(crate) fn root_or_create(&mut self) -> Result<Pointer, IndexError> {
        if let Some(root) = self.root()? {
            return Ok(root);
        }
        let mut leaf = self.new_leaf()?;
        leaf.set_root(true);
        let root = self.persist(leaf.buffer_mut())?;
        self.session.set_root(Some(root))?;
        tracing::debug!(%root, "created root leaf");
        Ok(root)
    }

    /// Discard every node of the tree and clear the root record.
    pub fn purge(&mut self) -> Result<usize, IndexError> {
        let Some(root) = self.root()? else {
            return Ok(0);
        };
        let nodes = self.collect_nodes(root)?;
        for pointer in &nodes {
            self.session.remove(*pointer)?;
        }
        self.session.set_root(None)?;
        Ok(nodes.len())
    }
}

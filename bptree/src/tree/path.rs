//! Descent from the root and walks along the leaf chain.

use crate::codec::{CodecError, SlotCodec};
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::tree::TreeContext;
use crate::tree::node::{InternalNode, LeafNode, TreeNode};

/// Deepest tree a descent accepts before declaring the structure corrupt.
pub(crate) const MAX_DEPTH: usize = 64;

/// Nodes visited from the root down to the responsible leaf.
pub(crate) struct TreePath {
    /// Internal nodes, root first.
    pub ancestors: Vec<InternalNode>,
    pub leaf: LeafNode,
}

fn too_deep() -> IndexError {
    IndexError::corruption(format!("tree deeper than {MAX_DEPTH} levels"))
}

fn first_child(node: &InternalNode) -> Result<Pointer, CodecError> {
    node.child_at(0)?.ok_or(CodecError::NullPointer)
}

fn last_child(node: &InternalNode) -> Result<Pointer, CodecError> {
    node.children()?
        .last()
        .copied()
        .ok_or(CodecError::NullPointer)
}

impl<KC, VC> TreeContext<'_, KC, VC>
where
    KC: SlotCodec,
    KC::Item: Ord + Clone,
    VC: SlotCodec,
{
    /// Record the path to the leaf responsible for `key`.
    pub(crate) fn resolve_path(
        &mut self,
        root: Pointer,
        key: &KC::Item,
    ) -> Result<TreePath, IndexError> {
        let mut ancestors = Vec::new();
        let mut pointer = root;
        for _ in 0..MAX_DEPTH {
            match self.read(pointer)? {
                TreeNode::Leaf(leaf) => return Ok(TreePath { ancestors, leaf }),
                TreeNode::Internal(node) => {
                    pointer = node.route(key, self.keys)?;
                    ancestors.push(node);
                }
            }
        }
        Err(too_deep())
    }

    /// Leaf responsible for `key`, without recording the path.
    pub(crate) fn find_leaf(
        &mut self,
        root: Pointer,
        key: &KC::Item,
    ) -> Result<LeafNode, IndexError> {
        let keys = self.keys;
        self.descend(root, |node| node.route(key, keys))
    }

    pub(crate) fn leftmost_leaf(&mut self, from: Pointer) -> Result<LeafNode, IndexError> {
        self.descend(from, first_child)
    }

    pub(crate) fn rightmost_leaf(&mut self, from: Pointer) -> Result<LeafNode, IndexError> {
        self.descend(from, last_child)
    }

    fn descend(
        &mut self,
        from: Pointer,
        pick: impl Fn(&InternalNode) -> Result<Pointer, CodecError>,
    ) -> Result<LeafNode, IndexError> {
        let mut pointer = from;
        for _ in 0..MAX_DEPTH {
            match self.read(pointer)? {
                TreeNode::Leaf(leaf) => return Ok(leaf),
                TreeNode::Internal(node) => pointer = pick(&node)?,
            }
        }
        Err(too_deep())
    }

    /// Smallest key in the subtree rooted at `from`.
    pub(crate) fn subtree_min(&mut self, from: Pointer) -> Result<Option<KC::Item>, IndexError> {
        let leaf = self.leftmost_leaf(from)?;
        if leaf.key_count() == 0 {
            return Ok(None);
        }
        Ok(Some(leaf.key_at(0, self.keys)?))
    }

    pub fn get(&mut self, key: &KC::Item) -> Result<Option<VC::Item>, IndexError> {
        let Some(root) = self.root()? else {
            return Ok(None);
        };
        let leaf = self.find_leaf(root, key)?;
        match leaf.search(key, self.keys)? {
            Ok(slot) => Ok(Some(leaf.value_at(slot, self.values)?)),
            Err(_) => Ok(None),
        }
    }

    /// Number of entries, counted along the leaf chain.
    pub fn size(&mut self) -> Result<usize, IndexError> {
        let Some(root) = self.root()? else {
            return Ok(0);
        };
        let mut leaf = self.leftmost_leaf(root)?;
        let mut size = leaf.key_count();
        while let Some(next) = leaf.next_sibling()? {
            leaf = self.read_leaf(next)?;
            size += leaf.key_count();
        }
        Ok(size)
    }

    /// Levels from the root down to the leaves; 0 for a tree without root.
    pub fn height(&mut self) -> Result<usize, IndexError> {
        let Some(mut pointer) = self.root()? else {
            return Ok(0);
        };
        for height in 1..=MAX_DEPTH {
            match self.read(pointer)? {
                TreeNode::Leaf(_) => return Ok(height),
                TreeNode::Internal(node) => pointer = first_child(&node)?,
            }
        }
        Err(too_deep())
    }

    /// Largest key in the tree.
    pub fn last_key(&mut self) -> Result<Option<KC::Item>, IndexError> {
        let Some(root) = self.root()? else {
            return Ok(None);
        };
        let leaf = self.rightmost_leaf(root)?;
        match leaf.key_count() {
            0 => Ok(None),
            count => Ok(Some(leaf.key_at(count - 1, self.keys)?)),
        }
    }

    /// Every node reachable from `root`, parents before children.
    pub(crate) fn collect_nodes(&mut self, root: Pointer) -> Result<Vec<Pointer>, IndexError> {
        let mut nodes = vec![root];
        let mut level = vec![root];
        for _ in 0..MAX_DEPTH {
            let mut next_level = Vec::new();
            for pointer in level {
                if let TreeNode::Internal(node) = self.read(pointer)? {
                    next_level.extend(node.children()?);
                }
            }
            if next_level.is_empty() {
                return Ok(nodes);
            }
            nodes.extend_from_slice(&next_level);
            level = next_level;
        }
        Err(too_deep())
    }
}

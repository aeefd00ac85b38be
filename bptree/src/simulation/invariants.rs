//! Structural snapshots and invariant checks.
//!
//! [`TreeShape::capture`] reads every node of an index into a plain tree of
//! keys and pointers. [`TreeShape::render`] prints it compactly, e.g.
//! `[7]([3,5]({1,2}{3,4}{5,6})[9,11]({7,8}{9,10}{11,12}))`, and
//! [`InvariantChecker`] verifies the B+Tree invariants on it.

use std::fmt::Display;
use std::sync::Arc;

use crate::codec::SlotCodec;
use crate::error::IndexError;
use crate::index::BPlusTreeIndex;
use crate::pointer::Pointer;
use crate::session::ImmediateSession;
use crate::storage::IndexStorage;
use crate::tree::TreeContext;
use crate::tree::layout::NodeLayout;
use crate::tree::node::TreeNode;

/// One node of a captured tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeShape<K> {
    Leaf {
        pointer: Pointer,
        root: bool,
        keys: Vec<K>,
        previous: Option<Pointer>,
        next: Option<Pointer>,
    },
    Internal {
        pointer: Pointer,
        root: bool,
        keys: Vec<K>,
        children: Vec<Self>,
    },
}

impl<K> NodeShape<K> {
    const fn keys(&self) -> &Vec<K> {
        match self {
            Self::Leaf { keys, .. } | Self::Internal { keys, .. } => keys,
        }
    }

    const fn is_root(&self) -> bool {
        match self {
            Self::Leaf { root, .. } | Self::Internal { root, .. } => *root,
        }
    }
}

/// Captured tree; `root` is `None` before the first write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeShape<K> {
    pub root: Option<NodeShape<K>>,
    pub layout: NodeLayout,
}

impl<K: Ord + Clone + Display> TreeShape<K> {
    /// Read every node of the index.
    pub fn capture<S, KC, VC>(index: &BPlusTreeIndex<S, KC, VC>) -> Result<Self, IndexError>
    where
        S: IndexStorage,
        KC: SlotCodec<Item = K> + Clone,
        VC: SlotCodec + Clone,
        VC::Item: Clone,
    {
        let layout = index.layout();
        let mut session = ImmediateSession::new(
            Arc::clone(index.storage()),
            index.index_id(),
            layout.node_size(),
        );
        let keys = index.key_codec().clone();
        let values = index.value_codec().clone();
        let mut ctx = TreeContext::new(layout, &keys, &values, &mut session);
        let root = match ctx.root()? {
            Some(pointer) => Some(capture_node(&mut ctx, pointer, &keys)?),
            None => None,
        };
        Ok(Self { root, layout })
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(root) = &self.root {
            render_node(root, &mut out);
        }
        out
    }

    /// Leaves in key order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&NodeShape<K>> {
        let mut leaves = Vec::new();
        if let Some(root) = &self.root {
            collect_leaves(root, &mut leaves);
        }
        leaves
    }

    /// All keys in leaf order.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.leaves()
            .into_iter()
            .flat_map(|leaf| leaf.keys().iter().cloned())
            .collect()
    }
}

fn capture_node<KC, VC>(
    ctx: &mut TreeContext<'_, KC, VC>,
    pointer: Pointer,
    keys: &KC,
) -> Result<NodeShape<KC::Item>, IndexError>
where
    KC: SlotCodec,
    KC::Item: Ord + Clone,
    VC: SlotCodec,
{
    match ctx.read(pointer)? {
        TreeNode::Leaf(leaf) => Ok(NodeShape::Leaf {
            pointer,
            root: leaf.is_root(),
            keys: leaf.keys(keys)?,
            previous: leaf.previous_sibling()?,
            next: leaf.next_sibling()?,
        }),
        TreeNode::Internal(node) => {
            let children = node
                .children()?
                .into_iter()
                .map(|child| capture_node(ctx, child, keys))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(NodeShape::Internal {
                pointer,
                root: node.is_root(),
                keys: node.keys(keys)?,
                children,
            })
        }
    }
}

fn join<K: Display>(keys: &[K]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn render_node<K: Display>(node: &NodeShape<K>, out: &mut String) {
    match node {
        NodeShape::Leaf { keys, .. } => {
            out.push('{');
            out.push_str(&join(keys));
            out.push('}');
        }
        NodeShape::Internal { keys, children, .. } => {
            out.push('[');
            out.push_str(&join(keys));
            out.push_str("](");
            for child in children {
                render_node(child, out);
            }
            out.push(')');
        }
    }
}

fn collect_leaves<'a, K>(node: &'a NodeShape<K>, leaves: &mut Vec<&'a NodeShape<K>>) {
    match node {
        NodeShape::Leaf { .. } => leaves.push(node),
        NodeShape::Internal { children, .. } => {
            for child in children {
                collect_leaves(child, leaves);
            }
        }
    }
}

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub description: String,
    pub context: String,
}

/// Collects invariant violations of a captured tree.
#[derive(Debug, Default)]
pub struct InvariantChecker {
    violations: Vec<InvariantViolation>,
}

impl InvariantChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    fn violation(&mut self, description: &str, context: String) {
        self.violations.push(InvariantViolation {
            description: description.to_string(),
            context,
        });
    }

    /// Check ordering, occupancy, separator bounds, uniform depth, root
    /// flags and the leaf chain.
    pub fn check<K: Ord + Clone + Display>(&mut self, shape: &TreeShape<K>) {
        let Some(root) = &shape.root else {
            return;
        };
        if !root.is_root() {
            self.violation("root flag missing", render_context(root));
        }
        let mut leaf_depths = Vec::new();
        self.check_node(root, &shape.layout, true, None, None, 1, &mut leaf_depths);
        leaf_depths.dedup();
        if leaf_depths.len() > 1 {
            self.violation("leaves at different depths", format!("{leaf_depths:?}"));
        }
        self.check_chain(&shape.leaves());
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node<K: Ord + Clone + Display>(
        &mut self,
        node: &NodeShape<K>,
        layout: &NodeLayout,
        is_root: bool,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaf_depths: &mut Vec<usize>,
    ) {
        let keys = node.keys();
        if !is_root && node.is_root() {
            self.violation("root flag on non-root node", render_context(node));
        }
        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            self.violation("keys not strictly ascending", render_context(node));
        }
        if keys.len() > layout.max_keys() {
            self.violation("node over capacity", render_context(node));
        }
        if !is_root && keys.len() < layout.min_keys() {
            self.violation("non-root node under minimum", render_context(node));
        }
        let out_of_bounds = keys.iter().any(|key| {
            lower.is_some_and(|lower| key < lower) || upper.is_some_and(|upper| key >= upper)
        });
        if out_of_bounds && matches!(node, NodeShape::Leaf { .. }) {
            self.violation("leaf key outside separator bounds", render_context(node));
        }

        match node {
            NodeShape::Leaf { .. } => leaf_depths.push(depth),
            NodeShape::Internal { children, .. } => {
                if children.len() != keys.len() + 1 {
                    self.violation("child count is not key count + 1", render_context(node));
                    return;
                }
                if is_root && keys.is_empty() {
                    self.violation("internal root without keys", render_context(node));
                }
                for (i, child) in children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { keys.get(i - 1) };
                    let child_upper = keys.get(i).or(upper);
                    self.check_node(
                        child,
                        layout,
                        false,
                        child_lower,
                        child_upper,
                        depth + 1,
                        leaf_depths,
                    );
                }
            }
        }
    }

    fn check_chain<K: Display>(&mut self, leaves: &[&NodeShape<K>]) {
        let links: Vec<_> = leaves
            .iter()
            .filter_map(|leaf| match leaf {
                NodeShape::Leaf {
                    pointer,
                    previous,
                    next,
                    ..
                } => Some((*pointer, *previous, *next)),
                NodeShape::Internal { .. } => None,
            })
            .collect();

        for (i, (pointer, previous, next)) in links.iter().enumerate() {
            let expected_previous = i.checked_sub(1).map(|j| links[j].0);
            let expected_next = links.get(i + 1).map(|link| link.0);
            if *previous != expected_previous {
                self.violation(
                    "broken previous-sibling link",
                    format!("{pointer}: {previous:?}, expected {expected_previous:?}"),
                );
            }
            if *next != expected_next {
                self.violation(
                    "broken next-sibling link",
                    format!("{pointer}: {next:?}, expected {expected_next:?}"),
                );
            }
        }
    }
}

fn render_context<K: Display>(node: &NodeShape<K>) -> String {
    let mut out = String::new();
    render_node(node, &mut out);
    out
}

/// Capture the index and assert that every invariant holds.
pub fn assert_invariants<S, KC, VC>(index: &BPlusTreeIndex<S, KC, VC>) -> TreeShape<KC::Item>
where
    S: IndexStorage,
    KC: SlotCodec + Clone,
    KC::Item: Ord + Clone + Display,
    VC: SlotCodec + Clone,
    VC::Item: Clone,
{
    let shape = TreeShape::capture(index).expect("capture tree");
    let mut checker = InvariantChecker::new();
    checker.check(&shape);
    assert!(
        checker.violations().is_empty(),
        "invariant violations in {}: {:?}",
        shape.render(),
        checker.violations()
    );
    shape
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(
        position: u64,
        keys: Vec<i64>,
        previous: Option<u64>,
        next: Option<u64>,
    ) -> NodeShape<i64> {
        NodeShape::Leaf {
            pointer: Pointer::node(position, 0),
            root: false,
            keys,
            previous: previous.map(|p| Pointer::node(p, 0)),
            next: next.map(|p| Pointer::node(p, 0)),
        }
    }

    fn shape(children: Vec<NodeShape<i64>>, keys: Vec<i64>) -> TreeShape<i64> {
        TreeShape {
            root: Some(NodeShape::Internal {
                pointer: Pointer::node(0, 0),
                root: true,
                keys,
                children,
            }),
            layout: NodeLayout::new(4, 8, 8),
        }
    }

    #[test]
    fn test_valid_tree_passes() {
        let tree = shape(
            vec![leaf(1, vec![1, 2], None, Some(2)), leaf(2, vec![3, 4], Some(1), None)],
            vec![3],
        );
        let mut checker = InvariantChecker::new();
        checker.check(&tree);
        assert!(checker.violations().is_empty(), "{:?}", checker.violations());
        assert_eq!(tree.render(), "[3]({1,2}{3,4})");
        assert_eq!(tree.keys(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_detects_broken_chain_and_bounds() {
        let tree = shape(
            vec![leaf(1, vec![1, 5], None, None), leaf(2, vec![3, 4], Some(1), None)],
            vec![3],
        );
        let mut checker = InvariantChecker::new();
        checker.check(&tree);
        let descriptions: Vec<_> = checker
            .violations()
            .iter()
            .map(|v| v.description.as_str())
            .collect();
        assert!(descriptions.contains(&"broken next-sibling link"));
        assert!(descriptions.contains(&"leaf key outside separator bounds"));
    }
}

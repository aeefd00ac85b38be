//! Ordered iteration over the leaf chain.
//!
//! An iterator is lazy: nothing is read until the first call to
//! [`TreeIter::next_entry`]. It loads one leaf at a time and follows the
//! sibling pointers, so it reflects the tree as it is while walking.
//! [`TreeIter::restart`] starts over from the first entry; an iterator is
//! not meant to be resumed across mutations of the same tree.
//!
//! A range iterator starts where its bound puts it:
//!
//! | bound       | ascending             | descending            |
//! |-------------|-----------------------|-----------------------|
//! | `>` / `>=`  | leaf holding the key  | rightmost leaf        |
//! | `<` / `<=`  | leftmost leaf         | leaf holding the key  |
//!
//! Starting at the bound's leaf, entries are skipped until the first match.
//! Starting at the far end, entries are yielded until the first miss.

use crate::codec::SlotCodec;
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::session::IoSession;
use crate::tree::TreeContext;
use crate::tree::layout::NodeLayout;
use crate::tree::node::LeafNode;

/// Direction of iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// One-sided key bound of a range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeBound<K> {
    GreaterThan(K),
    GreaterOrEqual(K),
    LessThan(K),
    LessOrEqual(K),
}

impl<K: Ord> RangeBound<K> {
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        match self {
            Self::GreaterThan(bound) => key > bound,
            Self::GreaterOrEqual(bound) => key >= bound,
            Self::LessThan(bound) => key < bound,
            Self::LessOrEqual(bound) => key <= bound,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &K {
        match self {
            Self::GreaterThan(key)
            | Self::GreaterOrEqual(key)
            | Self::LessThan(key)
            | Self::LessOrEqual(key) => key,
        }
    }

    const fn is_lower(&self) -> bool {
        matches!(self, Self::GreaterThan(_) | Self::GreaterOrEqual(_))
    }
}

enum Cursor<K, V> {
    Fresh,
    Leaf {
        entries: std::vec::IntoIter<(K, V)>,
        next: Option<Pointer>,
    },
    Done,
}

/// Lazy iterator over the entries of one tree.
pub struct TreeIter<T, KC: SlotCodec, VC: SlotCodec> {
    session: T,
    layout: NodeLayout,
    keys: KC,
    values: VC,
    order: Order,
    bound: Option<RangeBound<KC::Item>>,
    /// Skipping entries until the bound first matches.
    seeking: bool,
    cursor: Cursor<KC::Item, VC::Item>,
}

impl<T, KC, VC> TreeIter<T, KC, VC>
where
    T: IoSession,
    KC: SlotCodec,
    KC::Item: Ord + Clone,
    VC: SlotCodec,
{
    pub(crate) const fn new(
        session: T,
        layout: NodeLayout,
        keys: KC,
        values: VC,
        order: Order,
        bound: Option<RangeBound<KC::Item>>,
    ) -> Self {
        Self {
            session,
            layout,
            keys,
            values,
            order,
            bound,
            seeking: false,
            cursor: Cursor::Fresh,
        }
    }

    /// Start over from the first entry.
    pub fn restart(&mut self) {
        self.seeking = false;
        self.cursor = Cursor::Fresh;
    }

    /// Next entry, or `None` when the walk is over. An error ends the walk.
    pub fn next_entry(&mut self) -> Result<Option<(KC::Item, VC::Item)>, IndexError> {
        let result = self.advance();
        if result.is_err() {
            self.cursor = Cursor::Done;
        }
        result
    }

    fn advance(&mut self) -> Result<Option<(KC::Item, VC::Item)>, IndexError> {
        loop {
            match &mut self.cursor {
                Cursor::Done => return Ok(None),
                Cursor::Fresh => self.cursor = self.start()?,
                Cursor::Leaf { entries, next } => {
                    let Some((key, value)) = entries.next() else {
                        let next = *next;
                        self.cursor = match next {
                            Some(pointer) => self.load(pointer)?,
                            None => Cursor::Done,
                        };
                        continue;
                    };
                    match &self.bound {
                        None => return Ok(Some((key, value))),
                        Some(bound) if bound.contains(&key) => {
                            self.seeking = false;
                            return Ok(Some((key, value)));
                        }
                        Some(_) if self.seeking => {}
                        Some(_) => {
                            self.cursor = Cursor::Done;
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    fn start(&mut self) -> Result<Cursor<KC::Item, VC::Item>, IndexError> {
        let mut ctx = TreeContext::new(self.layout, &self.keys, &self.values, &mut self.session);
        let Some(root) = ctx.root()? else {
            return Ok(Cursor::Done);
        };
        let (leaf, seeking) = match (&self.bound, self.order) {
            (Some(bound), Order::Ascending) if bound.is_lower() => {
                (ctx.find_leaf(root, bound.key())?, true)
            }
            (Some(bound), Order::Descending) if !bound.is_lower() => {
                (ctx.find_leaf(root, bound.key())?, true)
            }
            (_, Order::Ascending) => (ctx.leftmost_leaf(root)?, false),
            (_, Order::Descending) => (ctx.rightmost_leaf(root)?, false),
        };
        self.seeking = seeking;
        self.cursor_at(&leaf)
    }

    fn load(&mut self, pointer: Pointer) -> Result<Cursor<KC::Item, VC::Item>, IndexError> {
        let leaf = TreeContext::new(self.layout, &self.keys, &self.values, &mut self.session)
            .read_leaf(pointer)?;
        self.cursor_at(&leaf)
    }

    fn cursor_at(&self, leaf: &LeafNode) -> Result<Cursor<KC::Item, VC::Item>, IndexError> {
        let mut entries = leaf.entries(&self.keys, &self.values)?;
        let next = match self.order {
            Order::Ascending => leaf.next_sibling()?,
            Order::Descending => {
                entries.reverse();
                leaf.previous_sibling()?
            }
        };
        Ok(Cursor::Leaf {
            entries: entries.into_iter(),
            next,
        })
    }
}

impl<T, KC, VC> Iterator for TreeIter<T, KC, VC>
where
    T: IoSession,
    KC: SlotCodec,
    KC::Item: Ord + Clone,
    VC: SlotCodec,
{
    type Item = Result<(KC::Item, VC::Item), IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

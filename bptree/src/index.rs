//! Per-index entry point.
//!
//! A [`BPlusTreeIndex`] binds one index id of a shared backend to a degree,
//! a key codec and a value codec. Every call opens its own session:
//!
//! - writes use the configured [`SessionMode`], commit on success and roll
//!   back on any error;
//! - reads use a write-through session and never write. A tree that has no
//!   root yet reads as empty.
//!
//! The root is created lazily by the first write. Two writers racing to
//! create it both see no root; the loser's root compare-and-set fails and
//! its operation is rolled back and run once more from the top.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::{SequentialKey, SlotCodec};
use crate::config::{SessionMode, TreeConfig};
use crate::error::IndexError;
use crate::session::{BufferedSession, ImmediateSession, IoSession};
use crate::storage::{IndexId, IndexStorage};
use crate::tree::TreeContext;
use crate::tree::iter::{Order, RangeBound, TreeIter};
use crate::tree::layout::NodeLayout;
use crate::tree::node::LeafNode;

/// Iterator returned by [`BPlusTreeIndex::iter`] and
/// [`BPlusTreeIndex::range`].
pub type IndexIter<S, KC, VC> = TreeIter<ImmediateSession<S>, KC, VC>;

/// B+Tree over one index id of a shared backend.
pub struct BPlusTreeIndex<S, KC, VC> {
    storage: Arc<S>,
    index_id: IndexId,
    config: TreeConfig,
    layout: NodeLayout,
    keys: KC,
    values: VC,
}

impl<S, KC, VC> BPlusTreeIndex<S, KC, VC>
where
    S: IndexStorage,
    KC: SlotCodec + Clone,
    KC::Item: Ord + Clone,
    VC: SlotCodec + Clone,
    VC::Item: Clone,
{
    pub fn new(storage: Arc<S>, index_id: IndexId, config: TreeConfig, keys: KC, values: VC) -> Self {
        let layout = NodeLayout::new(config.degree(), keys.width(), values.width());
        Self {
            storage,
            index_id,
            config,
            layout,
            keys,
            values,
        }
    }

    #[must_use]
    pub const fn index_id(&self) -> IndexId {
        self.index_id
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub const fn layout(&self) -> NodeLayout {
        self.layout
    }

    #[must_use]
    pub const fn key_codec(&self) -> &KC {
        &self.keys
    }

    #[must_use]
    pub const fn value_codec(&self) -> &VC {
        &self.values
    }

    #[cfg(test)]
    pub(crate) const fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Insert a new key. Returns the leaf holding it.
    ///
    /// # Errors
    ///
    /// [`IndexError::KeyExists`] if the key is already present.
    pub fn add(&self, key: KC::Item, value: VC::Item) -> Result<LeafNode, IndexError> {
        self.write(|ctx| ctx.insert(key.clone(), value.clone()))
    }

    /// Insert the key, or overwrite its value if present.
    pub fn add_or_update(&self, key: KC::Item, value: VC::Item) -> Result<LeafNode, IndexError> {
        self.write(|ctx| ctx.upsert(key.clone(), value.clone()))
    }

    /// Overwrite the value of an existing key.
    ///
    /// # Errors
    ///
    /// [`IndexError::KeyMissing`] if the key is absent.
    pub fn update(&self, key: &KC::Item, value: &VC::Item) -> Result<(), IndexError> {
        self.write(|ctx| match ctx.update(key, value)? {
            Some(_) => Ok(()),
            None => Err(IndexError::KeyMissing),
        })
    }

    pub fn get(&self, key: &KC::Item) -> Result<Option<VC::Item>, IndexError> {
        self.read(|ctx| ctx.get(key))
    }

    pub fn contains(&self, key: &KC::Item) -> Result<bool, IndexError> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&self, key: &KC::Item) -> Result<bool, IndexError> {
        self.write(|ctx| ctx.remove(key))
    }

    /// Number of entries. Walks every leaf.
    pub fn size(&self) -> Result<usize, IndexError> {
        self.read(|ctx| ctx.size())
    }

    /// Levels from root to leaves; 0 before the first write.
    pub fn height(&self) -> Result<usize, IndexError> {
        self.read(|ctx| ctx.height())
    }

    /// Lazy iterator over all entries.
    #[must_use]
    pub fn iter(&self, order: Order) -> IndexIter<S, KC, VC> {
        self.iterator(order, None)
    }

    /// Lazy iterator over the entries matching `bound`.
    #[must_use]
    pub fn range(&self, bound: RangeBound<KC::Item>, order: Order) -> IndexIter<S, KC, VC> {
        self.iterator(order, Some(bound))
    }

    /// Drop every node and the root record of this index.
    pub fn purge(&self) -> Result<(), IndexError> {
        if self.storage.supports_purge() {
            self.storage.purge_index(self.index_id)?;
            debug!(index_id = self.index_id, "purged index through backend");
            return Ok(());
        }
        let removed = self.write(|ctx| ctx.purge())?;
        debug!(index_id = self.index_id, removed, "purged index by traversal");
        Ok(())
    }

    /// Key following the largest stored key, or the first key of the key
    /// space for an empty tree.
    ///
    /// # Errors
    ///
    /// [`IndexError::KeySpaceExhausted`] if the largest key has no successor.
    pub fn next_key(&self) -> Result<KC::Item, IndexError>
    where
        KC::Item: SequentialKey,
    {
        match self.read(|ctx| ctx.last_key())? {
            Some(last) => last.successor().ok_or(IndexError::KeySpaceExhausted),
            None => Ok(<KC::Item as SequentialKey>::first()),
        }
    }

    fn iterator(
        &self,
        order: Order,
        bound: Option<RangeBound<KC::Item>>,
    ) -> IndexIter<S, KC, VC> {
        TreeIter::new(
            self.read_session(),
            self.layout,
            self.keys.clone(),
            self.values.clone(),
            order,
            bound,
        )
    }

    fn read_session(&self) -> ImmediateSession<S> {
        ImmediateSession::new(
            Arc::clone(&self.storage),
            self.index_id,
            self.layout.node_size(),
        )
    }

    fn read<T>(
        &self,
        op: impl FnOnce(&mut TreeContext<'_, KC, VC>) -> Result<T, IndexError>,
    ) -> Result<T, IndexError> {
        let mut session = self.read_session();
        let mut ctx = TreeContext::new(self.layout, &self.keys, &self.values, &mut session);
        op(&mut ctx)
    }

    /// Run a write operation in a fresh session, retrying once after a lost
    /// root creation race.
    fn write<T, F>(&self, mut op: F) -> Result<T, IndexError>
    where
        F: FnMut(&mut TreeContext<'_, KC, VC>) -> Result<T, IndexError>,
    {
        let mut retried = false;
        loop {
            let result = match self.config.session_mode() {
                SessionMode::Buffered => self.attempt(
                    BufferedSession::new(
                        Arc::clone(&self.storage),
                        self.index_id,
                        self.layout.node_size(),
                    ),
                    &mut op,
                ),
                SessionMode::Immediate => self.attempt(self.read_session(), &mut op),
            };
            match result {
                Err(error) if error.is_root_conflict() && !retried => {
                    retried = true;
                    debug!(index_id = self.index_id, "lost root creation race, retrying");
                }
                other => return other,
            }
        }
    }

    fn attempt<T, I, F>(&self, mut session: I, op: &mut F) -> Result<T, IndexError>
    where
        I: IoSession,
        F: FnMut(&mut TreeContext<'_, KC, VC>) -> Result<T, IndexError>,
    {
        let result = {
            let mut ctx = TreeContext::new(self.layout, &self.keys, &self.values, &mut session);
            op(&mut ctx)
        };
        let result = result.and_then(|value| {
            session.commit()?;
            Ok(value)
        });
        if let Err(error) = &result {
            if let Err(rollback_error) = session.rollback() {
                warn!(
                    index_id = self.index_id,
                    %error,
                    %rollback_error,
                    "rollback after failed operation did not complete"
                );
            }
        }
        result
    }
}

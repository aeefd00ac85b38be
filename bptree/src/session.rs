//! Per-operation I/O sessions.
//!
//! Every tree operation talks to storage through an [`IoSession`] opened
//! for that one call. The session decides when writes reach the backend.
//!
//! - [`BufferedSession`] keeps updates, removals and the root change in
//!   memory and hands them to the backend as one [`CommitBatch`] at
//!   [`IoSession::commit`]. New nodes are written eagerly so they get a
//!   pointer; [`IoSession::rollback`] removes them again.
//! - [`ImmediateSession`] writes through. Nothing can be undone once an
//!   update has landed.
//!
//! # Invariants
//!
//! - Reads observe the session's own pending writes.
//! - The root change is a compare-and-set against the root the session
//!   first observed, so a lost creation race surfaces as
//!   [`StorageError::RootConflict`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::pointer::Pointer;
use crate::storage::{CommitBatch, IndexId, IndexStorage, RootChange, StorageError};

/// Storage access for one tree operation.
pub trait IoSession {
    /// Root of the tree, including an uncommitted change.
    fn root_pointer(&mut self) -> Result<Option<Pointer>, StorageError>;

    fn set_root(&mut self, root: Option<Pointer>) -> Result<(), StorageError>;

    /// Zeroed buffer of the tree's node size.
    fn empty_node(&self) -> Vec<u8>;

    fn read(&mut self, pointer: Pointer) -> Result<Vec<u8>, StorageError>;

    /// Store a new node and return its address.
    fn write(&mut self, data: &[u8]) -> Result<Pointer, StorageError>;

    fn update(&mut self, pointer: Pointer, data: &[u8]) -> Result<(), StorageError>;

    fn remove(&mut self, pointer: Pointer) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discard what can be discarded after a failed operation.
    fn rollback(&mut self) -> Result<(), StorageError>;
}

/// Remove `created` nodes, returning the first failure after trying all.
fn remove_created<S: IndexStorage>(
    storage: &S,
    index_id: IndexId,
    created: Vec<Pointer>,
) -> Result<(), StorageError> {
    let mut first_error = None;
    for pointer in created {
        if let Err(e) = storage.remove_node(index_id, pointer) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Batches writes until commit.
pub struct BufferedSession<S> {
    storage: Arc<S>,
    index_id: IndexId,
    node_size: usize,
    /// Root as first read from storage; `None` until loaded.
    observed_root: Option<Option<Pointer>>,
    pending_root: Option<Option<Pointer>>,
    updates: BTreeMap<Pointer, Vec<u8>>,
    removals: BTreeSet<Pointer>,
    created: Vec<Pointer>,
}

impl<S: IndexStorage> BufferedSession<S> {
    #[must_use]
    pub const fn new(storage: Arc<S>, index_id: IndexId, node_size: usize) -> Self {
        Self {
            storage,
            index_id,
            node_size,
            observed_root: None,
            pending_root: None,
            updates: BTreeMap::new(),
            removals: BTreeSet::new(),
            created: Vec::new(),
        }
    }

    fn observed_root(&mut self) -> Result<Option<Pointer>, StorageError> {
        if let Some(root) = self.observed_root {
            return Ok(root);
        }
        let root = self.storage.root(self.index_id)?;
        self.observed_root = Some(root);
        Ok(root)
    }

    fn clear(&mut self) {
        self.observed_root = None;
        self.pending_root = None;
        self.updates.clear();
        self.removals.clear();
        self.created.clear();
    }
}

impl<S: IndexStorage> IoSession for BufferedSession<S> {
    fn root_pointer(&mut self) -> Result<Option<Pointer>, StorageError> {
        match self.pending_root {
            Some(root) => Ok(root),
            None => self.observed_root(),
        }
    }

    fn set_root(&mut self, root: Option<Pointer>) -> Result<(), StorageError> {
        self.observed_root()?;
        self.pending_root = Some(root);
        Ok(())
    }

    fn empty_node(&self) -> Vec<u8> {
        self.storage.empty_node(self.node_size)
    }

    fn read(&mut self, pointer: Pointer) -> Result<Vec<u8>, StorageError> {
        if self.removals.contains(&pointer) {
            return Err(StorageError::NodeNotFound(pointer));
        }
        if let Some(data) = self.updates.get(&pointer) {
            return Ok(data.clone());
        }
        self.storage.read_node(self.index_id, pointer)
    }

    fn write(&mut self, data: &[u8]) -> Result<Pointer, StorageError> {
        let pointer = self.storage.write_new_node(self.index_id, data)?;
        self.created.push(pointer);
        Ok(pointer)
    }

    fn update(&mut self, pointer: Pointer, data: &[u8]) -> Result<(), StorageError> {
        if self.removals.contains(&pointer) {
            return Err(StorageError::NodeNotFound(pointer));
        }
        self.updates.insert(pointer, data.to_vec());
        Ok(())
    }

    fn remove(&mut self, pointer: Pointer) -> Result<(), StorageError> {
        self.updates.remove(&pointer);
        self.removals.insert(pointer);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let root = match (self.observed_root, self.pending_root) {
            (Some(expected), Some(new)) if expected != new => Some(RootChange { expected, new }),
            _ => None,
        };
        let batch = CommitBatch {
            root,
            updates: std::mem::take(&mut self.updates).into_iter().collect(),
            removals: std::mem::take(&mut self.removals).into_iter().collect(),
        };
        if !batch.is_empty() {
            self.storage.apply_batch(self.index_id, batch)?;
        }
        self.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        let created = std::mem::take(&mut self.created);
        self.clear();
        remove_created(self.storage.as_ref(), self.index_id, created)
    }
}

/// Writes straight through to storage.
pub struct ImmediateSession<S> {
    storage: Arc<S>,
    index_id: IndexId,
    node_size: usize,
    created: Vec<Pointer>,
    /// Root as last read or written by this session.
    observed_root: Option<Option<Pointer>>,
    /// Set once an update, removal or root change reached storage.
    touched: bool,
}

impl<S: IndexStorage> ImmediateSession<S> {
    #[must_use]
    pub const fn new(storage: Arc<S>, index_id: IndexId, node_size: usize) -> Self {
        Self {
            storage,
            index_id,
            node_size,
            created: Vec::new(),
            observed_root: None,
            touched: false,
        }
    }
}

impl<S: IndexStorage> IoSession for ImmediateSession<S> {
    fn root_pointer(&mut self) -> Result<Option<Pointer>, StorageError> {
        let root = self.storage.root(self.index_id)?;
        self.observed_root = Some(root);
        Ok(root)
    }

    fn set_root(&mut self, root: Option<Pointer>) -> Result<(), StorageError> {
        let expected = match self.observed_root {
            Some(observed) => observed,
            None => self.storage.root(self.index_id)?,
        };
        self.storage.set_root(self.index_id, expected, root)?;
        self.observed_root = Some(root);
        self.touched = true;
        Ok(())
    }

    fn empty_node(&self) -> Vec<u8> {
        self.storage.empty_node(self.node_size)
    }

    fn read(&mut self, pointer: Pointer) -> Result<Vec<u8>, StorageError> {
        self.storage.read_node(self.index_id, pointer)
    }

    fn write(&mut self, data: &[u8]) -> Result<Pointer, StorageError> {
        let pointer = self.storage.write_new_node(self.index_id, data)?;
        self.created.push(pointer);
        Ok(pointer)
    }

    fn update(&mut self, pointer: Pointer, data: &[u8]) -> Result<(), StorageError> {
        self.storage.update_node(self.index_id, pointer, data)?;
        self.touched = true;
        Ok(())
    }

    fn remove(&mut self, pointer: Pointer) -> Result<(), StorageError> {
        self.storage.remove_node(self.index_id, pointer)?;
        self.touched = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.created.clear();
        self.touched = false;
        Ok(())
    }

    /// New nodes are only removed while nothing written through can point
    /// at them.
    fn rollback(&mut self) -> Result<(), StorageError> {
        let created = std::mem::take(&mut self.created);
        let touched = std::mem::replace(&mut self.touched, false);
        if touched {
            return Ok(());
        }
        remove_created(self.storage.as_ref(), self.index_id, created)
    }
}

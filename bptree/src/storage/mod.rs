//! Storage backend abstraction.
//!
//! A backend keeps, per index id, a root record and the raw node buffers
//! created for that index. The tree never allocates space itself: it asks
//! the backend to store a buffer and gets a [`Pointer`] back.
//!
//! # Design
//!
//! Methods take `&self`. Backends guard their state internally so many
//! index handles can share one backend behind an `Arc`.
//!
//! Writes that belong to one logical tree operation can be handed over as
//! a [`CommitBatch`]. The default [`IndexStorage::apply_batch`] applies the
//! parts one after another; backends that can apply a batch atomically
//! override it.
//!
//! # Invariants
//!
//! - A node belongs to the index id that created it. Touching it through
//!   another index id fails with [`StorageError::ForeignNode`].
//! - The root record only changes through [`IndexStorage::set_root`], a
//!   compare-and-set against the caller's last observed root.

pub mod memory;

pub use memory::{FaultConfig, MemoryIndexStorage, StorageStats};

use crate::pointer::Pointer;

/// Identifier of one tree within a shared backend.
pub type IndexId = u32;

/// Errors raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No node is stored at the pointer.
    NodeNotFound(Pointer),
    /// The node exists but belongs to another index.
    ForeignNode {
        pointer: Pointer,
        owner: IndexId,
        requested: IndexId,
    },
    /// The root record changed since the caller last read it.
    RootConflict { index_id: IndexId },
    /// Stored bytes failed validation.
    Corruption(String),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// The backend has no bulk purge.
    PurgeUnsupported,
    /// A lock guarding backend state was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(pointer) => write!(f, "node not found: {pointer}"),
            Self::ForeignNode {
                pointer,
                owner,
                requested,
            } => write!(
                f,
                "node {pointer} belongs to index {owner}, not index {requested}"
            ),
            Self::RootConflict { index_id } => {
                write!(f, "root of index {index_id} changed concurrently")
            }
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::PurgeUnsupported => write!(f, "backend does not support purge"),
            Self::LockPoisoned => write!(f, "storage lock poisoned"),
        }
    }
}

impl std::error::Error for StorageError {}

impl StorageError {
    /// Whether the error is a lost compare-and-set on the root record.
    #[must_use]
    pub const fn is_root_conflict(&self) -> bool {
        matches!(self, Self::RootConflict { .. })
    }
}

/// Root record change: succeeds only if the stored root still equals
/// `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootChange {
    pub expected: Option<Pointer>,
    pub new: Option<Pointer>,
}

/// Writes produced by one logical operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub root: Option<RootChange>,
    pub updates: Vec<(Pointer, Vec<u8>)>,
    pub removals: Vec<Pointer>,
}

impl CommitBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none() && self.updates.is_empty() && self.removals.is_empty()
    }
}

/// Node store shared by many trees.
pub trait IndexStorage {
    /// Current root of the index, if it has one.
    fn root(&self, index_id: IndexId) -> Result<Option<Pointer>, StorageError>;

    /// Compare-and-set the root record.
    fn set_root(
        &self,
        index_id: IndexId,
        expected: Option<Pointer>,
        new: Option<Pointer>,
    ) -> Result<(), StorageError>;

    fn read_node(&self, index_id: IndexId, pointer: Pointer) -> Result<Vec<u8>, StorageError>;

    /// Store a new node and return its address.
    fn write_new_node(&self, index_id: IndexId, data: &[u8]) -> Result<Pointer, StorageError>;

    fn update_node(
        &self,
        index_id: IndexId,
        pointer: Pointer,
        data: &[u8],
    ) -> Result<(), StorageError>;

    fn remove_node(&self, index_id: IndexId, pointer: Pointer) -> Result<(), StorageError>;

    /// Whether [`IndexStorage::purge_index`] is available.
    fn supports_purge(&self) -> bool {
        false
    }

    /// Drop every node and the root record of the index.
    fn purge_index(&self, _index_id: IndexId) -> Result<(), StorageError> {
        Err(StorageError::PurgeUnsupported)
    }

    /// Zeroed buffer for a new node.
    fn empty_node(&self, node_size: usize) -> Vec<u8> {
        vec![0u8; node_size]
    }

    /// Apply the writes of one operation: root change first, then updates,
    /// then removals.
    fn apply_batch(&self, index_id: IndexId, batch: CommitBatch) -> Result<(), StorageError> {
        if let Some(change) = batch.root {
            self.set_root(index_id, change.expected, change.new)?;
        }
        for (pointer, data) in &batch.updates {
            self.update_node(index_id, *pointer, data)?;
        }
        for pointer in batch.removals {
            self.remove_node(index_id, pointer)?;
        }
        Ok(())
    }
}

//! In-memory backend with deterministic fault injection.
//!
//! Nodes live in a hash map keyed by pointer, each stored with its owning
//! index id and a crc32 checksum computed when the bytes were handed over.
//! Reads verify the checksum, so injected corruption surfaces as
//! [`StorageError::Corruption`] instead of a silently wrong tree.
//!
//! Faults are drawn from a seeded [`StdRng`]: the same seed and the same
//! call sequence produce the same faults.
//!
//! - read errors hit [`IndexStorage::read_node`];
//! - write errors hit new-node writes, updates and whole batches;
//! - corruption flips bits in a node after its checksum was taken.
//!
//! Root lookups, root changes and removals never fail by injection, so a
//! failed operation can always be rolled back.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pointer::Pointer;
use crate::storage::{CommitBatch, IndexId, IndexStorage, StorageError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability that a written node is stored corrupted (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Read and write errors only; stored data stays intact.
    #[must_use]
    pub const fn io_faults(rate: f64) -> Self {
        Self {
            read_error_rate: rate,
            write_error_rate: rate,
            corruption_rate: 0.0,
        }
    }
}

/// Counters of backend activity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStats {
    pub reads: u64,
    pub writes: u64,
    pub updates: u64,
    pub removals: u64,
    pub batches: u64,
    pub purges: u64,
    pub injected_read_errors: u64,
    pub injected_write_errors: u64,
    pub corrupted_writes: u64,
}

#[derive(Debug, Clone)]
struct StoredNode {
    index_id: IndexId,
    data: Vec<u8>,
    checksum: u32,
}

struct MemoryState {
    nodes: HashMap<Pointer, StoredNode>,
    roots: HashMap<IndexId, Pointer>,
    next_position: u64,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: StorageStats,
}

impl MemoryState {
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn inject_write_fault(&mut self, what: &str) -> Result<(), StorageError> {
        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(format!("simulated {what} error")));
        }
        Ok(())
    }

    /// Flip 1-8 random bits.
    fn corrupt(&mut self, data: &mut [u8]) {
        if data.is_empty() {
            return;
        }
        let flips = self.rng.random_range(1..=8);
        for _ in 0..flips {
            let offset = self.rng.random_range(0..data.len());
            let bit = self.rng.random_range(0..8u8);
            data[offset] ^= 1 << bit;
        }
    }

    fn stored(&mut self, data: &[u8], index_id: IndexId) -> StoredNode {
        let checksum = crc32fast::hash(data);
        let mut data = data.to_vec();
        if self.should_inject_fault(self.fault_config.corruption_rate) {
            self.stats.corrupted_writes += 1;
            self.corrupt(&mut data);
        }
        StoredNode {
            index_id,
            data,
            checksum,
        }
    }

    fn owned(&self, index_id: IndexId, pointer: Pointer) -> Result<&StoredNode, StorageError> {
        let node = self
            .nodes
            .get(&pointer)
            .ok_or(StorageError::NodeNotFound(pointer))?;
        if node.index_id != index_id {
            return Err(StorageError::ForeignNode {
                pointer,
                owner: node.index_id,
                requested: index_id,
            });
        }
        Ok(node)
    }

    fn check_root(
        &self,
        index_id: IndexId,
        expected: Option<Pointer>,
    ) -> Result<(), StorageError> {
        if self.roots.get(&index_id).copied() == expected {
            Ok(())
        } else {
            Err(StorageError::RootConflict { index_id })
        }
    }

    fn replace_root(&mut self, index_id: IndexId, new: Option<Pointer>) {
        match new {
            Some(pointer) => self.roots.insert(index_id, pointer),
            None => self.roots.remove(&index_id),
        };
    }
}

/// Node store kept entirely in memory.
pub struct MemoryIndexStorage {
    state: Mutex<MemoryState>,
    purge_enabled: bool,
}

impl Default for MemoryIndexStorage {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MemoryIndexStorage {
    /// Fault-free backend. The seed only matters once faults are enabled.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_faults(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                nodes: HashMap::new(),
                roots: HashMap::new(),
                next_position: 0,
                fault_config,
                rng: StdRng::seed_from_u64(seed),
                stats: StorageStats::default(),
            }),
            purge_enabled: true,
        }
    }

    /// Disable bulk purge, forcing callers onto the traversal fallback.
    #[must_use]
    pub const fn without_purge(mut self) -> Self {
        self.purge_enabled = false;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        Ok(self.lock()?.stats.clone())
    }

    pub fn set_fault_config(&self, config: FaultConfig) -> Result<(), StorageError> {
        self.lock()?.fault_config = config;
        Ok(())
    }

    /// Number of nodes currently stored for the index.
    pub fn node_count(&self, index_id: IndexId) -> Result<usize, StorageError> {
        Ok(self
            .lock()?
            .nodes
            .values()
            .filter(|node| node.index_id == index_id)
            .count())
    }
}

impl IndexStorage for MemoryIndexStorage {
    fn root(&self, index_id: IndexId) -> Result<Option<Pointer>, StorageError> {
        Ok(self.lock()?.roots.get(&index_id).copied())
    }

    fn set_root(
        &self,
        index_id: IndexId,
        expected: Option<Pointer>,
        new: Option<Pointer>,
    ) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.check_root(index_id, expected)?;
        state.replace_root(index_id, new);
        Ok(())
    }

    fn read_node(&self, index_id: IndexId, pointer: Pointer) -> Result<Vec<u8>, StorageError> {
        let mut state = self.lock()?;
        state.stats.reads += 1;

        let rate = state.fault_config.read_error_rate;
        if state.should_inject_fault(rate) {
            state.stats.injected_read_errors += 1;
            return Err(StorageError::InjectedFault("simulated read error".to_string()));
        }

        let node = state.owned(index_id, pointer)?;
        if crc32fast::hash(&node.data) != node.checksum {
            return Err(StorageError::Corruption(format!(
                "checksum mismatch for {pointer}"
            )));
        }
        Ok(node.data.clone())
    }

    fn write_new_node(&self, index_id: IndexId, data: &[u8]) -> Result<Pointer, StorageError> {
        let mut state = self.lock()?;
        state.stats.writes += 1;
        state.inject_write_fault("write")?;

        let pointer = Pointer::node(state.next_position, 0);
        state.next_position += data.len() as u64;
        let stored = state.stored(data, index_id);
        state.nodes.insert(pointer, stored);
        Ok(pointer)
    }

    fn update_node(
        &self,
        index_id: IndexId,
        pointer: Pointer,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.stats.updates += 1;
        state.owned(index_id, pointer)?;
        state.inject_write_fault("update")?;

        let stored = state.stored(data, index_id);
        state.nodes.insert(pointer, stored);
        Ok(())
    }

    fn remove_node(&self, index_id: IndexId, pointer: Pointer) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.owned(index_id, pointer)?;
        state.stats.removals += 1;
        state.nodes.remove(&pointer);
        Ok(())
    }

    fn supports_purge(&self) -> bool {
        self.purge_enabled
    }

    fn purge_index(&self, index_id: IndexId) -> Result<(), StorageError> {
        if !self.purge_enabled {
            return Err(StorageError::PurgeUnsupported);
        }
        let mut state = self.lock()?;
        state.nodes.retain(|_, node| node.index_id != index_id);
        state.roots.remove(&index_id);
        state.stats.purges += 1;
        Ok(())
    }

    /// All-or-nothing: every check runs before the first change.
    fn apply_batch(&self, index_id: IndexId, batch: CommitBatch) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.stats.batches += 1;
        state.inject_write_fault("commit")?;

        if let Some(change) = batch.root {
            state.check_root(index_id, change.expected)?;
        }
        for (pointer, _) in &batch.updates {
            state.owned(index_id, *pointer)?;
        }
        for pointer in &batch.removals {
            state.owned(index_id, *pointer)?;
        }

        if let Some(change) = batch.root {
            state.replace_root(index_id, change.new);
        }
        for (pointer, data) in batch.updates {
            state.stats.updates += 1;
            let stored = state.stored(&data, index_id);
            state.nodes.insert(pointer, stored);
        }
        for pointer in batch.removals {
            state.stats.removals += 1;
            state.nodes.remove(&pointer);
        }
        Ok(())
    }
}

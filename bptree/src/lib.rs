//! Persistent B+Tree indexes over a pluggable node store.
//!
//! An index maps fixed-width keys to fixed-width values. Nodes are stored as
//! fixed-size byte buffers in an [`IndexStorage`] backend, addressed by
//! [`Pointer`]s, and many indexes can share one backend under distinct ids.
//!
//! - [`codec`]: fixed-width slot encodings for keys and values;
//! - [`tree`]: node layout and the insert, delete, lookup and iteration
//!   algorithms;
//! - [`session`]: per-operation I/O, buffered until commit or written
//!   through;
//! - [`index`]: the [`BPlusTreeIndex`] entry point.
#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Test code may unwrap; library code propagates every error.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod pointer;
pub mod session;
pub mod storage;
pub mod tree;

#[cfg(test)]
mod simulation;
#[cfg(test)]
mod testing;

pub use codec::{
    CodecError, FixedStringCodec, I32Codec, I64Codec, PointerCodec, SequentialKey, SlotCodec,
};
pub use config::{ConfigError, SessionMode, TreeConfig};
pub use error::IndexError;
pub use index::{BPlusTreeIndex, IndexIter};
pub use pointer::{Pointer, PointerKind};
pub use storage::{
    CommitBatch, FaultConfig, IndexId, IndexStorage, MemoryIndexStorage, RootChange,
    StorageError, StorageStats,
};
pub use tree::iter::{Order, RangeBound};

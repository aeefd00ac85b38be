//! Shared test fixtures.

use std::sync::{Arc, Once};

use crate::codec::I64Codec;
use crate::config::{SessionMode, TreeConfig};
use crate::index::BPlusTreeIndex;
use crate::storage::{IndexId, MemoryIndexStorage};
use crate::tree::iter::Order;

pub type TestIndex = BPlusTreeIndex<MemoryIndexStorage, I64Codec, I64Codec>;

static TRACING: Once = Once::new();

/// Route tracing output through the test harness. Set `RUST_LOG` to see
/// split, merge and retry events.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "bptree=warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

#[must_use]
pub fn config(degree: usize, mode: SessionMode) -> TreeConfig {
    TreeConfig::new(degree)
        .expect("valid degree")
        .with_session_mode(mode)
}

/// Fresh i64 -> i64 index on its own backend.
#[must_use]
pub fn memory_index(degree: usize) -> TestIndex {
    init_tracing();
    let storage = Arc::new(MemoryIndexStorage::new(0));
    shared_index(&storage, 1, degree, SessionMode::Buffered)
}

/// i64 -> i64 index on a shared backend.
#[must_use]
pub fn shared_index(
    storage: &Arc<MemoryIndexStorage>,
    index_id: IndexId,
    degree: usize,
    mode: SessionMode,
) -> TestIndex {
    BPlusTreeIndex::new(
        Arc::clone(storage),
        index_id,
        config(degree, mode),
        I64Codec,
        I64Codec,
    )
}

/// All keys in ascending order.
#[must_use]
pub fn keys_of(index: &TestIndex) -> Vec<i64> {
    index
        .iter(Order::Ascending)
        .map(|entry| entry.expect("iterate").0)
        .collect()
}

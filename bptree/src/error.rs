//! Errors surfaced by index operations.

use crate::codec::CodecError;
use crate::storage::StorageError;

/// Errors returned by [`BPlusTreeIndex`](crate::BPlusTreeIndex).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// `add` of a key that is already present.
    KeyExists,
    /// `update` of a key that is not present.
    KeyMissing,
    /// A key or value failed to encode or decode.
    InvalidSlotEncoding(CodecError),
    /// The storage backend failed; the operation was rolled back.
    InternalOperationFailure(StorageError),
    /// No successor exists for the largest key.
    KeySpaceExhausted,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyExists => write!(f, "key already exists"),
            Self::KeyMissing => write!(f, "key not found"),
            Self::InvalidSlotEncoding(e) => write!(f, "invalid slot encoding: {e}"),
            Self::InternalOperationFailure(e) => write!(f, "internal operation failure: {e}"),
            Self::KeySpaceExhausted => write!(f, "key space exhausted"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidSlotEncoding(e) => Some(e),
            Self::InternalOperationFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for IndexError {
    fn from(e: CodecError) -> Self {
        Self::InvalidSlotEncoding(e)
    }
}

impl From<StorageError> for IndexError {
    fn from(e: StorageError) -> Self {
        Self::InternalOperationFailure(e)
    }
}

impl IndexError {
    /// Storage corruption detected by the tree itself, e.g. a malformed
    /// node or a broken parent link.
    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        Self::InternalOperationFailure(StorageError::Corruption(message.into()))
    }

    /// Whether the error is a lost race on the root record.
    #[must_use]
    pub const fn is_root_conflict(&self) -> bool {
        matches!(self, Self::InternalOperationFailure(e) if e.is_root_conflict())
    }
}

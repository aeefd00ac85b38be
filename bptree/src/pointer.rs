//! Disk addresses for tree nodes and stored values.
//!
//! A pointer serializes to 13 bytes:
//!
//! ```text
//! +------+------------------+------------+
//! | tag  | position (u64 BE)| chunk (u32 BE)
//! +------+------------------+------------+
//! ```
//!
//! An all-zero span is the null pointer. A non-zero span must carry one of
//! the known tags.

use crate::codec::CodecError;

/// Size of a serialized pointer in bytes.
pub const POINTER_SIZE: usize = 13;

/// What a pointer addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PointerKind {
    /// A stored record outside the tree.
    Data = 0x01,
    /// A tree node.
    Node = 0x02,
}

impl TryFrom<u8> for PointerKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Node),
            other => Err(CodecError::InvalidPointerTag(other)),
        }
    }
}

/// Address of a node or record: kind, byte position and chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer {
    kind: PointerKind,
    position: u64,
    chunk: u32,
}

impl Pointer {
    #[must_use]
    pub const fn new(kind: PointerKind, position: u64, chunk: u32) -> Self {
        Self {
            kind,
            position,
            chunk,
        }
    }

    /// Pointer to a tree node.
    #[must_use]
    pub const fn node(position: u64, chunk: u32) -> Self {
        Self::new(PointerKind::Node, position, chunk)
    }

    /// Pointer to a data record.
    #[must_use]
    pub const fn data(position: u64, chunk: u32) -> Self {
        Self::new(PointerKind::Data, position, chunk)
    }

    #[must_use]
    pub const fn kind(&self) -> PointerKind {
        self.kind
    }

    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub const fn chunk(&self) -> u32 {
        self.chunk
    }

    #[must_use]
    pub const fn is_node(&self) -> bool {
        matches!(self.kind, PointerKind::Node)
    }

    /// Serialize the pointer.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; POINTER_SIZE] {
        let mut buf = [0u8; POINTER_SIZE];
        buf[0] = self.kind as u8;
        buf[1..9].copy_from_slice(&self.position.to_be_bytes());
        buf[9..13].copy_from_slice(&self.chunk.to_be_bytes());
        buf
    }

    /// Write the pointer, or the null pointer for `None`, into `out`.
    ///
    /// `out` must be exactly [`POINTER_SIZE`] bytes long.
    pub fn write_optional(pointer: Option<Self>, out: &mut [u8]) -> Result<(), CodecError> {
        if out.len() != POINTER_SIZE {
            return Err(CodecError::WidthMismatch {
                expected: POINTER_SIZE,
                actual: out.len(),
            });
        }
        match pointer {
            Some(pointer) => out.copy_from_slice(&pointer.to_bytes()),
            None => out.fill(0),
        }
        Ok(())
    }

    /// Deserialize a pointer.
    ///
    /// Returns `Ok(None)` for the all-zero null pointer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>, CodecError> {
        if bytes.len() != POINTER_SIZE {
            return Err(CodecError::WidthMismatch {
                expected: POINTER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let kind = PointerKind::try_from(bytes[0])?;
        let position = u64::from_be_bytes([
            bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7], bytes[8],
        ]);
        let chunk = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);

        Ok(Some(Self {
            kind,
            position,
            chunk,
        }))
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            PointerKind::Data => "data",
            PointerKind::Node => "node",
        };
        write!(f, "{kind}@{}:{}", self.chunk, self.position)
    }
}

//! Fixed-width slot codecs.
//!
//! Every key and value stored in a node occupies a slot of a width fixed
//! for the lifetime of the tree. A [`SlotCodec`] converts between a typed
//! item and that span.
//!
//! # Invariants
//!
//! - `encode` writes exactly `width()` bytes and never reads past them.
//! - Ordering of decoded items is the ordering the tree sorts by; the byte
//!   form does not need to be order-preserving.
//!
//! A slot whose bytes are all zero reads as empty inside a node. An item
//! that encodes to all zeros (e.g. integer `0` paired with an all-zero
//! value) is therefore indistinguishable from an empty slot.

use crate::pointer::{POINTER_SIZE, Pointer};

/// Errors raised while encoding or decoding a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The span handed to the codec has the wrong width.
    WidthMismatch { expected: usize, actual: usize },
    /// The item does not fit in the configured width.
    ValueTooLong { max: usize, actual: usize },
    /// String slot contains invalid UTF-8.
    InvalidUtf8,
    /// Pointer slot starts with an unknown tag.
    InvalidPointerTag(u8),
    /// A pointer slot that must be set is null.
    NullPointer,
    /// More slots requested than the node can hold.
    SlotOverflow { capacity: usize, requested: usize },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WidthMismatch { expected, actual } => {
                write!(f, "slot width mismatch: expected {expected}, got {actual}")
            }
            Self::ValueTooLong { max, actual } => {
                write!(f, "value too long: {actual} bytes (max {max})")
            }
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in string slot"),
            Self::InvalidPointerTag(tag) => write!(f, "invalid pointer tag: {tag:#04x}"),
            Self::NullPointer => write!(f, "unexpected null pointer"),
            Self::SlotOverflow {
                capacity,
                requested,
            } => write!(f, "node holds {capacity} slots, {requested} requested"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Converts an item to and from a fixed-width byte span.
pub trait SlotCodec {
    type Item;

    /// Width of the encoded slot in bytes.
    fn width(&self) -> usize;

    /// Encode `item` into `out`, which is exactly `width()` bytes.
    fn encode(&self, item: &Self::Item, out: &mut [u8]) -> Result<(), CodecError>;

    /// Decode an item from `bytes`, which is exactly `width()` bytes.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Item, CodecError>;
}

/// Keys with a well-defined first value and successor, used to hand out
/// the next free key of a tree.
pub trait SequentialKey: Sized {
    /// Key handed out for an empty tree.
    fn first() -> Self;

    /// The next key, or `None` when the key space is exhausted.
    fn successor(&self) -> Option<Self>;
}

impl SequentialKey for i32 {
    fn first() -> Self {
        1
    }

    fn successor(&self) -> Option<Self> {
        self.checked_add(1)
    }
}

impl SequentialKey for i64 {
    fn first() -> Self {
        1
    }

    fn successor(&self) -> Option<Self> {
        self.checked_add(1)
    }
}

const fn check_width(expected: usize, actual: usize) -> Result<(), CodecError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CodecError::WidthMismatch { expected, actual })
    }
}

/// Big-endian `i32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct I32Codec;

impl SlotCodec for I32Codec {
    type Item = i32;

    fn width(&self) -> usize {
        4
    }

    fn encode(&self, item: &i32, out: &mut [u8]) -> Result<(), CodecError> {
        check_width(4, out.len())?;
        out.copy_from_slice(&item.to_be_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<i32, CodecError> {
        check_width(4, bytes.len())?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Big-endian `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl SlotCodec for I64Codec {
    type Item = i64;

    fn width(&self) -> usize {
        8
    }

    fn encode(&self, item: &i64, out: &mut [u8]) -> Result<(), CodecError> {
        check_width(8, out.len())?;
        out.copy_from_slice(&item.to_be_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<i64, CodecError> {
        check_width(8, bytes.len())?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }
}

/// Non-null [`Pointer`] values, typically record locations in a clustered
/// index.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointerCodec;

impl SlotCodec for PointerCodec {
    type Item = Pointer;

    fn width(&self) -> usize {
        POINTER_SIZE
    }

    fn encode(&self, item: &Pointer, out: &mut [u8]) -> Result<(), CodecError> {
        Pointer::write_optional(Some(*item), out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Pointer, CodecError> {
        Pointer::from_bytes(bytes)?.ok_or(CodecError::NullPointer)
    }
}

/// UTF-8 string padded with zeros to a fixed width.
///
/// Trailing zero bytes are stripped on decode, so strings ending in `\0`
/// do not survive a round trip.
#[derive(Debug, Clone, Copy)]
pub struct FixedStringCodec {
    width: usize,
}

impl FixedStringCodec {
    #[must_use]
    pub const fn new(width: usize) -> Self {
        Self { width }
    }
}

impl SlotCodec for FixedStringCodec {
    type Item = String;

    fn width(&self) -> usize {
        self.width
    }

    fn encode(&self, item: &String, out: &mut [u8]) -> Result<(), CodecError> {
        check_width(self.width, out.len())?;
        let bytes = item.as_bytes();
        if bytes.len() > self.width {
            return Err(CodecError::ValueTooLong {
                max: self.width,
                actual: bytes.len(),
            });
        }
        out[..bytes.len()].copy_from_slice(bytes);
        out[bytes.len()..].fill(0);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        check_width(self.width, bytes.len())?;
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        String::from_utf8(bytes[..end].to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

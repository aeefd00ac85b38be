//! Offset arithmetic over a node buffer.
//!
//! # Layout
//!
//! ```text
//! byte 0        flags (bit0 = leaf, bit1 = root)
//!
//! internal:     [child 0][key 0][child 1][key 1] ... [key d-2][child d-1]
//! leaf:         [key 0][value 0] ... [key d-2][value d-2][prev][next]
//! ```
//!
//! where `d` is the tree degree and every child/sibling slot is a 13-byte
//! [`Pointer`](crate::pointer::Pointer). Both shapes fit in one buffer of
//! [`NodeLayout::node_size`] bytes, rounded up to a multiple of 8.
//!
//! # Empty slots
//!
//! There is no count field. A slot is absent when its span is all zeros:
//!
//! - leaf slot `i` is present if its key or value bytes are non-zero;
//! - internal key `i` is present if its key bytes or child `i + 1` are
//!   non-zero;
//! - child `i` is present if its pointer bytes are non-zero.
//!
//! Counting stops at the first absent slot. Nothing here knows about tree
//! semantics; callers keep slots packed from index 0.

use std::ops::Range;

use crate::pointer::POINTER_SIZE;

/// Flag bit marking a leaf node.
pub const FLAG_LEAF: u8 = 0x01;
/// Flag bit marking the root node.
pub const FLAG_ROOT: u8 = 0x02;

const FLAGS_OFFSET: usize = 0;
const HEADER_SIZE: usize = 1;

fn is_zeroed(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Slot geometry of one tree: degree and key/value widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    degree: usize,
    key_width: usize,
    value_width: usize,
}

impl NodeLayout {
    /// Create a layout. Degree and widths are validated by the caller.
    #[must_use]
    pub const fn new(degree: usize, key_width: usize, value_width: usize) -> Self {
        Self {
            degree,
            key_width,
            value_width,
        }
    }

    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    #[must_use]
    pub const fn key_width(&self) -> usize {
        self.key_width
    }

    #[must_use]
    pub const fn value_width(&self) -> usize {
        self.value_width
    }

    /// Maximum keys per node.
    #[must_use]
    pub const fn max_keys(&self) -> usize {
        self.degree - 1
    }

    /// Minimum keys in a non-root node.
    #[must_use]
    pub const fn min_keys(&self) -> usize {
        (self.degree - 1) / 2
    }

    /// Size of every node buffer of this tree.
    #[must_use]
    pub const fn node_size(&self) -> usize {
        let value = if self.value_width > POINTER_SIZE {
            self.value_width
        } else {
            POINTER_SIZE
        };
        let raw = HEADER_SIZE + self.degree * (self.key_width + value) + 2 * POINTER_SIZE;
        raw.div_ceil(8) * 8
    }

    // ========== Offsets ==========

    /// Offset of child pointer `i` in an internal node.
    #[must_use]
    pub const fn child_offset(&self, i: usize) -> usize {
        HEADER_SIZE + i * (POINTER_SIZE + self.key_width)
    }

    /// Offset of key `i` in an internal node.
    #[must_use]
    pub const fn internal_key_offset(&self, i: usize) -> usize {
        self.child_offset(i) + POINTER_SIZE
    }

    /// Offset of key `i` in a leaf.
    #[must_use]
    pub const fn leaf_key_offset(&self, i: usize) -> usize {
        HEADER_SIZE + i * (self.key_width + self.value_width)
    }

    /// Offset of value `i` in a leaf.
    #[must_use]
    pub const fn leaf_value_offset(&self, i: usize) -> usize {
        self.leaf_key_offset(i) + self.key_width
    }

    #[must_use]
    pub const fn previous_sibling_offset(&self) -> usize {
        self.leaf_key_offset(self.max_keys())
    }

    #[must_use]
    pub const fn next_sibling_offset(&self) -> usize {
        self.previous_sibling_offset() + POINTER_SIZE
    }

    const fn leaf_slot_size(&self) -> usize {
        self.key_width + self.value_width
    }

    fn child_range(&self, i: usize) -> Range<usize> {
        let start = self.child_offset(i);
        start..start + POINTER_SIZE
    }

    fn internal_key_range(&self, i: usize) -> Range<usize> {
        let start = self.internal_key_offset(i);
        start..start + self.key_width
    }

    fn leaf_key_range(&self, i: usize) -> Range<usize> {
        let start = self.leaf_key_offset(i);
        start..start + self.key_width
    }

    fn leaf_value_range(&self, i: usize) -> Range<usize> {
        let start = self.leaf_value_offset(i);
        start..start + self.value_width
    }

    // ========== Flags ==========

    #[must_use]
    pub fn flags(buf: &[u8]) -> u8 {
        buf[FLAGS_OFFSET]
    }

    pub fn set_flag(buf: &mut [u8], flag: u8, on: bool) {
        if on {
            buf[FLAGS_OFFSET] |= flag;
        } else {
            buf[FLAGS_OFFSET] &= !flag;
        }
    }

    // ========== Leaf slots ==========

    #[must_use]
    pub fn leaf_slot_present(&self, buf: &[u8], i: usize) -> bool {
        i < self.max_keys()
            && (!is_zeroed(&buf[self.leaf_key_range(i)])
                || !is_zeroed(&buf[self.leaf_value_range(i)]))
    }

    /// Number of packed leaf slots.
    #[must_use]
    pub fn leaf_count(&self, buf: &[u8]) -> usize {
        (0..self.max_keys())
            .take_while(|&i| self.leaf_slot_present(buf, i))
            .count()
    }

    #[must_use]
    pub fn leaf_key<'a>(&self, buf: &'a [u8], i: usize) -> &'a [u8] {
        &buf[self.leaf_key_range(i)]
    }

    #[must_use]
    pub fn leaf_value<'a>(&self, buf: &'a [u8], i: usize) -> &'a [u8] {
        &buf[self.leaf_value_range(i)]
    }

    pub fn leaf_key_mut<'a>(&self, buf: &'a mut [u8], i: usize) -> &'a mut [u8] {
        &mut buf[self.leaf_key_range(i)]
    }

    pub fn leaf_value_mut<'a>(&self, buf: &'a mut [u8], i: usize) -> &'a mut [u8] {
        &mut buf[self.leaf_value_range(i)]
    }

    /// Shift leaf slots `i..count` one position right, leaving slot `i`
    /// zeroed. The caller guarantees `count < max_keys()`.
    pub fn open_leaf_slot(&self, buf: &mut [u8], i: usize, count: usize) {
        let slot = self.leaf_slot_size();
        let start = self.leaf_key_offset(i);
        let end = self.leaf_key_offset(count);
        buf.copy_within(start..end, start + slot);
        buf[start..start + slot].fill(0);
    }

    /// Remove leaf slot `i`, shifting later slots left and zeroing the
    /// vacated last slot.
    pub fn close_leaf_slot(&self, buf: &mut [u8], i: usize, count: usize) {
        let slot = self.leaf_slot_size();
        let start = self.leaf_key_offset(i);
        let end = self.leaf_key_offset(count);
        buf.copy_within(start + slot..end, start);
        buf[end - slot..end].fill(0);
    }

    /// Zero every key/value slot, keeping flags and sibling pointers.
    pub fn clear_leaf_slots(&self, buf: &mut [u8]) {
        let start = self.leaf_key_offset(0);
        let end = self.previous_sibling_offset();
        buf[start..end].fill(0);
    }

    #[must_use]
    pub fn previous_sibling<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let start = self.previous_sibling_offset();
        &buf[start..start + POINTER_SIZE]
    }

    #[must_use]
    pub fn next_sibling<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let start = self.next_sibling_offset();
        &buf[start..start + POINTER_SIZE]
    }

    pub fn previous_sibling_mut<'a>(&self, buf: &'a mut [u8]) -> &'a mut [u8] {
        let start = self.previous_sibling_offset();
        &mut buf[start..start + POINTER_SIZE]
    }

    pub fn next_sibling_mut<'a>(&self, buf: &'a mut [u8]) -> &'a mut [u8] {
        let start = self.next_sibling_offset();
        &mut buf[start..start + POINTER_SIZE]
    }

    // ========== Internal slots ==========

    #[must_use]
    pub fn child_present(&self, buf: &[u8], i: usize) -> bool {
        i < self.degree && !is_zeroed(&buf[self.child_range(i)])
    }

    /// Number of packed child pointers.
    #[must_use]
    pub fn child_count(&self, buf: &[u8]) -> usize {
        (0..self.degree)
            .take_while(|&i| self.child_present(buf, i))
            .count()
    }

    #[must_use]
    pub fn internal_key_present(&self, buf: &[u8], i: usize) -> bool {
        i < self.max_keys()
            && (!is_zeroed(&buf[self.internal_key_range(i)])
                || !is_zeroed(&buf[self.child_range(i + 1)]))
    }

    /// Number of packed internal keys.
    #[must_use]
    pub fn internal_key_count(&self, buf: &[u8]) -> usize {
        (0..self.max_keys())
            .take_while(|&i| self.internal_key_present(buf, i))
            .count()
    }

    #[must_use]
    pub fn child<'a>(&self, buf: &'a [u8], i: usize) -> &'a [u8] {
        &buf[self.child_range(i)]
    }

    pub fn child_mut<'a>(&self, buf: &'a mut [u8], i: usize) -> &'a mut [u8] {
        &mut buf[self.child_range(i)]
    }

    #[must_use]
    pub fn internal_key<'a>(&self, buf: &'a [u8], i: usize) -> &'a [u8] {
        &buf[self.internal_key_range(i)]
    }

    pub fn internal_key_mut<'a>(&self, buf: &'a mut [u8], i: usize) -> &'a mut [u8] {
        &mut buf[self.internal_key_range(i)]
    }

    /// Zero every child and key slot of an internal node.
    pub fn clear_internal_slots(&self, buf: &mut [u8]) {
        let start = self.child_offset(0);
        let end = self.child_offset(self.degree - 1) + POINTER_SIZE;
        buf[start..end].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> NodeLayout {
        NodeLayout::new(4, 8, 8)
    }

    #[test]
    fn test_offsets_degree_four() {
        let layout = layout();

        assert_eq!(layout.child_offset(0), 1);
        assert_eq!(layout.internal_key_offset(0), 14);
        assert_eq!(layout.child_offset(1), 22);
        assert_eq!(layout.child_offset(3), 64);

        assert_eq!(layout.leaf_key_offset(2), 33);
        assert_eq!(layout.leaf_value_offset(2), 41);
        assert_eq!(layout.previous_sibling_offset(), 49);
        assert_eq!(layout.next_sibling_offset(), 62);
    }

    #[test]
    fn test_node_size_covers_both_shapes() {
        let layout = layout();
        // 1 + 4 * (8 + 13) + 26 = 111, rounded to 112.
        assert_eq!(layout.node_size(), 112);
        assert!(layout.next_sibling_offset() + POINTER_SIZE <= layout.node_size());
        assert!(layout.child_offset(3) + POINTER_SIZE <= layout.node_size());
        assert_eq!(layout.node_size() % 8, 0);
    }

    #[test]
    fn test_min_and_max_keys() {
        assert_eq!(NodeLayout::new(4, 8, 8).min_keys(), 1);
        assert_eq!(NodeLayout::new(4, 8, 8).max_keys(), 3);
        assert_eq!(NodeLayout::new(5, 8, 8).min_keys(), 2);
        assert_eq!(NodeLayout::new(3, 8, 8).min_keys(), 1);
    }

    #[test]
    fn test_flags() {
        let mut buf = vec![0u8; layout().node_size()];
        NodeLayout::set_flag(&mut buf, FLAG_LEAF, true);
        NodeLayout::set_flag(&mut buf, FLAG_ROOT, true);
        assert_eq!(NodeLayout::flags(&buf), 0x03);

        NodeLayout::set_flag(&mut buf, FLAG_ROOT, false);
        assert_eq!(NodeLayout::flags(&buf), FLAG_LEAF);
    }

    #[test]
    fn test_leaf_open_and_close_slot() {
        let layout = layout();
        let mut buf = vec![0u8; layout.node_size()];

        layout.leaf_key_mut(&mut buf, 0).fill(1);
        layout.leaf_value_mut(&mut buf, 0).fill(11);
        layout.leaf_key_mut(&mut buf, 1).fill(3);
        layout.leaf_value_mut(&mut buf, 1).fill(33);
        assert_eq!(layout.leaf_count(&buf), 2);

        layout.open_leaf_slot(&mut buf, 1, 2);
        assert_eq!(layout.leaf_count(&buf), 1);
        layout.leaf_key_mut(&mut buf, 1).fill(2);
        layout.leaf_value_mut(&mut buf, 1).fill(22);
        assert_eq!(layout.leaf_count(&buf), 3);
        assert_eq!(layout.leaf_key(&buf, 2), &[3u8; 8]);

        layout.close_leaf_slot(&mut buf, 0, 3);
        assert_eq!(layout.leaf_count(&buf), 2);
        assert_eq!(layout.leaf_key(&buf, 0), &[2u8; 8]);
        assert_eq!(layout.leaf_value(&buf, 1), &[33u8; 8]);
        assert!(!layout.leaf_slot_present(&buf, 2));
    }

    #[test]
    fn test_clear_leaf_keeps_siblings() {
        let layout = layout();
        let mut buf = vec![0u8; layout.node_size()];
        layout.leaf_key_mut(&mut buf, 0).fill(9);
        layout.next_sibling_mut(&mut buf).fill(2);

        layout.clear_leaf_slots(&mut buf);
        assert_eq!(layout.leaf_count(&buf), 0);
        assert_eq!(layout.next_sibling(&buf), &[2u8; POINTER_SIZE]);
    }

    #[test]
    fn test_internal_key_presence_follows_right_child() {
        let layout = layout();
        let mut buf = vec![0u8; layout.node_size()];

        // An all-zero key with a live right child still counts as a key.
        layout.child_mut(&mut buf, 0).fill(2);
        layout.child_mut(&mut buf, 1).fill(2);
        assert_eq!(layout.internal_key_count(&buf), 1);
        assert_eq!(layout.child_count(&buf), 2);

        layout.clear_internal_slots(&mut buf);
        assert_eq!(layout.internal_key_count(&buf), 0);
        assert_eq!(layout.child_count(&buf), 0);
    }
}

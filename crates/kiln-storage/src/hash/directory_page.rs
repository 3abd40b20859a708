//! Hash directory page: routes hash prefixes to bucket pages.
//!
//! Layout (little-endian):
//! - `u32 page_id`: this page's number within the index file
//! - `u32 lsn`: log sequence number, reserved for a recovery collaborator
//! - `u32 global_depth`
//! - `u8[DIRECTORY_ARRAY_SIZE] local_depths`
//! - `u32[DIRECTORY_ARRAY_SIZE] bucket_page_nums`
//!
//! Only the first `2^global_depth` directory slots are live; trailing bytes
//! are undefined. Structural mutations work on an owned copy of the page
//! that is written back under the directory frame's write latch; the hot
//! routing fields have `*_in_slice` readers so lookups avoid the copy.

use kiln_common::page::{INVALID_PAGE_NUM, PAGE_SIZE};
use std::collections::HashMap;

/// Maximum global depth. The directory never addresses more than
/// `2^DIRECTORY_MAX_DEPTH` slots.
pub const DIRECTORY_MAX_DEPTH: u32 = 9;

/// Number of directory slots reserved in the page image.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH;

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = 12;
const BUCKET_PAGE_NUMS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// A directory page for the extendible hash index.
pub struct HashDirectoryPage {
    /// Page data buffer.
    data: Box<[u8; PAGE_SIZE]>,
}

impl HashDirectoryPage {
    /// Creates a new directory page with global depth 0 and every slot
    /// unassigned.
    pub fn new(page_num: u32) -> Self {
        let mut page = Self {
            data: Box::new([0u8; PAGE_SIZE]),
        };
        page.set_page_id(page_num);
        for i in 0..DIRECTORY_ARRAY_SIZE {
            page.set_bucket_page_num(i, INVALID_PAGE_NUM);
        }
        page
    }

    /// Creates a directory page view from a page image.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut boxed = Box::new([0u8; PAGE_SIZE]);
        boxed.copy_from_slice(data);
        Self { data: boxed }
    }

    /// Returns the raw page data.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    // =========================================================================
    // Slice readers for the hot routing path
    // =========================================================================

    /// Reads the global depth from a page image.
    #[inline]
    pub fn global_depth_in_slice(data: &[u8]) -> u32 {
        u32::from_le_bytes(
            data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Reads the global depth mask from a page image.
    #[inline]
    pub fn global_depth_mask_in_slice(data: &[u8]) -> u32 {
        (1 << Self::global_depth_in_slice(data)) - 1
    }

    /// Reads a bucket page number from a page image.
    #[inline]
    pub fn bucket_page_num_in_slice(data: &[u8], idx: usize) -> u32 {
        let offset = BUCKET_PAGE_NUMS_OFFSET + idx * 4;
        u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns this page's number within the index file.
    pub fn page_id(&self) -> u32 {
        u32::from_le_bytes(self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].try_into().unwrap())
    }

    /// Sets this page's number.
    pub fn set_page_id(&mut self, page_num: u32) {
        self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].copy_from_slice(&page_num.to_le_bytes());
    }

    /// Returns the log sequence number.
    pub fn lsn(&self) -> u32 {
        u32::from_le_bytes(self.data[LSN_OFFSET..LSN_OFFSET + 4].try_into().unwrap())
    }

    /// Sets the log sequence number.
    pub fn set_lsn(&mut self, lsn: u32) {
        self.data[LSN_OFFSET..LSN_OFFSET + 4].copy_from_slice(&lsn.to_le_bytes());
    }

    /// Returns the global depth.
    pub fn global_depth(&self) -> u32 {
        Self::global_depth_in_slice(self.data.as_ref())
    }

    /// Sets the global depth.
    pub fn set_global_depth(&mut self, depth: u32) {
        debug_assert!(depth <= DIRECTORY_MAX_DEPTH);
        self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&depth.to_le_bytes());
    }

    /// Increments the global depth, doubling the live directory size.
    /// The newly exposed slots keep whatever the image held.
    pub fn incr_global_depth(&mut self) {
        let depth = self.global_depth();
        debug_assert!(depth < DIRECTORY_MAX_DEPTH);
        self.set_global_depth(depth + 1);
    }

    /// Decrements the global depth, halving the live directory size.
    /// Truncated slots are not physically overwritten.
    pub fn decr_global_depth(&mut self) {
        let depth = self.global_depth();
        debug_assert!(depth > 0);
        self.set_global_depth(depth - 1);
    }

    /// Returns a mask of `global_depth` low-order 1 bits.
    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    /// Returns the number of live directory slots (`2^global_depth`).
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    /// Returns the local depth of the bucket referenced by slot `idx`.
    pub fn local_depth(&self, idx: usize) -> u32 {
        debug_assert!(idx < DIRECTORY_ARRAY_SIZE);
        self.data[LOCAL_DEPTHS_OFFSET + idx] as u32
    }

    /// Sets the local depth of slot `idx`.
    pub fn set_local_depth(&mut self, idx: usize, depth: u32) {
        debug_assert!(idx < DIRECTORY_ARRAY_SIZE);
        debug_assert!(depth <= DIRECTORY_MAX_DEPTH);
        self.data[LOCAL_DEPTHS_OFFSET + idx] = depth as u8;
    }

    /// Increments the local depth of slot `idx`.
    pub fn incr_local_depth(&mut self, idx: usize) {
        let depth = self.local_depth(idx);
        self.set_local_depth(idx, depth + 1);
    }

    /// Decrements the local depth of slot `idx`.
    pub fn decr_local_depth(&mut self, idx: usize) {
        let depth = self.local_depth(idx);
        debug_assert!(depth > 0);
        self.set_local_depth(idx, depth - 1);
    }

    /// Returns a mask of `local_depth(idx)` low-order 1 bits.
    pub fn local_depth_mask(&self, idx: usize) -> u32 {
        (1 << self.local_depth(idx)) - 1
    }

    /// Returns the page number of the bucket referenced by slot `idx`.
    pub fn bucket_page_num(&self, idx: usize) -> u32 {
        debug_assert!(idx < DIRECTORY_ARRAY_SIZE);
        Self::bucket_page_num_in_slice(self.data.as_ref(), idx)
    }

    /// Points slot `idx` at a bucket page.
    pub fn set_bucket_page_num(&mut self, idx: usize, page_num: u32) {
        debug_assert!(idx < DIRECTORY_ARRAY_SIZE);
        let offset = BUCKET_PAGE_NUMS_OFFSET + idx * 4;
        self.data[offset..offset + 4].copy_from_slice(&page_num.to_le_bytes());
    }

    /// Returns the split image of slot `idx`: the index obtained by flipping
    /// bit `local_depth(idx) - 1`.
    pub fn split_image_index(&self, idx: usize) -> usize {
        let depth = self.local_depth(idx);
        debug_assert!(depth > 0);
        idx ^ (1 << (depth - 1))
    }

    /// Returns true iff every live slot's local depth is strictly below the
    /// global depth, i.e. the directory can halve.
    pub fn can_shrink(&self) -> bool {
        let global = self.global_depth();
        if global == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < global)
    }

    /// Checks the directory invariants, panicking on violation.
    ///
    /// 1. Every local depth is at most the global depth.
    /// 2. Every slot agrees with its canonical slot (the one addressed by
    ///    its low `local_depth` bits) on both bucket page and depth.
    /// 3. Each bucket with local depth `d` is referenced by exactly
    ///    `2^(global_depth - d)` slots.
    ///
    /// Violations are programming errors, not runtime conditions.
    pub fn verify_integrity(&self) {
        let global = self.global_depth();
        let size = self.size();

        let mut refs: HashMap<u32, (u32, usize)> = HashMap::new();

        for i in 0..size {
            let depth = self.local_depth(i);
            let page_num = self.bucket_page_num(i);

            assert!(
                depth <= global,
                "slot {}: local depth {} exceeds global depth {}",
                i,
                depth,
                global
            );

            let canonical = i & ((1usize << depth) - 1);
            assert_eq!(
                page_num,
                self.bucket_page_num(canonical),
                "slot {}: bucket page {} differs from canonical slot {}",
                i,
                page_num,
                canonical
            );
            assert_eq!(
                depth,
                self.local_depth(canonical),
                "slot {}: local depth {} differs from canonical slot {}",
                i,
                depth,
                canonical
            );

            let entry = refs.entry(page_num).or_insert((depth, 0));
            assert_eq!(
                entry.0, depth,
                "bucket page {} referenced with local depths {} and {}",
                page_num, entry.0, depth
            );
            entry.1 += 1;
        }

        for (page_num, (depth, count)) in refs {
            assert_eq!(
                count,
                size >> depth,
                "bucket page {} at depth {} referenced by {} slots, expected {}",
                page_num,
                depth,
                count,
                size >> depth
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_directory_page() {
        let page = HashDirectoryPage::new(10);

        assert_eq!(page.page_id(), 10);
        assert_eq!(page.lsn(), 0);
        assert_eq!(page.global_depth(), 0);
        assert_eq!(page.size(), 1);

        for i in 0..DIRECTORY_ARRAY_SIZE {
            assert_eq!(page.bucket_page_num(i), INVALID_PAGE_NUM);
            assert_eq!(page.local_depth(i), 0);
        }
    }

    #[test]
    fn test_page_id_and_lsn() {
        let mut page = HashDirectoryPage::new(0);

        page.set_page_id(10);
        assert_eq!(page.page_id(), 10);
        page.set_lsn(100);
        assert_eq!(page.lsn(), 100);
    }

    #[test]
    fn test_bucket_page_num_assignment() {
        let mut page = HashDirectoryPage::new(0);

        for i in 0..8 {
            page.set_bucket_page_num(i, i as u32);
        }
        for i in 0..8 {
            assert_eq!(page.bucket_page_num(i), i as u32);
        }
    }

    #[test]
    fn test_initial_two_bucket_setup() {
        let mut page = HashDirectoryPage::new(0);

        for i in 0..2 {
            page.set_bucket_page_num(i, i as u32);
            page.set_local_depth(i, 1);
            assert_eq!(page.local_depth_mask(i), 1);
        }
        page.set_global_depth(1);

        assert_eq!(page.global_depth_mask(), 1);
        assert_eq!(page.global_depth(), 1);
        assert_eq!(page.size(), 2);
        assert!(!page.can_shrink());

        page.verify_integrity();
    }

    #[test]
    fn test_grow_split_and_shrink() {
        let mut page = HashDirectoryPage::new(0);
        page.set_bucket_page_num(0, 0);
        page.set_local_depth(0, 1);
        page.set_bucket_page_num(1, 1);
        page.set_local_depth(1, 1);
        page.set_global_depth(1);

        // Directory growing
        page.incr_global_depth();
        assert_eq!(page.size(), 4);
        assert_eq!(page.global_depth_mask(), 3);

        // Mirror the lower half, then split the bucket at slot 0
        page.set_bucket_page_num(2, 0);
        page.set_local_depth(2, 1);
        page.set_bucket_page_num(3, 1);
        page.set_local_depth(3, 1);
        assert!(page.can_shrink());

        page.incr_local_depth(0);
        page.set_local_depth(2, 2);
        assert_eq!(page.split_image_index(0), 2);
        assert_eq!(page.split_image_index(2), 0);

        // The split image gets a fresh page
        page.set_bucket_page_num(2, 2);

        assert_eq!(page.local_depth_mask(0), 3);
        assert_eq!(page.local_depth_mask(2), 3);
        assert_eq!(page.local_depth_mask(1), 1);
        assert_eq!(page.local_depth_mask(3), 1);

        assert!(!page.can_shrink());
        page.verify_integrity();

        // Merge the pair back and shrink
        page.decr_local_depth(0);
        page.decr_local_depth(2);
        page.set_bucket_page_num(2, 0);

        assert!(page.can_shrink());
        page.decr_global_depth();
        assert_eq!(page.size(), 2);

        page.verify_integrity();
    }

    #[test]
    fn test_split_image_index_is_involution() {
        let mut page = HashDirectoryPage::new(0);
        page.set_global_depth(3);
        for i in 0..8 {
            page.set_local_depth(i, 3);
        }

        for i in 0..8 {
            let image = page.split_image_index(i);
            assert_eq!(page.split_image_index(image), i);
            assert_ne!(image, i);
        }
    }

    #[test]
    fn test_can_shrink_requires_all_below_global() {
        let mut page = HashDirectoryPage::new(0);
        page.set_global_depth(2);
        for i in 0..4 {
            page.set_bucket_page_num(i, (i % 2) as u32);
            page.set_local_depth(i, 1);
        }
        assert!(page.can_shrink());

        page.set_local_depth(0, 2);
        assert!(!page.can_shrink());
    }

    #[test]
    fn test_can_shrink_false_at_depth_zero() {
        let page = HashDirectoryPage::new(0);
        assert!(!page.can_shrink());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut page = HashDirectoryPage::new(7);
        page.set_lsn(42);
        page.set_global_depth(2);
        for i in 0..4 {
            page.set_bucket_page_num(i, 100 + i as u32);
            page.set_local_depth(i, 2);
        }

        let restored = HashDirectoryPage::from_bytes(&page.as_bytes()[..]);
        assert_eq!(restored.page_id(), 7);
        assert_eq!(restored.lsn(), 42);
        assert_eq!(restored.global_depth(), 2);
        for i in 0..4 {
            assert_eq!(restored.bucket_page_num(i), 100 + i as u32);
            assert_eq!(restored.local_depth(i), 2);
        }
    }

    #[test]
    fn test_page_image_layout() {
        let mut page = HashDirectoryPage::new(0x0102_0304);
        page.set_lsn(0x0506_0708);
        page.set_global_depth(1);
        page.set_local_depth(0, 3);
        page.set_bucket_page_num(0, 0xAABB_CCDD);

        let bytes = page.as_bytes();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0x08, 0x07, 0x06, 0x05]);
        assert_eq!(&bytes[8..12], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(bytes[12], 3);
        assert_eq!(&bytes[524..528], &[0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn test_slice_readers_match_accessors() {
        let mut page = HashDirectoryPage::new(0);
        page.set_global_depth(3);
        page.set_bucket_page_num(5, 77);

        let data = &page.as_bytes()[..];
        assert_eq!(HashDirectoryPage::global_depth_in_slice(data), 3);
        assert_eq!(HashDirectoryPage::global_depth_mask_in_slice(data), 7);
        assert_eq!(HashDirectoryPage::bucket_page_num_in_slice(data, 5), 77);
    }

    #[test]
    #[should_panic(expected = "exceeds global depth")]
    fn test_verify_integrity_rejects_deep_local() {
        let mut page = HashDirectoryPage::new(0);
        page.set_global_depth(1);
        page.set_bucket_page_num(0, 0);
        page.set_local_depth(0, 2);
        page.set_bucket_page_num(1, 1);
        page.set_local_depth(1, 1);
        page.verify_integrity();
    }

    #[test]
    #[should_panic]
    fn test_verify_integrity_rejects_fanout_violation() {
        let mut page = HashDirectoryPage::new(0);
        page.set_global_depth(2);
        // Slot 2 should mirror slot 0 at depth 1, but points elsewhere
        page.set_bucket_page_num(0, 0);
        page.set_local_depth(0, 1);
        page.set_bucket_page_num(1, 1);
        page.set_local_depth(1, 1);
        page.set_bucket_page_num(2, 9);
        page.set_local_depth(2, 1);
        page.set_bucket_page_num(3, 1);
        page.set_local_depth(3, 1);
        page.verify_integrity();
    }
}

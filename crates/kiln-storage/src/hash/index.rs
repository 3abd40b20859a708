//! Page-backed extendible hash index.
//!
//! Maps fixed-width keys to values (canonically table keys to record ids)
//! through a directory page and a set of bucket pages, all fetched and
//! pinned through the buffer pool and persisted via the disk manager.
//!
//! Concurrency follows a two-tier latch protocol, always acquired in
//! table → bucket order:
//! - the table latch guards the directory's structural shape: read-held for
//!   point operations, write-held for split-insert and merge;
//! - each bucket page's frame-data lock is its bucket latch: read for
//!   lookups, write for insert, remove, and split.
//!
//! Every fetched page is wrapped in a scoped pin guard so it is unpinned
//! with an accurate dirty flag on every exit path, after its latch guard
//! has been released.

use crate::codec::{FixedCodec, KeyComparator};
use crate::disk::DiskManager;
use crate::hash::bucket_page::HashBucketPage;
use crate::hash::directory_page::{HashDirectoryPage, DIRECTORY_MAX_DEPTH};
use crate::hash::hasher::KeyHasher;
use kiln_buffer::{BufferFrame, BufferPool, EvictedPage};
use kiln_common::page::PageId;
use kiln_common::{KilnError, Result};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Opaque transaction context threaded through index operations for outer
/// transaction collaborators. The index itself never interprets it.
#[derive(Debug, Default)]
pub struct Transaction;

/// A buffer-pool page held pinned for the duration of a scope.
///
/// Dropping the guard unpins the page with the accumulated dirty flag.
/// Latch guards obtained from [`frame`](Self::frame) must be dropped before
/// this guard goes out of scope.
struct PinnedPage<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
    dirty: Cell<bool>,
}

impl<'a> PinnedPage<'a> {
    fn new(pool: &'a BufferPool, page_id: PageId, frame: &'a BufferFrame) -> Self {
        Self {
            pool,
            page_id,
            frame,
            dirty: Cell::new(false),
        }
    }

    /// Returns the pinned frame.
    fn frame(&self) -> &'a BufferFrame {
        self.frame
    }

    /// Records that the page was modified; the unpin will carry dirty=true.
    fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty.get());
    }
}

/// An extendible hash index over a buffer-managed page file.
///
/// Generic over the key and value codecs, the key comparator, and the key
/// hasher, so routing and comparison compile down without dynamic dispatch.
pub struct ExtendibleHashIndex<K, V, C, H> {
    /// Disk manager backing page loads, write-back, and allocation.
    disk: Arc<DiskManager>,
    /// Buffer pool all page accesses go through.
    pool: Arc<BufferPool>,
    /// File holding this index's pages.
    file_id: u32,
    /// Page number of the directory page. Owned by the index forever.
    directory_page_num: u32,
    /// Table latch guarding the directory's structural shape.
    table_latch: RwLock<()>,
    /// Serializes read-through loads of uncached pages.
    load_lock: Mutex<()>,
    comparator: C,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, H> ExtendibleHashIndex<K, V, C, H>
where
    K: FixedCodec,
    V: FixedCodec + PartialEq,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a new index: one directory page and two initial buckets at
    /// local depth 1, global depth 1.
    pub fn create(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        file_id: u32,
        comparator: C,
        hasher: H,
    ) -> Result<Self> {
        let dir_page_id = disk.allocate_page(file_id)?;
        let bucket_0 = disk.allocate_page(file_id)?;
        let bucket_1 = disk.allocate_page(file_id)?;

        let index = Self {
            disk,
            pool,
            file_id,
            directory_page_num: dir_page_id.page_num,
            table_latch: RwLock::new(()),
            load_lock: Mutex::new(()),
            comparator,
            hasher,
            _marker: PhantomData,
        };

        {
            let dir_pin = index.pin_new(dir_page_id)?;
            let mut dir = HashDirectoryPage::new(dir_page_id.page_num);
            dir.set_bucket_page_num(0, bucket_0.page_num);
            dir.set_local_depth(0, 1);
            dir.set_bucket_page_num(1, bucket_1.page_num);
            dir.set_local_depth(1, 1);
            dir.set_global_depth(1);

            let mut data = dir_pin.frame().write_data();
            data[..].copy_from_slice(&dir.as_bytes()[..]);
            drop(data);
            dir_pin.mark_dirty();
        }

        // A zero-filled page is a valid empty bucket; pin and dirty the two
        // initial buckets so their images reach disk.
        for page_id in [bucket_0, bucket_1] {
            let pin = index.pin_new(page_id)?;
            pin.mark_dirty();
        }

        debug!(
            file_id,
            directory_page = index.directory_page_num,
            "created extendible hash index"
        );
        Ok(index)
    }

    /// Reattaches an index to an existing directory page.
    pub fn open(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        file_id: u32,
        directory_page_num: u32,
        comparator: C,
        hasher: H,
    ) -> Result<Self> {
        let index = Self {
            disk,
            pool,
            file_id,
            directory_page_num,
            table_latch: RwLock::new(()),
            load_lock: Mutex::new(()),
            comparator,
            hasher,
            _marker: PhantomData,
        };

        let dir = {
            let dir_pin = index.fetch_pinned(directory_page_num)?;
            let data = dir_pin.frame().read_data();
            HashDirectoryPage::from_bytes(&data[..])
        };
        if dir.page_id() != directory_page_num {
            return Err(KilnError::DirectoryCorrupted(format!(
                "directory page {} identifies itself as {}",
                directory_page_num,
                dir.page_id()
            )));
        }

        Ok(index)
    }

    /// Returns the directory page number.
    pub fn directory_page_num(&self) -> u32 {
        self.directory_page_num
    }

    /// Truncates the key's 64-bit digest to the 32 bits used for routing.
    #[inline]
    fn hash32(&self, key: &K) -> u32 {
        self.hasher.hash_key(key) as u32
    }

    /// Routes a key through a directory page image to its bucket page.
    #[inline]
    fn route(&self, dir_data: &[u8], key: &K) -> u32 {
        let mask = HashDirectoryPage::global_depth_mask_in_slice(dir_data);
        let idx = (self.hash32(key) & mask) as usize;
        HashDirectoryPage::bucket_page_num_in_slice(dir_data, idx)
    }

    /// Writes an evicted dirty page back to disk.
    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.disk.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }

    /// Pins a freshly allocated, zero-filled page.
    fn pin_new(&self, page_id: PageId) -> Result<PinnedPage<'_>> {
        let (frame, evicted) = self.pool.new_page(page_id)?;
        let pin = PinnedPage::new(self.pool.as_ref(), page_id, frame);
        self.write_back(evicted)?;
        Ok(pin)
    }

    /// Fetches a page, reading through to disk on a pool miss.
    fn fetch_pinned(&self, page_num: u32) -> Result<PinnedPage<'_>> {
        let page_id = PageId::new(self.file_id, page_num);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(PinnedPage::new(self.pool.as_ref(), page_id, frame));
        }

        let _load = self.load_lock.lock();
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(PinnedPage::new(self.pool.as_ref(), page_id, frame));
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        let pin = PinnedPage::new(self.pool.as_ref(), page_id, frame);
        self.write_back(evicted)?;
        Ok(pin)
    }

    /// Collects every value stored under `key` into `result`.
    ///
    /// Returns true iff at least one value was found.
    pub fn get_value(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
        result: &mut Vec<V>,
    ) -> Result<bool> {
        let _table = self.table_latch.read();

        let dir_pin = self.fetch_pinned(self.directory_page_num)?;
        let bucket_page_num = {
            let dir_data = dir_pin.frame().read_data();
            self.route(&dir_data[..], key)
        };

        let bucket_pin = self.fetch_pinned(bucket_page_num)?;
        let bucket_data = bucket_pin.frame().read_data();
        Ok(HashBucketPage::<K, V>::get_value_in_slice(
            &bucket_data[..],
            key,
            &self.comparator,
            result,
        ))
    }

    /// Inserts a (key, value) pair.
    ///
    /// Returns false if an identical pair is already present. Falls back to
    /// [`split_insert`](Self::split_insert) when the routed bucket is full.
    pub fn insert(&self, txn: Option<&Transaction>, key: &K, value: &V) -> Result<bool> {
        {
            let _table = self.table_latch.read();

            let dir_pin = self.fetch_pinned(self.directory_page_num)?;
            let bucket_page_num = {
                let dir_data = dir_pin.frame().read_data();
                self.route(&dir_data[..], key)
            };

            let bucket_pin = self.fetch_pinned(bucket_page_num)?;
            let mut bucket_data = bucket_pin.frame().write_data();
            if !HashBucketPage::<K, V>::is_full_in_slice(&bucket_data[..]) {
                let inserted = HashBucketPage::<K, V>::insert_in_slice(
                    &mut bucket_data[..],
                    key,
                    value,
                    &self.comparator,
                );
                if inserted {
                    bucket_pin.mark_dirty();
                }
                return Ok(inserted);
            }

            // Full bucket: everything is released before the slow path
            // reacquires the table latch in write mode.
        }
        self.split_insert(txn, key, value)
    }

    /// Slow-path insertion: splits the routed bucket (growing the directory
    /// when its local depth has reached the global depth) until the pair
    /// can be placed.
    fn split_insert(&self, _txn: Option<&Transaction>, key: &K, value: &V) -> Result<bool> {
        let _table = self.table_latch.write();

        let dir_pin = self.fetch_pinned(self.directory_page_num)?;

        // A single split may leave the routed bucket full when every key
        // collides into one image, so re-route and retry until placed.
        loop {
            let mut dir = {
                let data = dir_pin.frame().read_data();
                HashDirectoryPage::from_bytes(&data[..])
            };
            let bucket_idx = (self.hash32(key) & dir.global_depth_mask()) as usize;
            let bucket_page_num = dir.bucket_page_num(bucket_idx);

            let bucket_pin = self.fetch_pinned(bucket_page_num)?;
            let mut bucket_data = bucket_pin.frame().write_data();

            if !HashBucketPage::<K, V>::is_full_in_slice(&bucket_data[..]) {
                let inserted = HashBucketPage::<K, V>::insert_in_slice(
                    &mut bucket_data[..],
                    key,
                    value,
                    &self.comparator,
                );
                if inserted {
                    bucket_pin.mark_dirty();
                }
                return Ok(inserted);
            }

            let old_global = dir.global_depth();
            let old_local = dir.local_depth(bucket_idx);

            if old_local == old_global {
                if old_global == DIRECTORY_MAX_DEPTH {
                    return Err(KilnError::DirectoryFull {
                        max_depth: DIRECTORY_MAX_DEPTH,
                    });
                }
                // Grow: the newly exposed upper half mirrors the lower half.
                dir.incr_global_depth();
                let old_size = 1usize << old_global;
                for i in old_size..dir.size() {
                    let src = i & (old_size - 1);
                    dir.set_bucket_page_num(i, dir.bucket_page_num(src));
                    dir.set_local_depth(i, dir.local_depth(src));
                }
            }

            let new_local = old_local + 1;
            // The split image's bit pattern: the bucket's low bits with the
            // new distinguishing bit set.
            let split_bits = ((bucket_idx as u32) & ((1 << old_local) - 1)) | (1 << old_local);

            let split_page_id = self.disk.allocate_page(self.file_id)?;
            let split_pin = self.pin_new(split_page_id)?;

            debug!(
                bucket_idx,
                old_local,
                new_local,
                global_depth = dir.global_depth(),
                split_page = split_page_id.page_num,
                "splitting hash bucket"
            );

            // Every directory slot sharing the old bucket adopts the new
            // depth; slots matching the split pattern repoint to the new
            // page. A bucket whose depth lagged the global depth is shared
            // by more than two slots, and all of them must agree afterwards.
            for i in 0..dir.size() {
                if dir.bucket_page_num(i) != bucket_page_num {
                    continue;
                }
                dir.set_local_depth(i, new_local);
                if (i as u32) & ((1 << new_local) - 1) == split_bits {
                    dir.set_bucket_page_num(i, split_page_id.page_num);
                }
            }

            // Rehash the old bucket across the pair.
            {
                let mut split_data = split_pin.frame().write_data();
                let pair_mask = (1u32 << new_local) - 1;
                for slot in 0..HashBucketPage::<K, V>::CAPACITY {
                    if !HashBucketPage::<K, V>::is_readable_in_slice(&bucket_data[..], slot) {
                        continue;
                    }
                    let slot_key = HashBucketPage::<K, V>::key_at_in_slice(&bucket_data[..], slot);
                    if self.hash32(&slot_key) & pair_mask == split_bits {
                        let slot_value =
                            HashBucketPage::<K, V>::value_at_in_slice(&bucket_data[..], slot);
                        let moved = HashBucketPage::<K, V>::insert_in_slice(
                            &mut split_data[..],
                            &slot_key,
                            &slot_value,
                            &self.comparator,
                        );
                        debug_assert!(moved);
                        HashBucketPage::<K, V>::remove_at_in_slice(&mut bucket_data[..], slot);
                    }
                }
            }
            split_pin.mark_dirty();
            bucket_pin.mark_dirty();

            // Publish the updated directory before the next routing pass.
            {
                let mut data = dir_pin.frame().write_data();
                data[..].copy_from_slice(&dir.as_bytes()[..]);
            }
            dir_pin.mark_dirty();
        }
    }

    /// Removes the exact (key, value) pair.
    ///
    /// Returns false if no such pair exists. If the removal empties the
    /// bucket, attempts a [`merge`](Self::merge) afterwards.
    pub fn remove(&self, txn: Option<&Transaction>, key: &K, value: &V) -> Result<bool> {
        let removed;
        let emptied;
        {
            let _table = self.table_latch.read();

            let dir_pin = self.fetch_pinned(self.directory_page_num)?;
            let bucket_page_num = {
                let dir_data = dir_pin.frame().read_data();
                self.route(&dir_data[..], key)
            };

            let bucket_pin = self.fetch_pinned(bucket_page_num)?;
            let mut bucket_data = bucket_pin.frame().write_data();
            removed = HashBucketPage::<K, V>::remove_in_slice(
                &mut bucket_data[..],
                key,
                value,
                &self.comparator,
            );
            if removed {
                bucket_pin.mark_dirty();
            }
            emptied = HashBucketPage::<K, V>::is_empty_in_slice(&bucket_data[..]);
        }

        if emptied {
            self.merge(txn, key)?;
        }
        Ok(removed)
    }

    /// Directory contraction: folds the key's (empty) bucket into its split
    /// image and shrinks the directory while every local depth is below the
    /// global depth.
    fn merge(&self, _txn: Option<&Transaction>, key: &K) -> Result<()> {
        let _table = self.table_latch.write();

        let dir_pin = self.fetch_pinned(self.directory_page_num)?;
        let mut dir = {
            let data = dir_pin.frame().read_data();
            HashDirectoryPage::from_bytes(&data[..])
        };

        let bucket_idx = (self.hash32(key) & dir.global_depth_mask()) as usize;
        let local = dir.local_depth(bucket_idx);
        if local <= 1 {
            return Ok(());
        }

        let bucket_page_num = dir.bucket_page_num(bucket_idx);

        // Recheck emptiness under the bucket's read latch: the bucket may
        // have been refilled between the observation in remove() and here.
        let empty = {
            let bucket_pin = self.fetch_pinned(bucket_page_num)?;
            let data = bucket_pin.frame().read_data();
            HashBucketPage::<K, V>::is_empty_in_slice(&data[..])
        };
        if !empty {
            return Ok(());
        }

        let mut changed = false;

        let split_idx = dir.split_image_index(bucket_idx);
        if dir.local_depth(split_idx) == local {
            let survivor = dir.bucket_page_num(split_idx);

            dir.decr_local_depth(bucket_idx);
            dir.decr_local_depth(split_idx);
            dir.set_bucket_page_num(bucket_idx, survivor);

            // Fold every other slot still pointing at either half of the
            // pair onto the survivor.
            for i in 0..dir.size() {
                if i == bucket_idx || i == split_idx {
                    continue;
                }
                let current = dir.bucket_page_num(i);
                if current == bucket_page_num || current == survivor {
                    dir.decr_local_depth(i);
                    dir.set_bucket_page_num(i, survivor);
                }
            }
            changed = true;

            debug!(
                bucket_idx,
                split_idx,
                retired_page = bucket_page_num,
                survivor_page = survivor,
                "merged empty hash bucket"
            );

            // The retired page is unreachable now; drop it from the pool.
            // The disk page itself is orphaned (no free-page reuse).
            self.pool
                .delete_page(PageId::new(self.file_id, bucket_page_num));
        }

        while dir.can_shrink() {
            dir.decr_global_depth();
            changed = true;
            debug!(global_depth = dir.global_depth(), "shrank hash directory");
        }

        if changed {
            let mut data = dir_pin.frame().write_data();
            data[..].copy_from_slice(&dir.as_bytes()[..]);
            drop(data);
            dir_pin.mark_dirty();
        }
        Ok(())
    }

    /// Returns the directory's global depth.
    pub fn global_depth(&self) -> Result<u32> {
        let _table = self.table_latch.read();
        let dir_pin = self.fetch_pinned(self.directory_page_num)?;
        let data = dir_pin.frame().read_data();
        Ok(HashDirectoryPage::global_depth_in_slice(&data[..]))
    }

    /// Checks the directory invariants, panicking on violation.
    pub fn verify_integrity(&self) -> Result<()> {
        let _table = self.table_latch.read();
        let dir_pin = self.fetch_pinned(self.directory_page_num)?;
        let dir = {
            let data = dir_pin.frame().read_data();
            HashDirectoryPage::from_bytes(&data[..])
        };
        dir.verify_integrity();
        Ok(())
    }

    /// Writes every dirty pooled page and syncs the backing file.
    pub fn flush(&self) -> Result<()> {
        let _table = self.table_latch.read();
        self.pool
            .flush_all(|page_id, data| {
                let mut buf = [0u8; kiln_common::page::PAGE_SIZE];
                buf.copy_from_slice(data);
                self.disk.write_page(page_id, &buf)
            })?;
        self.disk.flush()
    }
}

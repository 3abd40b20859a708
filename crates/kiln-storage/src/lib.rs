//! Storage engine for KilnDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O
//! - Fixed-width key/value codecs and comparators
//! - Record identifiers
//! - Extendible hash index over buffer-managed pages

mod codec;
mod disk;
pub mod hash;
mod record;

pub use codec::{FixedCodec, KeyComparator, OrdComparator};
pub use disk::{DiskManager, DiskManagerConfig};
pub use hash::{
    ExtendibleHashIndex, HashBucketPage, HashDirectoryPage, KeyHasher, Transaction,
    Xxh3KeyHasher, DIRECTORY_ARRAY_SIZE, DIRECTORY_MAX_DEPTH,
};
pub use record::RecordId;

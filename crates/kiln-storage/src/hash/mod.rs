//! Extendible hash index.
//!
//! An unordered, page-backed index mapping fixed-width keys to values. A
//! single directory page routes the low bits of a key's hash to bucket
//! pages holding (key, value) pairs; buckets split and the directory doubles
//! as data grows, and empty buckets fold back into their split images as it
//! shrinks.

pub mod bucket_page;
pub mod directory_page;
pub mod hasher;
pub mod index;

pub use bucket_page::HashBucketPage;
pub use directory_page::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE, DIRECTORY_MAX_DEPTH};
pub use hasher::{KeyHasher, Xxh3KeyHasher};
pub use index::{ExtendibleHashIndex, Transaction};

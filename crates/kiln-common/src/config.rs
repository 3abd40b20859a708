//! Configuration structures for KilnDB.

use crate::error::{KilnError, Result};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the page store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Page size in bytes.
    pub page_size: usize,
    /// Buffer pool size in number of pages.
    pub buffer_pool_pages: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: PAGE_SIZE,
            buffer_pool_pages: 8192, // 128 MB with 16 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * self.page_size
    }

    /// Validates the configuration.
    ///
    /// The page size must match the compile-time `PAGE_SIZE` shared by every
    /// component that touches page images.
    pub fn validate(&self) -> Result<()> {
        if self.page_size != PAGE_SIZE {
            return Err(KilnError::PageSizeMismatch {
                expected: PAGE_SIZE,
                actual: self.page_size,
            });
        }
        if self.buffer_pool_pages == 0 {
            return Err(KilnError::InvalidParameter {
                name: "buffer_pool_pages".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

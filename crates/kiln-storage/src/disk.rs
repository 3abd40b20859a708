//! Disk manager for page-level file I/O.

use kiln_common::page::{PageId, PAGE_SIZE};
use kiln_common::{KilnError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages reading and writing pages to disk files.
///
/// Each file_id maps to a separate data file. File 0 is typically
/// the main data file, while higher file IDs are used for indexes.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file handles keyed by file_id.
    files: Mutex<HashMap<u32, FileHandle>>,
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the file path for a given file ID.
    fn file_path(&self, file_id: u32) -> PathBuf {
        self.config.data_dir.join(format!("{:08}.kdb", file_id))
    }

    /// Opens or creates a data file.
    fn open_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();

        if files.contains_key(&file_id) {
            return Ok(());
        }

        let path = self.file_path(file_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        files.insert(file_id, FileHandle { file, num_pages });

        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| KilnError::IoError(format!("file {} not open", page_id.file_id)))?;

        if page_id.page_num >= handle.num_pages {
            return Err(KilnError::IoError(format!(
                "page {} does not exist in file {}",
                page_id.page_num, page_id.file_id
            )));
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.open_file(page_id.file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or_else(|| KilnError::IoError(format!("file {} not open", page_id.file_id)))?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        // Update page count if we extended the file
        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a new page in the specified file.
    ///
    /// Returns the PageId of the newly allocated page.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        self.open_file(file_id)?;

        let mut files = self.files.lock();
        let handle = files
            .get_mut(&file_id)
            .ok_or_else(|| KilnError::IoError(format!("file {} not open", file_id)))?;

        let page_num = handle.num_pages;
        let page_id = PageId::new(file_id, page_num);

        // Write an empty page to extend the file
        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_id)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.open_file(file_id)?;

        let files = self.files.lock();
        let handle = files
            .get(&file_id)
            .ok_or_else(|| KilnError::IoError(format!("file {} not open", file_id)))?;

        Ok(handle.num_pages)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        let files = self.files.lock();
        for handle in files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, handle) in files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let (dm, _dir) = create_test_disk_manager();

        let p0 = dm.allocate_page(1).unwrap();
        let p1 = dm.allocate_page(1).unwrap();

        assert_eq!(p0, PageId::new(1, 0));
        assert_eq!(p1, PageId::new(1, 1));
        assert_eq!(dm.num_pages(1).unwrap(), 2);
    }

    #[test]
    fn test_disk_manager_write_read_roundtrip() {
        let (dm, _dir) = create_test_disk_manager();
        let page_id = dm.allocate_page(0).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xDE;
        data[PAGE_SIZE - 1] = 0xAD;
        dm.write_page(page_id, &data).unwrap();

        let read = dm.read_page(page_id).unwrap();
        assert_eq!(read[0], 0xDE);
        assert_eq!(read[PAGE_SIZE - 1], 0xAD);
    }

    #[test]
    fn test_disk_manager_read_unallocated_page_fails() {
        let (dm, _dir) = create_test_disk_manager();
        dm.allocate_page(0).unwrap();

        let result = dm.read_page(PageId::new(0, 10));
        assert!(result.is_err());
    }

    #[test]
    fn test_disk_manager_allocated_page_is_zeroed() {
        let (dm, _dir) = create_test_disk_manager();
        let page_id = dm.allocate_page(0).unwrap();

        let data = dm.read_page(page_id).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_separate_files() {
        let (dm, _dir) = create_test_disk_manager();

        let p_data = dm.allocate_page(0).unwrap();
        let p_index = dm.allocate_page(3).unwrap();

        assert_eq!(p_data.page_num, 0);
        assert_eq!(p_index.page_num, 0);

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 1;
        dm.write_page(p_data, &data).unwrap();
        data[0] = 2;
        dm.write_page(p_index, &data).unwrap();

        assert_eq!(dm.read_page(p_data).unwrap()[0], 1);
        assert_eq!(dm.read_page(p_index).unwrap()[0], 2);
    }

    #[test]
    fn test_disk_manager_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };

        let page_id;
        {
            let dm = DiskManager::new(config.clone()).unwrap();
            page_id = dm.allocate_page(0).unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[100] = 0x55;
            dm.write_page(page_id, &data).unwrap();
        }

        let dm = DiskManager::new(config).unwrap();
        assert_eq!(dm.num_pages(0).unwrap(), 1);
        assert_eq!(dm.read_page(page_id).unwrap()[100], 0x55);
    }

    #[test]
    fn test_disk_manager_config_from_storage_config() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/tmp/kiln-test"),
            fsync_enabled: false,
            ..Default::default()
        };
        let config = DiskManagerConfig::from(&storage);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/kiln-test"));
        assert!(!config.fsync_enabled);
    }
}
